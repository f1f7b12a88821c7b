//! # Matchmaking Test Utilities
//!
//! Shared test utilities for the matchmaking service.
//!
//! Everything here runs without Redis or a chatroom service: the store is
//! `InMemoryStore`, outbound events land in a `RecordingSink`, and chatroom
//! creation is answered by `MockChatroomCreator`.
//!
//! ## Modules
//!
//! - `engine_harness` - engine wired to in-memory collaborators
//! - `server_harness` - gateway and admin API on a random local port
//! - `fixtures` - ids, jobs and fast choreography timings
//!
//! ## Usage
//!
//! ```rust,ignore
//! use match_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let harness = EngineHarness::new().await;
//!     harness.open_window(2).await;
//!
//!     harness.enter(1).await.unwrap();
//!     harness.enter(2).await.unwrap();
//!
//!     let room = harness.room_of(1).await.unwrap();
//!     assert!(harness.room_events(&room).contains(&"start"));
//! }
//! ```

pub mod engine_harness;
pub mod fixtures;
pub mod server_harness;

pub use engine_harness::EngineHarness;
pub use fixtures::*;
pub use server_harness::TestMatchServer;
