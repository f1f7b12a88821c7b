//! Blind Date Matchmaking Service Library
//!
//! Runs a timed, capacity-bounded group matching event over WebSocket
//! connections:
//!
//! - Members are batched into fixed-size rooms as they connect
//! - A full room is walked through a scripted sequence of system messages
//!   and chat windows
//! - Members vote for one participant; reciprocated votes open a private
//!   chatroom for the pair
//!
//! # Architecture
//!
//! ```text
//! WebSocket gateway ──ENTER/LEAVE──► membership lane ─┐
//!        │          ──CHOICE──────► choice lane ──────┤
//!        │                                            ▼
//!        │                               LaneConsumer (per lane)
//!        │                                            │
//!        │                                         Engine
//!        │                     ┌──────────┬───────────┼───────────┐
//!        │                 Allocator  RoomRegistry  Ledger   Choreography
//!        │                     └──────────┴─────┬─────┘    (per full room)
//!        │                                 SharedStore
//!        ◄──── ConnectionHub ◄── RedisRelay ◄── BroadcastSink
//! ```
//!
//! # Key Design Decisions
//!
//! - **Store is authoritative**: rooms, member index, choices and matches live
//!   in the shared store; every mutation is a guarded commit retried on
//!   conflict, so several instances can consume the same lanes
//! - **Single-threaded lanes**: one consumer per lane per instance applies jobs
//!   in order; a failing job is dropped, never the loop
//! - **Exactly-once start**: the WAITING -> PROCESSING transition is claimed in
//!   the store and only the claimant launches the choreography
//!
//! # Modules
//!
//! - [`store`] - shared store abstraction, Redis and in-memory backends
//! - [`room`] - room records, registry, allocator and matching ledger
//! - [`queue`] - job wire format, lanes and consumers
//! - [`engine`] - job handlers and the per-room choreography
//! - [`gateway`] - WebSocket endpoint, connection hub and admin API
//! - [`window`] - global event window

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcast;
pub mod chatroom;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod queue;
pub mod room;
pub mod store;
pub mod window;
