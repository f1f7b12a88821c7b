//! Common types shared across the matchmaking crates.

#![warn(clippy::pedantic)]

/// Identifier newtypes for members, rooms and connections
pub mod types;

/// Secret types that prevent accidental logging of credentials
pub mod secret;
