//! # Spot-the-Difference Game Server Library
//!
//! Authoritative server for a real-time two-image difference-spotting game.
//! Levels are produced by comparing two same-resolution images, grouping
//! the differing pixels, and publishing the result; players then race to
//! click every difference before the session ends.
//!
//! ## Architecture
//!
//! The server uses a single event loop: the UDP gateway deserializes frames
//! into inbound messages and feeds them, together with per-room one-second
//! timer ticks, through one channel into the lobby. Every message runs to
//! completion before the next, so all game state is mutated without locks
//! and timer-driven transitions never race client requests.
//!
//! ## Modules
//!
//! - [`detector`]: pixel diff, radius expansion, and difference grouping
//! - [`level`]: published-level catalog and cached difference indices
//! - [`session`]: per-room state, clocks, and timer handles
//! - [`matchmaking`]: duo reservations, join queues, and the coop slot
//! - [`gameplay`]: click validation and end-of-session rules
//! - [`lobby`]: the orchestrator consuming every inbound message
//! - [`leaderboard`]: three-slot rankings per level and party size
//! - [`history`]: the append-only session log
//! - [`gateway`]: UDP transport tasks and the run loop

pub mod detector;
pub mod error;
pub mod gameplay;
pub mod gateway;
pub mod history;
pub mod leaderboard;
pub mod level;
pub mod lobby;
pub mod matchmaking;
pub mod session;
pub mod utils;
