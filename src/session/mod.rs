//! Collection sessions
//!
//! A session owns one session directory and the three worker threads. The
//! [`SessionController`] starts and stops it, [`SharedState`] carries the
//! counters and flags the presentation layer reads, and [`api`] maps both
//! onto JSON-friendly request and response types.

pub mod api;
pub mod controller;
pub mod state;

pub use controller::{sanitize_label, LatestSamples, SessionController};
pub use state::{SessionState, SharedState};
