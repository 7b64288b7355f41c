//! Live-stream capture service: watches a list of users, records each one
//! while they are live and delivers the recording when it ends.

pub mod artifact;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod probe;
pub mod scheduler;
pub mod supervisor;
pub mod watchlist;
