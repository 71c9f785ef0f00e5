//! Continuous flight-fare sweeper with baseline-driven deal detection.
//!
//! The [`sweep`] scheduler walks every route in the universe at an adaptive
//! pace, the [`detector`] pipeline turns each quote into baselines and deals,
//! and [`alerts`] publishes the ones worth telling someone about. All state
//! lives in SQLite ([`db`]) so a restart resumes exactly where it stopped.

pub mod alerts;
pub mod api;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod provider;
pub mod sweep;
pub mod types;
