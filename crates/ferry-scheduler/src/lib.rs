// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session/worker scheduler for Ferry.
//!
//! Owns the mapping from sessions to the forwarding pairs they serve,
//! enforces per-session capacity, drives each session's health state
//! machine from periodic probes, and moves pairs off sessions that fail.
//! The credential store stays the source of truth for ownership; worker
//! groups are recomputed from it and never persisted.

pub mod groups;
pub mod health;
pub mod monitor;
pub mod scheduler;

pub use groups::WorkerGroup;
pub use monitor::{HealthMonitor, run_rebalance_loop};
pub use scheduler::{
    PairResolution, ReassignmentReport, RebalanceReport, Scheduler, SessionStatus,
};
