// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay pipeline for Ferry.
//!
//! Drives new, edited, and deleted source messages through filtering,
//! formatting, and the relay and destination hops. A correlation record per
//! logical message maps the source id to each hop's copy so later edits,
//! deletes, and replies reach the right downstream messages.
//!
//! # Components
//!
//! - [`RelayPipeline`] - event entry points, partial-delivery completion, connectivity checks
//! - [`Sequencer`] - per-message serialization and sequence ordering
//! - [`DefaultFormatter`] - length-capped pass-through formatting
//! - [`RetentionSweeper`] - periodic correlation purge

pub mod formatter;
pub mod pipeline;
pub mod sequencer;
pub mod sweeper;

pub use formatter::DefaultFormatter;
pub use pipeline::{
    ConnectivityReport, EventKind, Hops, RelayEvent, RelayOutcome, RelayPipeline, SweepReport,
};
pub use sequencer::{Sequenced, Sequencer};
pub use sweeper::RetentionSweeper;
