// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Ferry relay scheduler.
//!
//! This crate provides the trait definitions, error types, and common types
//! shared by the scheduler, the relay pipeline, and the storage backend.
//! Platform connectors, stores, probers, filters, and formatters all plug in
//! through the traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::FerryError;
pub use types::{
    AdapterType, ChangeOutcome, ChatRef, Content, CorrelationRecord, FilterDecision,
    ForwardingPair, HealthState, HealthStatus, Hop, HopAck, InsertOutcome, MessageId,
    MessageState, NewPair, OutboundMessage, PairId, PairMove, PairStatus, ProbeOutcome,
    SessionChange, SessionRecord,
};

pub use traits::{
    ContentFormatter, CorrelationStore, CredentialStore, FilterEngine, HealthProber,
    PlatformAdapter, PluginAdapter,
};
