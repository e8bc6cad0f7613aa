// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits consumed by the scheduler and the relay pipeline.
//!
//! Adapters that own external resources extend the [`PluginAdapter`] base
//! trait. All async traits use `#[async_trait]` for dynamic dispatch.

pub mod adapter;
pub mod correlation;
pub mod filter;
pub mod formatter;
pub mod platform;
pub mod prober;
pub mod store;

pub use adapter::PluginAdapter;
pub use correlation::CorrelationStore;
pub use filter::FilterEngine;
pub use formatter::ContentFormatter;
pub use platform::PlatformAdapter;
pub use prober::HealthProber;
pub use store::CredentialStore;
