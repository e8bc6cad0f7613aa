// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Ferry.
//!
//! Mock collaborators for fast, deterministic tests without a database or
//! any platform connection.
//!
//! # Components
//!
//! - [`MemoryStore`] - in-memory credential and correlation store with conflict injection
//! - [`ScriptedProber`] - health prober that replays scripted outcomes
//! - [`MockPlatform`] - platform adapter with captured calls and scripted failures
//! - [`StaticFilter`] - keyword and per-pair filter decisions

pub mod memory_store;
pub mod mock_filter;
pub mod mock_platform;
pub mod mock_prober;

pub use memory_store::MemoryStore;
pub use mock_filter::StaticFilter;
pub use mock_platform::{MockPlatform, PlatformCall};
pub use mock_prober::ScriptedProber;
