// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query functions. Each takes a [`crate::Database`] and runs on its
//! single writer thread.

pub mod correlations;
pub mod pairs;
pub mod sessions;
