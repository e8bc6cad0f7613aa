// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform adapter trait for one hop of the relay.

use async_trait::async_trait;

use crate::error::FerryError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ChatRef, HopAck, MessageId, OutboundMessage};

/// Capability set the pipeline calls against for source, relay, and destination chats.
///
/// Edits and deletes of a message that no longer exists return
/// [`HopAck::Gone`] instead of an error.
#[async_trait]
pub trait PlatformAdapter: PluginAdapter {
    /// Sends a message and returns the platform's id for it.
    async fn send(
        &self,
        target: &ChatRef,
        message: &OutboundMessage,
    ) -> Result<MessageId, FerryError>;

    async fn edit(
        &self,
        target: &ChatRef,
        id: &MessageId,
        message: &OutboundMessage,
    ) -> Result<HopAck, FerryError>;

    async fn delete(&self, target: &ChatRef, id: &MessageId) -> Result<HopAck, FerryError>;

    /// Whether the adapter's identity can currently reach the chat.
    async fn validate_access(&self, target: &ChatRef) -> Result<bool, FerryError>;
}
