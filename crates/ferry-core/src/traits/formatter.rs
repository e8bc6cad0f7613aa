// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content formatter trait.

use crate::types::{Content, ForwardingPair, Hop, MessageId, OutboundMessage};

/// Renders filtered content for the platform of one hop.
pub trait ContentFormatter: Send + Sync {
    /// `reply_to` is the already-resolved message id on the hop's platform.
    fn format(
        &self,
        hop: Hop,
        pair: &ForwardingPair,
        content: &Content,
        reply_to: Option<MessageId>,
    ) -> OutboundMessage;
}
