// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default content formatting for both hops.

use ferry_core::{Content, ContentFormatter, ForwardingPair, Hop, MessageId, OutboundMessage};

const ELLIPSIS: char = '…';

/// Passes text through unchanged apart from a length cap.
///
/// Text longer than `max_len` characters is cut on a character boundary
/// and ends with an ellipsis, so the result is never longer than `max_len`.
#[derive(Debug, Clone)]
pub struct DefaultFormatter {
    max_len: usize,
}

impl DefaultFormatter {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }
}

impl ContentFormatter for DefaultFormatter {
    fn format(
        &self,
        _hop: Hop,
        _pair: &ForwardingPair,
        content: &Content,
        reply_to: Option<MessageId>,
    ) -> OutboundMessage {
        OutboundMessage {
            text: truncate(&content.text, self.max_len),
            reply_to,
        }
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_len - 1).collect();
    out.push(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate("hello", 5), "hello");
    }

    #[test]
    fn long_text_is_cut_on_char_boundary() {
        let cut = truncate("héllo wörld", 6);
        assert_eq!(cut, "héllo…");
        assert_eq!(cut.chars().count(), 6);
    }
}
