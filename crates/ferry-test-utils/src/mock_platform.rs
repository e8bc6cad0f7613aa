// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock platform adapter for deterministic relay tests.
//!
//! `MockPlatform` hands out sequential message ids, remembers which
//! messages exist, captures every call, and fails on demand.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ferry_core::{
    AdapterType, ChatRef, FerryError, HealthStatus, Hop, HopAck, MessageId, OutboundMessage,
    PlatformAdapter, PluginAdapter,
};

/// One captured platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Send {
        target: ChatRef,
        message: OutboundMessage,
        id: MessageId,
    },
    Edit {
        target: ChatRef,
        id: MessageId,
        message: OutboundMessage,
    },
    Delete {
        target: ChatRef,
        id: MessageId,
    },
}

struct State {
    next_id: i64,
    live: HashMap<MessageId, OutboundMessage>,
    calls: Vec<PlatformCall>,
    failing_sends: u32,
    failing_edits: u32,
    denied: HashSet<ChatRef>,
    delay: Option<Duration>,
}

/// A scripted platform for one hop.
pub struct MockPlatform {
    name: String,
    hop: Hop,
    state: Mutex<State>,
}

impl MockPlatform {
    /// A platform whose first sent message gets id `first_id`.
    pub fn new(name: &str, hop: Hop, first_id: i64) -> Self {
        Self {
            name: name.to_string(),
            hop,
            state: Mutex::new(State {
                next_id: first_id,
                live: HashMap::new(),
                calls: Vec::new(),
                failing_sends: 0,
                failing_edits: 0,
                denied: HashSet::new(),
                delay: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `n` sends with a delivery error.
    pub fn fail_next_sends(&self, n: u32) {
        self.state().failing_sends = n;
    }

    /// Fail the next `n` edits with a delivery error.
    pub fn fail_next_edits(&self, n: u32) {
        self.state().failing_edits = n;
    }

    /// Make `validate_access` report no access to `chat`.
    pub fn deny(&self, chat: &str) {
        self.state().denied.insert(chat.into());
    }

    /// Sleep this long inside every call before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Forget a message as if it was removed on the platform side.
    pub fn vanish(&self, id: &str) {
        self.state().live.remove(&MessageId::from(id));
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    pub fn sends(&self) -> Vec<OutboundMessage> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Send { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.sends().len()
    }

    /// Current text of a live message.
    pub fn text_of(&self, id: &str) -> Option<String> {
        self.state()
            .live
            .get(&MessageId::from(id))
            .map(|m| m.text.clone())
    }

    async fn pause(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn failure(&self, what: &str) -> FerryError {
        FerryError::DeliveryFailed {
            hop: self.hop,
            message: format!("{} {what} failed", self.name),
            source: None,
        }
    }
}

#[async_trait]
impl PluginAdapter for MockPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Platform
    }

    async fn health_check(&self) -> Result<HealthStatus, FerryError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FerryError> {
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    async fn send(
        &self,
        target: &ChatRef,
        message: &OutboundMessage,
    ) -> Result<MessageId, FerryError> {
        self.pause().await;
        let mut state = self.state();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(self.failure("send"));
        }
        let id = MessageId::from(state.next_id);
        state.next_id += 1;
        state.live.insert(id.clone(), message.clone());
        state.calls.push(PlatformCall::Send {
            target: target.clone(),
            message: message.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn edit(
        &self,
        target: &ChatRef,
        id: &MessageId,
        message: &OutboundMessage,
    ) -> Result<HopAck, FerryError> {
        self.pause().await;
        let mut state = self.state();
        if state.failing_edits > 0 {
            state.failing_edits -= 1;
            return Err(self.failure("edit"));
        }
        state.calls.push(PlatformCall::Edit {
            target: target.clone(),
            id: id.clone(),
            message: message.clone(),
        });
        match state.live.get_mut(id) {
            Some(live) => {
                *live = message.clone();
                Ok(HopAck::Done)
            }
            None => Ok(HopAck::Gone),
        }
    }

    async fn delete(&self, target: &ChatRef, id: &MessageId) -> Result<HopAck, FerryError> {
        self.pause().await;
        let mut state = self.state();
        state.calls.push(PlatformCall::Delete {
            target: target.clone(),
            id: id.clone(),
        });
        match state.live.remove(id) {
            Some(_) => Ok(HopAck::Done),
            None => Ok(HopAck::Gone),
        }
    }

    async fn validate_access(&self, target: &ChatRef) -> Result<bool, FerryError> {
        Ok(!self.state().denied.contains(target))
    }
}
