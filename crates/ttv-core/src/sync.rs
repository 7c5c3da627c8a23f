//! Property synchronization between rendering surfaces.
//!
//! Each surface owns a `SyncChannel`. Outbound writes and inbound updates go
//! through one per-key cache of the last known value, so repeating a value,
//! receiving a duplicate, or echoing back what was just received are all
//! no-ops.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::highlight::HighlightStateMachine;
use crate::message::{Envelope, Message, ProtocolError};

/// Properties that may travel in a `sync` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncKey {
    HoveredIndex,
    SelectedIndices,
    ContentPath,
    TextData,
    AttentionData,
    OriginalTextData,
    InherentLabelData,
}

impl SyncKey {
    pub const ALL: [SyncKey; 7] = [
        SyncKey::HoveredIndex,
        SyncKey::SelectedIndices,
        SyncKey::ContentPath,
        SyncKey::TextData,
        SyncKey::AttentionData,
        SyncKey::OriginalTextData,
        SyncKey::InherentLabelData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKey::HoveredIndex => "hoveredIndex",
            SyncKey::SelectedIndices => "selectedIndices",
            SyncKey::ContentPath => "contentPath",
            SyncKey::TextData => "textData",
            SyncKey::AttentionData => "attentionData",
            SyncKey::OriginalTextData => "originalTextData",
            SyncKey::InherentLabelData => "inherentLabelData",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-way delivery of envelopes towards the host.
pub trait Transport {
    /// Returns false if the other end is gone.
    fn post(&self, envelope: Envelope) -> bool;
}

impl Transport for std::sync::mpsc::Sender<Envelope> {
    fn post(&self, envelope: Envelope) -> bool {
        self.send(envelope).is_ok()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub sent: u64,
    /// Outbound writes and inbound updates skipped because the value was unchanged.
    pub suppressed: u64,
    pub applied: u64,
    /// Envelopes or keys rejected as protocol errors.
    pub dropped: u64,
}

/// What an inbound envelope amounted to.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Allow-listed keys whose value changed, other than `hoveredIndex`
    /// which has already been applied to the highlight state.
    Synced(Vec<(SyncKey, Value)>),
    /// A discrete command for the surface to act on.
    Command(Message),
    Dropped(ProtocolError),
}

pub struct SyncChannel<T> {
    transport: T,
    last: HashMap<SyncKey, Value>,
    stats: SyncStats,
}

impl<T> fmt::Debug for SyncChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncChannel")
            .field("last", &self.last)
            .field("stats", &self.stats)
            .finish()
    }
}

fn hovered_from_value(value: &Value) -> Option<Option<usize>> {
    match value {
        Value::Null => Some(None),
        Value::Number(n) => n.as_u64().map(|v| Some(v as usize)),
        _ => None,
    }
}

impl<T: Transport> SyncChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            last: HashMap::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Record `value` as known without sending it, so a later identical
    /// `sync_out` is suppressed.
    pub fn remember(&mut self, key: SyncKey, value: Value) {
        self.last.insert(key, value);
    }

    /// Forget every cached value, e.g. when new content is loaded.
    pub fn clear(&mut self) {
        self.last.clear();
    }

    fn post(&mut self, envelope: Envelope) -> bool {
        let command = envelope.command.clone();
        if self.transport.post(envelope) {
            self.stats.sent += 1;
            true
        } else {
            debug!(command = %command, "transport closed, envelope not delivered");
            false
        }
    }

    /// Send `key = value` unless it equals the last known value.
    ///
    /// Returns whether an envelope was posted.
    pub fn sync_out(&mut self, key: SyncKey, value: impl Serialize) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "unserializable sync value");
                return false;
            }
        };
        if self.last.get(&key) == Some(&value) {
            self.stats.suppressed += 1;
            return false;
        }
        self.last.insert(key, value.clone());
        let mut fields = Map::new();
        fields.insert(key.as_str().to_string(), value);
        self.post(Envelope::sync(fields))
    }

    /// Post a discrete command. These are never deduplicated.
    pub fn send(&mut self, message: &Message) -> bool {
        self.post(message.encode())
    }

    pub fn record_dropped(&mut self, error: &ProtocolError) {
        warn!(error = %error, "dropping message");
        self.stats.dropped += 1;
    }

    /// Apply the keys of a `sync` envelope.
    ///
    /// `hoveredIndex` goes straight to `highlight`; other changed keys are
    /// returned for the caller's property bag.
    pub fn apply_sync(
        &mut self,
        fields: &Map<String, Value>,
        highlight: &mut HighlightStateMachine,
    ) -> Vec<(SyncKey, Value)> {
        let mut changed = Vec::new();
        for (name, value) in fields {
            let Some(key) = SyncKey::parse(name) else {
                self.record_dropped(&ProtocolError::KeyNotAllowed(name.clone()));
                continue;
            };
            if self.last.get(&key) == Some(value) {
                self.stats.suppressed += 1;
                continue;
            }
            if key == SyncKey::HoveredIndex {
                let Some(hovered) = hovered_from_value(value) else {
                    self.record_dropped(&ProtocolError::MalformedPayload {
                        command: crate::message::Command::Sync,
                        reason: format!("hoveredIndex must be an index or null, got {value}"),
                    });
                    continue;
                };
                highlight.set_hovered(hovered);
            } else {
                changed.push((key, value.clone()));
            }
            self.last.insert(key, value.clone());
            self.stats.applied += 1;
        }
        changed
    }

    /// Decode and apply one inbound envelope. Never fails; protocol errors
    /// are logged, counted and reported as [`Inbound::Dropped`].
    pub fn receive(&mut self, envelope: &Envelope, highlight: &mut HighlightStateMachine) -> Inbound {
        match Message::decode(envelope) {
            Ok(Message::Sync(fields)) => Inbound::Synced(self.apply_sync(&fields, highlight)),
            Ok(message) => Inbound::Command(message),
            Err(e) => {
                self.record_dropped(&e);
                Inbound::Dropped(e)
            }
        }
    }
}
