//! Cross-surface message envelopes.
//!
//! Wire shape is `{ "command": ..., "data": {...} }`. The `sync` command is
//! the exception: its keys sit next to `command` instead of under `data`,
//! and `tracingInfluence` carries its `epoch` the same way.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::sample::EpochId;

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    UnknownCommand(String),
    MissingPayload(Command),
    MalformedPayload { command: Command, reason: String },
    KeyNotAllowed(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownCommand(c) => write!(f, "unknown command: {c}"),
            ProtocolError::MissingPayload(c) => write!(f, "missing payload for {c}"),
            ProtocolError::MalformedPayload { command, reason } => {
                write!(f, "malformed payload for {command}: {reason}")
            }
            ProtocolError::KeyNotAllowed(k) => write!(f, "sync key not allowed: {k}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Sync,
    EpochSwitch,
    HoveredIndexSwitch,
    SelectedIndicesSwitch,
    ShownDataSwitch,
    HighlightDataSwitch,
    FocusModeSwitch,
    TracingInfluence,
    TrainingEventClicked,
    CalculateEvents,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::Sync,
        Command::EpochSwitch,
        Command::HoveredIndexSwitch,
        Command::SelectedIndicesSwitch,
        Command::ShownDataSwitch,
        Command::HighlightDataSwitch,
        Command::FocusModeSwitch,
        Command::TracingInfluence,
        Command::TrainingEventClicked,
        Command::CalculateEvents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Sync => "sync",
            Command::EpochSwitch => "epochSwitch",
            Command::HoveredIndexSwitch => "hoveredIndexSwitch",
            Command::SelectedIndicesSwitch => "selectedIndicesSwitch",
            Command::ShownDataSwitch => "shownDataSwitch",
            Command::HighlightDataSwitch => "highlightDataSwitch",
            Command::FocusModeSwitch => "focusModeSwitch",
            Command::TracingInfluence => "tracingInfluence",
            Command::TrainingEventClicked => "trainingEventClicked",
            Command::CalculateEvents => "calculateEvents",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped envelope as it travels between surfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Keys carried beside `command`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    pub fn new(command: Command, data: Value) -> Self {
        Self {
            command: command.as_str().to_string(),
            data: Some(data),
            fields: Map::new(),
        }
    }

    pub fn sync(fields: Map<String, Value>) -> Self {
        Self {
            command: Command::Sync.as_str().to_string(),
            data: None,
            fields,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// --- Typed payloads ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochSwitch {
    pub epoch: EpochId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoveredIndexSwitch {
    #[serde(default)]
    pub hovered_index: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedIndicesSwitch {
    pub selected_indices: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShownDataSwitch {
    pub shown_data: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightDataSwitch {
    pub highlight_data: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusModeSwitch {
    pub is_focus_mode: bool,
    #[serde(default)]
    pub focus_indices: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateEvents {
    pub epoch: EpochId,
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// A decoded envelope.
///
/// Training-event payloads are computed and interpreted by the backend, so
/// they stay as raw JSON here.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Sync(Map<String, Value>),
    EpochSwitch(EpochSwitch),
    HoveredIndexSwitch(HoveredIndexSwitch),
    SelectedIndicesSwitch(SelectedIndicesSwitch),
    ShownDataSwitch(ShownDataSwitch),
    HighlightDataSwitch(HighlightDataSwitch),
    FocusModeSwitch(FocusModeSwitch),
    TracingInfluence { epoch: Option<EpochId>, event: Value },
    TrainingEventClicked(Value),
    CalculateEvents(CalculateEvents),
}

fn payload<T: DeserializeOwned>(command: Command, data: Option<&Value>) -> Result<T> {
    let data = match data {
        None | Some(Value::Null) => return Err(ProtocolError::MissingPayload(command)),
        Some(v) => v,
    };
    serde_json::from_value(data.clone()).map_err(|e| ProtocolError::MalformedPayload {
        command,
        reason: e.to_string(),
    })
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

fn raw_payload(command: Command, data: Option<&Value>) -> Result<Value> {
    match data {
        None | Some(Value::Null) => Err(ProtocolError::MissingPayload(command)),
        Some(v) => Ok(v.clone()),
    }
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Sync(_) => Command::Sync,
            Message::EpochSwitch(_) => Command::EpochSwitch,
            Message::HoveredIndexSwitch(_) => Command::HoveredIndexSwitch,
            Message::SelectedIndicesSwitch(_) => Command::SelectedIndicesSwitch,
            Message::ShownDataSwitch(_) => Command::ShownDataSwitch,
            Message::HighlightDataSwitch(_) => Command::HighlightDataSwitch,
            Message::FocusModeSwitch(_) => Command::FocusModeSwitch,
            Message::TracingInfluence { .. } => Command::TracingInfluence,
            Message::TrainingEventClicked(_) => Command::TrainingEventClicked,
            Message::CalculateEvents(_) => Command::CalculateEvents,
        }
    }

    pub fn decode(envelope: &Envelope) -> Result<Self> {
        let command = Command::parse(&envelope.command)
            .ok_or_else(|| ProtocolError::UnknownCommand(envelope.command.clone()))?;
        let data = envelope.data.as_ref();

        let message = match command {
            Command::Sync => {
                // Flattened keys; a nested `data` object is accepted too.
                let mut fields = envelope.fields.clone();
                if let Some(Value::Object(nested)) = data {
                    for (k, v) in nested {
                        fields.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                if fields.is_empty() {
                    return Err(ProtocolError::MissingPayload(command));
                }
                Message::Sync(fields)
            }
            Command::EpochSwitch => Message::EpochSwitch(payload(command, data)?),
            Command::HoveredIndexSwitch => Message::HoveredIndexSwitch(payload(command, data)?),
            Command::SelectedIndicesSwitch => {
                Message::SelectedIndicesSwitch(payload(command, data)?)
            }
            Command::ShownDataSwitch => Message::ShownDataSwitch(payload(command, data)?),
            Command::HighlightDataSwitch => Message::HighlightDataSwitch(payload(command, data)?),
            Command::FocusModeSwitch => Message::FocusModeSwitch(payload(command, data)?),
            Command::TracingInfluence => {
                let epoch = match envelope.fields.get("epoch") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(serde_json::from_value(v.clone()).map_err(|e| {
                        ProtocolError::MalformedPayload {
                            command,
                            reason: e.to_string(),
                        }
                    })?),
                };
                Message::TracingInfluence {
                    epoch,
                    event: raw_payload(command, data)?,
                }
            }
            Command::TrainingEventClicked => {
                Message::TrainingEventClicked(raw_payload(command, data)?)
            }
            Command::CalculateEvents => Message::CalculateEvents(payload(command, data)?),
        };
        Ok(message)
    }

    pub fn encode(&self) -> Envelope {
        let command = self.command();
        match self {
            Message::Sync(fields) => Envelope::sync(fields.clone()),
            Message::EpochSwitch(p) => Envelope::new(command, to_value(p)),
            Message::HoveredIndexSwitch(p) => Envelope::new(command, to_value(p)),
            Message::SelectedIndicesSwitch(p) => Envelope::new(command, to_value(p)),
            Message::ShownDataSwitch(p) => Envelope::new(command, to_value(p)),
            Message::HighlightDataSwitch(p) => Envelope::new(command, to_value(p)),
            Message::FocusModeSwitch(p) => Envelope::new(command, to_value(p)),
            Message::TracingInfluence { epoch, event } => {
                let mut env = Envelope::new(command, event.clone());
                if let Some(epoch) = epoch {
                    env.fields.insert("epoch".to_string(), json!(epoch));
                }
                env
            }
            Message::TrainingEventClicked(events) => Envelope::new(command, events.clone()),
            Message::CalculateEvents(p) => Envelope::new(command, to_value(p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Envelope {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_sync_keys_are_flattened() {
        let env = parse(r#"{"command":"sync","hoveredIndex":3,"contentPath":"/tmp/run"}"#);
        assert!(env.data.is_none());
        let Message::Sync(fields) = Message::decode(&env).unwrap() else {
            panic!("expected sync");
        };
        assert_eq!(fields["hoveredIndex"], json!(3));
        assert_eq!(fields["contentPath"], json!("/tmp/run"));

        let out = Envelope::sync(fields).to_json();
        assert_eq!(out["command"], "sync");
        assert_eq!(out["hoveredIndex"], 3);
        assert!(out.get("data").is_none());
    }

    #[test]
    fn test_discrete_commands_decode() {
        let env = parse(r#"{"command":"epochSwitch","data":{"epoch":4}}"#);
        assert_eq!(
            Message::decode(&env).unwrap(),
            Message::EpochSwitch(EpochSwitch { epoch: 4 })
        );

        let env = parse(r#"{"command":"focusModeSwitch","data":{"isFocusMode":true,"focusIndices":[1,2]}}"#);
        assert_eq!(
            Message::decode(&env).unwrap(),
            Message::FocusModeSwitch(FocusModeSwitch {
                is_focus_mode: true,
                focus_indices: vec![1, 2],
            })
        );

        let env = parse(r#"{"command":"hoveredIndexSwitch","data":{}}"#);
        assert_eq!(
            Message::decode(&env).unwrap(),
            Message::HoveredIndexSwitch(HoveredIndexSwitch { hovered_index: None })
        );
    }

    #[test]
    fn test_tracing_influence_epoch_beside_command() {
        let env = parse(r#"{"command":"tracingInfluence","epoch":7,"data":{"type":"PredictionFlip","index":3}}"#);
        let msg = Message::decode(&env).unwrap();
        let Message::TracingInfluence { epoch, event } = &msg else {
            panic!("expected tracingInfluence");
        };
        assert_eq!(*epoch, Some(7));
        assert_eq!(event["type"], "PredictionFlip");
        assert_eq!(msg.encode(), env);
    }

    #[test]
    fn test_unknown_command() {
        let env = parse(r#"{"command":"teleport","data":{}}"#);
        assert_eq!(
            Message::decode(&env),
            Err(ProtocolError::UnknownCommand("teleport".into()))
        );
    }

    #[test]
    fn test_missing_payload() {
        let env = parse(r#"{"command":"selectedIndicesSwitch"}"#);
        assert_eq!(
            Message::decode(&env),
            Err(ProtocolError::MissingPayload(Command::SelectedIndicesSwitch))
        );
        let env = parse(r#"{"command":"epochSwitch","data":null}"#);
        assert!(matches!(
            Message::decode(&env),
            Err(ProtocolError::MissingPayload(_))
        ));
        let env = parse(r#"{"command":"sync"}"#);
        assert!(matches!(
            Message::decode(&env),
            Err(ProtocolError::MissingPayload(Command::Sync))
        ));
    }

    #[test]
    fn test_malformed_payload() {
        let env = parse(r#"{"command":"epochSwitch","data":{"epoch":"soon"}}"#);
        let err = Message::decode(&env).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload { .. }));
        assert!(err.to_string().starts_with("malformed payload for epochSwitch"));
    }

    #[test]
    fn test_encode_uses_camel_case() {
        let msg = Message::CalculateEvents(CalculateEvents {
            epoch: 2,
            event_types: vec!["PredictionFlip".into()],
        });
        let json = msg.encode().to_json();
        assert_eq!(json["command"], "calculateEvents");
        assert_eq!(json["data"]["eventTypes"][0], "PredictionFlip");
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_command_names_parse_back() {
        for c in Command::ALL {
            assert_eq!(Command::parse(c.as_str()), Some(c));
        }
        assert_eq!(Command::parse("Sync"), None);
    }
}
