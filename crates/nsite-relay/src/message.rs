//! Relay protocol messages.
//!
//! Every frame is a JSON array whose first element names the message type.
//! Both directions are modelled so that tooling and tests can speak the relay
//! side of the protocol too.

use nsite_types::{EventId, Filter, SignedEvent};
use serde_json::{Value, json};

use crate::error::RelayError;

/// A message sent from a client to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `["REQ", <id>, <filter>...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <id>]`
    Close(String),
    /// `["EVENT", <event>]`
    Event(SignedEvent),
    /// `["NEG-OPEN", <id>, <filter>, <hex message>]`
    NegOpen {
        subscription_id: String,
        filter: Filter,
        message: String,
    },
    /// `["NEG-MSG", <id>, <hex message>]`
    NegMsg {
        subscription_id: String,
        message: String,
    },
    /// `["NEG-CLOSE", <id>]`
    NegClose(String),
}

/// A message sent from a relay to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `["EVENT", <id>, <event>]`
    Event {
        subscription_id: String,
        event: Box<SignedEvent>,
    },
    /// `["EOSE", <id>]`: stored events have all been sent.
    Eose(String),
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok {
        event_id: EventId,
        accepted: bool,
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice(String),
    /// `["CLOSED", <id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// `["NEG-MSG", <id>, <hex message>]`
    NegMsg {
        subscription_id: String,
        message: String,
    },
    /// `["NEG-ERR", <id>, <reason>]`
    NegErr {
        subscription_id: String,
        message: String,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                frame.extend(filters.iter().map(|f| json!(f)));
                Value::Array(frame)
            }
            Self::Close(id) => json!(["CLOSE", id]),
            Self::Event(event) => json!(["EVENT", event]),
            Self::NegOpen {
                subscription_id,
                filter,
                message,
            } => json!(["NEG-OPEN", subscription_id, filter, message]),
            Self::NegMsg {
                subscription_id,
                message,
            } => json!(["NEG-MSG", subscription_id, message]),
            Self::NegClose(id) => json!(["NEG-CLOSE", id]),
        };
        value.to_string()
    }

    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let frame: Vec<Value> = serde_json::from_str(text)?;
        let kind = str_at(&frame, 0)?;
        let msg = match kind {
            "REQ" => Self::Req {
                subscription_id: str_at(&frame, 1)?.to_string(),
                filters: frame
                    .iter()
                    .skip(2)
                    .map(|v| serde_json::from_value(v.clone()))
                    .collect::<Result<_, _>>()?,
            },
            "CLOSE" => Self::Close(str_at(&frame, 1)?.to_string()),
            "EVENT" => Self::Event(serde_json::from_value(value_at(&frame, 1)?.clone())?),
            "NEG-OPEN" => Self::NegOpen {
                subscription_id: str_at(&frame, 1)?.to_string(),
                filter: serde_json::from_value(value_at(&frame, 2)?.clone())?,
                message: str_at(&frame, 3)?.to_string(),
            },
            "NEG-MSG" => Self::NegMsg {
                subscription_id: str_at(&frame, 1)?.to_string(),
                message: str_at(&frame, 2)?.to_string(),
            },
            "NEG-CLOSE" => Self::NegClose(str_at(&frame, 1)?.to_string()),
            other => return Err(RelayError::Protocol(format!("unknown client message {other}"))),
        };
        Ok(msg)
    }
}

impl RelayMessage {
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            Self::Eose(id) => json!(["EOSE", id]),
            Self::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            Self::Notice(message) => json!(["NOTICE", message]),
            Self::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            Self::NegMsg {
                subscription_id,
                message,
            } => json!(["NEG-MSG", subscription_id, message]),
            Self::NegErr {
                subscription_id,
                message,
            } => json!(["NEG-ERR", subscription_id, message]),
        };
        value.to_string()
    }

    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let frame: Vec<Value> = serde_json::from_str(text)?;
        let kind = str_at(&frame, 0)?;
        let msg = match kind {
            "EVENT" => Self::Event {
                subscription_id: str_at(&frame, 1)?.to_string(),
                event: Box::new(serde_json::from_value(value_at(&frame, 2)?.clone())?),
            },
            "EOSE" => Self::Eose(str_at(&frame, 1)?.to_string()),
            "OK" => Self::Ok {
                event_id: EventId::from_hex(str_at(&frame, 1)?)
                    .map_err(|e| RelayError::Protocol(e.to_string()))?,
                accepted: value_at(&frame, 2)?.as_bool().unwrap_or(false),
                message: optional_str_at(&frame, 3),
            },
            "NOTICE" => Self::Notice(optional_str_at(&frame, 1)),
            "CLOSED" => Self::Closed {
                subscription_id: str_at(&frame, 1)?.to_string(),
                message: optional_str_at(&frame, 2),
            },
            "NEG-MSG" => Self::NegMsg {
                subscription_id: str_at(&frame, 1)?.to_string(),
                message: str_at(&frame, 2)?.to_string(),
            },
            "NEG-ERR" => Self::NegErr {
                subscription_id: str_at(&frame, 1)?.to_string(),
                message: optional_str_at(&frame, 2),
            },
            other => return Err(RelayError::Protocol(format!("unknown relay message {other}"))),
        };
        Ok(msg)
    }
}

fn value_at(frame: &[Value], idx: usize) -> Result<&Value, RelayError> {
    frame
        .get(idx)
        .ok_or_else(|| RelayError::Protocol(format!("frame too short: missing element {idx}")))
}

fn str_at(frame: &[Value], idx: usize) -> Result<&str, RelayError> {
    value_at(frame, idx)?
        .as_str()
        .ok_or_else(|| RelayError::Protocol(format!("element {idx} is not a string")))
}

fn optional_str_at(frame: &[Value], idx: usize) -> String {
    frame
        .get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
