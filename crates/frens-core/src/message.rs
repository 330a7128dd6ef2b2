//! NIP-01 / NIP-42 message frames exchanged between clients and relays.
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use crate::event::Event;
use crate::filter::Filter;

pub const NOTICE_CODE_INVALID_JSON: &str = "invalid_json";
pub const NOTICE_CODE_UNSUPPORTED_VERB: &str = "unsupported_verb";
pub const NOTICE_CODE_INVALID_FRAME: &str = "invalid_frame";

#[derive(Debug, Clone, PartialEq)]
/// Frames a client sends to a relay.
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close {
        subscription_id: String,
    },
    Auth(Event),
}

#[derive(Debug, Clone, PartialEq)]
/// Frames a relay sends to a client.
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
    Auth {
        challenge: String,
    },
}

impl ClientMessage {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Event(_) => "EVENT",
            Self::Req { .. } => "REQ",
            Self::Close { .. } => "CLOSE",
            Self::Auth(_) => "AUTH",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                frame.extend(filters.iter().map(|filter| json!(filter)));
                Value::Array(frame)
            }
            Self::Close { subscription_id } => json!(["CLOSE", subscription_id]),
            Self::Auth(event) => json!(["AUTH", event]),
        }
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

impl RelayMessage {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Event { .. } => "EVENT",
            Self::Ok { .. } => "OK",
            Self::Eose { .. } => "EOSE",
            Self::Closed { .. } => "CLOSED",
            Self::Notice { .. } => "NOTICE",
            Self::Auth { .. } => "AUTH",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            Self::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            Self::Eose { subscription_id } => json!(["EOSE", subscription_id]),
            Self::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            Self::Notice { message } => json!(["NOTICE", message]),
            Self::Auth { challenge } => json!(["AUTH", challenge]),
        }
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

fn split_frame(raw: &str) -> Result<(String, Vec<Value>)> {
    let value = serde_json::from_str::<Value>(raw).context("failed to parse frame JSON")?;
    let Value::Array(mut items) = value else {
        bail!("frame must be a JSON array");
    };
    if items.is_empty() {
        bail!("frame must not be empty");
    }
    let verb = match items.remove(0) {
        Value::String(verb) => verb,
        _ => bail!("frame verb must be a string"),
    };
    Ok((verb, items))
}

fn take_string(items: &mut Vec<Value>, label: &str) -> Result<String> {
    if items.is_empty() {
        bail!("frame is missing {label}");
    }
    match items.remove(0) {
        Value::String(value) => Ok(value),
        _ => bail!("frame {label} must be a string"),
    }
}

fn take_event(items: &mut Vec<Value>) -> Result<Event> {
    if items.is_empty() {
        bail!("frame is missing event object");
    }
    serde_json::from_value::<Event>(items.remove(0)).context("frame event object is malformed")
}

pub fn parse_client_message(raw: &str) -> Result<ClientMessage> {
    let (verb, mut items) = split_frame(raw)?;
    match verb.as_str() {
        "EVENT" => Ok(ClientMessage::Event(take_event(&mut items)?)),
        "AUTH" => Ok(ClientMessage::Auth(take_event(&mut items)?)),
        "REQ" => {
            let subscription_id = take_string(&mut items, "subscription id")?;
            validate_subscription_id(&subscription_id)?;
            if items.is_empty() {
                bail!("REQ frame requires at least one filter");
            }
            let filters = items
                .into_iter()
                .map(|item| serde_json::from_value::<Filter>(item).context("REQ filter is malformed"))
                .collect::<Result<Vec<_>>>()?;
            Ok(ClientMessage::Req {
                subscription_id,
                filters,
            })
        }
        "CLOSE" => {
            let subscription_id = take_string(&mut items, "subscription id")?;
            validate_subscription_id(&subscription_id)?;
            Ok(ClientMessage::Close { subscription_id })
        }
        other => bail!("unsupported message verb '{other}'; supported verbs are EVENT, REQ, CLOSE, AUTH"),
    }
}

pub fn parse_relay_message(raw: &str) -> Result<RelayMessage> {
    let (verb, mut items) = split_frame(raw)?;
    match verb.as_str() {
        "EVENT" => {
            let subscription_id = take_string(&mut items, "subscription id")?;
            let event = take_event(&mut items)?;
            Ok(RelayMessage::Event {
                subscription_id,
                event,
            })
        }
        "OK" => {
            let event_id = take_string(&mut items, "event id")?;
            if items.is_empty() {
                bail!("OK frame is missing accepted flag");
            }
            let accepted = items
                .remove(0)
                .as_bool()
                .ok_or_else(|| anyhow!("OK frame accepted flag must be a boolean"))?;
            let message = take_string(&mut items, "message").unwrap_or_default();
            Ok(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            })
        }
        "EOSE" => Ok(RelayMessage::Eose {
            subscription_id: take_string(&mut items, "subscription id")?,
        }),
        "CLOSED" => {
            let subscription_id = take_string(&mut items, "subscription id")?;
            let message = take_string(&mut items, "message").unwrap_or_default();
            Ok(RelayMessage::Closed {
                subscription_id,
                message,
            })
        }
        "NOTICE" => Ok(RelayMessage::Notice {
            message: take_string(&mut items, "message")?,
        }),
        "AUTH" => Ok(RelayMessage::Auth {
            challenge: take_string(&mut items, "challenge")?,
        }),
        other => bail!("unsupported relay message verb '{other}'"),
    }
}

fn validate_subscription_id(subscription_id: &str) -> Result<()> {
    if subscription_id.is_empty() {
        bail!("subscription id must be non-empty");
    }
    if subscription_id.chars().count() > 64 {
        bail!("subscription id must be at most 64 characters");
    }
    Ok(())
}

/// Maps a parse error message onto a stable notice code.
pub fn classify_client_message_error(message: &str) -> &'static str {
    if message.contains("failed to parse frame JSON") {
        NOTICE_CODE_INVALID_JSON
    } else if message.contains("unsupported message verb") {
        NOTICE_CODE_UNSUPPORTED_VERB
    } else {
        NOTICE_CODE_INVALID_FRAME
    }
}
