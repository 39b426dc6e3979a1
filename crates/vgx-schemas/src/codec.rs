//! Broker wire codec, shared by publish and consume paths so both sides of
//! the stream agree on one (de)serialization function.

use serde::{Deserialize, Serialize};

use crate::{EventEnvelope, Payload};

/// Broker-level wire shape. `json` carries the serialized `EventEnvelope`;
/// `r#type` duplicates `event_type` at the outer layer so a consumer can
/// route without deserializing the envelope body. `data` is accepted on
/// read as a legacy alias for `json` but never written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub r#type: String,
    pub json: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WireMessageRead {
    r#type: String,
    #[serde(default)]
    json: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

pub fn encode(envelope: &EventEnvelope<Payload>) -> Result<WireMessage, serde_json::Error> {
    Ok(WireMessage {
        r#type: envelope.event_type.clone(),
        json: serde_json::to_string(envelope)?,
    })
}

pub fn decode(fields: &[(String, String)]) -> Result<EventEnvelope<Payload>, DecodeError> {
    let mut r#type = None;
    let mut json = None;
    let mut data = None;
    for (k, v) in fields {
        match k.as_str() {
            "type" => r#type = Some(v.clone()),
            "json" => json = Some(v.clone()),
            "data" => data = Some(v.clone()),
            _ => {}
        }
    }
    let read = WireMessageRead {
        r#type: r#type.ok_or(DecodeError::MissingField("type"))?,
        json,
        data,
    };
    let body = read
        .json
        .or(read.data)
        .ok_or(DecodeError::MissingField("json"))?;
    serde_json::from_str(&body).map_err(DecodeError::Json)
}

#[derive(Debug)]
pub enum DecodeError {
    MissingField(&'static str),
    Json(serde_json::Error),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e)
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MissingField(name) => write!(f, "missing broker field: {name}"),
            DecodeError::Json(e) => write!(f, "invalid envelope json: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}
