use crate::{seconds_to_ms, Caller, Severity};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const EVENT_NAMES: [&str; 6] = ["start", "msg", "end", "recent_history", "toast", "heartbeat"];

/// A server timestamp in seconds. Accepts floats, integers and numeric strings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Seconds(pub f64);

impl Seconds {
    pub fn as_ms(&self) -> i64 {
        seconds_to_ms(self.0)
    }
}

impl Serialize for Seconds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Seconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SecondsVisitor;

        impl<'de> Visitor<'de> for SecondsVisitor {
            type Value = Seconds;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a timestamp in seconds as number or string")
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if !value.is_finite() {
                    return Err(E::custom(format!("timestamp is not finite: {value}")));
                }
                Ok(Seconds(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Seconds(value as f64))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Seconds(value as f64))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let parsed = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|err| E::custom(format!("invalid timestamp '{value}': {err}")))?;
                self.visit_f64(parsed)
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(SecondsVisitor)
    }
}

/// One named event received on the operation stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start(StartPayload),
    Msg(MsgPayload),
    End(EndPayload),
    RecentHistory(RecentHistoryPayload),
    Toast(ToastPayload),
    Heartbeat(HeartbeatPayload),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start(_) => "start",
            StreamEvent::Msg(_) => "msg",
            StreamEvent::End(_) => "end",
            StreamEvent::RecentHistory(_) => "recent_history",
            StreamEvent::Toast(_) => "toast",
            StreamEvent::Heartbeat(_) => "heartbeat",
        }
    }

    /// Splits the event back into its wire name and data object.
    pub fn to_wire(&self) -> Result<(&'static str, String), EventError> {
        let mut value = serde_json::to_value(self).map_err(|err| EventError::Encode {
            event: self.name().to_string(),
            message: err.to_string(),
        })?;
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        Ok((self.name(), value.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartPayload {
    pub ref_id: String,
    pub operation_id: String,
    pub title: String,
    pub timestamp: Seconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<Caller>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MsgPayload {
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub timestamp: Seconds,
    pub level: Severity,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndPayload {
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub timestamp: Seconds,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errormsg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentHistoryPayload {
    pub operation_id: String,
    pub title: String,
    pub started_at: Seconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<Caller>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToastPayload {
    pub msg: String,
    pub level: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub current_operation: Option<String>,
    #[serde(default)]
    pub cmdline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Seconds>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("unknown event type '{0}'")]
    UnknownEvent(String),
    #[error("{event} payload is not a json object")]
    NotAnObject { event: String },
    #[error("{event} payload decode failed: {message}")]
    Decode { event: String, message: String },
    #[error("{event} payload encode failed: {message}")]
    Encode { event: String, message: String },
}

/// Decodes one named event: the data object is tagged with the event name
/// and validated against the payload shape for that name.
pub fn decode_event(name: &str, data: &str) -> Result<StreamEvent, EventError> {
    let name = name.trim();
    if !EVENT_NAMES.contains(&name) {
        return Err(EventError::UnknownEvent(name.to_string()));
    }
    let mut value = if data.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str::<Value>(data).map_err(|err| EventError::Decode {
            event: name.to_string(),
            message: err.to_string(),
        })?
    };
    let Value::Object(map) = &mut value else {
        return Err(EventError::NotAnObject {
            event: name.to_string(),
        });
    };
    map.insert("type".to_string(), Value::String(name.to_string()));
    serde_json::from_value(value).map_err(|err| EventError::Decode {
        event: name.to_string(),
        message: err.to_string(),
    })
}
