//! Wire frames exchanged with observers.
//!
//! Every frame is a JSON object with a `"type"` discriminator and an
//! ISO-8601 `timestamp` on server-originated frames.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WELCOME_MESSAGE: &str = "Connected to scalewise autoscaler";

/// Kind of a broadcast scaling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScalingDecision,
    ScalingExecution,
    AnomalyDetection,
    ForecastUpdate,
    HealthStatus,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScalingDecision => "scaling_decision",
            Self::ScalingExecution => "scaling_execution",
            Self::AnomalyDetection => "anomaly_detection",
            Self::ForecastUpdate => "forecast_update",
            Self::HealthStatus => "health_status",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frames sent from the server to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionEstablished {
        client_id: String,
        timestamp: DateTime<Utc>,
        message: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    SubscriptionConfirmed {
        /// Echoed verbatim from the `subscribe` request.
        events: Vec<Value>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    ScalingEvent {
        event_type: EventType,
        data: Value,
        timestamp: DateTime<Utc>,
    },
}

impl ServerFrame {
    pub fn welcome(client_id: impl Into<String>) -> Self {
        Self::ConnectionEstablished {
            client_id: client_id.into(),
            timestamp: Utc::now(),
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// A scaling event carrying any serializable payload.
    pub fn event(event_type: EventType, data: &impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or_else(|e| {
            tracing::warn!(%event_type, error = %e, "event payload not serializable");
            Value::Null
        });
        Self::ScalingEvent {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        // Frames hold only strings, timestamps and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames an observer may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe {
        #[serde(default)]
        events: Vec<Value>,
    },
}

/// Answer an inbound text message.
///
/// Anything that is not a well-formed `ping` or `subscribe` frame is
/// answered with an `error` frame; the connection stays open either way.
pub fn reply_for(text: &str) -> ServerFrame {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Ping) => ServerFrame::Pong {
            timestamp: Utc::now(),
        },
        Ok(ClientFrame::Subscribe { events }) => ServerFrame::SubscriptionConfirmed {
            events,
            timestamp: Utc::now(),
        },
        Err(e) if e.is_data() => ServerFrame::error("Unrecognized message type"),
        Err(_) => ServerFrame::error("Invalid JSON format"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_gets_pong() {
        assert!(matches!(reply_for(r#"{"type":"ping"}"#), ServerFrame::Pong { .. }));
    }

    #[test]
    fn subscribe_echoes_events_uninterpreted() {
        let reply = reply_for(r#"{"type":"subscribe","events":["scaling_decision",42]}"#);
        match reply {
            ServerFrame::SubscriptionConfirmed { events, .. } => {
                assert_eq!(events, vec![json!("scaling_decision"), json!(42)]);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn subscribe_without_events_confirms_empty_list() {
        match reply_for(r#"{"type":"subscribe"}"#) {
            ServerFrame::SubscriptionConfirmed { events, .. } => assert!(events.is_empty()),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn malformed_input_gets_error_frame() {
        for input in ["not json", "{", r#"{"type":"shutdown"}"#, r#"{"no_type":1}"#, "[]"] {
            assert!(
                matches!(reply_for(input), ServerFrame::Error { .. }),
                "input {input:?} should produce an error frame"
            );
        }
        match reply_for("not json") {
            ServerFrame::Error { message, .. } => assert_eq!(message, "Invalid JSON format"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn scaling_event_wire_shape() {
        let frame = ServerFrame::event(EventType::ScalingExecution, &json!({"target": 6}));
        let v: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(v["type"], "scaling_event");
        assert_eq!(v["event_type"], "scaling_execution");
        assert_eq!(v["data"]["target"], 6);
        assert!(v["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn welcome_wire_shape() {
        let v: Value = serde_json::from_str(&ServerFrame::welcome("client_1").to_json()).unwrap();
        assert_eq!(v["type"], "connection_established");
        assert_eq!(v["client_id"], "client_1");
        assert_eq!(v["message"], WELCOME_MESSAGE);
    }
}
