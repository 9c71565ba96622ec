// events.rs

use serde::Serialize;
use tokio::sync::broadcast;

/// Fan-out of text frames to every connected client.
pub trait Broadcast: Send + Sync {
    fn broadcast_text(&self, payload: String);
}

impl Broadcast for broadcast::Sender<String> {
    fn broadcast_text(&self, payload: String) {
        // no subscribers is fine, nobody is listening yet
        let _ = self.send(payload);
    }
}

impl<T: Broadcast + ?Sized> Broadcast for std::sync::Arc<T> {
    fn broadcast_text(&self, payload: String) {
        (**self).broadcast_text(payload)
    }
}

/// Envelope of every message sent to clients.
#[derive(Debug, Serialize)]
pub struct WsEvent<'a, T: Serialize> {
    pub event: &'a str,
    pub action: &'a str,
    pub status: &'a str,
    pub details: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

impl<'a, T: Serialize> WsEvent<'a, T> {
    pub fn new(event: &'a str, action: &'a str, status: &'a str, details: T) -> Self {
        Self {
            event,
            action,
            status,
            details,
            error: None,
        }
    }

    pub fn to_json(&self) -> String {
        // plain data structs and strings cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub fn error_event(event: &str, action: &str, error: &str) -> String {
    WsEvent {
        event,
        action,
        status: "error",
        details: "",
        error: Some(error),
    }
    .to_json()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialAvailability {
    pub available: bool,
    pub baud_rate: u32,
}

pub fn serial_availability(available: bool, baud_rate: u32) -> String {
    WsEvent::new(
        "serial",
        "status",
        "success",
        SerialAvailability {
            available,
            baud_rate,
        },
    )
    .to_json()
}

pub fn serial_incoming(text: &str) -> String {
    WsEvent::new("serial", "incoming", "data", text).to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn availability_shape() {
        let v: Value = serde_json::from_str(&serial_availability(true, 9600)).unwrap();
        assert_eq!(
            v,
            json!({
                "event": "serial",
                "action": "status",
                "status": "success",
                "details": {"available": true, "baudRate": 9600}
            })
        );
    }

    #[test]
    fn incoming_escapes_text() {
        let v: Value = serde_json::from_str(&serial_incoming("say \"hi\"")).unwrap();
        assert_eq!(v["details"], "say \"hi\"");
        assert_eq!(v["status"], "data");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn error_carries_message() {
        let v: Value = serde_json::from_str(&error_event("serial", "send", "no device")).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "no device");
    }

    #[test]
    fn sender_without_subscribers_is_quiet() {
        let (tx, _) = broadcast::channel::<String>(4);
        tx.broadcast_text("nobody".into());
        let mut rx = tx.subscribe();
        tx.broadcast_text("somebody".into());
        assert_eq!(rx.try_recv().unwrap(), "somebody");
    }
}

// EOF
