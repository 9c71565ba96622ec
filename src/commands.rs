// commands.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::*;

/// Inbound client frame.
#[derive(Debug, Default, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    WifiGet,
    WifiSet(NetworkRecord),
    WifiStatus,
    WifiConnectSaved,
    WifiDisconnect,
    WifiEnable,
    WifiDisable,
    WifiList,
    WifiScan,
    WifiAdd(NetworkRecord),
    WifiRemove(String),
    SerialSetBaud(u32),
    SerialSend(String),
    SerialStatus,
}

/// A request that could not be turned into a [`Command`].
#[derive(Debug, PartialEq, Eq)]
pub struct CommandError {
    pub event: &'static str,
    pub action: String,
    pub message: &'static str,
}

impl CommandError {
    fn new(event: &'static str, action: impl Into<String>, message: &'static str) -> Self {
        Self {
            event,
            action: action.into(),
            message,
        }
    }

    pub fn reply(&self) -> String {
        error_event(self.event, &self.action, self.message)
    }
}

// `{ssid,password}` either inline or as a JSON string
fn network_value(value: &Value) -> Option<NetworkRecord> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        v @ Value::Object(_) => serde_json::from_value(v.clone()).ok(),
        _ => None,
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let req: WsRequest = serde_json::from_str(text)
            .map_err(|_| CommandError::new("system", "response", "Invalid JSON"))?;

        match req.kind.as_str() {
            "system" => Self::parse_system(&req),
            "serial" => Self::parse_serial(&req),
            _ => Err(CommandError::new("system", "response", "Unknown type")),
        }
    }

    fn parse_system(req: &WsRequest) -> Result<Self, CommandError> {
        if req.command != "wifi" {
            return Err(CommandError::new("system", "response", "Unknown command"));
        }
        let bad = |msg| CommandError::new("system", req.key.as_str(), msg);
        Ok(match req.key.as_str() {
            "get" => Self::WifiGet,
            "set" => Self::WifiSet(network_value(&req.value).ok_or_else(|| bad("Invalid JSON"))?),
            "status" => Self::WifiStatus,
            "connect" => Self::WifiConnectSaved,
            "disconnect" => Self::WifiDisconnect,
            "enable" => Self::WifiEnable,
            "disable" => Self::WifiDisable,
            "list" => Self::WifiList,
            "scan" => Self::WifiScan,
            "add" => Self::WifiAdd(network_value(&req.value).ok_or_else(|| bad("Invalid JSON"))?),
            "remove" => Self::WifiRemove(text_value(&req.value).ok_or_else(|| bad("Missing ssid"))?),
            _ => return Err(CommandError::new("system", "wifi", "Unknown key")),
        })
    }

    fn parse_serial(req: &WsRequest) -> Result<Self, CommandError> {
        Ok(match req.command.as_str() {
            "setBaud" => {
                let baud = match &req.value {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }
                .and_then(|b| u32::try_from(b).ok())
                .ok_or_else(|| CommandError::new("serial", "setBaud", "Invalid baud rate"))?;
                Self::SerialSetBaud(baud)
            }
            "send" => Self::SerialSend(
                text_value(&req.value)
                    .ok_or_else(|| CommandError::new("serial", "send", "Missing data"))?,
            ),
            "status" => Self::SerialStatus,
            _ => return Err(CommandError::new("serial", "response", "Not implemented")),
        })
    }

    /// Anything that takes the radio can wait behind a scan or a connection
    /// attempt for seconds.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::WifiGet
                | Self::WifiSet(_)
                | Self::WifiStatus
                | Self::WifiConnectSaved
                | Self::WifiDisconnect
                | Self::WifiDisable
                | Self::WifiScan
        )
    }
}

#[derive(Debug, Serialize)]
struct WifiStatus {
    state: StationState,
    enabled: bool,
    ssid: Option<String>,
}

fn respond<T: Serialize>(event: &str, action: &str, ok: bool, details: T, error: &str) -> String {
    let mut ev = WsEvent::new(event, action, if ok { "success" } else { "error" }, details);
    if !ok {
        ev.error = Some(error);
    }
    ev.to_json()
}

/// Expands bare line feeds to CR LF for the attached device.
pub fn to_crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Runs one command against the bridge. Returns the reply for the requesting
/// client; scan results go to every client instead.
pub fn dispatch(state: &BridgeState, cmd: Command) -> Option<String> {
    let wifi = &state.wifi;
    let reply = match cmd {
        Command::WifiGet => respond("system", "get", true, wifi.current_network(), ""),
        Command::WifiSet(n) => {
            let ok = wifi.connect(&n.ssid, &n.password);
            respond("system", "set", ok, ok.then_some("Network saved & connected"), "Connect failed")
        }
        Command::WifiStatus => respond(
            "system",
            "status",
            true,
            WifiStatus {
                state: wifi.state(),
                enabled: wifi.is_enabled(),
                ssid: wifi.current_network(),
            },
            "",
        ),
        Command::WifiConnectSaved => {
            let ok = wifi.connect_saved();
            respond("system", "connect", ok, ok, "No saved network in range")
        }
        Command::WifiDisconnect => {
            let ok = wifi.disconnect();
            respond("system", "disconnect", ok, ok, "Disconnect failed")
        }
        Command::WifiEnable => {
            wifi.activate();
            respond("system", "enable", true, wifi.is_enabled(), "")
        }
        Command::WifiDisable => {
            wifi.deactivate();
            respond("system", "disable", true, wifi.is_enabled(), "")
        }
        Command::WifiList => {
            // secrets stay on the device
            let ssids: Vec<String> = wifi.list_networks().into_iter().map(|n| n.ssid).collect();
            respond("system", "list", true, ssids, "")
        }
        Command::WifiScan => {
            let found = wifi.scan();
            state
                .events
                .broadcast_text(respond("system", "scan", true, found, ""));
            return None;
        }
        Command::WifiAdd(n) => {
            let ok = wifi.add_network(&n.ssid, &n.password);
            respond("system", "add", ok, ok.then_some(n.ssid), "Invalid network")
        }
        Command::WifiRemove(ssid) => {
            let ok = wifi.remove_network(&ssid);
            respond("system", "remove", ok, ssid, "Network not found")
        }
        Command::SerialSetBaud(baud) => match state.serial.set_baud(baud) {
            Ok(()) => respond("serial", "setBaud", true, baud, ""),
            Err(_) => respond("serial", "setBaud", false, "", "Invalid baud rate"),
        },
        Command::SerialSend(text) => {
            if !state.serial.is_device_connected() {
                respond("serial", "send", false, "", "Serial not connected")
            } else {
                let out = to_crlf(&text);
                match state.serial.send(out.as_bytes()) {
                    Ok(()) => {
                        info!(target: "device", "Sent: {}", out.trim_end());
                        respond("serial", "send", true, out, "")
                    }
                    Err(e) => {
                        error!(target: "serial", "Serial bridge gone: {e:#}");
                        respond("serial", "send", false, "", "Serial bridge not running")
                    }
                }
            }
        }
        Command::SerialStatus => serial_availability(
            state.serial.is_device_connected(),
            state.serial.baud_rate(),
        ),
    };
    Some(reply)
}

/// Parses and runs one client text frame, moving blocking work off the
/// request task.
pub async fn execute(state: Arc<Pin<Box<BridgeState>>>, text: &str) -> Option<String> {
    let cmd = match Command::parse(text) {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "api", "Bad request: {}", e.message);
            return Some(e.reply());
        }
    };
    debug!(target: "api", "Command {cmd:?}");

    if !cmd.is_blocking() {
        return dispatch(&state, cmd);
    }
    match tokio::task::spawn_blocking(move || dispatch(&state, cmd)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(target: "api", "Command worker failed: {e}");
            Some(error_event("system", "response", "Internal error"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wifi_keys() {
        let cmd = Command::parse(r#"{"type":"system","command":"wifi","key":"scan"}"#).unwrap();
        assert_eq!(cmd, Command::WifiScan);
        assert!(cmd.is_blocking());

        let cmd = Command::parse(
            r#"{"type":"system","command":"wifi","key":"add","value":{"ssid":"A","password":"p"}}"#,
        )
        .unwrap();
        assert_eq!(cmd, Command::WifiAdd(NetworkRecord::new("A", "p")));
        assert!(!cmd.is_blocking());

        let cmd = Command::parse(r#"{"type":"system","command":"wifi","key":"status"}"#).unwrap();
        assert!(cmd.is_blocking());

        // value as a JSON string, the way the web UI sends it
        let cmd = Command::parse(
            &json!({"type":"system","command":"wifi","key":"set","value":"{\"ssid\":\"B\",\"password\":\"q\"}"})
                .to_string(),
        )
        .unwrap();
        assert_eq!(cmd, Command::WifiSet(NetworkRecord::new("B", "q")));
    }

    #[test]
    fn parses_serial_commands() {
        assert_eq!(
            Command::parse(r#"{"type":"serial","command":"setBaud","value":"9600"}"#).unwrap(),
            Command::SerialSetBaud(9600)
        );
        assert_eq!(
            Command::parse(r#"{"type":"serial","command":"setBaud","value":57600}"#).unwrap(),
            Command::SerialSetBaud(57600)
        );
        assert_eq!(
            Command::parse(r#"{"type":"serial","command":"send","value":"AT"}"#).unwrap(),
            Command::SerialSend("AT".into())
        );
    }

    #[test]
    fn bad_requests_become_error_replies() {
        let err = Command::parse("{not json").unwrap_err();
        let v: Value = serde_json::from_str(&err.reply()).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "Invalid JSON");

        let err = Command::parse(r#"{"type":"system","command":"wifi","key":"bogus"}"#).unwrap_err();
        assert_eq!(err.message, "Unknown key");

        let err = Command::parse(r#"{"type":"system","command":"reboot"}"#).unwrap_err();
        assert_eq!(err.message, "Unknown command");

        let err = Command::parse(r#"{"type":"serial","command":"setBaud","value":"fast"}"#)
            .unwrap_err();
        assert_eq!(err.message, "Invalid baud rate");

        let err = Command::parse(r#"{"type":"system","command":"wifi","key":"add","value":3}"#)
            .unwrap_err();
        assert_eq!(err.action, "add");

        assert!(Command::parse(r#"{"type":"log","command":"debug"}"#).is_err());
    }

    #[test]
    fn line_feeds_become_crlf() {
        assert_eq!(to_crlf("a\nb"), "a\r\nb");
        assert_eq!(to_crlf("a\r\nb\n"), "a\r\nb\r\n");
        assert_eq!(to_crlf("plain"), "plain");
    }
}

// EOF
