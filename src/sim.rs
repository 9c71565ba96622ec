// sim.rs

//! Host stand-ins for the device hardware, used by the tests and the host
//! simulator binary.

use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use crate::*;

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Debug)]
enum Stored {
    Str(String),
    Bool(bool),
    Blob(Vec<u8>),
}

/// In-memory key-value store. Clones share the same contents, like two
/// handles on one flash namespace.
#[derive(Clone, Default)]
pub struct MemStore {
    entries: Arc<Mutex<HashMap<String, Stored>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<Stored> {
        locked(&self.entries).get(key).cloned()
    }

    fn put(&self, key: &str, value: Stored) {
        locked(&self.entries).insert(key.to_string(), value);
    }
}

impl KvStore for MemStore {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Stored::Str(s)) => Ok(Some(s)),
            Some(other) => anyhow::bail!("{key}: not a string: {other:?}"),
        }
    }

    fn put_string(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.put(key, Stored::Str(value.to_string()));
        Ok(())
    }

    fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Stored::Bool(b)) => Ok(Some(b)),
            Some(other) => anyhow::bail!("{key}: not a bool: {other:?}"),
        }
    }

    fn put_bool(&mut self, key: &str, value: bool) -> anyhow::Result<()> {
        self.put(key, Stored::Bool(value));
        Ok(())
    }

    fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Stored::Blob(b)) => Ok(Some(b)),
            Some(other) => anyhow::bail!("{key}: not a blob: {other:?}"),
        }
    }

    fn put_blob(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.put(key, Stored::Blob(value.to_vec()));
        Ok(())
    }
}

/// Output pin that remembers its level and logs changes.
#[derive(Clone)]
pub struct SimPin {
    name: &'static str,
    high: Arc<AtomicBool>,
}

impl SimPin {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            high: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_high(&self) -> bool {
        self.high.load(Ordering::Relaxed)
    }

    fn drive(&mut self, high: bool) {
        if self.high.swap(high, Ordering::Relaxed) != high {
            debug!(target: "status", "led {} {}", self.name, if high { "on" } else { "off" });
        }
    }
}

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightEvent {
    pub light: Light,
    pub on: bool,
}

#[derive(Default)]
struct Lights {
    events: Vec<LightEvent>,
    lit: [bool; 3],
}

fn light_index(light: Light) -> usize {
    match light {
        Light::Red => 0,
        Light::Yellow => 1,
        Light::Green => 2,
    }
}

/// Indicator that records every light change.
#[derive(Clone, Default)]
pub struct RecordingIndicator {
    inner: Arc<Mutex<Lights>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the recorded changes.
    pub fn take(&self) -> Vec<LightEvent> {
        std::mem::take(&mut locked(&self.inner).events)
    }

    /// Lights currently on, red first.
    pub fn lit(&self) -> Vec<Light> {
        let inner = locked(&self.inner);
        [Light::Red, Light::Yellow, Light::Green]
            .into_iter()
            .filter(|l| inner.lit[light_index(*l)])
            .collect()
    }
}

impl Indicator for RecordingIndicator {
    fn set(&mut self, light: Light, on: bool) {
        let mut inner = locked(&self.inner);
        inner.lit[light_index(light)] = on;
        inner.events.push(LightEvent { light, on });
    }
}

/// Broadcast sink that keeps every payload.
#[derive(Clone, Default)]
pub struct RecordingBroadcast {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *locked(&self.sent))
    }
}

impl Broadcast for RecordingBroadcast {
    fn broadcast_text(&self, payload: String) {
        locked(&self.sent).push(payload);
    }
}

#[derive(Default)]
struct Uart {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    baud: u32,
    lines_high: bool,
}

/// UART fed from the test side.
#[derive(Clone, Default)]
pub struct ScriptedSerial {
    inner: Arc<Mutex<Uart>>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes as if the attached device had sent them.
    pub fn feed(&self, bytes: &[u8]) {
        locked(&self.inner).rx.extend(bytes);
    }

    pub fn set_lines_high(&self, high: bool) {
        locked(&self.inner).lines_high = high;
    }

    pub fn baud(&self) -> u32 {
        locked(&self.inner).baud
    }

    pub fn written(&self) -> Vec<u8> {
        locked(&self.inner).written.clone()
    }
}

impl SerialPort for ScriptedSerial {
    fn set_baudrate(&mut self, baud: u32) -> anyhow::Result<()> {
        locked(&self.inner).baud = baud;
        Ok(())
    }

    fn read_byte(&mut self) -> Option<u8> {
        locked(&self.inner).rx.pop_front()
    }

    fn write_all(&mut self, data: &[u8]) -> anyhow::Result<()> {
        locked(&self.inner).written.extend_from_slice(data);
        Ok(())
    }

    fn lines_idle_high(&mut self) -> bool {
        locked(&self.inner).lines_high
    }
}

#[derive(Default)]
struct Radio {
    in_range: Vec<(ScanResult, String)>,
    connected: Option<String>,
    stations: Vec<MacAddr>,
    ap: Option<ApSettings>,
    fail_ap: bool,
    fail_scan: bool,
    fail_mdns: bool,
    announced: Option<(String, u16)>,
    scan_delay: Duration,
    associate_delay: Duration,
    associating: Option<(String, Instant)>,
    scan_calls: usize,
    connect_calls: usize,
}

/// Simulated radio. Networks added with [`SimWifi::add_network`] are in range
/// and accept exactly their password; anything else never associates.
#[derive(Clone, Default)]
pub struct SimWifi {
    inner: Arc<Mutex<Radio>>,
}

impl SimWifi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_network(&self, ssid: &str, password: &str, rssi: i8) {
        let mut radio = locked(&self.inner);
        let channel = (radio.in_range.len() % 11) as u8 + 1;
        let auth = if password.is_empty() {
            AuthMode::Open
        } else {
            AuthMode::Wpa2
        };
        radio.in_range.push((
            ScanResult {
                ssid: ssid.to_string(),
                rssi,
                auth,
                channel,
            },
            password.to_string(),
        ));
    }

    pub fn set_stations(&self, stations: &[MacAddr]) {
        locked(&self.inner).stations = stations.to_vec();
    }

    pub fn fail_access_point(&self, fail: bool) {
        locked(&self.inner).fail_ap = fail;
    }

    pub fn fail_scan(&self, fail: bool) {
        locked(&self.inner).fail_scan = fail;
    }

    pub fn fail_mdns(&self, fail: bool) {
        locked(&self.inner).fail_mdns = fail;
    }

    /// Every scan takes this long.
    pub fn set_scan_delay(&self, delay: Duration) {
        locked(&self.inner).scan_delay = delay;
    }

    /// An accepted association only completes after this long.
    pub fn set_associate_delay(&self, delay: Duration) {
        locked(&self.inner).associate_delay = delay;
    }

    /// Hostname and port of the running mDNS responder.
    pub fn announced(&self) -> Option<(String, u16)> {
        locked(&self.inner).announced.clone()
    }

    pub fn access_point(&self) -> Option<ApSettings> {
        locked(&self.inner).ap.clone()
    }

    pub fn scan_calls(&self) -> usize {
        locked(&self.inner).scan_calls
    }

    pub fn connect_calls(&self) -> usize {
        locked(&self.inner).connect_calls
    }
}

impl WifiPlatform for SimWifi {
    fn start_access_point(&mut self, ap: &ApSettings) -> anyhow::Result<()> {
        let mut radio = locked(&self.inner);
        if radio.fail_ap {
            radio.ap = None;
            anyhow::bail!("softAP refused to start");
        }
        radio.ap = Some(ap.clone());
        Ok(())
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        let mut radio = locked(&self.inner);
        radio.connect_calls += 1;
        let accepted = radio
            .in_range
            .iter()
            .any(|(n, pw)| n.ssid == ssid && pw == password);
        radio.connected = None;
        radio.associating = accepted.then(|| (ssid.to_string(), Instant::now()));
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.connected_ssid().is_some()
    }

    fn connected_ssid(&mut self) -> Option<String> {
        let mut radio = locked(&self.inner);
        let delay = radio.associate_delay;
        if let Some((ssid, since)) = radio.associating.take() {
            if since.elapsed() >= delay {
                radio.connected = Some(ssid);
            } else {
                radio.associating = Some((ssid, since));
            }
        }
        radio.connected.clone()
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        let mut radio = locked(&self.inner);
        radio.connected = None;
        radio.associating = None;
        Ok(())
    }

    fn scan(&mut self) -> anyhow::Result<Vec<ScanResult>> {
        let delay = {
            let mut radio = locked(&self.inner);
            radio.scan_calls += 1;
            radio.scan_delay
        };
        thread::sleep(delay);
        let radio = locked(&self.inner);
        if radio.fail_scan {
            anyhow::bail!("scan aborted");
        }
        Ok(radio.in_range.iter().map(|(n, _)| n.clone()).collect())
    }

    fn ap_stations(&mut self) -> Vec<MacAddr> {
        locked(&self.inner).stations.clone()
    }

    fn announce(&mut self, hostname: &str, http_port: u16) -> anyhow::Result<()> {
        let mut radio = locked(&self.inner);
        if radio.fail_mdns {
            anyhow::bail!("mDNS responder refused to start");
        }
        radio.announced = Some((hostname.to_string(), http_port));
        Ok(())
    }
}

// EOF
