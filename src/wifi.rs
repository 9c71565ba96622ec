// wifi.rs

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use crate::*;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;

pub const WIFI_NAMESPACE: &str = "wifi_config";
const KEY_ENABLED: &str = "enabled";
const KEY_NETWORKS: &str = "networks";
const KEY_LAST_SSID: &str = "ssid";
const KEY_LAST_PASSWORD: &str = "password";

/// A known network, unique by `ssid` within the persisted list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub ssid: String,
    pub password: String,
}

impl NetworkRecord {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

pub fn encode_networks(networks: &[NetworkRecord]) -> anyhow::Result<String> {
    Ok(serde_json::to_string(networks)?)
}

pub fn decode_networks(json: &str) -> anyhow::Result<Vec<NetworkRecord>> {
    Ok(serde_json::from_str(json)?)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Open,
    Wep,
    Wpa,
    Wpa2,
    WpaWpa2,
    Wpa2Enterprise,
    Wpa3,
    Wpa2Wpa3,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ssid: String,
    pub rssi: i8,
    pub auth: AuthMode,
    pub channel: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApSettings {
    pub ssid: String,
    pub password: String,
    pub addr: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mask: u8,
    pub channel: u8,
    pub hostname: String,
    /// Advertised over mDNS as `_http._tcp`.
    pub http_port: u16,
}

/// The radio: an always-on access point next to a station interface.
pub trait WifiPlatform: Send {
    fn start_access_point(&mut self, ap: &ApSettings) -> anyhow::Result<()>;
    /// Starts a station association without waiting for it.
    fn begin_connect(&mut self, ssid: &str, password: &str) -> anyhow::Result<()>;
    fn is_connected(&mut self) -> bool;
    fn connected_ssid(&mut self) -> Option<String>;
    fn disconnect(&mut self) -> anyhow::Result<()>;
    /// Blocking scan.
    fn scan(&mut self) -> anyhow::Result<Vec<ScanResult>>;
    /// Stations currently associated with the access point.
    fn ap_stations(&mut self) -> Vec<MacAddr>;
    /// Answers `<hostname>.local` and advertises the HTTP service.
    fn announce(&mut self, hostname: &str, http_port: u16) -> anyhow::Result<()>;
}

impl<T: WifiPlatform + ?Sized> WifiPlatform for Box<T> {
    fn start_access_point(&mut self, ap: &ApSettings) -> anyhow::Result<()> {
        (**self).start_access_point(ap)
    }
    fn begin_connect(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        (**self).begin_connect(ssid, password)
    }
    fn is_connected(&mut self) -> bool {
        (**self).is_connected()
    }
    fn connected_ssid(&mut self) -> Option<String> {
        (**self).connected_ssid()
    }
    fn disconnect(&mut self) -> anyhow::Result<()> {
        (**self).disconnect()
    }
    fn scan(&mut self) -> anyhow::Result<Vec<ScanResult>> {
        (**self).scan()
    }
    fn ap_stations(&mut self) -> Vec<MacAddr> {
        (**self).ap_stations()
    }
    fn announce(&mut self, hostname: &str, http_port: u16) -> anyhow::Result<()> {
        (**self).announce(hostname, http_port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StationState {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug)]
pub struct ConnectTiming {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for ConnectTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll: Duration::from_millis(500),
        }
    }
}

fn valid_credentials(ssid: &str, password: &str) -> bool {
    !ssid.is_empty() && ssid.len() <= SSID_MAX_LEN && password.len() <= PASSWORD_MAX_LEN
}

/// Persisted intent. The list, the flag and the store sit behind one lock so
/// that a mutation and its write-back cannot interleave with another.
struct WifiPrefs {
    kv: Box<dyn KvStore>,
    enabled: bool,
    networks: Vec<NetworkRecord>,
}

impl WifiPrefs {
    fn load(kv: Box<dyn KvStore>) -> Self {
        let enabled = match kv.get_bool(KEY_ENABLED) {
            Ok(v) => v.unwrap_or(true),
            Err(e) => {
                error!(target: "wifi", "Cannot read station flag: {e:#}");
                true
            }
        };
        info!(target: "wifi", "Station {}", if enabled { "enabled" } else { "disabled" });

        let networks = match kv.get_string(KEY_NETWORKS) {
            Ok(Some(json)) if !json.is_empty() => match decode_networks(&json) {
                Ok(n) => {
                    info!(target: "wifi", "Loaded {} saved networks", n.len());
                    n
                }
                Err(e) => {
                    error!(target: "wifi", "Saved networks unreadable: {e:#}");
                    Vec::new()
                }
            },
            Ok(_) => {
                info!(target: "wifi", "No saved networks");
                Vec::new()
            }
            Err(e) => {
                error!(target: "wifi", "Cannot read saved networks: {e:#}");
                Vec::new()
            }
        };

        Self {
            kv,
            enabled,
            networks,
        }
    }

    /// Replaces the list, committing only after the whole list is stored.
    fn store_networks(&mut self, networks: Vec<NetworkRecord>) -> anyhow::Result<()> {
        let json = encode_networks(&networks)?;
        self.kv.put_string(KEY_NETWORKS, &json)?;
        info!(target: "wifi", "Saved {} networks", networks.len());
        self.networks = networks;
        Ok(())
    }

    /// Insert or replace by ssid, keeping the entry's position.
    fn upsert(&mut self, record: NetworkRecord) -> anyhow::Result<()> {
        let mut networks = self.networks.clone();
        match networks.iter_mut().find(|n| n.ssid == record.ssid) {
            Some(existing) if *existing == record => return Ok(()),
            Some(existing) => existing.password = record.password,
            None => networks.push(record),
        }
        self.store_networks(networks)
    }

    fn store_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.kv.put_bool(KEY_ENABLED, enabled)?;
        self.enabled = enabled;
        Ok(())
    }
}

/// Access point plus station management with a persisted list of known networks.
pub struct ConnectivitySupervisor {
    wifi: Mutex<Box<dyn WifiPlatform>>,
    prefs: Mutex<WifiPrefs>,
    // serializes scans and connection attempts
    attempt: Mutex<()>,
    connecting: AtomicBool,
    status: StatusRegistry,
    ap: ApSettings,
    timing: ConnectTiming,
}

impl ConnectivitySupervisor {
    pub fn new(
        wifi: Box<dyn WifiPlatform>,
        kv: Box<dyn KvStore>,
        status: StatusRegistry,
        ap: ApSettings,
        timing: ConnectTiming,
    ) -> Self {
        Self {
            wifi: Mutex::new(wifi),
            prefs: Mutex::new(WifiPrefs::load(kv)),
            attempt: Mutex::new(()),
            connecting: AtomicBool::new(false),
            status,
            ap,
            timing,
        }
    }

    fn wifi(&self) -> MutexGuard<'_, Box<dyn WifiPlatform>> {
        // a panic elsewhere must not take the radio down with it
        self.wifi.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prefs(&self) -> MutexGuard<'_, WifiPrefs> {
        self.prefs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attempt(&self) -> MutexGuard<'_, ()> {
        self.attempt.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Brings up the access point, then restores the station link if it is
    /// enabled and something is saved.
    pub fn init(&self) {
        let started = self.wifi().start_access_point(&self.ap);
        match started {
            Ok(()) => {
                info!(target: "wifi", "AP started: {} on {}", self.ap.ssid, self.ap.addr);
                self.status.remove(StatusCondition::WifiApNotAvailable);
            }
            Err(e) => {
                error!(target: "wifi", "AP could not be started: {e:#}");
                self.status.add(StatusCondition::WifiApNotAvailable);
            }
        }

        let (enabled, saved) = {
            let prefs = self.prefs();
            (prefs.enabled, !prefs.networks.is_empty())
        };
        if enabled && saved {
            self.connect_saved();
        }

        let announced = self.wifi().announce(&self.ap.hostname, self.ap.http_port);
        match announced {
            Ok(()) => info!(target: "wifi", "mDNS started: {}.local", self.ap.hostname),
            Err(e) => warn!(target: "wifi", "mDNS could not be started: {e:#}"),
        }
    }

    /// Connects to the first scanned network that is also saved, in scan order.
    pub fn connect_saved(&self) -> bool {
        let (enabled, networks) = {
            let prefs = self.prefs();
            (prefs.enabled, prefs.networks.clone())
        };
        if networks.is_empty() {
            warn!(target: "wifi", "No saved networks to connect to");
            return false;
        }
        if !enabled {
            warn!(target: "wifi", "Station disabled, not connecting");
            return false;
        }

        let found = self
            .scan()
            .into_iter()
            .find_map(|seen| networks.iter().find(|n| n.ssid == seen.ssid).cloned());
        match found {
            Some(n) => self.connect(&n.ssid, &n.password),
            None => {
                warn!(target: "wifi", "No saved network in range");
                false
            }
        }
    }

    /// One bounded attempt. Success saves the network as last known good.
    pub fn connect(&self, ssid: &str, password: &str) -> bool {
        if !self.is_enabled() {
            warn!(target: "wifi", "Station disabled, not connecting to {ssid}");
            return false;
        }
        if !valid_credentials(ssid, password) {
            warn!(target: "wifi", "Rejected credentials for {ssid:?}");
            return false;
        }

        let _attempt = self.attempt();
        self.connecting.store(true, Ordering::Relaxed);
        let connected = self.try_connect(ssid, password);
        self.connecting.store(false, Ordering::Relaxed);

        if !connected {
            error!(target: "wifi", "Connection to {ssid} failed");
            self.status.add(StatusCondition::WifiStaNotAvailable);
            return false;
        }

        info!(target: "wifi", "Connected to {ssid}");
        self.status.remove(StatusCondition::WifiStaNotAvailable);
        let mut prefs = self.prefs();
        if let Err(e) = prefs.upsert(NetworkRecord::new(ssid, password)) {
            error!(target: "wifi", "Saving {ssid} failed: {e:#}");
        }
        let saved = prefs
            .kv
            .put_string(KEY_LAST_SSID, ssid)
            .and_then(|_| prefs.kv.put_string(KEY_LAST_PASSWORD, password));
        if let Err(e) = saved {
            error!(target: "wifi", "Saving last network failed: {e:#}");
        }
        true
    }

    fn try_connect(&self, ssid: &str, password: &str) -> bool {
        if let Err(e) = self.wifi().begin_connect(ssid, password) {
            error!(target: "wifi", "Connect to {ssid} not started: {e:#}");
            return false;
        }
        info!(target: "wifi", "Connecting to {ssid}");

        // the radio lock is only held per poll, the presence monitor keeps running
        let deadline = Instant::now() + self.timing.timeout;
        loop {
            if self.wifi().is_connected() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.timing.poll);
        }
    }

    pub fn disconnect(&self) -> bool {
        match self.wifi().disconnect() {
            Ok(()) => {
                info!(target: "wifi", "Station disconnected");
                true
            }
            Err(e) => {
                error!(target: "wifi", "Station disconnect failed: {e:#}");
                false
            }
        }
    }

    pub fn activate(&self) {
        if let Err(e) = self.prefs().store_enabled(true) {
            error!(target: "wifi", "Saving station flag failed: {e:#}");
        }
        info!(target: "wifi", "Station enabled");
    }

    pub fn deactivate(&self) {
        if self.wifi().is_connected() {
            self.disconnect();
        }
        if let Err(e) = self.prefs().store_enabled(false) {
            error!(target: "wifi", "Saving station flag failed: {e:#}");
        }
        self.status.remove(StatusCondition::WifiStaNotAvailable);
        info!(target: "wifi", "Station disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.prefs().enabled
    }

    /// Adds a network or replaces the secret of the one with the same ssid.
    pub fn add_network(&self, ssid: &str, password: &str) -> bool {
        if !valid_credentials(ssid, password) {
            warn!(target: "wifi", "Rejected network {ssid:?}");
            return false;
        }
        match self.prefs().upsert(NetworkRecord::new(ssid, password)) {
            Ok(()) => {
                info!(target: "wifi", "Network saved: {ssid}");
                true
            }
            Err(e) => {
                error!(target: "wifi", "Saving {ssid} failed: {e:#}");
                false
            }
        }
    }

    /// Removing an unknown ssid is a logged no-op returning `false`.
    pub fn remove_network(&self, ssid: &str) -> bool {
        let mut prefs = self.prefs();
        let before = prefs.networks.len();
        let networks: Vec<_> = prefs
            .networks
            .iter()
            .filter(|n| n.ssid != ssid)
            .cloned()
            .collect();
        if networks.len() == before {
            warn!(target: "wifi", "Network not found: {ssid}");
            return false;
        }
        match prefs.store_networks(networks) {
            Ok(()) => {
                info!(target: "wifi", "Network removed: {ssid}");
                true
            }
            Err(e) => {
                error!(target: "wifi", "Removing {ssid} failed: {e:#}");
                false
            }
        }
    }

    pub fn list_networks(&self) -> Vec<NetworkRecord> {
        self.prefs().networks.clone()
    }

    /// Platform scan; errors come back as an empty list.
    pub fn scan(&self) -> Vec<ScanResult> {
        let _attempt = self.attempt();
        let result = self.wifi().scan();
        match result {
            Ok(found) => {
                info!(target: "wifi", "Scan found {} networks", found.len());
                found
            }
            Err(e) => {
                error!(target: "wifi", "Scan failed: {e:#}");
                Vec::new()
            }
        }
    }

    /// Asked live from the radio, never cached.
    pub fn current_network(&self) -> Option<String> {
        let mut wifi = self.wifi();
        if wifi.is_connected() {
            wifi.connected_ssid()
        } else {
            None
        }
    }

    pub fn state(&self) -> StationState {
        if !self.is_enabled() {
            StationState::Disabled
        } else if self.connecting.load(Ordering::Relaxed) {
            StationState::Connecting
        } else if self.wifi().is_connected() {
            StationState::Connected
        } else {
            StationState::Disconnected
        }
    }

    pub fn last_network(&self) -> Option<NetworkRecord> {
        let prefs = self.prefs();
        let ssid = prefs.kv.get_string(KEY_LAST_SSID).ok().flatten()?;
        let password = prefs
            .kv
            .get_string(KEY_LAST_PASSWORD)
            .ok()
            .flatten()
            .unwrap_or_default();
        Some(NetworkRecord { ssid, password })
    }

    pub fn ap_stations(&self) -> Vec<MacAddr> {
        self.wifi().ap_stations()
    }
}


// EOF
