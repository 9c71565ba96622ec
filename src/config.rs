// config.rs

use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::*;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FW_TIMESTAMP: &str = env!("SOURCE_TIMESTAMP");

const CONFIG_KEY: &str = "cfg";
static CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub port: u16,
    pub hostname: String,

    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_addr: Ipv4Addr,
    pub ap_gateway: Ipv4Addr,
    pub ap_mask: u8,
    pub ap_channel: u8,

    pub bps: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 80,
            hostname: "hs-access".into(),
            ap_ssid: "ESP32-AccessPoint".into(),
            ap_password: "12345678".into(),
            ap_addr: Ipv4Addr::new(192, 168, 5, 1),
            ap_gateway: Ipv4Addr::new(192, 168, 5, 1),
            ap_mask: 24,
            ap_channel: 1,
            bps: 115_200,
        }
    }
}

impl BridgeConfig {
    /// Reads the config blob. `None` means missing, corrupt or an invalid value,
    /// the caller falls back to defaults.
    pub fn from_nvs(nvs: &mut impl KvStore) -> Option<Self> {
        let blob = match nvs.get_blob(CONFIG_KEY) {
            Ok(Some(b)) => b,
            Ok(None) => {
                info!("No config in nvs");
                return None;
            }
            Err(e) => {
                error!("Nvs read error: {e:#}");
                return None;
            }
        };

        let config: Self = match postcard::from_bytes_crc32(&blob, CRC.digest()) {
            Ok(c) => c,
            Err(e) => {
                error!("Config decode error: {e}");
                return None;
            }
        };

        if let Err(e) = config.validate() {
            error!("Stored config rejected: {e:#}");
            return None;
        }
        Some(config)
    }

    pub fn to_nvs(&self, nvs: &mut impl KvStore) -> anyhow::Result<()> {
        self.validate()?;
        let blob = postcard::to_allocvec_crc32(self, CRC.digest())?;
        nvs.put_blob(CONFIG_KEY, &blob)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ap_mask > 30 {
            anyhow::bail!("AP mask error: bits must be between 0..30");
        }
        if !BAUD_RATES.contains(&self.bps) {
            anyhow::bail!("Unsupported baud rate {}", self.bps);
        }
        if self.ap_ssid.is_empty() || self.ap_ssid.len() > SSID_MAX_LEN {
            anyhow::bail!("AP ssid must be 1..{SSID_MAX_LEN} bytes");
        }
        // WPA2 needs 8..63 characters, empty means an open AP
        if !self.ap_password.is_empty() && !(8..=63).contains(&self.ap_password.len()) {
            anyhow::bail!("AP password must be empty or 8..63 bytes");
        }
        Ok(())
    }

    pub fn access_point(&self) -> ApSettings {
        ApSettings {
            ssid: self.ap_ssid.clone(),
            password: self.ap_password.clone(),
            addr: self.ap_addr,
            gateway: self.ap_gateway,
            mask: self.ap_mask,
            channel: self.ap_channel,
            hostname: self.hostname.clone(),
            http_port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemStore;

    #[test]
    fn firmware_is_stamped() {
        assert!(!FW_VERSION.is_empty());
        assert!(FW_TIMESTAMP.contains('T'), "{FW_TIMESTAMP}");
    }

    #[test]
    fn config_survives_nvs() {
        let mut nvs = MemStore::new();
        let mut config = BridgeConfig::default();
        config.bps = 9600;
        config.hostname = "bench".into();
        config.to_nvs(&mut nvs).unwrap();

        assert_eq!(BridgeConfig::from_nvs(&mut nvs), Some(config));
    }

    #[test]
    fn corrupt_blob_falls_back() {
        let mut nvs = MemStore::new();
        BridgeConfig::default().to_nvs(&mut nvs).unwrap();

        let mut blob = nvs.get_blob(CONFIG_KEY).unwrap().unwrap();
        blob[2] ^= 0xff;
        nvs.put_blob(CONFIG_KEY, &blob).unwrap();

        assert_eq!(BridgeConfig::from_nvs(&mut nvs), None);
    }

    #[test]
    fn invalid_config_is_not_saved() {
        let mut nvs = MemStore::new();
        let config = BridgeConfig {
            bps: 12345,
            ..Default::default()
        };
        assert!(config.to_nvs(&mut nvs).is_err());
        assert_eq!(nvs.get_blob(CONFIG_KEY).unwrap(), None);

        let config = BridgeConfig {
            ap_password: "short".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

// EOF
