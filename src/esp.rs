// esp.rs

use anyhow::anyhow;
use embedded_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration,
};
use esp_idf_hal::{
    delay::NON_BLOCK,
    gpio::{AnyIOPin, AnyInputPin, AnyOutputPin, Pin},
    modem::Modem,
    peripheral::Peripheral,
    uart::{self, Uart, UartDriver},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    ipv4::{self, Mask, RouterConfiguration, Subnet},
    mdns::EspMdns,
    netif::{EspNetif, NetifConfiguration, NetifStack},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{EspWifi, WifiDriver},
};
use esp_idf_sys::esp;

use crate::*;

pub struct EspNvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl EspNvsStore {
    pub fn open(partition: EspDefaultNvsPartition, namespace: &str) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, namespace, true)?;
        info!("Got namespace {namespace:?} from default partition");
        Ok(Self { nvs })
    }
}

impl KvStore for EspNvsStore {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let Some(len) = self.nvs.str_len(key)? else {
            return Ok(None);
        };
        let mut buf = vec![0; len];
        Ok(self.nvs.get_str(key, &mut buf)?.map(str::to_string))
    }

    fn put_string(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        Ok(self.nvs.set_str(key, value)?)
    }

    fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        Ok(self.nvs.get_u8(key)?.map(|v| v != 0))
    }

    fn put_bool(&mut self, key: &str, value: bool) -> anyhow::Result<()> {
        Ok(self.nvs.set_u8(key, value as u8)?)
    }

    fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(len) = self.nvs.blob_len(key)? else {
            return Ok(None);
        };
        let mut buf = vec![0; len];
        Ok(self.nvs.get_blob(key, &mut buf)?.map(<[u8]>::to_vec))
    }

    fn put_blob(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(self.nvs.set_blob(key, value)?)
    }
}

pub struct EspUartPort {
    uart: UartDriver<'static>,
    tx_gpio: i32,
    rx_gpio: i32,
}

impl EspUartPort {
    pub fn new(
        uart: impl Peripheral<P = impl Uart> + 'static,
        tx: AnyOutputPin,
        rx: AnyInputPin,
        bps: u32,
    ) -> anyhow::Result<Self> {
        use uart::config::*;
        let ser_config = Config::new()
            .flow_control(FlowControl::None)
            .parity_none()
            .data_bits(DataBits::DataBits8)
            .stop_bits(StopBits::STOP1)
            .baudrate(Hertz(bps));
        info!(target: "serial", "UART config:\n{ser_config:#?}");

        let (tx_gpio, rx_gpio) = (tx.pin() as i32, rx.pin() as i32);
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &ser_config,
        )?;
        info!(target: "serial", "UART opened, tx gpio{tx_gpio} rx gpio{rx_gpio}");
        Ok(Self {
            uart,
            tx_gpio,
            rx_gpio,
        })
    }
}

impl SerialPort for EspUartPort {
    fn set_baudrate(&mut self, baud: u32) -> anyhow::Result<()> {
        self.uart.change_baudrate(Hertz(baud))?;
        Ok(())
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut b = [0u8; 1];
        match self.uart.read(&mut b, NON_BLOCK) {
            Ok(1) => Some(b[0]),
            _ => None,
        }
    }

    fn write_all(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.uart.write(rest)?;
            if n == 0 {
                anyhow::bail!("UART write stalled");
            }
            rest = &rest[n..];
        }
        Ok(())
    }

    fn lines_idle_high(&mut self) -> bool {
        // SAFETY: reading the level of a configured gpio has no side effects
        unsafe {
            esp_idf_sys::gpio_get_level(self.rx_gpio) == 1
                && esp_idf_sys::gpio_get_level(self.tx_gpio) == 1
        }
    }
}

fn auth_mode(method: Option<AuthMethod>) -> AuthMode {
    match method {
        Some(AuthMethod::None) => AuthMode::Open,
        Some(AuthMethod::WEP) => AuthMode::Wep,
        Some(AuthMethod::WPA) => AuthMode::Wpa,
        Some(AuthMethod::WPA2Personal) => AuthMode::Wpa2,
        Some(AuthMethod::WPAWPA2Personal) => AuthMode::WpaWpa2,
        Some(AuthMethod::WPA2Enterprise) => AuthMode::Wpa2Enterprise,
        Some(AuthMethod::WPA3Personal) => AuthMode::Wpa3,
        Some(AuthMethod::WPA2WPA3Personal) => AuthMode::Wpa2Wpa3,
        _ => AuthMode::Unknown,
    }
}

fn secured(password: &str) -> AuthMethod {
    if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    }
}

/// Radio in mixed AP+STA mode, the AP on a fixed router netif.
pub struct EspWifiPlatform {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    ap: AccessPointConfiguration,
    station_ssid: Option<String>,
    mdns: Option<EspMdns>,
}

impl EspWifiPlatform {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        ap: &ApSettings,
    ) -> anyhow::Result<Self> {
        let driver = WifiDriver::new(modem, sysloop, nvs)?;

        let ap_netif = EspNetif::new_with_conf(&NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: ap.addr,
                    mask: Mask(ap.mask),
                },
                dhcp_enabled: true,
                dns: None,
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        })?;
        let mut sta_netif = EspNetif::new(NetifStack::Sta)?;
        sta_netif.set_hostname(&ap.hostname)?;

        let wifi = EspWifi::wrap_all(driver, sta_netif, ap_netif)?;
        Ok(Self {
            wifi,
            client: ClientConfiguration::default(),
            ap: AccessPointConfiguration::default(),
            station_ssid: None,
            mdns: None,
        })
    }

    fn apply(&mut self) -> anyhow::Result<()> {
        self.wifi
            .set_configuration(&Configuration::Mixed(self.client.clone(), self.ap.clone()))?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl WifiPlatform for EspWifiPlatform {
    fn start_access_point(&mut self, ap: &ApSettings) -> anyhow::Result<()> {
        self.ap = AccessPointConfiguration {
            ssid: ap
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("AP ssid too long"))?,
            password: ap
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("AP password too long"))?,
            auth_method: secured(&ap.password),
            channel: ap.channel,
            ssid_hidden: false,
            max_connections: 4,
            ..Default::default()
        };
        self.apply()
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        if self.wifi.is_connected()? {
            self.wifi.disconnect()?;
        }
        self.client = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| anyhow!("ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("password too long"))?,
            auth_method: secured(password),
            ..Default::default()
        };
        self.apply()?;
        self.station_ssid = Some(ssid.to_string());
        self.wifi.connect()?;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn connected_ssid(&mut self) -> Option<String> {
        if self.is_connected() {
            self.station_ssid.clone()
        } else {
            None
        }
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.wifi.disconnect()?;
        Ok(())
    }

    fn scan(&mut self) -> anyhow::Result<Vec<ScanResult>> {
        Ok(self
            .wifi
            .scan()?
            .into_iter()
            .map(|ap| ScanResult {
                ssid: ap.ssid.to_string(),
                rssi: ap.signal_strength,
                auth: auth_mode(ap.auth_method),
                channel: ap.channel,
            })
            .collect())
    }

    fn ap_stations(&mut self) -> Vec<MacAddr> {
        let mut list = esp_idf_sys::wifi_sta_list_t::default();
        // SAFETY: `list` outlives the call and the driver is running
        if let Err(e) = esp!(unsafe { esp_idf_sys::esp_wifi_ap_get_sta_list(&mut list) }) {
            debug!(target: "wifi", "Station list unavailable: {e}");
            return Vec::new();
        }
        let n = (list.num.max(0) as usize).min(list.sta.len());
        list.sta[..n].iter().map(|s| MacAddr(s.mac)).collect()
    }

    fn announce(&mut self, hostname: &str, http_port: u16) -> anyhow::Result<()> {
        let mut mdns = match self.mdns.take() {
            Some(m) => m,
            None => EspMdns::take()?,
        };
        mdns.set_hostname(hostname)?;
        mdns.set_instance_name(hostname)?;
        mdns.add_service(None, "_http", "_tcp", http_port, &[])?;
        self.mdns = Some(mdns);
        Ok(())
    }
}

// EOF
