// bin/esp32wsbridge.rs

#![warn(clippy::large_futures)]

use esp32wsbridge::*;

#[cfg(all(feature = "esp32c3", feature = "esp32s"))]
compile_error!("Select only one hardware feature: `esp32c3` or `esp32s`");
#[cfg(not(any(feature = "esp32c3", feature = "esp32s")))]
compile_error!("Select a hardware feature: `esp32c3` or `esp32s`");

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::main()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    host::main()
}

#[cfg(target_os = "espidf")]
mod device {
    use esp_idf_hal::{
        delay::FreeRtos,
        gpio::{InputPin, OutputPin, PinDriver},
        prelude::Peripherals,
    };
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs};
    use esp_idf_sys::esp;

    use super::*;

    pub fn main() -> anyhow::Result<()> {
        esp_idf_sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();

        // eventfd is needed by our mio poll implementation.  Note you should set max_fds
        // higher if you have other code that may need eventfd.
        #[allow(clippy::needless_update)]
        let config = esp_idf_sys::esp_vfs_eventfd_config_t {
            max_fds: 1,
            ..Default::default()
        };
        esp! { unsafe { esp_idf_sys::esp_vfs_eventfd_register(&config) } }?;

        info!("Hello.");
        info!("Starting up, firmware version {FW_VERSION}");

        let sysloop = EspSystemEventLoop::take()?;
        let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

        let ns = env!("CARGO_BIN_NAME");
        let mut nvs = EspNvsStore::open(nvs_default_partition.clone(), ns)?;
        let config = match BridgeConfig::from_nvs(&mut nvs) {
            None => {
                error!("Could not read nvs config, using defaults");
                let c = BridgeConfig::default();
                c.to_nvs(&mut nvs)?;
                info!("Successfully saved default config to nvs.");
                c
            }

            // using settings saved on nvs if we could find them
            Some(c) => c,
        };
        info!("My config:\n{config:#?}");
        let wifi_store = EspNvsStore::open(nvs_default_partition.clone(), WIFI_NAMESPACE)?;

        let peripherals = Peripherals::take()?;
        let pins = peripherals.pins;

        #[cfg(feature = "esp32c3")]
        let (tx, rx, red, yellow, green) = (
            pins.gpio0.downgrade_output(),
            pins.gpio1.downgrade_input(),
            pins.gpio3.downgrade_output(),
            pins.gpio4.downgrade_output(),
            pins.gpio5.downgrade_output(),
        );

        #[cfg(feature = "esp32s")]
        let (tx, rx, red, yellow, green) = (
            pins.gpio17.downgrade_output(),
            pins.gpio16.downgrade_input(),
            pins.gpio33.downgrade_output(),
            pins.gpio27.downgrade_output(),
            pins.gpio26.downgrade_output(),
        );

        let indicator = LedIndicator::new(
            PinDriver::output(red)?,
            PinDriver::output(yellow)?,
            PinDriver::output(green)?,
        );
        let serial = EspUartPort::new(peripherals.uart1, tx, rx, config.bps)?;
        let wifi = EspWifiPlatform::new(
            peripherals.modem,
            sysloop,
            Some(nvs_default_partition),
            &config.access_point(),
        )?;

        let state = launch(
            config,
            Platform {
                indicator,
                serial,
                wifi: Box::new(wifi),
                wifi_store: Box::new(wifi_store),
            },
            BridgeTimings::default(),
        )?;

        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(Box::pin(async move {
                info!("Entering main loop...");
                if let Err(e) = Box::pin(run_api_server(state)).await {
                    error!("run_api_server() failed: {e:#}");
                }
                error!("run_api_server() ended.");
            }));

        // not actually returning from main() but we reboot instead!
        info!("main() finished, reboot.");
        FreeRtos::delay_ms(3000);
        esp_idf_hal::reset::restart();
    }
}

#[cfg(not(target_os = "espidf"))]
mod host {
    use std::net::SocketAddr;
    use tracing_subscriber::EnvFilter;

    use super::*;
    use esp32wsbridge::sim::{MemStore, ScriptedSerial, SimPin, SimWifi};

    const SIM_PORT: u16 = 8080;

    pub fn main() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
        info!("Starting host simulator, firmware version {FW_VERSION}");

        let mut nvs = MemStore::new();
        let config = BridgeConfig::from_nvs(&mut nvs).unwrap_or_else(|| BridgeConfig {
            port: SIM_PORT,
            ..Default::default()
        });
        config.to_nvs(&mut nvs)?;

        let radio = SimWifi::new();
        radio.add_network("bench-lab", "labpass1", -48);
        radio.add_network("guest", "", -71);
        radio.set_stations(&[MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01])]);

        let uart = ScriptedSerial::new();
        uart.set_lines_high(true);

        let state = launch(
            config,
            Platform {
                indicator: LedIndicator::new(
                    SimPin::new("red"),
                    SimPin::new("yellow"),
                    SimPin::new("green"),
                ),
                serial: uart.clone(),
                wifi: Box::new(radio),
                wifi_store: Box::new(MemStore::new()),
            },
            BridgeTimings::default(),
        )?;

        thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || {
                for n in 1u64.. {
                    thread::sleep(Duration::from_secs(5));
                    uart.feed(format!("heartbeat {n}\r\n").as_bytes());
                }
            })?;

        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(Box::pin(async move {
                let addr = SocketAddr::from(([127, 0, 0, 1], state.config.port));
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!(target: "api", "API server listening to {addr}");
                serve_api(listener, state).await
            }))
    }
}

// EOF
