// state.rs

use anyhow::Context;
use std::sync::atomic::AtomicU64;
use tokio::sync::broadcast;

use crate::*;

const CHANSZ: usize = 32;

/// Hardware handed to [`launch`].
pub struct Platform<I, P> {
    pub indicator: I,
    pub serial: P,
    pub wifi: Box<dyn WifiPlatform>,
    /// Store opened on the `wifi_config` namespace.
    pub wifi_store: Box<dyn KvStore>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeTimings {
    pub indicator: IndicatorTiming,
    pub batch: BatchTiming,
    pub connect: ConnectTiming,
    pub presence: PresenceTiming,
}

pub struct BridgeState {
    pub config: BridgeConfig,
    pub status: StatusRegistry,
    pub wifi: Arc<ConnectivitySupervisor>,
    pub serial: SerialHandle,
    pub events: broadcast::Sender<String>,
    pub api_cnt: AtomicU64,
}

/// Wires every worker together and starts them. Blocks while the station
/// link is restored.
pub fn launch<I, P>(
    config: BridgeConfig,
    platform: Platform<I, P>,
    timings: BridgeTimings,
) -> anyhow::Result<Arc<Pin<Box<BridgeState>>>>
where
    I: Indicator + 'static,
    P: SerialPort + 'static,
{
    let status = StatusRegistry::new();
    status.add(StatusCondition::Initializing);

    StatusAggregator::new(status.clone(), platform.indicator, timings.indicator)
        .start()
        .context("status worker")?;

    let (events, _) = broadcast::channel(CHANSZ);

    let (mut bridge, serial) = SerialBridge::new(
        platform.serial,
        events.clone(),
        status.clone(),
        timings.batch,
    );
    if let Err(e) = bridge.configure(config.bps) {
        error!(target: "serial", "UART setup failed: {e:#}");
    }
    bridge.start().context("serial worker")?;

    let wifi = Arc::new(ConnectivitySupervisor::new(
        platform.wifi,
        platform.wifi_store,
        status.clone(),
        config.access_point(),
        timings.connect,
    ));
    wifi.init();

    PeerPresenceMonitor::new(status.clone(), timings.presence.threshold)
        .start(wifi.clone(), timings.presence.poll)
        .context("presence worker")?;

    status.remove(StatusCondition::Initializing);
    info!("Bridge up, firmware {FW_VERSION} built {FW_TIMESTAMP}");

    Ok(Arc::new(Box::pin(BridgeState {
        config,
        status,
        wifi,
        serial,
        events,
        api_cnt: AtomicU64::new(0),
    })))
}

// EOF
