// presence.rs

use crate::*;

const PRESENCE_STACK: usize = 4096;

#[derive(Clone, Copy, Debug)]
pub struct PresenceTiming {
    pub poll: Duration,
    /// Consecutive consistent polls before a transition is accepted.
    pub threshold: u32,
}

impl Default for PresenceTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(2),
            threshold: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Unknown,
    NoPeers,
    HasPeers,
}

/// Debounced view of the stations attached to the access point.
pub struct PeerPresenceMonitor {
    status: StatusRegistry,
    threshold: u32,
    state: PeerState,
    empty_polls: u32,
    present_polls: u32,
    known: Vec<MacAddr>,
}

impl PeerPresenceMonitor {
    pub fn new(status: StatusRegistry, threshold: u32) -> Self {
        Self {
            status,
            threshold: threshold.max(1),
            state: PeerState::Unknown,
            empty_polls: 0,
            present_polls: 0,
            known: Vec::new(),
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn known(&self) -> &[MacAddr] {
        &self.known
    }

    /// Feeds one poll. Returns the stations that were not known before.
    pub fn observe(&mut self, stations: &[MacAddr]) -> Vec<MacAddr> {
        if stations.is_empty() {
            self.present_polls = 0;
            self.empty_polls = self.empty_polls.saturating_add(1);
            if self.empty_polls >= self.threshold {
                self.state = PeerState::NoPeers;
                self.status.add(StatusCondition::WifiApNoDevice);
                if !self.known.is_empty() {
                    self.known.clear();
                    info!(target: "wifi", "No device connected to the AP");
                }
            }
            return Vec::new();
        }

        self.empty_polls = 0;
        self.present_polls = self.present_polls.saturating_add(1);
        if self.present_polls < self.threshold {
            return Vec::new();
        }

        self.state = PeerState::HasPeers;
        self.status.remove(StatusCondition::WifiApNoDevice);
        let fresh: Vec<MacAddr> = stations
            .iter()
            .filter(|mac| !self.known.contains(mac))
            .copied()
            .collect();
        for mac in &fresh {
            info!(target: "wifi", "Device connected to the AP. MAC: {mac}");
        }
        self.known = stations.to_vec();
        fresh
    }

    pub fn start(
        mut self,
        wifi: Arc<ConnectivitySupervisor>,
        poll: Duration,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("presence".into())
            .stack_size(PRESENCE_STACK)
            .spawn(move || loop {
                let stations = wifi.ap_stations();
                self.observe(&stations);
                thread::sleep(poll);
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 1]);
    const B: MacAddr = MacAddr([0xbb, 0, 0, 0, 0, 2]);

    fn monitor() -> (StatusRegistry, PeerPresenceMonitor) {
        let status = StatusRegistry::new();
        (status.clone(), PeerPresenceMonitor::new(status, 2))
    }

    #[test]
    fn single_empty_poll_does_not_flap() {
        let (status, mut mon) = monitor();
        mon.observe(&[]);
        assert_eq!(mon.state(), PeerState::Unknown);
        assert!(!status.is_active(StatusCondition::WifiApNoDevice));

        mon.observe(&[]);
        assert_eq!(mon.state(), PeerState::NoPeers);
        assert!(status.is_active(StatusCondition::WifiApNoDevice));
    }

    #[test]
    fn interrupted_streak_restarts() {
        let (status, mut mon) = monitor();
        mon.observe(&[]);
        mon.observe(&[A]);
        mon.observe(&[]);
        assert!(!status.is_active(StatusCondition::WifiApNoDevice));
        assert_eq!(mon.state(), PeerState::Unknown);
    }

    #[test]
    fn peers_clear_condition_and_report_new_macs() {
        let (status, mut mon) = monitor();
        mon.observe(&[]);
        mon.observe(&[]);
        assert!(status.is_active(StatusCondition::WifiApNoDevice));

        assert!(mon.observe(&[A]).is_empty());
        assert_eq!(mon.observe(&[A]), vec![A]);
        assert_eq!(mon.state(), PeerState::HasPeers);
        assert!(!status.is_active(StatusCondition::WifiApNoDevice));

        // only the newcomer is reported
        assert_eq!(mon.observe(&[A, B]), vec![B]);
        assert_eq!(mon.known(), &[A, B]);
    }

    #[test]
    fn losing_all_peers_forgets_them() {
        let (_, mut mon) = monitor();
        mon.observe(&[A]);
        mon.observe(&[A]);
        mon.observe(&[]);
        mon.observe(&[]);
        assert!(mon.known().is_empty());

        mon.observe(&[A]);
        assert_eq!(mon.observe(&[A]), vec![A]);
    }
}

// EOF
