// status.rs

use core::cell::RefCell;
use critical_section::Mutex;
use serde::Serialize;

use crate::*;

pub const MAX_CONDITIONS: usize = 16;

pub type ConditionSet = heapless::Vec<StatusCondition, MAX_CONDITIONS>;

/// Device health and fault conditions shown on the indicator lights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCondition {
    Initializing,
    Ready,
    FsNotAvailable,
    LogNoDir,
    LogFileError,
    LogWrite,
    WebserverNoHtmlDir,
    WifiStaNotAvailable,
    WifiApNotAvailable,
    WifiApNoDevice,
    WifiApDeviceAvailable,
    SerialNotConnected,
    SerialConnected,
    SerialSend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Light {
    Red,
    Yellow,
    Green,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlinkSpeed {
    Slow,
    Fast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightPattern {
    /// All lights dark.
    Off,
    Solid(Light),
    Blink {
        light: Light,
        count: u8,
        speed: BlinkSpeed,
    },
}

impl StatusCondition {
    pub const fn priority(self) -> u8 {
        use StatusCondition::*;
        match self {
            FsNotAvailable => 100,
            LogNoDir | WebserverNoHtmlDir => 90,
            WifiApNoDevice => 80,
            LogFileError | WifiStaNotAvailable | WifiApNotAvailable | SerialNotConnected => 70,
            SerialConnected | Initializing | LogWrite | SerialSend => 10,
            Ready | WifiApDeviceAvailable => 1,
        }
    }

    pub const fn pattern(self) -> LightPattern {
        use StatusCondition::*;
        const fn slow(light: Light, count: u8) -> LightPattern {
            LightPattern::Blink {
                light,
                count,
                speed: BlinkSpeed::Slow,
            }
        }
        match self {
            FsNotAvailable => LightPattern::Solid(Light::Red),
            LogNoDir => slow(Light::Red, 2),
            WebserverNoHtmlDir => slow(Light::Red, 3),
            WifiApNoDevice => LightPattern::Solid(Light::Yellow),
            SerialNotConnected => slow(Light::Yellow, 1),
            LogFileError => slow(Light::Yellow, 2),
            WifiStaNotAvailable => slow(Light::Yellow, 3),
            WifiApNotAvailable => slow(Light::Yellow, 4),
            SerialConnected => LightPattern::Solid(Light::Green),
            Initializing => slow(Light::Green, 1),
            LogWrite => slow(Light::Green, 2),
            SerialSend => slow(Light::Green, 3),
            Ready | WifiApDeviceAvailable => LightPattern::Off,
        }
    }
}

/// Picks the condition to display. Strictly higher priority wins; on a tie the
/// one enumerated first in `active` stays.
pub fn highest_priority(active: &[StatusCondition]) -> Option<StatusCondition> {
    let (first, rest) = active.split_first()?;
    Some(rest.iter().fold(*first, |best, &c| {
        if c.priority() > best.priority() {
            c
        } else {
            best
        }
    }))
}

/// Bounded set of active conditions shared by every worker.
///
/// Clones share the same storage. The critical section only covers the scan and
/// shift of the backing array.
#[derive(Clone)]
pub struct StatusRegistry {
    active: Arc<Mutex<RefCell<ConditionSet>>>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(RefCell::new(ConditionSet::new()))),
        }
    }

    /// Idempotent insert. Any real condition displaces `Ready`. When the set is
    /// full the condition is dropped.
    pub fn add(&self, condition: StatusCondition) {
        let dropped = critical_section::with(|cs| {
            let mut active = self.active.borrow_ref_mut(cs);
            if condition != StatusCondition::Ready {
                if let Some(i) = active.iter().position(|c| *c == StatusCondition::Ready) {
                    active.remove(i);
                }
            }
            if active.contains(&condition) {
                return false;
            }
            active.push(condition).is_err()
        });
        if dropped {
            warn!(target: "status", "Status registry full, dropped {condition:?}");
        }
    }

    pub fn remove(&self, condition: StatusCondition) {
        critical_section::with(|cs| {
            let mut active = self.active.borrow_ref_mut(cs);
            if let Some(i) = active.iter().position(|c| *c == condition) {
                active.remove(i);
            }
        });
    }

    pub fn is_active(&self, condition: StatusCondition) -> bool {
        critical_section::with(|cs| self.active.borrow_ref(cs).contains(&condition))
    }

    pub fn snapshot(&self) -> ConditionSet {
        critical_section::with(|cs| self.active.borrow_ref(cs).clone())
    }

    /// Raises or clears `condition` in one call.
    pub fn set(&self, condition: StatusCondition, active: bool) {
        if active {
            self.add(condition);
        } else {
            self.remove(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StatusCondition::*;

    #[test]
    fn add_is_idempotent() {
        let reg = StatusRegistry::new();
        reg.add(SerialNotConnected);
        reg.add(SerialNotConnected);
        reg.add(WifiApNoDevice);

        assert_eq!(reg.snapshot().as_slice(), &[SerialNotConnected, WifiApNoDevice]);
        assert!(reg.is_active(SerialNotConnected));

        reg.remove(SerialNotConnected);
        assert!(!reg.is_active(SerialNotConnected));
        assert_eq!(reg.snapshot().as_slice(), &[WifiApNoDevice]);

        // removing an absent condition changes nothing
        reg.remove(FsNotAvailable);
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn membership_follows_any_sequence() {
        let reg = StatusRegistry::new();
        let all = [
            Initializing,
            FsNotAvailable,
            LogNoDir,
            WifiApNoDevice,
            SerialConnected,
            SerialNotConnected,
        ];
        let mut model = std::collections::HashSet::new();
        // deterministic pseudo random walk over add/remove
        let mut seed = 0x2545_f491_u32;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let c = all[(seed % all.len() as u32) as usize];
            if seed & 0x100 == 0 {
                reg.add(c);
                model.insert(c);
            } else {
                reg.remove(c);
                model.remove(&c);
            }
            for c in all {
                assert_eq!(reg.is_active(c), model.contains(&c));
            }
            let snap = reg.snapshot();
            assert_eq!(snap.len(), model.len());
        }
    }

    #[test]
    fn real_condition_displaces_ready() {
        let reg = StatusRegistry::new();
        reg.add(Ready);
        assert!(reg.is_active(Ready));

        reg.add(WifiApNotAvailable);
        assert!(!reg.is_active(Ready));
        assert!(reg.is_active(WifiApNotAvailable));

        // removal does not bring Ready back, emptiness means ready
        reg.remove(WifiApNotAvailable);
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn every_condition_fits() {
        let reg = StatusRegistry::new();
        let all = [
            Initializing,
            FsNotAvailable,
            LogNoDir,
            LogFileError,
            LogWrite,
            WebserverNoHtmlDir,
            WifiStaNotAvailable,
            WifiApNotAvailable,
            WifiApNoDevice,
            WifiApDeviceAvailable,
            SerialNotConnected,
            SerialConnected,
            SerialSend,
        ];
        for c in all {
            reg.add(c);
        }
        assert_eq!(reg.snapshot().len(), all.len());
        assert!(all.len() <= MAX_CONDITIONS);
    }

    #[test]
    fn clones_share_state() {
        let reg = StatusRegistry::new();
        let other = reg.clone();
        other.set(LogNoDir, true);
        assert!(reg.is_active(LogNoDir));
        other.set(LogNoDir, false);
        assert!(!reg.is_active(LogNoDir));
    }

    #[test]
    fn strictly_highest_priority_wins() {
        assert_eq!(highest_priority(&[]), None);
        assert_eq!(
            highest_priority(&[SerialNotConnected, LogNoDir]),
            Some(LogNoDir)
        );
        assert_eq!(
            highest_priority(&[SerialConnected, WifiApNoDevice, FsNotAvailable, LogNoDir]),
            Some(FsNotAvailable)
        );
    }

    #[test]
    fn ties_keep_first_enumerated() {
        // all priority 70
        assert_eq!(
            highest_priority(&[WifiStaNotAvailable, SerialNotConnected, LogFileError]),
            Some(WifiStaNotAvailable)
        );
        assert_eq!(
            highest_priority(&[SerialNotConnected, WifiStaNotAvailable]),
            Some(SerialNotConnected)
        );
    }

    #[test]
    fn patterns_match_table() {
        assert_eq!(FsNotAvailable.pattern(), LightPattern::Solid(Light::Red));
        assert_eq!(
            WifiApNotAvailable.pattern(),
            LightPattern::Blink {
                light: Light::Yellow,
                count: 4,
                speed: BlinkSpeed::Slow
            }
        );
        assert_eq!(Ready.pattern(), LightPattern::Off);
    }
}

// EOF
