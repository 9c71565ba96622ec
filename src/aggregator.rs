// aggregator.rs

use crate::*;

const STATUS_STACK: usize = 4096;

#[derive(Clone, Copy, Debug)]
pub struct IndicatorTiming {
    pub slow: Duration,
    pub fast: Duration,
    /// Pause after each pattern before the next snapshot.
    pub pause: Duration,
    /// Re-check interval while nothing is active.
    pub idle: Duration,
}

impl Default for IndicatorTiming {
    fn default() -> Self {
        Self {
            slow: Duration::from_millis(500),
            fast: Duration::from_millis(100),
            pause: Duration::from_millis(1500),
            idle: Duration::from_secs(2),
        }
    }
}

impl IndicatorTiming {
    /// No sleeping at all, for driving the aggregator step by step.
    pub const fn instant() -> Self {
        Self {
            slow: Duration::ZERO,
            fast: Duration::ZERO,
            pause: Duration::ZERO,
            idle: Duration::ZERO,
        }
    }
}

pub struct StatusAggregator<I> {
    status: StatusRegistry,
    indicator: I,
    timing: IndicatorTiming,
}

impl<I: Indicator + 'static> StatusAggregator<I> {
    pub fn new(status: StatusRegistry, indicator: I, timing: IndicatorTiming) -> Self {
        Self {
            status,
            indicator,
            timing,
        }
    }

    /// One round: snapshot, pick, show. Returns what was shown, `None` for ready.
    pub fn tick(&mut self) -> Option<StatusCondition> {
        // the registry lock is released before any light is touched
        let active = self.status.snapshot();

        let Some(top) = highest_priority(&active) else {
            self.indicator.all_off();
            thread::sleep(self.timing.idle);
            return None;
        };

        self.show(top.pattern());
        thread::sleep(self.timing.pause);
        Some(top)
    }

    pub fn show(&mut self, pattern: LightPattern) {
        self.indicator.all_off();
        match pattern {
            LightPattern::Off => {}
            LightPattern::Solid(light) => self.indicator.set(light, true),
            LightPattern::Blink {
                light,
                count,
                speed,
            } => {
                let half = match speed {
                    BlinkSpeed::Slow => self.timing.slow,
                    BlinkSpeed::Fast => self.timing.fast,
                };
                for _ in 0..count {
                    self.indicator.set(light, true);
                    thread::sleep(half);
                    self.indicator.set(light, false);
                    thread::sleep(half);
                }
            }
        }
    }

    pub fn run(mut self) {
        info!(target: "status", "Status display running");
        let mut shown = None;
        loop {
            let top = self.tick();
            if top != shown {
                debug!(target: "status", "Showing {top:?}");
                shown = top;
            }
        }
    }

    pub fn start(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("status".into())
            .stack_size(STATUS_STACK)
            .spawn(move || self.run())
    }
}


// EOF
