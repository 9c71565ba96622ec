// indicator.rs

use embedded_hal::digital::{OutputPin, PinState};

use crate::*;

/// Raw on/off control of the three status lights.
pub trait Indicator: Send {
    fn set(&mut self, light: Light, on: bool);

    fn all_off(&mut self) {
        for light in [Light::Red, Light::Yellow, Light::Green] {
            self.set(light, false);
        }
    }
}

pub struct LedIndicator<R, Y, G> {
    red: R,
    yellow: Y,
    green: G,
}

impl<R, Y, G> LedIndicator<R, Y, G>
where
    R: OutputPin,
    Y: OutputPin,
    G: OutputPin,
{
    pub fn new(red: R, yellow: Y, green: G) -> Self {
        let mut leds = Self { red, yellow, green };
        leds.all_off_pins();
        leds
    }

    fn all_off_pins(&mut self) {
        self.red.set_low().ok();
        self.yellow.set_low().ok();
        self.green.set_low().ok();
    }
}

impl<R, Y, G> Indicator for LedIndicator<R, Y, G>
where
    R: OutputPin + Send,
    Y: OutputPin + Send,
    G: OutputPin + Send,
{
    fn set(&mut self, light: Light, on: bool) {
        let state = PinState::from(on);
        // a failed pin write only costs one frame of the pattern
        match light {
            Light::Red => self.red.set_state(state).ok(),
            Light::Yellow => self.yellow.set_state(state).ok(),
            Light::Green => self.green.set_state(state).ok(),
        };
    }
}

impl<T: Indicator + ?Sized> Indicator for Box<T> {
    fn set(&mut self, light: Light, on: bool) {
        (**self).set(light, on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPin;

    #[test]
    fn leds_follow_lights() {
        let (red, yellow, green) = (SimPin::new("red"), SimPin::new("yellow"), SimPin::new("green"));
        let mut leds = LedIndicator::new(red.clone(), yellow.clone(), green.clone());
        assert!(!red.is_high() && !yellow.is_high() && !green.is_high());

        leds.set(Light::Yellow, true);
        assert!(yellow.is_high());
        assert!(!red.is_high());

        leds.set(Light::Red, true);
        leds.all_off();
        assert!(!red.is_high() && !yellow.is_high());
    }
}

// EOF
