/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Board-level hooks the sensor drivers call into: reset/clock bring-up,
//! the power-down line, and (for MIPI sensors) the host's CSI-2 receiver.

use embedded_hal::digital::v2::OutputPin;

/// Board callbacks consumed by the drivers
pub trait Platform {
    /// Board-level reset and master clock bring-up
    fn io_init(&mut self) {}

    /// Drive the sensor power-down input: `true` powers the sensor down
    fn power_down(&mut self, _down: bool) {}
}

/// Board with no controllable reset or power-down line
#[derive(Copy, Clone, Debug, Default)]
pub struct NoPlatform;

impl Platform for NoPlatform {}

/// Drives an active-high PWDN line from a GPIO output pin
pub struct PowerDownPin<PIN> {
    pwdn: PIN,
}

impl<PIN, PinE> PowerDownPin<PIN>
where
    PIN: OutputPin<Error = PinE>,
{
    pub fn new(pwdn: PIN) -> Self {
        Self { pwdn }
    }

    pub fn release(self) -> PIN {
        self.pwdn
    }
}

impl<PIN, PinE> Platform for PowerDownPin<PIN>
where
    PIN: OutputPin<Error = PinE>,
{
    fn power_down(&mut self, down: bool) {
        // the board callback has no way to report a failure
        let _ = if down {
            self.pwdn.set_high()
        } else {
            self.pwdn.set_low()
        };
    }
}

/// MIPI CSI-2 data types the receiver can be told to expect
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MipiDataType {
    Yuv422,
}

/// Host-side MIPI CSI-2 receiver, as exposed by the capture pipeline
pub trait MipiCsi2Host {
    fn enable(&mut self);
    fn is_enabled(&self) -> bool;
    fn set_lanes(&mut self);
    fn reset(&mut self);
    fn set_data_type(&mut self, data_type: MipiDataType);
    /// D-PHY status word; `DPHY_NO_CLOCK` while no sensor clock is seen
    fn dphy_status(&mut self) -> u32;
    /// First error register; zero once the link is receiving cleanly
    fn error1(&mut self) -> u32;
}

/// D-PHY status while the receiver sees no clock lane activity
pub const DPHY_NO_CLOCK: u32 = 0x200;

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::pin::{Mock as PinMock, State, Transaction};

    #[test]
    fn power_down_drives_pin_high() {
        let expectations = [
            Transaction::set(State::High),
            Transaction::set(State::Low),
        ];
        let mut platform = PowerDownPin::new(PinMock::new(&expectations));
        platform.power_down(true);
        platform.power_down(false);
        platform.release().done();
    }
}
