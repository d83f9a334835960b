/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/
#![cfg_attr(not(test), no_std)]

//! Configuration drivers for three Aptina CMOS image sensors:
//! - MT9M024 (A-1000ERS / AR0132 family), 1280 x 960 raw Bayer, parallel out
//! - MT9D115 (SOC2031), 2 MP SoC with embedded MCU, MIPI CSI-2 out
//! - MT9V129 (SOC361), VGA SoC with firmware state machine, parallel/NTSC/PAL out
//!
//! Each sensor has a two-wire i2c interface for configuration registers,
//! using 16-bit register addresses and big-endian 8/16/32-bit values.
//! These drivers are concerned only with that interface: they probe the chip,
//! replay the vendor bring-up sequence, and expose the capture pipeline's
//! subdevice operations through [`subdev::SensorOps`].

pub mod doorbell;
pub mod mt9d115;
pub mod mt9m024;
pub mod mt9v129;
pub mod platform;
pub mod regio;
pub mod subdev;

pub use mt9d115::Mt9d115;
pub use mt9m024::Mt9m024;
pub use mt9v129::Mt9v129;
pub use platform::{NoPlatform, Platform, PowerDownPin};
pub use regio::{RegValue, RegWrite, RegisterBus};
pub use subdev::{dispatch, Request, Response, SensorOps};

/// Errors in this crate
#[derive(Debug, PartialEq)]
pub enum Error<CommE> {
    /// Sensor communication error
    Comm(CommE),

    /// The sensor firmware is still servicing a previous command
    Busy,

    /// The sensor did not respond in a timely manner
    Timeout,

    /// The sensor firmware reported a failure; raw response bits
    Fault(u16),

    /// Unrecognized chip ID
    NotFound(u16),

    /// Request outside what the sensor supports
    InvalidArgument,

    /// Control cannot be changed
    NotPermitted,

    /// Operation not implemented for this sensor
    NotSupported,

    /// The capture receiver on the host side failed to come up
    Platform,
}

impl<CommE> Error<CommE> {
    /// Negative errno value the capture framework expects for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Comm(_) => -EIO,
            Error::Busy => -EAGAIN,
            Error::Timeout => -ETIMEDOUT,
            Error::Fault(_) => -EFAULT,
            Error::NotFound(_) => -ENODEV,
            Error::InvalidArgument => -EINVAL,
            Error::NotPermitted => -EPERM,
            Error::NotSupported => -ENOTTY,
            Error::Platform => -EIO,
        }
    }
}

const EPERM: i32 = 1;
const EIO: i32 = 5;
const EAGAIN: i32 = 11;
const EFAULT: i32 = 14;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOTTY: i32 = 25;
const ETIMEDOUT: i32 = 110;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_match_framework() {
        assert_eq!(Error::<()>::Busy.errno(), -11);
        assert_eq!(Error::<()>::Timeout.errno(), -110);
        assert_eq!(Error::<()>::Fault(0x0c).errno(), -14);
        assert_eq!(Error::<()>::NotFound(0).errno(), -19);
        assert_eq!(Error::Comm(()).errno(), -5);
        assert_eq!(Error::<()>::NotPermitted.errno(), -1);
    }
}
