/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Command/doorbell handshake with a sensor's embedded firmware.
//!
//! The host writes a parameter, checks that the doorbell bit in the command
//! register is clear, then writes an opcode with the doorbell bit set.
//! The firmware clears the doorbell when it has serviced the command and
//! leaves any failure status in the remaining command register bits.

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, error};

use crate::regio::RegisterBus;
use crate::Error;

/// Location and timing of a register-mapped firmware command interface
#[derive(Copy, Clone, Debug)]
pub struct CommandPort {
    /// Command register; holds the opcode and the doorbell bit
    pub command_reg: u16,
    /// 8-bit parameter register carrying the requested / reported state
    pub state_reg: u16,
    pub doorbell_mask: u16,
    pub set_state_opcode: u16,
    pub get_state_opcode: u16,
    pub poll_interval_ms: u32,
    pub poll_attempts: u32,
}

impl CommandPort {
    /// MT9V129 system manager command port
    pub const MT9V129: CommandPort = CommandPort {
        command_reg: 0x0040,
        state_reg: 0xFC00,
        doorbell_mask: 1 << 15,
        set_state_opcode: 0x8100,
        get_state_opcode: 0x8101,
        poll_interval_ms: 10,
        poll_attempts: 100,
    };

    /// Ask the firmware to move to `next` and wait for it to acknowledge
    pub fn set_state<I2C, CommE, D>(
        &self,
        bus: &mut RegisterBus<I2C>,
        delay: &mut D,
        next: u8,
    ) -> Result<(), Error<CommE>>
    where
        I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
            + embedded_hal::blocking::i2c::Read<Error = CommE>,
        D: DelayMs<u32>,
    {
        bus.write_u8(self.state_reg, next)?;
        self.ring(bus, delay, self.set_state_opcode)?;

        let response = bus.read_u16(self.command_reg)?;
        self.check_response(response).map_err(|e| {
            error!("set state 0x{:02x} failed, response 0x{:04x}", next, response);
            e
        })
    }

    /// Ask the firmware for its current state
    pub fn get_state<I2C, CommE, D>(
        &self,
        bus: &mut RegisterBus<I2C>,
        delay: &mut D,
    ) -> Result<u8, Error<CommE>>
    where
        I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
            + embedded_hal::blocking::i2c::Read<Error = CommE>,
        D: DelayMs<u32>,
    {
        self.ring(bus, delay, self.get_state_opcode)?;

        let response = bus.read_u16(self.command_reg)?;
        let state = bus.read_u8(self.state_reg)?;
        self.check_response(response).map_err(|e| {
            error!("get state failed, response 0x{:04x}", response);
            e
        })?;
        Ok(state)
    }

    /// Issue `opcode` once the doorbell is clear, then wait for the firmware
    /// to clear it again.
    fn ring<I2C, CommE, D>(
        &self,
        bus: &mut RegisterBus<I2C>,
        delay: &mut D,
        opcode: u16,
    ) -> Result<(), Error<CommE>>
    where
        I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
            + embedded_hal::blocking::i2c::Read<Error = CommE>,
        D: DelayMs<u32>,
    {
        let command = bus.read_u16(self.command_reg)?;
        if command & self.doorbell_mask != 0 {
            error!("firmware busy, command 0x{:04x} pending", command);
            return Err(Error::Busy);
        }

        bus.write_u16(self.command_reg, opcode)?;

        for _ in 0..self.poll_attempts {
            let command = bus.read_u16(self.command_reg)?;
            if command & self.doorbell_mask == 0 {
                return Ok(());
            }
            delay.delay_ms(self.poll_interval_ms);
        }

        error!("doorbell still set after {} polls", self.poll_attempts);
        Err(Error::Timeout)
    }

    fn check_response<CommE>(&self, response: u16) -> Result<(), Error<CommE>> {
        let code = response & !self.doorbell_mask;
        if code == 0 {
            Ok(())
        } else {
            if let Some(status) = FirmwareStatus::from_code(code) {
                debug!("firmware status {:?}", status);
            }
            Err(Error::Fault(code))
        }
    }
}

/// MT9V129 system states, as written to and read from the state register
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SystemState {
    EnterConfigChange = 0x28,
    Streaming = 0x31,
    StartStreaming = 0x34,
    EnterSuspend = 0x40,
    Suspended = 0x41,
    EnterStandby = 0x50,
    Standby = 0x52,
    LeaveStandby = 0x54,
}

impl SystemState {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x28 => Some(SystemState::EnterConfigChange),
            0x31 => Some(SystemState::Streaming),
            0x34 => Some(SystemState::StartStreaming),
            0x40 => Some(SystemState::EnterSuspend),
            0x41 => Some(SystemState::Suspended),
            0x50 => Some(SystemState::EnterStandby),
            0x52 => Some(SystemState::Standby),
            0x54 => Some(SystemState::LeaveStandby),
            _ => None,
        }
    }
}

/// Result codes the firmware documents for its command interface.
/// Only used to annotate logs: a fault is reported with the raw bits.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FirmwareStatus {
    NoError = 0x00,
    NoEntity = 0x01,
    Interrupted = 0x02,
    Io = 0x03,
    TooBig = 0x04,
    BadHandle = 0x05,
    TryAgain = 0x06,
    NoMemory = 0x07,
    AccessDenied = 0x08,
    EntityBusy = 0x09,
    Exists = 0x0A,
    NoDevice = 0x0B,
    InvalidArgument = 0x0C,
    NoSpace = 0x0D,
    OutOfRange = 0x0E,
    NotSupported = 0x0F,
    AlreadyRequested = 0x10,
}

impl FirmwareStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        use FirmwareStatus::*;
        const ALL: [FirmwareStatus; 17] = [
            NoError,
            NoEntity,
            Interrupted,
            Io,
            TooBig,
            BadHandle,
            TryAgain,
            NoMemory,
            AccessDenied,
            EntityBusy,
            Exists,
            NoDevice,
            InvalidArgument,
            NoSpace,
            OutOfRange,
            NotSupported,
            AlreadyRequested,
        ];
        ALL.get(code as usize).copied()
    }
}
