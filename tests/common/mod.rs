/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Register-level sensor simulator shared by the integration tests.
//!
//! Registers are byte addressed and big-endian, like the real parts.
//! Writes are logged, and the simulator can emulate the MT9D115 MCU variable
//! window or the MT9V129 command doorbell on top of plain register memory.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use aptina_sensor_i2c::platform::{
    MipiCsi2Host, MipiDataType, Platform, DPHY_NO_CLOCK,
};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read, Write};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FakeError {
    /// Wrong bus address
    Nack,
    /// Injected write failure
    WriteFailed,
}

const MCU_ADDRESS: u16 = 0x098C;
const MCU_DATA_0: u16 = 0x0990;
const COMMAND_REG: u16 = 0x0040;
const STATE_REG: u16 = 0xFC00;
const DOORBELL: u16 = 1 << 15;

/// Firmware side of the MT9V129 command doorbell
#[derive(Clone, Debug)]
pub struct DoorbellSim {
    /// Polls that still see the doorbell set after an opcode is written
    pub latency: u32,
    /// Never clear the doorbell
    pub hang: bool,
    /// Bits reported in the command register once a command completes
    pub result: u16,
    /// Current system state
    pub state: u8,
    pending: u32,
    command: u16,
}

impl Default for DoorbellSim {
    fn default() -> Self {
        Self {
            latency: 2,
            hang: false,
            result: 0,
            state: 0x31,
            pending: 0,
            command: 0,
        }
    }
}

impl DoorbellSim {
    /// A doorbell left set by an earlier command
    pub fn busy() -> Self {
        Self {
            command: 0x8101 | DOORBELL,
            hang: true,
            ..Self::default()
        }
    }

    /// A doorbell the firmware never clears
    pub fn hung() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    fn accept(&mut self, opcode: u16, next_state: u8) {
        self.command = opcode;
        self.pending = self.latency;
        if self.result != 0 {
            return;
        }
        if opcode == 0x8100 {
            self.state = match next_state {
                0x28 | 0x34 => 0x31,
                0x40 => 0x41,
                0x50 => 0x52,
                other => other,
            };
        }
    }

    fn poll(&mut self) -> u16 {
        if self.command & DOORBELL == 0 {
            return self.command;
        }
        if self.hang {
            return self.command;
        }
        if self.pending > 0 {
            self.pending -= 1;
            return self.command;
        }
        self.command = self.result;
        self.command
    }
}

/// MT9D115 MCU variable window
#[derive(Clone, Debug, Default)]
pub struct McuSim {
    pub vars: HashMap<u16, u16>,
    pub address: u16,
}

impl McuSim {
    /// MCU whose patch reports an ID and whose sequencer reaches preview
    pub fn healthy() -> Self {
        let mut mcu = Self::default();
        mcu.vars.insert(0xA024, 0x0001);
        mcu.vars.insert(0xA104, 3);
        mcu
    }
}

#[derive(Debug, Default)]
pub struct State {
    pub address: u8,
    pub mem: HashMap<u16, u8>,
    /// (register, value bytes) for every register write
    pub writes: Vec<(u16, Vec<u8>)>,
    /// Fail the write with this index, counting from zero
    pub fail_write_at: Option<usize>,
    pub mcu: Option<McuSim>,
    pub doorbell: Option<DoorbellSim>,
    pointer: u16,
}

/// Shared handle to a simulated sensor; clones see the same state
#[derive(Clone, Debug)]
pub struct FakeSensor(Rc<RefCell<State>>);

impl FakeSensor {
    pub fn new(address: u8) -> Self {
        FakeSensor(Rc::new(RefCell::new(State {
            address,
            ..State::default()
        })))
    }

    pub fn with_mcu(self, mcu: McuSim) -> Self {
        self.0.borrow_mut().mcu = Some(mcu);
        self
    }

    pub fn with_doorbell(self, doorbell: DoorbellSim) -> Self {
        self.0.borrow_mut().doorbell = Some(doorbell);
        self
    }

    pub fn set_u16(&self, reg: u16, val: u16) {
        let mut state = self.0.borrow_mut();
        let [hi, lo] = val.to_be_bytes();
        state.mem.insert(reg, hi);
        state.mem.insert(reg.wrapping_add(1), lo);
    }

    pub fn get_u16(&self, reg: u16) -> u16 {
        let state = self.0.borrow();
        let hi = state.mem.get(&reg).copied().unwrap_or(0);
        let lo = state.mem.get(&reg.wrapping_add(1)).copied().unwrap_or(0);
        u16::from_be_bytes([hi, lo])
    }

    pub fn get_u8(&self, reg: u16) -> u8 {
        self.0.borrow().mem.get(&reg).copied().unwrap_or(0)
    }

    pub fn fail_write_at(&self, index: usize) {
        self.0.borrow_mut().fail_write_at = Some(index);
    }

    pub fn clear_write_failure(&self) {
        self.0.borrow_mut().fail_write_at = None;
    }

    pub fn write_count(&self) -> usize {
        self.0.borrow().writes.len()
    }

    pub fn clear_writes(&self) {
        self.0.borrow_mut().writes.clear();
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.0.borrow().writes.clone()
    }

    /// Values written to `reg` as 16-bit words, in order
    pub fn writes_to(&self, reg: u16) -> Vec<u16> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(r, v)| *r == reg && v.len() == 2)
            .map(|(_, v)| u16::from_be_bytes([v[0], v[1]]))
            .collect()
    }

    pub fn mcu_var(&self, var: u16) -> Option<u16> {
        self.0
            .borrow()
            .mcu
            .as_ref()
            .and_then(|mcu| mcu.vars.get(&var).copied())
    }

    pub fn set_mcu_var(&self, var: u16, val: u16) {
        if let Some(mcu) = self.0.borrow_mut().mcu.as_mut() {
            mcu.vars.insert(var, val);
        }
    }

    pub fn system_state(&self) -> Option<u8> {
        self.0.borrow().doorbell.as_ref().map(|db| db.state)
    }
}

impl Write for FakeSensor {
    type Error = FakeError;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        if address != state.address || bytes.len() < 2 {
            return Err(FakeError::Nack);
        }
        let reg = u16::from_be_bytes([bytes[0], bytes[1]]);
        if bytes.len() == 2 {
            state.pointer = reg;
            return Ok(());
        }

        let data = &bytes[2..];
        if state.fail_write_at == Some(state.writes.len()) {
            return Err(FakeError::WriteFailed);
        }
        state.writes.push((reg, data.to_vec()));
        for (i, b) in data.iter().enumerate() {
            state.mem.insert(reg.wrapping_add(i as u16), *b);
        }

        let word = if data.len() == 2 {
            Some(u16::from_be_bytes([data[0], data[1]]))
        } else {
            None
        };

        if let (Some(mcu), Some(word)) = (state.mcu.as_mut(), word) {
            match reg {
                MCU_ADDRESS => mcu.address = word,
                MCU_DATA_0 => {
                    let var = mcu.address;
                    mcu.vars.insert(var, word);
                }
                _ => {}
            }
        }

        if reg == COMMAND_REG {
            let next_state = state.mem.get(&STATE_REG).copied().unwrap_or(0);
            if let (Some(db), Some(word)) = (state.doorbell.as_mut(), word) {
                db.accept(word, next_state);
            }
        }
        Ok(())
    }
}

impl Read for FakeSensor {
    type Error = FakeError;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        if address != state.address {
            return Err(FakeError::Nack);
        }
        let reg = state.pointer;

        if reg == MCU_DATA_0 {
            if let Some(mcu) = state.mcu.as_ref() {
                let val = mcu.vars.get(&mcu.address).copied().unwrap_or(0);
                fill(buffer, &val.to_be_bytes());
                return Ok(());
            }
        }
        if let Some(db) = state.doorbell.as_mut() {
            match reg {
                COMMAND_REG => {
                    let val = db.poll();
                    fill(buffer, &val.to_be_bytes());
                    return Ok(());
                }
                STATE_REG => {
                    fill(buffer, &[db.state]);
                    return Ok(());
                }
                _ => {}
            }
        }

        for (i, b) in buffer.iter_mut().enumerate() {
            *b = state.mem.get(&reg.wrapping_add(i as u16)).copied().unwrap_or(0);
        }
        Ok(())
    }
}

fn fill(buffer: &mut [u8], src: &[u8]) {
    for (dst, b) in buffer.iter_mut().zip(src.iter()) {
        *dst = *b;
    }
}

/// Delay source that only records what it was asked for
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub calls: Vec<u32>,
}

impl RecordingDelay {
    pub fn total_ms(&self) -> u32 {
        self.calls.iter().sum()
    }
}

impl DelayMs<u32> for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls.push(ms);
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PlatformEvent {
    IoInit,
    PowerDown(bool),
}

#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub events: Vec<PlatformEvent>,
}

impl Platform for RecordingPlatform {
    fn io_init(&mut self) {
        self.events.push(PlatformEvent::IoInit);
    }

    fn power_down(&mut self, down: bool) {
        self.events.push(PlatformEvent::PowerDown(down));
    }
}

/// CSI-2 receiver that sees the sensor clock after a few status polls
#[derive(Debug, Default)]
pub struct FakeHost {
    pub enabled: bool,
    pub lanes_set: bool,
    pub data_type: Option<MipiDataType>,
    /// Status polls that still report no clock
    pub clock_after: u32,
    /// Never see the sensor clock
    pub dead_link: bool,
}

impl MipiCsi2Host for FakeHost {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_lanes(&mut self) {
        self.lanes_set = true;
    }

    fn reset(&mut self) {}

    fn set_data_type(&mut self, data_type: MipiDataType) {
        self.data_type = Some(data_type);
    }

    fn dphy_status(&mut self) -> u32 {
        if self.dead_link {
            return DPHY_NO_CLOCK;
        }
        if self.clock_after > 0 {
            self.clock_after -= 1;
            return DPHY_NO_CLOCK;
        }
        0x0300
    }

    fn error1(&mut self) -> u32 {
        0
    }
}
