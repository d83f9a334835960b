/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Register transport shared by all of the Aptina sensors.
//!
//! Every register has a 16-bit address. A write is a single bus transaction
//! carrying the big-endian address followed by the big-endian value;
//! a read writes the address and then reads back the value width.

#[cfg(feature = "rttdebug")]
use panic_rtt_core::rprintln;

use crate::Error;

/// A register value tagged with its width on the wire
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RegValue {
    U8(u8),
    U16(u16),
    U32(u32),
}

/// One entry of a compiled-in register table
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegWrite {
    pub reg: u16,
    pub val: RegValue,
}

impl RegWrite {
    pub const fn u8(reg: u16, val: u8) -> Self {
        Self {
            reg,
            val: RegValue::U8(val),
        }
    }

    pub const fn u16(reg: u16, val: u16) -> Self {
        Self {
            reg,
            val: RegValue::U16(val),
        }
    }

    pub const fn u32(reg: u16, val: u32) -> Self {
        Self {
            reg,
            val: RegValue::U32(val),
        }
    }
}

/// Two-wire register access to one sensor at a fixed bus address
pub struct RegisterBus<I2C> {
    address: u8,
    i2c: I2C,
}

impl<I2C, CommE> RegisterBus<I2C>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
        + embedded_hal::blocking::i2c::Read<Error = CommE>,
{
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { address, i2c }
    }

    /// The 7-bit bus address this sensor answers on
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Give back the underlying bus
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Write a value of any width to a 16-bit address
    pub fn write(
        &mut self,
        reg: u16,
        val: RegValue,
    ) -> Result<(), crate::Error<CommE>> {
        let [ah, al] = reg.to_be_bytes();
        let mut buf = [ah, al, 0, 0, 0, 0];
        let len = match val {
            RegValue::U8(v) => {
                buf[2] = v;
                3
            }
            RegValue::U16(v) => {
                buf[2..4].copy_from_slice(&v.to_be_bytes());
                4
            }
            RegValue::U32(v) => {
                buf[2..6].copy_from_slice(&v.to_be_bytes());
                6
            }
        };

        #[cfg(feature = "rttdebug")]
        rprintln!("wr {:04x} {:x?}", reg, &buf[2..len]);

        self.i2c
            .write(self.address, &buf[..len])
            .map_err(Error::Comm)
    }

    /// Write a u8 to a 16-bit address
    pub fn write_u8(
        &mut self,
        reg: u16,
        val: u8,
    ) -> Result<(), crate::Error<CommE>> {
        self.write(reg, RegValue::U8(val))
    }

    /// Write a u16 to a 16-bit address
    pub fn write_u16(
        &mut self,
        reg: u16,
        val: u16,
    ) -> Result<(), crate::Error<CommE>> {
        self.write(reg, RegValue::U16(val))
    }

    /// Write a u32 to a 16-bit address
    pub fn write_u32(
        &mut self,
        reg: u16,
        val: u32,
    ) -> Result<(), crate::Error<CommE>> {
        self.write(reg, RegValue::U32(val))
    }

    /// Replay a register table in order, stopping at the first failure
    pub fn write_table(
        &mut self,
        table: &[RegWrite],
    ) -> Result<(), crate::Error<CommE>> {
        for entry in table {
            self.write(entry.reg, entry.val)?;
        }
        Ok(())
    }

    fn read_into(
        &mut self,
        reg: u16,
        recv_buf: &mut [u8],
    ) -> Result<(), crate::Error<CommE>> {
        let cmd_buf = reg.to_be_bytes();
        self.i2c
            .write(self.address, &cmd_buf)
            .map_err(Error::Comm)?;
        self.i2c
            .read(self.address, recv_buf)
            .map_err(Error::Comm)?;

        #[cfg(feature = "rttdebug")]
        rprintln!("rd {:04x} {:x?}", reg, recv_buf);

        Ok(())
    }

    /// Read a u8 from a 16-bit address
    pub fn read_u8(&mut self, reg: u16) -> Result<u8, crate::Error<CommE>> {
        let mut recv_buf = [0u8];
        self.read_into(reg, &mut recv_buf)?;
        Ok(recv_buf[0])
    }

    /// Read a u16 from a 16-bit address
    pub fn read_u16(&mut self, reg: u16) -> Result<u16, crate::Error<CommE>> {
        let mut recv_buf = [0u8; 2];
        self.read_into(reg, &mut recv_buf)?;
        Ok(u16::from_be_bytes(recv_buf))
    }

    /// Read a u32 from a 16-bit address
    pub fn read_u32(&mut self, reg: u16) -> Result<u32, crate::Error<CommE>> {
        let mut recv_buf = [0u8; 4];
        self.read_into(reg, &mut recv_buf)?;
        Ok(u32::from_be_bytes(recv_buf))
    }

    /// Read-modify-write a 16-bit register: clear `clear` bits, then set `set` bits.
    /// Returns the value written.
    pub fn modify_u16(
        &mut self,
        reg: u16,
        clear: u16,
        set: u16,
    ) -> Result<u16, crate::Error<CommE>> {
        let val = (self.read_u16(reg)? & !clear) | set;
        self.write_u16(reg, val)?;
        Ok(val)
    }
}
