/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Driver for the Aptina MT9D115 (SOC2031) 2 MP system-on-chip sensor
//! This sensor has multiple interfaces:
//! - Two-wire i2c for configuration registers and MCU variables (i2c)
//! - MIPI CSI-2 serial pixel data out, YUV422
//! - parallel pixel data out, unused here
//!
//! Most configuration lives in variables owned by the embedded MCU.
//! A variable is selected by writing its logical address to `MCU_ADDRESS`
//! and then read or written through `MCU_DATA_0`.

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, error, info, warn};

#[cfg(feature = "rttdebug")]
use panic_rtt_core::rprintln;

use crate::platform::{MipiCsi2Host, MipiDataType, Platform, DPHY_NO_CLOCK};
use crate::regio::{RegWrite, RegisterBus};
use crate::subdev::{
    negotiate_frame_rate, Bt656Mode, BufType, ChipIdent, Fract,
    FrameIntervalQuery, FrameSize, IfParm, PixFormat, SensorOps,
    SensorSession, StreamParm, CAP_TIMEPERFRAME, MODE_HIGHQUALITY,
    PIX_FMT_YUYV,
};
use crate::Error;

/// 0x78 in 8-bit form
pub const DEFAULT_I2C_ADDRESS: u8 = 0x3C;

pub const CHIP_ID: u16 = 0x2580;

pub const PREVIEW_WIDTH: u32 = 800;
pub const PREVIEW_HEIGHT: u32 = 600;
pub const CAPTURE_WIDTH: u32 = 1600;
pub const CAPTURE_HEIGHT: u32 = 1200;

pub const MIN_FPS: u32 = 15;
pub const MAX_FPS: u32 = 30;
pub const DEFAULT_FPS: u32 = 30;

/// Supported master clock range, Hz
pub const XCLK_MIN_HZ: u32 = 6_000_000;
pub const XCLK_MAX_HZ: u32 = 24_000_000;

const RESET_PULSE_MS: u32 = 10;
const PLL_LOCK_MS: u32 = 10;
const POLL_INTERVAL_MS: u32 = 10;
const POLL_ATTEMPTS: u32 = 10;
const MIPI_ENABLE_MS: u32 = 10;

#[repr(u16)]
#[derive(Copy, Clone, Debug)]
pub enum Register {
    ChipId = 0x0000,
    PllDividers = 0x0010,
    PllPDividers = 0x0012,
    PllControl = 0x0014,
    CtrlStatus = 0x0018,
    ResetCtrl = 0x001A,
    McuAddress = 0x098C,
    McuData0 = 0x0990,
    McuData1 = 0x0992,
    McuData2 = 0x0994,
    McuData3 = 0x0996,
    McuData4 = 0x0998,
    McuData5 = 0x099A,
    McuData6 = 0x099C,
    McuData7 = 0x099E,
    /// Lens shading / PGA control
    ColorPipelineControl = 0x3210,
}

/// MCU data window used for block uploads, in address order
const MCU_DATA_PORTS: [Register; 8] = [
    Register::McuData0,
    Register::McuData1,
    Register::McuData2,
    Register::McuData3,
    Register::McuData4,
    Register::McuData5,
    Register::McuData6,
    Register::McuData7,
];

const RESET_SOFT: u16 = 1 << 0;
const CTRL_STANDBY: u16 = 1 << 0;
const CTRL_POWERUP_STOP: u16 = 1 << 2;
const CTRL_STANDBY_DONE: u16 = 1 << 14;
const PGA_ENABLE: u16 = 1 << 3;

/// Logical (driver, offset) access, bits 14:13
const MCU_ACCESS_LOGICAL: u16 = 0b01 << 13;
/// Byte-wide variable, bit 15
const MCU_ACCESS_8BIT: u16 = 1 << 15;

/// Logical address of a 16-bit MCU variable
pub const fn mcu_var16(driver: u8, offset: u8) -> u16 {
    MCU_ACCESS_LOGICAL | (((driver & 0x1F) as u16) << 8) | offset as u16
}

/// Logical address of an 8-bit MCU variable
pub const fn mcu_var8(driver: u8, offset: u8) -> u16 {
    MCU_ACCESS_8BIT | mcu_var16(driver, offset)
}

// MCU variables the bring-up waits on or triggers
const VAR_PATCH_SETUP: u16 = mcu_var16(0, 0x06);
const VAR_PATCH_EXECUTE: u16 = mcu_var8(0, 0x05);
const VAR_MON_PATCH_ID_0: u16 = mcu_var8(0, 0x24);
const VAR_SEQ_CMD: u16 = mcu_var8(1, 0x03);
const VAR_SEQ_STATE: u16 = mcu_var8(1, 0x04);

/// Patch entry point within MCU RAM
const PATCH_ENTRY: u16 = 0x0415;
const SEQ_STATE_PREVIEW: u16 = 3;
const SEQ_CMD_REFRESH: u16 = 6;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InterfaceMode {
    Parallel,
    Mipi,
}

/// YUV422 over MIPI: 85 / 42.5 MHz tx FIFO write, 63.75 MHz read
const PLL_YUV422_BYPASSED: [RegWrite; 6] = [
    // bypass PLL
    RegWrite::u16(Register::PllControl as u16, 0x21F9),
    // M = 277
    RegWrite::u16(Register::PllDividers as u16, 0x0115),
    RegWrite::u16(Register::PllPDividers as u16, 0x00F5),
    // test bypass on
    RegWrite::u16(Register::PllControl as u16, 0x2545),
    // PLL enable
    RegWrite::u16(Register::PllControl as u16, 0x2547),
    // select lock detect
    RegWrite::u16(Register::PllControl as u16, 0x2447),
];

const PLL_YUV422_LOCKED: [RegWrite; 2] = [
    // PLL bypass off
    RegWrite::u16(Register::PllControl as u16, 0x2047),
    // test bypass off
    RegWrite::u16(Register::PllControl as u16, 0x2046),
];

/// Sensor core, crop and MIPI timing for preview (A) and capture (B) contexts,
/// then flicker detection and AE targets. Pairs of (variable, value).
const BASIC_INIT_VARS: [(u16, u16); 46] = [
    (mcu_var16(7, 0x03), PREVIEW_WIDTH as u16),
    (mcu_var16(7, 0x05), PREVIEW_HEIGHT as u16),
    (mcu_var16(7, 0x07), CAPTURE_WIDTH as u16),
    (mcu_var16(7, 0x09), CAPTURE_HEIGHT as u16),
    // context A
    (mcu_var16(7, 0x0D), 0x0000),
    (mcu_var16(7, 0x0F), 0x0000),
    (mcu_var16(7, 0x11), 0x04BD),
    (mcu_var16(7, 0x13), 0x064D),
    (mcu_var16(7, 0x15), 0x0111),
    (mcu_var16(7, 0x17), 0x046C),
    (mcu_var16(7, 0x19), 0x005A),
    (mcu_var16(7, 0x1B), 0x01BE),
    (mcu_var16(7, 0x1D), 0x0131),
    (mcu_var16(7, 0x1F), 0x02BB),
    (mcu_var16(7, 0x21), 0x0888),
    // context B
    (mcu_var16(7, 0x23), 0x0004),
    (mcu_var16(7, 0x25), 0x0004),
    (mcu_var16(7, 0x27), 0x04BB),
    (mcu_var16(7, 0x29), 0x064B),
    (mcu_var16(7, 0x2B), 0x0111),
    (mcu_var16(7, 0x2D), 0x0024),
    (mcu_var16(7, 0x2F), 0x003A),
    (mcu_var16(7, 0x31), 0x00F6),
    (mcu_var16(7, 0x33), 0x008B),
    (mcu_var16(7, 0x35), 0x0521),
    (mcu_var16(7, 0x37), 0x0888),
    // crop A: 800 x 600
    (mcu_var16(7, 0x39), 0x0000),
    (mcu_var16(7, 0x3B), 0x031F),
    (mcu_var16(7, 0x3D), 0x0000),
    (mcu_var16(7, 0x3F), 0x0257),
    // crop B: 1600 x 1200
    (mcu_var16(7, 0x47), 0x0000),
    (mcu_var16(7, 0x49), 0x063F),
    (mcu_var16(7, 0x4B), 0x0000),
    (mcu_var16(7, 0x4D), 0x04AF),
    // flicker detection
    (mcu_var16(2, 0x2D), 0x00A0),
    (mcu_var8(4, 0x08), 0x26),
    (mcu_var8(4, 0x09), 0x29),
    (mcu_var8(4, 0x0A), 0x2E),
    (mcu_var8(4, 0x0B), 0x31),
    (mcu_var16(4, 0x11), 0x00A0),
    (mcu_var16(4, 0x13), 0x00C0),
    (mcu_var16(4, 0x15), 0x00A0),
    (mcu_var16(4, 0x17), 0x00C0),
    (mcu_var8(4, 0x04), 0x10),
    (mcu_var8(4, 0x0D), 0x02),
    (mcu_var8(4, 0x0E), 0x03),
];

const AE_VARS: [(u16, u16); 9] = [
    // flicker detection min amplitude
    (mcu_var8(4, 0x10), 0x0A),
    // average luma: preview enter, preview, capture
    (mcu_var8(1, 0x17), 0x02),
    (mcu_var8(1, 0x1D), 0x02),
    (mcu_var8(1, 0x29), 0x02),
    (mcu_var8(2, 0x4F), 0x32),
    (mcu_var8(2, 0x0C), 0x10),
    // max gain23 must not exceed max virtual gain
    (mcu_var8(2, 0x16), 0x91),
    // max virtual gain keeps blue analog gain in range under A light
    (mcu_var8(2, 0x0E), 0x91),
    // max digital gain, lowered to reduce CFPN
    (mcu_var16(2, 0x12), 0x00A4),
];

/// Automatic gamma morphing, fade-to-black disabled
const GAMMA_SETUP_VARS: [(u16, u16); 5] = [
    (mcu_var8(0x0B, 0x37), 3),
    (mcu_var16(0x0B, 0x38), 10600),
    (mcu_var16(0x0B, 0x3A), 11600),
    (mcu_var16(0x0B, 0x62), 0xFFFE),
    (mcu_var16(0x0B, 0x64), 0xFFFF),
];

const GAMMA_CURVE: [u16; 19] = [
    0, 19, 39, 67, 104, 129, 147, 163, 176, 188, 199, 209, 218, 226, 233, 239,
    244, 250, 255,
];
const GAMMA_CURVE_OFFSET: u8 = 0x4F;

/// AWB color correction, left and right matrices
const CCM_VARS: [(u16, u16); 42] = [
    (mcu_var16(3, 0x06), 0x01D6),
    (mcu_var16(3, 0x08), 0xFF89),
    (mcu_var16(3, 0x0A), 0xFFA1),
    (mcu_var16(3, 0x0C), 0xFF73),
    (mcu_var16(3, 0x0E), 0x019C),
    (mcu_var16(3, 0x10), 0xFFF1),
    (mcu_var16(3, 0x12), 0xFFB0),
    (mcu_var16(3, 0x14), 0xFF2D),
    (mcu_var16(3, 0x16), 0x0223),
    (mcu_var16(3, 0x18), 0x001C),
    (mcu_var16(3, 0x1A), 0x0048),
    (mcu_var16(3, 0x18), 0x001C),
    (mcu_var16(3, 0x1A), 0x0038),
    (mcu_var16(3, 0x18), 0x001E),
    (mcu_var16(3, 0x1A), 0x0038),
    (mcu_var16(3, 0x18), 0x0022),
    (mcu_var16(3, 0x1A), 0x0038),
    (mcu_var16(3, 0x18), 0x002C),
    (mcu_var16(3, 0x1A), 0x0038),
    (mcu_var16(3, 0x18), 0x0024),
    (mcu_var16(3, 0x1A), 0x0038),
    (mcu_var16(3, 0x1C), 0xFFCD),
    (mcu_var16(3, 0x1E), 0x0023),
    (mcu_var16(3, 0x20), 0x0010),
    (mcu_var16(3, 0x22), 0x0026),
    (mcu_var16(3, 0x24), 0xFFE9),
    (mcu_var16(3, 0x26), 0xFFF1),
    (mcu_var16(3, 0x28), 0x003A),
    (mcu_var16(3, 0x2A), 0x005D),
    (mcu_var16(3, 0x2C), 0xFF69),
    (mcu_var16(3, 0x2E), 0x000C),
    (mcu_var16(3, 0x30), 0xFFE4),
    (mcu_var16(3, 0x2E), 0x000C),
    (mcu_var16(3, 0x30), 0xFFF4),
    (mcu_var16(3, 0x2E), 0x000A),
    (mcu_var16(3, 0x30), 0xFFF4),
    (mcu_var16(3, 0x2E), 0x0006),
    (mcu_var16(3, 0x30), 0xFFF4),
    (mcu_var16(3, 0x2E), 0xFFFC),
    (mcu_var16(3, 0x30), 0xFFF4),
    (mcu_var16(3, 0x2E), 0x0004),
    (mcu_var16(3, 0x30), 0xFFF4),
];

/// SOC2031 firmware patch: (MCU RAM address, eight data words)
const FIRMWARE_PATCH: [(u16, [u16; 8]); 38] = [
    (0x0415, [0xF601, 0x42C1, 0x0326, 0x11F6, 0x0143, 0xC104, 0x260A, 0xCC04]),
    (0x0425, [0x33BD, 0xA362, 0xBD04, 0x3339, 0xC6FF, 0xF701, 0x6439, 0xDE5D]),
    (0x0435, [0x18CE, 0x0325, 0xCC00, 0x27BD, 0xC2B8, 0xCC04, 0xBDFD, 0x033B]),
    (0x0445, [0xCC06, 0x6BFD, 0x032F, 0xCC03, 0x25DD, 0x5DC6, 0x1ED7, 0x6CD7]),
    (0x0455, [0x6D5F, 0xD76E, 0xD78D, 0x8620, 0x977A, 0xD77B, 0x979A, 0xC621]),
    (0x0465, [0xD79B, 0xFE01, 0x6918, 0xCE03, 0x4DCC, 0x0013, 0xBDC2, 0xB8CC]),
    (0x0475, [0x05E9, 0xFD03, 0x4FCC, 0x034D, 0xFD01, 0x69FE, 0x02BD, 0x18CE]),
    (0x0485, [0x0361, 0xCC00, 0x11BD, 0xC2B8, 0xCC06, 0x28FD, 0x036F, 0xCC03]),
    (0x0495, [0x61FD, 0x02BD, 0xDE00, 0x18CE, 0x00C2, 0xCC00, 0x37BD, 0xC2B8]),
    (0x04A5, [0xCC06, 0x4FDD, 0xE6CC, 0x00C2, 0xDD00, 0xC601, 0xF701, 0x64C6]),
    (0x04B5, [0x05F7, 0x0165, 0x7F01, 0x6639, 0x373C, 0x3C3C, 0x3C3C, 0x30EC]),
    (0x04C5, [0x11ED, 0x02EC, 0x0FED, 0x008F, 0x30ED, 0x04EC, 0x0DEE, 0x04BD]),
    (0x04D5, [0xA406, 0x30EC, 0x02ED, 0x06FC, 0x10C0, 0x2705, 0xCCFF, 0xFFED]),
    (0x04E5, [0x06F6, 0x0256, 0x8616, 0x3DC3, 0x0261, 0x8FE6, 0x09C4, 0x07C1]),
    (0x04F5, [0x0226, 0x1DFC, 0x10C2, 0x30ED, 0x02FC, 0x10C0, 0xED00, 0xC602]),
    (0x0505, [0xBDC2, 0x5330, 0xEC00, 0xFD10, 0xC0EC, 0x02FD, 0x10C2, 0x201B]),
    (0x0515, [0xFC10, 0xC230, 0xED02, 0xFC10, 0xC0ED, 0x00C6, 0x01BD, 0xC253]),
    (0x0525, [0x30EC, 0x00FD, 0x10C0, 0xEC02, 0xFD10, 0xC2C6, 0x80D7, 0x85C6]),
    (0x0535, [0x40F7, 0x10C4, 0xF602, 0x5686, 0x163D, 0xC302, 0x618F, 0xEC14]),
    (0x0545, [0xFD10, 0xC501, 0x0101, 0x0101, 0xFC10, 0xC2DD, 0x7FFC, 0x10C7]),
    (0x0555, [0xDD76, 0xF602, 0x5686, 0x163D, 0xC302, 0x618F, 0xEC14, 0x939F]),
    (0x0565, [0x30ED, 0x08DC, 0x7693, 0x9D25, 0x08F6, 0x02BC, 0x4F93, 0x7F23]),
    (0x0575, [0x3DF6, 0x02BC, 0x4F93, 0x7F23, 0x06F6, 0x02BC, 0x4FDD, 0x7FDC]),
    (0x0585, [0x9DDD, 0x76F6, 0x02BC, 0x4F93, 0x7F26, 0x0FE6, 0x0AC1, 0x0226]),
    (0x0595, [0x09D6, 0x85C1, 0x8026, 0x0314, 0x7401, 0xF602, 0xBC4F, 0x937F]),
    (0x05A5, [0x2416, 0xDE7F, 0x09DF, 0x7F30, 0xEC08, 0xDD76, 0x200A, 0xDC76]),
    (0x05B5, [0xA308, 0x2304, 0xEC08, 0xDD76, 0x1274, 0x0122, 0xDE5D, 0xEE14]),
    (0x05C5, [0xAD00, 0x30ED, 0x11EC, 0x06ED, 0x02CC, 0x0080, 0xED00, 0x8F30]),
    (0x05D5, [0xED04, 0xEC11, 0xEE04, 0xBDA4, 0x0630, 0xE603, 0xD785, 0x30C6]),
    (0x05E5, [0x0B3A, 0x3539, 0x3C3C, 0x3C34, 0xCC32, 0x3EBD, 0xA558, 0x30ED]),
    (0x05F5, [0x04BD, 0xB2D7, 0x30E7, 0x06CC, 0x323E, 0xED00, 0xEC04, 0xBDA5]),
    (0x0605, [0x44CC, 0x3244, 0xBDA5, 0x585F, 0x30ED, 0x02CC, 0x3244, 0xED00]),
    (0x0615, [0xF601, 0xD54F, 0xEA03, 0xAA02, 0xBDA5, 0x4430, 0xE606, 0x3838]),
    (0x0625, [0x3831, 0x39BD, 0xD661, 0xF602, 0xF4C1, 0x0126, 0x0BFE, 0x02BD]),
    (0x0635, [0xEE10, 0xFC02, 0xF5AD, 0x0039, 0xF602, 0xF4C1, 0x0226, 0x0AFE]),
    (0x0645, [0x02BD, 0xEE10, 0xFC02, 0xF7AD, 0x0039, 0x3CBD, 0xB059, 0xCC00]),
    (0x0655, [0x28BD, 0xA558, 0x8300, 0x0027, 0x0BCC, 0x0026, 0x30ED, 0x00C6]),
    (0x0665, [0x03BD, 0xA544, 0x3839, 0xBDD9, 0x42D6, 0x9ACB, 0x01D7, 0x9B39]),
];

/// Load-time options
#[derive(Copy, Clone, Debug)]
pub struct Mt9d115Config {
    /// Load the gamma curve and color correction matrices during bring-up
    pub tuning_tables: bool,
    /// Master clock fed to the sensor, Hz
    pub mclk: u32,
}

impl Default for Mt9d115Config {
    fn default() -> Self {
        Self {
            tuning_tables: false,
            mclk: XCLK_MAX_HZ,
        }
    }
}

/// Main driver struct
pub struct Mt9d115<I2C, D, P, M> {
    bus: RegisterBus<I2C>,
    delay: D,
    platform: P,
    mipi: M,
    config: Mt9d115Config,
    session: SensorSession,
}

impl<I2C, CommE, D, P, M> Mt9d115<I2C, D, P, M>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
        + embedded_hal::blocking::i2c::Read<Error = CommE>,
    D: DelayMs<u32>,
    P: Platform,
    M: MipiCsi2Host,
{
    /// Power the sensor up long enough to check its chip ID, then power it down.
    /// Full configuration is deferred to `dev_init`.
    pub fn probe(
        i2c: I2C,
        address: u8,
        delay: D,
        platform: P,
        mipi: M,
        config: Mt9d115Config,
    ) -> Result<Self, Error<CommE>> {
        let pix = PixFormat {
            width: PREVIEW_WIDTH,
            height: PREVIEW_HEIGHT,
            pixel_format: PIX_FMT_YUYV,
        };
        let mut sensor = Self {
            bus: RegisterBus::new(i2c, address),
            delay,
            platform,
            mipi,
            config,
            session: SensorSession::new(
                pix,
                MODE_HIGHQUALITY | CAP_TIMEPERFRAME,
                DEFAULT_FPS,
            ),
        };

        sensor.platform.io_init();
        sensor.platform.power_down(false);
        let id = sensor.chip_id();
        sensor.platform.power_down(true);

        let id = id?;
        if id != CHIP_ID {
            error!("mt9d115 not found, chip id 0x{:04x}", id);
            return Err(Error::NotFound(id));
        }
        info!(
            "mt9d115 detected at 0x{:02x}: 0x{:04x}",
            sensor.bus.address(),
            id
        );
        Ok(sensor)
    }

    /// Give back the bus, delay source, platform and MIPI host
    pub fn release(self) -> (I2C, D, P, M) {
        (self.bus.release(), self.delay, self.platform, self.mipi)
    }

    pub fn chip_id(&mut self) -> Result<u16, Error<CommE>> {
        self.bus.read_u16(Register::ChipId as u16)
    }

    /// Read an MCU variable by logical address
    pub fn read_var(&mut self, var: u16) -> Result<u16, Error<CommE>> {
        self.bus.write_u16(Register::McuAddress as u16, var)?;
        self.bus.read_u16(Register::McuData0 as u16)
    }

    /// Write an MCU variable by logical address
    pub fn write_var(&mut self, var: u16, val: u16) -> Result<(), Error<CommE>> {
        self.bus.write_u16(Register::McuAddress as u16, var)?;
        self.bus.write_u16(Register::McuData0 as u16, val)
    }

    fn write_vars(&mut self, vars: &[(u16, u16)]) -> Result<(), Error<CommE>> {
        for (var, val) in vars {
            self.write_var(*var, *val)?;
        }
        Ok(())
    }

    /// Select `var` once, then re-read it until `done` holds
    fn poll_var<F>(&mut self, var: u16, done: F) -> Result<u16, Error<CommE>>
    where
        F: Fn(u16) -> bool,
    {
        self.bus.write_u16(Register::McuAddress as u16, var)?;
        for _ in 0..POLL_ATTEMPTS {
            let val = self.bus.read_u16(Register::McuData0 as u16)?;
            if done(val) {
                return Ok(val);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        error!("mcu variable 0x{:04x} poll timed out", var);
        Err(Error::Timeout)
    }

    /// Pulse the soft reset bit
    pub fn reset(&mut self) -> Result<(), Error<CommE>> {
        let val = self
            .bus
            .modify_u16(Register::ResetCtrl as u16, 0, RESET_SOFT)?;
        debug!("reset ctrl 0x{:04x}", val);
        self.delay.delay_ms(RESET_PULSE_MS);
        self.bus
            .modify_u16(Register::ResetCtrl as u16, RESET_SOFT, 0)?;
        Ok(())
    }

    pub fn set_interface_mode(
        &mut self,
        mode: InterfaceMode,
    ) -> Result<(), Error<CommE>> {
        let (clear, set) = match mode {
            InterfaceMode::Mipi => (0x0200, 0x0008),
            InterfaceMode::Parallel => (0x0008, 0x0200),
        };
        let val = self
            .bus
            .modify_u16(Register::ResetCtrl as u16, clear, set)?;
        debug!("{:?} interface, reset ctrl 0x{:04x}", mode, val);
        Ok(())
    }

    fn set_pll_yuv422(&mut self) -> Result<(), Error<CommE>> {
        self.bus.write_table(&PLL_YUV422_BYPASSED)?;
        self.delay.delay_ms(PLL_LOCK_MS);
        self.bus.write_table(&PLL_YUV422_LOCKED)
    }

    /// Release the MCU from standby and wait for it to come up
    fn start_mcu(&mut self) -> Result<(), Error<CommE>> {
        self.bus
            .modify_u16(Register::CtrlStatus as u16, 0, CTRL_POWERUP_STOP)?;
        self.bus
            .modify_u16(Register::CtrlStatus as u16, CTRL_STANDBY, 0)?;

        for _ in 0..POLL_ATTEMPTS {
            let status = self.bus.read_u16(Register::CtrlStatus as u16)?;
            if status & CTRL_STANDBY_DONE == 0 {
                return Ok(());
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        error!("mt9d115 MCU stuck in standby");
        Err(Error::Timeout)
    }

    fn load_tuning_tables(&mut self) -> Result<(), Error<CommE>> {
        debug!("loading gamma and CCM");
        self.write_vars(&GAMMA_SETUP_VARS)?;
        for (i, val) in GAMMA_CURVE.iter().enumerate() {
            let var = mcu_var8(0x0B, GAMMA_CURVE_OFFSET + i as u8);
            self.write_var(var, *val)?;
        }
        self.write_vars(&CCM_VARS)
    }

    /// Upload the firmware patch, run it and wait for its ID to appear
    fn load_patch(&mut self) -> Result<(), Error<CommE>> {
        #[cfg(feature = "rttdebug")]
        rprintln!("mt9d115 patch upload");

        for (addr, words) in FIRMWARE_PATCH.iter() {
            self.bus.write_u16(Register::McuAddress as u16, *addr)?;
            for (port, word) in MCU_DATA_PORTS.iter().zip(words.iter()) {
                self.bus.write_u16(*port as u16, *word)?;
            }
        }

        self.write_var(VAR_PATCH_SETUP, PATCH_ENTRY)?;
        self.write_var(VAR_PATCH_EXECUTE, 1)?;
        let id = self.poll_var(VAR_MON_PATCH_ID_0, |id| id != 0)?;
        debug!("patch id 0x{:04x}", id);
        Ok(())
    }

    /// MCU start, timing and AE variables, lens correction, firmware patch,
    /// then wait for the sequencer to reach preview
    pub fn basic_init(&mut self) -> Result<(), Error<CommE>> {
        self.start_mcu()?;

        self.write_vars(&BASIC_INIT_VARS)?;
        self.write_vars(&AE_VARS)?;

        self.bus.modify_u16(
            Register::ColorPipelineControl as u16,
            0,
            PGA_ENABLE,
        )?;

        if self.config.tuning_tables {
            self.load_tuning_tables()?;
        }

        self.load_patch()?;

        // continue past power-up stop
        self.bus
            .modify_u16(Register::CtrlStatus as u16, CTRL_POWERUP_STOP, 0)?;
        self.poll_var(VAR_SEQ_STATE, |state| state == SEQ_STATE_PREVIEW)?;

        // synchronize firmware with the sensor
        self.write_var(VAR_SEQ_CMD, SEQ_CMD_REFRESH)
    }

    fn start_mipi_host(&mut self) -> Result<(), Error<CommE>> {
        self.mipi.enable();
        self.delay.delay_ms(MIPI_ENABLE_MS);
        if !self.mipi.is_enabled() {
            self.mipi.enable();
        }
        if !self.mipi.is_enabled() {
            error!("cannot enable MIPI CSI-2 receiver");
            return Err(Error::Platform);
        }

        self.mipi.set_lanes();
        self.mipi.reset();
        if self.session.pix.pixel_format == PIX_FMT_YUYV {
            self.mipi.set_data_type(MipiDataType::Yuv422);
        } else {
            warn!("pixel format 0x{:08x} not supported on MIPI", self.session.pix.pixel_format);
        }
        Ok(())
    }

    /// Wait for the receiver to see the sensor clock, then clean data
    fn wait_mipi_link(&mut self) -> Result<(), Error<CommE>> {
        let mut clocked = false;
        for _ in 0..POLL_ATTEMPTS {
            if self.mipi.dphy_status() != DPHY_NO_CLOCK {
                clocked = true;
                break;
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        if !clocked {
            error!("MIPI CSI-2 receiver sees no sensor clock");
            return Err(Error::Platform);
        }

        for _ in 0..POLL_ATTEMPTS {
            if self.mipi.error1() == 0 {
                return Ok(());
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        error!("MIPI CSI-2 receiver reports data errors");
        Err(Error::Platform)
    }

    fn is_supported_size(width: u32, height: u32) -> bool {
        (width == PREVIEW_WIDTH && height == PREVIEW_HEIGHT)
            || (width == CAPTURE_WIDTH && height == CAPTURE_HEIGHT)
    }
}

impl<I2C, CommE, D, P, M> SensorOps for Mt9d115<I2C, D, P, M>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
        + embedded_hal::blocking::i2c::Read<Error = CommE>,
    D: DelayMs<u32>,
    P: Platform,
    M: MipiCsi2Host,
{
    type CommE = CommE;

    fn session(&self) -> &SensorSession {
        &self.session
    }

    /// Bring up the MIPI receiver, configure the sensor, then wait for the link
    fn dev_init(&mut self) -> Result<(), Error<CommE>> {
        self.start_mipi_host()?;

        self.reset()?;
        self.set_interface_mode(InterfaceMode::Mipi)?;
        self.set_pll_yuv422()?;
        self.basic_init()?;

        self.wait_mipi_link()?;
        info!("mt9d115 streaming over MIPI");
        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), Error<CommE>> {
        if on && !self.session.on {
            debug!("power on");
            self.platform.power_down(false);
        } else if !on && self.session.on {
            debug!("power off");
            self.platform.power_down(true);
        }
        self.session.on = on;
        Ok(())
    }

    fn if_parm(&self) -> IfParm {
        IfParm {
            // external vsync
            bt_sync_correct: true,
            ..IfParm::bt656(
                Bt656Mode::NoBt8Bit,
                self.config.mclk,
                XCLK_MIN_HZ,
                XCLK_MAX_HZ,
            )
        }
    }

    /// Records the negotiated interval; the sequencer timing is fixed
    fn set_parm(&mut self, parm: StreamParm) -> Result<StreamParm, Error<CommE>> {
        if parm.buf_type != BufType::VideoCapture {
            return Err(Error::InvalidArgument);
        }
        self.session.time_per_frame =
            negotiate_frame_rate(parm.time_per_frame, DEFAULT_FPS, MIN_FPS, MAX_FPS);
        self.session.capture_mode = parm.capture_mode;
        Ok(self.session.stream_parm())
    }

    fn enum_frame_sizes(&self, index: u32) -> Result<FrameSize, Error<CommE>> {
        let (width, height) = match index {
            0 => (PREVIEW_WIDTH, PREVIEW_HEIGHT),
            1 => (CAPTURE_WIDTH, CAPTURE_HEIGHT),
            _ => return Err(Error::InvalidArgument),
        };
        Ok(FrameSize {
            pixel_format: PIX_FMT_YUYV,
            width,
            height,
        })
    }

    fn enum_frame_intervals(
        &self,
        query: FrameIntervalQuery,
    ) -> Result<Fract, Error<CommE>> {
        if query.pixel_format != PIX_FMT_YUYV
            || !Self::is_supported_size(query.width, query.height)
        {
            return Err(Error::InvalidArgument);
        }
        match query.index {
            0 => Ok(Fract::per_second(MAX_FPS)),
            1 => Ok(Fract::per_second(MIN_FPS)),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn chip_ident(&self) -> ChipIdent {
        ChipIdent {
            name: "mt9d115_mipi_camera",
            revision: 1,
        }
    }
}
