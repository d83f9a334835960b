/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Driver for the Aptina MT9V129 VGA system-on-chip sensor
//! This sensor has multiple interfaces:
//! - Two-wire i2c for configuration registers and firmware variables (i2c)
//! - 8-bit parallel pixel data out, progressive VGA
//! - Analog composite out, NTSC or PAL
//!
//! State changes go through the embedded firmware's system manager,
//! using the command/doorbell handshake in [`crate::doorbell`].

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, error, info};

use crate::doorbell::{CommandPort, SystemState};
use crate::platform::Platform;
use crate::regio::{RegWrite, RegisterBus};
use crate::subdev::{
    negotiate_frame_rate, Bt656Mode, BufType, ChipIdent, Fract,
    FrameIntervalQuery, FrameSize, IfParm, PixFormat, SensorOps,
    SensorSession, StreamParm, CAP_TIMEPERFRAME, MODE_HIGHQUALITY,
    PIX_FMT_UYVY,
};
use crate::Error;

/// 0x90 in 8-bit form
pub const DEFAULT_I2C_ADDRESS: u8 = 0x48;

pub const CHIP_ID: u16 = 0x2285;

pub const MIN_FPS: u32 = 25;
pub const MAX_FPS: u32 = 60;

/// Supported master clock range, Hz
pub const XCLK_MIN_HZ: u32 = 6_000_000;
pub const XCLK_MAX_HZ: u32 = 24_000_000;

/// Time for the firmware to boot after a soft reset
const RESET_SETTLE_MS: u32 = 500;

const PAD_SLEW_DEFAULT: u16 = 0x0302;
const PARALLEL_OUT_PROGRESSIVE: u16 = 0x0005;
const PARALLEL_OUT_COMPOSITE: u8 = 0x23;

#[repr(u16)]
#[derive(Copy, Clone, Debug)]
pub enum Register {
    ChipId = 0x0000,
    SoftReset = 0x001A,
    PadSlew = 0x001E,
    NtscPortParallelControl = 0x9426,
    PalPortParallelControl = 0x9826,
    CamFrameScanControl = 0xC858,
    CamPortParallelControl = 0xC972,
}

/// Output modes. The discriminant is the capture mode number the
/// pipeline uses to select it.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Mode {
    Vga = 0,
    Ntsc = 2,
    Pal = 3,
}

impl Mode {
    /// Enumeration order for frame sizes
    pub const ALL: [Mode; 3] = [Mode::Vga, Mode::Ntsc, Mode::Pal];

    pub fn from_capture_mode(capture_mode: u32) -> Option<Self> {
        match capture_mode {
            0 => Some(Mode::Vga),
            2 => Some(Mode::Ntsc),
            3 => Some(Mode::Pal),
            _ => None,
        }
    }

    /// Active (width, height)
    pub fn size(self) -> (u32, u32) {
        match self {
            Mode::Vga => (640, 480),
            Mode::Ntsc => (720, 480),
            Mode::Pal => (720, 576),
        }
    }

    pub fn fps(self) -> u32 {
        match self {
            Mode::Vga => 60,
            Mode::Ntsc => 30,
            Mode::Pal => 25,
        }
    }

    /// Composite modes are interlaced and clocked from the video encoder
    pub fn is_interlaced(self) -> bool {
        self != Mode::Vga
    }

    /// Value for the frame scan control register
    fn frame_scan(self) -> u16 {
        match self {
            Mode::Vga => 1,
            Mode::Ntsc => 0,
            Mode::Pal => 2,
        }
    }

    fn pix_format(self) -> PixFormat {
        let (width, height) = self.size();
        PixFormat {
            width,
            height,
            pixel_format: PIX_FMT_UYVY,
        }
    }
}

const DEFAULT_MODE: Mode = Mode::Vga;

/// Tuning written once after reset
const INIT_REGS: [RegWrite; 133] = [
    // auto-exposure rules
    RegWrite::u8(0xA406, 0x06),
    // auto-exposure tracking
    RegWrite::u16(0xA800, 0x0408),
    RegWrite::u8(0xA806, 0x00),
    RegWrite::u8(0xA807, 0x37),
    RegWrite::u8(0xA809, 0x37),
    RegWrite::u8(0xA80B, 0x10),
    RegWrite::u16(0xA80E, 0x0106),
    RegWrite::u16(0xA818, 0x0002),
    RegWrite::u8(0xA81B, 0x01),
    RegWrite::u16(0xA826, 0x013A),
    RegWrite::u16(0xA828, 0x14EB),
    RegWrite::u16(0xA82A, 0x075B),
    RegWrite::u16(0xA82C, 0x11C7),
    RegWrite::u16(0xA82E, 0x1B3A),
    RegWrite::u32(0xA83C, 0x00000234),
    RegWrite::u16(0xA84E, 0x0084),
    // white balance
    RegWrite::u16(0xAC00, 0x0021),
    RegWrite::u8(0xAC0E, 0x48),
    RegWrite::u8(0xAC0F, 0x34),
    RegWrite::u8(0xAC10, 0x63),
    RegWrite::u16(0xAC12, 0x00B1),
    RegWrite::u16(0xAC14, 0x00F6),
    // color correction
    RegWrite::u16(0xB406, 0x01FB),
    RegWrite::u16(0xB408, 0xFF32),
    RegWrite::u16(0xB40A, 0xFFD8),
    RegWrite::u16(0xB40C, 0xFF89),
    RegWrite::u16(0xB40E, 0x018B),
    RegWrite::u16(0xB410, 0xFFF0),
    RegWrite::u16(0xB412, 0x000C),
    RegWrite::u16(0xB414, 0xFF15),
    RegWrite::u16(0xB416, 0x01E3),
    // low-light gamma
    RegWrite::u8(0xBC0B, 0x20),
    RegWrite::u8(0xBC0C, 0x2E),
    RegWrite::u8(0xBC0D, 0x45),
    RegWrite::u8(0xBC0E, 0x69),
    RegWrite::u8(0xBC0F, 0x83),
    RegWrite::u8(0xBC10, 0x96),
    RegWrite::u8(0xBC11, 0xA7),
    RegWrite::u8(0xBC12, 0xB4),
    RegWrite::u8(0xBC13, 0xC0),
    RegWrite::u8(0xBC14, 0xCB),
    RegWrite::u8(0xBC15, 0xD5),
    RegWrite::u8(0xBC16, 0xDD),
    RegWrite::u8(0xBC17, 0xE5),
    RegWrite::u8(0xBC18, 0xEB),
    RegWrite::u8(0xBC19, 0xF2),
    RegWrite::u8(0xBC1A, 0xF7),
    RegWrite::u8(0xBC1B, 0xFC),
    RegWrite::u8(0xBC1C, 0xFF),
    RegWrite::u8(0xBC1E, 0x1F),
    RegWrite::u8(0xBC1F, 0x2F),
    RegWrite::u8(0xBC20, 0x49),
    RegWrite::u8(0xBC21, 0x6E),
    RegWrite::u8(0xBC22, 0x87),
    RegWrite::u8(0xBC23, 0x99),
    RegWrite::u8(0xBC24, 0xAA),
    RegWrite::u8(0xBC25, 0xB8),
    RegWrite::u8(0xBC26, 0xC4),
    RegWrite::u8(0xBC27, 0xCE),
    RegWrite::u8(0xBC28, 0xD7),
    RegWrite::u8(0xBC29, 0xE0),
    RegWrite::u8(0xBC2A, 0xE7),
    RegWrite::u8(0xBC2B, 0xED),
    RegWrite::u8(0xBC2C, 0xF3),
    RegWrite::u8(0xBC2D, 0xF7),
    RegWrite::u8(0xBC2E, 0xFC),
    RegWrite::u8(0xBC2F, 0xFF),
    RegWrite::u8(0xBC32, 0x7D),
    RegWrite::u16(0xBC38, 0x02D1),
    RegWrite::u16(0xBC3A, 0x047F),
    // flicker detection
    RegWrite::u8(0xC07B, 0x03),
    RegWrite::u8(0xC07D, 0x05),
    // camera control
    RegWrite::u16(0xC80E, 0x00A4),
    RegWrite::u16(0xC83A, 0x0021),
    RegWrite::u8(0xC83D, 0x01),
    RegWrite::u16(0xC83E, 0x020D),
    RegWrite::u16(0xC840, 0x020B),
    RegWrite::u16(0xC842, 0x035A),
    RegWrite::u16(0xC844, 0x00BB),
    RegWrite::u16(0xC84A, 0x0103),
    RegWrite::u16(0xC84C, 0x0081),
    RegWrite::u8(0xC84F, 0x15),
    RegWrite::u16(0xC882, 0x3BF0),
    RegWrite::u16(0xC884, 0x3BF0),
    RegWrite::u16(0xC888, 0x01F2),
    RegWrite::u16(0xC88A, 0xFF6E),
    RegWrite::u16(0xC88C, 0xFFA0),
    RegWrite::u16(0xC88E, 0xFF76),
    RegWrite::u16(0xC890, 0x0188),
    RegWrite::u16(0xC892, 0x0002),
    RegWrite::u16(0xC894, 0xFFC2),
    RegWrite::u16(0xC896, 0xFF30),
    RegWrite::u16(0xC898, 0x020E),
    RegWrite::u16(0xC8AC, 0x01AF),
    RegWrite::u16(0xC8AE, 0xFF93),
    RegWrite::u16(0xC8B0, 0xFFBE),
    RegWrite::u16(0xC8B2, 0xFF9E),
    RegWrite::u16(0xC8B4, 0x0176),
    RegWrite::u16(0xC8B6, 0xFFED),
    RegWrite::u16(0xC8B8, 0x0001),
    RegWrite::u16(0xC8BA, 0xFF78),
    RegWrite::u16(0xC8BC, 0x0187),
    RegWrite::u16(0xC8E6, 0x13E2),
    RegWrite::u16(0xC8EA, 0x5D54),
    RegWrite::u16(0xC8EC, 0xDCCE),
    RegWrite::u16(0xC8F0, 0x812A),
    RegWrite::u16(0xC8F2, 0x9C08),
    RegWrite::u16(0xC8F4, 0x989D),
    RegWrite::u16(0xC8F6, 0x3D23),
    RegWrite::u16(0xC8F8, 0x0624),
    RegWrite::u16(0xC8FA, 0x0040),
    RegWrite::u16(0xC8FC, 0x0035),
    RegWrite::u16(0xC928, 0x0018),
    RegWrite::u16(0xC92A, 0x0090),
    RegWrite::u8(0xC931, 0x07),
    RegWrite::u8(0xC932, 0x02),
    RegWrite::u8(0xC934, 0x02),
    RegWrite::u8(0xC935, 0x1F),
    RegWrite::u8(0xC946, 0x28),
    RegWrite::u8(0xC947, 0x1E),
    RegWrite::u16(0xC948, 0x0093),
    RegWrite::u16(0xC94A, 0x0366),
    RegWrite::u16(0xC958, 0x0020),
    RegWrite::u16(0xC95A, 0x0095),
    RegWrite::u16(0xC960, 0x0001),
    RegWrite::u16(0xC96E, 0x001C),
    RegWrite::u8(0xC970, 0x10),
    RegWrite::u16(0xC972, 0x0025),
    RegWrite::u16(0xC97E, 0x0071),
    RegWrite::u16(0xC980, 0x0471),
    RegWrite::u8(0xC985, 0x3B),
    RegWrite::u8(0xC986, 0x34),
    RegWrite::u8(0xC987, 0x3E),
];

/// Load-time options
#[derive(Copy, Clone, Debug)]
pub struct Mt9v129Config {
    /// Master clock fed to the sensor, Hz
    pub mclk: u32,
}

impl Default for Mt9v129Config {
    fn default() -> Self {
        Self { mclk: XCLK_MAX_HZ }
    }
}

/// Main driver struct
pub struct Mt9v129<I2C, D, P> {
    bus: RegisterBus<I2C>,
    delay: D,
    platform: P,
    config: Mt9v129Config,
    port: CommandPort,
    mode: Mode,
    session: SensorSession,
}

impl<I2C, CommE, D, P> Mt9v129<I2C, D, P>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
        + embedded_hal::blocking::i2c::Read<Error = CommE>,
    D: DelayMs<u32>,
    P: Platform,
{
    /// Detect and reset the sensor, load its tuning, select VGA output,
    /// then leave it powered down.
    pub fn probe(
        i2c: I2C,
        address: u8,
        delay: D,
        platform: P,
        config: Mt9v129Config,
    ) -> Result<Self, Error<CommE>> {
        let mut sensor = Self {
            bus: RegisterBus::new(i2c, address),
            delay,
            platform,
            config,
            port: CommandPort::MT9V129,
            mode: DEFAULT_MODE,
            session: SensorSession::new(
                DEFAULT_MODE.pix_format(),
                MODE_HIGHQUALITY | CAP_TIMEPERFRAME,
                DEFAULT_MODE.fps(),
            ),
        };

        sensor.platform.io_init();
        sensor.platform.power_down(false);
        let res = sensor.bring_up();
        // left powered down whether or not the part came up
        sensor.platform.power_down(true);
        res?;
        Ok(sensor)
    }

    fn bring_up(&mut self) -> Result<(), Error<CommE>> {
        let id = self.chip_id()?;
        if id != CHIP_ID {
            error!("mt9v129 not found, chip id 0x{:04x}", id);
            return Err(Error::NotFound(id));
        }
        info!(
            "mt9v129 detected at 0x{:02x}: 0x{:04x}",
            self.bus.address(),
            id
        );

        self.soft_reset()?;
        let state = self.system_state()?;
        debug!("state after reset 0x{:02x}", state);

        self.bus.write_table(&INIT_REGS)?;
        self.bus
            .write_u16(Register::PadSlew as u16, PAD_SLEW_DEFAULT)?;
        self.change_mode(DEFAULT_MODE)
    }

    /// Give back the bus, delay source and platform
    pub fn release(self) -> (I2C, D, P) {
        (self.bus.release(), self.delay, self.platform)
    }

    pub fn chip_id(&mut self) -> Result<u16, Error<CommE>> {
        self.bus.read_u16(Register::ChipId as u16)
    }

    /// Currently selected output mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn soft_reset(&mut self) -> Result<(), Error<CommE>> {
        self.bus.write_u16(Register::SoftReset as u16, 0x0001)?;
        self.bus.write_u16(Register::SoftReset as u16, 0x0000)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        Ok(())
    }

    /// Request a system state change through the firmware doorbell
    pub fn set_system_state(
        &mut self,
        next: SystemState,
    ) -> Result<(), Error<CommE>> {
        self.port.set_state(&mut self.bus, &mut self.delay, next as u8)
    }

    /// Raw system state reported by the firmware
    pub fn system_state(&mut self) -> Result<u8, Error<CommE>> {
        self.port.get_state(&mut self.bus, &mut self.delay)
    }

    fn log_state(&mut self) -> Result<(), Error<CommE>> {
        let raw = self.system_state()?;
        match SystemState::from_raw(raw) {
            Some(state) => debug!("firmware state {:?}", state),
            None => debug!("firmware state 0x{:02x}", raw),
        }
        Ok(())
    }

    /// Program the output port for `mode` and have the firmware apply it
    pub fn change_mode(&mut self, mode: Mode) -> Result<(), Error<CommE>> {
        match mode {
            Mode::Vga => self.bus.write_u16(
                Register::CamPortParallelControl as u16,
                PARALLEL_OUT_PROGRESSIVE,
            )?,
            Mode::Ntsc => self.bus.write_u8(
                Register::NtscPortParallelControl as u16,
                PARALLEL_OUT_COMPOSITE,
            )?,
            Mode::Pal => self.bus.write_u8(
                Register::PalPortParallelControl as u16,
                PARALLEL_OUT_COMPOSITE,
            )?,
        }
        self.bus
            .write_u16(Register::CamFrameScanControl as u16, mode.frame_scan())?;
        self.set_system_state(SystemState::EnterConfigChange)?;

        self.mode = mode;
        self.session.pix = mode.pix_format();
        info!("mt9v129 mode {:?}", mode);
        Ok(())
    }
}

impl<I2C, CommE, D, P> SensorOps for Mt9v129<I2C, D, P>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
        + embedded_hal::blocking::i2c::Read<Error = CommE>,
    D: DelayMs<u32>,
    P: Platform,
{
    type CommE = CommE;

    fn session(&self) -> &SensorSession {
        &self.session
    }

    fn set_power(&mut self, on: bool) -> Result<(), Error<CommE>> {
        if on && !self.session.on {
            debug!("power on");
            self.platform.power_down(false);
            self.set_system_state(SystemState::StartStreaming)?;
            self.log_state()?;
        } else if !on && self.session.on {
            debug!("power off");
            // suspend while the firmware is still powered
            self.set_system_state(SystemState::EnterSuspend)?;
            self.log_state()?;
            self.platform.power_down(true);
        }
        self.session.on = on;
        Ok(())
    }

    fn if_parm(&self) -> IfParm {
        let clock_curr = if self.mode.is_interlaced() {
            0
        } else {
            self.config.mclk
        };
        IfParm {
            // external vsync
            bt_sync_correct: true,
            ..IfParm::bt656(
                Bt656Mode::NoBt8Bit,
                clock_curr,
                XCLK_MIN_HZ,
                XCLK_MAX_HZ,
            )
        }
    }

    /// Only the three mode rates are accepted; the capture mode picks the output
    fn set_parm(&mut self, parm: StreamParm) -> Result<StreamParm, Error<CommE>> {
        self.platform.power_down(false);
        if parm.buf_type != BufType::VideoCapture {
            return Err(Error::InvalidArgument);
        }

        let time_per_frame = negotiate_frame_rate(
            parm.time_per_frame,
            DEFAULT_MODE.fps(),
            MIN_FPS,
            MAX_FPS,
        );
        let fps = time_per_frame.fps();
        if !Mode::ALL.iter().any(|m| m.fps() == fps) {
            error!("frame rate {} not supported", fps);
            return Err(Error::InvalidArgument);
        }
        let mode = Mode::from_capture_mode(parm.capture_mode)
            .ok_or(Error::InvalidArgument)?;

        self.change_mode(mode)?;
        self.session.time_per_frame = time_per_frame;
        self.session.capture_mode = parm.capture_mode;
        Ok(self.session.stream_parm())
    }

    fn enum_frame_sizes(&self, index: u32) -> Result<FrameSize, Error<CommE>> {
        let mode = Mode::ALL
            .get(index as usize)
            .ok_or(Error::InvalidArgument)?;
        let (width, height) = mode.size();
        Ok(FrameSize {
            pixel_format: self.session.pix.pixel_format,
            width,
            height,
        })
    }

    fn enum_frame_intervals(
        &self,
        query: FrameIntervalQuery,
    ) -> Result<Fract, Error<CommE>> {
        if query.index != 0 || query.pixel_format != self.session.pix.pixel_format {
            return Err(Error::InvalidArgument);
        }
        Mode::ALL
            .iter()
            .find(|m| m.size() == (query.width, query.height))
            .map(|m| Fract::per_second(m.fps()))
            .ok_or(Error::InvalidArgument)
    }

    fn chip_ident(&self) -> ChipIdent {
        ChipIdent {
            name: "mt9v129_camera",
            revision: 0,
        }
    }
}
