/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Driver for the Aptina MT9M024 (A-1000ERS) 1.2 MP sensor
//! This sensor has multiple interfaces:
//! - Two-wire i2c for configuration registers (i2c)
//! - parallel pixel data out, 8 or 12 bits (dout)
//! - HiSPi serial pixel data out, unused here
//!
//! The sensor has no firmware: bring-up uploads a sequencer RAM image,
//! replays analog presets, then programs the PLL for a 74.25 MHz pixel clock.

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, error, info};

#[cfg(feature = "rttdebug")]
use panic_rtt_core::rprintln;

use crate::platform::Platform;
use crate::regio::{RegWrite, RegisterBus};
use crate::subdev::{
    negotiate_frame_rate, Bt656Mode, BufType, ChipIdent, Control, FrameSize,
    IfParm, PixFormat, SensorOps, SensorSession, StreamParm, CAP_TIMEPERFRAME,
    PIX_FMT_GENERIC, PIX_FMT_GENERIC_16,
};
use crate::Error;

pub const DEFAULT_I2C_ADDRESS: u8 = 0x10;

/// Value of the model ID register
pub const CHIP_ID: u16 = 0x2400;

// Active pixel array
pub const MAX_FRAME_WIDTH: u32 = 1280;
pub const MAX_FRAME_HEIGHT: u32 = 960;

/// Largest requested size that is still read out with 2x2 digital binning
pub const BINNING_MAX_WIDTH: u32 = 640;
pub const BINNING_MAX_HEIGHT: u32 = 480;

const X_ADDR_START_DEFAULT: u32 = 0;
const Y_ADDR_START_DEFAULT: u32 = 2;

/// Pixel clocks per line and lines per frame at the default timing
const LINE_LENGTH_PCK: u32 = 0x672;
const FRAME_LENGTH_LINES: u32 = 0x3DE;

/// PLL output range, Hz
pub const PIXCLK_MIN_HZ: u32 = 6_000_000;
pub const PIXCLK_MAX_HZ: u32 = 74_000_000;

/// Pixel clock reported to the capture interface
pub const PIXEL_CLOCK_HZ: u32 = 50_000_000;

pub const DEFAULT_FPS: u32 = 45;
pub const MAX_FPS: u32 = PIXCLK_MAX_HZ / (LINE_LENGTH_PCK * FRAME_LENGTH_LINES);
pub const MIN_FPS: u32 = PIXCLK_MIN_HZ / (LINE_LENGTH_PCK * FRAME_LENGTH_LINES);

/// Fixed settling time after reset and sequencer steps
const SETTLE_MS: u32 = 200;
/// VCO lock time after PLL programming
const PLL_LOCK_MS: u32 = 100;

#[repr(u16)]
#[derive(Copy, Clone, Debug)]
pub enum Register {
    ModelId = 0x3000,
    YAddrStart = 0x3002,
    XAddrStart = 0x3004,
    YAddrEnd = 0x3006,
    XAddrEnd = 0x3008,
    RevisionNumber = 0x300E,
    CoarseIntegrationTime = 0x3012,
    ResetRegister = 0x301A,
    VtPixClkDiv = 0x302A,
    VtSysClkDiv = 0x302C,
    PrePllClkDiv = 0x302E,
    PllMultiplier = 0x3030,
    DigitalBinning = 0x3032,
    ReadMode = 0x3040,
    BlueGain = 0x3058,
    TestPatternMode = 0x3070,
    OperationModeCtrl = 0x3082,
    SeqDataPort = 0x3086,
    SeqCtrlPort = 0x3088,
    SeqExecute = 0x309E,
    DigitalTest = 0x30B0,
    HdrComp = 0x31D0,
    AeCtrl = 0x3100,
}

// Reset register bits
const RESET_STREAM: u16 = 1 << 2;
const RESET_PARALLEL_ENABLE: u16 = (1 << 7) | (1 << 6);
const RESET_SMIA_SERIALIZER_DIS: u16 = 1 << 12;

const BINNING_FIELD: u16 = 0b11;
const BINNING_2X2: u16 = 0b10;

/// Row and column flip together
const READ_MODE_ROTATE_180: u16 = (1 << 15) | (1 << 14);

const AE_CTRL_ENABLED: u16 = 0x1B;
const AE_CTRL_DISABLED: u16 = 0x1A;
const OPERATION_MODE_HDR: u16 = 0x28;

/// A-1000ERS optimized analog and ADC settings
const ANALOG_PRESETS: [RegWrite; 19] = [
    RegWrite::u16(0x301A, 0x10D8),
    RegWrite::u16(0x3082, 0x0029),
    // data pedestal of 200 avoids clipping near saturation
    RegWrite::u16(0x301E, 0x00C8),
    RegWrite::u16(0x3EDA, 0x0F03),
    RegWrite::u16(0x3EDE, 0xC005),
    RegWrite::u16(0x3ED8, 0x09EF),
    RegWrite::u16(0x3EE2, 0xA46B),
    RegWrite::u16(0x3EE0, 0x067D),
    RegWrite::u16(0x3EDC, 0x0070),
    // digital row noise correction
    RegWrite::u16(0x3044, 0x0404),
    RegWrite::u16(0x3EE6, 0x8303),
    // analog row noise correction, 1.25x gain
    RegWrite::u16(0x3EE4, 0xD208),
    RegWrite::u16(0x3ED6, 0x00BD),
    RegWrite::u16(0x3EE6, 0x8303),
    RegWrite::u16(0x30E4, 0x6372),
    RegWrite::u16(0x30E2, 0x7253),
    RegWrite::u16(0x30E0, 0x5470),
    RegWrite::u16(0x30E6, 0xC4CC),
    RegWrite::u16(0x30E8, 0x8050),
];

const COLUMN_RETRIGGER: [RegWrite; 3] = [
    RegWrite::u16(0x30B0, 0x1300),
    RegWrite::u16(0x30D4, 0xE007),
    RegWrite::u16(0x30BA, 0x0008),
];

/// Streaming stays off while the parallel port is set up
const PARALLEL_MODE: [RegWrite; 3] = [
    RegWrite::u16(0x301A, 0xD018),
    RegWrite::u16(0x31D0, 0x0001),
    RegWrite::u16(0x30B0, 0x1300),
];

const AUTO_EXPOSURE: [RegWrite; 10] = [
    RegWrite::u16(0x3100, 0x001B),
    RegWrite::u16(0x3112, 0x029F),
    RegWrite::u16(0x3114, 0x008C),
    RegWrite::u16(0x3116, 0x02C0),
    RegWrite::u16(0x3118, 0x005B),
    RegWrite::u16(0x3102, 0x0384),
    RegWrite::u16(0x3104, 0x1000),
    RegWrite::u16(0x3126, 0x0080),
    RegWrite::u16(0x311C, 0x03DD),
    RegWrite::u16(0x311E, 0x0003),
];

/// PLL dividers: 27 MHz in, 74.25 MHz pixel clock out
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PllSettings {
    pub m: u16,
    pub n: u16,
    pub p1: u16,
    pub p2: u16,
}

pub const PLL_74_25_MHZ: PllSettings = PllSettings {
    m: 0x2C,
    n: 0x2,
    p1: 0x2,
    p2: 0x4,
};

/// Sensor-generated test images
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TestPattern {
    Disabled,
    SolidColor,
    ColorBar,
    FadeToGrayColorBar,
    Walking1s,
}

impl TestPattern {
    /// Map the numeric selector used on the command line: 1..=4, anything else disables
    pub fn from_selector(selector: u8) -> Self {
        match selector {
            1 => TestPattern::SolidColor,
            2 => TestPattern::ColorBar,
            3 => TestPattern::FadeToGrayColorBar,
            4 => TestPattern::Walking1s,
            _ => TestPattern::Disabled,
        }
    }

    pub fn register_value(self) -> u16 {
        match self {
            TestPattern::Disabled => 0,
            TestPattern::SolidColor => 1,
            TestPattern::ColorBar => 2,
            TestPattern::FadeToGrayColorBar => 3,
            TestPattern::Walking1s => 256,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DataWidth {
    Bits8,
    Bits12,
}

/// Load-time options
#[derive(Copy, Clone, Debug)]
pub struct Mt9m024Config {
    pub test_pattern: TestPattern,
    pub auto_exposure: bool,
    /// Only takes effect with auto exposure enabled
    pub hdr: bool,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub data_width: DataWidth,
    pub rotate: bool,
    /// 2x2 digital binning for VGA and smaller
    pub binning: bool,
    /// Sequencer RAM image, uploaded word by word during bring-up
    pub sequencer: &'static [u16],
}

impl Default for Mt9m024Config {
    fn default() -> Self {
        Self {
            test_pattern: TestPattern::Disabled,
            auto_exposure: true,
            hdr: false,
            sensor_width: MAX_FRAME_WIDTH,
            sensor_height: MAX_FRAME_HEIGHT,
            data_width: DataWidth::Bits12,
            rotate: false,
            binning: true,
            sequencer: &[],
        }
    }
}

impl Mt9m024Config {
    pub fn pixel_format(&self) -> u32 {
        match self.data_width {
            // the CSI extends 12-bit samples to 16 bits
            DataWidth::Bits12 => PIX_FMT_GENERIC_16,
            DataWidth::Bits8 => PIX_FMT_GENERIC,
        }
    }
}

/// Main driver struct
pub struct Mt9m024<I2C, D, P> {
    bus: RegisterBus<I2C>,
    delay: D,
    platform: P,
    config: Mt9m024Config,
    session: SensorSession,
    /// (fps, width, height) last written to the sensor
    applied: Option<(u32, u32, u32)>,
}

impl<I2C, CommE, D, P> Mt9m024<I2C, D, P>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = CommE>
        + embedded_hal::blocking::i2c::Read<Error = CommE>,
    D: DelayMs<u32>,
    P: Platform,
{
    /// Detect the sensor, run the full bring-up and apply the load-time options.
    /// May use DEFAULT_I2C_ADDRESS if in doubt.
    pub fn probe(
        i2c: I2C,
        address: u8,
        delay: D,
        platform: P,
        config: Mt9m024Config,
    ) -> Result<Self, Error<CommE>> {
        if config.sensor_width == 0
            || config.sensor_height == 0
            || config.sensor_width > MAX_FRAME_WIDTH
            || config.sensor_height > MAX_FRAME_HEIGHT
        {
            return Err(Error::InvalidArgument);
        }

        let pix = PixFormat {
            width: config.sensor_width,
            height: config.sensor_height,
            pixel_format: config.pixel_format(),
        };
        let mut sensor = Self {
            bus: RegisterBus::new(i2c, address),
            delay,
            platform,
            config,
            session: SensorSession::new(pix, CAP_TIMEPERFRAME, DEFAULT_FPS),
            applied: None,
        };

        let id = sensor.chip_id()?;
        if id != CHIP_ID {
            error!("mt9m024 not found, model id 0x{:04x}", id);
            return Err(Error::NotFound(id));
        }
        debug!("mt9m024 found");

        sensor.config().map_err(|e| {
            error!("mt9m024 sequencer load failed");
            e
        })?;

        // HiSPi off, parallel interface on
        sensor.bus.modify_u16(
            Register::ResetRegister as u16,
            0,
            RESET_SMIA_SERIALIZER_DIS,
        )?;
        sensor.bus.modify_u16(
            Register::ResetRegister as u16,
            0,
            RESET_PARALLEL_ENABLE,
        )?;

        let pattern = sensor.config.test_pattern;
        if pattern != TestPattern::Disabled {
            info!("mt9m024 test pattern {:?}", pattern);
        }
        sensor
            .bus
            .write_u16(Register::TestPatternMode as u16, pattern.register_value())?;

        sensor.setup_auto_exposure()?;

        if sensor.config.rotate {
            info!("mt9m024 180 degree rotation");
            sensor.bus.modify_u16(
                Register::ReadMode as u16,
                0,
                READ_MODE_ROTATE_180,
            )?;
        }

        info!("mt9m024 probed");
        Ok(sensor)
    }

    /// Give back the bus, delay source and platform
    pub fn release(self) -> (I2C, D, P) {
        (self.bus.release(), self.delay, self.platform)
    }

    pub fn chip_id(&mut self) -> Result<u16, Error<CommE>> {
        self.bus.read_u16(Register::ModelId as u16)
    }

    /// The (fps, width, height) currently programmed, if any
    pub fn applied_mode(&self) -> Option<(u32, u32, u32)> {
        self.applied
    }

    /// Reset the sensor, load the sequencer and program presets and PLL
    pub fn config(&mut self) -> Result<(), Error<CommE>> {
        #[cfg(feature = "rttdebug")]
        rprintln!("mt9m024 config start");

        self.platform.io_init();
        self.delay.delay_ms(SETTLE_MS);
        self.bus.write_u16(Register::ResetRegister as u16, 0x0001)?;
        self.delay.delay_ms(SETTLE_MS);
        self.bus.write_u16(Register::ResetRegister as u16, 0x10D8)?;
        self.delay.delay_ms(SETTLE_MS);

        self.load_sequencer()?;
        self.delay.delay_ms(SETTLE_MS);

        self.bus.write_table(&ANALOG_PRESETS)?;
        self.bus.write_table(&COLUMN_RETRIGGER)?;

        self.set_streaming(true)?;
        self.delay.delay_ms(SETTLE_MS);
        let reset = self.set_streaming(false)?;
        debug!("reset register after retrigger 0x{:04x}", reset);

        self.bus.write_u16(Register::BlueGain as u16, 0x003F)?;
        self.bus
            .write_u16(Register::CoarseIntegrationTime as u16, 0x02A0)?;

        self.bus.write_table(&PARALLEL_MODE)?;
        self.set_pll(PLL_74_25_MHZ)?;

        let reset = self.bus.read_u16(Register::ResetRegister as u16)?;
        debug!("reset register before streaming 0x{:04x}", reset);
        self.bus.write_u16(Register::ResetRegister as u16, 0x10DC)?;

        self.bus.write_table(&AUTO_EXPOSURE)?;

        #[cfg(feature = "rttdebug")]
        rprintln!("mt9m024 config done");
        Ok(())
    }

    fn load_sequencer(&mut self) -> Result<(), Error<CommE>> {
        let sequencer = self.config.sequencer;
        debug!("uploading {} sequencer words", sequencer.len());
        self.bus.write_u16(Register::SeqCtrlPort as u16, 0x8000)?;
        for word in sequencer {
            self.bus.write_u16(Register::SeqDataPort as u16, *word)?;
        }
        self.bus.write_u16(Register::SeqExecute as u16, 0x0186)
    }

    /// Program the PLL dividers; assumes software standby
    fn set_pll(&mut self, pll: PllSettings) -> Result<(), Error<CommE>> {
        self.bus.write_u16(Register::PrePllClkDiv as u16, pll.n)?;
        self.bus.write_u16(Register::VtSysClkDiv as u16, pll.p1)?;
        self.bus.write_u16(Register::VtPixClkDiv as u16, pll.p2)?;
        self.bus.write_u16(Register::PllMultiplier as u16, pll.m)?;
        self.delay.delay_ms(PLL_LOCK_MS);
        Ok(())
    }

    fn setup_auto_exposure(&mut self) -> Result<(), Error<CommE>> {
        if self.config.auto_exposure {
            info!("mt9m024 auto exposure on");
            self.bus
                .write_u16(Register::AeCtrl as u16, AE_CTRL_ENABLED)?;
            if self.config.hdr {
                info!("mt9m024 HDR mode on");
                self.bus.write_u16(
                    Register::OperationModeCtrl as u16,
                    OPERATION_MODE_HDR,
                )?;
            }
        } else {
            info!("mt9m024 auto exposure off");
            self.bus
                .write_u16(Register::AeCtrl as u16, AE_CTRL_DISABLED)?;
        }
        Ok(())
    }

    /// Set or clear the streaming bit; returns the reset register value written
    fn set_streaming(&mut self, on: bool) -> Result<u16, Error<CommE>> {
        let (clear, set) = if on {
            (0, RESET_STREAM)
        } else {
            (RESET_STREAM, 0)
        };
        self.bus
            .modify_u16(Register::ResetRegister as u16, clear, set)
    }

    /// Program the readout window for `width` x `height`, centered on the array.
    /// A request equal to the last applied one touches no registers.
    pub fn init_mode(
        &mut self,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<(), Error<CommE>> {
        if self.applied == Some((fps, width, height)) {
            return Ok(());
        }
        if width == 0
            || height == 0
            || width > MAX_FRAME_WIDTH
            || height > MAX_FRAME_HEIGHT
        {
            error!("mt9m024 cannot window {}x{}", width, height);
            return Err(Error::InvalidArgument);
        }

        // a write failing past this point leaves the window unknown
        self.applied = None;
        self.set_streaming(false)?;
        debug!("streaming off");

        let binned = self.config.binning
            && width <= BINNING_MAX_WIDTH
            && height <= BINNING_MAX_HEIGHT;
        let (region_w, region_h) = if binned {
            (width * 2, height * 2)
        } else {
            (width, height)
        };
        let x_start = (MAX_FRAME_WIDTH - region_w) / 2 + X_ADDR_START_DEFAULT;
        let y_start = (MAX_FRAME_HEIGHT - region_h) / 2 + Y_ADDR_START_DEFAULT;

        self.bus
            .write_u16(Register::XAddrStart as u16, x_start as u16)?;
        self.bus.write_u16(
            Register::XAddrEnd as u16,
            (x_start + region_w - 1) as u16,
        )?;
        self.bus
            .write_u16(Register::YAddrStart as u16, y_start as u16)?;
        self.bus.write_u16(
            Register::YAddrEnd as u16,
            (y_start + region_h - 1) as u16,
        )?;

        let field = if binned { BINNING_2X2 } else { 0 };
        self.bus.modify_u16(
            Register::DigitalBinning as u16,
            BINNING_FIELD,
            field,
        )?;
        debug!("digital binning {}", if binned { "on" } else { "off" });

        self.set_streaming(true)?;
        info!("mt9m024 mode {}x{} at {} fps", width, height, fps);

        self.applied = Some((fps, width, height));
        Ok(())
    }

    fn check_fmt(&self, fmt: PixFormat) -> Result<PixFormat, Error<CommE>> {
        if fmt.pixel_format != self.session.pix.pixel_format
            || fmt.width == 0
            || fmt.height == 0
            || fmt.width > self.config.sensor_width
            || fmt.height > self.config.sensor_height
        {
            return Err(Error::InvalidArgument);
        }
        Ok(fmt)
    }
}

impl<I2C, CommE, D, P> SensorOps for Mt9m024<I2C, D, P>
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

    fn dev_init(&mut self) -> Result<(), Error<CommE>> {
        self.applied = None;
        let fps = self.session.time_per_frame.fps();
        let pix = self.session.pix;
        self.init_mode(fps, pix.width, pix.height)?;
        self.session.on = true;
        Ok(())
    }

    // The power-down line is left alone; streaming is controlled by the mode
    fn set_power(&mut self, on: bool) -> Result<(), Error<CommE>> {
        self.session.on = on;
        Ok(())
    }

    fn if_parm(&self) -> IfParm {
        let mode = match self.config.data_width {
            DataWidth::Bits12 => Bt656Mode::NoBt12Bit,
            DataWidth::Bits8 => Bt656Mode::NoBt8Bit,
        };
        IfParm::bt656(mode, PIXEL_CLOCK_HZ, PIXCLK_MIN_HZ, PIXCLK_MAX_HZ)
    }

    fn try_fmt(&self, fmt: PixFormat) -> Result<PixFormat, Error<CommE>> {
        self.check_fmt(fmt)
    }

    /// Change the output window, keeping the current frame rate
    fn set_fmt(&mut self, fmt: PixFormat) -> Result<PixFormat, Error<CommE>> {
        let fmt = self.check_fmt(fmt)?;
        let fps = self.session.time_per_frame.fps();
        self.init_mode(fps, fmt.width, fmt.height)?;
        self.session.pix = fmt;
        Ok(fmt)
    }

    fn set_parm(&mut self, parm: StreamParm) -> Result<StreamParm, Error<CommE>> {
        self.platform.power_down(false);

        if parm.buf_type != BufType::VideoCapture {
            debug!("unsupported buffer type {:?}", parm.buf_type);
            return Err(Error::InvalidArgument);
        }

        let time_per_frame = negotiate_frame_rate(
            parm.time_per_frame,
            DEFAULT_FPS,
            MIN_FPS,
            MAX_FPS,
        );
        let pix = self.session.pix;
        self.init_mode(time_per_frame.fps(), pix.width, pix.height)?;

        self.session.time_per_frame = time_per_frame;
        self.session.capture_mode = parm.capture_mode;
        Ok(self.session.stream_parm())
    }

    fn ctrl(&self, id: u32) -> Result<i32, Error<CommE>> {
        Control::from_id(id)
            .and_then(|control| self.session.controls.get(control))
            .ok_or(Error::InvalidArgument)
    }

    fn set_ctrl(&mut self, id: u32, value: i32) -> Result<(), Error<CommE>> {
        match Control::from_id(id) {
            Some(control) => {
                self.session.controls.set(control, value);
                Ok(())
            }
            None => Err(Error::NotPermitted),
        }
    }

    fn enum_frame_sizes(&self, index: u32) -> Result<FrameSize, Error<CommE>> {
        if index > 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(FrameSize {
            pixel_format: self.session.pix.pixel_format,
            width: self.config.sensor_width,
            height: self.config.sensor_height,
        })
    }

    fn chip_ident(&self) -> ChipIdent {
        ChipIdent {
            name: "ism-mt9m024_camera",
            revision: 0,
        }
    }
}
