/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Capture pipeline "slave subdevice" surface.
//!
//! The pipeline drives a sensor through a fixed set of operations (power,
//! format, stream parameters, controls, enumeration, identification).
//! Sensors implement [`SensorOps`]; most operations have a default that
//! answers from the cached [`SensorSession`]. A pipeline that prefers
//! message-style dispatch builds a [`Request`] and calls [`dispatch`].

use crate::Error;

/// Build a little-endian four-character pixel format code
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const PIX_FMT_YUYV: u32 = fourcc(b'Y', b'U', b'Y', b'V');
pub const PIX_FMT_UYVY: u32 = fourcc(b'U', b'Y', b'V', b'Y');
/// Raw data passed through the IPU untouched, 8 bits per sample
pub const PIX_FMT_GENERIC: u32 = fourcc(b'I', b'P', b'U', b'0');
/// Raw data passed through the IPU, samples extended to 16 bits
pub const PIX_FMT_GENERIC_16: u32 = fourcc(b'I', b'P', b'U', b'1');

/// Stream capability: high quality imaging mode
pub const MODE_HIGHQUALITY: u32 = 0x0001;
/// Stream capability: frame interval is settable
pub const CAP_TIMEPERFRAME: u32 = 0x1000;

/// A frame interval, in seconds
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fract {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fract {
    pub const fn per_second(fps: u32) -> Self {
        Self {
            numerator: 1,
            denominator: fps,
        }
    }

    /// Whole frames per second, or zero for a degenerate interval
    pub fn fps(&self) -> u32 {
        if self.numerator == 0 {
            0
        } else {
            self.denominator / self.numerator
        }
    }
}

/// Frame geometry and pixel encoding
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BufType {
    VideoCapture,
    VideoOutput,
    VideoOverlay,
    VbiCapture,
    VbiOutput,
    SlicedVbiCapture,
    SlicedVbiOutput,
}

/// Streaming parameters for a capture stream
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StreamParm {
    pub buf_type: BufType,
    pub capability: u32,
    pub capture_mode: u32,
    pub time_per_frame: Fract,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IfType {
    Bt656,
}

/// Sample framing on the parallel bus
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Bt656Mode {
    /// Separate sync signals, 8-bit samples
    NoBt8Bit,
    /// Separate sync signals, 12-bit samples
    NoBt12Bit,
}

/// Physical interface parameters the receiver needs to latch sensor data
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IfParm {
    pub if_type: IfType,
    pub mode: Bt656Mode,
    /// Pixel clock in Hz; zero when the sensor provides its own
    pub clock_curr: u32,
    pub clock_min: u32,
    pub clock_max: u32,
    pub latch_clk_inv: bool,
    pub nobt_vs_inv: bool,
    pub nobt_hs_inv: bool,
    /// External vsync in use
    pub bt_sync_correct: bool,
}

impl IfParm {
    pub const fn bt656(mode: Bt656Mode, clock_curr: u32, clock_min: u32, clock_max: u32) -> Self {
        Self {
            if_type: IfType::Bt656,
            mode,
            clock_curr,
            clock_min,
            clock_max,
            latch_clk_inv: false,
            nobt_vs_inv: false,
            nobt_hs_inv: false,
            bt_sync_correct: false,
        }
    }
}

const CID_BASE: u32 = 0x0098_0900;

/// Standard picture controls
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Control {
    Brightness = CID_BASE,
    Contrast = CID_BASE + 1,
    Saturation = CID_BASE + 2,
    Hue = CID_BASE + 3,
    AutoWhiteBalance = CID_BASE + 12,
    DoWhiteBalance = CID_BASE + 13,
    RedBalance = CID_BASE + 14,
    BlueBalance = CID_BASE + 15,
    Gamma = CID_BASE + 16,
    Exposure = CID_BASE + 17,
    AutoGain = CID_BASE + 18,
    Gain = CID_BASE + 19,
    HFlip = CID_BASE + 20,
    VFlip = CID_BASE + 21,
}

impl Control {
    pub fn from_id(id: u32) -> Option<Self> {
        use Control::*;
        const ALL: [Control; 14] = [
            Brightness,
            Contrast,
            Saturation,
            Hue,
            AutoWhiteBalance,
            DoWhiteBalance,
            RedBalance,
            BlueBalance,
            Gamma,
            Exposure,
            AutoGain,
            Gain,
            HFlip,
            VFlip,
        ];
        ALL.iter().copied().find(|c| *c as u32 == id)
    }
}

/// Range description returned by a control query
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControlInfo {
    pub id: u32,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
}

/// Cached picture control values
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ControlValues {
    pub brightness: i32,
    pub hue: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub red: i32,
    pub blue: i32,
    pub ae_mode: i32,
}

impl ControlValues {
    pub fn get(&self, control: Control) -> Option<i32> {
        match control {
            Control::Brightness => Some(self.brightness),
            Control::Hue => Some(self.hue),
            Control::Contrast => Some(self.contrast),
            Control::Saturation => Some(self.saturation),
            Control::RedBalance => Some(self.red),
            Control::BlueBalance => Some(self.blue),
            Control::Exposure => Some(self.ae_mode),
            _ => None,
        }
    }

    /// Store a value; returns false for controls without a cached slot
    pub fn set(&mut self, control: Control, value: i32) -> bool {
        let slot = match control {
            Control::Brightness => &mut self.brightness,
            Control::Hue => &mut self.hue,
            Control::Contrast => &mut self.contrast,
            Control::Saturation => &mut self.saturation,
            Control::RedBalance => &mut self.red,
            Control::BlueBalance => &mut self.blue,
            Control::Exposure => &mut self.ae_mode,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// One discrete frame size
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameSize {
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
}

/// Frame interval enumeration request for one size and format
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameIntervalQuery {
    pub index: u32,
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChipIdent {
    pub name: &'static str,
    pub revision: u32,
}

/// Everything the pipeline can ask about a sensor without touching it
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorSession {
    pub on: bool,
    pub pix: PixFormat,
    pub capability: u32,
    pub capture_mode: u32,
    pub time_per_frame: Fract,
    pub controls: ControlValues,
}

impl SensorSession {
    pub fn new(pix: PixFormat, capability: u32, default_fps: u32) -> Self {
        Self {
            on: false,
            pix,
            capability,
            capture_mode: 0,
            time_per_frame: Fract::per_second(default_fps),
            controls: ControlValues::default(),
        }
    }

    pub fn stream_parm(&self) -> StreamParm {
        StreamParm {
            buf_type: BufType::VideoCapture,
            capability: self.capability,
            capture_mode: self.capture_mode,
            time_per_frame: self.time_per_frame,
        }
    }
}

/// Settle a requested frame interval onto what the sensor supports:
/// a degenerate interval selects `default_fps`, and the rate is clamped
/// to `min_fps..=max_fps`.
pub fn negotiate_frame_rate(
    requested: Fract,
    default_fps: u32,
    min_fps: u32,
    max_fps: u32,
) -> Fract {
    let requested = if requested.numerator == 0 || requested.denominator == 0 {
        Fract::per_second(default_fps)
    } else {
        requested
    };

    let fps = requested.fps();
    if fps > max_fps {
        Fract::per_second(max_fps)
    } else if fps < min_fps {
        Fract::per_second(min_fps)
    } else {
        requested
    }
}

/// One method per pipeline operation. The defaults match what the capture
/// framework does for a sensor that leaves an operation unimplemented.
pub trait SensorOps {
    type CommE;

    fn session(&self) -> &SensorSession;

    /// Called when the sensor is attached to the capture pipeline
    fn dev_init(&mut self) -> Result<(), Error<Self::CommE>> {
        Ok(())
    }

    /// Called when the sensor is detached from the capture pipeline
    fn dev_exit(&mut self) -> Result<(), Error<Self::CommE>> {
        Ok(())
    }

    fn init(&mut self) -> Result<(), Error<Self::CommE>> {
        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), Error<Self::CommE>>;

    fn if_parm(&self) -> IfParm;

    fn enum_fmt(&self, index: u32) -> Result<u32, Error<Self::CommE>> {
        if index > 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(self.session().pix.pixel_format)
    }

    /// Negotiate a format without applying it
    fn try_fmt(&self, _fmt: PixFormat) -> Result<PixFormat, Error<Self::CommE>> {
        Ok(self.session().pix)
    }

    fn fmt(&self) -> PixFormat {
        self.session().pix
    }

    fn set_fmt(&mut self, _fmt: PixFormat) -> Result<PixFormat, Error<Self::CommE>> {
        Ok(self.session().pix)
    }

    fn parm(&self, buf_type: BufType) -> Result<StreamParm, Error<Self::CommE>> {
        match buf_type {
            BufType::VideoCapture => Ok(self.session().stream_parm()),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Apply streaming parameters; returns the parameters in effect
    fn set_parm(&mut self, parm: StreamParm) -> Result<StreamParm, Error<Self::CommE>>;

    fn query_ctrl(&self, _id: u32) -> Result<ControlInfo, Error<Self::CommE>> {
        Err(Error::InvalidArgument)
    }

    fn ctrl(&self, _id: u32) -> Result<i32, Error<Self::CommE>> {
        Err(Error::InvalidArgument)
    }

    fn set_ctrl(&mut self, _id: u32, _value: i32) -> Result<(), Error<Self::CommE>> {
        Err(Error::InvalidArgument)
    }

    fn enum_frame_sizes(&self, index: u32) -> Result<FrameSize, Error<Self::CommE>> {
        if index > 0 {
            return Err(Error::InvalidArgument);
        }
        let pix = self.session().pix;
        Ok(FrameSize {
            pixel_format: pix.pixel_format,
            width: pix.width,
            height: pix.height,
        })
    }

    fn enum_frame_intervals(
        &self,
        _query: FrameIntervalQuery,
    ) -> Result<Fract, Error<Self::CommE>> {
        Err(Error::InvalidArgument)
    }

    fn chip_ident(&self) -> ChipIdent;
}

/// A pipeline operation and its payload
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Request {
    DevInit,
    DevExit,
    Init,
    SetPower(bool),
    GetIfParm,
    EnumFmt(u32),
    TryFmt(PixFormat),
    GetFmt,
    SetFmt(PixFormat),
    GetParm(BufType),
    SetParm(StreamParm),
    QueryCtrl(u32),
    GetCtrl(u32),
    SetCtrl(u32, i32),
    EnumFrameSizes(u32),
    EnumFrameIntervals(FrameIntervalQuery),
    GetChipIdent,
}

/// Result payload for a [`Request`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Response {
    Done,
    IfParm(IfParm),
    PixelFormat(u32),
    Format(PixFormat),
    Parm(StreamParm),
    ControlInfo(ControlInfo),
    Control(i32),
    FrameSize(FrameSize),
    FrameInterval(Fract),
    ChipIdent(ChipIdent),
}

/// Route a request to the matching [`SensorOps`] method
pub fn dispatch<S: SensorOps>(
    sensor: &mut S,
    request: Request,
) -> Result<Response, Error<S::CommE>> {
    let response = match request {
        Request::DevInit => sensor.dev_init().map(|_| Response::Done)?,
        Request::DevExit => sensor.dev_exit().map(|_| Response::Done)?,
        Request::Init => sensor.init().map(|_| Response::Done)?,
        Request::SetPower(on) => sensor.set_power(on).map(|_| Response::Done)?,
        Request::GetIfParm => Response::IfParm(sensor.if_parm()),
        Request::EnumFmt(index) => Response::PixelFormat(sensor.enum_fmt(index)?),
        Request::TryFmt(fmt) => Response::Format(sensor.try_fmt(fmt)?),
        Request::GetFmt => Response::Format(sensor.fmt()),
        Request::SetFmt(fmt) => Response::Format(sensor.set_fmt(fmt)?),
        Request::GetParm(buf_type) => Response::Parm(sensor.parm(buf_type)?),
        Request::SetParm(parm) => Response::Parm(sensor.set_parm(parm)?),
        Request::QueryCtrl(id) => Response::ControlInfo(sensor.query_ctrl(id)?),
        Request::GetCtrl(id) => Response::Control(sensor.ctrl(id)?),
        Request::SetCtrl(id, value) => {
            sensor.set_ctrl(id, value).map(|_| Response::Done)?
        }
        Request::EnumFrameSizes(index) => {
            Response::FrameSize(sensor.enum_frame_sizes(index)?)
        }
        Request::EnumFrameIntervals(query) => {
            Response::FrameInterval(sensor.enum_frame_intervals(query)?)
        }
        Request::GetChipIdent => Response::ChipIdent(sensor.chip_ident()),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_negotiation() {
        let zero = Fract {
            numerator: 0,
            denominator: 30,
        };
        assert_eq!(negotiate_frame_rate(zero, 45, 3, 45), Fract::per_second(45));
        assert_eq!(
            negotiate_frame_rate(Fract::per_second(120), 30, 15, 30),
            Fract::per_second(30)
        );
        assert_eq!(
            negotiate_frame_rate(Fract::per_second(5), 30, 15, 30),
            Fract::per_second(15)
        );
        let within = Fract {
            numerator: 2,
            denominator: 50,
        };
        assert_eq!(negotiate_frame_rate(within, 30, 15, 30), within);
    }

    #[test]
    fn control_ids_round_trip_through_table() {
        assert_eq!(Control::from_id(0x0098_0900), Some(Control::Brightness));
        assert_eq!(Control::from_id(0x0098_0911), Some(Control::Exposure));
        assert_eq!(Control::from_id(0x0098_0915), Some(Control::VFlip));
        assert_eq!(Control::from_id(0x0098_0904), None);
    }

    #[test]
    fn fourcc_is_little_endian() {
        assert_eq!(PIX_FMT_YUYV, 0x5659_5559);
    }

    #[test]
    fn cached_controls() {
        let mut values = ControlValues::default();
        assert!(values.set(Control::Hue, 7));
        assert!(!values.set(Control::Gamma, 1));
        assert_eq!(values.get(Control::Hue), Some(7));
        assert_eq!(values.get(Control::Gamma), None);
    }
}
