/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

mod common;

use aptina_sensor_i2c::mt9m024::{
    Mt9m024Config, TestPattern, CHIP_ID, DEFAULT_I2C_ADDRESS,
};
use aptina_sensor_i2c::subdev::{
    BufType, Control, Fract, PixFormat, StreamParm, CAP_TIMEPERFRAME,
    PIX_FMT_GENERIC_16,
};
use aptina_sensor_i2c::{
    dispatch, Error, Mt9m024, Request, Response, SensorOps,
};
use common::{
    FakeError, FakeSensor, PlatformEvent, RecordingDelay, RecordingPlatform,
};

const SEQUENCER: [u16; 4] = [0x3227, 0x0101, 0x0F25, 0x0808];

fn fake() -> FakeSensor {
    common::init_logging();
    let fake = FakeSensor::new(DEFAULT_I2C_ADDRESS);
    fake.set_u16(0x3000, CHIP_ID);
    fake
}

type Driver = Mt9m024<FakeSensor, RecordingDelay, RecordingPlatform>;

fn probe(
    fake: &FakeSensor,
    config: Mt9m024Config,
) -> Result<Driver, Error<FakeError>> {
    Mt9m024::probe(
        fake.clone(),
        DEFAULT_I2C_ADDRESS,
        RecordingDelay::default(),
        RecordingPlatform::default(),
        config,
    )
}

fn window(fake: &FakeSensor) -> (u16, u16, u16, u16) {
    (
        fake.get_u16(0x3004),
        fake.get_u16(0x3008),
        fake.get_u16(0x3002),
        fake.get_u16(0x3006),
    )
}

#[test]
fn probe_runs_full_bring_up() {
    let fake = fake();
    let config = Mt9m024Config {
        sequencer: &SEQUENCER,
        ..Mt9m024Config::default()
    };
    let sensor = probe(&fake, config).unwrap();

    assert_eq!(fake.writes_to(0x3086), SEQUENCER.to_vec());
    assert_eq!(fake.writes_to(0x3088), vec![0x8000]);
    assert_eq!(fake.get_u16(0x302E), 2);
    assert_eq!(fake.get_u16(0x3030), 0x2C);
    // serializer disabled, parallel port on
    assert_eq!(fake.get_u16(0x301A) & 0x10C0, 0x10C0);
    assert_eq!(fake.get_u16(0x3100), 0x1B);
    assert_eq!(fake.get_u16(0x3070), 0);

    let (_, delay, platform) = sensor.release();
    assert_eq!(platform.events, vec![PlatformEvent::IoInit]);
    assert!(delay.calls.contains(&100));
    assert!(delay.total_ms() >= 5 * 200);
}

#[test]
fn probe_applies_options() {
    let fake = fake();
    let config = Mt9m024Config {
        test_pattern: TestPattern::from_selector(4),
        auto_exposure: true,
        hdr: true,
        rotate: true,
        ..Mt9m024Config::default()
    };
    probe(&fake, config).unwrap();

    assert_eq!(fake.get_u16(0x3070), 256);
    assert_eq!(fake.get_u16(0x3082), 0x28);
    assert_eq!(fake.get_u16(0x3040) & 0xC000, 0xC000);
}

#[test]
fn wrong_model_is_rejected_without_writes() {
    let fake = fake();
    fake.set_u16(0x3000, 0x2604);
    let res = probe(&fake, Mt9m024Config::default());
    assert!(matches!(res, Err(Error::NotFound(0x2604))));
    assert_eq!(fake.write_count(), 0);
}

#[test]
fn bring_up_stops_at_first_failed_write() {
    let fake = fake();
    fake.fail_write_at(3);
    let res = probe(&fake, Mt9m024Config::default());
    assert!(matches!(res, Err(Error::Comm(FakeError::WriteFailed))));
    assert_eq!(fake.write_count(), 3);
}

#[test]
fn dev_init_programs_full_array() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();
    sensor.dev_init().unwrap();

    assert_eq!(window(&fake), (0, 1279, 2, 961));
    assert_eq!(fake.get_u16(0x3032) & 0b11, 0);
    assert_eq!(fake.get_u16(0x301A) & (1 << 2), 1 << 2);
    assert_eq!(sensor.applied_mode(), Some((45, 1280, 960)));
}

#[test]
fn vga_is_binned_from_the_full_array() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();
    let vga = PixFormat {
        width: 640,
        height: 480,
        pixel_format: PIX_FMT_GENERIC_16,
    };
    sensor.set_fmt(vga).unwrap();

    assert_eq!(window(&fake), (0, 1279, 2, 961));
    assert_eq!(fake.get_u16(0x3032) & 0b11, 0b10);
    assert_eq!(sensor.fmt(), vga);

    // a larger window clears binning again
    sensor
        .set_fmt(PixFormat {
            width: 800,
            height: 600,
            ..vga
        })
        .unwrap();
    assert_eq!(window(&fake), (240, 1039, 182, 781));
    assert_eq!(fake.get_u16(0x3032) & 0b11, 0);
}

#[test]
fn repeated_mode_is_not_rewritten() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();
    sensor.init_mode(30, 800, 600).unwrap();

    fake.clear_writes();
    sensor.init_mode(30, 800, 600).unwrap();
    assert_eq!(fake.write_count(), 0);

    sensor.init_mode(30, 640, 480).unwrap();
    assert!(fake.write_count() > 0);
}

#[test]
fn interrupted_mode_change_is_rewritten_on_retry() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();
    sensor.init_mode(30, 640, 480).unwrap();

    // streaming goes off and x_start lands before the write that fails
    fake.clear_writes();
    fake.fail_write_at(2);
    assert!(sensor.init_mode(30, 800, 600).is_err());
    assert_eq!(sensor.applied_mode(), None);
    assert_eq!(fake.get_u16(0x3004), 240);
    assert_eq!(fake.get_u16(0x301A) & (1 << 2), 0);

    fake.clear_write_failure();
    sensor.init_mode(30, 640, 480).unwrap();
    assert!(fake.write_count() > 2);
    assert_eq!(window(&fake), (0, 1279, 2, 961));
    assert_eq!(fake.get_u16(0x301A) & (1 << 2), 1 << 2);
    assert_eq!(sensor.applied_mode(), Some((30, 640, 480)));
}

#[test]
fn failed_dev_init_leaves_device_off() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();
    fake.clear_writes();
    fake.fail_write_at(0);

    let res = sensor.dev_init();
    assert!(matches!(res, Err(Error::Comm(FakeError::WriteFailed))));
    assert!(!sensor.session().on);

    fake.clear_write_failure();
    sensor.dev_init().unwrap();
    assert!(sensor.session().on);
}

#[test]
fn oversized_window_touches_nothing() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();
    fake.clear_writes();

    let res = sensor.init_mode(30, 1920, 1080);
    assert!(matches!(res, Err(Error::InvalidArgument)));
    assert_eq!(fake.write_count(), 0);
    assert_eq!(sensor.applied_mode(), None);
}

#[test]
fn pipeline_requests() {
    let fake = fake();
    let mut sensor = probe(&fake, Mt9m024Config::default()).unwrap();

    let parm = StreamParm {
        buf_type: BufType::VideoCapture,
        capability: CAP_TIMEPERFRAME,
        capture_mode: 0,
        time_per_frame: Fract::per_second(200),
    };
    match dispatch(&mut sensor, Request::SetParm(parm)).unwrap() {
        Response::Parm(applied) => {
            assert_eq!(applied.time_per_frame, Fract::per_second(45))
        }
        other => panic!("unexpected response {:?}", other),
    }

    let brightness = Control::Brightness as u32;
    dispatch(&mut sensor, Request::SetCtrl(brightness, 12)).unwrap();
    assert_eq!(
        dispatch(&mut sensor, Request::GetCtrl(brightness)).unwrap(),
        Response::Control(12)
    );

    let res = dispatch(&mut sensor, Request::SetCtrl(0x0098_0a00, 1));
    assert!(matches!(res, Err(Error::NotPermitted)));
    assert_eq!(res.unwrap_err().errno(), -1);

    match dispatch(&mut sensor, Request::GetChipIdent).unwrap() {
        Response::ChipIdent(ident) => assert_eq!(ident.name, "ism-mt9m024_camera"),
        other => panic!("unexpected response {:?}", other),
    }
}
