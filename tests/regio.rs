/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

mod common;

use aptina_sensor_i2c::regio::{RegWrite, RegisterBus};
use aptina_sensor_i2c::Error;
use common::{FakeError, FakeSensor};

const ADDR: u8 = 0x10;

fn bus() -> (FakeSensor, RegisterBus<FakeSensor>) {
    common::init_logging();
    let fake = FakeSensor::new(ADDR);
    let bus = RegisterBus::new(fake.clone(), ADDR);
    (fake, bus)
}

#[test]
fn values_read_back_as_written() {
    let (fake, mut bus) = bus();

    bus.write_u16(0x301A, 0x10D8).unwrap();
    assert_eq!(bus.read_u16(0x301A).unwrap(), 0x10D8);
    // most significant byte at the lower address
    assert_eq!(fake.get_u8(0x301A), 0x10);
    assert_eq!(fake.get_u8(0x301B), 0xD8);

    bus.write_u8(0x9426, 0x23).unwrap();
    assert_eq!(bus.read_u8(0x9426).unwrap(), 0x23);
    assert_eq!(fake.get_u8(0x9427), 0x00);

    bus.write_u32(0xA83C, 0x1234_5678).unwrap();
    assert_eq!(bus.read_u32(0xA83C).unwrap(), 0x1234_5678);
    assert_eq!(bus.read_u16(0xA83C).unwrap(), 0x1234);
    assert_eq!(bus.read_u16(0xA83E).unwrap(), 0x5678);
}

#[test]
fn table_and_modify_land_in_register_memory() {
    let (fake, mut bus) = bus();
    let table = [
        RegWrite::u16(0x3002, 0x0002),
        RegWrite::u8(0xA406, 0x06),
        RegWrite::u32(0xA83C, 0x0000_0234),
    ];
    bus.write_table(&table).unwrap();
    assert_eq!(bus.read_u16(0x3002).unwrap(), 0x0002);
    assert_eq!(bus.read_u8(0xA406).unwrap(), 0x06);
    assert_eq!(bus.read_u32(0xA83C).unwrap(), 0x0000_0234);

    let written = bus.modify_u16(0x3002, 0x0002, 0x0100).unwrap();
    assert_eq!(written, 0x0100);
    assert_eq!(fake.get_u16(0x3002), 0x0100);
}

#[test]
fn wrong_address_surfaces_the_bus_error() {
    common::init_logging();
    let mut bus = RegisterBus::new(FakeSensor::new(ADDR), ADDR + 1);
    assert!(matches!(
        bus.read_u16(0x3000),
        Err(Error::Comm(FakeError::Nack))
    ));
    assert!(matches!(
        bus.write_u16(0x3000, 1),
        Err(Error::Comm(FakeError::Nack))
    ));
}
