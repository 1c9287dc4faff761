use ab8500_charger::driver::Ab8500;
use ab8500_charger::irq::Irq;
use ab8500_charger::registers::{addr, bank};
use ab8500_charger::state::ChargerShared;
use ab8500_charger::stepping::{self, CurrentReg};
use ab8500_charger::{EventFlags, Error};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::ErrorKind;
use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};

const ADDR: u8 = 0x4B;

fn read(bank: u8, reg: u8, value: u8) -> I2cTrans {
    I2cTrans::write_read(ADDR, vec![bank, reg], vec![value])
}

fn write(bank: u8, reg: u8, value: u8) -> I2cTrans {
    I2cTrans::write(ADDR, vec![bank, reg, value])
}

#[derive(Default)]
struct CountingDelay {
    calls: usize,
    total_ns: u64,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.calls += 1;
        self.total_ns += u64::from(ns);
    }
}

/// Raises the drop-end interrupt on the first settle delay of a ramp.
struct DropDuringRamp<'a> {
    shared: &'a ChargerShared,
}

impl DelayNs for DropDuringRamp<'_> {
    fn delay_ns(&mut self, _ns: u32) {
        self.shared.handle_irq(Irq::VbusChDropEnd);
    }
}

fn usb_connected() -> ChargerShared {
    let shared = ChargerShared::new();
    shared.with(|s| s.usb.connected = true);
    shared
}

#[test]
fn read_addresses_bank_then_register() {
    let expectations = [read(bank::CHARGER, addr::USBCH_STAT1, 0x03)];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    assert_eq!(pmic.read(bank::CHARGER, addr::USBCH_STAT1).unwrap(), 0x03);
    pmic.free().done();
}

#[test]
fn write_sends_bank_register_value() {
    let expectations = [write(bank::CHARGER, addr::CH_WD_TIMER, 0x30)];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    pmic.write(bank::CHARGER, addr::CH_WD_TIMER, 0x30).unwrap();
    pmic.free().done();
}

#[test]
fn mask_set_keeps_unmasked_bits() {
    let expectations = [
        read(bank::CHARGER, addr::USBCH_CTRL1, 0xF1),
        write(bank::CHARGER, addr::USBCH_CTRL1, 0xF2),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    pmic.mask_set(bank::CHARGER, addr::USBCH_CTRL1, 0x03, 0x02).unwrap();
    pmic.free().done();
}

#[test]
fn custom_address_is_used() {
    let expectations = [I2cTrans::write(0x48, vec![bank::RTC, addr::RTC_CTRL, 0x10])];
    let mut pmic = Ab8500::with_address(I2cMock::new(&expectations), 0x48);
    assert_eq!(pmic.address(), 0x48);
    pmic.write(bank::RTC, addr::RTC_CTRL, 0x10).unwrap();
    pmic.free().done();
}

#[test]
fn bus_error_is_reported() {
    let expectations = [read(bank::CHARGER, addr::CH_STATUS1, 0).with_error(ErrorKind::Other)];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    assert_eq!(
        pmic.read(bank::CHARGER, addr::CH_STATUS1),
        Err(Error::I2c(ErrorKind::Other))
    );
    pmic.free().done();
}

#[test]
fn usb_input_ramps_up_through_every_code() {
    let shared = usb_connected();
    let expectations = [
        read(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x20),
        read(bank::CHARGER, addr::USBCH_STAT2, 0xF0),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x30),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x40),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x50),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x60),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    let mut delay = CountingDelay::default();
    stepping::set_current(&mut pmic, &mut delay, &shared, CurrentReg::UsbInput, 500).unwrap();
    // 10 ms between steps, none after the last.
    assert_eq!(delay.calls, 3);
    assert_eq!(delay.total_ns, 30_000_000);
    assert!(!shared.stepping_active());
    pmic.free().done();
}

#[test]
fn usb_input_starts_from_hardware_limited_code() {
    let shared = usb_connected();
    let expectations = [
        read(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x60),
        read(bank::CHARGER, addr::USBCH_STAT2, 0x40),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x50),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x60),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    stepping::set_current(&mut pmic, &mut NoopDelay::new(), &shared, CurrentReg::UsbInput, 500).unwrap();
    pmic.free().done();
}

#[test]
fn output_ramps_down_to_floor_code() {
    let shared = ChargerShared::new();
    shared.with(|s| s.ac.connected = true);
    let expectations = [
        read(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x05),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x04),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x03),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x02),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x01),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x00),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    let mut delay = CountingDelay::default();
    // 150 mA floors to the 100 mA code.
    stepping::set_current(&mut pmic, &mut delay, &shared, CurrentReg::Output, 150).unwrap();
    assert_eq!(delay.calls, 4);
    assert_eq!(delay.total_ns, 4_000_000);
    pmic.free().done();
}

#[test]
fn output_jump_up_uses_slow_steps() {
    let shared = usb_connected();
    let expectations = [
        read(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x00),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x01),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x02),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    let mut delay = CountingDelay::default();
    stepping::set_current(&mut pmic, &mut delay, &shared, CurrentReg::Output, 300).unwrap();
    assert_eq!(delay.total_ns, 10_000_000);
    pmic.free().done();
}

#[test]
fn main_input_uses_upper_nibble() {
    let shared = ChargerShared::new();
    shared.with(|s| s.ac.connected = true);
    let expectations = [
        read(bank::CHARGER, addr::MCH_IPT_CURLVL, 0x00),
        write(bank::CHARGER, addr::MCH_IPT_CURLVL, 0x10),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    stepping::set_current(&mut pmic, &mut NoopDelay::new(), &shared, CurrentReg::MainInput, 200).unwrap();
    pmic.free().done();
}

#[test]
fn no_source_writes_target_directly() {
    let shared = ChargerShared::new();
    let expectations = [
        read(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x20),
        read(bank::CHARGER, addr::USBCH_STAT2, 0xF0),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0xF0),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    let mut delay = CountingDelay::default();
    stepping::set_current(&mut pmic, &mut delay, &shared, CurrentReg::UsbInput, 1500).unwrap();
    assert_eq!(delay.calls, 0);
    pmic.free().done();
}

#[test]
fn unchanged_code_is_not_written() {
    let shared = usb_connected();
    let expectations = [read(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x04)];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    stepping::set_current(&mut pmic, &mut NoopDelay::new(), &shared, CurrentReg::Output, 500).unwrap();
    pmic.free().done();
}

#[test]
fn out_of_range_request_touches_nothing() {
    let shared = usb_connected();
    let mut pmic = Ab8500::new(I2cMock::new(&[]));
    assert_eq!(
        stepping::set_current(&mut pmic, &mut NoopDelay::new(), &shared, CurrentReg::Output, 1600),
        Err(Error::OutOfRange)
    );
    assert!(!shared.stepping_active());
    pmic.free().done();
}

#[test]
fn drop_end_stops_upward_vbus_ramp() {
    let shared = usb_connected();
    let expectations = [
        read(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x20),
        read(bank::CHARGER, addr::USBCH_STAT2, 0xF0),
        write(bank::CHARGER, addr::USBCH_IPT_CRNTLVL, 0x30),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    let mut delay = DropDuringRamp { shared: &shared };
    stepping::set_current(&mut pmic, &mut delay, &shared, CurrentReg::UsbInput, 500).unwrap();
    assert!(shared.flags().contains(EventFlags::VBUS_DROP_END));
    pmic.free().done();
}

#[test]
fn drop_end_does_not_stop_output_ramp() {
    let shared = usb_connected();
    shared.with(|s| s.flags.insert(EventFlags::VBUS_DROP_END));
    let expectations = [
        read(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x00),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x01),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x02),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    stepping::set_current(&mut pmic, &mut NoopDelay::new(), &shared, CurrentReg::Output, 300).unwrap();
    pmic.free().done();
}

#[test]
fn failed_step_abandons_ramp_and_ends_session() {
    let shared = usb_connected();
    let expectations = [
        read(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x00),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x01),
        write(bank::CHARGER, addr::CH_OPT_CRNTLVL, 0x02).with_error(ErrorKind::Other),
    ];
    let mut pmic = Ab8500::new(I2cMock::new(&expectations));
    assert_eq!(
        stepping::set_current(&mut pmic, &mut NoopDelay::new(), &shared, CurrentReg::Output, 500),
        Err(Error::I2c(ErrorKind::Other))
    );
    assert!(!shared.stepping_active());
    pmic.free().done();
}
