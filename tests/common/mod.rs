#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ab8500_charger::config::{BatteryProfile, ChargerConfig, IrqMap, SiliconRevision};
use ab8500_charger::data_types::Source;
use ab8500_charger::irq::Irq;
use ab8500_charger::platform::{AdcChannel, AdcError, Clock, Gpadc, Notifier, SupplyRail};
use ab8500_charger::registers::{DEFAULT_I2C_ADDRESS, addr, bank};
use ab8500_charger::{Ab8500, Charger, ChargerShared};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use embedded_hal_mock::eh1::delay::NoopDelay;

#[derive(Default)]
struct Registers {
    values: HashMap<(u8, u8), u8>,
    scripted_reads: HashMap<(u8, u8), VecDeque<u8>>,
    writes: Vec<(u8, u8, u8)>,
    reads: Vec<(u8, u8)>,
    failing: Option<(u8, u8)>,
}

/// Register-file AB8500: reads return the last value written or preset.
#[derive(Clone, Default)]
pub struct FakeBus {
    inner: Rc<RefCell<Registers>>,
}

impl FakeBus {
    pub fn new() -> Self {
        let bus = Self::default();
        // No hardware input current limiting in effect.
        bus.set(bank::CHARGER, addr::USBCH_STAT2, 0xF0);
        bus
    }

    pub fn set(&self, bank: u8, reg: u8, value: u8) {
        self.inner.borrow_mut().values.insert((bank, reg), value);
    }

    pub fn get(&self, bank: u8, reg: u8) -> u8 {
        self.inner.borrow().values.get(&(bank, reg)).copied().unwrap_or(0)
    }

    /// Values returned by the next reads of a register, before falling back to the
    /// register file.
    pub fn script_reads(&self, bank: u8, reg: u8, values: &[u8]) {
        self.inner
            .borrow_mut()
            .scripted_reads
            .entry((bank, reg))
            .or_default()
            .extend(values.iter().copied());
    }

    pub fn fail_on(&self, bank: u8, reg: u8) {
        self.inner.borrow_mut().failing = Some((bank, reg));
    }

    pub fn clear_failure(&self) {
        self.inner.borrow_mut().failing = None;
    }

    pub fn writes(&self) -> Vec<(u8, u8, u8)> {
        self.inner.borrow().writes.clone()
    }

    /// Values written to one register, in order.
    pub fn writes_to(&self, bank: u8, reg: u8) -> Vec<u8> {
        self.inner
            .borrow()
            .writes
            .iter()
            .filter(|&&(b, r, _)| b == bank && r == reg)
            .map(|&(_, _, v)| v)
            .collect()
    }

    pub fn read_count(&self, bank: u8, reg: u8) -> usize {
        self.inner
            .borrow()
            .reads
            .iter()
            .filter(|&&(b, r)| b == bank && r == reg)
            .count()
    }

    pub fn clear_log(&self) {
        let mut regs = self.inner.borrow_mut();
        regs.writes.clear();
        regs.reads.clear();
    }
}

impl ErrorType for FakeBus {
    type Error = ErrorKind;
}

impl I2c for FakeBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        assert_eq!(address, DEFAULT_I2C_ADDRESS);
        let mut regs = self.inner.borrow_mut();
        let mut target = None;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    let key = (bytes[0], bytes[1]);
                    if regs.failing == Some(key) {
                        return Err(ErrorKind::Other);
                    }
                    for &value in &bytes[2..] {
                        regs.values.insert(key, value);
                        regs.writes.push((key.0, key.1, value));
                    }
                    target = Some(key);
                }
                Operation::Read(buf) => {
                    let key = target.expect("read without register address");
                    regs.reads.push(key);
                    let scripted = regs.scripted_reads.get_mut(&key).and_then(VecDeque::pop_front);
                    let value = scripted.unwrap_or_else(|| regs.values.get(&key).copied().unwrap_or(0));
                    buf.fill(value);
                }
            }
        }
        Ok(())
    }
}

/// Platform collaborators with observable side effects.
pub struct FakePlatform {
    pub now_ms: u64,
    pub boottime_ms: u64,
    pub vbus_mv: i32,
    pub main_mv: i32,
    pub vbat_mv: i32,
    pub adc_fails: bool,
    pub rail_on: bool,
    pub rail_enables: usize,
    pub notified: Vec<Source>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            now_ms: 0,
            boottime_ms: 0,
            vbus_mv: 5000,
            main_mv: 5200,
            vbat_mv: 3900,
            adc_fails: false,
            rail_on: false,
            rail_enables: 0,
            notified: Vec::new(),
        }
    }
}

impl FakePlatform {
    pub fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
        self.boottime_ms += ms;
    }

    pub fn take_notified(&mut self) -> Vec<Source> {
        std::mem::take(&mut self.notified)
    }
}

impl Gpadc for FakePlatform {
    fn convert(&mut self, channel: AdcChannel) -> Result<i32, AdcError> {
        if self.adc_fails {
            return Err(AdcError);
        }
        Ok(match channel {
            AdcChannel::VbusVoltage => self.vbus_mv,
            AdcChannel::MainChargerVoltage => self.main_mv,
            AdcChannel::BatteryVoltage => self.vbat_mv,
        })
    }
}

impl SupplyRail for FakePlatform {
    fn enable(&mut self) {
        self.rail_on = true;
        self.rail_enables += 1;
    }

    fn disable(&mut self) {
        self.rail_on = false;
    }
}

impl Notifier for FakePlatform {
    fn power_supply_changed(&mut self, source: Source) {
        self.notified.push(source);
    }
}

impl Clock for FakePlatform {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn boottime_ms(&self) -> u64 {
        self.boottime_ms
    }
}

pub type TestCharger<'a> = Charger<'a, FakeBus, NoopDelay, FakePlatform>;

pub fn full_irq_map() -> IrqMap {
    Irq::ALL
        .into_iter()
        .enumerate()
        .fold(IrqMap::new(), |map, (i, irq)| map.with_line(irq, 100 + i as u32))
}

pub fn config(silicon: SiliconRevision) -> ChargerConfig {
    ChargerConfig {
        silicon,
        charging_led: false,
        irqs: full_irq_map(),
        battery: Some(BatteryProfile::default()),
    }
}

pub fn charger_with<'a>(shared: &'a ChargerShared, bus: &FakeBus, config: ChargerConfig) -> TestCharger<'a> {
    Charger::new(
        Ab8500::new(bus.clone()),
        NoopDelay::new(),
        FakePlatform::default(),
        shared,
        config,
    )
    .unwrap()
}

pub fn charger<'a>(shared: &'a ChargerShared, bus: &FakeBus) -> TestCharger<'a> {
    charger_with(shared, bus, config(SiliconRevision::Cut2p0OrLater))
}

/// Line status value reporting `code` as the link type.
pub fn line_stat(code: u8) -> u8 {
    code << 3
}

/// VBUS present after both debounces.
pub const VBUS_PRESENT: u8 = 0x03;

/// Attach with VBUS present and a link type already reported, then classify.
pub fn attach_usb(charger: &mut TestCharger<'_>, bus: &FakeBus, link_code: u8) {
    bus.set(bank::CHARGER, addr::USBCH_STAT1, VBUS_PRESENT);
    bus.set(bank::USB, addr::USB_LINE_STAT, line_stat(link_code));
    charger.attach().unwrap();
    charger.run_pending();
}
