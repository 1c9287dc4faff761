//! The charger worker.
//!
//! [`Charger`] owns the bus and is the single consumer of the deferred work queued by
//! interrupt handlers and the USB notifier through [`ChargerShared`]. Every charger state
//! change other than flag latching happens here, serialized by `&mut self`.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::config::{BatteryProfile, ChargerConfig};
use crate::data_types::{EventFlags, Source, UsbBusState};
use crate::driver::Ab8500;
use crate::error::Error;
use crate::platform::{AdcChannel, Platform};
use crate::property::{self, Health, Property, PropertyValue};
use crate::registers::{
    self, addr, bank, usb_in, ChStatus1Bits, ChStatus2Bits, MainChCtrl1Bits, MainWdogBits, UsbChCtrl1Bits,
    UsbChStat1Bits, UsbChStat2Bits, CHARG_WD_KICK, CH_OP_CUR_LVL_1P6, CH_VOL_LVL_4P6, DROP_COUNTER_RESET,
    LED_INDICATOR_PWM_DIS, LED_INDICATOR_PWM_DUTY_252_256, LED_INDICATOR_PWM_ENA, LED_IND_CUR_5MA, RTC_BUP_CH_ENA,
    VBAT_TRESH_IP_CUR_RED_MV, VBUS_AUTO_IN_CURR_LIM_ENA, VBUS_OVV_SELECT_6P3V, WD_TIMER,
};
use crate::state::ChargerShared;
use crate::stepping::{self, CurrentReg};
use crate::usb_type::{self, LinkPolicy, UsbLinkStatus, DENIED_INPUT_MA};
use crate::vbus_drop::DropVerdict;
use crate::work::{Work, WorkQueue};

/// Charger watchdog kick interval on cut 1.1 and earlier.
const WD_KICK_INTERVAL_MS: u64 = 60_000;
/// Time an ACA-connected device gets to finish USB enumeration.
const WAIT_ACA_RID_ENUMERATION_MS: u64 = 5_000;
/// Recheck interval for latched faults.
const RECHECK_MS: u64 = 1_000;
/// Slightly longer than the 100 ms VBUS debounce.
const DETECT_DEBOUNCE_MS: u32 = 110;
/// The line status is valid about 250 ms after VBUS rises.
const LINE_STAT_SETTLE_MS: u32 = 250;
const LINE_STAT_POLLS: usize = 10;
/// Charging resumes one second after the USB bus resumes.
const USB_RESUME_SETTLE_MS: u32 = 1_000;
/// Main watchdog enable and kick must be two 32 kHz periods apart.
const MAIN_WDOG_SYNC_US: u32 = 63;

/// Faults rechecked by the hardware-failure task until they clear.
const HW_FAILURE_FLAGS: EventFlags = EventFlags::VBUS_OVV
    .union(EventFlags::MAIN_EXT_NOT_OK)
    .union(EventFlags::MAIN_THERMAL_PROT);

/// Forced detection of chargers the hardware rejects as invalid.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InvalidCharger {
    NotForced,
    /// Detection forced; waiting for the next link status interrupt.
    Forced,
    /// Forcing done; the detection result is final until unplugged.
    Final,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AcaWait {
    None,
    /// ACA detected; enumeration still has to be waited for.
    Pending,
    Done,
}

#[derive(Clone, Copy, Debug, Default)]
struct Detected {
    ac: bool,
    usb: bool,
}

/// AB8500 charger worker.
pub struct Charger<'a, I2C, D, P> {
    pmic: Ab8500<I2C>,
    delay: D,
    platform: P,
    shared: &'a ChargerShared,
    config: ChargerConfig,
    battery: BatteryProfile,
    /// Input current the attached USB source may deliver (mA).
    max_usb_in_curr: u16,
    /// Output current last programmed (mA).
    output_ma: u16,
    /// VBUS was present at attach; no link status interrupt will follow.
    vbus_detected_start: bool,
    /// The AC charger has been used since attach.
    ac_conn: bool,
    vddadc_ac: bool,
    vddadc_usb: bool,
    vbat_mv: i32,
    old_vbat_mv: i32,
    invalid_charger: InvalidCharger,
    is_usb_host: bool,
    aca: AcaWait,
}

impl<'a, I2C, D, P> Charger<'a, I2C, D, P>
where
    I2C: I2c,
    D: DelayNs,
    P: Platform,
{
    /// Create the worker. Fails if the configuration is unusable; the hardware is not
    /// touched until [`attach`](Self::attach).
    pub fn new(
        pmic: Ab8500<I2C>,
        delay: D,
        platform: P,
        shared: &'a ChargerShared,
        config: ChargerConfig,
    ) -> Result<Self, Error<I2C::Error>> {
        let battery = config.validate()?;
        Ok(Self {
            pmic,
            delay,
            platform,
            shared,
            config,
            battery,
            max_usb_in_curr: 0,
            output_ma: 0,
            vbus_detected_start: false,
            ac_conn: false,
            vddadc_ac: false,
            vddadc_usb: false,
            vbat_mv: 0,
            old_vbat_mv: 0,
            invalid_charger: InvalidCharger::NotForced,
            is_usb_host: false,
            aca: AcaWait::None,
        })
    }

    pub fn shared(&self) -> &'a ChargerShared {
        self.shared
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Input current the attached USB source may deliver (mA).
    pub fn max_usb_in_curr(&self) -> u16 {
        self.max_usb_in_curr
    }

    /// The attached USB device is a host rather than a charger.
    pub fn is_usb_host(&self) -> bool {
        self.is_usb_host
    }

    /// Program the charger defaults and pick up chargers already plugged in.
    pub fn attach(&mut self) -> Result<(), Error<I2C::Error>> {
        self.init_hw_registers().inspect_err(|e| {
            log::error!("failed to initialize charger registers: {}", e);
        })?;

        let found = self.detect_chargers(false)?;
        if found.ac {
            log::debug!("AC charger present at attach");
            self.shared.with(|s| s.ac.connected = true);
            self.ac_conn = true;
            self.sample_main_faults()?;
            self.notify(Source::Ac);
        }
        if found.usb {
            log::debug!("VBUS present at attach");
            self.vbus_detected_start = true;
            self.shared.with(|s| s.vbus_detected = true);
            self.schedule(Work::DetectUsbType, 0);
        }
        Ok(())
    }

    /// Stop charging and release the bus.
    pub fn detach(mut self) -> I2C {
        for source in [Source::Usb, Source::Ac] {
            if let Err(e) = self.disable(source) {
                log::error!("failed to disable {:?} charging: {}", source, e);
            }
        }
        if self.battery.backup.is_some() {
            if let Err(e) = self.pmic.mask_set(bank::RTC, addr::RTC_CTRL, RTC_BUP_CH_ENA, 0) {
                log::error!("failed to disable backup battery charging: {}", e);
            }
        }
        self.shared.with(|s| s.work = WorkQueue::new());
        self.pmic.free()
    }

    /// Start charging from `source` at up to `mv` and `ma`.
    pub fn enable(&mut self, source: Source, mv: u16, ma: u16) -> Result<(), Error<I2C::Error>> {
        self.enable_source(source, mv, ma).inspect_err(|e| {
            log::error!("failed to enable {:?} charging: {}", source, e);
        })
    }

    /// Stop charging from `source` and bring its currents down to the lowest code.
    pub fn disable(&mut self, source: Source) -> Result<(), Error<I2C::Error>> {
        self.disable_source(source).inspect_err(|e| {
            log::error!("failed to disable {:?} charging: {}", source, e);
        })
    }

    pub fn kick_watchdog(&mut self) -> Result<(), Error<I2C::Error>> {
        self.pmic
            .write(bank::CHARGER, addr::CHARG_WD_CTRL, CHARG_WD_KICK)
            .inspect_err(|_| log::error!("failed to kick charger watchdog"))
    }

    /// Change the output current of the charging source.
    pub fn update_output_current(&mut self, ma: u16) -> Result<(), Error<I2C::Error>> {
        self.set_output_current(ma)
            .inspect_err(|_| log::error!("failed to set output current {} mA", ma))?;
        self.pmic.write(bank::CHARGER, addr::CHARGER_CTRL, DROP_COUNTER_RESET)
    }

    pub fn health(&self) -> Health {
        self.shared
            .with(|s| property::health(s.flags, &s.ac, &s.usb))
    }

    /// Read a property of `source`.
    pub fn property(&mut self, source: Source, prop: Property) -> Result<PropertyValue, Error<I2C::Error>> {
        let info = self.shared.info(source);
        let value = match prop {
            Property::Health => PropertyValue::Health(self.health()),
            Property::Present => PropertyValue::Bool(info.connected),
            Property::Online => PropertyValue::Bool(info.online),
            Property::VoltageNow => {
                let mv = self.charger_voltage(source)?;
                self.shared.with(|s| s.info_mut(source).voltage_mv = mv);
                PropertyValue::Int(mv)
            }
            Property::CvActive => {
                let cv = self.cv_active(source, info.online)?;
                self.shared.with(|s| s.info_mut(source).cv_active = cv);
                PropertyValue::Bool(cv)
            }
            Property::CurrentNow => PropertyValue::Int(if info.online { i32::from(self.output_ma) } else { 0 }),
            Property::VbusCollapsed => PropertyValue::Bool(self.shared.flags().contains(EventFlags::VBUS_COLLAPSE)),
        };
        Ok(value)
    }

    /// Run every due task. Returns the scheduling-clock deadline of the next pending
    /// task, if any.
    pub fn run_pending(&mut self) -> Option<u64> {
        loop {
            self.deliver_notifications();
            let now = self.platform.now_ms();
            let due = self.shared.with(|s| {
                s.work.arm(now);
                s.work.take_due(now)
            });
            match due {
                Some(work) => self.run_logged(work),
                None => return self.shared.with(|s| s.work.next_deadline()),
            }
        }
    }

    /// Prepare for system suspend.
    ///
    /// Refused with [`Error::Busy`] while a current ramp is in flight.
    pub fn suspend(&mut self) -> Result<(), Error<I2C::Error>> {
        if self.shared.stepping_active() {
            log::debug!("current stepping in progress, refusing suspend");
            return Err(Error::Busy);
        }
        let now = self.platform.now_ms();
        let boottime = self.platform.boottime_ms();
        let flush_detection = self.shared.with(|s| {
            s.work.cancel(Work::HwFailureCheck);
            // The scheduling clock stops while suspended; keep the retry on boottime.
            if let Some(remaining) = s.work.remaining_ms(Work::VbusDropEnd, now) {
                s.vbus_drop.suspend(remaining, boottime);
                s.work.cancel(Work::VbusDropEnd);
            }
            s.work.cancel(Work::DetectUsbType)
        });
        // The link status may not update in time if detection is left half done.
        if flush_detection {
            self.run_logged(Work::DetectUsbType);
        }
        self.deliver_notifications();
        Ok(())
    }

    /// Restore timers after system resume.
    pub fn resume(&mut self) {
        if self.ac_conn && self.config.silicon.is_1p1_or_earlier() {
            if let Err(e) = self.kick_watchdog() {
                log::error!("failed to kick charger watchdog: {}", e);
            }
            self.schedule(Work::KickWatchdog, WD_KICK_INTERVAL_MS);
        }
        let flags = self.shared.flags();
        if flags.intersects(HW_FAILURE_FLAGS) {
            self.schedule(Work::HwFailureCheck, 0);
        }
        if flags.contains(EventFlags::VBUS_DROP_END) {
            let boottime = self.platform.boottime_ms();
            let delay_ms = self.shared.with(|s| s.vbus_drop.resume(boottime));
            self.schedule(Work::VbusDropEnd, delay_ms);
        }
    }

    /// Queue `work` from worker context, counting the delay from now.
    fn schedule(&mut self, work: Work, delay_ms: u64) {
        let now = self.platform.now_ms();
        self.shared.with(|s| {
            s.work.queue(work, delay_ms);
            s.work.arm(now);
        });
    }

    fn run_logged(&mut self, work: Work) {
        log::debug!("running {:?}", work);
        if let Err(e) = self.run(work) {
            log::error!("{:?} failed: {}", work, e);
        }
    }

    fn run(&mut self, work: Work) -> Result<(), Error<I2C::Error>> {
        match work {
            Work::DetectUsbType => self.detect_usb_type_work(),
            Work::UsbLinkStatus => self.usb_link_status_work(),
            Work::UsbAttach => self.usb_attach_work(),
            Work::UsbStateChanged => self.usb_state_changed_work(),
            Work::UsbThermalCheck => self.usb_thermal_check_work(),
            Work::UsbChargerNotOkCheck => self.usb_charger_not_ok_work(),
            Work::HwFailureCheck => self.hw_failure_work(),
            Work::VbusDropEnd => self.vbus_drop_end_work(),
            Work::VbatCheck => self.vbat_check_work(),
            Work::KickWatchdog => self.kick_watchdog_work(),
        }
    }

    fn deliver_notifications(&mut self) {
        let (ac, usb) = self.shared.with(|s| s.take_notifications());
        if ac {
            self.notify(Source::Ac);
        }
        if usb {
            self.notify(Source::Usb);
        }
    }

    fn notify(&mut self, source: Source) {
        self.platform.power_supply_changed(source);
    }

    fn init_hw_registers(&mut self) -> Result<(), Error<I2C::Error>> {
        if !self.config.silicon.is_1p1_or_earlier() {
            self.pmic.write(bank::CHARGER, addr::CH_VOLT_LVL_MAX, CH_VOL_LVL_4P6)?;
            self.pmic.write(bank::CHARGER, addr::CH_OPT_CRNTLVL_MAX, CH_OP_CUR_LVL_1P6)?;
        }

        self.pmic.write(
            bank::CHARGER,
            addr::USBCH_CTRL2,
            VBUS_OVV_SELECT_6P3V | VBUS_AUTO_IN_CURR_LIM_ENA,
        )?;

        // Enabling and kicking the main watchdog signals that software has taken over
        // charging control from the hardware.
        let enable_kick = (MainWdogBits::ENA | MainWdogBits::KICK).bits();
        let saved = self.pmic.read(bank::SYS_CTRL2, addr::MAIN_WDOG_CTRL)?;
        self.pmic
            .write(bank::SYS_CTRL2, addr::MAIN_WDOG_CTRL, saved | enable_kick)?;
        self.delay.delay_us(MAIN_WDOG_SYNC_US);
        self.pmic.write(bank::SYS_CTRL2, addr::MAIN_WDOG_CTRL, enable_kick)?;
        self.pmic.write(bank::SYS_CTRL2, addr::MAIN_WDOG_CTRL, saved)?;

        self.pmic.write(bank::CHARGER, addr::CH_WD_TIMER, WD_TIMER)?;

        if !self.config.charging_led {
            self.set_led(false)?;
        }

        if let Some(backup) = self.battery.backup {
            self.pmic.write(bank::RTC, addr::RTC_BACKUP_CHG, backup.bits())?;
            self.pmic
                .mask_set(bank::RTC, addr::RTC_CTRL, RTC_BUP_CH_ENA, RTC_BUP_CH_ENA)?;
        }
        Ok(())
    }

    fn set_led(&mut self, on: bool) -> Result<(), Error<I2C::Error>> {
        if on {
            self.pmic.write(
                bank::CHARGER,
                addr::LED_INDICATOR_PWM_CTRL,
                LED_IND_CUR_5MA | LED_INDICATOR_PWM_ENA,
            )?;
            self.pmic.write(
                bank::CHARGER,
                addr::LED_INDICATOR_PWM_DUTY,
                LED_INDICATOR_PWM_DUTY_252_256,
            )
        } else {
            self.pmic
                .write(bank::CHARGER, addr::LED_INDICATOR_PWM_CTRL, LED_INDICATOR_PWM_DIS)
        }
    }

    fn enable_source(&mut self, source: Source, mv: u16, ma: u16) -> Result<(), Error<I2C::Error>> {
        if !self.shared.info(source).connected {
            log::error!("{:?} charger not connected", source);
            return Err(Error::NotConnected);
        }

        log::info!("enable {:?}: {} mV {} mA", source, mv, ma);

        let input = match source {
            Source::Usb => CurrentReg::UsbInput.code_for::<I2C::Error>(self.max_usb_in_curr),
            Source::Ac => CurrentReg::MainInput.code_for::<I2C::Error>(self.battery.ac_curr_max_ma),
        };
        let (Ok(volt), Ok(_), Ok(_)) = (
            registers::voltage_to_code::<I2C::Error>(mv),
            registers::current_to_code::<I2C::Error>(ma),
            input,
        ) else {
            log::error!("charger voltage or current too high, charging not started");
            return Err(Error::OutOfRange);
        };

        self.hold_vdd_adc(source);

        self.pmic.write(bank::CHARGER, addr::CH_VOLT_LVL, volt)?;

        match source {
            Source::Usb => {
                let mut ctrl = UsbChCtrl1Bits::USB_CH_ENA;
                if !self.battery.enable_overshoot {
                    ctrl |= UsbChCtrl1Bits::NO_OVERSHOOT_ENA_N;
                }
                self.pmic.write(bank::CHARGER, addr::USBCH_CTRL1, ctrl.bits())?;
            }
            Source::Ac => {
                let mut ctrl = MainChCtrl1Bits::MAIN_CH_ENA;
                if !self.battery.enable_overshoot {
                    ctrl |= MainChCtrl1Bits::NO_OVERSHOOT_ENA_N;
                }
                self.pmic.write(bank::CHARGER, addr::MCH_CTRL1, ctrl.bits())?;
            }
        }

        if self.config.charging_led {
            if let Err(e) = self.set_led(true) {
                log::error!("failed to enable charging LED: {}", e);
            }
        }

        self.shared.with(|s| s.info_mut(source).online = true);

        match source {
            Source::Usb => {
                self.refresh_vbat();
                self.set_vbus_in_curr(self.max_usb_in_curr)?;
            }
            Source::Ac => {
                self.ac_conn = true;
                self.set_current(CurrentReg::MainInput, self.battery.ac_curr_max_ma)?;
            }
        }

        self.set_output_current(ma)?;

        if source == Source::Usb {
            self.schedule(Work::VbatCheck, RECHECK_MS);
        }

        self.notify(source);
        Ok(())
    }

    fn disable_source(&mut self, source: Source) -> Result<(), Error<I2C::Error>> {
        log::debug!("disable {:?} charging", source);
        let ctrl = match source {
            Source::Usb => addr::USBCH_CTRL1,
            Source::Ac => addr::MCH_CTRL1,
        };
        self.pmic.write(bank::CHARGER, ctrl, 0)?;

        if self.config.charging_led {
            if let Err(e) = self.set_led(false) {
                log::error!("failed to disable charging LED: {}", e);
            }
        }

        match source {
            Source::Usb => self.set_vbus_in_curr(0)?,
            Source::Ac => self.set_current(CurrentReg::MainInput, 0)?,
        }
        self.set_output_current(0)?;

        self.shared.with(|s| {
            let info = s.info_mut(source);
            info.online = false;
            info.wd_expired = false;
            if !s.ac.wd_expired && !s.usb.wd_expired {
                s.flags.remove(EventFlags::CHG_WD_EXP);
            }
            if source == Source::Usb {
                s.work.cancel(Work::VbatCheck);
            }
        });

        self.release_vdd_adc(source);

        // Cut 1.1 and earlier stop charging unless kicked once the AC charger was used.
        if source == Source::Ac && self.config.silicon.is_1p1_or_earlier() {
            if let Err(e) = self.kick_watchdog() {
                log::error!("failed to kick charger watchdog: {}", e);
            }
            self.schedule(Work::KickWatchdog, WD_KICK_INTERVAL_MS);
        }

        self.notify(source);
        Ok(())
    }

    fn hold_vdd_adc(&mut self, source: Source) {
        let held = self.vddadc_ac || self.vddadc_usb;
        let flag = match source {
            Source::Ac => &mut self.vddadc_ac,
            Source::Usb => &mut self.vddadc_usb,
        };
        if !*flag {
            *flag = true;
            if !held {
                self.platform.enable();
            }
        }
    }

    fn release_vdd_adc(&mut self, source: Source) {
        let flag = match source {
            Source::Ac => &mut self.vddadc_ac,
            Source::Usb => &mut self.vddadc_usb,
        };
        if *flag {
            *flag = false;
            if !self.vddadc_ac && !self.vddadc_usb {
                self.platform.disable();
            }
        }
    }

    fn set_current(&mut self, reg: CurrentReg, ma: u16) -> Result<(), Error<I2C::Error>> {
        stepping::set_current(&mut self.pmic, &mut self.delay, self.shared, reg, ma)
    }

    fn set_output_current(&mut self, ma: u16) -> Result<(), Error<I2C::Error>> {
        self.set_current(CurrentReg::Output, ma)?;
        self.output_ma = ma;
        Ok(())
    }

    /// Program the VBUS input current limit, never above any known ceiling.
    fn set_vbus_in_curr(&mut self, ich: u16) -> Result<(), Error<I2C::Error>> {
        let (cap_ma, budget_ma) = self
            .shared
            .with(|s| (s.vbus_drop.cap_ma, s.usb_link.usb_current_ma));

        let mut limit = self.battery.usb_curr_max_ma.min(ich);
        if cap_ma > 0 {
            limit = limit.min(cap_ma);
        }
        if let Some(budget) = budget_ma.filter(|&ma| ma >= 100) {
            limit = limit.min(u16::try_from(budget).unwrap_or(u16::MAX));
        }

        // Low battery cannot take the full input current (ASIC erratum).
        if self.vbat_mv < VBAT_TRESH_IP_CUR_RED_MV {
            limit = match limit {
                100 => usb_in::LVL_0P05,
                500 => usb_in::LVL_0P45,
                other => other,
            };
        }

        log::info!("VBUS input current limit set to {} mA", limit);
        self.set_current(CurrentReg::UsbInput, limit)
    }

    fn refresh_vbat(&mut self) {
        match self.platform.convert(AdcChannel::BatteryVoltage) {
            Ok(mv) => self.vbat_mv = mv,
            Err(_) => log::warn!("battery voltage conversion failed"),
        }
    }

    fn measure(&mut self, channel: AdcChannel) -> Result<i32, Error<I2C::Error>> {
        self.platform.convert(channel).map_err(|_| {
            log::error!("GPADC conversion of {:?} failed", channel);
            Error::Adc
        })
    }

    fn charger_voltage(&mut self, source: Source) -> Result<i32, Error<I2C::Error>> {
        if !self.shared.info(source).connected {
            return Ok(0);
        }
        match source {
            Source::Ac => self.measure(AdcChannel::MainChargerVoltage),
            Source::Usb => self.measure(AdcChannel::VbusVoltage),
        }
    }

    fn cv_active(&mut self, source: Source, online: bool) -> Result<bool, Error<I2C::Error>> {
        if !online {
            return Ok(false);
        }
        let cv = match source {
            Source::Ac => {
                let raw = self.pmic.read(bank::CHARGER, addr::CH_STATUS1)?;
                ChStatus1Bits::from_bits_truncate(raw).contains(ChStatus1Bits::MAIN_CH_CV_ON)
            }
            Source::Usb => {
                let raw = self.pmic.read(bank::CHARGER, addr::USBCH_STAT1)?;
                UsbChStat1Bits::from_bits_truncate(raw).contains(UsbChStat1Bits::USB_CH_CV_ON)
            }
        };
        Ok(cv)
    }

    /// Sample charger presence. Without `debounce` the status is taken as is.
    fn detect_chargers(&mut self, debounce: bool) -> Result<Detected, Error<I2C::Error>> {
        if debounce {
            // VBUS may still read as debounced right after an ACA is unplugged.
            self.delay.delay_ms(DETECT_DEBOUNCE_MS);
        }
        let usb_stat = UsbChStat1Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::USBCH_STAT1)?);
        log::debug!("USB charger status 1: {:?}", usb_stat);
        let main_stat = ChStatus1Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::CH_STATUS1)?);
        Ok(Detected {
            ac: main_stat.contains(ChStatus1Bits::MAIN_CH_DET),
            usb: usb_stat.contains(UsbChStat1Bits::VBUS_DET_DBNC1 | UsbChStat1Bits::VBUS_DET_DBNC100),
        })
    }

    fn refresh_ac(&mut self, present: bool) {
        let changed = self.shared.with(|s| {
            let changed = s.ac.connected != present;
            s.ac.connected = present;
            changed
        });
        if changed {
            log::debug!("AC charger connected: {}", present);
            if present {
                self.ac_conn = true;
            }
            self.notify(Source::Ac);
        }
    }

    /// Latch main charger faults present right now.
    fn sample_main_faults(&mut self) -> Result<(), Error<I2C::Error>> {
        let stat = ChStatus2Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::CH_STATUS2)?);
        let faulty = self.shared.with(|s| {
            s.flags
                .set(EventFlags::MAIN_EXT_NOT_OK, stat.contains(ChStatus2Bits::MAIN_CH_NOK));
            s.flags
                .set(EventFlags::MAIN_THERMAL_PROT, stat.contains(ChStatus2Bits::MAIN_CH_TH_PROT));
            s.flags
                .intersects(EventFlags::MAIN_EXT_NOT_OK | EventFlags::MAIN_THERMAL_PROT)
        });
        if faulty {
            self.schedule(Work::HwFailureCheck, RECHECK_MS);
        }
        Ok(())
    }

    fn set_usb_connected(&mut self, connected: bool) {
        let changed = self.shared.with(|s| {
            if s.usb.connected == connected {
                return false;
            }
            s.usb.connected = connected;
            if !connected {
                s.vbus_drop.reset();
                s.flags
                    .remove(EventFlags::VBUS_DROP_END | EventFlags::REPORT_NO_CHARGE);
            }
            true
        });
        if changed {
            log::debug!("USB connected: {}", connected);
            if !connected {
                self.is_usb_host = false;
                self.aca = AcaWait::None;
                self.invalid_charger = InvalidCharger::NotForced;
            }
        }
    }

    /// Classify the attached USB device and record what it may deliver.
    fn apply_link_status(&mut self, status: UsbLinkStatus) -> Result<(), Error<I2C::Error>> {
        let result = match usb_type::link_policy(status, self.battery.usb_curr_max_nc_ma) {
            LinkPolicy::Charge(class) => {
                self.max_usb_in_curr = class.max_input_ma;
                self.is_usb_host = class.is_host;
                self.aca = if class.aca_rid { AcaWait::Pending } else { AcaWait::None };
                Ok(())
            }
            LinkPolicy::Denied => {
                log::error!("USB type {:?}: charging not allowed", status);
                self.max_usb_in_curr = DENIED_INPUT_MA;
                Err(Error::ChargingNotAllowed)
            }
            LinkPolicy::CollapseRecovery => self.recover_vbus_collapse(),
        };
        let cap_ma = self.max_usb_in_curr;
        self.shared.with(|s| s.vbus_drop.cap_ma = cap_ma);
        log::debug!("USB type {:?}, max input current {} mA", status, cap_ma);
        result
    }

    /// VBUS dropped below the detection level four times in a row because the output
    /// current was too high for the source. Cycle the charger and check it came back.
    fn recover_vbus_collapse(&mut self) -> Result<(), Error<I2C::Error>> {
        match self.charger_voltage(Source::Usb) {
            Ok(mv) => log::debug!("VBUS collapsed, VBUS at {} mV", mv),
            Err(_) => log::debug!("VBUS collapsed"),
        }
        let wdog = self.pmic.read(bank::SYS_CTRL2, addr::MAIN_WDOG_CTRL)?;
        log::debug!("main watchdog control {:#04x}", wdog);

        let ena = UsbChCtrl1Bits::all().bits();
        self.pmic
            .mask_set(bank::CHARGER, addr::USBCH_CTRL1, ena, UsbChCtrl1Bits::NO_OVERSHOOT_ENA_N.bits())?;
        self.pmic.write(bank::CHARGER, addr::CHARGER_CTRL, DROP_COUNTER_RESET)?;
        self.pmic.mask_set(bank::CHARGER, addr::USBCH_CTRL1, ena, ena)?;

        let stat = UsbChStat1Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::USBCH_STAT1)?);
        if stat.contains(UsbChStat1Bits::USB_CH_ON) {
            log::debug!("recovered from VBUS collapse");
            self.shared.with(|s| s.flags.remove(EventFlags::VBUS_COLLAPSE));
            Ok(())
        } else {
            log::debug!("VBUS has collapsed");
            self.shared.with(|s| s.flags.insert(EventFlags::VBUS_COLLAPSE));
            Err(Error::VbusCollapsed)
        }
    }

    /// Classify from the current line status.
    fn read_usb_type(&mut self) -> Result<(), Error<I2C::Error>> {
        // The line status only refreshes once the interrupt source latch is read.
        self.pmic.read(bank::INTERRUPT, addr::IT_SOURCE21)?;
        let line = self.pmic.read(bank::USB, addr::USB_LINE_STAT)?;
        self.apply_link_status(UsbLinkStatus::from_line_status(line))
    }

    /// Classify once the line status settles after VBUS rose.
    fn detect_usb_type(&mut self) -> Result<(), Error<I2C::Error>> {
        let mut code = 0;
        for _ in 0..LINE_STAT_POLLS {
            self.delay.delay_ms(LINE_STAT_SETTLE_MS);
            let latch = self.pmic.read(bank::INTERRUPT, addr::IT_SOURCE21)?;
            log::debug!("interrupt source 21: {:#04x}", latch);
            let line = self.pmic.read(bank::USB, addr::USB_LINE_STAT)?;
            log::debug!("USB line status: {:#04x}", line);
            code = registers::decode_link_status(line);
            if code != 0 {
                break;
            }
        }
        self.apply_link_status(UsbLinkStatus::from_code(code))
    }

    /// Map the committed USB stack budget to an input current.
    fn usb_stack_current(&mut self) -> Result<(), Error<I2C::Error>> {
        let budget = self.shared.usb_link().usb_current_ma;
        let result = match budget.and_then(usb_type::usb_budget_to_input) {
            Some(ma) => {
                self.max_usb_in_curr = ma;
                Ok(())
            }
            None => {
                self.max_usb_in_curr = DENIED_INPUT_MA;
                Err(Error::UsbCurrentNotAllowed)
            }
        };
        let cap_ma = self.max_usb_in_curr;
        self.shared.with(|s| s.vbus_drop.cap_ma = cap_ma);
        result
    }

    fn usb_removed(&mut self) {
        log::debug!("VBUS gone");
        self.shared.with(|s| s.vbus_detected = false);
        self.set_usb_connected(false);
        self.notify(Source::Usb);
    }

    fn detect_usb_type_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let found = self.detect_chargers(true)?;
        self.refresh_ac(found.ac);
        if !found.usb {
            self.usb_removed();
            return Ok(());
        }

        self.shared.with(|s| s.vbus_detected = true);
        // From cut 2.0 on a link status interrupt follows, except for VBUS present at attach.
        let classify = if self.config.silicon.is_1p1_or_earlier() {
            true
        } else {
            core::mem::take(&mut self.vbus_detected_start)
        };
        if classify && self.detect_usb_type().is_ok() {
            self.set_usb_connected(true);
            self.notify(Source::Usb);
        }
        Ok(())
    }

    fn usb_link_status_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let found = self.detect_chargers(false)?;
        self.refresh_ac(found.ac);

        // Some out-of-spec chargers are flagged invalid and refused; forcing detection
        // once gets them going.
        if found.usb {
            let line = self.pmic.read(bank::USB, addr::USB_LINE_STAT)?;
            log::debug!("USB line status: {:#04x}", line);
            let invalid = UsbLinkStatus::from_line_status(line) == UsbLinkStatus::NotValidLink;
            if invalid && self.invalid_charger == InvalidCharger::NotForced {
                log::debug!("invalid charger detected, forcing detection");
                let ena = UsbChCtrl1Bits::USB_CH_ENA.bits();
                self.pmic.mask_set(bank::CHARGER, addr::USBCH_CTRL1, ena, ena)?;
                self.pmic.mask_set(bank::USB, addr::USB_LINE_CTRL2, 0x01, 0x01)?;
                self.invalid_charger = InvalidCharger::Forced;
                return Ok(());
            }
            if self.invalid_charger == InvalidCharger::Forced {
                log::debug!("invalid charger detected, releasing forced detection");
                self.pmic.mask_set(bank::USB, addr::USB_LINE_CTRL2, 0x01, 0x00)?;
                self.invalid_charger = InvalidCharger::Final;
            }
        } else {
            self.invalid_charger = InvalidCharger::NotForced;
        }

        if !found.usb {
            self.usb_removed();
            self.shared.with(|s| s.work.cancel(Work::UsbAttach));
            return Ok(());
        }

        self.shared.with(|s| s.vbus_detected = true);
        match self.read_usb_type() {
            Ok(()) => {
                let delay_ms = if self.aca == AcaWait::Pending {
                    self.aca = AcaWait::Done;
                    log::debug!("waiting {} ms for USB enumeration", WAIT_ACA_RID_ENUMERATION_MS);
                    WAIT_ACA_RID_ENUMERATION_MS
                } else {
                    0
                };
                self.schedule(Work::UsbAttach, delay_ms);
            }
            Err(Error::ChargingNotAllowed) => {
                self.shared
                    .with(|s| s.flags.insert(EventFlags::REPORT_NO_CHARGE));
                self.is_usb_host = true;
                self.set_usb_connected(true);
                self.notify(Source::Usb);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn usb_attach_work(&mut self) -> Result<(), Error<I2C::Error>> {
        if self.shared.info(Source::Usb).online {
            self.set_vbus_in_curr(self.max_usb_in_curr)?;
        }
        self.set_usb_connected(true);
        self.notify(Source::Usb);
        Ok(())
    }

    fn usb_state_changed_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let committed = self.shared.with(|s| {
            if !s.vbus_detected {
                return None;
            }
            Some(s.usb_link.commit())
        });
        let Some((state, ma)) = committed else {
            log::debug!("USB state change without VBUS");
            return Ok(());
        };
        log::debug!("USB state {:?} mA {:?}", state, ma);

        match state {
            UsbBusState::ResetHs | UsbBusState::ResetFs | UsbBusState::Suspend => {
                self.set_usb_connected(false);
                self.notify(Source::Usb);
            }
            UsbBusState::Resume | UsbBusState::Configured => {
                if state == UsbBusState::Resume {
                    self.delay.delay_ms(USB_RESUME_SETTLE_MS);
                }
                if self.usb_stack_current().is_ok() {
                    self.set_vbus_in_curr(self.max_usb_in_curr)?;
                    self.set_usb_connected(true);
                    self.notify(Source::Usb);
                }
            }
        }
        Ok(())
    }

    fn usb_thermal_check_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let stat = UsbChStat2Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::USBCH_STAT2)?);
        self.shared.with(|s| {
            s.flags
                .set(EventFlags::USB_THERMAL_PROT, stat.contains(UsbChStat2Bits::USB_CH_TH_PROT));
        });
        self.notify(Source::Usb);
        Ok(())
    }

    fn usb_charger_not_ok_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let stat = UsbChStat2Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::USBCH_STAT2)?);
        let not_ok = stat.contains(UsbChStat2Bits::VBUS_CH_NOK);
        let changed = self.shared.with(|s| {
            let was = s.flags.contains(EventFlags::USB_CHARGER_NOT_OK);
            if not_ok {
                s.flags.insert(EventFlags::USB_CHARGER_NOT_OK);
            } else {
                s.flags
                    .remove(EventFlags::USB_CHARGER_NOT_OK | EventFlags::VBUS_COLLAPSE);
            }
            was != not_ok
        });
        if not_ok {
            self.schedule(Work::UsbChargerNotOkCheck, RECHECK_MS);
        }
        if changed {
            self.notify(Source::Usb);
        }
        Ok(())
    }

    fn hw_failure_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let flags = self.shared.flags();

        if flags.contains(EventFlags::VBUS_OVV) {
            let stat = UsbChStat2Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::USBCH_STAT2)?);
            if !stat.contains(UsbChStat2Bits::VBUS_OVV_TH) {
                self.shared.with(|s| s.flags.remove(EventFlags::VBUS_OVV));
                self.notify(Source::Usb);
            }
        }

        let main = EventFlags::MAIN_EXT_NOT_OK | EventFlags::MAIN_THERMAL_PROT;
        if flags.intersects(main) {
            let stat = ChStatus2Bits::from_bits_truncate(self.pmic.read(bank::CHARGER, addr::CH_STATUS2)?);
            let mut cleared = EventFlags::empty();
            if !stat.contains(ChStatus2Bits::MAIN_CH_NOK) {
                cleared |= EventFlags::MAIN_EXT_NOT_OK;
            }
            if !stat.contains(ChStatus2Bits::MAIN_CH_TH_PROT) {
                cleared |= EventFlags::MAIN_THERMAL_PROT;
            }
            if flags.intersects(cleared & main) {
                self.shared.with(|s| s.flags.remove(cleared));
                self.notify(Source::Ac);
            }
        }

        if self.shared.flags().intersects(HW_FAILURE_FLAGS) {
            self.schedule(Work::HwFailureCheck, RECHECK_MS);
        }
        Ok(())
    }

    fn vbus_drop_end_work(&mut self) -> Result<(), Error<I2C::Error>> {
        self.shared.with(|s| s.flags.remove(EventFlags::VBUS_DROP_END));

        self.pmic.write(bank::CHARGER, addr::CHARGER_CTRL, DROP_COUNTER_RESET)?;

        let stat2 = self.pmic.read(bank::CHARGER, addr::USBCH_STAT2)?;
        let auto = registers::decode_auto_in_curr(stat2);
        let ceiling_ma = registers::code_to_vbus_in_curr(auto).unwrap_or(DENIED_INPUT_MA);
        let verdict = self.shared.with(|s| s.vbus_drop.on_drop_end(ceiling_ma));
        match verdict {
            DropVerdict::Limiting { ceiling_ma, .. } => log::info!(
                "VBUS input current limiting to {} mA, retry set {} mA",
                ceiling_ma,
                self.max_usb_in_curr
            ),
            DropVerdict::StillLimiting { ceiling_ma, .. } => log::info!(
                "VBUS input current still limiting to {} mA, retry set {} mA",
                ceiling_ma,
                self.max_usb_in_curr
            ),
            DropVerdict::Frozen { ceiling_ma } => {
                log::info!(
                    "VBUS input current limited to {} mA, no more retry to set {} mA",
                    ceiling_ma,
                    self.max_usb_in_curr
                );
                return Ok(());
            }
        }

        if self.shared.info(Source::Usb).connected {
            self.set_vbus_in_curr(self.max_usb_in_curr)?;
        }
        Ok(())
    }

    fn vbat_check_work(&mut self) -> Result<(), Error<I2C::Error>> {
        self.refresh_vbat();
        if self.old_vbat_mv == 0 {
            self.old_vbat_mv = self.vbat_mv;
        }

        let threshold = VBAT_TRESH_IP_CUR_RED_MV;
        let crossed = (self.old_vbat_mv <= threshold) != (self.vbat_mv <= threshold);
        if crossed {
            log::debug!(
                "VBAT crossed threshold, curr: {}, new: {}, old: {}",
                self.max_usb_in_curr,
                self.vbat_mv,
                self.old_vbat_mv
            );
            if let Err(e) = self.set_vbus_in_curr(self.max_usb_in_curr) {
                log::error!("failed to update VBUS input current: {}", e);
            }
            self.notify(Source::Usb);
        }
        self.old_vbat_mv = self.vbat_mv;

        // Far from the threshold there is no need to look every second.
        let near = self.vbat_mv > threshold - 100 && self.vbat_mv < threshold + 100;
        let delay_ms = if near { RECHECK_MS } else { 10 * RECHECK_MS };
        self.schedule(Work::VbatCheck, delay_ms);
        Ok(())
    }

    fn kick_watchdog_work(&mut self) -> Result<(), Error<I2C::Error>> {
        let result = self.kick_watchdog();
        self.schedule(Work::KickWatchdog, WD_KICK_INTERVAL_MS);
        result
    }
}
