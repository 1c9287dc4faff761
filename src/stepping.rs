//! Current stepping.
//!
//! The charger has no state machine of its own to ramp its current limits, so jumping a
//! limit straight to a new value causes dips and spikes on the main input, VBUS and the
//! battery. Limits are instead moved one code at a time with a settle delay in between.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::data_types::EventFlags;
use crate::driver::Ab8500;
use crate::error::Error;
use crate::registers::{
    self, addr, bank, CURRENT_MAP_MA, MAIN_CH_INPUT_CURR_SHIFT, VBUS_IN_CURR_LIM_SHIFT, VBUS_IN_CURR_MAP_MA,
};
use crate::state::ChargerShared;

const STEP_DELAY_US: u32 = 1_000;
const STEP_DELAY_SLOW_US: u32 = 10 * STEP_DELAY_US;

/// Steppable current-limit registers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CurrentReg {
    /// Main charger input current limit.
    MainInput,
    /// USB charger (VBUS) input current limit.
    UsbInput,
    /// Charger output current.
    Output,
}

impl CurrentReg {
    pub const fn addr(self) -> u8 {
        match self {
            CurrentReg::MainInput => addr::MCH_IPT_CURLVL,
            CurrentReg::UsbInput => addr::USBCH_IPT_CRNTLVL,
            CurrentReg::Output => addr::CH_OPT_CRNTLVL,
        }
    }

    /// Position of the code within the register.
    pub const fn shift(self) -> u8 {
        match self {
            CurrentReg::MainInput => MAIN_CH_INPUT_CURR_SHIFT,
            CurrentReg::UsbInput => VBUS_IN_CURR_LIM_SHIFT,
            CurrentReg::Output => 0,
        }
    }

    /// Current per code (mA).
    pub fn table(self) -> &'static [u16] {
        match self {
            CurrentReg::MainInput | CurrentReg::Output => &CURRENT_MAP_MA,
            CurrentReg::UsbInput => &VBUS_IN_CURR_MAP_MA,
        }
    }

    /// Register code for `ma`.
    pub fn code_for<E>(self, ma: u16) -> Result<u8, Error<E>> {
        registers::floor_index(self.table(), ma)
    }

    /// Delay between two steps of a ramp from `from` to `to`.
    pub fn step_delay_us(self, from: u8, to: u8) -> u32 {
        match self {
            CurrentReg::MainInput => STEP_DELAY_US,
            CurrentReg::UsbInput => STEP_DELAY_SLOW_US,
            CurrentReg::Output if to == 0 => STEP_DELAY_US,
            CurrentReg::Output if i16::from(to) - i16::from(from) > 1 => STEP_DELAY_SLOW_US,
            CurrentReg::Output => STEP_DELAY_US,
        }
    }
}

/// Marks a ramp as in flight for as long as it lives.
pub struct SteppingSession<'a> {
    shared: &'a ChargerShared,
}

impl<'a> SteppingSession<'a> {
    pub fn begin(shared: &'a ChargerShared) -> Self {
        shared.with(|s| s.stepping_sessions += 1);
        Self { shared }
    }
}

impl Drop for SteppingSession<'_> {
    fn drop(&mut self) {
        self.shared
            .with(|s| s.stepping_sessions = s.stepping_sessions.saturating_sub(1));
    }
}

/// Move `reg` to the code for `ma`.
///
/// Without a source connected to load the register there is nothing to protect and the
/// code is written directly. Upward VBUS ramps stop as soon as a drop-end interrupt
/// latches, leaving the last code written.
pub fn set_current<I2C, D>(
    pmic: &mut Ab8500<I2C>,
    delay: &mut D,
    shared: &ChargerShared,
    reg: CurrentReg,
    ma: u16,
) -> Result<(), Error<I2C::Error>>
where
    I2C: I2c,
    D: DelayNs,
{
    let _session = SteppingSession::begin(shared);

    let target = reg.code_for(ma).inspect_err(|_| {
        log::error!("requested current limit {} mA out of range", ma);
    })?;

    let mut prev = pmic.read(bank::CHARGER, reg.addr())? >> reg.shift();
    if reg == CurrentReg::UsbInput {
        let auto = registers::decode_auto_in_curr(pmic.read(bank::CHARGER, addr::USBCH_STAT2)?);
        log::debug!(
            "auto VBUS input current is {} mA",
            registers::code_to_vbus_in_curr(auto).unwrap_or(0)
        );
        prev = prev.min(auto);
    }

    if prev == target {
        log::debug!("current not changed for reg {:#04x}", reg.addr());
        return Ok(());
    }

    log::debug!("set charger current {} mA for reg {:#04x}", ma, reg.addr());

    let (ac, usb) = shared.with(|s| (s.ac.connected, s.usb.connected));
    let direct = match reg {
        CurrentReg::MainInput => !ac,
        CurrentReg::UsbInput => !usb,
        CurrentReg::Output => !ac && !usb,
    };
    if direct {
        return pmic.write(bank::CHARGER, reg.addr(), target << reg.shift());
    }

    let step_delay_us = reg.step_delay_us(prev, target);
    if prev > target {
        for code in (target..prev).rev() {
            pmic.write(bank::CHARGER, reg.addr(), code << reg.shift())?;
            if code != target {
                delay.delay_us(step_delay_us);
            }
        }
    } else {
        for code in prev + 1..=target {
            pmic.write(bank::CHARGER, reg.addr(), code << reg.shift())?;
            if code != target {
                delay.delay_us(step_delay_us);
            }
            if !may_continue(shared, reg) {
                log::debug!("VBUS dropped, stopping ramp at code {}", code);
                break;
            }
        }
    }
    Ok(())
}

fn may_continue(shared: &ChargerShared, reg: CurrentReg) -> bool {
    match reg {
        CurrentReg::UsbInput => !shared.flags().contains(EventFlags::VBUS_DROP_END),
        _ => true,
    }
}
