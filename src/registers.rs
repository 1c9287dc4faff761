//! Register map, bit layouts and lookup tables for the AB8500 charger block.
//! Addresses are `(bank, register)` pairs; values follow the AB8500 user manual (UM0836).

use crate::error::Error;

/// Default 7-bit address of the bank-addressed register window.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x4B;

/// Register banks.
pub mod bank {
    pub const SYS_CTRL2: u8 = 0x02;
    pub const USB: u8 = 0x05;
    pub const CHARGER: u8 = 0x0B;
    pub const INTERRUPT: u8 = 0x0E;
    pub const RTC: u8 = 0x0F;
}

/// Register addresses within their bank.
pub mod addr {
    /// SYS_CTRL2: main watchdog control.
    pub const MAIN_WDOG_CTRL: u8 = 0x01;

    /// USB: line status (link type in bits 6-3).
    pub const USB_LINE_STAT: u8 = 0x80;
    /// USB: line control 2 (bit 0 forces charger detection).
    pub const USB_LINE_CTRL2: u8 = 0x82;

    /// INTERRUPT: source 21 latch, must be read before the line status refreshes.
    pub const IT_SOURCE21: u8 = 0x14;

    /// RTC: control (backup battery charge enable).
    pub const RTC_CTRL: u8 = 0x0B;
    /// RTC: backup battery charge voltage/current selection.
    pub const RTC_BACKUP_CHG: u8 = 0x0C;

    /// CHARGER: main charger status 1.
    pub const CH_STATUS1: u8 = 0x00;
    /// CHARGER: main charger status 2.
    pub const CH_STATUS2: u8 = 0x01;
    /// CHARGER: USB charger status 1.
    pub const USBCH_STAT1: u8 = 0x02;
    /// CHARGER: USB charger status 2 (faults, auto input current limit in bits 7-4).
    pub const USBCH_STAT2: u8 = 0x03;
    /// Charge voltage level (index into [`VOLTAGE_MAP_MV`]).
    pub const CH_VOLT_LVL: u8 = 0x40;
    pub const CH_VOLT_LVL_MAX: u8 = 0x41;
    /// Output current level (index into [`CURRENT_MAP_MA`]).
    pub const CH_OPT_CRNTLVL: u8 = 0x42;
    pub const CH_OPT_CRNTLVL_MAX: u8 = 0x43;
    /// Charger watchdog timeout.
    pub const CH_WD_TIMER: u8 = 0x50;
    /// Charger watchdog kick.
    pub const CHARG_WD_CTRL: u8 = 0x51;
    pub const LED_INDICATOR_PWM_CTRL: u8 = 0x53;
    pub const LED_INDICATOR_PWM_DUTY: u8 = 0x54;
    /// Writing 0x01 resets the main/USB input current drop counter.
    pub const CHARGER_CTRL: u8 = 0x56;
    /// Main charger control 1.
    pub const MCH_CTRL1: u8 = 0x80;
    /// Main charger input current level (bits 7-4).
    pub const MCH_IPT_CURLVL: u8 = 0x82;
    /// USB charger control 1.
    pub const USBCH_CTRL1: u8 = 0xC0;
    /// USB charger control 2 (VBUS OVV threshold, auto input current limit).
    pub const USBCH_CTRL2: u8 = 0xC1;
    /// USB charger input current level (bits 7-4).
    pub const USBCH_IPT_CRNTLVL: u8 = 0xC2;
}

/// Line status link-type field.
pub const USB_LINK_STATUS_MASK: u8 = 0x78;
pub const USB_LINK_STATUS_SHIFT: u8 = 3;

pub const MAIN_CH_INPUT_CURR_SHIFT: u8 = 4;
pub const VBUS_IN_CURR_LIM_SHIFT: u8 = 4;
pub const AUTO_VBUS_IN_CURR_LIM_SHIFT: u8 = 4;

/// Charger watchdog timeout code (4 minutes).
pub const WD_TIMER: u8 = 0x30;
/// Value written to [`addr::CHARG_WD_CTRL`] to kick the charger watchdog.
pub const CHARG_WD_KICK: u8 = 0x01;
/// Value written to [`addr::CHARGER_CTRL`] to reset the drop counter.
pub const DROP_COUNTER_RESET: u8 = 0x01;

/// Charge voltage code used for requests below 3.5 V (3.39 V).
pub const LOW_VOLT_REG: u8 = 0x4E;
/// Maximum charge voltage code (4.6 V).
pub const CH_VOL_LVL_4P6: u8 = 0x4D;
/// Maximum output current code (1.6 A).
pub const CH_OP_CUR_LVL_1P6: u8 = 0x0F;

/// USBCH_CTRL2: VBUS overvoltage threshold 6.3 V.
pub const VBUS_OVV_SELECT_6P3V: u8 = 0x12;
/// USBCH_CTRL2: let hardware lower the input current when VBUS sags.
pub const VBUS_AUTO_IN_CURR_LIM_ENA: u8 = 0x04;

pub const LED_INDICATOR_PWM_ENA: u8 = 0x01;
pub const LED_INDICATOR_PWM_DIS: u8 = 0x00;
pub const LED_IND_CUR_5MA: u8 = 0x04;
pub const LED_INDICATOR_PWM_DUTY_252_256: u8 = 0xBF;

/// RTC_CTRL: backup battery charger enable.
pub const RTC_BUP_CH_ENA: u8 = 0x10;

/// Battery voltage below which the VBUS input current is reduced (ASIC erratum).
pub const VBAT_TRESH_IP_CUR_RED_MV: i32 = 3800;

bitflags::bitflags! {
    /// CH_STATUS1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ChStatus1Bits: u8 {
        const MAIN_CH_DET   = 1 << 0;
        const MAIN_CH_CV_ON = 1 << 2;
    }

    /// CH_STATUS2 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ChStatus2Bits: u8 {
        const MAIN_CH_NOK     = 1 << 0;
        const MAIN_CH_TH_PROT = 1 << 1;
    }

    /// USBCH_STAT1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UsbChStat1Bits: u8 {
        /// VBUS detected after the 1 ms debounce.
        const VBUS_DET_DBNC1   = 1 << 0;
        /// VBUS detected after the 100 ms debounce.
        const VBUS_DET_DBNC100 = 1 << 1;
        /// USB charger is switched on.
        const USB_CH_ON        = 1 << 2;
        const USB_CH_CV_ON     = 1 << 3;
    }

    /// USBCH_STAT2 bits. Bits 7-4 hold the auto-limited input current code.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UsbChStat2Bits: u8 {
        const VBUS_OVV_TH    = 1 << 0;
        const USB_CH_TH_PROT = 1 << 1;
        const VBUS_CH_NOK    = 1 << 3;
        const AUTO_IN_CURR   = 0xF0;
    }

    /// USBCH_CTRL1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UsbChCtrl1Bits: u8 {
        const USB_CH_ENA              = 1 << 0;
        /// Active low: set to disable VBAT overshoot control.
        const NO_OVERSHOOT_ENA_N      = 1 << 1;
    }

    /// MCH_CTRL1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MainChCtrl1Bits: u8 {
        const MAIN_CH_ENA             = 1 << 0;
        const NO_OVERSHOOT_ENA_N      = 1 << 1;
    }

    /// MAIN_WDOG_CTRL bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MainWdogBits: u8 {
        const ENA  = 1 << 0;
        const KICK = 1 << 1;
    }
}

/// Charge voltage per code (mV).
pub const VOLTAGE_MAP_MV: [u16; 78] = [
    3500, 3525, 3550, 3575, 3600, 3625, 3650, 3675, 3700, 3725, 3750, 3775, 3800, 3825, 3850,
    3875, 3900, 3925, 3950, 3975, 4000, 4025, 4050, 4060, 4070, 4080, 4090, 4100, 4110, 4120,
    4130, 4140, 4150, 4160, 4170, 4180, 4190, 4200, 4210, 4220, 4230, 4240, 4250, 4260, 4270,
    4280, 4290, 4300, 4310, 4320, 4330, 4340, 4350, 4360, 4370, 4380, 4390, 4400, 4410, 4420,
    4430, 4440, 4450, 4460, 4470, 4480, 4490, 4500, 4510, 4520, 4530, 4540, 4550, 4560, 4570,
    4580, 4590, 4600,
];

/// Charger output (and main input) current per code (mA).
pub const CURRENT_MAP_MA: [u16; 15] = [
    100, 200, 300, 400, 500, 600, 700, 800, 900, 1000, 1100, 1200, 1300, 1400, 1500,
];

/// VBUS input current levels supported by the USB charger (mA).
pub mod usb_in {
    pub const LVL_0P05: u16 = 50;
    pub const LVL_0P09: u16 = 98;
    pub const LVL_0P19: u16 = 193;
    pub const LVL_0P29: u16 = 290;
    pub const LVL_0P38: u16 = 380;
    pub const LVL_0P45: u16 = 450;
    pub const LVL_0P5: u16 = 500;
    pub const LVL_0P6: u16 = 600;
    pub const LVL_0P7: u16 = 700;
    pub const LVL_0P8: u16 = 800;
    pub const LVL_0P9: u16 = 900;
    pub const LVL_1P0: u16 = 1000;
    pub const LVL_1P1: u16 = 1100;
    pub const LVL_1P3: u16 = 1300;
    pub const LVL_1P4: u16 = 1400;
    pub const LVL_1P5: u16 = 1500;
}

/// VBUS input current per code (mA).
pub const VBUS_IN_CURR_MAP_MA: [u16; 16] = [
    usb_in::LVL_0P05,
    usb_in::LVL_0P09,
    usb_in::LVL_0P19,
    usb_in::LVL_0P29,
    usb_in::LVL_0P38,
    usb_in::LVL_0P45,
    usb_in::LVL_0P5,
    usb_in::LVL_0P6,
    usb_in::LVL_0P7,
    usb_in::LVL_0P8,
    usb_in::LVL_0P9,
    usb_in::LVL_1P0,
    usb_in::LVL_1P1,
    usb_in::LVL_1P3,
    usb_in::LVL_1P4,
    usb_in::LVL_1P5,
];

/// Floor search over an ascending table.
///
/// Returns the index of the largest entry not above `value`. A value past the
/// last entry only maps when it equals that entry exactly.
pub fn floor_index<E>(table: &[u16], value: u16) -> Result<u8, Error<E>> {
    let Some(&first) = table.first() else {
        return Err(Error::OutOfRange);
    };
    if value < first {
        return Ok(0);
    }
    if let Some(i) = table.iter().position(|&entry| value < entry) {
        return Ok((i - 1) as u8);
    }
    let last = table.len() - 1;
    if value == table[last] {
        Ok(last as u8)
    } else {
        Err(Error::OutOfRange)
    }
}

/// Convert a charge voltage (mV) to its register code.
pub fn voltage_to_code<E>(mv: u16) -> Result<u8, Error<E>> {
    if mv < VOLTAGE_MAP_MV[0] {
        return Ok(LOW_VOLT_REG);
    }
    floor_index(&VOLTAGE_MAP_MV, mv)
}

/// Convert an output/main-input current (mA) to its register code.
pub fn current_to_code<E>(ma: u16) -> Result<u8, Error<E>> {
    floor_index(&CURRENT_MAP_MA, ma)
}

/// Convert a VBUS input current (mA) to its register code.
pub fn vbus_in_curr_to_code<E>(ma: u16) -> Result<u8, Error<E>> {
    floor_index(&VBUS_IN_CURR_MAP_MA, ma)
}

/// VBUS input current (mA) for a code, if the code is in the table.
pub fn code_to_vbus_in_curr(code: u8) -> Option<u16> {
    VBUS_IN_CURR_MAP_MA.get(code as usize).copied()
}

/// Output current (mA) for a code, if the code is in the table.
pub fn code_to_current(code: u8) -> Option<u16> {
    CURRENT_MAP_MA.get(code as usize).copied()
}

/// Extract the link-type field from a raw USB line status value.
pub fn decode_link_status(raw: u8) -> u8 {
    (raw & USB_LINK_STATUS_MASK) >> USB_LINK_STATUS_SHIFT
}

/// Extract the hardware auto-limited input current code from USBCH_STAT2.
pub fn decode_auto_in_curr(stat2: u8) -> u8 {
    stat2 >> AUTO_VBUS_IN_CURR_LIM_SHIFT
}
