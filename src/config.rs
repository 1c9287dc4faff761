//! Platform configuration: battery profile, silicon revision and interrupt wiring.

use crate::error::Error;
use crate::irq::Irq;
use crate::registers::{CURRENT_MAP_MA, VBUS_IN_CURR_MAP_MA};

/// AB8500 silicon revision, as far as the charger cares.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SiliconRevision {
    /// Cut 1.0/1.1: no link-status interrupt, charger watchdog must be kicked continuously
    /// once the AC charger has been used.
    Cut1p1OrEarlier,
    /// Cut 2.0 and later.
    #[default]
    Cut2p0OrLater,
}

impl SiliconRevision {
    pub fn is_1p1_or_earlier(self) -> bool {
        matches!(self, SiliconRevision::Cut1p1OrEarlier)
    }
}

/// Backup battery charge voltage (RTC_BACKUP_CHG bits 1-0).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackupVoltage {
    V2p5,
    V2p6,
    V2p8,
    V3p1,
}

/// Backup battery charge current (RTC_BACKUP_CHG bits 3-2).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackupCurrent {
    Ua50,
    Ua150,
    Ua300,
    Ua700,
}

/// Backup (RTC) battery charge parameters.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackupCharge {
    pub voltage: BackupVoltage,
    pub current: BackupCurrent,
}

impl BackupCharge {
    /// Register value for RTC_BACKUP_CHG.
    pub fn bits(&self) -> u8 {
        let v = match self.voltage {
            BackupVoltage::V2p5 => 0x00,
            BackupVoltage::V2p6 => 0x01,
            BackupVoltage::V2p8 => 0x02,
            BackupVoltage::V3p1 => 0x03,
        };
        let i = match self.current {
            BackupCurrent::Ua50 => 0x00,
            BackupCurrent::Ua150 => 0x04,
            BackupCurrent::Ua300 => 0x08,
            BackupCurrent::Ua700 => 0x0C,
        };
        v | i
    }
}

/// Battery-specific charging parameters.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatteryProfile {
    /// Keep the hardware VBAT overshoot control enabled.
    pub enable_overshoot: bool,
    /// Ceiling for the VBUS input current (mA).
    pub usb_curr_max_ma: u16,
    /// Input current allowed for chargers the hardware reports as not configured or
    /// invalid (out-of-spec D+/D- resistance). `None` refuses to charge from them.
    pub usb_curr_max_nc_ma: Option<u16>,
    /// Ceiling for the main charger input current (mA).
    pub ac_curr_max_ma: u16,
    /// Backup battery charging, if the board has one.
    pub backup: Option<BackupCharge>,
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self {
            enable_overshoot: false,
            usb_curr_max_ma: 1500,
            usb_curr_max_nc_ma: None,
            ac_curr_max_ma: 1500,
            backup: None,
        }
    }
}

/// Mapping from the charger's logical interrupts to hardware interrupt lines.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IrqMap {
    lines: [Option<u32>; Irq::COUNT],
}

impl IrqMap {
    pub const fn new() -> Self {
        Self {
            lines: [None; Irq::COUNT],
        }
    }

    /// Assign a hardware line to a logical interrupt.
    pub fn with_line(mut self, irq: Irq, line: u32) -> Self {
        self.lines[irq as usize] = Some(line);
        self
    }

    /// Assign a hardware line by the interrupt's platform name (e.g. `"VBUS_DET_R"`).
    pub fn with_named_line<E>(self, name: &str, line: u32) -> Result<Self, Error<E>> {
        let irq = Irq::from_name(name).ok_or(Error::InvalidConfig)?;
        Ok(self.with_line(irq, line))
    }

    pub fn line(&self, irq: Irq) -> Option<u32> {
        self.lines[irq as usize]
    }

    /// Reverse lookup used by the top-level interrupt handler.
    pub fn irq_for_line(&self, line: u32) -> Option<Irq> {
        Irq::ALL.into_iter().find(|&irq| self.line(irq) == Some(line))
    }

    /// Every logical interrupt has a line.
    pub fn is_complete(&self) -> bool {
        self.lines.iter().all(Option::is_some)
    }
}

/// Charger platform data.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChargerConfig {
    pub silicon: SiliconRevision,
    /// Drive the charging LED from enable/disable.
    pub charging_led: bool,
    pub irqs: IrqMap,
    pub battery: Option<BatteryProfile>,
}

impl ChargerConfig {
    /// Reject configurations the driver cannot run with.
    pub fn validate<E>(&self) -> Result<BatteryProfile, Error<E>> {
        let Some(battery) = self.battery else {
            log::error!("no battery platform data supplied");
            return Err(Error::InvalidConfig);
        };
        if !self.irqs.is_complete() {
            log::error!("charger interrupt map is incomplete");
            return Err(Error::InvalidConfig);
        }
        let usb_levels = VBUS_IN_CURR_MAP_MA[0]..=VBUS_IN_CURR_MAP_MA[VBUS_IN_CURR_MAP_MA.len() - 1];
        let ac_levels = CURRENT_MAP_MA[0]..=CURRENT_MAP_MA[CURRENT_MAP_MA.len() - 1];
        if !usb_levels.contains(&battery.usb_curr_max_ma) || !ac_levels.contains(&battery.ac_curr_max_ma) {
            log::error!("battery input current ceilings outside the hardware range");
            return Err(Error::InvalidConfig);
        }
        if battery.usb_curr_max_nc_ma.is_some_and(|ma| ma > *usb_levels.end()) {
            log::error!("not-configured charger current above the hardware range");
            return Err(Error::InvalidConfig);
        }
        Ok(battery)
    }
}
