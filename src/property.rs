//! Power-supply properties reported to the charging algorithm.

use crate::data_types::{ChargerInfo, EventFlags};

/// Queryable properties of a charger source.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Property {
    Health,
    /// A cable is attached.
    Present,
    /// Charging is enabled.
    Online,
    /// Input voltage (mV), measured on every query.
    VoltageNow,
    /// Constant-voltage phase, sampled on every query.
    CvActive,
    /// Programmed output current (mA).
    CurrentNow,
    /// VBUS collapsed and could not be recovered.
    VbusCollapsed,
}

/// Charger health, most severe condition first.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Health {
    /// The attached USB accessory must not be charged from.
    Unknown,
    UnspecifiedFailure,
    /// Charger watchdog expired.
    Dead,
    Overheat,
    Overvoltage,
    Good,
}

/// Value of a [`Property`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropertyValue {
    Health(Health),
    Bool(bool),
    /// Millivolts or milliamps, depending on the property.
    Int(i32),
}

/// Derive the reported health from the latched flags. First match wins.
pub fn health(flags: EventFlags, ac: &ChargerInfo, usb: &ChargerInfo) -> Health {
    if flags.contains(EventFlags::REPORT_NO_CHARGE) {
        Health::Unknown
    } else if flags.intersects(EventFlags::USB_CHARGER_NOT_OK | EventFlags::MAIN_EXT_NOT_OK) {
        Health::UnspecifiedFailure
    } else if ac.wd_expired || usb.wd_expired {
        Health::Dead
    } else if flags.intersects(EventFlags::USB_THERMAL_PROT | EventFlags::MAIN_THERMAL_PROT) {
        Health::Overheat
    } else if flags.contains(EventFlags::VBUS_OVV) {
        Health::Overvoltage
    } else {
        Health::Good
    }
}
