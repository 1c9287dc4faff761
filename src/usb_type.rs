//! USB accessory classification from the line-status link type.

use crate::registers::{decode_link_status, usb_in};

/// Link type reported in the USB line status register.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsbLinkStatus {
    NotConfigured,
    StdHostNc,
    StdHostCNs,
    StdHostCS,
    HostChgNm,
    HostChgHs,
    HostChgHsChirp,
    DedicatedChg,
    AcaRidA,
    AcaRidB,
    AcaRidCNm,
    AcaRidCHs,
    AcaRidCHsChirp,
    HmIdgnd,
    /// VBUS dropped below the detection level four times in a row.
    Reserved,
    NotValidLink,
}

impl UsbLinkStatus {
    /// Decode a link-type code (0..=15).
    pub fn from_code(code: u8) -> Self {
        match code & 0x0F {
            0 => UsbLinkStatus::NotConfigured,
            1 => UsbLinkStatus::StdHostNc,
            2 => UsbLinkStatus::StdHostCNs,
            3 => UsbLinkStatus::StdHostCS,
            4 => UsbLinkStatus::HostChgNm,
            5 => UsbLinkStatus::HostChgHs,
            6 => UsbLinkStatus::HostChgHsChirp,
            7 => UsbLinkStatus::DedicatedChg,
            8 => UsbLinkStatus::AcaRidA,
            9 => UsbLinkStatus::AcaRidB,
            10 => UsbLinkStatus::AcaRidCNm,
            11 => UsbLinkStatus::AcaRidCHs,
            12 => UsbLinkStatus::AcaRidCHsChirp,
            13 => UsbLinkStatus::HmIdgnd,
            14 => UsbLinkStatus::Reserved,
            _ => UsbLinkStatus::NotValidLink,
        }
    }

    /// Decode the raw USB line status register.
    pub fn from_line_status(raw: u8) -> Self {
        Self::from_code(decode_link_status(raw))
    }
}

/// What the charger may draw from a classified accessory.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UsbClass {
    pub max_input_ma: u16,
    /// A USB host (rather than a charger) is on the other end.
    pub is_host: bool,
    /// Accessory charger adapter identified through its ID resistor.
    pub aca_rid: bool,
}

/// Charging decision for a link type.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkPolicy {
    Charge(UsbClass),
    /// Charging is not allowed; only the minimum current may be drawn.
    Denied,
    /// VBUS collapsed; the charger must be cycled before anything else.
    CollapseRecovery,
}

/// Input current drawn when charging is denied (mA).
pub const DENIED_INPUT_MA: u16 = usb_in::LVL_0P05;

const fn host(max_input_ma: u16) -> LinkPolicy {
    LinkPolicy::Charge(UsbClass {
        max_input_ma,
        is_host: true,
        aca_rid: false,
    })
}

const fn charger(max_input_ma: u16, aca_rid: bool) -> LinkPolicy {
    LinkPolicy::Charge(UsbClass {
        max_input_ma,
        is_host: false,
        aca_rid,
    })
}

/// Map a link type to a charging decision.
///
/// The platform only implements USB 2.0, so every host variant is capped at 500 mA.
/// `nc_override_ma` lets boards charge from adapters the hardware fails to identify.
pub fn link_policy(status: UsbLinkStatus, nc_override_ma: Option<u16>) -> LinkPolicy {
    use UsbLinkStatus::*;

    match status {
        StdHostNc | StdHostCNs | StdHostCS | HostChgNm | HostChgHs | HostChgHsChirp => host(usb_in::LVL_0P5),
        DedicatedChg => charger(usb_in::LVL_1P5, false),
        // Dedicated level minus the 900 mA an accessory may draw.
        AcaRidA => charger(usb_in::LVL_0P5, true),
        // Dedicated level minus 120 mA for the ACA and a potential accessory.
        AcaRidB => charger(usb_in::LVL_1P3, true),
        AcaRidCNm | AcaRidCHsChirp => charger(usb_in::LVL_1P5, true),
        AcaRidCHs => charger(usb_in::LVL_0P9, false),
        Reserved => LinkPolicy::CollapseRecovery,
        NotConfigured | NotValidLink => match nc_override_ma {
            Some(ma) if ma > 0 => charger(ma, false),
            _ => LinkPolicy::Denied,
        },
        HmIdgnd => LinkPolicy::Denied,
    }
}

/// Map the current announced by the USB stack to the closest VBUS input level.
/// `None` if the budget is not one the charger accepts.
pub fn usb_budget_to_input(ma: u32) -> Option<u16> {
    match ma {
        100 => Some(usb_in::LVL_0P09),
        200 => Some(usb_in::LVL_0P19),
        300 => Some(usb_in::LVL_0P29),
        400 => Some(usb_in::LVL_0P38),
        500 => Some(usb_in::LVL_0P5),
        _ => None,
    }
}
