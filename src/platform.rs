//! Collaborators the charger consumes from the surrounding system.

use crate::data_types::Source;

/// GPADC measurement channels used by the charger.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdcChannel {
    MainChargerVoltage,
    VbusVoltage,
    BatteryVoltage,
}

/// A GPADC conversion did not complete.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AdcError;

/// General purpose ADC. Voltages are returned in mV.
pub trait Gpadc {
    fn convert(&mut self, channel: AdcChannel) -> Result<i32, AdcError>;
}

/// The VDD-ADC supply rail.
///
/// Toggling it raises spurious battery temperature interrupts, so the charger keeps it
/// enabled for as long as any source is charging.
pub trait SupplyRail {
    fn enable(&mut self);
    fn disable(&mut self);
}

/// Consumers of power-supply change notifications.
pub trait Notifier {
    fn power_supply_changed(&mut self, source: Source);
}

/// Time sources, in milliseconds.
pub trait Clock {
    /// Scheduling clock. May stand still while the system is suspended.
    fn now_ms(&self) -> u64;
    /// Monotonic clock that keeps counting across suspend.
    fn boottime_ms(&self) -> u64;
}

/// Everything the charger needs from the platform.
pub trait Platform: Gpadc + SupplyRail + Notifier + Clock {}

impl<T: Gpadc + SupplyRail + Notifier + Clock> Platform for T {}
