//! Error definitions for the AB8500 charger driver.

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<I2cError> {
    /// Underlying I2C transaction failed.
    I2c(I2cError),
    /// Requested voltage or current has no register code.
    OutOfRange,
    /// Platform configuration is missing or inconsistent.
    InvalidConfig,
    /// The requested source has no charger attached.
    NotConnected,
    /// The attached USB accessory must not be charged from.
    ChargingNotAllowed,
    /// VBUS collapsed and the charger could not be brought back.
    VbusCollapsed,
    /// The USB stack announced a current budget the charger cannot use.
    UsbCurrentNotAllowed,
    /// A current ramp is in progress; try again later.
    Busy,
    /// A GPADC conversion failed.
    Adc,
}

impl<I2cError: core::fmt::Debug> core::fmt::Display for Error<I2cError> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::I2c(e) => write!(f, "I2C error: {:?}", e),
            Error::OutOfRange => write!(f, "requested value out of range"),
            Error::InvalidConfig => write!(f, "invalid platform configuration"),
            Error::NotConnected => write!(f, "charger not connected"),
            Error::ChargingNotAllowed => write!(f, "charging not allowed for this USB type"),
            Error::VbusCollapsed => write!(f, "VBUS collapsed"),
            Error::UsbCurrentNotAllowed => write!(f, "USB current budget not supported"),
            Error::Busy => write!(f, "current stepping in progress"),
            Error::Adc => write!(f, "GPADC conversion failed"),
        }
    }
}
