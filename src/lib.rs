//! AB8500 charger driver.
//!
//! Charger management for the ST-Ericsson AB8500 PMIC: AC and USB source arbitration,
//! USB accessory classification, stepped current programming, VBUS drop backoff and
//! latched fault handling. no_std, blocking `embedded-hal` 1 I2C, optional defmt.
//!
//! Interrupt handlers feed [`ChargerShared`]; a single [`Charger`] worker drains the
//! deferred work through [`Charger::run_pending`].

#![no_std]

pub mod charger;
pub mod config;
pub mod data_types;
pub mod driver;
pub mod error;
pub mod irq;
pub mod platform;
pub mod property;
pub mod registers;
pub mod state;
pub mod stepping;
pub mod usb_type;
pub mod vbus_drop;
pub mod work;

pub use charger::Charger;
pub use config::{BatteryProfile, ChargerConfig, IrqMap, SiliconRevision};
pub use data_types::{ChargerInfo, EventFlags, Source, UsbEvent};
pub use driver::Ab8500;
pub use error::Error;
pub use irq::Irq;
pub use platform::Platform;
pub use property::{Health, Property, PropertyValue};
pub use registers::DEFAULT_I2C_ADDRESS;
pub use state::ChargerShared;
