//! Register access for the AB8500.
//! Every register lives in a bank; a transaction addresses it as `[bank, reg]` followed by data.
//! Nothing here retries: a failed transfer is reported to the caller, which abandons its operation.

use crate::error::Error;
use crate::registers::DEFAULT_I2C_ADDRESS;

/// Bank-addressed register window of the AB8500.
pub struct Ab8500<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C> Ab8500<I2C> {
    /// Create a new instance with the default I2C address.
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: DEFAULT_I2C_ADDRESS,
        }
    }

    /// Create a new instance with a custom I2C address.
    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Return the 7-bit I2C address configured for this instance.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the bus.
    pub fn free(self) -> I2C {
        self.i2c
    }
}

impl<I2C> Ab8500<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    /// Read a single register.
    pub fn read(&mut self, bank: u8, reg: u8) -> Result<u8, Error<I2C::Error>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[bank, reg], &mut buf)
            .map_err(Error::I2c)?;
        Ok(buf[0])
    }

    /// Write a single register.
    pub fn write(&mut self, bank: u8, reg: u8, value: u8) -> Result<(), Error<I2C::Error>> {
        self.i2c
            .write(self.address, &[bank, reg, value])
            .map_err(Error::I2c)
    }

    /// Update masked bits in a register (read-modify-write).
    pub fn mask_set(&mut self, bank: u8, reg: u8, mask: u8, value: u8) -> Result<(), Error<I2C::Error>> {
        let cur = self.read(bank, reg)?;
        let new = (cur & !mask) | (value & mask);
        self.write(bank, reg, new)
    }
}
