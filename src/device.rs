//! AX5043 Register Access
//!
//! This module provides the two layers every other part of the driver talks through:
//!
//! - [`RegisterPort`]: raw byte-level register access. This is the seam between the driver
//!   and the bus transport, and the one the simulated radio in [`crate::mock`] plugs into.
//! - [`Device`]: wraps a [`RegisterPort`] and adds typed access to the registers defined in
//!   [`crate::registers`] plus multi-byte helpers for the plain numeric registers.
//!
//! [`SpiPort`] implements [`RegisterPort`] over an `embedded-hal` [`SpiDevice`], using the
//! AX5043 short (7-bit) and long (12-bit) address frames.
//!
//! # Example
//! ```no_run
//! use ax5043::{Device, SpiPort, registers::SiliconRevision};
//!
//! # fn demo<SPI: embedded_hal::spi::SpiDevice>(spi: SPI) -> Result<(), ax5043::Error<SPI::Error>> {
//! let mut device = Device::new(SpiPort::new(spi));
//!
//! // Read a typed register
//! let revision: SiliconRevision = device.read_register()?;
//! # Ok(())
//! # }
//! ```

use core::convert::Infallible;

use embedded_hal::spi::{Operation, SpiDevice};
use regiface::{ByteArray, ReadableRegister, WritableRegister};

use crate::error::{Error, HardwareError};
use crate::registers::map;

/// Raw register access to an AX5043.
///
/// Block accesses starting at any address other than [`map::FIFODATA`] auto-increment the
/// register address after every byte. Block accesses to [`map::FIFODATA`] stream through the
/// FIFO without incrementing.
pub trait RegisterPort {
    /// Bus-level failure (timeout, NACK, ...)
    type Error: core::fmt::Debug;

    /// Reads a single register.
    fn read_register(&mut self, addr: u16) -> Result<u8, Self::Error> {
        let mut value = [0u8];
        self.read_block(addr, &mut value)?;
        Ok(value[0])
    }

    /// Writes a single register.
    fn write_register(&mut self, addr: u16, value: u8) -> Result<(), Self::Error> {
        self.write_block(addr, &[value])
    }

    /// Reads `buf.len()` bytes starting at `addr`.
    fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `bytes` starting at `addr`.
    fn write_block(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error>;
}

impl<T: RegisterPort + ?Sized> RegisterPort for &mut T {
    type Error = T::Error;

    fn read_register(&mut self, addr: u16) -> Result<u8, Self::Error> {
        T::read_register(self, addr)
    }

    fn write_register(&mut self, addr: u16, value: u8) -> Result<(), Self::Error> {
        T::write_register(self, addr, value)
    }

    fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        T::read_block(self, addr, buf)
    }

    fn write_block(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        T::write_block(self, addr, bytes)
    }
}

/// Registers below this address are reachable with the one-byte short frame.
const SHORT_ADDRESS_LIMIT: u16 = 0x70;

/// [`RegisterPort`] over an SPI bus.
pub struct SpiPort<SPI> {
    spi: SPI,
}

impl<SPI> SpiPort<SPI> {
    /// Creates a new port wrapping the provided SPI device.
    ///
    /// # Arguments
    /// * `spi` - An SPI device implementing the embedded-hal traits. Chip select must be
    ///   managed by the device so that each transaction is one framed access.
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Releases the underlying SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }
}

/// Builds the address frame for an access.
///
/// Short frame: `W AAAAAAA`. Long frame: `W 111 AAAA`, `AAAAAAAA`.
fn address_frame(addr: u16, write: bool) -> ([u8; 2], usize) {
    let rw = if write { 0x80 } else { 0x00 };
    if addr < SHORT_ADDRESS_LIMIT {
        ([rw | (addr as u8 & 0x7F), 0x00], 1)
    } else {
        ([rw | 0x70 | ((addr >> 8) as u8 & 0x0F), addr as u8], 2)
    }
}

impl<SPI> RegisterPort for SpiPort<SPI>
where
    SPI: SpiDevice,
{
    type Error = SPI::Error;

    fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let (header, len) = address_frame(addr, false);

        self.spi.transaction(&mut [
            Operation::Write(&header[..len]),
            Operation::Read(buf),
        ])
    }

    fn write_block(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        let (header, len) = address_frame(addr, true);

        self.spi.transaction(&mut [
            Operation::Write(&header[..len]),
            Operation::Write(bytes),
        ])
    }
}

/// Typed interface to an AX5043 behind a [`RegisterPort`].
pub struct Device<P> {
    port: P,
}

impl<P> Device<P> {
    /// Creates a new Device instance wrapping the provided port.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Releases the underlying port.
    pub fn release(self) -> P {
        self.port
    }

    /// Shared access to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Exclusive access to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

impl<P> Device<P>
where
    P: RegisterPort,
{
    /// Reads a register value from the device.
    ///
    /// # Type Parameters
    /// * `R` - Register type implementing ReadableRegister with u16 ID
    ///
    /// # Errors
    /// * [`Error::Port`] - bus communication failed
    /// * [`HardwareError::UnexpectedValue`] - the device returned a value the register type
    ///   does not accept
    pub fn read_register<R>(&mut self) -> Result<R, Error<P::Error>>
    where
        R: ReadableRegister<IdType = u16>,
    {
        let mut raw_value = R::Array::new();

        self.port
            .read_block(R::id(), raw_value.as_mut())
            .map_err(Error::Port)?;

        let value = raw_value.as_ref().first().copied().unwrap_or_default();
        R::from_bytes(raw_value).map_err(|_| {
            Error::Hardware(HardwareError::UnexpectedValue {
                addr: R::id(),
                value,
            })
        })
    }

    /// Writes a value to a device register.
    ///
    /// # Arguments
    /// * `register` - The register value to write
    ///
    /// # Errors
    /// * [`Error::Port`] - bus communication failed
    pub fn write_register<R>(&mut self, register: R) -> Result<(), Error<P::Error>>
    where
        R: WritableRegister<IdType = u16, Error = Infallible>,
    {
        let raw_value = match register.to_bytes() {
            Ok(raw_value) => raw_value,
            Err(never) => match never {},
        };

        self.port
            .write_block(R::id(), raw_value.as_ref())
            .map_err(Error::Port)
    }

    /// Reads a single untyped register.
    pub fn read_u8(&mut self, addr: u16) -> Result<u8, Error<P::Error>> {
        self.port.read_register(addr).map_err(Error::Port)
    }

    /// Writes a single untyped register.
    pub fn write_u8(&mut self, addr: u16, value: u8) -> Result<(), Error<P::Error>> {
        self.port.write_register(addr, value).map_err(Error::Port)
    }

    /// Reads a big-endian 16-bit register pair.
    pub fn read_u16(&mut self, addr: u16) -> Result<u16, Error<P::Error>> {
        let mut raw = [0u8; 2];
        self.port.read_block(addr, &mut raw).map_err(Error::Port)?;
        Ok(u16::from_be_bytes(raw))
    }

    /// Reads a big-endian 24-bit register triple.
    pub fn read_u24(&mut self, addr: u16) -> Result<u32, Error<P::Error>> {
        let mut raw = [0u8; 4];
        self.port
            .read_block(addr, &mut raw[1..])
            .map_err(Error::Port)?;
        Ok(u32::from_be_bytes(raw))
    }

    /// Writes a big-endian 16-bit register pair.
    pub fn write_u16(&mut self, addr: u16, value: u16) -> Result<(), Error<P::Error>> {
        self.port
            .write_block(addr, &value.to_be_bytes())
            .map_err(Error::Port)
    }

    /// Writes the low 24 bits of `value` big-endian.
    pub fn write_u24(&mut self, addr: u16, value: u32) -> Result<(), Error<P::Error>> {
        self.port
            .write_block(addr, &value.to_be_bytes()[1..])
            .map_err(Error::Port)
    }

    /// Reads `buf.len()` bytes out of the FIFO.
    pub fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Error<P::Error>> {
        self.port
            .read_block(map::FIFODATA, buf)
            .map_err(Error::Port)
    }

    /// Pushes `bytes` into the FIFO. Nothing is transmitted until the data is committed.
    pub fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), Error<P::Error>> {
        self.port
            .write_block(map::FIFODATA, bytes)
            .map_err(Error::Port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_frame_for_low_addresses() {
        assert_eq!(address_frame(0x002, true), ([0x82, 0x00], 1));
        assert_eq!(address_frame(0x029, false), ([0x29, 0x00], 1));
    }

    #[test]
    fn test_long_frame_for_high_addresses() {
        assert_eq!(address_frame(0x0F35, true), ([0xFF, 0x35], 2));
        assert_eq!(address_frame(0x0100, false), ([0x71, 0x00], 2));
        assert_eq!(address_frame(0x0070, false), ([0x70, 0x70], 2));
    }
}
