//! FIFO registers
//!
//! The AX5043 moves packet data through a 256 byte FIFO organised in chunks (see
//! [`crate::packet::chunk`]). FIFOSTAT doubles as the FIFO command register: reads return
//! status, writes issue a [`FifoCmd`].

use core::convert::Infallible;

use bitflags::bitflags;
use regiface::{register, FromByteArray, ReadableRegister, ToByteArray, WritableRegister};

/// FIFO size in bytes
pub const FIFO_CAPACITY: u16 = 256;

bitflags! {
    /// FIFO status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FifoStatus: u8 {
        const EMPTY = 1 << 0;
        const FULL = 1 << 1;
        /// Read from an empty FIFO, or the transmitter ran dry mid-frame
        const UNDERFLOW = 1 << 2;
        /// Write to a full FIFO
        const OVERFLOW = 1 << 3;
        const COUNT_THRESHOLD = 1 << 4;
        const FREE_THRESHOLD = 1 << 5;
        const AUTO_COMMIT = 1 << 7;
    }
}

impl FifoStatus {
    /// Under- or overflow since the last clear
    pub fn has_error(self) -> bool {
        self.intersects(Self::UNDERFLOW | Self::OVERFLOW)
    }
}

/// FIFO status register (address: 0x028, read)
#[register(0x028u16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct FifoStat {
    pub status: FifoStatus,
}

/// FIFO command register (address: 0x028, write)
#[register(0x028u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, WritableRegister)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FifoCmd {
    /// No operation
    Nop,
    /// Report the error flags
    AskErrors,
    /// Clear the error flags
    ClearErrors,
    /// Drop FIFO contents and clear the error flags
    ClearData,
    /// Commit everything written so far; the transmitter may start on it
    Commit,
    /// Drop everything written since the last commit
    Rollback,
}

/// FIFO fill level register (address: 0x02A)
#[register(0x02Au16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct FifoCount {
    pub count: u16,
}

/// FIFO free space register (address: 0x02C)
#[register(0x02Cu16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct FifoFree {
    pub free: u16,
}

impl FromByteArray for FifoStat {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            status: FifoStatus::from_bits_retain(bytes[0]),
        })
    }
}

impl ToByteArray for FifoCmd {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([match self {
            Self::Nop => 0x00,
            Self::AskErrors => 0x01,
            Self::ClearErrors => 0x02,
            Self::ClearData => 0x03,
            Self::Commit => 0x04,
            Self::Rollback => 0x05,
        }])
    }
}

impl FromByteArray for FifoCount {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            count: u16::from_be_bytes(bytes) & 0x01FF,
        })
    }
}

impl FromByteArray for FifoFree {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            free: u16::from_be_bytes(bytes) & 0x01FF,
        })
    }
}
