//! Wake timer and low power oscillator registers
//!
//! The wake timer counts low power oscillator ticks. With the oscillator in its 640 Hz mode
//! one tick is 1.5625 ms. When the counter reaches WAKEUP the chip raises the wakeup
//! interrupt and, in wake-on-radio mode, starts listening. WAKEUP is then reloaded with
//! itself plus WAKEUPFREQ.

use core::convert::Infallible;

use bitflags::bitflags;
use regiface::{register, FromByteArray, ReadableRegister, ToByteArray, WritableRegister};

/// Low power oscillator frequency in its slow mode
pub const LPOSC_HZ: u32 = 640;

/// Wake timer counter (address: 0x068)
#[register(0x068u16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct WakeupTimer {
    pub ticks: u16,
}

/// Next wakeup time (address: 0x06A)
#[register(0x06Au16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct Wakeup {
    pub ticks: u16,
}

/// Wakeup period (address: 0x06C)
///
/// Added to WAKEUP every time the timer fires. Zero disables the reload.
#[register(0x06Cu16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct WakeupFreq {
    pub ticks: u16,
}

/// Crystal oscillator early start (address: 0x06E)
///
/// Number of ticks ahead of WAKEUP at which the crystal oscillator is started.
#[register(0x06Eu16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct WakeupXoEarly {
    pub ticks: u8,
}

bitflags! {
    /// Low power oscillator configuration
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LposcFlags: u8 {
        const ENABLE = 1 << 0;
        /// 10.24 kHz instead of 640 Hz
        const FAST = 1 << 1;
        const IRQ_RISING = 1 << 2;
        const IRQ_FALLING = 1 << 3;
        /// Calibrate against the crystal on falling edges
        const CALIBRATE_FALLING = 1 << 4;
        /// Calibrate against the crystal on rising edges
        const CALIBRATE_RISING = 1 << 5;
        const DOUBLE = 1 << 6;
        const INVERT = 1 << 7;
    }
}

/// Low power oscillator configuration (address: 0x310)
#[register(0x310u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct LposcConfig {
    pub flags: LposcFlags,
}

impl FromByteArray for WakeupTimer {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            ticks: u16::from_be_bytes(bytes),
        })
    }
}

impl FromByteArray for Wakeup {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            ticks: u16::from_be_bytes(bytes),
        })
    }
}

impl ToByteArray for Wakeup {
    type Error = Infallible;
    type Array = [u8; 2];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.ticks.to_be_bytes())
    }
}

impl FromByteArray for WakeupFreq {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            ticks: u16::from_be_bytes(bytes),
        })
    }
}

impl ToByteArray for WakeupFreq {
    type Error = Infallible;
    type Array = [u8; 2];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.ticks.to_be_bytes())
    }
}

impl FromByteArray for WakeupXoEarly {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self { ticks: bytes[0] })
    }
}

impl ToByteArray for WakeupXoEarly {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.ticks])
    }
}

impl FromByteArray for LposcConfig {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            flags: LposcFlags::from_bits_retain(bytes[0]),
        })
    }
}

impl ToByteArray for LposcConfig {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.flags.bits()])
    }
}
