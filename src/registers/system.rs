//! System-related registers
//!
//! This module contains registers for system-level control and status including:
//! - Interface probing (silicon revision, scratch)
//! - Power mode control and power status
//! - Interrupt requests
//! - Radio controller state and crystal status
//! - Signal strength readout
//!
//! See chapter 5.1-5.4 of the AX5043 programming manual.

use core::convert::Infallible;

use bitflags::bitflags;
use regiface::{register, FromByteArray, ReadableRegister, ToByteArray, WritableRegister};

/// Silicon revision register (address: 0x000)
///
/// Read-only identification of the die. Every AX5043 reads back [`SiliconRevision::AX5043`].
#[register(0x000u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SiliconRevision {
    pub value: u8,
}

impl SiliconRevision {
    /// Revision code of the AX5043
    pub const AX5043: u8 = 0x51;
}

/// Scratch register (address: 0x001)
///
/// Has no effect on the chip. Used to verify bus connectivity: the value written is the
/// value read back. Reset value is [`Scratch::RESET`].
#[register(0x001u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Scratch {
    pub value: u8,
}

impl Scratch {
    /// Value after power-on reset
    pub const RESET: u8 = 0xC5;
}

/// Error type for power mode conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPowerMode(pub u8);

/// Operating mode of the chip, the low nibble of PWRMODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    /// Everything off except the register file
    PowerDown,
    /// Register contents lost, only the wake pin works
    DeepSleep,
    /// Crystal and reference running
    Standby,
    /// FIFO accessible, modem off
    FifoOn,
    /// Receive synthesizer running
    SynthRx,
    /// Receiver running
    FullRx,
    /// Wake-on-radio receive
    WorRx,
    /// Transmit synthesizer running
    SynthTx,
    /// Transmitter running
    FullTx,
}

impl PowerMode {
    /// Convert a raw nibble to a PowerMode
    pub fn from_byte(value: u8) -> Result<Self, InvalidPowerMode> {
        match value & 0x0F {
            0x0 => Ok(Self::PowerDown),
            0x1 => Ok(Self::DeepSleep),
            0x5 => Ok(Self::Standby),
            0x7 => Ok(Self::FifoOn),
            0x8 => Ok(Self::SynthRx),
            0x9 => Ok(Self::FullRx),
            0xB => Ok(Self::WorRx),
            0xC => Ok(Self::SynthTx),
            0xD => Ok(Self::FullTx),
            invalid => Err(InvalidPowerMode(invalid)),
        }
    }

    /// Convert a PowerMode to its raw nibble
    pub fn to_byte(self) -> u8 {
        match self {
            Self::PowerDown => 0x0,
            Self::DeepSleep => 0x1,
            Self::Standby => 0x5,
            Self::FifoOn => 0x7,
            Self::SynthRx => 0x8,
            Self::FullRx => 0x9,
            Self::WorRx => 0xB,
            Self::SynthTx => 0xC,
            Self::FullTx => 0xD,
        }
    }
}

/// Power mode register (address: 0x002)
///
/// # Important Notes
/// - The reference and crystal enables are kept set by [`PwrMode::new`] so that the
///   oscillator keeps running across mode changes
/// - Writing with `reset` set holds the chip in reset until the bit is cleared again
#[register(0x002u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwrMode {
    pub mode: PowerMode,
    /// REFEN: reference enable
    pub reference: bool,
    /// XOEN: crystal oscillator enable
    pub crystal: bool,
    /// RST: chip reset
    pub reset: bool,
}

impl PwrMode {
    /// The given mode with reference and crystal enabled.
    pub fn new(mode: PowerMode) -> Self {
        Self {
            mode,
            reference: true,
            crystal: true,
            reset: false,
        }
    }

    /// Reset pulse, everything else cleared.
    pub fn reset() -> Self {
        Self {
            mode: PowerMode::PowerDown,
            reference: false,
            crystal: false,
            reset: true,
        }
    }
}

bitflags! {
    /// Power status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PowerStatus: u8 {
        /// Summary ready status
        const SSUM = 1 << 7;
        /// Power-on reset released
        const SREF = 1 << 6;
        /// Reference voltage ready
        const SVREF = 1 << 5;
        /// Analog domain supply ready
        const SVANA = 1 << 4;
        /// Modem domain supply ready
        const SVMODEM = 1 << 3;
        /// Analog brown-out
        const SBEVANA = 1 << 2;
        /// Modem brown-out
        const SBEVMODEM = 1 << 1;
        /// IO supply ready
        const SVIO = 1 << 0;
    }
}

/// Power status register (address: 0x003)
#[register(0x003u16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct PowStat {
    pub status: PowerStatus,
}

bitflags! {
    /// Interrupt request flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Irq: u16 {
        const FIFO_NOT_EMPTY = 1 << 0;
        const FIFO_NOT_FULL = 1 << 1;
        const FIFO_THR_COUNT = 1 << 2;
        const FIFO_THR_FREE = 1 << 3;
        const FIFO_ERROR = 1 << 4;
        const PLL_UNLOCK = 1 << 5;
        const RADIO_CONTROLLER = 1 << 6;
        const POWER = 1 << 7;
        const XTAL_READY = 1 << 8;
        /// The wake timer reached WAKEUP
        const WAKEUP_TIMER = 1 << 9;
        const LPOSC = 1 << 10;
        const GPADC = 1 << 11;
        const PLL_RANGING_DONE = 1 << 12;
    }
}

/// Interrupt request register (address: 0x00C)
#[register(0x00Cu16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct IrqRequest {
    pub pending: Irq,
}

/// Error type for radio state conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRadioState(pub u8);

/// Radio controller state, the low nibble of RADIOSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioState {
    Idle,
    PowerDown,
    TxPllSettling,
    Tx,
    TxTail,
    RxPllSettling,
    RxAntennaSelection,
    RxPreamble1,
    RxPreamble2,
    RxPreamble3,
    Rx,
}

impl RadioState {
    /// Convert a raw nibble to a RadioState
    pub fn from_byte(value: u8) -> Result<Self, InvalidRadioState> {
        match value & 0x0F {
            0x0 => Ok(Self::Idle),
            0x1 => Ok(Self::PowerDown),
            0x4 => Ok(Self::TxPllSettling),
            0x6 => Ok(Self::Tx),
            0x7 => Ok(Self::TxTail),
            0x8 => Ok(Self::RxPllSettling),
            0x9 => Ok(Self::RxAntennaSelection),
            0xC => Ok(Self::RxPreamble1),
            0xD => Ok(Self::RxPreamble2),
            0xE => Ok(Self::RxPreamble3),
            0xF => Ok(Self::Rx),
            invalid => Err(InvalidRadioState(invalid)),
        }
    }

    /// True while the transmitter is keyed or about to be.
    pub fn is_transmitting(self) -> bool {
        matches!(self, Self::TxPllSettling | Self::Tx | Self::TxTail)
    }

    /// True once the receiver has matched a preamble or sync word.
    pub fn is_receiving(self) -> bool {
        matches!(
            self,
            Self::RxPreamble2 | Self::RxPreamble3 | Self::Rx
        )
    }
}

/// Radio controller state register (address: 0x01C)
#[register(0x01Cu16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct RadioStateRegister {
    pub state: RadioState,
}

/// Crystal oscillator status register (address: 0x01D)
#[register(0x01Du16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct XtalStatus {
    /// XTALRUN: oscillator running and stable
    pub running: bool,
}

/// Received signal strength register (address: 0x040)
///
/// Two's complement dB value of the current receive signal strength.
#[register(0x040u16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct Rssi {
    pub value: i8,
}

/// Background noise RSSI register (address: 0x041)
#[register(0x041u16)]
#[derive(Debug, Clone, Copy, ReadableRegister)]
pub struct BackgroundRssi {
    pub value: u8,
}

/// Packet address configuration register (address: 0x200)
#[register(0x200u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister, Default)]
pub struct PktAddrCfg {
    /// MSB_FIRST: bit order of the packet bytes on air
    pub msb_first: bool,
    /// CRC_SKIP_FIRST: exclude the first byte from the CRC
    pub crc_skip_first: bool,
    /// FEC_SYNC_DIS: disable FEC sync search during the packet
    pub fec_sync_disable: bool,
    /// Position of the address byte within the packet
    pub address_position: u8,
}

impl FromByteArray for SiliconRevision {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self { value: bytes[0] })
    }
}

impl FromByteArray for Scratch {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self { value: bytes[0] })
    }
}

impl ToByteArray for Scratch {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.value])
    }
}

impl FromByteArray for PwrMode {
    type Error = InvalidPowerMode;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            mode: PowerMode::from_byte(bytes[0])?,
            reference: bytes[0] & 0x40 != 0,
            crystal: bytes[0] & 0x20 != 0,
            reset: bytes[0] & 0x80 != 0,
        })
    }
}

impl ToByteArray for PwrMode {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        let mut value = self.mode.to_byte();
        if self.reference {
            value |= 0x40;
        }
        if self.crystal {
            value |= 0x20;
        }
        if self.reset {
            value |= 0x80;
        }
        Ok([value])
    }
}

impl FromByteArray for PowStat {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            status: PowerStatus::from_bits_retain(bytes[0]),
        })
    }
}

impl FromByteArray for IrqRequest {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            pending: Irq::from_bits_retain(u16::from_be_bytes(bytes)),
        })
    }
}

impl FromByteArray for RadioStateRegister {
    type Error = InvalidRadioState;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            state: RadioState::from_byte(bytes[0])?,
        })
    }
}

impl FromByteArray for XtalStatus {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            running: bytes[0] & 0x01 != 0,
        })
    }
}

impl FromByteArray for Rssi {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            value: bytes[0] as i8,
        })
    }
}

impl FromByteArray for BackgroundRssi {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self { value: bytes[0] })
    }
}

impl FromByteArray for PktAddrCfg {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            msb_first: bytes[0] & 0x80 != 0,
            crc_skip_first: bytes[0] & 0x40 != 0,
            fec_sync_disable: bytes[0] & 0x20 != 0,
            address_position: bytes[0] & 0x0F,
        })
    }
}

impl ToByteArray for PktAddrCfg {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        let mut value = self.address_position & 0x0F;
        if self.msb_first {
            value |= 0x80;
        }
        if self.crc_skip_first {
            value |= 0x40;
        }
        if self.fec_sync_disable {
            value |= 0x20;
        }
        Ok([value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pwrmode_keeps_oscillator_enables() {
        assert_eq!(PwrMode::new(PowerMode::FullTx).to_bytes(), Ok([0x6D]));
        assert_eq!(PwrMode::new(PowerMode::PowerDown).to_bytes(), Ok([0x60]));
        assert_eq!(PwrMode::reset().to_bytes(), Ok([0x80]));
    }

    #[test]
    fn test_pwrmode_rejects_reserved_modes() {
        assert_eq!(PwrMode::from_bytes([0x62]), Err(InvalidPowerMode(0x2)));
        assert_eq!(
            PwrMode::from_bytes([0x69]).map(|p| p.mode),
            Ok(PowerMode::FullRx)
        );
    }

    #[test]
    fn test_radio_state_classification() {
        assert!(RadioState::from_byte(0x06).is_ok_and(RadioState::is_transmitting));
        assert!(RadioState::from_byte(0x0F).is_ok_and(RadioState::is_receiving));
        assert!(!RadioState::Idle.is_transmitting());
        assert_eq!(RadioState::from_byte(0x02), Err(InvalidRadioState(0x02)));
    }
}
