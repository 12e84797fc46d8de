//! Driver error taxonomy
//!
//! Every fallible operation returns [`Error<E>`], where `E` is the error type of the
//! [`RegisterPort`](crate::RegisterPort) the driver runs on. The variants separate bus
//! failures from configuration mistakes detected before any write, hardware states the
//! caller has to recover from, and calls made in the wrong mode.

use core::fmt;

use crate::config::Channel;

/// Top level driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// The register port failed. Propagated immediately, the driver never retries.
    Port(E),
    /// Invalid parameter combination. Raised before any register is written.
    Configuration(ConfigurationError),
    /// The device reported a condition the caller has to recover from, usually with
    /// `fifo_clear` or `force_off`.
    Hardware(HardwareError),
    /// The operation is not valid in the current device mode or engine state.
    InvalidState,
    /// A blocking operation was cancelled. The device was brought back to a safe state first.
    Cancelled,
}

impl<E> Error<E> {
    /// Maps the port error type, leaving every other variant untouched.
    pub fn map_port<F>(self, f: impl FnOnce(E) -> F) -> Error<F> {
        match self {
            Error::Port(e) => Error::Port(f(e)),
            Error::Configuration(e) => Error::Configuration(e),
            Error::Hardware(e) => Error::Hardware(e),
            Error::InvalidState => Error::InvalidState,
            Error::Cancelled => Error::Cancelled,
        }
    }

    /// True for bus-level failures.
    pub fn is_port(&self) -> bool {
        matches!(self, Error::Port(_))
    }
}

impl<E> From<ConfigurationError> for Error<E> {
    fn from(value: ConfigurationError) -> Self {
        Error::Configuration(value)
    }
}

impl<E> From<HardwareError> for Error<E> {
    fn from(value: HardwareError) -> Self {
        Error::Hardware(value)
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Port(e) => write!(f, "register port failure: {e:?}"),
            Error::Configuration(e) => write!(f, "invalid configuration: {e}"),
            Error::Hardware(e) => write!(f, "hardware error: {e}"),
            Error::InvalidState => f.write_str("operation not valid in the current mode"),
            Error::Cancelled => f.write_str("operation cancelled"),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for Error<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Port(_) => defmt::write!(fmt, "Port"),
            Error::Configuration(e) => defmt::write!(fmt, "Configuration({})", e),
            Error::Hardware(e) => defmt::write!(fmt, "Hardware({})", e),
            Error::InvalidState => defmt::write!(fmt, "InvalidState"),
            Error::Cancelled => defmt::write!(fmt, "Cancelled"),
        }
    }
}

/// Parameter combinations the device cannot realise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigurationError {
    /// Synthesizer frequency outside 27 MHz..=1050 MHz
    FrequencyOutOfRange(u32),
    /// Bitrate outside the range supported by the modem
    BitrateOutOfRange(u32),
    /// Crystal frequency the divider and reference logic cannot handle
    CrystalOutOfRange(u32),
    /// The channel filter required by bitrate and deviation is wider than the decimator allows
    BandwidthTooWide,
    /// FSK modulation index negative or not a number
    InvalidModulationIndex,
    /// AFSK deviation, mark or space frequency is zero
    InvalidAfskTones,
    /// FSK deviation does not fit the FSKDEV register
    DeviationTooLarge,
    /// TX power fraction outside 0.0..=1.0
    PowerOutOfRange,
    /// Payload longer than the operation accepts
    PayloadTooLong(usize),
    /// Wake period or XO early time cannot be represented by the 640 Hz wake timer
    WakeTimerMisconfigured,
    /// Crystal load capacitance not representable in XTALCAP
    LoadCapacitance(u8),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrequencyOutOfRange(hz) => write!(f, "frequency {hz} Hz outside device range"),
            Self::BitrateOutOfRange(bps) => write!(f, "bitrate {bps} bps not supported"),
            Self::CrystalOutOfRange(hz) => write!(f, "crystal frequency {hz} Hz not supported"),
            Self::BandwidthTooWide => f.write_str("channel bandwidth exceeds decimator range"),
            Self::InvalidModulationIndex => f.write_str("invalid FSK modulation index"),
            Self::InvalidAfskTones => f.write_str("AFSK deviation, mark and space must be non-zero"),
            Self::DeviationTooLarge => f.write_str("FSK deviation does not fit FSKDEV"),
            Self::PowerOutOfRange => f.write_str("TX power must be within 0.0..=1.0"),
            Self::PayloadTooLong(len) => write!(f, "payload of {len} bytes too long"),
            Self::WakeTimerMisconfigured => f.write_str("wake period not resolvable by the wake timer"),
            Self::LoadCapacitance(pf) => write!(f, "load capacitance {pf} pF not supported"),
        }
    }
}

/// What a bounded wait was waiting for when it timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitTarget {
    /// Crystal oscillator start-up
    Oscillator,
    /// Modem supply (POWSTAT.SVMODEM)
    ModemPower,
    /// Free space in the FIFO
    FifoSpace,
    /// Hardware VCO range sweep
    Ranging,
    /// Transmitter leaving the TX states
    TxIdle,
}

/// Why a received frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    /// CRC check failed
    Crc,
    /// Length byte outside the configured limits
    Size,
    /// Reception aborted by the framer
    Aborted,
    /// The frame outgrew the receive buffer
    Oversize,
}

/// Conditions reported by the device that leave it in a state the caller must resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HardwareError {
    /// The VCO range sweep of the given synthesizer found no range that locks
    RangingFailed(Channel),
    /// The FIFO under- or overflowed while a frame was being written
    TxUnderflow,
    /// Transmission did not complete within the deadline derived from frame length and bitrate
    TxTimeout,
    /// The framer flagged the received frame. Its bytes were discarded.
    FrameRejected(RejectReason),
    /// A bounded wait expired
    Timeout(WaitTarget),
    /// A register held a value its type does not describe
    UnexpectedValue {
        /// Register address
        addr: u16,
        /// First byte read
        value: u8,
    },
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RangingFailed(channel) => write!(f, "VCO ranging failed on synthesizer {channel:?}"),
            Self::TxUnderflow => f.write_str("FIFO underflow during transmit"),
            Self::TxTimeout => f.write_str("transmit did not complete in time"),
            Self::FrameRejected(reason) => write!(f, "received frame rejected ({reason:?})"),
            Self::Timeout(target) => write!(f, "timed out waiting for {target:?}"),
            Self::UnexpectedValue { addr, value } => {
                write!(f, "unexpected value {value:#04x} in register {addr:#05x}")
            }
        }
    }
}

/// Outcome of [`Transceiver::init`](crate::Transceiver::init).
///
/// Any value other than [`InitStatus::Ok`] leaves the driver uninitialized. The device must
/// not be used for TX or RX until `init` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitStatus {
    /// Device probed, configured and ranged
    Ok,
    /// The scratch register could not be read
    PortFailed,
    /// The scratch register did not return the pattern written to it
    BadScratch,
    /// Silicon revision is not an AX5043
    BadRevision,
    /// Writing the baseline register set failed
    SetSpiFailed,
    /// VCO ranging did not lock on a configured synthesizer
    VcoRangingFailed,
}

impl InitStatus {
    /// True for [`InitStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == InitStatus::Ok
    }
}
