#![cfg_attr(not(any(test, feature = "mock")), no_std)]
//! AX5043 Radio Driver
//!
//! This crate provides a type-safe interface for the ON Semiconductor AX5043 narrowband
//! sub-GHz transceiver. The AX5043 is a register-programmed radio with a built-in packet
//! framer, an on-chip FIFO and a low power wake timer for duty-cycled reception.
//!
//! # Features
//! - Frequency range: 27-1050 MHz, two synthesizers (A for transmit, B for receive)
//! - Modulation support: FSK, GFSK, MSK, GMSK, ASK, PSK, AFSK
//! - Framing: HDLC, raw pattern match, optional length byte, convolutional FEC
//! - Hardware VCO range sweep, re-run automatically after large frequency moves
//! - Wake-on-radio reception on the 640 Hz low power oscillator
//!
//! # Architecture
//! The driver is organized into several modules:
//!
//! - [`device`]: register access
//!   - [`RegisterPort`] is the byte-level transport, [`SpiPort`] implements it over SPI
//!   - [`Device`] adds typed register access
//!
//! - [`registers`]: typed registers and the raw address map
//!
//! - [`config`]: board configuration and modulation presets
//!
//! - [`planner`]: turns configuration into register values, validating everything before
//!   a single register is written
//!
//! - [`synth`]: frequency registers and VCO ranging
//!
//! - [`packet`]: FIFO chunk framing, transmit and receive
//!
//! - [`wakeup`]: wake timer and duty cycle
//!
//! - [`driver`]: [`Transceiver`], the mode-checked front end tying the above together
//!
//! # Usage
//! The driver uses the `regiface` crate for typed registers. Most applications only need
//! [`Transceiver`]:
//!
//! 1. Create a [`Transceiver`] from a port, a delay provider, a [`config::RadioConfig`] and
//!    a [`config::ModulationParameters`] preset
//! 2. Call [`Transceiver::init`] and check the returned [`InitStatus`]
//! 3. `tx_on` then `tx_packet`, or `rx_on` then `rx_packet` in a loop
//! 4. For duty-cycled reception, `rx_wake_on_radio` then `poll_wake_on_radio`
//!
//! # Important Notes
//! - Blocking operations take a [`wait::Cancel`] signal; pass [`wait::Never`] to wait for
//!   the full timeout
//! - Every error leaves the chip in a known state, see [`Error`]
//! - Enable the `mock` feature for [`mock::SimRadio`], a simulated chip for host tests
//!
//! # Example
//! ```no_run
//! use embedded_hal::{delay::DelayNs, spi::SpiDevice};
//! use ax5043::{config::{ModulationParameters, RadioConfig}, wait::Never};
//! use ax5043::{Error, InitStatus, SpiPort, Transceiver};
//!
//! fn beacon<SPI: SpiDevice, D: DelayNs>(spi: SPI, delay: D) -> Result<(), Error<SPI::Error>> {
//!     let config = RadioConfig::default().with_frequency(435_000_000);
//!     let mut radio =
//!         Transceiver::new(SpiPort::new(spi), delay, config, ModulationParameters::gmsk())?;
//!
//!     if !radio.init().is_ok() {
//!         return Err(Error::InvalidState);
//!     }
//!     radio.tx_on(&Never)?;
//!     radio.tx_packet(b"hello", &Never)?;
//!     radio.off()
//! }
//! ```

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod packet;
pub mod planner;
pub mod registers;
pub mod synth;
pub mod wait;
pub mod wakeup;

pub use device::{Device, RegisterPort, SpiPort};
pub use driver::{DeviceMode, Transceiver};
pub use error::{ConfigurationError, Error, HardwareError, InitStatus};
pub use packet::{EngineState, Packet};
pub use wakeup::{WakeState, WorEvent};
