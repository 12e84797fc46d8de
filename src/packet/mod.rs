//! Packet engine
//!
//! Moves frames through the FIFO in both directions and tracks where a transfer stands:
//!
//! ```text
//!            tx_on                tx_packet
//!   Idle ───────────▶ TxArmed ───────────▶ TxInProgress ───▶ Idle
//!     │                  ▲ tx_beacon / tx_1k_zeros │
//!     │                  └─────────────────────────┘
//!     │  rx_on                rx_packet (partial frame)
//!     └───────────▶ RxArmed ◀──────────────────────▶ RxDataPending
//! ```
//!
//! `fifo_clear` returns to `Idle` from anywhere. Any failure while the FIFO holds part of
//! a frame clears it, so the engine never resumes a half-written or half-read frame.

pub mod chunk;

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

use crate::config::{ModulationParameters, PatternMatchParameters, RadioConfig, StoreFlags, Timeouts};
use crate::device::{Device, RegisterPort};
use crate::error::{ConfigurationError, Error, HardwareError, RejectReason, WaitTarget};
use crate::planner::{apply_rx, apply_shared, apply_tx, RegisterPlan};
use crate::registers::{
    FifoCmd, FifoCount, FifoFree, FifoStat, FifoStatus, PktAddrCfg, PowStat, PowerMode,
    PowerStatus, PwrMode, RadioStateRegister, XtalStatus,
};
use crate::synth::SynthesizerState;
use crate::wait::{into_error, Cancel, Poll, WaitError};

use chunk::{data_header, read_chunk, repeat_data, RxChunk, RxFlags, TxFlags};

/// Largest frame the engine sends or reassembles
pub const MAX_PACKET_LEN: usize = 512;
/// Largest frame when a length byte leads the payload
pub const MAX_LENGTH_BYTE_PAYLOAD: usize = 254;
/// Payload bytes per transmit DATA chunk
pub const TX_CHUNK_LEN: usize = 200;
/// Largest beacon payload, one chunk
pub const MAX_BEACON_LEN: usize = TX_CHUNK_LEN;

/// Zero bytes sent by [`PacketEngine::tx_1k_zeros`], 1000 bits
const ZEROS_LEN: u8 = 125;
/// CRC-32 is the longest checksum the framer appends
const MAX_CRC_LEN: u64 = 4;

/// Where the engine stands in a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    /// Nothing armed
    Idle,
    /// Transmit registers loaded, chip in FULLTX
    TxArmed,
    /// A frame is being pushed through the FIFO
    TxInProgress,
    /// Receive registers loaded, chip receiving
    RxArmed,
    /// Part of a frame has been read out of the FIFO
    RxDataPending,
}

/// A received frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Payload, without the length byte
    pub data: heapless::Vec<u8, MAX_PACKET_LEN>,
    /// RSSI in dB
    pub rssi: Option<i8>,
    /// RF frequency offset in frequency register units
    pub rf_frequency_offset: Option<i32>,
    /// Baseband frequency offset
    pub frequency_offset: Option<i16>,
    /// Wake timer value when the frame arrived
    pub timer: Option<u32>,
    /// Receiver data rate estimate, RXDATARATE units
    pub data_rate: Option<u32>,
}

impl Packet {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// On-air layout of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameFormat {
    pub hdlc: bool,
    pub fec: bool,
    /// A length byte leads the payload
    pub length_byte: bool,
    /// Sent after the preamble unless framing is HDLC, least significant byte first
    pub sync_word: u32,
    pub bitrate: u32,
}

impl FrameFormat {
    pub fn new(modulation: &ModulationParameters, pattern: &PatternMatchParameters) -> Self {
        Self {
            hdlc: modulation.effective_framing() == crate::config::FramingMode::Hdlc,
            fec: modulation.fec,
            length_byte: modulation.has_length_byte(),
            sync_word: pattern.sync_word.unwrap_or(PatternMatchParameters::SYNC_WORD),
            bitrate: modulation.bitrate,
        }
    }

    fn preamble(&self) -> [u8; 4] {
        let flags = TxFlags::UNENC | TxFlags::RAW | TxFlags::NOCRC;
        match (self.hdlc, self.fec) {
            // the FEC decoder synchronises on HDLC flags
            (true, true) => repeat_data(flags, 9, 0x7E),
            (true, false) => repeat_data(flags, 9, 0xAA),
            (false, _) => repeat_data(flags, 4, 0xAA),
        }
    }

    /// FIFO bytes in front of the first payload chunk
    fn head_len(&self) -> usize {
        let sync = if self.hdlc { 0 } else { 3 + 4 };
        4 + sync + 3 + usize::from(self.length_byte)
    }

    /// Bits on air for a frame of `payload` bytes
    fn air_bits(&self, payload: usize) -> u64 {
        let preamble = if self.hdlc { 9 } else { 4 + 4 };
        let bits = (preamble + u64::from(self.length_byte) + payload as u64 + MAX_CRC_LEN) * 8;
        if self.fec {
            bits * 2
        } else {
            bits
        }
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(&ModulationParameters::default(), &PatternMatchParameters::default())
    }
}

bitflags! {
    /// Parts of a frame seen so far
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct Parts: u8 {
        const DATA = 1 << 0;
        const TIMER = 1 << 1;
        const FREQUENCY_OFFSET = 1 << 2;
        const RF_FREQUENCY_OFFSET = 1 << 3;
        const DATARATE = 1 << 4;
        const RSSI = 1 << 5;
    }
}

impl Parts {
    /// Everything PKTSTOREFLAGS makes the chip append
    fn required(store: StoreFlags) -> Self {
        let mut parts = Parts::DATA;
        for (flag, part) in [
            (StoreFlags::TIMER, Parts::TIMER),
            (StoreFlags::FREQUENCY_OFFSET, Parts::FREQUENCY_OFFSET),
            (StoreFlags::RF_FREQUENCY_OFFSET, Parts::RF_FREQUENCY_OFFSET),
            (StoreFlags::DATARATE, Parts::DATARATE),
            (StoreFlags::RSSI, Parts::RSSI),
        ] {
            if store.contains(flag) {
                parts |= part;
            }
        }
        parts
    }
}

#[derive(Debug, Clone, Default)]
struct Reassembly {
    packet: Packet,
    parts: Parts,
    in_frame: bool,
}

impl Reassembly {
    fn mark(&mut self, part: Parts) {
        self.parts |= part;
    }
}

/// FIFO-level transmit and receive state machine.
#[derive(Debug, Clone)]
pub struct PacketEngine {
    state: EngineState,
    format: FrameFormat,
    required: Parts,
    timeouts: Timeouts,
    rx: Reassembly,
}

impl PacketEngine {
    pub fn new(config: &RadioConfig, format: FrameFormat) -> Self {
        Self {
            state: EngineState::Idle,
            format,
            required: Parts::required(config.store_flags),
            timeouts: config.timeouts,
            rx: Reassembly::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    /// Switches the frame layout used by later transfers.
    pub fn set_format(&mut self, format: FrameFormat) {
        self.format = format;
    }

    /// Metadata the chip stores with received frames. A frame is only handed out once all
    /// of it has arrived.
    pub fn set_store_flags(&mut self, store: StoreFlags) {
        self.required = Parts::required(store);
    }

    /// Forgets any transfer in progress without touching the device.
    pub(crate) fn reset(&mut self) {
        self.state = EngineState::Idle;
        self.rx = Reassembly::default();
    }

    /// Marks the receiver live after wake-on-radio found activity.
    pub(crate) fn listen(&mut self) {
        self.rx = Reassembly::default();
        self.state = EngineState::RxArmed;
    }

    /// Loads the transmit registers and starts the transmitter.
    ///
    /// Writes the shared and transmit-only parts of `plan`, clears the FIFO, switches to
    /// FULLTX and waits for the crystal.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - synthesizer A is not ranged, or a received frame is half
    ///   read
    /// * [`HardwareError::Timeout`] - the crystal did not start; the chip was powered down
    /// * [`Error::Cancelled`] - `cancel` fired; the chip was powered down
    /// * [`Error::Port`] - bus communication failed
    pub fn tx_on<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        plan: &RegisterPlan,
        synth: &SynthesizerState,
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        match self.state {
            EngineState::Idle | EngineState::TxArmed | EngineState::RxArmed => {}
            EngineState::TxInProgress | EngineState::RxDataPending => {
                return Err(Error::InvalidState)
            }
        }
        if !synth.a.is_locked() {
            return Err(Error::InvalidState);
        }

        apply_shared(device, plan)?;
        apply_tx(device, plan)?;
        device.write_register(FifoCmd::ClearData)?;
        device.write_register(PwrMode::new(PowerMode::FullTx))?;
        self.reset();

        let oscillator = self
            .timeouts
            .oscillator
            .poll(delay, cancel, || {
                Ok(device.read_register::<XtalStatus>()?.running.then_some(()))
            })
            .map_err(into_error::<P::Error>(WaitTarget::Oscillator));
        if let Err(e) = oscillator {
            // never leave the transmitter enabled without an armed engine
            return Err(self.shutdown(device, e));
        }

        log::debug!("ax::tx armed");
        self.state = EngineState::TxArmed;
        Ok(())
    }

    /// Loads the receive registers and starts the receiver.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - synthesizer B is not ranged, or a frame is being sent
    /// * [`Error::Port`] - bus communication failed
    pub fn rx_on<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
        plan: &RegisterPlan,
        synth: &SynthesizerState,
    ) -> Result<(), Error<P::Error>> {
        match self.state {
            EngineState::Idle | EngineState::TxArmed | EngineState::RxArmed => {}
            EngineState::TxInProgress | EngineState::RxDataPending => {
                return Err(Error::InvalidState)
            }
        }
        if !synth.b.is_locked() {
            return Err(Error::InvalidState);
        }

        apply_shared(device, plan)?;
        apply_rx(device, plan)?;
        device.write_register(PwrMode::new(PowerMode::FullRx))?;
        device.write_register(FifoCmd::ClearData)?;

        log::debug!("ax::rx armed");
        self.listen();
        Ok(())
    }

    /// Sends one frame and waits until it has left the antenna.
    ///
    /// The preamble and, unless framing is HDLC, the sync word go out raw. A length byte
    /// is prepended for variable-length framing. The payload follows in chunks of at most
    /// [`TX_CHUNK_LEN`] bytes, each committed as soon as the FIFO has room for it.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - not armed for transmit; the FIFO is not touched
    /// * [`ConfigurationError::PayloadTooLong`]
    /// * [`HardwareError::TxUnderflow`] - the FIFO ran dry or overflowed mid-frame
    /// * [`HardwareError::TxTimeout`] - the frame did not go out within twice its air time
    ///   plus the configured margin
    /// * [`HardwareError::Timeout`] - the modem supply or FIFO space never came
    /// * [`Error::Cancelled`] - `cancel` fired; the chip was powered down
    ///
    /// Every failure after the first FIFO write clears the FIFO and leaves the engine
    /// [`EngineState::Idle`].
    pub fn tx_packet<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        payload: &[u8],
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        if self.state != EngineState::TxArmed {
            return Err(Error::InvalidState);
        }
        let max = if self.format.length_byte {
            MAX_LENGTH_BYTE_PAYLOAD
        } else {
            MAX_PACKET_LEN
        };
        if payload.len() > max {
            return Err(ConfigurationError::PayloadTooLong(payload.len()).into());
        }

        self.state = EngineState::TxInProgress;
        match self.write_frame(device, delay, cancel, payload) {
            Ok(()) => {
                log::debug!("ax::tx sent {} bytes", payload.len());
                self.state = EngineState::Idle;
                Ok(())
            }
            Err(e) => Err(self.recover(device, e)),
        }
    }

    fn write_frame<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        payload: &[u8],
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        let format = self.format;
        self.wait_modem_power(device, delay, cancel)?;

        let (first, rest) = payload.split_at(payload.len().min(TX_CHUNK_LEN));
        let mut flags = TxFlags::PKTSTART;
        if rest.is_empty() {
            flags |= TxFlags::PKTEND;
        }

        self.wait_fifo_space(device, delay, cancel, format.head_len() + first.len())?;
        device.write_fifo(&format.preamble())?;
        if !format.hdlc {
            device.write_fifo(&data_header(TxFlags::RAW | TxFlags::NOCRC, 4))?;
            device.write_fifo(&format.sync_word.to_le_bytes())?;
        }
        if format.length_byte {
            device.write_fifo(&data_header(flags, first.len() + 1))?;
            device.write_fifo(&[(payload.len() + 1) as u8])?;
        } else {
            device.write_fifo(&data_header(flags, first.len()))?;
        }
        if !first.is_empty() {
            device.write_fifo(first)?;
        }
        Self::commit_checked(device)?;

        let mut chunks = rest.chunks(TX_CHUNK_LEN).peekable();
        while let Some(chunk) = chunks.next() {
            let flags = if chunks.peek().is_none() {
                TxFlags::PKTEND
            } else {
                TxFlags::empty()
            };
            self.wait_fifo_space(device, delay, cancel, 3 + chunk.len())?;
            device.write_fifo(&data_header(flags, chunk.len()))?;
            device.write_fifo(chunk)?;
            Self::commit_checked(device)?;
        }

        self.wait_tx_done(device, delay, cancel, format.air_bits(payload.len()))
    }

    /// Sends `payload` raw, most significant bit first, bypassing framer and encoder.
    ///
    /// PKTADDRCFG is restored afterwards, also on failure. The engine stays
    /// [`EngineState::TxArmed`] on success.
    ///
    /// # Errors
    /// As [`Self::tx_packet`], with payloads limited to [`MAX_BEACON_LEN`] bytes.
    pub fn tx_beacon<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        payload: &[u8],
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        if self.state != EngineState::TxArmed {
            return Err(Error::InvalidState);
        }
        if payload.len() > MAX_BEACON_LEN {
            return Err(ConfigurationError::PayloadTooLong(payload.len()).into());
        }

        self.state = EngineState::TxInProgress;
        match self.write_beacon(device, delay, cancel, payload) {
            Ok(()) => {
                self.state = EngineState::TxArmed;
                Ok(())
            }
            Err(e) => Err(self.recover(device, e)),
        }
    }

    fn write_beacon<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        payload: &[u8],
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        self.wait_modem_power(device, delay, cancel)?;

        let saved = device.read_register::<PktAddrCfg>()?;
        device.write_register(PktAddrCfg {
            msb_first: true,
            ..saved
        })?;

        let sent = (|| {
            self.wait_fifo_space(device, delay, cancel, 3 + payload.len())?;
            let flags = TxFlags::UNENC
                | TxFlags::RAW
                | TxFlags::NOCRC
                | TxFlags::PKTSTART
                | TxFlags::PKTEND;
            device.write_fifo(&data_header(flags, payload.len()))?;
            if !payload.is_empty() {
                device.write_fifo(payload)?;
            }
            Self::commit_checked(device)?;
            self.wait_tx_done(device, delay, cancel, (payload.len() as u64 + 3) * 8)
        })();

        let restored = device.write_register(saved);
        sent?;
        restored
    }

    /// Sends 1000 bit times of zeros, for carrier and deviation measurements.
    ///
    /// # Errors
    /// As [`Self::tx_packet`].
    pub fn tx_1k_zeros<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        if self.state != EngineState::TxArmed {
            return Err(Error::InvalidState);
        }

        self.state = EngineState::TxInProgress;
        let sent = (|| {
            self.wait_modem_power(device, delay, cancel)?;
            self.wait_fifo_space(device, delay, cancel, 4)?;
            device.write_fifo(&repeat_data(TxFlags::NOCRC, ZEROS_LEN, 0x00))?;
            Self::commit_checked(device)?;
            self.wait_tx_done(device, delay, cancel, u64::from(ZEROS_LEN) * 8)
        })();

        match sent {
            Ok(()) => {
                self.state = EngineState::TxArmed;
                Ok(())
            }
            Err(e) => Err(self.recover(device, e)),
        }
    }

    /// Reads whatever the FIFO holds and returns the next complete frame.
    ///
    /// `Ok(None)` means the FIFO ran empty before a frame was complete; a partial frame is
    /// kept and completed by a later call.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - the receiver is not armed
    /// * [`HardwareError::FrameRejected`] - the framer flagged the frame, or it outgrew
    ///   [`MAX_PACKET_LEN`]; its bytes were discarded
    /// * [`Error::Port`] - bus communication failed
    pub fn rx_packet<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
    ) -> Result<Option<Packet>, Error<P::Error>> {
        if !matches!(
            self.state,
            EngineState::RxArmed | EngineState::RxDataPending
        ) {
            return Err(Error::InvalidState);
        }

        loop {
            if device.read_register::<FifoCount>()?.count == 0 {
                return Ok(None);
            }

            match read_chunk(device)? {
                RxChunk::Data { flags, bytes } => self.accept_data(flags, &bytes)?,
                RxChunk::Rssi(rssi) => {
                    self.rx.packet.rssi = Some(rssi);
                    self.rx.mark(Parts::RSSI);
                }
                RxChunk::FrequencyOffset(offset) => {
                    self.rx.packet.frequency_offset = Some(offset);
                    self.rx.mark(Parts::FREQUENCY_OFFSET);
                }
                RxChunk::RfFrequencyOffset(offset) => {
                    self.rx.packet.rf_frequency_offset = Some(offset);
                    self.rx.mark(Parts::RF_FREQUENCY_OFFSET);
                }
                RxChunk::Timer(timer) => {
                    self.rx.packet.timer = Some(timer);
                    self.rx.mark(Parts::TIMER);
                }
                RxChunk::DataRate(rate) => {
                    self.rx.packet.data_rate = Some(rate);
                    self.rx.mark(Parts::DATARATE);
                }
                other => log::trace!("ax::rx skipping {:?}", other),
            }

            if self.rx.parts.contains(self.required) {
                return Ok(Some(self.take_packet()));
            }
        }
    }

    fn accept_data<E>(&mut self, flags: RxFlags, bytes: &[u8]) -> Result<(), Error<E>> {
        let rejected = if flags.contains(RxFlags::ABORT) {
            Some(RejectReason::Aborted)
        } else if flags.contains(RxFlags::SIZEFAIL) {
            Some(RejectReason::Size)
        } else if flags.contains(RxFlags::CRCFAIL) {
            Some(RejectReason::Crc)
        } else {
            None
        };
        if let Some(reason) = rejected {
            return Err(self.reject(reason));
        }

        if flags.contains(RxFlags::PKTSTART) {
            if self.rx.in_frame {
                log::debug!("ax::rx frame restarted, dropping {} bytes", self.rx.packet.len());
            }
            self.rx.packet.data.clear();
            self.rx.in_frame = true;
        } else if !self.rx.in_frame {
            log::trace!("ax::rx dropping {} bytes outside a frame", bytes.len());
            return Ok(());
        }

        if self.rx.packet.data.extend_from_slice(bytes).is_err() {
            return Err(self.reject(RejectReason::Oversize));
        }
        self.state = EngineState::RxDataPending;

        if flags.contains(RxFlags::PKTEND) {
            self.rx.in_frame = false;
            self.rx.mark(Parts::DATA);
        }
        Ok(())
    }

    fn reject<E>(&mut self, reason: RejectReason) -> Error<E> {
        log::warn!("ax::rx frame rejected: {:?}", reason);
        self.listen();
        HardwareError::FrameRejected(reason).into()
    }

    fn take_packet(&mut self) -> Packet {
        let mut packet = core::mem::take(&mut self.rx.packet);
        if self.format.length_byte && !packet.data.is_empty() {
            packet.data.remove(0);
        }
        self.listen();
        log::debug!("ax::rx got {} bytes", packet.len());
        packet
    }

    /// Drops the FIFO contents and error flags. Returns to [`EngineState::Idle`].
    pub fn fifo_clear<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
    ) -> Result<(), Error<P::Error>> {
        self.reset();
        device.write_register(FifoCmd::ClearData)
    }

    /// Commits everything written to the FIFO so far.
    pub fn fifo_commit<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
    ) -> Result<(), Error<P::Error>> {
        device.write_register(FifoCmd::Commit)
    }

    fn commit_checked<P: RegisterPort>(device: &mut Device<P>) -> Result<(), Error<P::Error>> {
        device.write_register(FifoCmd::Commit)?;
        if device.read_register::<FifoStat>()?.status.has_error() {
            return Err(HardwareError::TxUnderflow.into());
        }
        Ok(())
    }

    fn wait_modem_power<P, D, C>(
        &self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        self.timeouts
            .modem_power
            .poll(delay, cancel, || {
                let status = device.read_register::<PowStat>()?.status;
                Ok(status.contains(PowerStatus::SVMODEM).then_some(()))
            })
            .map_err(into_error::<P::Error>(WaitTarget::ModemPower))
    }

    fn wait_fifo_space<P, D, C>(
        &self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        needed: usize,
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        self.timeouts
            .fifo_space
            .poll(delay, cancel, || {
                let free = device.read_register::<FifoFree>()?.free;
                Ok((usize::from(free) >= needed).then_some(()))
            })
            .map_err(into_error::<P::Error>(WaitTarget::FifoSpace))
    }

    /// Waits for the FIFO to drain and the transmitter to go idle.
    fn wait_tx_done<P, D, C>(
        &self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        air_bits: u64,
    ) -> Result<(), Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        let air_time_us = 2 * air_bits * 1_000_000 / u64::from(self.format.bitrate.max(1));
        let deadline = air_time_us
            .saturating_add(u64::from(self.timeouts.tx_margin_us))
            .min(u64::from(u32::MAX)) as u32;

        Poll::new(deadline, self.timeouts.tx_poll_interval_us)
            .poll(delay, cancel, || {
                let empty = device
                    .read_register::<FifoStat>()?
                    .status
                    .contains(FifoStatus::EMPTY);
                let state = device.read_register::<RadioStateRegister>()?.state;
                Ok((empty && !state.is_transmitting()).then_some(()))
            })
            .map_err(|e| match e {
                WaitError::TimedOut => HardwareError::TxTimeout.into(),
                other => into_error::<P::Error>(WaitTarget::TxIdle)(other),
            })
    }

    /// Puts the FIFO back into a known state after a failed transfer.
    fn recover<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
        error: Error<P::Error>,
    ) -> Error<P::Error> {
        log::warn!("ax::fifo transfer failed ({}), clearing FIFO", error);

        if device.write_register(FifoCmd::ClearData).is_err() {
            log::warn!("ax::fifo clear failed");
        }
        if matches!(error, Error::Cancelled)
            && device
                .write_register(PwrMode::new(PowerMode::PowerDown))
                .is_err()
        {
            log::warn!("ax::fifo power down after cancel failed");
        }
        self.reset();
        error
    }

    /// [`Self::recover`], then POWERDOWN whatever `error` was. A failed power down is
    /// reported instead of `error`.
    fn shutdown<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
        error: Error<P::Error>,
    ) -> Error<P::Error> {
        let error = self.recover(device, error);
        match device.write_register(PwrMode::new(PowerMode::PowerDown)) {
            Ok(()) => error,
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicBool;

    use super::*;
    use crate::mock::{NoopDelay, SimRadio};
    use crate::planner::plan_registers;
    use crate::registers::map;
    use crate::synth::SynthesizerCalibrator;
    use crate::wait::Never;

    struct Bench {
        device: Device<SimRadio>,
        engine: PacketEngine,
        plan: RegisterPlan,
        synth: SynthesizerState,
    }

    fn bench_with(sim: SimRadio, config: RadioConfig, modulation: ModulationParameters) -> Bench {
        let mut device = Device::new(sim);
        let mut calibrator = SynthesizerCalibrator::new(&config).unwrap();
        calibrator
            .do_vco_ranging(&mut device, &mut NoopDelay, &Never)
            .unwrap();
        let synth = *calibrator.state();
        let plan = plan_registers(&config, &modulation, None, &synth).unwrap();
        let engine = PacketEngine::new(
            &config,
            FrameFormat::new(&modulation, &config.pattern_match),
        );
        Bench {
            device,
            engine,
            plan,
            synth,
        }
    }

    fn bench() -> Bench {
        bench_with(
            SimRadio::new(),
            RadioConfig::default(),
            ModulationParameters::gmsk(),
        )
    }

    impl Bench {
        fn tx_on(&mut self) {
            self.engine
                .tx_on(&mut self.device, &mut NoopDelay, &Never, &self.plan, &self.synth)
                .unwrap();
        }

        fn rx_on(&mut self) {
            self.engine
                .rx_on(&mut self.device, &self.plan, &self.synth)
                .unwrap();
        }

        fn send(&mut self, payload: &[u8]) -> Result<(), Error<crate::mock::SimError>> {
            self.engine
                .tx_packet(&mut self.device, &mut NoopDelay, &Never, payload)
        }
    }

    #[test]
    fn test_tx_on_loads_plan_and_enters_fulltx() {
        let mut bench = bench();
        bench.tx_on();

        assert_eq!(bench.engine.state(), EngineState::TxArmed);
        assert_eq!(bench.device.port().power_mode(), PowerMode::FullTx);
        assert_eq!(
            bench.device.port().register(map::tuning::F18),
            bench.plan.tx_only.value(map::tuning::F18).unwrap()
        );
    }

    #[test]
    fn test_tx_on_requires_ranged_synthesizer() {
        let mut bench = bench();
        let mut synth = bench.synth;
        synth.a.vco_range = None;

        let result =
            bench
                .engine
                .tx_on(&mut bench.device, &mut NoopDelay, &Never, &bench.plan, &synth);
        assert_eq!(result, Err(Error::InvalidState));
        assert_eq!(
            bench.engine.rx_on(&mut bench.device, &bench.plan, &synth),
            Ok(())
        );
    }

    #[test]
    fn test_tx_on_oscillator_timeout_powers_down() {
        let mut bench = bench();
        bench.device.port_mut().halt_crystal(true);

        let result = bench.engine.tx_on(
            &mut bench.device,
            &mut NoopDelay,
            &Never,
            &bench.plan,
            &bench.synth,
        );

        assert_eq!(
            result,
            Err(Error::Hardware(HardwareError::Timeout(WaitTarget::Oscillator)))
        );
        assert_eq!(bench.engine.state(), EngineState::Idle);
        assert_eq!(bench.device.port().power_mode(), PowerMode::PowerDown);
    }

    #[test]
    fn test_loopback_returns_sent_payload() {
        let mut bench = bench();
        bench.tx_on();
        bench.send(b"hello ax5043").unwrap();
        assert_eq!(bench.engine.state(), EngineState::Idle);

        bench.rx_on();
        let packet = bench.engine.rx_packet(&mut bench.device).unwrap().unwrap();

        assert_eq!(&packet.data[..], b"hello ax5043");
        assert_eq!(bench.engine.state(), EngineState::RxArmed);
        assert_eq!(bench.engine.rx_packet(&mut bench.device).unwrap(), None);
    }

    #[test]
    fn test_frame_layout_on_air() {
        let mut bench = bench();
        bench.tx_on();
        bench.send(&[1, 2, 3]).unwrap();

        // length byte counts itself
        assert_eq!(bench.device.port().transmitted(), &[vec![4, 1, 2, 3]]);
        assert_eq!(bench.device.port().sync_words(), &[0x5533_5533]);
    }

    #[test]
    fn test_long_frames_span_several_chunks() {
        let modulation = ModulationParameters::gfsk_hdlc();
        let mut bench = bench_with(SimRadio::new(), RadioConfig::default(), modulation);
        let payload: Vec<u8> = (0..450u32).map(|i| i as u8).collect();

        bench.tx_on();
        bench.send(&payload).unwrap();
        assert_eq!(bench.device.port().commits(), 3);

        bench.rx_on();
        let packet = bench.engine.rx_packet(&mut bench.device).unwrap().unwrap();
        assert_eq!(&packet.data[..], &payload[..]);
    }

    #[test]
    fn test_length_byte_limits_payload() {
        let mut bench = bench();
        bench.tx_on();

        let result = bench.send(&[0u8; 255]);
        assert_eq!(
            result,
            Err(Error::Configuration(ConfigurationError::PayloadTooLong(255)))
        );
        assert_eq!(bench.engine.state(), EngineState::TxArmed);
    }

    #[test]
    fn test_tx_while_receiving_leaves_fifo_alone() {
        let mut bench = bench();
        bench.rx_on();
        bench.device.port_mut().inject_frame(b"\x07queued");

        assert_eq!(bench.send(b"nope"), Err(Error::InvalidState));
        assert!(bench.device.port().transmitted().is_empty());

        let packet = bench.engine.rx_packet(&mut bench.device).unwrap().unwrap();
        assert_eq!(&packet.data[..], b"queued");
    }

    #[test]
    fn test_underflow_clears_fifo() {
        let mut bench = bench();
        bench.tx_on();
        bench.device.port_mut().inject_underflow();

        assert_eq!(
            bench.send(b"payload"),
            Err(Error::Hardware(HardwareError::TxUnderflow))
        );
        assert_eq!(bench.engine.state(), EngineState::Idle);
        assert!(bench.device.port().fifo_clears() >= 2);
    }

    #[test]
    fn test_stalled_transmitter_times_out() {
        let mut bench = bench();
        bench.tx_on();
        bench.device.port_mut().stall_tx(true);

        assert_eq!(
            bench.send(b"payload"),
            Err(Error::Hardware(HardwareError::TxTimeout))
        );
        assert_eq!(bench.engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_cancel_powers_down() {
        let mut bench = bench();
        bench.tx_on();
        bench.device.port_mut().stall_tx(true);

        let cancel = AtomicBool::new(true);
        let result =
            bench
                .engine
                .tx_packet(&mut bench.device, &mut NoopDelay, &cancel, b"payload");

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(bench.device.port().power_mode(), PowerMode::PowerDown);
        assert_eq!(bench.engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_rejected_frames_are_dropped() {
        let mut bench = bench();
        bench.rx_on();
        bench
            .device
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x04, 0x0B, 3, b'o', b'k']);
        bench.device.port_mut().inject_frame(b"\x05next");

        assert_eq!(
            bench.engine.rx_packet(&mut bench.device),
            Err(Error::Hardware(HardwareError::FrameRejected(RejectReason::Crc)))
        );
        assert_eq!(bench.engine.state(), EngineState::RxArmed);

        let packet = bench.engine.rx_packet(&mut bench.device).unwrap().unwrap();
        assert_eq!(&packet.data[..], b"next");
    }

    #[test]
    fn test_partial_frame_survives_between_calls() {
        let mut bench = bench();
        bench.rx_on();
        bench
            .device
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x04, 0x01, 6, b'a', b'b']);

        assert_eq!(bench.engine.rx_packet(&mut bench.device), Ok(None));
        assert_eq!(bench.engine.state(), EngineState::RxDataPending);

        bench
            .device
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x04, 0x02, b'c', b'd', b'e']);
        let packet = bench.engine.rx_packet(&mut bench.device).unwrap().unwrap();
        assert_eq!(&packet.data[..], b"abcde");
    }

    #[test]
    fn test_chunks_outside_a_frame_are_ignored() {
        let mut bench = bench();
        bench.rx_on();
        bench
            .device
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x03, 0x02, b'x', b'y']);

        assert_eq!(bench.engine.rx_packet(&mut bench.device), Ok(None));
        assert_eq!(bench.engine.state(), EngineState::RxArmed);
    }

    #[test]
    fn test_metadata_completes_the_frame() {
        let config = RadioConfig::default().with_store_flags(StoreFlags::RSSI);
        let mut bench = bench_with(SimRadio::new(), config, ModulationParameters::gmsk());
        bench.rx_on();
        bench
            .device
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x03, 0x03, 2, b'z']);

        // data alone is not enough, RSSI was requested
        assert_eq!(bench.engine.rx_packet(&mut bench.device), Ok(None));

        bench.device.port_mut().push_rx_bytes(&[0x31, 0xC4]);
        let packet = bench.engine.rx_packet(&mut bench.device).unwrap().unwrap();
        assert_eq!(&packet.data[..], b"z");
        assert_eq!(packet.rssi, Some(-60));
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut bench = bench_with(
            SimRadio::new(),
            RadioConfig::default(),
            ModulationParameters::gfsk_hdlc(),
        );
        bench.rx_on();
        let mut chunk = vec![0xE1, 241, 0x01];
        chunk.extend_from_slice(&[0x55; 240]);
        bench.device.port_mut().push_rx_bytes(&chunk);
        chunk[2] = 0x00;
        bench.device.port_mut().push_rx_bytes(&chunk);
        bench.device.port_mut().push_rx_bytes(&chunk);

        assert_eq!(
            bench.engine.rx_packet(&mut bench.device),
            Err(Error::Hardware(HardwareError::FrameRejected(
                RejectReason::Oversize
            )))
        );
    }

    #[test]
    fn test_beacon_restores_bit_order_and_stays_armed() {
        let mut bench = bench();
        bench.tx_on();

        bench
            .engine
            .tx_beacon(&mut bench.device, &mut NoopDelay, &Never, b"CQ")
            .unwrap();

        assert_eq!(bench.engine.state(), EngineState::TxArmed);
        assert_eq!(bench.device.port().beacons(), &[b"CQ".to_vec()]);
        assert_eq!(bench.device.port().writes_to(map::PKTADDRCFG).last(), Some(&0x00));
        assert!(bench.device.port().writes_to(map::PKTADDRCFG).contains(&0x80));
    }

    #[test]
    fn test_zeros_use_one_repeat_chunk() {
        let mut bench = bench();
        bench.tx_on();

        bench
            .engine
            .tx_1k_zeros(&mut bench.device, &mut NoopDelay, &Never)
            .unwrap();

        assert_eq!(bench.engine.state(), EngineState::TxArmed);
        assert_eq!(bench.device.port().repeated_bytes(), &[(125, 0x00)]);
    }

    #[test]
    fn test_fifo_clear_from_any_state() {
        let mut bench = bench();
        bench.rx_on();
        bench
            .device
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x03, 0x01, 5, b'a']);
        bench.engine.rx_packet(&mut bench.device).unwrap();
        assert_eq!(bench.engine.state(), EngineState::RxDataPending);
        assert_eq!(
            bench.engine.rx_on(&mut bench.device, &bench.plan, &bench.synth),
            Err(Error::InvalidState)
        );

        bench.engine.fifo_clear(&mut bench.device).unwrap();
        assert_eq!(bench.engine.state(), EngineState::Idle);
        bench.tx_on();
        bench.engine.fifo_clear(&mut bench.device).unwrap();
        bench.rx_on();
        assert_eq!(bench.engine.state(), EngineState::RxArmed);
    }
}
