//! Simulated AX5043 for host tests
//!
//! [`SimRadio`] implements [`RegisterPort`] over an in-memory register file and models the
//! parts of the chip the driver depends on:
//!
//! - power modes, crystal and supply status
//! - hardware VCO ranging, resolving immediately to a configurable range or an error
//! - the FIFO: committed transmit chunks are parsed into frames, beacons and repeats; frames
//!   go "on air" and come back as receive chunks, with the metadata PKTSTOREFLAGS asks for,
//!   once the receiver is running
//! - wake-on-radio: a schedule of wakeups, each with or without channel activity
//!
//! Faults can be injected: a scratch register that ignores writes, a foreign silicon
//! revision, FIFO underflow, a transmitter that never drains and bus failures.

use std::collections::VecDeque;
use std::vec;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::config::Channel;
use crate::device::RegisterPort;
use crate::packet::chunk::{payload_len, ChunkType, RxFlags, TxFlags};
use crate::registers::{map, FifoStatus, Irq, PowerMode, PowerStatus, Scratch, SiliconRevision};

const REGISTER_SPACE: usize = 0x1000;
const FIFO_SIZE: usize = 256;
/// Largest DATA chunk the simulated receiver produces
const RX_CHUNK_LEN: usize = 240;

/// RSSI reported while a wakeup finds activity
pub const ACTIVE_RSSI: i8 = -20;
/// RSSI reported on a quiet channel
pub const QUIET_RSSI: i8 = -100;

/// Bus failure injected into the simulated port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    Bus,
}

/// Delay provider that returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// In-memory AX5043
#[derive(Debug)]
pub struct SimRadio {
    regs: Vec<u8>,
    revision: u8,
    writes: Vec<(u16, u8)>,
    block_writes: usize,
    lock_range: [Option<u8>; 2],

    tx_fifo: Vec<u8>,
    rx_fifo: VecDeque<u8>,
    fifo_error: bool,
    commits: usize,
    fifo_clears: usize,

    air: VecDeque<Vec<u8>>,
    loopback: bool,
    frame: Option<Vec<u8>>,
    transmitted: Vec<Vec<u8>>,
    sync_words: Vec<u32>,
    beacons: Vec<Vec<u8>>,
    repeated: Vec<(u8, u8)>,

    pending_underflow: bool,
    stall_tx: bool,
    crystal_halted: bool,
    scratch_fault: bool,
    fail_all: bool,
    fail_write_at: Option<u16>,

    wake_schedule: VecDeque<bool>,
    current_wake: Option<bool>,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRadio {
    /// Chip straight out of reset, both synthesizers lock in range 8.
    pub fn new() -> Self {
        let mut sim = Self {
            regs: vec![0; REGISTER_SPACE],
            revision: SiliconRevision::AX5043,
            writes: Vec::new(),
            block_writes: 0,
            lock_range: [Some(8), Some(8)],
            tx_fifo: Vec::new(),
            rx_fifo: VecDeque::new(),
            fifo_error: false,
            commits: 0,
            fifo_clears: 0,
            air: VecDeque::new(),
            loopback: true,
            frame: None,
            transmitted: Vec::new(),
            sync_words: Vec::new(),
            beacons: Vec::new(),
            repeated: Vec::new(),
            pending_underflow: false,
            stall_tx: false,
            crystal_halted: false,
            scratch_fault: false,
            fail_all: false,
            fail_write_at: None,
            wake_schedule: VecDeque::new(),
            current_wake: None,
        };
        sim.reset_registers();
        sim
    }

    fn reset_registers(&mut self) {
        self.regs.fill(0);
        self.regs[usize::from(map::SILICONREVISION)] = self.revision;
        self.regs[usize::from(map::SCRATCH)] = Scratch::RESET;
        self.regs[usize::from(map::PWRMODE)] = 0x60;
        self.regs[usize::from(map::PLLLOOP)] = 0x09;
        self.regs[usize::from(map::PLLRANGINGA)] = 0x08;
        self.regs[usize::from(map::PLLRANGINGB)] = 0x08;
        self.tx_fifo.clear();
        self.rx_fifo.clear();
        self.frame = None;
        self.fifo_error = false;
    }

    /// Range the sweep of `channel` ends in, `None` makes it fail.
    pub fn with_lock_range(mut self, channel: Channel, range: Option<u8>) -> Self {
        self.lock_range[channel as usize] = range;
        self
    }

    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = revision;
        self.regs[usize::from(map::SILICONREVISION)] = revision;
        self
    }

    /// SCRATCH ignores writes.
    pub fn with_scratch_fault(mut self) -> Self {
        self.scratch_fault = true;
        self
    }

    /// Transmitted frames are not received back.
    pub fn without_loopback(mut self) -> Self {
        self.loopback = false;
        self
    }

    /// Every access fails.
    pub fn fail_all(&mut self, fail: bool) {
        self.fail_all = fail;
    }

    /// Writes touching `addr` fail.
    pub fn fail_writes_at(&mut self, addr: Option<u16>) {
        self.fail_write_at = addr;
    }

    /// The transmitter stops draining the FIFO.
    pub fn stall_tx(&mut self, stall: bool) {
        self.stall_tx = stall;
    }

    /// The crystal oscillator never reports running.
    pub fn halt_crystal(&mut self, halted: bool) {
        self.crystal_halted = halted;
    }

    /// The next commit flags an underflow.
    pub fn inject_underflow(&mut self) {
        self.pending_underflow = true;
    }

    /// Raw bytes appended to the receive FIFO.
    pub fn push_rx_bytes(&mut self, bytes: &[u8]) {
        self.rx_fifo.extend(bytes.iter().copied());
    }

    /// A frame sent by another station, exactly as it appears after the framer, including
    /// any length byte.
    pub fn inject_frame(&mut self, frame: &[u8]) {
        self.air.push_back(frame.to_vec());
    }

    /// Upcoming wakeups, `true` for the ones that find channel activity.
    pub fn schedule_wakeups(&mut self, wakeups: &[bool]) {
        self.wake_schedule.extend(wakeups.iter().copied());
    }

    pub fn set_wakeup_timer(&mut self, ticks: u16) {
        let addr = usize::from(map::WAKEUPTIMER);
        self.regs[addr..addr + 2].copy_from_slice(&ticks.to_be_bytes());
    }

    pub fn register(&self, addr: u16) -> u8 {
        self.regs[usize::from(addr)]
    }

    /// Four registers from `addr` on, big endian.
    pub fn read_u32(&self, addr: u16) -> u32 {
        let addr = usize::from(addr);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.regs[addr..addr + 4]);
        u32::from_be_bytes(bytes)
    }

    /// Every value written to `addr`, oldest first.
    pub fn writes_to(&self, addr: u16) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Number of `write_block` calls.
    pub fn block_writes(&self) -> usize {
        self.block_writes
    }

    pub fn power_mode(&self) -> PowerMode {
        PowerMode::from_byte(self.register(map::PWRMODE)).unwrap_or(PowerMode::PowerDown)
    }

    /// Framed payloads sent, including any length byte.
    pub fn transmitted(&self) -> &[Vec<u8>] {
        &self.transmitted
    }

    /// Raw four byte DATA chunks sent ahead of frames, as little endian words.
    pub fn sync_words(&self) -> &[u32] {
        &self.sync_words
    }

    /// Raw single chunk transmissions.
    pub fn beacons(&self) -> &[Vec<u8>] {
        &self.beacons
    }

    /// Non-raw REPEATDATA chunks as (count, byte).
    pub fn repeated_bytes(&self) -> &[(u8, u8)] {
        &self.repeated
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn fifo_clears(&self) -> usize {
        self.fifo_clears
    }

    fn fifo_count(&self) -> usize {
        self.rx_fifo.len() + self.tx_fifo.len()
    }

    fn receiving(&self) -> bool {
        match self.power_mode() {
            PowerMode::FullRx => true,
            PowerMode::WorRx => self.current_wake == Some(true),
            _ => false,
        }
    }

    fn deliver_air(&mut self) {
        if !self.receiving() {
            return;
        }
        while let Some(frame) = self.air.pop_front() {
            let chunks: Vec<&[u8]> = if frame.is_empty() {
                vec![&frame[..]]
            } else {
                frame.chunks(RX_CHUNK_LEN).collect()
            };
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let mut flags = RxFlags::empty();
                if i == 0 {
                    flags |= RxFlags::PKTSTART;
                }
                if i == last {
                    flags |= RxFlags::PKTEND;
                }
                self.rx_fifo.extend([ChunkType::Data.to_byte(), chunk.len() as u8 + 1, flags.bits()]);
                self.rx_fifo.extend(chunk.iter().copied());
            }
            self.push_metadata();
        }
    }

    fn push_metadata(&mut self) {
        let store = self.register(map::PKTSTOREFLAGS);
        if store & 0x01 != 0 {
            self.rx_fifo.extend([ChunkType::Timer.to_byte(), 0x00, 0x12, 0x34]);
        }
        if store & 0x02 != 0 {
            self.rx_fifo.extend([ChunkType::FrequencyOffset.to_byte(), 0x00, 0x10]);
        }
        if store & 0x04 != 0 {
            self.rx_fifo.extend([ChunkType::RfFrequencyOffset.to_byte(), 0xFF, 0xFF, 0xF0]);
        }
        if store & 0x08 != 0 {
            self.rx_fifo.extend([ChunkType::DataRate.to_byte(), 0x00, 0x07, 0xD0]);
        }
        if store & 0x10 != 0 {
            self.rx_fifo.extend([ChunkType::Rssi.to_byte(), (-60i8) as u8]);
        }
    }

    /// Parses committed transmit chunks.
    fn transmit(&mut self) {
        let bytes = core::mem::take(&mut self.tx_fifo);
        let mut rest = &bytes[..];

        while let Some((&header, tail)) = rest.split_first() {
            let (len, tail) = match payload_len(header) {
                Some(len) => (len, tail),
                None => match tail.split_first() {
                    Some((&len, tail)) => (usize::from(len), tail),
                    None => break,
                },
            };
            if tail.len() < len {
                break;
            }
            let (payload, tail) = tail.split_at(len);
            rest = tail;

            match ChunkType::from_byte(header) {
                Ok(ChunkType::RepeatData) => {
                    let flags = TxFlags::from_bits_retain(payload[0]);
                    if !flags.contains(TxFlags::RAW) {
                        self.repeated.push((payload[1], payload[2]));
                    }
                }
                Ok(ChunkType::Data) if !payload.is_empty() => {
                    self.transmit_data(TxFlags::from_bits_retain(payload[0]), &payload[1..]);
                }
                _ => {}
            }
        }
    }

    fn transmit_data(&mut self, flags: TxFlags, data: &[u8]) {
        let start = flags.contains(TxFlags::PKTSTART);
        let end = flags.contains(TxFlags::PKTEND);

        if flags.contains(TxFlags::RAW) {
            if start && end {
                self.beacons.push(data.to_vec());
            } else if let Ok(word) = <[u8; 4]>::try_from(data) {
                self.sync_words.push(u32::from_le_bytes(word));
            }
            return;
        }

        if start {
            self.frame = Some(Vec::new());
        }
        if let Some(frame) = self.frame.as_mut() {
            frame.extend_from_slice(data);
        }
        if end {
            if let Some(frame) = self.frame.take() {
                if self.loopback {
                    self.air.push_back(frame.clone());
                }
                self.transmitted.push(frame);
            }
        }
    }

    fn fifo_command(&mut self, command: u8) {
        match command & 0x07 {
            0x02 => self.fifo_error = false,
            0x03 => {
                self.tx_fifo.clear();
                self.rx_fifo.clear();
                self.frame = None;
                self.fifo_error = false;
                self.fifo_clears += 1;
            }
            0x04 => {
                self.commits += 1;
                if core::mem::take(&mut self.pending_underflow) {
                    self.fifo_error = true;
                }
                if !self.stall_tx {
                    self.transmit();
                }
            }
            0x05 => self.tx_fifo.clear(),
            _ => {}
        }
    }

    fn start_ranging(&mut self, addr: u16, value: u8) {
        let channel = if addr == map::PLLRANGINGA { 0 } else { 1 };
        self.regs[usize::from(addr)] = match self.lock_range[channel] {
            Some(range) => (range & 0x0F) | 0x40,
            None => (value & 0x0F) | 0x20,
        };
    }

    fn write_one(&mut self, addr: u16, value: u8) {
        match addr {
            map::SILICONREVISION => {}
            map::SCRATCH if self.scratch_fault => {}
            map::PWRMODE => {
                self.current_wake = None;
                if value & 0x80 != 0 {
                    self.reset_registers();
                    return;
                }
                self.regs[usize::from(addr)] = value;
                if value & 0x0F == PowerMode::PowerDown.to_byte() {
                    self.tx_fifo.clear();
                    self.rx_fifo.clear();
                    self.frame = None;
                }
            }
            map::FIFOSTAT => self.fifo_command(value),
            map::FIFODATA => self.tx_fifo.push(value),
            map::PLLRANGINGA | map::PLLRANGINGB if value & 0x10 != 0 => {
                self.start_ranging(addr, value)
            }
            _ => self.regs[usize::from(addr)] = value,
        }
    }

    fn read_one(&mut self, addr: u16) -> u8 {
        match addr {
            map::POWSTAT => (PowerStatus::SSUM
                | PowerStatus::SREF
                | PowerStatus::SVREF
                | PowerStatus::SVANA
                | PowerStatus::SVMODEM
                | PowerStatus::SVIO)
                .bits(),
            map::XTALSTATUS => u8::from(!self.crystal_halted),
            map::FIFOSTAT => {
                let mut status = FifoStatus::empty();
                if self.fifo_count() == 0 {
                    status |= FifoStatus::EMPTY;
                }
                if self.fifo_error {
                    status |= FifoStatus::UNDERFLOW;
                }
                status.bits()
            }
            map::RADIOSTATE => match self.power_mode() {
                PowerMode::FullTx if self.stall_tx && !self.tx_fifo.is_empty() => 0x06,
                PowerMode::FullRx => 0x0C,
                PowerMode::WorRx => match self.current_wake {
                    Some(true) => 0x0F,
                    Some(false) => 0x0C,
                    None => 0x01,
                },
                PowerMode::PowerDown | PowerMode::DeepSleep => 0x01,
                _ => 0x00,
            },
            map::RSSI => match self.current_wake {
                Some(true) => ACTIVE_RSSI as u8,
                _ => QUIET_RSSI as u8,
            },
            map::FIFODATA => match self.rx_fifo.pop_front() {
                Some(byte) => byte,
                None => {
                    self.fifo_error = true;
                    0
                }
            },
            _ => self.regs[usize::from(addr)],
        }
    }

    fn read_irq_request(&mut self) -> u16 {
        if self.power_mode() != PowerMode::WorRx {
            return 0;
        }
        self.current_wake = self.wake_schedule.pop_front();
        if self.current_wake.is_some() {
            Irq::WAKEUP_TIMER.bits()
        } else {
            0
        }
    }
}

impl RegisterPort for SimRadio {
    type Error = SimError;

    fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_all {
            return Err(SimError::Bus);
        }

        match addr {
            map::FIFOCOUNT => {
                self.deliver_air();
                let count = self.fifo_count() as u16;
                copy_word(buf, count);
            }
            map::FIFOFREE => {
                let free = FIFO_SIZE.saturating_sub(self.fifo_count()) as u16;
                copy_word(buf, free);
            }
            map::IRQREQUEST => {
                let pending = self.read_irq_request();
                copy_word(buf, pending);
            }
            map::FIFODATA => {
                for byte in buf.iter_mut() {
                    *byte = self.read_one(addr);
                }
            }
            _ => {
                for (offset, byte) in buf.iter_mut().enumerate() {
                    *byte = self.read_one(addr + offset as u16);
                }
            }
        }
        Ok(())
    }

    fn write_block(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_all {
            return Err(SimError::Bus);
        }
        let span = if addr == map::FIFODATA {
            addr..addr + 1
        } else {
            addr..addr + bytes.len() as u16
        };
        if self.fail_write_at.is_some_and(|a| span.contains(&a)) {
            return Err(SimError::Bus);
        }

        self.block_writes += 1;
        for (offset, &value) in bytes.iter().enumerate() {
            let target = if addr == map::FIFODATA {
                addr
            } else {
                addr + offset as u16
            };
            self.writes.push((target, value));
            self.write_one(target, value);
        }
        Ok(())
    }
}

fn copy_word(buf: &mut [u8], value: u16) {
    for (byte, value) in buf.iter_mut().zip(value.to_be_bytes()) {
        *byte = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::registers::{FifoCount, PwrMode, RadioStateRegister, RadioState};

    #[test]
    fn test_reset_values() {
        let mut device = Device::new(SimRadio::new());
        assert_eq!(device.read_u8(map::SILICONREVISION).unwrap(), 0x51);
        assert_eq!(device.read_u8(map::SCRATCH).unwrap(), 0xC5);
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
    }

    #[test]
    fn test_committed_frame_comes_back_in_fullrx() {
        let mut device = Device::new(SimRadio::new());
        device.write_register(PwrMode::new(PowerMode::FullTx)).unwrap();
        device
            .write_fifo(&[0xE1, 0x04, 0x03, b'a', b'b', b'c'])
            .unwrap();
        device.write_u8(map::FIFOSTAT, 0x04).unwrap();
        assert_eq!(device.port().transmitted(), &[b"abc".to_vec()]);

        // nothing arrives until the receiver runs
        assert_eq!(device.read_register::<FifoCount>().unwrap().count, 0);
        device.write_register(PwrMode::new(PowerMode::FullRx)).unwrap();
        assert_eq!(device.read_register::<FifoCount>().unwrap().count, 6);
    }

    #[test]
    fn test_wakeups_follow_schedule() {
        let mut device = Device::new(SimRadio::new());
        device.port_mut().schedule_wakeups(&[false, true]);
        device.write_register(PwrMode::new(PowerMode::WorRx)).unwrap();

        assert_eq!(device.read_u16(map::IRQREQUEST).unwrap(), Irq::WAKEUP_TIMER.bits());
        assert_eq!(
            device.read_register::<RadioStateRegister>().unwrap().state,
            RadioState::RxPreamble1
        );
        device.read_u16(map::IRQREQUEST).unwrap();
        assert_eq!(device.read_u8(map::RSSI).unwrap() as i8, ACTIVE_RSSI);
        assert_eq!(device.read_u16(map::IRQREQUEST).unwrap(), 0);
    }

    #[test]
    fn test_bus_failures() {
        let mut sim = SimRadio::new();
        sim.fail_writes_at(Some(map::MODULATION));
        assert_eq!(sim.write_block(map::MODULATION - 1, &[0, 0]), Err(SimError::Bus));
        assert_eq!(sim.write_register(map::FRAMING, 0x14), Ok(()));

        sim.fail_all(true);
        assert_eq!(sim.read_register(map::SCRATCH), Err(SimError::Bus));
    }
}
