//! Register plans
//!
//! Turning a [`RadioConfig`] and [`ModulationParameters`] into register values is pure: it
//! produces a [`RegisterPlan`], three ordered lists of `(address, byte)` writes.
//!
//! - `shared`: everything both directions need (modulation, receiver, transmitter, packet
//!   controller, ...), in the order the programming manual lists the register groups
//! - `rx_only`: receive loop settings for synthesizer B, AFSK receive tones
//! - `tx_only`: transmit loop settings for synthesizer A, AFSK transmit tones
//!
//! Multi-byte registers appear MSB first at consecutive addresses. No plan writes PWRMODE;
//! power mode changes belong to the packet engine and happen after a plan is applied.
//!
//! Plans are assembled by [`PlanBuilder`], whose type parameter tracks the build stage:
//! path-specific writes only become available once the synthesizer state has been handed
//! over, so a plan can never load loop settings for a synthesizer it knows nothing about.
//!
//! ```no_run
//! use ax5043::config::{ModulationParameters, RadioConfig};
//! use ax5043::planner::{plan_registers, PlanContext, PlanBuilder};
//! # fn demo(state: &ax5043::synth::SynthesizerState) -> Result<(), ax5043::error::ConfigurationError> {
//! let config = RadioConfig::default();
//! let modulation = ModulationParameters::gmsk();
//!
//! let plan = plan_registers(&config, &modulation, None, state)?;
//!
//! // Equivalent, step by step
//! let context = PlanContext::new(&config, &modulation, None)?;
//! let plan = PlanBuilder::new(&context)
//!     .shared()
//!     .synthesizer(state)
//!     .receive()
//!     .transmit()
//!     .build();
//! # Ok(())
//! # }
//! ```

pub mod params;

use core::marker::PhantomData;

use regiface::ToByteArray;

use crate::config::{
    FramingMode, Modulation, ModulationParameters, PatternMatchParameters, PerformanceTuning,
    RadioConfig, WakeupConfig,
};
use crate::device::{Device, RegisterPort};
use crate::error::{ConfigurationError, Error};
use crate::registers::{map, LposcFlags, PktAddrCfg};
use crate::synth::{synthesizer_writes, PllLoopSettings, SynthesizerState};

pub use params::DerivedParameters;
use params::{exp_mantissa_3_5, mantissa_exp_4_4, wake_ticks, WakeTicks};

/// Largest number of writes a shared plan holds
pub const SHARED_CAPACITY: usize = 192;
/// Largest number of writes a path-specific plan holds
pub const PATH_CAPACITY: usize = 16;
/// Largest number of writes one section produces
pub const SECTION_CAPACITY: usize = 64;

/// PKTCHUNKSIZE value for 240 byte chunks
const CHUNK_SIZE_240: u8 = 0x0D;
/// Frames always accepted: oversized frames split over several chunks, and address mismatches
const ALWAYS_ACCEPT: u8 = 0x28;
/// MAXRFOFFSET: correct the offset at the first LO
const FREQOFFSCORR_FIRST_LO: u32 = 0x80_0000;

/// Ordered register writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Writes<const N: usize> {
    writes: heapless::Vec<(u16, u8), N>,
}

impl<const N: usize> Writes<N> {
    pub fn new() -> Self {
        Self {
            writes: heapless::Vec::new(),
        }
    }

    fn u8(&mut self, addr: u16, value: u8) {
        if self.writes.push((addr, value)).is_err() {
            log::error!("ax::plan write to {:#05x} dropped, plan full", addr);
            debug_assert!(false, "register plan capacity exceeded");
        }
    }

    fn bytes(&mut self, addr: u16, bytes: &[u8]) {
        for (offset, value) in bytes.iter().enumerate() {
            self.u8(addr + offset as u16, *value);
        }
    }

    fn u16(&mut self, addr: u16, value: u16) {
        self.bytes(addr, &value.to_be_bytes());
    }

    fn u24(&mut self, addr: u16, value: u32) {
        self.bytes(addr, &value.to_be_bytes()[1..]);
    }

    fn u32(&mut self, addr: u16, value: u32) {
        self.bytes(addr, &value.to_be_bytes());
    }

    fn extend<const M: usize>(&mut self, other: &Writes<M>) {
        for (addr, value) in other.iter() {
            self.u8(addr, value);
        }
    }

    /// Writes in order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.writes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Last value planned for `addr`.
    pub fn value(&self, addr: u16) -> Option<u8> {
        self.writes
            .iter()
            .rev()
            .find(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
    }

    /// True if `addr` is written anywhere in the list.
    pub fn contains(&self, addr: u16) -> bool {
        self.writes.iter().any(|(a, _)| *a == addr)
    }

    /// Writes everything to the device, coalescing runs of consecutive addresses into block
    /// writes.
    pub fn apply<P: RegisterPort>(&self, device: &mut Device<P>) -> Result<(), Error<P::Error>> {
        let mut run: heapless::Vec<u8, 16> = heapless::Vec::new();
        let mut start = 0u16;

        for (addr, value) in self.iter() {
            let contiguous = !run.is_empty() && addr == start + run.len() as u16;
            if !contiguous || run.is_full() {
                flush(device, start, &run)?;
                run.clear();
                start = addr;
            }
            // Never full here, the run was flushed above.
            let _ = run.push(value);
        }
        flush(device, start, &run)
    }
}

fn flush<P: RegisterPort>(
    device: &mut Device<P>,
    start: u16,
    run: &[u8],
) -> Result<(), Error<P::Error>> {
    if run.is_empty() {
        return Ok(());
    }
    device
        .port_mut()
        .write_block(start, run)
        .map_err(Error::Port)
}

/// Register values for one modulation, split by direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPlan {
    pub shared: Writes<SHARED_CAPACITY>,
    pub rx_only: Writes<PATH_CAPACITY>,
    pub tx_only: Writes<PATH_CAPACITY>,
}

/// Register groups of the shared plan, in the order they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Section {
    /// MODULATION, ENCODING, FRAMING, FEC
    Modulation,
    /// PINFUNC*
    Pins,
    /// WAKEUPFREQ, WAKEUPXOEARLY
    WakeupTimer,
    /// IFFREQ, DECIMATION, RXDATARATE, MAXRFOFFSET, FSKD
    Receiver,
    /// RXPARAMSETS and the parameter sets in use
    ReceiverParameterSets,
    /// MODCFG, FSKDEV, TXRATE, TXPWRCOEFFB
    Transmitter,
    /// PLLVCOI, PLLRNGCLK
    Pll,
    /// BBTUNE, BBOFFSCAP
    Baseband,
    /// PKTADDRCFG, PKTLENCFG, PKTLENOFFSET, PKTMAXLEN
    PacketFormat,
    /// MATCH0*, MATCH1*
    PatternMatch,
    /// TMG*, RSSIABSTHR, PKTCHUNKSIZE, PKTSTOREFLAGS, PKTACCEPTFLAGS
    PacketController,
    /// LPOSCREF, LPOSCCONFIG
    LowPowerOscillator,
    /// DACVALUE, DACCONFIG
    Dac,
    /// Undocumented tuning registers
    PerformanceTuning,
}

impl Section {
    /// Shared plan order
    pub const ALL: [Section; 14] = [
        Section::Modulation,
        Section::Pins,
        Section::WakeupTimer,
        Section::Receiver,
        Section::ReceiverParameterSets,
        Section::Transmitter,
        Section::Pll,
        Section::Baseband,
        Section::PacketFormat,
        Section::PatternMatch,
        Section::PacketController,
        Section::LowPowerOscillator,
        Section::Dac,
        Section::PerformanceTuning,
    ];
}

/// Validated inputs of a plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub config: &'a RadioConfig,
    pub modulation: &'a ModulationParameters,
    pub wakeup: Option<(&'a WakeupConfig, WakeTicks)>,
    pub derived: DerivedParameters,
}

impl<'a> PlanContext<'a> {
    /// Validates the inputs and derives every parameter.
    ///
    /// # Errors
    /// Any [`ConfigurationError`] raised by [`DerivedParameters::derive`] or by the wake
    /// timer conversion.
    pub fn new(
        config: &'a RadioConfig,
        modulation: &'a ModulationParameters,
        wakeup: Option<&'a WakeupConfig>,
    ) -> Result<Self, ConfigurationError> {
        let derived = DerivedParameters::derive(config, modulation)?;
        let wakeup = match wakeup {
            Some(wakeup) => Some((wakeup, wake_ticks(wakeup)?)),
            None => None,
        };
        Ok(Self {
            config,
            modulation,
            wakeup,
            derived,
        })
    }

    /// Writes of one register group.
    pub fn section(&self, section: Section) -> Writes<SECTION_CAPACITY> {
        let mut out = Writes::new();
        match section {
            Section::Modulation => self.modulation_section(&mut out),
            Section::Pins => self.pin_section(&mut out),
            Section::WakeupTimer => self.wakeup_section(&mut out),
            Section::Receiver => self.receiver_section(&mut out),
            Section::ReceiverParameterSets => self.parameter_set_section(&mut out),
            Section::Transmitter => self.transmitter_section(&mut out),
            Section::Pll => self.pll_section(&mut out),
            Section::Baseband => self.baseband_section(&mut out),
            Section::PacketFormat => self.packet_format_section(&mut out),
            Section::PatternMatch => self.pattern_match_section(&mut out),
            Section::PacketController => self.packet_controller_section(&mut out),
            Section::LowPowerOscillator => self.lposc_section(&mut out),
            Section::Dac => self.dac_section(&mut out),
            Section::PerformanceTuning => self.tuning_section(&mut out),
        }
        out
    }

    fn modulation_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let modulation = self.modulation;
        let framing = modulation.effective_framing();

        out.u8(map::MODULATION, modulation.modulation.to_byte());
        out.u8(map::ENCODING, modulation.effective_encoding().bits());
        out.u8(map::FRAMING, modulation.framing_byte());
        out.u8(
            map::tuning::F72,
            if framing == FramingMode::RawSoftBits { 0x06 } else { 0x00 },
        );
        if modulation.fec {
            // positive interleaver sync, soft input shifted by one
            out.u8(map::FEC, 0x13);
            out.u8(map::FECSYNC, 98);
        } else {
            out.u8(map::FEC, 0x00);
        }
    }

    fn pin_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let pins = &self.config.pins;
        out.u8(map::PINFUNCSYSCLK, pins.sysclk);
        out.u8(map::PINFUNCDCLK, pins.dclk);
        out.u8(map::PINFUNCDATA, pins.data);
        out.u8(map::PINFUNCIRQ, pins.irq);
        out.u8(map::PINFUNCANTSEL, pins.antsel);
        out.u8(map::PINFUNCPWRAMP, pins.pwramp);
    }

    fn wakeup_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        match self.wakeup {
            Some((_, ticks)) => {
                out.u16(map::WAKEUPFREQ, ticks.period);
                out.u8(map::WAKEUPXOEARLY, ticks.xo_early);
            }
            None => out.u8(map::WAKEUPXOEARLY, 1),
        }
    }

    fn receiver_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let derived = &self.derived;

        out.u16(map::IFFREQ, derived.iffreq);
        out.u8(map::DECIMATION, derived.decimation);
        out.u24(map::RXDATARATE, derived.rx_data_rate);
        out.u24(map::MAXDROFFSET, 0);
        out.u24(map::MAXRFOFFSET, FREQOFFSCORR_FIRST_LO | derived.max_rf_offset);
        if self.modulation.modulation.is_frequency_shift() {
            out.u16(map::FSKDMAX, derived.fskd);
            out.u16(map::FSKDMIN, !derived.fskd);
        }
        out.u8(map::AMPLFILTER, 0x00);
    }

    fn parameter_set_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        out.u8(
            map::RXPARAMSETS,
            self.derived.rx_parameter_sets_byte(self.modulation),
        );

        for (base, set) in map::RX_PARAMETER_SETS.iter().zip(self.derived.rx_sets.iter()) {
            let Some(set) = set else { continue };
            use map::rx_set::*;

            out.u8(base + AGCGAIN, set.agc_gain());
            // AGC target 132: 304 of 1023 counts
            out.u8(base + AGCTARGET, 0x84);
            out.u8(base + AGCAHYST, 0x00);
            out.u8(base + AGCMINMAX, 0x00);
            out.u8(base + TIMEGAIN, mantissa_exp_4_4(set.time_gain));
            out.u8(base + DRGAIN, mantissa_exp_4_4(set.dr_gain));
            out.u8(base + PHASEGAIN, set.phase_gain_byte());
            // baseband frequency recovery disabled
            out.u8(base + FREQGAINA, 0x0F);
            out.u8(base + FREQGAINB, 0x1F);
            out.u8(base + FREQGAINC, set.rf_recovery_gain);
            out.u8(base + FREQGAIND, set.rf_recovery_gain);
            out.u8(base + AMPLGAIN, set.amplitude_gain_byte());
            out.u16(base + FREQDEV, set.frequency_deviation);
            out.u8(base + FOURFSK, 0x16);
            out.u8(base + BBOFFSRES, 0x00);
        }
    }

    fn transmitter_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let path = match self.config.transmit_path {
            crate::config::TransmitPath::Differential => 0x01,
            crate::config::TransmitPath::SingleEnded => 0x02,
        };

        out.u8(map::MODCFGF, self.modulation.shaping.to_byte());
        // raised cosine amplitude shaping
        out.u8(map::MODCFGA, path | 0x04);
        out.u24(map::FSKDEV, self.derived.fskdev);
        out.u24(map::TXRATE, self.derived.txrate);
        out.u16(map::TXPWRCOEFFB, self.derived.power_coefficient);
    }

    fn pll_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let pll = &self.config.pll;
        out.u8(map::PLLVCOI, 0x80 | (pll.vco_current & 0x3F));
        out.u8(map::PLLRNGCLK, pll.ranging_clock_divider & 0x07);
    }

    fn baseband_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        out.u8(map::BBTUNE, self.config.baseband.tune);
        out.u8(map::BBOFFSCAP, self.config.baseband.offset_capacitors);
    }

    fn packet_format_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        // LSB first, no address byte
        let [addr_cfg] = match PktAddrCfg::default().to_bytes() {
            Ok(bytes) => bytes,
            Err(never) => match never {},
        };
        out.u8(map::PKTADDRCFG, addr_cfg);

        if self.modulation.fixed_packet_length != 0 {
            out.u8(map::PKTLENCFG, 0x00);
            out.u8(map::PKTLENOFFSET, self.modulation.fixed_packet_length);
        } else {
            // eight significant bits, length byte first
            out.u8(map::PKTLENCFG, 0x80);
            out.u8(map::PKTLENOFFSET, 0x00);
        }
        out.u8(map::PKTMAXLEN, 0xFF);
    }

    fn pattern_match_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let pattern = &self.config.pattern_match;
        let hdlc = self.modulation.effective_framing() == FramingMode::Hdlc;

        let (sync_word, sync_length) = match pattern.sync_word {
            Some(word) => (word, pattern.sync_length),
            // HDLC frames carry no sync word, match 32 raw preamble bits instead
            None if hdlc => (PatternMatchParameters::HDLC_SYNC_WORD, 0x9E),
            None => (PatternMatchParameters::SYNC_WORD, pattern.sync_length),
        };
        let min = if hdlc { 0 } else { 1 };

        out.u16(map::MATCH1PAT, pattern.preamble_pattern);
        out.u8(map::MATCH1LEN, pattern.preamble_length);
        out.u8(map::MATCH1MAX, pattern.preamble_threshold.min(15));
        out.u8(map::MATCH1MIN, min);
        out.u32(map::MATCH0PAT, sync_word);
        out.u8(map::MATCH0LEN, sync_length);
        out.u8(map::MATCH0MAX, pattern.sync_threshold.min(31));
        out.u8(map::MATCH0MIN, min);
    }

    fn packet_controller_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        let timing = &self.config.packet_controller;

        out.u8(map::TMGTXBOOST, exp_mantissa_3_5(timing.tx_pll_boost_time));
        out.u8(map::TMGTXSETTLE, exp_mantissa_3_5(timing.tx_pll_settle_time));
        out.u8(map::TMGRXBOOST, exp_mantissa_3_5(timing.rx_pll_boost_time));
        out.u8(map::TMGRXSETTLE, exp_mantissa_3_5(timing.rx_pll_settle_time));
        out.u8(map::TMGRXOFFSACQ, 0x00);
        out.u8(map::TMGRXCOARSEAGC, exp_mantissa_3_5(timing.rx_coarse_agc));
        out.u8(map::TMGRXAGC, exp_mantissa_3_5(timing.rx_agc_settling));
        out.u8(map::TMGRXRSSI, exp_mantissa_3_5(timing.rx_rssi_settling));

        let preamble_1 = match self.wakeup {
            Some((wakeup, _)) => wakeup.listen_bits,
            None => timing.preamble_1_timeout,
        };
        out.u8(map::TMGRXPREAMBLE1, exp_mantissa_3_5(preamble_1));
        out.u8(map::TMGRXPREAMBLE2, exp_mantissa_3_5(timing.preamble_2_timeout));

        if let Some((wakeup, _)) = self.wakeup {
            out.u8(map::RSSIABSTHR, wakeup.rssi_threshold as u8);
        }
        // busy channel detection off
        out.u8(map::BGNDRSSITHR, 0x00);
        out.u8(map::PKTCHUNKSIZE, CHUNK_SIZE_240);
        out.u8(map::PKTMISCFLAGS, 0x00);
        out.u8(map::PKTSTOREFLAGS, self.config.store_flags.bits());
        out.u8(
            map::PKTACCEPTFLAGS,
            ALWAYS_ACCEPT | self.config.accept_flags.bits(),
        );
    }

    fn lposc_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        if self.wakeup.is_none() {
            return;
        }
        let reference = (self.config.f_xtal / crate::registers::LPOSC_HZ).min(0xFFFF);
        out.u16(map::LPOSCREF, reference as u16);
        out.u8(
            map::LPOSCCONFIG,
            (LposcFlags::ENABLE | LposcFlags::CALIBRATE_FALLING).bits(),
        );
    }

    fn dac_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        out.u16(map::DACVALUE, 0x000C);
        out.u8(map::DACCONFIG, self.config.dac_config);
    }

    fn tuning_section(&self, out: &mut Writes<SECTION_CAPACITY>) {
        out.u8(map::tuning::REF, 0x03);
        out.u8(map::tuning::F1C, 0x07);
        let values = match self.config.tuning {
            PerformanceTuning::RadioLab => [0x68, 0xFF, 0x84, 0x98],
            PerformanceTuning::Datasheet => [0x5C, 0x53, 0x76, 0x92],
        };
        for (addr, value) in [
            map::tuning::F21,
            map::tuning::F22,
            map::tuning::F23,
            map::tuning::F26,
        ]
        .into_iter()
        .zip(values)
        {
            out.u8(addr, value);
        }
        out.u8(map::tuning::F44, 0x25);
    }

    fn afsk_tones(&self) -> Option<(u16, u16)> {
        match self.modulation.modulation {
            Modulation::Afsk(afsk) => Some((afsk.space, afsk.mark)),
            _ => None,
        }
    }
}

/// Build stage: shared sections
#[derive(Debug)]
pub struct Shared;

/// Build stage: synthesizer known, path-specific writes allowed
#[derive(Debug)]
pub struct Synthesized;

/// Assembles a [`RegisterPlan`] stage by stage.
#[derive(Debug)]
pub struct PlanBuilder<'a, Stage> {
    context: &'a PlanContext<'a>,
    synth: Option<&'a SynthesizerState>,
    plan: RegisterPlan,
    _stage: PhantomData<Stage>,
}

impl<'a> PlanBuilder<'a, Shared> {
    pub fn new(context: &'a PlanContext<'a>) -> Self {
        Self {
            context,
            synth: None,
            plan: RegisterPlan {
                shared: Writes::new(),
                rx_only: Writes::new(),
                tx_only: Writes::new(),
            },
            _stage: PhantomData,
        }
    }

    /// Appends one shared register group.
    pub fn section(mut self, section: Section) -> Self {
        self.plan.shared.extend(&self.context.section(section));
        self
    }

    /// Appends every shared register group in order.
    pub fn shared(self) -> Self {
        Section::ALL
            .into_iter()
            .fold(self, |builder, section| builder.section(section))
    }

    /// Hands over the synthesizer state, unlocking the path-specific stage.
    pub fn synthesizer(self, synth: &'a SynthesizerState) -> PlanBuilder<'a, Synthesized> {
        PlanBuilder {
            context: self.context,
            synth: Some(synth),
            plan: self.plan,
            _stage: PhantomData,
        }
    }
}

impl<'a> PlanBuilder<'a, Synthesized> {
    /// Receive path: operating loop on synthesizer B, AFSK receive tones.
    pub fn receive(mut self) -> Self {
        let context = self.context;
        let out = &mut self.plan.rx_only;

        if let Some(synth) = self.synth {
            for (addr, value) in synthesizer_writes(&synth.b, synth.vco_type, PllLoopSettings::OPERATION)
            {
                out.u8(addr, value);
            }
        }
        if let Some((space, mark)) = context.afsk_tones() {
            out.u16(map::AFSKSPACE, context.derived.afsk_rx_tone(context.config, space));
            out.u16(map::AFSKMARK, context.derived.afsk_rx_tone(context.config, mark));
            out.u8(map::AFSKCTRL, context.derived.afsk_shift);
        }
        out.u8(map::tuning::F00, 0x0F);
        out.u8(map::tuning::F18, 0x02);
        self
    }

    /// Transmit path: operating loop on synthesizer A, AFSK transmit tones.
    pub fn transmit(mut self) -> Self {
        let context = self.context;
        let out = &mut self.plan.tx_only;

        if let Some(synth) = self.synth {
            for (addr, value) in synthesizer_writes(&synth.a, synth.vco_type, PllLoopSettings::OPERATION)
            {
                out.u8(addr, value);
            }
        }
        if let Some((space, mark)) = context.afsk_tones() {
            out.u16(map::AFSKSPACE, DerivedParameters::afsk_tx_tone(context.config, space));
            out.u16(map::AFSKMARK, DerivedParameters::afsk_tx_tone(context.config, mark));
        }
        out.u8(map::tuning::F00, 0x0F);
        out.u8(map::tuning::F18, 0x06);
        self
    }

    pub fn build(self) -> RegisterPlan {
        self.plan
    }
}

/// Plans every register for `modulation` on the board in `config`.
///
/// # Errors
/// Any [`ConfigurationError`]; nothing is planned for invalid inputs.
pub fn plan_registers(
    config: &RadioConfig,
    modulation: &ModulationParameters,
    wakeup: Option<&WakeupConfig>,
    synth: &SynthesizerState,
) -> Result<RegisterPlan, ConfigurationError> {
    let context = PlanContext::new(config, modulation, wakeup)?;
    let plan = PlanBuilder::new(&context)
        .shared()
        .synthesizer(synth)
        .receive()
        .transmit()
        .build();

    log::debug!(
        "ax::plan {} shared, {} rx, {} tx writes",
        plan.shared.len(),
        plan.rx_only.len(),
        plan.tx_only.len()
    );
    Ok(plan)
}

/// Crystal and pin writes done once at start-up, before any plan.
///
/// # Errors
/// * [`ConfigurationError::CrystalOutOfRange`]
/// * [`ConfigurationError::LoadCapacitance`] - the load capacitance cannot be set in XTALCAP
pub fn baseline_writes(config: &RadioConfig) -> Result<Writes<16>, ConfigurationError> {
    params::validate_crystal(config)?;

    let mut out = Writes::new();
    if config.clock_source == crate::config::ClockSource::Crystal && config.load_capacitance != 0 {
        out.u8(map::XTALCAP, params::xtal_capacitance(config.load_capacitance)?);
    }
    let (osc, ampl, f35) = params::xtal_control(config);
    out.u8(map::tuning::XTALOSC, osc);
    out.u8(map::tuning::XTALAMPL, ampl);
    out.u8(map::tuning::F35, f35);

    let pins = &config.pins;
    out.u8(map::PINFUNCSYSCLK, pins.sysclk);
    out.u8(map::PINFUNCDCLK, pins.dclk);
    out.u8(map::PINFUNCDATA, pins.data);
    out.u8(map::PINFUNCIRQ, pins.irq);
    out.u8(map::PINFUNCANTSEL, pins.antsel);
    out.u8(map::PINFUNCPWRAMP, pins.pwramp);
    Ok(out)
}

/// Writes the shared part of `plan`.
pub fn apply_shared<P: RegisterPort>(
    device: &mut Device<P>,
    plan: &RegisterPlan,
) -> Result<(), Error<P::Error>> {
    plan.shared.apply(device)
}

/// Writes the receive-only part of `plan`.
pub fn apply_rx<P: RegisterPort>(
    device: &mut Device<P>,
    plan: &RegisterPlan,
) -> Result<(), Error<P::Error>> {
    plan.rx_only.apply(device)
}

/// Writes the transmit-only part of `plan`.
pub fn apply_tx<P: RegisterPort>(
    device: &mut Device<P>,
    plan: &RegisterPlan,
) -> Result<(), Error<P::Error>> {
    plan.tx_only.apply(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClockSource, WakeupConfig};
    use crate::mock::SimRadio;
    use crate::synth::SynthesizerCalibrator;

    fn state() -> SynthesizerState {
        *SynthesizerCalibrator::new(&RadioConfig::default())
            .unwrap()
            .state()
    }

    fn plan(modulation: &ModulationParameters) -> RegisterPlan {
        plan_registers(&RadioConfig::default(), modulation, None, &state()).unwrap()
    }

    #[test]
    fn test_plan_never_touches_power_mode() {
        let plan = plan(&ModulationParameters::fsk_9600());
        assert!(!plan.shared.contains(map::PWRMODE));
        assert!(!plan.rx_only.contains(map::PWRMODE));
        assert!(!plan.tx_only.contains(map::PWRMODE));
    }

    #[test]
    fn test_shared_sections_in_order() {
        let plan = plan(&ModulationParameters::fsk_9600());
        let position = |addr| plan.shared.iter().position(|(a, _)| a == addr).unwrap();

        assert_eq!(plan.shared.iter().next(), Some((map::MODULATION, 0x08)));
        assert!(position(map::PINFUNCSYSCLK) < position(map::IFFREQ));
        assert!(position(map::IFFREQ) < position(map::RXPARAMSETS));
        assert!(position(map::RXPARAMSETS) < position(map::MODCFGF));
        assert!(position(map::MODCFGF) < position(map::PKTADDRCFG));
        assert!(position(map::MATCH1PAT) < position(map::TMGTXBOOST));
        assert!(position(map::DACCONFIG) < position(map::tuning::F44));
    }

    #[test]
    fn test_multibyte_registers_msb_first() {
        let plan = plan(&ModulationParameters::fsk_9600());
        let writes: heapless::Vec<(u16, u8), SHARED_CAPACITY> = plan.shared.iter().collect();
        let start = writes.iter().position(|(a, _)| *a == map::TXRATE).unwrap();

        // 9600 bps on 48 MHz: 9600 * 2^24 / 48e6 = 3355 = 0x000D1B
        assert_eq!(writes[start], (map::TXRATE, 0x00));
        assert_eq!(writes[start + 1], (map::TXRATE + 1, 0x0D));
        assert_eq!(writes[start + 2], (map::TXRATE + 2, 0x1B));
    }

    #[test]
    fn test_parameter_sets_follow_reception_mode() {
        let packet = plan(&ModulationParameters::fsk_9600());
        assert_eq!(packet.shared.value(map::RXPARAMSETS), Some(0xF4));
        assert!(packet.shared.contains(map::RX_PARAMETER_SETS[0]));
        assert!(!packet.shared.contains(map::RX_PARAMETER_SETS[2]));

        let continuous = plan(&ModulationParameters::gmsk_hdlc_fec());
        assert_eq!(continuous.shared.value(map::RXPARAMSETS), Some(0xFF));
        assert!(!continuous.shared.contains(map::RX_PARAMETER_SETS[0]));
        assert!(continuous.shared.contains(map::RX_PARAMETER_SETS[3]));
        assert_eq!(continuous.shared.value(map::FEC), Some(0x13));
    }

    #[test]
    fn test_path_writes_load_operating_loop() {
        let plan = plan(&ModulationParameters::fsk_9600());

        assert_eq!(plan.rx_only.value(map::PLLLOOP), Some(0x0B));
        assert_eq!(plan.rx_only.value(map::PLLCPI), Some(16));
        assert_eq!(plan.rx_only.value(map::tuning::F18), Some(0x02));
        assert_eq!(plan.tx_only.value(map::tuning::F18), Some(0x06));
        assert!(!plan.tx_only.contains(map::AFSKMARK));
    }

    #[test]
    fn test_afsk_tones_per_direction() {
        let plan = plan(&ModulationParameters::aprs());
        // 1200 Hz * 2^18 / 48 MHz
        assert_eq!(plan.tx_only.value(map::AFSKMARK + 1), Some(7));
        assert!(plan.rx_only.contains(map::AFSKCTRL));
    }

    #[test]
    fn test_variable_and_fixed_length_formats() {
        let variable = plan(&ModulationParameters::gmsk());
        assert_eq!(variable.shared.value(map::PKTLENCFG), Some(0x80));
        assert_eq!(variable.shared.value(map::MATCH0PAT), Some(0x55));
        assert_eq!(variable.shared.value(map::MATCH0PAT + 1), Some(0x33));

        let fixed = plan(&ModulationParameters {
            fixed_packet_length: 40,
            ..ModulationParameters::gmsk()
        });
        assert_eq!(fixed.shared.value(map::PKTLENCFG), Some(0x00));
        assert_eq!(fixed.shared.value(map::PKTLENOFFSET), Some(40));
    }

    #[test]
    fn test_wakeup_plan_sets_listen_window_and_lposc() {
        let wakeup = WakeupConfig::new(1000);
        let plan = plan_registers(
            &RadioConfig::default(),
            &ModulationParameters::fsk_9600(),
            Some(&wakeup),
            &state(),
        )
        .unwrap();

        assert_eq!(plan.shared.value(map::WAKEUPFREQ + 1), Some(0x80));
        assert_eq!(plan.shared.value(map::TMGRXPREAMBLE1), Some(exp_mantissa_3_5(32)));
        assert_eq!(plan.shared.value(map::RSSIABSTHR), Some(-35i8 as u8));
        assert_eq!(plan.shared.value(map::LPOSCCONFIG), Some(0x11));
        // 48 MHz / 640 = 75000, capped
        assert_eq!(plan.shared.value(map::LPOSCREF), Some(0xFF));
    }

    #[test]
    fn test_invalid_parameters_produce_no_plan() {
        let bad = ModulationParameters {
            bitrate: 0,
            ..ModulationParameters::fsk_9600()
        };
        assert_eq!(
            plan_registers(&RadioConfig::default(), &bad, None, &state()),
            Err(ConfigurationError::BitrateOutOfRange(0))
        );
    }

    #[test]
    fn test_apply_coalesces_consecutive_writes() {
        let mut device = Device::new(SimRadio::new());
        let plan = plan(&ModulationParameters::fsk_9600());

        apply_shared(&mut device, &plan).unwrap();

        assert_eq!(device.port().register(map::MODULATION), 0x08);
        assert_eq!(device.port().register(map::TXRATE + 2), 0x1B);
        assert!(device.port().block_writes() < plan.shared.len());
    }

    #[test]
    fn test_baseline_validates_load_capacitance() {
        let config = RadioConfig {
            load_capacitance: 5,
            ..RadioConfig::default().with_xtal(16_000_000, ClockSource::Crystal)
        };
        assert_eq!(
            baseline_writes(&config),
            Err(ConfigurationError::LoadCapacitance(5))
        );

        let ok = baseline_writes(&RadioConfig::default()).unwrap();
        assert_eq!(ok.value(map::tuning::XTALOSC), Some(0x04));
        assert_eq!(ok.value(map::tuning::F35), Some(0x11));
    }
}
