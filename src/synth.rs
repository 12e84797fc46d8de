//! Synthesizer calibration and frequency control
//!
//! The AX5043 VCO covers its tuning range in sixteen overlapping bands. Before the PLL can
//! lock, the chip has to be told which band to use; the hardware finds it with a range sweep
//! started through PLLRANGINGA/B. A band found this way is only good near the frequency it
//! was found at, so every retune is checked against the frequency of the last sweep and
//! re-ranged when it moved by more than `1/256` of it.
//!
//! [`SynthesizerCalibrator`] owns the state of both synthesizers (A for transmit, B for
//! receive) and performs sweeps, retunes and quick adjusts. The conversions between Hz and
//! the frequency registers are free functions so the planner can use them too.
//!
//! # Example
//! ```no_run
//! use ax5043::{Device, config::{Channel, RadioConfig}, synth::SynthesizerCalibrator, wait::Never};
//!
//! # fn demo<P: ax5043::RegisterPort, D: embedded_hal::delay::DelayNs>(
//! #     device: &mut Device<P>, delay: &mut D) -> Result<(), ax5043::Error<P::Error>> {
//! let mut synth = SynthesizerCalibrator::new(&RadioConfig::default())?;
//! let report = synth.do_vco_ranging(device, delay, &Never)?;
//!
//! // Nudge the receiver by 1.2 kHz, no sweep needed for a change this small
//! synth.adjust_frequency(device, delay, &Never, Channel::B, 1200)?;
//! # Ok(())
//! # }
//! ```

use embedded_hal::delay::DelayNs;

use crate::config::{Channel, RadioConfig};
use crate::device::{Device, RegisterPort};
use crate::error::{ConfigurationError, Error, HardwareError, WaitTarget};
use crate::registers::{
    map, FifoCmd, LoopFilter, LoopSettings, PllRangingA, PllRangingB, PllVcoDiv, PllVcoi, PowerMode,
    PwrMode, RadioStateRegister, Ranging, RefDivider, VcoType, XtalStatus,
};
use crate::wait::{into_error, Cancel, Poll};

/// Lowest frequency the synthesizer can produce
pub const MIN_FREQUENCY: u32 = 27_000_000;
/// Highest frequency the synthesizer can produce
pub const MAX_FREQUENCY: u32 = 1_050_000_000;
/// Below this the VCO output is divided by two
pub const RF_DIVIDER_THRESHOLD: u32 = 525_000_000;

/// Range a sweep starts from when none is known yet
const DEFAULT_VCO_RANGE: u8 = 8;
/// VCO bias forced during a sweep, 1350 uA on VCO1
const RANGING_VCO_CURRENT: u8 = 27;

/// Loop filter and charge pump of the PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllLoopSettings {
    pub filter: LoopFilter,
    /// Charge pump current in multiples of 8.5 uA
    pub charge_pump: u8,
}

impl PllLoopSettings {
    /// Narrow loop used while sweeping
    pub const RANGING: Self = Self {
        filter: LoopFilter::Internal100kHz,
        charge_pump: 8,
    };

    /// Wide loop used while transmitting or receiving
    pub const OPERATION: Self = Self {
        filter: LoopFilter::Internal500kHz,
        charge_pump: 16,
    };
}

/// State of one synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Synthesizer {
    /// Target frequency in Hz, `None` if the synthesizer is unused
    pub frequency: Option<u32>,
    /// Value last written to the frequency register
    pub register: u32,
    /// RF divide-by-two selected at the last sweep
    pub rf_divide_by_two: bool,
    /// VCO range found by the last successful sweep
    pub vco_range: Option<u8>,
    /// Frequency the last successful sweep ran at
    pub ranged_at: Option<u32>,
}

impl Synthesizer {
    fn new(frequency: Option<u32>) -> Self {
        Self {
            frequency,
            rf_divide_by_two: frequency.is_some_and(|f| f < RF_DIVIDER_THRESHOLD),
            ..Self::default()
        }
    }

    /// True once a sweep succeeded for this synthesizer.
    pub fn is_locked(&self) -> bool {
        self.vco_range.is_some()
    }

    /// True if tuning to `hz` moves too far from the ranged frequency for the range to hold.
    pub fn needs_ranging(&self, hz: u32) -> bool {
        match self.ranged_at {
            Some(ranged) => ranged.abs_diff(hz) > ranged / 256,
            None => true,
        }
    }

    fn invalidate(&mut self) {
        self.vco_range = None;
        self.ranged_at = None;
    }
}

/// Both synthesizers plus the VCO they run from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SynthesizerState {
    pub a: Synthesizer,
    pub b: Synthesizer,
    pub vco_type: VcoType,
}

impl SynthesizerState {
    pub fn get(&self, channel: Channel) -> &Synthesizer {
        match channel {
            Channel::A => &self.a,
            Channel::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut Synthesizer {
        match channel {
            Channel::A => &mut self.a,
            Channel::B => &mut self.b,
        }
    }
}

/// VCO ranges found by a sweep, `None` for unused synthesizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangingReport {
    pub a: Option<u8>,
    pub b: Option<u8>,
}

/// What [`SynthesizerCalibrator::adjust_frequency`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Adjustment {
    /// Only the frequency register was rewritten
    Retuned,
    /// The move was too large; both synthesizers were swept again and the chip is powered down
    Reranged(RangingReport),
}

/// Converts a frequency to its register value.
///
/// `hz · 2^24 / f_xtal` quantized to the nearest odd value; the LSB is kept set to avoid
/// spectral tones. Exact ties go up.
pub fn hz_to_register(hz: u32, f_xtal: u32) -> u32 {
    let half = (u64::from(hz) << 23) / u64::from(f_xtal.max(1));
    ((half << 1) | 1) as u32
}

/// Converts a frequency register value back to Hz, rounded to the nearest Hz.
pub fn register_to_hz(register: u32, f_xtal: u32) -> u32 {
    ((u64::from(register) * u64::from(f_xtal) + (1 << 23)) >> 24) as u32
}

/// Checks a frequency against the synthesizer range.
pub fn validate_frequency(hz: u32) -> Result<(), ConfigurationError> {
    if (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&hz) {
        Ok(())
    } else {
        Err(ConfigurationError::FrequencyOutOfRange(hz))
    }
}

/// Register writes that load `settings` for `synth`: PLLLOOP, PLLCPI, PLLVCODIV and the
/// divider-dependent tuning register.
pub fn synthesizer_writes(
    synth: &Synthesizer,
    vco_type: VcoType,
    settings: PllLoopSettings,
) -> [(u16, u8); 4] {
    let loop_settings = LoopSettings {
        filter: settings.filter,
        filter_output: false,
        direct: true,
        select_b: false,
    };
    let vco_div = PllVcoDiv {
        ref_divider: RefDivider::Div2,
        rf_divide_by_two: synth.rf_divide_by_two,
        vco: vco_type,
    };

    [
        (map::PLLLOOP, loop_settings.to_byte()),
        (map::PLLCPI, settings.charge_pump),
        (map::PLLVCODIV, vco_div.to_byte()),
        (
            map::tuning::F34,
            if synth.rf_divide_by_two { 0x28 } else { 0x08 },
        ),
    ]
}

fn frequency_register(channel: Channel) -> u16 {
    match channel {
        Channel::A => map::FREQA,
        Channel::B => map::FREQB,
    }
}

/// Owner of both synthesizers.
#[derive(Debug, Clone)]
pub struct SynthesizerCalibrator {
    state: SynthesizerState,
    f_xtal: u32,
    oscillator: Poll,
    ranging: Poll,
    tx_idle: Poll,
}

impl SynthesizerCalibrator {
    /// Creates a calibrator for the synthesizer frequencies in `config`.
    ///
    /// # Errors
    /// * [`ConfigurationError::FrequencyOutOfRange`] - a configured frequency is outside
    ///   27 MHz..=1050 MHz
    pub fn new(config: &RadioConfig) -> Result<Self, ConfigurationError> {
        let synth = &config.synthesizer;
        for hz in [synth.frequency_a, synth.frequency_b].into_iter().flatten() {
            validate_frequency(hz)?;
        }

        let timeouts = &config.timeouts;
        Ok(Self {
            state: SynthesizerState {
                a: Synthesizer::new(synth.frequency_a),
                b: Synthesizer::new(synth.frequency_b),
                vco_type: synth.vco_type,
            },
            f_xtal: config.f_xtal,
            oscillator: timeouts.oscillator,
            ranging: timeouts.ranging,
            tx_idle: Poll::new(timeouts.tx_margin_us, timeouts.tx_poll_interval_us),
        })
    }

    pub fn state(&self) -> &SynthesizerState {
        &self.state
    }

    pub fn synthesizer(&self, channel: Channel) -> &Synthesizer {
        self.state.get(channel)
    }

    /// Converts `hz` to a register value for this crystal.
    pub fn hz_to_register(&self, hz: u32) -> u32 {
        hz_to_register(hz, self.f_xtal)
    }

    /// Tunes `channel` to `hz` by writing its frequency register. The VCO range is not
    /// touched.
    ///
    /// # Errors
    /// * [`ConfigurationError::FrequencyOutOfRange`] - nothing was written
    /// * [`Error::Port`] - bus communication failed
    pub fn set_frequency_register<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
        channel: Channel,
        hz: u32,
    ) -> Result<u32, Error<P::Error>> {
        validate_frequency(hz)?;

        let register = hz_to_register(hz, self.f_xtal);
        device
            .port_mut()
            .write_block(frequency_register(channel), &register.to_be_bytes())
            .map_err(Error::Port)?;

        log::trace!("ax::synth freq {:?} {} Hz = {:#010x}", channel, hz, register);

        let synth = self.state.get_mut(channel);
        synth.frequency = Some(hz);
        synth.register = register;
        Ok(register)
    }

    fn write_frequencies<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
    ) -> Result<(), Error<P::Error>> {
        for channel in [Channel::A, Channel::B] {
            if let Some(hz) = self.state.get(channel).frequency {
                self.set_frequency_register(device, channel, hz)?;
            }
        }
        Ok(())
    }

    /// Loads `settings` into the PLL for `channel`.
    pub fn write_synthesizer_parameters<P: RegisterPort>(
        &self,
        device: &mut Device<P>,
        channel: Channel,
        settings: PllLoopSettings,
    ) -> Result<(), Error<P::Error>> {
        for (addr, value) in synthesizer_writes(self.state.get(channel), self.state.vco_type, settings) {
            device.write_u8(addr, value)?;
        }
        Ok(())
    }

    fn read_ranging<P: RegisterPort>(
        device: &mut Device<P>,
        channel: Channel,
    ) -> Result<Ranging, Error<P::Error>> {
        Ok(match channel {
            Channel::A => device.read_register::<PllRangingA>()?.ranging,
            Channel::B => device.read_register::<PllRangingB>()?.ranging,
        })
    }

    fn write_ranging<P: RegisterPort>(
        device: &mut Device<P>,
        channel: Channel,
        ranging: Ranging,
    ) -> Result<(), Error<P::Error>> {
        match channel {
            Channel::A => device.write_register(PllRangingA { ranging }),
            Channel::B => device.write_register(PllRangingB { ranging }),
        }
    }

    fn range_channel<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        channel: Channel,
    ) -> Result<u8, Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        let synth = self.state.get_mut(channel);
        let start = synth.vco_range.unwrap_or(DEFAULT_VCO_RANGE);
        if let Some(hz) = synth.frequency {
            synth.rf_divide_by_two = hz < RF_DIVIDER_THRESHOLD;
        }

        self.write_synthesizer_parameters(device, channel, PllLoopSettings::RANGING)?;
        Self::write_ranging(device, channel, Ranging::start(start))?;

        let result = self
            .ranging
            .poll(delay, cancel, || {
                let ranging = Self::read_ranging(device, channel)?;
                Ok((!ranging.start).then_some(ranging))
            })
            .map_err(into_error::<P::Error>(WaitTarget::Ranging))?;

        let synth = self.state.get_mut(channel);
        if result.error {
            log::warn!("ax::ranging {:?} failed from range {}", channel, start);
            synth.invalidate();
            return Err(HardwareError::RangingFailed(channel).into());
        }

        log::debug!("ax::ranging {:?} done, range {}", channel, result.vco_range);
        synth.vco_range = Some(result.vco_range);
        synth.ranged_at = synth.frequency;
        Ok(result.vco_range)
    }

    /// Sweeps the VCO range of every configured synthesizer.
    ///
    /// Puts the chip in STANDBY, writes both frequency registers, forces the VCO bias and
    /// waits for the crystal. Each used synthesizer is then swept starting at its last known
    /// range. The chip is left in POWERDOWN whatever the outcome.
    ///
    /// # Errors
    /// * [`HardwareError::RangingFailed`] - a sweep found no range that locks
    /// * [`HardwareError::Timeout`] - the crystal did not start or a sweep did not finish
    /// * [`Error::Cancelled`] - `cancel` fired
    /// * [`Error::Port`] - bus communication failed
    pub fn do_vco_ranging<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
    ) -> Result<RangingReport, Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        log::debug!("ax::ranging starting");

        let result = self.sweep(device, delay, cancel);
        let powerdown = device.write_register(PwrMode::new(PowerMode::PowerDown));

        // a failed power down outranks the sweep result
        powerdown?;
        result
    }

    fn sweep<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
    ) -> Result<RangingReport, Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        device.write_register(PwrMode::new(PowerMode::Standby))?;
        self.write_frequencies(device)?;
        device.write_register(PllVcoi {
            manual: true,
            current: RANGING_VCO_CURRENT,
        })?;

        self.oscillator
            .poll(delay, cancel, || {
                Ok(device.read_register::<XtalStatus>()?.running.then_some(()))
            })
            .map_err(into_error::<P::Error>(WaitTarget::Oscillator))?;

        // Both sweeps run even if the first fails so the report reflects each synthesizer.
        let mut report = RangingReport { a: None, b: None };
        let mut failure = None;
        for channel in [Channel::A, Channel::B] {
            if self.state.get(channel).frequency.is_none() {
                continue;
            }
            match self.range_channel(device, delay, cancel, channel) {
                Ok(range) => match channel {
                    Channel::A => report.a = Some(range),
                    Channel::B => report.b = Some(range),
                },
                Err(Error::Hardware(HardwareError::RangingFailed(c))) => {
                    failure.get_or_insert(HardwareError::RangingFailed(c));
                }
                Err(e) => return Err(e),
            }
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Moves `channel` by `offset_hz` from its current frequency.
    ///
    /// Waits for an ongoing transmission to end first. Small moves only rewrite the
    /// frequency register; a move of more than `1/256` of the ranged frequency sweeps both
    /// synthesizers again, which leaves the chip powered down.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - the synthesizer was never ranged, or the chip is in deep
    ///   sleep
    /// * [`ConfigurationError::FrequencyOutOfRange`] - the new frequency is outside the
    ///   synthesizer range
    /// * [`HardwareError::Timeout`] - the transmitter did not go idle; the FIFO was
    ///   cleared and the chip powered down
    /// * [`Error::Cancelled`] - `cancel` fired while waiting for the transmitter; the chip
    ///   was powered down
    /// * any error of [`Self::do_vco_ranging`]
    pub fn adjust_frequency<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        channel: Channel,
        offset_hz: i32,
    ) -> Result<Adjustment, Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        let synth = *self.state.get(channel);
        let (Some(current), true) = (synth.frequency, synth.is_locked()) else {
            return Err(Error::InvalidState);
        };
        let target = current
            .checked_add_signed(offset_hz)
            .ok_or(ConfigurationError::FrequencyOutOfRange(current))?;
        validate_frequency(target)?;

        if device.read_register::<PwrMode>()?.mode == PowerMode::DeepSleep {
            return Err(Error::InvalidState);
        }

        let idle = self
            .tx_idle
            .poll(delay, cancel, || {
                let state = device.read_register::<RadioStateRegister>()?.state;
                Ok((!state.is_transmitting()).then_some(()))
            })
            .map_err(into_error::<P::Error>(WaitTarget::TxIdle));
        if let Err(e) = idle {
            if e.is_port() {
                return Err(e);
            }
            log::warn!("ax::synth transmitter still busy ({}), powering down", e);
            device.write_register(FifoCmd::ClearData)?;
            device.write_register(PwrMode::new(PowerMode::PowerDown))?;
            return Err(e);
        }

        if synth.needs_ranging(target) {
            log::debug!("ax::synth {:?} moved to {} Hz, re-ranging", channel, target);

            let entry = self.state.get_mut(channel);
            entry.frequency = Some(target);
            entry.invalidate();
            let report = self.do_vco_ranging(device, delay, cancel)?;
            Ok(Adjustment::Reranged(report))
        } else {
            self.set_frequency_register(device, channel, target)?;
            Ok(Adjustment::Retuned)
        }
    }

    /// Moves `channel` by `offset_hz` without any lock, mode or distance check.
    ///
    /// Meant for drift correction while a link is active. The caller is responsible for
    /// keeping the move within `1/256` of the ranged frequency; anything larger may leave
    /// the PLL unlocked.
    pub fn force_quick_adjust_frequency<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
        channel: Channel,
        offset_hz: i32,
    ) -> Result<u32, Error<P::Error>> {
        let current = self
            .state
            .get(channel)
            .frequency
            .ok_or(Error::InvalidState)?;
        let target = current
            .checked_add_signed(offset_hz)
            .ok_or(ConfigurationError::FrequencyOutOfRange(current))?;

        self.set_frequency_register(device, channel, target)
    }

    /// Points the PLL at the frequency register of `channel` by setting or clearing FREQSEL
    /// in both loop registers.
    pub fn select_synthesizer<P: RegisterPort>(
        &self,
        device: &mut Device<P>,
        channel: Channel,
    ) -> Result<(), Error<P::Error>> {
        let select_b = channel == Channel::B;
        for addr in [map::PLLLOOP, map::PLLLOOPBOOST] {
            let value = device.read_u8(addr)?;
            let value = if select_b { value | 0x80 } else { value & 0x7F };
            device.write_u8(addr, value)?;
        }
        Ok(())
    }

    /// Forgets both ranging results, forcing a full sweep on the next ranging.
    pub fn invalidate(&mut self) {
        self.state.a.invalidate();
        self.state.b.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicBool;

    use super::*;
    use crate::mock::{NoopDelay, SimRadio};
    use crate::wait::Never;

    const F_XTAL: u32 = 48_000_000;

    fn calibrator() -> SynthesizerCalibrator {
        SynthesizerCalibrator::new(&RadioConfig::default()).unwrap()
    }

    #[test]
    fn test_register_lsb_always_set() {
        assert_eq!(hz_to_register(433_000_000, F_XTAL) & 1, 1);
        assert_eq!(hz_to_register(915_000_000, F_XTAL) & 1, 1);
    }

    #[test]
    fn test_frequency_round_trip_within_one_step() {
        let step = F_XTAL / (1 << 24) + 1;
        let mut hz = MIN_FREQUENCY;
        while hz <= MAX_FREQUENCY {
            let back = register_to_hz(hz_to_register(hz, F_XTAL), F_XTAL);
            assert!(back.abs_diff(hz) <= step, "{hz} -> {back}");
            hz += 997_331;
        }
        for hz in [MIN_FREQUENCY, MAX_FREQUENCY] {
            let back = register_to_hz(hz_to_register(hz, F_XTAL), F_XTAL);
            assert!(back.abs_diff(hz) <= step);
        }
    }

    #[test]
    fn test_out_of_range_frequency_rejected_before_write() {
        let mut device = Device::new(SimRadio::new());
        let mut synth = calibrator();

        let result = synth.set_frequency_register(&mut device, Channel::A, 2_000_000_000);
        assert_eq!(
            result,
            Err(Error::Configuration(ConfigurationError::FrequencyOutOfRange(
                2_000_000_000
            )))
        );
        assert!(device.port().writes_to(map::FREQA).is_empty());
    }

    #[test]
    fn test_ranging_reports_locked_range() {
        let mut device = Device::new(SimRadio::new().with_lock_range(Channel::A, Some(5)));
        let mut synth = calibrator();

        let report = synth.do_vco_ranging(&mut device, &mut NoopDelay, &Never).unwrap();

        assert_eq!(report.a, Some(5));
        assert!(synth.synthesizer(Channel::A).is_locked());
        assert_eq!(synth.synthesizer(Channel::A).ranged_at, Some(433_000_000));
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
        // 433 MHz needs the RF divider
        assert_eq!(device.port().register(map::tuning::F34), 0x28);
    }

    #[test]
    fn test_ranging_without_lock_fails() {
        let mut device = Device::new(SimRadio::new().with_lock_range(Channel::B, None));
        let mut synth = calibrator();

        let result = synth.do_vco_ranging(&mut device, &mut NoopDelay, &Never);

        assert_eq!(
            result,
            Err(Error::Hardware(HardwareError::RangingFailed(Channel::B)))
        );
        assert!(!synth.synthesizer(Channel::B).is_locked());
        assert!(synth.synthesizer(Channel::A).is_locked());
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
    }

    #[test]
    fn test_ranging_cancel_powers_down() {
        let mut sim = SimRadio::new();
        sim.halt_crystal(true);
        let mut device = Device::new(sim);
        let mut synth = calibrator();

        let result = synth.do_vco_ranging(&mut device, &mut NoopDelay, &AtomicBool::new(true));

        assert_eq!(result, Err(Error::Cancelled));
        assert!(!synth.synthesizer(Channel::A).is_locked());
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
    }

    fn transmitting() -> (Device<SimRadio>, SynthesizerCalibrator) {
        let mut device = Device::new(SimRadio::new());
        let mut synth = calibrator();
        synth.do_vco_ranging(&mut device, &mut NoopDelay, &Never).unwrap();

        device.port_mut().stall_tx(true);
        device.write_register(PwrMode::new(PowerMode::FullTx)).unwrap();
        device.write_fifo(&[0xE1, 0x03, 0x03, b'o', b'k']).unwrap();
        device.write_register(FifoCmd::Commit).unwrap();
        assert!(device
            .read_register::<RadioStateRegister>()
            .unwrap()
            .state
            .is_transmitting());
        (device, synth)
    }

    #[test]
    fn test_adjust_cancelled_while_transmitting_powers_down() {
        let (mut device, mut synth) = transmitting();

        let result = synth.adjust_frequency(
            &mut device,
            &mut NoopDelay,
            &AtomicBool::new(true),
            Channel::A,
            100,
        );

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
        assert!(!device
            .read_register::<RadioStateRegister>()
            .unwrap()
            .state
            .is_transmitting());
        assert_eq!(synth.synthesizer(Channel::A).frequency, Some(433_000_000));
    }

    #[test]
    fn test_adjust_times_out_while_transmitting_powers_down() {
        let (mut device, mut synth) = transmitting();

        let result = synth.adjust_frequency(&mut device, &mut NoopDelay, &Never, Channel::A, 100);

        assert_eq!(
            result,
            Err(Error::Hardware(HardwareError::Timeout(WaitTarget::TxIdle)))
        );
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
        assert!(device.port().fifo_clears() > 0);
    }

    #[test]
    fn test_adjust_requires_lock() {
        let mut device = Device::new(SimRadio::new());
        let mut synth = calibrator();

        let result = synth.adjust_frequency(&mut device, &mut NoopDelay, &Never, Channel::A, 500);
        assert_eq!(result, Err(Error::InvalidState));
    }

    #[test]
    fn test_small_adjust_retunes_large_adjust_reranges() {
        let mut device = Device::new(SimRadio::new());
        let mut synth = calibrator();
        synth.do_vco_ranging(&mut device, &mut NoopDelay, &Never).unwrap();

        let small = synth
            .adjust_frequency(&mut device, &mut NoopDelay, &Never, Channel::B, 1_200)
            .unwrap();
        assert_eq!(small, Adjustment::Retuned);
        assert_eq!(synth.synthesizer(Channel::B).frequency, Some(433_001_200));

        let large = synth
            .adjust_frequency(&mut device, &mut NoopDelay, &Never, Channel::B, 3_000_000)
            .unwrap();
        assert!(matches!(large, Adjustment::Reranged(_)));
        assert_eq!(synth.synthesizer(Channel::B).ranged_at, Some(436_001_200));
    }

    #[test]
    fn test_quick_adjust_skips_lock_check() {
        let mut device = Device::new(SimRadio::new());
        let mut synth = calibrator();

        let register = synth
            .force_quick_adjust_frequency(&mut device, Channel::A, -10_000)
            .unwrap();
        assert_eq!(register, hz_to_register(432_990_000, F_XTAL));
        assert_eq!(device.port().read_u32(map::FREQA), register);
    }

    #[test]
    fn test_select_synthesizer_toggles_freqsel() {
        let mut device = Device::new(SimRadio::new());
        let synth = calibrator();
        device.write_u8(map::PLLLOOP, 0x0B).unwrap();

        synth.select_synthesizer(&mut device, Channel::B).unwrap();
        assert_eq!(device.port().register(map::PLLLOOP), 0x8B);
        synth.select_synthesizer(&mut device, Channel::A).unwrap();
        assert_eq!(device.port().register(map::PLLLOOP), 0x0B);
    }
}
