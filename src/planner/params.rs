//! Derived tweakable parameters
//!
//! Numbers the AX5043 programming manual derives from crystal, bitrate and modulation:
//! receiver bandwidth and IF, decimation, data rate registers, loop gains of the four
//! receiver parameter sets, transmitter deviation and rate. All of it is computed once per
//! [`ModulationParameters`] and validated before the planner emits a single write.

use libm::{floorf, log2f, sqrtf};

use crate::config::{ClockSource, Modulation, ModulationParameters, RadioConfig, WakeupConfig};
use crate::error::ConfigurationError;
use crate::registers::LPOSC_HZ;

/// Slowest bitrate the modem handles
pub const MIN_BITRATE: u32 = 1;
/// Fastest bitrate the modem handles
pub const MAX_BITRATE: u32 = 125_000;

const PI: f32 = core::f32::consts::PI;

/// Rounds a non-negative value to the nearest integer, halves up.
fn round(value: f32) -> u32 {
    floorf(value + 0.5) as u32
}

/// Mantissa/exponent encoding used by TIMEGAIN and DRGAIN: `(mantissa << 4) | exponent`.
pub fn mantissa_exp_4_4(mut value: u32) -> u8 {
    let mut exp = 0u8;
    while value > 15 && exp < 15 {
        value >>= 1;
        exp += 1;
    }
    ((value as u8 & 0x0F) << 4) | exp
}

/// Exponent/mantissa encoding used by the packet controller timers: `(exponent << 5) | mantissa`.
pub fn exp_mantissa_3_5(mut value: u32) -> u8 {
    let mut exp = 0u8;
    while value > 31 && exp < 7 {
        value >>= 1;
        exp += 1;
    }
    (exp << 5) | (value as u8 & 0x1F)
}

/// Role of a receiver parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterSetKind {
    /// Before the first preamble match: fast settling
    InitialSettling,
    /// After the preamble matched
    AfterPattern1,
    /// While a packet is received: AGC frozen, slow loops
    During,
    /// Continuous reception uses this one set throughout
    Continuous,
}

/// Loop gains of one receiver parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxParameterSet {
    pub agc_attack: u8,
    pub agc_decay: u8,
    pub time_gain: u32,
    pub dr_gain: u32,
    pub filter_index: u8,
    pub phase_gain: u8,
    /// FREQGAINC/D
    pub rf_recovery_gain: u8,
    /// AMPLGAIN flag bits
    pub amplitude_flags: u8,
    pub amplitude_gain: u8,
    /// FREQDEV
    pub frequency_deviation: u16,
}

impl RxParameterSet {
    /// AGCGAIN register value
    pub fn agc_gain(&self) -> u8 {
        ((self.agc_decay & 0x0F) << 4) | (self.agc_attack & 0x0F)
    }

    /// PHASEGAIN register value
    pub fn phase_gain_byte(&self) -> u8 {
        ((self.filter_index & 0x03) << 6) | (self.phase_gain & 0x0F)
    }

    /// AMPLGAIN register value
    pub fn amplitude_gain_byte(&self) -> u8 {
        self.amplitude_flags | (self.amplitude_gain & 0x0F)
    }
}

/// AMPLGAIN: try to correct the amplitude on an AGC jump
const AMPLGAIN_AGC_CORRECT: u8 = 0x40;
/// AMPLGAIN: averaging instead of peak detection
const AMPLGAIN_AVERAGING: u8 = 0x80;

/// Everything the planner needs beyond the raw configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DerivedParameters {
    /// Crystal divider (1 or 2)
    pub xtal_divider: u32,
    /// Modulation index
    pub m: f32,
    pub rx_bandwidth: u32,
    pub f_baseband: u32,
    pub if_frequency: u32,
    pub iffreq: u16,
    pub decimation: u8,
    pub rx_data_rate: u32,
    pub max_rf_offset: u32,
    /// FSKDMAX, FSKDMIN is its complement
    pub fskd: u16,
    pub afsk_shift: u8,
    pub fskdev: u32,
    pub txrate: u32,
    pub power_coefficient: u16,
    /// Sets 0..=3, `None` where the mode does not use a set
    pub rx_sets: [Option<RxParameterSet>; 4],
}

/// True for the modulations whose receiver gains are tuned for amplitude/phase detection.
fn amplitude_detection(modulation: Modulation) -> bool {
    matches!(modulation, Modulation::Ask | Modulation::Psk)
}

fn validate_modulation(modulation: &ModulationParameters) -> Result<(), ConfigurationError> {
    if !(MIN_BITRATE..=MAX_BITRATE).contains(&modulation.bitrate) {
        return Err(ConfigurationError::BitrateOutOfRange(modulation.bitrate));
    }
    validate_power(modulation.power)?;

    match modulation.modulation {
        Modulation::Fsk { modulation_index } => {
            if !modulation_index.is_finite() || modulation_index < 0.0 {
                return Err(ConfigurationError::InvalidModulationIndex);
            }
        }
        Modulation::Afsk(afsk) => {
            if afsk.deviation == 0 || afsk.mark == 0 || afsk.space == 0 {
                return Err(ConfigurationError::InvalidAfskTones);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Checks a TX power fraction.
pub fn validate_power(power: f32) -> Result<(), ConfigurationError> {
    if power.is_finite() && (0.0..=1.0).contains(&power) {
        Ok(())
    } else {
        Err(ConfigurationError::PowerOutOfRange)
    }
}

/// TXPWRCOEFFB for `power`, limited by the board's power limit.
pub fn power_coefficient(config: &RadioConfig, power: f32) -> u16 {
    let power = match config.transmit_power_limit {
        Some(limit) if limit > 0.0 => power.min(limit),
        _ => power,
    };
    round(power * 4096.0).min(0x0FFF) as u16
}

/// Checks the crystal frequency.
pub fn validate_crystal(config: &RadioConfig) -> Result<(), ConfigurationError> {
    if (RadioConfig::MIN_XTAL..=RadioConfig::MAX_XTAL).contains(&config.f_xtal) {
        Ok(())
    } else {
        Err(ConfigurationError::CrystalOutOfRange(config.f_xtal))
    }
}

/// Wake timer values in LPOSC ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeTicks {
    pub period: u16,
    pub xo_early: u8,
}

/// Converts a wake configuration to wake timer ticks.
///
/// # Errors
/// * [`ConfigurationError::WakeTimerMisconfigured`] - the period rounds to zero ticks or
///   overflows the 16-bit timer, or the crystal would be started a full period early
pub fn wake_ticks(wakeup: &WakeupConfig) -> Result<WakeTicks, ConfigurationError> {
    let period = u64::from(wakeup.period_ms) * u64::from(LPOSC_HZ) / 1000;
    let xo_early = (u64::from(wakeup.xo_early_ms) * u64::from(LPOSC_HZ) / 1000).max(1);

    if period == 0 || period > 0xFFFF || xo_early >= period || xo_early > 0xFF {
        return Err(ConfigurationError::WakeTimerMisconfigured);
    }
    Ok(WakeTicks {
        period: period as u16,
        xo_early: xo_early as u8,
    })
}

/// XTALCAP value for a load capacitance in pF.
pub fn xtal_capacitance(load_capacitance: u8) -> Result<u8, ConfigurationError> {
    match load_capacitance {
        3 => Ok(0),
        8 => Ok(1),
        9..=39 => Ok((load_capacitance - 8) << 1),
        other => Err(ConfigurationError::LoadCapacitance(other)),
    }
}

/// XTALOSC, XTALAMPL and the divider tuning register for the clock source.
pub fn xtal_control(config: &RadioConfig) -> (u8, u8, u8) {
    let (osc, ampl) = match config.clock_source {
        ClockSource::Tcxo => (0x04, 0x00),
        ClockSource::Crystal if config.f_xtal > 43_000_000 => (0x0D, 0x07),
        ClockSource::Crystal => (0x03, 0x07),
    };
    let f35 = if config.xtal_divider() == 1 { 0x10 } else { 0x11 };
    (osc, ampl, f35)
}

impl DerivedParameters {
    /// Derives and validates every parameter for `modulation` on the board in `config`.
    ///
    /// # Errors
    /// * [`ConfigurationError::CrystalOutOfRange`]
    /// * [`ConfigurationError::BitrateOutOfRange`]
    /// * [`ConfigurationError::PowerOutOfRange`]
    /// * [`ConfigurationError::InvalidModulationIndex`]
    /// * [`ConfigurationError::InvalidAfskTones`]
    /// * [`ConfigurationError::BandwidthTooWide`] - the channel filter needs a decimation below 1
    /// * [`ConfigurationError::DeviationTooLarge`] - the deviation does not fit FSKDEV or FSKDMAX
    pub fn derive(
        config: &RadioConfig,
        modulation: &ModulationParameters,
    ) -> Result<Self, ConfigurationError> {
        validate_crystal(config)?;
        validate_modulation(modulation)?;

        let f_xtal = config.f_xtal as f32;
        let xtal_divider = config.xtal_divider();
        let xtaldiv = xtal_divider as f32;
        let bitrate = modulation.bitrate as f32;

        let m = match modulation.modulation {
            Modulation::Fsk { modulation_index } => modulation_index,
            Modulation::Msk => 0.5,
            Modulation::Afsk(afsk) => 2.0 * f32::from(afsk.deviation) / bitrate,
            _ => 0.0,
        };

        let rx_bandwidth = match modulation.modulation {
            Modulation::Ask | Modulation::AskCoherent | Modulation::Psk => modulation.bitrate,
            Modulation::Fsk { .. } | Modulation::Msk => round(bitrate * (1.0 + m)),
            Modulation::Afsk(afsk) => u32::from(afsk.deviation),
        };
        let f_baseband = 5 * rx_bandwidth;

        let if_frequency = if modulation.modulation.is_amplitude_or_phase() {
            (7000 + modulation.bitrate).max(9380)
        } else {
            rx_bandwidth.max(3180)
        };
        let iffreq = round(if_frequency as f32 * xtaldiv * (1u32 << 20) as f32 / f_xtal);
        if iffreq > 0xFFFF {
            return Err(ConfigurationError::BandwidthTooWide);
        }

        let decimation = round(f_xtal / (16.0 * xtaldiv * f_baseband as f32));
        if decimation == 0 {
            return Err(ConfigurationError::BandwidthTooWide);
        }
        let decimation = decimation.min(127);

        let rx_data_rate = round(f_xtal * 128.0 / (xtaldiv * bitrate * decimation as f32));
        // RXDATARATE is 24 bits wide
        if rx_data_rate > 0xFF_FFFF {
            return Err(ConfigurationError::BitrateOutOfRange(modulation.bitrate));
        }
        let max_rf_offset = round(
            modulation.max_delta_carrier_hz() as f32 * (1u32 << 24) as f32 / f_xtal,
        ) & 0x0F_FFFF;

        let fskd = if modulation.modulation.is_frequency_shift() {
            let fskd = (260.0 * m) as u32;
            if fskd > 0xFFFF {
                return Err(ConfigurationError::DeviationTooLarge);
            }
            (fskd & !1) as u16
        } else {
            0x80
        };

        let afsk_shift = (2.0
            * log2f(f_xtal / (32.0 * bitrate * xtaldiv * decimation as f32)))
        .max(0.0) as u8;

        let fskdev = match modulation.modulation {
            Modulation::Fsk { .. } | Modulation::Msk => {
                let deviation = (m * 0.5 * bitrate) as u32;
                round(deviation as f32 * (1u32 << 24) as f32 / f_xtal)
            }
            Modulation::Afsk(afsk) => {
                round(f32::from(afsk.deviation) * (1u32 << 24) as f32 * 0.858785 / f_xtal)
            }
            _ => 0,
        };
        if fskdev > 0xFF_FFFF {
            return Err(ConfigurationError::DeviationTooLarge);
        }

        let txrate = round(bitrate * (1u32 << 24) as f32 / f_xtal);
        if modulation.bitrate >= config.f_xtal / 32 {
            log::warn!("ax::params bitrate too high for asynchronous wire mode");
        }

        let mut derived = Self {
            xtal_divider,
            m,
            rx_bandwidth,
            f_baseband,
            if_frequency,
            iffreq: iffreq as u16,
            decimation: decimation as u8,
            rx_data_rate,
            max_rf_offset,
            fskd,
            afsk_shift,
            fskdev,
            txrate,
            power_coefficient: power_coefficient(config, modulation.power),
            rx_sets: [None; 4],
        };

        if modulation.continuous {
            derived.rx_sets[3] =
                Some(derived.rx_parameter_set(config, modulation, ParameterSetKind::Continuous));
        } else {
            derived.rx_sets[0] = Some(derived.rx_parameter_set(
                config,
                modulation,
                ParameterSetKind::InitialSettling,
            ));
            derived.rx_sets[1] =
                Some(derived.rx_parameter_set(config, modulation, ParameterSetKind::AfterPattern1));
            derived.rx_sets[3] =
                Some(derived.rx_parameter_set(config, modulation, ParameterSetKind::During));
        }

        log::debug!(
            "ax::params m={} bw={} if={} decim={} rxdr={:#x}",
            m,
            rx_bandwidth,
            if_frequency,
            decimation,
            rx_data_rate
        );

        Ok(derived)
    }

    /// RXPARAMSETS value: which set is used in which receiver phase
    pub fn rx_parameter_sets_byte(&self, modulation: &ModulationParameters) -> u8 {
        if modulation.continuous {
            0xFF
        } else {
            0xF4
        }
    }

    /// AFSK receiver tone register value
    pub fn afsk_rx_tone(&self, config: &RadioConfig, tone: u16) -> u16 {
        round(
            f32::from(tone) * (1u32 << 16) as f32 * f32::from(self.decimation)
                * self.xtal_divider as f32
                / config.f_xtal as f32,
        )
        .min(0xFFFF) as u16
    }

    /// AFSK transmitter tone register value
    pub fn afsk_tx_tone(config: &RadioConfig, tone: u16) -> u16 {
        round(f32::from(tone) * (1u32 << 18) as f32 / config.f_xtal as f32).min(0xFFFF) as u16
    }

    fn agc_gain(&self, config: &RadioConfig, f_3db: u32) -> u8 {
        let ratio = 64.0 * PI * self.xtal_divider as f32 * f_3db as f32 / config.f_xtal as f32;
        (-log2f(1.0 - sqrtf(1.0 - ratio))) as u8
    }

    fn rf_recovery_gain(&self, config: &RadioConfig, frequency: u32) -> u32 {
        let ratio = config.f_xtal as f32 / (self.xtal_divider as f32 * 4.0 * frequency as f32);
        floorf(log2f(ratio) + 0.5).max(0.0) as u32
    }

    fn rx_parameter_set(
        &self,
        config: &RadioConfig,
        modulation: &ModulationParameters,
        kind: ParameterSetKind,
    ) -> RxParameterSet {
        let kind_is = |k: ParameterSetKind| kind == k;

        let mut agc_attack = self.agc_gain(config, modulation.bitrate);
        let mut agc_decay = agc_attack.saturating_add(3);
        if kind_is(ParameterSetKind::During) {
            agc_attack = 0x0F;
            agc_decay = 0x0F;
        } else {
            if kind_is(ParameterSetKind::Continuous) {
                agc_attack = agc_attack.saturating_add(2);
                agc_decay = agc_decay.saturating_add(2);
            }
            agc_attack = agc_attack.min(0x08);
            agc_decay = agc_decay.min(0x0E);
        }

        let (tmg_corr_frac, drg_corr_frac) = match kind {
            ParameterSetKind::InitialSettling => (4, 128),
            ParameterSetKind::AfterPattern1 => (16, 256),
            _ => (32, 512),
        };
        let time_limit = self.rx_data_rate.saturating_sub(1 << 12);
        let mut time_gain = self.rx_data_rate / tmg_corr_frac;
        if time_gain >= time_limit {
            time_gain = time_limit;
        }
        let dr_gain = self.rx_data_rate / drg_corr_frac;

        let amplitude = amplitude_detection(modulation.modulation);
        let phase_gain = if amplitude { 0x0 } else { 0x3 };

        let recovery_frequency = if modulation.modulation.is_frequency_shift() {
            modulation.bitrate
        } else {
            modulation.bitrate * 4
        };
        let mut rf_gain = self.rf_recovery_gain(config, recovery_frequency);
        if matches!(kind, ParameterSetKind::During | ParameterSetKind::Continuous) {
            rf_gain += 4;
        }
        if modulation.fec {
            rf_gain += 2;
        }
        let rf_recovery_gain = rf_gain.min(0x0D) as u8;

        let (amplitude_flags, amplitude_gain) = if amplitude {
            let gain = match kind {
                ParameterSetKind::InitialSettling | ParameterSetKind::AfterPattern1 => 2,
                _ => 8,
            };
            (AMPLGAIN_AGC_CORRECT | AMPLGAIN_AVERAGING, gain)
        } else {
            (0x00, 6)
        };

        let frequency_deviation = match kind {
            ParameterSetKind::AfterPattern1 | ParameterSetKind::During
                if modulation.modulation.is_frequency_shift() =>
            {
                round(self.m * 128.0 * 0.8).min(0xFFFF) as u16
            }
            _ => 0,
        };

        log::trace!(
            "ax::params set {:?} agc {:x}/{:x} tg {} drg {} rfg {}",
            kind,
            agc_attack,
            agc_decay,
            time_gain,
            dr_gain,
            rf_recovery_gain
        );

        RxParameterSet {
            agc_attack,
            agc_decay,
            time_gain,
            dr_gain,
            filter_index: 0x3,
            phase_gain,
            rf_recovery_gain,
            amplitude_flags,
            amplitude_gain,
            frequency_deviation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AfskParameters;

    #[test]
    fn test_mantissa_exponent_encoders() {
        assert_eq!(mantissa_exp_4_4(15), 0xF0);
        assert_eq!(mantissa_exp_4_4(16), 0x81);
        assert_eq!(mantissa_exp_4_4(3840), 0xF8);

        assert_eq!(exp_mantissa_3_5(31), 0x1F);
        assert_eq!(exp_mantissa_3_5(108), 0x5B);
        assert_eq!(exp_mantissa_3_5(448), 0x9C);
    }

    #[test]
    fn test_fsk_9600_on_48mhz() {
        let derived =
            DerivedParameters::derive(&RadioConfig::default(), &ModulationParameters::fsk_9600())
                .unwrap();

        assert_eq!(derived.xtal_divider, 2);
        assert_eq!(derived.rx_bandwidth, 16_000);
        assert_eq!(derived.if_frequency, 16_000);
        assert_eq!(derived.decimation, 19);
        assert_eq!(derived.fskd, 172);
        assert!(derived.rx_sets[0].is_some() && derived.rx_sets[2].is_none());
        let during = derived.rx_sets[3].unwrap();
        assert_eq!(during.agc_gain(), 0xFF);
        assert_eq!(during.frequency_deviation, 68);
    }

    #[test]
    fn test_continuous_uses_single_set() {
        let derived = DerivedParameters::derive(
            &RadioConfig::default(),
            &ModulationParameters::fsk_hdlc_fec(),
        )
        .unwrap();

        assert_eq!(derived.rx_sets.iter().flatten().count(), 1);
        assert_eq!(derived.rx_sets[3].unwrap().frequency_deviation, 0);
    }

    #[test]
    fn test_validation_rejects_bad_parameters() {
        let config = RadioConfig::default();

        let too_fast = ModulationParameters {
            bitrate: 500_000,
            ..ModulationParameters::fsk_9600()
        };
        assert_eq!(
            DerivedParameters::derive(&config, &too_fast),
            Err(ConfigurationError::BitrateOutOfRange(500_000))
        );

        let loud = ModulationParameters {
            power: 1.5,
            ..ModulationParameters::fsk_9600()
        };
        assert_eq!(
            DerivedParameters::derive(&config, &loud),
            Err(ConfigurationError::PowerOutOfRange)
        );

        let negative = ModulationParameters {
            modulation: Modulation::Fsk {
                modulation_index: -1.0,
            },
            ..ModulationParameters::fsk_9600()
        };
        assert_eq!(
            DerivedParameters::derive(&config, &negative),
            Err(ConfigurationError::InvalidModulationIndex)
        );

        let silent = ModulationParameters {
            modulation: Modulation::Afsk(AfskParameters {
                deviation: 3000,
                space: 0,
                mark: 1200,
            }),
            ..ModulationParameters::aprs()
        };
        assert_eq!(
            DerivedParameters::derive(&config, &silent),
            Err(ConfigurationError::InvalidAfskTones)
        );
    }

    #[test]
    fn test_rx_data_rate_must_fit_register() {
        let crawl = ModulationParameters {
            bitrate: 1,
            ..ModulationParameters::gmsk()
        };
        assert_eq!(
            DerivedParameters::derive(&RadioConfig::default(), &crawl),
            Err(ConfigurationError::BitrateOutOfRange(1))
        );

        let slow = ModulationParameters {
            bitrate: 100,
            ..ModulationParameters::gmsk()
        };
        let derived = DerivedParameters::derive(&RadioConfig::default(), &slow).unwrap();
        assert!(derived.rx_data_rate <= 0xFF_FFFF);
    }

    #[test]
    fn test_wide_channel_rejected() {
        let wide = ModulationParameters {
            bitrate: 100_000,
            modulation: Modulation::Fsk {
                modulation_index: 8.0,
            },
            ..ModulationParameters::fsk_9600()
        };
        assert_eq!(
            DerivedParameters::derive(&RadioConfig::default(), &wide),
            Err(ConfigurationError::BandwidthTooWide)
        );
    }

    #[test]
    fn test_power_limit_applies() {
        let config = RadioConfig {
            transmit_power_limit: Some(0.5),
            ..RadioConfig::default()
        };
        assert_eq!(power_coefficient(&config, 0.9), 2048);
        assert_eq!(power_coefficient(&RadioConfig::default(), 1.0), 0x0FFF);
    }

    #[test]
    fn test_wake_ticks() {
        let ticks = wake_ticks(&WakeupConfig::new(1000)).unwrap();
        assert_eq!(ticks.period, 640);
        assert_eq!(ticks.xo_early, 1);

        assert_eq!(
            wake_ticks(&WakeupConfig::new(1)),
            Err(ConfigurationError::WakeTimerMisconfigured)
        );
        assert_eq!(
            wake_ticks(&WakeupConfig::new(200_000)),
            Err(ConfigurationError::WakeTimerMisconfigured)
        );
    }

    #[test]
    fn test_xtal_capacitance() {
        assert_eq!(xtal_capacitance(3), Ok(0));
        assert_eq!(xtal_capacitance(8), Ok(1));
        assert_eq!(xtal_capacitance(12), Ok(8));
        assert_eq!(xtal_capacitance(5), Err(ConfigurationError::LoadCapacitance(5)));
    }
}
