//! Driver configuration
//!
//! Everything the driver needs to know about the board and the link:
//!
//! - [`RadioConfig`]: crystal, VCO, transmit path, pin functions, synthesizer frequencies,
//!   packet store/accept flags and the deadlines of every bounded wait
//! - [`ModulationParameters`]: modulation, framing and bitrate of the link, with presets
//! - [`WakeupConfig`]: wake-on-radio period, listen window and RSSI threshold
//! - per-group parameter structs ([`BasebandParameters`], [`PllParameters`],
//!   [`PatternMatchParameters`], [`PacketControllerParameters`], [`PinConfiguration`],
//!   [`PerformanceTuning`]) that can be rewritten at runtime through the driver's setters
//!
//! All of them implement `Default` with values that work on a 48 MHz TCXO board at 433 MHz.

use bitflags::bitflags;

use crate::registers::VcoType;
use crate::wait::Poll;

/// Synthesizer frequency register set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// FREQA, used for transmit
    A,
    /// FREQB, used for receive
    B,
}

/// Reference clock source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Crystal across XTAL_P/XTAL_N
    Crystal,
    /// Temperature compensated oscillator driving XTAL_P
    #[default]
    Tcxo,
}

/// Which PA output the board uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitPath {
    /// Single ended output on ANTP1
    #[default]
    SingleEnded,
    /// Differential output on ANTP/ANTN
    Differential,
}

/// AFSK tone parameters, all in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfskParameters {
    pub deviation: u16,
    pub space: u16,
    pub mark: u16,
}

/// Modulation scheme
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    Ask,
    AskCoherent,
    Psk,
    /// Minimum shift keying, modulation index 0.5
    Msk,
    Fsk {
        /// Peak to peak deviation divided by bitrate
        modulation_index: f32,
    },
    Afsk(AfskParameters),
}

impl Modulation {
    /// MODULATION register value
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Ask => 0x00,
            Self::AskCoherent => 0x01,
            Self::Psk => 0x04,
            Self::Msk => 0x07,
            Self::Fsk { .. } => 0x08,
            Self::Afsk(_) => 0x0A,
        }
    }

    /// True for the frequency shift family, which share the FSK demodulator
    pub fn is_frequency_shift(self) -> bool {
        matches!(self, Self::Msk | Self::Fsk { .. } | Self::Afsk(_))
    }

    /// True for amplitude and phase modulation
    pub fn is_amplitude_or_phase(self) -> bool {
        matches!(self, Self::Ask | Self::AskCoherent | Self::Psk)
    }
}

bitflags! {
    /// Line encoding
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Encoding: u8 {
        const INVERT = 1 << 0;
        const DIFFERENTIAL = 1 << 1;
        const SCRAMBLE = 1 << 2;
        const MANCHESTER = 1 << 3;
        const NO_SYNC = 1 << 4;
    }
}

impl Encoding {
    /// Non return to zero
    pub const NRZ: Self = Self::empty();
    /// Non return to zero, inverted
    pub const NRZI: Self = Self::INVERT.union(Self::DIFFERENTIAL);
}

/// Frame format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FramingMode {
    Raw,
    RawSoftBits,
    Hdlc,
    RawPatternMatch,
    WirelessMbus,
    WirelessMbus4To6,
}

impl FramingMode {
    fn to_bits(self) -> u8 {
        match self {
            Self::Raw => 0x00,
            Self::RawSoftBits => 0x02,
            Self::Hdlc => 0x04,
            Self::RawPatternMatch => 0x06,
            Self::WirelessMbus => 0x08,
            Self::WirelessMbus4To6 => 0x0A,
        }
    }
}

/// CRC appended and checked by the framer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcMode {
    Off,
    Ccitt,
    Crc16,
    Dnp,
    Crc32,
}

impl CrcMode {
    fn to_bits(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::Ccitt => 0x10,
            Self::Crc16 => 0x20,
            Self::Dnp => 0x30,
            Self::Crc32 => 0x60,
        }
    }
}

/// Transmit frequency shaping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrequencyShaping {
    Unshaped,
    GaussianBt03,
    GaussianBt05,
}

impl FrequencyShaping {
    /// MODCFGF register value
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Unshaped => 0x00,
            Self::GaussianBt03 => 0x02,
            Self::GaussianBt05 => 0x03,
        }
    }
}

/// Modulation and framing of the link.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModulationParameters {
    pub modulation: Modulation,
    pub encoding: Encoding,
    pub framing: FramingMode,
    pub crc: CrcMode,
    pub shaping: FrequencyShaping,
    /// Bits per second
    pub bitrate: u32,
    /// Convolutional FEC. Requires HDLC framing and no inversion; both are forced.
    pub fec: bool,
    /// Fraction of full output power, 0.0..=1.0
    pub power: f32,
    /// Continuous reception (single RX parameter set) instead of occasional packets
    pub continuous: bool,
    /// Fixed packet length in bytes, 0 for a length byte
    pub fixed_packet_length: u8,
    /// Largest carrier offset the receiver corrects, in Hz. 0 selects the default.
    pub max_delta_carrier: u32,
}

impl ModulationParameters {
    /// Default carrier offset tolerance
    pub const DEFAULT_MAX_DELTA_CARRIER: u32 = 3000;

    fn fsk(modulation_index: f32, bitrate: u32) -> Self {
        Self {
            modulation: Modulation::Fsk { modulation_index },
            encoding: Encoding::NRZI,
            framing: FramingMode::Hdlc,
            crc: CrcMode::Ccitt,
            shaping: FrequencyShaping::Unshaped,
            bitrate,
            fec: false,
            power: 0.1,
            continuous: false,
            fixed_packet_length: 0,
            max_delta_carrier: 0,
        }
    }

    /// 9600 bps FSK, m = 2/3, HDLC with CRC-16
    pub fn fsk_9600() -> Self {
        Self {
            crc: CrcMode::Crc16,
            power: 0.9,
            ..Self::fsk(2.0 / 3.0, 9600)
        }
    }

    /// 2000 bps GFSK (BT 0.5), m = 2/3, HDLC with CCITT CRC
    pub fn gfsk_hdlc() -> Self {
        Self {
            shaping: FrequencyShaping::GaussianBt05,
            ..Self::fsk(2.0 / 3.0, 2000)
        }
    }

    /// 2000 bps GMSK with raw pattern-match framing
    pub fn gmsk() -> Self {
        Self {
            modulation: Modulation::Msk,
            framing: FramingMode::RawPatternMatch,
            shaping: FrequencyShaping::GaussianBt05,
            ..Self::fsk(0.5, 2000)
        }
    }

    /// 20 kbps GMSK, scrambled NRZ, HDLC with FEC, continuous reception
    pub fn gmsk_hdlc_fec() -> Self {
        Self {
            modulation: Modulation::Msk,
            encoding: Encoding::NRZ.union(Encoding::SCRAMBLE),
            shaping: FrequencyShaping::GaussianBt05,
            fec: true,
            continuous: true,
            ..Self::fsk(0.5, 20_000)
        }
    }

    /// 1200 bps FSK, scrambled NRZ, HDLC with FEC, continuous reception
    pub fn fsk_hdlc_fec() -> Self {
        Self {
            encoding: Encoding::NRZ.union(Encoding::SCRAMBLE),
            fec: true,
            continuous: true,
            ..Self::fsk(2.0 / 3.0, 1200)
        }
    }

    /// 1200 bps Bell 202 AFSK as used by APRS
    pub fn aprs() -> Self {
        Self {
            modulation: Modulation::Afsk(AfskParameters {
                deviation: 3000,
                space: 2200,
                mark: 1200,
            }),
            ..Self::fsk(0.0, 1200)
        }
    }

    /// 1000 bps coherent ASK without framing, for beacons
    pub fn ask() -> Self {
        Self {
            modulation: Modulation::AskCoherent,
            encoding: Encoding::NRZ,
            framing: FramingMode::Raw,
            crc: CrcMode::Off,
            power: 1.0,
            ..Self::fsk(0.0, 1000)
        }
    }

    /// Unmodulated carrier keyed through the FIFO
    pub fn cw() -> Self {
        Self {
            encoding: Encoding::NRZ,
            framing: FramingMode::Raw,
            crc: CrcMode::Off,
            power: 1.0,
            continuous: true,
            ..Self::fsk(0.0, 2)
        }
    }

    /// Encoding actually programmed: FEC drops inversion.
    pub fn effective_encoding(&self) -> Encoding {
        if self.fec && self.encoding.contains(Encoding::INVERT) {
            log::warn!("ax::config inversion is not supported with FEC, not inverting");
            self.encoding.difference(Encoding::INVERT)
        } else {
            self.encoding
        }
    }

    /// Framing actually programmed: FEC requires HDLC.
    pub fn effective_framing(&self) -> FramingMode {
        if self.fec && self.framing != FramingMode::Hdlc {
            log::warn!("ax::config FEC needs HDLC, forcing HDLC framing");
            FramingMode::Hdlc
        } else {
            self.framing
        }
    }

    /// FRAMING register value
    pub fn framing_byte(&self) -> u8 {
        self.effective_framing().to_bits() | self.crc.to_bits()
    }

    /// True if frames carry a leading length byte
    pub fn has_length_byte(&self) -> bool {
        self.effective_framing() != FramingMode::Hdlc && self.fixed_packet_length == 0
    }

    /// Carrier offset the receiver is set up to correct
    pub fn max_delta_carrier_hz(&self) -> u32 {
        if self.max_delta_carrier == 0 {
            Self::DEFAULT_MAX_DELTA_CARRIER
        } else {
            self.max_delta_carrier
        }
    }
}

impl Default for ModulationParameters {
    fn default() -> Self {
        Self::fsk_9600()
    }
}

bitflags! {
    /// Metadata the packet controller stores in the FIFO with every received frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StoreFlags: u8 {
        const TIMER = 1 << 0;
        const FREQUENCY_OFFSET = 1 << 1;
        const RF_FREQUENCY_OFFSET = 1 << 2;
        const DATARATE = 1 << 3;
        const RSSI = 1 << 4;
        const CRC_BYTES = 1 << 5;
        const ANTENNA_RSSI = 1 << 6;
    }
}

bitflags! {
    /// Frames the packet controller passes on despite an error
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcceptFlags: u8 {
        const RESIDUE = 1 << 0;
        const ABORTED = 1 << 1;
        const CRC_FAILURES = 1 << 2;
        const ADDRESS_FAILURES = 1 << 3;
        const SIZE_FAILURES = 1 << 4;
        const MULTIPLE_CHUNKS = 1 << 5;
    }
}

/// Pin function registers (PINFUNC*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfiguration {
    pub sysclk: u8,
    pub dclk: u8,
    pub data: u8,
    pub irq: u8,
    pub antsel: u8,
    pub pwramp: u8,
}

impl Default for PinConfiguration {
    /// SYSCLK high, DCLK and DATA as modem outputs, IRQ as interrupt output, ANTSEL high,
    /// PWRAMP driving an external PA enable.
    fn default() -> Self {
        Self {
            sysclk: 0x01,
            dclk: 0x04,
            data: 0x02,
            irq: 0x03,
            antsel: 0x01,
            pwramp: 0x07,
        }
    }
}

/// Frequencies and VCO of the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SynthesizerParameters {
    /// Transmit frequency in Hz, `None` leaves synthesizer A unused
    pub frequency_a: Option<u32>,
    /// Receive frequency in Hz, `None` leaves synthesizer B unused
    pub frequency_b: Option<u32>,
    pub vco_type: VcoType,
}

impl SynthesizerParameters {
    /// Both synthesizers on the same frequency
    pub fn single(frequency: u32) -> Self {
        Self {
            frequency_a: Some(frequency),
            frequency_b: Some(frequency),
            vco_type: VcoType::Internal,
        }
    }

    pub fn frequency(&self, channel: Channel) -> Option<u32> {
        match channel {
            Channel::A => self.frequency_a,
            Channel::B => self.frequency_b,
        }
    }
}

impl Default for SynthesizerParameters {
    fn default() -> Self {
        Self::single(433_000_000)
    }
}

/// Baseband tuning (BBTUNE, BBOFFSCAP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BasebandParameters {
    pub tune: u8,
    pub offset_capacitors: u8,
}

impl Default for BasebandParameters {
    fn default() -> Self {
        Self {
            tune: 0x0F,
            offset_capacitors: 0x77,
        }
    }
}

/// VCO bias and ranging clock (PLLVCOI, PLLRNGCLK)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllParameters {
    /// Manual VCO bias in steps of 50 uA
    pub vco_current: u8,
    /// Ranging clock is `f_xtal / 2^(8 + divider)`
    pub ranging_clock_divider: u8,
}

impl Default for PllParameters {
    fn default() -> Self {
        Self {
            vco_current: 25,
            ranging_clock_divider: 5,
        }
    }
}

/// Values written to the undocumented tuning registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PerformanceTuning {
    /// Values from the datasheet
    Datasheet,
    /// Values generated by AX-RadioLab
    #[default]
    RadioLab,
}

/// Preamble and sync word matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternMatchParameters {
    /// MATCH1PAT: preamble pattern on raw bits
    pub preamble_pattern: u16,
    /// MATCH1LEN
    pub preamble_length: u8,
    /// MATCH1MAX: bits that must match, at most 15
    pub preamble_threshold: u8,
    /// MATCH0PAT: sync word, `None` derives it from the framing mode
    pub sync_word: Option<u32>,
    /// MATCH0LEN
    pub sync_length: u8,
    /// MATCH0MAX: bits that must match, at most 31
    pub sync_threshold: u8,
}

impl PatternMatchParameters {
    /// Sync word transmitted ahead of non-HDLC frames
    pub const SYNC_WORD: u32 = 0x5533_5533;
    /// HDLC frames are matched on a run of preamble instead
    pub const HDLC_SYNC_WORD: u32 = 0x5555_5555;
}

impl Default for PatternMatchParameters {
    fn default() -> Self {
        Self {
            preamble_pattern: 0x5555,
            preamble_length: 0x8A,
            preamble_threshold: 10,
            sync_word: None,
            sync_length: 0x1F,
            sync_threshold: 31,
        }
    }
}

/// Packet controller timing, in microseconds unless noted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketControllerParameters {
    pub tx_pll_boost_time: u32,
    pub tx_pll_settle_time: u32,
    pub rx_pll_boost_time: u32,
    pub rx_pll_settle_time: u32,
    pub rx_coarse_agc: u32,
    pub rx_agc_settling: u32,
    pub rx_rssi_settling: u32,
    /// Preamble 1 timeout in bit times
    pub preamble_1_timeout: u32,
    /// Preamble 2 timeout in bit times
    pub preamble_2_timeout: u32,
}

impl Default for PacketControllerParameters {
    fn default() -> Self {
        Self {
            tx_pll_boost_time: 108,
            tx_pll_settle_time: 60,
            rx_pll_boost_time: 108,
            rx_pll_settle_time: 60,
            rx_coarse_agc: 448,
            rx_agc_settling: 0,
            rx_rssi_settling: 3,
            preamble_1_timeout: 10,
            preamble_2_timeout: 23,
        }
    }
}

/// Wake-on-radio settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeupConfig {
    /// Time between wakeups
    pub period_ms: u32,
    /// How early the crystal is started ahead of each wakeup
    pub xo_early_ms: u32,
    /// Listen window after each wakeup, in bit times
    pub listen_bits: u32,
    /// RSSIABSTHR: absolute RSSI that counts as channel activity
    pub rssi_threshold: i8,
}

impl WakeupConfig {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            ..Self::default()
        }
    }
}

impl Default for WakeupConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            xo_early_ms: 2,
            listen_bits: 32,
            rssi_threshold: -35,
        }
    }
}

/// Deadlines of the bounded waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeouts {
    /// Crystal oscillator start-up
    pub oscillator: Poll,
    /// Modem supply ready
    pub modem_power: Poll,
    /// Room in the FIFO for the next chunk
    pub fifo_space: Poll,
    /// One hardware range sweep
    pub ranging: Poll,
    /// Added to the computed air time of a frame before declaring a TX timeout
    pub tx_margin_us: u32,
    /// Polling interval while waiting for TX completion and during WOR listen
    pub tx_poll_interval_us: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            oscillator: Poll::new(10_000, 100),
            modem_power: Poll::new(10_000, 100),
            fifo_space: Poll::new(100_000, 500),
            ranging: Poll::new(50_000, 100),
            tx_margin_us: 50_000,
            tx_poll_interval_us: 1_000,
        }
    }
}

/// Board and chip configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioConfig {
    /// Reference frequency in Hz
    pub f_xtal: u32,
    pub clock_source: ClockSource,
    /// Crystal load capacitance in pF, 0 leaves XTALCAP untouched
    pub load_capacitance: u8,
    pub transmit_path: TransmitPath,
    /// Upper bound applied to [`ModulationParameters::power`]
    pub transmit_power_limit: Option<f32>,
    pub synthesizer: SynthesizerParameters,
    pub store_flags: StoreFlags,
    /// Accepted in addition to address failures and residue
    pub accept_flags: AcceptFlags,
    pub pins: PinConfiguration,
    pub baseband: BasebandParameters,
    pub pll: PllParameters,
    pub tuning: PerformanceTuning,
    pub pattern_match: PatternMatchParameters,
    pub packet_controller: PacketControllerParameters,
    /// DACCONFIG bits beyond the delta-sigma mode
    pub dac_config: u8,
    pub timeouts: Timeouts,
}

impl RadioConfig {
    /// Lowest supported reference
    pub const MIN_XTAL: u32 = 16_000_000;
    /// Highest supported reference
    pub const MAX_XTAL: u32 = 50_000_000;

    /// Sets the reference frequency.
    pub fn with_xtal(mut self, f_xtal: u32, clock_source: ClockSource) -> Self {
        self.f_xtal = f_xtal;
        self.clock_source = clock_source;
        self
    }

    /// Sets both synthesizer frequencies.
    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.synthesizer.frequency_a = Some(frequency);
        self.synthesizer.frequency_b = Some(frequency);
        self
    }

    /// Sets the metadata stored with received frames.
    pub fn with_store_flags(mut self, store_flags: StoreFlags) -> Self {
        self.store_flags = store_flags;
        self
    }

    /// Replaces the wait deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Crystal divider the chip applies internally (F35 setting)
    pub fn xtal_divider(&self) -> u32 {
        if self.f_xtal < 24_800_000 {
            1
        } else {
            2
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            f_xtal: 48_000_000,
            clock_source: ClockSource::Tcxo,
            load_capacitance: 0,
            transmit_path: TransmitPath::SingleEnded,
            transmit_power_limit: None,
            synthesizer: SynthesizerParameters::default(),
            store_flags: StoreFlags::empty(),
            accept_flags: AcceptFlags::empty(),
            pins: PinConfiguration::default(),
            baseband: BasebandParameters::default(),
            pll: PllParameters::default(),
            tuning: PerformanceTuning::default(),
            pattern_match: PatternMatchParameters::default(),
            packet_controller: PacketControllerParameters::default(),
            dac_config: 0,
            timeouts: Timeouts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fec_forces_hdlc_without_inversion() {
        let mut params = ModulationParameters::gmsk();
        params.fec = true;
        params.encoding = Encoding::NRZI;

        assert_eq!(params.effective_framing(), FramingMode::Hdlc);
        assert!(!params.effective_encoding().contains(Encoding::INVERT));
    }

    #[test]
    fn test_length_byte_only_for_variable_non_hdlc() {
        assert!(!ModulationParameters::fsk_9600().has_length_byte());
        assert!(ModulationParameters::gmsk().has_length_byte());

        let fixed = ModulationParameters {
            fixed_packet_length: 32,
            ..ModulationParameters::gmsk()
        };
        assert!(!fixed.has_length_byte());
    }

    #[test]
    fn test_framing_byte_combines_mode_and_crc() {
        assert_eq!(ModulationParameters::fsk_9600().framing_byte(), 0x24);
        assert_eq!(ModulationParameters::gmsk().framing_byte(), 0x16);
    }

    #[test]
    fn test_xtal_divider_threshold() {
        assert_eq!(RadioConfig::default().xtal_divider(), 2);
        assert_eq!(
            RadioConfig::default()
                .with_xtal(16_000_000, ClockSource::Crystal)
                .xtal_divider(),
            1
        );
    }
}
