//! Synthesizer registers
//!
//! The AX5043 has one PLL with two frequency registers (A and B) and a ranging register for
//! each. By convention this driver keeps the transmit frequency in A and the receive
//! frequency in B. PLLLOOP/PLLCPI hold the normal loop settings, the BOOST copies are used
//! by the chip while it settles.
//!
//! See chapter 5.10-5.13 and 5.17 of the AX5043 programming manual.

use core::convert::Infallible;

use regiface::{register, FromByteArray, ReadableRegister, ToByteArray, WritableRegister};

/// PLL loop filter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopFilter {
    /// External loop filter
    External,
    /// Internal filter, 100 kHz bandwidth
    Internal100kHz,
    /// Internal filter, 200 kHz bandwidth
    Internal200kHz,
    /// Internal filter, 500 kHz bandwidth
    Internal500kHz,
}

/// Loop settings shared by PLLLOOP and PLLLOOPBOOST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopSettings {
    pub filter: LoopFilter,
    /// FILTEN: bring the loop filter out to the FILT pin
    pub filter_output: bool,
    /// DIRECT: bypass the external filter pin
    pub direct: bool,
    /// FREQSEL: use FREQB instead of FREQA
    pub select_b: bool,
}

impl LoopSettings {
    fn from_byte(value: u8) -> Self {
        Self {
            filter: match value & 0x03 {
                0 => LoopFilter::External,
                1 => LoopFilter::Internal100kHz,
                2 => LoopFilter::Internal200kHz,
                _ => LoopFilter::Internal500kHz,
            },
            filter_output: value & 0x04 != 0,
            direct: value & 0x08 != 0,
            select_b: value & 0x80 != 0,
        }
    }

    /// Raw register value
    pub fn to_byte(self) -> u8 {
        let mut value = match self.filter {
            LoopFilter::External => 0,
            LoopFilter::Internal100kHz => 1,
            LoopFilter::Internal200kHz => 2,
            LoopFilter::Internal500kHz => 3,
        };
        if self.filter_output {
            value |= 0x04;
        }
        if self.direct {
            value |= 0x08;
        }
        if self.select_b {
            value |= 0x80;
        }
        value
    }
}

/// PLL loop register (address: 0x030)
#[register(0x030u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllLoop {
    pub settings: LoopSettings,
}

/// PLL loop register used while settling (address: 0x038)
#[register(0x038u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllLoopBoost {
    pub settings: LoopSettings,
}

/// PLL charge pump current register (address: 0x031)
///
/// Charge pump current in multiples of 8.5 uA.
#[register(0x031u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllCpi {
    pub current: u8,
}

/// Which VCO the synthesizer runs from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VcoType {
    /// VCO1, fully internal
    #[default]
    Internal,
    /// VCO2, internal with an external inductor
    InternalExternalInductor,
    /// External VCO
    External,
}

/// Reference divider ahead of the phase detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RefDivider {
    Div1,
    Div2,
    Div4,
    Div8,
}

/// PLL VCO divider register (address: 0x032)
#[register(0x032u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct PllVcoDiv {
    pub ref_divider: RefDivider,
    /// RFDIV: divide the VCO output by two, required below 525 MHz with VCO1
    pub rf_divide_by_two: bool,
    pub vco: VcoType,
}

/// Ranging state shared by PLLRANGINGA and PLLRANGINGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ranging {
    /// VCOR: VCO range, the start point of a sweep on write and its result on read
    pub vco_range: u8,
    /// RNGSTART: set to start a sweep, cleared by the chip when done
    pub start: bool,
    /// RNGERR: the sweep found no range that locks
    pub error: bool,
    /// PLLLOCK: the PLL is locked right now
    pub locked: bool,
    /// STICKYLOCK: the PLL has not lost lock since the last read
    pub sticky_lock: bool,
}

impl Ranging {
    /// Sweep starting at `vco_range`
    pub fn start(vco_range: u8) -> Self {
        Self {
            vco_range: vco_range & 0x0F,
            start: true,
            ..Self::default()
        }
    }

    fn from_byte(value: u8) -> Self {
        Self {
            vco_range: value & 0x0F,
            start: value & 0x10 != 0,
            error: value & 0x20 != 0,
            locked: value & 0x40 != 0,
            sticky_lock: value & 0x80 != 0,
        }
    }

    /// Raw register value. Only VCOR and RNGSTART are writable.
    pub fn to_byte(self) -> u8 {
        (self.vco_range & 0x0F) | if self.start { 0x10 } else { 0x00 }
    }
}

/// Synthesizer A ranging register (address: 0x033)
#[register(0x033u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllRangingA {
    pub ranging: Ranging,
}

/// Synthesizer B ranging register (address: 0x03B)
#[register(0x03Bu16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllRangingB {
    pub ranging: Ranging,
}

/// Synthesizer A frequency register (address: 0x034)
///
/// `f_carrier = value · f_xtal / 2^24`
#[register(0x034u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct FrequencyA {
    pub value: u32,
}

/// Synthesizer B frequency register (address: 0x03C)
#[register(0x03Cu16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct FrequencyB {
    pub value: u32,
}

/// VCO current register (address: 0x180)
#[register(0x180u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllVcoi {
    /// VCOI_MANUAL: use `current` instead of the automatic bias
    pub manual: bool,
    /// Bias current in steps of 50 uA
    pub current: u8,
}

/// PLL ranging clock register (address: 0x183)
///
/// `f_rng = f_xtal / 2^(8 + divider)`
#[register(0x183u16)]
#[derive(Debug, Clone, Copy, ReadableRegister, WritableRegister)]
pub struct PllRngClk {
    pub divider: u8,
}

impl FromByteArray for PllLoop {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            settings: LoopSettings::from_byte(bytes[0]),
        })
    }
}

impl ToByteArray for PllLoop {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.settings.to_byte()])
    }
}

impl FromByteArray for PllLoopBoost {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            settings: LoopSettings::from_byte(bytes[0]),
        })
    }
}

impl ToByteArray for PllLoopBoost {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.settings.to_byte()])
    }
}

impl FromByteArray for PllCpi {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self { current: bytes[0] })
    }
}

impl ToByteArray for PllCpi {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.current])
    }
}

impl PllVcoDiv {
    /// Raw register value
    pub fn to_byte(self) -> u8 {
        let mut value = match self.ref_divider {
            RefDivider::Div1 => 0x00,
            RefDivider::Div2 => 0x01,
            RefDivider::Div4 => 0x02,
            RefDivider::Div8 => 0x03,
        };
        if self.rf_divide_by_two {
            value |= 0x04;
        }
        value |= match self.vco {
            VcoType::Internal => 0x00,
            VcoType::External => 0x10,
            VcoType::InternalExternalInductor => 0x30,
        };
        value
    }
}

impl FromByteArray for PllVcoDiv {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            ref_divider: match bytes[0] & 0x03 {
                0 => RefDivider::Div1,
                1 => RefDivider::Div2,
                2 => RefDivider::Div4,
                _ => RefDivider::Div8,
            },
            rf_divide_by_two: bytes[0] & 0x04 != 0,
            vco: match bytes[0] & 0x30 {
                0x00 => VcoType::Internal,
                0x10 => VcoType::External,
                _ => VcoType::InternalExternalInductor,
            },
        })
    }
}

impl ToByteArray for PllVcoDiv {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.to_byte()])
    }
}

impl FromByteArray for PllRangingA {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            ranging: Ranging::from_byte(bytes[0]),
        })
    }
}

impl ToByteArray for PllRangingA {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.ranging.to_byte()])
    }
}

impl FromByteArray for PllRangingB {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            ranging: Ranging::from_byte(bytes[0]),
        })
    }
}

impl ToByteArray for PllRangingB {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.ranging.to_byte()])
    }
}

impl FromByteArray for FrequencyA {
    type Error = Infallible;
    type Array = [u8; 4];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            value: u32::from_be_bytes(bytes),
        })
    }
}

impl ToByteArray for FrequencyA {
    type Error = Infallible;
    type Array = [u8; 4];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.value.to_be_bytes())
    }
}

impl FromByteArray for FrequencyB {
    type Error = Infallible;
    type Array = [u8; 4];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            value: u32::from_be_bytes(bytes),
        })
    }
}

impl ToByteArray for FrequencyB {
    type Error = Infallible;
    type Array = [u8; 4];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.value.to_be_bytes())
    }
}

impl FromByteArray for PllVcoi {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            manual: bytes[0] & 0x80 != 0,
            current: bytes[0] & 0x3F,
        })
    }
}

impl ToByteArray for PllVcoi {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([(self.current & 0x3F) | if self.manual { 0x80 } else { 0x00 }])
    }
}

impl FromByteArray for PllRngClk {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            divider: bytes[0] & 0x07,
        })
    }
}

impl ToByteArray for PllRngClk {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.divider & 0x07])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranging_start_encodes_rngstart() {
        assert_eq!(Ranging::start(8).to_byte(), 0x18);
        assert_eq!(Ranging::start(0x1A).to_byte(), 0x1A);
    }

    #[test]
    fn test_ranging_readback_flags() {
        let done = Ranging::from_byte(0x47);
        assert_eq!(done.vco_range, 7);
        assert!(done.locked && !done.start && !done.error);

        let failed = Ranging::from_byte(0x28);
        assert!(failed.error);
    }

    #[test]
    fn test_vcodiv_matches_manual_encoding() {
        let div = PllVcoDiv {
            ref_divider: RefDivider::Div2,
            rf_divide_by_two: true,
            vco: VcoType::Internal,
        };
        assert_eq!(div.to_byte(), 0x05);
        assert_eq!(PllVcoDiv::from_bytes([0x05]), Ok(div));
    }
}
