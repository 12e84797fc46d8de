//! Register addresses
//!
//! Flat address map for the registers the driver programs as plain bytes. Registers with a
//! typed representation live in the sibling modules and carry their address in their
//! `#[register]` attribute; they are listed here too so the planner and the simulator can
//! refer to every address through one table.

pub const SILICONREVISION: u16 = 0x000;
pub const SCRATCH: u16 = 0x001;
pub const PWRMODE: u16 = 0x002;
pub const POWSTAT: u16 = 0x003;
pub const POWSTICKYSTAT: u16 = 0x004;
pub const IRQMASK: u16 = 0x006;
pub const RADIOEVENTMASK: u16 = 0x008;
pub const IRQREQUEST: u16 = 0x00C;
pub const RADIOEVENTREQ: u16 = 0x00E;

pub const MODULATION: u16 = 0x010;
pub const ENCODING: u16 = 0x011;
pub const FRAMING: u16 = 0x012;
pub const CRCINIT: u16 = 0x014;
pub const FEC: u16 = 0x018;
pub const FECSYNC: u16 = 0x019;
pub const FECSTATUS: u16 = 0x01A;
pub const RADIOSTATE: u16 = 0x01C;
pub const XTALSTATUS: u16 = 0x01D;

pub const PINFUNCSYSCLK: u16 = 0x021;
pub const PINFUNCDCLK: u16 = 0x022;
pub const PINFUNCDATA: u16 = 0x023;
pub const PINFUNCIRQ: u16 = 0x024;
pub const PINFUNCANTSEL: u16 = 0x025;
pub const PINFUNCPWRAMP: u16 = 0x026;

pub const FIFOSTAT: u16 = 0x028;
pub const FIFODATA: u16 = 0x029;
pub const FIFOCOUNT: u16 = 0x02A;
pub const FIFOFREE: u16 = 0x02C;
pub const FIFOTHRESH: u16 = 0x02E;

pub const PLLLOOP: u16 = 0x030;
pub const PLLCPI: u16 = 0x031;
pub const PLLVCODIV: u16 = 0x032;
pub const PLLRANGINGA: u16 = 0x033;
pub const FREQA: u16 = 0x034;
pub const PLLLOOPBOOST: u16 = 0x038;
pub const PLLCPIBOOST: u16 = 0x039;
pub const PLLRANGINGB: u16 = 0x03B;
pub const FREQB: u16 = 0x03C;

pub const RSSI: u16 = 0x040;
pub const BGNDRSSI: u16 = 0x041;
pub const TRKRFFREQ: u16 = 0x04D;

pub const WAKEUPTIMER: u16 = 0x068;
pub const WAKEUP: u16 = 0x06A;
pub const WAKEUPFREQ: u16 = 0x06C;
pub const WAKEUPXOEARLY: u16 = 0x06E;

pub const IFFREQ: u16 = 0x100;
pub const DECIMATION: u16 = 0x102;
pub const RXDATARATE: u16 = 0x103;
pub const MAXDROFFSET: u16 = 0x106;
pub const MAXRFOFFSET: u16 = 0x109;
pub const FSKDMAX: u16 = 0x10C;
pub const FSKDMIN: u16 = 0x10E;
pub const AFSKSPACE: u16 = 0x110;
pub const AFSKMARK: u16 = 0x112;
pub const AFSKCTRL: u16 = 0x114;
pub const AMPLFILTER: u16 = 0x115;
pub const RXPARAMSETS: u16 = 0x117;

/// Base addresses of the four receiver parameter sets.
pub const RX_PARAMETER_SETS: [u16; 4] = [0x120, 0x130, 0x140, 0x150];

/// Offsets inside a receiver parameter set.
pub mod rx_set {
    pub const AGCGAIN: u16 = 0x0;
    pub const AGCTARGET: u16 = 0x1;
    pub const AGCAHYST: u16 = 0x2;
    pub const AGCMINMAX: u16 = 0x3;
    pub const TIMEGAIN: u16 = 0x4;
    pub const DRGAIN: u16 = 0x5;
    pub const PHASEGAIN: u16 = 0x6;
    pub const FREQGAINA: u16 = 0x7;
    pub const FREQGAINB: u16 = 0x8;
    pub const FREQGAINC: u16 = 0x9;
    pub const FREQGAIND: u16 = 0xA;
    pub const AMPLGAIN: u16 = 0xB;
    pub const FREQDEV: u16 = 0xC;
    pub const FOURFSK: u16 = 0xE;
    pub const BBOFFSRES: u16 = 0xF;
}

pub const MODCFGF: u16 = 0x160;
pub const FSKDEV: u16 = 0x161;
pub const MODCFGA: u16 = 0x164;
pub const TXRATE: u16 = 0x165;
pub const TXPWRCOEFFB: u16 = 0x16A;

pub const PLLVCOI: u16 = 0x180;
pub const PLLVCOIR: u16 = 0x181;
pub const PLLLOCKDET: u16 = 0x182;
pub const PLLRNGCLK: u16 = 0x183;
pub const XTALCAP: u16 = 0x184;
pub const BBTUNE: u16 = 0x188;
pub const BBOFFSCAP: u16 = 0x189;

pub const PKTADDRCFG: u16 = 0x200;
pub const PKTLENCFG: u16 = 0x201;
pub const PKTLENOFFSET: u16 = 0x202;
pub const PKTMAXLEN: u16 = 0x203;

pub const MATCH0PAT: u16 = 0x210;
pub const MATCH0LEN: u16 = 0x214;
pub const MATCH0MIN: u16 = 0x215;
pub const MATCH0MAX: u16 = 0x216;
pub const MATCH1PAT: u16 = 0x218;
pub const MATCH1LEN: u16 = 0x21C;
pub const MATCH1MIN: u16 = 0x21D;
pub const MATCH1MAX: u16 = 0x21E;

pub const TMGTXBOOST: u16 = 0x220;
pub const TMGTXSETTLE: u16 = 0x221;
pub const TMGRXBOOST: u16 = 0x223;
pub const TMGRXSETTLE: u16 = 0x224;
pub const TMGRXOFFSACQ: u16 = 0x225;
pub const TMGRXCOARSEAGC: u16 = 0x226;
pub const TMGRXAGC: u16 = 0x227;
pub const TMGRXRSSI: u16 = 0x228;
pub const TMGRXPREAMBLE1: u16 = 0x229;
pub const TMGRXPREAMBLE2: u16 = 0x22A;
pub const RSSIABSTHR: u16 = 0x22D;
pub const BGNDRSSITHR: u16 = 0x22F;
pub const PKTCHUNKSIZE: u16 = 0x230;
pub const PKTMISCFLAGS: u16 = 0x231;
pub const PKTSTOREFLAGS: u16 = 0x232;
pub const PKTACCEPTFLAGS: u16 = 0x233;

pub const LPOSCCONFIG: u16 = 0x310;
pub const LPOSCREF: u16 = 0x314;

pub const DACVALUE: u16 = 0x330;
pub const DACCONFIG: u16 = 0x332;

/// Performance tuning registers. The values written to them come from the AX5043
/// programming manual and AX-RadioLab, they have no documented field layout.
pub mod tuning {
    pub const F00: u16 = 0xF00;
    pub const F08: u16 = 0xF08;
    pub const REF: u16 = 0xF0D;
    pub const XTALOSC: u16 = 0xF10;
    pub const XTALAMPL: u16 = 0xF11;
    pub const F18: u16 = 0xF18;
    pub const F1C: u16 = 0xF1C;
    pub const F21: u16 = 0xF21;
    pub const F22: u16 = 0xF22;
    pub const F23: u16 = 0xF23;
    pub const F26: u16 = 0xF26;
    pub const F34: u16 = 0xF34;
    pub const F35: u16 = 0xF35;
    pub const F44: u16 = 0xF44;
    pub const F72: u16 = 0xF72;
}
