//! Register definitions for the AX5043
//! Taken from the AX5043 datasheet and programming manual

mod fifo;
pub mod map;
mod synth;
mod system;
mod wakeup;

pub use fifo::*;
pub use synth::*;
pub use system::*;
pub use wakeup::*;
