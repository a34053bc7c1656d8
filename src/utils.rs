//! Buffer, DSP and interpolation helpers used by the grain renderer.

pub mod buffer;
pub mod dsp;
pub mod interpolation;
pub mod window;
