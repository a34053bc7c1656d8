//! Fractional position sample reads for grain playback.

use std::ops::RangeInclusive;

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// Interpolation algorithm used for a single sample read.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum InterpolationMode {
    /// 2-point linear interpolation.
    Linear,
    /// 4-point, 3rd-order Hermite interpolation.
    Cubic,
}

impl InterpolationMode {
    /// Pitch ratios within this range play back with linear interpolation. Outside of it,
    /// resampling artifacts get audible and cubic interpolation is used.
    pub const LINEAR_PITCH_RANGE: RangeInclusive<f64> = 0.8..=1.2;

    /// Select the interpolation mode for the given pitch ratio.
    #[inline]
    pub fn for_pitch(pitch: f64) -> Self {
        if Self::LINEAR_PITCH_RANGE.contains(&pitch) {
            Self::Linear
        } else {
            Self::Cubic
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Number of interpolated reads per [`InterpolationMode`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterpolationStats {
    pub linear: u64,
    pub cubic: u64,
}

// -------------------------------------------------------------------------------------------------

/// Reads samples at fractional positions, picking linear or cubic interpolation depending on
/// the playback pitch. Keeps track of how many reads went through each branch.
#[derive(Debug, Default)]
pub struct SampleInterpolator {
    stats: InterpolationStats,
}

impl SampleInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read counters since creation or the last [`Self::take_stats`] call.
    pub fn stats(&self) -> InterpolationStats {
        self.stats
    }

    /// Return and reset the read counters.
    pub fn take_stats(&mut self) -> InterpolationStats {
        std::mem::take(&mut self.stats)
    }

    /// Read an interpolated sample from `buffer` at `position`, which gets wrapped into the
    /// buffer's range. Returns 0.0 for empty buffers.
    #[inline]
    pub fn read(&mut self, buffer: &[f32], position: f64, pitch: f64) -> f32 {
        match InterpolationMode::for_pitch(pitch) {
            InterpolationMode::Linear => {
                self.stats.linear += 1;
                read_linear(buffer, position)
            }
            InterpolationMode::Cubic => {
                self.stats.cubic += 1;
                read_cubic(buffer, position)
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Wrap `position` into `[0, len)` and split it into an index and fraction.
#[inline]
fn wrap_position(position: f64, len: usize) -> (usize, f32) {
    // true modulo: negative positions wrap around from the buffer's end
    let wrapped = position.rem_euclid(len as f64);
    let index = wrapped as usize;
    if index < len {
        (index, (wrapped - index as f64) as f32)
    } else {
        // rounding in rem_euclid may land exactly on len
        (0, 0.0)
    }
}

/// Linear interpolated read with wrap-around.
#[inline]
pub fn read_linear(buffer: &[f32], position: f64) -> f32 {
    let len = buffer.len();
    if len == 0 {
        return 0.0;
    }
    let (i0, fraction) = wrap_position(position, len);
    let i1 = if i0 + 1 < len { i0 + 1 } else { 0 };

    assume!(unsafe: i0 < len);
    let y0 = buffer[i0];
    assume!(unsafe: i1 < len);
    let y1 = buffer[i1];

    y0 + (y1 - y0) * fraction
}

/// Cubic Hermite interpolated read with wrap-around.
#[inline]
pub fn read_cubic(buffer: &[f32], position: f64) -> f32 {
    let len = buffer.len();
    if len == 0 {
        return 0.0;
    }
    let (i1, fraction) = wrap_position(position, len);
    let i0 = (i1 + len - 1) % len;
    let i2 = (i1 + 1) % len;
    let i3 = (i1 + 2) % len;

    assume!(unsafe: i0 < len);
    let y0 = buffer[i0];
    assume!(unsafe: i1 < len);
    let y1 = buffer[i1];
    assume!(unsafe: i2 < len);
    let y2 = buffer[i2];
    assume!(unsafe: i3 < len);
    let y3 = buffer[i3];

    // 4-point, 3rd-order Hermite (x-form), see Olli Niemitalo's "Polynomial Interpolators for
    // High-Quality Resampling of Oversampled Audio", p. 43
    let c0 = y1;
    let c1 = 0.5 * (y2 - y0);
    let c2 = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
    let c3 = 0.5 * (y3 - y0) + 1.5 * (y1 - y2);
    ((c3 * fraction + c2) * fraction + c1) * fraction + c0
}

// -------------------------------------------------------------------------------------------------
