//! Small, stateless DSP helpers used by the grain renderer.

// -------------------------------------------------------------------------------------------------

/// Drive applied by [`saturate`] at an edge amount of 1.0.
pub const EDGE_DRIVE: f32 = 8.0;

/// Output level above which [`soft_clip`] starts to bend the signal.
pub const SOFT_CLIP_KNEE: f32 = 0.8;

/// Voice count scaling of the non clean gain compensation curve.
pub const DENSE_COMPENSATION_FACTOR: f32 = 0.2;

// -------------------------------------------------------------------------------------------------

/// Boost the sample by `amount` and apply a hyperbolic tangent waveshaper. The result is
/// bounded to `-1.0..=1.0`. An amount of 0.0 leaves the sample untouched.
#[inline]
pub fn saturate(sample: f32, amount: f32) -> f32 {
    if amount <= 0.0 {
        sample
    } else {
        let drive = 1.0 + amount * (EDGE_DRIVE - 1.0);
        (sample * drive).tanh()
    }
}

/// Bounded soft clipper: transparent below [`SOFT_CLIP_KNEE`], tanh shaped towards ±1.0 above.
#[inline]
pub fn soft_clip(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= SOFT_CLIP_KNEE {
        sample
    } else if magnitude.is_nan() {
        0.0
    } else {
        let headroom = 1.0 - SOFT_CLIP_KNEE;
        let shaped = SOFT_CLIP_KNEE + headroom * ((magnitude - SOFT_CLIP_KNEE) / headroom).tanh();
        shaped.copysign(sample)
    }
}

/// Per voice gain compensation for a track playing `active_voices` grains.
///
/// Clean mode normalizes strictly by voice count, so summed voices can not exceed the level of
/// a single voice. Otherwise a gentler curve lets dense clouds get louder.
#[inline]
pub fn gain_compensation(clean_mode: bool, active_voices: usize) -> f32 {
    if clean_mode {
        1.0 / active_voices.max(1) as f32
    } else {
        1.0 / (1.0 + active_voices as f32 * DENSE_COMPENSATION_FACTOR)
    }
}

/// Left and right gains for a balance position in range `-1.0..=1.0`. The center position
/// keeps both channels at unity gain.
#[inline]
pub fn balance_gains(panning: f32) -> (f32, f32) {
    ((1.0 - panning).min(1.0), (1.0 + panning).min(1.0))
}

// -------------------------------------------------------------------------------------------------
