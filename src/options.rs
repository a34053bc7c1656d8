//! Construction time configuration of a [`GrainEngine`](crate::GrainEngine).

use std::time::Duration;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Policy which decides how far apart successive grains of a note are spawned.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
)]
#[repr(u8)]
pub enum GrainSpacing {
    /// Grains are spawned `density` times per second: `interval = 1 / density`.
    /// The note's `overlap` parameter is ignored.
    #[default]
    Density,
    /// Grains are spaced relative to their own length: `interval = grain_size / overlap`.
    /// The note's `density` parameter is ignored.
    Overlap,
}

// -------------------------------------------------------------------------------------------------

/// Options for creating a new [`GrainEngine`](crate::GrainEngine).
///
/// All buffers the render path uses are sized from these values when the engine gets created,
/// so none of them can be changed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Output sample rate in Hz. By default 44100.
    pub sample_rate: u32,

    /// Number of grain voices in the voice pool. By default 64.
    pub voice_count: usize,

    /// Number of tracks which can hold a sample buffer and schedule notes. By default 16.
    pub track_count: usize,

    /// Largest number of frames rendered in one go. Larger render calls get split up into
    /// chunks of this size. By default 1024.
    pub max_block_frames: usize,

    /// Fraction of the grain window occupied by each cosine taper (0.0 - 0.5).
    /// 0.0 results in a rectangular window. By default 0.25.
    pub window_alpha: f32,

    /// Grain spacing policy. By default [`GrainSpacing::Density`].
    pub grain_spacing: GrainSpacing,

    /// Fade out duration of stolen voices. By default 5 ms.
    pub steal_fade: Duration,

    /// Upper bound for the total number of samples (all tracks, all channels) in the sample
    /// arena. Attaching buffers beyond this limit gets rejected. By default 64 Mi samples.
    pub max_arena_samples: usize,

    /// Number of notes which can be pending (playing or waiting to play) at the same time.
    /// By default 256.
    pub max_pending_notes: usize,

    /// Size of the control to render thread message queue. By default 1024.
    pub message_queue_size: usize,

    /// Seed for the engine's random number generator. When None, the generator gets seeded
    /// from the OS. By default None.
    pub seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            voice_count: 64,
            track_count: 16,
            max_block_frames: 1024,
            window_alpha: 0.25,
            grain_spacing: GrainSpacing::Density,
            steal_fade: Duration::from_millis(5),
            max_arena_samples: 64 * 1024 * 1024,
            max_pending_notes: 256,
            message_queue_size: 1024,
            seed: None,
        }
    }
}

impl EngineOptions {
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn voice_count(mut self, voice_count: usize) -> Self {
        self.voice_count = voice_count;
        self
    }

    pub fn track_count(mut self, track_count: usize) -> Self {
        self.track_count = track_count;
        self
    }

    pub fn max_block_frames(mut self, frames: usize) -> Self {
        self.max_block_frames = frames;
        self
    }

    pub fn window_alpha(mut self, alpha: f32) -> Self {
        self.window_alpha = alpha;
        self
    }

    pub fn grain_spacing(mut self, spacing: GrainSpacing) -> Self {
        self.grain_spacing = spacing;
        self
    }

    pub fn steal_fade(mut self, duration: Duration) -> Self {
        self.steal_fade = duration;
        self
    }

    pub fn max_arena_samples(mut self, samples: usize) -> Self {
        self.max_arena_samples = samples;
        self
    }

    pub fn max_pending_notes(mut self, notes: usize) -> Self {
        self.max_pending_notes = notes;
        self
    }

    pub fn message_queue_size(mut self, size: usize) -> Self {
        self.message_queue_size = size;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Length of a voice steal fade-out in frames, never less than one frame.
    pub(crate) fn steal_fade_frames(&self) -> usize {
        ((self.steal_fade.as_secs_f64() * self.sample_rate as f64).round() as usize).max(1)
    }

    /// Validate all options. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if !(8000..=768000).contains(&self.sample_rate) {
            return Err(Error::ParameterError(format!(
                "engine options 'sample_rate' value is '{}'",
                self.sample_rate
            )));
        }
        if self.voice_count == 0 {
            return Err(Error::ParameterError(
                "engine options 'voice_count' must be > 0".to_string(),
            ));
        }
        if self.track_count == 0 {
            return Err(Error::ParameterError(
                "engine options 'track_count' must be > 0".to_string(),
            ));
        }
        if self.max_block_frames == 0 {
            return Err(Error::ParameterError(
                "engine options 'max_block_frames' must be > 0".to_string(),
            ));
        }
        if !(0.0..=0.5).contains(&self.window_alpha) || self.window_alpha.is_nan() {
            return Err(Error::ParameterError(format!(
                "engine options 'window_alpha' value is '{}'",
                self.window_alpha
            )));
        }
        if self.max_pending_notes == 0 || self.message_queue_size == 0 {
            return Err(Error::ParameterError(
                "engine options 'max_pending_notes' and 'message_queue_size' must be > 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
