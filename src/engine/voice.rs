//! Grain voices and the fixed size voice pool.

use crate::{
    bridge::SampleView,
    utils::{
        dsp::{balance_gains, saturate},
        interpolation::SampleInterpolator,
        window::WindowTable,
    },
};

// -------------------------------------------------------------------------------------------------

/// Shortest grain length in frames. Shorter grains get stretched to this length.
pub const MIN_GRAIN_LENGTH: u32 = 128;
/// Longest grain length in frames.
pub const MAX_GRAIN_LENGTH: u32 = 1 << 24;

/// Pitch ratio bounds for grain playback.
pub const MIN_PITCH: f64 = 1.0 / 16.0;
pub const MAX_PITCH: f64 = 16.0;

/// Release amplitude below which a releasing voice gets deactivated (~ -60dB).
pub const RELEASE_FLOOR: f32 = 0.001;

// -------------------------------------------------------------------------------------------------

/// A grain, as emitted by the scheduler, which should be started in the current block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GrainSpawn {
    /// Track which provides the sample buffer.
    pub track: usize,
    /// Normalized start position in the track's buffer (0.0 - 1.0).
    pub position: f64,
    /// Grain length in frames.
    pub grain_length: u32,
    /// Playback speed ratio.
    pub pitch: f64,
    /// Grain gain.
    pub velocity: f32,
    /// Stereo balance (-1.0 - 1.0).
    pub panning: f32,
    /// Use strict voice count gain normalization.
    pub clean_mode: bool,
    /// Edge saturation amount (0.0 - 1.0).
    pub edge: f32,
    /// Frame offset within the current block at which the grain starts.
    pub offset: usize,
}

impl GrainSpawn {
    /// Clamp all values into safe ranges, so the render loop never needs to check them.
    pub fn sanitized(self) -> Self {
        let finite_or = |value: f64, default: f64| if value.is_finite() { value } else { default };
        let finite_or_f32 =
            |value: f32, default: f32| if value.is_finite() { value } else { default };
        Self {
            position: finite_or(self.position, 0.0).clamp(0.0, 1.0),
            grain_length: self.grain_length.clamp(MIN_GRAIN_LENGTH, MAX_GRAIN_LENGTH),
            pitch: finite_or(self.pitch, 1.0).clamp(MIN_PITCH, MAX_PITCH),
            velocity: finite_or_f32(self.velocity, 0.0).clamp(0.0, 1.0),
            panning: finite_or_f32(self.panning, 0.0).clamp(-1.0, 1.0),
            edge: finite_or_f32(self.edge, 0.0).clamp(0.0, 1.0),
            ..self
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Result of a [`VoicePool::spawn`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpawnResult {
    /// The grain got started on the voice with the given index.
    Spawned(usize),
    /// No voice was free: the oldest voice with the given index started fading out.
    /// The grain itself got dropped.
    Stolen(usize),
    /// No voice was free and all voices are already fading out: the grain got dropped.
    Dropped,
}

// -------------------------------------------------------------------------------------------------

/// Playback state of a single grain.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Voice {
    active: bool,
    track: usize,
    /// Normalized start position in the track's buffer.
    start_position: f64,
    /// Frames played since the grain started.
    phase: u32,
    grain_length: u32,
    /// Window table index scaling, see [`WindowTable::inverse_length`].
    inv_grain_length: f64,
    pitch: f64,
    velocity: f32,
    panning: f32,
    releasing: bool,
    release_amp: f32,
    clean_mode: bool,
    edge: f32,
    /// Frames to skip in the next rendered block before the grain starts.
    start_offset: usize,
    /// Engine frame time at which the grain started.
    created_at: u64,
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

impl Voice {
    /// Create a new inactive voice.
    pub const fn new() -> Self {
        Self {
            active: false,
            track: 0,
            start_position: 0.0,
            phase: 0,
            grain_length: MIN_GRAIN_LENGTH,
            inv_grain_length: 0.0,
            pitch: 1.0,
            velocity: 0.0,
            panning: 0.0,
            releasing: false,
            release_amp: 1.0,
            clean_mode: false,
            edge: 0.0,
            start_offset: 0,
            created_at: 0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.releasing
    }

    #[inline]
    pub fn track(&self) -> usize {
        self.track
    }

    #[inline]
    pub fn clean_mode(&self) -> bool {
        self.clean_mode
    }

    #[cfg(test)]
    pub fn phase(&self) -> u32 {
        self.phase
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Start playing the given (sanitized) grain.
    fn activate(&mut self, grain: &GrainSpawn, created_at: u64) {
        self.active = true;
        self.track = grain.track;
        self.start_position = grain.position;
        self.phase = 0;
        self.grain_length = grain.grain_length;
        self.inv_grain_length = WindowTable::inverse_length(grain.grain_length);
        self.pitch = grain.pitch;
        self.velocity = grain.velocity;
        self.panning = grain.panning;
        self.releasing = false;
        self.release_amp = 1.0;
        self.clean_mode = grain.clean_mode;
        self.edge = grain.edge;
        self.start_offset = grain.offset;
        self.created_at = created_at;
    }

    /// Deactivate this voice immediately.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.releasing = false;
    }

    /// Start fading out this voice.
    pub fn start_release(&mut self) {
        debug_assert!(self.active, "Only active voices can be released");
        self.releasing = true;
    }

    /// Render the voice into the given interleaved stereo `output` buffer, adding to its
    /// existing content. Deactivates the voice when its grain or release fade finished.
    pub fn render(
        &mut self,
        output: &mut [f32],
        samples: &SampleView,
        window: &WindowTable,
        interpolator: &mut SampleInterpolator,
        compensation: f32,
        release_step: f32,
    ) {
        debug_assert!(self.active, "Should only render active voices");
        let start_offset = std::mem::take(&mut self.start_offset);

        let buffer_length = samples.frame_count() as f64;
        let start_frame = self.start_position * buffer_length;
        let (left_gain, right_gain) = balance_gains(self.panning);

        for frame in output.chunks_exact_mut(2).skip(start_offset) {
            if self.releasing {
                self.release_amp -= release_step;
                if self.release_amp < RELEASE_FLOOR {
                    self.deactivate();
                    break;
                }
            }
            if self.phase >= self.grain_length {
                self.deactivate();
                break;
            }

            let position = start_frame + self.phase as f64 * self.pitch;
            let gain = window.gain(self.phase, self.inv_grain_length)
                * self.velocity
                * self.release_amp
                * compensation;

            let mut left = interpolator.read(samples.left(), position, self.pitch) * gain;
            let mut right = if samples.is_mono() {
                left
            } else {
                interpolator.read(samples.right(), position, self.pitch) * gain
            };
            if self.edge > 0.0 {
                left = saturate(left, self.edge);
                right = saturate(right, self.edge);
            }
            frame[0] += left * left_gain;
            frame[1] += right * right_gain;

            self.phase += 1;
            if self.phase >= self.grain_length {
                self.deactivate();
                break;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Fixed capacity pool of grain voices. Never allocates after construction.
pub(crate) struct VoicePool {
    voices: Box<[Voice]>,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            voices: vec![Voice::new(); capacity].into_boxed_slice(),
        }
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    /// Number of currently active voices, including releasing ones.
    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Start the given grain on a free voice. When no voice is free, fade out the oldest voice
    /// which is not already fading out and drop the grain. When all voices are fading out,
    /// drop the grain.
    pub fn spawn(&mut self, grain: &GrainSpawn, created_at: u64) -> SpawnResult {
        if let Some(index) = self.voices.iter().position(|v| !v.is_active()) {
            self.voices[index].activate(&grain.sanitized(), created_at);
            return SpawnResult::Spawned(index);
        }
        let oldest = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_releasing())
            .min_by_key(|(_, v)| v.created_at())
            .map(|(index, _)| index);
        match oldest {
            Some(index) => {
                self.voices[index].start_release();
                SpawnResult::Stolen(index)
            }
            None => SpawnResult::Dropped,
        }
    }

    /// Immediately deactivate all voices of the given track.
    /// Returns the number of stopped voices.
    pub fn stop_track(&mut self, track: usize) -> usize {
        let mut stopped = 0;
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.track() == track {
                voice.deactivate();
                stopped += 1;
            }
        }
        stopped
    }

    /// Immediately deactivate all voices. Returns the number of stopped voices.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.deactivate();
            stopped += 1;
        }
        stopped
    }
}

// -------------------------------------------------------------------------------------------------
