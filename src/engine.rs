//! The render side of the grain engine and its control handle.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};

use basedrop::{Owned, Shared};
use crossbeam_queue::ArrayQueue;

use crate::{
    bridge::{BufferSlice, SampleArena, SampleRegion, TrackBuffers},
    options::EngineOptions,
    utils::{
        buffer::{add_buffers, clear_buffer, deinterleave_stereo},
        dsp::{gain_compensation, soft_clip},
        interpolation::SampleInterpolator,
        window::WindowTable,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

pub(crate) mod handle;
pub(crate) mod scheduler;
pub(crate) mod voice;

pub use handle::EngineHandle;
pub use scheduler::NoteParameters;

use scheduler::GrainScheduler;
use voice::{SpawnResult, VoicePool};

// -------------------------------------------------------------------------------------------------

/// Messages sent from an [`EngineHandle`] to the [`GrainEngine`].
pub(crate) enum EngineMessage {
    ScheduleNote {
        track: usize,
        start_time: f64,
        duration: f64,
        parameters: NoteParameters,
    },
    PublishBuffers {
        region: Shared<SampleRegion>,
        slots: Owned<Box<[Option<BufferSlice>]>>,
    },
    StopTrack {
        track: usize,
    },
    StopAll,
    BarTick {
        time: f64,
    },
}

// -------------------------------------------------------------------------------------------------

/// Engine state which is shared with all handles.
///
/// Stop requests which don't fit into the full message queue are passed as flags instead, so
/// stopping never evicts already sent messages.
#[derive(Debug)]
pub(crate) struct EngineState {
    sample_rate: u32,
    active_voices: AtomicUsize,
    frame_position: AtomicU64,
    stop_all_requested: AtomicBool,
    stop_track_requested: Box<[AtomicBool]>,
}

impl EngineState {
    fn new(sample_rate: u32, track_count: usize) -> Self {
        Self {
            sample_rate,
            active_voices: AtomicUsize::new(0),
            frame_position: AtomicU64::new(0),
            stop_all_requested: AtomicBool::new(false),
            stop_track_requested: (0..track_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Request stopping the given track, or all tracks when `track` is None, with the next
    /// rendered block.
    pub fn request_stop(&self, track: Option<usize>) {
        match track {
            Some(track) => {
                if let Some(flag) = self.stop_track_requested.get(track) {
                    flag.store(true, Ordering::Release);
                }
            }
            None => self.stop_all_requested.store(true, Ordering::Release),
        }
    }

    fn take_stop_all_request(&self) -> bool {
        self.stop_all_requested.swap(false, Ordering::AcqRel)
    }

    fn take_stop_track_request(&self, track: usize) -> bool {
        self.stop_track_requested
            .get(track)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of active voices after the last rendered block.
    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    /// Number of frames the engine rendered so far.
    pub fn frame_position(&self) -> u64 {
        self.frame_position.load(Ordering::Relaxed)
    }
}

// -------------------------------------------------------------------------------------------------

/// Statistics of the last [`GrainEngine::render_block`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    /// Number of rendered frames.
    pub frame_count: usize,
    /// Number of active voices (including fading out ones) after rendering.
    pub active_voices: usize,
    /// Number of grains which got started.
    pub spawned: usize,
    /// Number of grains which got dropped while the oldest voice started fading out.
    pub stolen: usize,
    /// Number of grains which got dropped because all voices were fading out.
    pub dropped: usize,
    /// Number of notes which ended and got removed from the scheduler.
    pub expired_notes: usize,
    /// Number of notes which are still pending after rendering.
    pub pending_notes: usize,
    /// Number of linear interpolated sample reads.
    pub linear_reads: u64,
    /// Number of cubic interpolated sample reads.
    pub cubic_reads: u64,
}

// -------------------------------------------------------------------------------------------------

/// Polyphonic granular synthesis engine: renders the grains of all scheduled notes into a
/// stereo output.
///
/// The engine is meant to live in the audio thread. Rendering never blocks, allocates or fails.
/// Sample buffers and notes get passed in via the [`EngineHandle`] which got created along with
/// the engine.
pub struct GrainEngine {
    options: EngineOptions,
    window: WindowTable,
    interpolator: SampleInterpolator,
    voices: VoicePool,
    scheduler: GrainScheduler,
    buffers: TrackBuffers,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    state: Arc<EngineState>,
    /// Interleaved stereo mix buffers, one `max_block_frames` slot per track.
    track_mix: Box<[f32]>,
    track_voice_counts: Box<[usize]>,
    /// Interleaved temp buffer for planar rendering.
    planar_temp: Vec<f32>,
    frame_counter: u64,
    release_step: f32,
    stats: BlockStats,
}

impl GrainEngine {
    /// Create a new engine with default options and the given sample rate.
    pub fn new(sample_rate: u32) -> Result<(Self, EngineHandle), Error> {
        Self::with_options(EngineOptions::default().sample_rate(sample_rate))
    }

    /// Create a new engine with the given options.
    pub fn with_options(options: EngineOptions) -> Result<(Self, EngineHandle), Error> {
        options.validate()?;

        let window = WindowTable::build(options.window_alpha);
        let interpolator = SampleInterpolator::new();
        let voices = VoicePool::new(options.voice_count);
        let scheduler = GrainScheduler::new(
            options.sample_rate,
            options.track_count,
            options.max_pending_notes,
            options.grain_spacing,
            options.seed,
        );
        let buffers = TrackBuffers::new();
        let message_queue = Arc::new(ArrayQueue::new(options.message_queue_size));
        let state = Arc::new(EngineState::new(
            options.sample_rate,
            options.track_count,
        ));
        let track_mix = vec![0.0; options.track_count * options.max_block_frames * 2];
        let track_voice_counts = vec![0; options.track_count];
        let planar_temp = vec![0.0; options.max_block_frames * 2];
        let release_step = 1.0 / options.steal_fade_frames() as f32;

        let arena = SampleArena::new(options.track_count, options.max_arena_samples);
        let handle = EngineHandle::new(
            Arc::clone(&message_queue),
            Arc::clone(&state),
            arena.collector_handle(),
            Arc::new(Mutex::new(arena)),
            options.track_count,
        );

        log::info!(
            "Created grain engine: {} Hz, {} voices, {} tracks, {} spacing",
            options.sample_rate,
            options.voice_count,
            options.track_count,
            options.grain_spacing
        );

        let engine = Self {
            options,
            window,
            interpolator,
            voices,
            scheduler,
            buffers,
            message_queue,
            state,
            track_mix: track_mix.into_boxed_slice(),
            track_voice_counts: track_voice_counts.into_boxed_slice(),
            planar_temp,
            frame_counter: 0,
            release_step,
            stats: BlockStats::default(),
        };
        Ok((engine, handle))
    }

    /// The options the engine got created with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The grain window all voices use.
    pub fn window(&self) -> &WindowTable {
        &self.window
    }

    /// Number of currently active voices, including voices which are fading out.
    pub fn active_voice_count(&self) -> usize {
        self.voices.active_count()
    }

    /// Render clock in seconds: the time of the next frame that will be rendered.
    pub fn current_time(&self) -> f64 {
        self.frame_counter as f64 / self.options.sample_rate as f64
    }

    /// Statistics of the last render call.
    pub fn last_block_stats(&self) -> BlockStats {
        self.stats
    }

    /// Render `frame_count` frames into the given interleaved stereo `output` buffer,
    /// overwriting its content. `frame_count` gets clamped to the output buffer's size.
    ///
    /// Returns the number of active voices after rendering.
    pub fn render_block(&mut self, output: &mut [f32], frame_count: usize) -> usize {
        let frame_count = frame_count.min(output.len() / 2);
        Self::assert_no_alloc(|| {
            self.stats = BlockStats::default();
            let chunk_size = self.options.max_block_frames * 2;
            for chunk in output[..frame_count * 2].chunks_mut(chunk_size) {
                self.render_chunk(chunk);
            }
            self.finish_block(frame_count)
        })
    }

    /// Render into the given planar stereo buffers, overwriting their content. Renders as many
    /// frames as the shorter of both buffers holds.
    ///
    /// Returns the number of active voices after rendering.
    pub fn render_block_planar(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let frame_count = left.len().min(right.len());
        Self::assert_no_alloc(|| {
            self.stats = BlockStats::default();
            let mut temp = std::mem::take(&mut self.planar_temp);
            let chunk_frames = self.options.max_block_frames;
            for (left, right) in left[..frame_count]
                .chunks_mut(chunk_frames)
                .zip(right[..frame_count].chunks_mut(chunk_frames))
            {
                let output = &mut temp[..left.len() * 2];
                self.render_chunk(output);
                deinterleave_stereo(output, left, right);
            }
            self.planar_temp = temp;
            self.finish_block(frame_count)
        })
    }

    /// Render a single chunk of at most `max_block_frames` frames.
    fn render_chunk(&mut self, output: &mut [f32]) {
        let frame_count = output.len() / 2;
        debug_assert!(frame_count <= self.options.max_block_frames);

        self.process_messages();

        let sample_rate = self.options.sample_rate as f64;
        let block_start = self.frame_counter as f64 / sample_rate;

        // start all grains which are due in this chunk
        let buffers = &self.buffers;
        let voices = &mut self.voices;
        let stats = &mut self.stats;
        let frame_counter = self.frame_counter;
        let expired_notes = self.scheduler.schedule_block(
            block_start,
            frame_count,
            |track| buffers.frame_count(track),
            |grain| {
                if buffers.frame_count(grain.track) == 0 {
                    // no buffer attached
                    return;
                }
                match voices.spawn(&grain, frame_counter + grain.offset as u64) {
                    SpawnResult::Spawned(_) => stats.spawned += 1,
                    SpawnResult::Stolen(_) => stats.stolen += 1,
                    SpawnResult::Dropped => stats.dropped += 1,
                }
            },
        );
        self.stats.expired_notes += expired_notes;

        // count voices per track for the gain compensation
        self.track_voice_counts.fill(0);
        for voice in self.voices.voices().iter().filter(|v| v.is_active()) {
            self.track_voice_counts[voice.track()] += 1;
        }

        let mix_stride = self.options.max_block_frames * 2;
        for (track, count) in self.track_voice_counts.iter().enumerate() {
            if *count > 0 {
                let offset = track * mix_stride;
                clear_buffer(&mut self.track_mix[offset..offset + frame_count * 2]);
            }
        }

        // render voices into their track's mix buffer
        for voice in self.voices.voices_mut().iter_mut() {
            if !voice.is_active() {
                continue;
            }
            let track = voice.track();
            let Some(samples) = self.buffers.view(track) else {
                voice.deactivate();
                continue;
            };
            let compensation =
                gain_compensation(voice.clean_mode(), self.track_voice_counts[track]);
            let offset = track * mix_stride;
            voice.render(
                &mut self.track_mix[offset..offset + frame_count * 2],
                &samples,
                &self.window,
                &mut self.interpolator,
                compensation,
                self.release_step,
            );
        }

        // sum tracks and apply the master clipper
        clear_buffer(output);
        for (track, count) in self.track_voice_counts.iter().enumerate() {
            if *count > 0 {
                let offset = track * mix_stride;
                add_buffers(output, &self.track_mix[offset..offset + frame_count * 2]);
            }
        }
        for sample in output.iter_mut() {
            *sample = soft_clip(*sample);
        }

        self.frame_counter += frame_count as u64;
    }

    /// Update stats and the shared state after a render call.
    fn finish_block(&mut self, frame_count: usize) -> usize {
        let active_voices = self.voices.active_count();
        let reads = self.interpolator.take_stats();
        self.stats.frame_count = frame_count;
        self.stats.active_voices = active_voices;
        self.stats.pending_notes = self.scheduler.pending_count();
        self.stats.linear_reads = reads.linear;
        self.stats.cubic_reads = reads.cubic;
        self.state
            .active_voices
            .store(active_voices, Ordering::Relaxed);
        self.state
            .frame_position
            .store(self.frame_counter, Ordering::Relaxed);
        active_voices
    }

    /// Process pending messages from the handle, then stop requests which got passed
    /// outside of the message queue.
    fn process_messages(&mut self) {
        while let Some(message) = self.message_queue.pop() {
            self.process_message(message);
        }
        if self.state.take_stop_all_request() {
            self.process_message(EngineMessage::StopAll);
        }
        for track in 0..self.options.track_count {
            if self.state.take_stop_track_request(track) {
                self.process_message(EngineMessage::StopTrack { track });
            }
        }
    }

    fn process_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::ScheduleNote {
                track,
                start_time,
                duration,
                parameters,
            } => {
                if !self
                    .scheduler
                    .add_note(track, start_time, duration, parameters)
                {
                    Self::permit_alloc(|| {
                        log::warn!("Pending note list is full, dropping note on track {track}");
                    });
                }
            }
            EngineMessage::PublishBuffers { region, slots } => {
                // superseded buffers get freed by the arena's collector
                self.buffers.publish(region, slots);
            }
            EngineMessage::StopTrack { track } => {
                self.voices.stop_track(track);
                self.scheduler.stop_track(track);
            }
            EngineMessage::StopAll => {
                self.voices.stop_all();
                self.scheduler.stop_all();
            }
            EngineMessage::BarTick { time } => {
                self.scheduler.bar_tick(time);
            }
        }
    }

    fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::assert_no_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }

    #[inline]
    fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::permit_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }
}

// -------------------------------------------------------------------------------------------------
