//! Converts note events into individually timed grain spawns.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::voice::{GrainSpawn, MAX_PITCH, MIN_GRAIN_LENGTH, MIN_PITCH};
use crate::options::GrainSpacing;

// -------------------------------------------------------------------------------------------------

/// Max number of grains a single note may emit in one render call.
pub const MAX_GRAINS_PER_NOTE_BLOCK: usize = 32;

/// Max number of grains all notes together may emit in one render call.
pub const MAX_GRAINS_PER_BLOCK: usize = 256;

/// Spray range in seconds: grains get scattered by +/- half of it at a spray of 1.0.
const SPRAY_RANGE: f64 = 4.0;

/// Pan rotation between two successive grains of a note in orbit mode.
const GOLDEN_ANGLE: f64 = 2.399963229728653;

// -------------------------------------------------------------------------------------------------

/// Resolved, scalar grain parameters of a single note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteParameters {
    /// Normalized playback position in the buffer (0.0 - 1.0).
    pub position: f32,
    /// Speed at which the position moves through the buffer, in buffer lengths per second
    /// (-10.0 - 10.0).
    pub scan_speed: f32,
    /// Start of the scan window (0.0 - 1.0).
    pub window_start: f32,
    /// End of the scan window (0.0 - 1.0).
    pub window_end: f32,
    /// Grains per second (0.1 - 1000.0). Only used with [`GrainSpacing::Density`].
    pub density: f32,
    /// Grain length in seconds (0.001 - 10.0).
    pub grain_size: f32,
    /// Number of overlapping grains (0.1 - 64.0). Only used with [`GrainSpacing::Overlap`].
    pub overlap: f32,
    /// Playback speed ratio of all grains (1/16 - 16.0).
    pub pitch: f32,
    /// Volume of all grains (0.0 - 1.0).
    pub velocity: f32,
    /// Random variation of each grain's position (0.0 - 1.0).
    /// Grains get scattered by up to ±2.0 seconds at maximum spray.
    pub spray: f32,
    /// Normalize the summed grains of a track strictly by voice count.
    pub clean_mode: bool,
    /// Per grain saturation amount (0.0 - 1.0).
    pub edge_crunch: f32,
    /// Stereo rotation of successive grains around the center (0.0 - 1.0).
    pub orbit: f32,
    /// Restart the scan position on every bar tick.
    pub reset_on_bar: bool,
    /// Restart the scan position with every new note.
    pub reset_on_trig: bool,
}

impl Default for NoteParameters {
    fn default() -> Self {
        Self {
            position: 0.5,
            scan_speed: 0.0,
            window_start: 0.0,
            window_end: 1.0,
            density: 10.0,
            grain_size: 0.1,
            overlap: 1.0,
            pitch: 1.0,
            velocity: 1.0,
            spray: 0.0,
            clean_mode: true,
            edge_crunch: 0.0,
            orbit: 0.0,
            reset_on_bar: false,
            reset_on_trig: true,
        }
    }
}

impl NoteParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp all values into their valid ranges. Non finite values fall back to the defaults.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let clamp = |value: f32, default: f32, min: f32, max: f32| {
            if value.is_finite() {
                value.clamp(min, max)
            } else {
                default
            }
        };
        let mut window_start = clamp(self.window_start, defaults.window_start, 0.0, 1.0);
        let mut window_end = clamp(self.window_end, defaults.window_end, 0.0, 1.0);
        if window_end < window_start {
            std::mem::swap(&mut window_start, &mut window_end);
        }
        Self {
            position: clamp(self.position, defaults.position, 0.0, 1.0),
            scan_speed: clamp(self.scan_speed, defaults.scan_speed, -10.0, 10.0),
            window_start,
            window_end,
            density: clamp(self.density, defaults.density, 0.1, 1000.0),
            grain_size: clamp(self.grain_size, defaults.grain_size, 0.001, 10.0),
            overlap: clamp(self.overlap, defaults.overlap, 0.1, 64.0),
            pitch: clamp(
                self.pitch,
                defaults.pitch,
                MIN_PITCH as f32,
                MAX_PITCH as f32,
            ),
            velocity: clamp(self.velocity, defaults.velocity, 0.0, 1.0),
            spray: clamp(self.spray, defaults.spray, 0.0, 1.0),
            clean_mode: self.clean_mode,
            edge_crunch: clamp(self.edge_crunch, defaults.edge_crunch, 0.0, 1.0),
            orbit: clamp(self.orbit, defaults.orbit, 0.0, 1.0),
            reset_on_bar: self.reset_on_bar,
            reset_on_trig: self.reset_on_trig,
        }
    }

    /// Time between two successive grains in seconds, using the given spacing policy.
    pub fn grain_interval(&self, spacing: GrainSpacing) -> f64 {
        match spacing {
            GrainSpacing::Density => 1.0 / self.density.max(0.1) as f64,
            GrainSpacing::Overlap => self.grain_size as f64 / self.overlap.max(0.1) as f64,
        }
    }

    /// Wrap the given position into the scan window. Degenerated windows collapse to the
    /// window's start.
    pub fn wrap_into_window(&self, position: f64) -> f64 {
        let start = self.window_start as f64;
        let width = self.window_end as f64 - start;
        if width <= 0.0 {
            return start;
        }
        let wrapped = start + (position - start).rem_euclid(width);
        // rem_euclid may round up to width
        if wrapped < self.window_end as f64 {
            wrapped
        } else {
            start
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A note which is waiting for or currently emitting grains.
#[derive(Debug, Clone)]
struct PendingNote {
    track: usize,
    start_time: f64,
    duration: f64,
    parameters: NoteParameters,
    /// Spacing between grains, fixed when the note got added.
    interval: f64,
    next_grain_time: f64,
    grain_index: u64,
    /// Time at which the scan position is `parameters.position`.
    scan_origin: f64,
}

impl PendingNote {
    fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Skip all grains which are due more than one interval before `time`. The last skipped
    /// grain gets played late instead, so a note which arrives late starts with a single grain.
    fn skip_missed_grains(&mut self, time: f64) {
        if self.next_grain_time >= time - self.interval {
            return;
        }
        let missed = ((time - self.start_time) / self.interval).floor();
        if missed.is_finite() && missed > self.grain_index as f64 {
            self.grain_index = missed as u64;
            self.next_grain_time = self.start_time + self.grain_index as f64 * self.interval;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Holds all pending notes and emits their grains block by block.
///
/// Never allocates after construction: the note list has a fixed capacity.
pub(crate) struct GrainScheduler {
    notes: Vec<PendingNote>,
    max_pending_notes: usize,
    track_scan_origins: Box<[Option<f64>]>,
    /// Note to start with in the next block: the one after the note which used up the grain
    /// budget of the previous block.
    first_note: usize,
    spacing: GrainSpacing,
    sample_rate: u32,
    rng: SmallRng,
}

impl GrainScheduler {
    pub fn new(
        sample_rate: u32,
        track_count: usize,
        max_pending_notes: usize,
        spacing: GrainSpacing,
        seed: Option<u64>,
    ) -> Self {
        let notes = Vec::with_capacity(max_pending_notes);
        let track_scan_origins = vec![None; track_count].into_boxed_slice();
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            notes,
            max_pending_notes,
            track_scan_origins,
            first_note: 0,
            spacing,
            sample_rate,
            rng,
        }
    }

    /// Number of notes which are still pending.
    pub fn pending_count(&self) -> usize {
        self.notes.len()
    }

    /// Add a new note. Returns false, when the note list is full or the track is invalid.
    pub fn add_note(
        &mut self,
        track: usize,
        start_time: f64,
        duration: f64,
        parameters: NoteParameters,
    ) -> bool {
        if track >= self.track_scan_origins.len() || self.notes.len() >= self.max_pending_notes {
            return false;
        }
        let parameters = parameters.sanitized();
        let interval = parameters
            .grain_interval(self.spacing)
            .max(1.0 / self.sample_rate as f64);
        let scan_origin = if parameters.reset_on_trig {
            self.track_scan_origins[track] = Some(start_time);
            start_time
        } else {
            *self.track_scan_origins[track].get_or_insert(start_time)
        };
        self.notes.push(PendingNote {
            track,
            start_time,
            duration: duration.max(0.0),
            parameters,
            interval,
            next_grain_time: start_time,
            grain_index: 0,
            scan_origin,
        });
        true
    }

    /// Discard all pending notes of the given track.
    pub fn stop_track(&mut self, track: usize) {
        self.notes.retain(|note| note.track != track);
    }

    /// Discard all pending notes.
    pub fn stop_all(&mut self) {
        self.notes.clear();
    }

    /// Restart scanning at `time` for all notes which reset on bars.
    pub fn bar_tick(&mut self, time: f64) {
        for note in self
            .notes
            .iter_mut()
            .filter(|note| note.parameters.reset_on_bar)
        {
            note.scan_origin = time;
            self.track_scan_origins[note.track] = Some(time);
        }
    }

    /// Emit all grains which are due in the block starting at `block_start` (in seconds), then
    /// remove all notes which end within the block.
    ///
    /// Grains which were missed by more than one grain interval get skipped. A single note emits
    /// at most [`MAX_GRAINS_PER_NOTE_BLOCK`], all notes together at most [`MAX_GRAINS_PER_BLOCK`]
    /// grains. Notes which got cut off catch up in the following blocks.
    ///
    /// `frames_of` returns the frame count of a track's buffer, which is needed to convert
    /// spray times into buffer positions. Returns the number of removed notes.
    pub fn schedule_block(
        &mut self,
        block_start: f64,
        frame_count: usize,
        frames_of: impl Fn(usize) -> usize,
        mut emit: impl FnMut(GrainSpawn),
    ) -> usize {
        if frame_count == 0 {
            return 0;
        }
        let sample_rate = self.sample_rate as f64;
        let block_end = block_start + frame_count as f64 / sample_rate;

        let note_count = self.notes.len();
        let first_note = if note_count > 0 {
            self.first_note % note_count
        } else {
            0
        };
        self.first_note = 0;
        let mut budget = MAX_GRAINS_PER_BLOCK;
        for index in (first_note..note_count).chain(0..first_note) {
            if budget == 0 {
                self.first_note = index;
                break;
            }
            let note = &mut self.notes[index];
            note.skip_missed_grains(block_start);
            let end_time = note.end_time();
            let mut emitted = 0;
            while note.next_grain_time < end_time
                && emitted < MAX_GRAINS_PER_NOTE_BLOCK
                && budget > 0
            {
                let grain_time = note.next_grain_time;
                // grains belong to the block their rounded frame falls into
                let frame_offset = ((grain_time - block_start) * sample_rate).round();
                if frame_offset >= frame_count as f64 {
                    break;
                }
                let offset = frame_offset.max(0.0) as usize;
                let parameters = &note.parameters;

                let scan_elapsed = grain_time - note.scan_origin;
                let scanned =
                    parameters.position as f64 + parameters.scan_speed as f64 * scan_elapsed;
                let mut position = parameters.wrap_into_window(scanned);

                let buffer_frames = frames_of(note.track);
                if parameters.spray > 0.0 && buffer_frames > 0 {
                    let buffer_duration = buffer_frames as f64 / sample_rate;
                    let spray_seconds =
                        parameters.spray as f64 * SPRAY_RANGE * (self.rng.random::<f64>() - 0.5);
                    position = (position + spray_seconds / buffer_duration).clamp(0.0, 1.0);
                }

                let panning =
                    parameters.orbit as f64 * (note.grain_index as f64 * GOLDEN_ANGLE).sin();

                let grain_length = (parameters.grain_size as f64 * sample_rate)
                    .round()
                    .max(MIN_GRAIN_LENGTH as f64) as u32;

                emit(GrainSpawn {
                    track: note.track,
                    position,
                    grain_length,
                    pitch: parameters.pitch as f64,
                    velocity: parameters.velocity,
                    panning: panning as f32,
                    clean_mode: parameters.clean_mode,
                    edge: parameters.edge_crunch,
                    offset,
                });

                emitted += 1;
                budget -= 1;
                note.grain_index += 1;
                // derive from the start time to avoid accumulating rounding errors
                note.next_grain_time = note.start_time + note.grain_index as f64 * note.interval;
            }
        }

        // keep notes which may still emit a grain that rounds into the next block
        let expire_time = block_end - 0.5 / sample_rate;
        let pending = self.notes.len();
        self.notes.retain(|note| note.end_time() >= expire_time);
        pending - self.notes.len()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48000;
    const BLOCK: usize = 256;

    fn new_scheduler(spacing: GrainSpacing) -> GrainScheduler {
        GrainScheduler::new(SAMPLE_RATE, 4, 16, spacing, Some(0x1234))
    }

    /// Run blocks until `until` (in seconds) and collect all grains with their absolute frame.
    fn run(scheduler: &mut GrainScheduler, until: f64) -> Vec<(u64, GrainSpawn)> {
        let mut grains = Vec::new();
        let mut frame = 0u64;
        while (frame as f64) / (SAMPLE_RATE as f64) < until {
            let block_start = frame as f64 / SAMPLE_RATE as f64;
            scheduler.schedule_block(
                block_start,
                BLOCK,
                |_| SAMPLE_RATE as usize,
                |grain| grains.push((frame + grain.offset as u64, grain)),
            );
            frame += BLOCK as u64;
        }
        grains
    }

    #[test]
    fn sanitize_parameters() {
        let parameters = NoteParameters {
            position: f32::NAN,
            density: -1.0,
            pitch: 100.0,
            window_start: 0.9,
            window_end: 0.1,
            orbit: f32::INFINITY,
            ..NoteParameters::default()
        }
        .sanitized();
        assert_eq!(parameters.position, 0.5);
        assert_eq!(parameters.density, 0.1);
        assert_eq!(parameters.pitch, 16.0);
        assert_eq!(
            (parameters.window_start, parameters.window_end),
            (0.1, 0.9)
        );
        assert_eq!(parameters.orbit, 0.0);
    }

    #[test]
    fn spacing_policies() {
        let parameters = NoteParameters {
            density: 20.0,
            grain_size: 0.2,
            overlap: 4.0,
            ..NoteParameters::default()
        };
        assert_eq!(parameters.grain_interval(GrainSpacing::Density), 0.05);
        assert_eq!(parameters.grain_interval(GrainSpacing::Overlap), 0.05);
        let parameters = NoteParameters {
            overlap: 0.0,
            ..parameters
        };
        assert_eq!(parameters.grain_interval(GrainSpacing::Overlap), 2.0);
    }

    #[test]
    fn density_limits_grain_count() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        assert!(scheduler.add_note(0, 0.0, 0.5, NoteParameters::default()));
        let grains = run(&mut scheduler, 1.0);
        assert!(grains.len() <= 5, "got {} grains", grains.len());
        assert_eq!(grains.len(), 5);
        let frames = grains.iter().map(|(frame, _)| *frame).collect::<Vec<_>>();
        assert_eq!(frames, vec![0, 4800, 9600, 14400, 19200]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn sub_block_offsets() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let start_frame = 3 * BLOCK + 17;
        let start_time = start_frame as f64 / SAMPLE_RATE as f64;
        scheduler.add_note(1, start_time, 0.01, NoteParameters::default());
        let grains = run(&mut scheduler, 0.1);
        assert_eq!(grains.len(), 1);
        assert_eq!(grains[0].0, start_frame as u64);
        assert_eq!(grains[0].1.offset, 17);
        assert_eq!(grains[0].1.track, 1);
    }

    #[test]
    fn late_notes_start_at_block_begin() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        scheduler.add_note(0, 0.0, 1.0, NoteParameters::default());
        let mut offsets = Vec::new();
        scheduler.schedule_block(0.35, BLOCK, |_| 1000, |grain| offsets.push(grain.offset));
        // missed grains got skipped, the last missed one starts at the block start
        assert_eq!(offsets, vec![0]);
    }

    #[test]
    fn notes_delivered_seconds_late_do_not_pile_up() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let parameters = NoteParameters {
            density: 100.0,
            ..NoteParameters::default()
        };
        scheduler.add_note(0, 0.0, 10.0, parameters);
        let block_start = 5.005;
        let mut offsets = Vec::new();
        scheduler.schedule_block(block_start, BLOCK, |_| 1000, |grain| {
            offsets.push(grain.offset)
        });
        // one late grain, then the grain which is due at 5.01 s
        assert_eq!(offsets, vec![0, 240]);

        // following blocks only emit grains which are due in time
        let mut frames = Vec::new();
        let start_frame = (block_start * SAMPLE_RATE as f64).round() as u64;
        for block in 1..20 {
            let frame = start_frame + (block * BLOCK) as u64;
            scheduler.schedule_block(
                frame as f64 / SAMPLE_RATE as f64,
                BLOCK,
                |_| 1000,
                |grain| frames.push(frame + grain.offset as u64),
            );
        }
        assert!(frames.len() >= 9);
        for pair in frames.windows(2) {
            assert_eq!(pair[1] - pair[0], 480);
        }
    }

    #[test]
    fn grains_per_block_are_limited() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let parameters = NoteParameters {
            density: 1000.0,
            ..NoteParameters::default()
        };
        scheduler.add_note(0, 0.0, 10.0, parameters);
        let mut count = 0;
        scheduler.schedule_block(0.0, 4096, |_| 1000, |_| count += 1);
        assert_eq!(count, MAX_GRAINS_PER_NOTE_BLOCK);
    }

    #[test]
    fn grain_budget_is_shared_by_all_notes() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let parameters = NoteParameters {
            density: 1000.0,
            ..NoteParameters::default()
        };
        // notes 0-7 play on tracks 0 and 1, notes 8-15 on tracks 2 and 3
        for note in 0..16 {
            assert!(scheduler.add_note(note / 4, 0.0, 10.0, parameters));
        }
        let mut tracks = Vec::new();
        scheduler.schedule_block(0.0, 4096, |_| 1000, |grain| tracks.push(grain.track));
        assert_eq!(tracks.len(), MAX_GRAINS_PER_BLOCK);
        assert!(tracks.iter().all(|track| *track < 2));

        // the notes which got cut off come first in the next block
        let mut tracks = Vec::new();
        let block_start = 4096.0 / SAMPLE_RATE as f64;
        scheduler.schedule_block(block_start, 4096, |_| 1000, |grain| {
            tracks.push(grain.track)
        });
        assert_eq!(tracks.len(), MAX_GRAINS_PER_BLOCK);
        assert!(tracks.iter().all(|track| *track >= 2));
    }

    #[test]
    fn scan_stays_within_window() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let parameters = NoteParameters {
            position: 0.3,
            scan_speed: 1.7,
            window_start: 0.2,
            window_end: 0.8,
            density: 200.0,
            ..NoteParameters::default()
        };
        scheduler.add_note(0, 0.0, 3.0, parameters);
        let grains = run(&mut scheduler, 3.0);
        assert!(grains.len() > 500);
        for (_, grain) in &grains {
            assert!(
                (0.2..0.8).contains(&grain.position),
                "position {} left the window",
                grain.position
            );
        }
        // the position actually moves
        assert!(grains.iter().any(|(_, g)| g.position > 0.7));
        assert!(grains.iter().any(|(_, g)| g.position < 0.3));
    }

    #[test]
    fn spray_is_clamped_and_seeded() {
        let parameters = NoteParameters {
            position: 0.95,
            spray: 1.0,
            density: 100.0,
            ..NoteParameters::default()
        };
        let collect = || {
            let mut scheduler = new_scheduler(GrainSpacing::Density);
            scheduler.add_note(0, 0.0, 1.0, parameters);
            run(&mut scheduler, 1.0)
                .into_iter()
                .map(|(_, grain)| grain.position)
                .collect::<Vec<_>>()
        };
        let positions = collect();
        assert!(positions.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(positions.iter().any(|p| *p != 0.95));
        assert_eq!(positions, collect());
    }

    #[test]
    fn orbit_rotates_panning() {
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let parameters = NoteParameters {
            orbit: 1.0,
            ..NoteParameters::default()
        };
        scheduler.add_note(0, 0.0, 1.0, parameters);
        let pans = run(&mut scheduler, 1.0)
            .into_iter()
            .map(|(_, grain)| grain.panning)
            .collect::<Vec<_>>();
        assert_eq!(pans[0], 0.0);
        assert!(pans.iter().all(|p| (-1.0..=1.0).contains(p)));
        assert!(pans.iter().any(|p| *p > 0.5));
        assert!(pans.iter().any(|p| *p < -0.5));
    }

    #[test]
    fn scan_origin_resets() {
        let parameters = NoteParameters {
            position: 0.0,
            scan_speed: 0.1,
            reset_on_trig: false,
            ..NoteParameters::default()
        };
        let mut scheduler = new_scheduler(GrainSpacing::Density);
        scheduler.add_note(0, 0.0, 0.05, parameters);
        scheduler.add_note(0, 2.0, 0.05, parameters);
        let mut positions = Vec::new();
        scheduler.schedule_block(2.0, BLOCK, |_| 1000, |grain| positions.push(grain.position));
        // the first note ended long ago, the second one continues scanning from its start
        assert_eq!(positions.len(), 1);
        assert!((positions[0] - 0.2).abs() < 1e-6);

        let mut scheduler = new_scheduler(GrainSpacing::Density);
        scheduler.add_note(0, 2.0, 0.05, NoteParameters { reset_on_trig: true, ..parameters });
        let mut positions = Vec::new();
        scheduler.schedule_block(2.0, BLOCK, |_| 1000, |grain| positions.push(grain.position));
        assert_eq!(positions, vec![0.0]);

        let mut scheduler = new_scheduler(GrainSpacing::Density);
        let parameters = NoteParameters {
            reset_on_bar: true,
            ..parameters
        };
        scheduler.add_note(0, 0.0, 4.0, parameters);
        scheduler.schedule_block(0.0, BLOCK, |_| 1000, |_| ());
        scheduler.bar_tick(1.0);
        let mut positions = Vec::new();
        for block_start in [1.0, 1.1] {
            scheduler.schedule_block(block_start, BLOCK, |_| 1000, |grain| {
                positions.push(grain.position)
            });
        }
        // grains after the bar scan from the note's position again
        assert_eq!(positions.len(), 2);
        assert!(positions[0].abs() < 1e-6);
        assert!((positions[1] - 0.01).abs() < 1e-6);
    }

    #[test]
    fn stop_and_capacity() {
        let mut scheduler = GrainScheduler::new(SAMPLE_RATE, 2, 3, GrainSpacing::Density, None);
        assert!(scheduler.add_note(0, 0.0, 1.0, NoteParameters::default()));
        assert!(scheduler.add_note(1, 0.0, 1.0, NoteParameters::default()));
        assert!(scheduler.add_note(1, 0.0, 1.0, NoteParameters::default()));
        assert!(!scheduler.add_note(0, 0.0, 1.0, NoteParameters::default()));
        assert!(!scheduler.add_note(2, 0.0, 1.0, NoteParameters::default()));
        scheduler.stop_track(1);
        assert_eq!(scheduler.pending_count(), 1);
        scheduler.stop_all();
        assert_eq!(scheduler.pending_count(), 0);
    }
}
