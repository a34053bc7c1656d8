use std::sync::{Arc, Mutex, PoisonError};

use basedrop::{Handle, Owned};
use crossbeam_queue::ArrayQueue;

use super::{EngineMessage, EngineState, NoteParameters};
use crate::{bridge::SampleArena, Error};

// -------------------------------------------------------------------------------------------------

/// A handle to control a [`GrainEngine`](super::GrainEngine) from other threads.
///
/// Handles are cheap to clone. All operations are non-blocking for the render thread: they only
/// push messages into the engine's bounded message queue, which the engine drains at the start
/// of each rendered block.
#[derive(Clone)]
pub struct EngineHandle {
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    state: Arc<EngineState>,
    collector_handle: Handle,
    arena: Arc<Mutex<SampleArena>>,
    track_count: usize,
}

impl EngineHandle {
    pub(crate) fn new(
        message_queue: Arc<ArrayQueue<EngineMessage>>,
        state: Arc<EngineState>,
        collector_handle: Handle,
        arena: Arc<Mutex<SampleArena>>,
        track_count: usize,
    ) -> Self {
        Self {
            message_queue,
            state,
            collector_handle,
            arena,
            track_count,
        }
    }

    /// Output sample rate of the engine.
    pub fn sample_rate(&self) -> u32 {
        self.state.sample_rate()
    }

    /// Number of tracks the engine got created with.
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Number of active voices after the last rendered block. May be stale.
    pub fn active_voice_count(&self) -> usize {
        self.state.active_voices()
    }

    /// Render clock of the engine in seconds: the time of the next frame that will be rendered.
    pub fn current_time(&self) -> f64 {
        self.state.frame_position() as f64 / self.state.sample_rate() as f64
    }

    /// Total number of samples in the shared sample arena.
    pub fn arena_len(&self) -> usize {
        self.lock_arena().len()
    }

    /// Attach a mono or stereo sample buffer to the given track, replacing the track's
    /// previous buffer. Channels are planar slices which hold at least `frame_count` samples.
    ///
    /// The samples get copied. When the copy can not be allocated or published, the track
    /// keeps playing its previous buffer.
    pub fn attach_buffer(
        &self,
        track: usize,
        channels: &[&[f32]],
        frame_count: usize,
    ) -> Result<(), Error> {
        let mut arena = self.lock_arena();
        let update = arena
            .prepare_attach(track, channels, frame_count)
            .inspect_err(|err| log::warn!("Failed to attach buffer to track {track}: {err}"))?;
        let slots = Owned::new(
            &self.collector_handle,
            update.slots.clone().into_boxed_slice(),
        );
        let region = update.region.clone();
        if self
            .message_queue
            .push(EngineMessage::PublishBuffers { region, slots })
            .is_err()
        {
            log::warn!("Engine message queue is full, can't attach buffer to track {track}");
            return Err(Self::message_queue_error("attach_buffer"));
        }
        arena.commit(update);
        log::debug!(
            "Attached {} channel(s) with {frame_count} frames to track {track}",
            channels.len()
        );
        Ok(())
    }

    /// Schedule a note on the given track. `start_time` is in seconds of the engine's render
    /// clock, see [`Self::current_time`]. Notes which start in the past start with the next
    /// rendered block: grains which got missed by then are skipped. Out of range parameters
    /// get clamped.
    pub fn schedule_note(
        &self,
        track: usize,
        start_time: f64,
        duration: f64,
        parameters: NoteParameters,
    ) -> Result<(), Error> {
        self.validate_track(track)?;
        if !start_time.is_finite() {
            return Err(Error::ParameterError(format!(
                "note start time must be finite, but is {start_time}"
            )));
        }
        if !duration.is_finite() || duration < 0.0 {
            return Err(Error::ParameterError(format!(
                "note duration must be a finite positive value, but is {duration}"
            )));
        }
        if self
            .message_queue
            .push(EngineMessage::ScheduleNote {
                track,
                start_time,
                duration,
                parameters,
            })
            .is_err()
        {
            return Err(Self::message_queue_error("schedule_note"));
        }
        Ok(())
    }

    /// Immediately stop all voices and discard all pending notes of the given track.
    pub fn stop_track(&self, track: usize) -> Result<(), Error> {
        self.validate_track(track)?;
        self.send_stop(EngineMessage::StopTrack { track }, Some(track));
        log::debug!("Stopping track {track}");
        Ok(())
    }

    /// Immediately stop all voices and discard all pending notes.
    pub fn stop_all(&self) {
        self.send_stop(EngineMessage::StopAll, None);
        log::debug!("Stopping all tracks");
    }

    /// Notify the engine about a bar start at the given time. Notes which reset on bars
    /// restart scanning at this time.
    pub fn bar_tick(&self, time: f64) -> Result<(), Error> {
        if !time.is_finite() {
            return Err(Error::ParameterError(format!(
                "bar time must be finite, but is {time}"
            )));
        }
        if self
            .message_queue
            .push(EngineMessage::BarTick { time })
            .is_err()
        {
            return Err(Self::message_queue_error("bar_tick"));
        }
        Ok(())
    }

    /// Free sample data which the engine no longer uses. This also happens with every
    /// [`Self::attach_buffer`] call.
    pub fn collect_garbage(&self) {
        self.lock_arena().collect();
    }

    /// Stops must never get lost and must not evict other messages: when the queue is full,
    /// pass them as stop request flags, which the engine checks after draining the queue.
    fn send_stop(&self, message: EngineMessage, track: Option<usize>) {
        if self.message_queue.push(message).is_err() {
            log::debug!("Engine message queue is full, passing stop request via flags");
            self.state.request_stop(track);
        }
    }

    fn validate_track(&self, track: usize) -> Result<(), Error> {
        if track >= self.track_count {
            return Err(Error::TrackNotFoundError(track));
        }
        Ok(())
    }

    fn lock_arena(&self) -> std::sync::MutexGuard<'_, SampleArena> {
        // commits are atomic, so the arena is consistent even after a panic
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn message_queue_error(event_name: &str) -> Error {
        Error::SendError(format!(
            "Engine message queue is full: failed to send '{event_name}' event"
        ))
    }
}

// -------------------------------------------------------------------------------------------------
