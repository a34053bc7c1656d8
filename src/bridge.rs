//! Shared per-track sample storage between the control and the render thread.
//!
//! The control side owns a [`SampleArena`], which packs the sample data of all tracks into one
//! contiguous region. Every change creates a new, compacted region and a new slot table, which
//! are published to the render thread together. The render thread only holds `offset + length`
//! pairs into the region it got published last, and re-derives its views from them in every
//! block, so a region swap never invalidates any voice.

use basedrop::{Collector, Handle, Shared};

use crate::{utils::buffer::concat_planar, Error};

// -------------------------------------------------------------------------------------------------

/// Location of a track's planar sample data within a [`SampleRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlice {
    /// Offset of the first channel's first sample in the region.
    pub offset: usize,
    /// Number of frames per channel.
    pub frame_count: usize,
    /// Number of channels, 1 or 2. Channels are stored one after another.
    pub channel_count: usize,
}

impl BufferSlice {
    /// Total number of samples this slice occupies in the region.
    pub fn sample_count(&self) -> usize {
        self.frame_count * self.channel_count
    }
}

// -------------------------------------------------------------------------------------------------

/// An immutable snapshot of the sample arena, as seen by the render thread.
#[derive(Debug)]
pub struct SampleRegion {
    samples: Box<[f32]>,
}

impl SampleRegion {
    /// Total number of samples in the region.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Access a channel of the given slice. Returns None when the slice does not fit into the
    /// region or when the channel does not exist.
    pub fn channel(&self, slice: &BufferSlice, channel: usize) -> Option<&[f32]> {
        if channel >= slice.channel_count {
            return None;
        }
        let start = slice.offset + channel * slice.frame_count;
        self.samples.get(start..start + slice.frame_count)
    }
}

// -------------------------------------------------------------------------------------------------

/// A new region and slot table, created by [`SampleArena::prepare_attach`].
/// Apply it with [`SampleArena::commit`] once it got published to the render thread.
pub(crate) struct ArenaUpdate {
    pub region: Shared<SampleRegion>,
    pub slots: Vec<Option<BufferSlice>>,
}

// -------------------------------------------------------------------------------------------------

/// Control side owner of all track sample data.
pub(crate) struct SampleArena {
    region: Option<Shared<SampleRegion>>,
    slots: Vec<Option<BufferSlice>>,
    max_samples: usize,
    collector: Collector,
}

impl SampleArena {
    pub fn new(track_count: usize, max_samples: usize) -> Self {
        Self {
            region: None,
            slots: vec![None; track_count],
            max_samples,
            collector: Collector::new(),
        }
    }

    /// Handle to the collector which frees regions and slot tables the render thread dropped.
    pub fn collector_handle(&self) -> Handle {
        self.collector.handle()
    }

    /// Free all regions and slot tables the render thread released.
    pub fn collect(&mut self) {
        self.collector.collect();
    }

    /// The currently committed slot of the given track.
    #[cfg(test)]
    pub fn slot(&self, track: usize) -> Option<BufferSlice> {
        self.slots.get(track).copied().flatten()
    }

    /// Number of samples in the currently committed region.
    pub fn len(&self) -> usize {
        self.region.as_ref().map_or(0, |region| region.len())
    }

    /// Create a new compacted region which contains all other tracks' sample data and the
    /// given channels for `track`. The arena itself stays unchanged until the update gets
    /// committed, so a failed attach leaves the track with its previous buffer.
    pub fn prepare_attach(
        &mut self,
        track: usize,
        channels: &[&[f32]],
        frame_count: usize,
    ) -> Result<ArenaUpdate, Error> {
        self.collect();

        if track >= self.slots.len() {
            return Err(Error::TrackNotFoundError(track));
        }
        if !(1..=2).contains(&channels.len()) {
            return Err(Error::ParameterError(format!(
                "sample buffers need one or two channels, got {}",
                channels.len()
            )));
        }
        if let Some(channel) = channels.iter().find(|c| c.len() < frame_count) {
            return Err(Error::ParameterError(format!(
                "sample buffer channel holds {} samples, but {} frames got requested",
                channel.len(),
                frame_count
            )));
        }

        let kept_samples: usize = self
            .slots
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != track)
            .filter_map(|(_, slot)| slot.map(|s| s.sample_count()))
            .sum();
        let new_samples = frame_count * channels.len();
        let total_samples = kept_samples + new_samples;
        if total_samples > self.max_samples {
            return Err(Error::BufferAllocationError(format!(
                "arena would grow to {} samples, but is limited to {} samples",
                total_samples, self.max_samples
            )));
        }

        let mut samples = Vec::new();
        samples.try_reserve_exact(total_samples)?;

        let mut slots = vec![None; self.slots.len()];
        for (index, slot) in self.slots.iter().enumerate() {
            if index == track {
                continue;
            }
            if let (Some(slot), Some(region)) = (slot, &self.region) {
                let offset = samples.len();
                for channel in 0..slot.channel_count {
                    if let Some(data) = region.channel(slot, channel) {
                        samples.extend_from_slice(data);
                    }
                }
                slots[index] = Some(BufferSlice { offset, ..*slot });
            }
        }
        let offset = samples.len();
        concat_planar(channels, frame_count, &mut samples);
        slots[track] = Some(BufferSlice {
            offset,
            frame_count,
            channel_count: channels.len(),
        });

        let region = Shared::new(
            &self.collector.handle(),
            SampleRegion {
                samples: samples.into_boxed_slice(),
            },
        );
        Ok(ArenaUpdate { region, slots })
    }

    /// Apply a published update.
    pub fn commit(&mut self, update: ArenaUpdate) {
        self.region = Some(update.region);
        self.slots = update.slots;
    }
}

// -------------------------------------------------------------------------------------------------

/// Borrowed view on the sample data of a single track.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SampleView<'a> {
    left: &'a [f32],
    right: &'a [f32],
    is_mono: bool,
}

impl<'a> SampleView<'a> {
    pub fn mono(samples: &'a [f32]) -> Self {
        Self {
            left: samples,
            right: samples,
            is_mono: true,
        }
    }

    pub fn stereo(left: &'a [f32], right: &'a [f32]) -> Self {
        debug_assert_eq!(left.len(), right.len());
        Self {
            left,
            right,
            is_mono: false,
        }
    }

    pub fn left(&self) -> &'a [f32] {
        self.left
    }

    pub fn right(&self) -> &'a [f32] {
        self.right
    }

    pub fn is_mono(&self) -> bool {
        self.is_mono
    }

    pub fn frame_count(&self) -> usize {
        self.left.len()
    }
}

// -------------------------------------------------------------------------------------------------

/// Render side state of the bridge: the last published region and slot table.
///
/// Dropping superseded regions here only hands them over to the arena's collector, so
/// publishing never deallocates on the render thread.
#[derive(Default)]
pub(crate) struct TrackBuffers {
    region: Option<Shared<SampleRegion>>,
    slots: Option<basedrop::Owned<Box<[Option<BufferSlice>]>>>,
}

impl TrackBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace region and slot table in one step.
    pub fn publish(
        &mut self,
        region: Shared<SampleRegion>,
        slots: basedrop::Owned<Box<[Option<BufferSlice>]>>,
    ) {
        self.region = Some(region);
        self.slots = Some(slots);
    }

    /// Number of frames of the given track's buffer, 0 when no buffer is attached.
    pub fn frame_count(&self, track: usize) -> usize {
        self.slot(track).map_or(0, |slot| slot.frame_count)
    }

    /// Derive a view on the given track's sample data. Returns None when the track has no
    /// buffer attached or the attached buffer is empty.
    pub fn view(&self, track: usize) -> Option<SampleView<'_>> {
        let slot = self.slot(track)?;
        if slot.frame_count == 0 {
            return None;
        }
        let region = self.region.as_ref()?;
        let left = region.channel(&slot, 0)?;
        if slot.channel_count > 1 {
            let right = region.channel(&slot, 1)?;
            Some(SampleView::stereo(left, right))
        } else {
            Some(SampleView::mono(left))
        }
    }

    fn slot(&self, track: usize) -> Option<BufferSlice> {
        self.slots
            .as_ref()
            .and_then(|slots| slots.get(track).copied().flatten())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use basedrop::Owned;

    use super::*;

    fn publish(arena: &mut SampleArena, buffers: &mut TrackBuffers, update: ArenaUpdate) {
        let handle = arena.collector_handle();
        buffers.publish(
            update.region.clone(),
            Owned::new(&handle, update.slots.clone().into_boxed_slice()),
        );
        arena.commit(update);
    }

    #[test]
    fn attach_and_view() {
        let mut arena = SampleArena::new(4, 1024);
        let mut buffers = TrackBuffers::new();
        assert!(buffers.view(0).is_none());

        let mono: [f32; 3] = [0.1, 0.2, 0.3];
        let update = arena.prepare_attach(1, &[&mono], 3).unwrap();
        publish(&mut arena, &mut buffers, update);

        let left: [f32; 4] = [1.0, 2.0, 3.0, 4.0];
        let right: [f32; 4] = [-1.0, -2.0, -3.0, -4.0];
        let update = arena.prepare_attach(2, &[&left, &right], 4).unwrap();
        publish(&mut arena, &mut buffers, update);

        assert_eq!(arena.len(), 3 + 8);
        assert!(buffers.view(0).is_none());

        let view = buffers.view(1).unwrap();
        assert!(view.is_mono());
        assert_eq!(view.left(), &mono);
        assert_eq!(view.right(), &mono);

        let view = buffers.view(2).unwrap();
        assert!(!view.is_mono());
        assert_eq!(view.frame_count(), 4);
        assert_eq!(view.left(), &left);
        assert_eq!(view.right(), &right);
    }

    #[test]
    fn replace_compacts() {
        let mut arena = SampleArena::new(2, 1024);
        let mut buffers = TrackBuffers::new();

        let a = [1.0_f32; 100];
        let b = [2.0_f32; 50];
        let update = arena.prepare_attach(0, &[&a], 100).unwrap();
        publish(&mut arena, &mut buffers, update);
        let update = arena.prepare_attach(1, &[&b], 50).unwrap();
        publish(&mut arena, &mut buffers, update);
        assert_eq!(arena.len(), 150);

        // replacing track 0 drops its old samples and moves track 1 to the front
        let c = [3.0_f32; 10];
        let update = arena.prepare_attach(0, &[&c], 10).unwrap();
        publish(&mut arena, &mut buffers, update);
        assert_eq!(arena.len(), 60);
        assert_eq!(arena.slot(1).unwrap().offset, 0);
        assert_eq!(buffers.view(0).unwrap().left(), &c);
        assert_eq!(buffers.view(1).unwrap().left(), &b);
    }

    #[test]
    fn rejected_attach_keeps_previous_buffer() {
        let mut arena = SampleArena::new(2, 100);
        let mut buffers = TrackBuffers::new();

        let a = [0.5_f32; 60];
        let update = arena.prepare_attach(0, &[&a], 60).unwrap();
        publish(&mut arena, &mut buffers, update);

        let too_large = [0.25_f32; 60];
        assert!(matches!(
            arena.prepare_attach(1, &[&too_large], 60),
            Err(Error::BufferAllocationError(_))
        ));
        assert!(matches!(
            arena.prepare_attach(5, &[&a], 60),
            Err(Error::TrackNotFoundError(5))
        ));
        assert!(matches!(
            arena.prepare_attach(1, &[&a], 61),
            Err(Error::ParameterError(_))
        ));
        assert!(matches!(
            arena.prepare_attach(1, &[&a, &a, &a], 10),
            Err(Error::ParameterError(_))
        ));
        assert_eq!(arena.slot(0).unwrap().frame_count, 60);
        assert!(arena.slot(1).is_none());
        assert_eq!(buffers.view(0).unwrap().left(), &a);

        // replacing a track only counts the new size against the limit
        let b = [0.75_f32; 90];
        assert!(arena.prepare_attach(0, &[&b], 90).is_ok());
    }

    #[test]
    fn empty_buffers_have_no_view() {
        let mut arena = SampleArena::new(1, 100);
        let mut buffers = TrackBuffers::new();
        let empty: [f32; 0] = [];
        let update = arena.prepare_attach(0, &[&empty], 0).unwrap();
        publish(&mut arena, &mut buffers, update);
        assert_eq!(buffers.frame_count(0), 0);
        assert!(buffers.view(0).is_none());
    }
}
