//! **graincloud** is a polyphonic granular synthesis engine.
//!
//! It spawns short, windowed and overlapping grains from a sample buffer per track, at a
//! controllable density, pitch and scatter, and mixes them into a stereo output in fixed size
//! blocks. Rendering is real-time safe: it never allocates, locks or fails.
//!
//! A [`GrainEngine`] gets created along with an [`EngineHandle`]. The engine renders on the
//! audio thread, the handle attaches sample buffers and schedules notes from any other thread.
//!
//! ```rust
//! use graincloud::{EngineOptions, GrainEngine, NoteParameters};
//!
//! let (mut engine, handle) =
//!     GrainEngine::with_options(EngineOptions::default().sample_rate(48000))?;
//!
//! // attach a mono buffer to track 0
//! let samples = (0..48000)
//!     .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 48000.0).sin())
//!     .collect::<Vec<_>>();
//! handle.attach_buffer(0, &[&samples], samples.len())?;
//!
//! // play a two seconds long grain cloud
//! let parameters = NoteParameters {
//!     density: 40.0,
//!     grain_size: 0.08,
//!     spray: 0.2,
//!     ..NoteParameters::default()
//! };
//! handle.schedule_note(0, 0.0, 2.0, parameters)?;
//!
//! // render interleaved stereo blocks
//! let mut output = vec![0.0; 512 * 2];
//! let active_voices = engine.render_block(&mut output, 512);
//! assert!(active_voices > 0);
//! # Ok::<(), graincloud::Error>(())
//! ```

// private mods (will be partly re-exported)
mod bridge;
mod engine;
mod error;
mod options;

// public, flat re-exports
pub use engine::{BlockStats, EngineHandle, GrainEngine, NoteParameters};
pub use error::Error;
pub use options::{EngineOptions, GrainSpacing};

// public mods
pub mod utils;

pub use utils::{interpolation::InterpolationMode, window::WindowTable};
