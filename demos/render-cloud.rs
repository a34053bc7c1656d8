//! Renders a few seconds of granular clouds from a synthetic sample into a WAV file.

use std::{error::Error, f32::consts::TAU};

use graincloud::{EngineOptions, GrainEngine, GrainSpacing, NoteParameters};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const SAMPLE_RATE: u32 = 48000;
const BLOCK_SIZE: usize = 256;
const RENDER_SECONDS: f64 = 8.0;
const OUTPUT_PATH: &str = "render-cloud.wav";

/// Bar length of the bar ticks sent to the engine (120 BPM, 4/4).
const BAR_SECONDS: f64 = 2.0;

// -------------------------------------------------------------------------------------------------

/// A two seconds long, stereo, slowly detuned chord as grain source.
fn create_sample() -> (Vec<f32>, Vec<f32>) {
    let frames = 2 * SAMPLE_RATE as usize;
    let partials = [220.0, 277.18, 329.63, 440.0];
    let render = |detune: f32| {
        (0..frames)
            .map(|frame| {
                let time = frame as f32 / SAMPLE_RATE as f32;
                partials
                    .iter()
                    .map(|freq| (time * freq * detune * TAU).sin())
                    .sum::<f32>()
                    / partials.len() as f32
            })
            .collect::<Vec<_>>()
    };
    (render(1.0), render(1.003))
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()?;

    let options = EngineOptions::default()
        .sample_rate(SAMPLE_RATE)
        .grain_spacing(GrainSpacing::Density)
        .seed(0x5eed);
    let (mut engine, handle) = GrainEngine::with_options(options)?;

    let (left, right) = create_sample();
    handle.attach_buffer(0, &[&left, &right], left.len())?;
    handle.attach_buffer(1, &[&left], left.len())?;

    // a slowly scanning, clean pad on track 0
    let pad = NoteParameters {
        position: 0.1,
        scan_speed: 0.05,
        window_start: 0.1,
        window_end: 0.9,
        density: 30.0,
        grain_size: 0.15,
        spray: 0.1,
        orbit: 0.4,
        reset_on_bar: true,
        reset_on_trig: false,
        ..NoteParameters::default()
    };
    handle.schedule_note(0, 0.0, RENDER_SECONDS - 1.0, pad)?;

    // short, crunchy and pitched up clouds on track 1
    let sparkle = NoteParameters {
        density: 80.0,
        grain_size: 0.03,
        pitch: 2.0,
        velocity: 0.6,
        spray: 0.5,
        clean_mode: false,
        edge_crunch: 0.3,
        orbit: 1.0,
        ..NoteParameters::default()
    };
    for bar in 0..3 {
        let start_time = 1.0 + bar as f64 * BAR_SECONDS;
        handle.schedule_note(1, start_time, 0.75, sparkle)?;
    }

    let mut writer = hound::WavWriter::create(
        OUTPUT_PATH,
        hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
    )?;

    let total_frames = (RENDER_SECONDS * SAMPLE_RATE as f64) as usize;
    let mut output = vec![0.0; BLOCK_SIZE * 2];
    let mut next_bar = BAR_SECONDS;
    let mut rendered = 0;
    let mut max_voices = 0;
    while rendered < total_frames {
        if handle.current_time() >= next_bar {
            handle.bar_tick(next_bar)?;
            next_bar += BAR_SECONDS;
        }
        let frames = BLOCK_SIZE.min(total_frames - rendered);
        let active_voices = engine.render_block(&mut output, frames);
        max_voices = max_voices.max(active_voices);
        for sample in &output[..frames * 2] {
            writer.write_sample(*sample)?;
        }
        rendered += frames;
    }
    writer.finalize()?;

    log::info!(
        "Rendered {:.1} seconds with up to {max_voices} voices into '{OUTPUT_PATH}'",
        rendered as f64 / SAMPLE_RATE as f64
    );
    Ok(())
}
