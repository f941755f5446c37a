//! Sync-script renderer: replays an instruction stream into the encoder.
//!
//! Walks the instructions in order, holding each slide on screen for the
//! number of frames between consecutive timestamps, so the produced video
//! matches the footage frame-for-frame.

use anyhow::Result;
use tracing::{debug, info};

use crate::encode::encoder::VideoEncoder;
use crate::io::SlideLibrary;
use crate::sync::{SyncCode, SyncInstruction, SyncInstructions};

/// A run of identical output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Slide shown during the run.
    pub slide: u32,
    /// Number of frames of it.
    pub frames: u32,
}

/// Resolve an instruction stream into slide segments.
///
/// Relative timestamps are resolved against the running absolute position.
/// Overlapping instructions (zero delta) are applied without emitting frames,
/// so a burst of instructions on one frame cannot stretch the output. An
/// instruction landing on timestamp zero replaces the initial slide instead
/// of producing a one-frame flash of slide zero.
pub fn replay_segments(instructions: &[SyncInstruction], slide_count: u32) -> Vec<Segment> {
    let last_slide = slide_count.saturating_sub(1);
    let mut slide: u32 = 0;
    let mut position: u32 = 0;

    let mut segments: Vec<Segment> = Vec::new();

    let push = |segments: &mut Vec<Segment>, slide: u32, frames: u32| {
        if frames == 0 {
            return;
        }

        if let Some(last) = segments.last_mut() {
            if last.slide == slide {
                last.frames += frames;
                return;
            }
        }

        segments.push(Segment { slide, frames });
    };

    let apply = |slide: u32, instruction: &SyncInstruction| -> u32 {
        match instruction.code {
            SyncCode::Next => (slide + 1).min(last_slide),
            SyncCode::Previous => slide.saturating_sub(1),
            SyncCode::GoTo => instruction.data.min(last_slide),
            SyncCode::End => slide,
        }
    };

    for instruction in instructions {
        let absolute = if instruction.relative {
            position + instruction.timestamp
        } else {
            instruction.timestamp
        };

        let delta = absolute.saturating_sub(position);

        push(&mut segments, slide, delta);
        slide = apply(slide, instruction);
        position = position.max(absolute);
    }

    // trailing frame showing the final slide, mirroring the initial one
    push(&mut segments, slide, 1);

    segments
}

/// Encode the whole script as a video.
pub fn render_script(
    slides: &SlideLibrary,
    instructions: &SyncInstructions,
    encoder: &mut VideoEncoder,
) -> Result<()> {
    let segments = replay_segments(instructions.instructions(), slides.len() as u32);

    for segment in &segments {
        debug!(
            "encoding slide {} for {} frames",
            segment.slide + 1,
            segment.frames
        );

        if let Some(image) = slides.get(segment.slide as usize) {
            encoder.write(image)?;
            encoder.repeat(segment.frames - 1)?;
        }
    }

    info!("rendered {} frames", encoder.frames_written());

    Ok(())
}
