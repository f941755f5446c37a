//! Driver: owns the footage, the tracker and the output paths, and pumps the
//! tracker until the synchronization pass settles.
//!
//! The driver is the flat owner of every resource in the pipeline; events
//! flow one way, from the tracker to the driver, over a channel. Ticks run
//! on the calling thread: all per-frame work for one frame completes before
//! the next begins.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use tracing::{info, warn};

use crate::encode::{render_script, VideoEncoder};
use crate::io::{Footage, FrameSource, SlideLibrary};
use crate::tracking::{SyncTracker, TrackerConfig, TrackerEvent, TrackerPhase};

pub struct SyncDriver<S> {
    footage: Footage<S>,
    tracker: SyncTracker,
    events: Receiver<TrackerEvent>,
    sync_path: PathBuf,
    output_path: PathBuf,
    stop_requested: bool,
}

impl<S: FrameSource> SyncDriver<S> {
    pub fn new(
        footage: Footage<S>,
        slides: SlideLibrary,
        cache_path: PathBuf,
        sync_path: PathBuf,
        output_path: PathBuf,
        config: TrackerConfig,
    ) -> Result<Self> {
        let framerate = footage.fps().round() as u32;

        let (sender, events) = unbounded();
        let tracker = SyncTracker::new(slides, framerate, cache_path, config, sender)?;

        Ok(Self {
            footage,
            tracker,
            events,
            sync_path,
            output_path,
            stop_requested: false,
        })
    }

    /// Ask the driver to stop between ticks; the in-flight tick runs to
    /// completion.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    /// Run the pipeline to completion: synchronize, write the sync script,
    /// and render the output video.
    pub fn run(&mut self) -> Result<()> {
        while self.tracker.phase() != TrackerPhase::Idle {
            if self.stop_requested {
                warn!("stop requested; no output written");
                return Ok(());
            }

            self.tracker.step(&mut self.footage);
        }

        if self.events.try_recv() != Ok(TrackerEvent::LoopFinished) {
            bail!("synchronization failed; no instructions were produced");
        }

        let script = self.tracker.instructions().to_string();
        fs::write(&self.sync_path, &script)
            .with_context(|| format!("writing sync script {:?}", self.sync_path))?;
        info!("wrote sync script {:?}", self.sync_path);

        self.render()?;

        Ok(())
    }

    /// Render the synchronized slideshow video from the instruction stream.
    fn render(&mut self) -> Result<()> {
        let slides = self.tracker.slides();
        let first = slides.get(0).context("presentation has no slides")?;

        let mut encoder = VideoEncoder::new(
            &self.output_path,
            first.cols() as u32,
            first.rows() as u32,
            self.tracker.instructions().framerate(),
        )?;

        render_script(slides, self.tracker.instructions(), &mut encoder)?;
        encoder.finish()?;

        info!("wrote output video {:?}", self.output_path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::footage::tests::StubSource;
    use crate::io::FRAMESKIP;
    use opencv::core::{Mat, Scalar, CV_8UC1, CV_8UC3};
    use tempfile::TempDir;

    #[test]
    fn failed_initial_lock_is_an_error_and_leaves_no_output() {
        let dir = TempDir::new().unwrap();

        // featureless slides and footage: no initial lock is possible
        let slides = SlideLibrary::from_images(vec![Mat::new_rows_cols_with_default(
            240,
            320,
            CV_8UC1,
            Scalar::all(255.0),
        )
        .unwrap()]);
        let frames = (0..16)
            .map(|_| {
                Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(20.0)).unwrap()
            })
            .collect();
        let footage = Footage::new(StubSource::new(frames, 24.0, 640, 480), FRAMESKIP);

        let sync_path = dir.path().join("out.sync");
        let output_path = dir.path().join("out.mp4");

        let mut driver = SyncDriver::new(
            footage,
            slides,
            dir.path().join("raw.sync"),
            sync_path.clone(),
            output_path.clone(),
            TrackerConfig::default(),
        )
        .unwrap();

        assert!(driver.run().is_err());
        assert!(!sync_path.exists());
        assert!(!output_path.exists());
    }

    #[test]
    fn stop_request_halts_before_completion() {
        let dir = TempDir::new().unwrap();

        let slides = SlideLibrary::from_images(vec![Mat::new_rows_cols_with_default(
            240,
            320,
            CV_8UC1,
            Scalar::all(255.0),
        )
        .unwrap()]);
        let footage = Footage::new(StubSource::uniform(72, 640, 480), FRAMESKIP);

        let mut driver = SyncDriver::new(
            footage,
            slides,
            dir.path().join("raw.sync"),
            dir.path().join("out.sync"),
            dir.path().join("out.mp4"),
            TrackerConfig::default(),
        )
        .unwrap();

        driver.request_stop();
        assert!(driver.run().is_ok());
        assert!(!dir.path().join("out.sync").exists());
    }
}
