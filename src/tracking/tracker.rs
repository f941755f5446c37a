//! Synchronization tracker: follows the slide projection through the footage
//! and records slide changes as instructions.
//!
//! The tracker is a three-phase state machine (initialize, track, idle)
//! stepped by the driver. Each tracking tick processes one subsampled frame:
//! it first tries a cheap differential match against the reference keyframe,
//! and only when that is weak does it search over candidate slides with the
//! full cost model. A salvage path against the previous frame's pose recovers
//! from a stale reference, and a growing bad-frame counter widens the search
//! to every slide when the tracker is completely lost.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Result};
use crossbeam_channel::Sender;
use nalgebra::Matrix3;
use opencv::core::{AlgorithmHint, DMatch, Mat, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use tracing::{debug, error, info, warn};

use crate::features::{quad_filter, FeaturePipeline, FeatureSet};
use crate::geometry::Quad;
use crate::io::{Footage, FrameSource, SlideLibrary};
use crate::sync::timecode::format_stamp;
use crate::sync::SyncInstructions;
use crate::tracking::cost::{match_cost, quad_deviation, slide_match, CostConfig};
use crate::tracking::state::TrackerPhase;

/// Event sent from the tracker to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The synchronization pass is complete (or was restored from cache).
    LoopFinished,
}

/// Tunable thresholds of the tracker. All defaults are empirical.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Pose deviation (pixels) beyond which a good match forces a keyframe:
    /// a large pan invalidates the differential basis.
    pub large_deviation: f64,
    /// Pose deformation (pixels) beyond which a good match forces a keyframe.
    pub large_deformation: f64,
    /// Candidate costs at or above this mean no slide fits the frame.
    pub large_cost: f64,
    /// Salvage costs below this count as "near" the previous frame's pose.
    pub reasonable_cost: f64,
    /// Consecutive near frames needed before the salvage cost is accepted.
    pub near_frames: u32,
    /// Consecutive bad frames before the candidate search widens to every
    /// slide.
    pub scan_after: u32,
    /// Amount the bad-frame counter rewinds after a full scan, so the next
    /// one happens sooner.
    pub scan_retry: u32,
    /// Cost model thresholds.
    pub cost: CostConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            large_deviation: 10.0,
            large_deformation: 7.0,
            large_cost: 1000.0,
            reasonable_cost: 40.0,
            near_frames: 3,
            scan_after: 7,
            scan_retry: 4,
            cost: CostConfig::default(),
        }
    }
}

/// Reference keyframe state for differential processing.
///
/// Replaced atomically on keyframe adoption. The quad subset holds only the
/// keypoints inside the slide pose, with a lookup table from full-set indices
/// into it.
struct Reference {
    /// Grayscale image of the keyframe.
    image: Mat,
    features: FeatureSet,
    quad_features: FeatureSet,
    quad_lookup: Vec<i32>,
    /// Slide pose at the moment this keyframe was adopted. Its vertices may
    /// lie outside the frame, since the slide can be partially out of view.
    slidepose: Quad,
}

/// Best candidate found during a hard-frame search.
struct Candidate {
    slide: u32,
    pose: Quad,
    cost: f64,
    homography: Option<Matrix3<f64>>,
    inliers: Vector<DMatch>,
}

pub struct SyncTracker {
    config: TrackerConfig,
    pipeline: FeaturePipeline,
    slides: SlideLibrary,
    /// Precomputed keypoints and descriptors, one entry per slide.
    slide_features: Vec<FeatureSet>,
    instructions: SyncInstructions,
    cache_path: PathBuf,
    events: Sender<TrackerEvent>,

    phase: TrackerPhase,
    /// Re-entrancy latch: a tick arriving while another is in flight is
    /// dropped, not queued.
    processing: bool,

    reference: Option<Reference>,
    /// Slide pose of the immediately preceding processed frame, used as a
    /// fallback basis of comparison when the reference has gone stale.
    prev_slidepose: Quad,
    slide_index: u32,
    /// Consecutive frames whose pose stayed near the previous frame's.
    nearcount: u32,
    /// Consecutive frames with nothing decent; triggers the full scan.
    badcount: u32,
}

impl SyncTracker {
    pub fn new(
        slides: SlideLibrary,
        framerate: u32,
        cache_path: PathBuf,
        config: TrackerConfig,
        events: Sender<TrackerEvent>,
    ) -> Result<Self> {
        let instructions = SyncInstructions::new(slides.len() as u32, framerate);

        Ok(Self {
            config,
            pipeline: FeaturePipeline::new()?,
            slides,
            slide_features: Vec::new(),
            instructions,
            cache_path,
            events,
            phase: TrackerPhase::Initializing,
            processing: false,
            reference: None,
            prev_slidepose: Quad::default(),
            slide_index: 0,
            nearcount: 0,
            badcount: 0,
        })
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn slide_index(&self) -> u32 {
        self.slide_index
    }

    pub fn instructions(&self) -> &SyncInstructions {
        &self.instructions
    }

    pub fn slides(&self) -> &SlideLibrary {
        &self.slides
    }

    /// Run one tick of the state machine.
    ///
    /// A tick never propagates an error: failures are logged and the tracker
    /// settles into the idle phase, where further ticks do nothing.
    pub fn step<S: FrameSource>(&mut self, footage: &mut Footage<S>) {
        if self.processing {
            return;
        }

        self.processing = true;

        let result = match self.phase {
            TrackerPhase::Initializing => self.initialize(footage),
            TrackerPhase::Tracking => self.track(footage),
            TrackerPhase::Idle => Ok(()),
        };

        self.processing = false;

        if let Err(error) = result {
            error!("tracking tick failed: {:#}", error);
            self.phase = TrackerPhase::Idle;
        }
    }

    /// Enter the idle phase and notify the driver of completion.
    fn finish(&mut self) {
        self.phase = TrackerPhase::Idle;

        if self.events.send(TrackerEvent::LoopFinished).is_err() {
            debug!("no listener for loop completion");
        }
    }

    /// First processing stage: precompute slide features and lock onto the
    /// first frame, or restore a cached script and skip tracking entirely.
    fn initialize<S: FrameSource>(&mut self, footage: &mut Footage<S>) -> Result<()> {
        if self.slides.is_empty() {
            error!("presentation has no slides");
            self.phase = TrackerPhase::Idle;
            return Ok(());
        }

        info!("precomputing features for {} slides", self.slides.len());

        for slide in self.slides.images() {
            let features = self.pipeline.extract(slide)?;
            self.slide_features.push(features);
        }

        if self.cache_path.exists() {
            match fs::read_to_string(&self.cache_path) {
                Ok(text) => match text.parse::<SyncInstructions>() {
                    Ok(parsed) => {
                        info!("restored sync script from {:?}", self.cache_path);
                        self.instructions = parsed;
                        self.finish();
                        return Ok(());
                    }
                    Err(error) => {
                        warn!("can't parse instructions file {:?}: {}", self.cache_path, error);
                    }
                },
                Err(error) => {
                    warn!("can't read instructions file {:?}: {}", self.cache_path, error);
                }
            }
        }

        // peek the first frame to find the slide projection; non-rewindable
        // sources (realtime camera streams) are not supported
        let first = match footage.peek_first()? {
            Some(first) => first,
            None => {
                error!("footage has no frames");
                self.phase = TrackerPhase::Idle;
                return Ok(());
            }
        };

        let gray = to_grayscale(&first)?;
        let features = self.pipeline.extract(&gray)?;

        let matches = self
            .pipeline
            .match_descriptors(&self.slide_features[0].descriptors, &features.descriptors)?;
        let (homography, _inliers) = self.pipeline.refine_homography(
            &self.slide_features[0].keypoints,
            &features.keypoints,
            &matches,
        )?;

        let homography = match homography {
            Some(homography) => homography,
            None => {
                error!("can't find a robust matching for the first frame");
                self.phase = TrackerPhase::Idle;
                return Ok(());
            }
        };

        let slidepose = slide_rect(&self.slides.images()[0])?.perspective(Some(&homography));

        self.slide_index = 0;
        self.nearcount = 0;
        self.badcount = 0;
        self.prev_slidepose = slidepose;
        self.install_reference(gray, features, slidepose)?;
        self.phase = TrackerPhase::Tracking;

        info!("locked onto the first frame");

        Ok(())
    }

    /// Main processing stage: follow the slide projection in one frame.
    fn track<S: FrameSource>(&mut self, footage: &mut Footage<S>) -> Result<()> {
        let frame = match footage.next_frame()? {
            Some(frame) => frame,
            None => {
                self.instructions.end(footage.frame_index(), false);

                if let Err(error) = fs::write(&self.cache_path, self.instructions.to_string()) {
                    warn!("can't write sync cache {:?}: {}", self.cache_path, error);
                }

                info!("footage exhausted after {} instructions", self.instructions.instructions().len());
                self.finish();
                return Ok(());
            }
        };

        let gray = to_grayscale(&frame.image)?;
        let features = self.pipeline.extract(&gray)?;

        let Some(reference) = self.reference.as_ref() else {
            bail!("tracking without a reference frame");
        };

        // differential pass: match against the reference keyframe and carry
        // its slide pose over through the estimated homography
        let matches = self
            .pipeline
            .match_descriptors(&reference.features.descriptors, &features.descriptors)?;
        let (homography, _inliers) = self.pipeline.refine_homography(
            &reference.features.keypoints,
            &features.keypoints,
            &matches,
        )?;

        let ref_slidepose = reference.slidepose;
        let slidepose = ref_slidepose.perspective(homography.as_ref());

        let current_quad = quad_filter(&features, &slidepose)?;

        // restrict the matching to pairs living inside both slide quads
        let mut quad_matches = Vector::<DMatch>::new();

        for m in matches.iter() {
            let ref_index = reference.quad_lookup[m.query_idx as usize];
            let quad_index = current_quad.lookup[m.train_idx as usize];

            if ref_index >= 0 && quad_index >= 0 {
                quad_matches.push(DMatch::new(ref_index, quad_index, m.distance)?);
            }
        }

        let differential_lock = homography.is_some()
            && slide_match(
                &reference.quad_features.keypoints,
                &current_quad.features.keypoints,
                &quad_matches,
                homography.as_ref(),
                &ref_slidepose,
                &slidepose,
                &self.config.cost,
            );

        let mut accepted_pose = slidepose;
        let mut new_slide_index = self.slide_index;
        let mut good_match = true;
        let mut hard_frame = false;
        let mut make_keyframe = false;

        if differential_lock {
            self.badcount = 0;
            self.nearcount = 0;
        } else {
            // the match is weak; check whether other slides work better
            hard_frame = true;

            let best = self.search_candidates(&features, ref_slidepose)?;
            let mut best_cost = best.cost;

            // salvage: compare against the previous frame's pose instead of
            // the possibly stale reference; a streak of near frames makes the
            // alternate cost trustworthy
            let alternate_cost = match_cost(
                &self.slide_features[best.slide as usize].keypoints,
                &features.keypoints,
                &best.inliers,
                best.homography.as_ref(),
                &self.prev_slidepose,
                &best.pose,
                &self.config.cost,
            );

            if alternate_cost < self.config.reasonable_cost {
                self.nearcount += 1;

                if best_cost >= self.config.large_cost && self.nearcount >= self.config.near_frames
                {
                    best_cost = alternate_cost;
                }
            } else {
                self.nearcount = 0;
            }

            if best_cost < self.config.large_cost {
                self.badcount = 0;
            } else {
                // this frame is too bad; skip it and hope the next is better
                good_match = false;
                self.badcount += 1;
            }

            new_slide_index = best.slide;
            accepted_pose = best.pose;

            if good_match && best.slide != self.slide_index {
                make_keyframe = true;

                let timestamp = frame.frame_index;
                let recorded = if best.slide == self.slide_index + 1 {
                    self.instructions.next(timestamp, false)
                } else if best.slide + 1 == self.slide_index {
                    self.instructions.previous(timestamp, false)
                } else {
                    self.instructions.go_to(timestamp, best.slide, false)
                };

                match recorded {
                    Ok(()) => info!(
                        "slide {} -> {} at {}",
                        self.slide_index + 1,
                        best.slide + 1,
                        format_stamp(timestamp, self.instructions.framerate())
                    ),
                    Err(error) => warn!("can't record slide change: {}", error),
                }
            }
        }

        let (deviation, deformation) = quad_deviation(&ref_slidepose, &accepted_pose);

        if good_match
            && (deviation > self.config.large_deviation
                || deformation > self.config.large_deformation)
        {
            make_keyframe = true;
        }

        debug!(
            "frame {} ({} / {}) -- slide {}{}{}",
            frame.coarse_index,
            frame.frame_index,
            format_stamp(frame.frame_index, self.instructions.framerate()),
            self.slide_index + 1,
            if make_keyframe { "    KF" } else { "" },
            if hard_frame { "    H" } else { "" },
        );

        if make_keyframe {
            self.slide_index = new_slide_index;
            self.install_reference(gray, features, accepted_pose)?;
        }

        self.prev_slidepose = accepted_pose;

        Ok(())
    }

    /// Score candidate slides against the current frame and keep the best.
    ///
    /// Nearby slides are tried first; once the tracker has been lost for
    /// `scan_after` consecutive frames, every slide is scanned and the
    /// counter rewinds so the next full scan happens sooner.
    fn search_candidates(&mut self, features: &FeatureSet, ref_pose: Quad) -> Result<Candidate> {
        let slide_count = self.slides.len() as i64;

        let candidates: Vec<u32> = if self.badcount < self.config.scan_after {
            let current = i64::from(self.slide_index);

            [0i64, 1, -1, 2, -2, 3, -3]
                .iter()
                .map(|offset| current + offset)
                .filter(|&c| c >= 0 && c < slide_count)
                .map(|c| c as u32)
                .collect()
        } else {
            self.badcount -= self.config.scan_retry;
            (0..slide_count as u32).collect()
        };

        let mut best = Candidate {
            slide: self.slide_index,
            pose: Quad::default(),
            cost: f64::INFINITY,
            homography: None,
            inliers: Vector::new(),
        };

        for candidate in candidates {
            let slide_features = &self.slide_features[candidate as usize];

            let matches = self
                .pipeline
                .match_descriptors(&slide_features.descriptors, &features.descriptors)?;
            let (homography, inliers) = self.pipeline.refine_homography(
                &slide_features.keypoints,
                &features.keypoints,
                &matches,
            )?;

            let pose = slide_rect(&self.slides.images()[candidate as usize])?
                .perspective(homography.as_ref());

            let cost = match_cost(
                &slide_features.keypoints,
                &features.keypoints,
                &inliers,
                homography.as_ref(),
                &ref_pose,
                &pose,
                &self.config.cost,
            );

            if cost < best.cost {
                best = Candidate {
                    slide: candidate,
                    pose,
                    cost,
                    homography,
                    inliers,
                };
            }
        }

        Ok(best)
    }

    /// Replace the reference keyframe.
    fn install_reference(&mut self, image: Mat, features: FeatureSet, slidepose: Quad) -> Result<()> {
        let quad = quad_filter(&features, &slidepose)?;

        debug!(
            "keyframe adopted: {}x{}, {} of {} keypoints inside the slide quad",
            image.cols(),
            image.rows(),
            quad.features.keypoints.len(),
            features.keypoints.len(),
        );

        self.reference = Some(Reference {
            image,
            features,
            quad_features: quad.features,
            quad_lookup: quad.lookup,
            slidepose,
        });

        Ok(())
    }
}

/// The canonical rectangle of a slide image, in clockwise screen order.
fn slide_rect(slide: &Mat) -> Result<Quad> {
    let width = f64::from(slide.cols());
    let height = f64::from(slide.rows());

    Ok(Quad::new(0.0, 0.0, 0.0, height, width, height, width, 0.0))
}

/// Convert a decoded frame to grayscale; already-gray frames pass through.
fn to_grayscale(image: &Mat) -> Result<Mat> {
    if image.channels() == 1 {
        return Ok(image.clone());
    }

    let mut gray = Mat::default();
    imgproc::cvt_color(
        image,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::footage::tests::StubSource;
    use crate::io::{SlideLibrary, FRAMESKIP};
    use crate::sync::SyncCode;
    use crossbeam_channel::unbounded;
    use opencv::core::{Point, Rect, Scalar, CV_8UC1, CV_8UC3};
    use tempfile::TempDir;

    const SLIDE_W: i32 = 480;
    const SLIDE_H: i32 = 360;
    const FRAME_W: i32 = 640;
    const FRAME_H: i32 = 480;
    const OFFSET: (i32, i32) = (80, 60);

    /// Deterministic pseudo-random number stream.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, max: i32) -> i32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) % max as u64) as i32
        }
    }

    /// A feature-rich synthetic slide: white page covered in dark shapes at
    /// pseudo-random positions, different per seed.
    fn textured_slide(seed: u64) -> Mat {
        let mut slide =
            Mat::new_rows_cols_with_default(SLIDE_H, SLIDE_W, CV_8UC1, Scalar::all(255.0))
                .unwrap();
        let mut rng = Lcg(seed);

        for _ in 0..60 {
            let x = rng.next(SLIDE_W - 40);
            let y = rng.next(SLIDE_H - 40);
            let w = 8 + rng.next(32);
            let h = 8 + rng.next(32);
            let level = f64::from(rng.next(160));

            imgproc::rectangle(
                &mut slide,
                Rect::new(x, y, w, h),
                Scalar::all(level),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }

        for _ in 0..30 {
            let x = 20 + rng.next(SLIDE_W - 40);
            let y = 20 + rng.next(SLIDE_H - 40);
            let radius = 4 + rng.next(14);
            let level = f64::from(rng.next(160));

            imgproc::circle(
                &mut slide,
                Point::new(x, y),
                radius,
                Scalar::all(level),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }

        slide
    }

    /// A footage frame showing the given slide on a dark background.
    fn frame_showing(slide: &Mat) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(FRAME_H, FRAME_W, CV_8UC3, Scalar::all(30.0)).unwrap();

        let mut slide_bgr = Mat::default();
        imgproc::cvt_color(
            slide,
            &mut slide_bgr,
            imgproc::COLOR_GRAY2BGR,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .unwrap();

        let mut roi = Mat::roi_mut(
            &mut frame,
            Rect::new(OFFSET.0, OFFSET.1, SLIDE_W, SLIDE_H),
        )
        .unwrap();
        slide_bgr.copy_to(&mut roi).unwrap();

        frame
    }

    /// A featureless frame; matching can find nothing in it.
    fn blank_frame() -> Mat {
        Mat::new_rows_cols_with_default(FRAME_H, FRAME_W, CV_8UC3, Scalar::all(30.0)).unwrap()
    }

    fn library(seeds: &[u64]) -> SlideLibrary {
        SlideLibrary::from_images(seeds.iter().map(|&s| textured_slide(s)).collect())
    }

    /// Build footage frames from a per-frame slide schedule; `None` means a
    /// blank (untrackable) frame.
    fn footage_from_schedule(
        slides: &SlideLibrary,
        schedule: &[Option<usize>],
    ) -> Footage<StubSource> {
        let frames: Vec<Mat> = schedule
            .iter()
            .map(|entry| match entry {
                Some(index) => frame_showing(slides.get(*index).unwrap()),
                None => blank_frame(),
            })
            .collect();

        Footage::new(
            StubSource::new(frames, 24.0, FRAME_W as u32, FRAME_H as u32),
            FRAMESKIP,
        )
    }

    struct Harness {
        tracker: SyncTracker,
        footage: Footage<StubSource>,
        events: crossbeam_channel::Receiver<TrackerEvent>,
        _cache_dir: TempDir,
        cache_path: PathBuf,
    }

    fn harness(seeds: &[u64], schedule: &[Option<usize>]) -> Harness {
        let slides = library(seeds);
        let footage = footage_from_schedule(&slides, schedule);

        let cache_dir = TempDir::new().unwrap();
        let cache_path = cache_dir.path().join("raw.sync");

        let (sender, events) = unbounded();
        let tracker =
            SyncTracker::new(slides, 24, cache_path.clone(), TrackerConfig::default(), sender)
                .unwrap();

        Harness {
            tracker,
            footage,
            events,
            _cache_dir: cache_dir,
            cache_path,
        }
    }

    fn pump(harness: &mut Harness) {
        let mut guard = 0;

        while harness.tracker.phase() != TrackerPhase::Idle {
            harness.tracker.step(&mut harness.footage);

            guard += 1;
            assert!(guard < 1000, "tracker did not settle");
        }
    }

    fn steady_schedule(spans: &[(usize, usize)]) -> Vec<Option<usize>> {
        spans
            .iter()
            .flat_map(|&(slide, frames)| std::iter::repeat(Some(slide)).take(frames))
            .collect()
    }

    #[test]
    fn static_presentation_emits_only_end() {
        let mut h = harness(&[1, 2, 3], &steady_schedule(&[(0, 72)]));

        pump(&mut h);

        assert_eq!(h.events.try_recv(), Ok(TrackerEvent::LoopFinished));

        let instructions = h.tracker.instructions().instructions();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].code, SyncCode::End);
        assert_eq!(h.tracker.instructions().current_index(), 0);

        // the script was persisted to the cache
        assert!(h.cache_path.exists());
    }

    #[test]
    fn forward_walk_emits_next_at_whole_seconds() {
        let mut h = harness(&[1, 2, 3], &steady_schedule(&[(0, 24), (1, 24), (2, 24)]));

        pump(&mut h);

        assert_eq!(h.events.try_recv(), Ok(TrackerEvent::LoopFinished));
        assert_eq!(
            h.tracker.instructions().to_string(),
            "nslides = 3\n\
             framerate = 24\n\
             ninstructions = 3\n\
             [00:00:01.00]: next\n\
             [00:00:02.00]: next\n\
             [00:00:03.00]: end\n"
        );
        assert_eq!(h.tracker.slide_index(), h.tracker.instructions().current_index());
    }

    #[test]
    fn jumps_are_recorded_as_go_to() {
        let mut h = harness(&[1, 2, 3], &steady_schedule(&[(0, 24), (2, 24), (0, 24)]));

        pump(&mut h);

        assert_eq!(
            h.tracker.instructions().to_string(),
            "nslides = 3\n\
             framerate = 24\n\
             ninstructions = 3\n\
             [00:00:01.00]: go to 3\n\
             [00:00:02.00]: go to 1\n\
             [00:00:03.00]: end\n"
        );
    }

    #[test]
    fn noise_burst_is_absorbed() {
        let mut schedule = steady_schedule(&[(0, 24), (1, 24), (2, 24)]);
        for frame in schedule.iter_mut().take(36).skip(30) {
            *frame = None;
        }

        let mut h = harness(&[1, 2, 3], &schedule);

        pump(&mut h);

        // identical emission to the clean run: the bad frames are skipped
        assert_eq!(
            h.tracker.instructions().to_string(),
            "nslides = 3\n\
             framerate = 24\n\
             ninstructions = 3\n\
             [00:00:01.00]: next\n\
             [00:00:02.00]: next\n\
             [00:00:03.00]: end\n"
        );
    }

    #[test]
    fn untrackable_first_frame_fails_without_output() {
        let mut h = harness(&[1, 2, 3], &vec![None; 24]);

        pump(&mut h);

        // no completion event, no instructions, no cache file
        assert!(h.events.try_recv().is_err());
        assert!(h.tracker.instructions().instructions().is_empty());
        assert!(!h.cache_path.exists());
    }

    #[test]
    fn cached_script_skips_tracking() {
        let mut h = harness(&[1, 2, 3], &steady_schedule(&[(0, 72)]));

        fs::write(
            &h.cache_path,
            "nslides = 3\n\
             framerate = 24\n\
             ninstructions = 2\n\
             [00:00:01.00]: next\n\
             [00:00:03.00]: end\n",
        )
        .unwrap();

        pump(&mut h);

        assert_eq!(h.events.try_recv(), Ok(TrackerEvent::LoopFinished));
        assert_eq!(h.tracker.instructions().instructions().len(), 2);
        // the matcher never ran: no frame was consumed
        assert_eq!(h.footage.frame_index(), 0);
    }

    #[test]
    fn malformed_cache_is_ignored() {
        let mut h = harness(&[1, 2, 3], &steady_schedule(&[(0, 72)]));

        fs::write(&h.cache_path, "nslides = what\n").unwrap();

        pump(&mut h);

        // fresh run happened and overwrote the cache
        assert_eq!(h.events.try_recv(), Ok(TrackerEvent::LoopFinished));
        let written = fs::read_to_string(&h.cache_path).unwrap();
        assert!(written.starts_with("nslides = 3\n"));
    }
}
