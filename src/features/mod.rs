//! Feature pipeline: keypoint detection, descriptor matching and robust
//! homography estimation.
//!
//! Wraps the OpenCV BRISK detector and a brute-force Hamming matcher behind
//! the three operations the tracker needs: extract, ratio-test match, and
//! RANSAC refinement. Detection runs once per slide at startup and once per
//! processed frame.

use anyhow::Result;
use nalgebra::Matrix3;
use opencv::calib3d;
use opencv::core::{DMatch, KeyPoint, Mat, Point2f, Ptr, Vector, NORM_HAMMING};
use opencv::features2d::{BFMatcher, BRISK};
use opencv::prelude::*;

use crate::geometry::Quad;

/// Keypoints of an image together with their binary descriptors, one
/// descriptor row per keypoint.
#[derive(Clone)]
pub struct FeatureSet {
    pub keypoints: Vector<KeyPoint>,
    pub descriptors: Mat,
}

/// Result of filtering a feature set through a quad: the surviving features
/// and a lookup table mapping each original keypoint index to its index in
/// the filtered set, or -1 if it fell outside.
pub struct QuadFeatures {
    pub features: FeatureSet,
    pub lookup: Vec<i32>,
}

/// Maximum ratio between the best and second-best match distance for a
/// keypoint pair to count as a good match (Lowe's ratio test).
const MAX_MATCH_RATIO: f32 = 0.8;

/// RANSAC reprojection threshold in pixels.
const RANSAC_THRESHOLD: f64 = 2.5;

/// Minimum number of point correspondences for homography estimation.
pub const MIN_MATCHES: usize = 5;

pub struct FeaturePipeline {
    detector: Ptr<BRISK>,
    matcher: BFMatcher,
}

impl FeaturePipeline {
    pub fn new() -> Result<Self> {
        // BRISK defaults; rotation and scale invariant with binary descriptors
        let detector = BRISK::create(30, 3, 1.0)?;
        let matcher = BFMatcher::new(NORM_HAMMING, false)?;

        Ok(Self { detector, matcher })
    }

    /// Detect keypoints and compute their descriptors on a grayscale image.
    pub fn extract(&mut self, image: &Mat) -> Result<FeatureSet> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();

        self.detector.detect_and_compute(
            image,
            &Mat::default(),
            &mut keypoints,
            &mut descriptors,
            false,
        )?;

        Ok(FeatureSet {
            keypoints,
            descriptors,
        })
    }

    /// Match descriptors from `a` to `b` with a k=2 nearest-neighbor search
    /// and keep only matches passing the ratio test.
    ///
    /// Returns an empty list when either side has fewer than two descriptor
    /// rows, since no second-best distance exists to test against.
    pub fn match_descriptors(&self, a: &Mat, b: &Mat) -> Result<Vector<DMatch>> {
        let mut best_matches = Vector::<DMatch>::new();

        if a.rows() < 2 || b.rows() < 2 {
            return Ok(best_matches);
        }

        let mut matches = Vector::<Vector<DMatch>>::new();
        self.matcher
            .knn_train_match(a, b, &mut matches, 2, &Mat::default(), false)?;

        for pair in matches.iter() {
            if pair.len() < 2 {
                continue;
            }

            let first = pair.get(0)?;
            let second = pair.get(1)?;

            if first.distance < MAX_MATCH_RATIO * second.distance {
                best_matches.push(first);
            }
        }

        Ok(best_matches)
    }

    /// Refine a matching with RANSAC and estimate the homography relating the
    /// two keypoint sets.
    ///
    /// Returns the homography (or `None` when one cannot be estimated) and
    /// the inlier subset of `matches`.
    pub fn refine_homography(
        &self,
        keypoints_a: &Vector<KeyPoint>,
        keypoints_b: &Vector<KeyPoint>,
        matches: &Vector<DMatch>,
    ) -> Result<(Option<Matrix3<f64>>, Vector<DMatch>)> {
        let mut inliers = Vector::<DMatch>::new();

        if matches.len() < MIN_MATCHES {
            return Ok((None, inliers));
        }

        let mut points_a = Vector::<Point2f>::new();
        let mut points_b = Vector::<Point2f>::new();

        for m in matches.iter() {
            points_a.push(keypoints_a.get(m.query_idx as usize)?.pt());
            points_b.push(keypoints_b.get(m.train_idx as usize)?.pt());
        }

        let mut inlier_mask = Mat::default();
        let homography = calib3d::find_homography_ext(
            &points_a,
            &points_b,
            calib3d::RANSAC,
            RANSAC_THRESHOLD,
            &mut inlier_mask,
            2000,
            0.995,
        )?;

        if homography.empty() {
            return Ok((None, inliers));
        }

        for (i, m) in matches.iter().enumerate() {
            if *inlier_mask.at::<u8>(i as i32)? != 0 {
                inliers.push(m);
            }
        }

        Ok((Some(mat3_to_matrix3(&homography)?), inliers))
    }
}

/// Convert an OpenCV 3x3 Mat to a nalgebra Matrix3.
fn mat3_to_matrix3(mat: &Mat) -> Result<Matrix3<f64>> {
    let mut arr = [0.0f64; 9];
    for (i, value) in arr.iter_mut().enumerate() {
        *value = *mat.at::<f64>(i as i32)?;
    }
    Ok(Matrix3::from_row_slice(&arr))
}

/// Filter a feature set down to the keypoints inside a quad.
///
/// `lookup[i] = k` when `features.keypoints[i]` became keypoint `k` of the
/// filtered set, and -1 when it lies outside the quad.
pub fn quad_filter(features: &FeatureSet, quad: &Quad) -> Result<QuadFeatures> {
    let mut lookup = vec![-1; features.keypoints.len()];
    let mut keypoints = Vector::<KeyPoint>::new();
    let mut descriptors = Mat::default();

    let mut kept = 0;

    for (i, keypoint) in features.keypoints.iter().enumerate() {
        let point = keypoint.pt();

        if quad.inside(f64::from(point.x), f64::from(point.y)) {
            keypoints.push(keypoint);
            descriptors.push_back(&features.descriptors.row(i as i32)?)?;

            lookup[i] = kept;
            kept += 1;
        }
    }

    Ok(QuadFeatures {
        features: FeatureSet {
            keypoints,
            descriptors,
        },
        lookup,
    })
}
