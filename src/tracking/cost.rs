//! Matching cost model.
//!
//! Scores a candidate (slide, frame, homography) triple by combining the
//! reprojection error of the matched keypoints with how much the slide pose
//! moved (deviation) and changed shape (deformation) between two frames.
//! Degenerate geometry is folded into the score as an infinite cost instead
//! of a separate error path.

use nalgebra::{Matrix3, Vector3};
use opencv::core::{DMatch, KeyPoint, Vector};
use opencv::prelude::*;

use crate::geometry::Quad;

/// Thresholds of the cost model. The defaults are empirical; they are grouped
/// here so a caller can tune them without touching the scoring code.
#[derive(Debug, Clone)]
pub struct CostConfig {
    /// Pixels of pose displacement forgiven before it costs anything,
    /// allowing slow camera pans.
    pub deviation_grace: f64,
    /// Pixels of pose deformation forgiven before the quadratic penalty.
    /// Heavy deformation is a strong wrong-slide signal.
    pub deformation_grace: f64,
    /// Slide poses with less area than this are degenerate.
    pub min_pose_area: f64,
    /// Slide poses with more area than this are absurd.
    pub max_pose_area: f64,
    /// Minimum number of matches for a matching to mean anything.
    pub min_matches: usize,
    /// Number of matches good enough regardless of the keypoint ratios.
    pub great_matches: usize,
    /// Minimum fraction of either side's keypoints that must have matched.
    pub min_match_ratio: f64,
    /// Costs below this make the slide sections of two frames a good match.
    pub good_cost: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            deviation_grace: 5.0,
            deformation_grace: 5.0,
            min_pose_area: 100.0,
            max_pose_area: 25_000_000.0,
            min_matches: 5,
            great_matches: 20,
            min_match_ratio: 0.1,
            good_cost: 20.0,
        }
    }
}

/// Average and maximum-residual displacement between two quads.
///
/// `deviation` is the length of the mean per-vertex displacement, a measure
/// of camera pan. `deformation` is the largest per-vertex displacement left
/// after subtracting that mean, a measure of shape change.
pub fn quad_deviation(first: &Quad, second: &Quad) -> (f64, f64) {
    let a = first.vertices();
    let b = second.vertices();

    let mut diff = [[0.0f64; 2]; 4];

    for i in 0..4 {
        diff[i] = [b[i][0] - a[i][0], b[i][1] - a[i][1]];
    }

    let mean = [
        (diff[0][0] + diff[1][0] + diff[2][0] + diff[3][0]) / 4.0,
        (diff[0][1] + diff[1][1] + diff[2][1] + diff[3][1]) / 4.0,
    ];

    let mut max_residual2: f64 = 0.0;

    for d in &diff {
        let dx = d[0] - mean[0];
        let dy = d[1] - mean[1];

        max_residual2 = max_residual2.max(dx * dx + dy * dy);
    }

    let deviation = (mean[0] * mean[0] + mean[1] * mean[1]).sqrt();
    let deformation = max_residual2.sqrt();

    (deviation, deformation)
}

/// Cost of matching two frames, considering reprojection errors and changes
/// in the slide pose. Returns +inf for matchings too weak or geometrically
/// degenerate to accept.
pub fn match_cost(
    keypoints_a: &Vector<KeyPoint>,
    keypoints_b: &Vector<KeyPoint>,
    matches: &Vector<DMatch>,
    homography: Option<&Matrix3<f64>>,
    pose_a: &Quad,
    pose_b: &Quad,
    config: &CostConfig,
) -> f64 {
    if matches.len() < config.min_matches {
        return f64::INFINITY;
    }

    if !pose_a.convex_clockwise() || !pose_b.convex_clockwise() {
        return f64::INFINITY;
    }

    if pose_a.area() < config.min_pose_area || pose_b.area() < config.min_pose_area {
        return f64::INFINITY;
    }

    if pose_a.area() > config.max_pose_area || pose_b.area() > config.max_pose_area {
        return f64::INFINITY;
    }

    let homography = match homography {
        Some(h) => h,
        None => return f64::INFINITY,
    };

    let (deviation, deformation) = quad_deviation(pose_a, pose_b);

    let deviation_cost = (deviation - config.deviation_grace).max(0.0);
    let deformation_excess = (deformation - config.deformation_grace).max(0.0);
    let deformation_cost = deformation_excess * deformation_excess;

    let mut reprojection_cost = 0.0;
    let mut effective_matches = matches.len() as isize;

    for m in matches.iter() {
        let (point_a, point_b) = match (
            keypoints_a.get(m.query_idx as usize),
            keypoints_b.get(m.train_idx as usize),
        ) {
            (Ok(a), Ok(b)) => (a.pt(), b.pt()),
            _ => return f64::INFINITY,
        };

        let projected = homography * Vector3::new(f64::from(point_a.x), f64::from(point_a.y), 1.0);

        let dx = projected.x / projected.z - f64::from(point_b.x);
        let dy = projected.y / projected.z - f64::from(point_b.y);

        let error = (dx * dx + dy * dy).sqrt();

        if error.is_nan() {
            effective_matches -= 1;
        } else {
            reprojection_cost += error;
        }
    }

    // NaN projections shrank the matching; it may be too small now
    if effective_matches < config.min_matches as isize {
        return f64::INFINITY;
    }

    reprojection_cost /= effective_matches as f64;

    reprojection_cost + deviation_cost + deformation_cost
}

/// True if the slide sections of two frames match well enough to be the same
/// slide, seen from nearby poses.
pub fn slide_match(
    keypoints_a: &Vector<KeyPoint>,
    keypoints_b: &Vector<KeyPoint>,
    matches: &Vector<DMatch>,
    homography: Option<&Matrix3<f64>>,
    pose_a: &Quad,
    pose_b: &Quad,
    config: &CostConfig,
) -> bool {
    if matches.len() < config.min_matches {
        return false;
    }

    if homography.is_none() {
        return false;
    }

    if matches.len() < config.great_matches {
        let ratio_a = matches.len() as f64 / keypoints_a.len() as f64;
        let ratio_b = matches.len() as f64 / keypoints_b.len() as f64;

        if ratio_a < config.min_match_ratio || ratio_b < config.min_match_ratio {
            return false;
        }
    }

    let cost = match_cost(
        keypoints_a,
        keypoints_b,
        matches,
        homography,
        pose_a,
        pose_b,
        config,
    );

    cost < config.good_cost
}
