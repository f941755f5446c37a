//! Convex quadrilateral primitive used to describe the slide pose in a frame.
//!
//! A `Quad` precomputes its (non-unitary) outward edge normals at construction
//! so that the point-in-quad test is four dot products, cheap enough to run
//! for every keypoint of every processed frame.

use nalgebra::{Matrix3, Vector3};

/// Two-dimensional polygon with four vertices.
///
/// Vertices are stored in the order they were given. The geometric operations
/// (`inside`, `area`) are only meaningful when the vertices wind clockwise and
/// the polygon is convex; `convex_clockwise` reports whether that holds.
/// Quads produced by a perspective transform can wind the other way or
/// self-intersect, so consumers must check the flag before relying on
/// `inside`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    /// Vertices as `[x, y]` pairs.
    vertices: [[f64; 2]; 4],
    /// Outward edge normals, one per directed edge `v[i] -> v[i + 1]`.
    normals: [[f64; 2]; 4],
    /// True if the vertices form a convex clockwise polygon.
    convex_clockwise: bool,
    /// Enclosed area in square pixels.
    area: f64,
}

impl Quad {
    /// Construct a quad from its vertex coordinates, given in drawing order.
    pub fn new(
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        x3: f64,
        y3: f64,
        x4: f64,
        y4: f64,
    ) -> Quad {
        let vertices = [[x1, y1], [x2, y2], [x3, y3], [x4, y4]];

        let mut normals = [[0.0; 2]; 4];

        for i in 0..4 {
            let [ax, ay] = vertices[i];
            let [bx, by] = vertices[(i + 1) % 4];

            // rotate the edge vector by -90 degrees: outward for clockwise winding
            normals[i] = [by - ay, -(bx - ax)];
        }

        // The cross product of two adjacent normals equals the cross product of
        // the corresponding edges (a common rotation preserves it), so the same
        // quantities decide convexity and, pairwise, make up the area.
        let mut crosses = [0.0; 4];

        for i in 0..4 {
            let [ax, ay] = normals[i];
            let [bx, by] = normals[(i + 1) % 4];

            crosses[i] = ax * by - ay * bx;
        }

        // Three collinear vertices give a zero cross product; accepted as clockwise.
        let convex_clockwise = crosses.iter().all(|&c| c <= 0.0);

        // Triangles (v1, v2, v3) and (v3, v4, v1) tile the quad. Their doubled
        // signed areas are crosses[0] and crosses[2], negative for clockwise
        // winding, hence the negated sum.
        let area = -(crosses[0] + crosses[2]) / 2.0;

        Quad {
            vertices,
            normals,
            convex_clockwise,
            area,
        }
    }

    /// Vertices in drawing order, as `[x, y]` pairs.
    pub fn vertices(&self) -> [[f64; 2]; 4] {
        self.vertices
    }

    /// True if the vertices form a convex clockwise polygon.
    pub fn convex_clockwise(&self) -> bool {
        self.convex_clockwise
    }

    /// Enclosed area in square pixels.
    pub fn area(&self) -> f64 {
        self.area
    }

    /// Transform this quad through a perspective homography.
    ///
    /// Each vertex is mapped through `H * (x, y, 1)^T` and dehomogenized.
    /// A missing homography (`None`) sinks the quad into the origin: the
    /// degenerate result fails the area and convexity checks downstream,
    /// which rejects the match without a separate error path.
    pub fn perspective(&self, homography: Option<&Matrix3<f64>>) -> Quad {
        let h = match homography {
            Some(h) => h,
            None => return Quad::default(),
        };

        let mut mapped = [[0.0; 2]; 4];

        for (i, &[x, y]) in self.vertices.iter().enumerate() {
            let p = h * Vector3::new(x, y, 1.0);
            mapped[i] = [p.x / p.z, p.y / p.z];
        }

        Quad::new(
            mapped[0][0],
            mapped[0][1],
            mapped[1][0],
            mapped[1][1],
            mapped[2][0],
            mapped[2][1],
            mapped[3][0],
            mapped[3][1],
        )
    }

    /// True if the point lies within the region bounded by the quad.
    ///
    /// Only well-behaved for convex clockwise quads. For a counterclockwise
    /// quad the result is inverted, and for a non-convex one it is arbitrary,
    /// but the call never panics.
    pub fn inside(&self, x: f64, y: f64) -> bool {
        for i in 0..4 {
            let [vx, vy] = self.vertices[i];
            let [nx, ny] = self.normals[i];

            if (x - vx) * nx + (y - vy) * ny < 0.0 {
                return false;
            }
        }

        true
    }
}

impl Default for Quad {
    /// The all-zero degenerate quad.
    fn default() -> Quad {
        Quad::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }
}
