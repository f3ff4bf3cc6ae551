//! Rigid-body geometry for the transform tree.
//!
//! Scene graphs hand out local transforms as 4×4 matrices; Foxglove wants a
//! translation plus a unit quaternion.  [`Matrix4`] is the scene-side
//! representation and [`Matrix4::to_transform`] is the one place where the
//! decomposition happens, so every transform on the wire is extracted the same
//! way.
//!
//! # Conventions
//!
//! * [`Matrix4`] uses the row-vector convention: a point `p` maps to `p · M`,
//!   the translation lives in the last row, and the upper 3×3 block is the
//!   transpose of the usual column-vector rotation matrix (times scale).
//! * [`Quaternion`] fields are `(w, x, y, z)` with `w` the real part.
//!
//! # Example
//!
//! ```rust
//! use foxbridge_types::geometry::{Matrix4, Quaternion, Vec3};
//!
//! let m = Matrix4::from_translation_rotation(Vec3::new(1.0, 2.0, 3.0), Quaternion::identity());
//! let t = m.to_transform();
//! assert!((t.translation.y - 2.0).abs() < 1e-9);
//! assert!((t.rotation.w - 1.0).abs() < 1e-9);
//! ```

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// A rotation quaternion (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1) where one is expected.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit length.  A zero quaternion becomes the identity.
    pub fn normalized(self) -> Self {
        let n = self.norm();
        if n < f64::EPSILON {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Column-vector rotation matrix `R` such that `v' = R v`.
    fn to_rotation_matrix(self) -> [[f64; 3]; 3] {
        let Self { w, x, y, z } = self;
        [
            [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z), 2.0 * (x * z + w * y)],
            [2.0 * (x * y + w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x)],
            [2.0 * (x * z - w * y), 2.0 * (y * z + w * x), 1.0 - 2.0 * (x * x + y * y)],
        ]
    }

    /// Shepperd's method over a column-vector rotation matrix.
    fn from_rotation_matrix(r: [[f64; 3]; 3]) -> Self {
        let trace = r[0][0] + r[1][1] + r[2][2];
        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Self::new(
                0.25 * s,
                (r[2][1] - r[1][2]) / s,
                (r[0][2] - r[2][0]) / s,
                (r[1][0] - r[0][1]) / s,
            )
        } else if r[0][0] > r[1][1] && r[0][0] > r[2][2] {
            let s = (1.0 + r[0][0] - r[1][1] - r[2][2]).sqrt() * 2.0;
            Self::new(
                (r[2][1] - r[1][2]) / s,
                0.25 * s,
                (r[0][1] + r[1][0]) / s,
                (r[0][2] + r[2][0]) / s,
            )
        } else if r[1][1] > r[2][2] {
            let s = (1.0 + r[1][1] - r[0][0] - r[2][2]).sqrt() * 2.0;
            Self::new(
                (r[0][2] - r[2][0]) / s,
                (r[0][1] + r[1][0]) / s,
                0.25 * s,
                (r[1][2] + r[2][1]) / s,
            )
        } else {
            let s = (1.0 + r[2][2] - r[0][0] - r[1][1]).sqrt() * 2.0;
            Self::new(
                (r[1][0] - r[0][1]) / s,
                (r[0][2] + r[2][0]) / s,
                (r[1][2] + r[2][1]) / s,
                0.25 * s,
            )
        };
        // q and -q are the same rotation; keep the real part non-negative.
        let q = q.normalized();
        if q.w < 0.0 {
            Self::new(-q.w, -q.x, -q.y, -q.z)
        } else {
            q
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of a child frame relative to its parent: to convert a
/// point expressed in the child frame into the parent frame, rotate it by
/// `rotation` then add `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Matrix4
// ────────────────────────────────────────────────────────────────────────────

/// A 4×4 affine transform in row-vector convention (see module docs).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4 {
    pub rows: [[f64; 4]; 4],
}

impl Matrix4 {
    pub fn identity() -> Self {
        Self {
            rows: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Build a pure translation + rotation matrix.
    pub fn from_translation_rotation(translation: Vec3, rotation: Quaternion) -> Self {
        Self::from_scale_rotation_translation(Vec3::new(1.0, 1.0, 1.0), rotation, translation)
    }

    /// Build `S · R · T` (scale, then rotate, then translate).
    pub fn from_scale_rotation_translation(scale: Vec3, rotation: Quaternion, translation: Vec3) -> Self {
        let r = rotation.normalized().to_rotation_matrix();
        let s = [scale.x, scale.y, scale.z];
        let mut rows = Self::identity().rows;
        for (i, row) in rows.iter_mut().take(3).enumerate() {
            for (j, cell) in row.iter_mut().take(3).enumerate() {
                *cell = s[i] * r[j][i];
            }
        }
        rows[3] = [translation.x, translation.y, translation.z, 1.0];
        Self { rows }
    }

    /// Map a point through this matrix (`p · M`).
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.rows;
        Vec3::new(
            p.x * m[0][0] + p.y * m[1][0] + p.z * m[2][0] + m[3][0],
            p.x * m[0][1] + p.y * m[1][1] + p.z * m[2][1] + m[3][1],
            p.x * m[0][2] + p.y * m[1][2] + p.z * m[2][2] + m[3][2],
        )
    }

    pub fn extract_translation(&self) -> Vec3 {
        Vec3::new(self.rows[3][0], self.rows[3][1], self.rows[3][2])
    }

    /// Extract the rotation as a unit quaternion with `w >= 0`.
    ///
    /// Per-axis scale is divided out of each basis row first, so scaled
    /// transforms yield the same rotation as their unscaled counterparts.
    pub fn extract_rotation(&self) -> Quaternion {
        let mut basis = [[0.0; 3]; 3];
        for (i, out) in basis.iter_mut().enumerate() {
            let row = Vec3::new(self.rows[i][0], self.rows[i][1], self.rows[i][2]);
            let len = row.length();
            let len = if len < f64::EPSILON { 1.0 } else { len };
            *out = [row.x / len, row.y / len, row.z / len];
        }
        // Rows are the transposed column-vector matrix.
        let mut r = [[0.0; 3]; 3];
        for (a, r_row) in r.iter_mut().enumerate() {
            for (b, cell) in r_row.iter_mut().enumerate() {
                *cell = basis[b][a];
            }
        }
        Quaternion::from_rotation_matrix(r)
    }

    pub fn to_transform(&self) -> Transform3D {
        Transform3D::new(self.extract_translation(), self.extract_rotation())
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
