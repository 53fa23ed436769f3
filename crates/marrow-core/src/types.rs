//! Spatial types and the blend algebra used by the animation tree
//!
//! Quaternions are xyzw, matrices are column-major. Pairwise blends use
//! shortest-path nlerp; weighted multi-way blends accumulate components
//! and renormalise the rotation once at the end.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Shared tolerance for "edge complete" / "clip wrapped" predicates
pub const EPSILON: f32 = 1e-5;

/// Single-tolerance float comparison
pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

/// A 3D vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const ONE: Self = Self {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(arr: [f32; 3]) -> Self {
        Self {
            x: arr[0],
            y: arr[1],
            z: arr[2],
        }
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Component-wise linear interpolation
    pub fn lerp(a: Self, b: Self, t: f32) -> Self {
        Self {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
            z: a.z + (b.z - a.z) * t,
        }
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A rotation quaternion (xyzw)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
    /// Additive accumulator seed; not a valid rotation
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn from_array(arr: [f32; 4]) -> Self {
        Self {
            x: arr[0],
            y: arr[1],
            z: arr[2],
            w: arr[3],
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn dot(&self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn length(&self) -> f32 {
        self.dot(*self).sqrt()
    }

    /// Normalize, falling back to identity for a degenerate quaternion
    pub fn normalize_or_identity(&self) -> Self {
        let len = self.length();
        if len < 1e-10 {
            return Self::IDENTITY;
        }
        Self::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Spherical linear interpolation with shortest-path correction.
    /// The result is normalized.
    pub fn slerp(a: Self, b: Self, t: f32) -> Self {
        let mut b = b;
        let mut dot = a.dot(b);

        // Shortest path: if dot < 0, negate b
        if dot < 0.0 {
            b = -b;
            dot = -dot;
        }

        // If quaternions are very close, lerp to avoid division by zero
        let (scale_a, scale_b) = if dot > 0.9995 {
            (1.0 - t, t)
        } else {
            let theta = dot.acos();
            let sin_theta = theta.sin();
            (
                ((1.0 - t) * theta).sin() / sin_theta,
                (t * theta).sin() / sin_theta,
            )
        };

        Self::new(
            scale_a * a.x + scale_b * b.x,
            scale_a * a.y + scale_b * b.y,
            scale_a * a.z + scale_b * b.z,
            scale_a * a.w + scale_b * b.w,
        )
        .normalize_or_identity()
    }

    /// Normalized linear interpolation with shortest-path correction
    pub fn nlerp(a: Self, b: Self, t: f32) -> Self {
        let b = if a.dot(b) < 0.0 { -b } else { b };
        Self::new(
            a.x + (b.x - a.x) * t,
            a.y + (b.y - a.y) * t,
            a.z + (b.z - a.z) * t,
            a.w + (b.w - a.w) * t,
        )
        .normalize_or_identity()
    }
}

impl Add for Quat {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.x + rhs.x,
            self.y + rhs.y,
            self.z + rhs.z,
            self.w + rhs.w,
        )
    }
}

impl Sub for Quat {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.x - rhs.x,
            self.y - rhs.y,
            self.z - rhs.z,
            self.w - rhs.w,
        )
    }
}

impl Mul<f32> for Quat {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs, self.w * rhs)
    }
}

impl Neg for Quat {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, -self.w)
    }
}

/// A column-major 4x4 matrix
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(transparent)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn from_cols(cols: [[f32; 4]; 4]) -> Self {
        Self { cols }
    }

    /// Matrix product `self * rhs`
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for col in 0..4 {
            for row in 0..4 {
                out[col][row] = (0..4).map(|k| self.cols[k][row] * rhs.cols[col][k]).sum();
            }
        }
        Mat4 { cols: out }
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.cols[3][0], self.cols[3][1], self.cols[3][2])
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A local-space pose (translation, rotation, scale)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// The identity contribution: zero translation, identity rotation, unit scale
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// All-zero accumulator seed for weighted sums; not a valid pose
    pub const ZERO: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::ZERO,
        scale: Vec3::ZERO,
    };

    pub const fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// Pairwise blend: lerp for translation and scale, shortest-path nlerp
    /// for rotation. `t` of 0.0 = fully `a`, 1.0 = fully `b`.
    pub fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            translation: Vec3::lerp(a.translation, b.translation, t),
            rotation: Quat::nlerp(a.rotation, b.rotation, t),
            scale: Vec3::lerp(a.scale, b.scale, t),
        }
    }

    /// Component-wise lerp with no rotation renormalisation. Used for
    /// root-motion deltas, whose rotation components are differences
    /// rather than unit rotations.
    pub fn lerp_components(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            translation: Vec3::lerp(a.translation, b.translation, t),
            rotation: a.rotation + (b.rotation - a.rotation) * t,
            scale: Vec3::lerp(a.scale, b.scale, t),
        }
    }

    /// Additive layer: `self + w * rhs` component-wise. The rotation is a
    /// quaternion sum (hemisphere-corrected), left unnormalised for the
    /// caller to finish.
    pub fn add_scaled(&self, rhs: &Self, w: f32) -> Self {
        let r = if self.rotation.dot(rhs.rotation) < 0.0 {
            -rhs.rotation
        } else {
            rhs.rotation
        };
        Self {
            translation: self.translation + rhs.translation * w,
            rotation: self.rotation + r * w,
            scale: self.scale + rhs.scale * w,
        }
    }

    /// Accumulate `w * rhs` into a running weighted sum started from
    /// `Transform::ZERO`. The rotation contribution is hemisphere-corrected
    /// against the running sum.
    pub fn accumulate(&mut self, rhs: &Self, w: f32) {
        let r = if self.rotation.dot(rhs.rotation) < 0.0 {
            -rhs.rotation
        } else {
            rhs.rotation
        };
        self.translation = self.translation + rhs.translation * w;
        self.rotation = self.rotation + r * w;
        self.scale = self.scale + rhs.scale * w;
    }

    /// Component-wise difference; used for root-motion deltas
    pub fn delta(&self, rhs: &Self) -> Self {
        Self {
            translation: self.translation - rhs.translation,
            rotation: self.rotation - rhs.rotation,
            scale: self.scale - rhs.scale,
        }
    }

    /// Component-wise sum; used for root-motion accumulation
    pub fn sum(&self, rhs: &Self) -> Self {
        Self {
            translation: self.translation + rhs.translation,
            rotation: self.rotation + rhs.rotation,
            scale: self.scale + rhs.scale,
        }
    }

    /// Uniformly scale every component
    pub fn scaled(&self, k: f32) -> Self {
        Self {
            translation: self.translation * k,
            rotation: self.rotation * k,
            scale: self.scale * k,
        }
    }

    /// Renormalise the rotation, falling back to identity when degenerate
    pub fn normalized_rotation(&self) -> Self {
        Self {
            rotation: self.rotation.normalize_or_identity(),
            ..*self
        }
    }

    /// Convert to a column-major 4x4 matrix
    pub fn to_matrix(&self) -> Mat4 {
        let Vec3 {
            x: tx,
            y: ty,
            z: tz,
        } = self.translation;
        let Quat {
            x: qx,
            y: qy,
            z: qz,
            w: qw,
        } = self.rotation;
        let Vec3 {
            x: sx,
            y: sy,
            z: sz,
        } = self.scale;

        // Rotation matrix from quaternion
        let x2 = qx + qx;
        let y2 = qy + qy;
        let z2 = qz + qz;
        let xx = qx * x2;
        let xy = qx * y2;
        let xz = qx * z2;
        let yy = qy * y2;
        let yz = qy * z2;
        let zz = qz * z2;
        let wx = qw * x2;
        let wy = qw * y2;
        let wz = qw * z2;

        Mat4::from_cols([
            [(1.0 - (yy + zz)) * sx, (xy + wz) * sx, (xz - wy) * sx, 0.0],
            [(xy - wz) * sy, (1.0 - (xx + zz)) * sy, (yz + wx) * sy, 0.0],
            [(xz + wy) * sz, (yz - wx) * sz, (1.0 - (xx + yy)) * sz, 0.0],
            [tx, ty, tz, 1.0],
        ])
    }
}
