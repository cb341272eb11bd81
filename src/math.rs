//! Math types for Sonance

pub use glam::Vec3;

/// Listener orientation as a pair of front and up vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub front: Vec3,
    pub up: Vec3,
}

impl Orientation {
    pub fn new(front: Vec3, up: Vec3) -> Self {
        Self { front, up }
    }

    /// Facing -Z with +Y up.
    pub fn identity() -> Self {
        Self {
            front: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }

    pub fn right(&self) -> Vec3 {
        self.front.cross(self.up).normalize_or_zero()
    }

    /// Returns an orthonormal copy. Degenerate input falls back to identity.
    pub fn normalized(&self) -> Self {
        let front = self.front.normalize_or_zero();
        let right = front.cross(self.up).normalize_or_zero();
        if front == Vec3::ZERO || right == Vec3::ZERO {
            return Self::identity();
        }
        Self {
            front,
            up: right.cross(front),
        }
    }

    /// Expresses a world-space vector in this frame as (right, up, front).
    pub fn to_local(&self, v: Vec3) -> Vec3 {
        let frame = self.normalized();
        Vec3::new(v.dot(frame.right()), v.dot(frame.up), v.dot(frame.front))
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}
