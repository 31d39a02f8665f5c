use crate::math;
use crate::Keypoint;

/// 3x3 projective map from reference-plane coordinates to image pixels.
#[derive(Clone, Copy, Debug)]
pub struct Homography([[f32; 3]; 3]);

impl Homography {
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn from_matrix(matrix: [[f32; 3]; 3]) -> Self {
        Self(matrix)
    }

    pub fn from_translation(dx: f32, dy: f32) -> Self {
        Self([[1.0, 0.0, dx], [0.0, 1.0, dy], [0.0, 0.0, 1.0]])
    }

    pub fn matrix(&self) -> [[f32; 3]; 3] {
        self.0
    }

    /// Maps a point, guarding the projective divide. Points at or near the
    /// line at infinity map to None.
    pub fn apply(&self, point: Keypoint) -> Option<Keypoint> {
        let v = math::mat_mul_vec(self.0, [point.x, point.y, 1.0]);
        if !v[2].is_finite() || v[2].abs() < 1e-9 {
            return None;
        }
        Some(Keypoint {
            x: v[0] / v[2],
            y: v[1] / v[2],
        })
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(self, other: Self) -> Self {
        Self(math::mat_mul(self.0, other.0))
    }

    pub fn inverse(self) -> Option<Self> {
        math::mat_inverse(self.0).map(Self)
    }

    /// Squared pixel distance between the mapped `from` point and `to`.
    pub fn transfer_error_sq(&self, from: Keypoint, to: Keypoint) -> Option<f32> {
        let mapped = self.apply(from)?;
        let dx = mapped.x - to.x;
        let dy = mapped.y - to.y;
        Some(dx * dx + dy * dy)
    }
}
