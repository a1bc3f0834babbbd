use nalgebra::Vector2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Landmark indices of the face mesh used for overlay placement and
/// measurements. The provider reports at least [`MESH_LANDMARK_COUNT`]
/// points in normalized [0,1] image coordinates.
pub const MESH_LANDMARK_COUNT: usize = 468;

pub const LEFT_EYE_CLUSTER: [usize; 2] = [33, 133];
pub const RIGHT_EYE_CLUSTER: [usize; 2] = [362, 263];
pub const NOSE_BRIDGE_TOP: usize = 168;
pub const NOSE_BRIDGE_BOTTOM: usize = 6;
pub const TEMPLE_LEFT: usize = 127;
pub const TEMPLE_RIGHT: usize = 356;
pub const CHEEKBONE_LEFT: usize = 123;
pub const CHEEKBONE_RIGHT: usize = 352;
pub const FACE_TOP: usize = 10;
pub const FACE_BOTTOM: usize = 152;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate2D {
    pub x: f32,
    pub y: f32,
}

/// One frame's detected facial landmarks, immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Array2<f32>,
}

impl LandmarkSet {
    /// Builds a landmark set from an (N, 2) matrix of normalized
    /// coordinates. Returns `None` when the matrix is too small to cover
    /// the named anchors or a coordinate falls outside [0, 1].
    pub fn from_normalized(points: Array2<f32>) -> Option<Self> {
        if points.nrows() < MESH_LANDMARK_COUNT || points.ncols() != 2 {
            return None;
        }
        if points.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return None;
        }
        Some(LandmarkSet { points })
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// Normalized coordinates of a single landmark.
    pub fn point(&self, idx: usize) -> Coordinate2D {
        Coordinate2D {
            x: self.points[[idx, 0]],
            y: self.points[[idx, 1]],
        }
    }

    /// Pixel coordinates of a single landmark.
    pub fn point_px(&self, idx: usize, img_w: i32, img_h: i32) -> Vector2<f32> {
        Vector2::new(
            self.points[[idx, 0]] * img_w as f32,
            self.points[[idx, 1]] * img_h as f32,
        )
    }

    /// Midpoint of a landmark cluster in pixel coordinates.
    pub fn cluster_center_px(&self, cluster: &[usize], img_w: i32, img_h: i32) -> Vector2<f32> {
        let mut acc = Vector2::zeros();
        for &idx in cluster {
            acc += self.point_px(idx, img_w, img_h);
        }
        acc / cluster.len() as f32
    }

    /// Midpoint of a landmark cluster in normalized coordinates.
    pub fn cluster_center(&self, cluster: &[usize]) -> Vector2<f32> {
        let mut acc = Vector2::zeros();
        for &idx in cluster {
            acc += Vector2::new(self.points[[idx, 0]], self.points[[idx, 1]]);
        }
        acc / cluster.len() as f32
    }

    /// Euclidean distance between two landmarks in normalized coordinates.
    pub fn distance(&self, a: usize, b: usize) -> f32 {
        let da = Vector2::new(self.points[[a, 0]], self.points[[a, 1]]);
        let db = Vector2::new(self.points[[b, 0]], self.points[[b, 1]]);
        (da - db).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn uniform_set(value: f32) -> Array2<f32> {
        Array2::from_elem((MESH_LANDMARK_COUNT, 2), value)
    }

    #[test]
    fn test_from_normalized_accepts_valid_matrix() {
        assert!(LandmarkSet::from_normalized(uniform_set(0.5)).is_some());
    }

    #[test]
    fn test_from_normalized_rejects_short_matrix() {
        let points = Array2::from_elem((10, 2), 0.5);
        assert!(LandmarkSet::from_normalized(points).is_none());
    }

    #[test]
    fn test_from_normalized_rejects_out_of_range() {
        let mut points = uniform_set(0.5);
        points[[0, 0]] = 1.5;
        assert!(LandmarkSet::from_normalized(points).is_none());
    }

    #[test]
    fn test_point_px_scales_to_image_size() {
        let lm = LandmarkSet::from_normalized(uniform_set(0.5)).unwrap();
        let p = lm.point_px(NOSE_BRIDGE_TOP, 640, 480);
        assert_eq!(p.x, 320.0);
        assert_eq!(p.y, 240.0);
    }

    #[test]
    fn test_cluster_center_px_is_midpoint() {
        let mut points = uniform_set(0.5);
        points[[LEFT_EYE_CLUSTER[0], 0]] = 0.2;
        points[[LEFT_EYE_CLUSTER[0], 1]] = 0.4;
        points[[LEFT_EYE_CLUSTER[1], 0]] = 0.4;
        points[[LEFT_EYE_CLUSTER[1], 1]] = 0.6;
        let lm = LandmarkSet::from_normalized(points).unwrap();
        let c = lm.cluster_center_px(&LEFT_EYE_CLUSTER, 100, 100);
        assert_eq!(c.x, 30.0);
        assert_eq!(c.y, 50.0);
    }
}
