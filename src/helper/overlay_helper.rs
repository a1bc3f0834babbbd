use anyhow::Error;
use opencv::core::{Mat, MatTrait, MatTraitConst, Size, Vec3b, Vec4b};
use opencv::imgproc::{resize, INTER_LINEAR};

use crate::config::config::OverlayConfig;
use crate::utils::coordinate::{
    LandmarkSet, LEFT_EYE_CLUSTER, NOSE_BRIDGE_BOTTOM, NOSE_BRIDGE_TOP, RIGHT_EYE_CLUSTER,
};
use crate::utils::image::AssetBuffer;

/// Where and how large the overlay asset is drawn for one frame.
///
/// Positions and sizes are in background pixels, rotation in radians.
/// `rotation` describes in-plane roll from the eye baseline; it is carried
/// through the pipeline but the compositor renders axis-aligned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementTransform {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

/// Per-frame placement estimation and alpha compositing.
#[derive(Debug, Clone)]
pub struct OverlayHelper {
    config: OverlayConfig,
}

impl OverlayHelper {
    pub fn new(config: OverlayConfig) -> Self {
        OverlayHelper { config }
    }

    /// Derives a raw placement transform from the current frame's
    /// landmarks, with no memory of previous frames.
    ///
    /// Returns `None` when the eye baseline is degenerate or the placement
    /// origin falls outside the image, in which case compositing is
    /// skipped for this frame.
    ///
    /// # Arguments
    /// * `landmarks` - normalized landmark set for the frame
    /// * `img_w` - background width in pixels
    /// * `img_h` - background height in pixels
    ///
    /// # Returns
    /// * `Option<PlacementTransform>`
    pub fn estimate_placement(
        &self,
        landmarks: &LandmarkSet,
        img_w: i32,
        img_h: i32,
    ) -> Option<PlacementTransform> {
        let left_eye = landmarks.cluster_center_px(&LEFT_EYE_CLUSTER, img_w, img_h);
        let right_eye = landmarks.cluster_center_px(&RIGHT_EYE_CLUSTER, img_w, img_h);
        let baseline = right_eye - left_eye;
        let eye_distance = baseline.norm();
        if eye_distance <= 0.0 {
            return None;
        }

        let width = eye_distance * self.config.width_factor;
        let height = (width * self.config.aspect_ratio).round();

        let nose_top = landmarks.point_px(NOSE_BRIDGE_TOP, img_w, img_h);
        let nose_bottom = landmarks.point_px(NOSE_BRIDGE_BOTTOM, img_w, img_h);
        let nose_span = nose_bottom.y - nose_top.y;

        let top_x = nose_top.x - width / 2.0;
        let top_y = nose_top.y - nose_span * self.config.vertical_offset_factor;
        if top_x < 0.0 || top_x >= img_w as f32 || top_y < 0.0 || top_y >= img_h as f32 {
            return None;
        }

        let rotation = baseline.y.atan2(baseline.x);

        Some(PlacementTransform {
            center_x: nose_top.x,
            center_y: top_y + height * self.config.vertical_bias / 2.0,
            width,
            height,
            rotation,
        })
    }

    /// Alpha-blends the asset onto the background in place, clipped to the
    /// background bounds. A placement entirely off-frame is a no-op, not
    /// an error.
    ///
    /// # Arguments
    /// * `background` - mutable 3-channel BGR background
    /// * `asset` - normalized BGRA asset pixels
    /// * `transform` - smoothed placement for this frame
    ///
    /// # Returns
    /// * `Result<(), Error>`
    pub fn overlay_asset(
        &self,
        background: &mut Mat,
        asset: &AssetBuffer,
        transform: &PlacementTransform,
    ) -> Result<(), Error> {
        if background.channels() != 3 {
            return Err(Error::msg("overlay_helper - background must be a 3-channel image"));
        }

        let w = transform.width.round() as i32;
        let h = transform.height.round() as i32;
        if w <= 0 || h <= 0 {
            return Ok(());
        }

        // Uniform sizing across assets: the transform dictates the aspect,
        // not the asset's native proportions.
        let asset_mat = asset.to_mat()?;
        let mut resized = Mat::default();
        resize(&asset_mat, &mut resized, Size::new(w, h), 0.0, 0.0, INTER_LINEAR)?;
        if resized.channels() != 4 {
            return Ok(());
        }

        let x = (transform.center_x - transform.width / 2.0).round() as i32;
        let y = (transform.center_y - transform.height / 2.0 * self.config.vertical_bias).round()
            as i32;

        let x_start = x.max(0);
        let x_end = (x + w).min(background.cols());
        let y_start = y.max(0);
        let y_end = (y + h).min(background.rows());
        if x_start >= x_end || y_start >= y_end {
            return Ok(());
        }

        for yy in y_start..y_end {
            for xx in x_start..x_end {
                let src = *resized.at_2d::<Vec4b>(yy - y, xx - x)?;
                let alpha = src[3] as f32 / 255.0;
                if alpha <= 0.0 {
                    continue;
                }
                let dst = background.at_2d_mut::<Vec3b>(yy, xx)?;
                for c in 0..3 {
                    dst[c] =
                        (src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha)).round() as u8;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use opencv::core::{Scalar, CV_8UC3, CV_8UC4};

    use crate::utils::coordinate::MESH_LANDMARK_COUNT;

    fn landmarks_640x480(
        left_eye: (f32, f32),
        right_eye: (f32, f32),
        nose_top: (f32, f32),
        nose_bottom: (f32, f32),
    ) -> LandmarkSet {
        let mut points = Array2::from_elem((MESH_LANDMARK_COUNT, 2), 0.5f32);
        for idx in LEFT_EYE_CLUSTER {
            points[[idx, 0]] = left_eye.0 / 640.0;
            points[[idx, 1]] = left_eye.1 / 480.0;
        }
        for idx in RIGHT_EYE_CLUSTER {
            points[[idx, 0]] = right_eye.0 / 640.0;
            points[[idx, 1]] = right_eye.1 / 480.0;
        }
        points[[NOSE_BRIDGE_TOP, 0]] = nose_top.0 / 640.0;
        points[[NOSE_BRIDGE_TOP, 1]] = nose_top.1 / 480.0;
        points[[NOSE_BRIDGE_BOTTOM, 0]] = nose_bottom.0 / 640.0;
        points[[NOSE_BRIDGE_BOTTOM, 1]] = nose_bottom.1 / 480.0;
        LandmarkSet::from_normalized(points).unwrap()
    }

    fn solid_asset(width: i32, height: i32, bgra: (f64, f64, f64, f64)) -> AssetBuffer {
        let mat = Mat::new_rows_cols_with_default(
            height,
            width,
            CV_8UC4,
            Scalar::new(bgra.0, bgra.1, bgra.2, bgra.3),
        )
        .unwrap();
        AssetBuffer::from_mat(&mat).unwrap()
    }

    fn black_background(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_estimate_placement_width_from_eye_distance() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let lm = landmarks_640x480((300.0, 240.0), (340.0, 240.0), (320.0, 250.0), (320.0, 260.0));
        let t = helper.estimate_placement(&lm, 640, 480).unwrap();
        assert!((t.width - 70.0).abs() < 1e-3);
        assert_eq!(t.height, (t.width * 0.65).round());
        assert!(t.rotation.abs() < 1e-6);
        assert!((t.center_x - 320.0).abs() < 1e-3);
    }

    #[test]
    fn test_estimate_placement_rotation_follows_eye_baseline() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let lm = landmarks_640x480((300.0, 230.0), (340.0, 250.0), (320.0, 250.0), (320.0, 260.0));
        let t = helper.estimate_placement(&lm, 640, 480).unwrap();
        let expected = (20.0f32).atan2(40.0);
        assert!((t.rotation - expected).abs() < 1e-5);
    }

    #[test]
    fn test_estimate_placement_rejects_off_frame_origin() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        // Large nose span pushes the placement origin above the frame.
        let lm = landmarks_640x480((300.0, 240.0), (340.0, 240.0), (320.0, 40.0), (320.0, 90.0));
        assert!(helper.estimate_placement(&lm, 640, 480).is_none());
    }

    #[test]
    fn test_estimate_placement_rejects_degenerate_eye_distance() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let lm = landmarks_640x480((320.0, 240.0), (320.0, 240.0), (320.0, 250.0), (320.0, 260.0));
        assert!(helper.estimate_placement(&lm, 640, 480).is_none());
    }

    #[test]
    fn test_overlay_blends_opaque_asset() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let mut bg = black_background(100, 100);
        let asset = solid_asset(8, 8, (0.0, 0.0, 255.0, 255.0));
        let t = PlacementTransform {
            center_x: 50.0,
            center_y: 50.0,
            width: 40.0,
            height: 26.0,
            rotation: 0.0,
        };
        helper.overlay_asset(&mut bg, &asset, &t).unwrap();
        let inside: &Vec3b = bg.at_2d(50, 50).unwrap();
        assert_eq!(inside[2], 255);
        let outside: &Vec3b = bg.at_2d(0, 0).unwrap();
        assert_eq!(outside[2], 0);
    }

    #[test]
    fn test_overlay_clips_at_image_edges() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let mut bg = black_background(100, 100);
        let asset = solid_asset(8, 8, (255.0, 255.0, 255.0, 255.0));
        let t = PlacementTransform {
            center_x: 0.0,
            center_y: 0.0,
            width: 40.0,
            height: 26.0,
            rotation: 0.0,
        };
        helper.overlay_asset(&mut bg, &asset, &t).unwrap();
        let corner: &Vec3b = bg.at_2d(0, 0).unwrap();
        assert_eq!(corner[0], 255);
        // Beyond the clipped rectangle nothing is written.
        let past_rect: &Vec3b = bg.at_2d(30, 30).unwrap();
        assert_eq!(past_rect[0], 0);
    }

    #[test]
    fn test_overlay_fully_off_frame_is_noop() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let mut bg = black_background(100, 100);
        let asset = solid_asset(8, 8, (255.0, 255.0, 255.0, 255.0));
        let t = PlacementTransform {
            center_x: 500.0,
            center_y: 500.0,
            width: 40.0,
            height: 26.0,
            rotation: 0.0,
        };
        helper.overlay_asset(&mut bg, &asset, &t).unwrap();
        for y in [0, 50, 99] {
            for x in [0, 50, 99] {
                let px: &Vec3b = bg.at_2d(y, x).unwrap();
                assert_eq!(px[0], 0);
            }
        }
    }

    #[test]
    fn test_overlay_transparent_asset_leaves_background() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let mut bg = black_background(100, 100);
        let asset = solid_asset(8, 8, (255.0, 255.0, 255.0, 0.0));
        let t = PlacementTransform {
            center_x: 50.0,
            center_y: 50.0,
            width: 40.0,
            height: 26.0,
            rotation: 0.0,
        };
        helper.overlay_asset(&mut bg, &asset, &t).unwrap();
        let px: &Vec3b = bg.at_2d(50, 50).unwrap();
        assert_eq!(px[0], 0);
    }

    #[test]
    fn test_overlay_partial_alpha_blend() {
        let helper = OverlayHelper::new(OverlayConfig::new());
        let mut bg =
            Mat::new_rows_cols_with_default(100, 100, CV_8UC3, Scalar::all(100.0)).unwrap();
        let asset = solid_asset(8, 8, (200.0, 200.0, 200.0, 127.5));
        let t = PlacementTransform {
            center_x: 50.0,
            center_y: 50.0,
            width: 40.0,
            height: 26.0,
            rotation: 0.0,
        };
        helper.overlay_asset(&mut bg, &asset, &t).unwrap();
        let px: &Vec3b = bg.at_2d(50, 50).unwrap();
        // 200 * 0.5 + 100 * 0.5, within integer resize tolerance
        assert!((px[0] as i32 - 150).abs() <= 2);
    }
}
