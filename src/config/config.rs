use std::path::PathBuf;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    /// Overlay width as a multiple of the inter-eye pixel distance.
    pub width_factor: f32,
    /// Overlay height as a multiple of the overlay width.
    pub aspect_ratio: f32,
    /// Upward offset from the nose bridge top, in nose-bridge spans.
    pub vertical_offset_factor: f32,
    /// Fraction of half the overlay height subtracted from center_y
    /// when computing the target top edge.
    pub vertical_bias: f32,
    /// Weight given to the previous smoothed transform.
    pub smoothing_factor: f32,
    /// Consecutive detection misses before the smoothing state resets.
    pub reset_after_misses: u32,
}

impl OverlayConfig {
    pub fn new() -> Self {
        OverlayConfig {
            width_factor: 1.75,
            aspect_ratio: 0.65,
            vertical_offset_factor: 5.0,
            vertical_bias: 1.0,
            smoothing_factor: 0.7,
            reset_after_misses: 30,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Disk tier root, one normalized PNG per entry.
    pub cache_dir: PathBuf,
    /// Local asset catalog root, one directory per category.
    pub assets_dir: PathBuf,
    /// Longest side of a normalized asset, in pixels.
    pub max_dimension: i32,
    /// Remote fetch timeout in seconds.
    pub fetch_timeout: u64,
    /// Asset identifiers preloaded at startup.
    pub preload_assets: Vec<String>,
    /// Fallback asset for sessions that have not selected one.
    pub default_asset: String,
}

impl CacheConfig {
    pub fn new() -> Self {
        CacheConfig {
            cache_dir: PathBuf::from("asset_cache"),
            assets_dir: PathBuf::from("frames"),
            max_dimension: 800,
            fetch_timeout: 10,
            preload_assets: vec!["sunglasses".to_string()],
            default_asset: "sunglasses".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationConfig {
    /// Standard adult pupillary distance used for calibration, in mm.
    pub standard_pd: f32,
    pub min_bridge_clearance: f32,
    pub max_bridge_clearance: f32,
    /// Acceptable lens-width / face-width ratio range.
    pub lens_ratio_range: (f32, f32),
    /// Acceptable temple-length / temple-width ratio range.
    pub temple_ratio_range: (f32, f32),
    pub weight_bridge: f32,
    pub weight_lens: f32,
    pub weight_temple: f32,
    pub weight_face_shape: f32,
    pub weight_style: f32,
}

impl RecommendationConfig {
    pub fn new() -> Self {
        RecommendationConfig {
            standard_pd: 63.0,
            min_bridge_clearance: 1.0,
            max_bridge_clearance: 3.0,
            lens_ratio_range: (0.30, 0.55),
            temple_ratio_range: (0.85, 1.30),
            weight_bridge: 0.25,
            weight_lens: 0.25,
            weight_temple: 0.20,
            weight_face_shape: 0.15,
            weight_style: 0.15,
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        RecommendationConfig::new()
    }
}
