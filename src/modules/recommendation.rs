use std::path::Path;

use anyhow::Error;
use serde::{Deserialize, Serialize};

use crate::config::config::RecommendationConfig;
use crate::utils::coordinate::{
    LandmarkSet, CHEEKBONE_LEFT, CHEEKBONE_RIGHT, FACE_BOTTOM, FACE_TOP, LEFT_EYE_CLUSTER,
    NOSE_BRIDGE_BOTTOM, NOSE_BRIDGE_TOP, RIGHT_EYE_CLUSTER, TEMPLE_LEFT, TEMPLE_RIGHT,
};
use crate::utils::utils::{clamp01, round2};

/// Calibrated facial measurements in millimeters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceMeasurements {
    pub pupillary_distance: f32,
    pub face_width: f32,
    pub bridge_height: f32,
    pub temple_width: f32,
    pub nose_bridge_width: f32,
    pub face_height: f32,
    pub face_shape_index: f32,
}

impl FaceMeasurements {
    /// Raw landmark-derived measurements, in normalized-distance
    /// millimeters before calibration.
    pub fn from_landmarks(landmarks: &LandmarkSet) -> FaceMeasurements {
        let left_eye = landmarks.cluster_center(&LEFT_EYE_CLUSTER);
        let right_eye = landmarks.cluster_center(&RIGHT_EYE_CLUSTER);
        let pupillary_distance = (right_eye - left_eye).norm() * 1000.0;

        let face_width = landmarks.distance(CHEEKBONE_LEFT, CHEEKBONE_RIGHT) * 1000.0;
        let face_height = landmarks.distance(FACE_TOP, FACE_BOTTOM) * 1000.0;

        FaceMeasurements {
            pupillary_distance,
            face_width,
            bridge_height: landmarks.distance(NOSE_BRIDGE_TOP, NOSE_BRIDGE_BOTTOM) * 1000.0,
            temple_width: landmarks.distance(TEMPLE_LEFT, TEMPLE_RIGHT) * 1000.0,
            nose_bridge_width: landmarks.distance(LEFT_EYE_CLUSTER[1], RIGHT_EYE_CLUSTER[0])
                * 1000.0,
            face_height,
            face_shape_index: if face_width > 0.0 { face_height / face_width } else { 0.0 },
        }
    }

    /// Anchors all measurements to the standard adult pupillary distance
    /// so scores are comparable across capture distances and resolutions.
    pub fn calibrated(&self, standard_pd: f32) -> Option<FaceMeasurements> {
        if self.pupillary_distance <= 0.0 {
            return None;
        }
        let factor = standard_pd / self.pupillary_distance;
        Some(FaceMeasurements {
            pupillary_distance: self.pupillary_distance * factor,
            face_width: self.face_width * factor,
            bridge_height: self.bridge_height * factor,
            temple_width: self.temple_width * factor,
            nose_bridge_width: self.nose_bridge_width * factor,
            face_height: self.face_height * factor,
            face_shape_index: self.face_shape_index * factor,
        })
    }
}

/// Physical dimensions of one eyewear frame, in millimeters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameDimensionRecord {
    pub bridge_width: f32,
    pub lens_width: f32,
    pub temple_length: f32,
    pub frame_style: String,
}

/// One catalog entry of the frames metadata file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameRecord {
    pub name: String,
    pub dimensions: FrameDimensionRecord,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub id: String,
    pub name: String,
    pub score: f32,
}

/// Loads the frames metadata catalog, preserving file order so score
/// ties keep the catalog ranking.
pub fn load_catalog(path: &Path) -> Result<Vec<(String, FrameRecord)>, Error> {
    let raw = std::fs::read_to_string(path)?;
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)?;
    let mut catalog = Vec::with_capacity(map.len());
    for (id, value) in map {
        let record: FrameRecord = serde_json::from_value(value)
            .map_err(|err| Error::msg(format!("invalid frame record {id}: {err}")))?;
        catalog.push((id, record));
    }
    Ok(catalog)
}

/// Ranks catalog frames against calibrated facial measurements.
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl RecommendationEngine {
    pub fn new(config: RecommendationConfig) -> Self {
        RecommendationEngine { config }
    }

    /// Scores every suitable catalog frame and returns them in descending
    /// score order; ties keep catalog order.
    ///
    /// # Arguments
    /// * `measurements` - calibrated measurements in millimeters
    /// * `catalog` - frame records in catalog order
    ///
    /// # Returns
    /// * `Vec<Recommendation>`
    pub fn recommend(
        &self,
        measurements: &FaceMeasurements,
        catalog: &[(String, FrameRecord)],
    ) -> Vec<Recommendation> {
        let mut ranked: Vec<Recommendation> = catalog
            .iter()
            .filter(|(_, record)| self.is_suitable(measurements, &record.dimensions))
            .map(|(id, record)| Recommendation {
                id: id.clone(),
                name: record.name.clone(),
                score: self.compatibility_score(measurements, &record.dimensions),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Suitability gate: bridge clearance and bounded ratio checks.
    pub fn is_suitable(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> bool {
        if measurements.face_width <= 0.0 || measurements.temple_width <= 0.0 {
            return false;
        }
        let clearance = dimensions.bridge_width - measurements.nose_bridge_width;
        if clearance < self.config.min_bridge_clearance
            || clearance > self.config.max_bridge_clearance
        {
            return false;
        }
        let lens_ratio = dimensions.lens_width / measurements.face_width;
        if lens_ratio < self.config.lens_ratio_range.0
            || lens_ratio > self.config.lens_ratio_range.1
        {
            return false;
        }
        let temple_ratio = dimensions.temple_length / measurements.temple_width;
        temple_ratio >= self.config.temple_ratio_range.0
            && temple_ratio <= self.config.temple_ratio_range.1
    }

    /// Weighted sum of the five normalized sub-scores, rounded to two
    /// decimals.
    pub fn compatibility_score(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> f32 {
        let score = self.config.weight_bridge * self.score_bridge_fit(measurements, dimensions)
            + self.config.weight_lens * self.score_lens_fit(measurements, dimensions)
            + self.config.weight_temple * self.score_temple_fit(measurements, dimensions)
            + self.config.weight_face_shape
                * self.score_face_shape(measurements, dimensions)
            + self.config.weight_style * self.score_style_fit(measurements, dimensions);
        round2(score)
    }

    fn score_bridge_fit(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> f32 {
        let clearance = dimensions.bridge_width - measurements.nose_bridge_width;
        let ideal = (self.config.min_bridge_clearance + self.config.max_bridge_clearance) / 2.0;
        let span = self.config.max_bridge_clearance - self.config.min_bridge_clearance;
        clamp01(1.0 - (clearance - ideal).abs() / span)
    }

    fn score_lens_fit(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> f32 {
        if measurements.face_width <= 0.0 {
            return 0.0;
        }
        let ratio = dimensions.lens_width / measurements.face_width;
        let (lo, hi) = self.config.lens_ratio_range;
        clamp01(1.0 - (ratio - (lo + hi) / 2.0).abs() / (hi - lo))
    }

    fn score_temple_fit(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> f32 {
        if measurements.temple_width <= 0.0 {
            return 0.0;
        }
        let ratio = dimensions.temple_length / measurements.temple_width;
        let (lo, hi) = self.config.temple_ratio_range;
        clamp01(1.0 - (ratio - (lo + hi) / 2.0).abs() / (hi - lo))
    }

    fn score_face_shape(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> f32 {
        let style = dimensions.frame_style.to_ascii_lowercase();
        // Wide faces suit angular frames, long faces suit rounded ones.
        if measurements.face_shape_index < 1.15 {
            match style.as_str() {
                "square" | "rectangle" | "wayfarer" => 1.0,
                "aviator" | "cat_eye" => 0.8,
                "sport" => 0.7,
                "round" | "oval" => 0.4,
                _ => 0.6,
            }
        } else if measurements.face_shape_index < 1.35 {
            match style.as_str() {
                "aviator" | "wayfarer" | "square" => 1.0,
                "round" | "oval" | "cat_eye" => 0.9,
                _ => 0.8,
            }
        } else {
            match style.as_str() {
                "round" | "oval" | "aviator" => 1.0,
                "sport" | "cat_eye" => 0.7,
                "square" | "rectangle" => 0.5,
                _ => 0.6,
            }
        }
    }

    fn score_style_fit(
        &self,
        measurements: &FaceMeasurements,
        dimensions: &FrameDimensionRecord,
    ) -> f32 {
        if measurements.face_width <= 0.0 {
            return 0.0;
        }
        // Overall frame front (two lenses plus bridge) against face width.
        let front = 2.0 * dimensions.lens_width + dimensions.bridge_width;
        let ratio = front / measurements.face_width;
        clamp01(1.0 - (ratio - 1.0).abs() / 0.2)
    }
}
