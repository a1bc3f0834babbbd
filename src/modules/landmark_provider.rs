use anyhow::Error;
use opencv::core::Mat;

use crate::utils::coordinate::LandmarkSet;

/// Seam for the external facial-landmark detector.
///
/// Implementations receive a BGR frame and report the landmark set of the
/// first detected face, or `None` when no face is found. Detectors may
/// keep tracking state between frames, hence `&mut self`.
pub trait LandmarkProvider {
    fn detect(&mut self, frame: &Mat) -> Result<Option<LandmarkSet>, Error>;
}
