use crate::config::config::OverlayConfig;
use crate::helper::overlay_helper::PlacementTransform;

/// Per-session smoothing memory: the last smoothed transform plus the
/// length of the current detection gap. One value type so a session
/// restart is a single `reset()` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothingState {
    last: Option<PlacementTransform>,
    consecutive_misses: u32,
}

impl SmoothingState {
    pub fn new() -> Self {
        SmoothingState::default()
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.consecutive_misses = 0;
    }

    pub fn last_transform(&self) -> Option<&PlacementTransform> {
        self.last.as_ref()
    }
}

/// Exponential blending of raw placement transforms across the frames of
/// one tracking session.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    alpha: f32,
    aspect_ratio: f32,
    reset_after_misses: u32,
}

impl TemporalSmoother {
    pub fn new(config: &OverlayConfig) -> Self {
        TemporalSmoother {
            alpha: config.smoothing_factor,
            aspect_ratio: config.aspect_ratio,
            reset_after_misses: config.reset_after_misses,
        }
    }

    /// Blends the raw transform with the session history.
    ///
    /// The first frame after an empty state passes through unchanged. On a
    /// detection miss the state is kept so a briefly occluded face resumes
    /// from the last known transform; after `reset_after_misses`
    /// consecutive misses the state resets and the next detection starts a
    /// fresh trajectory.
    ///
    /// # Arguments
    /// * `state` - the session's smoothing state, mutated in place
    /// * `raw` - this frame's raw transform, or `None` on a miss
    ///
    /// # Returns
    /// * `Option<PlacementTransform>` - the smoothed transform, or `None`
    ///   when compositing should be skipped for this frame
    pub fn apply(
        &self,
        state: &mut SmoothingState,
        raw: Option<PlacementTransform>,
    ) -> Option<PlacementTransform> {
        let raw = match raw {
            Some(raw) => raw,
            None => {
                state.consecutive_misses += 1;
                if state.consecutive_misses >= self.reset_after_misses {
                    state.reset();
                }
                return None;
            }
        };

        state.consecutive_misses = 0;

        let smoothed = match state.last {
            None => raw,
            Some(prev) => {
                let width = self.blend(prev.width, raw.width);
                PlacementTransform {
                    center_x: self.blend(prev.center_x, raw.center_x),
                    center_y: self.blend(prev.center_y, raw.center_y),
                    width,
                    // Height is never smoothed independently, so the
                    // aspect cannot drift.
                    height: (width * self.aspect_ratio).round(),
                    rotation: self.blend(prev.rotation, raw.rotation),
                }
            }
        };

        state.last = Some(smoothed);
        Some(smoothed)
    }

    fn blend(&self, previous: f32, current: f32) -> f32 {
        previous * self.alpha + current * (1.0 - self.alpha)
    }
}
