use std::sync::Arc;

use anyhow::Error;
use opencv::core::MatTraitConst;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::config::{CacheConfig, OverlayConfig, RecommendationConfig};
use crate::helper::overlay_helper::OverlayHelper;
use crate::modules::asset_cache::{AssetCacheManager, AssetFetcher, AssetId, HttpFetcher};
use crate::modules::landmark_provider::LandmarkProvider;
use crate::modules::recommendation::{
    FaceMeasurements, FrameRecord, Recommendation, RecommendationEngine,
};
use crate::modules::smoother::{SmoothingState, TemporalSmoother};
use crate::utils::image;

/// Client request to switch the worn frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    pub frame: String,
    #[serde(default)]
    pub frame_url: Option<String>,
}

/// Reply to a control message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReply {
    pub status: String,
    pub message: String,
}

impl StatusReply {
    fn success(message: String) -> Self {
        StatusReply { status: "success".to_string(), message }
    }

    fn frame_load_error() -> Self {
        StatusReply {
            status: "error".to_string(),
            message: "Failed to load frame".to_string(),
        }
    }
}

/// Per-client try-on session.
///
/// Owns the landmark provider and smoothing state for one video stream
/// and shares the asset cache with every other session.
pub struct TryOnSession<P: LandmarkProvider, F: AssetFetcher = HttpFetcher> {
    provider: P,
    cache: Arc<AssetCacheManager<F>>,
    overlay: OverlayHelper,
    smoother: TemporalSmoother,
    state: SmoothingState,
    engine: RecommendationEngine,
    standard_pd: f32,
    active_asset: AssetId,
}

impl<P: LandmarkProvider, F: AssetFetcher> TryOnSession<P, F> {
    /// new initializes a session with the shared asset cache.
    ///
    /// # Arguments
    /// * `provider` - landmark detector for this client's frames
    /// * `cache` - process-wide asset cache
    /// * `overlay_config` - placement and smoothing parameters
    /// * `cache_config` - names the default worn asset
    /// * `recommendation_config` - fit scoring parameters
    ///
    /// # Returns
    /// * `Result<TryOnSession<P, F>, Error>`
    pub fn new(
        provider: P,
        cache: Arc<AssetCacheManager<F>>,
        overlay_config: OverlayConfig,
        cache_config: &CacheConfig,
        recommendation_config: RecommendationConfig,
    ) -> Result<Self, Error> {
        let active_asset = AssetId::parse(&cache_config.default_asset)?;
        Ok(TryOnSession {
            provider,
            cache,
            overlay: OverlayHelper::new(overlay_config.clone()),
            smoother: TemporalSmoother::new(&overlay_config),
            state: SmoothingState::new(),
            standard_pd: recommendation_config.standard_pd,
            engine: RecommendationEngine::new(recommendation_config),
            active_asset,
        })
    }

    pub fn active_asset(&self) -> &AssetId {
        &self.active_asset
    }

    /// Processes one camera frame and returns the composited result as a
    /// base64-encoded JPEG. When no face is visible, or the placement is
    /// off-frame, the frame passes through untouched.
    ///
    /// # Arguments
    /// * `frame_bytes` - encoded camera frame
    ///
    /// # Returns
    /// * `Result<String, Error>`
    pub async fn process_frame(&mut self, frame_bytes: &[u8]) -> Result<String, Error> {
        // The asset lookup happens before any matrix is created so no
        // OpenCV data lives across an await point.
        let asset = self.cache.get(&self.active_asset).await;
        if asset.is_none() {
            warn!(asset = %self.active_asset, "active asset missing from cache");
        }

        let mut frame = image::decode_frame(frame_bytes)?;
        let landmarks = self.provider.detect(&frame)?;
        let raw = landmarks
            .as_ref()
            .and_then(|lm| self.overlay.estimate_placement(lm, frame.cols(), frame.rows()));
        let smoothed = self.smoother.apply(&mut self.state, raw);

        match (smoothed, asset) {
            (Some(transform), Some(asset)) => {
                self.overlay.overlay_asset(&mut frame, &asset, &transform)?;
            }
            _ => debug!("frame passed through without compositing"),
        }

        let encoded = image::encode_jpeg(&frame)?;
        Ok(image::encode_base64(&encoded))
    }

    /// Handles a frame-switch request. The worn asset changes only after
    /// the requested one resolves; every failure leaves the session on
    /// its current asset and reports one uniform error.
    ///
    /// # Arguments
    /// * `raw` - control message JSON
    ///
    /// # Returns
    /// * `StatusReply`
    pub async fn handle_control(&mut self, raw: &str) -> StatusReply {
        let message: ControlMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "malformed control message");
                return StatusReply::frame_load_error();
            }
        };
        let id = match AssetId::parse(&message.frame) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "control message with invalid frame identifier");
                return StatusReply::frame_load_error();
            }
        };
        match self.cache.resolve(&id, message.frame_url.as_deref()).await {
            Some(_) => {
                info!(from = %self.active_asset, to = %id, "switched worn frame");
                self.active_asset = id.clone();
                StatusReply::success(format!("Switched to frame {id}"))
            }
            None => StatusReply::frame_load_error(),
        }
    }

    /// Detects a face in the frame and returns calibrated measurements,
    /// or `None` when no face is visible or the pupillary distance is
    /// degenerate.
    ///
    /// # Arguments
    /// * `frame_bytes` - encoded camera frame
    ///
    /// # Returns
    /// * `Result<Option<FaceMeasurements>, Error>`
    pub fn measure(&mut self, frame_bytes: &[u8]) -> Result<Option<FaceMeasurements>, Error> {
        let frame = image::decode_frame(frame_bytes)?;
        let landmarks = match self.provider.detect(&frame)? {
            Some(landmarks) => landmarks,
            None => return Ok(None),
        };
        let raw = FaceMeasurements::from_landmarks(&landmarks);
        Ok(raw.calibrated(self.standard_pd))
    }

    /// Measures the face in the frame and ranks the catalog against it.
    /// An undetected face yields an empty ranking.
    ///
    /// # Arguments
    /// * `frame_bytes` - encoded camera frame
    /// * `catalog` - frame records in catalog order
    ///
    /// # Returns
    /// * `Result<Vec<Recommendation>, Error>`
    pub fn recommend(
        &mut self,
        frame_bytes: &[u8],
        catalog: &[(String, FrameRecord)],
    ) -> Result<Vec<Recommendation>, Error> {
        let measurements = match self.measure(frame_bytes)? {
            Some(measurements) => measurements,
            None => return Ok(Vec::new()),
        };
        Ok(self.engine.recommend(&measurements, catalog))
    }
}
