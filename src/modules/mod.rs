pub mod landmark_provider;
pub mod smoother;
pub mod asset_cache;
pub mod recommendation;
