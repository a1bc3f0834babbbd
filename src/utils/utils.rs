/// Clamps a sub-score into the [0, 1] scoring range.
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Rounds a final compatibility score to two decimals.
pub fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}
