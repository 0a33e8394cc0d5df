use crate::types::{Orientation, RelayStatus};

/// Target relay state for one reading against its threshold.
pub fn decide(value: f32, threshold: f32, orientation: Orientation) -> RelayStatus {
    let on = match orientation {
        Orientation::Above => value > threshold,
        Orientation::Below => value <= threshold,
    };
    if on {
        RelayStatus::On
    } else {
        RelayStatus::Off
    }
}

/// Readings are compared after truncation to two decimals so sensor jitter
/// below 0.01 does not count as a change.
pub fn same_reading(a: f32, b: f32) -> bool {
    truncate_hundredths(a) == truncate_hundredths(b)
}

/// Sensor-side change detection: a new sample is reported only when it moves
/// by more than the configured delta.
pub fn exceeds_delta(previous: f32, current: f32, delta: f32) -> bool {
    (previous - current).abs() > delta
}

fn truncate_hundredths(value: f32) -> f64 {
    (f64::from(value) * 100.0).trunc()
}
