//! Vector distance helpers.

/// Squared Euclidean distance, or `None` when dimensions differ.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum())
}

/// Euclidean (L2) distance, or `None` when dimensions differ.
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    squared_l2(a, b).map(f32::sqrt)
}
