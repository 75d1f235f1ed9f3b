//! Uniform sampling decisions.

/// Draw against `rate`: `>= 1.0` always keeps, `<= 0.0` never does.
pub fn should_sample(rate: f64) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 || rate.is_nan() {
        false
    } else {
        rand::random::<f64>() < rate
    }
}
