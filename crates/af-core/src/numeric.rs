/// Floating point type used throughout the pipeline
pub type Real = f64;

/// Round to a fixed decimal grid so values that differ only by float noise
/// compare and hash equal. Negative zero collapses to zero.
pub fn quantize(v: Real, step: Real) -> i64 {
    let q = (v / step).round();
    if q == 0.0 { 0 } else { q as i64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_absorbs_float_noise() {
        assert_eq!(quantize(0.1 + 0.2, 1e-6), quantize(0.3, 1e-6));
        assert_eq!(quantize(-0.0, 1e-6), 0);
        assert_eq!(quantize(-1e-9, 1e-6), 0);
        assert_ne!(quantize(0.300001, 1e-6), quantize(0.3, 1e-6));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn quantize_is_within_half_step(v in -1e6_f64..1e6_f64) {
            let q = quantize(v, 1e-6) as f64 * 1e-6;
            prop_assert!((q - v).abs() <= 0.5e-6 + 1e-9);
        }

        #[test]
        fn quantize_is_monotone(a in -1e3_f64..1e3_f64, b in -1e3_f64..1e3_f64) {
            prop_assume!(a <= b);
            prop_assert!(quantize(a, 1e-6) <= quantize(b, 1e-6));
        }
    }
}
