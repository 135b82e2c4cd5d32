//! Cross-type numeric comparison and checked conversions.
//!
//! CEL compares int, uint, and double by mathematical value. The int/uint
//! pairing widens to i128 and is always exact. The int/uint vs double
//! pairings clamp at the integer type's range boundary before falling back
//! to a float comparison, which reproduces the conformance results at
//! +/-2^63 and 2^64 without big-integer arithmetic.

use std::cmp::Ordering;

/// 2^63 as f64, exactly representable.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
/// 2^64 as f64, exactly representable.
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

pub fn compare_int_uint(i: i64, u: u64) -> Ordering {
    (i as i128).cmp(&(u as i128))
}

/// Compare an int against a double. `None` when the double is NaN.
pub fn compare_int_double(i: i64, d: f64) -> Option<Ordering> {
    if d.is_nan() {
        return None;
    }
    if d < -TWO_POW_63 {
        Some(Ordering::Greater)
    } else if d > TWO_POW_63 {
        Some(Ordering::Less)
    } else {
        (i as f64).partial_cmp(&d)
    }
}

/// Compare a uint against a double. `None` when the double is NaN.
pub fn compare_uint_double(u: u64, d: f64) -> Option<Ordering> {
    if d.is_nan() {
        return None;
    }
    if d < 0.0 {
        Some(Ordering::Greater)
    } else if d > TWO_POW_64 {
        Some(Ordering::Less)
    } else {
        (u as f64).partial_cmp(&d)
    }
}

/// Truncate-toward-zero conversion from double to int with a range check.
pub fn double_to_int(d: f64) -> Option<i64> {
    let t = d.trunc();
    if t.is_nan() || t >= TWO_POW_63 || t < -TWO_POW_63 {
        None
    } else {
        Some(t as i64)
    }
}

/// Truncate-toward-zero conversion from double to uint with a range check.
pub fn double_to_uint(d: f64) -> Option<u64> {
    let t = d.trunc();
    if t.is_nan() || t >= TWO_POW_64 || t <= -1.0 {
        None
    } else {
        Some(t as u64)
    }
}

pub fn int_to_uint(i: i64) -> Option<u64> {
    u64::try_from(i).ok()
}

pub fn uint_to_int(u: u64) -> Option<i64> {
    i64::try_from(u).ok()
}

/// If `d` denotes an integer exactly, return it as a signed value wide
/// enough to cover both int and uint ranges. Used for map-key coercion.
pub fn double_as_integer(d: f64) -> Option<i128> {
    if d.is_finite() && d.fract() == 0.0 && d >= -TWO_POW_63 && d < TWO_POW_64 {
        Some(d as i128)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_uint_is_exact() {
        assert_eq!(compare_int_uint(-1, 0), Ordering::Less);
        assert_eq!(compare_int_uint(i64::MAX, u64::MAX), Ordering::Less);
        assert_eq!(compare_int_uint(1, 1), Ordering::Equal);
    }

    #[test]
    fn int_double_boundaries() {
        // i64::MAX rounds to 2^63 as a double, so the comparison against
        // exactly 2^63 is Equal, matching the conformance fixtures.
        assert_eq!(
            compare_int_double(i64::MAX, TWO_POW_63),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_int_double(i64::MIN, -TWO_POW_63),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_int_double(0, -9_223_372_036_854_775_809.0),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_int_double(5, f64::NAN), None);
    }

    #[test]
    fn uint_double_boundaries() {
        assert_eq!(
            compare_uint_double(u64::MAX, 18_446_744_073_709_590_000.0),
            Some(Ordering::Less)
        );
        assert_eq!(compare_uint_double(0, -0.5), Some(Ordering::Greater));
        assert_eq!(compare_uint_double(3, 3.0), Some(Ordering::Equal));
    }

    #[test]
    fn double_to_int_truncates() {
        assert_eq!(double_to_int(3.9), Some(3));
        assert_eq!(double_to_int(-3.9), Some(-3));
        assert_eq!(double_to_int(-TWO_POW_63), Some(i64::MIN));
        assert_eq!(double_to_int(TWO_POW_63), None);
        assert_eq!(double_to_int(f64::NAN), None);
        assert_eq!(double_to_int(f64::INFINITY), None);
    }

    #[test]
    fn double_to_uint_truncates() {
        assert_eq!(double_to_uint(3.9), Some(3));
        assert_eq!(double_to_uint(-0.5), Some(0));
        assert_eq!(double_to_uint(-1.0), None);
        assert_eq!(double_to_uint(TWO_POW_64), None);
    }

    #[test]
    fn int_uint_conversions_range_check() {
        assert_eq!(int_to_uint(-1), None);
        assert_eq!(int_to_uint(5), Some(5));
        assert_eq!(uint_to_int(u64::MAX), None);
        assert_eq!(uint_to_int(42), Some(42));
    }
}
