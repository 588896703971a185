//! Exact rational time
//!
//! Every timestamp the pipeline hands out is a [`Rational`] number of seconds.
//! Values are kept in lowest terms with a positive denominator, so equality is
//! plain field comparison and per-sample offsets can be accumulated over any
//! number of frames without drift.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use ffmpeg_next as ffmpeg;

/// An exact fraction `num / den`, always reduced
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };
    pub const ONE: Rational = Rational { num: 1, den: 1 };

    /// Create a reduced rational.
    ///
    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: i64, den: i64) -> Self {
        Self::reduce(num as i128, den as i128)
    }

    fn reduce(num: i128, den: i128) -> Self {
        assert!(den != 0, "denominator cannot be zero");
        let g = gcd(num, den);
        let (mut num, mut den) = (num / g, den / g);
        if den < 0 {
            num = -num;
            den = -den;
        }
        let fits = |v: i128| v >= i64::MIN as i128 && v <= i64::MAX as i128;
        assert!(fits(num) && fits(den), "rational overflows i64");
        Self {
            num: num as i64,
            den: den as i64,
        }
    }

    /// Time of `ticks` units of `time_base` seconds each
    pub fn from_ticks(ticks: i64, time_base: Rational) -> Self {
        Rational::from(ticks) * time_base
    }

    pub fn numerator(&self) -> i64 {
        self.num
    }

    pub fn denominator(&self) -> i64 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Floating point value, for display only
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    fn lcm_parts(self, other: Rational) -> (i128, i128, i128) {
        let (a_den, b_den) = (self.den as i128, other.den as i128);
        let den = a_den / gcd(a_den, b_den) * b_den;
        (
            self.num as i128 * (den / a_den),
            other.num as i128 * (den / b_den),
            den,
        )
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::ZERO
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        let (a, b, den) = self.lcm_parts(rhs);
        Rational::reduce(a + b, den)
    }
}

impl Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Rational) -> Rational {
        let (a, b, den) = self.lcm_parts(rhs);
        Rational::reduce(a - b, den)
    }
}

impl Mul for Rational {
    type Output = Rational;

    fn mul(self, rhs: Rational) -> Rational {
        Rational::reduce(
            self.num as i128 * rhs.num as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Div for Rational {
    type Output = Rational;

    /// # Panics
    ///
    /// Panics when dividing by zero.
    fn div(self, rhs: Rational) -> Rational {
        Rational::reduce(
            self.num as i128 * rhs.den as i128,
            self.den as i128 * rhs.num as i128,
        )
    }
}

impl Neg for Rational {
    type Output = Rational;

    fn neg(self) -> Rational {
        Rational::reduce(-(self.num as i128), self.den as i128)
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross multiplication keeps the order.
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for Rational {
    fn from(value: i64) -> Self {
        Rational { num: value, den: 1 }
    }
}

impl From<(i64, i64)> for Rational {
    fn from((num, den): (i64, i64)) -> Self {
        Rational::new(num, den)
    }
}

impl From<ffmpeg::Rational> for Rational {
    fn from(value: ffmpeg::Rational) -> Self {
        Rational::new(value.numerator() as i64, value.denominator() as i64)
    }
}

impl From<Rational> for f64 {
    fn from(value: Rational) -> f64 {
        value.to_f64()
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_to_f64() {
        assert_eq!(Rational::new(1, 3).to_f64(), 1.0 / 3.0);
        assert_eq!(f64::from(Rational::new(1, 2)), 0.5);
    }

    #[test]
    fn test_from_ffmpeg_rational() {
        assert_eq!(
            Rational::from(ffmpeg::Rational::new(1, 3)),
            Rational::new(1, 3)
        );
        assert_eq!(
            Rational::from(ffmpeg::Rational::new(2, 44100)),
            Rational::new(1, 22050)
        );
    }

    #[test]
    fn test_neg() {
        assert_eq!(-Rational::new(3, 4), Rational::new(-3, 4));
        assert_eq!(-Rational::new(i64::MAX, 2), Rational::new(-i64::MAX, 2));
    }

    #[test]
    #[should_panic(expected = "rational overflows i64")]
    fn test_neg_overflow_panics() {
        let _ = -Rational::from(i64::MIN);
    }

    #[test]
    fn test_sum() {
        assert_eq!(Rational::new(1, 3) + Rational::new(1, 2), Rational::new(5, 6));
    }

    #[test]
    fn test_sub() {
        assert_eq!(Rational::new(1, 2) - Rational::new(1, 3), Rational::new(1, 6));
        assert_eq!(Rational::new(1, 3) - Rational::new(1, 2), Rational::new(-1, 6));
    }

    #[test]
    fn test_mul() {
        assert_eq!(Rational::new(2, 3) * Rational::new(1, 2), Rational::new(2, 6));
    }

    #[test]
    fn test_div() {
        assert_eq!(Rational::new(2, 3) / Rational::new(1, 2), Rational::new(4, 3));
    }

    #[test]
    fn test_reduced_storage() {
        let r = Rational::new(6, -8);
        assert_eq!(r.numerator(), -3);
        assert_eq!(r.denominator(), 4);
        assert_eq!(Rational::new(0, 7), Rational::ZERO);
    }

    #[test]
    fn test_from_ticks() {
        let tb = Rational::new(1, 90000);
        assert_eq!(Rational::from_ticks(45000, tb), Rational::new(1, 2));
    }

    #[test]
    fn test_ordering() {
        assert!(Rational::new(1, 3) < Rational::new(1, 2));
        assert!(Rational::new(-1, 2) < Rational::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Rational::new(2, 44100)), "1/22050");
    }

    #[test]
    #[should_panic(expected = "denominator cannot be zero")]
    fn test_zero_denominator_panics() {
        Rational::new(1, 0);
    }

    #[test]
    #[should_panic(expected = "denominator cannot be zero")]
    fn test_divide_by_zero_panics() {
        let _ = Rational::ONE / Rational::ZERO;
    }

    #[test]
    fn test_per_sample_accumulation_is_exact() {
        let rate = 44100;
        let step = Rational::new(1, rate);
        let mut t = Rational::ZERO;
        for _ in 0..rate {
            t = t + step;
        }
        assert_eq!(t, Rational::ONE);
    }

    proptest! {
        #[test]
        fn prop_always_reduced(num in -1_000_000i64..1_000_000, den in 1i64..1_000_000) {
            let r = Rational::new(num, den);
            prop_assert!(r.denominator() > 0);
            prop_assert_eq!(gcd(r.numerator() as i128, r.denominator() as i128).max(1), 1);
        }

        #[test]
        fn prop_add_sub_inverse(
            a in -100_000i64..100_000, b in 1i64..100_000,
            c in -100_000i64..100_000, d in 1i64..100_000,
        ) {
            let x = Rational::new(a, b);
            let y = Rational::new(c, d);
            prop_assert_eq!((x + y) - y, x);
        }

        #[test]
        fn prop_mul_div_inverse(
            a in -100_000i64..100_000, b in 1i64..100_000,
            c in 1i64..100_000, d in 1i64..100_000,
        ) {
            let x = Rational::new(a, b);
            let y = Rational::new(c, d);
            prop_assert_eq!((x * y) / y, x);
        }

        #[test]
        fn prop_sample_offset_matches_float(pts in 0i64..10_000_000, index in 0i64..4096) {
            let tb = Rational::new(1, 14_112_000);
            let t = Rational::from_ticks(pts, tb) + Rational::new(index, 44100);
            let expected = pts as f64 / 14_112_000.0 + index as f64 / 44100.0;
            prop_assert!((t.to_f64() - expected).abs() < 1e-9);
        }
    }
}
