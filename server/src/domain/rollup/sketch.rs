//! Mergeable relative-error quantile sketch
//!
//! Values are mapped to logarithmic buckets `ceil(log_gamma(|v|))` with
//! `gamma = (1 + a) / (1 - a)`, so every bucket's representative value is
//! within relative accuracy `a` of each value it holds. Merging adds bucket
//! counts, which is exactly associative and commutative.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::constants::SKETCH_RELATIVE_ACCURACY;

/// Magnitudes below this count as zero
const MIN_INDEXABLE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileSketch {
    relative_accuracy: f64,
    positive: BTreeMap<i32, u64>,
    negative: BTreeMap<i32, u64>,
    zero_count: u64,
    count: u64,
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new(SKETCH_RELATIVE_ACCURACY)
    }
}

impl QuantileSketch {
    pub fn new(relative_accuracy: f64) -> Self {
        Self {
            relative_accuracy,
            positive: BTreeMap::new(),
            negative: BTreeMap::new(),
            zero_count: 0,
            count: 0,
        }
    }

    pub fn relative_accuracy(&self) -> f64 {
        self.relative_accuracy
    }

    fn gamma(&self) -> f64 {
        (1.0 + self.relative_accuracy) / (1.0 - self.relative_accuracy)
    }

    fn index(&self, magnitude: f64) -> i32 {
        (magnitude.ln() / self.gamma().ln()).ceil() as i32
    }

    fn value(&self, index: i32) -> f64 {
        let gamma = self.gamma();
        2.0 * gamma.powi(index) / (gamma + 1.0)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Add one value; non-finite values are ignored
    pub fn insert(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if value.abs() < MIN_INDEXABLE {
            self.zero_count += 1;
        } else if value > 0.0 {
            *self.positive.entry(self.index(value)).or_default() += 1;
        } else {
            *self.negative.entry(self.index(-value)).or_default() += 1;
        }
        self.count += 1;
    }

    /// Fold another sketch into this one.
    ///
    /// Both sketches must share a relative accuracy; every sketch built by
    /// this process does.
    pub fn merge(&mut self, other: &QuantileSketch) {
        debug_assert!((self.relative_accuracy - other.relative_accuracy).abs() < f64::EPSILON);
        for (&i, &n) in &other.positive {
            *self.positive.entry(i).or_default() += n;
        }
        for (&i, &n) in &other.negative {
            *self.negative.entry(i).or_default() += n;
        }
        self.zero_count += other.zero_count;
        self.count += other.count;
    }

    /// Approximate value at quantile `q` in `[0, 1]`; `None` when empty
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || q.is_nan() {
            return None;
        }
        let q = q.clamp(0.0, 1.0);
        let rank = (q * (self.count - 1) as f64).floor() as u64;

        // Ascending order: most negative first (largest negative index)
        let mut seen = 0u64;
        for (&i, &n) in self.negative.iter().rev() {
            seen += n;
            if seen > rank {
                return Some(-self.value(i));
            }
        }
        seen += self.zero_count;
        if seen > rank {
            return Some(0.0);
        }
        for (&i, &n) in &self.positive {
            seen += n;
            if seen > rank {
                return Some(self.value(i));
            }
        }
        // Unreachable while count matches the stores
        self.positive.keys().next_back().map(|&i| self.value(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_relative(actual: f64, expected: f64, accuracy: f64) {
        let err = ((actual - expected) / expected).abs();
        assert!(
            err <= accuracy + 1e-12,
            "{actual} not within {accuracy} of {expected}"
        );
    }

    #[test]
    fn test_empty_sketch() {
        let sketch = QuantileSketch::default();
        assert!(sketch.is_empty());
        assert_eq!(sketch.quantile(0.5), None);
    }

    #[test]
    fn test_quantiles_within_relative_accuracy() {
        let mut sketch = QuantileSketch::default();
        for v in 1..=1000 {
            sketch.insert(v as f64);
        }
        assert_eq!(sketch.count(), 1000);
        // rank = floor(q * 999), exact value = rank + 1
        assert_relative(sketch.quantile(0.5).unwrap(), 500.0, 0.01);
        assert_relative(sketch.quantile(0.95).unwrap(), 950.0, 0.01);
        assert_relative(sketch.quantile(0.99).unwrap(), 990.0, 0.01);
        assert_relative(sketch.quantile(0.0).unwrap(), 1.0, 0.01);
        assert_relative(sketch.quantile(1.0).unwrap(), 1000.0, 0.01);
    }

    #[test]
    fn test_negative_and_zero_values() {
        let mut sketch = QuantileSketch::default();
        for v in [-10.0, -1.0, 0.0, 0.0, 5.0] {
            sketch.insert(v);
        }
        assert_relative(sketch.quantile(0.0).unwrap(), -10.0, 0.01);
        assert_eq!(sketch.quantile(0.5).unwrap(), 0.0);
        assert_relative(sketch.quantile(1.0).unwrap(), 5.0, 0.01);
    }

    #[test]
    fn test_merge_is_associative_and_commutative() {
        let build = |values: &[f64]| {
            let mut s = QuantileSketch::default();
            values.iter().for_each(|&v| s.insert(v));
            s
        };
        let a = build(&[1.0, 2.0, 3.0]);
        let b = build(&[10.0, 20.0]);
        let c = build(&[-5.0, 0.0, 100.0]);

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        let mut reversed = c.clone();
        reversed.merge(&b);
        reversed.merge(&a);

        assert_eq!(left, right);
        assert_eq!(left, reversed);
        assert_eq!(left.count(), 8);
    }

    #[test]
    fn test_merge_equals_single_sketch() {
        let mut whole = QuantileSketch::default();
        let mut first = QuantileSketch::default();
        let mut second = QuantileSketch::default();
        for v in 1..=200 {
            whole.insert(v as f64);
            if v % 2 == 0 {
                first.insert(v as f64);
            } else {
                second.insert(v as f64);
            }
        }
        first.merge(&second);
        assert_eq!(first, whole);
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut sketch = QuantileSketch::default();
        sketch.insert(f64::NAN);
        sketch.insert(f64::INFINITY);
        assert!(sketch.is_empty());
    }
}
