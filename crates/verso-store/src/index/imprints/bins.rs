//! Value to bin mapping of a column-imprints level.

/// 63 increasing exclusive upper bounds splitting values into 64 bins.
///
/// Value `v` falls in the first bin `i` with `v < bounds[i]`, or in the
/// overflow bin when it reaches the last bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bins {
    bounds: [i32; Self::BOUNDS],
}

impl Bins {
    pub const COUNT: usize = 64;
    pub const OVERFLOW: usize = Self::COUNT - 1;
    const BOUNDS: usize = Self::COUNT - 1;

    /// One bin per value for values `0..63`.
    pub fn identity() -> Self {
        Self {
            bounds: std::array::from_fn(|i| i as i32 + 1),
        }
    }

    #[inline]
    pub fn bin_of(&self, value: i32) -> usize {
        self.bounds.partition_point(|&bound| bound <= value)
    }

    #[inline]
    pub const fn last_bound(&self) -> i32 {
        self.bounds[Self::BOUNDS - 1]
    }

    #[inline]
    pub const fn bounds(&self) -> &[i32; Self::BOUNDS] {
        &self.bounds
    }

    /// Equal-frequency bins computed from every indexed value.
    ///
    /// A bin is closed as soon as it holds more than `len / 63` rows; bins
    /// left once the values run out evenly split what remains up to
    /// `max_value`.
    pub fn from_values(sorted: &[i32], max_value: i32) -> Self {
        let step = sorted.len() / Self::BOUNDS;
        let mut bounds = [0; Self::BOUNDS];
        let mut filled = 0;
        let mut count = 0;
        for group in sorted.chunk_by(|a, b| a == b) {
            count += group.len();
            if count > step {
                bounds[filled] = group[0].saturating_add(1);
                filled += 1;
                count = 0;
                if filled == Self::BOUNDS {
                    break;
                }
            }
        }

        let start = if filled == 0 { 0 } else { bounds[filled - 1] };
        let remaining = (Self::BOUNDS - filled) as i64;
        let width = ((i64::from(max_value) + 1 - i64::from(start)) / (remaining + 1)).max(1);
        for i in filled..Self::BOUNDS {
            let previous = if i == 0 { 0 } else { bounds[i - 1] };
            bounds[i] = (i64::from(previous) + width).min(i64::from(i32::MAX)) as i32;
        }
        Self { bounds }
    }

    /// Approximately equal-frequency bins computed from a sorted sample.
    pub fn from_sample(sorted: &[i32]) -> Option<Self> {
        let last = sorted.len().checked_sub(1)?;
        let mut bounds = [0; Self::BOUNDS];
        for i in 0..Self::BOUNDS {
            let mut bound = sorted[(i + 1) * last / Self::BOUNDS].saturating_add(1);
            if i > 0 && bound <= bounds[i - 1] {
                bound = bounds[i - 1].saturating_add(1);
            }
            bounds[i] = bound;
        }
        Some(Self { bounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_increasing(bins: &Bins) -> bool {
        bins.bounds().windows(2).all(|pair| pair[0] < pair[1])
    }

    #[test]
    fn test_identity_bins() {
        let bins = Bins::identity();
        assert_eq!(bins.bin_of(0), 0);
        assert_eq!(bins.bin_of(17), 17);
        assert_eq!(bins.bin_of(62), 62);
        assert_eq!(bins.bin_of(63), Bins::OVERFLOW);
        assert_eq!(bins.bin_of(1_000), Bins::OVERFLOW);
        assert_eq!(bins.last_bound(), 63);
    }

    #[test]
    fn test_bins_from_few_values_are_exact() {
        let values = [100, 100, 200, 300, 300, 300];
        let bins = Bins::from_values(&values, 300);
        assert!(is_increasing(&bins));
        assert_ne!(bins.bin_of(100), bins.bin_of(200));
        assert_ne!(bins.bin_of(200), bins.bin_of(300));
        assert!(bins.bin_of(300) < Bins::OVERFLOW);
    }

    #[test]
    fn test_bins_from_many_values_balance_rows() {
        let values: Vec<i32> = (0..6_300).map(|i| i * 3).collect();
        let bins = Bins::from_values(&values, 6_299 * 3);
        assert!(is_increasing(&bins));
        let mut counts = [0usize; Bins::COUNT];
        for &value in &values {
            counts[bins.bin_of(value)] += 1;
        }
        assert!(counts.iter().all(|&count| count <= 101));
    }

    #[test]
    fn test_bins_from_sample() {
        assert!(Bins::from_sample(&[]).is_none());
        let bins = Bins::from_sample(&[5; 10]).unwrap();
        assert!(is_increasing(&bins));
        assert_eq!(bins.bin_of(5), 0);

        let sample: Vec<i32> = (0..1_000).collect();
        let bins = Bins::from_sample(&sample).unwrap();
        assert!(is_increasing(&bins));
        assert_eq!(bins.last_bound(), 1_000);
    }
}
