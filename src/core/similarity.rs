/// Opaque per-image similarity descriptor: a 32 x 32 grid per color
/// channel holding the average color of the corresponding part of the
/// image. Comparing two descriptors averages the cell differences, so
/// 1.0 is an exact match and 0.0 an exact opposite (all black vs all
/// white). Matches above ~0.85 are significant; above 0.95 reliably
/// finds images re-saved with other formats, dimensions or compression.
///
/// The engine never builds descriptors from pixels itself; an external
/// collaborator fills the grids and hands them over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityData {
    r: Vec<u8>,
    g: Vec<u8>,
    b: Vec<u8>,
}

pub const SIM_GRID: usize = 32;
pub const SIM_CELLS: usize = SIM_GRID * SIM_GRID;

const MAX_DIFF: f64 = 255.0 * SIM_CELLS as f64 * 3.0;

impl SimilarityData {
    /// Build a descriptor from three channel grids of [`SIM_CELLS`]
    /// cells each. Returns `None` on a size mismatch.
    pub fn from_channels(r: Vec<u8>, g: Vec<u8>, b: Vec<u8>) -> Option<Self> {
        if r.len() != SIM_CELLS || g.len() != SIM_CELLS || b.len() != SIM_CELLS {
            return None;
        }
        Some(Self { r, g, b })
    }

    /// Grayscale descriptor; the single channel is used for all three.
    pub fn from_luma(luma: Vec<u8>) -> Option<Self> {
        if luma.len() != SIM_CELLS {
            return None;
        }
        Some(Self {
            r: luma.clone(),
            g: luma.clone(),
            b: luma,
        })
    }

    /// Flat descriptor with every cell set to `value`. Mostly useful for
    /// synthetic data in tests and benchmarks.
    pub fn uniform(value: u8) -> Self {
        Self {
            r: vec![value; SIM_CELLS],
            g: vec![value; SIM_CELLS],
            b: vec![value; SIM_CELLS],
        }
    }

    fn diff_sum(&self, other: &Self, abort_above: Option<u32>) -> Option<u32> {
        let mut sum: u32 = 0;
        for row in 0..SIM_GRID {
            let start = row * SIM_GRID;
            for i in start..start + SIM_GRID {
                sum += u32::from(self.r[i].abs_diff(other.r[i]));
                sum += u32::from(self.g[i].abs_diff(other.g[i]));
                sum += u32::from(self.b[i].abs_diff(other.b[i]));
            }
            if let Some(limit) = abort_above {
                if sum > limit {
                    return None;
                }
            }
        }
        Some(sum)
    }

    /// Precise comparison; the returned fraction is in [0.0, 1.0].
    pub fn compare(&self, other: &Self) -> f64 {
        let sum = self
            .diff_sum(other, None)
            .unwrap_or(MAX_DIFF as u32);
        1.0 - f64::from(sum) / MAX_DIFF
    }

    /// Comparison with a cutoff: aborts early and returns 0.0 once the
    /// accumulated difference can no longer reach `min`. Above the
    /// cutoff the result equals [`SimilarityData::compare`], so the fast
    /// and precise paths always agree on the match decision.
    pub fn compare_fast(&self, other: &Self, min: f64) -> f64 {
        let budget = ((1.0 - min) * MAX_DIFF).floor() as u32;
        match self.diff_sum(other, Some(budget)) {
            Some(sum) => 1.0 - f64::from(sum) / MAX_DIFF,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_descriptors() {
        let a = SimilarityData::uniform(128);
        assert_eq!(a.compare(&a.clone()), 1.0);
        assert_eq!(a.compare_fast(&a.clone(), 0.95), 1.0);
    }

    #[test]
    fn test_opposite_descriptors() {
        let black = SimilarityData::uniform(0);
        let white = SimilarityData::uniform(255);
        assert_eq!(black.compare(&white), 0.0);
        assert_eq!(black.compare_fast(&white, 0.85), 0.0);
    }

    #[test]
    fn test_fast_agrees_with_precise_above_threshold() {
        // ~0.922 similarity: 20/255 average difference per channel.
        let a = SimilarityData::uniform(100);
        let b = SimilarityData::uniform(120);
        let precise = a.compare(&b);
        assert!(precise > 0.90 && precise < 0.95);
        assert_eq!(a.compare_fast(&b, 0.90), precise);
        // Below the cutoff the fast path reports 0.0, still a non-match.
        assert_eq!(a.compare_fast(&b, 0.95), 0.0);
    }

    #[test]
    fn test_luma_and_channel_constructors() {
        assert!(SimilarityData::from_luma(vec![0; 10]).is_none());
        assert!(SimilarityData::from_channels(
            vec![0; SIM_CELLS],
            vec![0; SIM_CELLS],
            vec![0; 10]
        )
        .is_none());

        let a = SimilarityData::from_luma(vec![42; SIM_CELLS]).unwrap();
        let b = SimilarityData::uniform(42);
        assert_eq!(a.compare(&b), 1.0);
    }
}
