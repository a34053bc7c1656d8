//! Precomputed grain amplitude window.

use std::f64::consts::PI;

// -------------------------------------------------------------------------------------------------

/// Number of entries in a [`WindowTable`].
pub const WINDOW_TABLE_SIZE: usize = 4096;

// -------------------------------------------------------------------------------------------------

/// Tukey style amplitude envelope lookup table: a flat center with raised cosine tapers at
/// both edges. Built once and shared by all grain voices.
///
/// The edge distance of each entry is derived from its integer index, so the table is exactly
/// symmetric: `table[i] == table[WINDOW_TABLE_SIZE - 1 - i]`.
#[derive(Debug, Clone)]
pub struct WindowTable {
    alpha: f32,
    table: Box<[f32]>,
}

impl WindowTable {
    pub const DEFAULT_ALPHA: f32 = 0.25;

    /// Build a new table. `alpha` is the fraction of the window occupied by each of the two
    /// tapers and gets clamped to `0.0..=0.5`.
    pub fn build(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 0.5)
        } else {
            Self::DEFAULT_ALPHA
        };
        let taper_width = alpha as f64;
        let last_index = WINDOW_TABLE_SIZE - 1;
        let table = (0..WINDOW_TABLE_SIZE)
            .map(|index| {
                let edge_distance = index.min(last_index - index) as f64 / last_index as f64;
                if edge_distance < taper_width {
                    (0.5 * (1.0 - (PI * edge_distance / taper_width).cos())) as f32
                } else {
                    1.0
                }
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { alpha, table }
    }

    /// The (clamped) taper fraction this table got built with.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Raw table values.
    pub fn values(&self) -> &[f32] {
        &self.table
    }

    /// Inverse grain length scaling for [`Self::gain`]: maps a grain's phase `0..grain_length`
    /// into the table's index range.
    #[inline]
    pub fn inverse_length(grain_length: u32) -> f64 {
        debug_assert!(grain_length > 0);
        (WINDOW_TABLE_SIZE - 1) as f64 / grain_length.max(1) as f64
    }

    /// Window gain for the given grain phase. `inv_grain_length` is the value returned by
    /// [`Self::inverse_length`] for the grain.
    #[inline]
    pub fn gain(&self, phase: u32, inv_grain_length: f64) -> f32 {
        let index = ((phase as f64 * inv_grain_length) as usize).min(WINDOW_TABLE_SIZE - 1);
        self.table[index]
    }
}

impl Default for WindowTable {
    fn default() -> Self {
        Self::build(Self::DEFAULT_ALPHA)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetry() {
        for alpha in [0.0, 0.01, 0.1, 0.25, 0.33, 0.5] {
            let window = WindowTable::build(alpha);
            let values = window.values();
            assert_eq!(values.len(), WINDOW_TABLE_SIZE);
            for i in 0..WINDOW_TABLE_SIZE {
                assert_eq!(
                    values[i].to_bits(),
                    values[WINDOW_TABLE_SIZE - 1 - i].to_bits(),
                    "asymmetric value at index {i} with alpha {alpha}"
                );
            }
        }
    }

    #[test]
    fn shape() {
        let window = WindowTable::build(0.25);
        let values = window.values();
        assert_eq!(values[0], 0.0);
        assert_eq!(values[WINDOW_TABLE_SIZE - 1], 0.0);
        assert_eq!(values[WINDOW_TABLE_SIZE / 2], 1.0);
        // monotonic rise within the first taper
        let taper_end = (0.25 * (WINDOW_TABLE_SIZE - 1) as f32) as usize;
        for i in 1..taper_end {
            assert!(values[i] >= values[i - 1]);
        }
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn rectangular_and_clamped() {
        let window = WindowTable::build(0.0);
        assert!(window.values().iter().all(|v| *v == 1.0));

        let window = WindowTable::build(2.0);
        assert_eq!(window.alpha(), 0.5);
        let window = WindowTable::build(f32::NAN);
        assert_eq!(window.alpha(), WindowTable::DEFAULT_ALPHA);
    }

    #[test]
    fn deterministic() {
        let a = WindowTable::build(0.3);
        let b = WindowTable::build(0.3);
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn gain_lookup() {
        let window = WindowTable::build(0.25);
        let grain_length = 1000;
        let inv = WindowTable::inverse_length(grain_length);
        assert_eq!(window.gain(0, inv), 0.0);
        assert_eq!(window.gain(grain_length / 2, inv), 1.0);
        // never reads out of bounds, even past the grain's end
        assert_eq!(window.gain(grain_length * 4, inv), 0.0);
    }
}
