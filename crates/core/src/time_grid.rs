//! Equally spaced time grid mapping integer frame indices to coefficients.
//!
//! For a window of `n_frames` intermediate frames the grid holds
//! `n_frames + 2` points over [0,1]; rows 0 and `n_frames + 1` are the two
//! anchors and are never valid lookup targets. The grid is immutable and
//! built once per pipeline, not process-wide state.

use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    slices: Vec<f32>,
    n_frames: usize,
}

impl TimeGrid {
    pub fn new(n_frames: usize) -> Result<Self> {
        if n_frames == 0 {
            bail!("time grid requires at least one intermediate frame");
        }
        let points = n_frames + 2;
        let step = 1.0 / (points - 1) as f32;
        let slices = (0..points).map(|i| i as f32 * step).collect();
        Ok(Self { slices, n_frames })
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Coefficient for a frame index. Valid indices are `1..=n_frames`; the
    /// endpoint rows are reserved for the anchors.
    pub fn coefficient(&self, index: usize) -> Result<f32> {
        if index < 1 || index > self.n_frames {
            bail!(
                "frame index {index} out of range: expected 1..={} (endpoints are the anchors)",
                self.n_frames
            );
        }
        Ok(self.slices[index])
    }

    /// Validate a whole request up front so a bad index fails before any
    /// network runs.
    pub fn coefficients(&self, indices: &[usize]) -> Result<Vec<f32>> {
        indices.iter().map(|&i| self.coefficient(i)).collect()
    }
}
