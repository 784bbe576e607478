//! Visibility-gated blending of warped candidates plus learned refinement.
//!
//! The blend weight for the candidate warped from anchor A is `(1-t)·V_a`
//! and for anchor B `t·V_b`, normalized per pixel with an epsilon guard so
//! doubly-occluded pixels (both visibilities near zero) degrade to a plain
//! time-weighted mix instead of dividing by zero. A learned residual network
//! then corrects the blend; the final prediction is clamped to [0,1].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ndarray::{concatenate, Array4, Axis};

use crate::flow::InterpolatedFlows;
use crate::network::SubNetwork;
use crate::types::{Frame, TimeCoefficient};

/// Synthesis network contract:
/// `[blend(3), warped_a(3), warped_b(3), F_t->a(2), F_t->b(2), V_a(1), V_b(1), t(1)]`
/// in, RGB residual out.
pub const SYNTH_NET_IN_CHANNELS: usize = 16;
pub const SYNTH_NET_OUT_CHANNELS: usize = 3;

/// Guard against a vanishing visibility denominator.
const VISIBILITY_EPSILON: f32 = 1e-6;

pub struct FrameSynthesizer {
    refine: Arc<dyn SubNetwork>,
}

impl FrameSynthesizer {
    pub fn new(refine: Arc<dyn SubNetwork>) -> Result<Self> {
        if refine.in_channels() != SYNTH_NET_IN_CHANNELS
            || refine.out_channels() != SYNTH_NET_OUT_CHANNELS
        {
            bail!(
                "synthesis network must be {SYNTH_NET_IN_CHANNELS}->{SYNTH_NET_OUT_CHANNELS} channels, got {}->{}",
                refine.in_channels(),
                refine.out_channels()
            );
        }
        Ok(Self { refine })
    }

    pub fn synthesize(&self, interp: &InterpolatedFlows, t: &TimeCoefficient) -> Result<Frame> {
        if t.batch() != interp.warped_a.batch() {
            bail!(
                "time coefficient batch {} does not match candidate batch {}",
                t.batch(),
                interp.warped_a.batch()
            );
        }

        let t_nchw = t.to_nchw();
        let one_minus_t = t_nchw.mapv(|v| 1.0 - v);

        // [B,1,H,W] weights; the epsilon is split across the numerators in
        // proportion to the time factor, so weight_a + weight_b == 1 at every
        // pixel and a doubly-occluded pixel degrades to the plain
        // time-weighted mix.
        let raw_a = interp.visibility_a.data() * &one_minus_t;
        let raw_b = interp.visibility_b.data() * &t_nchw;
        let denom = (&raw_a + &raw_b).mapv(|v| v + VISIBILITY_EPSILON);
        let num_a = &raw_a + &one_minus_t.mapv(|v| v * VISIBILITY_EPSILON);
        let num_b = &raw_b + &t_nchw.mapv(|v| v * VISIBILITY_EPSILON);
        let weight_a = &num_a / &denom;
        let weight_b = &num_b / &denom;

        let blend = &(interp.warped_a.data() * &weight_a) + &(interp.warped_b.data() * &weight_b);

        let height = interp.warped_a.height();
        let width = interp.warped_a.width();
        let t_plane = t_nchw
            .broadcast((t.batch(), 1, height, width))
            .expect("[B,1,1,1] always broadcasts to [B,1,H,W]")
            .to_owned();

        let context = concatenate(
            Axis(1),
            &[
                blend.view(),
                interp.warped_a.view(),
                interp.warped_b.view(),
                interp.flow_to_a.view(),
                interp.flow_to_b.view(),
                interp.visibility_a.view(),
                interp.visibility_b.view(),
                t_plane.view(),
            ],
        )
        .context("failed to assemble synthesis network input")?;

        let residual = self.refine.forward(context.view())?;
        let corrected = &blend + &residual;

        Frame::new(clamp_unit(corrected))
    }
}

/// Final output guard: no NaN or out-of-range value may escape.
fn clamp_unit(data: Array4<f32>) -> Array4<f32> {
    data.mapv(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::InterpolatedFlows;
    use crate::network::ZeroNetwork;
    use crate::types::{FlowField, VisibilityMap};
    use ndarray::Array4;

    fn zero_synthesizer() -> FrameSynthesizer {
        FrameSynthesizer::new(Arc::new(ZeroNetwork::new(
            SYNTH_NET_IN_CHANNELS,
            SYNTH_NET_OUT_CHANNELS,
        )))
        .unwrap()
    }

    fn candidates(
        batch: usize,
        value_a: f32,
        value_b: f32,
        vis_a: f32,
        vis_b: f32,
    ) -> InterpolatedFlows {
        let warped_a = Frame::from_fill(batch, 4, 4, value_a);
        let warped_b = Frame::from_fill(batch, 4, 4, value_b);
        InterpolatedFlows {
            flow_to_a: FlowField::zeros_like(&warped_a),
            flow_to_b: FlowField::zeros_like(&warped_b),
            visibility_a: VisibilityMap::new(Array4::from_elem((batch, 1, 4, 4), vis_a)).unwrap(),
            visibility_b: VisibilityMap::new(Array4::from_elem((batch, 1, 4, 4), vis_b)).unwrap(),
            warped_a,
            warped_b,
        }
    }

    #[test]
    fn test_midpoint_blend_of_constant_frames() {
        let interp = candidates(1, 0.2, 0.8, 0.5, 0.5);
        let t = TimeCoefficient::uniform(0.5, 1).unwrap();
        let frame = zero_synthesizer().synthesize(&interp, &t).unwrap();
        for &v in frame.data() {
            assert!((v - 0.5).abs() < 1e-4, "expected 0.5 blend, got {v}");
        }
    }

    #[test]
    fn test_near_zero_time_dominated_by_anchor_a() {
        let interp = candidates(1, 0.0, 1.0, 0.5, 0.5);
        let t = TimeCoefficient::uniform(0.01, 1).unwrap();
        let frame = zero_synthesizer().synthesize(&interp, &t).unwrap();
        for &v in frame.data() {
            assert!(v < 0.05, "t -> 0 should weight anchor A, got {v}");
        }
    }

    #[test]
    fn test_near_one_time_dominated_by_anchor_b() {
        let interp = candidates(1, 0.0, 1.0, 0.5, 0.5);
        let t = TimeCoefficient::uniform(0.99, 1).unwrap();
        let frame = zero_synthesizer().synthesize(&interp, &t).unwrap();
        for &v in frame.data() {
            assert!(v > 0.95, "t -> 1 should weight anchor B, got {v}");
        }
    }

    #[test]
    fn test_visibility_gates_the_blend() {
        // B fully occluded at every pixel: prediction must follow A even at
        // t = 0.5.
        let interp = candidates(1, 0.25, 0.75, 1.0, 0.0);
        let t = TimeCoefficient::uniform(0.5, 1).unwrap();
        let frame = zero_synthesizer().synthesize(&interp, &t).unwrap();
        for &v in frame.data() {
            assert!((v - 0.25).abs() < 1e-4);
        }
    }

    #[test]
    fn test_degenerate_visibility_falls_back_to_time_mix() {
        // Both candidates fully occluded: the epsilon guard degrades the
        // blend to the plain time-weighted mix, never NaN.
        let interp = candidates(1, 0.25, 0.75, 0.0, 0.0);
        let t = TimeCoefficient::uniform(0.5, 1).unwrap();
        let frame = zero_synthesizer().synthesize(&interp, &t).unwrap();
        for &v in frame.data() {
            assert!(v.is_finite());
            assert!((v - 0.5).abs() < 1e-4, "expected 0.5 time mix, got {v}");
        }
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        for (vis_a, vis_b) in [(0.9, 0.1), (0.5, 0.5), (1e-8, 1e-8), (0.0, 0.0)] {
            let interp = candidates(1, 0.0, 1.0, vis_a, vis_b);
            let t = TimeCoefficient::uniform(0.3, 1).unwrap();
            let t_nchw = t.to_nchw();
            let one_minus_t = t_nchw.mapv(|v| 1.0 - v);
            let raw_a = interp.visibility_a.data() * &one_minus_t;
            let raw_b = interp.visibility_b.data() * &t_nchw;
            let denom = (&raw_a + &raw_b).mapv(|v| v + VISIBILITY_EPSILON);
            let num_a = &raw_a + &one_minus_t.mapv(|v| v * VISIBILITY_EPSILON);
            let num_b = &raw_b + &t_nchw.mapv(|v| v * VISIBILITY_EPSILON);
            let sum = &(&num_a / &denom) + &(&num_b / &denom);
            for &v in &sum {
                assert!(
                    (v - 1.0).abs() < 1e-5,
                    "weights must sum to 1 (vis_a={vis_a}, vis_b={vis_b}), got {v}"
                );
            }
        }
    }

    #[test]
    fn test_output_clamped_to_unit_range() {
        // Candidates slightly out of range after warping should still clamp.
        let mut interp = candidates(1, 1.0, 1.0, 0.5, 0.5);
        interp.warped_a = Frame::new(Array4::from_elem((1, 3, 4, 4), 1.5)).unwrap();
        let t = TimeCoefficient::uniform(0.5, 1).unwrap();
        let frame = zero_synthesizer().synthesize(&interp, &t).unwrap();
        for &v in frame.data() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_rejects_batch_mismatch() {
        let interp = candidates(2, 0.2, 0.8, 0.5, 0.5);
        let t = TimeCoefficient::uniform(0.5, 1).unwrap();
        let err = zero_synthesizer().synthesize(&interp, &t).unwrap_err();
        assert!(err.to_string().contains("batch"));
    }
}
