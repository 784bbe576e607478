//! End-to-end interpolation for one anchor pair.
//!
//! Runs the flow estimator once, then derives each requested intermediate
//! frame through the interpolator and synthesizer, preserving the caller's
//! request order. Also assembles the auxiliary tensors the external training
//! loss consumes. Pure function of (anchors, weights, indices): nothing is
//! cached between invocations.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use crate::flow::{anchor_reconstructions, FlowEstimator, FlowInterpolator};
use crate::synthesis::FrameSynthesizer;
use crate::time_grid::TimeGrid;
use crate::types::{
    ensure_same_shape, AuxiliaryOutputs, Frame, PredictionSet, TimeCoefficient,
};

pub struct InterpolationPipeline {
    estimator: FlowEstimator,
    interpolator: FlowInterpolator,
    synthesizer: FrameSynthesizer,
    grid: TimeGrid,
}

impl InterpolationPipeline {
    pub fn new(
        estimator: FlowEstimator,
        interpolator: FlowInterpolator,
        synthesizer: FrameSynthesizer,
        grid: TimeGrid,
    ) -> Self {
        Self {
            estimator,
            interpolator,
            synthesizer,
            grid,
        }
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Interpolate every requested frame index between the two anchors.
    ///
    /// All shape and index validation happens up front, before any network
    /// runs; a bad request fails fast with expected-vs-actual context.
    pub fn interpolate(
        &self,
        anchor_a: &Frame,
        anchor_b: &Frame,
        indices: &[usize],
    ) -> Result<(PredictionSet, AuxiliaryOutputs)> {
        ensure_same_shape("anchor A", &anchor_a.view(), "anchor B", &anchor_b.view())?;
        let coefficients = self
            .grid
            .coefficients(indices)
            .context("invalid frame index in interpolation request")?;

        let batch = anchor_a.batch();
        let started = Instant::now();

        let flows = self.estimator.estimate(anchor_a, anchor_b)?;
        let flow_ms = started.elapsed().as_secs_f64() * 1000.0;

        // Anchor-to-anchor reconstruction warps are loss auxiliaries and do
        // not depend on the requested times.
        let (recon_a, recon_b) = anchor_reconstructions(anchor_a, anchor_b, &flows)?;

        let mut predictions = Vec::with_capacity(indices.len());
        let mut warped_to_a = Vec::with_capacity(indices.len());
        let mut warped_to_b = Vec::with_capacity(indices.len());

        for (&index, &t) in indices.iter().zip(&coefficients) {
            let step_started = Instant::now();
            let t = TimeCoefficient::uniform(t, batch)?;

            let interp = self
                .interpolator
                .interpolate(anchor_a, anchor_b, &flows, &t)?;
            let prediction = self.synthesizer.synthesize(&interp, &t)?;

            debug!(
                index,
                t = t.values()[0],
                step_ms = format!("{:.1}", step_started.elapsed().as_secs_f64() * 1000.0),
                "interpolated intermediate frame"
            );

            warped_to_a.push(interp.warped_a);
            warped_to_b.push(interp.warped_b);
            predictions.push(prediction);
        }

        debug!(
            requested = indices.len(),
            batch,
            flow_ms = format!("{flow_ms:.1}"),
            total_ms = format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0),
            "interpolation pass complete"
        );

        let auxiliary = AuxiliaryOutputs {
            flow_forward: flows.forward,
            flow_backward: flows.backward,
            recon_a,
            recon_b,
            warped_to_a,
            warped_to_b,
        };

        Ok((PredictionSet::new(predictions), auxiliary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{
        FlowEstimator, FlowInterpolator, FLOW_NET_IN_CHANNELS, FLOW_NET_OUT_CHANNELS,
        REFINE_NET_IN_CHANNELS, REFINE_NET_OUT_CHANNELS,
    };
    use crate::network::ZeroNetwork;
    use crate::synthesis::{FrameSynthesizer, SYNTH_NET_IN_CHANNELS, SYNTH_NET_OUT_CHANNELS};
    use ndarray::{s, Array4};
    use std::sync::Arc;

    fn zero_pipeline(n_frames: usize) -> InterpolationPipeline {
        InterpolationPipeline::new(
            FlowEstimator::new(Arc::new(ZeroNetwork::new(
                FLOW_NET_IN_CHANNELS,
                FLOW_NET_OUT_CHANNELS,
            )))
            .unwrap(),
            FlowInterpolator::new(Arc::new(ZeroNetwork::new(
                REFINE_NET_IN_CHANNELS,
                REFINE_NET_OUT_CHANNELS,
            )))
            .unwrap(),
            FrameSynthesizer::new(Arc::new(ZeroNetwork::new(
                SYNTH_NET_IN_CHANNELS,
                SYNTH_NET_OUT_CHANNELS,
            )))
            .unwrap(),
            TimeGrid::new(n_frames).unwrap(),
        )
    }

    #[test]
    fn test_prediction_count_and_shape_match_request() {
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.2);
        let b = Frame::from_fill(1, 4, 4, 0.8);

        let (predictions, aux) = pipeline.interpolate(&a, &b, &[3, 1, 7]).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(aux.warped_to_a.len(), 3);
        assert_eq!(aux.warped_to_b.len(), 3);
        for frame in predictions.frames() {
            assert_eq!(frame.data().shape(), a.data().shape());
        }
    }

    #[test]
    fn test_midpoint_constant_blend_sanity() {
        // Zero-weight networks reduce the model to the linear blend: two
        // constant anchors at 0.2 and 0.8 requested at t = 0.5 give 0.5.
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.2);
        let b = Frame::from_fill(1, 4, 4, 0.8);

        let (predictions, _) = pipeline.interpolate(&a, &b, &[5]).unwrap();
        for &v in predictions.frames()[0].data() {
            assert!((v - 0.5).abs() < 1e-4, "expected uniform 0.5, got {v}");
        }
    }

    #[test]
    fn test_request_order_preserved() {
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.0);
        let b = Frame::from_fill(1, 4, 4, 1.0);

        // Out-of-order request: predicted brightness must follow t per slot.
        let (predictions, _) = pipeline.interpolate(&a, &b, &[8, 2, 5]).unwrap();
        let brightness: Vec<f32> = predictions
            .frames()
            .iter()
            .map(|f| f.data()[[0, 0, 0, 0]])
            .collect();
        assert!((brightness[0] - 0.8).abs() < 1e-4);
        assert!((brightness[1] - 0.2).abs() < 1e-4);
        assert!((brightness[2] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_index_fails_before_any_prediction() {
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.2);
        let b = Frame::from_fill(1, 4, 4, 0.8);

        let err = pipeline.interpolate(&a, &b, &[3, 10]).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("invalid frame index"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_anchor_shape_mismatch_rejected_eagerly() {
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.2);
        let b = Frame::from_fill(1, 6, 4, 0.8);
        let err = pipeline.interpolate(&a, &b, &[5]).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn test_empty_request_yields_empty_predictions_with_auxiliaries() {
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.2);
        let b = Frame::from_fill(1, 4, 4, 0.8);

        let (predictions, aux) = pipeline.interpolate(&a, &b, &[]).unwrap();
        assert!(predictions.is_empty());
        assert!(aux.warped_to_a.is_empty());
        // Reconstruction warps exist regardless of the per-index loop.
        assert_eq!(aux.recon_a.data().shape(), a.data().shape());
        assert_eq!(aux.recon_b.data().shape(), b.data().shape());
    }

    #[test]
    fn test_zero_flow_reconstructions_swap_anchors() {
        let pipeline = zero_pipeline(9);
        let a = Frame::from_fill(1, 4, 4, 0.3);
        let b = Frame::from_fill(1, 4, 4, 0.7);
        let (_, aux) = pipeline.interpolate(&a, &b, &[5]).unwrap();
        assert_eq!(aux.recon_a, b);
        assert_eq!(aux.recon_b, a);
        assert!(aux.flow_forward.data().iter().all(|&v| v == 0.0));
        assert!(aux.flow_backward.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_batch_of_two_matches_two_singles() {
        let pipeline = zero_pipeline(9);

        // Distinct per-element content so cross-contamination would show.
        let mut data_a = Array4::<f32>::zeros((2, 3, 4, 4));
        data_a.slice_mut(s![0, .., .., ..]).fill(0.1);
        data_a.slice_mut(s![1, .., .., ..]).fill(0.3);
        let mut data_b = Array4::<f32>::zeros((2, 3, 4, 4));
        data_b.slice_mut(s![0, .., .., ..]).fill(0.9);
        data_b.slice_mut(s![1, .., .., ..]).fill(0.5);

        let a = Frame::new(data_a.clone()).unwrap();
        let b = Frame::new(data_b.clone()).unwrap();
        let (batched, _) = pipeline.interpolate(&a, &b, &[5]).unwrap();

        for element in 0..2 {
            let single_a =
                Frame::new(data_a.slice(s![element..element + 1, .., .., ..]).to_owned()).unwrap();
            let single_b =
                Frame::new(data_b.slice(s![element..element + 1, .., .., ..]).to_owned()).unwrap();
            let (single, _) = pipeline.interpolate(&single_a, &single_b, &[5]).unwrap();

            let batched_slice = batched.frames()[0]
                .data()
                .slice(s![element..element + 1, .., .., ..])
                .to_owned();
            for (x, y) in batched_slice.iter().zip(single.frames()[0].data().iter()) {
                assert!((x - y).abs() < 1e-6, "batch element {element} diverged: {x} vs {y}");
            }
        }
    }
}
