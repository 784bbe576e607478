//! Bidirectional flow estimation and per-time flow interpolation.
//!
//! The estimator predicts anchor-to-anchor flow once per pair. For each
//! requested intermediate time the interpolator linearly scales those flows
//! to the unknown time, refines them with a learned correction network, and
//! warps both anchors along the corrected flows.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ndarray::{concatenate, s, Array4, Axis};

use crate::network::SubNetwork;
use crate::types::{
    ensure_same_shape, BidirectionalFlow, FlowField, Frame, TimeCoefficient, VisibilityMap,
};
use crate::warp::{backward_warp, warp_frame};

/// Flow network contract: concat(A, B) in, stacked (forward, backward) out.
pub const FLOW_NET_IN_CHANNELS: usize = 6;
pub const FLOW_NET_OUT_CHANNELS: usize = 4;

/// Refinement network contract:
/// `[A(3), B(3), F_ab(2), F_ba(2), t(1)]` in,
/// `[dF_t->a(2), dF_t->b(2), v_a logit(1), v_b logit(1)]` out.
pub const REFINE_NET_IN_CHANNELS: usize = 11;
pub const REFINE_NET_OUT_CHANNELS: usize = 6;

/// Learned dense-optical-flow predictor over a frame pair.
pub struct FlowEstimator {
    net: Arc<dyn SubNetwork>,
}

impl FlowEstimator {
    pub fn new(net: Arc<dyn SubNetwork>) -> Result<Self> {
        if net.in_channels() != FLOW_NET_IN_CHANNELS || net.out_channels() != FLOW_NET_OUT_CHANNELS
        {
            bail!(
                "flow network must be {FLOW_NET_IN_CHANNELS}->{FLOW_NET_OUT_CHANNELS} channels, got {}->{}",
                net.in_channels(),
                net.out_channels()
            );
        }
        Ok(Self { net })
    }

    /// Channels 0-1 of the network output are the forward flow (A toward B),
    /// channels 2-3 the backward flow.
    pub fn estimate(&self, anchor_a: &Frame, anchor_b: &Frame) -> Result<BidirectionalFlow> {
        ensure_same_shape("anchor A", &anchor_a.view(), "anchor B", &anchor_b.view())?;

        let pair = concatenate(Axis(1), &[anchor_a.view(), anchor_b.view()])
            .context("failed to concatenate anchor pair for flow estimation")?;
        let out = self.net.forward(pair.view())?;

        Ok(BidirectionalFlow {
            forward: FlowField::new(out.slice(s![.., 0..2, .., ..]).to_owned())?,
            backward: FlowField::new(out.slice(s![.., 2..4, .., ..]).to_owned())?,
        })
    }
}

/// Refinement-network output, split into its four fixed channel groups.
#[derive(Debug, Clone)]
pub struct FlowRefinement {
    pub delta_flow_to_a: Array4<f32>,
    pub delta_flow_to_b: Array4<f32>,
    pub visibility_a_logit: Array4<f32>,
    pub visibility_b_logit: Array4<f32>,
}

impl FlowRefinement {
    pub fn split(out: Array4<f32>) -> Result<Self> {
        if out.shape()[1] != REFINE_NET_OUT_CHANNELS {
            bail!(
                "refinement output must have {REFINE_NET_OUT_CHANNELS} channels, got shape {:?}",
                out.shape()
            );
        }
        Ok(Self {
            delta_flow_to_a: out.slice(s![.., 0..2, .., ..]).to_owned(),
            delta_flow_to_b: out.slice(s![.., 2..4, .., ..]).to_owned(),
            visibility_a_logit: out.slice(s![.., 4..5, .., ..]).to_owned(),
            visibility_b_logit: out.slice(s![.., 5..6, .., ..]).to_owned(),
        })
    }
}

/// Everything the synthesizer needs for one intermediate time.
#[derive(Debug, Clone)]
pub struct InterpolatedFlows {
    pub flow_to_a: FlowField,
    pub flow_to_b: FlowField,
    pub visibility_a: VisibilityMap,
    pub visibility_b: VisibilityMap,
    /// Anchor A warped along `flow_to_a`.
    pub warped_a: Frame,
    /// Anchor B warped along `flow_to_b`.
    pub warped_b: Frame,
}

/// Time-conditioned flow interpolation with learned correction.
pub struct FlowInterpolator {
    refine: Arc<dyn SubNetwork>,
}

impl FlowInterpolator {
    pub fn new(refine: Arc<dyn SubNetwork>) -> Result<Self> {
        if refine.in_channels() != REFINE_NET_IN_CHANNELS
            || refine.out_channels() != REFINE_NET_OUT_CHANNELS
        {
            bail!(
                "refinement network must be {REFINE_NET_IN_CHANNELS}->{REFINE_NET_OUT_CHANNELS} channels, got {}->{}",
                refine.in_channels(),
                refine.out_channels()
            );
        }
        Ok(Self { refine })
    }

    pub fn interpolate(
        &self,
        anchor_a: &Frame,
        anchor_b: &Frame,
        flows: &BidirectionalFlow,
        t: &TimeCoefficient,
    ) -> Result<InterpolatedFlows> {
        ensure_same_shape("anchor A", &anchor_a.view(), "anchor B", &anchor_b.view())?;
        ensure_same_shape(
            "forward flow",
            &flows.forward.view(),
            "backward flow",
            &flows.backward.view(),
        )?;
        if t.batch() != anchor_a.batch() {
            bail!(
                "time coefficient batch {} does not match frame batch {}",
                t.batch(),
                anchor_a.batch()
            );
        }

        let (baseline_to_a, baseline_to_b) = baseline_flows(flows, t);

        let t_plane = broadcast_time_plane(t, anchor_a.height(), anchor_a.width());
        let refine_input = concatenate(
            Axis(1),
            &[
                anchor_a.view(),
                anchor_b.view(),
                flows.forward.view(),
                flows.backward.view(),
                t_plane.view(),
            ],
        )
        .context("failed to assemble refinement network input")?;

        let refinement = FlowRefinement::split(self.refine.forward(refine_input.view())?)?;

        let flow_to_a = FlowField::new(&baseline_to_a + &refinement.delta_flow_to_a)?;
        let flow_to_b = FlowField::new(&baseline_to_b + &refinement.delta_flow_to_b)?;

        // Bounded (0,1) activation on the raw logits; sigmoid is the
        // documented choice. Complementary normalization happens in the
        // synthesizer, not here.
        let visibility_a = VisibilityMap::new(sigmoid(&refinement.visibility_a_logit))?;
        let visibility_b = VisibilityMap::new(sigmoid(&refinement.visibility_b_logit))?;

        let warped_a = warp_frame(anchor_a, &flow_to_a)?;
        let warped_b = warp_frame(anchor_b, &flow_to_b)?;

        Ok(InterpolatedFlows {
            flow_to_a,
            flow_to_b,
            visibility_a,
            visibility_b,
            warped_a,
            warped_b,
        })
    }
}

/// Linear approximation of the intermediate flows:
/// `F_t->a = -(1-t)·t·F_ab + t²·F_ba` and
/// `F_t->b = (1-t)²·F_ab - t·(1-t)·F_ba`.
fn baseline_flows(flows: &BidirectionalFlow, t: &TimeCoefficient) -> (Array4<f32>, Array4<f32>) {
    let t_nchw = t.to_nchw();

    let coeff_a_fwd = t_nchw.mapv(|v| -(1.0 - v) * v);
    let coeff_a_bwd = t_nchw.mapv(|v| v * v);
    let coeff_b_fwd = t_nchw.mapv(|v| (1.0 - v) * (1.0 - v));
    let coeff_b_bwd = t_nchw.mapv(|v| -v * (1.0 - v));

    let f_ab = flows.forward.data();
    let f_ba = flows.backward.data();

    let to_a = &(f_ab * &coeff_a_fwd) + &(f_ba * &coeff_a_bwd);
    let to_b = &(f_ab * &coeff_b_fwd) + &(f_ba * &coeff_b_bwd);
    (to_a, to_b)
}

/// Broadcast per-batch coefficients to a `[B,1,H,W]` channel plane.
fn broadcast_time_plane(t: &TimeCoefficient, height: usize, width: usize) -> Array4<f32> {
    t.to_nchw()
        .broadcast((t.batch(), 1, height, width))
        .expect("[B,1,1,1] always broadcasts to [B,1,H,W]")
        .to_owned()
}

fn sigmoid(logits: &Array4<f32>) -> Array4<f32> {
    logits.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Warp an anchor pair toward each other along the estimated flows; these
/// reconstructions are auxiliary targets for the external loss.
pub fn anchor_reconstructions(
    anchor_a: &Frame,
    anchor_b: &Frame,
    flows: &BidirectionalFlow,
) -> Result<(Frame, Frame)> {
    let recon_a = Frame::new(backward_warp(&anchor_b.view(), &flows.forward.view())?)?;
    let recon_b = Frame::new(backward_warp(&anchor_a.view(), &flows.backward.view())?)?;
    Ok((recon_a, recon_b))
}
