//! Tensor newtypes shared across the interpolation pipeline.
//!
//! Everything is NCHW `f32`. Wrappers exist so that channel-count mistakes
//! (a flow field where an image is expected, etc.) are caught at construction
//! instead of deep inside a warp loop.

use anyhow::{bail, Result};
use ndarray::{Array1, Array4, ArrayView4};

/// A dense image tensor `[B, 3, H, W]`, values normalized to [0,1].
#[derive(Debug, Clone, PartialEq)]
pub struct Frame(Array4<f32>);

/// A dense displacement map `[B, 2, H, W]`: channel 0 = dx, channel 1 = dy,
/// both in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField(Array4<f32>);

/// Forward and backward anchor-to-anchor flows, as produced by the flow
/// estimator from one frame pair.
#[derive(Debug, Clone)]
pub struct BidirectionalFlow {
    /// Flow from anchor A toward anchor B.
    pub forward: FlowField,
    /// Flow from anchor B toward anchor A.
    pub backward: FlowField,
}

/// Per-pixel reliability weight `[B, 1, H, W]`, values in [0,1].
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityMap(Array4<f32>);

/// One temporal position per batch element, each strictly inside (0,1).
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCoefficient(Array1<f32>);

/// Predicted frames in the caller-supplied request order.
#[derive(Debug, Clone)]
pub struct PredictionSet(Vec<Frame>);

/// Tensors the external training loss needs but which are not part of the
/// visible prediction: the anchor-to-anchor flows, the two anchor
/// reconstruction warps, and the per-intermediate-time warped candidates.
#[derive(Debug, Clone)]
pub struct AuxiliaryOutputs {
    pub flow_forward: FlowField,
    pub flow_backward: FlowField,
    /// Anchor B warped along the forward flow (reconstruction target for A).
    pub recon_a: Frame,
    /// Anchor A warped along the backward flow (reconstruction target for B).
    pub recon_b: Frame,
    /// Anchor A warped toward each requested intermediate time, request order.
    pub warped_to_a: Vec<Frame>,
    /// Anchor B warped toward each requested intermediate time, request order.
    pub warped_to_b: Vec<Frame>,
}

impl Frame {
    pub fn new(data: Array4<f32>) -> Result<Self> {
        ensure_channels("Frame", &data, 3)?;
        Ok(Self(data))
    }

    /// Constant-color frame, mainly useful for tests and smoke runs.
    pub fn from_fill(batch: usize, height: usize, width: usize, value: f32) -> Self {
        Self(Array4::from_elem((batch, 3, height, width), value))
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.0
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array4<f32> {
        self.0
    }

    pub fn batch(&self) -> usize {
        self.0.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.0.shape()[2]
    }

    pub fn width(&self) -> usize {
        self.0.shape()[3]
    }
}

impl FlowField {
    pub fn new(data: Array4<f32>) -> Result<Self> {
        ensure_channels("FlowField", &data, 2)?;
        Ok(Self(data))
    }

    pub fn zeros_like(frame: &Frame) -> Self {
        Self(Array4::zeros((
            frame.batch(),
            2,
            frame.height(),
            frame.width(),
        )))
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.0
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }
}

impl VisibilityMap {
    pub fn new(data: Array4<f32>) -> Result<Self> {
        ensure_channels("VisibilityMap", &data, 1)?;
        Ok(Self(data))
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.0
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }
}

impl TimeCoefficient {
    /// Per-batch-element coefficients. Every value must lie strictly in
    /// (0,1); the grid endpoints belong to the anchors and never reach the
    /// model.
    pub fn new(values: Array1<f32>) -> Result<Self> {
        if values.is_empty() {
            bail!("TimeCoefficient requires at least one batch element");
        }
        for (i, &t) in values.iter().enumerate() {
            if !(t > 0.0 && t < 1.0) {
                bail!(
                    "TimeCoefficient out of range at batch element {i}: {t} (expected 0 < t < 1)"
                );
            }
        }
        Ok(Self(values))
    }

    /// Same coefficient for every batch element.
    pub fn uniform(t: f32, batch: usize) -> Result<Self> {
        Self::new(Array1::from_elem(batch, t))
    }

    pub fn batch(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self) -> &Array1<f32> {
        &self.0
    }

    /// Shape `[B,1,1,1]`, ready to broadcast against any NCHW tensor of the
    /// same batch size.
    pub fn to_nchw(&self) -> Array4<f32> {
        self.0
            .clone()
            .into_shape_with_order((self.0.len(), 1, 1, 1))
            .expect("reshape [B] to [B,1,1,1] cannot fail")
    }
}

impl PredictionSet {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self(frames)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.0
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.0
    }
}

fn ensure_channels(kind: &str, data: &Array4<f32>, channels: usize) -> Result<()> {
    let shape = data.shape();
    if shape[1] != channels {
        bail!(
            "{kind} expects {channels} channels, got shape [{}, {}, {}, {}]",
            shape[0],
            shape[1],
            shape[2],
            shape[3]
        );
    }
    if shape[0] == 0 || shape[2] == 0 || shape[3] == 0 {
        bail!("{kind} has an empty dimension: {shape:?}");
    }
    Ok(())
}

/// Eager shape check with expected-vs-actual context in the error.
pub fn ensure_same_shape(
    label_a: &str,
    a: &ArrayView4<'_, f32>,
    label_b: &str,
    b: &ArrayView4<'_, f32>,
) -> Result<()> {
    if a.shape() != b.shape() {
        bail!(
            "shape mismatch: {label_a} is {:?} but {label_b} is {:?}",
            a.shape(),
            b.shape()
        );
    }
    Ok(())
}

/// Check that two NCHW tensors agree on batch and spatial dims (channel
/// counts may differ, e.g. a frame against its flow field).
pub fn ensure_same_geometry(
    label_a: &str,
    a: &ArrayView4<'_, f32>,
    label_b: &str,
    b: &ArrayView4<'_, f32>,
) -> Result<()> {
    let (sa, sb) = (a.shape(), b.shape());
    if sa[0] != sb[0] || sa[2] != sb[2] || sa[3] != sb[3] {
        bail!(
            "geometry mismatch: {label_a} is {sa:?} but {label_b} is {sb:?} (batch/height/width must agree)"
        );
    }
    Ok(())
}
