//! Opaque learned sub-networks.
//!
//! The U-Net-style internals of the flow estimator and the two refinement
//! networks are not modeled here; each is an [`SubNetwork`] that maps an
//! NCHW tensor to another NCHW tensor with fixed channel counts. Production
//! uses [`OnnxNetwork`] (an `ort::Session` per sub-network); tests use
//! [`ZeroNetwork`], which reduces the model to its closed-form parts.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use ndarray::{Array4, ArrayView4, Ix4};
use ort::{session::Session, value::TensorRef};
use tracing::debug;

use crate::backend::{build_session, InferenceBackend, SessionConfig};

/// A learned dense transform `[B, in, H, W] -> [B, out, H, W]`.
///
/// Implementations are deterministic given their weights and keep no state
/// across calls; batch and spatial dims pass through unchanged.
pub trait SubNetwork: Send + Sync {
    fn in_channels(&self) -> usize;
    fn out_channels(&self) -> usize;
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>>;
}

/// Reject an input whose channel dim disagrees with the declared contract.
pub fn ensure_input_channels(
    net_name: &str,
    expected: usize,
    input: &ArrayView4<'_, f32>,
) -> Result<()> {
    let shape = input.shape();
    if shape[1] != expected {
        bail!(
            "{net_name}: input channel mismatch: expected {expected}, got shape {shape:?}"
        );
    }
    Ok(())
}

/// ONNX-backed sub-network.
///
/// The session runs under a mutex; `ort` requires `&mut Session` for
/// inference but the network itself is observably stateless.
pub struct OnnxNetwork {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    in_channels: usize,
    out_channels: usize,
}

impl OnnxNetwork {
    /// Load a single-input single-output model and bind it to the declared
    /// channel contract. The first graph input/output names are used.
    pub fn load(
        name: &str,
        model_path: &Path,
        backend: &InferenceBackend,
        trt_cache_dir: Option<&Path>,
        in_channels: usize,
        out_channels: usize,
    ) -> Result<Self> {
        let config = SessionConfig {
            model_path,
            backend,
            trt_cache_dir,
        };
        let session = build_session(&config)?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .with_context(|| format!("{name}: model has no inputs"))?;
        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .with_context(|| format!("{name}: model has no outputs"))?;

        debug!(
            network = name,
            model = %model_path.display(),
            input = %input_name,
            output = %output_name,
            in_channels,
            out_channels,
            "Loaded ONNX sub-network"
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            in_channels,
            out_channels,
        })
    }
}

impl SubNetwork for OnnxNetwork {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        ensure_input_channels(&self.name, self.in_channels, &input)?;

        let contiguous = input.as_standard_layout().to_owned();
        let tensor = TensorRef::from_array_view(contiguous.view())?;

        let mut session = self.session.lock().unwrap();
        let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix4>()
            .with_context(|| format!("{}: model output is not a 4-D tensor", self.name))?;

        let shape = output.shape();
        if shape[1] != self.out_channels
            || shape[0] != input.shape()[0]
            || shape[2] != input.shape()[2]
            || shape[3] != input.shape()[3]
        {
            bail!(
                "{}: model output shape {shape:?} does not match contract [{}, {}, {}, {}]",
                self.name,
                input.shape()[0],
                self.out_channels,
                input.shape()[2],
                input.shape()[3]
            );
        }

        Ok(output)
    }
}

/// Null network: correct shape, all-zero output.
///
/// With every sub-network zeroed the model degenerates to pure linear flow
/// interpolation and time-weighted blending, which is exactly what the
/// pipeline sanity tests exercise.
#[derive(Debug, Clone)]
pub struct ZeroNetwork {
    in_channels: usize,
    out_channels: usize,
}

impl ZeroNetwork {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
        }
    }
}

impl SubNetwork for ZeroNetwork {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        ensure_input_channels("ZeroNetwork", self.in_channels, &input)?;
        let shape = input.shape();
        Ok(Array4::zeros((
            shape[0],
            self.out_channels,
            shape[2],
            shape[3],
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_zero_network_shapes() {
        let net = ZeroNetwork::new(6, 4);
        assert_eq!(net.in_channels(), 6);
        assert_eq!(net.out_channels(), 4);

        let input = Array4::<f32>::ones((2, 6, 8, 8));
        let output = net.forward(input.view()).unwrap();
        assert_eq!(output.shape(), &[2, 4, 8, 8]);
        assert!(output.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_network_rejects_channel_mismatch() {
        let net = ZeroNetwork::new(6, 4);
        let input = Array4::<f32>::ones((1, 5, 8, 8));
        let err = net.forward(input.view()).unwrap_err();
        assert!(err.to_string().contains("channel mismatch"));
    }

    #[test]
    fn test_ensure_input_channels_message() {
        let input = Array4::<f32>::zeros((1, 3, 2, 2));
        let err = ensure_input_channels("flow_comp", 6, &input.view()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("flow_comp"));
        assert!(msg.contains("expected 6"));
    }
}
