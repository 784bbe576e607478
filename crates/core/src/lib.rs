//! Core crate for the slomo frame-interpolation model.
//!
//! Implements the forward computation graph: bidirectional optical-flow
//! estimation, time-conditioned flow interpolation, backward warping, and
//! visibility-gated frame synthesis. The learned sub-networks themselves are
//! opaque [`network::SubNetwork`] transforms (ONNX sessions in production).

pub mod backend;
pub mod config;
pub mod flow;
pub mod logging;
pub mod network;
pub mod pipeline;
pub mod synthesis;
pub mod time_grid;
pub mod types;
pub mod warp;
