//! Backward image warping with bilinear resampling.
//!
//! Each output pixel (x, y) is sampled from the input at
//! (x + dx, y + dy) where (dx, dy) comes from the flow field. Boundary
//! handling is clamp-to-edge: source coordinates are clamped into the image
//! rectangle before sampling, so extreme flows at the borders replicate edge
//! pixels instead of producing NaN or zero fringes.
//!
//! The operator is a pure function of its inputs; there is no shared state
//! between call sites, so the same function backs the anchor reconstruction
//! warps and the per-intermediate-time candidate warps.

use anyhow::Result;
use ndarray::{Array4, ArrayView4};

use crate::types::{ensure_same_geometry, FlowField, Frame};

/// Warp an arbitrary-channel NCHW tensor along a `[B,2,H,W]` flow field.
pub fn backward_warp(
    input: &ArrayView4<'_, f32>,
    flow: &ArrayView4<'_, f32>,
) -> Result<Array4<f32>> {
    ensure_same_geometry("warp input", input, "flow field", flow)?;

    let (batch, channels, height, width) = {
        let s = input.shape();
        (s[0], s[1], s[2], s[3])
    };
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    let mut output = Array4::<f32>::zeros((batch, channels, height, width));

    for b in 0..batch {
        for y in 0..height {
            for x in 0..width {
                let dx = flow[[b, 0, y, x]];
                let dy = flow[[b, 1, y, x]];

                // Non-finite displacements degrade to the identity sample.
                let sx = if dx.is_finite() { x as f32 + dx } else { x as f32 };
                let sy = if dy.is_finite() { y as f32 + dy } else { y as f32 };

                let sx = sx.clamp(0.0, max_x);
                let sy = sy.clamp(0.0, max_y);

                let x0 = sx.floor() as usize;
                let y0 = sy.floor() as usize;
                let x1 = (x0 + 1).min(width - 1);
                let y1 = (y0 + 1).min(height - 1);
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                for c in 0..channels {
                    let top = (1.0 - fx) * input[[b, c, y0, x0]] + fx * input[[b, c, y0, x1]];
                    let bottom = (1.0 - fx) * input[[b, c, y1, x0]] + fx * input[[b, c, y1, x1]];
                    output[[b, c, y, x]] = (1.0 - fy) * top + fy * bottom;
                }
            }
        }
    }

    Ok(output)
}

/// Typed wrapper for warping an image frame.
pub fn warp_frame(frame: &Frame, flow: &FlowField) -> Result<Frame> {
    Frame::new(backward_warp(&frame.view(), &flow.view())?)
}
