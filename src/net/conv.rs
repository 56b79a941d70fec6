// src/net/conv.rs
//
// Strided 2-D convolution with SAME padding, forward and backward.
//
// Layout conventions:
// - inputs are channel-major [C][H][W], flattened row-major
// - weights are [out_c][in_c][k][k], flattened
// - SAME padding: out = ceil(in / stride); total padding is
//   max(0, (out - 1) * stride + k - in), split with the smaller half first.

/// Output spatial extent of a SAME-padded strided convolution.
pub fn same_out(len: usize, stride: usize) -> usize {
    len.div_ceil(stride)
}

fn pad_before(len: usize, out: usize, k: usize, stride: usize) -> isize {
    let total = ((out - 1) * stride + k).saturating_sub(len);
    (total / 2) as isize
}

/// Intermediate activations cached for the backward pass.
#[derive(Debug, Clone)]
pub struct ConvLayerCache {
    /// Pre-activation output [out_c * oh * ow].
    pub z: Vec<f32>,
    pub oh: usize,
    pub ow: usize,
}

/// Forward convolution. Returns pre-activation output and its spatial dims;
/// the caller applies the nonlinearity.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_same(
    input: &[f32],
    in_c: usize,
    ih: usize,
    iw: usize,
    weight: &[f32],
    bias: &[f32],
    out_c: usize,
    k: usize,
    stride: usize,
) -> ConvLayerCache {
    debug_assert_eq!(input.len(), in_c * ih * iw);
    debug_assert_eq!(weight.len(), out_c * in_c * k * k);
    debug_assert_eq!(bias.len(), out_c);

    let oh = same_out(ih, stride);
    let ow = same_out(iw, stride);
    let ph = pad_before(ih, oh, k, stride);
    let pw = pad_before(iw, ow, k, stride);

    let mut z = vec![0.0f32; out_c * oh * ow];
    for o in 0..out_c {
        for y in 0..oh {
            for x in 0..ow {
                let mut sum = bias[o];
                for c in 0..in_c {
                    for dy in 0..k {
                        let iy = y as isize * stride as isize - ph + dy as isize;
                        if iy < 0 || iy >= ih as isize {
                            continue;
                        }
                        for dx in 0..k {
                            let ix = x as isize * stride as isize - pw + dx as isize;
                            if ix < 0 || ix >= iw as isize {
                                continue;
                            }
                            sum += input[c * ih * iw + iy as usize * iw + ix as usize]
                                * weight[((o * in_c + c) * k + dy) * k + dx];
                        }
                    }
                }
                z[(o * oh + y) * ow + x] = sum;
            }
        }
    }
    ConvLayerCache { z, oh, ow }
}

/// Backward convolution with respect to the pre-activation gradient `d_z`.
///
/// Accumulates into `d_weight` / `d_bias` and returns the gradient with
/// respect to the input (needed to chain into the previous layer).
#[allow(clippy::too_many_arguments)]
pub fn conv2d_same_backward(
    input: &[f32],
    in_c: usize,
    ih: usize,
    iw: usize,
    weight: &[f32],
    out_c: usize,
    k: usize,
    stride: usize,
    d_z: &[f32],
    oh: usize,
    ow: usize,
    d_weight: &mut [f32],
    d_bias: &mut [f32],
) -> Vec<f32> {
    debug_assert_eq!(d_z.len(), out_c * oh * ow);

    let ph = pad_before(ih, oh, k, stride);
    let pw = pad_before(iw, ow, k, stride);

    let mut d_input = vec![0.0f32; in_c * ih * iw];
    for o in 0..out_c {
        for y in 0..oh {
            for x in 0..ow {
                let g = d_z[(o * oh + y) * ow + x];
                if g == 0.0 {
                    continue;
                }
                d_bias[o] += g;
                for c in 0..in_c {
                    for dy in 0..k {
                        let iy = y as isize * stride as isize - ph + dy as isize;
                        if iy < 0 || iy >= ih as isize {
                            continue;
                        }
                        for dx in 0..k {
                            let ix = x as isize * stride as isize - pw + dx as isize;
                            if ix < 0 || ix >= iw as isize {
                                continue;
                            }
                            let in_idx = c * ih * iw + iy as usize * iw + ix as usize;
                            let w_idx = ((o * in_c + c) * k + dy) * k + dx;
                            d_weight[w_idx] += g * input[in_idx];
                            d_input[in_idx] += g * weight[w_idx];
                        }
                    }
                }
            }
        }
    }
    d_input
}
