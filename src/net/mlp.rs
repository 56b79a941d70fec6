// src/net/mlp.rs
//
// Two-hidden-layer MLP head shared by both network variants.
//
//   Linear(in, h) -> LeakyReLU -> Dropout(p)
//   Linear(h, h)  -> LeakyReLU -> Dropout(p)
//   Linear(h, 1)
//
// Dropout is inverted: surviving units are scaled by 1/keep during training,
// so evaluation mode is a plain deterministic forward pass with no rescaling.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const LEAKY_SLOPE: f32 = 0.01;

/// MLP weight blocks. Weight layout is input-major: `w[i * out + j]` connects
/// input i to output j.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpParams {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
    pub w3: Vec<f32>,
    pub b3: Vec<f32>,
}

impl MlpParams {
    pub fn zeros(input_dim: usize, hidden: usize) -> Self {
        Self {
            w1: vec![0.0; input_dim * hidden],
            b1: vec![0.0; hidden],
            w2: vec![0.0; hidden * hidden],
            b2: vec![0.0; hidden],
            w3: vec![0.0; hidden],
            b3: vec![0.0; 1],
        }
    }

    /// Glorot-uniform initialization.
    pub fn init(input_dim: usize, hidden: usize, rng: &mut ChaCha8Rng) -> Self {
        let mut p = Self::zeros(input_dim, hidden);
        init_uniform(&mut p.w1, input_dim, hidden, rng);
        init_uniform(&mut p.w2, hidden, hidden, rng);
        init_uniform(&mut p.w3, hidden, 1, rng);
        p
    }
}

pub(crate) fn init_uniform(w: &mut [f32], fan_in: usize, fan_out: usize, rng: &mut ChaCha8Rng) {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    for v in w.iter_mut() {
        *v = rng.gen_range(-limit..limit);
    }
}

/// Activations cached by a training-mode forward pass.
#[derive(Debug, Clone)]
pub struct MlpCache {
    pub x: Vec<f32>,
    pub z1: Vec<f32>,
    /// Dropout scale per unit: 0.0 (dropped) or 1/keep (kept).
    pub m1: Vec<f32>,
    pub h1: Vec<f32>,
    pub z2: Vec<f32>,
    pub m2: Vec<f32>,
    pub h2: Vec<f32>,
}

fn linear(x: &[f32], w: &[f32], b: &[f32], out_dim: usize) -> Vec<f32> {
    let in_dim = x.len();
    debug_assert_eq!(w.len(), in_dim * out_dim);
    let mut z = b.to_vec();
    for (i, &xi) in x.iter().enumerate() {
        if xi == 0.0 {
            continue;
        }
        let row = &w[i * out_dim..(i + 1) * out_dim];
        for (zj, &wij) in z.iter_mut().zip(row.iter()) {
            *zj += xi * wij;
        }
    }
    z
}

fn leaky_relu(z: &[f32]) -> Vec<f32> {
    z.iter()
        .map(|&v| if v > 0.0 { v } else { LEAKY_SLOPE * v })
        .collect()
}

fn dropout_mask(len: usize, drop_p: f32, rng: &mut ChaCha8Rng) -> Vec<f32> {
    if drop_p <= 0.0 {
        return vec![1.0; len];
    }
    let keep = 1.0 - drop_p;
    let scale = 1.0 / keep;
    (0..len)
        .map(|_| if rng.gen::<f32>() < keep { scale } else { 0.0 })
        .collect()
}

/// Deterministic evaluation forward pass (dropout disabled).
pub fn forward_eval(params: &MlpParams, x: &[f32], hidden: usize) -> f32 {
    let h1 = leaky_relu(&linear(x, &params.w1, &params.b1, hidden));
    let h2 = leaky_relu(&linear(&h1, &params.w2, &params.b2, hidden));
    let out = linear(&h2, &params.w3, &params.b3, 1);
    out[0]
}

/// Training forward pass with fresh dropout masks; caches everything the
/// backward pass needs.
pub fn forward_train(
    params: &MlpParams,
    x: Vec<f32>,
    hidden: usize,
    drop_p: f32,
    rng: &mut ChaCha8Rng,
) -> (f32, MlpCache) {
    let z1 = linear(&x, &params.w1, &params.b1, hidden);
    let a1 = leaky_relu(&z1);
    let m1 = dropout_mask(hidden, drop_p, rng);
    let h1: Vec<f32> = a1.iter().zip(&m1).map(|(a, m)| a * m).collect();

    let z2 = linear(&h1, &params.w2, &params.b2, hidden);
    let a2 = leaky_relu(&z2);
    let m2 = dropout_mask(hidden, drop_p, rng);
    let h2: Vec<f32> = a2.iter().zip(&m2).map(|(a, m)| a * m).collect();

    let out = linear(&h2, &params.w3, &params.b3, 1)[0];
    (
        out,
        MlpCache {
            x,
            z1,
            m1,
            h1,
            z2,
            m2,
            h2,
        },
    )
}

/// Backward pass for one cached step. `d_out` is the loss gradient at the
/// scalar output. Accumulates into `grads` and returns dL/dx.
pub fn backward(
    params: &MlpParams,
    cache: &MlpCache,
    d_out: f32,
    hidden: usize,
    grads: &mut MlpParams,
) -> Vec<f32> {
    // Output layer.
    grads.b3[0] += d_out;
    let mut d_h2 = vec![0.0f32; hidden];
    for j in 0..hidden {
        grads.w3[j] += d_out * cache.h2[j];
        d_h2[j] = d_out * params.w3[j];
    }

    // Dropout 2 + leaky ReLU 2.
    let d_z2: Vec<f32> = (0..hidden)
        .map(|j| {
            let slope = if cache.z2[j] > 0.0 { 1.0 } else { LEAKY_SLOPE };
            d_h2[j] * cache.m2[j] * slope
        })
        .collect();

    // Hidden layer 2.
    let mut d_h1 = vec![0.0f32; hidden];
    for i in 0..hidden {
        let hi = cache.h1[i];
        let row = &mut grads.w2[i * hidden..(i + 1) * hidden];
        let wrow = &params.w2[i * hidden..(i + 1) * hidden];
        let mut acc = 0.0f32;
        for j in 0..hidden {
            row[j] += d_z2[j] * hi;
            acc += d_z2[j] * wrow[j];
        }
        d_h1[i] = acc;
    }
    for j in 0..hidden {
        grads.b2[j] += d_z2[j];
    }

    // Dropout 1 + leaky ReLU 1.
    let d_z1: Vec<f32> = (0..hidden)
        .map(|i| {
            let slope = if cache.z1[i] > 0.0 { 1.0 } else { LEAKY_SLOPE };
            d_h1[i] * cache.m1[i] * slope
        })
        .collect();

    // Input layer.
    let in_dim = cache.x.len();
    let mut d_x = vec![0.0f32; in_dim];
    for i in 0..in_dim {
        let xi = cache.x[i];
        let row = &mut grads.w1[i * hidden..(i + 1) * hidden];
        let wrow = &params.w1[i * hidden..(i + 1) * hidden];
        let mut acc = 0.0f32;
        for j in 0..hidden {
            row[j] += d_z1[j] * xi;
            acc += d_z1[j] * wrow[j];
        }
        d_x[i] = acc;
    }
    for j in 0..hidden {
        grads.b1[j] += d_z1[j];
    }
    d_x
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_eval_forward_is_deterministic() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let params = MlpParams::init(4, 8, &mut rng);
        let x = vec![0.1, -0.2, 0.3, 0.9];
        let a = forward_eval(&params, &x, 8);
        let b = forward_eval(&params, &x, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_train_forward_dropout_varies() {
        let mut init_rng = ChaCha8Rng::seed_from_u64(3);
        let params = MlpParams::init(4, 32, &mut init_rng);
        let x = vec![0.5, -0.5, 1.0, 0.25];
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let (a, _) = forward_train(&params, x.clone(), 32, 0.5, &mut rng);
        let (b, _) = forward_train(&params, x, 32, 0.5, &mut rng);
        // Fresh masks make consecutive training passes differ.
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_dropout_train_matches_eval() {
        let mut init_rng = ChaCha8Rng::seed_from_u64(5);
        let params = MlpParams::init(3, 16, &mut init_rng);
        let x = vec![0.2, 0.4, -0.6];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (train_out, _) = forward_train(&params, x.clone(), 16, 0.0, &mut rng);
        let eval_out = forward_eval(&params, &x, 16);
        assert!((train_out - eval_out).abs() < 1e-6);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let hidden = 6;
        let in_dim = 4;
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut params = MlpParams::init(in_dim, hidden, &mut rng);
        let x = vec![0.3, -0.7, 0.9, 0.1];

        // Dropout off so the loss is a deterministic function of the params.
        let mut fwd_rng = ChaCha8Rng::seed_from_u64(0);
        let (_, cache) = forward_train(&params, x.clone(), hidden, 0.0, &mut fwd_rng);
        let mut grads = MlpParams::zeros(in_dim, hidden);
        let d_x = backward(&params, &cache, 1.0, hidden, &mut grads);

        let eps = 1e-2f32;
        let loss = |p: &MlpParams, x: &[f32]| forward_eval(p, x, hidden) as f64;

        for idx in [0, in_dim * hidden / 2, in_dim * hidden - 1] {
            let orig = params.w1[idx];
            params.w1[idx] = orig + eps;
            let plus = loss(&params, &x);
            params.w1[idx] = orig - eps;
            let minus = loss(&params, &x);
            params.w1[idx] = orig;
            let numeric = ((plus - minus) / (2.0 * eps as f64)) as f32;
            assert!(
                (numeric - grads.w1[idx]).abs() < 0.1 * numeric.abs().max(0.2),
                "w1[{idx}]: numeric {numeric} vs analytic {}",
                grads.w1[idx]
            );
        }

        let mut x_fd = x.clone();
        for idx in 0..in_dim {
            let orig = x_fd[idx];
            x_fd[idx] = orig + eps;
            let plus = loss(&params, &x_fd);
            x_fd[idx] = orig - eps;
            let minus = loss(&params, &x_fd);
            x_fd[idx] = orig;
            let numeric = ((plus - minus) / (2.0 * eps as f64)) as f32;
            assert!(
                (numeric - d_x[idx]).abs() < 0.1 * numeric.abs().max(0.2),
                "dx[{idx}]: numeric {numeric} vs analytic {}",
                d_x[idx]
            );
        }
    }
}
