// src/net/mod.rs
//
// Reward network: a feature extractor feeding a shared two-hidden-layer MLP
// head. The extractor is a configuration value selected by observation rank,
// not a subclass:
//
//   Vector observations -> Flatten      (obs ++ action into the MLP)
//   Image observations  -> ConvStack    (two strided SAME convs, then MLP)
//
// Parameters live in an immutable NetParams value; training clones the
// current snapshot, applies a gradient step and republishes. The MLP input
// width for the conv variant is computed analytically at construction
// (ceiling division by the stride factors), because weights are allocated
// eagerly and must be exact.

pub mod adam;
pub mod conv;
pub mod mlp;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::env::ObsShape;

pub use adam::Adam;
pub use mlp::MlpParams;

pub const DEFAULT_HIDDEN: usize = 64;
pub const DEFAULT_DROPOUT: f32 = 0.5;

const CONV1_CHANNELS: usize = 4;
const CONV1_KERNEL: usize = 8;
const CONV1_STRIDE: usize = 4;
const CONV2_CHANNELS: usize = 8;
const CONV2_KERNEL: usize = 6;
const CONV2_STRIDE: usize = 3;

/// Which feature extractor feeds the MLP head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Observation is flattened and concatenated with the action directly.
    Flatten,
    /// Two strided SAME convolutions, ReLU after each, then flatten.
    ConvStack {
        in_channels: usize,
        in_h: usize,
        in_w: usize,
        out_h: usize,
        out_w: usize,
    },
}

/// Architecture: everything needed to allocate, checkpoint and validate a
/// parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetArch {
    pub obs_shape: ObsShape,
    pub action_dim: usize,
    pub hidden: usize,
    pub feature: FeatureKind,
    /// MLP input width, fixed at construction.
    pub mlp_in: usize,
}

impl NetArch {
    /// Select the extractor by observation shape and size the MLP head
    /// analytically.
    pub fn for_shapes(obs_shape: ObsShape, action_dim: usize, hidden: usize) -> Self {
        match obs_shape {
            ObsShape::Vector { len } => Self {
                obs_shape,
                action_dim,
                hidden,
                feature: FeatureKind::Flatten,
                mlp_in: len + action_dim,
            },
            ObsShape::Image {
                height,
                width,
                channels,
            } => {
                // A missing channel dimension is promoted to one channel.
                let in_channels = channels.max(1);
                let out_h = conv::same_out(conv::same_out(height, CONV1_STRIDE), CONV2_STRIDE);
                let out_w = conv::same_out(conv::same_out(width, CONV1_STRIDE), CONV2_STRIDE);
                Self {
                    obs_shape,
                    action_dim,
                    hidden,
                    feature: FeatureKind::ConvStack {
                        in_channels,
                        in_h: height,
                        in_w: width,
                        out_h,
                        out_w,
                    },
                    mlp_in: CONV2_CHANNELS * out_h * out_w + action_dim,
                }
            }
        }
    }

    /// Compact shape description used in checkpoint mismatch errors.
    pub fn describe(&self) -> String {
        format!(
            "obs={:?} act={} hidden={} mlp_in={}",
            self.obs_shape, self.action_dim, self.hidden, self.mlp_in
        )
    }
}

/// Convolutional extractor weights. Layouts: w1 [4][in_c][8][8],
/// w2 [8][4][6][6], flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvParams {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

impl ConvParams {
    fn zeros(in_channels: usize) -> Self {
        Self {
            w1: vec![0.0; CONV1_CHANNELS * in_channels * CONV1_KERNEL * CONV1_KERNEL],
            b1: vec![0.0; CONV1_CHANNELS],
            w2: vec![0.0; CONV2_CHANNELS * CONV1_CHANNELS * CONV2_KERNEL * CONV2_KERNEL],
            b2: vec![0.0; CONV2_CHANNELS],
        }
    }

    fn init(in_channels: usize, rng: &mut ChaCha8Rng) -> Self {
        let mut p = Self::zeros(in_channels);
        mlp::init_uniform(
            &mut p.w1,
            in_channels * CONV1_KERNEL * CONV1_KERNEL,
            CONV1_CHANNELS * CONV1_KERNEL * CONV1_KERNEL,
            rng,
        );
        mlp::init_uniform(
            &mut p.w2,
            CONV1_CHANNELS * CONV2_KERNEL * CONV2_KERNEL,
            CONV2_CHANNELS * CONV2_KERNEL * CONV2_KERNEL,
            rng,
        );
        p
    }
}

/// A complete, immutable weight snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetParams {
    pub arch: NetArch,
    pub conv: Option<ConvParams>,
    pub mlp: MlpParams,
}

impl NetParams {
    /// Allocate and initialize from a seed.
    pub fn init(arch: NetArch, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let conv = match arch.feature {
            FeatureKind::Flatten => None,
            FeatureKind::ConvStack { in_channels, .. } => {
                Some(ConvParams::init(in_channels, &mut rng))
            }
        };
        let mlp = MlpParams::init(arch.mlp_in, arch.hidden, &mut rng);
        Self { arch, conv, mlp }
    }

    /// Zeroed gradient accumulator with the same block structure.
    pub fn zeros_like(&self) -> Self {
        let conv = match self.arch.feature {
            FeatureKind::Flatten => None,
            FeatureKind::ConvStack { in_channels, .. } => Some(ConvParams::zeros(in_channels)),
        };
        Self {
            arch: self.arch.clone(),
            conv,
            mlp: MlpParams::zeros(self.arch.mlp_in, self.arch.hidden),
        }
    }

    /// Parameter blocks in a stable order (conv first when present).
    pub fn blocks(&self) -> Vec<&Vec<f32>> {
        let mut out = Vec::with_capacity(10);
        if let Some(c) = &self.conv {
            out.extend([&c.w1, &c.b1, &c.w2, &c.b2]);
        }
        let m = &self.mlp;
        out.extend([&m.w1, &m.b1, &m.w2, &m.b2, &m.w3, &m.b3]);
        out
    }

    pub fn blocks_mut(&mut self) -> Vec<&mut Vec<f32>> {
        let mut out = Vec::with_capacity(10);
        if let Some(c) = &mut self.conv {
            out.extend([&mut c.w1, &mut c.b1, &mut c.w2, &mut c.b2]);
        }
        let m = &mut self.mlp;
        out.extend([
            &mut m.w1, &mut m.b1, &mut m.w2, &mut m.b2, &mut m.w3, &mut m.b3,
        ]);
        out
    }

    /// Block shape list for checkpoint validation.
    pub fn block_names() -> &'static [&'static str] {
        &[
            "conv_w1", "conv_b1", "conv_w2", "conv_b2", "mlp_w1", "mlp_b1", "mlp_w2", "mlp_b2",
            "mlp_w3", "mlp_b3",
        ]
    }

    /// Names matching [`NetParams::blocks`] order for this architecture.
    pub fn block_names_for(&self) -> Vec<&'static str> {
        let all = Self::block_names();
        if self.conv.is_some() {
            all.to_vec()
        } else {
            all[4..].to_vec()
        }
    }
}

/// Per-step caches produced in training mode.
pub struct StepCache {
    conv1: Option<conv::ConvLayerCache>,
    conv2: Option<conv::ConvLayerCache>,
    /// Raw (promoted) conv input, kept for the conv backward pass.
    conv_input: Option<Vec<f32>>,
    mlp: mlp::MlpCache,
}

fn conv_features(
    params: &NetParams,
    obs: &[f32],
) -> (Vec<f32>, conv::ConvLayerCache, conv::ConvLayerCache) {
    let FeatureKind::ConvStack {
        in_channels,
        in_h,
        in_w,
        ..
    } = params.arch.feature
    else {
        unreachable!("conv_features called on a flatten architecture");
    };
    let cp = params.conv.as_ref().expect("conv params missing");

    let c1 = conv::conv2d_same(
        obs,
        in_channels,
        in_h,
        in_w,
        &cp.w1,
        &cp.b1,
        CONV1_CHANNELS,
        CONV1_KERNEL,
        CONV1_STRIDE,
    );
    let a1: Vec<f32> = c1.z.iter().map(|&v| v.max(0.0)).collect();

    let c2 = conv::conv2d_same(
        &a1,
        CONV1_CHANNELS,
        c1.oh,
        c1.ow,
        &cp.w2,
        &cp.b2,
        CONV2_CHANNELS,
        CONV2_KERNEL,
        CONV2_STRIDE,
    );
    let a2: Vec<f32> = c2.z.iter().map(|&v| v.max(0.0)).collect();
    (a2, c1, c2)
}

/// Score one (observation, action) pair.
///
/// `train_rng = None` requests deterministic evaluation mode: dropout is
/// disabled and no cache is produced. With a rng, dropout is live and the
/// returned cache feeds [`backward_step`].
pub fn score_step(
    params: &NetParams,
    obs: &[f32],
    act: &[f32],
    train_rng: Option<&mut ChaCha8Rng>,
) -> (f32, Option<StepCache>) {
    debug_assert_eq!(obs.len(), params.arch.obs_shape.flat_len());

    match params.arch.feature {
        FeatureKind::Flatten => {
            let mut x = Vec::with_capacity(params.arch.mlp_in);
            x.extend_from_slice(obs);
            x.extend_from_slice(act);
            match train_rng {
                None => (mlp::forward_eval(&params.mlp, &x, params.arch.hidden), None),
                Some(rng) => {
                    let (out, cache) =
                        mlp::forward_train(&params.mlp, x, params.arch.hidden, DEFAULT_DROPOUT, rng);
                    (
                        out,
                        Some(StepCache {
                            conv1: None,
                            conv2: None,
                            conv_input: None,
                            mlp: cache,
                        }),
                    )
                }
            }
        }
        FeatureKind::ConvStack { .. } => {
            let (features, c1, c2) = conv_features(params, obs);
            let mut x = Vec::with_capacity(params.arch.mlp_in);
            x.extend_from_slice(&features);
            x.extend_from_slice(act);
            match train_rng {
                None => (mlp::forward_eval(&params.mlp, &x, params.arch.hidden), None),
                Some(rng) => {
                    let (out, cache) =
                        mlp::forward_train(&params.mlp, x, params.arch.hidden, DEFAULT_DROPOUT, rng);
                    (
                        out,
                        Some(StepCache {
                            conv1: Some(c1),
                            conv2: Some(c2),
                            conv_input: Some(obs.to_vec()),
                            mlp: cache,
                        }),
                    )
                }
            }
        }
    }
}

/// Backpropagate a scalar output gradient through one cached step,
/// accumulating into `grads`.
pub fn backward_step(params: &NetParams, cache: &StepCache, d_out: f32, grads: &mut NetParams) {
    let d_x = mlp::backward(
        &params.mlp,
        &cache.mlp,
        d_out,
        params.arch.hidden,
        &mut grads.mlp,
    );

    let FeatureKind::ConvStack {
        in_channels,
        in_h,
        in_w,
        ..
    } = params.arch.feature
    else {
        return;
    };

    let cp = params.conv.as_ref().expect("conv params missing");
    let gp = grads.conv.as_mut().expect("conv grads missing");
    let c1 = cache.conv1.as_ref().expect("conv1 cache missing");
    let c2 = cache.conv2.as_ref().expect("conv2 cache missing");
    let input = cache.conv_input.as_ref().expect("conv input missing");

    // dL/d(a2) is the feature slice of dL/dx; chain through ReLU 2.
    let feat_len = c2.z.len();
    let d_z2: Vec<f32> = (0..feat_len)
        .map(|i| if c2.z[i] > 0.0 { d_x[i] } else { 0.0 })
        .collect();

    let a1: Vec<f32> = c1.z.iter().map(|&v| v.max(0.0)).collect();
    let d_a1 = conv::conv2d_same_backward(
        &a1,
        CONV1_CHANNELS,
        c1.oh,
        c1.ow,
        &cp.w2,
        CONV2_CHANNELS,
        CONV2_KERNEL,
        CONV2_STRIDE,
        &d_z2,
        c2.oh,
        c2.ow,
        &mut gp.w2,
        &mut gp.b2,
    );

    let d_z1: Vec<f32> = c1
        .z
        .iter()
        .zip(d_a1.iter())
        .map(|(&z, &d)| if z > 0.0 { d } else { 0.0 })
        .collect();

    let _ = conv::conv2d_same_backward(
        input,
        in_channels,
        in_h,
        in_w,
        &cp.w1,
        CONV1_CHANNELS,
        CONV1_KERNEL,
        CONV1_STRIDE,
        &d_z1,
        c1.oh,
        c1.ow,
        &mut gp.w1,
        &mut gp.b1,
    );
}
