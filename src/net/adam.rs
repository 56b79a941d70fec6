// src/net/adam.rs
//
// Adam optimizer over index-aligned parameter blocks.

/// Per-block first/second moment state. Blocks are matched to parameters by
/// position, so callers must pass blocks in a stable order.
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    t: u64,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    fn ensure_slot(slot: &mut Vec<f32>, len: usize) {
        if slot.len() != len {
            slot.clear();
            slot.resize(len, 0.0);
        }
    }

    /// Apply one update. `params` and `grads` must be block-aligned.
    pub fn step(&mut self, params: &mut [&mut Vec<f32>], grads: &[&Vec<f32>]) {
        assert_eq!(params.len(), grads.len(), "param/grad block count mismatch");

        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        if self.m.len() < params.len() {
            self.m.resize(params.len(), Vec::new());
            self.v.resize(params.len(), Vec::new());
        }

        for (idx, (param, grad)) in params.iter_mut().zip(grads.iter()).enumerate() {
            debug_assert_eq!(param.len(), grad.len());
            Self::ensure_slot(&mut self.m[idx], grad.len());
            Self::ensure_slot(&mut self.v[idx], grad.len());

            for i in 0..grad.len() {
                let g = grad[i];
                self.m[idx][i] = self.beta1 * self.m[idx][i] + (1.0 - self.beta1) * g;
                self.v[idx][i] = self.beta2 * self.v[idx][i] + (1.0 - self.beta2) * g * g;

                let m_hat = self.m[idx][i] / bc1;
                let v_hat = self.v[idx][i] / bc2;
                param[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adam_descends_quadratic() {
        // Minimize f(x) = x^2 from x = 3.
        let mut x = vec![3.0f32];
        let mut adam = Adam::new(0.1);
        for _ in 0..200 {
            let grad = vec![2.0 * x[0]];
            adam.step(&mut [&mut x], &[&grad]);
        }
        assert!(x[0].abs() < 0.1, "x did not converge: {}", x[0]);
    }

    #[test]
    fn test_first_step_is_lr_sized() {
        // Bias correction makes the first update ~lr * sign(grad).
        let mut x = vec![1.0f32];
        let mut adam = Adam::new(0.01);
        adam.step(&mut [&mut x], &[&vec![5.0]]);
        assert!((x[0] - 0.99).abs() < 1e-4);
    }
}
