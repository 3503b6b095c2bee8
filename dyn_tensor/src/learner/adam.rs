//! Adam (adaptive moment estimation).

use std::collections::HashMap;

use crate::backend::Backend;
use crate::backward::GradientStore;
use crate::error::{Error, Result};
use crate::node::{NodeId, Tensor};
use crate::tensor::TensorData;

use super::Learner;

pub struct Adam<B: Backend> {
    pub lr: f32,
    /// Exponential decay rate for the first moment.
    pub beta1: f32,
    /// Exponential decay rate for the second moment.
    pub beta2: f32,
    pub eps: f32,
    params: Vec<Tensor<B>>,
    m: HashMap<NodeId, Vec<f32>>,
    v: HashMap<NodeId, Vec<f32>>,
    /// Step counter, shared by all parameters.
    t: i32,
}

impl<B: Backend> Adam<B> {
    /// Adam with beta1 = 0.9, beta2 = 0.999, eps = 1e-8.
    pub fn new(params: Vec<Tensor<B>>, lr: f32) -> Self {
        Self::with_params(params, lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(params: Vec<Tensor<B>>, lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Adam {
            lr,
            beta1,
            beta2,
            eps,
            params,
            m: HashMap::new(),
            v: HashMap::new(),
            t: 0,
        }
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> i32 {
        self.t
    }
}

impl<B: Backend> Learner<B> for Adam<B> {
    fn parameters(&self) -> &[Tensor<B>] {
        &self.params
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn update(&mut self, grads: &dyn GradientStore<B>) -> Result<usize> {
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t);

        let mut updated = 0;
        for param in &self.params {
            let Some(grad) = grads.grad(param.id()) else {
                continue;
            };
            if grad.shape() != param.shape() {
                return Err(Error::ShapeMismatch {
                    expected: param.shape().clone(),
                    got: grad.shape().clone(),
                });
            }

            let n = param.numel();
            let m = self.m.entry(param.id()).or_insert_with(|| vec![0.0; n]);
            let v = self.v.entry(param.id()).or_insert_with(|| vec![0.0; n]);

            let mut value = param.value();
            let data = value.as_slice_mut();
            for (i, &g) in grad.as_slice().iter().enumerate() {
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;

                let m_hat = m[i] / bias_correction1;
                let v_hat = v[i] / bias_correction2;
                data[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
            param.assign(value)?;
            updated += 1;
        }
        log::debug!("adam step {}: lr {}, {} parameters updated", self.t, self.lr, updated);
        Ok(updated)
    }
}
