//! Plain stochastic gradient descent.

use crate::backend::Backend;
use crate::backward::GradientStore;
use crate::error::{Error, Result};
use crate::node::Tensor;
use crate::tensor::TensorData;

use super::Learner;

/// `param -= lr * grad`.
pub struct Sgd<B: Backend> {
    pub lr: f32,
    params: Vec<Tensor<B>>,
}

impl<B: Backend> Sgd<B> {
    pub fn new(params: Vec<Tensor<B>>, lr: f32) -> Self {
        Sgd { lr, params }
    }
}

impl<B: Backend> Learner<B> for Sgd<B> {
    fn parameters(&self) -> &[Tensor<B>] {
        &self.params
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn update(&mut self, grads: &dyn GradientStore<B>) -> Result<usize> {
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

            let mut value = param.value();
            for (p, g) in value.as_slice_mut().iter_mut().zip(grad.as_slice()) {
                *p -= self.lr * g;
            }
            param.assign(value)?;
            updated += 1;
        }
        log::debug!("sgd step: lr {}, {} parameters updated", self.lr, updated);
        Ok(updated)
    }
}
