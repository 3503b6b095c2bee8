//! Learners: gradient-step services bound to a fixed parameter list.
//!
//! A learner is built over the variables it owns and, on each `update`,
//! replaces their values in place using whatever gradients the supplied store
//! holds for them. Variables without a gradient are left untouched.

mod adam;
mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

use crate::backend::Backend;
use crate::backward::GradientStore;
use crate::error::Result;
use crate::node::Tensor;

pub trait Learner<B: Backend> {
    /// The variables this learner updates.
    fn parameters(&self) -> &[Tensor<B>];

    fn learning_rate(&self) -> f32;

    /// Apply one step. Returns how many parameters were changed.
    fn update(&mut self, grads: &dyn GradientStore<B>) -> Result<usize>;
}
