//! TensorData trait - the storage side of a backend tensor.

use crate::error::{Error, Result};
use crate::shape::{Shape, Strides};

/// Realized tensor storage. Backends implement this; the graph layer only
/// reads through it.
pub trait TensorData: Clone + Send + Sync + 'static {
    fn shape(&self) -> &Shape;

    fn strides(&self) -> &Strides;

    fn numel(&self) -> usize {
        self.shape().numel()
    }

    /// True for a 0-dim tensor.
    fn is_scalar(&self) -> bool {
        self.shape().is_scalar()
    }

    fn is_contiguous(&self) -> bool {
        self.strides() == &self.shape().contiguous_strides()
    }

    /// Data as a contiguous row-major f32 slice.
    fn as_slice(&self) -> &[f32];

    fn as_slice_mut(&mut self) -> &mut [f32];

    /// The single value of a one-element tensor.
    fn scalar_value(&self) -> Result<f32> {
        match self.as_slice() {
            [v] => Ok(*v),
            _ => Err(Error::NotAScalar {
                shape: self.shape().clone(),
            }),
        }
    }
}
