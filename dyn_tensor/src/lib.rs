//! # dyn_tensor - dynamic reverse-mode autodiff with pluggable backends
//!
//! Every operation on a [`Tensor`] computes its value immediately and records
//! a graph node, so the graph grows one call at a time and can be
//! differentiated from any node.
//!
//! ## Overview
//!
//! - [`Shape`] and [`Strides`] - row-major shape and memory layout
//!   (axis 0 is the outermost axis)
//! - [`TensorData`] - storage trait implemented by backends
//! - [`Backend`] / [`BackendDevice`] - compute backend contract
//! - [`Tensor`] - reference-counted handle to a graph node
//! - [`Gradients`] - node->gradient map produced by [`Tensor::backward`]
//! - [`learner`] - SGD and Adam learners that update variables in place
//!
//! ## Example
//!
//! ```ignore
//! use dyn_tensor::prelude::*;
//! use dyn_backend_cpu::{CpuBackend, CpuDevice};
//!
//! let dev = CpuDevice;
//! let data = CpuBackend::from_vec(vec![1.0, 2.0], Shape::new(vec![2]), &dev)?;
//! let w = Tensor::<CpuBackend>::var("w", data);
//! let loss = w.mul(&w)?.sum(None, false)?;
//! let grads = loss.backward()?;
//! let mut sgd = Sgd::new(vec![w.clone()], 0.1);
//! sgd.update(&grads)?;
//! ```

pub mod backend;
pub mod backward;
pub mod error;
pub mod learner;
pub mod node;
pub mod shape;
pub mod tensor;

pub use backend::{Backend, BackendDevice, BinaryOp, CmpOp, ReduceOp, UnaryOp};
pub use backward::{GradientStore, Gradients};
pub use error::{Error, Result};
pub use node::{NodeId, Tensor, TensorOp};
pub use shape::{Shape, Strides};
pub use tensor::TensorData;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::{Backend, BackendDevice};
    pub use crate::backward::{GradientStore, Gradients};
    pub use crate::error::{Error, Result};
    pub use crate::learner::{Adam, Learner, Sgd};
    pub use crate::node::{NodeId, Tensor, TensorOp};
    pub use crate::shape::{Shape, Strides};
    pub use crate::tensor::TensorData;
}
