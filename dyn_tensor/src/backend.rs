//! Backend trait - abstraction for compute backends.
//!
//! Elementwise, comparison and reduction kernels are dispatched through small
//! op enums so a backend implements one entry point per family.

use std::fmt;

use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::TensorData;

/// Elementwise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Relu,
    Sigmoid,
    Tanh,
}

/// Elementwise binary operations (numpy-style broadcasting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Reductions over a set of axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
}

/// Comparisons producing 0.0/1.0 masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Eq,
}

/// A place where tensor data lives.
pub trait BackendDevice: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Human-readable device name, e.g. `"cpu"`.
    fn name(&self) -> String;
}

/// Backend trait for tensor computation.
pub trait Backend: Clone + Send + Sync + 'static {
    /// The device type tensors of this backend are allocated on.
    type Device: BackendDevice;

    /// The tensor type for this backend.
    type Tensor: TensorData;

    // === Creation ===

    /// Tensor of zeros.
    fn zeros(shape: &Shape, device: &Self::Device) -> Self::Tensor;

    /// Tensor filled with a constant value.
    fn full(shape: &Shape, value: f32, device: &Self::Device) -> Self::Tensor;

    /// Tensor from a flat row-major buffer. Fails if `data.len() != shape.numel()`.
    fn from_vec(data: Vec<f32>, shape: Shape, device: &Self::Device) -> Result<Self::Tensor>;

    /// Device holding `x`.
    fn device(x: &Self::Tensor) -> Self::Device;

    fn ones(shape: &Shape, device: &Self::Device) -> Self::Tensor {
        Self::full(shape, 1.0, device)
    }

    fn scalar(value: f32, device: &Self::Device) -> Self::Tensor {
        Self::full(&Shape::scalar(), value, device)
    }

    /// Tensor with the shape and device of `x`, filled with `value`.
    fn full_like(x: &Self::Tensor, value: f32) -> Self::Tensor {
        Self::full(x.shape(), value, &Self::device(x))
    }

    // === Elementwise ===

    fn unary(op: UnaryOp, x: &Self::Tensor) -> Self::Tensor;

    fn binary(op: BinaryOp, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;

    fn compare(op: CmpOp, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;

    fn neg(x: &Self::Tensor) -> Self::Tensor {
        Self::unary(UnaryOp::Neg, x)
    }

    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor> {
        Self::binary(BinaryOp::Add, a, b)
    }

    fn sub(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor> {
        Self::binary(BinaryOp::Sub, a, b)
    }

    fn mul(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor> {
        Self::binary(BinaryOp::Mul, a, b)
    }

    fn div(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor> {
        Self::binary(BinaryOp::Div, a, b)
    }

    // === Reductions ===

    /// Reduce over `axes` (None = all axes).
    fn reduce(
        op: ReduceOp,
        x: &Self::Tensor,
        axes: Option<&[usize]>,
        keepdims: bool,
    ) -> Result<Self::Tensor>;

    // === Linear algebra ===

    /// Matrix multiplication: (..., M, K) @ (..., K, N) -> (..., M, N).
    /// A 1-D right operand is treated as a column vector and the result drops
    /// that axis again.
    fn matmul(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;

    // === Shape operations ===

    /// Permute axes. None = reverse all axes.
    fn transpose(x: &Self::Tensor, axes: Option<&[usize]>) -> Result<Self::Tensor>;

    fn reshape(x: &Self::Tensor, shape: &Shape) -> Result<Self::Tensor>;

    fn broadcast_to(x: &Self::Tensor, shape: &Shape) -> Result<Self::Tensor>;

    /// Sum along broadcast axes to get back to `shape`.
    fn sum_to(x: &Self::Tensor, shape: &Shape) -> Result<Self::Tensor>;

    /// Join tensors along `axis`; all other extents must agree.
    fn concat(xs: &[&Self::Tensor], axis: usize) -> Result<Self::Tensor>;

    /// Contiguous slice `[start, start + len)` along `axis`.
    fn narrow(x: &Self::Tensor, axis: usize, start: usize, len: usize) -> Result<Self::Tensor>;

    /// Zero-pad `before` and `after` positions along `axis`.
    fn pad(x: &Self::Tensor, axis: usize, before: usize, after: usize) -> Result<Self::Tensor>;

    /// One-hot encode integral class indices, appending a trailing class axis.
    fn one_hot(indices: &Self::Tensor, num_classes: usize) -> Result<Self::Tensor>;

    // === Gradient accumulation ===

    /// dst += src (shapes must match).
    fn accumulate_grad(dst: &mut Self::Tensor, src: &Self::Tensor) -> Result<()>;
}
