//! Computation graph nodes.
//!
//! Every operation eagerly computes its value and records its inputs, so the
//! graph is built one node per call and can be differentiated from any node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::TensorData;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> u64 {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Unique identifier for a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

/// Operations in the computation graph.
#[derive(Debug, Clone)]
pub enum TensorOp {
    // === Leaf nodes ===
    /// Constant tensor (no gradient flows into it).
    Const,
    /// Trainable variable.
    Var { name: String },

    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduce {
        op: ReduceOp,
        axes: Option<Vec<usize>>,
        keepdims: bool,
    },
    MatMul,

    // === Shape operations ===
    Transpose {
        axes: Option<Vec<usize>>,
    },
    Reshape {
        original_shape: Shape,
    },
    BroadcastTo {
        original_shape: Shape,
    },
    Concat {
        axis: usize,
        sizes: Vec<usize>,
    },
    Narrow {
        axis: usize,
        start: usize,
        original_shape: Shape,
    },
}

/// Internal node structure.
///
/// `data` sits behind a lock so a variable's value can be replaced in place
/// by a learner while the node keeps its identity.
pub struct TensorNode<B: Backend> {
    pub id: NodeId,
    pub op: TensorOp,
    shape: Shape,
    data: RwLock<B::Tensor>,
    pub children: Vec<Tensor<B>>,
}

impl<B: Backend> std::fmt::Debug for TensorNode<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorNode")
            .field("id", &self.id)
            .field("op", &self.op)
            .field("shape", &self.shape)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A tensor expression in the computation graph.
/// Cloning copies the handle, never the data.
#[derive(Clone)]
pub struct Tensor<B: Backend>(pub(crate) Arc<TensorNode<B>>);

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.0.id)
            .field("op", &self.0.op)
            .field("shape", self.shape())
            .finish()
    }
}

impl<B: Backend> Tensor<B> {
    fn new_node(op: TensorOp, data: B::Tensor, children: Vec<Tensor<B>>) -> Self {
        Tensor(Arc::new(TensorNode {
            id: NodeId(next_node_id()),
            op,
            shape: data.shape().clone(),
            data: RwLock::new(data),
            children,
        }))
    }

    // === Constructors ===

    /// Create a trainable variable.
    pub fn var(name: &str, data: B::Tensor) -> Self {
        Self::new_node(
            TensorOp::Var {
                name: name.to_string(),
            },
            data,
            vec![],
        )
    }

    /// Create a constant (not tracked for gradients).
    pub fn constant(data: B::Tensor) -> Self {
        Self::new_node(TensorOp::Const, data, vec![])
    }

    pub fn zeros(shape: &Shape, device: &B::Device) -> Self {
        Self::constant(B::zeros(shape, device))
    }

    pub fn ones(shape: &Shape, device: &B::Device) -> Self {
        Self::constant(B::ones(shape, device))
    }

    pub fn full(shape: &Shape, value: f32, device: &B::Device) -> Self {
        Self::constant(B::full(shape, value, device))
    }

    pub fn scalar(value: f32, device: &B::Device) -> Self {
        Self::constant(B::scalar(value, device))
    }

    pub fn from_vec(data: Vec<f32>, shape: Shape, device: &B::Device) -> Result<Self> {
        Ok(Self::constant(B::from_vec(data, shape, device)?))
    }

    /// A 0-dim constant on the same device as `self`.
    pub fn scalar_like(&self, value: f32) -> Self {
        Self::scalar(value, &self.device())
    }

    // === Accessors ===

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn op(&self) -> &TensorOp {
        &self.0.op
    }

    /// Read access to the current value.
    pub fn data(&self) -> RwLockReadGuard<'_, B::Tensor> {
        self.0.data.read_recursive()
    }

    /// Owned copy of the current value.
    pub fn value(&self) -> B::Tensor {
        self.data().clone()
    }

    pub fn children(&self) -> &[Tensor<B>] {
        &self.0.children
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape().ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape().numel()
    }

    pub fn device(&self) -> B::Device {
        B::device(&self.data())
    }

    pub fn is_var(&self) -> bool {
        matches!(self.0.op, TensorOp::Var { .. })
    }

    pub fn var_name(&self) -> Option<&str> {
        match &self.0.op {
            TensorOp::Var { name } => Some(name),
            _ => None,
        }
    }

    /// Copy of the values in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data().as_slice().to_vec()
    }

    /// Value of a one-element tensor.
    pub fn item(&self) -> Result<f32> {
        self.data().scalar_value()
    }

    /// Replace the value of a variable in place. The node keeps its id, so
    /// every expression holding it sees the new value on its next use.
    pub fn assign(&self, value: B::Tensor) -> Result<()> {
        if !self.is_var() {
            return Err(Error::AssignToConstant);
        }
        if value.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: value.shape().clone(),
            });
        }
        *self.0.data.write() = value;
        Ok(())
    }

    /// Constant holding the current value; gradients stop here.
    pub fn detach(&self) -> Self {
        Self::constant(self.value())
    }

    // === Elementwise ===

    fn unary(&self, op: UnaryOp) -> Self {
        let data = B::unary(op, &self.data());
        Self::new_node(TensorOp::Unary(op), data, vec![self.clone()])
    }

    pub fn neg(&self) -> Self {
        self.unary(UnaryOp::Neg)
    }

    pub fn exp(&self) -> Self {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> Self {
        self.unary(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Self {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn relu(&self) -> Self {
        self.unary(UnaryOp::Relu)
    }

    pub fn sigmoid(&self) -> Self {
        self.unary(UnaryOp::Sigmoid)
    }

    pub fn tanh(&self) -> Self {
        self.unary(UnaryOp::Tanh)
    }

    fn binary(&self, op: BinaryOp, other: &Self) -> Result<Self> {
        let data = B::binary(op, &self.data(), &other.data())?;
        Ok(Self::new_node(
            TensorOp::Binary(op),
            data,
            vec![self.clone(), other.clone()],
        ))
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(&self, other: &Self) -> Result<Self> {
        self.binary(BinaryOp::Div, other)
    }

    // === Reductions ===

    fn reduce(&self, op: ReduceOp, axes: Option<&[usize]>, keepdims: bool) -> Result<Self> {
        let data = B::reduce(op, &self.data(), axes, keepdims)?;
        Ok(Self::new_node(
            TensorOp::Reduce {
                op,
                axes: axes.map(|a| a.to_vec()),
                keepdims,
            },
            data,
            vec![self.clone()],
        ))
    }

    /// Sum over axes (None = all axes).
    pub fn sum(&self, axes: Option<&[usize]>, keepdims: bool) -> Result<Self> {
        self.reduce(ReduceOp::Sum, axes, keepdims)
    }

    pub fn mean(&self, axes: Option<&[usize]>, keepdims: bool) -> Result<Self> {
        self.reduce(ReduceOp::Mean, axes, keepdims)
    }

    pub fn max(&self, axes: Option<&[usize]>, keepdims: bool) -> Result<Self> {
        self.reduce(ReduceOp::Max, axes, keepdims)
    }

    // === Linear algebra ===

    /// Matrix product `self @ other`.
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        let data = B::matmul(&self.data(), &other.data())?;
        Ok(Self::new_node(
            TensorOp::MatMul,
            data,
            vec![self.clone(), other.clone()],
        ))
    }

    // === Shape operations ===

    /// Permute axes. None = reverse all axes.
    pub fn transpose(&self, axes: Option<&[usize]>) -> Result<Self> {
        let data = B::transpose(&self.data(), axes)?;
        Ok(Self::new_node(
            TensorOp::Transpose {
                axes: axes.map(|a| a.to_vec()),
            },
            data,
            vec![self.clone()],
        ))
    }

    pub fn reshape(&self, shape: &Shape) -> Result<Self> {
        let data = B::reshape(&self.data(), shape)?;
        Ok(Self::new_node(
            TensorOp::Reshape {
                original_shape: self.shape().clone(),
            },
            data,
            vec![self.clone()],
        ))
    }

    pub fn broadcast_to(&self, shape: &Shape) -> Result<Self> {
        let data = B::broadcast_to(&self.data(), shape)?;
        Ok(Self::new_node(
            TensorOp::BroadcastTo {
                original_shape: self.shape().clone(),
            },
            data,
            vec![self.clone()],
        ))
    }

    /// Join `xs` along `axis`.
    pub fn concat(xs: &[Tensor<B>], axis: usize) -> Result<Self> {
        if xs.is_empty() {
            return Err(Error::EmptyInput { op: "concat" });
        }
        let guards: Vec<_> = xs.iter().map(|x| x.data()).collect();
        let refs: Vec<&B::Tensor> = guards.iter().map(|g| &**g).collect();
        let data = B::concat(&refs, axis)?;

        let sizes = xs.iter().map(|x| x.shape().dim(axis)).collect();
        Ok(Self::new_node(
            TensorOp::Concat { axis, sizes },
            data,
            xs.to_vec(),
        ))
    }

    /// Slice `[start, start + len)` along `axis`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self> {
        let data = B::narrow(&self.data(), axis, start, len)?;
        Ok(Self::new_node(
            TensorOp::Narrow {
                axis,
                start,
                original_shape: self.shape().clone(),
            },
            data,
            vec![self.clone()],
        ))
    }

    /// One-hot encoding of integral indices as a constant with a trailing
    /// class axis.
    pub fn one_hot(&self, num_classes: usize) -> Result<Self> {
        Ok(Self::constant(B::one_hot(&self.data(), num_classes)?))
    }

    // === Composites ===

    /// Softmax along `axis`, shifted by the detached per-slice maximum.
    pub fn softmax(&self, axis: usize) -> Result<Self> {
        let shift = self.max(Some(&[axis]), true)?.detach();
        let e = self.sub(&shift)?.exp();
        let total = e.sum(Some(&[axis]), true)?;
        e.div(&total)
    }

    /// Log-softmax along `axis`.
    pub fn log_softmax(&self, axis: usize) -> Result<Self> {
        let shift = self.max(Some(&[axis]), true)?.detach();
        let shifted = self.sub(&shift)?;
        let log_total = shifted.exp().sum(Some(&[axis]), true)?.log();
        shifted.sub(&log_total)
    }

    /// Compute gradients of this node (seeded with ones) w.r.t. every
    /// node it depends on.
    pub fn backward(&self) -> Result<crate::backward::Gradients<B>> {
        crate::backward::backward(self)
    }
}
