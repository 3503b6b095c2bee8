//! Reverse-mode automatic differentiation.

use std::collections::{HashMap, HashSet};

use crate::backend::{Backend, BinaryOp, CmpOp, ReduceOp, UnaryOp};
use crate::error::Result;
use crate::node::{NodeId, Tensor, TensorOp};
use crate::shape::Shape;
use crate::tensor::TensorData;

/// Anything that can hand out a gradient for a node.
///
/// Learners read gradients through this so callers can keep their own
/// node->gradient table.
pub trait GradientStore<B: Backend> {
    fn grad(&self, id: NodeId) -> Option<&B::Tensor>;
}

/// Gradients produced by one backward pass, keyed by node.
pub struct Gradients<B: Backend> {
    adjoints: HashMap<NodeId, B::Tensor>,
}

impl<B: Backend> Gradients<B> {
    /// Gradient with respect to a node, if any flowed into it.
    pub fn wrt(&self, expr: &Tensor<B>) -> Option<&B::Tensor> {
        self.adjoints.get(&expr.id())
    }

    /// Move the gradient for `id` out of the pass.
    pub fn take(&mut self, id: NodeId) -> Option<B::Tensor> {
        self.adjoints.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.adjoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjoints.is_empty()
    }
}

impl<B: Backend> GradientStore<B> for Gradients<B> {
    fn grad(&self, id: NodeId) -> Option<&B::Tensor> {
        self.adjoints.get(&id)
    }
}

impl<B: Backend> GradientStore<B> for HashMap<NodeId, B::Tensor> {
    fn grad(&self, id: NodeId) -> Option<&B::Tensor> {
        self.get(&id)
    }
}

/// Run reverse-mode autodiff from `output`. The output's own gradient is a
/// tensor of ones, so a non-scalar root behaves like the sum of its elements.
pub fn backward<B: Backend>(output: &Tensor<B>) -> Result<Gradients<B>> {
    let topo_order = topological_sort(output);
    log::trace!("backward over {} nodes", topo_order.len());

    let mut adjoints: HashMap<NodeId, B::Tensor> = HashMap::new();
    adjoints.insert(output.id(), B::ones(output.shape(), &output.device()));

    for expr in topo_order.iter().rev() {
        if expr.children().is_empty() {
            continue;
        }
        let Some(node_adjoint) = adjoints.get(&expr.id()).cloned() else {
            continue;
        };

        let child_grads = local_gradients::<B>(expr, &node_adjoint)?;

        for (child, grad) in expr.children().iter().zip(child_grads) {
            let Some(grad) = grad else { continue };
            match adjoints.get_mut(&child.id()) {
                Some(existing) => B::accumulate_grad(existing, &grad)?,
                None => {
                    adjoints.insert(child.id(), grad);
                }
            }
        }
    }

    Ok(Gradients { adjoints })
}

/// Gradient contribution of `expr` to each of its children.
fn local_gradients<B: Backend>(
    expr: &Tensor<B>,
    upstream: &B::Tensor,
) -> Result<Vec<Option<B::Tensor>>> {
    let children = expr.children();
    let out = expr.data();

    let grads = match expr.op() {
        TensorOp::Const | TensorOp::Var { .. } => vec![],

        TensorOp::Unary(op) => {
            let x = children[0].data();
            let local = match op {
                UnaryOp::Neg => return Ok(vec![Some(B::neg(upstream))]),
                // d exp(x) = exp(x)
                UnaryOp::Exp => out.clone(),
                // d ln(x) = 1 / x
                UnaryOp::Log => return Ok(vec![Some(B::div(upstream, &x)?)]),
                // d sqrt(x) = 0.5 / sqrt(x)
                UnaryOp::Sqrt => B::div(&B::full_like(&out, 0.5), &out)?,
                UnaryOp::Relu => B::compare(CmpOp::Gt, &x, &B::full_like(&x, 0.0))?,
                // s * (1 - s)
                UnaryOp::Sigmoid => B::mul(&out, &B::sub(&B::full_like(&out, 1.0), &out)?)?,
                // 1 - tanh^2
                UnaryOp::Tanh => B::sub(&B::full_like(&out, 1.0), &B::mul(&out, &out)?)?,
            };
            vec![Some(B::mul(upstream, &local)?)]
        }

        TensorOp::Binary(op) => {
            let a = children[0].data();
            let b = children[1].data();
            let (local_a, local_b) = match op {
                BinaryOp::Add => (upstream.clone(), upstream.clone()),
                BinaryOp::Sub => (upstream.clone(), B::neg(upstream)),
                BinaryOp::Mul => (B::mul(upstream, &b)?, B::mul(upstream, &a)?),
                BinaryOp::Div => {
                    // d(a/b)/da = 1/b, d(a/b)/db = -a/b^2
                    let grad_a = B::div(upstream, &b)?;
                    let b_sq = B::mul(&b, &b)?;
                    let grad_b = B::mul(upstream, &B::neg(&B::div(&a, &b_sq)?))?;
                    (grad_a, grad_b)
                }
            };
            vec![
                Some(B::sum_to(&local_a, a.shape())?),
                Some(B::sum_to(&local_b, b.shape())?),
            ]
        }

        TensorOp::Reduce { op, axes, keepdims } => {
            let input_shape = children[0].shape();
            let expanded = expand_reduced::<B>(upstream, input_shape, axes.as_deref(), *keepdims)?;
            let grad = match op {
                ReduceOp::Sum => expanded,
                ReduceOp::Mean => {
                    let count = match axes {
                        Some(axes) => axes.iter().map(|&ax| input_shape.dim(ax)).product::<usize>(),
                        None => input_shape.numel(),
                    };
                    B::div(&expanded, &B::full_like(&expanded, count as f32))?
                }
                ReduceOp::Max => {
                    // Flows only to the element(s) equal to the maximum.
                    let max = expand_reduced::<B>(&out, input_shape, axes.as_deref(), *keepdims)?;
                    let mask = B::compare(CmpOp::Eq, &children[0].data(), &max)?;
                    B::mul(&expanded, &mask)?
                }
            };
            vec![Some(grad)]
        }

        TensorOp::MatMul => {
            let a = children[0].data();
            let b = children[1].data();
            let (grad_a, grad_b) = matmul_gradients::<B>(&a, &b, upstream)?;
            vec![Some(grad_a), Some(grad_b)]
        }

        TensorOp::Transpose { axes } => {
            let inverse = axes.as_ref().map(|axes| {
                let mut inv = vec![0; axes.len()];
                for (i, &ax) in axes.iter().enumerate() {
                    inv[ax] = i;
                }
                inv
            });
            vec![Some(B::transpose(upstream, inverse.as_deref())?)]
        }

        TensorOp::Reshape { original_shape } => {
            vec![Some(B::reshape(upstream, original_shape)?)]
        }

        TensorOp::BroadcastTo { original_shape } => {
            vec![Some(B::sum_to(upstream, original_shape)?)]
        }

        TensorOp::Concat { axis, sizes } => {
            let mut start = 0;
            let mut grads = Vec::with_capacity(sizes.len());
            for &len in sizes {
                grads.push(Some(B::narrow(upstream, *axis, start, len)?));
                start += len;
            }
            grads
        }

        TensorOp::Narrow {
            axis,
            start,
            original_shape,
        } => {
            let len = expr.shape().dim(*axis);
            let after = original_shape.dim(*axis) - start - len;
            vec![Some(B::pad(upstream, *axis, *start, after)?)]
        }
    };

    Ok(grads)
}

/// Shape of `input` with the reduced axes kept at extent 1.
fn keepdims_shape(input: &Shape, axes: Option<&[usize]>) -> Shape {
    let mut dims = input.dims().to_vec();
    match axes {
        Some(axes) => {
            for &ax in axes {
                dims[ax] = 1;
            }
        }
        None => dims.iter_mut().for_each(|d| *d = 1),
    }
    Shape::new(dims)
}

/// Broadcast a reduction result back over the input shape.
fn expand_reduced<B: Backend>(
    tensor: &B::Tensor,
    input_shape: &Shape,
    axes: Option<&[usize]>,
    keepdims: bool,
) -> Result<B::Tensor> {
    if keepdims {
        B::broadcast_to(tensor, input_shape)
    } else {
        let kept = B::reshape(tensor, &keepdims_shape(input_shape, axes))?;
        B::broadcast_to(&kept, input_shape)
    }
}

/// Permutation swapping the last two axes.
fn swap_last_two(rank: usize) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..rank).collect();
    perm.swap(rank - 2, rank - 1);
    perm
}

fn matmul_gradients<B: Backend>(
    a: &B::Tensor,
    b: &B::Tensor,
    upstream: &B::Tensor,
) -> Result<(B::Tensor, B::Tensor)> {
    let a_shape = a.shape().clone();
    let b_shape = b.shape().clone();

    if a_shape.ndim() == 1 && b_shape.ndim() == 1 {
        // dot product -> scalar
        return Ok((B::mul(b, upstream)?, B::mul(a, upstream)?));
    }

    if b_shape.ndim() == 1 {
        // (M, K) @ (K,) -> (M,)
        let m = a_shape.dim(0);
        let k = b_shape.dim(0);
        let g_col = B::reshape(upstream, &Shape::new(vec![m, 1]))?;
        let b_row = B::reshape(b, &Shape::new(vec![1, k]))?;
        let grad_a = B::matmul(&g_col, &b_row)?;
        let grad_b = B::matmul(&B::transpose(a, None)?, upstream)?;
        return Ok((grad_a, grad_b));
    }

    if b_shape.ndim() == 2 {
        // (..., M, K) @ (K, N): the right operand is shared across the batch.
        let k = a_shape.dim(a_shape.ndim() - 1);
        let n = b_shape.dim(1);
        let grad_a = B::matmul(upstream, &B::transpose(b, None)?)?;
        let rows = a_shape.numel() / k.max(1);
        let a2 = B::reshape(a, &Shape::new(vec![rows, k]))?;
        let g2 = B::reshape(upstream, &Shape::new(vec![rows, n]))?;
        let grad_b = B::matmul(&B::transpose(&a2, None)?, &g2)?;
        return Ok((grad_a, grad_b));
    }

    let b_t = B::transpose(b, Some(&swap_last_two(b_shape.ndim())))?;
    let a_t = B::transpose(a, Some(&swap_last_two(a_shape.ndim())))?;
    Ok((B::matmul(upstream, &b_t)?, B::matmul(&a_t, upstream)?))
}

/// Topological order (children before parents), iterative DFS postorder.
fn topological_sort<B: Backend>(root: &Tensor<B>) -> Vec<Tensor<B>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<(Tensor<B>, bool)> = vec![(root.clone(), false)];

    while let Some((expr, expanded)) = stack.pop() {
        if expanded {
            order.push(expr);
            continue;
        }
        if !visited.insert(expr.id()) {
            continue;
        }
        stack.push((expr.clone(), true));
        for child in expr.children().iter().rev() {
            if !visited.contains(&child.id()) {
                stack.push((child.clone(), false));
            }
        }
    }

    order
}
