//! CPU backend for dyn_tensor.

use dyn_tensor::prelude::*;
use dyn_tensor::{BinaryOp, CmpOp, ReduceOp, UnaryOp};

/// The host CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuDevice;

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

/// CPU tensor storage. Always contiguous, row-major.
#[derive(Clone, Debug)]
pub struct CpuTensor {
    data: Vec<f32>,
    shape: Shape,
    strides: Strides,
}

impl CpuTensor {
    /// Create a tensor from data and shape, checking the element count.
    pub fn new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(Error::ElementCount {
                expected: shape.numel(),
                got: data.len(),
                shape,
            });
        }
        Ok(Self::from_parts(data, shape))
    }

    /// Caller guarantees `data.len() == shape.numel()`.
    fn from_parts(data: Vec<f32>, shape: Shape) -> Self {
        debug_assert_eq!(data.len(), shape.numel());
        let strides = shape.contiguous_strides();
        CpuTensor { data, shape, strides }
    }

    pub fn flat_index(&self, indices: &[usize]) -> usize {
        self.strides.index(indices)
    }

    /// Iterate over all indices in the tensor.
    pub fn indices(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        TensorIndices::new(&self.shape)
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self::from_parts(self.data.iter().map(|&v| f(v)).collect(), self.shape.clone())
    }
}

impl TensorData for CpuTensor {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn strides(&self) -> &Strides {
        &self.strides
    }

    fn as_slice(&self) -> &[f32] {
        &self.data
    }

    fn as_slice_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Iterator over all multi-dimensional indices of a shape, odometer order.
struct TensorIndices<'a> {
    shape: &'a Shape,
    current: Vec<usize>,
    done: bool,
}

impl<'a> TensorIndices<'a> {
    fn new(shape: &'a Shape) -> Self {
        let ndim = shape.ndim();
        TensorIndices {
            shape,
            current: vec![0; ndim],
            done: ndim > 0 && shape.numel() == 0,
        }
    }
}

impl Iterator for TensorIndices<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.shape.ndim() == 0 {
            self.done = true;
            return Some(vec![]);
        }

        let result = self.current.clone();

        let mut i = self.shape.ndim() - 1;
        loop {
            self.current[i] += 1;
            if self.current[i] < self.shape.dim(i) {
                break;
            }
            self.current[i] = 0;
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
        }

        Some(result)
    }
}

/// Product of the extents before and after `axis`.
fn outer_inner(shape: &Shape, axis: usize) -> (usize, usize) {
    let outer = shape.dims()[..axis].iter().product();
    let inner = shape.dims()[axis + 1..].iter().product();
    (outer, inner)
}

/// CPU backend marker type.
#[derive(Clone, Copy, Debug)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Tensor = CpuTensor;

    // === Creation ===

    fn zeros(shape: &Shape, device: &CpuDevice) -> CpuTensor {
        Self::full(shape, 0.0, device)
    }

    fn full(shape: &Shape, value: f32, _device: &CpuDevice) -> CpuTensor {
        CpuTensor::from_parts(vec![value; shape.numel()], shape.clone())
    }

    fn from_vec(data: Vec<f32>, shape: Shape, _device: &CpuDevice) -> Result<CpuTensor> {
        CpuTensor::new(data, shape)
    }

    fn device(_x: &CpuTensor) -> CpuDevice {
        CpuDevice
    }

    // === Elementwise ===

    fn unary(op: UnaryOp, x: &CpuTensor) -> CpuTensor {
        match op {
            UnaryOp::Neg => x.map(|v| -v),
            UnaryOp::Exp => x.map(f32::exp),
            UnaryOp::Log => x.map(f32::ln),
            UnaryOp::Sqrt => x.map(f32::sqrt),
            UnaryOp::Relu => x.map(|v| v.max(0.0)),
            UnaryOp::Sigmoid => x.map(|v| 1.0 / (1.0 + (-v).exp())),
            UnaryOp::Tanh => x.map(f32::tanh),
        }
    }

    fn binary(op: BinaryOp, a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        match op {
            BinaryOp::Add => binary_op_broadcast(a, b, |x, y| x + y),
            BinaryOp::Sub => binary_op_broadcast(a, b, |x, y| x - y),
            BinaryOp::Mul => binary_op_broadcast(a, b, |x, y| x * y),
            BinaryOp::Div => binary_op_broadcast(a, b, |x, y| x / y),
        }
    }

    fn compare(op: CmpOp, a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        match op {
            CmpOp::Gt => binary_op_broadcast(a, b, |x, y| if x > y { 1.0 } else { 0.0 }),
            CmpOp::Eq => binary_op_broadcast(a, b, |x, y| if x == y { 1.0 } else { 0.0 }),
        }
    }

    // === Reductions ===

    fn reduce(
        op: ReduceOp,
        x: &CpuTensor,
        axes: Option<&[usize]>,
        keepdims: bool,
    ) -> Result<CpuTensor> {
        match op {
            ReduceOp::Sum => reduce_op(x, axes, keepdims, 0.0, |acc, v| acc + v),
            ReduceOp::Max => reduce_op(x, axes, keepdims, f32::NEG_INFINITY, f32::max),
            ReduceOp::Mean => {
                let mut sum = reduce_op(x, axes, keepdims, 0.0, |acc, v| acc + v)?;
                let count = match axes {
                    Some(axes) => axes.iter().map(|&ax| x.shape.dim(ax)).product::<usize>(),
                    None => x.shape.numel(),
                };
                let count = count as f32;
                sum.data.iter_mut().for_each(|v| *v /= count);
                Ok(sum)
            }
        }
    }

    // === Linear algebra ===

    fn matmul(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        matmul_impl(a, b)
    }

    // === Shape operations ===

    fn transpose(x: &CpuTensor, axes: Option<&[usize]>) -> Result<CpuTensor> {
        let ndim = x.shape.ndim();
        if ndim == 0 {
            return Ok(x.clone());
        }

        let perm: Vec<usize> = axes
            .map(|a| a.to_vec())
            .unwrap_or_else(|| (0..ndim).rev().collect());

        let mut sorted = perm.clone();
        sorted.sort_unstable();
        if sorted != (0..ndim).collect::<Vec<_>>() {
            return Err(Error::Permutation { perm, rank: ndim });
        }

        let new_shape = Shape::new(perm.iter().map(|&i| x.shape.dim(i)).collect());
        let new_strides = new_shape.contiguous_strides();
        let mut data = vec![0.0f32; x.shape.numel()];

        for idx in x.indices() {
            let new_idx: Vec<usize> = perm.iter().map(|&i| idx[i]).collect();
            data[new_strides.index(&new_idx)] = x.data[x.flat_index(&idx)];
        }

        Ok(CpuTensor::from_parts(data, new_shape))
    }

    fn reshape(x: &CpuTensor, shape: &Shape) -> Result<CpuTensor> {
        if x.shape.numel() != shape.numel() {
            return Err(Error::ElementCount {
                shape: shape.clone(),
                expected: shape.numel(),
                got: x.shape.numel(),
            });
        }
        Ok(CpuTensor::from_parts(x.data.clone(), shape.clone()))
    }

    fn broadcast_to(x: &CpuTensor, shape: &Shape) -> Result<CpuTensor> {
        if x.shape() == shape {
            return Ok(x.clone());
        }
        if x.shape.ndim() > shape.ndim() || &x.shape.broadcast_with(shape)? != shape {
            return Err(Error::Broadcast {
                lhs: x.shape.clone(),
                rhs: shape.clone(),
            });
        }

        let x_ndim = x.shape.ndim();
        let offset = shape.ndim() - x_ndim;
        let out_strides = shape.contiguous_strides();
        let mut data = vec![0.0f32; shape.numel()];

        for out_idx in TensorIndices::new(shape) {
            // Broadcast axes of the input always read index 0.
            let in_idx: Vec<usize> = (0..x_ndim)
                .map(|i| if x.shape.dim(i) == 1 { 0 } else { out_idx[offset + i] })
                .collect();
            data[out_strides.index(&out_idx)] = x.data[x.strides.index(&in_idx)];
        }

        Ok(CpuTensor::from_parts(data, shape.clone()))
    }

    fn sum_to(x: &CpuTensor, shape: &Shape) -> Result<CpuTensor> {
        if x.shape() == shape {
            return Ok(x.clone());
        }
        if shape.ndim() > x.shape.ndim() {
            return Err(Error::ShapeMismatch {
                expected: shape.clone(),
                got: x.shape.clone(),
            });
        }

        let axes = shape.reduction_axes_from(&x.shape);
        if axes.is_empty() {
            return Self::reshape(x, shape);
        }
        let summed = reduce_op(x, Some(&axes), false, 0.0, |acc, v| acc + v)?;
        Self::reshape(&summed, shape)
    }

    fn concat(xs: &[&CpuTensor], axis: usize) -> Result<CpuTensor> {
        let first = xs.first().ok_or(Error::EmptyInput { op: "concat" })?;
        first.shape.check_axis(axis)?;

        let mut total = 0;
        for x in xs {
            let extent = x.shape.dims().get(axis).copied().unwrap_or(0);
            let expected = first.shape.with_dim(axis, extent);
            if x.shape != expected {
                return Err(Error::ShapeMismatch {
                    expected,
                    got: x.shape.clone(),
                });
            }
            total += x.shape.dim(axis);
        }

        let out_shape = first.shape.with_dim(axis, total);
        let (outer, inner) = outer_inner(&out_shape, axis);
        let mut data = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            for x in xs {
                let chunk = x.shape.dim(axis) * inner;
                data.extend_from_slice(&x.data[o * chunk..(o + 1) * chunk]);
            }
        }

        Ok(CpuTensor::from_parts(data, out_shape))
    }

    fn narrow(x: &CpuTensor, axis: usize, start: usize, len: usize) -> Result<CpuTensor> {
        x.shape.check_axis(axis)?;
        let extent = x.shape.dim(axis);
        if start + len > extent {
            return Err(Error::NarrowOutOfBounds {
                axis,
                start,
                len,
                extent,
            });
        }

        let out_shape = x.shape.with_dim(axis, len);
        let (outer, inner) = outer_inner(&x.shape, axis);
        let mut data = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            let base = o * extent * inner;
            data.extend_from_slice(&x.data[base + start * inner..base + (start + len) * inner]);
        }

        Ok(CpuTensor::from_parts(data, out_shape))
    }

    fn pad(x: &CpuTensor, axis: usize, before: usize, after: usize) -> Result<CpuTensor> {
        x.shape.check_axis(axis)?;
        let extent = x.shape.dim(axis);
        let out_shape = x.shape.with_dim(axis, before + extent + after);
        let (outer, inner) = outer_inner(&x.shape, axis);

        let mut data = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            data.extend(std::iter::repeat(0.0).take(before * inner));
            data.extend_from_slice(&x.data[o * extent * inner..(o + 1) * extent * inner]);
            data.extend(std::iter::repeat(0.0).take(after * inner));
        }

        Ok(CpuTensor::from_parts(data, out_shape))
    }

    fn one_hot(indices: &CpuTensor, num_classes: usize) -> Result<CpuTensor> {
        let mut dims = indices.shape.dims().to_vec();
        dims.push(num_classes);
        let out_shape = Shape::new(dims);

        let mut data = vec![0.0f32; out_shape.numel()];
        for (i, &index) in indices.data.iter().enumerate() {
            if index < 0.0 || index.fract() != 0.0 || index as usize >= num_classes {
                return Err(Error::ClassIndex { index, num_classes });
            }
            data[i * num_classes + index as usize] = 1.0;
        }

        Ok(CpuTensor::from_parts(data, out_shape))
    }

    // === Gradient accumulation ===

    fn accumulate_grad(dst: &mut CpuTensor, src: &CpuTensor) -> Result<()> {
        if dst.shape != src.shape {
            return Err(Error::ShapeMismatch {
                expected: dst.shape.clone(),
                got: src.shape.clone(),
            });
        }
        for (d, s) in dst.data.iter_mut().zip(src.data.iter()) {
            *d += s;
        }
        Ok(())
    }
}

/// Binary operation with broadcasting.
fn binary_op_broadcast<F>(a: &CpuTensor, b: &CpuTensor, op: F) -> Result<CpuTensor>
where
    F: Fn(f32, f32) -> f32,
{
    if a.shape == b.shape {
        let data = a.data.iter().zip(&b.data).map(|(&x, &y)| op(x, y)).collect();
        return Ok(CpuTensor::from_parts(data, a.shape.clone()));
    }

    let out_shape = a.shape.broadcast_with(&b.shape)?;
    let a_broadcast = CpuBackend::broadcast_to(a, &out_shape)?;
    let b_broadcast = CpuBackend::broadcast_to(b, &out_shape)?;

    let data: Vec<f32> = a_broadcast
        .data
        .iter()
        .zip(b_broadcast.data.iter())
        .map(|(&x, &y)| op(x, y))
        .collect();

    Ok(CpuTensor::from_parts(data, out_shape))
}

/// Reduction over the given axes (None = all).
fn reduce_op<F>(
    x: &CpuTensor,
    axes: Option<&[usize]>,
    keepdims: bool,
    init: f32,
    op: F,
) -> Result<CpuTensor>
where
    F: Fn(f32, f32) -> f32,
{
    let ndim = x.shape.ndim();
    if ndim == 0 {
        return Ok(x.clone());
    }

    let reduce_axes: Vec<usize> = axes
        .map(|a| a.to_vec())
        .unwrap_or_else(|| (0..ndim).collect());
    for &ax in &reduce_axes {
        x.shape.check_axis(ax)?;
    }

    let out_dims: Vec<usize> = (0..ndim)
        .filter_map(|i| match (reduce_axes.contains(&i), keepdims) {
            (true, true) => Some(1),
            (true, false) => None,
            (false, _) => Some(x.shape.dim(i)),
        })
        .collect();
    let out_shape = Shape::new(out_dims);
    let out_strides = out_shape.contiguous_strides();

    let mut data = vec![init; out_shape.numel()];

    for in_idx in x.indices() {
        let out_idx: Vec<usize> = (0..ndim)
            .filter_map(|i| match (reduce_axes.contains(&i), keepdims) {
                (true, true) => Some(0),
                (true, false) => None,
                (false, _) => Some(in_idx[i]),
            })
            .collect();
        let out_flat = out_strides.index(&out_idx);
        data[out_flat] = op(data[out_flat], x.data[x.flat_index(&in_idx)]);
    }

    Ok(CpuTensor::from_parts(data, out_shape))
}

fn matmul_impl(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    let a_ndim = a.shape.ndim();
    let b_ndim = b.shape.ndim();
    let mismatch = || Error::Matmul {
        lhs: a.shape.clone(),
        rhs: b.shape.clone(),
    };

    if a_ndim == 0 || b_ndim == 0 {
        return Err(mismatch());
    }

    if a_ndim == 1 && b_ndim == 1 {
        if a.shape.dim(0) != b.shape.dim(0) {
            return Err(mismatch());
        }
        let dot: f32 = a.data.iter().zip(b.data.iter()).map(|(x, y)| x * y).sum();
        return Ok(CpuTensor::from_parts(vec![dot], Shape::scalar()));
    }

    if a_ndim == 1 {
        // (K,) @ (K, N) -> (N,)
        if b_ndim != 2 || a.shape.dim(0) != b.shape.dim(0) {
            return Err(mismatch());
        }
        let k = a.shape.dim(0);
        let n = b.shape.dim(1);
        let mut data = vec![0.0f32; n];
        for (j, out) in data.iter_mut().enumerate() {
            for i in 0..k {
                *out += a.data[i] * b.data[i * n + j];
            }
        }
        return Ok(CpuTensor::from_parts(data, Shape::new(vec![n])));
    }

    if b_ndim == 1 {
        // (M, K) @ (K,) -> (M,)
        if a_ndim != 2 || a.shape.dim(1) != b.shape.dim(0) {
            return Err(mismatch());
        }
        let m = a.shape.dim(0);
        let k = a.shape.dim(1);
        let mut data = vec![0.0f32; m];
        for (i, out) in data.iter_mut().enumerate() {
            for j in 0..k {
                *out += a.data[i * k + j] * b.data[j];
            }
        }
        return Ok(CpuTensor::from_parts(data, Shape::new(vec![m])));
    }

    // (..., M, K) @ (..., K, N) -> (..., M, N), batch axes broadcast.
    let m = a.shape.dim(a_ndim - 2);
    let k = a.shape.dim(a_ndim - 1);
    let n = b.shape.dim(b_ndim - 1);
    if k != b.shape.dim(b_ndim - 2) {
        return Err(mismatch());
    }

    let a_batch = Shape::new(a.shape.dims()[..a_ndim - 2].to_vec());
    let b_batch = Shape::new(b.shape.dims()[..b_ndim - 2].to_vec());
    let batch_shape = a_batch.broadcast_with(&b_batch).map_err(|_| mismatch())?;

    let mut out_dims = batch_shape.dims().to_vec();
    out_dims.push(m);
    out_dims.push(n);
    let out_shape = Shape::new(out_dims);

    let mut data = vec![0.0f32; out_shape.numel()];

    for (batch_idx, batch_indices) in TensorIndices::new(&batch_shape).enumerate() {
        let a_offset = compute_batch_offset(a, &batch_indices, m * k);
        let b_offset = compute_batch_offset(b, &batch_indices, k * n);
        let out_offset = batch_idx * m * n;

        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += a.data[a_offset + i * k + l] * b.data[b_offset + l * n + j];
                }
                data[out_offset + i * n + j] = sum;
            }
        }
    }

    Ok(CpuTensor::from_parts(data, out_shape))
}

/// Offset of one matrix inside a batched operand.
fn compute_batch_offset(t: &CpuTensor, batch_indices: &[usize], matrix_size: usize) -> usize {
    let t_batch_ndim = t.shape.ndim() - 2;
    let offset = batch_indices.len() - t_batch_ndim;

    let mut idx = 0;
    let mut stride = matrix_size;
    for i in (0..t_batch_ndim).rev() {
        let dim = t.shape.dim(i);
        let actual_idx = if dim == 1 { 0 } else { batch_indices[offset + i] };
        idx += actual_idx * stride;
        stride *= dim;
    }
    idx
}

/// Graph node on the CPU backend.
pub type CpuNode = Tensor<CpuBackend>;

/// Create a variable on the CPU.
pub fn var(name: &str, data: Vec<f32>, shape: Shape) -> Result<CpuNode> {
    Ok(Tensor::var(name, CpuBackend::from_vec(data, shape, &CpuDevice)?))
}

/// Create a constant on the CPU.
pub fn constant(data: Vec<f32>, shape: Shape) -> Result<CpuNode> {
    Tensor::from_vec(data, shape, &CpuDevice)
}

/// Central finite-difference gradient of `sum(f(inputs))` for each input element.
pub fn finite_diff_grad<F>(
    f: F,
    inputs: &[Vec<f32>],
    shapes: &[Shape],
    eps: f32,
) -> Result<Vec<Vec<f32>>>
where
    F: Fn(&[CpuNode]) -> Result<CpuNode>,
{
    let perturbed = |input_idx: usize, elem_idx: usize, delta: f32| -> Result<f32> {
        let nodes = inputs
            .iter()
            .zip(shapes.iter())
            .enumerate()
            .map(|(i, (inp, sh))| {
                let mut data = inp.clone();
                if i == input_idx {
                    data[elem_idx] += delta;
                }
                constant(data, sh.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        f(&nodes)?.sum(None, false)?.item()
    };

    let mut grads = Vec::with_capacity(inputs.len());
    for (input_idx, input) in inputs.iter().enumerate() {
        let mut input_grads = Vec::with_capacity(input.len());
        for elem_idx in 0..input.len() {
            let plus = perturbed(input_idx, elem_idx, eps)?;
            let minus = perturbed(input_idx, elem_idx, -eps)?;
            input_grads.push((plus - minus) / (2.0 * eps));
        }
        grads.push(input_grads);
    }

    Ok(grads)
}
