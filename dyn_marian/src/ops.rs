//! Operator library.
//!
//! Every operator takes expressions in the emulated convention and returns a
//! new expression; operands are never modified. Axis arguments are emulated
//! axes and are translated before reaching the engine. Reductions keep the
//! reduced axis with extent 1.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dyn_tensor::{Backend, Tensor};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::inits::Initializer;
use crate::shape::{axes_to_engine, axis_to_engine, Shape};

fn node<'a, B: Backend>(x: &'a Expr<B>, op: &'static str) -> Result<&'a Tensor<B>> {
    x.node(op)
}

fn wrap<B: Backend>(t: Tensor<B>) -> Expr<B> {
    Expr::from(t)
}

// === Arithmetic ===

pub fn add<B: Backend>(a: &Expr<B>, b: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(a, "add")?.add(node(b, "add")?)?))
}

pub fn sub<B: Backend>(a: &Expr<B>, b: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(a, "sub")?.sub(node(b, "sub")?)?))
}

pub fn mul<B: Backend>(a: &Expr<B>, b: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(a, "mul")?.mul(node(b, "mul")?)?))
}

pub fn div<B: Backend>(a: &Expr<B>, b: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(a, "div")?.div(node(b, "div")?)?))
}

/// `x + s`; adding 0 returns `x` itself.
pub fn add_scalar<B: Backend>(x: &Expr<B>, s: f32) -> Result<Expr<B>> {
    let t = node(x, "add_scalar")?;
    if s == 0.0 {
        return Ok(x.clone());
    }
    Ok(wrap(t.add(&t.scalar_like(s))?))
}

/// `s + x`.
pub fn scalar_add<B: Backend>(s: f32, x: &Expr<B>) -> Result<Expr<B>> {
    add_scalar(x, s)
}

/// `x - s`; subtracting 0 returns `x` itself.
pub fn sub_scalar<B: Backend>(x: &Expr<B>, s: f32) -> Result<Expr<B>> {
    let t = node(x, "sub_scalar")?;
    if s == 0.0 {
        return Ok(x.clone());
    }
    Ok(wrap(t.sub(&t.scalar_like(s))?))
}

/// `s - x`; `0 - x` is `-x`.
pub fn scalar_sub<B: Backend>(s: f32, x: &Expr<B>) -> Result<Expr<B>> {
    let t = node(x, "scalar_sub")?;
    if s == 0.0 {
        return Ok(wrap(t.neg()));
    }
    Ok(wrap(t.scalar_like(s).sub(t)?))
}

/// `x * s`; multiplying by 1 returns `x` itself.
pub fn mul_scalar<B: Backend>(x: &Expr<B>, s: f32) -> Result<Expr<B>> {
    let t = node(x, "mul_scalar")?;
    if s == 1.0 {
        return Ok(x.clone());
    }
    Ok(wrap(t.mul(&t.scalar_like(s))?))
}

/// `s * x`.
pub fn scalar_mul<B: Backend>(s: f32, x: &Expr<B>) -> Result<Expr<B>> {
    mul_scalar(x, s)
}

/// `x / s`; dividing by 1 returns `x` itself.
pub fn div_scalar<B: Backend>(x: &Expr<B>, s: f32) -> Result<Expr<B>> {
    let t = node(x, "div_scalar")?;
    if s == 1.0 {
        return Ok(x.clone());
    }
    Ok(wrap(t.div(&t.scalar_like(s))?))
}

/// `s / x`. No shortcut.
pub fn scalar_div<B: Backend>(s: f32, x: &Expr<B>) -> Result<Expr<B>> {
    let t = node(x, "scalar_div")?;
    Ok(wrap(t.scalar_like(s).div(t)?))
}

/// Sum of a list, added pairwise as a balanced tree.
pub fn plus<B: Backend>(xs: &[Expr<B>]) -> Result<Expr<B>> {
    match xs {
        [] => Err(Error::InvalidArgument("plus: empty list".to_string())),
        [x] => Ok(x.clone()),
        _ => {
            let (left, right) = xs.split_at(xs.len() / 2);
            add(&plus(left)?, &plus(right)?)
        }
    }
}

// === Elementwise ===

pub fn neg<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "neg")?.neg()))
}

pub fn exp<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "exp")?.exp()))
}

pub fn log<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "log")?.log()))
}

/// `sqrt(x + eps)`.
pub fn sqrt<B: Backend>(x: &Expr<B>, eps: f32) -> Result<Expr<B>> {
    let shifted = add_scalar(x, eps)?;
    Ok(wrap(node(&shifted, "sqrt")?.sqrt()))
}

pub fn square<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    mul(x, x)
}

/// Logistic sigmoid.
pub fn logit<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "logit")?.sigmoid()))
}

pub fn sigmoid<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    logit(x)
}

pub fn tanh<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "tanh")?.tanh()))
}

pub fn relu<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "relu")?.relu()))
}

/// `x * sigmoid(x)`.
pub fn swish<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    mul(x, &logit(x)?)
}

pub fn logit_list<B: Backend>(xs: &[Expr<B>]) -> Result<Expr<B>> {
    logit(&plus(xs)?)
}

pub fn tanh_list<B: Backend>(xs: &[Expr<B>]) -> Result<Expr<B>> {
    tanh(&plus(xs)?)
}

pub fn relu_list<B: Backend>(xs: &[Expr<B>]) -> Result<Expr<B>> {
    relu(&plus(xs)?)
}

pub fn swish_list<B: Backend>(xs: &[Expr<B>]) -> Result<Expr<B>> {
    swish(&plus(xs)?)
}

// === Reductions ===

/// Sum along an emulated axis.
pub fn sum<B: Backend>(x: &Expr<B>, axis: i64) -> Result<Expr<B>> {
    let t = node(x, "sum")?;
    let ax = axis_to_engine(t.ndim(), axis)?;
    Ok(wrap(t.sum(Some(&[ax]), true)?))
}

/// Mean along an emulated axis.
pub fn mean<B: Backend>(x: &Expr<B>, axis: i64) -> Result<Expr<B>> {
    let t = node(x, "mean")?;
    let ax = axis_to_engine(t.ndim(), axis)?;
    Ok(wrap(t.mean(Some(&[ax]), true)?))
}

/// Sum of every element, as a rank-0 expression.
pub fn sum_all<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "sum_all")?.sum(None, false)?))
}

/// `sum(a * b, axis)`.
pub fn scalar_product<B: Backend>(a: &Expr<B>, b: &Expr<B>, axis: i64) -> Result<Expr<B>> {
    sum(&mul(a, b)?, axis)
}

/// `sum(x * w, axis) / sum(w, axis)`, with `w` broadcast to the shape of `x`.
pub fn weighted_average<B: Backend>(x: &Expr<B>, w: &Expr<B>, axis: i64) -> Result<Expr<B>> {
    let xt = node(x, "weighted_average")?;
    let wt = node(w, "weighted_average")?;
    let ax = axis_to_engine(xt.ndim(), axis)?;
    let wb = wt.broadcast_to(xt.shape())?;
    let numer = xt.mul(&wb)?.sum(Some(&[ax]), true)?;
    let denom = wb.sum(Some(&[ax]), true)?;
    Ok(wrap(numer.div(&denom)?))
}

// === Softmax family ===

/// Softmax over the innermost axis.
pub fn softmax<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    softmax_axis(x, 0)
}

pub fn softmax_axis<B: Backend>(x: &Expr<B>, axis: i64) -> Result<Expr<B>> {
    let t = node(x, "softmax")?;
    Ok(wrap(t.softmax(axis_to_engine(t.ndim(), axis)?)?))
}

/// Log-softmax over the innermost axis.
pub fn logsoftmax<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    let t = node(x, "logsoftmax")?;
    Ok(wrap(t.log_softmax(axis_to_engine(t.ndim(), 0)?)?))
}

/// Softmax cross-entropy of `logits` against integral class indices.
///
/// The class axis is emulated axis 0; `indices` has the remaining axes of
/// `logits`. The result keeps a unit class axis.
pub fn cross_entropy<B: Backend>(logits: &Expr<B>, indices: &Expr<B>) -> Result<Expr<B>> {
    let o = node(logits, "cross_entropy")?;
    let y = node(indices, "cross_entropy")?;
    if o.ndim() == 0 {
        return Err(Error::InvalidArgument(
            "cross_entropy: logits need a class axis".to_string(),
        ));
    }
    let class_axis = o.ndim() - 1;
    let num_classes = o.shape().dim(class_axis);

    let one_hot = y.one_hot(num_classes)?;
    let log_probs = o.log_softmax(class_axis)?;
    let picked = log_probs.mul(&one_hot)?.sum(Some(&[class_axis]), true)?;
    Ok(wrap(picked.neg()))
}

// === Linear algebra ===

/// `W . x + b`, contracting the input axis of `W` with the innermost axis of
/// `x`. Outer axes of `x` are batch axes. The engine product takes `(W, x)`
/// with the batch folded into columns. An empty `b` means no bias.
pub fn affine<B: Backend>(x: &Expr<B>, w: &Expr<B>, b: &Expr<B>) -> Result<Expr<B>> {
    let w = node(w, "affine")?;
    let x = node(x, "affine")?;
    let inner = x.shape().dims().last().copied();
    if w.ndim() != 2 || inner != Some(w.shape().dim(1)) {
        return Err(Error::InvalidArgument(format!(
            "affine: weight {} with input {}",
            w.shape(),
            x.shape()
        )));
    }
    let (outputs, inputs) = (w.shape().dim(0), w.shape().dim(1));
    let rows = x.numel() / inputs.max(1);

    let columns = x
        .reshape(&dyn_tensor::Shape::new(vec![rows, inputs]))?
        .transpose(None)?;
    let mut dims = x.shape().dims().to_vec();
    if let Some(last) = dims.last_mut() {
        *last = outputs;
    }
    let y = w
        .matmul(&columns)?
        .transpose(None)?
        .reshape(&dyn_tensor::Shape::new(dims))?;
    match b.tensor() {
        Some(bias) => Ok(wrap(y.add(bias)?)),
        None => Ok(wrap(y)),
    }
}

// === Shape manipulation ===

/// Reverse all axes.
pub fn transpose<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    Ok(wrap(node(x, "transpose")?.transpose(None)?))
}

/// Permute axes: result axis `i` is input axis `perm[i]` (emulated).
pub fn transpose_axes<B: Backend>(x: &Expr<B>, perm: &[i64]) -> Result<Expr<B>> {
    let t = node(x, "transpose")?;
    if perm.len() != t.ndim() {
        return Err(Error::InvalidArgument(format!(
            "transpose: permutation {:?} for rank {}",
            perm,
            t.ndim()
        )));
    }
    let engine_perm = axes_to_engine(t.ndim(), perm)?;
    Ok(wrap(t.transpose(Some(&engine_perm))?))
}

/// Join along an emulated axis (resolved against the first operand).
pub fn concatenate<B: Backend>(xs: &[Expr<B>], axis: i64) -> Result<Expr<B>> {
    let first = xs
        .first()
        .ok_or_else(|| Error::InvalidArgument("concatenate: empty list".to_string()))?;
    let ax = axis_to_engine(node(first, "concatenate")?.ndim(), axis)?;
    let nodes = xs
        .iter()
        .map(|x| node(x, "concatenate").cloned())
        .collect::<Result<Vec<_>>>()?;
    Ok(wrap(Tensor::concat(&nodes, ax)?))
}

/// `n` copies of `x` joined along `axis`; `n == 1` returns `x`.
pub fn repeat<B: Backend>(x: &Expr<B>, n: usize, axis: i64) -> Result<Expr<B>> {
    match n {
        0 => Err(Error::InvalidArgument("repeat: zero repeats".to_string())),
        1 => Ok(x.clone()),
        _ => concatenate(&vec![x.clone(); n], axis),
    }
}

pub fn reshape<B: Backend>(x: &Expr<B>, shape: &Shape) -> Result<Expr<B>> {
    Ok(wrap(node(x, "reshape")?.reshape(&shape.to_engine())?))
}

/// Pad with outer unit axes up to rank `n`.
pub fn atleast_nd<B: Backend>(x: &Expr<B>, n: usize) -> Result<Expr<B>> {
    let t = node(x, "atleast_nd")?;
    if t.ndim() >= n {
        return Ok(x.clone());
    }
    let mut dims = vec![1; n - t.ndim()];
    dims.extend_from_slice(t.shape().dims());
    Ok(wrap(t.reshape(&dyn_tensor::Shape::new(dims))?))
}

pub fn atleast_1d<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    atleast_nd(x, 1)
}

pub fn atleast_2d<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    atleast_nd(x, 2)
}

pub fn atleast_3d<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    atleast_nd(x, 3)
}

pub fn atleast_4d<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    atleast_nd(x, 4)
}

pub fn flatten<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    let n = x.elements()?;
    reshape(x, &Shape::new(vec![n]))
}

/// Keep the innermost axis and fold all others into one.
pub fn flatten_2d<B: Backend>(x: &Expr<B>) -> Result<Expr<B>> {
    let shape = x.shape()?;
    if shape.is_empty() {
        return Err(Error::InvalidArgument("flatten_2d: rank-0 input".to_string()));
    }
    let inner = shape.get(0)?;
    let outer = if inner == 0 { 0 } else { shape.elements() / inner };
    reshape(x, &Shape::new(vec![inner, outer]))
}

/// Constant one-hot selector with one row per index.
fn selector<B: Backend>(like: &Tensor<B>, indices: &[usize], num: usize) -> Result<Tensor<B>> {
    let idx = indices.iter().map(|&i| i as f32).collect();
    let idx = Tensor::<B>::from_vec(
        idx,
        dyn_tensor::Shape::new(vec![indices.len()]),
        &like.device(),
    )?;
    Ok(idx.one_hot(num)?)
}

fn require_matrix<B: Backend>(t: &Tensor<B>, op: &str) -> Result<()> {
    if t.ndim() != 2 {
        return Err(Error::InvalidArgument(format!(
            "{}: data must be a matrix, got rank {}",
            op,
            t.ndim()
        )));
    }
    Ok(())
}

/// Gather rows (the outer axis) of a matrix.
pub fn rows<B: Backend>(x: &Expr<B>, indices: &[usize]) -> Result<Expr<B>> {
    let t = node(x, "rows")?;
    require_matrix(t, "rows")?;
    let sel = selector(t, indices, t.shape().dim(0))?;
    Ok(wrap(sel.matmul(t)?))
}

/// Gather columns (the inner axis) of a matrix.
pub fn cols<B: Backend>(x: &Expr<B>, indices: &[usize]) -> Result<Expr<B>> {
    let t = node(x, "cols")?;
    require_matrix(t, "cols")?;
    let sel = selector(t, indices, t.shape().dim(1))?.transpose(None)?;
    Ok(wrap(t.matmul(&sel)?))
}

/// Slice position `index` along an emulated axis, keeping the axis.
/// A negative index counts from the end.
pub fn step<B: Backend>(x: &Expr<B>, index: i64, axis: i64) -> Result<Expr<B>> {
    let t = node(x, "step")?;
    let ax = axis_to_engine(t.ndim(), axis)?;
    let extent = t.shape().dim(ax) as i64;
    let i = if index < 0 { index + extent } else { index };
    if !(0..extent).contains(&i) {
        return Err(Error::InvalidArgument(format!(
            "step: index {} out of range for extent {}",
            index, extent
        )));
    }
    Ok(wrap(t.narrow(ax, i as usize, 1)?))
}

// === Dropout ===

/// Inverted-dropout mask: each element is kept with probability `1 - prob`
/// and scaled by `1 / (1 - prob)`; dropped elements are 0.
pub(crate) fn dropout_mask<B: Backend, R: Rng>(
    prob: f32,
    shape: &dyn_tensor::Shape,
    device: &B::Device,
    rng: &mut R,
) -> Result<Tensor<B>> {
    check_probability(prob)?;
    let n = shape.numel();
    let data = if prob >= 1.0 {
        vec![0.0; n]
    } else {
        let scale = 1.0 / (1.0 - prob);
        (0..n)
            .map(|_| if rng.gen::<f32>() < prob { 0.0 } else { scale })
            .collect()
    };
    Ok(Tensor::<B>::from_vec(data, shape.clone(), device)?)
}

fn check_probability(prob: f32) -> Result<()> {
    if (0.0..=1.0).contains(&prob) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "dropout probability {} outside [0, 1]",
            prob
        )))
    }
}

/// Dropout with a mask drawn from `rng`. `prob == 0` returns `x` itself.
pub fn dropout<B: Backend, R: Rng>(x: &Expr<B>, prob: f32, rng: &mut R) -> Result<Expr<B>> {
    let t = node(x, "dropout")?;
    check_probability(prob)?;
    if prob == 0.0 {
        return Ok(x.clone());
    }
    let mask = dropout_mask::<B, R>(prob, t.shape(), &t.device(), rng)?;
    Ok(wrap(t.mul(&mask)?))
}

/// Dropout with a precomputed mask.
pub fn dropout_masked<B: Backend>(x: &Expr<B>, mask: &Expr<B>) -> Result<Expr<B>> {
    mul(x, mask)
}

// === Constants and diagnostics ===

/// Constant tensor of an emulated shape. Random initializers draw from a
/// freshly seeded generator.
pub fn constant<B: Backend>(
    shape: &Shape,
    init: &Initializer,
    device: &B::Device,
) -> Result<Expr<B>> {
    constant_with_rng(shape, init, device, &mut StdRng::from_entropy())
}

pub(crate) fn constant_with_rng<B: Backend, R: Rng>(
    shape: &Shape,
    init: &Initializer,
    device: &B::Device,
    rng: &mut R,
) -> Result<Expr<B>> {
    let engine_shape = shape.to_engine();
    let data = init.materialize(&engine_shape, rng)?;
    Ok(wrap(Tensor::<B>::from_vec(data, engine_shape, device)?))
}

/// Log the emulated shape of `x` at debug level and return it unchanged.
pub fn debug<B: Backend>(x: &Expr<B>, message: &str) -> Result<Expr<B>> {
    log::debug!("{}: shape={}", message, x.shape()?);
    Ok(x.clone())
}

// === Operators without an engine mapping ===

pub fn leakyrelu<B: Backend>(_x: &Expr<B>) -> Result<Expr<B>> {
    Err(Error::Unimplemented("leakyrelu"))
}

pub fn prelu<B: Backend>(_x: &Expr<B>, _alpha: f32) -> Result<Expr<B>> {
    Err(Error::Unimplemented("prelu"))
}

pub fn dot<B: Backend>(
    _a: &Expr<B>,
    _b: &Expr<B>,
    _trans_a: bool,
    _trans_b: bool,
    _scale: f32,
) -> Result<Expr<B>> {
    Err(Error::Unimplemented("dot"))
}

pub fn bdot<B: Backend>(
    _a: &Expr<B>,
    _b: &Expr<B>,
    _trans_a: bool,
    _trans_b: bool,
    _scale: f32,
) -> Result<Expr<B>> {
    Err(Error::Unimplemented("bdot"))
}

pub fn select<B: Backend>(_x: &Expr<B>, _axis: i64, _indices: &[usize]) -> Result<Expr<B>> {
    Err(Error::Unimplemented("select"))
}

pub fn softmax_masked<B: Backend>(_x: &Expr<B>, _mask: &Expr<B>) -> Result<Expr<B>> {
    Err(Error::Unimplemented("softmax_masked"))
}

pub fn layer_norm<B: Backend>(
    _x: &Expr<B>,
    _gamma: &Expr<B>,
    _beta: &Expr<B>,
    _eps: f32,
) -> Result<Expr<B>> {
    Err(Error::Unimplemented("layer_norm"))
}

pub fn highway<B: Backend>(_y: &Expr<B>, _x: &Expr<B>, _t: &Expr<B>) -> Result<Expr<B>> {
    Err(Error::Unimplemented("highway"))
}

pub fn shift<B: Backend>(_x: &Expr<B>, _offsets: &[i64]) -> Result<Expr<B>> {
    Err(Error::Unimplemented("shift"))
}

pub fn convert2cudnn_format<B: Backend>(_x: &Expr<B>) -> Result<Expr<B>> {
    Err(Error::Unimplemented("convert2cudnn_format"))
}

pub fn convert_from_cudnn_format<B: Backend>(_x: &Expr<B>) -> Result<Expr<B>> {
    Err(Error::Unimplemented("convert_from_cudnn_format"))
}

pub fn avg_pooling<B: Backend>(_x: &Expr<B>, _height: usize, _width: usize) -> Result<Expr<B>> {
    Err(Error::Unimplemented("avg_pooling"))
}

pub fn max_pooling<B: Backend>(_x: &Expr<B>, _height: usize, _width: usize) -> Result<Expr<B>> {
    Err(Error::Unimplemented("max_pooling"))
}

pub fn pooling_with_masking<B: Backend>(
    _x: &Expr<B>,
    _mask: &Expr<B>,
    _width: usize,
    _is_even: bool,
) -> Result<Expr<B>> {
    Err(Error::Unimplemented("pooling_with_masking"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inits;
    use approx::assert_abs_diff_eq;
    use dyn_backend_cpu::{CpuBackend, CpuDevice};

    type E = Expr<CpuBackend>;

    /// Constant with an emulated shape.
    fn expr(data: Vec<f32>, shape: &[usize]) -> E {
        constant(&Shape::from(shape), &inits::from_vector(data), &CpuDevice).unwrap()
    }

    fn iota(shape: &[usize]) -> E {
        let n = shape.iter().product::<usize>();
        expr((0..n).map(|i| i as f32).collect(), shape)
    }

    // === Identity shortcuts ===

    #[test]
    fn test_scalar_identities_return_operand() {
        let x = iota(&[3]);
        assert_eq!(add_scalar(&x, 0.0).unwrap(), x);
        assert_eq!(sub_scalar(&x, 0.0).unwrap(), x);
        assert_eq!(mul_scalar(&x, 1.0).unwrap(), x);
        assert_eq!(div_scalar(&x, 1.0).unwrap(), x);
        assert_eq!(scalar_add(0.0, &x).unwrap(), x);
        assert_eq!(scalar_mul(1.0, &x).unwrap(), x);

        let y = add_scalar(&x, 2.0).unwrap();
        assert_ne!(y, x);
        assert_eq!(y.to_vec().unwrap(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_scalar_on_the_left() {
        let x = expr(vec![1.0, 2.0, 4.0], &[3]);
        assert_eq!(scalar_sub(0.0, &x).unwrap().to_vec().unwrap(), vec![-1.0, -2.0, -4.0]);
        assert_eq!(scalar_sub(1.0, &x).unwrap().to_vec().unwrap(), vec![0.0, -1.0, -3.0]);

        let inv = scalar_div(1.0, &x).unwrap();
        assert_ne!(inv, x);
        assert_eq!(inv.to_vec().unwrap(), vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_plus_balances_list() {
        let xs: Vec<E> = (0..5).map(|i| expr(vec![i as f32], &[1])).collect();
        assert_eq!(plus(&xs).unwrap().to_vec().unwrap(), vec![10.0]);
        assert_eq!(plus(&xs[..1]).unwrap(), xs[0]);
        assert!(plus::<CpuBackend>(&[]).is_err());

        let act = relu_list(&[expr(vec![-3.0], &[1]), expr(vec![1.0], &[1])]).unwrap();
        assert_eq!(act.to_vec().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_elementwise() {
        let x = expr(vec![0.0, 4.0], &[2]);
        assert_eq!(sqrt(&x, 0.0).unwrap().to_vec().unwrap(), vec![0.0, 2.0]);
        assert_eq!(square(&x).unwrap().to_vec().unwrap(), vec![0.0, 16.0]);
        assert_eq!(logit(&x).unwrap().to_vec().unwrap()[0], 0.5);
        assert_eq!(swish(&x).unwrap().to_vec().unwrap()[0], 0.0);
        assert_abs_diff_eq!(tanh(&x).unwrap().to_vec().unwrap()[1], 4f32.tanh(), epsilon = 1e-6);
    }

    // === Axis direction ===

    #[test]
    fn test_sum_follows_emulated_axes() {
        // emulated [3, 2]: inner extent 3, outer extent 2
        let x = iota(&[3, 2]);

        let inner = sum(&x, 0).unwrap();
        assert_eq!(inner.shape().unwrap(), Shape::new(vec![1, 2]));
        assert_eq!(inner.to_vec().unwrap(), vec![3.0, 12.0]);

        let outer = sum(&x, -1).unwrap();
        assert_eq!(outer.shape().unwrap(), Shape::new(vec![3, 1]));
        assert_eq!(outer.to_vec().unwrap(), vec![3.0, 5.0, 7.0]);
        assert_eq!(sum(&x, 1).unwrap().to_vec().unwrap(), outer.to_vec().unwrap());

        assert_eq!(mean(&x, 0).unwrap().to_vec().unwrap(), vec![1.0, 4.0]);
        assert!(matches!(sum(&x, 2), Err(Error::AxisOutOfRange { axis: 2, rank: 2 })));
    }

    #[test]
    fn test_transpose_axes() {
        let x = iota(&[3, 2]);
        let t = transpose_axes(&x, &[1, 0]).unwrap();
        assert_eq!(t.shape().unwrap(), Shape::new(vec![2, 3]));
        assert_eq!(t.to_vec().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(transpose(&x).unwrap().to_vec().unwrap(), t.to_vec().unwrap());

        // rank 3: swap the two inner axes, keep the outer one
        let y = iota(&[2, 3, 2]);
        let s = transpose_axes(&y, &[1, 0, 2]).unwrap();
        assert_eq!(s.shape().unwrap(), Shape::new(vec![3, 2, 2]));
        assert_eq!(
            s.to_vec().unwrap(),
            vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0, 6.0, 8.0, 10.0, 7.0, 9.0, 11.0]
        );
        assert!(transpose_axes(&y, &[1, 0]).is_err());
    }

    #[test]
    fn test_concatenate_axes() {
        let a = expr(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = expr(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]);

        let inner = concatenate(&[a.clone(), b.clone()], 0).unwrap();
        assert_eq!(inner.shape().unwrap(), Shape::new(vec![4, 2]));
        assert_eq!(
            inner.to_vec().unwrap(),
            vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]
        );

        let outer = concatenate(&[a.clone(), b], -1).unwrap();
        assert_eq!(outer.shape().unwrap(), Shape::new(vec![2, 4]));
        assert_eq!(outer.to_vec().unwrap(), (1..=8).map(|v| v as f32).collect::<Vec<_>>());

        assert_eq!(repeat(&a, 1, 0).unwrap(), a);
        assert_eq!(repeat(&a, 3, -1).unwrap().shape().unwrap(), Shape::new(vec![2, 6]));
        assert!(repeat(&a, 0, 0).is_err());
    }

    #[test]
    fn test_step_and_gather() {
        let x = iota(&[3, 2]);
        let last = step(&x, -1, 0).unwrap();
        assert_eq!(last.shape().unwrap(), Shape::new(vec![1, 2]));
        assert_eq!(last.to_vec().unwrap(), vec![2.0, 5.0]);
        assert_eq!(step(&x, 1, -1).unwrap().to_vec().unwrap(), vec![3.0, 4.0, 5.0]);
        assert!(step(&x, 3, 0).is_err());

        // engine [3, 2]
        let m = iota(&[2, 3]);
        assert_eq!(rows(&m, &[2, 0]).unwrap().to_vec().unwrap(), vec![4.0, 5.0, 0.0, 1.0]);
        assert_eq!(cols(&m, &[1]).unwrap().to_vec().unwrap(), vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_reshaping() {
        let v = iota(&[4]);
        assert_eq!(atleast_3d(&v).unwrap().shape().unwrap(), Shape::new(vec![4, 1, 1]));
        assert_eq!(atleast_1d(&v).unwrap(), v);

        let x = iota(&[2, 3, 4]);
        assert_eq!(flatten_2d(&x).unwrap().shape().unwrap(), Shape::new(vec![2, 12]));
        assert_eq!(flatten(&x).unwrap().shape().unwrap(), Shape::new(vec![24]));
        assert!(reshape(&x, &Shape::new(vec![5])).is_err());
    }

    #[test]
    fn test_weighted_average() {
        let x = expr(vec![1.0, 3.0], &[2]);
        let w = expr(vec![1.0, 3.0], &[2]);
        let avg = weighted_average(&x, &w, 0).unwrap();
        assert_abs_diff_eq!(avg.scalar().unwrap(), 2.5, epsilon = 1e-6);
        assert_eq!(scalar_product(&x, &w, 0).unwrap().to_vec().unwrap(), vec![10.0]);
    }

    // === Softmax and cross-entropy ===

    #[test]
    fn test_softmax_along_inner_axis() {
        let x = iota(&[3, 2]);
        let p = softmax(&x).unwrap().to_vec().unwrap();
        assert_abs_diff_eq!(p[0] + p[1] + p[2], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[3] + p[4] + p[5], 1.0, epsilon = 1e-6);

        let q = softmax_axis(&x, -1).unwrap().to_vec().unwrap();
        assert_abs_diff_eq!(q[0] + q[3], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cross_entropy_picks_class() {
        // one token, two classes with probabilities 1/4 and 3/4
        let logits = expr(vec![0.0, 3f32.ln()], &[2, 1]);
        let label = expr(vec![1.0], &[1]);
        let ce = cross_entropy(&logits, &label).unwrap();
        assert_eq!(ce.shape().unwrap(), Shape::new(vec![1, 1]));
        assert_abs_diff_eq!(ce.scalar().unwrap(), -(0.75f32).ln(), epsilon = 1e-5);
    }

    // === Affine ===

    #[test]
    fn test_affine_left_multiplies() {
        let w = expr(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let x = expr(vec![5.0, 6.0], &[2]);
        let b = expr(vec![1.0, 1.0], &[2]);
        assert_eq!(affine(&x, &w, &b).unwrap().to_vec().unwrap(), vec![18.0, 40.0]);
        assert_eq!(affine(&x, &w, &E::empty()).unwrap().to_vec().unwrap(), vec![17.0, 39.0]);
    }

    #[test]
    fn test_affine_batched_contracts_features() {
        let w = expr(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = expr(vec![1.0, 1.0], &[2]);

        // two columns [5, 6] and [7, 8]; batch equals the feature width
        let x = expr(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]);
        let y = affine(&x, &w, &b).unwrap();
        assert_eq!(y.shape().unwrap(), Shape::new(vec![2, 2]));
        assert_eq!(y.to_vec().unwrap(), vec![18.0, 40.0, 24.0, 54.0]);

        let x = expr(vec![5.0, 6.0, 7.0, 8.0, 0.0, 1.0], &[2, 3]);
        let y = affine(&x, &w, &E::empty()).unwrap();
        assert_eq!(y.shape().unwrap(), Shape::new(vec![2, 3]));
        assert_eq!(y.to_vec().unwrap(), vec![17.0, 39.0, 23.0, 53.0, 2.0, 4.0]);
    }

    #[test]
    fn test_affine_rejects_mismatched_weight() {
        let w = expr(vec![1.0, 2.0], &[2]);
        let x = expr(vec![5.0, 6.0], &[2]);
        assert!(matches!(
            affine(&x, &w, &E::empty()),
            Err(Error::InvalidArgument(_))
        ));

        let w = expr(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
        assert!(matches!(
            affine(&x, &w, &E::empty()),
            Err(Error::InvalidArgument(_))
        ));
    }

    // === Dropout ===

    #[test]
    fn test_dropout_edges() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = expr(vec![1.0; 64], &[8, 8]);

        assert_eq!(dropout(&x, 0.0, &mut rng).unwrap(), x);
        let all = dropout(&x, 1.0, &mut rng).unwrap();
        assert!(all.to_vec().unwrap().iter().all(|&v| v == 0.0));

        let half = dropout(&x, 0.5, &mut rng).unwrap().to_vec().unwrap();
        assert!(half.iter().all(|&v| v == 0.0 || v == 2.0));

        assert!(matches!(dropout(&x, 1.5, &mut rng), Err(Error::InvalidArgument(_))));
        assert!(dropout(&x, f32::NAN, &mut rng).is_err());
    }

    #[test]
    fn test_dropout_preserves_expectation() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = expr(vec![1.0; 10_000], &[10_000]);
        let y = dropout(&x, 0.3, &mut rng).unwrap().to_vec().unwrap();
        let mean = y.iter().sum::<f32>() / y.len() as f32;
        assert_abs_diff_eq!(mean, 1.0, epsilon = 0.05);
    }

    #[test]
    fn test_dropout_with_mask() {
        let x = expr(vec![1.0, 2.0], &[2]);
        let mask = expr(vec![0.0, 2.0], &[2]);
        assert_eq!(dropout_masked(&x, &mask).unwrap().to_vec().unwrap(), vec![0.0, 4.0]);
    }

    // === Failures ===

    #[test]
    fn test_unimplemented_operators_name_themselves() {
        let x = iota(&[2]);
        assert!(matches!(leakyrelu(&x), Err(Error::Unimplemented("leakyrelu"))));
        assert!(matches!(layer_norm(&x, &x, &x, 1e-9), Err(Error::Unimplemented("layer_norm"))));
        assert!(matches!(select(&x, 0, &[0]), Err(Error::Unimplemented("select"))));
        assert!(matches!(
            dot(&x, &x, false, false, 1.0),
            Err(Error::Unimplemented("dot"))
        ));
        assert!(matches!(max_pooling(&x, 1, 1), Err(Error::Unimplemented("max_pooling"))));
    }

    #[test]
    fn test_empty_operand() {
        let x = iota(&[2]);
        assert!(matches!(
            add(&x, &E::empty()),
            Err(Error::EmptyExpression { op: "add" })
        ));
        assert!(debug(&x, "x").is_ok());
    }
}
