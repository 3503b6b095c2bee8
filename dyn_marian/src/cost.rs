//! Training-loss composites built from the operator library.

use dyn_tensor::{Backend, Tensor};

use crate::data::{CorpusBatch, SubBatch};
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::inits;
use crate::ops;
use crate::options::Options;
use crate::shape::Shape;

const ALIGNMENT_EPSILON: f32 = 1e-6;

/// Token ids of a stream as an emulated `[batch, time]` constant.
pub fn batch_indices<B: Backend>(sb: &SubBatch, device: &B::Device) -> Result<Expr<B>> {
    let data = sb.indices().iter().map(|&i| i as f32).collect();
    grid(sb, data, device)
}

/// Validity mask of a stream as an emulated `[batch, time]` constant.
pub fn batch_mask<B: Backend>(sb: &SubBatch, device: &B::Device) -> Result<Expr<B>> {
    grid(sb, sb.mask().to_vec(), device)
}

fn grid<B: Backend>(sb: &SubBatch, data: Vec<f32>, device: &B::Device) -> Result<Expr<B>> {
    let shape = Shape::new(vec![sb.batch_size(), sb.batch_width()]);
    Ok(Tensor::<B>::from_vec(data, shape.to_engine(), device)?.into())
}

/// Per-token cross-entropy reduced according to `cost_type`.
///
/// `logits` is emulated `[classes, batch, time]`, `indices` is
/// `[batch, time]`; `mask` may be empty. With `smoothing > 0` the per-token
/// cost is interpolated towards a uniform target.
pub fn cost<B: Backend>(
    logits: &Expr<B>,
    indices: &Expr<B>,
    mask: &Expr<B>,
    cost_type: &str,
    smoothing: f32,
) -> Result<Expr<B>> {
    let mut ce = ops::cross_entropy(logits, indices)?;

    if smoothing > 0.0 {
        let ceq = ops::mean(&ops::logsoftmax(logits)?, 0)?;
        ce = ops::sub(
            &ops::mul_scalar(&ce, 1.0 - smoothing)?,
            &ops::mul_scalar(&ceq, smoothing)?,
        )?;
    }

    let mask = align_mask(mask, indices)?;
    if let Some(m) = &mask {
        ce = ops::mul(&ce, m)?;
    }

    let tokens = || -> Result<Expr<B>> {
        match &mask {
            Some(m) => ops::sum_all(m),
            None => {
                let n = indices.elements()? as f32;
                let t = indices.node("cost")?;
                Ok(t.scalar_like(n).into())
            }
        }
    };

    let total = |ce: &Expr<B>| ops::sum(&ops::sum(ce, -1)?, -2);

    match cost_type {
        "ce-mean-words" => ops::div(&total(&ce)?, &tokens()?),
        "ce-sum" => total(&ce),
        "perplexity" => ops::exp(&ops::div(&total(&ce)?, &tokens()?)?),
        "ce-rescore" => ops::neg(&ops::sum(&ce, -1)?),
        "ce-mean" | "cross-entropy" => ops::mean(&ops::sum(&ce, -1)?, -2),
        other => {
            log::debug!("unknown cost type {:?}, using ce-mean", other);
            ops::mean(&ops::sum(&ce, -1)?, -2)
        }
    }
}

/// A mask shaped like `indices` gains a unit class axis so it lines up with
/// the per-token cost.
fn align_mask<B: Backend>(mask: &Expr<B>, indices: &Expr<B>) -> Result<Option<Expr<B>>> {
    let Some(m) = mask.tensor() else {
        return Ok(None);
    };
    let rank = indices.shape()?.rank();
    if m.ndim() != rank {
        return Ok(Some(mask.clone()));
    }
    let mut dims = vec![1];
    dims.extend_from_slice(mask.shape()?.to_shape().dims());
    Ok(Some(ops::reshape(mask, &Shape::new(dims))?))
}

/// Penalty for attention diverging from a reference alignment.
///
/// Both operands are emulated `[trg, src, 1, batch]`; the loss is normalized
/// by the batch size and scaled by `weight`.
pub fn guided_alignment_cost<B: Backend>(
    attention: &Expr<B>,
    alignment: &Expr<B>,
    cost_type: &str,
    weight: f32,
) -> Result<Expr<B>> {
    let att_shape = attention.shape()?.to_shape();
    let aln_shape = alignment.shape()?.to_shape();
    if att_shape != aln_shape {
        return Err(Error::InvalidArgument(format!(
            "guided alignment: attention {} does not match alignment {}",
            att_shape, aln_shape
        )));
    }
    let batch = att_shape.get(-1)? as f32;

    let loss = match cost_type {
        "mse" => {
            let diff = ops::sub(attention, alignment)?;
            ops::div_scalar(&ops::sum_all(&ops::square(&diff)?)?, 2.0 * batch)?
        }
        "mult" => {
            let overlap = ops::sum_all(&ops::mul(attention, alignment)?)?;
            let nll = ops::neg(&ops::log(&ops::add_scalar(&overlap, ALIGNMENT_EPSILON)?)?)?;
            ops::div_scalar(&nll, batch)?
        }
        "ce" => {
            let log_att = ops::log(&ops::add_scalar(attention, ALIGNMENT_EPSILON)?)?;
            let overlap = ops::sum_all(&ops::mul(alignment, &log_att)?)?;
            ops::div_scalar(&ops::neg(&overlap)?, batch)?
        }
        other => {
            return Err(Error::InvalidOption {
                key: "guided-alignment-cost".to_string(),
                value: other.to_string(),
            })
        }
    };
    ops::mul_scalar(&loss, weight)
}

/// [`guided_alignment_cost`] with the reference alignment taken from `batch`
/// and the loss kind and weight read from `options`.
pub fn guided_alignment_cost_from_batch<B: Backend>(
    attention: &Expr<B>,
    batch: &CorpusBatch,
    options: &Options,
) -> Result<Expr<B>> {
    let cost_type: String = options.get("guided-alignment-cost")?;
    let weight: f32 = options.get("guided-alignment-weight")?;

    let device = attention.node("guided_alignment_cost")?.device();
    let shape = attention.shape()?.to_shape();
    let alignment = ops::constant(
        &shape,
        &inits::from_vector(batch.guided_alignment().to_vec()),
        &device,
    )?;
    guided_alignment_cost(attention, &alignment, &cost_type, weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use dyn_backend_cpu::{CpuBackend, CpuDevice};

    type E = Expr<CpuBackend>;

    fn expr(data: Vec<f32>, shape: &[usize]) -> E {
        ops::constant(&Shape::from(shape), &inits::from_vector(data), &CpuDevice).unwrap()
    }

    /// Uniform logits over 4 classes for a 1x2 token grid.
    fn uniform_case() -> (E, E) {
        let logits = expr(vec![0.0; 8], &[4, 1, 2]);
        let indices = expr(vec![1.0, 3.0], &[1, 2]);
        (logits, indices)
    }

    #[test]
    fn test_ce_sum_uniform() {
        let (logits, indices) = uniform_case();
        let c = cost(&logits, &indices, &E::empty(), "ce-sum", 0.0).unwrap();
        assert_abs_diff_eq!(c.scalar().unwrap(), 2.0 * 4f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_perplexity_uniform() {
        let (logits, indices) = uniform_case();
        let c = cost(&logits, &indices, &E::empty(), "perplexity", 0.0).unwrap();
        assert_abs_diff_eq!(c.scalar().unwrap(), 4.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rescore_is_per_sentence() {
        let logits = expr(vec![0.0; 12], &[2, 3, 2]);
        let indices = expr(vec![0.0; 6], &[3, 2]);
        let c = cost(&logits, &indices, &E::empty(), "ce-rescore", 0.0).unwrap();
        assert_eq!(c.shape().unwrap(), Shape::new(vec![1, 3, 1]));
        for v in c.to_vec().unwrap() {
            assert_abs_diff_eq!(v, -2.0 * 2f32.ln(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_smoothing_with_uniform_logits_is_neutral() {
        let (logits, indices) = uniform_case();
        let plain = cost(&logits, &indices, &E::empty(), "ce-sum", 0.0).unwrap();
        let smooth = cost(&logits, &indices, &E::empty(), "ce-sum", 0.1).unwrap();
        assert_abs_diff_eq!(plain.scalar().unwrap(), smooth.scalar().unwrap(), epsilon = 1e-5);
    }

    #[test]
    fn test_smoothing_mixes_in_class_mean() {
        // two tokens over 3 classes, one row of logits per token
        let rows = [[0.1f32, 1.5, -0.7], [2.0, 0.0, 0.3]];
        let labels = [1usize, 2];
        let s = 0.2;

        let logits = expr(rows.concat(), &[3, 1, 2]);
        let indices = expr(labels.iter().map(|&l| l as f32).collect(), &[1, 2]);
        let c = cost(&logits, &indices, &E::empty(), "ce-sum", s).unwrap();

        let expected: f32 = rows
            .iter()
            .zip(labels)
            .map(|(row, label)| {
                let lse = row.iter().map(|v| v.exp()).sum::<f32>().ln();
                let logp: Vec<f32> = row.iter().map(|v| v - lse).collect();
                let mean = logp.iter().sum::<f32>() / logp.len() as f32;
                (1.0 - s) * -logp[label] - s * mean
            })
            .sum();
        assert_abs_diff_eq!(c.scalar().unwrap(), expected, epsilon = 1e-5);

        let plain = cost(&logits, &indices, &E::empty(), "ce-sum", 0.0).unwrap();
        assert!((plain.scalar().unwrap() - expected).abs() > 1e-2);
    }

    #[test]
    fn test_guided_alignment_kinds() {
        let att = expr(vec![0.5, 0.5, 0.25, 0.75], &[2, 1, 1, 2]);
        let aln = expr(vec![1.0, 0.0, 0.0, 1.0], &[2, 1, 1, 2]);

        let mse = guided_alignment_cost(&att, &aln, "mse", 1.0).unwrap();
        let expected = (0.25 + 0.25 + 0.0625 + 0.0625) / 4.0;
        assert_abs_diff_eq!(mse.scalar().unwrap(), expected, epsilon = 1e-6);

        let mult = guided_alignment_cost(&att, &aln, "mult", 2.0).unwrap();
        let expected = 2.0 * -(1.25f32 + 1e-6).ln() / 2.0;
        assert_abs_diff_eq!(mult.scalar().unwrap(), expected, epsilon = 1e-5);

        let ce = guided_alignment_cost(&att, &aln, "ce", 1.0).unwrap();
        let expected = -((0.5f32 + 1e-6).ln() + (0.75f32 + 1e-6).ln()) / 2.0;
        assert_abs_diff_eq!(ce.scalar().unwrap(), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_guided_alignment_unknown_kind() {
        let att = expr(vec![1.0], &[1, 1, 1, 1]);
        let err = guided_alignment_cost(&att, &att, "kl", 1.0).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidOption { ref key, ref value }
                if key == "guided-alignment-cost" && value == "kl"
        ));
    }

    #[test]
    fn test_guided_alignment_from_batch() {
        let mut batch = CorpusBatch::fake_batch(&[2, 1], 1, true);
        batch.set_guided_alignment(vec![1.0, 0.0]);
        let att = expr(vec![0.5, 0.5], &[1, 2, 1, 1]);
        let options = Options::new()
            .with("guided-alignment-cost", "mse")
            .with("guided-alignment-weight", 0.5);

        let c = guided_alignment_cost_from_batch(&att, &batch, &options).unwrap();
        assert_abs_diff_eq!(c.scalar().unwrap(), 0.5 * 0.5 / 2.0, epsilon = 1e-6);

        let missing = Options::new().with("guided-alignment-cost", "mse");
        assert!(matches!(
            guided_alignment_cost_from_batch(&att, &batch, &missing),
            Err(Error::MissingKey { .. })
        ));
    }
}
