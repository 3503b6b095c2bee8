//! Named-parameter graph.
//!
//! The graph owns the parameter table and the gradient map. Parameters are
//! created lazily on first request and never removed; the gradient map always
//! holds one entry per registered parameter.

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

use dyn_tensor::{Backend, GradientStore, NodeId, Tensor};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::inits::Initializer;
use crate::ops;
use crate::shape::Shape;

/// Construction-time settings of an [`ExpressionGraph`].
#[derive(Debug, Clone)]
pub struct GraphConfig<D> {
    /// Device every allocation of the graph is placed on.
    pub device: D,
    /// Seed for initializers and dropout masks; `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub inference: bool,
}

impl<D> GraphConfig<D> {
    pub fn new(device: D) -> Self {
        GraphConfig {
            device,
            seed: None,
            inference: false,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

struct Param<B: Backend> {
    expr: Expr<B>,
    trainable: bool,
}

pub struct ExpressionGraph<B: Backend> {
    device: B::Device,
    inference: bool,
    rng: StdRng,
    params: IndexMap<String, Param<B>>,
    gradients: IndexMap<NodeId, Option<B::Tensor>>,
    /// Set by a backward pass, cleared by an optimizer update.
    pending_gradients: bool,
}

impl<B: Backend> ExpressionGraph<B> {
    pub fn new(config: GraphConfig<B::Device>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        ExpressionGraph {
            device: config.device,
            inference: config.inference,
            rng,
            params: IndexMap::new(),
            gradients: IndexMap::new(),
            pending_gradients: false,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn set_inference(&mut self, inference: bool) {
        self.inference = inference;
    }

    pub fn is_inference(&self) -> bool {
        self.inference
    }

    /// Get or create the parameter `name`.
    ///
    /// A new parameter is materialized from `init`; an existing one is
    /// returned as the identical handle if `shape` matches, and is an error
    /// otherwise. A `fixed` parameter is registered but never trained.
    pub fn param(
        &mut self,
        name: &str,
        shape: &Shape,
        init: &Initializer,
        fixed: bool,
    ) -> Result<Expr<B>> {
        if let Some(p) = self.params.get(name) {
            let existing = p.expr.shape()?.to_shape();
            if existing != *shape {
                return Err(Error::ParamShapeMismatch {
                    name: name.to_string(),
                    existing,
                    requested: shape.clone(),
                });
            }
            return Ok(p.expr.clone());
        }

        let engine_shape = shape.to_engine();
        let data = init.materialize(&engine_shape, &mut self.rng)?;
        let value = B::from_vec(data, engine_shape, &self.device)?;
        let expr = Expr::from(Tensor::var(name, value));

        log::debug!(
            "registered parameter '{}' shape={} init={}{}",
            name,
            shape,
            init.kind(),
            if fixed { " (fixed)" } else { "" }
        );

        if let Some(id) = expr.id() {
            self.gradients.insert(id, None);
        }
        self.params.insert(
            name.to_string(),
            Param {
                expr: expr.clone(),
                trainable: !fixed,
            },
        );
        Ok(expr)
    }

    /// The parameter `name`, or the empty expression.
    pub fn get(&self, name: &str) -> Expr<B> {
        self.params
            .get(name)
            .map(|p| p.expr.clone())
            .unwrap_or_default()
    }

    /// Constant on the graph's device; random initializers use the graph's
    /// generator.
    pub fn constant(&mut self, shape: &Shape, init: &Initializer) -> Result<Expr<B>> {
        ops::constant_with_rng(shape, init, &self.device, &mut self.rng)
    }

    /// Inverted-dropout mask of `shape` for use with [`ops::dropout_masked`].
    pub fn dropout(&mut self, prob: f32, shape: &Shape) -> Result<Expr<B>> {
        let mask =
            ops::dropout_mask::<B, _>(prob, &shape.to_engine(), &self.device, &mut self.rng)?;
        Ok(mask.into())
    }

    /// All parameters in registration order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &Expr<B>)> {
        self.params.iter().map(|(name, p)| (name.as_str(), &p.expr))
    }

    /// Handles of the trainable parameters, in registration order.
    pub(crate) fn trainable_parameters(&self) -> Vec<Tensor<B>> {
        self.params
            .values()
            .filter(|p| p.trainable)
            .filter_map(|p| p.expr.tensor().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Run one reverse pass from `root` and refresh the gradient of every
    /// registered parameter. Parameters not reached by `root` get no gradient.
    ///
    /// Calling this twice without an optimizer update in between discards the
    /// first pass's gradients.
    pub fn backward(&mut self, root: &Expr<B>) -> Result<()> {
        let root = root.node("backward")?;
        if self.pending_gradients {
            log::warn!("backward called again before the previous gradients were applied");
        }

        let mut grads = root.backward()?;
        let mut received = 0;
        for p in self.params.values() {
            let Some(id) = p.expr.id() else { continue };
            let grad = if p.trainable { grads.take(id) } else { None };
            if grad.is_some() {
                received += 1;
            }
            self.gradients.insert(id, grad);
        }

        log::debug!(
            "backward: {} of {} parameters received a gradient",
            received,
            self.params.len()
        );
        self.pending_gradients = true;
        Ok(())
    }

    pub fn backprop(&mut self, root: &Expr<B>) -> Result<()> {
        self.backward(root)
    }

    /// Current gradient of a parameter, if the last pass produced one.
    pub fn gradient(&self, param: &Expr<B>) -> Option<&B::Tensor> {
        param.id().and_then(|id| self.grad(id))
    }

    pub fn gradient_by_name(&self, name: &str) -> Option<&B::Tensor> {
        self.params.get(name).and_then(|p| self.gradient(&p.expr))
    }

    pub(crate) fn mark_gradients_applied(&mut self) {
        self.pending_gradients = false;
    }
}

impl<B: Backend> GradientStore<B> for ExpressionGraph<B> {
    fn grad(&self, id: NodeId) -> Option<&B::Tensor> {
        self.gradients.get(&id).and_then(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inits;
    use approx::assert_abs_diff_eq;
    use dyn_backend_cpu::{CpuBackend, CpuDevice};
    use dyn_tensor::TensorData;

    fn graph() -> ExpressionGraph<CpuBackend> {
        ExpressionGraph::new(GraphConfig::new(CpuDevice).with_seed(1234))
    }

    #[test]
    fn test_param_aliasing() {
        let mut g = graph();
        let shape = Shape::new(vec![2, 2]);
        let a = g.param("W1", &shape, &inits::zeros(), false).unwrap();
        let b = g.param("W1", &shape, &inits::ones(), false).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.to_vec().unwrap(), vec![0.0; 4]);
        assert_eq!(g.len(), 1);

        let err = g
            .param("W1", &Shape::new(vec![3, 3]), &inits::zeros(), false)
            .unwrap_err();
        assert!(matches!(err, Error::ParamShapeMismatch { ref name, .. } if name == "W1"));
    }

    #[test]
    fn test_param_shape_is_emulated() {
        let mut g = graph();
        let w = g
            .param("W", &Shape::new(vec![3, 2]), &inits::glorot_uniform(), false)
            .unwrap();
        assert_eq!(w.shape().unwrap(), Shape::new(vec![3, 2]));
        assert_eq!(w.tensor().unwrap().shape().dims(), &[2, 3]);
        assert_eq!(w.name(), Some("W"));
    }

    #[test]
    fn test_param_from_vector_size_checked() {
        let mut g = graph();
        let err = g
            .param("b", &Shape::new(vec![3]), &inits::from_vector(vec![1.0f32, 2.0]), false)
            .unwrap_err();
        assert!(matches!(err, Error::InitializerSizeMismatch { expected: 3, got: 2 }));
        assert!(g.get("b").is_empty());
    }

    #[test]
    fn test_get_is_pure_lookup() {
        let mut g = graph();
        assert!(g.get("missing").is_empty());
        let p = g.param("p", &Shape::new(vec![1]), &inits::zeros(), false).unwrap();
        assert_eq!(g.get("p"), p);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_seeded_graphs_are_reproducible() {
        let mut a = graph();
        let mut b = graph();
        let shape = Shape::new(vec![4, 4]);
        let pa = a.param("W", &shape, &inits::uniform(), false).unwrap();
        let pb = b.param("W", &shape, &inits::uniform(), false).unwrap();
        assert_eq!(pa.to_vec().unwrap(), pb.to_vec().unwrap());

        let ma = a.dropout(0.5, &shape).unwrap();
        let mb = b.dropout(0.5, &shape).unwrap();
        assert_eq!(ma.to_vec().unwrap(), mb.to_vec().unwrap());
    }

    #[test]
    fn test_backward_fills_every_entry() {
        let mut g = graph();
        let w = g
            .param("w", &Shape::new(vec![2]), &inits::from_vector(vec![1.0f32, 2.0]), false)
            .unwrap();
        let unused = g.param("unused", &Shape::new(vec![2]), &inits::zeros(), false).unwrap();
        let frozen = g
            .param("frozen", &Shape::new(vec![2]), &inits::ones(), true)
            .unwrap();

        // loss = sum(w * w * frozen)
        let loss = ops::sum_all(&ops::mul(&ops::square(&w).unwrap(), &frozen).unwrap()).unwrap();
        g.backward(&loss).unwrap();

        let grad = g.gradient(&w).unwrap();
        assert_abs_diff_eq!(grad.as_slice()[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(grad.as_slice()[1], 4.0, epsilon = 1e-6);
        assert!(g.gradient(&unused).is_none());
        assert!(g.gradient_by_name("frozen").is_none());
        assert!(g.gradient_by_name("w").is_some());
        assert_eq!(g.trainable_parameters().len(), 2);
    }

    #[test]
    fn test_backward_requires_root() {
        let mut g = graph();
        assert!(matches!(
            g.backprop(&Expr::empty()),
            Err(Error::EmptyExpression { op: "backward" })
        ));
    }

    #[test]
    fn test_parameters_in_registration_order() {
        let mut g = graph();
        for name in ["c", "a", "b"] {
            g.param(name, &Shape::new(vec![1]), &inits::zeros(), false).unwrap();
        }
        let names: Vec<&str> = g.parameters().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_graph_constant_and_flags() {
        let mut g = graph();
        let c = g.constant(&Shape::new(vec![2, 1]), &inits::from_value(3.0)).unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![3.0, 3.0]);
        assert!(c.name().is_none());

        assert!(!g.is_inference());
        g.set_inference(true);
        assert!(g.is_inference());
        assert_eq!(*g.device(), CpuDevice);
    }
}
