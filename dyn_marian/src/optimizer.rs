//! Optimizer wrapper: binds an engine learner to a graph on first use.

use dyn_tensor::learner::{Adam, Learner, Sgd};
use dyn_tensor::Backend;

use crate::error::Result;
use crate::graph::ExpressionGraph;

/// Update rule of the engine learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sgd,
    Adam,
}

enum State<B: Backend> {
    /// Only the recipe is known.
    Unbound,
    /// Bound to the trainable parameters present at the first update.
    Bound(Box<dyn Learner<B>>),
}

/// Applies one gradient step per [`update`](OptimizerWrapper::update).
///
/// The first update binds a learner to the graph's trainable parameters.
/// Parameters registered after that are never updated by this wrapper.
pub struct OptimizerWrapper<B: Backend> {
    eta: f32,
    algorithm: Algorithm,
    state: State<B>,
}

impl<B: Backend> OptimizerWrapper<B> {
    pub fn new(eta: f32, algorithm: Algorithm) -> Self {
        OptimizerWrapper {
            eta,
            algorithm,
            state: State::Unbound,
        }
    }

    pub fn sgd(eta: f32) -> Self {
        Self::new(eta, Algorithm::Sgd)
    }

    pub fn adam(eta: f32) -> Self {
        Self::new(eta, Algorithm::Adam)
    }

    pub fn learning_rate(&self) -> f32 {
        self.eta
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, State::Bound(_))
    }

    /// Number of parameters the learner owns; 0 while unbound.
    pub fn bound_parameter_count(&self) -> usize {
        match &self.state {
            State::Unbound => 0,
            State::Bound(learner) => learner.parameters().len(),
        }
    }

    /// Apply one step using the graph's current gradients. Returns the
    /// number of parameters changed.
    pub fn update(&mut self, graph: &mut ExpressionGraph<B>) -> Result<usize> {
        if let State::Unbound = self.state {
            self.state = State::Bound(self.bind(graph));
        }
        let State::Bound(learner) = &mut self.state else {
            return Ok(0);
        };

        let trainable = graph.trainable_parameters().len();
        let bound = learner.parameters().len();
        if trainable > bound {
            log::warn!(
                "{} parameters registered after the optimizer was bound are not updated",
                trainable - bound
            );
        }

        let updated = learner.update(&*graph)?;
        graph.mark_gradients_applied();
        log::debug!("{:?} step: {} parameters updated", self.algorithm, updated);
        Ok(updated)
    }

    fn bind(&self, graph: &ExpressionGraph<B>) -> Box<dyn Learner<B>> {
        let params = graph.trainable_parameters();
        log::debug!(
            "binding {:?} learner (eta {}) to {} parameters",
            self.algorithm,
            self.eta,
            params.len()
        );
        match self.algorithm {
            Algorithm::Sgd => Box::new(Sgd::new(params, self.eta)),
            Algorithm::Adam => Box::new(Adam::new(params, self.eta)),
        }
    }
}
