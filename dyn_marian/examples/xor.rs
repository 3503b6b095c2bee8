//! XOR problem training example.
//!
//! Trains a two-layer network built from named graph parameters and the
//! expression operators, with the optimizer bound on its first update. The
//! four inputs go through the network as one batch.

use dyn_backend_cpu::{CpuBackend, CpuDevice};
use dyn_marian::{
    inits, ops, Expr, ExpressionGraph, GraphConfig, OptimizerWrapper, Result, Shape,
};

type Graph = ExpressionGraph<CpuBackend>;

/// 2 -> 8 -> 1; parameters are created on the first pass and reused after.
fn forward(graph: &mut Graph, x: &Expr<CpuBackend>) -> Result<Expr<CpuBackend>> {
    let w1 = graph.param("W1", &Shape::new(vec![2, 8]), &inits::glorot_uniform(), false)?;
    let b1 = graph.param("b1", &Shape::new(vec![8]), &inits::zeros(), false)?;
    let w2 = graph.param("W2", &Shape::new(vec![8, 1]), &inits::glorot_uniform(), false)?;
    let b2 = graph.param("b2", &Shape::new(vec![1]), &inits::zeros(), false)?;

    let h = ops::tanh(&ops::affine(x, &w1, &b1)?)?;
    ops::logit(&ops::affine(&h, &w2, &b2)?)
}

fn main() -> Result<()> {
    let inputs = [[0.0f32, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
    let targets = vec![0.0f32, 1.0, 1.0, 0.0];

    let mut graph = Graph::new(GraphConfig::new(CpuDevice).with_seed(7));
    let mut opt = OptimizerWrapper::adam(0.05);

    // features innermost, one column per example
    let x = graph.constant(
        &Shape::new(vec![2, inputs.len()]),
        &inits::from_vector(inputs.concat()),
    )?;
    let t = graph.constant(
        &Shape::new(vec![1, inputs.len()]),
        &inits::from_vector(targets.clone()),
    )?;

    println!("Training XOR network...\n");

    for epoch in 0..500 {
        let y = forward(&mut graph, &x)?;
        let loss = ops::sum_all(&ops::square(&ops::sub(&y, &t)?)?)?;

        graph.backward(&loss)?;
        opt.update(&mut graph)?;

        if epoch % 100 == 0 {
            println!("Epoch {:4}: loss = {:.6}", epoch, loss.scalar()?);
        }
    }

    println!("\nPredictions:");
    let y = forward(&mut graph, &x)?.to_vec()?;
    for ((input, target), pred) in inputs.iter().zip(&targets).zip(&y) {
        println!("  {:?} -> {:.3} (target {})", input, pred, target);
    }

    Ok(())
}
