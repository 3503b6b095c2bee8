//! # dyn_marian - Marian expression API on the dyn_tensor engine
//!
//! This crate lets model code written against Marian's expression API run on
//! the dynamic `dyn_tensor` engine:
//!
//! - **Shapes**: innermost-axis-first [`Shape`]s and axis indices, translated
//!   to the engine's row-major convention
//! - **Expressions**: [`Expr`] handles with shape views and scalar access
//! - **Options**: the typed [`Options`] dictionary
//! - **Operators**: arithmetic, reductions, reshaping, softmax, dropout ([`ops`])
//! - **Costs**: cross-entropy training costs and guided alignment ([`cost`])
//! - **Graph**: named parameters and gradients ([`ExpressionGraph`])
//! - **Optimizer**: SGD and Adam bound on first use ([`OptimizerWrapper`])
//!
//! ## Example: one training step
//!
//! ```ignore
//! use dyn_backend_cpu::{CpuBackend, CpuDevice};
//! use dyn_marian::{inits, ops, ExpressionGraph, GraphConfig, OptimizerWrapper, Shape};
//!
//! let mut graph = ExpressionGraph::<CpuBackend>::new(GraphConfig::new(CpuDevice));
//! let w = graph.param("W", &Shape::new(vec![2, 2]), &inits::glorot_uniform(), false)?;
//! let b = graph.param("b", &Shape::new(vec![2]), &inits::zeros(), false)?;
//! let x = graph.constant(&Shape::new(vec![2]), &inits::from_vector(vec![1.0f32, 2.0]))?;
//!
//! let y = ops::tanh(&ops::affine(&x, &w, &b)?)?;
//! let loss = ops::sum(&ops::square(&y)?, 0)?;
//!
//! let mut opt = OptimizerWrapper::adam(0.01);
//! graph.backward(&loss)?;
//! opt.update(&mut graph)?;
//! ```

pub mod cost;
pub mod data;
pub mod error;
pub mod expr;
pub mod graph;
pub mod inits;
pub mod ops;
pub mod optimizer;
pub mod options;
pub mod shape;

pub use cost::{cost, guided_alignment_cost, guided_alignment_cost_from_batch};
pub use data::{Batch, CorpusBatch, SubBatch};
pub use error::{Error, Result};
pub use expr::Expr;
pub use graph::{ExpressionGraph, GraphConfig};
pub use inits::Initializer;
pub use optimizer::{Algorithm, OptimizerWrapper};
pub use options::{FromValue, Options, Value};
pub use shape::{axes_to_engine, axis_to_engine, Shape, ShapeView};
