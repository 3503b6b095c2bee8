//! Error type shared by the graph, the backends, and the learners.

use crate::shape::Shape;

/// Every failure the engine can report.
///
/// Engine errors are programming errors in the caller (bad shapes, bad axes,
/// wrong element counts); none of them are transient.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two shapes cannot be broadcast against each other.
    #[error("shapes {lhs} and {rhs} are not broadcast-compatible")]
    Broadcast { lhs: Shape, rhs: Shape },

    /// A tensor had a different shape than the operation requires.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Axis index outside `[0, rank)`.
    #[error("axis {axis} out of range for tensor of rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },

    /// Buffer length does not match the element count of the shape.
    #[error("element count mismatch: shape {shape} needs {expected} elements, got {got}")]
    ElementCount {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Inner dimensions of a matrix product disagree.
    #[error("matmul shape mismatch: {lhs} @ {rhs}")]
    Matmul { lhs: Shape, rhs: Shape },

    /// A permutation passed to transpose is not a permutation of `0..rank`.
    #[error("invalid permutation {perm:?} for tensor of rank {rank}")]
    Permutation { perm: Vec<usize>, rank: usize },

    /// A slice reaches past the end of an axis.
    #[error("narrow out of bounds: axis {axis}, start {start}, len {len}, extent {extent}")]
    NarrowOutOfBounds {
        axis: usize,
        start: usize,
        len: usize,
        extent: usize,
    },

    /// One-hot label outside `[0, num_classes)`.
    #[error("one-hot index {index} out of range for {num_classes} classes")]
    ClassIndex { index: f32, num_classes: usize },

    /// Scalar read from a tensor holding more than one element.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// In-place assignment on a node that is not a trainable variable.
    #[error("cannot assign to a non-variable node")]
    AssignToConstant,

    /// Operation needs at least one operand.
    #[error("{op} requires at least one input")]
    EmptyInput { op: &'static str },
}

/// Convenience result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
