//! Errors raised by the expression layer.
//!
//! Nothing here is transient: every variant is a programming or
//! configuration error at the call site and is returned immediately.

use std::borrow::Cow;

use crate::shape::Shape;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // === Shapes and axes ===
    /// Axis index outside `[-rank, rank)`.
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    /// A parameter name was requested again with a different shape.
    #[error("parameter '{name}' already exists with shape {existing}, requested {requested}")]
    ParamShapeMismatch {
        name: String,
        existing: Shape,
        requested: Shape,
    },

    /// A data initializer does not fit the target shape.
    #[error("initializer provides {got} values but the shape needs {expected}")]
    InitializerSizeMismatch { expected: usize, got: usize },

    #[error("expression of shape {shape} is not a scalar")]
    NotAScalar { shape: Shape },

    /// An operator received the empty sentinel where a value is required.
    #[error("{op}: empty expression where a value is required")]
    EmptyExpression { op: &'static str },

    /// Failure reported by the engine itself.
    #[error(transparent)]
    Engine(#[from] dyn_tensor::Error),

    // === Unsupported operators ===
    #[error("operator '{0}' is not implemented")]
    Unimplemented(&'static str),

    // === Configuration ===
    #[error("missing required option '{key}'")]
    MissingKey { key: String },

    #[error("option '{key}' holds a {found}, expected {expected}")]
    WrongKind {
        key: String,
        expected: Cow<'static, str>,
        found: Cow<'static, str>,
    },

    #[error("invalid value '{value}' for '{key}'")]
    InvalidOption { key: String, value: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("options cannot be serialized to text")]
    SerializationUnsupported,
}

pub type Result<T> = std::result::Result<T, Error>;
