//! Expression handles.

use std::fmt;

use dyn_tensor::{Backend, NodeId, Tensor, TensorData};

use crate::error::{Error, Result};
use crate::shape::{Shape, ShapeView};

/// A handle to one engine graph node, or the empty sentinel.
///
/// Cloning copies the handle. Two expressions are equal when they refer to
/// the same node; two empty expressions are equal to each other and to
/// nothing else.
pub struct Expr<B: Backend>(Option<Tensor<B>>);

impl<B: Backend> Expr<B> {
    /// The "no value supplied" sentinel used for optional operands.
    pub fn empty() -> Self {
        Expr(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn tensor(&self) -> Option<&Tensor<B>> {
        self.0.as_ref()
    }

    /// The node behind this handle, failing on the empty sentinel.
    pub fn node(&self, op: &'static str) -> Result<&Tensor<B>> {
        self.0.as_ref().ok_or(Error::EmptyExpression { op })
    }

    pub fn id(&self) -> Option<NodeId> {
        self.0.as_ref().map(|t| t.id())
    }

    /// Shape in the emulated convention, viewed without copying.
    pub fn shape(&self) -> Result<ShapeView<'_>> {
        Ok(ShapeView::new(self.node("shape")?.shape()))
    }

    pub fn elements(&self) -> Result<usize> {
        Ok(self.shape()?.elements())
    }

    /// The value of a one-element expression.
    pub fn scalar(&self) -> Result<f32> {
        let node = self.node("scalar")?;
        if node.numel() != 1 {
            return Err(Error::NotAScalar {
                shape: Shape::from_engine(node.shape()),
            });
        }
        Ok(node.item()?)
    }

    /// The realized engine tensor.
    pub fn val(&self) -> Result<B::Tensor> {
        Ok(self.node("val")?.value())
    }

    /// Values in flattened order (identical in both axis conventions).
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        Ok(self.node("to_vec")?.to_vec())
    }

    /// Parameter name, for parameter leaves.
    pub fn name(&self) -> Option<&str> {
        self.0.as_ref().and_then(|t| t.var_name())
    }

    /// Log name, shape and values at debug level.
    pub fn dump(&self) -> Result<()> {
        let node = self.node("dump")?;
        log::debug!(
            "{} shape={} values={:?}",
            self.name().unwrap_or("<expr>"),
            ShapeView::new(node.shape()),
            node.data().as_slice()
        );
        Ok(())
    }
}

impl<B: Backend> Clone for Expr<B> {
    fn clone(&self) -> Self {
        Expr(self.0.clone())
    }
}

impl<B: Backend> Default for Expr<B> {
    fn default() -> Self {
        Expr::empty()
    }
}

impl<B: Backend> From<Tensor<B>> for Expr<B> {
    fn from(t: Tensor<B>) -> Self {
        Expr(Some(t))
    }
}

impl<B: Backend> PartialEq for Expr<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<B: Backend> Eq for Expr<B> {}

impl<B: Backend> fmt::Debug for Expr<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "Expr(empty)"),
            Some(t) => f
                .debug_struct("Expr")
                .field("id", &t.id())
                .field("name", &t.var_name())
                .field("shape", &Shape::from_engine(t.shape()))
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyn_backend_cpu::{constant, var, CpuBackend};
    use dyn_tensor::Shape as EngineShape;

    type E = Expr<CpuBackend>;

    #[test]
    fn test_empty_sentinel() {
        let e = E::empty();
        assert!(e.is_empty());
        assert_eq!(e, E::default());
        assert!(matches!(e.shape(), Err(Error::EmptyExpression { op: "shape" })));

        let x: E = constant(vec![1.0], EngineShape::new(vec![1])).unwrap().into();
        assert_ne!(e, x);
    }

    #[test]
    fn test_identity_equality() {
        let a: E = constant(vec![1.0, 2.0], EngineShape::new(vec![2])).unwrap().into();
        let b: E = constant(vec![1.0, 2.0], EngineShape::new(vec![2])).unwrap().into();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_shape_is_emulated() {
        let x: E = constant(vec![0.0; 6], EngineShape::new(vec![2, 3])).unwrap().into();
        let shape = x.shape().unwrap();
        assert_eq!(shape.get(0).unwrap(), 3);
        assert_eq!(shape.get(-1).unwrap(), 2);
        assert_eq!(x.elements().unwrap(), 6);
    }

    #[test]
    fn test_scalar_access() {
        let one: E = constant(vec![4.5], EngineShape::new(vec![1, 1])).unwrap().into();
        assert_eq!(one.scalar().unwrap(), 4.5);

        let two: E = constant(vec![1.0, 2.0], EngineShape::new(vec![2])).unwrap().into();
        assert!(matches!(two.scalar(), Err(Error::NotAScalar { .. })));
    }

    #[test]
    fn test_name_of_parameter() {
        let w: E = var("W1", vec![0.0; 4], EngineShape::new(vec![2, 2])).unwrap().into();
        assert_eq!(w.name(), Some("W1"));
        assert_eq!(w.to_vec().unwrap(), vec![0.0; 4]);
        assert!(w.dump().is_ok());
    }
}
