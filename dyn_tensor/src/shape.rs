//! Engine shapes and strides.
//!
//! The engine is row-major: axis 0 is the outermost (slowest-varying)
//! dimension and the last axis is contiguous in memory.

use std::fmt;

use crate::error::{Error, Result};

/// A tensor shape (dimensions), outermost axis first.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// Rank-0 shape with one element.
    pub fn scalar() -> Self {
        Shape(vec![])
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.0[axis]
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail unless `axis` addresses one of this shape's dimensions.
    pub fn check_axis(&self, axis: usize) -> Result<()> {
        if axis < self.ndim() {
            Ok(())
        } else {
            Err(Error::AxisOutOfRange {
                axis,
                rank: self.ndim(),
            })
        }
    }

    /// Copy of this shape with one extent replaced.
    pub fn with_dim(&self, axis: usize, extent: usize) -> Shape {
        let mut dims = self.0.clone();
        dims[axis] = extent;
        Shape(dims)
    }

    /// Row-major strides: the last axis has stride 1.
    pub fn contiguous_strides(&self) -> Strides {
        let mut strides = vec![0usize; self.ndim()];
        let mut step = 1;
        for (stride, &extent) in strides.iter_mut().zip(&self.0).rev() {
            *stride = step;
            step *= extent;
        }
        Strides(strides)
    }

    /// Broadcast result of two shapes, aligned at the innermost (last) axis.
    pub fn broadcast_with(&self, other: &Shape) -> Result<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let extent = |s: &Shape, i: usize| {
            let pad = ndim - s.ndim();
            if i < pad {
                1
            } else {
                s.0[i - pad]
            }
        };

        let dims = (0..ndim)
            .map(|i| match (extent(self, i), extent(other, i)) {
                (a, b) if a == b || b == 1 => Ok(a),
                (1, b) => Ok(b),
                _ => Err(Error::Broadcast {
                    lhs: self.clone(),
                    rhs: other.clone(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Shape(dims))
    }

    /// Axes of `broadcast_shape` that must be summed to get back to this shape.
    ///
    /// Includes leading axes this shape does not have and axes where this
    /// shape has extent 1 but the broadcast shape does not.
    pub fn reduction_axes_from(&self, broadcast_shape: &Shape) -> Vec<usize> {
        let offset = broadcast_shape.ndim() - self.ndim();
        let mut axes: Vec<usize> = (0..offset).collect();

        for i in 0..self.ndim() {
            if self.0[i] == 1 && broadcast_shape.0[offset + i] != 1 {
                axes.push(offset + i);
            }
        }

        axes
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

/// Tensor strides (step size in each dimension).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Strides(pub Vec<usize>);

impl Strides {
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Compute flat index from multi-dimensional indices.
    pub fn index(&self, indices: &[usize]) -> usize {
        debug_assert_eq!(self.0.len(), indices.len());
        self.0.iter().zip(indices.iter()).map(|(s, i)| s * i).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_has_one_element() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert!(s.contiguous_strides().as_slice().is_empty());
    }

    #[test]
    fn test_zero_extent_has_no_elements() {
        assert_eq!(Shape::new(vec![3, 0]).numel(), 0);
    }

    #[test]
    fn test_contiguous_strides_row_major() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.contiguous_strides().0, vec![12, 4, 1]);
        assert_eq!(s.contiguous_strides().index(&[1, 2, 3]), 23);
    }

    #[test]
    fn test_check_axis() {
        let s = Shape::new(vec![2, 3]);
        assert!(s.check_axis(1).is_ok());
        assert!(matches!(
            s.check_axis(2),
            Err(Error::AxisOutOfRange { axis: 2, rank: 2 })
        ));
    }

    #[test]
    fn test_broadcast_rules() {
        let a = Shape::new(vec![3, 4]);
        assert_eq!(a.broadcast_with(&Shape::scalar()).unwrap(), a);
        assert_eq!(
            Shape::new(vec![1, 4])
                .broadcast_with(&Shape::new(vec![3, 1]))
                .unwrap(),
            Shape::new(vec![3, 4])
        );
        assert_eq!(
            Shape::new(vec![4])
                .broadcast_with(&Shape::new(vec![2, 3, 4]))
                .unwrap(),
            Shape::new(vec![2, 3, 4])
        );
        assert!(matches!(
            Shape::new(vec![2, 3]).broadcast_with(&Shape::new(vec![2, 4])),
            Err(Error::Broadcast { .. })
        ));
    }

    #[test]
    fn test_reduction_axes() {
        let original = Shape::new(vec![1, 4]);
        assert_eq!(original.reduction_axes_from(&Shape::new(vec![3, 4])), vec![0]);

        let original2 = Shape::new(vec![4]);
        assert_eq!(
            original2.reduction_axes_from(&Shape::new(vec![2, 3, 4])),
            vec![0, 1]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::new(vec![3])), "(3,)");
        assert_eq!(format!("{}", Shape::new(vec![3, 4])), "(3, 4)");
    }
}
