//! Shapes and axes in the emulated convention.
//!
//! The emulated API lists the innermost (fastest-varying) axis first and lets
//! negative indices count from the outermost end. The engine is row-major and
//! lists the outermost axis first, so converting a shape is a pure reversal
//! and the flattened element order is the same on both sides.

use std::fmt;

use dyn_tensor::Shape as EngineShape;

use crate::error::{Error, Result};

/// Emulated shape: `dims()[0]` is the innermost extent.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn scalar() -> Self {
        Shape(vec![])
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements.
    pub fn elements(&self) -> usize {
        self.0.iter().product()
    }

    /// Extent of an emulated axis (negative counts from the outermost end).
    pub fn get(&self, axis: i64) -> Result<usize> {
        Ok(self.0[normalize_axis(self.rank(), axis)?])
    }

    /// Replace the extent of an emulated axis.
    pub fn set(&mut self, axis: i64, extent: usize) -> Result<()> {
        let i = normalize_axis(self.rank(), axis)?;
        self.0[i] = extent;
        Ok(())
    }

    pub fn to_engine(&self) -> EngineShape {
        EngineShape::new(self.0.iter().rev().copied().collect())
    }

    pub fn from_engine(shape: &EngineShape) -> Self {
        Shape(shape.dims().iter().rev().copied().collect())
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

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(a: [usize; N]) -> Self {
        Shape(a.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

/// Emulated view over an engine shape, without copying it.
#[derive(Clone, Copy, Debug)]
pub struct ShapeView<'a> {
    engine: &'a EngineShape,
}

impl<'a> ShapeView<'a> {
    pub fn new(engine: &'a EngineShape) -> Self {
        ShapeView { engine }
    }

    pub fn rank(&self) -> usize {
        self.engine.ndim()
    }

    pub fn len(&self) -> usize {
        self.rank()
    }

    pub fn is_empty(&self) -> bool {
        self.rank() == 0
    }

    pub fn elements(&self) -> usize {
        self.engine.numel()
    }

    /// Extent of an emulated axis.
    pub fn get(&self, axis: i64) -> Result<usize> {
        Ok(self.engine.dim(axis_to_engine(self.rank(), axis)?))
    }

    pub fn engine(&self) -> &'a EngineShape {
        self.engine
    }

    pub fn to_shape(&self) -> Shape {
        Shape::from_engine(self.engine)
    }
}

impl PartialEq<Shape> for ShapeView<'_> {
    fn eq(&self, other: &Shape) -> bool {
        self.rank() == other.rank()
            && self.engine.dims().iter().rev().eq(other.dims().iter())
    }
}

impl fmt::Display for ShapeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_shape().fmt(f)
    }
}

/// Resolve a possibly negative emulated axis to its position in `[0, rank)`.
fn normalize_axis(rank: usize, axis: i64) -> Result<usize> {
    let r = rank as i64;
    let a = if axis < 0 { axis + r } else { axis };
    if (0..r).contains(&a) {
        Ok(a as usize)
    } else {
        Err(Error::AxisOutOfRange { axis, rank })
    }
}

/// Emulated axis -> engine axis: `rank - 1 - normalized(axis)`.
pub fn axis_to_engine(rank: usize, axis: i64) -> Result<usize> {
    Ok(rank - 1 - normalize_axis(rank, axis)?)
}

/// Map a list of emulated axes and reverse their order.
///
/// For a permutation this yields the engine permutation with the same
/// meaning, since both the axis values and their positions flip.
pub fn axes_to_engine(rank: usize, axes: &[i64]) -> Result<Vec<usize>> {
    let mut mapped = axes
        .iter()
        .map(|&a| axis_to_engine(rank, a))
        .collect::<Result<Vec<_>>>()?;
    mapped.reverse();
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_axis_mapping() {
        assert_eq!(axis_to_engine(3, 0).unwrap(), 2);
        assert_eq!(axis_to_engine(3, 2).unwrap(), 0);
        assert_eq!(axis_to_engine(3, -1).unwrap(), 0);
        assert_eq!(axis_to_engine(3, -3).unwrap(), 2);
        assert!(matches!(
            axis_to_engine(3, 3),
            Err(Error::AxisOutOfRange { axis: 3, rank: 3 })
        ));
        assert!(matches!(
            axis_to_engine(3, -4),
            Err(Error::AxisOutOfRange { axis: -4, rank: 3 })
        ));
        assert!(axis_to_engine(0, 0).is_err());
    }

    #[test]
    fn test_batch_mapping_reverses_order() {
        // emulated transpose [1, 0, 2] on rank 3
        assert_eq!(axes_to_engine(3, &[1, 0, 2]).unwrap(), vec![0, 2, 1]);
        assert_eq!(axes_to_engine(2, &[0]).unwrap(), vec![1]);
        assert!(axes_to_engine(2, &[0, 2]).is_err());
    }

    #[test]
    fn test_shape_conversion() {
        let s = Shape::new(vec![4, 3, 2]);
        assert_eq!(s.to_engine().dims(), &[2, 3, 4]);
        assert_eq!(s.get(0).unwrap(), 4);
        assert_eq!(s.get(-1).unwrap(), 2);
        assert_eq!(s.elements(), 24);
        assert_eq!(format!("{}", s), "[4x3x2]");
    }

    #[test]
    fn test_shape_view_reads_emulated_axes() {
        let engine = EngineShape::new(vec![5, 7]);
        let view = ShapeView::new(&engine);
        assert_eq!(view.get(0).unwrap(), 7);
        assert_eq!(view.get(-1).unwrap(), 5);
        assert_eq!(view.elements(), 35);
        assert_eq!(view, Shape::new(vec![7, 5]));
        assert!(view.get(2).is_err());
    }

    #[test]
    fn test_set_extent() {
        let mut s = Shape::new(vec![2, 3]);
        s.set(-1, 1).unwrap();
        assert_eq!(s.dims(), &[2, 1]);
        assert!(s.set(2, 1).is_err());
    }

    proptest! {
        #[test]
        fn prop_shape_round_trip(dims in prop::collection::vec(0usize..9, 0..=6)) {
            let s = Shape::new(dims);
            let engine = s.to_engine();
            prop_assert_eq!(engine.numel(), s.elements());
            prop_assert_eq!(Shape::from_engine(&engine), s.clone());
            prop_assert_eq!(ShapeView::new(&engine).to_shape(), s);
        }

        #[test]
        fn prop_reversal_is_self_inverse(dims in prop::collection::vec(0usize..9, 0..=6)) {
            let s = Shape::new(dims);
            let twice = EngineShape::new(s.to_engine().dims().iter().rev().copied().collect());
            prop_assert_eq!(twice.dims(), s.dims());
        }

        #[test]
        fn prop_negative_alias_agrees(rank in 1usize..=6, a in 0i64..6) {
            prop_assume!((a as usize) < rank);
            let r = rank as i64;
            prop_assert_eq!(axis_to_engine(rank, a).unwrap(), axis_to_engine(rank, a - r).unwrap());
            prop_assert!(axis_to_engine(rank, a).unwrap() < rank);
        }

        #[test]
        fn prop_out_of_range_rejected(rank in 0usize..=6, offset in 0i64..4) {
            let r = rank as i64;
            prop_assert!(axis_to_engine(rank, r + offset).is_err());
            prop_assert!(axis_to_engine(rank, -r - 1 - offset).is_err());
        }

        #[test]
        fn prop_batch_form_maps_permutations(rank in 1usize..=6, seed in any::<u64>()) {
            // A rotation of 0..rank is a valid permutation.
            let k = (seed % rank as u64) as usize;
            let perm: Vec<i64> = (0..rank).map(|i| ((i + k) % rank) as i64).collect();
            let mapped = axes_to_engine(rank, &perm).unwrap();
            let mut sorted = mapped.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..rank).collect::<Vec<_>>());
            // engine position j holds the image of emulated position rank-1-j
            for (j, &e) in mapped.iter().enumerate() {
                prop_assert_eq!(e, rank - 1 - perm[rank - 1 - j] as usize);
            }
        }
    }
}
