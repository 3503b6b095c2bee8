//! Parameter and constant initializers.

use rand::Rng;

use dyn_tensor::Shape as EngineShape;

use crate::error::{Error, Result};

/// How to fill a freshly allocated tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// Every element set to one value.
    Fill(f32),
    /// Xavier/Glorot uniform, gain 1.
    GlorotUniform,
    Uniform { low: f32, high: f32 },
    /// Explicit values in flattened order.
    Vector(Vec<f32>),
}

/// Numeric element types accepted by [`from_vector`].
pub trait Element: Copy {
    fn to_f32(self) -> f32;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(impl Element for $t {
            fn to_f32(self) -> f32 {
                self as f32
            }
        })*
    };
}

impl_element!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, usize);

pub fn zeros() -> Initializer {
    Initializer::Fill(0.0)
}

pub fn ones() -> Initializer {
    Initializer::Fill(1.0)
}

pub fn from_value(v: f32) -> Initializer {
    Initializer::Fill(v)
}

pub fn glorot_uniform() -> Initializer {
    Initializer::GlorotUniform
}

/// U(-0.1, 0.1).
pub fn uniform() -> Initializer {
    Initializer::Uniform {
        low: -0.1,
        high: 0.1,
    }
}

pub fn from_vector<T: Element>(values: Vec<T>) -> Initializer {
    Initializer::Vector(values.into_iter().map(Element::to_f32).collect())
}

/// Word-vector file loading is not supported.
pub fn from_word2vec(
    _file: &str,
    _dim_voc: usize,
    _dim_emb: usize,
    _normalize: bool,
) -> Result<Initializer> {
    Err(Error::Unimplemented("from_word2vec"))
}

/// (fan_in, fan_out) of an engine shape.
fn compute_fans(shape: &EngineShape) -> (f32, f32) {
    let dims = shape.dims();
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f32, dims[0] as f32),
        2 => (dims[1] as f32, dims[0] as f32),
        _ => {
            let receptive_field: usize = dims[2..].iter().product();
            (
                (dims[1] * receptive_field) as f32,
                (dims[0] * receptive_field) as f32,
            )
        }
    }
}

impl Initializer {
    pub fn kind(&self) -> &'static str {
        match self {
            Initializer::Fill(_) => "fill",
            Initializer::GlorotUniform => "glorot_uniform",
            Initializer::Uniform { .. } => "uniform",
            Initializer::Vector(_) => "vector",
        }
    }

    /// Produce the flattened values for `shape`.
    pub fn materialize<R: Rng>(&self, shape: &EngineShape, rng: &mut R) -> Result<Vec<f32>> {
        let n = shape.numel();
        let values = match self {
            Initializer::Fill(v) => vec![*v; n],
            Initializer::Vector(values) => {
                if values.len() != n {
                    return Err(Error::InitializerSizeMismatch {
                        expected: n,
                        got: values.len(),
                    });
                }
                values.clone()
            }
            Initializer::Uniform { low, high } => sample_uniform(n, *low, *high, rng),
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = compute_fans(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1.0)).sqrt();
                sample_uniform(n, -limit, limit, rng)
            }
        };
        Ok(values)
    }
}

fn sample_uniform<R: Rng>(n: usize, low: f32, high: f32, rng: &mut R) -> Vec<f32> {
    (0..n).map(|_| low + (high - low) * rng.gen::<f32>()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fill_and_vector() {
        let mut rng = StdRng::seed_from_u64(0);
        let shape = EngineShape::new(vec![2, 2]);
        assert_eq!(zeros().materialize(&shape, &mut rng).unwrap(), vec![0.0; 4]);
        assert_eq!(from_value(3.0).materialize(&shape, &mut rng).unwrap(), vec![3.0; 4]);
        assert_eq!(
            from_vector(vec![1i32, 2, 3, 4]).materialize(&shape, &mut rng).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_vector_size_mismatch() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = from_vector(vec![1.0f32, 2.0])
            .materialize(&EngineShape::new(vec![3]), &mut rng)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InitializerSizeMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_random_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let shape = EngineShape::new(vec![10, 20]);

        let u = uniform().materialize(&shape, &mut rng).unwrap();
        assert!(u.iter().all(|v| v.abs() <= 0.1));

        let limit = (6.0f32 / 30.0).sqrt();
        let g = glorot_uniform().materialize(&shape, &mut rng).unwrap();
        assert_eq!(g.len(), 200);
        assert!(g.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_word2vec_unimplemented() {
        assert!(matches!(
            from_word2vec("vectors.txt", 100, 32, true),
            Err(Error::Unimplemented("from_word2vec"))
        ));
    }
}
