use crate::RVec;
use std::slice::Iter;

/// Dimension value for a size that is not known until runtime.
pub const UNKNOWN_DIM: i64 = -1;

/// Single-element dims marking a shape whose rank is not known.
pub const UNKNOWN_RANK: i64 = -2;

/// Ordered dimension sizes of a tensor.
///
/// Dimensions may be [`UNKNOWN_DIM`]; a shape of exactly `[UNKNOWN_RANK]` means
/// even the rank is unknown.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(RVec<i64>);

impl Shape {
    pub fn new(dims: RVec<i64>) -> Self {
        Self(dims)
    }

    pub fn scalar() -> Self {
        Self(RVec::new())
    }

    pub fn unknown_rank() -> Self {
        Self(crate::rvec![UNKNOWN_RANK])
    }

    pub fn inner(&self) -> &RVec<i64> {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> Iter<'_, i64> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.0.to_vec()
    }

    pub fn is_unknown_rank(&self) -> bool {
        self.0.len() == 1 && self.0[0] == UNKNOWN_RANK
    }

    /// Rank of the shape, or `None` when the rank itself is unknown.
    pub fn rank(&self) -> Option<usize> {
        if self.is_unknown_rank() {
            None
        } else {
            Some(self.0.len())
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_fully_known(&self) -> bool {
        !self.is_unknown_rank() && self.0.iter().all(|&d| d >= 0)
    }

    /// Size of dimension `axis` if both the rank and that dimension are known.
    pub fn known_dim(&self, axis: usize) -> Option<i64> {
        if self.is_unknown_rank() {
            return None;
        }
        self.get(axis).filter(|&d| d >= 0)
    }

    /// Last dimension, if known.
    pub fn last_dim(&self) -> Option<i64> {
        let rank = self.rank()?;
        rank.checked_sub(1).and_then(|axis| self.known_dim(axis))
    }

    /// Element count, if every dimension is known and the count fits in `i64`.
    pub fn numel(&self) -> Option<i64> {
        if !self.is_fully_known() {
            return None;
        }
        self.0.iter().try_fold(1i64, |acc, &d| acc.checked_mul(d))
    }

    /// Resolve a possibly negative axis against this shape's rank.
    pub fn resolve_axis(&self, axis: i64) -> Option<usize> {
        let rank = self.rank()? as i64;
        let resolved = if axis < 0 { axis + rank } else { axis };
        (0..rank).contains(&resolved).then_some(resolved as usize)
    }

    pub fn push(&mut self, dim: i64) {
        self.0.push(dim);
    }

    pub fn set(&mut self, axis: usize, dim: i64) {
        if let Some(d) = self.0.get_mut(axis) {
            *d = dim;
        }
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown_rank() {
            return write!(f, "[?..]");
        }
        let dims = self
            .0
            .iter()
            .map(|&d| {
                if d == UNKNOWN_DIM {
                    "?".to_string()
                } else {
                    d.to_string()
                }
            })
            .collect::<Vec<_>>();
        write!(f, "[{}]", dims.join("x"))
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Self(dims.iter().copied().collect())
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Self(dims.into_iter().collect())
    }
}

impl<const N: usize> From<[i64; N]> for Shape {
    fn from(dims: [i64; N]) -> Self {
        Self(dims.into_iter().collect())
    }
}

/// Per-dimension inclusive `(min, max)` bounds for a partially known shape.
///
/// A `max` of [`UNKNOWN_DIM`] means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShapeRange(Vec<(i64, i64)>);

impl ShapeRange {
    pub fn new(bounds: Vec<(i64, i64)>) -> Self {
        Self(bounds)
    }

    pub fn bounds(&self) -> &[(i64, i64)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `shape` lies within these bounds. Unknown dims are accepted.
    pub fn admits(&self, shape: &Shape) -> bool {
        match shape.rank() {
            None => true,
            Some(rank) if rank != self.0.len() => false,
            Some(_) => shape.iter().zip(self.0.iter()).all(|(&d, &(lo, hi))| {
                d == UNKNOWN_DIM || (d >= lo && (hi == UNKNOWN_DIM || d <= hi))
            }),
        }
    }
}

#[macro_export]
macro_rules! shape {
    ($($x:expr),*$(,)*) => ($crate::Shape::new($crate::rvec![$($x as i64),*]));
}
