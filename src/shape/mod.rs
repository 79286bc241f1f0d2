pub mod dim;
pub mod ivar;

pub use dim::Dim;
pub use ivar::IVar;

use std::fmt;

use crate::errors::{SfError, SfResult};

/// An ordered sequence of symbolic dimensions, optionally followed by a flex
/// tail: an inference variable that may expand into further dimensions
/// during unification. Rank 0 with no flex is a scalar; rank 0 with a flex
/// tail is a scalar broadcastable to any rank.
#[derive(Clone, Debug)]
pub struct Shape {
    dims: Vec<Dim>,
    flex: Option<IVar<Shape>>,
}

impl Shape {
    pub fn closed(dims: Vec<Dim>) -> Shape {
        Shape { dims, flex: None }
    }

    pub fn flexible(dims: Vec<Dim>) -> Shape {
        Shape { dims, flex: Some(IVar::new()) }
    }

    pub fn scalar() -> Shape {
        Shape::closed(Vec::new())
    }

    /// A scalar that unifies with any rank.
    pub fn any() -> Shape {
        Shape::flexible(Vec::new())
    }

    pub fn known(dims: &[usize]) -> Shape {
        Shape::closed(dims.iter().map(|&n| Dim::Known(n)).collect())
    }

    pub(crate) fn from_parts(dims: Vec<Dim>, flex: Option<IVar<Shape>>) -> Shape {
        Shape { dims, flex }
    }

    /// The logical dims and trailing flex variable, with solved flex tails
    /// expanded in place.
    pub(crate) fn flatten(&self) -> (Vec<Dim>, Option<IVar<Shape>>) {
        let mut dims = self.dims.clone();
        let mut flex = self.flex.clone();
        while let Some(v) = flex {
            match v.solution() {
                Some(tail) => {
                    let (tail_dims, tail_flex) = tail.flatten();
                    dims.extend(tail_dims);
                    flex = tail_flex;
                }
                None => return (dims, Some(v)),
            }
        }
        (dims, None)
    }

    /// The known dimensions so far. Open flex tails contribute nothing.
    pub fn dims(&self) -> Vec<Dim> {
        self.flatten().0
    }

    /// The rank, if the shape is closed.
    pub fn rank(&self) -> Option<usize> {
        let (dims, flex) = self.flatten();
        if flex.is_none() {
            Some(dims.len())
        } else {
            None
        }
    }

    /// Concrete dimension values, if the shape is closed and fully resolved.
    pub fn values(&self) -> Option<Vec<usize>> {
        let (dims, flex) = self.flatten();
        if flex.is_some() {
            return None;
        }
        dims.iter().map(|d| d.value()).collect()
    }

    /// Placeholder extents for live-check mode: unresolved dims render as 0.
    pub fn placeholder_dims(&self) -> Vec<usize> {
        self.flatten().0.iter().map(|d| d.value().unwrap_or(0)).collect()
    }

    /// Makes `a` and `b` denote the same logical shape, unifying pairwise
    /// from the front and expanding flex tails as needed.
    pub fn unify(op: &str, a: &Shape, b: &Shape) -> SfResult<()> {
        let (ad, af) = a.flatten();
        let (bd, bf) = b.flatten();
        let common = ad.len().min(bd.len());
        for i in 0..common {
            Dim::unify(op, &ad[i], &bd[i])?;
        }
        if ad.len() > common {
            return match bf {
                None => Err(mismatch(op, a, b)),
                Some(v) => {
                    let fresh: Vec<Dim> =
                        (0..ad.len() - common).map(|_| Dim::inferred()).collect();
                    v.solve(Shape::flexible(fresh));
                    Shape::unify(op, a, b)
                }
            };
        }
        if bd.len() > common {
            return match af {
                None => Err(mismatch(op, a, b)),
                Some(v) => {
                    let fresh: Vec<Dim> =
                        (0..bd.len() - common).map(|_| Dim::inferred()).collect();
                    v.solve(Shape::flexible(fresh));
                    Shape::unify(op, a, b)
                }
            };
        }
        match (af, bf) {
            (None, None) => Ok(()),
            (Some(x), Some(y)) if x.same(&y) => Ok(()),
            (Some(x), Some(y)) => {
                x.solve(Shape::from_parts(Vec::new(), Some(y)));
                Ok(())
            }
            (Some(x), None) | (None, Some(x)) => {
                x.solve(Shape::scalar());
                Ok(())
            }
        }
    }

    /// The pointwise-with-broadcasting convention: unification where a flex
    /// side may be promoted to the other side's rank. Returns the unified
    /// shape.
    pub fn equiv(op: &str, a: &Shape, b: &Shape) -> SfResult<Shape> {
        Shape::unify(op, a, b)?;
        Ok(a.clone())
    }

    /// Ensures the shape has rank at least `n`, solving an open flex tail to
    /// fresh inferred dims when it is shorter.
    pub fn min_rank(op: &str, shape: &Shape, n: usize) -> SfResult<()> {
        let (dims, flex) = shape.flatten();
        if dims.len() >= n {
            return Ok(());
        }
        match flex {
            None => Err(SfError::ShapeMismatch {
                op: op.to_string(),
                expected: format!("rank >= {n}"),
                found: shape.to_string(),
            }),
            Some(v) => {
                let fresh: Vec<Dim> = (0..n - dims.len()).map(|_| Dim::inferred()).collect();
                v.solve(Shape::flexible(fresh));
                Ok(())
            }
        }
    }
}

fn mismatch(op: &str, a: &Shape, b: &Shape) -> SfError {
    SfError::ShapeMismatch {
        op: op.to_string(),
        expected: a.to_string(),
        found: b.to_string(),
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (dims, flex) = self.flatten();
        f.write_str("[")?;
        for (i, d) in dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        if flex.is_some() {
            if !dims.is_empty() {
                f.write_str(", ")?;
            }
            f.write_str("...")?;
        }
        f.write_str("]")
    }
}
