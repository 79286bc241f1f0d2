use std::fmt;

use super::ivar::IVar;
use crate::errors::{SfError, SfResult};

/// A symbolic dimension. `Mul(d, k)` denotes `d*k`; `Div(d, k)` denotes
/// `ceil(d/k)`, the striding convention used by convolution and slicing.
#[derive(Clone, Debug)]
pub enum Dim {
    Known(usize),
    Var(IVar<Dim>),
    Mul(Box<Dim>, usize),
    Div(Box<Dim>, usize),
}

impl Dim {
    /// A fresh, unsolved dimension.
    pub fn inferred() -> Dim {
        Dim::Var(IVar::new())
    }

    /// The concrete value, if every variable underneath has been solved.
    pub fn value(&self) -> Option<usize> {
        match self {
            Dim::Known(n) => Some(*n),
            Dim::Var(v) => v.solution().and_then(|d| d.value()),
            Dim::Mul(d, k) => d.value().map(|n| n * k),
            Dim::Div(d, k) => d.value().map(|n| (n + k - 1) / k),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.value().is_some()
    }

    /// Follows solved variables transitively, returning the canonical form.
    fn strip(&self) -> Dim {
        match self {
            Dim::Var(v) => match v.solution() {
                Some(d) => d.strip(),
                None => self.clone(),
            },
            _ => self.clone(),
        }
    }

    /// `self * k`, folded when the value is already known.
    pub fn times(&self, k: usize) -> Dim {
        if k == 1 {
            return self.clone();
        }
        match self.value() {
            Some(n) => Dim::Known(n * k),
            None => Dim::Mul(Box::new(self.clone()), k),
        }
    }

    /// `ceil(self / k)`, folded when the value is already known.
    pub fn ceil_div(&self, k: usize) -> Dim {
        if k == 1 {
            return self.clone();
        }
        match self.value() {
            Some(n) => Dim::Known((n + k - 1) / k),
            None => Dim::Div(Box::new(self.clone()), k),
        }
    }

    /// Makes `a` and `b` denote the same value, solving inference variables
    /// where possible. `op` names the operator for diagnostics.
    pub fn unify(op: &str, a: &Dim, b: &Dim) -> SfResult<()> {
        if let (Some(x), Some(y)) = (a.value(), b.value()) {
            if x == y {
                return Ok(());
            }
            return Err(mismatch(op, a, b, "unequal values"));
        }
        let sa = a.strip();
        let sb = b.strip();
        match (&sa, &sb) {
            (Dim::Var(va), Dim::Var(vb)) if va.same(vb) => Ok(()),
            (Dim::Var(v), other) | (other, Dim::Var(v)) => {
                v.solve(other.clone());
                Ok(())
            }
            (Dim::Mul(d, k), Dim::Known(n)) | (Dim::Known(n), Dim::Mul(d, k)) => {
                if n % k != 0 {
                    return Err(mismatch(op, a, b, "not divisible"));
                }
                Dim::unify(op, d, &Dim::Known(n / k))
            }
            (Dim::Mul(d1, k1), Dim::Mul(d2, k2)) => {
                if k1 != k2 {
                    return Err(mismatch(op, a, b, "different multipliers"));
                }
                Dim::unify(op, d1, d2)
            }
            (Dim::Div(d1, k1), Dim::Div(d2, k2)) => {
                if k1 != k2 {
                    return Err(mismatch(op, a, b, "different multipliers"));
                }
                Dim::unify(op, d1, d2)
            }
            _ => {
                if sa.value().is_none() && sb.value().is_none() {
                    // Neither side can resolve yet; leave both open.
                    Ok(())
                } else {
                    Err(mismatch(op, a, b, "incomplete dimension"))
                }
            }
        }
    }
}

fn mismatch(op: &str, a: &Dim, b: &Dim, reason: &'static str) -> SfError {
    SfError::DimMismatch {
        op: op.to_string(),
        left: a.to_string(),
        right: b.to_string(),
        reason,
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(n) => write!(f, "{n}"),
            None => match self {
                Dim::Known(n) => write!(f, "{n}"),
                Dim::Var(_) => f.write_str("?"),
                Dim::Mul(d, k) => write!(f, "{d}*{k}"),
                Dim::Div(d, k) => write!(f, "{d}/{k}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Dim;

    #[test]
    fn known_values_must_match() {
        assert!(Dim::unify("t", &Dim::Known(3), &Dim::Known(3)).is_ok());
        assert!(Dim::unify("t", &Dim::Known(3), &Dim::Known(4)).is_err());
    }

    #[test]
    fn variables_solve_to_the_other_side() {
        let v = Dim::inferred();
        Dim::unify("t", &v, &Dim::Known(5)).unwrap();
        assert_eq!(v.value(), Some(5));
        // Already solved: further unification just checks the value.
        Dim::unify("t", &v, &Dim::Known(5)).unwrap();
        assert!(Dim::unify("t", &v, &Dim::Known(6)).is_err());
    }

    #[test]
    fn multiple_of_divides_known() {
        let inner = Dim::inferred();
        let m = inner.times(2);
        Dim::unify("t", &m, &Dim::Known(10)).unwrap();
        assert_eq!(inner.value(), Some(5));
        assert_eq!(m.value(), Some(10));
    }

    #[test]
    fn multiple_of_rejects_indivisible() {
        let m = Dim::inferred().times(2);
        let err = Dim::unify("t", &m, &Dim::Known(7)).unwrap_err();
        assert!(err.to_string().contains("not divisible"), "{err}");
    }

    #[test]
    fn different_multipliers_conflict() {
        let a = Dim::inferred().times(2);
        let b = Dim::inferred().times(3);
        assert!(Dim::unify("t", &a, &b).is_err());
    }

    #[test]
    fn divisor_vs_known_is_incomplete() {
        let d = Dim::inferred().ceil_div(2);
        let err = Dim::unify("t", &d, &Dim::Known(4)).unwrap_err();
        assert!(err.to_string().contains("incomplete"), "{err}");
    }

    #[test]
    fn ceil_division_rounds_up() {
        let v = Dim::inferred();
        let d = v.ceil_div(2);
        Dim::unify("t", &v, &Dim::Known(7)).unwrap();
        assert_eq!(d.value(), Some(4));
    }

    #[test]
    fn two_open_sides_stay_open() {
        let a = Dim::inferred().ceil_div(2);
        let b = Dim::inferred().times(2);
        Dim::unify("t", &a, &b).unwrap();
        assert!(!a.is_resolved());
        assert!(!b.is_resolved());
    }
}
