use std::rc::Rc;

use super::ctxt::GradKey;
use super::ops::{stack, SliceSpec};
use super::Expr;
use crate::errors::{SfError, SfResult};
use crate::shape::Shape;
use crate::types::FloatElem;

/// Symbolic derivatives of a scalar `y` with respect to each of `xs`,
/// optionally seeded with `dy`. Each result carries the matching input
/// shape; the backend gradient subgraph is built once per run and memoized
/// on the structural triple `(y, xs, dy)`.
pub fn gradients<T: FloatElem>(
    y: &Expr<T>,
    xs: &[Expr<T>],
    dy: Option<&Expr<T>>,
) -> SfResult<Vec<Expr<T>>> {
    Shape::unify("gradients", y.shape(), &Shape::scalar())?;
    let yr = y.erased();
    let xrs = Rc::new(xs.iter().map(|x| x.erased()).collect::<Vec<_>>());
    let dyr = dy.map(|d| d.erased());
    let mut out = Vec::with_capacity(xs.len());
    for (i, x) in xs.iter().enumerate() {
        let yr = yr.clone();
        let xrs = Rc::clone(&xrs);
        let dyr = dyr.clone();
        out.push(Expr::new(
            x.shape().clone(),
            100,
            Box::new(move |ctxt| {
                let key = GradKey {
                    y: yr.id(),
                    xs: xrs.iter().map(|x| x.id()).collect(),
                    dy: dyr.as_ref().map(|d| d.id()),
                };
                if let Some(nodes) = ctxt.grad_cached(&key) {
                    return Ok(nodes[i]);
                }
                let yn = ctxt.lower(&yr)?;
                let mut xns = Vec::with_capacity(xrs.len());
                for x in xrs.iter() {
                    xns.push(ctxt.lower(x)?);
                }
                let dn = match &dyr {
                    Some(d) => Some(ctxt.lower(d)?),
                    None => None,
                };
                let nodes = ctxt.add_gradients(yn, &xns, dn)?;
                let node = nodes[i];
                ctxt.cache_grads(key, nodes);
                Ok(node)
            }),
        ));
    }
    Ok(out)
}

/// First derivative of a scalar-to-scalar function at `x`.
pub fn diff<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    Shape::unify("diff", x.shape(), &Shape::scalar())?;
    let y = f(x)?;
    Ok(gradients(&y, std::slice::from_ref(x), None)?.swap_remove(0))
}

/// `n`-th derivative by repeated gradient construction.
pub fn diff_n<T, F>(n: usize, f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    Shape::unify("diff_n", x.shape(), &Shape::scalar())?;
    let mut y = f(x)?;
    for _ in 0..n {
        y = gradients(&y, std::slice::from_ref(x), None)?.swap_remove(0);
    }
    Ok(y)
}

/// Gradient of a scalar field at a (possibly vector-valued) point.
pub fn grad<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    let y = f(x)?;
    Ok(gradients(&y, std::slice::from_ref(x), None)?.swap_remove(0))
}

fn known_output_len<T: FloatElem>(op: &str, y: &Expr<T>) -> SfResult<usize> {
    let (dims, _) = y.shape().flatten();
    if dims.len() != 1 {
        return Err(SfError::bad(op, format!("expects a rank-1 output, found {}", y.shape())));
    }
    dims[0]
        .value()
        .ok_or_else(|| SfError::bad(op, "the output length must be known"))
}

/// Rows of partial derivatives of a vector field, stacked along axis 0.
pub fn jacobian<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    let y = f(x)?;
    let m = known_output_len("jacobian", &y)?;
    let mut rows = Vec::with_capacity(m);
    for i in 0..m {
        let yi = y.slice(&[SliceSpec::Idx(i as i64)])?;
        rows.push(gradients(&yi, std::slice::from_ref(x), None)?.swap_remove(0));
    }
    stack(&rows, 0)
}

/// Second derivatives of a scalar field: the jacobian of its gradient.
pub fn hessian<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    jacobian(move |xi| grad(&f, xi), x)
}

/// Trace of the hessian of a scalar field.
pub fn laplacian<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    let h = hessian(f, x)?;
    Ok(h.diag_part()?.sum())
}

/// Trace of the jacobian of a vector field.
pub fn divergence<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    let j = jacobian(f, x)?;
    Ok(j.diag_part()?.sum())
}

/// Curl of a three-component field over a three-component point.
pub fn curl<T, F>(f: F, x: &Expr<T>) -> SfResult<Expr<T>>
where
    T: FloatElem,
    F: Fn(&Expr<T>) -> SfResult<Expr<T>>,
{
    let op = "curl";
    Shape::unify(op, x.shape(), &Shape::known(&[3]))?;
    let y = f(x)?;
    Shape::unify(op, y.shape(), &Shape::known(&[3]))?;
    let mut component_grads = Vec::with_capacity(3);
    for i in 0..3 {
        let yi = y.slice(&[SliceSpec::Idx(i)])?;
        component_grads.push(gradients(&yi, std::slice::from_ref(x), None)?.swap_remove(0));
    }
    let entry = |gi: &Expr<T>, j: i64| gi.slice(&[SliceSpec::Idx(j)]);
    let c0 = entry(&component_grads[2], 1)?.try_sub(&entry(&component_grads[1], 2)?)?;
    let c1 = entry(&component_grads[0], 2)?.try_sub(&entry(&component_grads[2], 0)?)?;
    let c2 = entry(&component_grads[1], 0)?.try_sub(&entry(&component_grads[0], 1)?)?;
    stack(&[c0, c1, c2], 0)
}
