use std::rc::Rc;

use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Ix0, Ix1, Ix2, Ix3, Ix4, IxDyn};

use super::{Ctxt, Expr, ExprRef};
use crate::backend::cpu::CpuBackend;
use crate::errors::{SfError, SfResult};
use crate::graph::OpKind;
use crate::livecheck::live_check;
use crate::session::Session;
use crate::shape::Shape;
use crate::types::{ElemType, TensorValue};

fn constant<T: ElemType>(value: ArrayD<T>, shape: Shape) -> Expr<T> {
    let payload = Rc::new(T::into_value(value));
    let build_payload = Rc::clone(&payload);
    let literal_payload = Rc::clone(&payload);
    Expr::with_literal(
        shape,
        0,
        Box::new(move |ctxt| {
            ctxt.add_op(OpKind::Const((*build_payload).clone()), Vec::new(), None)
        }),
        Box::new(move || Ok((*literal_payload).clone())),
    )
}

/// A rank-0 constant.
pub fn scalar<T: ElemType>(v: T) -> Expr<T> {
    constant(ArrayD::from_elem(IxDyn(&[]), v), Shape::scalar())
}

/// A rank-0 constant that broadcasts to any rank through its flex tail.
pub fn scalar_flex<T: ElemType>(v: T) -> Expr<T> {
    constant(ArrayD::from_elem(IxDyn(&[]), v), Shape::any())
}

/// A rank-1 constant.
pub fn vector<T: ElemType>(values: &[T]) -> Expr<T> {
    let shape = Shape::known(&[values.len()]);
    constant(
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())
            .expect("vector literal is self-consistent"),
        shape,
    )
}

/// A rank-2 constant from rows; jagged rows are rejected.
pub fn matrix<T: ElemType>(rows: &[&[T]]) -> SfResult<Expr<T>> {
    let op = "matrix";
    let height = rows.len();
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut data = Vec::with_capacity(height * width);
    for row in rows {
        if row.len() != width {
            return Err(SfError::bad(
                op,
                format!("jagged rows: expected {width} columns, found {}", row.len()),
            ));
        }
        data.extend_from_slice(row);
    }
    let arr = ArrayD::from_shape_vec(IxDyn(&[height, width]), data)
        .map_err(|e| SfError::bad(op, e.to_string()))?;
    let shape = Shape::known(&[height, width]);
    Ok(constant(arr, shape))
}

/// A rank-3 constant.
pub fn tensor3<T: ElemType>(values: Array3<T>) -> Expr<T> {
    let shape = Shape::known(values.shape());
    constant(values.into_dyn(), shape)
}

/// A rank-4 constant.
pub fn tensor4<T: ElemType>(values: Array4<T>) -> Expr<T> {
    let shape = Shape::known(values.shape());
    constant(values.into_dyn(), shape)
}

/// An `[H, W, C]` image constant.
pub fn image<T: ElemType>(values: Array3<T>) -> Expr<T> {
    tensor3(values)
}

/// A `[frames, H, W, C]` video constant.
pub fn video<T: ElemType>(values: Array4<T>) -> Expr<T> {
    tensor4(values)
}

/// A one-pixel `[1, 1, 3]` image.
pub fn pixel<T: ElemType>(r: T, g: T, b: T) -> Expr<T> {
    let arr = ArrayD::from_shape_vec(IxDyn(&[1, 1, 3]), vec![r, g, b])
        .expect("pixel literal is self-consistent");
    constant(arr, Shape::known(&[1, 1, 3]))
}

/// Stacks equal-shaped expressions into a leading batch dimension.
pub fn batch<T: ElemType>(xs: &[Expr<T>]) -> SfResult<Expr<T>> {
    super::ops::stack(xs, 0)
}

/// Wraps an existing tensor value as a constant expression.
pub fn from_tensor<T: ElemType>(value: TensorValue) -> SfResult<Expr<T>> {
    if value.dtype() != T::DTYPE {
        return Err(SfError::bad(
            "from_tensor",
            format!("dtype mismatch: expected {}, found {}", T::DTYPE, value.dtype()),
        ));
    }
    let shape = Shape::known(value.shape());
    let payload = Rc::new(value);
    let build_payload = Rc::clone(&payload);
    let literal_payload = Rc::clone(&payload);
    Ok(Expr::with_literal(
        shape,
        0,
        Box::new(move |ctxt| {
            ctxt.add_op(OpKind::Const((*build_payload).clone()), Vec::new(), None)
        }),
        Box::new(move || Ok((*literal_payload).clone())),
    ))
}

/// A named weight slot. At build time the materialization context's weight
/// map is consulted; a matching binding replaces the default initializer,
/// anything else falls back to it with a diagnostic.
pub fn variable<T: ElemType>(init: Expr<T>, name: &str) -> Expr<T> {
    let shape = init.shape().clone();
    let slot = name.to_string();
    let initr = init.erased();
    Expr::new(
        shape,
        100,
        Box::new(move |ctxt| {
            let bound = ctxt.weight(&slot).cloned();
            let scope = slot.clone();
            let slot = slot.clone();
            let initr = initr.clone();
            ctxt.with_scope(&scope, move |ctxt| match bound {
                Some(w) if w.dtype() == T::DTYPE => ctxt.lower(&w),
                Some(w) => {
                    tracing::warn!(
                        name = %slot,
                        expected = %T::DTYPE,
                        found = %w.dtype(),
                        "weight binding has the wrong element type, using the default initializer"
                    );
                    ctxt.lower(&initr)
                }
                None => {
                    tracing::debug!(name = %slot, "no weight bound, using the default initializer");
                    ctxt.lower(&initr)
                }
            })
        }),
    )
}

/// Lowers the expressions into a fresh graph and executes them in one
/// session run. Live-check mode short-circuits to zeroed placeholders.
pub(crate) fn run_exprs(
    exprs: &[ExprRef],
    weights: &[(&str, ExprRef)],
) -> SfResult<Vec<TensorValue>> {
    if live_check() {
        return Ok(exprs
            .iter()
            .map(|e| TensorValue::zeros(e.dtype(), &e.shape().placeholder_dims()))
            .collect());
    }
    let mut ctxt = Ctxt::with_weights(weights);
    let fetches = exprs
        .iter()
        .map(|e| ctxt.lower(e))
        .collect::<SfResult<Vec<_>>>()?;
    let session = Session::new(ctxt.into_graph(), Box::new(CpuBackend));
    session.run(&[], &fetches, &[])
}

impl<T: ElemType> Expr<T> {
    /// Materializes and executes this expression, returning the raw value.
    pub fn run(&self) -> SfResult<TensorValue> {
        let mut values = run_exprs(&[self.erased()], &[])?;
        Ok(values.swap_remove(0))
    }

    /// As `run`, with named weight bindings for `variable` nodes.
    pub fn run_with(&self, weights: &[(&str, ExprRef)]) -> SfResult<TensorValue> {
        let mut values = run_exprs(&[self.erased()], weights)?;
        Ok(values.swap_remove(0))
    }

    /// The typed value. Constants answer from their literal payload without
    /// building a graph.
    pub fn get_value(&self) -> SfResult<ArrayD<T>> {
        if live_check() {
            let placeholder = TensorValue::zeros(T::DTYPE, &self.shape().placeholder_dims());
            return T::from_value(placeholder)
                .ok_or_else(|| SfError::internal("placeholder dtype disagrees with tag"));
        }
        let value = match self.literal_value() {
            Some(v) => v?,
            None => self.run()?,
        };
        T::from_value(value).ok_or_else(|| SfError::internal("value dtype disagrees with tag"))
    }

    pub fn to_scalar(&self) -> SfResult<T> {
        let v = self.get_value()?;
        let v = v
            .into_dimensionality::<Ix0>()
            .map_err(|_| SfError::bad("to_scalar", "expected a rank-0 value"))?;
        Ok(v.into_scalar())
    }

    pub fn to_array(&self) -> SfResult<Array1<T>> {
        self.get_value()?
            .into_dimensionality::<Ix1>()
            .map_err(|_| SfError::bad("to_array", "expected a rank-1 value"))
    }

    pub fn to_array2(&self) -> SfResult<Array2<T>> {
        self.get_value()?
            .into_dimensionality::<Ix2>()
            .map_err(|_| SfError::bad("to_array2", "expected a rank-2 value"))
    }

    pub fn to_array3(&self) -> SfResult<Array3<T>> {
        self.get_value()?
            .into_dimensionality::<Ix3>()
            .map_err(|_| SfError::bad("to_array3", "expected a rank-3 value"))
    }

    pub fn to_array4(&self) -> SfResult<Array4<T>> {
        self.get_value()?
            .into_dimensionality::<Ix4>()
            .map_err(|_| SfError::bad("to_array4", "expected a rank-4 value"))
    }
}

/// Evaluates one expression.
pub fn eval<T: ElemType>(e: &Expr<T>) -> SfResult<ArrayD<T>> {
    e.get_value()
}

/// Evaluates two expressions in a single run, sharing one context.
pub fn eval2<A: ElemType, B: ElemType>(
    a: &Expr<A>,
    b: &Expr<B>,
) -> SfResult<(ArrayD<A>, ArrayD<B>)> {
    let mut values = run_exprs(&[a.erased(), b.erased()], &[])?;
    let vb = values.pop().ok_or_else(|| SfError::internal("missing fetch"))?;
    let va = values.pop().ok_or_else(|| SfError::internal("missing fetch"))?;
    Ok((
        A::from_value(va).ok_or_else(|| SfError::internal("value dtype disagrees with tag"))?,
        B::from_value(vb).ok_or_else(|| SfError::internal("value dtype disagrees with tag"))?,
    ))
}

/// Evaluates three expressions in a single run, sharing one context.
pub fn eval3<A: ElemType, B: ElemType, C: ElemType>(
    a: &Expr<A>,
    b: &Expr<B>,
    c: &Expr<C>,
) -> SfResult<(ArrayD<A>, ArrayD<B>, ArrayD<C>)> {
    let mut values = run_exprs(&[a.erased(), b.erased(), c.erased()], &[])?;
    let vc = values.pop().ok_or_else(|| SfError::internal("missing fetch"))?;
    let vb = values.pop().ok_or_else(|| SfError::internal("missing fetch"))?;
    let va = values.pop().ok_or_else(|| SfError::internal("missing fetch"))?;
    Ok((
        A::from_value(va).ok_or_else(|| SfError::internal("value dtype disagrees with tag"))?,
        B::from_value(vb).ok_or_else(|| SfError::internal("value dtype disagrees with tag"))?,
        C::from_value(vc).ok_or_else(|| SfError::internal("value dtype disagrees with tag"))?,
    ))
}
