use std::rc::Rc;

use super::{Ctxt, Expr};
use crate::errors::{SfError, SfResult};
use crate::graph::{NodeRef, OpKind, Padding, ReduceKind};
use crate::shape::{Dim, Shape};
use crate::types::{ElemType, FloatElem, NumElem};

fn unary_op<T: ElemType>(op_name: &'static str, kind: OpKind, x: &Expr<T>) -> Expr<T> {
    let shape = x.shape().clone();
    let cost = x.cost().saturating_add(1);
    let xr = x.erased();
    Expr::new(
        shape,
        cost,
        Box::new(move |ctxt| {
            let a = ctxt.lower(&xr)?;
            ctxt.add_op(kind.clone(), vec![a], Some(op_name))
        }),
    )
}

fn binary_op<T: ElemType>(
    op_name: &'static str,
    kind: OpKind,
    lhs: &Expr<T>,
    rhs: &Expr<T>,
) -> SfResult<Expr<T>> {
    let shape = Shape::equiv(op_name, lhs.shape(), rhs.shape())?;
    let cost = lhs.cost().saturating_add(rhs.cost()).saturating_add(1);
    let (l, r) = (lhs.erased(), rhs.erased());
    Ok(Expr::new(
        shape,
        cost,
        Box::new(move |ctxt| {
            let a = ctxt.lower(&l)?;
            let b = ctxt.lower(&r)?;
            ctxt.add_op(kind.clone(), vec![a, b], Some(op_name))
        }),
    ))
}

impl<T: NumElem> Expr<T> {
    /// Pointwise addition with broadcasting through flex tails.
    pub fn try_add(&self, rhs: &Expr<T>) -> SfResult<Expr<T>> {
        binary_op("add", OpKind::Add, self, rhs)
    }

    pub fn try_sub(&self, rhs: &Expr<T>) -> SfResult<Expr<T>> {
        binary_op("sub", OpKind::Sub, self, rhs)
    }

    pub fn try_mul(&self, rhs: &Expr<T>) -> SfResult<Expr<T>> {
        binary_op("mul", OpKind::Mul, self, rhs)
    }

    pub fn try_div(&self, rhs: &Expr<T>) -> SfResult<Expr<T>> {
        binary_op("div", OpKind::Div, self, rhs)
    }

    /// Explicit element-type conversion.
    pub fn cast<U: NumElem>(&self) -> Expr<U> {
        let shape = self.shape().clone();
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let a = ctxt.lower(&xr)?;
                ctxt.add_op(OpKind::Cast(U::DTYPE), vec![a], Some("cast"))
            }),
        )
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $try:ident) => {
        impl<'a, T: NumElem> std::ops::$trait<&'a Expr<T>> for &'a Expr<T> {
            type Output = Expr<T>;
            fn $method(self, rhs: &'a Expr<T>) -> Expr<T> {
                self.$try(rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }
        impl<T: NumElem> std::ops::$trait<Expr<T>> for Expr<T> {
            type Output = Expr<T>;
            fn $method(self, rhs: Expr<T>) -> Expr<T> {
                self.$try(&rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }
    };
}

impl_binary_operator!(Add, add, try_add);
impl_binary_operator!(Sub, sub, try_sub);
impl_binary_operator!(Mul, mul, try_mul);
impl_binary_operator!(Div, div, try_div);

impl<T: NumElem> std::ops::Neg for &Expr<T> {
    type Output = Expr<T>;
    fn neg(self) -> Expr<T> {
        unary_op("neg", OpKind::Neg, self)
    }
}

impl<T: NumElem> std::ops::Neg for Expr<T> {
    type Output = Expr<T>;
    fn neg(self) -> Expr<T> {
        unary_op("neg", OpKind::Neg, &self)
    }
}

impl<T: FloatElem> Expr<T> {
    pub fn abs(&self) -> Expr<T> {
        unary_op("abs", OpKind::Abs, self)
    }

    pub fn sin(&self) -> Expr<T> {
        unary_op("sin", OpKind::Sin, self)
    }

    pub fn cos(&self) -> Expr<T> {
        unary_op("cos", OpKind::Cos, self)
    }

    pub fn exp(&self) -> Expr<T> {
        unary_op("exp", OpKind::Exp, self)
    }

    pub fn log(&self) -> Expr<T> {
        unary_op("log", OpKind::Log, self)
    }

    pub fn sqrt(&self) -> Expr<T> {
        unary_op("sqrt", OpKind::Sqrt, self)
    }

    pub fn tanh(&self) -> Expr<T> {
        unary_op("tanh", OpKind::Tanh, self)
    }

    pub fn sigmoid(&self) -> Expr<T> {
        unary_op("sigmoid", OpKind::Sigmoid, self)
    }

    pub fn relu(&self) -> Expr<T> {
        unary_op("relu", OpKind::Relu, self)
    }

    /// Strict rank-2 matrix product: `[n1, m] x [m, n2] -> [n1, n2]`.
    pub fn matmul(&self, rhs: &Expr<T>) -> SfResult<Expr<T>> {
        let op = "matmul";
        let n1 = Dim::inferred();
        let m = Dim::inferred();
        let n2 = Dim::inferred();
        Shape::unify(op, self.shape(), &Shape::closed(vec![n1.clone(), m.clone()]))?;
        Shape::unify(op, rhs.shape(), &Shape::closed(vec![m, n2.clone()]))?;
        let shape = Shape::closed(vec![n1, n2]);
        let cost = self.cost().saturating_add(rhs.cost()).saturating_add(1);
        let (l, r) = (self.erased(), rhs.erased());
        Ok(Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let a = ctxt.lower(&l)?;
                let b = ctxt.lower(&r)?;
                ctxt.add_op(OpKind::MatMul { trans_a: false, trans_b: false }, vec![a, b], Some(op))
            }),
        ))
    }
}

fn reduce_shape(
    op: &str,
    shape: &Shape,
    axes: Option<&[usize]>,
    keep_dims: bool,
) -> SfResult<Shape> {
    if keep_dims {
        return Ok(shape.clone());
    }
    match axes {
        None => Ok(Shape::scalar()),
        Some(axes) => {
            if axes.is_empty() {
                return Ok(shape.clone());
            }
            let mut sorted = axes.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != axes.len() {
                return Err(SfError::bad(op, "duplicate axes"));
            }
            let max = sorted[sorted.len() - 1];
            Shape::min_rank(op, shape, max + 1)?;
            let (dims, flex) = shape.flatten();
            let kept = dims
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !sorted.contains(i))
                .map(|(_, d)| d)
                .collect();
            Ok(Shape::from_parts(kept, flex))
        }
    }
}

fn reduce_all<T: NumElem>(op_name: &'static str, kind: ReduceKind, x: &Expr<T>) -> Expr<T> {
    let cost = x.cost().saturating_add(1);
    let xr = x.erased();
    Expr::new(
        Shape::scalar(),
        cost,
        Box::new(move |ctxt| {
            let a = ctxt.lower(&xr)?;
            ctxt.add_op(OpKind::Reduce { kind, axes: None, keep_dims: false }, vec![a], Some(op_name))
        }),
    )
}

fn reduce_axes<T: NumElem>(
    op_name: &'static str,
    kind: ReduceKind,
    x: &Expr<T>,
    axes: Option<&[usize]>,
    keep_dims: bool,
) -> SfResult<Expr<T>> {
    let shape = reduce_shape(op_name, x.shape(), axes, keep_dims)?;
    let cost = x.cost().saturating_add(1);
    let xr = x.erased();
    let axes = axes.map(|a| a.to_vec());
    Ok(Expr::new(
        shape,
        cost,
        Box::new(move |ctxt| {
            let a = ctxt.lower(&xr)?;
            ctxt.add_op(
                OpKind::Reduce { kind, axes: axes.clone(), keep_dims },
                vec![a],
                Some(op_name),
            )
        }),
    ))
}

impl<T: NumElem> Expr<T> {
    /// Sum over all elements to a scalar.
    pub fn sum(&self) -> Expr<T> {
        reduce_all("sum", ReduceKind::Sum, self)
    }

    pub fn mean(&self) -> Expr<T> {
        reduce_all("mean", ReduceKind::Mean, self)
    }

    pub fn prod(&self) -> Expr<T> {
        reduce_all("prod", ReduceKind::Prod, self)
    }

    /// Sum over the listed axes. `axes = None` reduces all dimensions;
    /// `keep_dims` preserves the input shape.
    pub fn reduce_sum(&self, axes: Option<&[usize]>, keep_dims: bool) -> SfResult<Expr<T>> {
        reduce_axes("sum", ReduceKind::Sum, self, axes, keep_dims)
    }

    pub fn reduce_mean(&self, axes: Option<&[usize]>, keep_dims: bool) -> SfResult<Expr<T>> {
        reduce_axes("mean", ReduceKind::Mean, self, axes, keep_dims)
    }

    pub fn reduce_prod(&self, axes: Option<&[usize]>, keep_dims: bool) -> SfResult<Expr<T>> {
        reduce_axes("prod", ReduceKind::Prod, self, axes, keep_dims)
    }

    /// The first `k` dims of a rank-`2k` tensor whose paired dims unify.
    pub fn diag_part(&self) -> SfResult<Expr<T>> {
        let op = "diag_part";
        let (dims, flex) = self.shape().flatten();
        if flex.is_some() {
            return Err(SfError::bad(op, "rank must be known"));
        }
        if dims.is_empty() || dims.len() % 2 != 0 {
            return Err(SfError::bad(op, format!("expects an even, positive rank, found {}", dims.len())));
        }
        let k = dims.len() / 2;
        for i in 0..k {
            Dim::unify(op, &dims[i], &dims[k + i])?;
        }
        let shape = Shape::closed(dims[..k].to_vec());
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        Ok(Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let a = ctxt.lower(&xr)?;
                ctxt.add_op(OpKind::DiagPart, vec![a], Some(op))
            }),
        ))
    }

    /// Reinterprets the value with a caller-supplied shape. The element
    /// count is checked at run, not construction.
    pub fn reshape(&self, target: &Shape) -> Expr<T> {
        let shape = target.clone();
        let resolve = target.clone();
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let dims = resolve
                    .values()
                    .ok_or_else(|| SfError::bad("reshape", "target shape must be resolved at run"))?;
                let a = ctxt.lower(&xr)?;
                ctxt.add_op(OpKind::Reshape { dims }, vec![a], Some("reshape"))
            }),
        )
    }

    pub fn broadcast_to(&self, target: &Shape) -> Expr<T> {
        let shape = target.clone();
        let resolve = target.clone();
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let dims = resolve.values().ok_or_else(|| {
                    SfError::bad("broadcast_to", "target shape must be resolved at run")
                })?;
                let a = ctxt.lower(&xr)?;
                ctxt.add_op(OpKind::BroadcastTo { dims }, vec![a], Some("broadcast_to"))
            }),
        )
    }

    /// Inserts a fresh inferred dimension at `dim`; downstream broadcasting
    /// solves it.
    pub fn expand_dims(&self, dim: usize) -> SfResult<Expr<T>> {
        let op = "expand_dims";
        Shape::min_rank(op, self.shape(), dim)?;
        let (mut dims, flex) = self.shape().flatten();
        dims.insert(dim, Dim::inferred());
        let shape = Shape::from_parts(dims, flex);
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        Ok(Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let a = ctxt.lower(&xr)?;
                ctxt.add_op(OpKind::ExpandDims { axis: dim }, vec![a], Some(op))
            }),
        ))
    }
}

/// Per-axis slicing spec. `Idx` squeezes the axis away; a `Range` with no
/// end (or end `-1`) runs to the end of the axis, with an inferred length
/// when the input dimension is open.
#[derive(Debug, Clone, Copy)]
pub enum SliceSpec {
    Idx(i64),
    Range { begin: Option<i64>, end: Option<i64> },
    All,
}

impl From<i64> for SliceSpec {
    fn from(i: i64) -> Self {
        SliceSpec::Idx(i)
    }
}

impl From<std::ops::Range<i64>> for SliceSpec {
    fn from(r: std::ops::Range<i64>) -> Self {
        SliceSpec::Range { begin: Some(r.start), end: Some(r.end) }
    }
}

impl From<std::ops::RangeFrom<i64>> for SliceSpec {
    fn from(r: std::ops::RangeFrom<i64>) -> Self {
        SliceSpec::Range { begin: Some(r.start), end: None }
    }
}

impl From<std::ops::RangeFull> for SliceSpec {
    fn from(_: std::ops::RangeFull) -> Self {
        SliceSpec::All
    }
}

impl<T: ElemType> Expr<T> {
    /// Slices the leading axes; trailing axes pass through unchanged.
    pub fn slice(&self, specs: &[SliceSpec]) -> SfResult<Expr<T>> {
        let op = "slice";
        Shape::min_rank(op, self.shape(), specs.len())?;
        let (dims, flex) = self.shape().flatten();
        let mut begin = Vec::with_capacity(specs.len());
        let mut size = Vec::with_capacity(specs.len());
        let mut squeeze = Vec::new();
        let mut out_dims = Vec::new();
        for (k, spec) in specs.iter().enumerate() {
            let d = &dims[k];
            match *spec {
                SliceSpec::Idx(i) => {
                    if i < 0 {
                        return Err(SfError::bad(op, format!("negative index {i}")));
                    }
                    if let Some(n) = d.value() {
                        if i as usize >= n {
                            return Err(SfError::bad(op, format!("index {i} out of range for dim {n}")));
                        }
                    }
                    begin.push(i as usize);
                    size.push(1);
                    squeeze.push(k);
                }
                SliceSpec::All => {
                    begin.push(0);
                    size.push(-1);
                    out_dims.push(d.clone());
                }
                SliceSpec::Range { begin: b, end } => {
                    let b = b.unwrap_or(0);
                    if b < 0 {
                        return Err(SfError::bad(op, format!("negative start {b}")));
                    }
                    match end {
                        None | Some(-1) => {
                            size.push(-1);
                            out_dims.push(match d.value() {
                                Some(n) => {
                                    if b as usize > n {
                                        return Err(SfError::bad(
                                            op,
                                            format!("start {b} out of range for dim {n}"),
                                        ));
                                    }
                                    Dim::Known(n - b as usize)
                                }
                                None => Dim::inferred(),
                            });
                        }
                        Some(e) if e >= b => {
                            if let Some(n) = d.value() {
                                if e as usize > n {
                                    return Err(SfError::bad(
                                        op,
                                        format!("end {e} out of range for dim {n}"),
                                    ));
                                }
                            }
                            size.push(e - b);
                            out_dims.push(Dim::Known((e - b) as usize));
                        }
                        Some(e) => {
                            return Err(SfError::bad(op, format!("end {e} precedes start {b}")));
                        }
                    }
                    begin.push(b as usize);
                }
            }
        }
        out_dims.extend_from_slice(&dims[specs.len()..]);
        let shape = Shape::from_parts(out_dims, flex);
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        Ok(Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let a = ctxt.lower(&xr)?;
                let sliced = ctxt.add_op(
                    OpKind::Slice { begin: begin.clone(), size: size.clone() },
                    vec![a],
                    Some(op),
                )?;
                if squeeze.is_empty() {
                    Ok(sliced)
                } else {
                    ctxt.add_op(OpKind::Squeeze { axes: squeeze.clone() }, vec![sliced], Some(op))
                }
            }),
        ))
    }

    /// Single-axis index, squeezing the leading axis away.
    pub fn item(&self, i: i64) -> SfResult<Expr<T>> {
        self.slice(&[SliceSpec::Idx(i)])
    }
}

struct PairLowering {
    build: Box<dyn Fn(&mut Ctxt) -> SfResult<(NodeRef, NodeRef)>>,
}

impl<T: FloatElem> Expr<T> {
    /// Mean and variance over the listed axes, lowered together and
    /// memoized as a pair.
    pub fn moments(&self, axes: &[usize], keep_dims: bool) -> SfResult<(Expr<T>, Expr<T>)> {
        let op = "moments";
        let shape = reduce_shape(op, self.shape(), Some(axes), keep_dims)?;
        let cost = self.cost().saturating_add(1);
        let xr = self.erased();
        let axes_v = axes.to_vec();
        let pair = Rc::new(PairLowering {
            build: Box::new(move |ctxt| {
                let x = ctxt.lower(&xr)?;
                let mean_keep = ctxt.add_op(
                    OpKind::Reduce { kind: ReduceKind::Mean, axes: Some(axes_v.clone()), keep_dims: true },
                    vec![x],
                    Some("moments/mean_keep"),
                )?;
                let centered = ctxt.add_op(OpKind::Sub, vec![x, mean_keep], Some("moments/centered"))?;
                let sq = ctxt.add_op(OpKind::Mul, vec![centered, centered], Some("moments/sq"))?;
                let variance = ctxt.add_op(
                    OpKind::Reduce { kind: ReduceKind::Mean, axes: Some(axes_v.clone()), keep_dims },
                    vec![sq],
                    Some("moments/variance"),
                )?;
                let mean = if keep_dims {
                    mean_keep
                } else {
                    ctxt.add_op(
                        OpKind::Reduce { kind: ReduceKind::Mean, axes: Some(axes_v.clone()), keep_dims: false },
                        vec![x],
                        Some("moments/mean"),
                    )?
                };
                Ok((mean, variance))
            }),
        });
        let mean = {
            let p = Rc::clone(&pair);
            Expr::new(
                shape.clone(),
                cost,
                Box::new(move |ctxt| {
                    let key = Rc::as_ptr(&p) as usize;
                    ctxt.lower_pair(key, p.build.as_ref()).map(|(m, _)| m)
                }),
            )
        };
        let variance = {
            let p = Rc::clone(&pair);
            Expr::new(
                shape,
                cost,
                Box::new(move |ctxt| {
                    let key = Rc::as_ptr(&p) as usize;
                    ctxt.lower_pair(key, p.build.as_ref()).map(|(_, v)| v)
                }),
            )
        };
        Ok((mean, variance))
    }

    /// NHWC convolution against an HWIO filter. `"SAME"` padding keeps the
    /// spatial dims symbolic through ceiling division by the stride.
    pub fn conv2d(&self, filter: &Expr<T>, stride: usize, padding: Padding) -> SfResult<Expr<T>> {
        let op = "conv2d";
        if stride == 0 {
            return Err(SfError::bad(op, "stride must be at least 1"));
        }
        let n = Dim::inferred();
        let h = Dim::inferred();
        let w = Dim::inferred();
        let c = Dim::inferred();
        let f1 = Dim::inferred();
        let f2 = Dim::inferred();
        let co = Dim::inferred();
        Shape::unify(op, self.shape(), &Shape::closed(vec![n.clone(), h.clone(), w.clone(), c.clone()]))?;
        Shape::unify(op, filter.shape(), &Shape::closed(vec![f1.clone(), f2.clone(), c, co.clone()]))?;
        let (oh, ow) = match padding {
            Padding::Same => (h.ceil_div(stride), w.ceil_div(stride)),
            Padding::Valid => {
                let (hv, f1v, wv, f2v) = (h.value(), f1.value(), w.value(), f2.value());
                match (hv, f1v, wv, f2v) {
                    (Some(h), Some(f1), Some(w), Some(f2)) if h >= f1 && w >= f2 => (
                        Dim::Known((h - f1) / stride + 1),
                        Dim::Known((w - f2) / stride + 1),
                    ),
                    (Some(_), Some(_), Some(_), Some(_)) => {
                        return Err(SfError::bad(op, "filter larger than input"))
                    }
                    _ => {
                        return Err(SfError::bad(op, "VALID padding requires known spatial dims"))
                    }
                }
            }
        };
        let shape = Shape::closed(vec![n, oh, ow, co]);
        let cost = self.cost().saturating_add(filter.cost()).saturating_add(1);
        let (xr, fr) = (self.erased(), filter.erased());
        Ok(Expr::new(
            shape,
            cost,
            Box::new(move |ctxt| {
                let x = ctxt.lower(&xr)?;
                let f = ctxt.lower(&fr)?;
                ctxt.add_op(OpKind::Conv2d { stride, padding }, vec![x, f], Some(op))
            }),
        ))
    }
}

/// Transposed-convolution shape: the gradient of a strided NHWC convolution
/// with respect to its input, `[N, H*s, W*s, C_in]`.
pub fn conv2d_backprop_input<T: FloatElem>(
    filter: &Expr<T>,
    out_backprop: &Expr<T>,
    stride: usize,
    padding: Padding,
) -> SfResult<Expr<T>> {
    let op = "conv2d_backprop_input";
    if stride == 0 {
        return Err(SfError::bad(op, "stride must be at least 1"));
    }
    let f1 = Dim::inferred();
    let f2 = Dim::inferred();
    let ci = Dim::inferred();
    let co = Dim::inferred();
    let n = Dim::inferred();
    let hg = Dim::inferred();
    let wg = Dim::inferred();
    Shape::unify(op, filter.shape(), &Shape::closed(vec![f1.clone(), f2.clone(), ci.clone(), co.clone()]))?;
    Shape::unify(op, out_backprop.shape(), &Shape::closed(vec![n.clone(), hg.clone(), wg.clone(), co]))?;
    let (h, w) = match padding {
        Padding::Same => (hg.times(stride), wg.times(stride)),
        Padding::Valid => match (hg.value(), f1.value(), wg.value(), f2.value()) {
            (Some(hg), Some(f1), Some(wg), Some(f2)) => (
                Dim::Known((hg - 1) * stride + f1),
                Dim::Known((wg - 1) * stride + f2),
            ),
            _ => return Err(SfError::bad(op, "VALID padding requires known spatial dims")),
        },
    };
    let shape = Shape::closed(vec![n, h, w, ci]);
    let cost = filter.cost().saturating_add(out_backprop.cost()).saturating_add(1);
    let (fr, gr) = (filter.erased(), out_backprop.erased());
    Ok(Expr::new(
        shape,
        cost,
        Box::new(move |ctxt| {
            let f = ctxt.lower(&fr)?;
            let g = ctxt.lower(&gr)?;
            ctxt.add_op(OpKind::Conv2dBackpropInput { stride, padding }, vec![f, g], Some(op))
        }),
    ))
}

/// Stacks equal-shaped expressions along a new `axis`.
pub fn stack<T: ElemType>(xs: &[Expr<T>], axis: usize) -> SfResult<Expr<T>> {
    let op = "stack";
    let first = xs.first().ok_or_else(|| SfError::bad(op, "needs at least one input"))?;
    for x in &xs[1..] {
        Shape::unify(op, first.shape(), x.shape())?;
    }
    Shape::min_rank(op, first.shape(), axis)?;
    let (mut dims, flex) = first.shape().flatten();
    dims.insert(axis, Dim::Known(xs.len()));
    let shape = Shape::from_parts(dims, flex);
    let cost = xs.iter().fold(1u32, |acc, x| acc.saturating_add(x.cost()));
    let refs: Vec<_> = xs.iter().map(|x| x.erased()).collect();
    Ok(Expr::new(
        shape,
        cost,
        Box::new(move |ctxt| {
            let mut nodes = Vec::with_capacity(refs.len());
            for r in &refs {
                nodes.push(ctxt.lower(r)?);
            }
            ctxt.add_op(OpKind::Pack { axis }, nodes, Some(op))
        }),
    ))
}

/// Random draws from a standard normal, rejecting samples beyond two
/// standard deviations. The shape must be resolvable by run time.
pub fn truncated_normal<T: FloatElem>(shape: Shape) -> Expr<T> {
    let resolve = shape.clone();
    Expr::new(
        shape,
        100,
        Box::new(move |ctxt| {
            let dims = resolve.values().ok_or_else(|| {
                SfError::bad("truncated_normal", "shape must be resolved at run")
            })?;
            ctxt.add_op(
                OpKind::TruncatedNormal { dims, dtype: T::DTYPE },
                Vec::new(),
                Some("truncated_normal"),
            )
        }),
    )
}

/// Decodes a rank-0 byte string into an `[?, ?, channels]` image tensor.
pub fn decode_jpeg(bytes: &Expr<String>, channels: usize) -> SfResult<Expr<i32>> {
    let op = "decode_jpeg";
    Shape::unify(op, bytes.shape(), &Shape::scalar())?;
    let shape = Shape::closed(vec![Dim::inferred(), Dim::inferred(), Dim::Known(channels)]);
    let cost = bytes.cost().saturating_add(1);
    let br = bytes.erased();
    Ok(Expr::new(
        shape,
        cost,
        Box::new(move |ctxt| {
            let b = ctxt.lower(&br)?;
            ctxt.add_op(OpKind::DecodeJpeg { channels }, vec![b], Some(op))
        }),
    ))
}
