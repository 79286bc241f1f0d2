use std::collections::HashMap;
use std::ops::{Add, Div, Mul};

use ndarray::{ArrayD, ArrayViewD, Axis, Dimension, Ix2, Ix4, IxDyn, LinalgScalar, Zip};
use ndarray_rand::rand_distr::{Distribution, Normal};
use num_traits::{Float, FromPrimitive, One, Zero};

use super::{Backend, DeviceInfo};
use crate::errors::{SfError, SfResult, StatusCode};
use crate::graph::{Graph, NodeRef, OpKind, OpNode, Padding, ReduceKind};
use crate::types::{DType, TensorValue};

/// Reference interpreter over ndarray buffers.
#[derive(Debug, Default)]
pub struct CpuBackend;

fn bad(op: &str, message: impl Into<String>) -> SfError {
    SfError::bad(op, message)
}

fn dtype_err(op: &str, a: &TensorValue) -> SfError {
    bad(op, format!("unsupported dtype {}", a.dtype()))
}

fn dtype_pair_err(op: &str, a: &TensorValue, b: &TensorValue) -> SfError {
    bad(op, format!("unsupported or mismatched dtypes {} and {}", a.dtype(), b.dtype()))
}

/// Elementwise map over a float tensor, parallel when the rayon feature is
/// enabled.
fn map_float<F>(a: &ArrayD<F>, f: impl Fn(F) -> F + Send + Sync) -> ArrayD<F>
where
    F: Float + Send + Sync,
{
    let mut out = a.clone();
    #[cfg(feature = "rayon")]
    Zip::from(&mut out).par_for_each(|v| *v = f(*v));
    #[cfg(not(feature = "rayon"))]
    Zip::from(&mut out).for_each(|v| *v = f(*v));
    out
}

/// Numpy-style broadcast shape, aligning from the right.
fn broadcast_dims(op: &str, a: &[usize], b: &[usize]) -> SfResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let ai = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let bi = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out[i] = if ai == bi || bi == 1 {
            ai
        } else if ai == 1 {
            bi
        } else {
            return Err(bad(op, format!("cannot broadcast {a:?} against {b:?}")));
        };
    }
    Ok(out)
}

fn binop<A: Clone>(
    op: &str,
    a: &ArrayD<A>,
    b: &ArrayD<A>,
    f: impl Fn(&A, &A) -> A,
) -> SfResult<ArrayD<A>> {
    let dims = broadcast_dims(op, a.shape(), b.shape())?;
    let av = a
        .broadcast(IxDyn(&dims))
        .ok_or_else(|| SfError::internal("broadcast failed after shape check"))?;
    let bv = b
        .broadcast(IxDyn(&dims))
        .ok_or_else(|| SfError::internal("broadcast failed after shape check"))?;
    Ok(Zip::from(&av).and(&bv).map_collect(|x, y| f(x, y)))
}

macro_rules! each_float {
    ($op:expr, $v:expr, |$x:ident| $body:expr) => {
        match $v {
            TensorValue::F32($x) => Ok(TensorValue::F32($body)),
            TensorValue::F64($x) => Ok(TensorValue::F64($body)),
            other => Err(dtype_err($op, other)),
        }
    };
}

macro_rules! each_numeric {
    ($op:expr, $v:expr, |$x:ident| $body:expr) => {
        match $v {
            TensorValue::F32($x) => Ok(TensorValue::F32($body)),
            TensorValue::F64($x) => Ok(TensorValue::F64($body)),
            TensorValue::I32($x) => Ok(TensorValue::I32($body)),
            TensorValue::I64($x) => Ok(TensorValue::I64($body)),
            other => Err(dtype_err($op, other)),
        }
    };
}

macro_rules! each_value {
    ($op:expr, $v:expr, |$x:ident| $body:expr) => {
        match $v {
            TensorValue::F32($x) => Ok(TensorValue::F32($body)),
            TensorValue::F64($x) => Ok(TensorValue::F64($body)),
            TensorValue::I32($x) => Ok(TensorValue::I32($body)),
            TensorValue::I64($x) => Ok(TensorValue::I64($body)),
            TensorValue::Str($x) => Ok(TensorValue::Str($body)),
        }
    };
}

macro_rules! same_numeric {
    ($op:expr, $a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (TensorValue::F32($x), TensorValue::F32($y)) => Ok(TensorValue::F32($body)),
            (TensorValue::F64($x), TensorValue::F64($y)) => Ok(TensorValue::F64($body)),
            (TensorValue::I32($x), TensorValue::I32($y)) => Ok(TensorValue::I32($body)),
            (TensorValue::I64($x), TensorValue::I64($y)) => Ok(TensorValue::I64($body)),
            (l, r) => Err(dtype_pair_err($op, l, r)),
        }
    };
}

macro_rules! same_float {
    ($op:expr, $a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (TensorValue::F32($x), TensorValue::F32($y)) => Ok(TensorValue::F32($body)),
            (TensorValue::F64($x), TensorValue::F64($y)) => Ok(TensorValue::F64($body)),
            (l, r) => Err(dtype_pair_err($op, l, r)),
        }
    };
}

fn matmul_impl<A: LinalgScalar>(
    op: &str,
    a: &ArrayD<A>,
    b: &ArrayD<A>,
    trans_a: bool,
    trans_b: bool,
) -> SfResult<ArrayD<A>> {
    let a2 = a
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| bad(op, format!("expected a rank-2 left operand, found rank {}", a.ndim())))?;
    let b2 = b
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| bad(op, format!("expected a rank-2 right operand, found rank {}", b.ndim())))?;
    let lhs = if trans_a { a2.t() } else { a2 };
    let rhs = if trans_b { b2.t() } else { b2 };
    if lhs.ncols() != rhs.nrows() {
        return Err(bad(op, format!("inner dimensions differ: {} vs {}", lhs.ncols(), rhs.nrows())));
    }
    Ok(lhs.dot(&rhs).into_dyn())
}

fn sorted_unique(op: &str, axes: &[usize], ndim: usize) -> SfResult<Vec<usize>> {
    let mut sorted = axes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != axes.len() {
        return Err(bad(op, "duplicate axes"));
    }
    if let Some(&max) = sorted.last() {
        if max >= ndim {
            return Err(bad(op, format!("axis {max} out of range for rank {ndim}")));
        }
    }
    Ok(sorted)
}

fn reduce_impl<A>(
    op: &str,
    kind: ReduceKind,
    axes: Option<&[usize]>,
    keep_dims: bool,
    a: &ArrayD<A>,
) -> SfResult<ArrayD<A>>
where
    A: Clone
        + Zero
        + One
        + FromPrimitive
        + Add<Output = A>
        + Mul<Output = A>
        + Div<Output = A>,
{
    match axes {
        None => {
            let total = match kind {
                ReduceKind::Sum => a.sum(),
                ReduceKind::Prod => a.product(),
                ReduceKind::Mean => a.mean().ok_or_else(|| bad(op, "mean of an empty tensor"))?,
            };
            let dims: Vec<usize> = if keep_dims { vec![1; a.ndim()] } else { Vec::new() };
            Ok(ArrayD::from_elem(IxDyn(&dims), total))
        }
        Some(axes) => {
            let sorted = sorted_unique(op, axes, a.ndim())?;
            let mut cur = a.clone();
            for &ax in sorted.iter().rev() {
                cur = match kind {
                    ReduceKind::Sum => cur.sum_axis(Axis(ax)),
                    ReduceKind::Mean => cur
                        .mean_axis(Axis(ax))
                        .ok_or_else(|| bad(op, "mean over an empty axis"))?,
                    ReduceKind::Prod => {
                        cur.fold_axis(Axis(ax), A::one(), |acc, x| acc.clone() * x.clone())
                    }
                };
            }
            if keep_dims {
                for &ax in sorted.iter() {
                    cur = cur.insert_axis(Axis(ax));
                }
            }
            Ok(cur)
        }
    }
}

fn reshape_impl<A: Clone>(op: &str, a: &ArrayD<A>, dims: &[usize]) -> SfResult<ArrayD<A>> {
    let count: usize = dims.iter().product();
    if count != a.len() {
        return Err(bad(op, format!("cannot reshape {:?} into {dims:?}", a.shape())));
    }
    ArrayD::from_shape_vec(IxDyn(dims), a.iter().cloned().collect())
        .map_err(|e| SfError::internal(format!("reshape: {e}")))
}

fn broadcast_impl<A: Clone>(op: &str, a: &ArrayD<A>, dims: &[usize]) -> SfResult<ArrayD<A>> {
    a.broadcast(IxDyn(dims))
        .map(|v| v.to_owned())
        .ok_or_else(|| bad(op, format!("cannot broadcast {:?} to {dims:?}", a.shape())))
}

/// Sums a gradient back down to a broadcast operand's shape: reduce the
/// extra leading axes, then any axis the operand holds at 1.
fn sum_to_like_impl<A>(op: &str, g: &ArrayD<A>, like: &[usize]) -> SfResult<ArrayD<A>>
where
    A: Clone + Zero + Add<Output = A>,
{
    if g.shape() == like {
        return Ok(g.clone());
    }
    let gd = g.ndim();
    let td = like.len();
    let mut axes: Vec<usize> = (0..gd.saturating_sub(td)).collect();
    for i in 0..td.min(gd) {
        let gi = gd - 1 - i;
        let ti = td - 1 - i;
        if like[ti] == 1 && g.shape()[gi] > 1 {
            axes.push(gi);
        }
    }
    let mut cur = g.clone();
    for &ax in axes.iter().rev() {
        cur = cur.sum_axis(Axis(ax));
    }
    reshape_impl(op, &cur, like)
}

fn reduce_grad_impl<F>(
    op: &str,
    kind: ReduceKind,
    axes: Option<&[usize]>,
    input: &ArrayD<F>,
    g: &ArrayD<F>,
) -> SfResult<ArrayD<F>>
where
    F: Float + FromPrimitive + Send + Sync,
{
    let full = input.shape().to_vec();
    let kshape: Vec<usize> = match axes {
        None => vec![1; full.len()],
        Some(axes) => full
            .iter()
            .enumerate()
            .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
            .collect(),
    };
    let gk = reshape_impl(op, g, &kshape)?;
    let gb = broadcast_impl(op, &gk, &full)?;
    match kind {
        ReduceKind::Sum => Ok(gb),
        ReduceKind::Mean => {
            let count: usize = full.iter().product::<usize>() / kshape.iter().product::<usize>().max(1);
            let scale = F::from_usize(count.max(1))
                .ok_or_else(|| SfError::internal("reduction count out of range"))?;
            Ok(map_float(&gb, move |x| x / scale))
        }
        ReduceKind::Prod => {
            let p = reduce_impl(op, ReduceKind::Prod, axes, true, input)?;
            let pb = broadcast_impl(op, &p, &full)?;
            Ok(&gb * &pb / input)
        }
    }
}

fn slice_impl<A: Clone>(
    op: &str,
    a: &ArrayD<A>,
    begin: &[usize],
    size: &[i64],
) -> SfResult<ArrayD<A>> {
    if begin.len() > a.ndim() {
        return Err(bad(op, format!("slice rank {} exceeds tensor rank {}", begin.len(), a.ndim())));
    }
    let mut out_dims = Vec::with_capacity(a.ndim());
    for k in 0..begin.len() {
        let d = a.shape()[k];
        let b = begin[k];
        if b > d {
            return Err(bad(op, format!("slice start {b} out of range for dim {d}")));
        }
        let len = if size[k] < 0 { d - b } else { size[k] as usize };
        if b + len > d {
            return Err(bad(op, format!("slice end {} out of range for dim {d}", b + len)));
        }
        out_dims.push(len);
    }
    out_dims.extend_from_slice(&a.shape()[begin.len()..]);
    Ok(ArrayD::from_shape_fn(IxDyn(&out_dims), |idx| {
        let mut src = idx.slice().to_vec();
        for (k, &b) in begin.iter().enumerate() {
            src[k] += b;
        }
        a[IxDyn(&src)].clone()
    }))
}

fn slice_grad_impl<A>(
    op: &str,
    input: &ArrayD<A>,
    g: &ArrayD<A>,
    begin: &[usize],
) -> SfResult<ArrayD<A>>
where
    A: Clone + Zero,
{
    let mut out = ArrayD::zeros(input.raw_dim());
    for (idx, v) in g.indexed_iter() {
        let mut dst = idx.slice().to_vec();
        if dst.len() != input.ndim() {
            return Err(bad(op, "gradient rank does not match the sliced input"));
        }
        for (k, &b) in begin.iter().enumerate() {
            dst[k] += b;
        }
        out[IxDyn(&dst)] = v.clone();
    }
    Ok(out)
}

fn squeeze_impl<A: Clone>(op: &str, a: &ArrayD<A>, axes: &[usize]) -> SfResult<ArrayD<A>> {
    let sorted = sorted_unique(op, axes, a.ndim())?;
    for &ax in &sorted {
        if a.shape()[ax] != 1 {
            return Err(bad(op, format!("cannot squeeze axis {ax} of extent {}", a.shape()[ax])));
        }
    }
    let dims: Vec<usize> = a
        .shape()
        .iter()
        .enumerate()
        .filter(|(i, _)| !sorted.contains(i))
        .map(|(_, &d)| d)
        .collect();
    reshape_impl(op, a, &dims)
}

fn expand_dims_impl<A: Clone>(op: &str, a: &ArrayD<A>, axis: usize) -> SfResult<ArrayD<A>> {
    if axis > a.ndim() {
        return Err(bad(op, format!("axis {axis} out of range for rank {}", a.ndim())));
    }
    Ok(a.clone().insert_axis(Axis(axis)))
}

fn diag_part_impl<A: Clone>(op: &str, a: &ArrayD<A>) -> SfResult<ArrayD<A>> {
    let nd = a.ndim();
    if nd == 0 || nd % 2 != 0 {
        return Err(bad(op, format!("expects an even, positive rank, found {nd}")));
    }
    let k = nd / 2;
    for i in 0..k {
        if a.shape()[i] != a.shape()[k + i] {
            return Err(bad(
                op,
                format!("paired dims differ: {} vs {}", a.shape()[i], a.shape()[k + i]),
            ));
        }
    }
    let out_dims = a.shape()[..k].to_vec();
    Ok(ArrayD::from_shape_fn(IxDyn(&out_dims), |idx| {
        let mut full = idx.slice().to_vec();
        full.extend_from_slice(idx.slice());
        a[IxDyn(&full)].clone()
    }))
}

fn diag_impl<A>(a: &ArrayD<A>) -> ArrayD<A>
where
    A: Clone + Zero,
{
    let mut dims = a.shape().to_vec();
    dims.extend_from_slice(a.shape());
    let k = a.ndim();
    ArrayD::from_shape_fn(IxDyn(&dims), |idx| {
        let s = idx.slice();
        if s[..k] == s[k..] {
            a[IxDyn(&s[..k])].clone()
        } else {
            A::zero()
        }
    })
}

fn conv_geometry(
    op: &str,
    extent: usize,
    kernel: usize,
    stride: usize,
    padding: Padding,
) -> SfResult<(usize, usize)> {
    match padding {
        Padding::Same => {
            let out = (extent + stride - 1) / stride;
            let total = ((out - 1) * stride + kernel).saturating_sub(extent);
            Ok((out, total / 2))
        }
        Padding::Valid => {
            if extent < kernel {
                return Err(bad(op, format!("kernel {kernel} larger than input extent {extent}")));
            }
            Ok(((extent - kernel) / stride + 1, 0))
        }
    }
}

fn conv2d_impl<F: Float>(
    op: &str,
    x: &ArrayD<F>,
    w: &ArrayD<F>,
    stride: usize,
    padding: Padding,
) -> SfResult<ArrayD<F>> {
    let x4 = x
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| bad(op, format!("expected an NHWC input, found rank {}", x.ndim())))?;
    let w4 = w
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| bad(op, format!("expected an HWIO filter, found rank {}", w.ndim())))?;
    let (n, h, wd, ci) = x4.dim();
    let (kh, kw, fci, co) = w4.dim();
    if ci != fci {
        return Err(bad(op, format!("channel mismatch: input {ci}, filter {fci}")));
    }
    let (oh, pad_t) = conv_geometry(op, h, kh, stride, padding)?;
    let (ow, pad_l) = conv_geometry(op, wd, kw, stride, padding)?;
    let mut out = ndarray::Array4::<F>::zeros((n, oh, ow, co));
    for b in 0..n {
        for i in 0..oh {
            for j in 0..ow {
                for o in 0..co {
                    let mut acc = F::zero();
                    for di in 0..kh {
                        for dj in 0..kw {
                            let ih = (i * stride + di) as i64 - pad_t as i64;
                            let iw = (j * stride + dj) as i64 - pad_l as i64;
                            if ih < 0 || ih >= h as i64 || iw < 0 || iw >= wd as i64 {
                                continue;
                            }
                            for c in 0..ci {
                                acc = acc
                                    + x4[[b, ih as usize, iw as usize, c]] * w4[[di, dj, c, o]];
                            }
                        }
                    }
                    out[[b, i, j, o]] = acc;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

fn conv2d_backprop_input_impl<F: Float>(
    op: &str,
    w: &ArrayD<F>,
    g: &ArrayD<F>,
    like: Option<&[usize]>,
    stride: usize,
    padding: Padding,
) -> SfResult<ArrayD<F>> {
    let w4 = w
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| bad(op, format!("expected an HWIO filter, found rank {}", w.ndim())))?;
    let g4 = g
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| bad(op, format!("expected an NHWC gradient, found rank {}", g.ndim())))?;
    let (kh, kw, ci, co) = w4.dim();
    let (n, gh, gw, gco) = g4.dim();
    if gco != co {
        return Err(bad(op, format!("channel mismatch: gradient {gco}, filter {co}")));
    }
    let (h, wd) = match like {
        Some(dims) if dims.len() == 4 => (dims[1], dims[2]),
        Some(dims) => return Err(bad(op, format!("expected a rank-4 reference shape, found {dims:?}"))),
        None => match padding {
            Padding::Same => (gh * stride, gw * stride),
            Padding::Valid => ((gh - 1) * stride + kh, (gw - 1) * stride + kw),
        },
    };
    let (_, pad_t) = conv_geometry(op, h, kh, stride, padding)?;
    let (_, pad_l) = conv_geometry(op, wd, kw, stride, padding)?;
    let mut out = ndarray::Array4::<F>::zeros((n, h, wd, ci));
    for b in 0..n {
        for i in 0..gh {
            for j in 0..gw {
                for o in 0..co {
                    let gv = g4[[b, i, j, o]];
                    for di in 0..kh {
                        for dj in 0..kw {
                            let ih = (i * stride + di) as i64 - pad_t as i64;
                            let iw = (j * stride + dj) as i64 - pad_l as i64;
                            if ih < 0 || ih >= h as i64 || iw < 0 || iw >= wd as i64 {
                                continue;
                            }
                            for c in 0..ci {
                                out[[b, ih as usize, iw as usize, c]] =
                                    out[[b, ih as usize, iw as usize, c]] + gv * w4[[di, dj, c, o]];
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(out.into_dyn())
}

fn conv2d_backprop_filter_impl<F: Float>(
    op: &str,
    x: &ArrayD<F>,
    g: &ArrayD<F>,
    filter_dims: &[usize],
    stride: usize,
    padding: Padding,
) -> SfResult<ArrayD<F>> {
    let x4 = x
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| bad(op, format!("expected an NHWC input, found rank {}", x.ndim())))?;
    let g4 = g
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| bad(op, format!("expected an NHWC gradient, found rank {}", g.ndim())))?;
    if filter_dims.len() != 4 {
        return Err(bad(op, format!("expected a rank-4 filter shape, found {filter_dims:?}")));
    }
    let (kh, kw, ci, co) = (filter_dims[0], filter_dims[1], filter_dims[2], filter_dims[3]);
    let (n, h, wd, xci) = x4.dim();
    let (gn, gh, gw, gco) = g4.dim();
    if xci != ci || gco != co || gn != n {
        return Err(bad(op, "input, gradient and filter extents disagree"));
    }
    let (_, pad_t) = conv_geometry(op, h, kh, stride, padding)?;
    let (_, pad_l) = conv_geometry(op, wd, kw, stride, padding)?;
    let mut out = ndarray::Array4::<F>::zeros((kh, kw, ci, co));
    for b in 0..n {
        for i in 0..gh {
            for j in 0..gw {
                for o in 0..co {
                    let gv = g4[[b, i, j, o]];
                    for di in 0..kh {
                        for dj in 0..kw {
                            let ih = (i * stride + di) as i64 - pad_t as i64;
                            let iw = (j * stride + dj) as i64 - pad_l as i64;
                            if ih < 0 || ih >= h as i64 || iw < 0 || iw >= wd as i64 {
                                continue;
                            }
                            for c in 0..ci {
                                out[[di, dj, c, o]] = out[[di, dj, c, o]]
                                    + gv * x4[[b, ih as usize, iw as usize, c]];
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(out.into_dyn())
}

fn cast_val(op: &str, v: &TensorValue, to: DType) -> SfResult<TensorValue> {
    use TensorValue::*;
    Ok(match (v, to) {
        (F32(a), DType::Float32) => F32(a.clone()),
        (F32(a), DType::Float64) => F64(a.mapv(|x| x as f64)),
        (F32(a), DType::Int32) => I32(a.mapv(|x| x as i32)),
        (F32(a), DType::Int64) => I64(a.mapv(|x| x as i64)),
        (F64(a), DType::Float32) => F32(a.mapv(|x| x as f32)),
        (F64(a), DType::Float64) => F64(a.clone()),
        (F64(a), DType::Int32) => I32(a.mapv(|x| x as i32)),
        (F64(a), DType::Int64) => I64(a.mapv(|x| x as i64)),
        (I32(a), DType::Float32) => F32(a.mapv(|x| x as f32)),
        (I32(a), DType::Float64) => F64(a.mapv(|x| x as f64)),
        (I32(a), DType::Int32) => I32(a.clone()),
        (I32(a), DType::Int64) => I64(a.mapv(|x| x as i64)),
        (I64(a), DType::Float32) => F32(a.mapv(|x| x as f32)),
        (I64(a), DType::Float64) => F64(a.mapv(|x| x as f64)),
        (I64(a), DType::Int32) => I32(a.mapv(|x| x as i32)),
        (I64(a), DType::Int64) => I64(a.clone()),
        (Str(_), _) | (_, DType::Utf8) => {
            return Err(bad(op, "casts to or from string tensors are not defined"))
        }
    })
}

fn truncated_normal_val(op: &str, dims: &[usize], dtype: DType) -> SfResult<TensorValue> {
    let normal = Normal::new(0.0f64, 1.0)
        .map_err(|e| SfError::internal(format!("normal distribution: {e}")))?;
    let mut rng = rand::thread_rng();
    let count: usize = dims.iter().product();
    let mut data = Vec::with_capacity(count);
    while data.len() < count {
        let v = normal.sample(&mut rng);
        if v.abs() <= 2.0 {
            data.push(v);
        }
    }
    match dtype {
        DType::Float32 => Ok(TensorValue::F32(
            ArrayD::from_shape_vec(IxDyn(dims), data.iter().map(|&v| v as f32).collect())
                .map_err(|e| SfError::internal(e.to_string()))?,
        )),
        DType::Float64 => Ok(TensorValue::F64(
            ArrayD::from_shape_vec(IxDyn(dims), data)
                .map_err(|e| SfError::internal(e.to_string()))?,
        )),
        other => Err(bad(op, format!("random draws require a float dtype, found {other}"))),
    }
}

fn pack_val(op: &str, ins: &[TensorValue], axis: usize) -> SfResult<TensorValue> {
    macro_rules! pack_arm {
        ($variant:ident, $ty:ty) => {{
            let views: Vec<ArrayViewD<'_, $ty>> = ins
                .iter()
                .map(|v| match v {
                    TensorValue::$variant(a) => Ok(a.view()),
                    other => Err(dtype_pair_err(op, &ins[0], other)),
                })
                .collect::<SfResult<_>>()?;
            ndarray::stack(Axis(axis), &views)
                .map(TensorValue::$variant)
                .map_err(|e| bad(op, e.to_string()))
        }};
    }
    match &ins[0] {
        TensorValue::F32(_) => pack_arm!(F32, f32),
        TensorValue::F64(_) => pack_arm!(F64, f64),
        TensorValue::I32(_) => pack_arm!(I32, i32),
        TensorValue::I64(_) => pack_arm!(I64, i64),
        TensorValue::Str(_) => pack_arm!(Str, String),
    }
}

impl CpuBackend {
    fn eval_node(
        &self,
        graph: &Graph,
        r: NodeRef,
        cache: &mut HashMap<NodeRef, TensorValue>,
    ) -> SfResult<TensorValue> {
        if let Some(v) = cache.get(&r) {
            return Ok(v.clone());
        }
        if r.index != 0 {
            return Err(SfError::backend(
                StatusCode::InvalidArgument,
                format!("output index {} out of range", r.index),
            ));
        }
        let node = graph.node(r.op)?;
        let mut ins = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            ins.push(self.eval_node(graph, input, cache)?);
        }
        let out = self.apply(node, &ins)?;
        cache.insert(r, out.clone());
        Ok(out)
    }

    fn apply(&self, node: &OpNode, ins: &[TensorValue]) -> SfResult<TensorValue> {
        let op = node.name.as_str();
        match &node.kind {
            OpKind::Const(v) => Ok(v.clone()),
            OpKind::Placeholder(_) => Err(SfError::backend(
                StatusCode::InvalidArgument,
                format!("placeholder {op:?} was not fed"),
            )),
            OpKind::Add => same_numeric!(op, &ins[0], &ins[1], |a, b| binop(op, a, b, |x, y| *x + *y)?),
            OpKind::Sub => same_numeric!(op, &ins[0], &ins[1], |a, b| binop(op, a, b, |x, y| *x - *y)?),
            OpKind::Mul => same_numeric!(op, &ins[0], &ins[1], |a, b| binop(op, a, b, |x, y| *x * *y)?),
            OpKind::Div => same_numeric!(op, &ins[0], &ins[1], |a, b| binop(op, a, b, |x, y| *x / *y)?),
            OpKind::Neg => each_numeric!(op, &ins[0], |a| a.mapv(|x| -x)),
            OpKind::Abs => each_numeric!(op, &ins[0], |a| a.mapv(|x| x.abs())),
            OpKind::Sign => each_float!(op, &ins[0], |a| map_float(a, |x| {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            })),
            OpKind::Sin => each_float!(op, &ins[0], |a| map_float(a, |x| x.sin())),
            OpKind::Cos => each_float!(op, &ins[0], |a| map_float(a, |x| x.cos())),
            OpKind::Exp => each_float!(op, &ins[0], |a| map_float(a, |x| x.exp())),
            OpKind::Log => each_float!(op, &ins[0], |a| map_float(a, |x| x.ln())),
            OpKind::Sqrt => each_float!(op, &ins[0], |a| map_float(a, |x| x.sqrt())),
            OpKind::Tanh => each_float!(op, &ins[0], |a| map_float(a, |x| x.tanh())),
            OpKind::Sigmoid => each_float!(op, &ins[0], |a| map_float(a, |x| 1.0 / (1.0 + (-x).exp()))),
            OpKind::Relu => each_float!(op, &ins[0], |a| map_float(a, |x| if x < 0.0 { 0.0 } else { x })),
            OpKind::ReluGrad => same_float!(op, &ins[0], &ins[1], |x, g| {
                binop(op, x, g, |xv, gv| if *xv > 0.0 { *gv } else { 0.0 })?
            }),
            OpKind::MatMul { trans_a, trans_b } => {
                same_float!(op, &ins[0], &ins[1], |a, b| matmul_impl(op, a, b, *trans_a, *trans_b)?)
            }
            OpKind::Reduce { kind, axes, keep_dims } => {
                each_numeric!(op, &ins[0], |a| reduce_impl(op, *kind, axes.as_deref(), *keep_dims, a)?)
            }
            OpKind::ReduceGrad { kind, axes, .. } => {
                same_float!(op, &ins[0], &ins[1], |input, g| {
                    reduce_grad_impl(op, *kind, axes.as_deref(), input, g)?
                })
            }
            OpKind::Reshape { dims } => each_value!(op, &ins[0], |a| reshape_impl(op, a, dims)?),
            OpKind::ReshapeLike => {
                let like = ins[1].shape().to_vec();
                each_value!(op, &ins[0], |a| reshape_impl(op, a, &like)?)
            }
            OpKind::BroadcastTo { dims } => each_value!(op, &ins[0], |a| broadcast_impl(op, a, dims)?),
            OpKind::BroadcastLike => {
                let like = ins[1].shape().to_vec();
                each_value!(op, &ins[0], |a| broadcast_impl(op, a, &like)?)
            }
            OpKind::SumToLike => {
                let like = ins[1].shape().to_vec();
                each_numeric!(op, &ins[0], |a| sum_to_like_impl(op, a, &like)?)
            }
            OpKind::Slice { begin, size } => {
                each_value!(op, &ins[0], |a| slice_impl(op, a, begin, size)?)
            }
            OpKind::SliceGrad { begin, .. } => {
                same_numeric!(op, &ins[0], &ins[1], |input, g| slice_grad_impl(op, input, g, begin)?)
            }
            OpKind::Squeeze { axes } => each_value!(op, &ins[0], |a| squeeze_impl(op, a, axes)?),
            OpKind::Pack { axis } => pack_val(op, ins, *axis),
            OpKind::ExpandDims { axis } => each_value!(op, &ins[0], |a| expand_dims_impl(op, a, *axis)?),
            OpKind::DiagPart => each_value!(op, &ins[0], |a| diag_part_impl(op, a)?),
            OpKind::Diag => each_numeric!(op, &ins[0], |a| diag_impl(a)),
            OpKind::Conv2d { stride, padding } => {
                same_float!(op, &ins[0], &ins[1], |x, w| conv2d_impl(op, x, w, *stride, *padding)?)
            }
            OpKind::Conv2dBackpropInput { stride, padding } => {
                let like = ins.get(2).map(|v| v.shape().to_vec());
                same_float!(op, &ins[0], &ins[1], |w, g| {
                    conv2d_backprop_input_impl(op, w, g, like.as_deref(), *stride, *padding)?
                })
            }
            OpKind::Conv2dBackpropFilter { stride, padding } => {
                let like = ins
                    .get(2)
                    .ok_or_else(|| bad(op, "missing filter reference input"))?
                    .shape()
                    .to_vec();
                same_float!(op, &ins[0], &ins[1], |x, g| {
                    conv2d_backprop_filter_impl(op, x, g, &like, *stride, *padding)?
                })
            }
            OpKind::Cast(to) => cast_val(op, &ins[0], *to),
            OpKind::TruncatedNormal { dims, dtype } => truncated_normal_val(op, dims, *dtype),
            OpKind::DecodeJpeg { .. } => Err(SfError::backend(
                StatusCode::Unimplemented,
                "image decoding is not available in the CPU engine",
            )),
            OpKind::OnesLike => each_numeric!(op, &ins[0], |a| ArrayD::from_elem(a.raw_dim(), One::one())),
            OpKind::ZerosLike => each_numeric!(op, &ins[0], |a| ArrayD::from_elem(a.raw_dim(), Zero::zero())),
        }
    }
}

impl Backend for CpuBackend {
    #[tracing::instrument(skip_all, name = "cpu_execute", fields(ops = graph.len(), fetches = fetches.len()))]
    fn execute(
        &self,
        graph: &Graph,
        feeds: &[(NodeRef, TensorValue)],
        fetches: &[NodeRef],
        targets: &[NodeRef],
    ) -> SfResult<Vec<TensorValue>> {
        let mut cache: HashMap<NodeRef, TensorValue> = feeds.iter().cloned().collect();
        for &t in targets {
            self.eval_node(graph, t, &mut cache)?;
        }
        fetches
            .iter()
            .map(|&f| self.eval_node(graph, f, &mut cache))
            .collect()
    }

    fn devices(&self) -> SfResult<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            name: "/device:CPU:0".to_string(),
            device_type: "CPU".to_string(),
            memory_bytes: 0,
        }])
    }
}
