use super::{Graph, NodeRef, OpKind, ReduceKind};
use crate::errors::{SfError, SfResult, StatusCode};
use crate::types::DType;

/// Reverse-mode gradient construction: appends nodes computing the partial
/// derivatives of `y` with respect to each of `xs`, seeded with `dy` (or a
/// ones-like of `y`). Existing nodes are never mutated, and node indices are
/// already a topological order, so a single reverse sweep suffices.
pub fn add_gradients(
    g: &mut Graph,
    y: NodeRef,
    xs: &[NodeRef],
    dy: Option<NodeRef>,
) -> SfResult<Vec<NodeRef>> {
    let ydt = g.dtype_of(y)?;
    if !matches!(ydt, DType::Float32 | DType::Float64) {
        return Err(SfError::bad("gradients", format!("cannot differentiate a {ydt} target")));
    }

    let mut reachable = vec![false; g.len()];
    let mut stack = vec![y.op];
    while let Some(op) = stack.pop() {
        if reachable[op] {
            continue;
        }
        reachable[op] = true;
        for input in &g.node(op)?.inputs {
            stack.push(input.op);
        }
    }

    let seed = match dy {
        Some(d) => d,
        None => g.add_op(OpKind::OnesLike, vec![y], Some("gradients/ones"))?,
    };
    let mut grads: Vec<Option<NodeRef>> = vec![None; reachable.len()];
    grads[y.op] = Some(seed);

    for op in (0..=y.op).rev() {
        if !reachable[op] {
            continue;
        }
        let gout = match grads[op] {
            Some(n) => n,
            None => continue,
        };
        let (kind, inputs) = {
            let node = g.node(op)?;
            (node.kind.clone(), node.inputs.clone())
        };
        for (slot, contrib) in vjp(g, &kind, &inputs, gout)? {
            let target = inputs[slot].op;
            grads[target] = Some(match grads[target] {
                None => contrib,
                Some(prev) => g.add_op(OpKind::Add, vec![prev, contrib], Some("gradients/acc"))?,
            });
        }
    }

    xs.iter()
        .map(|x| match grads.get(x.op).copied().flatten() {
            Some(n) => Ok(n),
            None => g.add_op(OpKind::ZerosLike, vec![*x], Some("gradients/zero")),
        })
        .collect()
}

fn op1(g: &mut Graph, kind: OpKind, a: NodeRef) -> SfResult<NodeRef> {
    g.add_op(kind, vec![a], Some("gradients"))
}

fn op2(g: &mut Graph, kind: OpKind, a: NodeRef, b: NodeRef) -> SfResult<NodeRef> {
    g.add_op(kind, vec![a, b], Some("gradients"))
}

/// Gradient flowing to `v` across a runtime-broadcast binary op: sum the
/// incoming gradient back down to `v`'s shape.
fn stl(g: &mut Graph, grad: NodeRef, like: NodeRef) -> SfResult<NodeRef> {
    op2(g, OpKind::SumToLike, grad, like)
}

/// The vector-Jacobian contributions of one op: `(input slot, gradient)`
/// pairs. Ops without a differentiable surface contribute nothing.
fn vjp(
    g: &mut Graph,
    kind: &OpKind,
    ins: &[NodeRef],
    gout: NodeRef,
) -> SfResult<Vec<(usize, NodeRef)>> {
    use OpKind::*;
    Ok(match kind {
        Add => {
            let ga = stl(g, gout, ins[0])?;
            let gb = stl(g, gout, ins[1])?;
            vec![(0, ga), (1, gb)]
        }
        Sub => {
            let ga = stl(g, gout, ins[0])?;
            let n = op1(g, Neg, gout)?;
            let gb = stl(g, n, ins[1])?;
            vec![(0, ga), (1, gb)]
        }
        Mul => {
            let pa = op2(g, Mul, gout, ins[1])?;
            let ga = stl(g, pa, ins[0])?;
            let pb = op2(g, Mul, gout, ins[0])?;
            let gb = stl(g, pb, ins[1])?;
            vec![(0, ga), (1, gb)]
        }
        Div => {
            let pa = op2(g, Div, gout, ins[1])?;
            let ga = stl(g, pa, ins[0])?;
            let num = op2(g, Mul, gout, ins[0])?;
            let den = op2(g, Mul, ins[1], ins[1])?;
            let q = op2(g, Div, num, den)?;
            let nq = op1(g, Neg, q)?;
            let gb = stl(g, nq, ins[1])?;
            vec![(0, ga), (1, gb)]
        }
        Neg => vec![(0, op1(g, Neg, gout)?)],
        Abs => {
            let s = op1(g, Sign, ins[0])?;
            vec![(0, op2(g, Mul, gout, s)?)]
        }
        Sin => {
            let c = op1(g, Cos, ins[0])?;
            vec![(0, op2(g, Mul, gout, c)?)]
        }
        Cos => {
            let s = op1(g, Sin, ins[0])?;
            let p = op2(g, Mul, gout, s)?;
            vec![(0, op1(g, Neg, p)?)]
        }
        Exp => {
            let e = op1(g, Exp, ins[0])?;
            vec![(0, op2(g, Mul, gout, e)?)]
        }
        Log => vec![(0, op2(g, Div, gout, ins[0])?)],
        Sqrt => {
            let s = op1(g, Sqrt, ins[0])?;
            let dt = g.dtype_of(ins[0])?;
            let two = g.float_const(2.0, dt)?;
            let den = op2(g, Mul, two, s)?;
            vec![(0, op2(g, Div, gout, den)?)]
        }
        Tanh => {
            let t = op1(g, Tanh, ins[0])?;
            let t2 = op2(g, Mul, t, t)?;
            let dt = g.dtype_of(ins[0])?;
            let one = g.float_const(1.0, dt)?;
            let om = op2(g, Sub, one, t2)?;
            vec![(0, op2(g, Mul, gout, om)?)]
        }
        Sigmoid => {
            let s = op1(g, Sigmoid, ins[0])?;
            let dt = g.dtype_of(ins[0])?;
            let one = g.float_const(1.0, dt)?;
            let om = op2(g, Sub, one, s)?;
            let sp = op2(g, Mul, s, om)?;
            vec![(0, op2(g, Mul, gout, sp)?)]
        }
        Relu => vec![(0, op2(g, ReluGrad, ins[0], gout)?)],
        ReluGrad => vec![(1, op2(g, ReluGrad, ins[0], gout)?)],
        MatMul { trans_a, trans_b } => {
            let (a, b) = (ins[0], ins[1]);
            let (ga, gb) = match (*trans_a, *trans_b) {
                (false, false) => (
                    op2(g, MatMul { trans_a: false, trans_b: true }, gout, b)?,
                    op2(g, MatMul { trans_a: true, trans_b: false }, a, gout)?,
                ),
                (false, true) => (
                    op2(g, MatMul { trans_a: false, trans_b: false }, gout, b)?,
                    op2(g, MatMul { trans_a: true, trans_b: false }, gout, a)?,
                ),
                (true, false) => (
                    op2(g, MatMul { trans_a: false, trans_b: true }, b, gout)?,
                    op2(g, MatMul { trans_a: false, trans_b: false }, a, gout)?,
                ),
                (true, true) => (
                    op2(g, MatMul { trans_a: true, trans_b: true }, b, gout)?,
                    op2(g, MatMul { trans_a: true, trans_b: true }, gout, a)?,
                ),
            };
            vec![(0, ga), (1, gb)]
        }
        Reduce { kind, axes, keep_dims } => {
            let grad = op2(
                g,
                ReduceGrad { kind: *kind, axes: axes.clone(), keep_dims: *keep_dims },
                ins[0],
                gout,
            )?;
            vec![(0, grad)]
        }
        ReduceGrad { kind, axes, keep_dims } => match kind {
            ReduceKind::Sum | ReduceKind::Mean => {
                let back = op1(
                    g,
                    Reduce { kind: *kind, axes: axes.clone(), keep_dims: *keep_dims },
                    gout,
                )?;
                vec![(1, back)]
            }
            ReduceKind::Prod => {
                return Err(SfError::backend(
                    StatusCode::Unimplemented,
                    "higher-order gradient of a product reduction",
                ))
            }
        },
        Reshape { .. } | Squeeze { .. } | ExpandDims { .. } => {
            vec![(0, op2(g, ReshapeLike, gout, ins[0])?)]
        }
        ReshapeLike => vec![(0, op2(g, ReshapeLike, gout, ins[0])?)],
        BroadcastTo { .. } => vec![(0, stl(g, gout, ins[0])?)],
        BroadcastLike => vec![(0, stl(g, gout, ins[0])?)],
        SumToLike => vec![(0, op2(g, BroadcastLike, gout, ins[0])?)],
        Slice { begin, size } => {
            let grad = op2(
                g,
                SliceGrad { begin: begin.clone(), size: size.clone() },
                ins[0],
                gout,
            )?;
            vec![(0, grad)]
        }
        SliceGrad { begin, size } => {
            let back = op1(g, Slice { begin: begin.clone(), size: size.clone() }, gout)?;
            vec![(1, back)]
        }
        Pack { axis } => {
            let mut contribs = Vec::with_capacity(ins.len());
            for (i, _) in ins.iter().enumerate() {
                let mut begin = vec![0; axis + 1];
                begin[*axis] = i;
                let mut size = vec![-1i64; axis + 1];
                size[*axis] = 1;
                let sliced = op1(g, Slice { begin, size }, gout)?;
                let squeezed = op1(g, Squeeze { axes: vec![*axis] }, sliced)?;
                contribs.push((i, squeezed));
            }
            contribs
        }
        DiagPart => vec![(0, op1(g, Diag, gout)?)],
        Diag => vec![(0, op1(g, DiagPart, gout)?)],
        Conv2d { stride, padding } => {
            let gx = g.add_op(
                Conv2dBackpropInput { stride: *stride, padding: *padding },
                vec![ins[1], gout, ins[0]],
                Some("gradients"),
            )?;
            let gw = g.add_op(
                Conv2dBackpropFilter { stride: *stride, padding: *padding },
                vec![ins[0], gout, ins[1]],
                Some("gradients"),
            )?;
            vec![(0, gx), (1, gw)]
        }
        Conv2dBackpropInput { stride, padding } => {
            let back = op2(g, Conv2d { stride: *stride, padding: *padding }, gout, ins[0])?;
            vec![(1, back)]
        }
        Cast(_) => {
            let from = g.dtype_of(ins[0])?;
            if matches!(from, DType::Float32 | DType::Float64) {
                vec![(0, op1(g, Cast(from), gout)?)]
            } else {
                vec![]
            }
        }
        Sign
        | Conv2dBackpropFilter { .. }
        | Const(_)
        | Placeholder(_)
        | TruncatedNormal { .. }
        | DecodeJpeg { .. }
        | OnesLike
        | ZerosLike => vec![],
    })
}
