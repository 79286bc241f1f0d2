pub mod grad;

use std::collections::HashMap;

use crate::errors::{SfError, SfResult, StatusCode};
use crate::types::{DType, TensorValue};

/// A port into the backend graph: an operation plus an output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub op: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Mean,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Same,
    Valid,
}

/// Descriptor of a backend operation. Ops hold configuration only; data
/// flows through input ports.
#[derive(Debug, Clone)]
pub enum OpKind {
    Const(TensorValue),
    Placeholder(DType),
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Abs,
    Sign,
    Sin,
    Cos,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Sigmoid,
    Relu,
    MatMul { trans_a: bool, trans_b: bool },
    Reduce { kind: ReduceKind, axes: Option<Vec<usize>>, keep_dims: bool },
    ReduceGrad { kind: ReduceKind, axes: Option<Vec<usize>>, keep_dims: bool },
    Reshape { dims: Vec<usize> },
    ReshapeLike,
    BroadcastTo { dims: Vec<usize> },
    BroadcastLike,
    SumToLike,
    Slice { begin: Vec<usize>, size: Vec<i64> },
    SliceGrad { begin: Vec<usize>, size: Vec<i64> },
    Squeeze { axes: Vec<usize> },
    Pack { axis: usize },
    ExpandDims { axis: usize },
    DiagPart,
    Diag,
    Conv2d { stride: usize, padding: Padding },
    Conv2dBackpropInput { stride: usize, padding: Padding },
    Conv2dBackpropFilter { stride: usize, padding: Padding },
    Cast(DType),
    TruncatedNormal { dims: Vec<usize>, dtype: DType },
    DecodeJpeg { channels: usize },
    OnesLike,
    ZerosLike,
    ReluGrad,
}

impl OpKind {
    fn base_name(&self) -> &'static str {
        use OpKind::*;
        match self {
            Const(_) => "Const",
            Placeholder(_) => "Placeholder",
            Add => "Add",
            Sub => "Sub",
            Mul => "Mul",
            Div => "Div",
            Neg => "Neg",
            Abs => "Abs",
            Sign => "Sign",
            Sin => "Sin",
            Cos => "Cos",
            Exp => "Exp",
            Log => "Log",
            Sqrt => "Sqrt",
            Tanh => "Tanh",
            Sigmoid => "Sigmoid",
            Relu => "Relu",
            MatMul { .. } => "MatMul",
            Reduce { .. } => "Reduce",
            ReduceGrad { .. } => "ReduceGrad",
            Reshape { .. } => "Reshape",
            ReshapeLike => "ReshapeLike",
            BroadcastTo { .. } => "BroadcastTo",
            BroadcastLike => "BroadcastLike",
            SumToLike => "SumToLike",
            Slice { .. } => "Slice",
            SliceGrad { .. } => "SliceGrad",
            Squeeze { .. } => "Squeeze",
            Pack { .. } => "Pack",
            ExpandDims { .. } => "ExpandDims",
            DiagPart => "DiagPart",
            Diag => "Diag",
            Conv2d { .. } => "Conv2d",
            Conv2dBackpropInput { .. } => "Conv2dBackpropInput",
            Conv2dBackpropFilter { .. } => "Conv2dBackpropFilter",
            Cast(_) => "Cast",
            TruncatedNormal { .. } => "TruncatedNormal",
            DecodeJpeg { .. } => "DecodeJpeg",
            OnesLike => "OnesLike",
            ZerosLike => "ZerosLike",
            ReluGrad => "ReluGrad",
        }
    }
}

/// A node in the backend graph.
#[derive(Debug)]
pub struct OpNode {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<NodeRef>,
    pub dtype: DType,
}

/// Resolves a named operation to indexable output ports.
pub struct Operation<'g> {
    op: usize,
    graph: &'g Graph,
}

impl<'g> Operation<'g> {
    pub fn name(&self) -> &str {
        &self.graph.ops[self.op].name
    }

    pub fn output(&self, index: usize) -> NodeRef {
        NodeRef { op: self.op, index }
    }
}

/// An append-only computation graph of named operations. Node indices are a
/// topological order by construction.
#[derive(Debug, Default)]
pub struct Graph {
    ops: Vec<OpNode>,
    by_name: HashMap<String, usize>,
    scopes: Vec<String>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn node(&self, op: usize) -> SfResult<&OpNode> {
        self.ops
            .get(op)
            .ok_or_else(|| SfError::internal(format!("no such node: {op}")))
    }

    pub fn dtype_of(&self, r: NodeRef) -> SfResult<DType> {
        Ok(self.node(r.op)?.dtype)
    }

    pub fn operation_by_name(&self, name: &str) -> Option<Operation<'_>> {
        self.by_name.get(name).map(|&op| Operation { op, graph: self })
    }

    pub(crate) fn push_scope(&mut self, name: &str) {
        self.scopes.push(name.to_string());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn unique_name(&self, base: &str) -> String {
        let mut prefixed = String::new();
        for s in &self.scopes {
            prefixed.push_str(s);
            prefixed.push('/');
        }
        prefixed.push_str(base);
        if !self.by_name.contains_key(&prefixed) {
            return prefixed;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{prefixed}_{n}");
            if !self.by_name.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn infer_dtype(&self, kind: &OpKind, inputs: &[NodeRef]) -> SfResult<DType> {
        match kind {
            OpKind::Const(v) => Ok(v.dtype()),
            OpKind::Placeholder(dt) => Ok(*dt),
            OpKind::Cast(dt) => Ok(*dt),
            OpKind::TruncatedNormal { dtype, .. } => Ok(*dtype),
            OpKind::DecodeJpeg { .. } => Ok(DType::Int32),
            _ => {
                let first = inputs
                    .first()
                    .ok_or_else(|| SfError::internal("op with no inputs and no dtype"))?;
                self.dtype_of(*first)
            }
        }
    }

    /// Appends an op, deriving its dtype and a unique scoped name.
    pub fn add_op(&mut self, kind: OpKind, inputs: Vec<NodeRef>, name: Option<&str>) -> SfResult<NodeRef> {
        for r in &inputs {
            if r.op >= self.ops.len() {
                return Err(SfError::internal(format!("input refers to future node {}", r.op)));
            }
        }
        let dtype = self.infer_dtype(&kind, &inputs)?;
        let name = self.unique_name(name.unwrap_or_else(|| kind.base_name()));
        let op = self.ops.len();
        self.by_name.insert(name.clone(), op);
        self.ops.push(OpNode { name, kind, inputs, dtype });
        Ok(NodeRef { op, index: 0 })
    }

    pub fn constant(&mut self, value: TensorValue) -> SfResult<NodeRef> {
        self.add_op(OpKind::Const(value), Vec::new(), None)
    }

    pub fn placeholder(&mut self, dtype: DType, name: &str) -> SfResult<NodeRef> {
        self.add_op(OpKind::Placeholder(dtype), Vec::new(), Some(name))
    }

    /// A rank-0 constant of the given numeric dtype, used by gradient rules.
    pub(crate) fn float_const(&mut self, v: f64, dtype: DType) -> SfResult<NodeRef> {
        let value = TensorValue::from_f64(v, dtype).ok_or_else(|| {
            SfError::backend(StatusCode::InvalidArgument, "string tensors have no numeric constants")
        })?;
        self.constant(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn scalar(v: f32) -> TensorValue {
        TensorValue::F32(ArrayD::from_elem(ndarray::IxDyn(&[]), v))
    }

    #[test]
    fn names_are_unique_and_scoped() {
        let mut g = Graph::new();
        let a = g.constant(scalar(1.0)).unwrap();
        let b = g.constant(scalar(2.0)).unwrap();
        g.add_op(OpKind::Add, vec![a, b], None).unwrap();
        g.push_scope("layer");
        let c = g.constant(scalar(3.0)).unwrap();
        g.pop_scope();
        assert_eq!(g.node(a.op).unwrap().name, "Const");
        assert_eq!(g.node(b.op).unwrap().name, "Const_1");
        assert_eq!(g.node(c.op).unwrap().name, "layer/Const");
        assert!(g.operation_by_name("Add").is_some());
        assert!(g.operation_by_name("missing").is_none());
    }

    #[test]
    fn dtype_flows_from_inputs() {
        let mut g = Graph::new();
        let a = g.constant(scalar(1.0)).unwrap();
        let n = g.add_op(OpKind::Neg, vec![a], None).unwrap();
        assert_eq!(g.dtype_of(n).unwrap(), DType::Float32);
        let c = g.add_op(OpKind::Cast(DType::Int64), vec![n], None).unwrap();
        assert_eq!(g.dtype_of(c).unwrap(), DType::Int64);
    }
}
