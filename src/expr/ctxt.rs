use std::collections::HashMap;

use super::{ExprId, ExprRef};
use crate::errors::SfResult;
use crate::graph::{grad::add_gradients, Graph, NodeRef, OpKind};

/// Structural key for memoized gradient subgraphs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct GradKey {
    pub y: ExprId,
    pub xs: Vec<ExprId>,
    pub dy: Option<ExprId>,
}

/// Per-run materialization state: the backend graph under construction plus
/// memo tables keyed by expression identity. Created for a single run and
/// discarded afterwards; no state survives across runs.
pub struct Ctxt {
    graph: Graph,
    nodes: HashMap<ExprId, NodeRef>,
    moment_nodes: HashMap<ExprId, (NodeRef, NodeRef)>,
    grad_nodes: HashMap<GradKey, Vec<NodeRef>>,
    weights: HashMap<String, ExprRef>,
    retained: Vec<ExprRef>,
}

impl Ctxt {
    pub fn new() -> Ctxt {
        Ctxt {
            graph: Graph::new(),
            nodes: HashMap::new(),
            moment_nodes: HashMap::new(),
            grad_nodes: HashMap::new(),
            weights: HashMap::new(),
            retained: Vec::new(),
        }
    }

    pub fn with_weights(weights: &[(&str, ExprRef)]) -> Ctxt {
        let mut ctxt = Ctxt::new();
        for (name, expr) in weights {
            ctxt.weights.insert((*name).to_string(), expr.clone());
        }
        ctxt
    }

    /// Lowers an expression into the backend graph, at most once per run.
    pub fn lower(&mut self, expr: &ExprRef) -> SfResult<NodeRef> {
        let id = expr.id();
        if let Some(&node) = self.nodes.get(&id) {
            return Ok(node);
        }
        let node = (expr.inner.build)(self)?;
        self.nodes.insert(id, node);
        // Keep the handle alive so the identity key stays unique for the run.
        self.retained.push(expr.clone());
        Ok(node)
    }

    /// Lowers a paired-output operator, at most once per run.
    pub(crate) fn lower_pair(
        &mut self,
        key: ExprId,
        build: &dyn Fn(&mut Ctxt) -> SfResult<(NodeRef, NodeRef)>,
    ) -> SfResult<(NodeRef, NodeRef)> {
        if let Some(&pair) = self.moment_nodes.get(&key) {
            return Ok(pair);
        }
        let pair = build(self)?;
        self.moment_nodes.insert(key, pair);
        Ok(pair)
    }

    pub(crate) fn grad_cached(&self, key: &GradKey) -> Option<&[NodeRef]> {
        self.grad_nodes.get(key).map(|v| v.as_slice())
    }

    pub(crate) fn cache_grads(&mut self, key: GradKey, nodes: Vec<NodeRef>) {
        self.grad_nodes.insert(key, nodes);
    }

    pub fn add_op(&mut self, kind: OpKind, inputs: Vec<NodeRef>, name: Option<&str>) -> SfResult<NodeRef> {
        self.graph.add_op(kind, inputs, name)
    }

    pub(crate) fn add_gradients(
        &mut self,
        y: NodeRef,
        xs: &[NodeRef],
        dy: Option<NodeRef>,
    ) -> SfResult<Vec<NodeRef>> {
        add_gradients(&mut self.graph, y, xs, dy)
    }

    pub fn weight(&self, name: &str) -> Option<&ExprRef> {
        self.weights.get(name)
    }

    /// Runs `f` under a backend name scope, popping the scope on both exit
    /// paths.
    pub fn with_scope<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Ctxt) -> SfResult<R>,
    ) -> SfResult<R> {
        self.graph.push_scope(name);
        let result = f(self);
        self.graph.pop_scope();
        result
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl Default for Ctxt {
    fn default() -> Self {
        Self::new()
    }
}
