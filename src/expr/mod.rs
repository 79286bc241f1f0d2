pub mod ctxt;
pub mod grad;
pub mod helpers;
pub mod ops;

pub use ctxt::Ctxt;

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::errors::SfResult;
use crate::graph::NodeRef;
use crate::livecheck::live_check;
use crate::shape::Shape;
use crate::types::{DType, ElemType, TensorValue};

pub(crate) type BuildFn = Box<dyn Fn(&mut Ctxt) -> SfResult<NodeRef>>;
pub(crate) type LiteralFn = Box<dyn Fn() -> SfResult<TensorValue>>;

/// Identity of an expression node. Two separately constructed expressions
/// with identical semantics are distinct nodes; memoization keys on this.
pub(crate) type ExprId = usize;

pub(crate) struct ExprInner {
    pub(crate) shape: Shape,
    pub(crate) cost: u32,
    pub(crate) dtype: DType,
    pub(crate) build: BuildFn,
    pub(crate) literal: Option<LiteralFn>,
}

/// A lazy, shape-carrying tensor expression. Nothing is materialized until a
/// run asks for it; `build` lowers the node into a backend graph inside a
/// materialization context.
pub struct Expr<T: ElemType> {
    inner: Rc<ExprInner>,
    _elem: PhantomData<T>,
}

impl<T: ElemType> Clone for Expr<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner), _elem: PhantomData }
    }
}

impl<T: ElemType> Expr<T> {
    pub(crate) fn new(shape: Shape, cost: u32, build: BuildFn) -> Self {
        Self {
            inner: Rc::new(ExprInner { shape, cost, dtype: T::DTYPE, build, literal: None }),
            _elem: PhantomData,
        }
    }

    pub(crate) fn with_literal(shape: Shape, cost: u32, build: BuildFn, literal: LiteralFn) -> Self {
        Self {
            inner: Rc::new(ExprInner {
                shape,
                cost,
                dtype: T::DTYPE,
                build,
                literal: Some(literal),
            }),
            _elem: PhantomData,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// Heuristic tree weight; gates eager evaluation in display paths only.
    pub fn cost(&self) -> u32 {
        self.inner.cost
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// The dtype-erased handle used for identity, weight maps, and
    /// heterogeneous collections.
    pub fn erased(&self) -> ExprRef {
        ExprRef { inner: Rc::clone(&self.inner) }
    }

    pub(crate) fn id(&self) -> ExprId {
        Rc::as_ptr(&self.inner) as ExprId
    }

    pub(crate) fn literal_value(&self) -> Option<SfResult<TensorValue>> {
        self.inner.literal.as_ref().map(|f| f())
    }
}

impl<T: ElemType> fmt::Display for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cost() < 100 && !live_check() {
            if let Ok(v) = self.run() {
                return write!(f, "{v}");
            }
        }
        write!(f, "{}{}", self.dtype(), self.shape())
    }
}

impl<T: ElemType> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({}{}, cost={})", self.dtype(), self.shape(), self.cost())
    }
}

/// A dtype-erased expression handle.
pub struct ExprRef {
    pub(crate) inner: Rc<ExprInner>,
}

impl Clone for ExprRef {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl ExprRef {
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn cost(&self) -> u32 {
        self.inner.cost
    }

    pub(crate) fn id(&self) -> ExprId {
        Rc::as_ptr(&self.inner) as ExprId
    }
}

impl fmt::Debug for ExprRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprRef({}{})", self.dtype(), self.shape())
    }
}
