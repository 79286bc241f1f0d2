//! Lazy, statically shape-checked tensor expressions. User code composes
//! `Expr` values; every operator infers an output shape by unification, and
//! nothing touches the execution engine until a run materializes the
//! recorded graph into backend nodes.

pub mod backend;
pub mod errors;
pub mod expr;
pub mod graph;
pub mod livecheck;
mod macros;
pub mod session;
pub mod shape;
pub mod types;

pub use backend::cpu::CpuBackend;
pub use backend::{Backend, DeviceInfo};
pub use errors::{SfError, SfResult, Status, StatusCode};
pub use expr::grad::{
    curl, diff, diff_n, divergence, grad, gradients, hessian, jacobian, laplacian,
};
pub use expr::helpers::{
    batch, eval, eval2, eval3, from_tensor, image, matrix, pixel, scalar, scalar_flex, tensor3,
    tensor4, variable, vector, video,
};
pub use expr::ops::{conv2d_backprop_input, decode_jpeg, stack, truncated_normal, SliceSpec};
pub use expr::{Ctxt, Expr, ExprRef};
pub use graph::{Graph, NodeRef, OpKind, Padding, ReduceKind};
pub use livecheck::{live_check, set_live_check};
pub use session::{parse_fetch, PartialRunToken, Runner, Session};
pub use shape::{Dim, IVar, Shape};
pub use types::{DType, ElemType, FloatElem, NumElem, TensorValue};
