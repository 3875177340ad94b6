//! The expression IR: types, nodes, and the text printer.

pub mod expr;
pub mod printer;
pub mod types;

pub use expr::{
    collect_var_names, AssignOp, BinaryOp, BufferKind, Expr, ExprKind, ExprTag, SimdOp, Tensor, Var,
};
pub use printer::dump;
pub use types::{CompositeType, Constant, Interval, PrimitiveType};
