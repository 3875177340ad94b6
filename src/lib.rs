//! # CINN — a small tensor compiler
//!
//! CINN lowers tensor computations expressed as stages over iteration
//! domains into imperative loop nests and then into C source.
//!
//! ## Architecture
//!
//! ```text
//! Expression IR → Stage/Snippet → Scheduler → Loop AST → IR → C
//! ```
//!
//! ## Example
//!
//! ```rust
//! use cinn::prelude::*;
//!
//! cinn::context::reset();
//! let x = Expr::tensor("x", PrimitiveType::Float32,
//!                      vec![Constant::from(4), Constant::from(4)]);
//! let out = Expr::tensor("out", PrimitiveType::Float32,
//!                        vec![Constant::from(4), Constant::from(4)]);
//! let i = Var::named("i");
//! let j = Var::named("j");
//!
//! let s0 = Stage::new(
//!     out.clone().index(i.clone()).index(j.clone())
//!         .assign(x.clone().index(i).index(j) * Expr::from(2.0f32)));
//!
//! let func = Function::make("scale", vec![x], vec![out], vec![s0]).unwrap();
//! let mut gen = CCodeGen::source();
//! gen.print(&func.ir_function());
//! assert!(gen.compiled_code().contains("out[c0, c1]"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod codegen;
pub mod context;
pub mod core;
pub mod ir;
pub mod polyhedral;
pub mod transform;
pub mod utils;

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::codegen::{CCodeGen, Mode};
    pub use crate::core::{Function, Snippet, Stage, StageType};
    pub use crate::ir::{
        dump, BufferKind, CompositeType, Constant, Expr, ExprKind, ExprTag, Interval,
        PrimitiveType, SimdOp, Tensor, Var,
    };
    pub use crate::polyhedral::{Map, Set, UnionMap, UnionSet};
    pub use crate::utils::errors::{CinnError, CinnResult};
}

use crate::ir::expr::Expr;
use anyhow::Result;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile an expression (typically a `Module` or `Function` node)
/// into a header/source file pair on disk.
pub fn compile_to_files(
    expr: &Expr,
    header_path: &std::path::Path,
    source_path: &std::path::Path,
) -> Result<()> {
    codegen::c::compile_as_c(expr, header_path, source_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
