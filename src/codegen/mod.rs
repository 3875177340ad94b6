//! Code generation: schedule → loop AST → IR → C.

pub mod ast_builder;
pub mod ast_to_ir;
pub mod c;

pub use ast_builder::{AstBinOp, AstBuild, AstBuildInfo, AstExpr, AstNode, StagePoly};
pub use ast_to_ir::{ast_expr_to_expr, ast_to_expr, replace_expr_with_stage};
pub use c::{compile_as_c, CCodeGen, Mode};
