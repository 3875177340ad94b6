//! Lowering the loop AST into the expression IR, and substituting
//! statement calls with their stages' computations.

use crate::codegen::ast_builder::{AstBinOp, AstExpr, AstNode};
use crate::ir::expr::{BinaryOp, Expr, ExprKind, Var};
use crate::ir::types::PrimitiveType;
use indexmap::IndexMap;

/// Translate an AST expression into IR. Integers and identifiers are
/// `int32`; `and` coerces its operands to boolean.
pub fn ast_expr_to_expr(e: &AstExpr) -> Expr {
    match e {
        AstExpr::Int(v) => Expr::from(*v as i32),
        AstExpr::Var(name) => Var::internal(name, PrimitiveType::Int32).into(),
        AstExpr::Binary { op, left, right } => {
            let mut l = ast_expr_to_expr(left);
            let mut r = ast_expr_to_expr(right);
            let op = match op {
                AstBinOp::Add => BinaryOp::Add,
                AstBinOp::Sub => BinaryOp::Sub,
                AstBinOp::Mul => BinaryOp::Mul,
                AstBinOp::Div => BinaryOp::Div,
                AstBinOp::Mod => BinaryOp::Mod,
                AstBinOp::Lt => BinaryOp::LT,
                AstBinOp::Le => BinaryOp::LE,
                AstBinOp::Gt => BinaryOp::GT,
                AstBinOp::Ge => BinaryOp::GE,
                AstBinOp::Eq => BinaryOp::EQ,
                AstBinOp::Ne => BinaryOp::NE,
                AstBinOp::And => BinaryOp::And,
                AstBinOp::Or => BinaryOp::Or,
            };
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                l.set_ptype(PrimitiveType::Boolean);
                r.set_ptype(PrimitiveType::Boolean);
            }
            Expr::binary(op, l, r)
        }
        AstExpr::Min(a, b) => Expr::min(ast_expr_to_expr(a), ast_expr_to_expr(b)),
        AstExpr::Max(a, b) => Expr::max(ast_expr_to_expr(a), ast_expr_to_expr(b)),
        AstExpr::FloorDiv(a, b) => Expr::binary(
            BinaryOp::Div,
            ast_expr_to_expr(a),
            ast_expr_to_expr(b),
        ),
        AstExpr::CeilDiv(a, b) => {
            // ceil(a/b) = floor((a + b - 1) / b) for positive b
            let bias = match b.as_ref() {
                AstExpr::Int(v) => Expr::from((*v - 1) as i32),
                _ => Expr::binary(
                    BinaryOp::Sub,
                    ast_expr_to_expr(b),
                    Expr::from(1i32),
                ),
            };
            let num = Expr::binary(BinaryOp::Add, ast_expr_to_expr(a), bias);
            Expr::binary(BinaryOp::Div, num, ast_expr_to_expr(b))
        }
    }
}

/// Translate an AST statement tree into IR:
///
/// | AST node | IR produced |
/// |----------|-------------|
/// | block    | `Block(children)` |
/// | for      | `For(init, cond, inc, Block([body]), Var(iter, int32))` |
/// | if       | `IfThenElse(cond, then[, else])` |
/// | user     | `Call(stmt, args)` (replaced later) |
/// | mark     | `Block([Mark(id), child])` |
pub fn ast_to_expr(node: &AstNode) -> Expr {
    match node {
        AstNode::Block(children) => Expr::block(children.iter().map(ast_to_expr).collect()),
        AstNode::For {
            iterator,
            init,
            cond,
            inc,
            body,
        } => {
            // the loop body is re-wrapped even when it already is a
            // block; downstream printing relies on the extra layer
            // being flattened, not absent
            let ir_body = Expr::block(vec![ast_to_expr(body)]);
            Expr::for_loop(
                ast_expr_to_expr(init),
                ast_expr_to_expr(cond),
                ast_expr_to_expr(inc),
                ir_body,
                Var::internal(iterator, PrimitiveType::Int32),
            )
        }
        AstNode::If { cond, then, else_ } => Expr::if_then_else(
            ast_expr_to_expr(cond),
            ast_to_expr(then),
            else_.as_ref().map(|e| ast_to_expr(e)),
        ),
        AstNode::User { stmt, args } => {
            Expr::call(stmt, args.iter().map(ast_expr_to_expr).collect())
        }
        AstNode::Mark { id, child } => {
            Expr::block(vec![Expr::mark(id), ast_to_expr(child)])
        }
    }
}

/// Replace every `Call` to `stage_name` with a deep copy of the
/// stage's expression whose iterator variables are substituted by the
/// scheduled index expressions.
pub fn replace_expr_with_stage(
    root: &Expr,
    stage_name: &str,
    stage_expr: &Expr,
    index_map: &IndexMap<String, Expr>,
) -> Expr {
    root.transform(&mut |e| match e.kind() {
        ExprKind::Call { caller, .. } if caller == stage_name => {
            let copied = stage_expr.deep_copy();
            copied.transform(&mut |n| match n.kind() {
                ExprKind::Var(v) => match index_map.get(v.name()) {
                    Some(replacement) => replacement.deep_copy(),
                    None => n.clone(),
                },
                _ => n,
            })
        }
        _ => e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::ir::expr::ExprTag;
    use crate::ir::printer::dump;
    use crate::ir::types::Constant;

    #[test]
    fn test_for_body_is_double_wrapped() {
        context::reset();
        let ast = AstNode::For {
            iterator: "c0".into(),
            init: AstExpr::int(0),
            cond: AstExpr::Binary {
                op: AstBinOp::Le,
                left: Box::new(AstExpr::var("c0")),
                right: Box::new(AstExpr::int(19)),
            },
            inc: AstExpr::int(1),
            body: Box::new(AstNode::Block(vec![AstNode::User {
                stmt: "S0".into(),
                args: vec![AstExpr::var("c0")],
            }])),
        };
        let ir = ast_to_expr(&ast);
        let ExprKind::For { body, .. } = ir.kind() else {
            panic!("expected For");
        };
        let ExprKind::Block { exprs } = body.kind() else {
            panic!("expected Block wrap");
        };
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].tag(), ExprTag::Block);
    }

    #[test]
    fn test_user_becomes_call() {
        context::reset();
        let node = AstNode::User {
            stmt: "S1".into(),
            args: vec![AstExpr::var("c0"), AstExpr::var("c1")],
        };
        let ir = ast_to_expr(&node);
        assert_eq!(ir.tag(), ExprTag::Call);
        assert_eq!(dump(&ir), "S1(c0, c1)");
    }

    #[test]
    fn test_stage_substitution() {
        context::reset();
        let t = Expr::tensor(
            "out",
            crate::ir::types::PrimitiveType::Float32,
            vec![Constant::from(4), Constant::from(4)],
        );
        let i = crate::ir::expr::Var::named("i");
        let j = crate::ir::expr::Var::named("j");
        let stage_expr = t.index(i).index(j).assign(Expr::from(0.0f32));

        let call = Expr::call(
            "S0",
            vec![
                Var::internal("c0", PrimitiveType::Int32).into(),
                Var::internal("c1", PrimitiveType::Int32).into(),
            ],
        );
        let mut index_map = IndexMap::new();
        index_map.insert(
            "i".to_string(),
            Expr::from(Var::internal("c0", PrimitiveType::Int32)),
        );
        index_map.insert(
            "j".to_string(),
            Expr::from(Var::internal("c1", PrimitiveType::Int32)),
        );
        let out = replace_expr_with_stage(&call, "S0", &stage_expr, &index_map);
        assert_eq!(dump(&out), "out[c0, c1] = 0");
    }
}
