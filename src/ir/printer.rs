//! Text rendering of IR expressions.
//!
//! The printer is the debugging surface and the source of the strings
//! fed back into the integer-set parsers (reference access relations,
//! extra domain conditions), so the expression forms it emits must
//! stay parseable: full parentheses on binary operations, `[i, j]`
//! subscripts on references.

use crate::ir::expr::{AssignOp, BinaryOp, Expr, ExprKind};
use crate::ir::types::{fmt_f32, fmt_float, PrimitiveType};

/// Render an expression as a single string.
pub fn dump(expr: &Expr) -> String {
    let mut out = String::new();
    print_into(expr, &mut out);
    out
}

fn binop_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::EQ => "==",
        BinaryOp::NE => "!=",
        BinaryOp::LT => "<",
        BinaryOp::LE => "<=",
        BinaryOp::GT => ">",
        BinaryOp::GE => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Min | BinaryOp::Max => unreachable!("min/max render as calls"),
    }
}

/// The `=`/`+=`/`-=`/`*=`/`/=` token of an assignment.
pub fn assign_str(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Assign => "=",
        AssignOp::Sum => "+=",
        AssignOp::Sub => "-=",
        AssignOp::Mul => "*=",
        AssignOp::Div => "/=",
    }
}

fn print_into(expr: &Expr, out: &mut String) {
    match expr.kind() {
        ExprKind::IntImm { value } => out.push_str(&value.to_string()),
        ExprKind::FloatImm { value } => {
            if expr.ptype() == PrimitiveType::Float32 {
                out.push_str(&fmt_f32(*value as f32));
            } else {
                out.push_str(&fmt_float(*value));
            }
        }
        ExprKind::Const(c) => out.push_str(&c.to_string()),
        ExprKind::Var(v) => out.push_str(v.name()),
        ExprKind::Tensor(t) => out.push_str(t.name()),
        ExprKind::Array { name, .. } => out.push_str(name),
        ExprKind::Binary { op, a, b } => match op {
            BinaryOp::Min => {
                out.push_str("cinn_min(");
                print_into(a, out);
                out.push_str(", ");
                print_into(b, out);
                out.push(')');
            }
            BinaryOp::Max => {
                out.push_str("cinn_max(");
                print_into(a, out);
                out.push_str(", ");
                print_into(b, out);
                out.push(')');
            }
            _ => {
                out.push('(');
                print_into(a, out);
                out.push(' ');
                out.push_str(binop_str(*op));
                out.push(' ');
                print_into(b, out);
                out.push(')');
            }
        },
        ExprKind::Minus { a } => {
            out.push_str("(-");
            print_into(a, out);
            out.push(')');
        }
        ExprKind::Exp { a } => {
            out.push_str("exp(");
            print_into(a, out);
            out.push(')');
        }
        ExprKind::Reference {
            target, iterators, ..
        } => {
            print_into(target, out);
            out.push('[');
            for (i, it) in iterators.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_into(it, out);
            }
            out.push(']');
        }
        ExprKind::Assign { op, a, b } => {
            print_into(a, out);
            out.push(' ');
            out.push_str(assign_str(*op));
            out.push(' ');
            print_into(b, out);
        }
        ExprKind::Call { caller, args } => {
            out.push_str(caller);
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_into(a, out);
            }
            out.push(')');
        }
        ExprKind::Let { a, b } => {
            out.push_str("let ");
            print_into(a, out);
            out.push_str(" = ");
            print_into(b, out);
        }
        ExprKind::Cast { expr: inner } => {
            out.push_str(&format!("cast<{}>(", expr.ptype()));
            print_into(inner, out);
            out.push(')');
        }
        ExprKind::Identity { expr: inner, .. } => print_into(inner, out),
        ExprKind::Mark { content } => {
            out.push_str("// ");
            out.push_str(content);
        }
        ExprKind::Block { exprs } => {
            for (i, e) in exprs.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                print_into(e, out);
            }
        }
        ExprKind::For {
            init,
            cond,
            inc,
            body,
            iterator,
        } => {
            out.push_str(&format!("for ({} = ", iterator.name()));
            print_into(init, out);
            out.push_str("; ");
            print_into(cond, out);
            out.push_str("; ");
            out.push_str(iterator.name());
            out.push_str(" += ");
            print_into(inc, out);
            out.push_str(") {\n");
            print_into(body, out);
            out.push_str("\n}");
        }
        ExprKind::IfThenElse {
            condition,
            true_case,
            false_case,
        } => {
            out.push_str("if (");
            print_into(condition, out);
            out.push_str(") {\n");
            print_into(true_case, out);
            out.push_str("\n}");
            if let Some(e) = false_case {
                out.push_str(" else {\n");
                print_into(e, out);
                out.push_str("\n}");
            }
        }
        ExprKind::CallOnce { block, .. } => {
            out.push_str("call_once {\n");
            print_into(block, out);
            out.push_str("\n}");
        }
        ExprKind::Allocate { buffer, size, .. } => {
            out.push_str(&format!("allocate {}[", buffer));
            print_into(size, out);
            out.push(']');
        }
        ExprKind::BufferOpr { name, .. } => out.push_str(name),
        ExprKind::SimdOpr { op, a, b, .. } => {
            out.push_str(&format!("simd-{:?}(", op));
            print_into(a, out);
            if let Some(b) = b {
                out.push_str(", ");
                print_into(b, out);
            }
            out.push(')');
        }
        ExprKind::Func { name, body, .. } => {
            out.push_str(&format!("def {} {{\n", name));
            print_into(body, out);
            out.push_str("\n}");
        }
        ExprKind::Module {
            data_section,
            function_section,
        } => {
            print_into(data_section, out);
            out.push('\n');
            print_into(function_section, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::ir::expr::Var;
    use crate::ir::types::{Constant, PrimitiveType};

    #[test]
    fn test_arith_printing() {
        context::reset();
        let e = (Expr::from(1.0f32) + Expr::from(2.0f32)) * Expr::from(1.2f32);
        assert_eq!(dump(&e), "((1 + 2) * 1.2)");
    }

    #[test]
    fn test_compare_printing() {
        context::reset();
        let e = Expr::from(0.1f32).gt(Expr::from(3.0f32));
        assert_eq!(dump(&e), "(0.1 > 3)");
    }

    #[test]
    fn test_reference_printing() {
        context::reset();
        let t = Expr::tensor(
            "x",
            PrimitiveType::Float32,
            vec![Constant::from(4), Constant::from(4)],
        );
        let i = Var::named("i");
        let j = Var::named("j");
        let r = t.index(i).index(j);
        assert_eq!(dump(&r), "x[i, j]");
    }

    #[test]
    fn test_min_prints_as_call() {
        context::reset();
        let e = Expr::min(Expr::from(1i32), Expr::from(2i32));
        assert_eq!(dump(&e), "cinn_min(1, 2)");
    }
}
