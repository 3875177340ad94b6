//! C source emission.
//!
//! Two modes: `Header` emits an include-guarded header with forward
//! declarations; `Source` emits the data section and full function
//! bodies. Both share the include/typedef preamble.
//!
//! References print as `tensor[i, j]`. That form is not valid C for
//! multi-dimensional accesses; downstream consumers lower it to
//! `tensor[i*stride + j]` before compiling. The comma form is a
//! compatibility requirement and is emitted literally.

use crate::ir::expr::{BinaryOp, BufferKind, Expr, ExprKind, SimdOp};
use crate::ir::printer::assign_str;
use crate::ir::types::{fmt_f32, fmt_float, CompositeType, PrimitiveType};
use crate::utils::errors::{CinnResult, CodegenError};
use crate::utils::pretty::CodeFormatter;

/// What kind of file is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Include-guarded header with forward declarations.
    Header,
    /// Full implementation file.
    Source,
}

const FILE_GUARD: &str = "CINN_FILE_";

/// The C code generator.
pub struct CCodeGen {
    mode: Mode,
    f: CodeFormatter,
}

impl CCodeGen {
    /// Create a generator for the given mode.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            f: CodeFormatter::new("  "),
        }
    }

    /// Shorthand for a source-mode generator.
    pub fn source() -> Self {
        Self::new(Mode::Source)
    }

    /// Shorthand for a header-mode generator.
    pub fn header() -> Self {
        Self::new(Mode::Header)
    }

    /// Emit a single expression without any file preamble.
    pub fn print(&mut self, expr: &Expr) {
        self.emit_stmt(expr);
    }

    /// Emit a complete file for `expr` (typically a `Module` or a
    /// `Function` node).
    pub fn compile(&mut self, expr: &Expr) -> CinnResult<()> {
        let uses_simd = !expr.collect(crate::ir::expr::ExprTag::SIMDOpr).is_empty();
        match self.mode {
            Mode::Header => {
                self.f.writeln(&format!("#ifndef {}", FILE_GUARD));
                self.f.writeln(&format!("#define {}", FILE_GUARD));
                self.print_preamble(uses_simd);
                self.print_forward_decls(expr)?;
                self.f.writeln(&format!("#endif  // {}", FILE_GUARD));
            }
            Mode::Source => {
                self.print_preamble(uses_simd);
                self.emit_stmt(expr);
            }
        }
        Ok(())
    }

    /// The code accumulated so far.
    pub fn compiled_code(&self) -> String {
        self.f.output().to_string()
    }

    /// Write the accumulated code to disk.
    pub fn write_to_file(&self, path: &std::path::Path) -> CinnResult<()> {
        std::fs::write(path, self.compiled_code())?;
        Ok(())
    }

    fn print_preamble(&mut self, uses_simd: bool) {
        self.f.writeln("#include <math.h>");
        self.f.writeln("#include <stdio.h>");
        self.f.writeln("#include <stdlib.h>");
        if uses_simd {
            self.f.writeln("#include <immintrin.h>");
        }
        self.f.newline();
        self.f.writeln("typedef char cinn_boolean_t;");
        self.f.writeln("typedef signed char cinn_int8_t;");
        self.f.writeln("typedef short cinn_int16_t;");
        self.f.writeln("typedef int cinn_int32_t;");
        self.f.writeln("typedef long long cinn_int64_t;");
        self.f.writeln("typedef float cinn_float32_t;");
        self.f.writeln("typedef double cinn_float64_t;");
        self.f.newline();
        self.f.writeln("#define cinn_min(a, b) ((a) < (b) ? (a) : (b))");
        self.f.writeln("#define cinn_max(a, b) ((a) > (b) ? (a) : (b))");
        if uses_simd {
            self.f.newline();
            self.f.writeln("static inline float cinn_m128_reduce_add(__m128 v) {");
            self.f.writeln("  __m128 s = _mm_hadd_ps(v, v);");
            self.f.writeln("  s = _mm_hadd_ps(s, s);");
            self.f.writeln("  return _mm_cvtss_f32(s);");
            self.f.writeln("}");
            self.f.writeln("static inline float cinn_m256_reduce_add(__m256 v) {");
            self.f.writeln("  __m128 lo = _mm256_castps256_ps128(v);");
            self.f.writeln("  __m128 hi = _mm256_extractf128_ps(v, 1);");
            self.f.writeln("  return cinn_m128_reduce_add(_mm_add_ps(lo, hi));");
            self.f.writeln("}");
        }
        self.f.newline();
    }

    fn print_forward_decls(&mut self, expr: &Expr) -> CinnResult<()> {
        let mut decls: Vec<String> = Vec::new();
        let mut err: Option<CodegenError> = None;
        expr.visit(&mut |e| {
            if let ExprKind::Func {
                name,
                inputs,
                outputs,
                ..
            } = e.kind()
            {
                match signature(name, inputs, outputs) {
                    Ok(sig) => decls.push(format!("{};", sig)),
                    Err(e) => err = Some(e),
                }
            }
        });
        if let Some(e) = err {
            return Err(e.into());
        }
        for d in decls {
            self.f.writeln(&d);
        }
        Ok(())
    }

    fn emit_stmt(&mut self, e: &Expr) {
        match e.kind() {
            ExprKind::Block { exprs } => {
                // let-bindings are hoisted to the front of their block
                for child in exprs.iter().filter(|c| matches!(c.kind(), ExprKind::Let { .. })) {
                    self.emit_stmt(child);
                }
                for child in exprs.iter().filter(|c| !matches!(c.kind(), ExprKind::Let { .. })) {
                    self.emit_stmt(child);
                }
            }
            ExprKind::For {
                init,
                cond,
                inc,
                body,
                iterator,
            } => {
                self.f.writeln(&format!(
                    "for (int {} = {}; {}; {} += {}) {{",
                    iterator.name(),
                    emit_expr(init),
                    emit_expr(cond),
                    iterator.name(),
                    emit_expr(inc)
                ));
                self.f.indent();
                self.emit_stmt(body);
                self.f.dedent();
                self.f.writeln("}");
            }
            ExprKind::IfThenElse {
                condition,
                true_case,
                false_case,
            } => {
                self.f.writeln(&format!("if ({}) {{", emit_expr(condition)));
                self.f.indent();
                self.emit_stmt(true_case);
                self.f.dedent();
                match false_case {
                    Some(else_body) => {
                        self.f.writeln("} else {");
                        self.f.indent();
                        self.emit_stmt(else_body);
                        self.f.dedent();
                        self.f.writeln("}");
                    }
                    None => self.f.writeln("}"),
                }
            }
            ExprKind::Assign { op, a, b } => {
                self.f.writeln(&format!(
                    "{} {} {};",
                    emit_expr(a),
                    assign_str(*op),
                    emit_expr(b)
                ));
            }
            ExprKind::Let { a, b } => {
                let ty = c_type(b.ptype(), b.ctype());
                self.f
                    .writeln(&format!("{} {} = {};", ty, emit_expr(a), emit_expr(b)));
            }
            ExprKind::Mark { content } => {
                self.f.writeln(&format!("// {}", content));
            }
            ExprKind::Call { .. } => {
                self.f.writeln(&format!("{};", emit_expr(e)));
            }
            ExprKind::SimdOpr { .. } => {
                self.f.writeln(&format!("{};", emit_expr(e)));
            }
            ExprKind::CallOnce { cond_var, block } => {
                self.f
                    .writeln(&format!("static cinn_boolean_t {} = 0;", cond_var));
                self.f.writeln(&format!("if (!{}) {{", cond_var));
                self.f.indent();
                self.emit_stmt(block);
                self.f.writeln(&format!("{} = 1;", cond_var));
                self.f.dedent();
                self.f.writeln("}");
            }
            ExprKind::Allocate {
                buffer,
                size,
                dtype,
            } => {
                let ty = dtype.c_alias();
                self.f.writeln(&format!(
                    "{}* {} = ({}*) malloc({});",
                    ty,
                    buffer,
                    ty,
                    emit_expr(size)
                ));
            }
            ExprKind::BufferOpr {
                kind,
                name,
                size,
                data,
            } => {
                let ty = e.ptype().c_alias();
                match kind {
                    BufferKind::Create => self.f.writeln(&format!(
                        "{}* {} = ({}*) malloc({});",
                        ty,
                        name,
                        ty,
                        emit_expr(size)
                    )),
                    BufferKind::CreateAssign => {
                        let literals: Vec<String> =
                            data.iter().map(|c| c.to_string()).collect();
                        self.f.writeln(&format!(
                            "{} {}[] = {{ {} }};",
                            ty,
                            name,
                            literals.join(", ")
                        ));
                    }
                    BufferKind::Destroy => self.f.writeln(&format!("free({});", name)),
                    BufferKind::Reference => self.f.writeln(&format!("{};", name)),
                }
            }
            ExprKind::Func {
                name,
                inputs,
                outputs,
                body,
            } => {
                let sig = signature(name, inputs, outputs)
                    .unwrap_or_else(|err| panic!("cannot emit function `{}`: {}", name, err));
                self.f.writeln(&format!("{} {{", sig));
                self.f.indent();
                self.emit_stmt(body);
                self.f.dedent();
                self.f.writeln("}");
            }
            ExprKind::Module {
                data_section,
                function_section,
            } => {
                self.emit_stmt(data_section);
                self.f.newline();
                self.emit_stmt(function_section);
            }
            // expression used in statement position
            _ => {
                self.f.writeln(&format!("{};", emit_expr(e)));
            }
        }
    }
}

/// `void name (T* a, T* b)` — the function signature shared by the
/// declaration and the definition.
fn signature(name: &str, inputs: &[Expr], outputs: &[Expr]) -> Result<String, CodegenError> {
    let mut args: Vec<String> = Vec::new();
    for arg in inputs.iter().chain(outputs.iter()) {
        args.push(arg_decl(arg)?);
    }
    Ok(format!("void {} ({})", name, args.join(", ")))
}

fn arg_decl(arg: &Expr) -> Result<String, CodegenError> {
    match arg.kind() {
        ExprKind::Tensor(t) => Ok(format!("{}* {}", t.ptype().c_alias(), t.name())),
        ExprKind::BufferOpr { name, .. } => {
            Ok(format!("{}* {}", arg.ptype().c_alias(), name))
        }
        ExprKind::Var(v) => Ok(format!("{} {}", v.ptype().c_alias(), v.name())),
        _ => Err(CodegenError::BadArgument(arg.to_string())),
    }
}

/// The C spelling of a type: SIMD composites map to vector types,
/// scalars to their `cinn_*_t` alias.
fn c_type(ptype: PrimitiveType, ctype: CompositeType) -> String {
    match ctype {
        CompositeType::Primitive => ptype.c_alias().to_string(),
        CompositeType::Simd128 => "__m128".to_string(),
        CompositeType::Simd256 => "__m256".to_string(),
    }
}

fn simd_intrinsic(width: usize, op: SimdOp) -> &'static str {
    match (width, op) {
        (4, SimdOp::Add) => "_mm_add_ps",
        (4, SimdOp::Sub) => "_mm_sub_ps",
        (4, SimdOp::Mul) => "_mm_mul_ps",
        (4, SimdOp::Div) => "_mm_div_ps",
        (4, SimdOp::Min) => "_mm_min_ps",
        (4, SimdOp::Max) => "_mm_max_ps",
        (4, SimdOp::Load) => "_mm_loadu_ps",
        (4, SimdOp::Store) => "_mm_storeu_ps",
        (4, SimdOp::ReduceAdd) => "cinn_m128_reduce_add",
        (8, SimdOp::Add) => "_mm256_add_ps",
        (8, SimdOp::Sub) => "_mm256_sub_ps",
        (8, SimdOp::Mul) => "_mm256_mul_ps",
        (8, SimdOp::Div) => "_mm256_div_ps",
        (8, SimdOp::Min) => "_mm256_min_ps",
        (8, SimdOp::Max) => "_mm256_max_ps",
        (8, SimdOp::Load) => "_mm256_loadu_ps",
        (8, SimdOp::Store) => "_mm256_storeu_ps",
        (8, SimdOp::ReduceAdd) => "cinn_m256_reduce_add",
        (w, op) => panic!("no intrinsic for width {} opcode {:?}", w, op),
    }
}

/// Render an expression-level node as C.
pub fn emit_expr(e: &Expr) -> String {
    match e.kind() {
        ExprKind::IntImm { value } => value.to_string(),
        ExprKind::FloatImm { value } => {
            if e.ptype() == PrimitiveType::Float32 {
                fmt_f32(*value as f32)
            } else {
                fmt_float(*value)
            }
        }
        ExprKind::Const(c) => c.to_string(),
        ExprKind::Var(v) => v.name().to_string(),
        ExprKind::Tensor(t) => t.name().to_string(),
        ExprKind::Array { name, .. } => name.clone(),
        ExprKind::Binary { op, a, b } => match op {
            BinaryOp::Min => format!("cinn_min({}, {})", emit_expr(a), emit_expr(b)),
            BinaryOp::Max => format!("cinn_max({}, {})", emit_expr(a), emit_expr(b)),
            _ => {
                let op_str = match op {
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
                    BinaryOp::Min | BinaryOp::Max => unreachable!(),
                };
                format!("({} {} {})", emit_expr(a), op_str, emit_expr(b))
            }
        },
        ExprKind::Minus { a } => format!("(-{})", emit_expr(a)),
        ExprKind::Exp { a } => format!("exp({})", emit_expr(a)),
        ExprKind::Reference {
            target, iterators, ..
        } => {
            let idx: Vec<String> = iterators.iter().map(emit_expr).collect();
            format!("{}[{}]", emit_expr(target), idx.join(", "))
        }
        ExprKind::Call { caller, args } => {
            let rendered: Vec<String> = args.iter().map(emit_expr).collect();
            format!("{}({})", caller, rendered.join(", "))
        }
        ExprKind::Cast { expr } => {
            if e.ctype().is_simd() && !expr.is_simd() {
                // scalar -> vector casts broadcast
                let set1 = match e.ctype() {
                    CompositeType::Simd128 => "_mm_set1_ps",
                    CompositeType::Simd256 => "_mm256_set1_ps",
                    CompositeType::Primitive => unreachable!(),
                };
                format!("{}({})", set1, emit_expr(expr))
            } else {
                format!("({})({})", c_type(e.ptype(), e.ctype()), emit_expr(expr))
            }
        }
        ExprKind::Identity { expr, .. } => emit_expr(expr),
        ExprKind::BufferOpr { name, .. } => name.clone(),
        ExprKind::SimdOpr { width, op, a, b } => {
            let intr = simd_intrinsic(*width, *op);
            match op {
                SimdOp::Load => format!("{}(&{})", intr, emit_expr(a)),
                SimdOp::Store => {
                    format!("{}(&{}, {})", intr, emit_expr(a), emit_expr(b.as_ref().unwrap()))
                }
                SimdOp::ReduceAdd => format!("{}({})", intr, emit_expr(a)),
                _ => format!("{}({}, {})", intr, emit_expr(a), emit_expr(b.as_ref().unwrap())),
            }
        }
        _ => panic!("`{:?}` is not an expression-level node", e.tag()),
    }
}

/// Compile `expr` twice — header and source — and write both files.
pub fn compile_as_c(
    expr: &Expr,
    header_path: &std::path::Path,
    source_path: &std::path::Path,
) -> CinnResult<()> {
    let mut header = CCodeGen::header();
    header.compile(expr)?;
    header.write_to_file(header_path)?;

    let mut source = CCodeGen::source();
    source.compile(expr)?;
    source.write_to_file(source_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::ir::expr::Var;
    use crate::ir::types::Constant;

    #[test]
    fn test_reference_emission() {
        context::reset();
        let t = Expr::tensor(
            "out",
            PrimitiveType::Float32,
            vec![Constant::from(4), Constant::from(4)],
        );
        let i = Var::named("i");
        let j = Var::named("j");
        let r = t.index(i).index(j);
        assert_eq!(emit_expr(&r), "out[i, j]");
    }

    #[test]
    fn test_assign_statement() {
        context::reset();
        let t = Expr::tensor(
            "out",
            PrimitiveType::Float32,
            vec![Constant::from(4), Constant::from(4)],
        );
        let i = Var::named("i");
        let j = Var::named("j");
        let stmt = t.index(i).index(j).sum_assign(Expr::from(1.0f32));
        let mut gen = CCodeGen::source();
        gen.print(&stmt);
        assert_eq!(gen.compiled_code(), "out[i, j] += 1;\n");
    }

    #[test]
    fn test_simd_emission() {
        context::reset();
        let a = Expr::tensor("a", PrimitiveType::Float32, vec![Constant::from(8)]);
        let i = Var::named("i");
        let load = Expr::simd_load(4, a.index(i));
        assert_eq!(emit_expr(&load), "_mm_loadu_ps(&a[i])");
        let b = Expr::simd(4, SimdOp::Add, load.clone(), load);
        assert!(emit_expr(&b).starts_with("_mm_add_ps("));
    }

    #[test]
    fn test_buffer_create_and_destroy() {
        context::reset();
        let create = Expr::buffer_opr(
            BufferKind::Create,
            "x0",
            Expr::from(24i32),
            PrimitiveType::Float32,
            vec![],
        );
        let mut gen = CCodeGen::source();
        gen.print(&create);
        assert_eq!(
            gen.compiled_code(),
            "cinn_float32_t* x0 = (cinn_float32_t*) malloc(24);\n"
        );

        let destroy = Expr::buffer_opr(
            BufferKind::Destroy,
            "x0",
            Expr::from(0i32),
            PrimitiveType::Float32,
            vec![],
        );
        let mut gen = CCodeGen::source();
        gen.print(&destroy);
        assert_eq!(gen.compiled_code(), "free(x0);\n");
    }

    #[test]
    fn test_let_hoisting_in_block() {
        context::reset();
        let t = Expr::tensor("a", PrimitiveType::Float32, vec![Constant::from(4)]);
        let i = Var::named("i");
        let stmt = t.clone().index(i).assign(Expr::from(0.0f32));
        let tmp = Var::named("t0");
        let binding = Expr::let_(Expr::from(tmp), Expr::from(1.0f32));
        let block = Expr::block(vec![stmt, binding]);
        let mut gen = CCodeGen::source();
        gen.print(&block);
        let code = gen.compiled_code();
        let let_pos = code.find("cinn_float32_t t0 = 1;").unwrap();
        let stmt_pos = code.find("a[").unwrap();
        assert!(let_pos < stmt_pos, "let must be hoisted above statements");
    }
}
