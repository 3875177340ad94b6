//! The expression IR: a closed tagged tree behind cheap shared handles.
//!
//! Nodes are immutable values once constructed; handles are
//! reference-counted and identity-compared with [`Expr::same_as`].
//! Smart constructors validate their arguments and abort on violated
//! invariants — those are programmer bugs, not recoverable errors.
//! Rewrites go through [`Expr::transform`], which rebuilds children
//! first and then hands the node to the hook.

use crate::context::{self, with_context};
use crate::ir::types::{CompositeType, Constant, Interval, PrimitiveType};
use crate::polyhedral::set::Set;
use std::rc::Rc;
use tracing::debug;

/// A named variable. Cloning shares the name; the process-wide name
/// registry rejects duplicate explicit names.
#[derive(Debug, Clone)]
pub struct Var {
    name: String,
    ptype: PrimitiveType,
    interval: Option<Interval>,
}

impl Var {
    /// A fresh variable with a generated iterator name, `int32` typed.
    pub fn new() -> Self {
        let name = with_context(|ctx| ctx.names.new_iterator_name());
        Self {
            name,
            ptype: PrimitiveType::Int32,
            interval: None,
        }
    }

    /// A named `int32` variable. Panics when the name was already
    /// claimed in this context.
    pub fn named(name: &str) -> Self {
        let fresh = with_context(|ctx| ctx.claim_var_name(name));
        assert!(fresh, "duplicate variable name `{}`", name);
        Self {
            name: name.to_string(),
            ptype: PrimitiveType::Int32,
            interval: None,
        }
    }

    /// A named `int32` variable bounded by `[lower, upper]`.
    pub fn with_bounds(name: &str, lower: i32, upper: i32) -> Self {
        let mut v = Self::named(name);
        v.interval = Some(Interval::new(Constant::from(lower), Constant::from(upper)));
        v
    }

    /// Internal constructor for compiler-generated variables (loop
    /// iterators from AST lowering). Does not touch the registry.
    pub(crate) fn internal(name: &str, ptype: PrimitiveType) -> Self {
        Self {
            name: name.to_string(),
            ptype,
            interval: None,
        }
    }

    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The variable's primitive type.
    pub fn ptype(&self) -> PrimitiveType {
        self.ptype
    }

    /// The attached interval, if any.
    pub fn interval(&self) -> Option<&Interval> {
        self.interval.as_ref()
    }
}

impl Default for Var {
    fn default() -> Self {
        Self::new()
    }
}

/// A tensor placeholder: name, element type and shape.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    ptype: PrimitiveType,
    dims: Vec<Constant>,
}

impl Tensor {
    /// The tensor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tensor's element type.
    pub fn ptype(&self) -> PrimitiveType {
        self.ptype
    }

    /// The tensor's shape.
    pub fn dims(&self) -> &[Constant] {
        &self.dims
    }
}

/// Binary operator discriminant shared by the arithmetic, comparison
/// and logical tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    EQ,
    NE,
    LT,
    LE,
    GT,
    GE,
    And,
    Or,
}

impl BinaryOp {
    /// Arithmetic operators: result type equals the operand type.
    pub fn is_arith(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod
                | BinaryOp::Min
                | BinaryOp::Max
        )
    }

    /// Comparison operators: result is boolean.
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            BinaryOp::EQ | BinaryOp::NE | BinaryOp::LT | BinaryOp::LE | BinaryOp::GT | BinaryOp::GE
        )
    }

    /// Logical operators: boolean operands, boolean result.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Assignment operator discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AssignOp {
    Assign,
    Sum,
    Sub,
    Mul,
    Div,
}

/// SIMD sub-opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SimdOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Store,
    Load,
    ReduceAdd,
}

/// Buffer operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Allocate with `malloc`.
    Create,
    /// Declare with literal initialisation data.
    CreateAssign,
    /// Release with `free`.
    Destroy,
    /// Mention the buffer by name.
    Reference,
}

/// The closed node set of the IR.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum ExprKind {
    IntImm {
        value: i64,
    },
    FloatImm {
        value: f64,
    },
    Const(Constant),
    Var(Var),
    Tensor(Tensor),
    Array {
        name: String,
        size: Expr,
    },
    Binary {
        op: BinaryOp,
        a: Expr,
        b: Expr,
    },
    Minus {
        a: Expr,
    },
    Exp {
        a: Expr,
    },
    For {
        init: Expr,
        cond: Expr,
        inc: Expr,
        body: Expr,
        iterator: Var,
    },
    IfThenElse {
        condition: Expr,
        true_case: Expr,
        false_case: Option<Expr>,
    },
    Block {
        exprs: Vec<Expr>,
    },
    Mark {
        content: String,
    },
    CallOnce {
        cond_var: String,
        block: Expr,
    },
    Call {
        caller: String,
        args: Vec<Expr>,
    },
    Reference {
        target: Expr,
        iterators: Vec<Expr>,
        domain: Option<Set>,
    },
    Assign {
        op: AssignOp,
        a: Expr,
        b: Expr,
    },
    Allocate {
        buffer: String,
        size: Expr,
        dtype: PrimitiveType,
    },
    BufferOpr {
        kind: BufferKind,
        name: String,
        size: Expr,
        data: Vec<Constant>,
    },
    Cast {
        expr: Expr,
    },
    Let {
        a: Expr,
        b: Expr,
    },
    Identity {
        expr: Expr,
        id: String,
    },
    SimdOpr {
        width: usize,
        op: SimdOp,
        a: Expr,
        b: Option<Expr>,
    },
    Func {
        name: String,
        inputs: Vec<Expr>,
        outputs: Vec<Expr>,
        body: Expr,
    },
    Module {
        data_section: Expr,
        function_section: Expr,
    },
}

/// The fine-grained tag of a node, one per node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ExprTag {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Minus,
    Exp,
    Min,
    Max,
    EQ,
    NE,
    LT,
    LE,
    GT,
    GE,
    And,
    Or,
    For,
    IfThenElse,
    Block,
    Mark,
    CallOnce,
    IntImm,
    FloatImm,
    Constant,
    Var,
    Tensor,
    Array,
    Reference,
    Allocate,
    BufferOpr,
    Cast,
    Let,
    Identity,
    Call,
    Function,
    Assign,
    SumAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    SIMDOpr,
    Module,
}

#[derive(Debug, Clone)]
struct ExprNode {
    kind: ExprKind,
    ptype: PrimitiveType,
    ctype: CompositeType,
}

/// A cheap, identity-comparable handle to an IR node.
#[derive(Debug, Clone)]
pub struct Expr {
    node: Rc<ExprNode>,
}

impl Expr {
    fn make(kind: ExprKind, ptype: PrimitiveType, ctype: CompositeType) -> Expr {
        Expr {
            node: Rc::new(ExprNode { kind, ptype, ctype }),
        }
    }

    /// The node payload.
    pub fn kind(&self) -> &ExprKind {
        &self.node.kind
    }

    /// The node's primitive type.
    pub fn ptype(&self) -> PrimitiveType {
        self.node.ptype
    }

    /// The node's composite type.
    pub fn ctype(&self) -> CompositeType {
        self.node.ctype
    }

    /// True when the primitive type is still undetermined.
    pub fn is_unk(&self) -> bool {
        self.node.ptype == PrimitiveType::Unk
    }

    /// True for boolean-typed expressions.
    pub fn is_boolean(&self) -> bool {
        self.node.ptype == PrimitiveType::Boolean
    }

    /// True when the composite type is a SIMD vector.
    pub fn is_simd(&self) -> bool {
        self.node.ctype.is_simd()
    }

    /// Identity comparison of handles.
    pub fn same_as(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Set the primitive type (copy-on-write).
    pub fn set_ptype(&mut self, ptype: PrimitiveType) {
        Rc::make_mut(&mut self.node).ptype = ptype;
    }

    /// Set the composite type (copy-on-write).
    pub fn set_ctype(&mut self, ctype: CompositeType) {
        Rc::make_mut(&mut self.node).ctype = ctype;
    }

    /// The fine-grained tag of this node.
    pub fn tag(&self) -> ExprTag {
        match &self.node.kind {
            ExprKind::IntImm { .. } => ExprTag::IntImm,
            ExprKind::FloatImm { .. } => ExprTag::FloatImm,
            ExprKind::Const(_) => ExprTag::Constant,
            ExprKind::Var(_) => ExprTag::Var,
            ExprKind::Tensor(_) => ExprTag::Tensor,
            ExprKind::Array { .. } => ExprTag::Array,
            ExprKind::Binary { op, .. } => match op {
                BinaryOp::Add => ExprTag::Add,
                BinaryOp::Sub => ExprTag::Sub,
                BinaryOp::Mul => ExprTag::Mul,
                BinaryOp::Div => ExprTag::Div,
                BinaryOp::Mod => ExprTag::Mod,
                BinaryOp::Min => ExprTag::Min,
                BinaryOp::Max => ExprTag::Max,
                BinaryOp::EQ => ExprTag::EQ,
                BinaryOp::NE => ExprTag::NE,
                BinaryOp::LT => ExprTag::LT,
                BinaryOp::LE => ExprTag::LE,
                BinaryOp::GT => ExprTag::GT,
                BinaryOp::GE => ExprTag::GE,
                BinaryOp::And => ExprTag::And,
                BinaryOp::Or => ExprTag::Or,
            },
            ExprKind::Minus { .. } => ExprTag::Minus,
            ExprKind::Exp { .. } => ExprTag::Exp,
            ExprKind::For { .. } => ExprTag::For,
            ExprKind::IfThenElse { .. } => ExprTag::IfThenElse,
            ExprKind::Block { .. } => ExprTag::Block,
            ExprKind::Mark { .. } => ExprTag::Mark,
            ExprKind::CallOnce { .. } => ExprTag::CallOnce,
            ExprKind::Call { .. } => ExprTag::Call,
            ExprKind::Reference { .. } => ExprTag::Reference,
            ExprKind::Assign { op, .. } => match op {
                AssignOp::Assign => ExprTag::Assign,
                AssignOp::Sum => ExprTag::SumAssign,
                AssignOp::Sub => ExprTag::SubAssign,
                AssignOp::Mul => ExprTag::MulAssign,
                AssignOp::Div => ExprTag::DivAssign,
            },
            ExprKind::Allocate { .. } => ExprTag::Allocate,
            ExprKind::BufferOpr { .. } => ExprTag::BufferOpr,
            ExprKind::Cast { .. } => ExprTag::Cast,
            ExprKind::Let { .. } => ExprTag::Let,
            ExprKind::Identity { .. } => ExprTag::Identity,
            ExprKind::SimdOpr { .. } => ExprTag::SIMDOpr,
            ExprKind::Func { .. } => ExprTag::Function,
            ExprKind::Module { .. } => ExprTag::Module,
        }
    }

    /// True for the assignment family (`=`, `+=`, `-=`, `*=`, `/=`).
    pub fn is_assign_derived(&self) -> bool {
        matches!(self.node.kind, ExprKind::Assign { .. })
    }

    /// Downcast to a tensor, aborting on tag mismatch.
    pub fn expect_tensor(&self) -> &Tensor {
        match &self.node.kind {
            ExprKind::Tensor(t) => t,
            _ => panic!("expected Tensor, found {:?}: {}", self.tag(), self),
        }
    }

    /// Downcast to a var, aborting on tag mismatch.
    pub fn expect_var(&self) -> &Var {
        match &self.node.kind {
            ExprKind::Var(v) => v,
            _ => panic!("expected Var, found {:?}: {}", self.tag(), self),
        }
    }

    /// The reference's `(target, iterators, domain)` view, if this is
    /// a reference.
    pub fn as_reference(&self) -> Option<(&Expr, &[Expr], Option<&Set>)> {
        match &self.node.kind {
            ExprKind::Reference {
                target,
                iterators,
                domain,
            } => Some((target, iterators, domain.as_ref())),
            _ => None,
        }
    }

    // ---- constructors -------------------------------------------------

    /// Build a binary node, enforcing the per-class invariants.
    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
        if op.is_logical() {
            assert!(
                a.is_boolean() && b.is_boolean(),
                "logical `{:?}` needs boolean operands, found {} and {}",
                op,
                a.ptype(),
                b.ptype()
            );
            return Expr::make(
                ExprKind::Binary { op, a, b },
                PrimitiveType::Boolean,
                CompositeType::Primitive,
            );
        }
        assert!(!a.is_unk(), "operand `{}` has unknown type", a);
        assert!(!b.is_unk(), "operand `{}` has unknown type", b);
        assert_eq!(
            a.ptype(),
            b.ptype(),
            "operand type mismatch in `{:?}`: {} vs {} ({} / {})",
            op,
            a.ptype(),
            b.ptype(),
            a,
            b
        );
        let ptype = if op.is_compare() {
            PrimitiveType::Boolean
        } else {
            a.ptype()
        };
        // an operation over SIMD data is itself SIMD
        let ctype = if a.is_simd() {
            if b.is_simd() {
                assert_eq!(a.ctype(), b.ctype());
            }
            a.ctype()
        } else if b.is_simd() {
            b.ctype()
        } else {
            CompositeType::Primitive
        };
        Expr::make(ExprKind::Binary { op, a, b }, ptype, ctype)
    }

    /// Unary negation.
    pub fn minus(a: Expr) -> Expr {
        assert!(!a.is_unk());
        let (ptype, ctype) = (a.ptype(), a.ctype());
        Expr::make(ExprKind::Minus { a }, ptype, ctype)
    }

    /// `exp(a)`.
    pub fn exp(a: Expr) -> Expr {
        assert!(!a.is_unk());
        let (ptype, ctype) = (a.ptype(), a.ctype());
        Expr::make(ExprKind::Exp { a }, ptype, ctype)
    }

    /// `min(a, b)`.
    pub fn min(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinaryOp::Min, a, b)
    }

    /// `max(a, b)`.
    pub fn max(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinaryOp::Max, a, b)
    }

    /// A loop node. The iterator is an `int32` variable; every header
    /// operand must carry a known type.
    pub fn for_loop(init: Expr, cond: Expr, inc: Expr, body: Expr, iterator: Var) -> Expr {
        assert!(!init.is_unk(), "for-init `{}` has unknown type", init);
        assert!(!cond.is_unk(), "for-cond `{}` has unknown type", cond);
        assert!(!inc.is_unk(), "for-inc `{}` has unknown type", inc);
        assert_eq!(iterator.ptype(), PrimitiveType::Int32);
        Expr::make(
            ExprKind::For {
                init,
                cond,
                inc,
                body,
                iterator,
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A two-armed conditional; pass `None` for a bare `if`.
    pub fn if_then_else(condition: Expr, true_case: Expr, false_case: Option<Expr>) -> Expr {
        Expr::make(
            ExprKind::IfThenElse {
                condition,
                true_case,
                false_case,
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A sequential block.
    pub fn block(exprs: Vec<Expr>) -> Expr {
        Expr::make(
            ExprKind::Block { exprs },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A comment-like marker.
    pub fn mark(content: &str) -> Expr {
        Expr::make(
            ExprKind::Mark {
                content: content.to_string(),
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A block guarded to execute once per process.
    pub fn call_once(block: Expr) -> Expr {
        let cond_var = with_context(|ctx| ctx.names.new_tmp_var());
        Expr::make(
            ExprKind::CallOnce { cond_var, block },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A call site. All arguments must carry known types.
    pub fn call(caller: &str, args: Vec<Expr>) -> Expr {
        for a in &args {
            assert!(!a.is_unk(), "call argument `{}` has unknown type", a);
        }
        Expr::make(
            ExprKind::Call {
                caller: caller.to_string(),
                args,
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A tensor placeholder. An empty name draws from the name
    /// generator.
    pub fn tensor(name: &str, ptype: PrimitiveType, dims: Vec<Constant>) -> Expr {
        for d in &dims {
            assert!(d.is_integer(), "tensor dimension `{}` is not integral", d);
        }
        let name = if name.is_empty() {
            with_context(|ctx| ctx.names.new_tensor_name())
        } else {
            name.to_string()
        };
        Expr::make(
            ExprKind::Tensor(Tensor { name, ptype, dims }),
            ptype,
            CompositeType::Primitive,
        )
    }

    /// A flat array of `size` elements.
    pub fn array(size: Expr, ptype: PrimitiveType, name: &str) -> Expr {
        assert!(
            matches!(size.kind(), ExprKind::IntImm { .. } | ExprKind::Const(_)),
            "array size `{}` must be constant",
            size
        );
        let name = if name.is_empty() {
            with_context(|ctx| ctx.names.new_array_name())
        } else {
            name.to_string()
        };
        Expr::make(
            ExprKind::Array { name, size },
            ptype,
            CompositeType::Primitive,
        )
    }

    /// An assignment-family node. The left side takes the right
    /// side's primitive type.
    pub fn make_assign(op: AssignOp, mut a: Expr, b: Expr) -> Expr {
        assert!(!b.is_unk(), "assignment rhs `{}` has unknown type", b);
        let ptype = b.ptype();
        a.set_ptype(ptype);
        Expr::make(
            ExprKind::Assign { op, a, b },
            ptype,
            CompositeType::Primitive,
        )
    }

    /// A raw allocation statement.
    pub fn allocate(buffer: &str, size: Expr, dtype: PrimitiveType) -> Expr {
        assert_eq!(size.ptype(), PrimitiveType::Int32);
        Expr::make(
            ExprKind::Allocate {
                buffer: buffer.to_string(),
                size,
                dtype,
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A buffer operation. An empty name draws from the name
    /// generator; `data` is only meaningful for
    /// [`BufferKind::CreateAssign`].
    pub fn buffer_opr(
        kind: BufferKind,
        name: &str,
        size: Expr,
        ptype: PrimitiveType,
        data: Vec<Constant>,
    ) -> Expr {
        let name = if name.is_empty() {
            with_context(|ctx| ctx.names.new_buffer_name())
        } else {
            name.to_string()
        };
        Expr::make(
            ExprKind::BufferOpr {
                kind,
                name,
                size,
                data,
            },
            ptype,
            CompositeType::Primitive,
        )
    }

    /// A type conversion. Must change at least one of the primitive
    /// and composite types, and the target primitive must be known.
    pub fn cast(expr: Expr, ptype: PrimitiveType, ctype: CompositeType) -> Expr {
        assert_ne!(ptype, PrimitiveType::Unk, "cast target must be known");
        assert!(
            !(expr.ptype() == ptype && expr.ctype() == ctype),
            "no-op cast of `{}`",
            expr
        );
        Expr::make(ExprKind::Cast { expr }, ptype, ctype)
    }

    /// A local binding `a = b`; `a` takes `b`'s types.
    pub fn let_(mut a: Expr, b: Expr) -> Expr {
        assert!(!b.is_unk(), "let rhs `{}` has unknown type", b);
        let (ptype, ctype) = (b.ptype(), b.ctype());
        a.set_ptype(ptype);
        a.set_ctype(ctype);
        Expr::make(ExprKind::Let { a, b }, ptype, ctype)
    }

    /// A transparent identity wrapper carrying an annotation id.
    pub fn identity(expr: Expr, id: &str) -> Expr {
        let (ptype, ctype) = (expr.ptype(), expr.ctype());
        Expr::make(
            ExprKind::Identity {
                expr,
                id: id.to_string(),
            },
            ptype,
            ctype,
        )
    }

    /// A SIMD arithmetic operation over `width` lanes (4 or 8).
    pub fn simd(width: usize, op: SimdOp, a: Expr, b: Expr) -> Expr {
        assert!(width == 4 || width == 8, "SIMD width must be 4 or 8");
        match op {
            SimdOp::Add | SimdOp::Sub | SimdOp::Mul | SimdOp::Div | SimdOp::Min | SimdOp::Max => {
                let ptype = a.ptype();
                Expr::make(
                    ExprKind::SimdOpr {
                        width,
                        op,
                        a,
                        b: Some(b),
                    },
                    ptype,
                    CompositeType::from_width(width),
                )
            }
            SimdOp::Store => Expr::simd_store(width, a, b),
            _ => panic!("simd: `{:?}` is not a two-operand opcode", op),
        }
    }

    /// A SIMD load from the address expression `a` (a plain scalar).
    pub fn simd_load(width: usize, a: Expr) -> Expr {
        assert!(width == 4 || width == 8, "SIMD width must be 4 or 8");
        assert!(
            !a.is_simd(),
            "SIMD load takes a scalar address, found `{}`",
            a
        );
        let ptype = a.ptype();
        Expr::make(
            ExprKind::SimdOpr {
                width,
                op: SimdOp::Load,
                a,
                b: None,
            },
            ptype,
            CompositeType::from_width(width),
        )
    }

    /// A SIMD store of vector `b` to the address expression `a`.
    pub fn simd_store(width: usize, a: Expr, b: Expr) -> Expr {
        assert!(width == 4 || width == 8, "SIMD width must be 4 or 8");
        assert!(b.is_simd(), "SIMD store source must be a vector, found `{}`", b);
        assert_eq!(b.ctype(), CompositeType::from_width(width));
        assert_eq!(a.ptype(), b.ptype());
        let ptype = b.ptype();
        Expr::make(
            ExprKind::SimdOpr {
                width,
                op: SimdOp::Store,
                a,
                b: Some(b),
            },
            ptype,
            CompositeType::from_width(width),
        )
    }

    /// A horizontal reduce-add of vector `a` back to a scalar.
    pub fn simd_reduce_add(width: usize, a: Expr) -> Expr {
        assert!(a.is_simd());
        let ptype = a.ptype();
        Expr::make(
            ExprKind::SimdOpr {
                width,
                op: SimdOp::ReduceAdd,
                a,
                b: None,
            },
            ptype,
            CompositeType::Primitive,
        )
    }

    /// A function definition node.
    pub fn func(name: &str, inputs: Vec<Expr>, outputs: Vec<Expr>, body: Expr) -> Expr {
        Expr::make(
            ExprKind::Func {
                name: name.to_string(),
                inputs,
                outputs,
                body,
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    /// A module holding a data section and a function section.
    pub fn module(data_section: Expr, function_section: Expr) -> Expr {
        Expr::make(
            ExprKind::Module {
                data_section,
                function_section,
            },
            PrimitiveType::Void,
            CompositeType::Primitive,
        )
    }

    // ---- subscripting and assignment builders -------------------------

    /// Subscript the expression. Appending to an existing reference
    /// extends its index list; indexing anything else wraps it in a
    /// fresh reference. When the index count reaches the target
    /// tensor's rank, the reference's iteration domain is synthesised.
    pub fn index(mut self, i: impl Into<Expr>) -> Expr {
        let i = i.into();
        assert!(!i.is_unk(), "iterator `{}` has unknown type", i);
        if let ExprKind::Reference { .. } = self.node.kind {
            let node = Rc::make_mut(&mut self.node);
            if let ExprKind::Reference { iterators, .. } = &mut node.kind {
                iterators.push(i);
            }
            self.infer_iterator_domain();
            return self;
        }
        let (ptype, ctype) = (self.ptype(), self.ctype());
        let mut reference = Expr::make(
            ExprKind::Reference {
                target: self,
                iterators: vec![i],
                domain: None,
            },
            ptype,
            ctype,
        );
        reference.infer_iterator_domain();
        reference
    }

    /// `lhs = rhs`. On a reference this builds an `Assign` node; on
    /// anything else the handle is rebound to the right-hand side.
    pub fn assign(self, other: Expr) -> Expr {
        self.assign_with(AssignOp::Assign, other)
    }

    /// `lhs += rhs`.
    pub fn sum_assign(self, other: Expr) -> Expr {
        self.assign_with(AssignOp::Sum, other)
    }

    /// `lhs -= rhs`.
    pub fn sub_assign(self, other: Expr) -> Expr {
        self.assign_with(AssignOp::Sub, other)
    }

    /// `lhs *= rhs`.
    pub fn mul_assign(self, other: Expr) -> Expr {
        self.assign_with(AssignOp::Mul, other)
    }

    /// `lhs /= rhs`.
    pub fn div_assign(self, other: Expr) -> Expr {
        self.assign_with(AssignOp::Div, other)
    }

    fn assign_with(self, op: AssignOp, other: Expr) -> Expr {
        if matches!(self.node.kind, ExprKind::Reference { .. }) {
            Expr::make_assign(op, self, other)
        } else {
            other
        }
    }

    // ---- comparison and logical builders ------------------------------

    /// `a == b`.
    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::EQ, self, other.into())
    }

    /// `a != b`.
    pub fn ne(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::NE, self, other.into())
    }

    /// `a < b`.
    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::LT, self, other.into())
    }

    /// `a <= b`.
    pub fn le(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::LE, self, other.into())
    }

    /// `a > b`.
    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::GT, self, other.into())
    }

    /// `a >= b`.
    pub fn ge(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::GE, self, other.into())
    }

    /// `a && b`.
    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    /// `a || b`.
    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    // ---- walkers ------------------------------------------------------

    /// Post-order read-only walk.
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        self.each_child(&mut |c| c.visit(f));
        f(self);
    }

    fn each_child(&self, f: &mut dyn FnMut(&Expr)) {
        match &self.node.kind {
            ExprKind::Binary { a, b, .. } | ExprKind::Assign { a, b, .. } | ExprKind::Let { a, b } => {
                f(a);
                f(b);
            }
            ExprKind::Minus { a } | ExprKind::Exp { a } => f(a),
            ExprKind::For {
                init,
                cond,
                inc,
                body,
                ..
            } => {
                f(init);
                f(cond);
                f(inc);
                f(body);
            }
            ExprKind::IfThenElse {
                condition,
                true_case,
                false_case,
            } => {
                f(condition);
                f(true_case);
                if let Some(e) = false_case {
                    f(e);
                }
            }
            ExprKind::Block { exprs } => {
                for e in exprs {
                    f(e);
                }
            }
            ExprKind::Call { args, .. } => {
                for e in args {
                    f(e);
                }
            }
            ExprKind::Reference {
                target, iterators, ..
            } => {
                f(target);
                for e in iterators {
                    f(e);
                }
            }
            ExprKind::Allocate { size, .. }
            | ExprKind::Array { size, .. }
            | ExprKind::BufferOpr { size, .. } => f(size),
            ExprKind::Cast { expr } | ExprKind::Identity { expr, .. } => f(expr),
            ExprKind::CallOnce { block, .. } => f(block),
            ExprKind::SimdOpr { a, b, .. } => {
                f(a);
                if let Some(e) = b {
                    f(e);
                }
            }
            ExprKind::Func {
                inputs,
                outputs,
                body,
                ..
            } => {
                for e in inputs {
                    f(e);
                }
                for e in outputs {
                    f(e);
                }
                f(body);
            }
            ExprKind::Module {
                data_section,
                function_section,
            } => {
                f(data_section);
                f(function_section);
            }
            ExprKind::IntImm { .. }
            | ExprKind::FloatImm { .. }
            | ExprKind::Const(_)
            | ExprKind::Var(_)
            | ExprKind::Tensor(_)
            | ExprKind::Mark { .. } => {}
        }
    }

    /// Rewrite walk: children are rebuilt first, then the node itself
    /// is handed to `f`, whose return value replaces it. Types are
    /// carried over unchanged; hooks that change a node's type set it
    /// on the returned handle.
    pub fn transform(&self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let kind = match &self.node.kind {
            ExprKind::Binary { op, a, b } => ExprKind::Binary {
                op: *op,
                a: a.transform(f),
                b: b.transform(f),
            },
            ExprKind::Assign { op, a, b } => ExprKind::Assign {
                op: *op,
                a: a.transform(f),
                b: b.transform(f),
            },
            ExprKind::Let { a, b } => ExprKind::Let {
                a: a.transform(f),
                b: b.transform(f),
            },
            ExprKind::Minus { a } => ExprKind::Minus { a: a.transform(f) },
            ExprKind::Exp { a } => ExprKind::Exp { a: a.transform(f) },
            ExprKind::For {
                init,
                cond,
                inc,
                body,
                iterator,
            } => ExprKind::For {
                init: init.transform(f),
                cond: cond.transform(f),
                inc: inc.transform(f),
                body: body.transform(f),
                iterator: iterator.clone(),
            },
            ExprKind::IfThenElse {
                condition,
                true_case,
                false_case,
            } => ExprKind::IfThenElse {
                condition: condition.transform(f),
                true_case: true_case.transform(f),
                false_case: false_case.as_ref().map(|e| e.transform(f)),
            },
            ExprKind::Block { exprs } => ExprKind::Block {
                exprs: exprs.iter().map(|e| e.transform(f)).collect(),
            },
            ExprKind::Call { caller, args } => ExprKind::Call {
                caller: caller.clone(),
                args: args.iter().map(|e| e.transform(f)).collect(),
            },
            ExprKind::Reference {
                target,
                iterators,
                domain,
            } => ExprKind::Reference {
                target: target.transform(f),
                iterators: iterators.iter().map(|e| e.transform(f)).collect(),
                domain: domain.clone(),
            },
            ExprKind::Allocate {
                buffer,
                size,
                dtype,
            } => ExprKind::Allocate {
                buffer: buffer.clone(),
                size: size.transform(f),
                dtype: *dtype,
            },
            ExprKind::Array { name, size } => ExprKind::Array {
                name: name.clone(),
                size: size.transform(f),
            },
            ExprKind::BufferOpr {
                kind,
                name,
                size,
                data,
            } => ExprKind::BufferOpr {
                kind: *kind,
                name: name.clone(),
                size: size.transform(f),
                data: data.clone(),
            },
            ExprKind::Cast { expr } => ExprKind::Cast {
                expr: expr.transform(f),
            },
            ExprKind::Identity { expr, id } => ExprKind::Identity {
                expr: expr.transform(f),
                id: id.clone(),
            },
            ExprKind::CallOnce { cond_var, block } => ExprKind::CallOnce {
                cond_var: cond_var.clone(),
                block: block.transform(f),
            },
            ExprKind::SimdOpr { width, op, a, b } => ExprKind::SimdOpr {
                width: *width,
                op: *op,
                a: a.transform(f),
                b: b.as_ref().map(|e| e.transform(f)),
            },
            ExprKind::Func {
                name,
                inputs,
                outputs,
                body,
            } => ExprKind::Func {
                name: name.clone(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                body: body.transform(f),
            },
            ExprKind::Module {
                data_section,
                function_section,
            } => ExprKind::Module {
                data_section: data_section.transform(f),
                function_section: function_section.transform(f),
            },
            leaf @ (ExprKind::IntImm { .. }
            | ExprKind::FloatImm { .. }
            | ExprKind::Const(_)
            | ExprKind::Var(_)
            | ExprKind::Tensor(_)
            | ExprKind::Mark { .. }) => leaf.clone(),
        };
        f(Expr::make(kind, self.node.ptype, self.node.ctype))
    }

    /// Deep copy: an independent tree sharing no nodes with `self`.
    pub fn deep_copy(&self) -> Expr {
        self.transform(&mut |e| e)
    }

    /// Collect all descendants (and possibly the node itself) with
    /// the given tag, in post-order.
    pub fn collect(&self, tag: ExprTag) -> Vec<Expr> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if e.tag() == tag {
                out.push(e.clone());
            }
        });
        out
    }

    // ---- reference domain inference -----------------------------------

    /// Synthesise the iteration domain of a full-rank reference from
    /// its iterator expressions and the target tensor's dimensions.
    pub fn infer_iterator_domain(&mut self) {
        let Some((target, iterators, _)) = self.as_reference() else {
            return;
        };
        let ExprKind::Tensor(tensor) = target.kind() else {
            return;
        };
        assert!(
            iterators.len() <= tensor.dims().len(),
            "reference to `{}` has {} iterators but rank is {}",
            tensor.name(),
            iterators.len(),
            tensor.dims().len()
        );
        if iterators.len() != tensor.dims().len() {
            return;
        }
        // partial handles never reach here; synthesise the domain
        let has_vars = iterators
            .iter()
            .any(|e| !e.collect(ExprTag::Var).is_empty());
        if !has_vars {
            return;
        }
        let domain = build_domain_from_exprs(iterators, tensor.dims());
        debug!(reference = %self, domain = %domain, "reference domain synthesised");
        let node = Rc::make_mut(&mut self.node);
        if let ExprKind::Reference { domain: slot, .. } = &mut node.kind {
            *slot = Some(domain);
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::ir::printer::dump(self))
    }
}

// ---- literal conversions ----------------------------------------------

impl From<i32> for Expr {
    fn from(v: i32) -> Expr {
        Expr::make(
            ExprKind::IntImm { value: v as i64 },
            PrimitiveType::Int32,
            CompositeType::Primitive,
        )
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Expr {
        Expr::make(
            ExprKind::IntImm { value: v },
            PrimitiveType::Int64,
            CompositeType::Primitive,
        )
    }
}

impl From<f32> for Expr {
    fn from(v: f32) -> Expr {
        Expr::make(
            ExprKind::FloatImm { value: v as f64 },
            PrimitiveType::Float32,
            CompositeType::Primitive,
        )
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Expr {
        Expr::make(
            ExprKind::FloatImm { value: v },
            PrimitiveType::Float64,
            CompositeType::Primitive,
        )
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Expr {
        let ptype = v.ptype();
        Expr::make(ExprKind::Var(v), ptype, CompositeType::Primitive)
    }
}

impl From<Constant> for Expr {
    fn from(c: Constant) -> Expr {
        let ptype = c.ptype();
        Expr::make(ExprKind::Const(c), ptype, CompositeType::Primitive)
    }
}

// ---- operator overloads ------------------------------------------------

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> std::ops::$trait<T> for Expr {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs.into())
            }
        }
    };
}

impl_binop!(Add, add, BinaryOp::Add);
impl_binop!(Sub, sub, BinaryOp::Sub);
impl_binop!(Mul, mul, BinaryOp::Mul);
impl_binop!(Div, div, BinaryOp::Div);
impl_binop!(Rem, rem, BinaryOp::Mod);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::minus(self)
    }
}

// ---- domain synthesis helpers ------------------------------------------

/// Collect the distinct names of all `Var`s in an expression, sorted.
pub fn collect_var_names(expr: &Expr) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    expr.visit(&mut |e| {
        if let ExprKind::Var(v) = e.kind() {
            if !names.iter().any(|n| n == v.name()) {
                names.push(v.name().to_string());
            }
        }
    });
    names.sort();
    names
}

/// Build the base set `{ [ii0, ...] : 0 <= iik < dk }`; symbolic
/// dimensions become parameters.
pub fn build_domain_from_dimensions(dims: &[Constant], aliases: &[String]) -> Set {
    assert!(!dims.is_empty());
    let mut constraints: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    for (i, d) in dims.iter().enumerate() {
        assert!(d.is_integer());
        if d.value_set() {
            constraints.push(format!("0 <= {} < {}", aliases[i], d.int_val()));
        } else {
            constraints.push(format!("0 <= {} < {}", aliases[i], d.name()));
            if !params.iter().any(|p| p == d.name()) {
                params.push(d.name().to_string());
            }
        }
    }
    let repr = format!(
        "[{}] -> {{ [{}] : {} }}",
        params.join(", "),
        aliases.join(", "),
        constraints.join(" and ")
    );
    debug!(repr = %repr, "alias domain");
    Set::parse(&repr).expect("alias domain must parse")
}

/// Reference-domain synthesis: alias iterators `ii0..`, a base box
/// from the tensor dimensions, and a transform mapping aliases to the
/// free variables of the iterator expressions.
pub fn build_domain_from_exprs(iterators: &[Expr], dims: &[Constant]) -> Set {
    assert_eq!(iterators.len(), dims.len());
    let aliases: Vec<String> = (0..dims.len()).map(context::indexed_iterator_name).collect();

    let mut var_names: Vec<String> = Vec::new();
    for it in iterators {
        for name in collect_var_names(it) {
            if !var_names.contains(&name) {
                var_names.push(name);
            }
        }
    }
    var_names.sort();

    let alias_domain = build_domain_from_dimensions(dims, &aliases);

    let alias_eqs: Vec<String> = iterators
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{} = {}", aliases[i], crate::ir::printer::dump(e)))
        .collect();
    let repr = format!(
        "{{ [{}] -> [{}] : {} }}",
        aliases.join(", "),
        var_names.join(", "),
        alias_eqs.join(" and ")
    );
    debug!(repr = %repr, "reference domain transform");
    let transform = crate::polyhedral::map::Map::parse(&repr).expect("transform must parse");
    alias_domain.apply(&transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;

    fn f32_tensor(name: &str, dims: &[i32]) -> Expr {
        Expr::tensor(
            name,
            PrimitiveType::Float32,
            dims.iter().map(|&d| Constant::from(d)).collect(),
        )
    }

    #[test]
    fn test_arith_type_propagation() {
        context::reset();
        let e = Expr::from(1.0f32) + Expr::from(2.0f32);
        assert_eq!(e.tag(), ExprTag::Add);
        assert_eq!(e.ptype(), PrimitiveType::Float32);
    }

    #[test]
    #[should_panic(expected = "type mismatch")]
    fn test_mixed_types_abort() {
        context::reset();
        let _ = Expr::from(1.0f32) + Expr::from(1i32);
    }

    #[test]
    fn test_compare_is_boolean() {
        context::reset();
        let e = Expr::from(0.1f32).gt(Expr::from(3.0f32));
        assert_eq!(e.tag(), ExprTag::GT);
        assert_eq!(e.ptype(), PrimitiveType::Boolean);
    }

    #[test]
    #[should_panic(expected = "boolean operands")]
    fn test_logical_requires_boolean() {
        context::reset();
        let _ = Expr::from(1i32).and(Expr::from(2i32));
    }

    #[test]
    fn test_reference_domain_at_full_rank() {
        context::reset();
        let t = f32_tensor("out", &[20, 40]);
        let i = Var::named("i");
        let j = Var::named("j");
        let r = t.index(i).index(j);
        let (_, iters, domain) = r.as_reference().unwrap();
        assert_eq!(iters.len(), 2);
        let domain = domain.expect("full-rank reference must carry a domain");
        assert_eq!(domain.n_dim(), 2);
        assert!(domain.contains(&[19, 39], &[]));
        assert!(!domain.contains(&[20, 0], &[]));
    }

    #[test]
    fn test_partial_reference_has_no_domain() {
        context::reset();
        let t = f32_tensor("x", &[4, 4]);
        let i = Var::named("i");
        let r = t.index(i);
        let (_, iters, domain) = r.as_reference().unwrap();
        assert_eq!(iters.len(), 1);
        assert!(domain.is_none());
    }

    #[test]
    fn test_assignment_rebinding() {
        context::reset();
        let a = Expr::from(1i32);
        let b = Expr::from(2i32);
        // non-reference lhs: rebinding semantics
        let rebound = a.assign(b.clone());
        assert!(rebound.same_as(&b));
    }

    #[test]
    fn test_sum_assign_on_reference() {
        context::reset();
        let t = f32_tensor("out", &[2, 2]);
        let i = Var::named("i");
        let j = Var::named("j");
        let e = t.index(i).index(j).sum_assign(Expr::from(1.0f32));
        assert_eq!(e.tag(), ExprTag::SumAssign);
        assert_eq!(e.ptype(), PrimitiveType::Float32);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        context::reset();
        let e = Expr::from(1i32) + Expr::from(2i32);
        let copy = e.deep_copy();
        assert!(!copy.same_as(&e));
        assert_eq!(copy.tag(), ExprTag::Add);
    }

    #[test]
    fn test_collect_vars() {
        context::reset();
        let i = Var::named("i");
        let k = Var::named("k");
        let e = Expr::from(i) + (Expr::from(k) * 2i32);
        assert_eq!(collect_var_names(&e), vec!["i".to_string(), "k".to_string()]);
    }

    #[test]
    fn test_transform_replaces_vars() {
        context::reset();
        let i = Var::named("i");
        let e = Expr::from(i) + 1i32;
        let replaced = e.transform(&mut |node| match node.kind() {
            ExprKind::Var(v) if v.name() == "i" => Expr::from(7i32),
            _ => node,
        });
        assert_eq!(crate::ir::printer::dump(&replaced), "(7 + 1)");
    }

    #[test]
    #[should_panic(expected = "no-op cast")]
    fn test_noop_cast_aborts() {
        context::reset();
        let e = Expr::from(1.0f32);
        let _ = Expr::cast(e, PrimitiveType::Float32, CompositeType::Primitive);
    }

    #[test]
    fn test_simd_width_and_ctype() {
        context::reset();
        let a = Expr::from(1.0f32);
        let b = Expr::from(2.0f32);
        let va = Expr::simd_load(4, a);
        assert_eq!(va.ctype(), CompositeType::Simd128);
        let vb = Expr::simd_load(4, b);
        let sum = Expr::simd(4, SimdOp::Add, va, vb);
        assert_eq!(sum.ctype(), CompositeType::Simd128);
        assert_eq!(sum.ptype(), PrimitiveType::Float32);
    }
}
