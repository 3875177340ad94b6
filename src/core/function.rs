//! Functions: ordered stages partitioned into snippets and lowered to
//! a single IR expression.

use crate::core::snippet::Snippet;
use crate::core::stage::Stage;
use crate::ir::expr::Expr;
use crate::utils::errors::CinnResult;
use std::cell::RefCell;
use tracing::debug;

/// A compiled function: declared inputs/outputs plus the stages that
/// define its body.
#[derive(Default)]
pub struct Function {
    name: String,
    inputs: Vec<Expr>,
    outputs: Vec<Expr>,
    stages: Vec<Stage>,
    snippets: Vec<Snippet>,
    transformed_expr: RefCell<Option<Expr>>,
}

impl Function {
    /// An empty function shell; add stages and call
    /// [`Function::end_definition`].
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Build a function in one go from its stages.
    pub fn make(
        name: &str,
        inputs: Vec<Expr>,
        outputs: Vec<Expr>,
        stages: Vec<Stage>,
    ) -> CinnResult<Function> {
        let mut f = Function::new(name);
        f.set_inputs(inputs);
        f.set_outputs(outputs);
        for stage in stages {
            f.add_stage(stage);
        }
        f.end_definition()?;
        Ok(f)
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare the input expressions.
    pub fn set_inputs(&mut self, inputs: Vec<Expr>) {
        self.inputs = inputs;
    }

    /// Declare the output expressions.
    pub fn set_outputs(&mut self, outputs: Vec<Expr>) {
        self.outputs = outputs;
    }

    /// Append a stage; ordering equals execution order.
    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Close the definition: group consecutive same-typed stages into
    /// snippets and schedule each polyhedral snippet. Calling this a
    /// second time is a no-op once the transformed expression is
    /// cached.
    pub fn end_definition(&mut self) -> CinnResult<()> {
        if self.transformed_expr.borrow().is_some() {
            return Ok(());
        }
        self.build_snippets()?;
        Ok(())
    }

    fn build_snippets(&mut self) -> CinnResult<()> {
        debug!(function = %self.name, stages = self.stages.len(), "building snippets");
        let mut snippets: Vec<Snippet> = Vec::new();
        for stage in &self.stages {
            let start_new = match snippets.last() {
                None => true,
                Some(last) => last.is_unk() || last.kind() != Some(stage.stage_type()),
            };
            if start_new {
                if let Some(last) = snippets.last_mut() {
                    last.end()?;
                }
                snippets.push(Snippet::new());
            }
            snippets
                .last_mut()
                .unwrap()
                .add_stage(stage.clone());
        }
        if let Some(last) = snippets.last_mut() {
            last.end()?;
        }
        debug!(function = %self.name, snippets = snippets.len(), "snippets built");
        self.snippets = snippets;
        Ok(())
    }

    /// The snippets derived from the stages.
    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    /// Materialise the final IR: the sole snippet's expression, or a
    /// block over all snippets. The result is cached, so repeated
    /// calls (and repeated `end_definition`) are stable.
    pub fn compute_transformed_expr(&self) -> Expr {
        if let Some(e) = self.transformed_expr.borrow().as_ref() {
            return e.clone();
        }
        assert!(
            !self.snippets.is_empty(),
            "function `{}` has no snippets; call end_definition first",
            self.name
        );
        let expr = if self.snippets.len() == 1 {
            self.snippets.last().unwrap().get_transformed_expr()
        } else {
            let exprs: Vec<Expr> = self
                .snippets
                .iter()
                .map(|s| s.get_transformed_expr())
                .collect();
            Expr::block(exprs)
        };
        *self.transformed_expr.borrow_mut() = Some(expr.clone());
        expr
    }

    /// The IR `Function` node: signature plus transformed body.
    pub fn ir_function(&self) -> Expr {
        Expr::func(
            &self.name,
            self.inputs.clone(),
            self.outputs.clone(),
            self.compute_transformed_expr(),
        )
    }

    /// A call expression invoking this function with the given
    /// arguments (inputs followed by outputs).
    pub fn call(&self, inputs: Vec<Expr>, outputs: Vec<Expr>) -> Expr {
        let mut args = inputs;
        args.extend(outputs);
        Expr::call(&self.name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::ir::expr::Var;
    use crate::ir::types::{Constant, PrimitiveType};

    fn f32_tensor(name: &str, dims: &[i32]) -> Expr {
        Expr::tensor(
            name,
            PrimitiveType::Float32,
            dims.iter().map(|&d| Constant::from(d)).collect(),
        )
    }

    #[test]
    fn test_function_basic() {
        context::reset();
        let a = f32_tensor("A", &[4, 4]);
        let b = f32_tensor("B", &[4, 4]);
        let c = f32_tensor("C", &[4, 4]);
        let i = Var::named("i");
        let j = Var::named("j");

        let s0 = Stage::new(
            c.clone().index(i.clone()).index(j.clone()).assign(
                a.clone().index(i.clone()).index(j.clone())
                    * b.clone().index(i.clone()).index(j.clone()),
            ),
        );
        let s1 = Stage::new(
            c.clone().index(i.clone()).index(j.clone()).assign(
                c.clone().index(i.clone()).index(j.clone()) + Expr::from(1.0f32),
            ),
        );

        let func = Function::make("func0", vec![a, b], vec![c], vec![s0, s1]).unwrap();
        assert_eq!(func.snippets().len(), 1);
        let expr = func.compute_transformed_expr();
        let text = crate::ir::printer::dump(&expr);
        assert!(text.contains("C[c0, c1]"));
    }

    #[test]
    fn test_end_definition_idempotent() {
        context::reset();
        let a = f32_tensor("A", &[4]);
        let i = Var::named("i");
        let s0 = Stage::new(a.clone().index(i.clone()).assign(Expr::from(0.0f32)));

        let mut func = Function::new("f");
        func.set_inputs(vec![]);
        func.set_outputs(vec![a]);
        func.add_stage(s0);
        func.end_definition().unwrap();
        let first = func.compute_transformed_expr();
        func.end_definition().unwrap();
        let second = func.compute_transformed_expr();
        assert_eq!(
            crate::ir::printer::dump(&first),
            crate::ir::printer::dump(&second)
        );
        assert!(first.same_as(&second));
    }

    #[test]
    fn test_snippets_split_at_type_transitions() {
        context::reset();
        let a = f32_tensor("A", &[4]);
        let i = Var::named("i");
        let s0 = Stage::new(a.clone().index(i.clone()).assign(Expr::from(0.0f32)));
        let s1 = Stage::new(Expr::call("external", vec![a.clone()]));

        let mut func = Function::new("mixed");
        func.set_outputs(vec![a]);
        func.add_stage(s0);
        func.add_stage(s1);
        func.end_definition().unwrap();

        assert_eq!(func.snippets().len(), 2);
        let text = crate::ir::printer::dump(&func.compute_transformed_expr());
        assert!(text.contains("A[c0] = 0"));
        assert!(text.contains("external(A)"));
    }

    #[test]
    fn test_call_builds_call_node() {
        context::reset();
        let a = f32_tensor("A", &[4]);
        let b = f32_tensor("B", &[4]);
        let i = Var::named("i");
        let s0 = Stage::new(
            b.clone()
                .index(i.clone())
                .assign(a.clone().index(i.clone()) + Expr::from(1.0f32)),
        );
        let func = Function::make("g", vec![a.clone()], vec![b.clone()], vec![s0]).unwrap();
        let call = func.call(vec![a], vec![b]);
        assert_eq!(crate::ir::printer::dump(&call), "g(A, B)");
    }
}
