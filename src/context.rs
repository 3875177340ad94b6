//! Per-thread compilation context.
//!
//! The context carries the monotonic name generator shared by
//! iterators, variables, stages, tensors, buffers and temporaries, the
//! stage registry, and the variable-name uniqueness set. One context
//! exists per thread; concurrent compilations each get their own.
//! [`reset`] gives a fresh compilation and restores every counter to
//! its initial sequence.

use crate::core::stage::Stage;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashSet;

/// Monotonic counters behind every generated name.
#[derive(Debug, Default)]
pub struct NameGenerator {
    stage: usize,
    iterator: usize,
    var: usize,
    tensor: usize,
    buffer: usize,
    array: usize,
    tmp: usize,
}

impl NameGenerator {
    /// `S0`, `S1`, ... — statement/stage names.
    pub fn new_stage_name(&mut self) -> String {
        let n = self.stage;
        self.stage += 1;
        format!("S{}", n)
    }

    /// `i0`, `i1`, ... — iterator names.
    pub fn new_iterator_name(&mut self) -> String {
        let n = self.iterator;
        self.iterator += 1;
        format!("i{}", n)
    }

    /// `var0`, `var1`, ... — variable and tensor default names.
    pub fn new_var_name(&mut self) -> String {
        let n = self.var;
        self.var += 1;
        format!("var{}", n)
    }

    /// `tensor0`, ... — explicit tensor default names.
    pub fn new_tensor_name(&mut self) -> String {
        let n = self.tensor;
        self.tensor += 1;
        format!("tensor{}", n)
    }

    /// `buf0`, ... — buffer names.
    pub fn new_buffer_name(&mut self) -> String {
        let n = self.buffer;
        self.buffer += 1;
        format!("buf{}", n)
    }

    /// `array0`, ... — array names.
    pub fn new_array_name(&mut self) -> String {
        let n = self.array;
        self.array += 1;
        format!("array{}", n)
    }

    /// `tmp0`, ... — temporary variable names.
    pub fn new_tmp_var(&mut self) -> String {
        let n = self.tmp;
        self.tmp += 1;
        format!("tmp{}", n)
    }
}

/// `ii0`, `ii1`, ... — alias names for indexed iterators during
/// reference-domain synthesis. Stateless by design: aliases are local
/// to one reference.
pub fn indexed_iterator_name(id: usize) -> String {
    format!("ii{}", id)
}

/// The per-thread compilation context.
#[derive(Debug, Default)]
pub struct Context {
    /// Name counters.
    pub names: NameGenerator,
    stages: IndexMap<String, Stage>,
    var_names: HashSet<String>,
}

impl Context {
    /// Register a stage under its name. Duplicate names are a hard
    /// error: stages are globally addressable during AST lowering.
    pub fn register_stage(&mut self, stage: Stage) {
        let name = stage.name();
        if self.stages.contains_key(&name) {
            panic!(
                "duplicate stage name `{}`; first registered as stage #{}",
                name,
                self.stages.get_index_of(&name).unwrap()
            );
        }
        self.stages.insert(name, stage);
    }

    /// Look up a stage by name.
    pub fn get_stage(&self, name: &str) -> Option<Stage> {
        self.stages.get(name).cloned()
    }

    /// Names of all registered stages, in registration order.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.keys().cloned().collect()
    }

    /// Claim a variable name. Returns false when it was already taken.
    pub fn claim_var_name(&mut self, name: &str) -> bool {
        self.var_names.insert(name.to_string())
    }
}

thread_local! {
    static CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// Run a closure against this thread's context.
pub fn with_context<R>(f: impl FnOnce(&mut Context) -> R) -> R {
    CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// Drop all registered stages and names and restart every counter.
pub fn reset() {
    CONTEXT.with(|ctx| *ctx.borrow_mut() = Context::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_restart_after_reset() {
        reset();
        let first = with_context(|ctx| ctx.names.new_stage_name());
        let second = with_context(|ctx| ctx.names.new_stage_name());
        assert_eq!(first, "S0");
        assert_eq!(second, "S1");
        reset();
        let again = with_context(|ctx| ctx.names.new_stage_name());
        assert_eq!(again, "S0");
    }

    #[test]
    fn test_generated_stage_names_unique() {
        reset();
        let names: Vec<String> =
            (0..50).map(|_| with_context(|ctx| ctx.names.new_stage_name())).collect();
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
    }

    #[test]
    fn test_var_name_claims() {
        reset();
        assert!(with_context(|ctx| ctx.claim_var_name("i")));
        assert!(!with_context(|ctx| ctx.claim_var_name("i")));
    }

    #[test]
    fn test_indexed_iterator_names() {
        assert_eq!(indexed_iterator_name(0), "ii0");
        assert_eq!(indexed_iterator_name(3), "ii3");
    }
}
