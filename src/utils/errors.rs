//! Error types for the compiler core.
//!
//! Errors are segmented by the phase that produces them and rolled up
//! into [`CinnError`]. Construction-time invariant violations (type
//! mismatches, missing operands, bad downcasts) are programmer bugs
//! and abort via `panic!` with a diagnostic instead of surfacing here;
//! everything that depends on user input or on the feasibility of a
//! schedule is reported through these types.

use thiserror::Error;

/// Top-level error type for the compiler.
#[derive(Error, Debug)]
pub enum CinnError {
    /// Error while parsing an integer-set expression.
    #[error("polyhedral error: {0}")]
    Poly(#[from] PolyError),

    /// Error while transforming or scheduling.
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// Error during code generation.
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),

    /// I/O error while writing generated sources.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error from the integer-set kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolyError {
    /// The textual representation could not be parsed.
    #[error("failed to parse `{input}`: {message}")]
    Parse {
        /// The offending input string.
        input: String,
        /// What went wrong.
        message: String,
    },

    /// Two objects live in incompatible spaces.
    #[error("space mismatch: {0}")]
    SpaceMismatch(String),

    /// A named dimension or tuple was not found.
    #[error("no dimension named `{0}`")]
    UnknownDim(String),
}

/// Error during schedule computation or schedule-tree rewriting.
#[derive(Error, Debug, Clone)]
pub enum TransformError {
    /// No schedule satisfies the validity constraints.
    #[error("no valid schedule for domain {domain} under validity {validity}")]
    ScheduleInfeasible {
        /// Textual form of the iteration domain.
        domain: String,
        /// Textual form of the violated dependency relation.
        validity: String,
    },

    /// A tile or split request referenced an iterator that is not in
    /// the schedule's output space.
    #[error("iterator `{iter}` not found in schedule of stage `{stage}`")]
    UnknownIterator {
        /// Requested iterator name.
        iter: String,
        /// Stage whose schedule was searched.
        stage: String,
    },

    /// A fusion target does not exist in the snippet.
    #[error("fusion target `{0}` is not a stage of this snippet")]
    UnknownFusionTarget(String),
}

/// Error during C emission.
#[derive(Error, Debug, Clone)]
pub enum CodegenError {
    /// The expression kind has no rendering in the target.
    #[error("cannot emit node `{0}` as C")]
    Unsupported(String),

    /// A function argument was not a tensor or buffer.
    #[error("function argument `{0}` has no C type")]
    BadArgument(String),
}

/// Result alias using [`CinnError`].
pub type CinnResult<T> = Result<T, CinnError>;
