//! Stage/Snippet/Function pipeline.

pub mod function;
pub mod snippet;
pub mod stage;

pub use function::Function;
pub use snippet::Snippet;
pub use stage::{collect_access, Stage, StageType};
