pub mod compare;
pub mod compile;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod iodata;
pub mod limit;
pub mod module;
pub mod outcome;
pub mod phase;
pub mod pipeline;
pub mod probe;
pub mod problem;
pub mod scanner;
pub mod syntax;
pub mod value;
pub mod verdict;
pub mod workspace;

pub use error::{Error, Result};
pub use outcome::{ExecutionOutcome, ExitCode};
pub use pipeline::{Mode, TaskForge};
pub use verdict::Verdict;
