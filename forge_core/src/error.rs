use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("entity `{0}` not found")]
    NotFound(String),
    #[error("failed in IO: {0}")]
    IO(#[from] std::io::Error),
    #[error("argument provided is error: {0}")]
    Argument(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("config file is not valid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config version: {0}")]
    Version(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("environment error: {0}")]
    Environment(String),
    #[error("failed to compile `{module}`")]
    Compile { module: String, log: String },
    #[error("generator process failed on {}", format_indices(.failed))]
    Generation { failed: Vec<usize> },
    #[error("validator process failed on {}", format_indices(.failed))]
    Validation { failed: Vec<usize> },
    #[error("main solution failed on #{}: {reason}", .index + 1)]
    MainSolution { index: usize, reason: String },
    #[error("solution `{solution}` does not work as intended ({intended}), observed {observed}")]
    WrongSolutionCategory {
        solution: String,
        intended: String,
        observed: String,
        diagnostic: String,
    },
    #[error("malicious genscripts found: {}", .0.join(", "))]
    MaliciousGenscripts(Vec<String>),
}

fn format_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| format!("#{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ")
}
