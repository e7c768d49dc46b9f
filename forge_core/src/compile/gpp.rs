use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};

use super::{
    locate, require, CompiledProgram, Compiler, CompilerDescriptor, CompilerEnvironmentStatus,
};
use crate::{
    error::{Error, Result},
    limit::Limits,
    outcome::ExitCode,
    workspace::Workspace,
};

/// Compiling is not judged; these only stop a runaway build.
const COMPILE_TIME_LIMIT: f64 = 30.0;
const COMPILE_MEMORY_LIMIT: f64 = 4096.0;

const STANDARD_FLAG: &str = "-std=c++17";

pub struct CompilerGPP {
    compiler_path: PathBuf,
}

impl CompilerDescriptor for CompilerGPP {
    fn support_suffix() -> Vec<&'static str> {
        vec!["cpp", "cc", "cxx"]
    }

    fn check_environment() -> CompilerEnvironmentStatus {
        locate("g++")
    }
}

impl CompilerGPP {
    pub fn new() -> Result<Self> {
        Ok(Self {
            compiler_path: require("g++", Self::check_environment())?,
        })
    }
}

impl Compiler for CompilerGPP {
    fn compile(&self, source: &Path, workspace: &Workspace) -> Result<CompiledProgram> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".into());
        let build_dir = workspace.new_dir(&stem)?;
        let exec_path = build_dir.join(&stem);
        let log_path = build_dir.join("compile.log");

        info!("compiling {}", source.display());
        let limits = Limits::new(COMPILE_TIME_LIMIT, COMPILE_MEMORY_LIMIT)?;
        let report = CompiledProgram::new(&self.compiler_path)
            .invocation(&build_dir, limits)
            .arg(source)
            .arg("-o")
            .arg(&exec_path)
            .arg("-O2")
            .arg(STANDARD_FLAG)
            .stderr(&log_path)
            .ceiling(Duration::from_secs_f64(COMPILE_TIME_LIMIT * 2.0))
            .invoke();
        debug!("g++ finished with {} after {:?}", report.exit_code, report.cpu_time);

        if report.exit_code != ExitCode::Success {
            let mut log = fs::read_to_string(&log_path).unwrap_or_default();
            if let Some(diagnostic) = report.diagnostic {
                log.push_str(&diagnostic);
            }
            return Err(Error::Compile {
                module: source.display().to_string(),
                log,
            });
        }
        workspace.discard(&log_path);
        Ok(CompiledProgram::new(exec_path))
    }
}
