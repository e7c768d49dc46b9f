use std::path::{Path, PathBuf};

use super::{
    locate, require, CompiledProgram, Compiler, CompilerDescriptor, CompilerEnvironmentStatus,
};
use crate::{error::Result, workspace::Workspace};

pub struct CompilerPython {
    interpreter_path: PathBuf,
}

impl CompilerPython {
    pub fn new() -> Result<Self> {
        Ok(Self {
            interpreter_path: require("python3", Self::check_environment())?,
        })
    }
}

impl CompilerDescriptor for CompilerPython {
    fn support_suffix() -> Vec<&'static str> {
        vec!["py"]
    }

    fn check_environment() -> CompilerEnvironmentStatus {
        locate("python3")
    }
}

impl Compiler for CompilerPython {
    fn compile(&self, source: &Path, _workspace: &Workspace) -> Result<CompiledProgram> {
        Ok(CompiledProgram::new_with_args(
            self.interpreter_path.clone(),
            vec![source.as_os_str().to_os_string()],
        ))
    }
}
