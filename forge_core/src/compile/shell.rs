use std::path::{Path, PathBuf};

use super::{
    locate, require, CompiledProgram, Compiler, CompilerDescriptor, CompilerEnvironmentStatus,
};
use crate::{error::Result, workspace::Workspace};

/// Shell scripts run through `sh`, so they need no executable bit.
pub struct CompilerShell {
    shell_path: PathBuf,
}

impl CompilerShell {
    pub fn new() -> Result<Self> {
        Ok(Self {
            shell_path: require("sh", Self::check_environment())?,
        })
    }
}

impl CompilerDescriptor for CompilerShell {
    fn support_suffix() -> Vec<&'static str> {
        vec!["sh"]
    }

    fn check_environment() -> CompilerEnvironmentStatus {
        locate("sh")
    }
}

impl Compiler for CompilerShell {
    fn compile(&self, source: &Path, _workspace: &Workspace) -> Result<CompiledProgram> {
        Ok(CompiledProgram::new_with_args(
            self.shell_path.clone(),
            vec![source.as_os_str().to_os_string()],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{limit::Limits, outcome::ExitCode};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn runs_without_exec_bit() -> Result<()> {
        let dir = TempDir::new()?;
        let script = dir.path().join("hello.sh");
        fs::write(&script, "echo hi > \"$1\"\n")?;
        let workspace = Workspace::new_in(dir.path())?;
        let program = CompilerShell::new()?.compile(&script, &workspace)?;
        let out = workspace.new_file("hello", "out");
        let report = program
            .invocation(workspace.path(), Limits::default())
            .arg(&out)
            .invoke();
        assert_eq!(report.exit_code, ExitCode::Success);
        assert_eq!(fs::read_to_string(&out)?, "hi\n");
        Ok(())
    }
}
