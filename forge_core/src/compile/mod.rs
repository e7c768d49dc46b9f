use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::{
    error::{Error, Result},
    invoke::Invocation,
    limit::Limits,
    workspace::Workspace,
};

mod gpp;
mod native;
mod python;
mod shell;

pub use gpp::CompilerGPP;
pub use native::CompilerNative;
pub use python::CompilerPython;
pub use shell::CompilerShell;

pub trait Compiler: Send + Sync {
    /// Prepare `source`, placing any build artifact inside `workspace`.
    fn compile(&self, source: &Path, workspace: &Workspace) -> Result<CompiledProgram>;
}

pub trait CompilerDescriptor {
    fn support_suffix() -> Vec<&'static str>;
    fn check_environment() -> CompilerEnvironmentStatus;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerEnvironmentStatus {
    OK { version: String, path: PathBuf },
    Missing,
}

/// Program plus the leading arguments needed to start it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    path: PathBuf,
    args: Vec<OsString>,
}

impl CompiledProgram {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::new_with_args(path, Vec::<OsString>::new())
    }

    pub fn new_with_args<I, S>(path: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            path: path.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// An invocation of this program; callers append their own arguments.
    pub fn invocation(&self, working_dir: &Path, limits: Limits) -> Invocation {
        Invocation::new(&self.path, working_dir, limits).args(&self.args)
    }
}

/// Look an interpreter or compiler up on `PATH` and ask it for its version.
fn locate(name: &str) -> CompilerEnvironmentStatus {
    let path = match which::which(name) {
        Ok(path) => path,
        Err(_) => return CompilerEnvironmentStatus::Missing,
    };
    let version = Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()
        .and_then(|output| {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            stdout
                .lines()
                .next()
                .and_then(|line| line.split(' ').last())
                .map(String::from)
        })
        .unwrap_or_else(|| "unknown".into());
    CompilerEnvironmentStatus::OK { version, path }
}

fn require(name: &str, status: CompilerEnvironmentStatus) -> Result<PathBuf> {
    match status {
        CompilerEnvironmentStatus::OK { path, .. } => Ok(path),
        CompilerEnvironmentStatus::Missing => Err(Error::Environment(format!("missing {}", name))),
    }
}

fn suffix_of(source: &Path) -> Option<String> {
    source
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Choose a compiler by the file extension of `source`.
///
/// Files without an extension are taken to be executables already.
pub fn compiler_for(source: &Path) -> Result<Box<dyn Compiler>> {
    let suffix = match suffix_of(source) {
        Some(suffix) => suffix,
        None => return Ok(Box::new(CompilerNative::new())),
    };
    let suffix = suffix.as_str();
    if CompilerGPP::support_suffix().contains(&suffix) {
        Ok(Box::new(CompilerGPP::new()?))
    } else if CompilerPython::support_suffix().contains(&suffix) {
        Ok(Box::new(CompilerPython::new()?))
    } else if CompilerShell::support_suffix().contains(&suffix) {
        Ok(Box::new(CompilerShell::new()?))
    } else {
        Err(Error::Argument(format!(
            "unsupported language of `{}`",
            source.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pick_by_suffix() -> Result<()> {
        assert!(compiler_for(Path::new("gen.sh")).is_ok());
        assert!(compiler_for(Path::new("a.out.bin")).is_err());
        assert!(matches!(
            compiler_for(Path::new("sol.rb")),
            Err(Error::Argument(_))
        ));
        let dir = TempDir::new()?;
        let workspace = Workspace::new_in(dir.path())?;
        let native = compiler_for(Path::new("/bin/true"))?.compile(Path::new("/bin/true"), &workspace)?;
        assert_eq!(native.path(), Path::new("/bin/true"));
        assert!(native.args().is_empty());
        Ok(())
    }

    #[test]
    fn missing_tool() {
        let status = locate("surely-not-a-real-compiler");
        assert_eq!(status, CompilerEnvironmentStatus::Missing);
        assert!(matches!(
            require("surely-not-a-real-compiler", status),
            Err(Error::Environment(_))
        ));
    }
}
