use std::path::Path;

use super::{CompiledProgram, Compiler};
use crate::{
    error::{Error, Result},
    workspace::Workspace,
};

/// A prebuilt executable, invoked as it is.
#[derive(Default)]
pub struct CompilerNative;

impl CompilerNative {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for CompilerNative {
    fn compile(&self, source: &Path, _workspace: &Workspace) -> Result<CompiledProgram> {
        if !source.is_file() {
            return Err(Error::NotFound(source.display().to_string()));
        }
        Ok(CompiledProgram::new(source))
    }
}
