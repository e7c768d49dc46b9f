//! Generators, validators and solutions as runnable tasks.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::info;

use crate::{
    compile::{compiler_for, CompiledProgram},
    error::{Error, Result},
    iodata::{parse_record, parse_value},
    limit::Limits,
    phase::PhasedTask,
    value::{Parameter, Shape, Value},
    workspace::Workspace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRole {
    Generator,
    Validator,
    Solution,
}

impl fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleRole::Generator => "generator",
            ModuleRole::Validator => "validator",
            ModuleRole::Solution => "solution",
        })
    }
}

/// A generated input: the file handed to validators and solutions, and the
/// values it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedInput {
    pub path: PathBuf,
    pub values: Vec<Value>,
}

pub struct ExternalModule {
    role: ModuleRole,
    name: String,
    source: PathBuf,
    program: Option<CompiledProgram>,
}

impl ExternalModule {
    pub fn new(role: ModuleRole, source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self {
            role,
            name,
            source,
            program: None,
        }
    }

    pub fn role(&self) -> ModuleRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Compile or locate the interpreter; a no-op once prepared.
    pub fn prepare(&mut self, workspace: &Workspace) -> Result<()> {
        if self.program.is_some() {
            return Ok(());
        }
        info!("preparing {} {}", self.role, self.name);
        let program = compiler_for(&self.source)?.compile(&self.source, workspace)?;
        self.program = Some(program);
        Ok(())
    }

    fn program(&self) -> Result<&CompiledProgram> {
        self.program
            .as_ref()
            .ok_or_else(|| Error::Environment(format!("{} `{}` is not prepared", self.role, self.name)))
    }

    fn expect_role(&self, role: ModuleRole) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(Error::Argument(format!(
                "`{}` is a {}, not a {}",
                self.name, self.role, role
            )))
        }
    }

    /// One generator run with the arguments of a genscript line.
    pub fn generate(
        &self,
        workspace: &Workspace,
        limits: Limits,
        args: &[String],
        parameters: Arc<Vec<Parameter>>,
    ) -> Result<PhasedTask<GeneratedInput>> {
        self.expect_role(ModuleRole::Generator)?;
        let out = workspace.new_file("input", "txt");
        let log = workspace.new_file("generator", "log");
        let invocation = self
            .program()?
            .invocation(workspace.path(), limits)
            .arg(&out)
            .args(args)
            .stderr(&log);
        let path = out.clone();
        Ok(PhasedTask::child(
            format!("{} {}", self.name, args.join(" ")),
            invocation,
            Some(out),
            move |raw| {
                let values = parse_record(&raw, &parameters).map_err(|e| e.to_string())?;
                Ok(GeneratedInput { path, values })
            },
        )
        .scratch(log))
    }

    /// One validator run over a generated input; only the exit status counts.
    pub fn validate(
        &self,
        workspace: &Workspace,
        limits: Limits,
        input: &Path,
    ) -> Result<PhasedTask<()>> {
        self.expect_role(ModuleRole::Validator)?;
        let log = workspace.new_file("validator", "log");
        let invocation = self
            .program()?
            .invocation(workspace.path(), limits)
            .stdin(input)
            .stderr(&log);
        Ok(PhasedTask::child(self.name.clone(), invocation, None, |_| Ok(()))
            .before(input_present(input))
            .scratch(log))
    }

    /// One solution run over a generated input.
    pub fn solve(
        &self,
        workspace: &Workspace,
        limits: Limits,
        input: &Path,
        return_shape: Shape,
    ) -> Result<PhasedTask<Value>> {
        self.expect_role(ModuleRole::Solution)?;
        let out = workspace.new_file("answer", "txt");
        let log = workspace.new_file("solution", "log");
        let invocation = self
            .program()?
            .invocation(workspace.path(), limits)
            .arg(&out)
            .stdin(input)
            .stderr(&log);
        Ok(
            PhasedTask::child(self.name.clone(), invocation, Some(out.clone()), move |raw| {
                parse_value(&raw, return_shape).map_err(|e| e.to_string())
            })
            .before(input_present(input))
            .scratch(out)
            .scratch(log),
        )
    }
}

fn input_present(input: &Path) -> impl FnOnce() -> std::result::Result<(), String> + Send + 'static {
    let input = input.to_path_buf();
    move || {
        if input.is_file() {
            Ok(())
        } else {
            Err(format!("input {} does not exist", input.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatch::AdmissionGate,
        outcome::ExitCode,
        value::IoType,
    };
    use std::{fs, num::NonZeroUsize};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        workspace: Workspace,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let dir = TempDir::new()?;
            let workspace = Workspace::new_in(dir.path())?;
            Ok(Self { dir, workspace })
        }

        fn module(&self, role: ModuleRole, name: &str, script: &str) -> Result<ExternalModule> {
            let path = self.dir.path().join(name);
            fs::write(&path, script)?;
            let mut module = ExternalModule::new(role, path);
            module.prepare(&self.workspace)?;
            Ok(module)
        }
    }

    fn gate() -> AdmissionGate {
        AdmissionGate::new(NonZeroUsize::new(1).unwrap())
    }

    fn int_params() -> Arc<Vec<Parameter>> {
        Arc::new(vec![
            Parameter {
                name: "a".into(),
                shape: Shape::scalar(IoType::Int),
            },
            Parameter {
                name: "b".into(),
                shape: Shape::scalar(IoType::Int),
            },
        ])
    }

    #[test]
    fn generator_then_solution() -> Result<()> {
        let fx = Fixture::new()?;
        let generator = fx.module(
            ModuleRole::Generator,
            "gen.sh",
            "out=$1; shift; for x in \"$@\"; do echo $x; done > \"$out\"\n",
        )?;
        let solution = fx.module(
            ModuleRole::Solution,
            "sol.sh",
            "read a; read b; echo $((a + b)) > \"$1\"\n",
        )?;

        let task = generator.generate(
            &fx.workspace,
            Limits::default(),
            &["4".to_string(), "5".to_string()],
            int_params(),
        )?;
        let input = task.run(&gate()).into_value().unwrap();
        assert_eq!(input.values, vec![Value::Int(4), Value::Int(5)]);

        let answer = solution
            .solve(&fx.workspace, Limits::default(), &input.path, Shape::scalar(IoType::Int))?
            .run(&gate());
        assert_eq!(answer.value(), Some(&Value::Int(9)));
        Ok(())
    }

    #[test]
    fn generator_output_checked() -> Result<()> {
        let fx = Fixture::new()?;
        let generator = fx.module(ModuleRole::Generator, "gen.sh", "echo 1 > \"$1\"\n")?;
        let outcome = generator
            .generate(&fx.workspace, Limits::default(), &[], int_params())?
            .run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::PostValidationFailure);
        Ok(())
    }

    #[test]
    fn validator_exit_status() -> Result<()> {
        let fx = Fixture::new()?;
        let input = fx.dir.path().join("input.txt");
        fs::write(&input, "3\n")?;
        let accepting = fx.module(ModuleRole::Validator, "ok.sh", "read a; test $a -gt 0\n")?;
        let rejecting = fx.module(ModuleRole::Validator, "no.sh", "read a; test $a -gt 5\n")?;
        let run = |m: &ExternalModule, input: &Path| -> Result<ExitCode> {
            Ok(m.validate(&fx.workspace, Limits::default(), input)?
                .run(&gate())
                .exit_code())
        };
        assert_eq!(run(&accepting, &input)?, ExitCode::Success);
        assert_eq!(run(&rejecting, &input)?, ExitCode::RuntimeFailure);
        assert_eq!(
            run(&accepting, &fx.dir.path().join("missing.txt"))?,
            ExitCode::PreparationFailure
        );
        Ok(())
    }

    #[test]
    fn roles_are_enforced() -> Result<()> {
        let fx = Fixture::new()?;
        let validator = fx.module(ModuleRole::Validator, "v.sh", "true\n")?;
        assert!(matches!(
            validator.solve(&fx.workspace, Limits::default(), Path::new("x"), Shape::scalar(IoType::Int)),
            Err(Error::Argument(_))
        ));
        let unprepared = ExternalModule::new(ModuleRole::Validator, fx.dir.path().join("v.sh"));
        assert!(matches!(
            unprepared.validate(&fx.workspace, Limits::default(), Path::new("x")),
            Err(Error::Environment(_))
        ));
        Ok(())
    }
}
