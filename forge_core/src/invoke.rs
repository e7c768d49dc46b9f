use std::{
    ffi::{OsStr, OsString},
    fs::File,
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    limit::Limits,
    outcome::ExitCode,
    probe::{ProcessBio, ProcessProbe, Termination},
};

/// Absolute wall-clock bound of one invocation, whatever its CPU limit.
pub const HARD_CEILING: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything needed to start one child process.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    stdin: Option<PathBuf>,
    stderr: Option<PathBuf>,
    working_dir: PathBuf,
    limits: Limits,
    ceiling: Duration,
}

#[derive(Debug)]
pub struct InvocationReport {
    pub exit_code: ExitCode,
    pub cpu_time: Option<Duration>,
    /// Peak resident set size in kilobytes.
    pub peak_memory: Option<u64>,
    pub diagnostic: Option<String>,
}

impl InvocationReport {
    fn failed(exit_code: ExitCode, diagnostic: String) -> Self {
        Self {
            exit_code,
            cpu_time: None,
            peak_memory: None,
            diagnostic: Some(diagnostic),
        }
    }
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>, working_dir: impl Into<PathBuf>, limits: Limits) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            stdin: None,
            stderr: None,
            working_dir: working_dir.into(),
            limits,
            ceiling: HARD_CEILING,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    pub fn ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn stderr_path(&self) -> Option<&Path> {
        self.stderr.as_deref()
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// The wall-clock bound actually used; always longer than the CPU limit.
    fn effective_ceiling(&self) -> Duration {
        let cpu = Duration::from_secs(self.limits.rlimits().cpu_seconds);
        if self.ceiling > cpu {
            self.ceiling
        } else {
            cpu * 2
        }
    }

    /// Start the child, wait for it and classify how it ended.
    ///
    /// Limits are applied between `fork` and `exec`, so the child never runs
    /// unconstrained. Redirected files are owned by the `Command` and closed
    /// before this returns, whichever way it returns.
    pub fn invoke(&self) -> InvocationReport {
        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(err) => {
                return InvocationReport::failed(
                    ExitCode::PreparationFailure,
                    format!("failed to start `{}`: {}", self.program.to_string_lossy(), err),
                )
            }
        };
        debug!(
            "started `{}` as pid {} ({}s, {}MB)",
            self.program.to_string_lossy(),
            child.id(),
            self.limits.cpu_time,
            self.limits.memory
        );

        let probe = match ProcessProbe::new(child.id()) {
            Ok(probe) => probe,
            Err(err) => {
                reap(&mut child);
                return InvocationReport::failed(ExitCode::RuntimeFailure, err.to_string());
            }
        };

        let deadline = Instant::now() + self.effective_ceiling();
        loop {
            match probe.poll() {
                Ok(Some(bio)) => return classify(&bio),
                Ok(None) => {}
                Err(err) => {
                    reap(&mut child);
                    return InvocationReport::failed(
                        ExitCode::RuntimeFailure,
                        format!("lost track of child: {}", err),
                    );
                }
            }
            if Instant::now() >= deadline {
                warn!(
                    "`{}` (pid {}) exceeded the hard ceiling, killing it",
                    self.program.to_string_lossy(),
                    child.id()
                );
                let _ = child.kill();
                let bio = probe.watching().ok();
                return InvocationReport {
                    exit_code: ExitCode::Killed,
                    cpu_time: bio.as_ref().map(ProcessBio::get_time_usage),
                    peak_memory: bio.as_ref().map(ProcessBio::get_peak_memory),
                    diagnostic: Some(format!(
                        "killed after {:?} of wall-clock time",
                        self.effective_ceiling()
                    )),
                };
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn spawn(&self) -> io::Result<Child> {
        let stdin = match &self.stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };
        let stderr = match &self.stderr {
            Some(path) => Stdio::from(File::create(path)?),
            None => Stdio::null(),
        };
        let limits = self.limits.rlimits();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(stderr);
        unsafe {
            command.pre_exec(move || limits.apply_to_current());
        }
        command.spawn()
    }
}

/// Kill a child we can no longer watch and collect it, so no zombie is left.
fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("kill of pid {} failed: {}", child.id(), err);
    }
    if let Err(err) = child.wait() {
        warn!("pid {} could not be reaped: {}", child.id(), err);
    }
}

/// Exit statuses an interpreter's own watchdog uses to report a limit.
const SELF_REPORTED_TLE: i32 = 256 - libc::SIGXCPU;
const SELF_REPORTED_MLE: i32 = 256 - libc::SIGSEGV;

pub fn map_termination(termination: Termination) -> ExitCode {
    match termination {
        Termination::Exited(0) => ExitCode::Success,
        Termination::Exited(SELF_REPORTED_TLE) => ExitCode::TimeLimitExceeded,
        Termination::Exited(SELF_REPORTED_MLE) => ExitCode::MemoryLimitExceeded,
        Termination::Exited(_) => ExitCode::RuntimeFailure,
        Termination::Signaled(libc::SIGXCPU) => ExitCode::TimeLimitExceeded,
        Termination::Signaled(libc::SIGSEGV) => ExitCode::MemoryLimitExceeded,
        Termination::Signaled(_) => ExitCode::RuntimeFailure,
    }
}

fn classify(bio: &ProcessBio) -> InvocationReport {
    let termination = bio.get_termination();
    let exit_code = map_termination(termination);
    let diagnostic = match (exit_code, termination) {
        (ExitCode::RuntimeFailure, Termination::Exited(code)) => {
            Some(format!("exited with status {}", code))
        }
        (ExitCode::RuntimeFailure, Termination::Signaled(signal)) => {
            Some(format!("terminated by signal {}", signal))
        }
        _ => None,
    };
    InvocationReport {
        exit_code,
        cpu_time: Some(bio.get_time_usage()),
        peak_memory: Some(bio.get_peak_memory()),
        diagnostic,
    }
}
