//! One module run as a strictly forward state machine:
//! `Created → BeforePreparation → TimedExecution → AfterValidation → Finished`.

use std::{
    fs, io,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{debug, warn};

use crate::{
    dispatch::AdmissionGate,
    invoke::Invocation,
    outcome::{ExecutionOutcome, ExitCode},
    probe::{current_thread_cpu_time, ThreadProbe},
};

/// Polling interval of the in-process CPU watchdog.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(20);

const ALLOCATION_FAILURE_MARKERS: [&str; 2] = ["bad_alloc", "MemoryError"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    BeforePreparation,
    TimedExecution,
    AfterValidation,
    Finished,
}

type Preparation = Box<dyn FnOnce() -> Result<(), String> + Send>;
type Work = Box<dyn FnOnce(&Cancellation) -> Result<String, String> + Send>;

/// Stop request the watchdog hands to in-process work.
///
/// A thread cannot be killed, so long-running work has to poll
/// [`Cancellation::checkpoint`] and return once it fails.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<(), String> {
        if self.is_cancelled() {
            Err("cancelled by the watchdog".into())
        } else {
            Ok(())
        }
    }
}
type Validation<T> = Box<dyn FnOnce(String) -> Result<T, String> + Send>;

enum Execution {
    /// The module is an external process writing its result to `output`.
    Child {
        invocation: Invocation,
        output: Option<PathBuf>,
    },
    /// The work runs on a thread of this process under a CPU watchdog.
    InProcess {
        work: Work,
        cpu_limit: Duration,
        write_back: Option<PathBuf>,
    },
}

pub struct PhasedTask<T> {
    label: String,
    phase: Phase,
    preparation: Option<Preparation>,
    execution: Execution,
    validation: Validation<T>,
    scratch: Vec<PathBuf>,
}

impl<T: 'static> PhasedTask<T> {
    /// A task delegating its timed phase to a child process.
    ///
    /// `output` is the artifact the child writes; its contents are handed to
    /// `validation`. Without an artifact the validation receives an empty string.
    pub fn child(
        label: impl Into<String>,
        invocation: Invocation,
        output: Option<PathBuf>,
        validation: impl FnOnce(String) -> Result<T, String> + Send + 'static,
    ) -> Self {
        Self::with_execution(
            label.into(),
            Execution::Child { invocation, output },
            Box::new(validation),
        )
    }

    /// A task running `work` on a thread of this process.
    ///
    /// The task fails with [`ExitCode::TimeLimitExceeded`] as soon as the
    /// thread has used more than `cpu_limit` of CPU time. The work is then
    /// cancelled and the admission slot stays taken until it has returned.
    pub fn in_process(
        label: impl Into<String>,
        cpu_limit: Duration,
        work: impl FnOnce(&Cancellation) -> Result<String, String> + Send + 'static,
        validation: impl FnOnce(String) -> Result<T, String> + Send + 'static,
    ) -> Self {
        Self::with_execution(
            label.into(),
            Execution::InProcess {
                work: Box::new(work),
                cpu_limit,
                write_back: None,
            },
            Box::new(validation),
        )
    }

    fn with_execution(label: String, execution: Execution, validation: Validation<T>) -> Self {
        Self {
            label,
            phase: Phase::Created,
            preparation: None,
            execution,
            validation,
            scratch: Vec::new(),
        }
    }

    /// Setup run before the timed phase, outside of any admission slot.
    pub fn before(
        mut self,
        preparation: impl FnOnce() -> Result<(), String> + Send + 'static,
    ) -> Self {
        self.preparation = Some(Box::new(preparation));
        self
    }

    /// Persist the raw result of an in-process run after it passed validation.
    pub fn write_back(mut self, path: impl Into<PathBuf>) -> Self {
        if let Execution::InProcess { write_back, .. } = &mut self.execution {
            *write_back = Some(path.into());
        }
        self
    }

    /// A file removed once the task is finished, whatever its outcome.
    pub fn scratch(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch.push(path.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive the task to [`Phase::Finished`], holding an admission slot only
    /// during the timed phase.
    pub fn run(mut self, gate: &AdmissionGate) -> ExecutionOutcome<T> {
        let scratch = std::mem::take(&mut self.scratch);
        let outcome = self.run_phases(gate);
        for path in scratch {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove {}: {}", path.display(), err);
                }
            }
        }
        outcome
    }

    fn run_phases(self, gate: &AdmissionGate) -> ExecutionOutcome<T> {
        let PhasedTask {
            label,
            mut phase,
            preparation,
            execution,
            validation,
            ..
        } = self;
        let mut advance = |next: Phase| {
            debug_assert!(next > phase, "phases only move forward");
            debug!("{}: {:?} -> {:?}", label, phase, next);
            phase = next;
        };

        advance(Phase::BeforePreparation);
        if let Some(preparation) = preparation {
            if let Err(msg) = preparation() {
                advance(Phase::Finished);
                return ExecutionOutcome::failure(ExitCode::PreparationFailure, msg);
            }
        }

        advance(Phase::TimedExecution);
        let (executed, write_back) = {
            let _slot = gate.enter();
            match execution {
                Execution::Child { invocation, output } => {
                    (run_child(&label, &invocation, output), None)
                }
                Execution::InProcess {
                    work,
                    cpu_limit,
                    write_back,
                } => (run_watched(&label, work, cpu_limit), write_back),
            }
        };
        let cpu_time = executed.cpu_time();
        if executed.exit_code() != ExitCode::Success {
            advance(Phase::Finished);
            return executed.retype();
        }
        let raw = executed.into_value().unwrap_or_default();

        advance(Phase::AfterValidation);
        let outcome = match validation(raw.clone()) {
            Ok(value) => match write_back {
                Some(path) => match fs::write(&path, raw.as_bytes()) {
                    Ok(()) => ExecutionOutcome::success(value, cpu_time),
                    Err(err) => ExecutionOutcome::failure(
                        ExitCode::IOFailure,
                        format!("failed to write result to {}: {}", path.display(), err),
                    )
                    .with_cpu_time(cpu_time),
                },
                None => ExecutionOutcome::success(value, cpu_time),
            },
            Err(msg) => ExecutionOutcome::failure(
                ExitCode::PostValidationFailure,
                format!("{}\nproduced:\n{}", msg, truncate(&raw)),
            )
            .with_cpu_time(cpu_time),
        };
        advance(Phase::Finished);
        outcome
    }
}

const DIAGNOSTIC_LIMIT: usize = 4096;

fn truncate(text: &str) -> String {
    if text.len() <= DIAGNOSTIC_LIMIT {
        return text.to_string();
    }
    let mut end = DIAGNOSTIC_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Timed phase of a child-process task. The value is the raw artifact.
fn run_child(
    label: &str,
    invocation: &Invocation,
    output: Option<PathBuf>,
) -> ExecutionOutcome<String> {
    let report = invocation.invoke();
    debug!(
        "{}: {} with {:?} of cpu time, peak memory {}KB",
        label,
        report.exit_code,
        report.cpu_time.unwrap_or_default(),
        report.peak_memory.unwrap_or_default()
    );
    let stderr = invocation
        .stderr_path()
        .and_then(|path| fs::read(path).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();

    let mut exit_code = report.exit_code;
    if exit_code == ExitCode::RuntimeFailure
        && ALLOCATION_FAILURE_MARKERS.iter().any(|m| stderr.contains(m))
    {
        exit_code = ExitCode::MemoryLimitExceeded;
    }

    if exit_code != ExitCode::Success {
        let mut diagnostic = report.diagnostic.unwrap_or_default();
        if let (ExitCode::MemoryLimitExceeded, Some(peak)) = (exit_code, report.peak_memory) {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(&format!("peak memory {}KB", peak));
        }
        if !stderr.is_empty() {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(&truncate(&stderr));
        }
        return ExecutionOutcome::failure(exit_code, diagnostic).with_cpu_time(report.cpu_time);
    }

    let raw = match output {
        Some(path) => match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                return ExecutionOutcome::failure(
                    ExitCode::IOFailure,
                    format!("no result at {}: {}", path.display(), err),
                )
                .with_cpu_time(report.cpu_time)
            }
        },
        None => String::new(),
    };
    ExecutionOutcome::success(raw, report.cpu_time)
}

enum WorkerReport {
    Started(ThreadProbe),
    Finished(thread::Result<Result<String, String>>, Option<Duration>),
}

/// Timed phase of an in-process task.
///
/// Returns only after the worker thread is gone, so the caller's admission
/// slot covers the whole life of the work.
fn run_watched(label: &str, work: Work, cpu_limit: Duration) -> ExecutionOutcome<String> {
    let (tx, rx) = mpsc::channel();
    let cancellation = Cancellation::default();
    let token = cancellation.clone();
    let spawned = thread::Builder::new()
        .name(format!("forge: {}", label))
        .spawn(move || {
            let _ = tx.send(WorkerReport::Started(ThreadProbe::current()));
            let result = panic::catch_unwind(AssertUnwindSafe(|| work(&token)));
            let _ = tx.send(WorkerReport::Finished(result, current_thread_cpu_time()));
        });
    let handle = match spawned {
        Ok(handle) => handle,
        Err(err) => {
            return ExecutionOutcome::failure(
                ExitCode::PreparationFailure,
                format!("failed to start worker thread: {}", err),
            )
        }
    };

    let mut probe = None;
    let outcome = loop {
        match rx.recv_timeout(WATCHDOG_INTERVAL) {
            Ok(WorkerReport::Started(p)) => probe = Some(p),
            Ok(WorkerReport::Finished(result, cpu_time)) => {
                if cpu_time.map_or(false, |used| used > cpu_limit) {
                    break ExecutionOutcome::failure(ExitCode::TimeLimitExceeded, "")
                        .with_cpu_time(cpu_time);
                }
                break match result {
                    Ok(Ok(raw)) => ExecutionOutcome::success(raw, cpu_time),
                    Ok(Err(msg)) => ExecutionOutcome::failure(ExitCode::RuntimeFailure, msg)
                        .with_cpu_time(cpu_time),
                    Err(payload) => ExecutionOutcome::failure(
                        ExitCode::RuntimeFailure,
                        format!("panicked: {}", panic_message(&payload)),
                    )
                    .with_cpu_time(cpu_time),
                };
            }
            Err(RecvTimeoutError::Timeout) => {
                let used = probe.as_ref().and_then(ThreadProbe::get_cpu_usage);
                if let Some(used) = used.filter(|used| *used > cpu_limit) {
                    warn!("{} exceeded {:?} of cpu time, cancelling it", label, cpu_limit);
                    cancellation.cancel();
                    break ExecutionOutcome::failure(ExitCode::TimeLimitExceeded, "")
                        .with_cpu_time(Some(used));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                break ExecutionOutcome::failure(
                    ExitCode::RuntimeFailure,
                    "worker thread vanished without a result",
                )
            }
        }
    };
    if handle.join().is_err() {
        warn!("worker thread of {} panicked outside of its work", label);
    }
    outcome
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Result, limit::Limits};
    use std::{num::NonZeroUsize, sync::atomic::AtomicU64};
    use tempfile::TempDir;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(NonZeroUsize::new(1).unwrap())
    }

    fn parse_int(raw: String) -> std::result::Result<i64, String> {
        raw.trim().parse::<i64>().map_err(|e| e.to_string())
    }

    #[test]
    fn in_process_success() {
        let task = PhasedTask::in_process("ok", Duration::from_secs(1), |_| Ok("42".into()), parse_int);
        assert_eq!(task.phase(), Phase::Created);
        let outcome = task.run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::Success);
        assert_eq!(outcome.value(), Some(&42));
    }

    #[test]
    fn in_process_busy_loop_is_tle() {
        let task = PhasedTask::in_process(
            "busy",
            Duration::from_millis(200),
            |cancel| {
                let mut x = 0u64;
                loop {
                    x = std::hint::black_box(x.wrapping_add(1));
                    if x % 1024 == 0 {
                        cancel.checkpoint()?;
                    }
                }
            },
            parse_int,
        );
        let outcome = task.run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::TimeLimitExceeded);
        assert!(outcome.diagnostic().is_none());
    }

    #[test]
    fn timed_out_work_is_stopped_before_returning() {
        let spins = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let task = {
            let spins = spins.clone();
            let stopped = stopped.clone();
            PhasedTask::in_process(
                "endless",
                Duration::from_millis(100),
                move |cancel| {
                    while !cancel.is_cancelled() {
                        spins.fetch_add(1, Ordering::Relaxed);
                    }
                    stopped.store(true, Ordering::SeqCst);
                    Ok("0".into())
                },
                parse_int,
            )
        };
        let outcome = task.run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::TimeLimitExceeded);
        assert!(stopped.load(Ordering::SeqCst));

        let seen = spins.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(spins.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn in_process_failures() {
        let panicking: PhasedTask<i64> = PhasedTask::in_process(
            "panics",
            Duration::from_secs(1),
            |_| panic!("index out of range"),
            parse_int,
        );
        let outcome = panicking.run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::RuntimeFailure);
        assert!(outcome.diagnostic().unwrap().contains("index out of range"));

        let rejected = PhasedTask::in_process("bad", Duration::from_secs(1), |_| Ok("x".into()), parse_int);
        let outcome = rejected.run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::PostValidationFailure);
        assert!(outcome.diagnostic().unwrap().contains("produced:\nx"));

        let unprepared = PhasedTask::in_process("early", Duration::from_secs(1), |_| Ok("1".into()), parse_int)
            .before(|| Err("missing input".into()));
        let outcome = unprepared.run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::PreparationFailure);
        assert_eq!(outcome.diagnostic(), Some("missing input"));
    }

    #[test]
    fn in_process_write_back() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("result.out");
        let task = PhasedTask::in_process("write", Duration::from_secs(1), |_| Ok("7\n".into()), parse_int)
            .write_back(&path);
        assert_eq!(task.run(&gate()).value(), Some(&7));
        assert_eq!(fs::read_to_string(&path)?, "7\n");

        let task = PhasedTask::in_process("unwritable", Duration::from_secs(1), |_| Ok("7".into()), parse_int)
            .write_back(dir.path().join("missing").join("result.out"));
        assert_eq!(task.run(&gate()).exit_code(), ExitCode::IOFailure);
        Ok(())
    }

    #[test]
    fn child_reads_artifact() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("answer.out");
        let invocation = Invocation::new("sh", dir.path(), Limits::default())
            .arg("-c")
            .arg("echo 6 > \"$0\"")
            .arg(&out);
        let outcome = PhasedTask::child("sol", invocation, Some(out), parse_int).run(&gate());
        assert_eq!(outcome.value(), Some(&6));
        assert!(outcome.cpu_time().is_some());
        Ok(())
    }

    #[test]
    fn scratch_files_are_removed() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("answer.out");
        let log = dir.path().join("stderr.log");
        let invocation = Invocation::new("sh", dir.path(), Limits::default())
            .arg("-c")
            .arg("echo 6 > \"$0\"; echo note >&2")
            .arg(&out)
            .stderr(&log);
        let outcome = PhasedTask::child("sol", invocation, Some(out.clone()), parse_int)
            .scratch(&out)
            .scratch(&log)
            .run(&gate());
        assert_eq!(outcome.value(), Some(&6));
        assert!(!out.exists());
        assert!(!log.exists());
        Ok(())
    }

    #[test]
    fn child_missing_artifact_is_io_failure() -> Result<()> {
        let dir = TempDir::new()?;
        let invocation = Invocation::new("sh", dir.path(), Limits::default()).arg("-c").arg("true");
        let outcome = PhasedTask::child("sol", invocation, Some(dir.path().join("none")), parse_int)
            .run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::IOFailure);
        Ok(())
    }

    #[test]
    fn child_allocation_failure_is_mle() -> Result<()> {
        let dir = TempDir::new()?;
        let log = dir.path().join("stderr.log");
        let invocation = Invocation::new("sh", dir.path(), Limits::default())
            .arg("-c")
            .arg("echo \"terminate called after throwing an instance of 'std::bad_alloc'\" >&2; exit 134")
            .stderr(&log);
        let outcome = PhasedTask::child("sol", invocation, None, parse_int).run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::MemoryLimitExceeded);
        assert!(outcome.diagnostic().unwrap().contains("peak memory"));

        let invocation = Invocation::new("sh", dir.path(), Limits::default())
            .arg("-c")
            .arg("echo oops >&2; exit 3")
            .stderr(&log);
        let outcome = PhasedTask::child("sol", invocation, None, parse_int).run(&gate());
        assert_eq!(outcome.exit_code(), ExitCode::RuntimeFailure);
        let diagnostic = outcome.diagnostic().unwrap();
        assert!(diagnostic.contains("exited with status 3"));
        assert!(diagnostic.contains("oops"));
        Ok(())
    }
}
