use std::{fs, io, path::Path, time::Duration};

use crate::error::Result;

/// Watches one child process of the current process through `wait4`.
pub struct ProcessProbe {
    pid: libc::pid_t,
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);
        if !Path::new(&proc_path).exists() {
            let err = io::Error::new(io::ErrorKind::NotFound, "process does not exists");
            return Err(err.into());
        }
        Ok(Self {
            pid: pid as libc::pid_t,
        })
    }

    /// Reap the process if it has already terminated.
    pub fn poll(&self) -> io::Result<Option<ProcessBio>> {
        self.wait4(libc::WNOHANG)
    }

    /// Block until the process terminates and collect its whole usage status.
    pub fn watching(&self) -> io::Result<ProcessBio> {
        loop {
            if let Some(bio) = self.wait4(0)? {
                return Ok(bio);
            }
        }
    }

    fn wait4(&self, options: libc::c_int) -> io::Result<Option<ProcessBio>> {
        let mut status: libc::c_int = 0;
        let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::wait4(self.pid, &mut status, options, &mut ru) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(None);
        }
        Ok(Some(ProcessBio {
            status,
            utime: timeval_to_duration(&ru.ru_utime),
            stime: timeval_to_duration(&ru.ru_stime),
            maxrss: ru.ru_maxrss as u64,
        }))
    }
}

fn timeval_to_duration(tv: &libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64)
}

/// How a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

#[derive(Debug)]
pub struct ProcessBio {
    status: i32,
    utime: Duration,
    stime: Duration,
    maxrss: u64,
}

impl ProcessBio {
    /// Get cpu time usage, user and system.
    pub fn get_time_usage(&self) -> Duration {
        self.utime + self.stime
    }

    pub fn get_termination(&self) -> Termination {
        if libc::WIFSIGNALED(self.status) {
            Termination::Signaled(libc::WTERMSIG(self.status))
        } else {
            Termination::Exited(libc::WEXITSTATUS(self.status))
        }
    }

    /// Peak resident set size in kilobytes.
    pub fn get_peak_memory(&self) -> u64 {
        self.maxrss
    }
}

/// Reads the CPU time of one thread of the current process from procfs.
#[derive(Debug, Clone, Copy)]
pub struct ThreadProbe {
    tid: libc::pid_t,
}

impl ThreadProbe {
    /// Probe for the calling thread.
    pub fn current() -> Self {
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t;
        Self { tid }
    }

    /// User plus system time, at clock-tick resolution.
    pub fn get_cpu_usage(&self) -> Option<Duration> {
        let stat = fs::read_to_string(format!("/proc/self/task/{}/stat", self.tid)).ok()?;
        // the command name may contain spaces, fields restart after its closing paren
        let rest = &stat[stat.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks <= 0 {
            return None;
        }
        Some(Duration::from_secs_f64((utime + stime) as f64 / ticks as f64))
    }
}

/// CPU time consumed so far by the calling thread.
pub fn current_thread_cpu_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if ret != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn thread_cpu_usage() {
        let probe = ThreadProbe::current();
        let before = current_thread_cpu_time().unwrap();
        let mut x = 0u64;
        while current_thread_cpu_time().unwrap() - before < Duration::from_millis(100) {
            x = x.wrapping_add(1);
        }
        assert!(x > 0);
        let seen = probe.get_cpu_usage().unwrap();
        assert!(seen >= Duration::from_millis(50));
    }

    #[test]
    fn missing_process() {
        assert!(ProcessProbe::new(u32::MAX - 1).is_err());
    }

    #[test]
    fn exit_status() -> Result<()> {
        let child = Command::new("sh").arg("-c").arg("exit 3").spawn()?;
        let bio = ProcessProbe::new(child.id())?.watching()?;
        assert_eq!(bio.get_termination(), Termination::Exited(3));
        Ok(())
    }

    #[test]
    fn signal_status() -> Result<()> {
        let child = Command::new("sh").arg("-c").arg("kill -11 $$").spawn()?;
        let bio = ProcessProbe::new(child.id())?.watching()?;
        assert_eq!(bio.get_termination(), Termination::Signaled(libc::SIGSEGV));
        Ok(())
    }

    #[test]
    fn poll_running() -> Result<()> {
        let mut child = Command::new("sleep").arg("5").spawn()?;
        let probe = ProcessProbe::new(child.id())?;
        assert!(probe.poll()?.is_none());
        child.kill()?;
        assert!(matches!(
            probe.watching()?.get_termination(),
            Termination::Signaled(libc::SIGKILL)
        ));
        Ok(())
    }
}
