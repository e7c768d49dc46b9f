use std::io;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TIME_LIMIT: f64 = 5.0;
pub const DEFAULT_MEMORY_LIMIT: f64 = 1024.0;
pub const DEFAULT_GENERATOR_TIME_LIMIT: f64 = 10.0;
pub const DEFAULT_VALIDATOR_TIME_LIMIT: f64 = 10.0;

/// Limits declared for a kind of module run, in seconds and megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(rename = "time", default = "default_time")]
    pub cpu_time: f64,
    #[serde(rename = "memory", default = "default_memory")]
    pub memory: f64,
}

fn default_time() -> f64 {
    DEFAULT_TIME_LIMIT
}

fn default_memory() -> f64 {
    DEFAULT_MEMORY_LIMIT
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cpu_time: DEFAULT_TIME_LIMIT,
            memory: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl Limits {
    pub fn new(cpu_time: f64, memory: f64) -> Result<Self> {
        let limits = Self { cpu_time, memory };
        limits.check_valid()?;
        Ok(limits)
    }

    pub fn check_valid(&self) -> Result<()> {
        if !(self.cpu_time > 0.0) || !self.cpu_time.is_finite() {
            return Err(Error::Config(format!(
                "time limit must be positive, got {}",
                self.cpu_time
            )));
        }
        if !(self.memory > 0.0) || !self.memory.is_finite() {
            return Err(Error::Config(format!(
                "memory limit must be positive, got {}",
                self.memory
            )));
        }
        Ok(())
    }

    pub fn with_cpu_time(self, cpu_time: f64) -> Self {
        Self { cpu_time, ..self }
    }

    pub fn rlimits(&self) -> ResourceLimits {
        ResourceLimits::new(self.cpu_time, self.memory)
    }
}

/// Raw rlimit values derived from [`Limits`].
///
/// Everything here is plain data so that [`ResourceLimits::apply_to_current`]
/// can run between `fork` and `exec`, where allocating is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_seconds: u64,
    pub memory_bytes: u64,
}

const MEMORY_RESOURCES: [libc::__rlimit_resource_t; 3] =
    [libc::RLIMIT_AS, libc::RLIMIT_DATA, libc::RLIMIT_STACK];

impl ResourceLimits {
    pub fn new(cpu_time: f64, memory_megabytes: f64) -> Self {
        let cpu_seconds = cpu_time.ceil().max(1.0) as u64;
        let memory_bytes = (memory_megabytes * (1u64 << 20) as f64).round() as u64;
        Self {
            cpu_seconds,
            memory_bytes,
        }
    }

    /// Set soft limits on the calling process, keeping the hard limits.
    ///
    /// Only the CPU limit can fail this call; memory limits are best effort.
    pub fn apply_to_current(&self) -> io::Result<()> {
        set_soft_limit(libc::RLIMIT_CPU, self.cpu_seconds)?;
        for resource in MEMORY_RESOURCES {
            let _ = set_soft_limit(resource, self.memory_bytes);
        }
        Ok(())
    }

    /// Same as [`ResourceLimits::apply_to_current`] but for a running process.
    ///
    /// The caller must make sure the process has not started running user code yet.
    pub fn apply_to_pid(&self, pid: libc::pid_t) -> io::Result<()> {
        set_soft_limit_of(pid, libc::RLIMIT_CPU, self.cpu_seconds)?;
        for resource in MEMORY_RESOURCES {
            let _ = set_soft_limit_of(pid, resource, self.memory_bytes);
        }
        Ok(())
    }
}

fn set_soft_limit(resource: libc::__rlimit_resource_t, value: u64) -> io::Result<()> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe {
        if libc::getrlimit(resource, &mut limit) != 0 {
            return Err(io::Error::last_os_error());
        }
        limit.rlim_cur = value as libc::rlim_t;
        if libc::setrlimit(resource, &limit) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_soft_limit_of(
    pid: libc::pid_t,
    resource: libc::__rlimit_resource_t,
    value: u64,
) -> io::Result<()> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe {
        if libc::prlimit(pid, resource, std::ptr::null(), &mut limit) != 0 {
            return Err(io::Error::last_os_error());
        }
        limit.rlim_cur = value as libc::rlim_t;
        if libc::prlimit(pid, resource, &limit, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
