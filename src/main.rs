use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process,
    sync::{Arc, Mutex},
};

use clap::{Args, Parser, Subcommand};
use env_logger::{Env, Target};
use forge_core::{
    dispatch::available_concurrency,
    error::{Error, Result},
    problem::{init_task_directory, TaskConfig},
    Mode, TaskForge,
};
use log::{error, info};

#[derive(Parser)]
#[clap(
    version = "0.1.0",
    name = "Iron Forge",
    author = "Kanari",
    about = "Produce and verify test data of a task with its generators, validator and solutions."
)]
struct Opts {
    #[clap(short, long, global = true, help = "maximum number of modules running at once")]
    jobs: Option<NonZeroUsize>,
    #[clap(short, long, global = true, help = "print debug logs")]
    verbose: bool,
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    #[clap(about = "Produce the data and check every declared solution")]
    Full(TaskArgs),
    #[clap(about = "Produce the data with the main solution only")]
    Produce(TaskArgs),
    #[clap(about = "Search for genscripts the stress candidates disagree on")]
    Stress(StressArgs),
    #[clap(about = "Write a starter task.yaml")]
    Init(InitArgs),
}

#[derive(Args, Debug)]
struct TaskArgs {
    #[clap(help = "path of task.yaml")]
    config: PathBuf,
}

#[derive(Args, Debug)]
struct StressArgs {
    #[clap(help = "path of task.yaml")]
    config: PathBuf,
    #[clap(short, long, default_value = "1", help = "1-based index of the stress")]
    index: usize,
}

#[derive(Args, Debug)]
struct InitArgs {
    #[clap(help = "directory of the new task")]
    dir: PathBuf,
}

/// Copies every log record into the task's log file once it is known.
#[derive(Clone, Default)]
struct LogTee {
    file: Arc<Mutex<Option<File>>>,
}

impl LogTee {
    fn attach(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
        Ok(())
    }
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn init_logger(verbose: bool, tee: LogTee) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .target(Target::Pipe(Box::new(tee)))
        .init();
}

fn load_task(config: &Path, tee: &LogTee) -> Result<TaskConfig> {
    let config = TaskConfig::from_file(config)?;
    tee.attach(&config.log_path())?;
    Ok(config)
}

fn execute(opts: Opts, tee: &LogTee) -> Result<()> {
    let concurrency = opts.jobs.unwrap_or_else(available_concurrency);
    let (config, mode) = match opts.subcmd {
        SubCommand::Init(args) => {
            let path = init_task_directory(&args.dir)?;
            info!("wrote {}", path.display());
            return Ok(());
        }
        SubCommand::Full(args) => (load_task(&args.config, tee)?, Mode::Full),
        SubCommand::Produce(args) => (load_task(&args.config, tee)?, Mode::Produce),
        SubCommand::Stress(args) => {
            if args.index == 0 {
                return Err(Error::Argument("stress index starts from 1".into()));
            }
            (load_task(&args.config, tee)?, Mode::Stress(args.index - 1))
        }
    };
    info!("running task `{}` in {:?} mode", config.name, mode);
    TaskForge::new(config, concurrency)?.run(mode)
}

fn main() {
    let opts = Opts::parse();
    let tee = LogTee::default();
    init_logger(opts.verbose, tee.clone());

    if let Err(err) = execute(opts, &tee) {
        error!("{}", err);
        match &err {
            Error::Compile { log, .. } => error!("compiler output:\n{}", log),
            Error::WrongSolutionCategory { diagnostic, .. } if !diagnostic.is_empty() => {
                error!("first unintended outcome: {}", diagnostic)
            }
            _ => {}
        }
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            error!("caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}
