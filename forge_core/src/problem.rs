use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    compare::{Precision, DEFAULT_PRECISION},
    error::{Error, Result},
    limit::{Limits, DEFAULT_GENERATOR_TIME_LIMIT, DEFAULT_VALIDATOR_TIME_LIMIT},
    syntax::{
        check_generator_name, check_input_syntax, check_output_syntax, check_variable_name,
        clean_genscript,
    },
    value::{Parameter, Shape},
    verdict::Verdict,
};

pub const SUPPORTED_CONFIG_VERSION: f64 = 1.0;
pub const DEFAULT_IO_PATH: &str = "IO";
pub const DEFAULT_INPUT_SYNTAX: &str = "%02d.in.txt";
pub const DEFAULT_OUTPUT_SYNTAX: &str = "%02d.out.txt";
pub const DEFAULT_LOG_FILE: &str = "forge.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionConfig {
    #[serde(default)]
    pub problem: Option<f64>,
    pub config: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoFilesConfig {
    pub path: String,
    #[serde(rename = "inputsyntax")]
    pub input_syntax: String,
    #[serde(rename = "outputsyntax")]
    pub output_syntax: String,
}

impl Default for IoFilesConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_IO_PATH.into(),
            input_syntax: DEFAULT_INPUT_SYNTAX.into(),
            output_syntax: DEFAULT_OUTPUT_SYNTAX.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StressConfig {
    pub genscript: String,
    #[serde(rename = "timelimit")]
    pub time_limit: f64,
    pub count: usize,
    pub candidates: Vec<String>,
}

/// A declared solution file with the verdicts it is meant to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionEntry {
    pub path: PathBuf,
    pub categories: BTreeSet<Verdict>,
}

impl SolutionEntry {
    pub fn is_main_candidate(&self) -> bool {
        self.categories.len() == 1 && self.categories.contains(&Verdict::AC)
    }
}

fn default_precision() -> f64 {
    DEFAULT_PRECISION
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    pub version: VersionConfig,
    pub parameters: Vec<Parameter>,
    #[serde(rename = "return")]
    pub return_shape: Shape,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default = "default_precision")]
    pub precision: f64,
    /// Keys are `/`-separated verdict categories.
    pub solutions: BTreeMap<String, Vec<String>>,
    pub generators: BTreeMap<String, String>,
    pub genscript: Vec<String>,
    #[serde(default)]
    pub validator: Option<String>,
    #[serde(default)]
    pub iofiles: IoFilesConfig,
    #[serde(default)]
    pub stresses: Vec<StressConfig>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(skip)]
    path: PathBuf,
}

impl TaskConfig {
    fn from_string(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        let mut v = Self::from_string(&content)?;

        let r_path = path.canonicalize()?;
        v.path = r_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        info!("loaded task `{}` from {}", v.name, r_path.display());

        v.check_valid()?;
        Ok(v)
    }

    /// Directory the configuration was loaded from.
    pub fn directory(&self) -> &Path {
        &self.path
    }

    pub fn find_relative_path(&self, path: &str) -> PathBuf {
        self.path.join(path)
    }

    pub fn precision(&self) -> Result<Precision> {
        Precision::new(self.precision)
    }

    pub fn generator_limits(&self) -> Limits {
        self.limits.with_cpu_time(DEFAULT_GENERATOR_TIME_LIMIT)
    }

    pub fn validator_limits(&self) -> Limits {
        self.limits.with_cpu_time(DEFAULT_VALIDATOR_TIME_LIMIT)
    }

    pub fn io_path(&self) -> PathBuf {
        self.find_relative_path(&self.iofiles.path)
    }

    pub fn log_path(&self) -> PathBuf {
        self.find_relative_path(self.log.as_deref().unwrap_or(DEFAULT_LOG_FILE))
    }

    pub fn validator_path(&self) -> Option<PathBuf> {
        self.validator
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(|v| self.find_relative_path(v))
    }

    pub fn generator_names(&self) -> BTreeSet<String> {
        self.generators.keys().cloned().collect()
    }

    pub fn generator_path(&self, name: &str) -> Result<PathBuf> {
        self.generators
            .get(name)
            .map(|p| self.find_relative_path(p))
            .ok_or_else(|| Error::NotFound(format!("generator {}", name)))
    }

    /// Every declared solution, in key order then file order.
    pub fn solution_entries(&self) -> Result<Vec<SolutionEntry>> {
        let mut entries = Vec::new();
        for (key, files) in &self.solutions {
            let categories = key
                .split('/')
                .map(str::parse::<Verdict>)
                .collect::<Result<BTreeSet<_>>>()?;
            for file in files {
                entries.push(SolutionEntry {
                    path: self.find_relative_path(file),
                    categories: categories.clone(),
                });
            }
        }
        Ok(entries)
    }

    /// The first solution declared as exactly `AC`.
    pub fn main_solution(&self) -> Result<PathBuf> {
        self.solution_entries()?
            .into_iter()
            .find(SolutionEntry::is_main_candidate)
            .map(|entry| entry.path)
            .ok_or_else(|| Error::Config("there is no main AC solution".into()))
    }

    /// Non-comment genscript lines, split into words.
    pub fn genscripts(&self) -> Result<Vec<Vec<String>>> {
        let names = self.generator_names();
        let mut genscripts = Vec::new();
        for line in &self.genscript {
            if let Some(words) = clean_genscript(line, &names)? {
                genscripts.push(words);
            }
        }
        Ok(genscripts)
    }

    pub fn stress(&self, index: usize) -> Result<&StressConfig> {
        self.stresses.get(index).ok_or_else(|| {
            Error::Argument(format!(
                "stress #{} does not exist, {} declared",
                index + 1,
                self.stresses.len()
            ))
        })
    }

    fn check_valid(&self) -> Result<()> {
        debug!("validating config version");
        if self.version.config < SUPPORTED_CONFIG_VERSION {
            return Err(Error::Version(format!(
                "config version {} is older than supported {}",
                self.version.config, SUPPORTED_CONFIG_VERSION
            )));
        } else if self.version.config > SUPPORTED_CONFIG_VERSION {
            warn!(
                "config version {} is newer than supported {}",
                self.version.config, SUPPORTED_CONFIG_VERSION
            );
        }

        debug!("validating limits");
        self.limits.check_valid()?;
        if self.limits.cpu_time < 1.0 {
            warn!("too low time limit {}s", self.limits.cpu_time);
        }
        if self.limits.memory < 256.0 {
            warn!("too low memory limit {}MB", self.limits.memory);
        }
        self.precision()?;

        debug!("validating parameters");
        let mut names = BTreeSet::new();
        for param in &self.parameters {
            check_variable_name(&param.name)?;
            if !names.insert(param.name.as_str()) {
                return Err(Error::Config(format!(
                    "parameter `{}` occurred multiple times",
                    param.name
                )));
            }
            param.shape.check_valid()?;
        }
        self.return_shape.check_valid()?;

        debug!("validating io files");
        check_input_syntax(&self.iofiles.input_syntax)?;
        check_output_syntax(&self.iofiles.output_syntax)?;
        let io_path = self.io_path();
        if io_path.is_dir() && fs::read_dir(&io_path)?.next().is_some() {
            warn!("io path {} is not empty", io_path.display());
        }

        debug!("validating solutions");
        let entries = self.solution_entries()?;
        for entry in &entries {
            if !entry.path.is_file() {
                return Err(Error::NotFound(entry.path.display().to_string()));
            }
        }
        self.main_solution()?;

        debug!("validating generators");
        if self.generators.is_empty() {
            return Err(Error::Config("there is no generator registered".into()));
        }
        for name in self.generators.keys() {
            check_generator_name(name)?;
            let path = self.generator_path(name)?;
            if !path.is_file() {
                return Err(Error::NotFound(path.display().to_string()));
            }
        }

        debug!("validating genscript");
        if self.genscripts()?.is_empty() {
            return Err(Error::Config("there is no non-commented genscript".into()));
        }

        debug!("validating validator");
        match self.validator_path() {
            Some(path) if !path.is_file() => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            Some(_) => {}
            None => warn!("there is no validator"),
        }

        debug!("validating stresses");
        let declared: BTreeSet<PathBuf> = entries.into_iter().map(|e| e.path).collect();
        let names = self.generator_names();
        for (i, stress) in self.stresses.iter().enumerate() {
            if clean_genscript(&stress.genscript, &names)?.is_none() {
                return Err(Error::Config(format!("stress #{}'s genscript is commented", i + 1)));
            }
            if !(stress.time_limit > 0.0) || !stress.time_limit.is_finite() {
                return Err(Error::Config(format!(
                    "stress #{}'s time limit is {}",
                    i + 1,
                    stress.time_limit
                )));
            }
            if stress.candidates.len() < 2 {
                return Err(Error::Config(format!(
                    "there are less than 2 candidates in stress #{}",
                    i + 1
                )));
            }
            for candidate in &stress.candidates {
                let path = self.find_relative_path(candidate);
                if !path.is_file() {
                    return Err(Error::NotFound(path.display().to_string()));
                }
                if !declared.contains(&path) {
                    return Err(Error::Config(format!(
                        "candidate `{}` of stress #{} is not a declared solution",
                        candidate,
                        i + 1
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Configuration written by `init`; every path in it still has to be filled.
pub const STARTER_CONFIG: &str = r#"name: none
author: unknown
version: { problem: 1.0, config: 1.0 }
parameters:
  - { name: a, type: int, dimension: 0 }
return: { type: int, dimension: 0 }
limits: { time: 5.0, memory: 1024 }
precision: 1.0e-6
solutions:
  AC: [solution.py]
generators:
  manual: generator.py
genscript:
  - "manual 1"
validator: validator.py
iofiles: { path: IO, inputsyntax: "%02d.in.txt", outputsyntax: "%02d.out.txt" }
stresses: []
"#;

/// Write [`STARTER_CONFIG`] as `task.yaml` into `dir`, never overwriting.
pub fn init_task_directory(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("task.yaml");
    if path.exists() {
        return Err(Error::Argument(format!(
            "{} already exists",
            path.display()
        )));
    }
    fs::write(&path, STARTER_CONFIG)?;
    Ok(path)
}
