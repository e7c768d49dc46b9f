use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, error, info, warn};

use crate::{
    compare::Precision,
    dispatch::Dispatcher,
    error::{Error, Result},
    iodata::{clean_io_path, parse_pg, parse_pg_record, pgize, pgize_record, strize_record},
    limit::Limits,
    module::{ExternalModule, GeneratedInput, ModuleRole},
    outcome::{ExecutionOutcome, ExitCode},
    problem::{SolutionEntry, TaskConfig},
    syntax::{clean_genscript, format_index},
    value::{Parameter, Value},
    verdict::{classify, format_categories, validate, Verdict, VerdictSummary},
    workspace::Workspace,
};

/// Tests generated per round of a stress run.
pub const STRESS_BATCH_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Produce the data and check every declared solution against it.
    Full,
    /// Produce the data with the main solution only.
    Produce,
    /// Look for genscripts on which the candidates of a stress disagree.
    Stress(usize),
}

/// Result of running one solution over every test.
#[derive(Debug)]
pub struct SolutionReport {
    pub outcomes: Vec<ExecutionOutcome<Value>>,
    pub verdicts: Vec<Verdict>,
    pub summary: VerdictSummary,
}

pub struct TaskForge {
    config: TaskConfig,
    dispatcher: Dispatcher,
    workspace: Workspace,
    precision: Precision,
    parameters: Arc<Vec<Parameter>>,
    generators: BTreeMap<String, ExternalModule>,
    validator: Option<ExternalModule>,
    /// One module per distinct file, however many times it is declared.
    solutions: BTreeMap<PathBuf, ExternalModule>,
}

impl TaskForge {
    pub fn new(config: TaskConfig, concurrency: NonZeroUsize) -> Result<Self> {
        let workspace = Workspace::new_in(config.directory())?;
        let precision = config.precision()?;
        let parameters = Arc::new(config.parameters.clone());

        let mut generators = BTreeMap::new();
        for name in config.generators.keys() {
            let path = config.generator_path(name)?;
            generators.insert(name.clone(), ExternalModule::new(ModuleRole::Generator, path));
        }
        let validator = config
            .validator_path()
            .map(|path| ExternalModule::new(ModuleRole::Validator, path));
        let mut solutions = BTreeMap::new();
        for entry in config.solution_entries()? {
            solutions
                .entry(entry.path.clone())
                .or_insert_with(|| ExternalModule::new(ModuleRole::Solution, entry.path));
        }

        info!("total {} concurrent tasks will run", concurrency);
        Ok(Self {
            config,
            dispatcher: Dispatcher::new(concurrency),
            workspace,
            precision,
            parameters,
            generators,
            validator,
            solutions,
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn run(&mut self, mode: Mode) -> Result<()> {
        self.prepare_modules()?;
        info!("prepared all modules");
        match mode {
            Mode::Full | Mode::Produce => self.run_regular(mode == Mode::Full),
            Mode::Stress(index) => self.run_stress(index),
        }
    }

    pub fn prepare_modules(&mut self) -> Result<()> {
        info!("preparing modules");
        let workspace = &self.workspace;
        for module in self.generators.values_mut() {
            module.prepare(workspace)?;
        }
        if let Some(validator) = self.validator.as_mut() {
            validator.prepare(workspace)?;
        }
        for module in self.solutions.values_mut() {
            module.prepare(workspace)?;
        }
        Ok(())
    }

    fn run_regular(&self, judge_all: bool) -> Result<()> {
        let inputs = self.generate_inputs(&self.config.genscripts()?)?;
        self.validate_inputs(&inputs)?;
        let answers = self.produce_answers(&inputs)?;

        if judge_all {
            let main = self.config.main_solution()?;
            for entry in self.config.solution_entries()? {
                if entry.path == main && entry.is_main_candidate() {
                    continue;
                }
                self.judge_solution(&entry, &inputs, &answers)?;
            }
        }
        info!(
            "generated all answers{}",
            if judge_all { " and validated all solutions" } else { "" }
        );

        self.write_test_data(&inputs, &answers)?;
        for input in &inputs {
            self.workspace.discard(&input.path);
        }
        info!("wrote all data into {}", self.config.io_path().display());
        Ok(())
    }

    /// Run one generator per genscript line.
    ///
    /// Every failing line is reported before the whole step fails.
    pub fn generate_inputs(&self, genscripts: &[Vec<String>]) -> Result<Vec<GeneratedInput>> {
        if genscripts.is_empty() {
            return Err(Error::Argument("there is no genscript".into()));
        }
        info!("generating {} inputs", genscripts.len());
        let limits = self.config.generator_limits();
        let mut tasks = Vec::with_capacity(genscripts.len());
        for words in genscripts {
            let (name, args) = words
                .split_first()
                .ok_or_else(|| Error::Syntax("empty genscript".into()))?;
            let generator = self
                .generators
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("generator {}", name)))?;
            tasks.push(generator.generate(&self.workspace, limits, args, self.parameters.clone())?);
        }

        let report = self.dispatcher.run_all("generation", tasks);
        info!("finished all generation in {:?}", report.total);

        let mut failed = Vec::new();
        let mut inputs = Vec::with_capacity(report.outcomes.len());
        for (i, outcome) in report.outcomes.into_iter().enumerate() {
            if outcome.exit_code() != ExitCode::Success {
                error!(
                    "generation #{} (genscript \"{}\") failed with {}: {}",
                    i + 1,
                    genscripts[i].join(" "),
                    outcome.exit_code(),
                    outcome.diagnostic().unwrap_or("")
                );
                failed.push(i);
            } else if let Some(input) = outcome.into_value() {
                inputs.push(input);
            }
        }
        if !failed.is_empty() {
            return Err(Error::Generation { failed });
        }
        // validators and solutions read the canonical line format only
        for input in &inputs {
            fs::write(&input.path, strize_record(&input.values, &self.parameters)?)?;
        }
        Ok(inputs)
    }

    pub fn validate_inputs(&self, inputs: &[GeneratedInput]) -> Result<()> {
        let validator = match &self.validator {
            Some(validator) => validator,
            None => {
                warn!("there is no validator, skipping validation");
                return Ok(());
            }
        };
        info!("validating {} inputs", inputs.len());
        let limits = self.config.validator_limits();
        let tasks = inputs
            .iter()
            .map(|input| validator.validate(&self.workspace, limits, &input.path))
            .collect::<Result<Vec<_>>>()?;

        let report = self.dispatcher.run_all("validation", tasks);
        info!("finished all validation in {:?}", report.total);

        let mut failed = Vec::new();
        for (i, outcome) in report.outcomes.iter().enumerate() {
            if outcome.exit_code() != ExitCode::Success {
                error!(
                    "validation #{} failed with {}: {}",
                    i + 1,
                    outcome.exit_code(),
                    outcome.diagnostic().unwrap_or("")
                );
                failed.push(i);
            }
        }
        if !failed.is_empty() {
            return Err(Error::Validation { failed });
        }
        Ok(())
    }

    fn solution_module(&self, path: &Path) -> Result<&ExternalModule> {
        self.solutions
            .get(path)
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    /// Run a solution over every input and classify each run.
    fn run_solution(
        &self,
        module: &ExternalModule,
        inputs: &[GeneratedInput],
        limits: Limits,
        references: Option<&[Value]>,
    ) -> Result<SolutionReport> {
        info!("starting solution {}", module.name());
        let tasks = inputs
            .iter()
            .map(|input| {
                module.solve(&self.workspace, limits, &input.path, self.config.return_shape)
            })
            .collect::<Result<Vec<_>>>()?;
        let report = self.dispatcher.run_all(module.name(), tasks);
        info!("finished solution {} in {:?}", module.name(), report.total);

        let verdicts: Vec<Verdict> = report
            .outcomes
            .iter()
            .enumerate()
            .map(|(i, outcome)| {
                classify(outcome, references.map(|r| &r[i]), self.precision)
            })
            .collect();
        let summary = VerdictSummary::new(&verdicts, &report.per_task);
        info!("{}: {}", module.name(), summary);
        debug!(
            "{} verdicts: {}",
            module.name(),
            verdicts
                .iter()
                .map(Verdict::name)
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(SolutionReport {
            outcomes: report.outcomes,
            verdicts,
            summary,
        })
    }

    /// Answers of the main solution; it has to succeed on every input.
    pub fn produce_answers(&self, inputs: &[GeneratedInput]) -> Result<Vec<Value>> {
        let main = self.config.main_solution()?;
        let module = self.solution_module(&main)?;
        info!("generating outputs with main solution {}", module.name());
        let report = self.run_solution(module, inputs, self.config.limits, None)?;
        collect_answers(report)
    }

    /// Judge a declared solution against the answers of the main solution.
    pub fn judge_solution(
        &self,
        entry: &SolutionEntry,
        inputs: &[GeneratedInput],
        answers: &[Value],
    ) -> Result<SolutionReport> {
        if inputs.len() != answers.len() {
            return Err(Error::Argument(format!(
                "{} inputs but {} answers",
                inputs.len(),
                answers.len()
            )));
        }
        let module = self.solution_module(&entry.path)?;
        let report = self.run_solution(module, inputs, self.config.limits, Some(answers))?;
        if validate(report.summary.count(), &entry.categories) {
            return Ok(report);
        }

        let mut first_diagnostic = None;
        for (i, verdict) in report.verdicts.iter().enumerate() {
            if *verdict == Verdict::AC || entry.categories.contains(verdict) {
                continue;
            }
            let outcome = &report.outcomes[i];
            let detail = match (verdict, outcome.value()) {
                (Verdict::WA, Some(produced)) => {
                    format!("Produced = {} / Expected = {}", produced, answers[i])
                }
                _ => format!(
                    "{}: {}",
                    outcome.exit_code(),
                    outcome.diagnostic().unwrap_or("")
                ),
            };
            error!(
                "solution {} produced unintended verdict {} on test #{}: {}",
                module.name(),
                verdict,
                i + 1,
                detail
            );
            first_diagnostic.get_or_insert(detail);
        }
        let observed: BTreeSet<Verdict> = report.verdicts.iter().copied().collect();
        Err(Error::WrongSolutionCategory {
            solution: module.name().to_string(),
            intended: format_categories(&entry.categories),
            observed: format_categories(&observed),
            diagnostic: first_diagnostic.unwrap_or_default(),
        })
    }

    /// Replace the IO directory's test files with the PGized data.
    pub fn write_test_data(&self, inputs: &[GeneratedInput], answers: &[Value]) -> Result<()> {
        let io_path = self.config.io_path();
        fs::create_dir_all(&io_path)?;
        clean_io_path(&io_path)?;

        info!("writing PGized input files");
        for (i, input) in inputs.iter().enumerate() {
            let path = io_path.join(format_index(&self.config.iofiles.input_syntax, i + 1));
            debug!("writing {}", path.display());
            let text = pgize_record(&input.values);
            if parse_pg_record(&text, &self.parameters)? != input.values {
                return Err(Error::Data(format!("input #{} does not survive PGizing", i + 1)));
            }
            fs::write(&path, text)?;
        }
        info!("writing PGized output files");
        for (i, answer) in answers.iter().enumerate() {
            let path = io_path.join(format_index(&self.config.iofiles.output_syntax, i + 1));
            debug!("writing {}", path.display());
            let text = pgize(answer);
            if parse_pg(&text, self.config.return_shape)? != *answer {
                return Err(Error::Data(format!("output #{} does not survive PGizing", i + 1)));
            }
            fs::write(&path, text)?;
        }
        Ok(())
    }

    /// Compare the candidates of one stress on randomized genscripts.
    ///
    /// The first candidate is the jury. Every genscript on which another
    /// candidate is not AC is collected and reported at the end of its batch.
    pub fn run_stress(&self, index: usize) -> Result<()> {
        let stress = self.config.stress(index)?;
        let words = clean_genscript(&stress.genscript, &self.config.generator_names())?
            .ok_or_else(|| Error::Config(format!("stress #{}'s genscript is commented", index + 1)))?;
        let limits = self.config.limits.with_cpu_time(stress.time_limit);
        let candidates = stress
            .candidates
            .iter()
            .map(|c| self.solution_module(&self.config.find_relative_path(c)))
            .collect::<Result<Vec<_>>>()?;
        let (jury, others) = candidates
            .split_first()
            .ok_or_else(|| Error::Config(format!("stress #{} has no candidates", index + 1)))?;

        let genscripts: Vec<Vec<String>> = (0..stress.count)
            .map(|_| {
                let mut line = words.clone();
                line.push(uuid::Uuid::new_v4().to_string());
                line
            })
            .collect();

        for (batch, chunk) in genscripts.chunks(STRESS_BATCH_SIZE).enumerate() {
            info!("running batch #{}", batch + 1);
            let inputs = self.generate_inputs(chunk)?;
            self.validate_inputs(&inputs)?;
            let answers = collect_answers(self.run_solution(jury, &inputs, limits, None)?)?;

            let mut malicious = BTreeSet::new();
            for candidate in others {
                let report = self.run_solution(candidate, &inputs, limits, Some(&answers))?;
                for (i, verdict) in report.verdicts.iter().enumerate() {
                    if *verdict != Verdict::AC {
                        malicious.insert(chunk[i].join(" "));
                    }
                }
            }
            for input in &inputs {
                self.workspace.discard(&input.path);
            }
            if !malicious.is_empty() {
                error!("malicious genscripts found");
                for genscript in &malicious {
                    error!("\"{}\" is a malicious genscript", genscript);
                }
                return Err(Error::MaliciousGenscripts(malicious.into_iter().collect()));
            }
        }
        info!("could not find any malicious genscript");
        Ok(())
    }
}

/// Values of a run that must be AC everywhere.
fn collect_answers(report: SolutionReport) -> Result<Vec<Value>> {
    let mut answers = Vec::with_capacity(report.outcomes.len());
    for (i, outcome) in report.outcomes.into_iter().enumerate() {
        if outcome.exit_code() != ExitCode::Success {
            let reason = match outcome.diagnostic() {
                Some(diagnostic) => format!("{}: {}", outcome.exit_code(), diagnostic),
                None => outcome.exit_code().to_string(),
            };
            error!("main solution failed on #{}: {}", i + 1, reason);
            return Err(Error::MainSolution { index: i, reason });
        }
        match outcome.into_value() {
            Some(value) => answers.push(value),
            None => {
                return Err(Error::MainSolution {
                    index: i,
                    reason: "no value produced".into(),
                })
            }
        }
    }
    Ok(answers)
}
