use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    time::Duration,
};

use crate::{
    compare::{ComparisionMode, Precision, ValueCompare},
    error::{Error, Result},
    outcome::{ExecutionOutcome, ExitCode},
    value::Value,
};

/// Ordered only so reports are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verdict {
    AC,
    WA,
    TLE,
    MLE,
    FAIL,
}

pub const ALL_VERDICTS: [Verdict; 5] = [
    Verdict::AC,
    Verdict::WA,
    Verdict::TLE,
    Verdict::MLE,
    Verdict::FAIL,
];

impl Verdict {
    pub fn name(&self) -> &'static str {
        match self {
            Verdict::AC => "AC",
            Verdict::WA => "WA",
            Verdict::TLE => "TLE",
            Verdict::MLE => "MLE",
            Verdict::FAIL => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Verdict {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        ALL_VERDICTS
            .iter()
            .copied()
            .find(|v| v.name() == upper)
            .ok_or_else(|| Error::Config(format!("invalid solution category `{}`", s)))
    }
}

/// Turn one finished solution run into a verdict.
///
/// Without a reference (judging the main solution itself) every success is AC.
pub fn classify(
    outcome: &ExecutionOutcome<Value>,
    reference: Option<&Value>,
    precision: Precision,
) -> Verdict {
    match outcome.exit_code() {
        ExitCode::Success => {}
        ExitCode::TimeLimitExceeded => return Verdict::TLE,
        ExitCode::MemoryLimitExceeded => return Verdict::MLE,
        _ => return Verdict::FAIL,
    }
    match (reference, outcome.value()) {
        (None, _) => Verdict::AC,
        (Some(answer), Some(produced)) => {
            if ValueCompare::new(precision).compare(answer, produced) {
                Verdict::AC
            } else {
                Verdict::WA
            }
        }
        (Some(_), None) => Verdict::FAIL,
    }
}

pub type VerdictCount = BTreeMap<Verdict, usize>;

pub fn count_verdicts(verdicts: &[Verdict]) -> VerdictCount {
    let mut count = VerdictCount::new();
    for v in verdicts {
        *count.entry(*v).or_insert(0) += 1;
    }
    count
}

/// Decide whether observed verdicts agree with the declared categories.
///
/// Every observed category must be intended, AC excepted, and at least one
/// intended category must actually be observed.
pub fn validate(observed: &VerdictCount, intended: &BTreeSet<Verdict>) -> bool {
    let mut feasible = BTreeSet::new();
    for (verdict, count) in observed {
        if *count == 0 {
            continue;
        }
        if intended.contains(verdict) {
            feasible.insert(*verdict);
        } else if *verdict != Verdict::AC {
            return false;
        }
    }
    !feasible.is_empty()
}

pub fn format_categories(categories: &BTreeSet<Verdict>) -> String {
    categories
        .iter()
        .map(Verdict::name)
        .collect::<Vec<_>>()
        .join("/")
}

/// Verdict shares and a timing distribution of one solution over a test batch.
#[derive(Debug, Clone)]
pub struct VerdictSummary {
    total: usize,
    count: VerdictCount,
    /// Minimum, three quartiles and maximum; empty with fewer than two samples.
    quantiles: Vec<Duration>,
}

impl VerdictSummary {
    pub fn new(verdicts: &[Verdict], durations: &[Duration]) -> Self {
        Self {
            total: verdicts.len(),
            count: count_verdicts(verdicts),
            quantiles: quartiles(durations),
        }
    }

    pub fn count(&self) -> &VerdictCount {
        &self.count
    }

    pub fn share(&self, verdict: Verdict) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.count.get(&verdict).copied().unwrap_or(0) as f64 / self.total as f64
    }

    pub fn quantiles(&self) -> &[Duration] {
        &self.quantiles
    }
}

impl fmt::Display for VerdictSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shares: Vec<String> = ALL_VERDICTS
            .iter()
            .map(|v| format!("{} {:.4}%", v, self.share(*v)))
            .collect();
        write!(f, "{}", shares.join(" / "))?;
        if !self.quantiles.is_empty() {
            let qs: Vec<String> = self
                .quantiles
                .iter()
                .enumerate()
                .map(|(i, q)| format!("Q{} {:.3}s", i, q.as_secs_f64()))
                .collect();
            write!(f, "; DT {}", qs.join(" / "))?;
        }
        Ok(())
    }
}

/// Exclusive-method quartiles with the extremes attached.
fn quartiles(durations: &[Duration]) -> Vec<Duration> {
    if durations.len() < 2 {
        return Vec::new();
    }
    let mut sorted = durations.to_vec();
    sorted.sort();
    let n = sorted.len();
    let mut result = vec![sorted[0]];
    for i in 1..4 {
        let m = i as f64 * (n + 1) as f64 / 4.0;
        let j = (m.floor() as usize).clamp(1, n - 1);
        let delta = (m - j as f64).clamp(0.0, 1.0);
        let lo = sorted[j - 1].as_secs_f64();
        let hi = sorted[j].as_secs_f64();
        result.push(Duration::from_secs_f64(lo + (hi - lo) * delta));
    }
    result.push(sorted[n - 1]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(pairs: &[(Verdict, usize)]) -> VerdictCount {
        pairs.iter().copied().collect()
    }

    fn intended(vs: &[Verdict]) -> BTreeSet<Verdict> {
        vs.iter().copied().collect()
    }

    #[test]
    fn aggregation_policy() {
        use Verdict::*;
        assert!(validate(&observed(&[(AC, 5)]), &intended(&[AC])));
        assert!(!validate(&observed(&[(AC, 5)]), &intended(&[WA])));
        assert!(validate(&observed(&[(AC, 3), (WA, 2)]), &intended(&[WA])));
        assert!(!validate(&observed(&[(AC, 5), (FAIL, 1)]), &intended(&[WA])));
        assert!(!validate(&observed(&[(AC, 4), (WA, 1)]), &intended(&[AC])));
        assert!(validate(&observed(&[(TLE, 1), (WA, 0)]), &intended(&[TLE, WA])));
        assert!(!validate(&observed(&[]), &intended(&[AC])));
        assert!(!validate(&observed(&[(WA, 0)]), &intended(&[WA])));
    }

    #[test]
    fn classify_exit_codes() {
        let p = Precision::default();
        let tle = ExecutionOutcome::failure(ExitCode::TimeLimitExceeded, "");
        let mle = ExecutionOutcome::failure(ExitCode::MemoryLimitExceeded, "");
        let io = ExecutionOutcome::failure(ExitCode::IOFailure, "disk");
        let killed = ExecutionOutcome::failure(ExitCode::Killed, "ceiling");
        assert_eq!(classify(&tle, Some(&Value::Int(1)), p), Verdict::TLE);
        assert_eq!(classify(&mle, None, p), Verdict::MLE);
        assert_eq!(classify(&io, None, p), Verdict::FAIL);
        assert_eq!(classify(&killed, Some(&Value::Int(1)), p), Verdict::FAIL);
    }

    #[test]
    fn classify_against_reference() {
        let p = Precision::default();
        let six = ExecutionOutcome::success(Value::Int(6), None);
        let seven = ExecutionOutcome::success(Value::Int(7), None);
        assert_eq!(classify(&six, Some(&Value::Int(6)), p), Verdict::AC);
        assert_eq!(classify(&seven, Some(&Value::Int(6)), p), Verdict::WA);
        assert_eq!(classify(&seven, None, p), Verdict::AC);
    }

    #[test]
    fn category_names() -> Result<()> {
        assert_eq!("wa".parse::<Verdict>()?, Verdict::WA);
        assert_eq!(" TLE ".parse::<Verdict>()?, Verdict::TLE);
        assert!("RE".parse::<Verdict>().is_err());
        Ok(())
    }

    #[test]
    fn summary_shares_and_quartiles() {
        let verdicts = [Verdict::AC, Verdict::AC, Verdict::WA, Verdict::TLE];
        let durations: Vec<Duration> = [1, 2, 3, 4, 5, 6, 7]
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect();
        let summary = VerdictSummary::new(&verdicts, &durations);
        assert_eq!(summary.share(Verdict::AC), 50.0);
        assert_eq!(summary.share(Verdict::MLE), 0.0);
        let qs: Vec<f64> = summary.quantiles().iter().map(|d| d.as_secs_f64()).collect();
        assert_eq!(qs, vec![1.0, 2.0, 4.0, 6.0, 7.0]);
        assert!(VerdictSummary::new(&verdicts, &durations[..1]).quantiles().is_empty());
    }
}
