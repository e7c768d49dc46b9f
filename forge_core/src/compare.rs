use crate::{
    error::{Error, Result},
    value::{Value, MAX_DIMENSION},
};

pub const DEFAULT_PRECISION: f64 = 1e-6;

/// Tolerance used to compare floating values; always positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Precision(f64);

impl Precision {
    pub fn new(precision: f64) -> Result<Self> {
        if precision > 0.0 && precision.is_finite() {
            Ok(Self(precision))
        } else {
            Err(Error::Config(format!(
                "float precision must be positive, got {}",
                precision
            )))
        }
    }

    pub fn get(&self) -> f64 {
        self.0
    }

    /// Compare `produced` against the reference `answer`.
    ///
    /// Absolute tolerance always applies; relative tolerance only once
    /// `|answer|` exceeds `precision²`.
    pub fn float_eq(&self, answer: f64, produced: f64) -> bool {
        let p = self.0;
        let diff = (answer - produced).abs();
        if answer.abs() <= p * p {
            diff <= p
        } else {
            diff <= p || (diff / answer.abs()) <= p
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self(DEFAULT_PRECISION)
    }
}

pub trait ComparisionMode {
    fn compare(&self, answer: &Value, produced: &Value) -> bool;
}

/// Structural equality: sequences pairwise, floats with [`Precision`],
/// everything else exactly.
pub struct ValueCompare {
    precision: Precision,
}

impl ValueCompare {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }

    fn compare_nested(&self, answer: &Value, produced: &Value, depth: usize) -> bool {
        match (answer, produced) {
            (Value::List(a), Value::List(b)) => {
                depth < MAX_DIMENSION
                    && a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| self.compare_nested(x, y, depth + 1))
            }
            (Value::Float(a), Value::Float(b)) => self.precision.float_eq(*a, *b),
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl ComparisionMode for ValueCompare {
    fn compare(&self, answer: &Value, produced: &Value) -> bool {
        self.compare_nested(answer, produced, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[i64]) -> Value {
        Value::List(xs.iter().map(|x| Value::Int(*x)).collect())
    }

    #[test]
    fn non_positive_precision_is_config_error() {
        assert!(matches!(Precision::new(0.0), Err(Error::Config(_))));
        assert!(matches!(Precision::new(-1e-6), Err(Error::Config(_))));
        assert!(Precision::new(1e-9).is_ok());
    }

    #[test]
    fn float_reflexive() -> Result<()> {
        for p in [1e-12, 1e-6, 0.5, 10.0] {
            let p = Precision::new(p)?;
            for x in [0.0, -0.0, 1e-30, 3.5, -123456.789, 1e300] {
                assert!(p.float_eq(x, x));
            }
        }
        Ok(())
    }

    #[test]
    fn float_tolerance() -> Result<()> {
        let p = Precision::new(1e-6)?;
        for a in [1.5, -2.25, 7.0] {
            let step = 1e-6 * f64::abs(a);
            assert!(p.float_eq(a, a + 0.5 * step));
            assert!(!p.float_eq(a, a + 10.0 * step));
        }
        // absolute tolerance near zero
        assert!(p.float_eq(0.0, 9e-7));
        assert!(!p.float_eq(0.0, 2e-6));
        // relative tolerance far from zero
        assert!(p.float_eq(1e9, 1e9 + 500.0));
        assert!(!p.float_eq(1e9, 1e9 + 5000.0));
        Ok(())
    }

    #[test]
    fn nested_arrays() {
        let compare = ValueCompare::new(Precision::default());
        let a = Value::List(vec![ints(&[1, 2]), ints(&[3])]);
        assert!(compare.compare(&a, &a.clone()));
        let short = Value::List(vec![ints(&[1, 2])]);
        let long = Value::List(vec![ints(&[1, 2, 9])]);
        assert!(!compare.compare(&short, &long));
        assert!(!compare.compare(&ints(&[1]), &Value::Int(1)));
    }

    #[test]
    fn scalars_exact() {
        let compare = ValueCompare::new(Precision::default());
        assert!(compare.compare(&Value::Str("ab".into()), &Value::Str("ab".into())));
        assert!(!compare.compare(&Value::Str("ab".into()), &Value::Str("aB".into())));
        assert!(!compare.compare(&Value::Bool(true), &Value::Bool(false)));
        assert!(!compare.compare(&Value::Int(6), &Value::Int(7)));
        assert!(compare.compare(
            &Value::List(vec![Value::Float(0.1 + 0.2)]),
            &Value::List(vec![Value::Float(0.3)])
        ));
    }
}
