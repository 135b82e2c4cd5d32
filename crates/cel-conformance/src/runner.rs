//! In-process conformance runner: parse, evaluate, diff.

use cel_eval::{Env, MapActivation, Value};

use crate::fixture::{self, FixtureError, TestCase};

/// Outcome of a single case.
#[derive(Debug)]
pub struct CaseResult {
    pub name: String,
    pub failure: Option<String>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Aggregate outcome of a case list.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failures(&self) -> Vec<&CaseResult> {
        self.results.iter().filter(|r| !r.passed()).collect()
    }

    /// Panic with a readable summary if any case failed. Intended for use
    /// from test functions.
    pub fn assert_all_passed(&self) {
        let failures = self.failures();
        if !failures.is_empty() {
            let details: Vec<String> = failures
                .iter()
                .map(|f| format!("  {}: {}", f.name, f.failure.as_deref().unwrap_or("?")))
                .collect();
            panic!(
                "{}/{} conformance cases passed, {} failures:\n{}",
                self.passed(),
                self.results.len(),
                failures.len(),
                details.join("\n")
            );
        }
    }
}

fn case_env(case: &TestCase) -> Env {
    let mut env = Env::with_standard_library().with_all_extensions();
    if let Some(container) = &case.container {
        env = env.with_container(container.clone());
    }
    env
}

/// Run a single case against a fresh environment.
pub fn run_case(case: &TestCase) -> CaseResult {
    let failure = run_case_inner(case).err();
    CaseResult {
        name: case.name.clone(),
        failure,
    }
}

fn run_case_inner(case: &TestCase) -> Result<(), String> {
    let env = case_env(case);
    let program = env
        .program(&case.expr)
        .map_err(|e| format!("parse failed: {}", e))?;

    let mut activation = MapActivation::new();
    for (name, binding) in &case.bindings {
        let value = fixture::to_runtime(&binding.value)
            .map_err(|e| format!("bad binding '{}': {}", name, e))?;
        activation.insert(name.clone(), value);
    }

    let actual = program.eval(&activation);

    match (&case.value, &case.eval_error) {
        (Some(expected), _) => {
            if actual.is_error() {
                return Err(format!("expected a value, got error: {}", actual));
            }
            let expected = fixture::to_runtime(expected)
                .map_err(|e| format!("bad expectation: {}", e))?;
            if values_match(&actual, &expected) {
                Ok(())
            } else {
                Err(format!("expected {}, got {}", expected, actual))
            }
        }
        (None, Some(errors)) => {
            if errors.errors.is_empty() {
                return Err("empty error set in expectation".to_string());
            }
            if actual.is_error() {
                Ok(())
            } else {
                Err(format!("expected an error, got {}", actual))
            }
        }
        // A case with no matcher defaults to expecting `true`.
        (None, None) => {
            if values_match(&actual, &Value::Bool(true)) {
                Ok(())
            } else {
                Err(format!("expected true, got {}", actual))
            }
        }
    }
}

/// Run every case in a fixture JSON document.
pub fn run_suite(json: &str) -> Result<SuiteReport, FixtureError> {
    let cases = fixture::load_cases(json)?;
    Ok(SuiteReport {
        results: cases.iter().map(run_case).collect(),
    })
}

/// Result comparison: same kind and equal content, with NaN matching NaN.
/// Unlike CEL's own `==`, an `int64Value` expectation does not accept a
/// uint result.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Double(a), Value::Double(e)) => {
            (a.is_nan() && e.is_nan()) || a == e
        }
        (Value::List(a), Value::List(e)) => {
            a.len() == e.len() && a.iter().zip(e.iter()).all(|(x, y)| values_match(x, y))
        }
        (Value::Map(a), Value::Map(e)) => {
            a.len() == e.len()
                && e.iter().all(|(key, ev)| {
                    a.get(key).is_some_and(|av| values_match(av, ev))
                })
        }
        _ => actual == expected,
    }
}
