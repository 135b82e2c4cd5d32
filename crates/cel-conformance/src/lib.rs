//! Conformance fixture interface for the CEL evaluator.
//!
//! This crate speaks the external test-oracle shape: JSON test cases
//! pairing expressions with expected values or errors. It loads fixture
//! data, translates between the fixture encoding and runtime values, and
//! runs cases in-process. The network conformance service and the
//! file-walking harness live outside this workspace.

mod fixture;
mod runner;

pub use fixture::{
    load_cases, to_runtime, from_runtime, Binding, EnumEntry, ErrorInfo, ErrorSet, FixtureError,
    FixtureValue, Integer64, ListValue, MapEntry, MapValue, TestCase, Unsigned64,
};
pub use runner::{run_case, run_suite, values_match, CaseResult, SuiteReport};
