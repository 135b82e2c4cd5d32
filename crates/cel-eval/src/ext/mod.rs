//! Extension libraries.
//!
//! Each extension is an independent set of functions registered on top of
//! the standard library. The optionals extension additionally relies on
//! the `optMap`/`optFlatMap` parser macros and on optional-chaining
//! support in the evaluator.

pub mod encoders;
pub mod lists;
pub mod math;
pub mod optionals;
pub mod strings;
