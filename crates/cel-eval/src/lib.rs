//! CEL runtime: value model, dispatch table, and tree-walking evaluator.
//!
//! The crate consumes the macro-expanded AST from `cel-parser` and
//! evaluates it against an [`Activation`]. Evaluation is single-threaded,
//! synchronous, and deterministic; the AST and registries are immutable and
//! safely shared across concurrent evaluations of different activations.
//!
//! # Quick start
//!
//! ```
//! use cel_eval::{Env, MapActivation, Value};
//!
//! let env = Env::with_standard_library();
//! let program = env.program("x + 1").unwrap();
//!
//! let mut activation = MapActivation::new();
//! activation.insert("x", 41i64);
//!
//! assert_eq!(program.eval(&activation), Value::Int(42));
//! ```

mod activation;
mod env;
mod error;
mod evaluator;
mod functions;
mod numeric;
mod proto;
mod stdlib;
mod time;
mod value;

pub mod ext;

pub use activation::{Activation, EmptyActivation, HierarchicalActivation, MapActivation};
pub use env::{Env, Program};
pub use error::{EvalError, EvalErrorKind};
pub use evaluator::{Evaluator, StepBudget};
pub use functions::{Function, FunctionImpl, FunctionRegistry, Overload};
pub use proto::{EnumValue, ProtoMessage, ProtoRegistry};
pub use stdlib::standard_functions;
pub use time::{format_duration, format_timestamp, parse_duration, parse_timestamp};
pub use value::{
    Duration, Kind, MapKey, OptionalValue, Timestamp, TypeValue, Value, ValueMap,
};
