//! Olive runtime library.
//!
//! Everything a compiled olive program needs at run time and that neither
//! backend generates itself: the value representation, the primitive
//! operations both backends call, collectors, signatures, JSON conversion,
//! and the stream executor that drives a pipeline's closures over its input.
//!
//! ## Modules
//!
//! - [`value`]: Runtime values and the [`Callable`] trait for closures
//! - [`primitive`]: Operations shared by both backends
//! - [`compare`] / [`hash`]: Primitive comparisons and FNV-1a hashing
//! - [`collections`]: Comparator-ordered sets and dictionaries
//! - [`collect`]: Collector accumulators
//! - [`order`]: Type-directed order for values entering from outside
//! - [`json`]: JSON conversion directed by type
//! - [`text`]: Interpolation and regular expression binding
//! - [`signature`]: Signatures over signable fields
//! - [`context`] / [`builtins`]: Native functions and constants
//! - [`io`]: Input providers and action sinks
//! - [`plan`] / [`stream`]: Pipeline plans and their execution

pub mod builtins;
pub mod collect;
pub mod collections;
pub mod compare;
pub mod context;
pub mod error;
pub mod hash;
pub mod io;
pub mod json;
pub mod order;
pub mod plan;
pub mod primitive;
pub mod signature;
pub mod stream;
pub mod text;
pub mod value;

pub use context::RuntimeContext;
pub use error::RuntimeError;
pub use io::{ActionSink, Event, InputProvider, MemoryInput, RecordingSink};
pub use plan::PipelinePlan;
pub use primitive::Primitive;
pub use stream::{execute, RunStats};
pub use value::{Callable, Value};
