//! Olive type checker: resolution, type inference and purity tracking.
//!
//! Turns the front end's [`olive_syntax::Program`] into a
//! [`CheckedProgram`] of typed pipelines, or a list of [`CompileError`]s.
//! Resolution and type checking are interleaved: names are resolved
//! against the environment of the stage they appear in, and each node is
//! typed as soon as it is resolved.
//!
//! # Architecture
//!
//! - [`ty`]: Structural types and their predicates
//! - [`unify`]: Least common type of two types
//! - [`descriptor`]: Compact textual encoding of types
//! - [`env`]: Immutable name environments with flavours
//! - [`purity`]: Signature provenance state machine
//! - [`definitions`]: The registry of formats, functions, actions and constants
//! - [`tir`]: Typed expression tree
//! - [`ir`]: Checked pipelines and record layouts
//! - [`infer`]: Expression resolution and typing
//! - [`clause`]: Stage-by-stage checking of one olive
//! - [`check`]: Whole-program entry point
//! - [`exhaustiveness`]: Coverage of `Match` and `Switch`
//! - [`error`] / [`diagnostics`]: Errors and their rendering

pub mod check;
pub mod clause;
pub mod definitions;
pub mod descriptor;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod exhaustiveness;
pub mod infer;
pub mod ir;
pub mod purity;
pub mod tir;
pub mod ty;
pub mod unify;

pub use check::{check, check_with_sink, TypeckResult};
pub use definitions::{Definitions, StaticDefinitions};
pub use error::CompileError;
pub use ir::CheckedProgram;
pub use ty::Type;
