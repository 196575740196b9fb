//! Syntax tree for olive programs.
//!
//! The grammar and parser live in the language front end; the compiler only
//! consumes the tree it produces. Every node is plain data that round-trips
//! through serde, so a front end in any process can hand a program over as
//! JSON.
//!
//! - [`ast`]: programs, olives, clauses, expressions, collectors.
//! - [`build`]: terse constructors for assembling trees in code and tests.
//! - [`suffix`]: numeric size and time suffixes folded into literals.

pub mod ast;
pub mod build;
pub mod suffix;

pub use ast::*;
