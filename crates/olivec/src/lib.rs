//! The olive compiler driver.
//!
//! Programs arrive as the JSON form of the front end's AST. A registry and
//! runtime values come from `olive.toml` (see [`config`]); [`driver`] ties
//! checking, code generation and running together for the `olivec` binary.

pub mod config;
pub mod driver;
pub mod sink;

pub use config::{Config, ConfigError};
pub use driver::{load_program, report, Session, Summary};
pub use sink::EventPrinter;
