//! The contract between the lowering driver and a code generator.
//!
//! [`crate::lower`] walks a checked program once and describes it through
//! this trait; each backend decides what a piece of code is. Code values are
//! detached: a backend builds them bottom-up and the driver hands them back
//! as operands, so an operand may be generated before the scope that uses it
//! is opened.
//!
//! Scopes nest strictly. [`Backend::define_local`] opens a scope for one
//! name before its body is generated, and [`Backend::bind_local`] closes the
//! innermost one once the body exists. Functions and closures nest the same
//! way around their bodies.

use std::fmt;

use olive_rt::Primitive;
use olive_typeck::ir::RecordShape;
use olive_typeck::tir::{CompareOp, Literal};
use olive_typeck::Type;

use crate::artifact::ProgramMeta;
use crate::error::InternalError;

pub trait Backend {
    type Code: Clone + fmt::Debug;
    type Output;

    // ── Scopes ─────────────────────────────────────────────────────────

    /// Open a scope holding `name`.
    fn define_local(&mut self, name: &str);

    /// Close the scope of `name`: evaluate `value`, then `body` with `name`
    /// bound to it.
    fn bind_local(
        &mut self,
        name: &str,
        value: Self::Code,
        body: Self::Code,
    ) -> Result<Self::Code, InternalError>;

    /// Whether `name` is a local, parameter or capture of the function being
    /// generated.
    fn has_local(&self, name: &str) -> bool;

    fn load_named(&mut self, name: &str) -> Result<Self::Code, InternalError>;

    /// Read a registry constant from the runtime context.
    fn load_constant(&mut self, name: &str) -> Self::Code;

    // ── Functions and closures ─────────────────────────────────────────

    /// Start a named top-level function.
    fn begin_function(&mut self, name: &str, parameters: &[String]);

    fn end_function(&mut self, body: Self::Code) -> Result<(), InternalError>;

    /// Start an anonymous function whose body sees only `captures` and
    /// `parameters`.
    fn begin_closure(&mut self, parameters: &[String], captures: &[String]);

    /// Finish the innermost closure. `captures` are generated in the
    /// enclosing function, one per captured name, and copied into the
    /// closure when it is built.
    fn end_closure(
        &mut self,
        body: Self::Code,
        captures: Vec<Self::Code>,
    ) -> Result<Self::Code, InternalError>;

    // ── Optional lifting ───────────────────────────────────────────────

    /// Open the scopes of an optional block's captured names.
    fn begin_lift(&mut self, names: &[String]) {
        for name in names {
            self.define_local(&lift_temporary(name));
            self.define_local(name);
        }
    }

    /// Evaluate each capture in order; as soon as one is empty the block is
    /// empty and the rest, body included, never run. Otherwise the body runs
    /// once with every name bound to its capture's contents. `wrap` puts the
    /// body's result in an optional.
    fn end_lift(
        &mut self,
        captures: Vec<(String, Self::Code)>,
        body: Self::Code,
        wrap: bool,
    ) -> Result<Self::Code, InternalError> {
        let mut code = if wrap { self.some(body) } else { body };
        for (name, capture) in captures.into_iter().rev() {
            let temporary = lift_temporary(&name);
            let contents = self.load_named(&temporary)?;
            let contents = self.unwrap(contents);
            let present = self.bind_local(&name, contents, code)?;
            let test = self.load_named(&temporary)?;
            let test = self.is_present(test);
            let empty = self.none();
            let guarded = self.if_else(test, present, empty);
            code = self.bind_local(&temporary, capture, guarded)?;
        }
        Ok(code)
    }

    // ── Type-directed operations ───────────────────────────────────────

    /// -1, 0 or 1.
    fn compare(&mut self, ty: &Type, left: Self::Code, right: Self::Code) -> Self::Code;

    fn equal(&mut self, ty: &Type, left: Self::Code, right: Self::Code) -> Self::Code;

    fn hash(&mut self, ty: &Type, value: Self::Code) -> Self::Code;

    /// A two-argument closure doing [`Backend::compare`].
    fn comparator(&mut self, ty: &Type) -> Self::Code;

    /// A two-argument closure doing [`Backend::equal`].
    fn equality(&mut self, ty: &Type) -> Self::Code;

    /// A one-argument closure doing [`Backend::hash`].
    fn hasher(&mut self, ty: &Type) -> Self::Code;

    /// A two-argument closure comparing records by their discriminators
    /// only.
    fn structural_equals(&mut self, shape: &RecordShape) -> Self::Code;

    /// A one-argument closure hashing a record's discriminators only.
    fn structural_hash_code(&mut self, shape: &RecordShape) -> Self::Code;

    // ── Values ─────────────────────────────────────────────────────────

    fn unit(&mut self) -> Self::Code;

    fn literal(&mut self, literal: &Literal) -> Self::Code;

    fn tuple(&mut self, items: Vec<Self::Code>) -> Self::Code;

    fn tuple_get(&mut self, tuple: Self::Code, index: usize) -> Self::Code;

    fn algebraic(&mut self, tag: &str, payload: Vec<Self::Code>) -> Self::Code;

    /// The tag of an algebraic value, as a string.
    fn algebraic_tag(&mut self, value: Self::Code) -> Self::Code;

    fn algebraic_get(&mut self, value: Self::Code, index: usize) -> Self::Code;

    fn some(&mut self, value: Self::Code) -> Self::Code;

    fn none(&mut self) -> Self::Code;

    fn is_present(&mut self, value: Self::Code) -> Self::Code;

    fn unwrap(&mut self, value: Self::Code) -> Self::Code;

    fn not(&mut self, value: Self::Code) -> Self::Code;

    /// Test the result of a comparison.
    fn ordering(&mut self, op: CompareOp, compared: Self::Code) -> Self::Code;

    fn if_else(
        &mut self,
        condition: Self::Code,
        then: Self::Code,
        otherwise: Self::Code,
    ) -> Self::Code;

    // ── Calls ──────────────────────────────────────────────────────────

    fn call_native(&mut self, name: &str, arguments: Vec<Self::Code>) -> Self::Code;

    /// Call a program function generated earlier.
    fn call_program(
        &mut self,
        name: &str,
        arguments: Vec<Self::Code>,
    ) -> Result<Self::Code, InternalError>;

    fn primitive(&mut self, primitive: Primitive, arguments: Vec<Self::Code>) -> Self::Code;

    // ── Output ─────────────────────────────────────────────────────────

    /// Package everything generated into the final artifact.
    fn finish(self, meta: ProgramMeta) -> Result<Self::Output, InternalError>;
}

/// Local holding a lifted capture before it is known to be present.
pub fn lift_temporary(name: &str) -> String {
    format!("{name}?")
}
