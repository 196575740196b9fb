//! Code generation for the text backend.
//!
//! Unlike the stack machine, the script carries its own comparison and
//! hashing: every type the program orders or hashes gets `compare:`,
//! `equal:` and `hash:` helper functions named after its descriptor.

use std::collections::BTreeMap;

use olive_rt::Primitive;
use olive_typeck::ir::RecordShape;
use olive_typeck::tir::{CompareOp, Literal};
use olive_typeck::Type;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use super::sexp::Sexp;
use super::{op_symbol, TextProgram};
use crate::artifact::ProgramMeta;
use crate::backend::Backend;
use crate::error::InternalError;

struct Frame {
    /// Captures, then parameters, then locals; innermost last.
    scopes: Vec<String>,
    parameters: Vec<String>,
    captures: Vec<String>,
    /// Name of a top-level function; closures have none.
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    Compare,
    Equal,
    Hash,
}

#[derive(Default)]
pub struct TextBackend {
    frames: Vec<Frame>,
    functions: Vec<Sexp>,
    defined: FxHashSet<String>,
    helpers: BTreeMap<String, Sexp>,
}

fn call(name: &str, args: impl IntoIterator<Item = Sexp>) -> Sexp {
    let mut items = vec![Sexp::symbol("call"), Sexp::string(name)];
    items.extend(args);
    Sexp::List(items)
}

fn prim(name: &str, args: impl IntoIterator<Item = Sexp>) -> Sexp {
    let mut items = vec![Sexp::symbol("prim"), Sexp::string(name)];
    items.extend(args);
    Sexp::List(items)
}

fn names(names: &[String]) -> Sexp {
    Sexp::List(names.iter().map(|n| Sexp::symbol(n)).collect())
}

fn get(index: usize, tuple: Sexp) -> Sexp {
    Sexp::form("get", [Sexp::Int(index as i64), tuple])
}

fn payload(index: usize, value: Sexp) -> Sexp {
    Sexp::form("payload", [Sexp::Int(index as i64), value])
}

fn order(op: CompareOp, compared: Sexp) -> Sexp {
    Sexp::form("order", [Sexp::symbol(op_symbol(op)), compared])
}

fn if_else(condition: Sexp, then: Sexp, otherwise: Sexp) -> Sexp {
    Sexp::form("if", [condition, then, otherwise])
}

fn let_in(name: &str, value: Sexp, body: Sexp) -> Sexp {
    Sexp::form("let", [Sexp::symbol(name), value, body])
}

/// A closure with no captures calling a helper.
fn helper_closure(name: &str, arity: usize) -> Sexp {
    let parameters: Vec<String> = ["a", "b"][..arity].iter().map(|s| s.to_string()).collect();
    let arguments = parameters.iter().map(|p| Sexp::symbol(p));
    Sexp::form(
        "closure",
        [Sexp::List(Vec::new()), names(&parameters), call(name, arguments)],
    )
}

pub fn literal_sexp(literal: &Literal) -> Sexp {
    match literal {
        Literal::Boolean(true) => Sexp::symbol("#t"),
        Literal::Boolean(false) => Sexp::symbol("#f"),
        Literal::Integer(i) => Sexp::Int(*i),
        Literal::Float(x) if x.is_finite() => Sexp::Float(*x),
        Literal::Float(x) => {
            let text = if x.is_nan() {
                "NaN"
            } else if *x > 0.0 {
                "inf"
            } else {
                "-inf"
            };
            Sexp::form("float", [Sexp::string(text)])
        }
        Literal::String(s) => Sexp::string(s),
        Literal::Date(d) => Sexp::form("date", [Sexp::Int(*d)]),
        Literal::Path(p) => Sexp::form("path", [Sexp::string(p)]),
        Literal::Json(j) => Sexp::form("json", [Sexp::string(&j.to_string())]),
    }
}

impl TextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame(&mut self) -> Result<&mut Frame, InternalError> {
        self.frames.last_mut().ok_or(InternalError::NoFunction)
    }

    /// Name of the helper doing `helper` over `ty`, generating it and
    /// everything it needs on first use.
    fn helper(&mut self, helper: Helper, ty: &Type) -> String {
        let prefix = match helper {
            Helper::Compare => "compare",
            Helper::Equal => "equal",
            Helper::Hash => "hash",
        };
        let name = format!("{prefix}:{}", ty.descriptor());
        if self.helpers.contains_key(&name) {
            return name;
        }
        let (parameters, body) = match helper {
            Helper::Compare => (vec!["a", "b"], self.compare_body(ty)),
            Helper::Equal => {
                let compare = self.helper(Helper::Compare, ty);
                let compared = call(&compare, [Sexp::symbol("a"), Sexp::symbol("b")]);
                (vec!["a", "b"], order(CompareOp::Equal, compared))
            }
            Helper::Hash => (vec!["v"], self.hash_body(ty)),
        };
        trace!(%name, "helper");
        let parameters = Sexp::List(parameters.into_iter().map(Sexp::symbol).collect());
        self.helpers.insert(
            name.clone(),
            Sexp::form("define", [Sexp::string(&name), parameters, body]),
        );
        name
    }

    fn compare_body(&mut self, ty: &Type) -> Sexp {
        let a = || Sexp::symbol("a");
        let b = || Sexp::symbol("b");
        let simple = |name: &str| prim(name, [a(), b()]);
        match ty {
            Type::Bad | Type::Nothing => Sexp::Int(0),
            Type::Boolean => simple("compare-bool"),
            Type::Integer | Type::Date => simple("compare-int"),
            Type::Float => simple("compare-float"),
            Type::String | Type::Path => simple("compare-str"),
            Type::Json => simple("compare-json"),
            Type::List(inner) => {
                let element = self.helper(Helper::Compare, inner);
                prim("compare-lists", [a(), b(), helper_closure(&element, 2)])
            }
            Type::Map(key, value) => {
                let key = self.helper(Helper::Compare, key);
                let value = self.helper(Helper::Compare, value);
                prim(
                    "compare-maps",
                    [a(), b(), helper_closure(&key, 2), helper_closure(&value, 2)],
                )
            }
            Type::Tuple(items) => {
                let items: Vec<&Type> = items.iter().collect();
                self.compare_fields(&items, |i| get(i, a()), |i| get(i, b()))
            }
            Type::Object(fields) => {
                let items: Vec<&Type> = fields.values().collect();
                self.compare_fields(&items, |i| get(i, a()), |i| get(i, b()))
            }
            Type::Optional(inner) => {
                let compare = self.helper(Helper::Compare, inner);
                let present = |v: Sexp| Sexp::form("present?", [v]);
                let unwrap = |v: Sexp| Sexp::form("unwrap", [v]);
                if_else(
                    present(a()),
                    if_else(
                        present(b()),
                        call(&compare, [unwrap(a()), unwrap(b())]),
                        Sexp::Int(1),
                    ),
                    if_else(present(b()), Sexp::Int(-1), Sexp::Int(0)),
                )
            }
            Type::Algebraic(variants) => {
                let tag = |v: Sexp| Sexp::form("tag", [v]);
                let mut dispatch = Sexp::Int(0);
                for (name, variant) in variants.iter().rev() {
                    let elements = variant.elements();
                    if elements.is_empty() {
                        continue;
                    }
                    let fields = self.compare_fields(&elements, |i| payload(i, a()), |i| payload(i, b()));
                    let test = order(
                        CompareOp::Equal,
                        prim("compare-str", [tag(a()), Sexp::string(name)]),
                    );
                    dispatch = if_else(test, fields, dispatch);
                }
                let c = Sexp::symbol("$c");
                let_in(
                    "$c",
                    prim("compare-str", [tag(a()), tag(b())]),
                    if_else(order(CompareOp::NotEqual, c.clone()), c, dispatch),
                )
            }
        }
    }

    /// First non-zero field comparison, or 0.
    fn compare_fields(
        &mut self,
        types: &[&Type],
        a: impl Fn(usize) -> Sexp,
        b: impl Fn(usize) -> Sexp,
    ) -> Sexp {
        let mut chain = Sexp::Int(0);
        for (i, ty) in types.iter().enumerate().rev() {
            let compare = self.helper(Helper::Compare, ty);
            let compared = call(&compare, [a(i), b(i)]);
            chain = if chain == Sexp::Int(0) {
                compared
            } else {
                let c = Sexp::symbol("$c");
                let_in(
                    "$c",
                    compared,
                    if_else(order(CompareOp::NotEqual, c.clone()), c, chain),
                )
            };
        }
        chain
    }

    fn hash_body(&mut self, ty: &Type) -> Sexp {
        let v = || Sexp::symbol("v");
        match ty {
            Type::Bad | Type::Nothing => prim("hash-seed", []),
            Type::Boolean => prim("hash-bool", [v()]),
            Type::Integer | Type::Date => prim("hash-int", [v()]),
            Type::Float => prim("hash-float", [v()]),
            Type::String | Type::Path => prim("hash-str", [v()]),
            Type::Json => prim("hash-json", [v()]),
            Type::List(inner) => {
                let element = self.helper(Helper::Hash, inner);
                prim("hash-list", [v(), helper_closure(&element, 1)])
            }
            Type::Map(key, value) => {
                let key = self.helper(Helper::Hash, key);
                let value = self.helper(Helper::Hash, value);
                prim(
                    "hash-map",
                    [v(), helper_closure(&key, 1), helper_closure(&value, 1)],
                )
            }
            Type::Tuple(items) => {
                let items: Vec<&Type> = items.iter().collect();
                self.hash_fields(prim("hash-seed", []), &items, |i| get(i, v()))
            }
            Type::Object(fields) => {
                let items: Vec<&Type> = fields.values().collect();
                self.hash_fields(prim("hash-seed", []), &items, |i| get(i, v()))
            }
            Type::Optional(inner) => {
                let hash = self.helper(Helper::Hash, inner);
                if_else(
                    Sexp::form("present?", [v()]),
                    prim(
                        "hash-combine",
                        [
                            prim("hash-bool", [Sexp::symbol("#t")]),
                            call(&hash, [Sexp::form("unwrap", [v()])]),
                        ],
                    ),
                    prim("hash-bool", [Sexp::symbol("#f")]),
                )
            }
            Type::Algebraic(variants) => {
                let tag = || Sexp::form("tag", [v()]);
                let h = Sexp::symbol("$h");
                let mut dispatch = h.clone();
                for (name, variant) in variants.iter().rev() {
                    let elements = variant.elements();
                    if elements.is_empty() {
                        continue;
                    }
                    let fields = self.hash_fields(h.clone(), &elements, |i| payload(i, v()));
                    let test = order(
                        CompareOp::Equal,
                        prim("compare-str", [tag(), Sexp::string(name)]),
                    );
                    dispatch = if_else(test, fields, dispatch);
                }
                let_in("$h", prim("hash-str", [tag()]), dispatch)
            }
        }
    }

    fn hash_fields(&mut self, seed: Sexp, types: &[&Type], value: impl Fn(usize) -> Sexp) -> Sexp {
        let mut h = seed;
        for (i, ty) in types.iter().enumerate() {
            let hash = self.helper(Helper::Hash, ty);
            h = prim("hash-combine", [h, call(&hash, [value(i)])]);
        }
        h
    }

    fn key_type(shape: &RecordShape) -> Type {
        Type::Tuple(shape.key_types())
    }
}

impl Backend for TextBackend {
    type Code = Sexp;
    type Output = TextProgram;

    fn define_local(&mut self, name: &str) {
        if let Ok(frame) = self.frame() {
            frame.scopes.push(name.to_string());
        }
    }

    fn bind_local(&mut self, name: &str, value: Sexp, body: Sexp) -> Result<Sexp, InternalError> {
        let frame = self.frame()?;
        let innermost = frame
            .scopes
            .pop()
            .ok_or_else(|| InternalError::UnboundLocal(name.to_string()))?;
        if innermost != name {
            return Err(InternalError::ScopeMismatch {
                closing: name.to_string(),
                innermost,
            });
        }
        Ok(let_in(name, value, body))
    }

    fn has_local(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|f| f.scopes.iter().any(|n| n == name))
    }

    fn load_named(&mut self, name: &str) -> Result<Sexp, InternalError> {
        if !self.has_local(name) {
            return Err(InternalError::UnboundLocal(name.to_string()));
        }
        Ok(Sexp::symbol(name))
    }

    fn load_constant(&mut self, name: &str) -> Sexp {
        Sexp::form("constant", [Sexp::string(name)])
    }

    fn begin_function(&mut self, name: &str, parameters: &[String]) {
        self.defined.insert(name.to_string());
        self.frames.push(Frame {
            scopes: parameters.to_vec(),
            parameters: parameters.to_vec(),
            captures: Vec::new(),
            name: Some(name.to_string()),
        });
    }

    fn end_function(&mut self, body: Sexp) -> Result<(), InternalError> {
        let frame = self.frames.pop().ok_or(InternalError::NoFunction)?;
        let name = frame.name.ok_or(InternalError::NoFunction)?;
        self.functions.push(Sexp::form(
            "define",
            [Sexp::string(&name), names(&frame.parameters), body],
        ));
        Ok(())
    }

    fn begin_closure(&mut self, parameters: &[String], captures: &[String]) {
        self.frames.push(Frame {
            scopes: captures.iter().chain(parameters).cloned().collect(),
            parameters: parameters.to_vec(),
            captures: captures.to_vec(),
            name: None,
        });
    }

    fn end_closure(&mut self, body: Sexp, captures: Vec<Sexp>) -> Result<Sexp, InternalError> {
        let frame = self.frames.pop().ok_or(InternalError::NoFunction)?;
        let bindings = frame
            .captures
            .iter()
            .zip(captures)
            .map(|(name, value)| Sexp::List(vec![Sexp::symbol(name), value]))
            .collect();
        Ok(Sexp::form(
            "closure",
            [Sexp::List(bindings), names(&frame.parameters), body],
        ))
    }

    fn compare(&mut self, ty: &Type, left: Sexp, right: Sexp) -> Sexp {
        let name = self.helper(Helper::Compare, ty);
        call(&name, [left, right])
    }

    fn equal(&mut self, ty: &Type, left: Sexp, right: Sexp) -> Sexp {
        let name = self.helper(Helper::Equal, ty);
        call(&name, [left, right])
    }

    fn hash(&mut self, ty: &Type, value: Sexp) -> Sexp {
        let name = self.helper(Helper::Hash, ty);
        call(&name, [value])
    }

    fn comparator(&mut self, ty: &Type) -> Sexp {
        helper_closure(&self.helper(Helper::Compare, ty), 2)
    }

    fn equality(&mut self, ty: &Type) -> Sexp {
        helper_closure(&self.helper(Helper::Equal, ty), 2)
    }

    fn hasher(&mut self, ty: &Type) -> Sexp {
        helper_closure(&self.helper(Helper::Hash, ty), 1)
    }

    fn structural_equals(&mut self, shape: &RecordShape) -> Sexp {
        self.equality(&Self::key_type(shape))
    }

    fn structural_hash_code(&mut self, shape: &RecordShape) -> Sexp {
        self.hasher(&Self::key_type(shape))
    }

    fn unit(&mut self) -> Sexp {
        Sexp::symbol("#unit")
    }

    fn literal(&mut self, literal: &Literal) -> Sexp {
        literal_sexp(literal)
    }

    fn tuple(&mut self, items: Vec<Sexp>) -> Sexp {
        Sexp::form("tuple", items)
    }

    fn tuple_get(&mut self, tuple: Sexp, index: usize) -> Sexp {
        get(index, tuple)
    }

    fn algebraic(&mut self, tag: &str, payload: Vec<Sexp>) -> Sexp {
        let mut items = vec![Sexp::symbol("variant"), Sexp::string(tag)];
        items.extend(payload);
        Sexp::List(items)
    }

    fn algebraic_tag(&mut self, value: Sexp) -> Sexp {
        Sexp::form("tag", [value])
    }

    fn algebraic_get(&mut self, value: Sexp, index: usize) -> Sexp {
        payload(index, value)
    }

    fn some(&mut self, value: Sexp) -> Sexp {
        Sexp::form("some", [value])
    }

    fn none(&mut self) -> Sexp {
        Sexp::symbol("#none")
    }

    fn is_present(&mut self, value: Sexp) -> Sexp {
        Sexp::form("present?", [value])
    }

    fn unwrap(&mut self, value: Sexp) -> Sexp {
        Sexp::form("unwrap", [value])
    }

    fn not(&mut self, value: Sexp) -> Sexp {
        Sexp::form("not", [value])
    }

    fn ordering(&mut self, op: CompareOp, compared: Sexp) -> Sexp {
        order(op, compared)
    }

    fn if_else(&mut self, condition: Sexp, then: Sexp, otherwise: Sexp) -> Sexp {
        if_else(condition, then, otherwise)
    }

    fn call_native(&mut self, name: &str, arguments: Vec<Sexp>) -> Sexp {
        let mut items = vec![Sexp::symbol("native"), Sexp::string(name)];
        items.extend(arguments);
        Sexp::List(items)
    }

    fn call_program(&mut self, name: &str, arguments: Vec<Sexp>) -> Result<Sexp, InternalError> {
        if !self.defined.contains(name) {
            return Err(InternalError::UnknownFunction(name.to_string()));
        }
        Ok(call(name, arguments))
    }

    fn primitive(&mut self, primitive: Primitive, arguments: Vec<Sexp>) -> Sexp {
        prim(&primitive.to_string(), arguments)
    }

    fn finish(self, meta: ProgramMeta) -> Result<TextProgram, InternalError> {
        if !self.frames.is_empty() {
            return Err(InternalError::ScopeMismatch {
                closing: "program".to_string(),
                innermost: "an unfinished function".to_string(),
            });
        }
        let mut text = format!(
            "; olive script over `{}`: {} olive(s), {} function(s)\n",
            meta.input_format,
            meta.pipelines.len(),
            self.functions.len().saturating_sub(meta.pipelines.len()),
        );
        for form in self.helpers.values().chain(&self.functions) {
            text.push('\n');
            text.push_str(&form.pretty());
            text.push('\n');
        }
        debug!(bytes = text.len(), helpers = self.helpers.len(), "script generated");
        TextProgram::from_script(text, meta)
    }
}
