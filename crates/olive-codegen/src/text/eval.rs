//! Evaluator for text backend scripts.
//!
//! A script is compiled once into a tree of [`Node`]s with every name
//! resolved to a slot or function index, then interpreted.

use std::fmt;
use std::sync::Arc;

use olive_rt::compare::holds;
use olive_rt::{Callable, Primitive, RuntimeContext, RuntimeError, Value};
use olive_typeck::tir::CompareOp;
use rustc_hash::FxHashMap;

use super::op_from_symbol;
use super::sexp::Sexp;

#[derive(Debug)]
enum Node {
    Value(Value),
    Local(usize),
    Let(usize, Box<Node>, Box<Node>),
    If(Box<Node>, Box<Node>, Box<Node>),
    Tuple(Vec<Node>),
    Get(usize, Box<Node>),
    Variant(Arc<str>, Vec<Node>),
    Tag(Box<Node>),
    Payload(usize, Box<Node>),
    Some(Box<Node>),
    Present(Box<Node>),
    Unwrap(Box<Node>),
    Not(Box<Node>),
    Order(CompareOp, Box<Node>),
    Constant(Arc<str>),
    Native(Arc<str>, Vec<Node>),
    Call(usize, Vec<Node>),
    Prim(Box<Primitive>, Vec<Node>),
    Closure(usize, Vec<Node>),
}

#[derive(Debug)]
struct Lambda {
    name: String,
    captures: usize,
    parameters: usize,
    slots: usize,
    body: Node,
}

/// A compiled script.
#[derive(Debug, Default)]
pub struct Script {
    functions: Vec<Lambda>,
    names: FxHashMap<String, usize>,
}

impl Script {
    pub fn function(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn compile(forms: &[Sexp]) -> Result<Script, String> {
        let mut names = FxHashMap::default();
        let mut definitions = Vec::with_capacity(forms.len());
        for form in forms {
            let items = list(form, "top-level form")?;
            if items.first().and_then(Sexp::as_symbol) != Some("define") || items.len() != 4 {
                return Err(format!("expected `(define NAME (PARAMS) BODY)`, found {form}"));
            }
            let name = string(&items[1])?;
            let parameters = symbols(&items[2])?;
            if names.insert(name.to_string(), definitions.len()).is_some() {
                return Err(format!("`{name}` is defined twice"));
            }
            definitions.push((name, parameters, &items[3]));
        }

        // Closures are numbered after the named functions.
        let mut compiler = Compiler {
            names: &names,
            offset: definitions.len(),
            lambdas: Vec::new(),
        };
        let mut functions: Vec<Option<Lambda>> = definitions.iter().map(|_| None).collect();
        for (index, (name, parameters, body)) in definitions.into_iter().enumerate() {
            let mut scope = Scope::new(&parameters);
            let body = compiler.node(body, &mut scope)?;
            functions[index] = Some(Lambda {
                name: name.to_string(),
                captures: 0,
                parameters: parameters.len(),
                slots: scope.slots,
                body,
            });
        }
        let mut functions: Vec<Lambda> = functions.into_iter().flatten().collect();
        functions.extend(compiler.lambdas);
        Ok(Script { functions, names })
    }
}

struct Scope {
    names: Vec<(String, usize)>,
    slots: usize,
}

impl Scope {
    fn new<S: AsRef<str>>(names: &[S]) -> Self {
        Scope {
            names: names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.as_ref().to_string(), i))
                .collect(),
            slots: names.len(),
        }
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.names.iter().rev().find(|(n, _)| n == name).map(|(_, s)| *s)
    }
}

struct Compiler<'a> {
    names: &'a FxHashMap<String, usize>,
    /// Index of the first closure.
    offset: usize,
    lambdas: Vec<Lambda>,
}

fn list<'s>(sexp: &'s Sexp, what: &str) -> Result<&'s [Sexp], String> {
    match sexp {
        Sexp::List(items) => Ok(items),
        other => Err(format!("expected {what}, found {other}")),
    }
}

fn string(sexp: &Sexp) -> Result<&str, String> {
    match sexp {
        Sexp::Str(s) => Ok(s),
        other => Err(format!("expected a string, found {other}")),
    }
}

fn index(sexp: &Sexp) -> Result<usize, String> {
    match sexp {
        Sexp::Int(i) => usize::try_from(*i).map_err(|_| format!("negative index {i}")),
        other => Err(format!("expected an index, found {other}")),
    }
}

fn symbols(sexp: &Sexp) -> Result<Vec<&str>, String> {
    list(sexp, "a parameter list")?
        .iter()
        .map(|s| s.as_symbol().ok_or_else(|| format!("expected a name, found {s}")))
        .collect()
}

impl Compiler<'_> {
    fn nodes(&mut self, items: &[Sexp], scope: &mut Scope) -> Result<Vec<Node>, String> {
        items.iter().map(|item| self.node(item, scope)).collect()
    }

    fn boxed(&mut self, item: &Sexp, scope: &mut Scope) -> Result<Box<Node>, String> {
        Ok(Box::new(self.node(item, scope)?))
    }

    fn node(&mut self, sexp: &Sexp, scope: &mut Scope) -> Result<Node, String> {
        let items = match sexp {
            Sexp::Int(i) => return Ok(Node::Value(Value::Int(*i))),
            Sexp::Float(x) => return Ok(Node::Value(Value::Float(*x))),
            Sexp::Str(s) => return Ok(Node::Value(Value::str(s))),
            Sexp::Symbol(s) => {
                return Ok(match s.as_str() {
                    "#t" => Node::Value(Value::Bool(true)),
                    "#f" => Node::Value(Value::Bool(false)),
                    "#unit" => Node::Value(Value::Unit),
                    "#none" => Node::Value(Value::none()),
                    name => Node::Local(
                        scope
                            .lookup(name)
                            .ok_or_else(|| format!("unbound name `{name}`"))?,
                    ),
                })
            }
            Sexp::List(items) => items,
        };
        let head = items
            .first()
            .and_then(Sexp::as_symbol)
            .ok_or_else(|| format!("expected a form, found {sexp}"))?;
        let args = &items[1..];
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!("`{head}` takes {n} operand(s), found {sexp}"))
            }
        };
        Ok(match head {
            "let" => {
                arity(3)?;
                let name = args[0]
                    .as_symbol()
                    .ok_or_else(|| format!("expected a name in {sexp}"))?;
                let value = self.boxed(&args[1], scope)?;
                let slot = scope.slots;
                scope.slots += 1;
                scope.names.push((name.to_string(), slot));
                let body = self.boxed(&args[2], scope);
                scope.names.pop();
                Node::Let(slot, value, body?)
            }
            "if" => {
                arity(3)?;
                Node::If(
                    self.boxed(&args[0], scope)?,
                    self.boxed(&args[1], scope)?,
                    self.boxed(&args[2], scope)?,
                )
            }
            "tuple" => Node::Tuple(self.nodes(args, scope)?),
            "get" => {
                arity(2)?;
                Node::Get(index(&args[0])?, self.boxed(&args[1], scope)?)
            }
            "variant" => {
                let tag = args.first().ok_or_else(|| format!("no tag in {sexp}"))?;
                Node::Variant(Arc::from(string(tag)?), self.nodes(&args[1..], scope)?)
            }
            "tag" => {
                arity(1)?;
                Node::Tag(self.boxed(&args[0], scope)?)
            }
            "payload" => {
                arity(2)?;
                Node::Payload(index(&args[0])?, self.boxed(&args[1], scope)?)
            }
            "some" => {
                arity(1)?;
                Node::Some(self.boxed(&args[0], scope)?)
            }
            "present?" => {
                arity(1)?;
                Node::Present(self.boxed(&args[0], scope)?)
            }
            "unwrap" => {
                arity(1)?;
                Node::Unwrap(self.boxed(&args[0], scope)?)
            }
            "not" => {
                arity(1)?;
                Node::Not(self.boxed(&args[0], scope)?)
            }
            "order" => {
                arity(2)?;
                let op = args[0]
                    .as_symbol()
                    .and_then(op_from_symbol)
                    .ok_or_else(|| format!("bad operator in {sexp}"))?;
                Node::Order(op, self.boxed(&args[1], scope)?)
            }
            "constant" => {
                arity(1)?;
                Node::Constant(Arc::from(string(&args[0])?))
            }
            "native" => {
                let name = args.first().ok_or_else(|| format!("no function in {sexp}"))?;
                Node::Native(Arc::from(string(name)?), self.nodes(&args[1..], scope)?)
            }
            "call" => {
                let name = string(args.first().ok_or_else(|| format!("no function in {sexp}"))?)?;
                let id = *self
                    .names
                    .get(name)
                    .ok_or_else(|| format!("call to undefined `{name}`"))?;
                Node::Call(id, self.nodes(&args[1..], scope)?)
            }
            "prim" => {
                let name = string(args.first().ok_or_else(|| format!("no primitive in {sexp}"))?)?;
                let primitive: Primitive = name.parse().map_err(|e: RuntimeError| e.to_string())?;
                Node::Prim(Box::new(primitive), self.nodes(&args[1..], scope)?)
            }
            "closure" => {
                arity(3)?;
                let mut names = Vec::new();
                let mut values = Vec::new();
                for binding in list(&args[0], "capture bindings")? {
                    let pair = list(binding, "a capture binding")?;
                    let [name, value] = pair else {
                        return Err(format!("bad capture binding {binding}"));
                    };
                    names.push(
                        name.as_symbol()
                            .ok_or_else(|| format!("expected a name in {binding}"))?,
                    );
                    values.push(self.node(value, scope)?);
                }
                let parameters = symbols(&args[1])?;
                let mut inner = Scope::new(&names.iter().chain(&parameters).collect::<Vec<_>>());
                let body = self.node(&args[2], &mut inner)?;
                let id = self.offset + self.lambdas.len();
                self.lambdas.push(Lambda {
                    name: format!("closure#{id}"),
                    captures: names.len(),
                    parameters: parameters.len(),
                    slots: inner.slots,
                    body,
                });
                Node::Closure(id, values)
            }
            "date" => {
                arity(1)?;
                match &args[0] {
                    Sexp::Int(d) => Node::Value(Value::Date(*d)),
                    other => return Err(format!("bad date {other}")),
                }
            }
            "path" => {
                arity(1)?;
                Node::Value(Value::path(string(&args[0])?))
            }
            "json" => {
                arity(1)?;
                let json = serde_json::from_str(string(&args[0])?).map_err(|e| e.to_string())?;
                Node::Value(Value::json(json))
            }
            "float" => {
                arity(1)?;
                let x: f64 = string(&args[0])?
                    .parse()
                    .map_err(|_| format!("bad float in {sexp}"))?;
                Node::Value(Value::Float(x))
            }
            other => return Err(format!("unknown form `{other}`")),
        })
    }
}

/// A script bound to the context it reads constants and natives from.
#[derive(Clone)]
pub struct Interpreter {
    script: Arc<Script>,
    context: RuntimeContext,
}

struct TextClosure {
    interpreter: Interpreter,
    function: usize,
    captures: Vec<Value>,
}

impl Interpreter {
    pub fn new(script: Arc<Script>, context: RuntimeContext) -> Self {
        Interpreter { script, context }
    }

    pub fn invoke(
        &self,
        function: usize,
        captures: &[Value],
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        let lambda = self
            .script
            .functions
            .get(function)
            .ok_or_else(|| RuntimeError::malformed(format!("no function #{function}")))?;
        if arguments.len() != lambda.parameters {
            return Err(RuntimeError::Arity {
                name: lambda.name.clone(),
                expected: lambda.parameters,
                found: arguments.len(),
            });
        }
        if captures.len() != lambda.captures {
            return Err(RuntimeError::malformed(format!(
                "{} captures {} values, given {}",
                lambda.name,
                lambda.captures,
                captures.len()
            )));
        }
        let mut env = Vec::with_capacity(lambda.slots);
        env.extend_from_slice(captures);
        env.extend_from_slice(arguments);
        env.resize(lambda.slots, Value::Unit);
        self.eval(&lambda.body, &mut env)
    }

    fn all(&self, nodes: &[Node], env: &mut Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        nodes.iter().map(|n| self.eval(n, env)).collect()
    }

    fn eval(&self, node: &Node, env: &mut Vec<Value>) -> Result<Value, RuntimeError> {
        Ok(match node {
            Node::Value(value) => value.clone(),
            Node::Local(slot) => env
                .get(*slot)
                .cloned()
                .ok_or_else(|| RuntimeError::malformed(format!("no slot {slot}")))?,
            Node::Let(slot, value, body) => {
                let value = self.eval(value, env)?;
                *env
                    .get_mut(*slot)
                    .ok_or_else(|| RuntimeError::malformed(format!("no slot {slot}")))? = value;
                self.eval(body, env)?
            }
            Node::If(condition, then, otherwise) => {
                if self.eval(condition, env)?.as_bool()? {
                    self.eval(then, env)?
                } else {
                    self.eval(otherwise, env)?
                }
            }
            Node::Tuple(items) => Value::tuple(self.all(items, env)?),
            Node::Get(index, tuple) => self.eval(tuple, env)?.get(*index)?.clone(),
            Node::Variant(tag, payload) => Value::Algebraic(tag.clone(), self.all(payload, env)?.into()),
            Node::Tag(value) => Value::str(self.eval(value, env)?.as_algebraic()?.0),
            Node::Payload(index, value) => {
                let value = self.eval(value, env)?;
                let (_, payload) = value.as_algebraic()?;
                payload
                    .get(*index)
                    .cloned()
                    .ok_or(RuntimeError::Index {
                        index: *index,
                        len: payload.len(),
                    })?
            }
            Node::Some(value) => Value::some(self.eval(value, env)?),
            Node::Present(value) => Value::Bool(self.eval(value, env)?.as_optional()?.is_some()),
            Node::Unwrap(value) => self
                .eval(value, env)?
                .as_optional()?
                .cloned()
                .ok_or(RuntimeError::EmptyOptional)?,
            Node::Not(value) => Value::Bool(!self.eval(value, env)?.as_bool()?),
            Node::Order(op, compared) => Value::Bool(holds(*op, self.eval(compared, env)?.as_int()?)),
            Node::Constant(name) => self.context.constant(name)?,
            Node::Native(name, arguments) => {
                let arguments = self.all(arguments, env)?;
                self.context.call_native(name, &arguments)?
            }
            Node::Call(function, arguments) => {
                let arguments = self.all(arguments, env)?;
                self.invoke(*function, &[], &arguments)?
            }
            Node::Prim(primitive, arguments) => primitive.apply(&self.all(arguments, env)?)?,
            Node::Closure(function, captures) => Value::closure(TextClosure {
                interpreter: self.clone(),
                function: *function,
                captures: self.all(captures, env)?,
            }),
        })
    }
}

impl fmt::Debug for TextClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interpreter.script.functions.get(self.function) {
            Some(lambda) => write!(f, "<{}>", lambda.name),
            None => write!(f, "<closure #{}>", self.function),
        }
    }
}

impl Callable for TextClosure {
    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        self.interpreter.invoke(self.function, &self.captures, args)
    }
}
