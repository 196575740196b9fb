//! The registry the compiler consults for everything a program does not
//! define itself: input formats, functions, actions, refillers, constants and
//! signatures.
//!
//! Definitions here carry types and service names only. Runtime behaviour
//! (native function bodies, constant values) is supplied separately when a
//! compiled program runs.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ty::Type;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputField {
    pub name: String,
    pub ty: Type,
    pub signable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFormatDefinition {
    pub name: String,
    pub fields: Vec<InputField>,
}

impl InputFormatDefinition {
    /// Field layout of records of this format: sorted by name.
    pub fn sorted_fields(&self) -> Vec<&InputField> {
        let mut fields: Vec<_> = self.fields.iter().collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDefinition {
    pub name: String,
    pub parameters: Vec<Type>,
    pub return_type: Type,
    /// Services a program calling this function depends on.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: Type,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefinition {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefillerDefinition {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDefinition {
    pub name: String,
    pub ty: Type,
}

/// How a signature condenses the signable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    /// The sorted list of signable field names.
    Names,
    /// An object of the signable fields as JSON.
    Json,
    /// Hex SHA-256 of the JSON form.
    Sha256,
}

impl SignatureKind {
    pub fn result_type(self) -> Type {
        match self {
            SignatureKind::Names => Type::list(Type::String),
            SignatureKind::Json => Type::Json,
            SignatureKind::Sha256 => Type::String,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignatureKind::Names => "names",
            SignatureKind::Json => "json",
            SignatureKind::Sha256 => "sha256",
        }
    }

    pub fn from_name(name: &str) -> Option<SignatureKind> {
        match name {
            "names" => Some(SignatureKind::Names),
            "json" => Some(SignatureKind::Json),
            "sha256" => Some(SignatureKind::Sha256),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDefinition {
    pub name: String,
    pub kind: SignatureKind,
}

/// Read access to the registry.
pub trait Definitions: Send + Sync {
    fn input_format(&self, name: &str) -> Option<&InputFormatDefinition>;
    fn function(&self, name: &str) -> Option<&FunctionDefinition>;
    fn action(&self, name: &str) -> Option<&ActionDefinition>;
    fn refiller(&self, name: &str) -> Option<&RefillerDefinition>;
    fn constants(&self) -> Vec<&ConstantDefinition>;
    fn signatures(&self) -> Vec<&SignatureDefinition>;
}

/// A registry held in memory, filled by configuration or tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDefinitions {
    formats: FxHashMap<String, InputFormatDefinition>,
    functions: FxHashMap<String, FunctionDefinition>,
    actions: FxHashMap<String, ActionDefinition>,
    refillers: FxHashMap<String, RefillerDefinition>,
    constants: Vec<ConstantDefinition>,
    signatures: Vec<SignatureDefinition>,
}

impl StaticDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_format(&mut self, format: InputFormatDefinition) -> &mut Self {
        self.formats.insert(format.name.clone(), format);
        self
    }

    pub fn add_function(&mut self, function: FunctionDefinition) -> &mut Self {
        self.functions.insert(function.name.clone(), function);
        self
    }

    pub fn add_action(&mut self, action: ActionDefinition) -> &mut Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    pub fn add_refiller(&mut self, refiller: RefillerDefinition) -> &mut Self {
        self.refillers.insert(refiller.name.clone(), refiller);
        self
    }

    pub fn add_constant(&mut self, constant: ConstantDefinition) -> &mut Self {
        self.constants.retain(|c| c.name != constant.name);
        self.constants.push(constant);
        self
    }

    pub fn add_signature(&mut self, signature: SignatureDefinition) -> &mut Self {
        self.signatures.retain(|s| s.name != signature.name);
        self.signatures.push(signature);
        self
    }

    pub fn into_shared(self) -> Arc<dyn Definitions> {
        Arc::new(self)
    }
}

impl Definitions for StaticDefinitions {
    fn input_format(&self, name: &str) -> Option<&InputFormatDefinition> {
        self.formats.get(name)
    }

    fn function(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name)
    }

    fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.get(name)
    }

    fn refiller(&self, name: &str) -> Option<&RefillerDefinition> {
        self.refillers.get(name)
    }

    fn constants(&self) -> Vec<&ConstantDefinition> {
        self.constants.iter().collect()
    }

    fn signatures(&self) -> Vec<&SignatureDefinition> {
        self.signatures.iter().collect()
    }
}
