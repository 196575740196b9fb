//! Name resolution environment.
//!
//! An [`Environment`] is an immutable, cheaply cloned map from names to
//! [`Binding`]s. Each pipeline stage receives the environment its predecessor
//! produced and returns a new one; nothing is ever mutated in place except
//! the per-binding `read` flag, which is atomic so environments can be shared
//! across threads.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use olive_common::Pos;
use rustc_hash::FxHashMap;

use crate::ty::Type;

/// Where a name comes from, which decides how code reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavour {
    /// Registry constant; closures snapshot it.
    Constant,
    /// Field of the current record.
    Stream,
    /// Field of the current record that contributes to signatures.
    StreamSignable,
    /// Signature over the signable fields, computed on demand.
    StreamSignature,
    /// Parameter or local of a function, loop or match arm.
    Lambda,
}

impl Flavour {
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Flavour::Stream | Flavour::StreamSignable | Flavour::StreamSignature
        )
    }

    /// Whether a closure referencing this name has to capture its value.
    /// Stream values are instead read from the record the closure receives.
    pub fn needs_capture(self) -> bool {
        matches!(self, Flavour::Constant | Flavour::Lambda)
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavour::Constant => write!(f, "constant"),
            Flavour::Stream => write!(f, "stream variable"),
            Flavour::StreamSignable => write!(f, "signable stream variable"),
            Flavour::StreamSignature => write!(f, "signature"),
            Flavour::Lambda => write!(f, "local variable"),
        }
    }
}

/// A name bound in an environment.
#[derive(Debug)]
pub struct Binding {
    pub name: String,
    pub ty: Type,
    pub flavour: Flavour,
    pub pos: Pos,
    /// Raw input fields this value derives from. Empty unless signable.
    pub provenance: BTreeSet<String>,
    read: AtomicBool,
    /// The binding this one was carried over from; reads propagate to it.
    parent: Option<Arc<Binding>>,
}

impl Binding {
    pub fn new(name: impl Into<String>, ty: Type, flavour: Flavour) -> Self {
        let name = name.into();
        let provenance = if flavour == Flavour::StreamSignable {
            BTreeSet::from([name.clone()])
        } else {
            BTreeSet::new()
        };
        Self {
            name,
            ty,
            flavour,
            pos: Pos::default(),
            provenance,
            read: AtomicBool::new(false),
            parent: None,
        }
    }

    /// Carry a field across a reshaping stage as a plain stream field.
    pub fn downgrade(binding: &Arc<Binding>) -> Binding {
        Binding {
            name: binding.name.clone(),
            ty: binding.ty.clone(),
            flavour: Flavour::Stream,
            pos: binding.pos,
            provenance: BTreeSet::new(),
            read: AtomicBool::new(false),
            parent: Some(binding.clone()),
        }
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    /// Replace the provenance; used for derived signable values.
    pub fn with_provenance(mut self, provenance: BTreeSet<String>) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn mark_read(&self) {
        self.read.store(true, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.mark_read();
        }
    }

    pub fn is_read(&self) -> bool {
        self.read.load(Ordering::Relaxed)
    }
}

/// Why a name could not be added to an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// A stream field with this name already exists.
    Duplicate { name: String },
    /// The name already refers to something of a different flavour.
    IllegalShadow { name: String, existing: Flavour },
}

/// Fallback consulted when a name is not bound.
///
/// `Flatten *` installs one so that later stages can pull fields out of the
/// element object simply by naming them.
pub trait UndefinedVariableProvider: Send + Sync {
    fn provide(&self, name: &str) -> Option<Arc<Binding>>;

    /// Bindings handed out so far.
    fn provided(&self) -> Vec<Arc<Binding>>;
}

#[derive(Clone, Default)]
pub struct Environment {
    bindings: Arc<FxHashMap<String, Arc<Binding>>>,
    provider: Option<Arc<dyn UndefinedVariableProvider>>,
    failed: bool,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("provider", &self.provider.is_some())
            .field("good", &!self.failed)
            .finish()
    }
}

impl Environment {
    pub fn root(targets: impl IntoIterator<Item = Arc<Binding>>) -> Self {
        let bindings = targets
            .into_iter()
            .map(|b| (b.name.clone(), b))
            .collect();
        Self {
            bindings: Arc::new(bindings),
            provider: None,
            failed: false,
        }
    }

    /// Add lambda-style names. Rebinding a name of the same flavour shadows
    /// it; rebinding one of a different flavour is rejected.
    pub fn bind(
        &self,
        targets: impl IntoIterator<Item = Arc<Binding>>,
    ) -> Result<Environment, BindError> {
        let mut bindings = (*self.bindings).clone();
        for target in targets {
            if let Some(existing) = self.lookup(&target.name) {
                if existing.flavour != target.flavour {
                    return Err(BindError::IllegalShadow {
                        name: target.name.clone(),
                        existing: existing.flavour,
                    });
                }
            }
            bindings.insert(target.name.clone(), target);
        }
        Ok(Environment {
            bindings: Arc::new(bindings),
            provider: self.provider.clone(),
            failed: self.failed,
        })
    }

    /// Add new stream fields alongside the existing ones.
    pub fn extend_stream(
        &self,
        targets: impl IntoIterator<Item = Arc<Binding>>,
    ) -> Result<Environment, BindError> {
        let mut bindings = (*self.bindings).clone();
        for target in targets {
            let existing = bindings
                .get(&target.name)
                .cloned()
                .or_else(|| self.lookup(&target.name));
            if let Some(existing) = existing {
                return Err(if existing.flavour.is_stream() {
                    BindError::Duplicate {
                        name: target.name.clone(),
                    }
                } else {
                    BindError::IllegalShadow {
                        name: target.name.clone(),
                        existing: existing.flavour,
                    }
                });
            }
            bindings.insert(target.name.clone(), target);
        }
        Ok(Environment {
            bindings: Arc::new(bindings),
            provider: self.provider.clone(),
            failed: self.failed,
        })
    }

    /// Drop every stream binding (signatures included) and install `targets`
    /// as the new record. Constants survive. Any undefined-variable provider
    /// is dropped since it described the old record.
    pub fn replace_stream(
        &self,
        targets: impl IntoIterator<Item = Arc<Binding>>,
        ok: bool,
    ) -> Environment {
        let mut bindings: FxHashMap<String, Arc<Binding>> = self
            .bindings
            .iter()
            .filter(|(_, b)| !b.flavour.is_stream())
            .map(|(name, b)| (name.clone(), b.clone()))
            .collect();
        for target in targets {
            bindings.insert(target.name.clone(), target);
        }
        Environment {
            bindings: Arc::new(bindings),
            provider: None,
            failed: self.failed || !ok,
        }
    }

    /// Look a name up, consulting the provider if it is not bound.
    pub fn lookup(&self, name: &str) -> Option<Arc<Binding>> {
        self.bindings
            .get(name)
            .cloned()
            .or_else(|| self.provider.as_ref().and_then(|p| p.provide(name)))
    }

    /// Bound names only; the provider is not consulted.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Record fields sorted by name, including those a provider has handed
    /// out so far. Signatures are not record fields and are left out.
    pub fn stream_bindings(&self) -> Vec<Arc<Binding>> {
        let mut result: Vec<_> = self
            .bindings
            .values()
            .filter(|b| b.flavour.is_stream() && b.flavour != Flavour::StreamSignature)
            .cloned()
            .collect();
        if let Some(provider) = &self.provider {
            result.extend(provider.provided());
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    pub fn with_provider(&self, provider: Arc<dyn UndefinedVariableProvider>) -> Environment {
        Environment {
            bindings: self.bindings.clone(),
            provider: Some(provider),
            failed: self.failed,
        }
    }

    /// Mark the environment failed when `ok` is false.
    pub fn fail(&self, ok: bool) -> Environment {
        Environment {
            bindings: self.bindings.clone(),
            provider: self.provider.clone(),
            failed: self.failed || !ok,
        }
    }

    pub fn is_good(&self) -> bool {
        !self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str, ty: Type) -> Arc<Binding> {
        Arc::new(Binding::new(name, ty, Flavour::Stream))
    }

    #[test]
    fn flavour_capture_rules() {
        assert!(Flavour::Constant.needs_capture());
        assert!(Flavour::Lambda.needs_capture());
        assert!(!Flavour::Stream.needs_capture());
        assert!(Flavour::StreamSignature.is_stream());
        assert!(!Flavour::Constant.is_stream());
    }

    #[test]
    fn replace_stream_keeps_constants() {
        let env = Environment::root([
            stream("run", Type::String),
            Arc::new(Binding::new("limit", Type::Integer, Flavour::Constant)),
            Arc::new(Binding::new("sig", Type::String, Flavour::StreamSignature)),
        ]);
        let next = env.replace_stream([stream("total", Type::Integer)], true);
        assert!(next.lookup("run").is_none());
        assert!(next.lookup("sig").is_none());
        assert!(next.lookup("limit").is_some());
        assert_eq!(next.stream_bindings().len(), 1);
        assert!(next.is_good());
    }

    #[test]
    fn extend_stream_rejects_duplicates() {
        let env = Environment::root([stream("run", Type::String)]);
        let err = env
            .extend_stream([stream("run", Type::Integer)])
            .unwrap_err();
        assert_eq!(
            err,
            BindError::Duplicate {
                name: "run".to_string()
            }
        );
    }

    #[test]
    fn bind_same_flavour_shadows_different_flavour_fails() {
        let env = Environment::root([stream("x", Type::String)]);
        let lambda = Arc::new(Binding::new("y", Type::Integer, Flavour::Lambda));
        let inner = env.bind([lambda]).unwrap();
        let shadow = Arc::new(Binding::new("y", Type::String, Flavour::Lambda));
        assert_eq!(inner.bind([shadow]).unwrap().lookup("y").unwrap().ty, Type::String);
        let clash = Arc::new(Binding::new("x", Type::Integer, Flavour::Lambda));
        assert!(matches!(
            env.bind([clash]),
            Err(BindError::IllegalShadow { existing: Flavour::Stream, .. })
        ));
    }

    #[test]
    fn read_flag_is_shared_between_clones() {
        let env = Environment::root([stream("run", Type::String)]);
        let copy = env.clone();
        env.lookup("run").unwrap().mark_read();
        assert!(copy.lookup("run").unwrap().is_read());
    }

    #[test]
    fn downgraded_reads_reach_the_original() {
        let original = Arc::new(Binding::new("run", Type::String, Flavour::StreamSignable));
        let carried = Binding::downgrade(&original);
        assert_eq!(carried.flavour, Flavour::Stream);
        assert!(carried.provenance.is_empty());
        carried.mark_read();
        assert!(original.is_read());
    }

    #[test]
    fn failure_is_sticky() {
        let env = Environment::default().fail(false);
        assert!(!env.is_good());
        assert!(!env.replace_stream([], true).is_good());
    }

    #[test]
    fn environments_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Environment>();
        assert_send_sync::<Type>();
    }
}
