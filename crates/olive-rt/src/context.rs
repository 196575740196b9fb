//! What a running program reads from its host: native function bodies and
//! constant values.
//!
//! A [`RuntimeContext`] is cheap to clone and shared between concurrent
//! runs; the registry behind it can be extended while programs run.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::builtins;
use crate::error::RuntimeError;
use crate::value::Value;

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    natives: FxHashMap<String, NativeFn>,
    constants: FxHashMap<String, Value>,
}

#[derive(Clone, Default)]
pub struct RuntimeContext {
    registry: Arc<RwLock<Registry>>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with the standard native library registered.
    pub fn with_builtins() -> Self {
        let context = Self::new();
        builtins::register_all(&context);
        context
    }

    pub fn register<F>(&self, name: &str, f: F) -> &Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.registry
            .write()
            .natives
            .insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn set_constant(&self, name: &str, value: Value) -> &Self {
        self.registry
            .write()
            .constants
            .insert(name.to_string(), value);
        self
    }

    pub fn constant(&self, name: &str) -> Result<Value, RuntimeError> {
        self.registry
            .read()
            .constants
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingConstant(name.to_string()))
    }

    pub fn native(&self, name: &str) -> Result<NativeFn, RuntimeError> {
        self.registry
            .read()
            .natives
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))
    }

    pub fn call_native(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        trace!(function = name, args = args.len(), "native call");
        let f = self.native(name)?;
        f(args)
    }

    pub fn has_native(&self, name: &str) -> bool {
        self.registry.read().natives.contains_key(name)
    }

    pub fn native_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry.read().natives.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        let mut constants: Vec<_> = registry.constants.keys().collect();
        constants.sort();
        f.debug_struct("RuntimeContext")
            .field("natives", &registry.natives.len())
            .field("constants", &constants)
            .finish()
    }
}
