use crate::function::Function;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Registry key: upper-cased namespace and name.
#[derive(Eq, PartialEq, Hash, Clone, Debug)]
struct FnKey {
    ns: String,
    name: String,
}

impl FnKey {
    fn new(ns: &str, name: &str) -> Self {
        Self {
            ns: ns.to_ascii_uppercase(),
            name: name.to_ascii_uppercase(),
        }
    }
}

static REG: Lazy<DashMap<FnKey, Arc<dyn Function>>> = Lazy::new(DashMap::new);

static BUILTINS: Lazy<()> = Lazy::new(crate::builtins::load_builtins);

pub fn register(f: Arc<dyn Function>) {
    REG.insert(FnKey::new(f.namespace(), f.name()), f);
}

pub fn get(ns: &str, name: &str) -> Option<Arc<dyn Function>> {
    REG.get(&FnKey::new(ns, name)).map(|v| Arc::clone(v.value()))
}

/// Register the builtin library once per process.
pub fn ensure_builtins_loaded() {
    Lazy::force(&BUILTINS);
}

/// Functions owned by a single engine, consulted before the global registry.
#[derive(Default, Clone)]
pub struct FunctionTable {
    functions: FxHashMap<FnKey, Arc<dyn Function>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, f: Arc<dyn Function>) {
        self.functions.insert(FnKey::new(f.namespace(), f.name()), f);
    }

    pub fn get(&self, ns: &str, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(&FnKey::new(ns, name)).cloned()
    }

    /// Local table first, then the global registry.
    pub fn resolve(&self, ns: &str, name: &str) -> Option<Arc<dyn Function>> {
        self.get(ns, name).or_else(|| get(ns, name))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(|k| k.name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("FunctionTable").field("functions", &names).finish()
    }
}
