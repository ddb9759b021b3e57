//! Hierarchical namespace of named type instances and handlers.
//!
//! Registries are explicit objects: every plugin host owns one and hands it
//! to the codec and broker layers, so there is no process-wide mutable
//! state. Lookups take a read lock only and never serialize publishes.

use crate::error::{TmxError, TmxResult};
use crate::value::Value;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The reserved namespace holding the built-in scalar types. Registration
/// into it always fails.
pub const BUILTIN_NAMESPACE: &str = "tmx::common::types";

const BUILTIN_NAMES: &[&str] = &[
    "Null", "Boolean", "Int8", "Int16", "Int32", "Int64", "UInt8", "UInt16",
    "UInt32", "UInt64", "Float32", "Float64", "String8", "Bytes", "Enum",
    "Array", "Properties",
];

/// Normalize a namespace path: accept `::`, `.`, `:`, `/` and `\` as
/// separators, trim surrounding whitespace, and reject empty segments.
fn canonicalize(ns: &str) -> TmxResult<String> {
    let trimmed = ns.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let unified = trimmed.replace("::", "/");
    let mut parts = Vec::new();
    for part in unified.split(['.', ':', '/', '\\']) {
        let part = part.trim();
        if part.is_empty() {
            return Err(TmxError::invalid_argument(format!(
                "empty segment in namespace {:?}",
                ns
            )));
        }
        parts.push(part);
    }
    Ok(parts.join("::"))
}

/// A registered entry: where it lives, what it is called, its type
/// identity, and the shared instance itself.
#[derive(Clone)]
pub struct TmxTypeDescriptor {
    pub namespace: String,
    pub name: String,
    pub type_id: TypeId,
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl TmxTypeDescriptor {
    /// The fully-qualified `namespace::name` path.
    pub fn fq_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.namespace, self.name)
        }
    }

    pub fn instance_of<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for TmxTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmxTypeDescriptor")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .finish()
    }
}

#[derive(Default)]
struct NamespaceEntries {
    by_name: HashMap<String, TmxTypeDescriptor>,
    // primary name per type identity, for alias-aware lookup
    by_id: HashMap<TypeId, String>,
}

#[derive(Default)]
struct RegistryShared {
    namespaces: RwLock<HashMap<String, NamespaceEntries>>,
}

/// The callable shape stored for handlers: the argument tuple is the
/// signature, checked by downcast at dispatch time.
pub type HandlerFn<A> = Arc<dyn Fn(&A) -> TmxResult<Value> + Send + Sync>;

/// A view onto one namespace of a shared registry tree. Cloning is cheap
/// and views into different namespaces of the same tree share storage.
#[derive(Clone)]
pub struct TypeRegistry {
    shared: Arc<RegistryShared>,
    namespace: String,
}

impl TypeRegistry {
    /// A fresh registry rooted at the given namespace. Fails on empty
    /// namespace segments.
    pub fn new(namespace: &str) -> TmxResult<Self> {
        Ok(Self {
            shared: Arc::new(RegistryShared::default()),
            namespace: canonicalize(namespace)?,
        })
    }

    /// A registry for a namespace underneath this one.
    pub fn child(&self, sub: &str) -> TmxResult<Self> {
        let sub = canonicalize(sub)?;
        let namespace = if self.namespace.is_empty() {
            sub
        } else if sub.is_empty() {
            self.namespace.clone()
        } else {
            format!("{}::{}", self.namespace, sub)
        };
        Ok(Self {
            shared: self.shared.clone(),
            namespace,
        })
    }

    /// The registry for the parent namespace, or a clone of self at the
    /// root.
    pub fn parent(&self) -> Self {
        let namespace = match self.namespace.rfind("::") {
            Some(idx) => self.namespace[..idx].to_string(),
            None => String::new(),
        };
        Self {
            shared: self.shared.clone(),
            namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn check_writable(&self) -> TmxResult<()> {
        if self.namespace == BUILTIN_NAMESPACE {
            return Err(TmxError::invalid_argument(format!(
                "namespace {} is reserved for built-in types",
                BUILTIN_NAMESPACE
            )));
        }
        Ok(())
    }

    /// Bind a shared instance under both its type identity and a short
    /// name. Re-registration under the same name replaces the old entry;
    /// the same instance registered under a second name forms an alias.
    pub fn register_type<T: Send + Sync + 'static>(
        &self,
        instance: Arc<T>,
        name: &str,
    ) -> TmxResult<TmxTypeDescriptor> {
        self.register_erased(instance, TypeId::of::<T>(), name)
    }

    /// Bind a callable under the namespace. The argument tuple type is the
    /// signature used by [`TypeRegistry::dispatch`].
    pub fn register_handler<A: 'static>(
        &self,
        handler: impl Fn(&A) -> TmxResult<Value> + Send + Sync + 'static,
        name: &str,
    ) -> TmxResult<TmxTypeDescriptor> {
        let boxed: HandlerFn<A> = Arc::new(handler);
        self.register_erased(Arc::new(boxed), TypeId::of::<HandlerFn<A>>(), name)
    }

    fn register_erased(
        &self,
        instance: Arc<dyn Any + Send + Sync>,
        type_id: TypeId,
        name: &str,
    ) -> TmxResult<TmxTypeDescriptor> {
        self.check_writable()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TmxError::invalid_argument("empty type name"));
        }
        let descriptor = TmxTypeDescriptor {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            type_id,
            instance,
        };
        let mut namespaces = self.shared.namespaces.write();
        let entries = namespaces.entry(self.namespace.clone()).or_default();
        entries.by_id.entry(type_id).or_insert_with(|| name.to_string());
        entries.by_name.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Remove the binding with the given name. Removing the primary name
    /// of a type identity also clears the identity lookup.
    pub fn unregister(&self, name: &str) -> TmxResult<()> {
        self.check_writable()?;
        let mut namespaces = self.shared.namespaces.write();
        if let Some(entries) = namespaces.get_mut(&self.namespace) {
            if let Some(desc) = entries.by_name.remove(name) {
                if entries.by_id.get(&desc.type_id).map(String::as_str) == Some(name) {
                    entries.by_id.remove(&desc.type_id);
                }
            }
        }
        Ok(())
    }

    /// Look up by short name in this namespace.
    pub fn get(&self, name: &str) -> Option<TmxTypeDescriptor> {
        if self.namespace == BUILTIN_NAMESPACE {
            return builtin_descriptor(name);
        }
        let namespaces = self.shared.namespaces.read();
        namespaces
            .get(&self.namespace)?
            .by_name
            .get(name)
            .cloned()
    }

    /// Look up by type identity. With `ignore_alias` the descriptor for
    /// the primary registration name is returned even if aliases exist.
    pub fn get_by_id(&self, type_id: TypeId, _ignore_alias: bool) -> Option<TmxTypeDescriptor> {
        let namespaces = self.shared.namespaces.read();
        let entries = namespaces.get(&self.namespace)?;
        let primary = entries.by_id.get(&type_id)?;
        entries.by_name.get(primary).cloned()
    }

    /// Every descriptor registered at or below this namespace, optionally
    /// filtered by type identity.
    pub fn get_all(&self, type_id: Option<TypeId>) -> Vec<TmxTypeDescriptor> {
        let namespaces = self.shared.namespaces.read();
        let mut out = Vec::new();
        for (ns, entries) in namespaces.iter() {
            let within = ns == &self.namespace
                || self.namespace.is_empty()
                || ns.starts_with(&format!("{}::", self.namespace));
            if !within {
                continue;
            }
            for desc in entries.by_name.values() {
                if type_id.map_or(true, |id| desc.type_id == id) {
                    out.push(desc.clone());
                }
            }
        }
        out.sort_by(|a, b| a.fq_name().cmp(&b.fq_name()));
        out
    }

    /// Invoke a registered callable with the argument tuple type-checked
    /// against its stored signature. A mismatch fails with NotSupported.
    pub fn dispatch<A: 'static>(
        descriptor: &TmxTypeDescriptor,
        arg: &A,
    ) -> TmxResult<Value> {
        match descriptor.instance_of::<HandlerFn<A>>() {
            Some(handler) => {
                let callable: &(dyn Fn(&A) -> TmxResult<Value> + Send + Sync) = &**handler;
                callable(arg)
            }
            None => Err(TmxError::not_supported(format!(
                "handler {} does not accept the supplied argument types",
                descriptor.fq_name()
            ))),
        }
    }
}

/// Built-in descriptors are synthesized on demand; they all share the
/// generic [`Value`] identity.
fn builtin_descriptor(name: &str) -> Option<TmxTypeDescriptor> {
    BUILTIN_NAMES
        .iter()
        .find(|n| **n == name)
        .map(|n| TmxTypeDescriptor {
            namespace: BUILTIN_NAMESPACE.to_string(),
            name: n.to_string(),
            type_id: TypeId::of::<Value>(),
            instance: Arc::new(Value::Null),
        })
}

/// Short (unqualified) name of a Rust type, for handler registration keys.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Fully-qualified Rust type name.
pub fn full_type_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}
