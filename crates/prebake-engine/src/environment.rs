//! Environment records: declarative, object-backed, function and global.
//!
//! A lexical environment is an environment record plus an optional parent.
//! Parent links are non-owning; the arena owns every record and the tree
//! roots at the realm's global environment. All binding writes flow
//! through the mutation log so speculation can roll them back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::completions::{ModelError, ModelResult};
use crate::diagnostics::{EngineError, EngineResult};
use crate::mutation_log::{MutationDelta, MutationLog};
use crate::objects::{ObjectHeap, PropertyDescriptor, PropertyKey, WellKnownSymbol};
use crate::values::{ObjectHandle, Value};

/// Opaque handle referencing an environment in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvHandle(pub u32);

impl fmt::Display for EnvHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// One name binding in a declarative record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// `None` until initialized; reads then fail with a reference error.
    pub value: Option<Value>,
    pub mutable: bool,
    pub strict: bool,
    pub deletable: bool,
}

impl Binding {
    pub fn mutable(deletable: bool) -> Self {
        Self {
            value: None,
            mutable: true,
            strict: false,
            deletable,
        }
    }

    pub fn immutable(strict: bool) -> Self {
        Self {
            value: None,
            mutable: false,
            strict,
            deletable: false,
        }
    }

    pub fn initialized(value: Value) -> Self {
        Self {
            value: Some(value),
            mutable: true,
            strict: false,
            deletable: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeData {
    pub bindings: BTreeMap<String, Binding>,
}

/// State of the `this` binding in a function record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThisBindingState {
    /// Arrow-style: `this` resolves in the enclosing environment.
    Lexical,
    Uninitialized,
    Initialized,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The four environment-record variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnvRecord {
    Declarative(DeclarativeData),
    Object {
        object: ObjectHandle,
        /// `with`-statement environment honoring `@@unscopables`.
        with_environment: bool,
    },
    Function {
        decl: DeclarativeData,
        this_state: ThisBindingState,
        this_value: Option<Value>,
        home_object: Option<ObjectHandle>,
        function_object: Option<ObjectHandle>,
    },
    Global {
        decl: DeclarativeData,
        object: ObjectHandle,
        /// Names declared with `var` at the top level, in first-declaration
        /// order (drives residual `var` emission).
        var_names: Vec<String>,
        global_this: ObjectHandle,
    },
}

impl EnvRecord {
    fn declarative_data(&self) -> Option<&DeclarativeData> {
        match self {
            Self::Declarative(d) => Some(d),
            Self::Function { decl, .. } | Self::Global { decl, .. } => Some(decl),
            Self::Object { .. } => None,
        }
    }

    fn declarative_data_mut(&mut self) -> Option<&mut DeclarativeData> {
        match self {
            Self::Declarative(d) => Some(d),
            Self::Function { decl, .. } | Self::Global { decl, .. } => Some(decl),
            Self::Object { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub record: EnvRecord,
    pub parent: Option<EnvHandle>,
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentArena {
    entries: Vec<EnvEntry>,
}

impl EnvironmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn truncate(&mut self, mark: usize) {
        self.entries.truncate(mark);
    }

    fn alloc(&mut self, record: EnvRecord, parent: Option<EnvHandle>) -> EnvHandle {
        let handle = EnvHandle(self.entries.len() as u32);
        self.entries.push(EnvEntry { record, parent });
        handle
    }

    pub fn alloc_declarative(&mut self, parent: EnvHandle) -> EnvHandle {
        self.alloc(
            EnvRecord::Declarative(DeclarativeData::default()),
            Some(parent),
        )
    }

    pub fn alloc_object(
        &mut self,
        parent: EnvHandle,
        object: ObjectHandle,
        with_environment: bool,
    ) -> EnvHandle {
        self.alloc(
            EnvRecord::Object {
                object,
                with_environment,
            },
            Some(parent),
        )
    }

    pub fn alloc_function(
        &mut self,
        parent: EnvHandle,
        function_object: Option<ObjectHandle>,
        lexical_this: bool,
    ) -> EnvHandle {
        self.alloc(
            EnvRecord::Function {
                decl: DeclarativeData::default(),
                this_state: if lexical_this {
                    ThisBindingState::Lexical
                } else {
                    ThisBindingState::Uninitialized
                },
                this_value: None,
                home_object: None,
                function_object,
            },
            Some(parent),
        )
    }

    pub fn alloc_global(&mut self, object: ObjectHandle, global_this: ObjectHandle) -> EnvHandle {
        self.alloc(
            EnvRecord::Global {
                decl: DeclarativeData::default(),
                object,
                var_names: Vec::new(),
                global_this,
            },
            None,
        )
    }

    pub fn record(&self, env: EnvHandle) -> EngineResult<&EnvRecord> {
        self.entries
            .get(env.0 as usize)
            .map(|e| &e.record)
            .ok_or_else(|| EngineError::Invariant(format!("{env} out of bounds")))
    }

    fn record_mut(&mut self, env: EnvHandle) -> EngineResult<&mut EnvRecord> {
        self.entries
            .get_mut(env.0 as usize)
            .map(|e| &mut e.record)
            .ok_or_else(|| EngineError::Invariant(format!("{env} out of bounds")))
    }

    pub fn parent(&self, env: EnvHandle) -> Option<EnvHandle> {
        self.entries.get(env.0 as usize).and_then(|e| e.parent)
    }

    // -- Rollback support ---------------------------------------------------

    /// Restore a binding to a prior state. Rollback path; skips object
    /// records (their state is restored through property deltas).
    pub fn restore_binding(&mut self, env: EnvHandle, name: &str, prior: Option<Binding>) {
        if let Some(entry) = self.entries.get_mut(env.0 as usize) {
            if let Some(decl) = entry.record.declarative_data_mut() {
                match prior {
                    Some(binding) => {
                        decl.bindings.insert(name.to_string(), binding);
                    }
                    None => {
                        decl.bindings.remove(name);
                    }
                }
            }
        }
    }

    pub fn remove_global_var_name(&mut self, env: EnvHandle, name: &str) {
        if let Some(entry) = self.entries.get_mut(env.0 as usize) {
            if let EnvRecord::Global { var_names, .. } = &mut entry.record {
                var_names.retain(|n| n != name);
            }
        }
    }

    // -- Single-record operations (Standard semantics) ----------------------

    /// `HasBinding(N)` on one record.
    pub fn has_binding(
        &self,
        heap: &ObjectHeap,
        env: EnvHandle,
        name: &str,
    ) -> EngineResult<bool> {
        match self.record(env)? {
            EnvRecord::Object {
                object,
                with_environment,
            } => {
                let object = *object;
                if !heap.has_property(object, &PropertyKey::string(name))? {
                    return Ok(false);
                }
                if *with_environment && self.is_unscopable(heap, object, name)? {
                    return Ok(false);
                }
                Ok(true)
            }
            EnvRecord::Global { decl, object, .. } => {
                if decl.bindings.contains_key(name) {
                    return Ok(true);
                }
                Ok(heap.has_property(*object, &PropertyKey::string(name))?)
            }
            record => Ok(record
                .declarative_data()
                .is_some_and(|d| d.bindings.contains_key(name))),
        }
    }

    fn is_unscopable(
        &self,
        heap: &ObjectHeap,
        object: ObjectHandle,
        name: &str,
    ) -> EngineResult<bool> {
        let unscopables = heap.lookup_property(object, &WellKnownSymbol::Unscopables.key())?;
        if let Some((_, desc)) = unscopables {
            if let Some(Value::Object(list)) = desc.value() {
                let entry = heap.lookup_property(*list, &PropertyKey::string(name))?;
                if let Some((_, desc)) = entry {
                    if let Some(flag) = desc.value() {
                        return Ok(flag.to_boolean().unwrap_or(false));
                    }
                }
            }
        }
        Ok(false)
    }

    /// `CreateMutableBinding(N, D)`.
    pub fn create_mutable_binding(
        &mut self,
        log: &mut MutationLog,
        env: EnvHandle,
        name: &str,
        deletable: bool,
    ) -> EngineResult<()> {
        let record = self.record_mut(env)?;
        let decl = record
            .declarative_data_mut()
            .ok_or_else(|| EngineError::Invariant("mutable binding on object record".to_string()))?;
        let prior = decl.bindings.get(name).cloned();
        decl.bindings
            .insert(name.to_string(), Binding::mutable(deletable));
        log.record_binding(env, name, prior);
        Ok(())
    }

    /// `CreateImmutableBinding(N, S)`.
    pub fn create_immutable_binding(
        &mut self,
        log: &mut MutationLog,
        env: EnvHandle,
        name: &str,
        strict: bool,
    ) -> EngineResult<()> {
        let record = self.record_mut(env)?;
        let decl = record.declarative_data_mut().ok_or_else(|| {
            EngineError::Invariant("immutable binding on object record".to_string())
        })?;
        let prior = decl.bindings.get(name).cloned();
        decl.bindings
            .insert(name.to_string(), Binding::immutable(strict));
        log.record_binding(env, name, prior);
        Ok(())
    }

    /// `InitializeBinding(N, V)`.
    pub fn initialize_binding(
        &mut self,
        log: &mut MutationLog,
        env: EnvHandle,
        name: &str,
        value: Value,
    ) -> EngineResult<()> {
        let record = self.record_mut(env)?;
        let decl = record
            .declarative_data_mut()
            .ok_or_else(|| EngineError::Invariant("initialize on object record".to_string()))?;
        let prior = decl.bindings.get(name).cloned();
        match decl.bindings.get_mut(name) {
            Some(binding) => {
                binding.value = Some(value);
                log.record_binding(env, name, prior);
                Ok(())
            }
            None => Err(EngineError::Invariant(format!(
                "initialize of undeclared binding `{name}`"
            ))),
        }
    }

    /// `DeleteBinding(N)` on one record.
    pub fn delete_binding(
        &mut self,
        log: &mut MutationLog,
        heap: &mut ObjectHeap,
        env: EnvHandle,
        name: &str,
    ) -> EngineResult<bool> {
        match self.record_mut(env)? {
            EnvRecord::Object { object, .. } => {
                let object = *object;
                let key = PropertyKey::string(name);
                let prior = heap.get(object)?.get_own_property(&key).cloned();
                let deleted = heap.get_mut(object)?.delete_property(&key);
                if deleted && prior.is_some() {
                    log.record_property(object, key, prior);
                }
                Ok(deleted)
            }
            record => {
                let decl = match record.declarative_data_mut() {
                    Some(d) => d,
                    None => return Ok(true),
                };
                match decl.bindings.get(name) {
                    Some(binding) if binding.deletable => {
                        let prior = decl.bindings.remove(name);
                        log.record_binding(env, name, prior);
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                    None => Ok(true),
                }
            }
        }
    }

    // -- Chain walks --------------------------------------------------------

    /// Innermost environment (starting at `env`) where `name` is bound.
    pub fn lookup(
        &self,
        heap: &ObjectHeap,
        env: EnvHandle,
        name: &str,
    ) -> EngineResult<Option<EnvHandle>> {
        let mut current = Some(env);
        while let Some(e) = current {
            if self.has_binding(heap, e, name)? {
                return Ok(Some(e));
            }
            current = self.parent(e);
        }
        Ok(None)
    }

    /// `GetBindingValue(N, S)` resolved along the chain.
    pub fn get_binding(
        &self,
        heap: &ObjectHeap,
        env: EnvHandle,
        name: &str,
    ) -> EngineResult<ModelResult<Value>> {
        let holder = match self.lookup(heap, env, name)? {
            Some(h) => h,
            None => {
                return Ok(Err(ModelError::reference(format!(
                    "{name} is not defined"
                ))))
            }
        };
        match self.record(holder)? {
            EnvRecord::Object { object, .. } => self.read_object_binding(heap, *object, name),
            EnvRecord::Global { decl, object, .. } => {
                if let Some(binding) = decl.bindings.get(name) {
                    return Ok(read_declarative(binding, name));
                }
                self.read_object_binding(heap, *object, name)
            }
            record => {
                let decl = record
                    .declarative_data()
                    .ok_or_else(|| EngineError::Invariant("binding holder shape".to_string()))?;
                let binding = decl.bindings.get(name).ok_or_else(|| {
                    EngineError::Invariant(format!("binding `{name}` vanished"))
                })?;
                Ok(read_declarative(binding, name))
            }
        }
    }

    fn read_object_binding(
        &self,
        heap: &ObjectHeap,
        object: ObjectHandle,
        name: &str,
    ) -> EngineResult<ModelResult<Value>> {
        match heap.lookup_property(object, &PropertyKey::string(name))? {
            Some((_, PropertyDescriptor::Data { value, .. })) => Ok(Ok(value)),
            Some((_, PropertyDescriptor::Accessor { .. })) => Ok(Err(ModelError::type_error(
                format!("binding `{name}` is an accessor property"),
            ))),
            None => Ok(Ok(Value::Undefined)),
        }
    }

    /// `SetMutableBinding(N, V, S)` resolved along the chain, with
    /// strict-mode propagation: a strict write to a missing binding is a
    /// reference error, a sloppy one creates an initialized global.
    pub fn set_binding(
        &mut self,
        log: &mut MutationLog,
        heap: &mut ObjectHeap,
        env: EnvHandle,
        name: &str,
        value: Value,
        strict: bool,
    ) -> EngineResult<ModelResult<()>> {
        let holder = self.lookup(heap, env, name)?;
        let holder = match holder {
            Some(h) => h,
            None => {
                if strict {
                    return Ok(Err(ModelError::reference(format!(
                        "{name} is not defined"
                    ))));
                }
                let global = self.global_of(env)?;
                return self.define_global_property(log, heap, global, name, value);
            }
        };
        match self.record_mut(holder)? {
            EnvRecord::Object { object, .. } => {
                let object = *object;
                self.write_object_binding(log, heap, object, name, value, strict)
            }
            EnvRecord::Global { decl, object, .. } => {
                if decl.bindings.contains_key(name) {
                    self.set_declarative(log, holder, name, value, strict)
                } else {
                    let object = *object;
                    self.write_object_binding(log, heap, object, name, value, strict)
                }
            }
            _ => self.set_declarative(log, holder, name, value, strict),
        }
    }

    fn set_declarative(
        &mut self,
        log: &mut MutationLog,
        env: EnvHandle,
        name: &str,
        value: Value,
        strict: bool,
    ) -> EngineResult<ModelResult<()>> {
        let record = self.record_mut(env)?;
        let decl = record
            .declarative_data_mut()
            .ok_or_else(|| EngineError::Invariant("declarative holder shape".to_string()))?;
        let binding = decl
            .bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Invariant(format!("binding `{name}` vanished")))?;
        if binding.value.is_none() {
            return Ok(Err(ModelError::reference(format!(
                "cannot access '{name}' before initialization"
            ))));
        }
        if !binding.mutable {
            if strict || binding.strict {
                return Ok(Err(ModelError::type_error(format!(
                    "assignment to constant variable '{name}'"
                ))));
            }
            return Ok(Ok(()));
        }
        let prior = Some(binding);
        if let Some(b) = decl.bindings.get_mut(name) {
            b.value = Some(value);
        }
        log.record_binding(env, name, prior);
        Ok(Ok(()))
    }

    fn write_object_binding(
        &mut self,
        log: &mut MutationLog,
        heap: &mut ObjectHeap,
        object: ObjectHandle,
        name: &str,
        value: Value,
        strict: bool,
    ) -> EngineResult<ModelResult<()>> {
        let key = PropertyKey::string(name);
        let prior = heap.get(object)?.get_own_property(&key).cloned();
        if let Some(desc) = &prior {
            if !desc.is_writable() && desc.is_data() {
                if strict {
                    return Ok(Err(ModelError::type_error(format!(
                        "cannot assign to read only property '{name}'"
                    ))));
                }
                return Ok(Ok(()));
            }
        }
        let descriptor = match prior.clone() {
            Some(PropertyDescriptor::Data {
                writable,
                enumerable,
                configurable,
                ..
            }) => PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            },
            Some(PropertyDescriptor::Accessor { .. }) => {
                return Ok(Err(ModelError::type_error(format!(
                    "binding `{name}` is an accessor property"
                ))))
            }
            None => PropertyDescriptor::data(value),
        };
        let defined = heap.get_mut(object)?.define_own_property(key.clone(), descriptor);
        if defined {
            log.record_property(object, key, prior);
            Ok(Ok(()))
        } else if strict {
            Ok(Err(ModelError::type_error(format!(
                "cannot define property '{name}'"
            ))))
        } else {
            Ok(Ok(()))
        }
    }

    fn define_global_property(
        &mut self,
        log: &mut MutationLog,
        heap: &mut ObjectHeap,
        global: EnvHandle,
        name: &str,
        value: Value,
    ) -> EngineResult<ModelResult<()>> {
        let object = match self.record(global)? {
            EnvRecord::Global { object, .. } => *object,
            _ => return Err(EngineError::Invariant("global env shape".to_string())),
        };
        self.write_object_binding(log, heap, object, name, value, false)
    }

    /// The global environment at the root of `env`'s chain.
    pub fn global_of(&self, env: EnvHandle) -> EngineResult<EnvHandle> {
        let mut current = env;
        loop {
            match self.parent(current) {
                Some(p) => current = p,
                None => break,
            }
        }
        match self.record(current)? {
            EnvRecord::Global { .. } => Ok(current),
            _ => Err(EngineError::Invariant(
                "environment chain does not root at a global record".to_string(),
            )),
        }
    }

    /// `CreateGlobalVarBinding(N)`: an initialized, enumerable data
    /// property on the global object plus a var-name list entry.
    pub fn create_global_var_binding(
        &mut self,
        log: &mut MutationLog,
        heap: &mut ObjectHeap,
        global: EnvHandle,
        name: &str,
    ) -> EngineResult<()> {
        let object = match self.record_mut(global)? {
            EnvRecord::Global {
                object, var_names, ..
            } => {
                let object = *object;
                if !var_names.iter().any(|n| n == name) {
                    var_names.push(name.to_string());
                    log.record(MutationDelta::GlobalVarName {
                        env: global,
                        name: name.to_string(),
                    });
                }
                object
            }
            _ => return Err(EngineError::Invariant("global env shape".to_string())),
        };
        let key = PropertyKey::string(name);
        if !heap.get(object)?.has_own_property(&key) {
            let prior = None;
            heap.get_mut(object)?
                .define_own_property(key.clone(), PropertyDescriptor::data(Value::Undefined));
            log.record_property(object, key, prior);
        }
        Ok(())
    }

    /// Var names declared on the global record, in declaration order.
    pub fn global_var_names(&self, global: EnvHandle) -> EngineResult<Vec<String>> {
        match self.record(global)? {
            EnvRecord::Global { var_names, .. } => Ok(var_names.clone()),
            _ => Err(EngineError::Invariant("global env shape".to_string())),
        }
    }

    // -- this / super -------------------------------------------------------

    /// `HasThisBinding()` on one record.
    pub fn has_this_binding(&self, env: EnvHandle) -> EngineResult<bool> {
        Ok(match self.record(env)? {
            EnvRecord::Function { this_state, .. } => {
                !matches!(this_state, ThisBindingState::Lexical)
            }
            EnvRecord::Global { .. } => true,
            _ => false,
        })
    }

    /// `GetThisBinding()` resolved along the chain.
    pub fn get_this(&self, env: EnvHandle) -> EngineResult<ModelResult<Value>> {
        let mut current = Some(env);
        while let Some(e) = current {
            match self.record(e)? {
                EnvRecord::Function {
                    this_state,
                    this_value,
                    ..
                } => match this_state {
                    ThisBindingState::Lexical => {}
                    ThisBindingState::Uninitialized => {
                        return Ok(Err(ModelError::reference(
                            "must call super constructor before accessing 'this'",
                        )))
                    }
                    ThisBindingState::Initialized => {
                        return Ok(Ok(this_value.clone().unwrap_or(Value::Undefined)))
                    }
                },
                EnvRecord::Global { global_this, .. } => {
                    return Ok(Ok(Value::Object(*global_this)))
                }
                _ => {}
            }
            current = self.parent(e);
        }
        Err(EngineError::Invariant(
            "no this binding on the environment chain".to_string(),
        ))
    }

    /// `BindThisValue(V)`.
    pub fn bind_this_value(&mut self, env: EnvHandle, value: Value) -> EngineResult<ModelResult<()>> {
        match self.record_mut(env)? {
            EnvRecord::Function {
                this_state,
                this_value,
                ..
            } => match this_state {
                ThisBindingState::Initialized => Ok(Err(ModelError::reference(
                    "super constructor called twice",
                ))),
                _ => {
                    *this_state = ThisBindingState::Initialized;
                    *this_value = Some(value);
                    Ok(Ok(()))
                }
            },
            _ => Err(EngineError::Invariant(
                "bind_this_value on non-function record".to_string(),
            )),
        }
    }

    /// `HasSuperBinding()`.
    pub fn has_super_binding(&self, env: EnvHandle) -> EngineResult<bool> {
        Ok(match self.record(env)? {
            EnvRecord::Function {
                this_state,
                home_object,
                ..
            } => !matches!(this_state, ThisBindingState::Lexical) && home_object.is_some(),
            _ => false,
        })
    }

    /// `WithBaseObject()`.
    pub fn with_base_object(&self, env: EnvHandle) -> EngineResult<Option<ObjectHandle>> {
        Ok(match self.record(env)? {
            EnvRecord::Object {
                object,
                with_environment: true,
            } => Some(*object),
            _ => None,
        })
    }

    /// Names bound on one record (used by the residualizer for global
    /// lexical declarations).
    pub fn declarative_names(&self, env: EnvHandle) -> EngineResult<Vec<String>> {
        Ok(self
            .record(env)?
            .declarative_data()
            .map(|d| d.bindings.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Read a declarative binding without chain resolution.
    pub fn own_binding(&self, env: EnvHandle, name: &str) -> EngineResult<Option<Binding>> {
        Ok(self
            .record(env)?
            .declarative_data()
            .and_then(|d| d.bindings.get(name).cloned()))
    }
}

fn read_declarative(binding: &Binding, name: &str) -> ModelResult<Value> {
    match &binding.value {
        Some(value) => Ok(value.clone()),
        None => Err(ModelError::reference(format!(
            "cannot access '{name}' before initialization"
        ))),
    }
}

/// `BTreeSet` alias kept for callers tracking name sets deterministically.
pub type NameSet = BTreeSet<String>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectRecord;
    use crate::values::AbstractArena;

    struct Fixture {
        heap: ObjectHeap,
        envs: EnvironmentArena,
        log: MutationLog,
        global: EnvHandle,
    }

    fn fixture() -> Fixture {
        let mut heap = ObjectHeap::new();
        let global_object = heap.alloc(ObjectRecord::default());
        let mut envs = EnvironmentArena::new();
        let global = envs.alloc_global(global_object, global_object);
        Fixture {
            heap,
            envs,
            log: MutationLog::new(),
            global,
        }
    }

    #[test]
    fn declare_initialize_read() {
        let mut fx = fixture();
        let env = fx.envs.alloc_declarative(fx.global);
        fx.envs
            .create_mutable_binding(&mut fx.log, env, "x", false)
            .unwrap();

        // Read before initialization is a reference error.
        let before = fx.envs.get_binding(&fx.heap, env, "x").unwrap();
        assert!(before.is_err());

        fx.envs
            .initialize_binding(&mut fx.log, env, "x", Value::Number(1.0))
            .unwrap();
        let value = fx.envs.get_binding(&fx.heap, env, "x").unwrap().unwrap();
        assert_eq!(value, Value::Number(1.0));
    }

    #[test]
    fn missing_binding_strictness() {
        let mut fx = fixture();
        let env = fx.envs.alloc_declarative(fx.global);

        // Strict write to a missing name: reference error.
        let strict = fx
            .envs
            .set_binding(&mut fx.log, &mut fx.heap, env, "ghost", Value::Null, true)
            .unwrap();
        assert!(strict.is_err());

        // Sloppy write creates an initialized global property.
        fx.envs
            .set_binding(&mut fx.log, &mut fx.heap, env, "ghost", Value::Number(7.0), false)
            .unwrap()
            .unwrap();
        let read = fx.envs.get_binding(&fx.heap, env, "ghost").unwrap().unwrap();
        assert_eq!(read, Value::Number(7.0));
    }

    #[test]
    fn immutable_binding_rejects_writes() {
        let mut fx = fixture();
        let env = fx.envs.alloc_declarative(fx.global);
        fx.envs
            .create_immutable_binding(&mut fx.log, env, "c", true)
            .unwrap();
        fx.envs
            .initialize_binding(&mut fx.log, env, "c", Value::Bool(true))
            .unwrap();
        let result = fx
            .envs
            .set_binding(&mut fx.log, &mut fx.heap, env, "c", Value::Bool(false), true)
            .unwrap();
        assert!(result.is_err());
        // The stored value is untouched.
        let value = fx.envs.get_binding(&fx.heap, env, "c").unwrap().unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn shadowing_resolves_innermost() {
        let mut fx = fixture();
        let outer = fx.envs.alloc_declarative(fx.global);
        fx.envs
            .create_mutable_binding(&mut fx.log, outer, "x", false)
            .unwrap();
        fx.envs
            .initialize_binding(&mut fx.log, outer, "x", Value::Number(1.0))
            .unwrap();
        let inner = fx.envs.alloc_declarative(outer);
        fx.envs
            .create_mutable_binding(&mut fx.log, inner, "x", false)
            .unwrap();
        fx.envs
            .initialize_binding(&mut fx.log, inner, "x", Value::Number(2.0))
            .unwrap();

        let value = fx.envs.get_binding(&fx.heap, inner, "x").unwrap().unwrap();
        assert_eq!(value, Value::Number(2.0));
        let outer_value = fx.envs.get_binding(&fx.heap, outer, "x").unwrap().unwrap();
        assert_eq!(outer_value, Value::Number(1.0));
    }

    #[test]
    fn global_var_binding_is_a_global_object_property() {
        let mut fx = fixture();
        fx.envs
            .create_global_var_binding(&mut fx.log, &mut fx.heap, fx.global, "answer")
            .unwrap();
        assert_eq!(fx.envs.global_var_names(fx.global).unwrap(), vec!["answer"]);
        let value = fx
            .envs
            .get_binding(&fx.heap, fx.global, "answer")
            .unwrap()
            .unwrap();
        assert_eq!(value, Value::Undefined);
    }

    #[test]
    fn this_resolution_through_lexical_frames() {
        let mut fx = fixture();
        let this_obj = fx.heap.alloc(ObjectRecord::default());
        let function_env = fx.envs.alloc_function(fx.global, None, false);
        fx.envs
            .bind_this_value(function_env, Value::Object(this_obj))
            .unwrap()
            .unwrap();
        let arrow_env = fx.envs.alloc_function(function_env, None, true);

        let this_value = fx.envs.get_this(arrow_env).unwrap().unwrap();
        assert_eq!(this_value, Value::Object(this_obj));
        assert!(!fx.envs.has_this_binding(arrow_env).unwrap());
        assert!(fx.envs.has_this_binding(function_env).unwrap());
    }

    #[test]
    fn binding_writes_roll_back() {
        let mut fx = fixture();
        let env = fx.envs.alloc_declarative(fx.global);
        fx.envs
            .create_mutable_binding(&mut fx.log, env, "x", false)
            .unwrap();
        fx.envs
            .initialize_binding(&mut fx.log, env, "x", Value::Number(1.0))
            .unwrap();

        let mut abstracts = AbstractArena::new();
        let mark = fx.log.mark(&fx.heap, &fx.envs, &abstracts);
        fx.envs
            .set_binding(&mut fx.log, &mut fx.heap, env, "x", Value::Number(9.0), true)
            .unwrap()
            .unwrap();

        fx.log
            .rollback_to(&mark, &mut fx.heap, &mut fx.envs, &mut abstracts);
        let value = fx.envs.get_binding(&fx.heap, env, "x").unwrap().unwrap();
        assert_eq!(value, Value::Number(1.0));
    }
}
