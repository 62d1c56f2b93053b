//! Object heap: property descriptors, prototype chains, partiality bits.
//!
//! The heap is an arena; all object references are [`ObjectHandle`]
//! indices, so cyclic graphs (prototype loops, self-referencing
//! properties) are representable and rollback is a truncate-plus-replay.
//!
//! Two bits drive abstract interpretation:
//!
//! - `partial`: reads of keys not known present may yield abstract values.
//! - `simple`: no getters/setters/exotic behavior anywhere; reads, writes
//!   and enumeration have no observable side effect. Monotone: once
//!   cleared it never returns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::BlockStatement;
use crate::environment::EnvHandle;
use crate::intrinsics::NativeFn;
use crate::values::{ObjectHandle, SymbolId, Value};

/// Maximum prototype chain depth before the walk is declared cyclic.
const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

// ---------------------------------------------------------------------------
// PropertyKey
// ---------------------------------------------------------------------------

/// A property key: string or symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    String(String),
    Symbol(SymbolId),
}

impl PropertyKey {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Symbol(_) => None,
        }
    }

    /// Array-index reading of a string key, per the Standard's canonical
    /// numeric string rule.
    pub fn as_array_index(&self) -> Option<u64> {
        let s = self.as_string()?;
        if s == "0" {
            return Some(0);
        }
        if s.starts_with('0') || s.is_empty() {
            return None;
        }
        s.parse::<u64>().ok()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Well-known symbols
// ---------------------------------------------------------------------------

/// Well-known symbols with fixed low ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WellKnownSymbol {
    Iterator,
    ToPrimitive,
    Unscopables,
}

impl WellKnownSymbol {
    pub fn id(self) -> SymbolId {
        SymbolId(self as u32 + 1)
    }

    pub fn key(self) -> PropertyKey {
        PropertyKey::Symbol(self.id())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Iterator => "@@iterator",
            Self::ToPrimitive => "@@toPrimitive",
            Self::Unscopables => "@@unscopables",
        }
    }
}

/// First symbol id available for user allocation.
const FIRST_USER_SYMBOL: u32 = 8;

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Attribute record of a single property. Descriptor values may be
/// abstract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Default data descriptor (writable, enumerable, configurable).
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: Value) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Intrinsic method descriptor: writable and configurable but not
    /// enumerable.
    pub fn method(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Callables
// ---------------------------------------------------------------------------

/// User-defined function payload: formal parameters, AST body, captured
/// lexical environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: BlockStatement,
    pub env: EnvHandle,
    pub strict: bool,
}

/// Callable payload of a function object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callable {
    User(UserFunction),
    Native(NativeFn),
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Structural errors from heap operations. These become engine invariant
/// failures when they escape; model-level TypeErrors are raised by the
/// evaluator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectError {
    ObjectNotFound(ObjectHandle),
    PrototypeCycleDetected,
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectNotFound(h) => write!(f, "{h} not found"),
            Self::PrototypeCycleDetected => f.write_str("prototype chain cycle detected"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(f, "prototype chain depth {depth} exceeds max {max}")
            }
        }
    }
}

impl std::error::Error for ObjectError {}

impl From<ObjectError> for crate::diagnostics::EngineError {
    fn from(error: ObjectError) -> Self {
        Self::Invariant(error.to_string())
    }
}

// ---------------------------------------------------------------------------
// ObjectRecord
// ---------------------------------------------------------------------------

/// A mutable object with identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub prototype: Option<ObjectHandle>,
    pub extensible: bool,
    /// Own properties. `BTreeMap` for deterministic iteration; creation
    /// order is tracked separately in `key_order`.
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// Own keys in insertion order (drives `for-in` enumeration order).
    pub key_order: Vec<PropertyKey>,
    /// Internal slots keyed by symbolic slot names.
    pub internal_slots: BTreeMap<String, Value>,
    /// Reads of unknown keys may return abstract values.
    pub partial: bool,
    /// No observable side effects on read/write/enumeration. Monotone.
    pub simple: bool,
    /// `[[Class]]`-style tag for intrinsic identification (`"Error"`,
    /// `"Array"`, …).
    pub class_tag: Option<String>,
    /// Callable payload when this object is a function.
    pub callable: Option<Callable>,
    /// Source path this object is known by in the residual program
    /// (intrinsics and `__abstract_simple_partial` roots).
    pub intrinsic_name: Option<String>,
}

impl Default for ObjectRecord {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            key_order: Vec::new(),
            internal_slots: BTreeMap::new(),
            partial: false,
            simple: true,
            class_tag: None,
            callable: None,
            intrinsic_name: None,
        }
    }
}

impl ObjectRecord {
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    pub fn is_callable(&self) -> bool {
        self.callable.is_some()
    }

    /// Clear the `simple` bit. There is no way to set it back.
    pub fn mark_not_simple(&mut self) {
        self.simple = false;
    }

    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]]` with the Standard's compatibility checks.
    /// `Ok(true)` on success, `Ok(false)` when rejected by a
    /// non-configurable conflict or non-extensibility.
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        if let Some(current) = self.properties.get(&key) {
            if !current.is_configurable() {
                if desc.is_configurable() {
                    return false;
                }
                if desc.is_enumerable() != current.is_enumerable() {
                    return false;
                }
                if current.is_data() != desc.is_data() {
                    return false;
                }
                if let (
                    PropertyDescriptor::Data {
                        writable: current_writable,
                        value: current_value,
                        ..
                    },
                    PropertyDescriptor::Data {
                        writable: new_writable,
                        value: new_value,
                        ..
                    },
                ) = (current, &desc)
                {
                    if !current_writable {
                        if *new_writable {
                            return false;
                        }
                        if !current_value.same_value(new_value) {
                            return false;
                        }
                    }
                }
                if let (
                    PropertyDescriptor::Accessor {
                        get: current_get,
                        set: current_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) = (current, &desc)
                {
                    if current_get != new_get || current_set != new_set {
                        return false;
                    }
                }
            }
            if desc.is_accessor() {
                self.mark_not_simple();
            }
            self.properties.insert(key, desc);
            true
        } else {
            if !self.extensible {
                return false;
            }
            if desc.is_accessor() {
                self.mark_not_simple();
            }
            self.key_order.push(key.clone());
            self.properties.insert(key, desc);
            true
        }
    }

    /// `[[Delete]]`: `false` when the property is non-configurable.
    pub fn delete_property(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                self.key_order.retain(|k| k != key);
                true
            }
            None => true,
        }
    }

    /// Restore a property to a prior state (rollback path). Bypasses the
    /// compatibility checks on purpose: the prior state was valid.
    pub fn restore_property(&mut self, key: &PropertyKey, prior: Option<PropertyDescriptor>) {
        match prior {
            Some(desc) => {
                if !self.properties.contains_key(key) {
                    self.key_order.push(key.clone());
                }
                self.properties.insert(key.clone(), desc);
            }
            None => {
                self.properties.remove(key);
                self.key_order.retain(|k| k != key);
            }
        }
    }

    /// `[[OwnPropertyKeys]]` order: array indices numerically, then string
    /// keys in insertion order, then symbols in insertion order.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut index_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut string_keys: Vec<PropertyKey> = Vec::new();
        let mut symbol_keys: Vec<PropertyKey> = Vec::new();
        for key in &self.key_order {
            match key.as_array_index() {
                Some(n) => index_keys.push((n, key.clone())),
                None => match key {
                    PropertyKey::String(_) => string_keys.push(key.clone()),
                    PropertyKey::Symbol(_) => symbol_keys.push(key.clone()),
                },
            }
        }
        index_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = index_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(string_keys);
        result.extend(symbol_keys);
        result
    }

    /// Own enumerable string keys in `for-in` order.
    pub fn enumerable_string_keys(&self) -> Vec<String> {
        self.own_property_keys()
            .into_iter()
            .filter_map(|key| {
                let desc = self.properties.get(&key)?;
                if !desc.is_enumerable() {
                    return None;
                }
                key.as_string().map(str::to_string)
            })
            .collect()
    }

    /// All own properties are non-configurable and (for data) non-writable,
    /// and the object is non-extensible.
    pub fn is_frozen(&self) -> bool {
        !self.extensible
            && self.properties.values().all(|d| {
                !d.is_configurable() && (!d.is_data() || !d.is_writable())
            })
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap
// ---------------------------------------------------------------------------

/// Arena of object records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectHeap {
    records: Vec<ObjectRecord>,
    next_symbol: u32,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_symbol: FIRST_USER_SYMBOL,
        }
    }

    pub fn alloc(&mut self, record: ObjectRecord) -> ObjectHandle {
        let handle = ObjectHandle(self.records.len() as u32);
        self.records.push(record);
        handle
    }

    pub fn alloc_with_prototype(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.alloc(ObjectRecord::with_prototype(proto))
    }

    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    pub fn get(&self, handle: ObjectHandle) -> Result<&ObjectRecord, ObjectError> {
        self.records
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ObjectRecord, ObjectError> {
        self.records
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every object allocated at or after `mark` (speculation
    /// rollback). Callers must have rolled back any property deltas on
    /// surviving objects first.
    pub fn truncate(&mut self, mark: usize) {
        self.records.truncate(mark);
    }

    /// Walk the prototype chain looking up `key`; returns the owning
    /// handle and a clone of the descriptor.
    pub fn lookup_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<(ObjectHandle, PropertyDescriptor)>, ObjectError> {
        let mut current = Some(handle);
        let mut depth: u32 = 0;
        while let Some(h) = current {
            if depth >= MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            let record = self.get(h)?;
            if let Some(desc) = record.get_own_property(key) {
                return Ok(Some((h, desc.clone())));
            }
            current = record.prototype;
            depth += 1;
        }
        Ok(None)
    }

    /// `O.[[HasProperty]](P)` along the chain.
    pub fn has_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self.lookup_property(handle, key)?.is_some())
    }

    /// Would inserting `proto` above `handle` create a cycle?
    pub fn would_create_cycle(
        &self,
        handle: ObjectHandle,
        proto: ObjectHandle,
    ) -> Result<bool, ObjectError> {
        let mut current = Some(proto);
        let mut depth: u32 = 0;
        while let Some(h) = current {
            if h == handle {
                return Ok(true);
            }
            if depth >= MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            current = self.get(h)?.prototype;
            depth += 1;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_key(s: &str) -> PropertyKey {
        PropertyKey::string(s)
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    // -----------------------------------------------------------------------
    // 1. Keys
    // -----------------------------------------------------------------------

    #[test]
    fn array_index_keys() {
        assert_eq!(str_key("0").as_array_index(), Some(0));
        assert_eq!(str_key("12").as_array_index(), Some(12));
        assert_eq!(str_key("01").as_array_index(), None);
        assert_eq!(str_key("x").as_array_index(), None);
        assert_eq!(PropertyKey::Symbol(SymbolId(9)).as_array_index(), None);
    }

    // -----------------------------------------------------------------------
    // 2. Descriptor attribute checks
    // -----------------------------------------------------------------------

    #[test]
    fn define_rejects_non_configurable_changes() {
        let mut obj = ObjectRecord::default();
        assert!(obj.define_own_property(str_key("a"), PropertyDescriptor::data_frozen(num(1.0))));
        // Cannot make configurable again.
        assert!(!obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(2.0))));
        // Cannot change the value of a frozen property.
        assert!(!obj.define_own_property(str_key("a"), PropertyDescriptor::data_frozen(num(2.0))));
        // Idempotent redefinition with the same value is fine.
        assert!(obj.define_own_property(str_key("a"), PropertyDescriptor::data_frozen(num(1.0))));
    }

    #[test]
    fn define_rejects_new_keys_on_non_extensible() {
        let mut obj = ObjectRecord::default();
        obj.extensible = false;
        assert!(!obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(1.0))));
    }

    #[test]
    fn accessor_definition_clears_simple() {
        let mut obj = ObjectRecord::default();
        assert!(obj.simple);
        obj.define_own_property(
            str_key("a"),
            PropertyDescriptor::Accessor {
                get: None,
                set: None,
                enumerable: true,
                configurable: true,
            },
        );
        assert!(!obj.simple);
    }

    #[test]
    fn delete_respects_configurability() {
        let mut obj = ObjectRecord::default();
        obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(1.0)));
        obj.define_own_property(str_key("b"), PropertyDescriptor::data_frozen(num(2.0)));
        assert!(obj.delete_property(&str_key("a")));
        assert!(!obj.delete_property(&str_key("b")));
        assert!(obj.delete_property(&str_key("missing")));
    }

    // -----------------------------------------------------------------------
    // 3. Key ordering
    // -----------------------------------------------------------------------

    #[test]
    fn own_keys_order_indices_then_insertion() {
        let mut obj = ObjectRecord::default();
        obj.define_own_property(str_key("b"), PropertyDescriptor::data(num(1.0)));
        obj.define_own_property(str_key("2"), PropertyDescriptor::data(num(2.0)));
        obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(3.0)));
        obj.define_own_property(str_key("0"), PropertyDescriptor::data(num(4.0)));
        let keys: Vec<String> = obj
            .own_property_keys()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, vec!["0", "2", "b", "a"]);
    }

    #[test]
    fn enumerable_keys_skip_non_enumerable() {
        let mut obj = ObjectRecord::default();
        obj.define_own_property(str_key("visible"), PropertyDescriptor::data(num(1.0)));
        obj.define_own_property(str_key("hidden"), PropertyDescriptor::method(num(2.0)));
        assert_eq!(obj.enumerable_string_keys(), vec!["visible"]);
    }

    #[test]
    fn redefinition_keeps_original_insertion_position() {
        let mut obj = ObjectRecord::default();
        obj.define_own_property(str_key("x"), PropertyDescriptor::data(num(1.0)));
        obj.define_own_property(str_key("y"), PropertyDescriptor::data(num(2.0)));
        obj.define_own_property(str_key("x"), PropertyDescriptor::data(num(3.0)));
        assert_eq!(obj.enumerable_string_keys(), vec!["x", "y"]);
    }

    // -----------------------------------------------------------------------
    // 4. Heap and prototype chains
    // -----------------------------------------------------------------------

    #[test]
    fn lookup_walks_prototype_chain() {
        let mut heap = ObjectHeap::new();
        let grandparent = heap.alloc_with_prototype(None);
        heap.get_mut(grandparent)
            .unwrap()
            .define_own_property(str_key("g"), PropertyDescriptor::data(num(1.0)));
        let parent = heap.alloc_with_prototype(Some(grandparent));
        let child = heap.alloc_with_prototype(Some(parent));

        let (owner, desc) = heap
            .lookup_property(child, &str_key("g"))
            .unwrap()
            .unwrap();
        assert_eq!(owner, grandparent);
        assert_eq!(desc.value(), Some(&num(1.0)));
        assert!(heap.lookup_property(child, &str_key("missing")).unwrap().is_none());
    }

    #[test]
    fn cycle_detection() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc_with_prototype(None);
        let b = heap.alloc_with_prototype(Some(a));
        assert!(heap.would_create_cycle(a, b).unwrap());
        assert!(!heap.would_create_cycle(b, a).unwrap());
    }

    #[test]
    fn heap_truncate_drops_new_objects() {
        let mut heap = ObjectHeap::new();
        let keep = heap.alloc_with_prototype(None);
        let mark = heap.len();
        heap.alloc_with_prototype(None);
        heap.truncate(mark);
        assert_eq!(heap.len(), 1);
        assert!(heap.get(keep).is_ok());
        assert!(heap.get(ObjectHandle(1)).is_err());
    }

    #[test]
    fn restore_property_roundtrip() {
        let mut obj = ObjectRecord::default();
        obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(1.0)));
        let prior = obj.get_own_property(&str_key("a")).cloned();
        obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(2.0)));
        obj.restore_property(&str_key("a"), prior);
        assert_eq!(
            obj.get_own_property(&str_key("a")).unwrap().value(),
            Some(&num(1.0))
        );
        obj.restore_property(&str_key("a"), None);
        assert!(!obj.has_own_property(&str_key("a")));
    }

    // -----------------------------------------------------------------------
    // 5. Serde round-trips
    // -----------------------------------------------------------------------

    #[test]
    fn descriptor_serde_roundtrip() {
        let descriptors = [
            PropertyDescriptor::data(num(42.0)),
            PropertyDescriptor::data_frozen(Value::string("frozen")),
            PropertyDescriptor::Accessor {
                get: Some(Value::Object(ObjectHandle(1))),
                set: None,
                enumerable: true,
                configurable: false,
            },
        ];
        for desc in descriptors {
            let json = serde_json::to_string(&desc).unwrap();
            let back: PropertyDescriptor = serde_json::from_str(&json).unwrap();
            assert_eq!(desc, back);
        }
    }
}
