//! Transactional modification log for speculative evaluation.
//!
//! Every write to a binding, property or object flag is recorded as a
//! delta before it happens. Speculation takes a [`LogMark`]; discarding
//! the speculation replays the deltas in reverse, then truncates the
//! arenas back to their marked lengths, restoring bit-identical state.
//!
//! The log is a plain stack. Single-threaded discipline makes frames
//! strictly nested, so commit is a no-op (the deltas simply become part
//! of the enclosing frame) and rollback never observes interleaving.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::environment::{Binding, EnvHandle, EnvironmentArena};
use crate::objects::{ObjectHeap, PropertyDescriptor, PropertyKey};
use crate::values::{AbstractArena, ObjectHandle};

/// One reversible state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationDelta {
    Binding {
        env: EnvHandle,
        name: String,
        /// Prior binding record; `None` when the binding did not exist.
        prior: Option<Binding>,
    },
    Property {
        object: ObjectHandle,
        key: PropertyKey,
        /// Prior descriptor; `None` when the property did not exist.
        prior: Option<PropertyDescriptor>,
    },
    Prototype {
        object: ObjectHandle,
        prior: Option<ObjectHandle>,
    },
    Extensible {
        object: ObjectHandle,
        prior: bool,
    },
    PartialBit {
        object: ObjectHandle,
        prior: bool,
    },
    SimpleBit {
        object: ObjectHandle,
        prior: bool,
    },
    /// A var name added to the global record's declaration list.
    GlobalVarName {
        env: EnvHandle,
        name: String,
    },
}

/// Snapshot of log and arena positions at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMark {
    pub deltas: usize,
    pub heap_len: usize,
    pub env_len: usize,
    pub abstract_len: usize,
}

/// The realm's modification log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationLog {
    deltas: Vec<MutationDelta>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn mark(&self, heap: &ObjectHeap, envs: &EnvironmentArena, abstracts: &AbstractArena) -> LogMark {
        LogMark {
            deltas: self.deltas.len(),
            heap_len: heap.len(),
            env_len: envs.len(),
            abstract_len: abstracts.len(),
        }
    }

    pub fn record(&mut self, delta: MutationDelta) {
        self.deltas.push(delta);
    }

    pub fn record_binding(&mut self, env: EnvHandle, name: &str, prior: Option<Binding>) {
        self.record(MutationDelta::Binding {
            env,
            name: name.to_string(),
            prior,
        });
    }

    pub fn record_property(
        &mut self,
        object: ObjectHandle,
        key: PropertyKey,
        prior: Option<PropertyDescriptor>,
    ) {
        self.record(MutationDelta::Property { object, key, prior });
    }

    /// Deltas recorded since `mark`, oldest first.
    pub fn deltas_since(&self, mark: &LogMark) -> &[MutationDelta] {
        &self.deltas[mark.deltas..]
    }

    /// The objects whose properties changed since `mark`, and the bindings
    /// that changed, deduplicated in first-touch order.
    pub fn touched_since(&self, mark: &LogMark) -> (Vec<(ObjectHandle, PropertyKey)>, Vec<(EnvHandle, String)>) {
        let mut properties = Vec::new();
        let mut bindings = Vec::new();
        let mut seen_properties = BTreeSet::new();
        let mut seen_bindings = BTreeSet::new();
        for delta in self.deltas_since(mark) {
            match delta {
                MutationDelta::Property { object, key, .. } => {
                    if seen_properties.insert((*object, key.clone())) {
                        properties.push((*object, key.clone()));
                    }
                }
                MutationDelta::Binding { env, name, .. } => {
                    if seen_bindings.insert((*env, name.clone())) {
                        bindings.push((*env, name.clone()));
                    }
                }
                _ => {}
            }
        }
        (properties, bindings)
    }

    /// Merge a frame into its parent: the deltas stay on the log and will
    /// be undone together with the parent frame if that one rolls back.
    pub fn commit(&mut self, _mark: &LogMark) {}

    /// Undo writes to pre-existing objects and bindings since `mark`, but
    /// keep objects, environments and abstract values created inside the
    /// frame alive (with their final state). Used by branch joins, where
    /// the merged state may conditionally reference branch-created
    /// objects; a full [`Self::rollback_to`] would dangle them.
    pub fn revert_writes(
        &mut self,
        mark: &LogMark,
        heap: &mut ObjectHeap,
        envs: &mut EnvironmentArena,
    ) {
        while self.deltas.len() > mark.deltas {
            let delta = match self.deltas.pop() {
                Some(d) => d,
                None => break,
            };
            match delta {
                MutationDelta::Binding { env, name, prior } => {
                    if (env.0 as usize) < mark.env_len {
                        envs.restore_binding(env, &name, prior);
                    }
                }
                MutationDelta::Property { object, key, prior } => {
                    if (object.0 as usize) < mark.heap_len {
                        if let Ok(record) = heap.get_mut(object) {
                            record.restore_property(&key, prior);
                        }
                    }
                }
                MutationDelta::Prototype { object, prior } => {
                    if (object.0 as usize) < mark.heap_len {
                        if let Ok(record) = heap.get_mut(object) {
                            record.prototype = prior;
                        }
                    }
                }
                MutationDelta::Extensible { object, prior } => {
                    if (object.0 as usize) < mark.heap_len {
                        if let Ok(record) = heap.get_mut(object) {
                            record.extensible = prior;
                        }
                    }
                }
                MutationDelta::PartialBit { object, prior } => {
                    if (object.0 as usize) < mark.heap_len {
                        if let Ok(record) = heap.get_mut(object) {
                            record.partial = prior;
                        }
                    }
                }
                MutationDelta::SimpleBit { object, prior } => {
                    if (object.0 as usize) < mark.heap_len {
                        if let Ok(record) = heap.get_mut(object) {
                            record.simple = prior;
                        }
                    }
                }
                MutationDelta::GlobalVarName { env, name } => {
                    if (env.0 as usize) < mark.env_len {
                        envs.remove_global_var_name(env, &name);
                    }
                }
            }
        }
    }

    /// Undo everything since `mark`: replay deltas in reverse, then
    /// truncate the arenas to their marked lengths. Restores bit-identical
    /// heap and environment state.
    pub fn rollback_to(
        &mut self,
        mark: &LogMark,
        heap: &mut ObjectHeap,
        envs: &mut EnvironmentArena,
        abstracts: &mut AbstractArena,
    ) {
        self.revert_writes(mark, heap, envs);
        heap.truncate(mark.heap_len);
        envs.truncate(mark.env_len);
        abstracts.truncate(mark.abstract_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectRecord;
    use crate::values::Value;

    fn key(s: &str) -> PropertyKey {
        PropertyKey::string(s)
    }

    #[test]
    fn rollback_restores_property_and_drops_created_objects() {
        let mut heap = ObjectHeap::new();
        let mut envs = EnvironmentArena::new();
        let mut abstracts = AbstractArena::new();
        let mut log = MutationLog::new();

        let obj = heap.alloc(ObjectRecord::default());
        heap.get_mut(obj)
            .unwrap()
            .define_own_property(key("x"), PropertyDescriptor::data(Value::Number(1.0)));

        let before = heap.get(obj).unwrap().clone();
        let mark = log.mark(&heap, &envs, &abstracts);

        // Frame: overwrite x, add y, allocate a new object.
        log.record_property(obj, key("x"), before.get_own_property(&key("x")).cloned());
        heap.get_mut(obj)
            .unwrap()
            .define_own_property(key("x"), PropertyDescriptor::data(Value::Number(2.0)));
        log.record_property(obj, key("y"), None);
        heap.get_mut(obj)
            .unwrap()
            .define_own_property(key("y"), PropertyDescriptor::data(Value::Number(3.0)));
        heap.alloc(ObjectRecord::default());

        log.rollback_to(&mark, &mut heap, &mut envs, &mut abstracts);

        assert_eq!(heap.len(), 1);
        assert_eq!(heap.get(obj).unwrap(), &before);
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn rollback_is_bit_identical_after_repeated_writes() {
        let mut heap = ObjectHeap::new();
        let mut envs = EnvironmentArena::new();
        let mut abstracts = AbstractArena::new();
        let mut log = MutationLog::new();

        let obj = heap.alloc(ObjectRecord::default());
        let before = heap.clone();
        let mark = log.mark(&heap, &envs, &abstracts);

        for i in 0..4 {
            let prior = heap.get(obj).unwrap().get_own_property(&key("n")).cloned();
            log.record_property(obj, key("n"), prior);
            heap.get_mut(obj)
                .unwrap()
                .define_own_property(key("n"), PropertyDescriptor::data(Value::Number(f64::from(i))));
        }

        log.rollback_to(&mark, &mut heap, &mut envs, &mut abstracts);
        assert_eq!(heap, before);
    }

    #[test]
    fn touched_since_dedupes_in_first_touch_order() {
        let heap = ObjectHeap::new();
        let envs = EnvironmentArena::new();
        let abstracts = AbstractArena::new();
        let mut log = MutationLog::new();
        let mark = log.mark(&heap, &envs, &abstracts);

        let o = ObjectHandle(0);
        log.record_property(o, key("a"), None);
        log.record_property(o, key("b"), None);
        log.record_property(o, key("a"), None);

        let (properties, bindings) = log.touched_since(&mark);
        assert_eq!(properties.len(), 2);
        assert_eq!(properties[0].1, key("a"));
        assert_eq!(properties[1].1, key("b"));
        assert!(bindings.is_empty());
    }
}
