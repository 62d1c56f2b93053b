//! Effect generator: the tree-shaped log of residual effects.
//!
//! Every externally observable operation the interpreter cannot fold away
//! is appended to the active generator as an [`EffectEntry`]: the ordered
//! argument values (its data dependencies), a build template that the
//! residualizer later expands into a statement, an optional declared
//! abstract value, child generators for conditionals and loops, and a
//! purity flag.
//!
//! Ordering invariant: entries are appended in execution order and are
//! never reordered across entries that share a mutable argument. Entries
//! flagged `pure` whose declared value goes unreferenced may be dropped
//! wholesale by the residualizer.

use serde::{Deserialize, Serialize};

use crate::values::{AbstractId, SourceTemplate, Value};

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Serializable build-node: how an entry expands into a statement.
///
/// Argument conventions are documented per variant; `args[i]` refers to
/// the owning entry's argument vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EffectTemplate {
    /// `name = args[0];`
    GlobalAssignment { name: String },
    /// `delete name;` (no arguments).
    GlobalDelete { name: String },
    /// `args[0][args[1]] = args[2];`
    PropertyAssignment,
    /// Data form: `Object.defineProperty(args[0], args[1], {…value: args[2]})`.
    /// Accessor form (`accessor = true`): get is `args[2]`, set is `args[3]`.
    DefineProperty {
        writable: bool,
        enumerable: bool,
        configurable: bool,
        accessor: bool,
    },
    /// `delete args[0][args[1]];`
    PropertyDelete,
    /// `args[0](args[1], …);`: call for effect only.
    Call,
    /// `void args[0];`
    VoidExpression,
    /// `console.log(args…);`
    ConsoleLog,
    /// `var <declared> = <template expansion over args>;`
    Derived { template: SourceTemplate },
    /// `if (<condition over args>) throw new Error(message);`
    Invariant {
        condition: SourceTemplate,
        message: String,
    },
    /// `if (args[0]) { children[0] } else { children[1] }`
    Conditional,
    /// `for (var <declared> in args[0]) { args[1][<declared>] = args[0][<declared>]; }`
    ResidualForIn,
    /// `throw args[0];`
    Throw,
}

// ---------------------------------------------------------------------------
// Entries and generators
// ---------------------------------------------------------------------------

/// One recorded residual effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEntry {
    /// Ordered argument values; also the entry's data dependencies.
    pub args: Vec<Value>,
    pub template: EffectTemplate,
    /// Fresh abstract value this entry introduces a binding for, if any.
    /// Its identifier is chosen at residualization time.
    pub declared: Option<AbstractId>,
    /// Child generators, expanded inline at this entry's position.
    pub children: Vec<EffectGenerator>,
    /// Droppable when the declared value is never needed.
    pub pure: bool,
}

/// An ordered log of effects. The realm owns the root; speculation frames
/// push children that are merged or discarded wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectGenerator {
    pub label: String,
    pub entries: Vec<EffectEntry>,
}

impl EffectGenerator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::new("root")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, entry: EffectEntry) {
        self.entries.push(entry);
    }

    /// Append another generator's entries in order.
    pub fn append(&mut self, mut other: EffectGenerator) {
        self.entries.append(&mut other.entries);
    }

    // -- Side-effect records ------------------------------------------------

    pub fn emit_global_assignment(&mut self, name: &str, value: Value) {
        self.push(EffectEntry {
            args: vec![value],
            template: EffectTemplate::GlobalAssignment {
                name: name.to_string(),
            },
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_global_delete(&mut self, name: &str) {
        self.push(EffectEntry {
            args: Vec::new(),
            template: EffectTemplate::GlobalDelete {
                name: name.to_string(),
            },
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_property_assignment(&mut self, object: Value, key: Value, value: Value) {
        self.push(EffectEntry {
            args: vec![object, key, value],
            template: EffectTemplate::PropertyAssignment,
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_define_property(
        &mut self,
        object: Value,
        key: Value,
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    ) {
        self.push(EffectEntry {
            args: vec![object, key, value],
            template: EffectTemplate::DefineProperty {
                writable,
                enumerable,
                configurable,
                accessor: false,
            },
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_property_delete(&mut self, object: Value, key: Value) {
        self.push(EffectEntry {
            args: vec![object, key],
            template: EffectTemplate::PropertyDelete,
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_call(&mut self, callee: Value, arguments: Vec<Value>) {
        let mut args = vec![callee];
        args.extend(arguments);
        self.push(EffectEntry {
            args,
            template: EffectTemplate::Call,
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_void_expression(&mut self, value: Value) {
        self.push(EffectEntry {
            args: vec![value],
            template: EffectTemplate::VoidExpression,
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_console_log(&mut self, arguments: Vec<Value>) {
        self.push(EffectEntry {
            args: arguments,
            template: EffectTemplate::ConsoleLog,
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    /// `if (condition over args) throw` guard.
    pub fn emit_invariant(&mut self, args: Vec<Value>, condition: SourceTemplate, message: &str) {
        self.push(EffectEntry {
            args,
            template: EffectTemplate::Invariant {
                condition,
                message: message.to_string(),
            },
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    pub fn emit_throw(&mut self, value: Value) {
        self.push(EffectEntry {
            args: vec![value],
            template: EffectTemplate::Throw,
            declared: None,
            children: Vec::new(),
            pure: false,
        });
    }

    /// Conditional entry wrapping two branch fragments.
    pub fn push_conditional(
        &mut self,
        condition: Value,
        consequent: EffectGenerator,
        alternate: EffectGenerator,
    ) {
        self.push(EffectEntry {
            args: vec![condition],
            template: EffectTemplate::Conditional,
            declared: None,
            children: vec![consequent, alternate],
            pure: false,
        });
    }

    /// Residual `for-in` copy loop; `declared_key` is the fresh abstract
    /// string binding for the loop variable.
    pub fn push_residual_for_in(&mut self, source: Value, target: Value, declared_key: AbstractId) {
        self.push(EffectEntry {
            args: vec![source, target],
            template: EffectTemplate::ResidualForIn,
            declared: Some(declared_key),
            children: Vec::new(),
            pure: false,
        });
    }

    /// Variable-declaration entry for a derived abstract value.
    pub fn push_derived(
        &mut self,
        args: Vec<Value>,
        template: SourceTemplate,
        declared: AbstractId,
        is_pure: bool,
    ) {
        self.push(EffectEntry {
            args,
            template: EffectTemplate::Derived { template },
            declared: Some(declared),
            children: Vec::new(),
            pure: is_pure,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{AbstractId, ObjectHandle};

    #[test]
    fn entries_preserve_emission_order() {
        let mut generator = EffectGenerator::root();
        generator.emit_console_log(vec![Value::string("first")]);
        generator.emit_global_assignment("x", Value::Number(1.0));
        generator.emit_property_delete(Value::Object(ObjectHandle(0)), Value::string("k"));
        assert_eq!(generator.len(), 3);
        assert!(matches!(
            generator.entries[0].template,
            EffectTemplate::ConsoleLog
        ));
        assert!(matches!(
            generator.entries[2].template,
            EffectTemplate::PropertyDelete
        ));
    }

    #[test]
    fn derived_entries_are_pure_and_declared() {
        let mut generator = EffectGenerator::root();
        generator.push_derived(
            vec![Value::Object(ObjectHandle(1))],
            SourceTemplate::member("length"),
            AbstractId(0),
            true,
        );
        let entry = &generator.entries[0];
        assert!(entry.pure);
        assert_eq!(entry.declared, Some(AbstractId(0)));
    }

    #[test]
    fn conditional_carries_both_fragments() {
        let mut consequent = EffectGenerator::new("then");
        consequent.emit_console_log(vec![Value::string("t")]);
        let alternate = EffectGenerator::new("else");

        let mut root = EffectGenerator::root();
        root.push_conditional(Value::Bool(true), consequent, alternate);
        let entry = &root.entries[0];
        assert_eq!(entry.children.len(), 2);
        assert_eq!(entry.children[0].len(), 1);
        assert!(entry.children[1].is_empty());
    }

    #[test]
    fn append_merges_fragments_in_order() {
        let mut parent = EffectGenerator::root();
        parent.emit_global_assignment("a", Value::Number(1.0));
        let mut child = EffectGenerator::new("speculative");
        child.emit_global_assignment("b", Value::Number(2.0));
        parent.append(child);
        assert_eq!(parent.len(), 2);
        assert!(matches!(
            &parent.entries[1].template,
            EffectTemplate::GlobalAssignment { name } if name == "b"
        ));
    }

    #[test]
    fn generator_serde_roundtrip() {
        let mut generator = EffectGenerator::root();
        generator.emit_invariant(
            vec![Value::Abstract(AbstractId(3))],
            SourceTemplate::unary("typeof"),
            "model invariant",
        );
        let json = serde_json::to_string(&generator).unwrap();
        let back: EffectGenerator = serde_json::from_str(&json).unwrap();
        assert_eq!(generator, back);
    }
}
