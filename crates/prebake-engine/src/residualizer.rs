//! Residualizer: decide what survives, name it, order it, print it.
//!
//! Two passes over the final heap and the root generator.
//!
//! **Visit** walks values transitively from the roots (global bindings,
//! externally touched properties, the arguments of every non-droppable
//! generator entry, the program completion value) and computes the set of
//! abstract values that must be declared. Pure entries whose declared
//! value is never demanded stay delayed and are dropped at emission.
//!
//! **Emit** walks the generator in recorded order, serializing entry
//! arguments on demand: literals for primitives, identifiers for already
//! declared values, shell-plus-assignment declarations for freshly
//! reached objects (so cyclic graphs never need forward references).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ast::{
    BlockStatement, Expression, ExpressionStatement, ForInStatement, ForInTarget,
    FunctionExpression, IfStatement, MemberKey, ParseGoal, Program, SourceSpan, Statement,
    ThrowStatement, UnaryOp, VariableDeclaration, VariableDeclarator, VariableKind,
};
use crate::codegen::{self, CanonicalPrinter, PrintOptions, ProgramPrinter};
use crate::completions::Completion;
use crate::diagnostics::{EngineError, EngineResult};
use crate::effects::{EffectEntry, EffectGenerator, EffectTemplate};
use crate::mutation_log::MutationDelta;
use crate::objects::{Callable, ObjectRecord, PropertyDescriptor, PropertyKey};
use crate::realm::{EngineEventKind, Realm};
use crate::values::{AbstractId, ObjectHandle, SourceTemplate, TemplatePart, Value};

/// The residual program plus its printed form and fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualOutput {
    pub program: Program,
    pub code: String,
    pub hash: String,
}

fn span() -> SourceSpan {
    SourceSpan::synthetic()
}

// ---------------------------------------------------------------------------
// Driver entry
// ---------------------------------------------------------------------------

/// Residualize the realm's final state plus the program completion.
pub fn residualize(realm: &mut Realm, completion: Completion) -> EngineResult<ResidualOutput> {
    realm.record_event(EngineEventKind::ResidualizationStarted, "residualize");

    let completion_value = record_completion_effects(realm, completion)?;
    let root = realm.take_root_generator()?;
    let var_names = realm.envs.global_var_names(realm.global_env)?;
    let lexical_names = realm.envs.declarative_names(realm.global_env)?;

    let mut emitter = Emitter::new(realm);
    emitter.reserve_user_names(&var_names, &lexical_names)?;
    emitter.visit(&root, &var_names, &lexical_names, completion_value.as_ref())?;
    emitter.prename_global_objects(&var_names)?;

    let effect_statements = emitter.emit_generator(&root)?;
    emitter.statements.extend(effect_statements);
    emitter.emit_global_state(&var_names, &lexical_names)?;
    emitter.emit_external_writes(&var_names)?;
    if let Some(value) = completion_value {
        if !matches!(value, Value::Undefined) {
            let expression = emitter.serialize_value(&value)?;
            emitter.statements.push(Statement::Expression(ExpressionStatement {
                expression,
                span: span(),
            }));
        }
    }

    let mut body = Vec::new();
    for declaration in emitter.realm.prelude.declarations() {
        body.push(Statement::Variable(VariableDeclaration {
            kind: VariableKind::Var,
            declarators: vec![VariableDeclarator {
                name: declaration.name.clone(),
                init: Some(Expression::Raw {
                    text: declaration.path.clone(),
                    span: span(),
                }),
                span: span(),
            }],
            span: span(),
        }));
    }
    body.extend(std::mem::take(&mut emitter.statements));

    let program = Program::new(ParseGoal::Script, body, span());
    let printed = CanonicalPrinter.print(&program, &PrintOptions::default());
    let hash = printed.content_hash();
    realm.record_event(EngineEventKind::ResidualizationFinished, hash.clone());
    Ok(ResidualOutput {
        program,
        code: printed.code,
        hash,
    })
}

/// Convert a top-level completion into generator entries; returns the
/// normal completion value, if any.
fn record_completion_effects(
    realm: &mut Realm,
    completion: Completion,
) -> EngineResult<Option<Value>> {
    match completion {
        Completion::Normal(value) => Ok(Some(value)),
        Completion::Throw { value, .. } => {
            realm.active_generator().emit_throw(value);
            Ok(None)
        }
        Completion::Joined(joined) => {
            let consequent = generator_for_abrupt(&joined.consequent);
            let alternate = generator_for_abrupt(&joined.alternate);
            realm
                .active_generator()
                .push_conditional(joined.condition, consequent, alternate);
            Ok(None)
        }
        Completion::PossiblyNormal(pending) => {
            let abrupt = generator_for_abrupt(&pending.abrupt);
            let empty = EffectGenerator::new("normal-path");
            if pending.condition_selects_normal {
                realm
                    .active_generator()
                    .push_conditional(pending.condition, empty, abrupt);
            } else {
                realm
                    .active_generator()
                    .push_conditional(pending.condition, abrupt, empty);
            }
            Ok(Some(pending.normal_value))
        }
        other => Err(EngineError::Invariant(format!(
            "loop completion escaped to the program top level: {other:?}"
        ))),
    }
}

fn generator_for_abrupt(completion: &Completion) -> EffectGenerator {
    let mut generator = EffectGenerator::new("abrupt");
    match completion {
        Completion::Throw { value, .. } => generator.emit_throw(value.clone()),
        Completion::Joined(joined) => {
            let consequent = generator_for_abrupt(&joined.consequent);
            let alternate = generator_for_abrupt(&joined.alternate);
            generator.push_conditional(joined.condition.clone(), consequent, alternate);
        }
        _ => {}
    }
    generator
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

struct Emitter<'a> {
    realm: &'a mut Realm,
    statements: Vec<Statement>,
    needed: BTreeSet<AbstractId>,
    visited_objects: BTreeSet<ObjectHandle>,
    object_names: BTreeMap<ObjectHandle, String>,
    abstract_names: BTreeMap<AbstractId, String>,
    emitted_objects: BTreeSet<ObjectHandle>,
    initial_heap_len: usize,
}

impl<'a> Emitter<'a> {
    fn new(realm: &'a mut Realm) -> Self {
        let initial_heap_len = realm.initial_mark.heap_len;
        Self {
            realm,
            statements: Vec::new(),
            needed: BTreeSet::new(),
            visited_objects: BTreeSet::new(),
            object_names: BTreeMap::new(),
            abstract_names: BTreeMap::new(),
            emitted_objects: BTreeSet::new(),
            initial_heap_len,
        }
    }

    fn is_pre_existing(&self, handle: ObjectHandle) -> bool {
        (handle.0 as usize) < self.initial_heap_len
    }

    /// Surviving user bindings keep their names; the generator must not
    /// collide with them.
    fn reserve_user_names(
        &mut self,
        var_names: &[String],
        lexical_names: &[String],
    ) -> EngineResult<()> {
        for name in var_names.iter().chain(lexical_names.iter()) {
            self.realm.names.forbid(name);
        }
        Ok(())
    }

    // -- Pass 1: visit ------------------------------------------------------

    fn visit(
        &mut self,
        root: &EffectGenerator,
        var_names: &[String],
        lexical_names: &[String],
        completion_value: Option<&Value>,
    ) -> EngineResult<()> {
        // Pure entries are delayed: their declared value is demanded only
        // if a later visit reaches it.
        let mut pure_decl_args: BTreeMap<AbstractId, Vec<Value>> = BTreeMap::new();
        collect_pure_declarations(root, &mut pure_decl_args);

        let mut worklist: Vec<Value> = Vec::new();
        collect_required_entry_args(root, &mut worklist);
        for name in var_names.iter().chain(lexical_names.iter()) {
            if let Ok(Ok(value)) =
                self.realm
                    .envs
                    .get_binding(&self.realm.heap, self.realm.global_env, name)
            {
                worklist.push(value);
            }
        }
        if let Some(value) = completion_value {
            worklist.push(value.clone());
        }
        for (_, _, descriptor) in self.external_write_set(var_names)? {
            if let Some(descriptor) = descriptor {
                if let Some(value) = descriptor.value() {
                    worklist.push(value.clone());
                }
            }
        }

        while let Some(value) = worklist.pop() {
            match value {
                Value::Abstract(id) => {
                    if self.needed.insert(id) {
                        worklist.extend(self.realm.abstracts.get(id).args.iter().cloned());
                        if let Some(args) = pure_decl_args.get(&id) {
                            worklist.extend(args.iter().cloned());
                        }
                    }
                }
                Value::Object(handle) => {
                    if self.is_pre_existing(handle) {
                        continue;
                    }
                    if self.visited_objects.insert(handle) {
                        let record = self.realm.heap.get(handle)?.clone();
                        if let Some(proto) = record.prototype {
                            worklist.push(Value::Object(proto));
                        }
                        for descriptor in record.properties.values() {
                            match descriptor {
                                PropertyDescriptor::Data { value, .. } => {
                                    worklist.push(value.clone())
                                }
                                PropertyDescriptor::Accessor { get, set, .. } => {
                                    if let Some(get) = get {
                                        worklist.push(get.clone());
                                    }
                                    if let Some(set) = set {
                                        worklist.push(set.clone());
                                    }
                                }
                            }
                        }
                        for slot_value in record.internal_slots.values() {
                            worklist.push(slot_value.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Give fresh objects stored in global `var` bindings the binding's
    /// own name, so `var t = {}` survives under its source name.
    fn prename_global_objects(&mut self, var_names: &[String]) -> EngineResult<()> {
        for name in var_names {
            let value = match self.realm.envs.get_binding(
                &self.realm.heap,
                self.realm.global_env,
                name,
            )? {
                Ok(value) => value,
                Err(_) => continue,
            };
            if let Value::Object(handle) = value {
                // External stand-ins keep their source path; everything
                // else adopts the binding's name.
                let external = self.realm.heap.get(handle)?.intrinsic_name.is_some();
                if !external
                    && !self.is_pre_existing(handle)
                    && !self.object_names.contains_key(&handle)
                {
                    self.object_names.insert(handle, name.clone());
                }
            }
        }
        Ok(())
    }

    // -- Pass 2: emit -------------------------------------------------------

    fn emit_generator(&mut self, generator: &EffectGenerator) -> EngineResult<Vec<Statement>> {
        let mut statements = Vec::new();
        for entry in &generator.entries {
            if let Some(statement) = self.emit_entry(entry)? {
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    fn emit_entry(&mut self, entry: &EffectEntry) -> EngineResult<Option<Statement>> {
        match &entry.template {
            EffectTemplate::Derived { template } => {
                let declared = entry.declared.ok_or_else(|| {
                    EngineError::Invariant("derived entry without declared value".to_string())
                })?;
                if entry.pure && !self.needed.contains(&declared) {
                    return Ok(None);
                }
                let expression = self.expand_template(template, &entry.args)?;
                let name = self.realm.names.generate("derived");
                self.abstract_names.insert(declared, name.clone());
                Ok(Some(Statement::Variable(VariableDeclaration {
                    kind: VariableKind::Var,
                    declarators: vec![VariableDeclarator {
                        name,
                        init: Some(expression),
                        span: span(),
                    }],
                    span: span(),
                })))
            }
            EffectTemplate::Invariant { condition, message } => {
                // An invariant guards a derived declaration; it drops with
                // that declaration.
                for arg in &entry.args {
                    if let Value::Abstract(id) = arg {
                        if !self.abstract_names.contains_key(id) {
                            return Ok(None);
                        }
                    }
                }
                let test = self.expand_template(condition, &entry.args)?;
                let throw = Statement::Throw(ThrowStatement {
                    argument: Expression::New {
                        callee: Box::new(identifier("Error")),
                        arguments: vec![Expression::StringLiteral {
                            value: format!("model invariant violation: {message}"),
                            span: span(),
                        }],
                        span: span(),
                    },
                    span: span(),
                });
                Ok(Some(Statement::If(IfStatement {
                    test,
                    consequent: Box::new(throw),
                    alternate: None,
                    span: span(),
                })))
            }
            EffectTemplate::GlobalAssignment { name } => {
                let value = self.serialize_value(&entry.args[0])?;
                Ok(Some(expression_statement(Expression::Assignment {
                    operator: crate::ast::AssignOp::Assign,
                    target: Box::new(identifier(name)),
                    value: Box::new(value),
                    span: span(),
                })))
            }
            EffectTemplate::GlobalDelete { name } => {
                Ok(Some(expression_statement(Expression::Unary {
                    operator: UnaryOp::Delete,
                    argument: Box::new(identifier(name)),
                    span: span(),
                })))
            }
            EffectTemplate::PropertyAssignment => {
                let object = self.serialize_value(&entry.args[0])?;
                let key = self.member_key(&entry.args[1])?;
                let value = self.serialize_value(&entry.args[2])?;
                Ok(Some(expression_statement(Expression::Assignment {
                    operator: crate::ast::AssignOp::Assign,
                    target: Box::new(Expression::Member {
                        object: Box::new(object),
                        key,
                        span: span(),
                    }),
                    value: Box::new(value),
                    span: span(),
                })))
            }
            EffectTemplate::DefineProperty {
                writable,
                enumerable,
                configurable,
                accessor,
            } => {
                let object = codegen::print_operand(&self.serialize_value(&entry.args[0])?);
                let key = codegen::print_expression(&self.serialize_value(&entry.args[1])?);
                let text = if *accessor {
                    let get = codegen::print_expression(&self.serialize_value(&entry.args[2])?);
                    let set = codegen::print_expression(&self.serialize_value(&entry.args[3])?);
                    format!(
                        "Object.defineProperty({object}, {key}, {{get: {get}, set: {set}, enumerable: {enumerable}, configurable: {configurable}}})"
                    )
                } else {
                    let value = codegen::print_expression(&self.serialize_value(&entry.args[2])?);
                    format!(
                        "Object.defineProperty({object}, {key}, {{value: {value}, writable: {writable}, enumerable: {enumerable}, configurable: {configurable}}})"
                    )
                };
                Ok(Some(expression_statement(Expression::Raw {
                    text,
                    span: span(),
                })))
            }
            EffectTemplate::PropertyDelete => {
                let object = self.serialize_value(&entry.args[0])?;
                let key = self.member_key(&entry.args[1])?;
                Ok(Some(expression_statement(Expression::Unary {
                    operator: UnaryOp::Delete,
                    argument: Box::new(Expression::Member {
                        object: Box::new(object),
                        key,
                        span: span(),
                    }),
                    span: span(),
                })))
            }
            EffectTemplate::Call => {
                let callee = self.serialize_value(&entry.args[0])?;
                let mut arguments = Vec::new();
                for arg in &entry.args[1..] {
                    arguments.push(self.serialize_value(arg)?);
                }
                Ok(Some(expression_statement(Expression::Call {
                    callee: Box::new(callee),
                    arguments,
                    span: span(),
                })))
            }
            EffectTemplate::VoidExpression => {
                let argument = self.serialize_value(&entry.args[0])?;
                Ok(Some(expression_statement(Expression::Unary {
                    operator: UnaryOp::Void,
                    argument: Box::new(argument),
                    span: span(),
                })))
            }
            EffectTemplate::ConsoleLog => {
                let mut arguments = Vec::new();
                for arg in &entry.args {
                    arguments.push(self.serialize_value(arg)?);
                }
                Ok(Some(expression_statement(Expression::Call {
                    callee: Box::new(Expression::Member {
                        object: Box::new(identifier("console")),
                        key: MemberKey::Static("log".to_string()),
                        span: span(),
                    }),
                    arguments,
                    span: span(),
                })))
            }
            EffectTemplate::Conditional => {
                let test = self.serialize_value(&entry.args[0])?;
                let consequent_body = self.emit_generator(&entry.children[0])?;
                let alternate_body = if entry.children.len() > 1 {
                    self.emit_generator(&entry.children[1])?
                } else {
                    Vec::new()
                };
                if consequent_body.is_empty() && alternate_body.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Statement::If(IfStatement {
                    test,
                    consequent: Box::new(Statement::Block(BlockStatement {
                        body: consequent_body,
                        span: span(),
                    })),
                    alternate: if alternate_body.is_empty() {
                        None
                    } else {
                        Some(Box::new(Statement::Block(BlockStatement {
                            body: alternate_body,
                            span: span(),
                        })))
                    },
                    span: span(),
                })))
            }
            EffectTemplate::ResidualForIn => {
                let declared = entry.declared.ok_or_else(|| {
                    EngineError::Invariant("residual for-in without a loop key".to_string())
                })?;
                let key_name = self.loop_key_name(declared);
                let source = self.serialize_value(&entry.args[0])?;
                let target = self.serialize_value(&entry.args[1])?;
                let key_expr = identifier(&key_name);
                let body = expression_statement(Expression::Assignment {
                    operator: crate::ast::AssignOp::Assign,
                    target: Box::new(Expression::Member {
                        object: Box::new(target),
                        key: MemberKey::Computed(Box::new(key_expr.clone())),
                        span: span(),
                    }),
                    value: Box::new(Expression::Member {
                        object: Box::new(source.clone()),
                        key: MemberKey::Computed(Box::new(key_expr)),
                        span: span(),
                    }),
                    span: span(),
                });
                Ok(Some(Statement::ForIn(ForInStatement {
                    left: ForInTarget::Declaration(VariableKind::Var, key_name),
                    right: source,
                    body: Box::new(Statement::Block(BlockStatement {
                        body: vec![body],
                        span: span(),
                    })),
                    span: span(),
                })))
            }
            EffectTemplate::Throw => {
                let argument = self.serialize_throw_argument(&entry.args[0])?;
                Ok(Some(Statement::Throw(ThrowStatement {
                    argument,
                    span: span(),
                })))
            }
        }
    }

    /// Loop keys keep their source name when it is free.
    fn loop_key_name(&mut self, declared: AbstractId) -> String {
        let desired = self
            .realm
            .abstracts
            .get(declared)
            .template
            .parts
            .iter()
            .find_map(|part| match part {
                TemplatePart::Text(text) => Some(text.clone()),
                TemplatePart::Arg(_) => None,
            })
            .unwrap_or_default();
        // The loop key usually is a user binding; keep its source name.
        let name = if desired.is_empty() {
            self.realm.names.generate("key")
        } else {
            self.realm.names.forbid(&desired);
            desired
        };
        self.abstract_names.insert(declared, name.clone());
        name
    }

    /// A fresh, otherwise-unreferenced error object inlines as its `new
    /// Error(…)` shell instead of a named declaration.
    fn serialize_throw_argument(&mut self, value: &Value) -> EngineResult<Expression> {
        if let Value::Object(handle) = value {
            if !self.is_pre_existing(*handle) && !self.object_names.contains_key(handle) {
                let record = self.realm.heap.get(*handle)?.clone();
                let is_error = matches!(
                    record.class_tag.as_deref(),
                    Some("Error" | "TypeError" | "ReferenceError" | "RangeError" | "SyntaxError")
                );
                let only_message = record
                    .own_property_keys()
                    .iter()
                    .all(|k| k.as_string() == Some("message"));
                if is_error && only_message && record.intrinsic_name.is_none() {
                    let (shell, _) = self.shell_for(&record)?;
                    return Ok(shell);
                }
            }
        }
        self.serialize_value(value)
    }

    fn member_key(&mut self, key: &Value) -> EngineResult<MemberKey> {
        if let Value::Str(text) = key {
            if is_identifier_text(text) {
                return Ok(MemberKey::Static(text.clone()));
            }
        }
        let expression = self.serialize_value(key)?;
        Ok(MemberKey::Computed(Box::new(expression)))
    }

    // -- Value serialization ------------------------------------------------

    fn serialize_value(&mut self, value: &Value) -> EngineResult<Expression> {
        match value {
            Value::Undefined => Ok(Expression::Raw {
                text: "void 0".to_string(),
                span: span(),
            }),
            Value::Null => Ok(Expression::NullLiteral { span: span() }),
            Value::Bool(b) => Ok(Expression::BooleanLiteral {
                value: *b,
                span: span(),
            }),
            Value::Number(n) => {
                if n.is_nan() {
                    Ok(Expression::Raw {
                        text: "NaN".to_string(),
                        span: span(),
                    })
                } else if n.is_infinite() {
                    Ok(Expression::Raw {
                        text: if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string(),
                        span: span(),
                    })
                } else {
                    Ok(Expression::NumberLiteral {
                        value: *n,
                        span: span(),
                    })
                }
            }
            Value::Str(text) => Ok(Expression::StringLiteral {
                value: text.clone(),
                span: span(),
            }),
            Value::Symbol(_) => Ok(Expression::Raw {
                text: "Symbol()".to_string(),
                span: span(),
            }),
            Value::Object(handle) => self.serialize_object_reference(*handle),
            Value::Abstract(id) => {
                if let Some(name) = self.abstract_names.get(id) {
                    return Ok(identifier(name));
                }
                let abstract_value = self.realm.abstracts.get(*id).clone();
                self.expand_template(&abstract_value.template, &abstract_value.args)
            }
        }
    }

    fn serialize_object_reference(&mut self, handle: ObjectHandle) -> EngineResult<Expression> {
        if let Some(name) = self.object_names.get(&handle) {
            if self.emitted_objects.contains(&handle) {
                return Ok(identifier(name));
            }
        }
        // Intrinsics and external stand-ins are known by a source path
        // rather than re-materialized.
        let path = self.realm.heap.get(handle)?.intrinsic_name.clone();
        if let Some(path) = path {
            if path.contains('.') {
                let name = self.realm.prelude.memoize(&mut self.realm.names, &path);
                return Ok(identifier(&name));
            }
            return Ok(Expression::Raw {
                text: path,
                span: span(),
            });
        }
        if self.is_pre_existing(handle) {
            return Err(EngineError::Invariant(format!(
                "unnamed pre-existing {handle} escaped"
            )));
        }
        let name = self.emit_object_declaration(handle)?;
        Ok(identifier(&name))
    }

    /// Shell declaration plus property-assignment statements; cycles are
    /// safe because the name is registered before any property value is
    /// serialized.
    fn emit_object_declaration(&mut self, handle: ObjectHandle) -> EngineResult<String> {
        let record = self.realm.heap.get(handle)?.clone();
        let name = match self.object_names.get(&handle) {
            Some(existing) => existing.clone(),
            None => {
                let hint = record.class_tag.as_deref().unwrap_or("obj");
                let generated = self.realm.names.generate(hint);
                self.object_names.insert(handle, generated.clone());
                generated
            }
        };
        self.emitted_objects.insert(handle);

        let (shell, skip_keys) = self.shell_for(&record)?;
        self.statements.push(Statement::Variable(VariableDeclaration {
            kind: VariableKind::Var,
            declarators: vec![VariableDeclarator {
                name: name.clone(),
                init: Some(shell),
                span: span(),
            }],
            span: span(),
        }));

        for key in record.own_property_keys() {
            let Some(key_text) = key.as_string() else {
                // Symbol-keyed properties have no stable source form.
                continue;
            };
            if skip_keys.iter().any(|k| k == key_text) {
                continue;
            }
            let Some(descriptor) = record.get_own_property(&key) else {
                continue;
            };
            match descriptor {
                PropertyDescriptor::Data {
                    value,
                    writable: true,
                    enumerable: true,
                    configurable: true,
                } => {
                    let value_expr = self.serialize_value(&value.clone())?;
                    let member_key = self.member_key(&Value::string(key_text))?;
                    self.statements.push(expression_statement(Expression::Assignment {
                        operator: crate::ast::AssignOp::Assign,
                        target: Box::new(Expression::Member {
                            object: Box::new(identifier(&name)),
                            key: member_key,
                            span: span(),
                        }),
                        value: Box::new(value_expr),
                        span: span(),
                    }));
                }
                PropertyDescriptor::Data {
                    value,
                    writable,
                    enumerable,
                    configurable,
                } => {
                    let value_text =
                        codegen::print_expression(&self.serialize_value(&value.clone())?);
                    let text = format!(
                        "Object.defineProperty({name}, {}, {{value: {value_text}, writable: {writable}, enumerable: {enumerable}, configurable: {configurable}}})",
                        codegen::quote_js_string(key_text)
                    );
                    self.statements.push(expression_statement(Expression::Raw {
                        text,
                        span: span(),
                    }));
                }
                PropertyDescriptor::Accessor {
                    get,
                    set,
                    enumerable,
                    configurable,
                } => {
                    let get_text = match get {
                        Some(get) => codegen::print_expression(&self.serialize_value(&get.clone())?),
                        None => "void 0".to_string(),
                    };
                    let set_text = match set {
                        Some(set) => codegen::print_expression(&self.serialize_value(&set.clone())?),
                        None => "void 0".to_string(),
                    };
                    let text = format!(
                        "Object.defineProperty({name}, {}, {{get: {get_text}, set: {set_text}, enumerable: {enumerable}, configurable: {configurable}}})",
                        codegen::quote_js_string(key_text)
                    );
                    self.statements.push(expression_statement(Expression::Raw {
                        text,
                        span: span(),
                    }));
                }
            }
        }
        Ok(name)
    }

    /// The shell expression for a fresh object, plus keys the shell
    /// already covers.
    fn shell_for(&mut self, record: &ObjectRecord) -> EngineResult<(Expression, Vec<String>)> {
        if let Some(Callable::User(function)) = &record.callable {
            let shell = Expression::Function(FunctionExpression {
                name: function.name.clone(),
                params: function.params.clone(),
                body: function.body.clone(),
                span: span(),
            });
            return Ok((
                shell,
                vec![
                    "length".to_string(),
                    "name".to_string(),
                    "prototype".to_string(),
                ],
            ));
        }
        match record.class_tag.as_deref() {
            Some("Array") => Ok((
                Expression::ArrayLiteral {
                    elements: Vec::new(),
                    span: span(),
                },
                vec!["length".to_string()],
            )),
            Some(tag @ ("Error" | "TypeError" | "ReferenceError" | "RangeError" | "SyntaxError")) => {
                let message = record
                    .get_own_property(&PropertyKey::string("message"))
                    .and_then(|d| d.value().cloned());
                let arguments = match message {
                    Some(value) => vec![self.serialize_value(&value)?],
                    None => Vec::new(),
                };
                Ok((
                    Expression::New {
                        callee: Box::new(identifier(tag)),
                        arguments,
                        span: span(),
                    },
                    vec!["message".to_string()],
                ))
            }
            _ => Ok((
                Expression::ObjectLiteral {
                    properties: Vec::new(),
                    span: span(),
                },
                Vec::new(),
            )),
        }
    }

    // -- Global state --------------------------------------------------------

    fn emit_global_state(
        &mut self,
        var_names: &[String],
        lexical_names: &[String],
    ) -> EngineResult<()> {
        for name in var_names {
            let value = match self.realm.envs.get_binding(
                &self.realm.heap,
                self.realm.global_env,
                name,
            )? {
                Ok(value) => value,
                Err(_) => continue,
            };
            match &value {
                Value::Object(handle)
                    if self.object_names.get(handle) == Some(name)
                        && !self.is_pre_existing(*handle) =>
                {
                    // The declaration itself carries the binding's name.
                    if !self.emitted_objects.contains(handle) {
                        self.emit_object_declaration(*handle)?;
                    }
                }
                Value::Undefined => {
                    self.statements.push(Statement::Variable(VariableDeclaration {
                        kind: VariableKind::Var,
                        declarators: vec![VariableDeclarator {
                            name: name.clone(),
                            init: None,
                            span: span(),
                        }],
                        span: span(),
                    }));
                }
                other => {
                    let init = self.serialize_value(other)?;
                    // A binding that residualizes to itself (residual
                    // for-in loop keys) is already declared by its loop.
                    if matches!(&init, Expression::Identifier { name: n, .. } if n == name) {
                        continue;
                    }
                    self.statements.push(Statement::Variable(VariableDeclaration {
                        kind: VariableKind::Var,
                        declarators: vec![VariableDeclarator {
                            name: name.clone(),
                            init: Some(init),
                            span: span(),
                        }],
                        span: span(),
                    }));
                }
            }
        }
        for name in lexical_names {
            let value = match self.realm.envs.own_binding(self.realm.global_env, name)? {
                Some(binding) => binding.value.unwrap_or(Value::Undefined),
                None => continue,
            };
            let init = match &value {
                Value::Undefined => None,
                other => Some(self.serialize_value(other)?),
            };
            self.statements.push(Statement::Variable(VariableDeclaration {
                kind: VariableKind::Var,
                declarators: vec![VariableDeclarator {
                    name: name.clone(),
                    init,
                    span: span(),
                }],
                span: span(),
            }));
        }
        Ok(())
    }

    /// Net writes to pre-existing objects (the global object, intrinsics,
    /// external stand-ins): (object, key, final descriptor). Writes whose
    /// final state equals the pre-interpretation state are elided.
    fn external_write_set(
        &self,
        var_names: &[String],
    ) -> EngineResult<Vec<(ObjectHandle, PropertyKey, Option<PropertyDescriptor>)>> {
        let global = self.realm.global_object();
        let mut earliest_prior: BTreeMap<(ObjectHandle, PropertyKey), Option<PropertyDescriptor>> =
            BTreeMap::new();
        let mut order: Vec<(ObjectHandle, PropertyKey)> = Vec::new();
        for delta in self.realm.log.deltas_since(&self.realm.initial_mark) {
            let MutationDelta::Property { object, key, prior } = delta else {
                continue;
            };
            if !((object.0 as usize) < self.initial_heap_len) {
                continue;
            }
            if *object == global {
                if let Some(text) = key.as_string() {
                    if var_names.iter().any(|n| n == text) {
                        continue;
                    }
                }
            }
            let slot = (*object, key.clone());
            if !earliest_prior.contains_key(&slot) {
                earliest_prior.insert(slot.clone(), prior.clone());
                order.push(slot);
            }
        }
        let mut result = Vec::new();
        for (object, key) in order {
            let current = self.realm.heap.get(object)?.get_own_property(&key).cloned();
            let prior = earliest_prior
                .get(&(object, key.clone()))
                .cloned()
                .unwrap_or(None);
            if current != prior {
                result.push((object, key, current));
            }
        }
        Ok(result)
    }

    fn emit_external_writes(&mut self, var_names: &[String]) -> EngineResult<()> {
        let global = self.realm.global_object();
        for (object, key, descriptor) in self.external_write_set(var_names)? {
            let Some(key_text) = key.as_string().map(str::to_string) else {
                continue;
            };
            let target = if object == global {
                identifier(&key_text)
            } else {
                let base = self.serialize_object_reference(object)?;
                Expression::Member {
                    object: Box::new(base),
                    key: self.member_key(&Value::string(key_text.clone()))?,
                    span: span(),
                }
            };
            match descriptor {
                None => {
                    self.statements.push(expression_statement(Expression::Unary {
                        operator: UnaryOp::Delete,
                        argument: Box::new(target),
                        span: span(),
                    }));
                }
                Some(PropertyDescriptor::Data { value, .. }) => {
                    let value_expr = self.serialize_value(&value)?;
                    self.statements.push(expression_statement(Expression::Assignment {
                        operator: crate::ast::AssignOp::Assign,
                        target: Box::new(target),
                        value: Box::new(value_expr),
                        span: span(),
                    }));
                }
                Some(PropertyDescriptor::Accessor { .. }) => {
                    // Accessor installation on pre-existing objects is not
                    // re-materialized.
                    continue;
                }
            }
        }
        Ok(())
    }

    // -- Templates ----------------------------------------------------------

    fn expand_template(
        &mut self,
        template: &SourceTemplate,
        args: &[Value],
    ) -> EngineResult<Expression> {
        let mut text = String::new();
        for part in &template.parts {
            match part {
                TemplatePart::Text(literal) => text.push_str(literal),
                TemplatePart::Arg(index) => {
                    let arg = args.get(*index).ok_or_else(|| {
                        EngineError::Invariant(format!(
                            "template hole {index} out of range ({} args)",
                            args.len()
                        ))
                    })?;
                    let expression = self.serialize_value(&arg.clone())?;
                    text.push_str(&codegen::print_operand(&expression));
                }
            }
        }
        Ok(Expression::Raw { text, span: span() })
    }
}

fn identifier(name: &str) -> Expression {
    Expression::Identifier {
        name: name.to_string(),
        span: span(),
    }
}

fn expression_statement(expression: Expression) -> Statement {
    Statement::Expression(ExpressionStatement {
        expression,
        span: span(),
    })
}

fn is_identifier_text(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn collect_pure_declarations(
    generator: &EffectGenerator,
    out: &mut BTreeMap<AbstractId, Vec<Value>>,
) {
    for entry in &generator.entries {
        if entry.pure {
            if let Some(declared) = entry.declared {
                out.insert(declared, entry.args.clone());
            }
        }
        for child in &entry.children {
            collect_pure_declarations(child, out);
        }
    }
}

/// Arguments of entries that always survive (everything non-pure),
/// including declared loop keys of residual loops.
fn collect_required_entry_args(generator: &EffectGenerator, out: &mut Vec<Value>) {
    for entry in &generator.entries {
        if !entry.pure {
            out.extend(entry.args.iter().cloned());
        }
        for child in &entry.children {
            collect_required_entry_args(child, out);
        }
    }
}
