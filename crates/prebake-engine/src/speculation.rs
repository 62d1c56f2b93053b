//! Speculative evaluation and control-flow joins.
//!
//! `evaluate_node_for_effects` runs a subtree in an isolated effect-capture
//! frame: a fresh child generator, a mutation-log mark, and a revert at
//! the end. The caller inspects the returned [`Speculation`] and either
//! commits it (re-apply the after-state, merge the fragment) or joins two
//! of them under an abstract condition.
//!
//! Joining builds the joined object graph by per-property descriptor
//! merging, emits a conditional generator entry wrapping the branch
//! fragments, and folds the branch completions per the Standard's join
//! algebra. Two differently abrupt completions under an abstract
//! condition cannot be residualized soundly and raise `PP0021`.

use crate::ast::{AssignOp, Expression, ForInStatement, ForInTarget, MemberKey, Statement};
use crate::completions::{Completion, JoinedCompletion, PossiblyNormalCompletion};
use crate::diagnostics::{
    EngineResult, PP_UNJOINABLE_COMPLETIONS, PP_UNSUPPORTED_FOR_IN,
};
use crate::effects::EffectGenerator;
use crate::environment::{Binding, EnvHandle};
use crate::evaluator::{self, EvalCtx};
use crate::expressions::{self, try_value};
use crate::mutation_log::{LogMark, MutationDelta};
use crate::objects::{PropertyDescriptor, PropertyKey};
use crate::realm::{EngineEventKind, Realm};
use crate::values::{
    AbstractKind, ObjectHandle, SourceTemplate, TemplatePart, TypeDomain, TypeTag, Value,
    ValueDomain,
};

// ---------------------------------------------------------------------------
// Speculation frames
// ---------------------------------------------------------------------------

/// Captured result of an isolated effect-capture frame. The frame's writes
/// to pre-existing state have been reverted; objects created inside the
/// frame stay allocated (reachable only through this capture).
#[derive(Debug, Clone, PartialEq)]
pub struct Speculation {
    pub completion: Completion,
    /// Residual effects recorded inside the frame.
    pub fragment: EffectGenerator,
    pub mark: LogMark,
    /// Final values of pre-existing bindings the frame modified.
    pub modified_bindings: Vec<(EnvHandle, String, Option<Binding>)>,
    /// Final descriptors of pre-existing properties the frame modified
    /// (`None` = deleted).
    pub modified_properties: Vec<(ObjectHandle, PropertyKey, Option<PropertyDescriptor>)>,
    /// Objects allocated inside the frame.
    pub created_objects: Vec<ObjectHandle>,
}

impl Speculation {
    /// A frame that did nothing and completed with `completion`.
    pub fn empty(realm: &Realm, completion: Completion) -> Self {
        Self {
            completion,
            fragment: EffectGenerator::new("empty"),
            mark: realm.log.mark(&realm.heap, &realm.envs, &realm.abstracts),
            modified_bindings: Vec::new(),
            modified_properties: Vec::new(),
            created_objects: Vec::new(),
        }
    }
}

fn run_speculation<F>(realm: &mut Realm, label: &str, body: F) -> EngineResult<Speculation>
where
    F: FnOnce(&mut Realm) -> EngineResult<Completion>,
{
    let mark = realm.log.mark(&realm.heap, &realm.envs, &realm.abstracts);
    realm.push_generator(label);
    realm.record_event(EngineEventKind::SpeculationOpened, label);

    let completion = match body(realm) {
        Ok(completion) => completion,
        Err(error) => {
            let _ = realm.pop_generator();
            realm.log.revert_writes(&mark, &mut realm.heap, &mut realm.envs);
            return Err(error);
        }
    };
    let fragment = realm.pop_generator()?;

    let (touched_properties, touched_bindings) = realm.log.touched_since(&mark);
    let mut modified_properties = Vec::new();
    for (object, key) in touched_properties {
        if (object.0 as usize) < mark.heap_len {
            let descriptor = realm.heap.get(object)?.get_own_property(&key).cloned();
            modified_properties.push((object, key, descriptor));
        }
    }
    let mut modified_bindings = Vec::new();
    for (env, name) in touched_bindings {
        if (env.0 as usize) < mark.env_len {
            let binding = realm.envs.own_binding(env, &name)?;
            modified_bindings.push((env, name, binding));
        }
    }
    let created_objects = (mark.heap_len..realm.heap.len())
        .map(|index| ObjectHandle(index as u32))
        .collect();

    realm.log.revert_writes(&mark, &mut realm.heap, &mut realm.envs);
    realm.record_event(EngineEventKind::SpeculationRolledBack, label);

    Ok(Speculation {
        completion,
        fragment,
        mark,
        modified_bindings,
        modified_properties,
        created_objects,
    })
}

/// Execute a statement in a fresh, isolated effect-capture frame.
pub fn evaluate_node_for_effects(
    realm: &mut Realm,
    statement: &Statement,
    ctx: EvalCtx,
    label: &str,
) -> EngineResult<Speculation> {
    run_speculation(realm, label, |r| evaluator::eval_statement(r, statement, ctx))
}

/// Execute an expression in a fresh, isolated effect-capture frame.
pub fn evaluate_expr_for_effects(
    realm: &mut Realm,
    expression: &Expression,
    ctx: EvalCtx,
    label: &str,
) -> EngineResult<Speculation> {
    run_speculation(realm, label, |r| {
        expressions::eval_expression(r, expression, ctx)
    })
}

/// Re-apply a speculation's after-state and merge its fragment into the
/// active generator.
pub fn commit(realm: &mut Realm, speculation: Speculation) -> EngineResult<Completion> {
    for (object, key, descriptor) in &speculation.modified_properties {
        apply_property(realm, *object, key, descriptor.clone())?;
    }
    for (env, name, binding) in &speculation.modified_bindings {
        apply_binding(realm, *env, name, binding.clone())?;
    }
    realm.active_generator().append(speculation.fragment);
    realm.record_event(EngineEventKind::SpeculationCommitted, "commit");
    Ok(speculation.completion)
}

/// Drop a speculation entirely, truncating the objects it created. Only
/// valid while no later allocation has happened (the discard must
/// immediately follow the capture).
pub fn discard(realm: &mut Realm, speculation: &Speculation) {
    realm.heap.truncate(speculation.mark.heap_len);
    realm.envs.truncate(speculation.mark.env_len);
    realm.abstracts.truncate(speculation.mark.abstract_len);
    realm.record_event(EngineEventKind::SpeculationRolledBack, "discard");
}

fn apply_property(
    realm: &mut Realm,
    object: ObjectHandle,
    key: &PropertyKey,
    descriptor: Option<PropertyDescriptor>,
) -> EngineResult<()> {
    let prior = realm.heap.get(object)?.get_own_property(key).cloned();
    if prior == descriptor {
        return Ok(());
    }
    realm.log.record_property(object, key.clone(), prior);
    realm.heap.get_mut(object)?.restore_property(key, descriptor);
    Ok(())
}

fn apply_binding(
    realm: &mut Realm,
    env: EnvHandle,
    name: &str,
    binding: Option<Binding>,
) -> EngineResult<()> {
    let prior = realm.envs.own_binding(env, name)?;
    if prior == binding {
        return Ok(());
    }
    realm.log.record(MutationDelta::Binding {
        env,
        name: name.to_string(),
        prior,
    });
    realm.envs.restore_binding(env, name, binding);
    Ok(())
}

// ---------------------------------------------------------------------------
// Value joins
// ---------------------------------------------------------------------------

fn type_domain_of(realm: &Realm, value: &Value) -> TypeDomain {
    match value {
        Value::Abstract(id) => realm.abstracts.get(*id).types.clone(),
        Value::Object(handle) => match realm.heap.get(*handle) {
            Ok(record) if record.is_callable() => TypeDomain::of(TypeTag::Function),
            _ => TypeDomain::of(TypeTag::Object),
        },
        other => other
            .concrete_tag()
            .map(TypeDomain::of)
            .unwrap_or(TypeDomain::Top),
    }
}

fn value_domain_of(value: &Value) -> ValueDomain {
    match value {
        Value::Abstract(_) => ValueDomain::top(),
        concrete => ValueDomain::of(concrete.clone()),
    }
}

/// Lattice join of two values under an abstract condition: equal values
/// fold, anything else becomes a conditional abstract value.
pub fn join_values(realm: &mut Realm, condition: Value, a: Value, b: Value) -> Value {
    if a.same_value(&b) {
        return a;
    }
    let types = type_domain_of(realm, &a).join(&type_domain_of(realm, &b));
    let values = value_domain_of(&a).join(&value_domain_of(&b));
    let template = SourceTemplate::from_parts(vec![
        TemplatePart::Arg(0),
        TemplatePart::Text(" ? ".to_string()),
        TemplatePart::Arg(1),
        TemplatePart::Text(" : ".to_string()),
        TemplatePart::Arg(2),
    ]);
    realm.create_abstract(
        types,
        values,
        vec![condition, a, b],
        template,
        Some(AbstractKind::Join),
    )
}

// ---------------------------------------------------------------------------
// Branch joins
// ---------------------------------------------------------------------------

/// Join two branch speculations under an abstract condition. Builds the
/// joined heap, emits the conditional generator entry, folds completions.
pub fn join_speculations(
    realm: &mut Realm,
    condition: Value,
    consequent: Speculation,
    alternate: Speculation,
) -> EngineResult<Completion> {
    // Per-property descriptor merge over the union of modified keys.
    let mut keys: Vec<(ObjectHandle, PropertyKey)> = Vec::new();
    for (object, key, _) in consequent
        .modified_properties
        .iter()
        .chain(alternate.modified_properties.iter())
    {
        if !keys.iter().any(|(o, k)| o == object && k == key) {
            keys.push((*object, key.clone()));
        }
    }
    for (object, key) in keys {
        let pre = realm.heap.get(object)?.get_own_property(&key).cloned();
        let then_desc = lookup_modified(&consequent.modified_properties, object, &key)
            .unwrap_or_else(|| pre.clone());
        let else_desc = lookup_modified(&alternate.modified_properties, object, &key)
            .unwrap_or_else(|| pre.clone());
        let merged = merge_descriptors(realm, &condition, then_desc, else_desc)?;
        apply_property(realm, object, &key, merged)?;
    }

    // Binding merge.
    let mut names: Vec<(EnvHandle, String)> = Vec::new();
    for (env, name, _) in consequent
        .modified_bindings
        .iter()
        .chain(alternate.modified_bindings.iter())
    {
        if !names.iter().any(|(e, n)| e == env && n == name) {
            names.push((*env, name.clone()));
        }
    }
    for (env, name) in names {
        let pre = realm.envs.own_binding(env, &name)?;
        let then_binding = lookup_binding(&consequent.modified_bindings, env, &name)
            .unwrap_or_else(|| pre.clone());
        let else_binding = lookup_binding(&alternate.modified_bindings, env, &name)
            .unwrap_or_else(|| pre.clone());
        let merged = merge_bindings(realm, &condition, then_binding, else_binding)?;
        apply_binding(realm, env, &name, merged)?;
    }

    // Temporal effects become one conditional entry.
    if !consequent.fragment.is_empty() || !alternate.fragment.is_empty() {
        realm.active_generator().push_conditional(
            condition.clone(),
            consequent.fragment,
            alternate.fragment,
        );
    }
    realm.record_event(EngineEventKind::SpeculationCommitted, "join");

    join_completions(realm, condition, consequent.completion, alternate.completion)
}

fn lookup_modified(
    modified: &[(ObjectHandle, PropertyKey, Option<PropertyDescriptor>)],
    object: ObjectHandle,
    key: &PropertyKey,
) -> Option<Option<PropertyDescriptor>> {
    modified
        .iter()
        .find(|(o, k, _)| *o == object && k == key)
        .map(|(_, _, d)| d.clone())
}

fn lookup_binding(
    modified: &[(EnvHandle, String, Option<Binding>)],
    env: EnvHandle,
    name: &str,
) -> Option<Option<Binding>> {
    modified
        .iter()
        .find(|(e, n, _)| *e == env && n == name)
        .map(|(_, _, b)| b.clone())
}

/// The joined-descriptor rule. Attribute or shape conflicts between the
/// branches cannot be residualized soundly.
fn merge_descriptors(
    realm: &mut Realm,
    condition: &Value,
    then_desc: Option<PropertyDescriptor>,
    else_desc: Option<PropertyDescriptor>,
) -> EngineResult<Option<PropertyDescriptor>> {
    match (then_desc, else_desc) {
        (None, None) => Ok(None),
        (a, b) if a == b => Ok(a),
        (
            Some(PropertyDescriptor::Data {
                value: then_value,
                writable: w1,
                enumerable: e1,
                configurable: c1,
            }),
            Some(PropertyDescriptor::Data {
                value: else_value,
                writable: w2,
                enumerable: e2,
                configurable: c2,
            }),
        ) => {
            if (w1, e1, c1) != (w2, e2, c2) {
                return Err(realm.fatal(
                    PP_UNJOINABLE_COMPLETIONS,
                    "branches disagree on property attributes",
                ));
            }
            let value = join_values(realm, condition.clone(), then_value, else_value);
            Ok(Some(PropertyDescriptor::Data {
                value,
                writable: w1,
                enumerable: e1,
                configurable: c1,
            }))
        }
        // Property present in one branch only: conditionally present,
        // modeled as a conditional value (absence reads as undefined).
        (Some(PropertyDescriptor::Data { value, writable, enumerable, configurable }), None) => {
            let joined = join_values(realm, condition.clone(), value, Value::Undefined);
            Ok(Some(PropertyDescriptor::Data {
                value: joined,
                writable,
                enumerable,
                configurable,
            }))
        }
        (None, Some(PropertyDescriptor::Data { value, writable, enumerable, configurable })) => {
            let joined = join_values(realm, condition.clone(), Value::Undefined, value);
            Ok(Some(PropertyDescriptor::Data {
                value: joined,
                writable,
                enumerable,
                configurable,
            }))
        }
        // Accessor joined with anything else has no sound reading: the
        // getter could observe the read.
        _ => Err(realm.fatal(
            PP_UNJOINABLE_COMPLETIONS,
            "cannot join an accessor descriptor with a data descriptor across branches",
        )),
    }
}

fn merge_bindings(
    realm: &mut Realm,
    condition: &Value,
    then_binding: Option<Binding>,
    else_binding: Option<Binding>,
) -> EngineResult<Option<Binding>> {
    match (then_binding, else_binding) {
        (None, None) => Ok(None),
        (a, b) if a == b => Ok(a),
        (Some(a), Some(b)) => {
            let then_value = a.value.clone().unwrap_or(Value::Undefined);
            let else_value = b.value.clone().unwrap_or(Value::Undefined);
            let joined = join_values(realm, condition.clone(), then_value, else_value);
            Ok(Some(Binding {
                value: Some(joined),
                ..a
            }))
        }
        (Some(binding), None) | (None, Some(binding)) => {
            // Binding created in one branch only; environments are
            // lexical, so this can only be a global creation.
            let present = binding.value.clone().unwrap_or(Value::Undefined);
            let joined = join_values(realm, condition.clone(), present, Value::Undefined);
            Ok(Some(Binding {
                value: Some(joined),
                ..binding
            }))
        }
    }
}

/// Error kind tag of a thrown value, when recognizable.
fn thrown_error_kind(realm: &Realm, completion: &Completion) -> Option<String> {
    let Completion::Throw { value, .. } = completion else {
        return None;
    };
    let Value::Object(handle) = value else {
        return None;
    };
    realm
        .heap
        .get(*handle)
        .ok()
        .and_then(|record| record.class_tag.clone())
}

fn join_completions(
    realm: &mut Realm,
    condition: Value,
    consequent: Completion,
    alternate: Completion,
) -> EngineResult<Completion> {
    match (consequent, alternate) {
        (Completion::Normal(a), Completion::Normal(b)) => {
            Ok(Completion::Normal(join_values(realm, condition, a, b)))
        }
        (Completion::Return(a), Completion::Return(b)) => {
            Ok(Completion::Return(join_values(realm, condition, a, b)))
        }
        (Completion::Normal(value), abrupt) if abrupt.is_abrupt() => {
            Ok(Completion::PossiblyNormal(Box::new(PossiblyNormalCompletion {
                condition,
                normal_value: value,
                condition_selects_normal: true,
                abrupt,
            })))
        }
        (abrupt, Completion::Normal(value)) if abrupt.is_abrupt() => {
            Ok(Completion::PossiblyNormal(Box::new(PossiblyNormalCompletion {
                condition,
                normal_value: value,
                condition_selects_normal: false,
                abrupt,
            })))
        }
        (consequent, alternate) if consequent.same_abrupt_shape(&alternate) => {
            if consequent.is_throw() {
                let then_kind = thrown_error_kind(realm, &consequent);
                let else_kind = thrown_error_kind(realm, &alternate);
                if then_kind != else_kind {
                    return Err(realm.fatal(
                        PP_UNJOINABLE_COMPLETIONS,
                        "branches throw different error kinds under an abstract condition",
                    ));
                }
            }
            match (consequent, alternate) {
                (
                    Completion::Break { label, value: a },
                    Completion::Break { value: b, .. },
                ) => Ok(Completion::Break {
                    label,
                    value: join_values(realm, condition, a, b),
                }),
                (
                    Completion::Continue { label, value: a },
                    Completion::Continue { value: b, .. },
                ) => Ok(Completion::Continue {
                    label,
                    value: join_values(realm, condition, a, b),
                }),
                (consequent, alternate) => Ok(Completion::Joined(Box::new(JoinedCompletion {
                    condition,
                    consequent,
                    alternate,
                }))),
            }
        }
        _ => Err(realm.fatal(
            PP_UNJOINABLE_COMPLETIONS,
            "cannot join two differently abrupt completions under an abstract condition",
        )),
    }
}

// ---------------------------------------------------------------------------
// Join entry points used by the dispatcher
// ---------------------------------------------------------------------------

/// `if` with an abstract guard: speculate both branches and join.
pub fn join_if_branches(
    realm: &mut Realm,
    test: Value,
    consequent: &Statement,
    alternate: Option<&Statement>,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    let then_spec = evaluate_node_for_effects(realm, consequent, ctx, "if-consequent")?;
    let else_spec = match alternate {
        Some(statement) => evaluate_node_for_effects(realm, statement, ctx, "if-alternate")?,
        None => Speculation::empty(realm, Completion::empty()),
    };
    join_speculations(realm, test, then_spec, else_spec)
}

/// Conditional expression with an abstract guard.
pub fn join_expression_branches(
    realm: &mut Realm,
    test: Value,
    consequent: &Expression,
    alternate: &Expression,
    ctx: EvalCtx,
    _span: crate::ast::SourceSpan,
) -> EngineResult<Completion> {
    let then_spec = evaluate_expr_for_effects(realm, consequent, ctx, "cond-consequent")?;
    let else_spec = evaluate_expr_for_effects(realm, alternate, ctx, "cond-alternate")?;
    join_speculations(realm, test, then_spec, else_spec)
}

/// Short-circuit operator with an abstract left operand.
pub fn join_logical(
    realm: &mut Realm,
    operator: crate::ast::LogicalOp,
    left: Value,
    right: &Expression,
    ctx: EvalCtx,
    _span: crate::ast::SourceSpan,
) -> EngineResult<Completion> {
    let right_spec = evaluate_expr_for_effects(realm, right, ctx, "logical-right")?;
    let left_spec = Speculation::empty(realm, Completion::Normal(left.clone()));
    match operator {
        crate::ast::LogicalOp::And => join_speculations(realm, left, right_spec, left_spec),
        crate::ast::LogicalOp::Or => join_speculations(realm, left, left_spec, right_spec),
    }
}

/// Resume a statement list after a possibly-normal join: the remainder
/// runs speculatively under the normal-path condition and re-joins with
/// the saved abrupt branch.
pub fn continue_after_possibly_normal(
    realm: &mut Realm,
    pending: PossiblyNormalCompletion,
    rest: &[Statement],
    ctx: EvalCtx,
    accumulated: Value,
) -> EngineResult<Completion> {
    let mut rest_spec = run_speculation(realm, "possibly-normal-rest", |r| {
        evaluator::eval_statement_list(r, rest, ctx)
    })?;
    // Fold the accumulated statement value through the normal path.
    if let Completion::Normal(value) = &rest_spec.completion {
        let folded = if matches!(value, Value::Undefined) {
            let base = pending.normal_value.clone();
            if matches!(base, Value::Undefined) {
                accumulated
            } else {
                base
            }
        } else {
            value.clone()
        };
        rest_spec.completion = Completion::Normal(folded);
    }
    let abrupt_spec = Speculation::empty(realm, pending.abrupt);
    if pending.condition_selects_normal {
        join_speculations(realm, pending.condition, rest_spec, abrupt_spec)
    } else {
        join_speculations(realm, pending.condition, abrupt_spec, rest_spec)
    }
}

// ---------------------------------------------------------------------------
// Residual for-in
// ---------------------------------------------------------------------------

/// Does the loop body have exactly the shape `target[k] = source[k]`?
fn for_in_copy_shape<'a>(
    body: &'a Statement,
    loop_var: &str,
) -> Option<(&'a Expression, &'a Expression)> {
    let statement = match body {
        Statement::Block(block) if block.body.len() == 1 => &block.body[0],
        other => other,
    };
    let Statement::Expression(expr_statement) = statement else {
        return None;
    };
    let Expression::Assignment {
        operator: AssignOp::Assign,
        target,
        value,
        ..
    } = &expr_statement.expression
    else {
        return None;
    };
    let Expression::Member {
        object: target_object,
        key: MemberKey::Computed(target_key),
        ..
    } = target.as_ref()
    else {
        return None;
    };
    let Expression::Member {
        object: source_object,
        key: MemberKey::Computed(source_key),
        ..
    } = value.as_ref()
    else {
        return None;
    };
    let is_loop_var = |expr: &Expression| {
        matches!(expr, Expression::Identifier { name, .. } if name == loop_var)
    };
    if is_loop_var(target_key) && is_loop_var(source_key) {
        Some((target_object, source_object))
    } else {
        None
    }
}

/// `for-in` over a simple partial object: accept only the property-copy
/// body shape, replay the copy over build-time-known keys, and emit a
/// residual loop so runtime-only keys are still copied.
pub fn residualize_for_in(
    realm: &mut Realm,
    statement: &ForInStatement,
    source: ObjectHandle,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    let loop_var = match &statement.left {
        ForInTarget::Declaration(_, name) => name.clone(),
        ForInTarget::Pattern(Expression::Identifier { name, .. }) => name.clone(),
        _ => {
            return Err(realm.fatal(
                PP_UNSUPPORTED_FOR_IN,
                "for-in over a partial object requires a simple loop variable",
            ))
        }
    };
    let Some((target_expr, source_expr)) = for_in_copy_shape(&statement.body, &loop_var) else {
        return Err(realm.fatal(
            PP_UNSUPPORTED_FOR_IN,
            "for-in over a partial object supports only the `target[k] = source[k]` body shape",
        ));
    };

    let source_value = try_value!(expressions::eval_expression(realm, source_expr, ctx)?);
    if source_value != Value::Object(source) {
        return Err(realm.fatal(
            PP_UNSUPPORTED_FOR_IN,
            "for-in body must copy from the iterated object",
        ));
    }
    let target_value = try_value!(expressions::eval_expression(realm, target_expr, ctx)?);
    let Value::Object(target) = target_value else {
        return Err(realm.fatal(
            PP_UNSUPPORTED_FOR_IN,
            "for-in copy target must be a concrete object",
        ));
    };
    let target_is_fresh = (target.0 as usize) >= realm.initial_mark.heap_len;
    if !target_is_fresh && !realm.heap.get(target)?.simple {
        return Err(realm.fatal(
            PP_UNSUPPORTED_FOR_IN,
            "for-in copy target must be fresh or simple",
        ));
    }

    // Replay the copy over the keys known at build time.
    let known_keys = realm.heap.get(source)?.enumerable_string_keys();
    for key in known_keys {
        let property_key = PropertyKey::string(&key);
        let value = try_value!(expressions::object_get(
            realm,
            source,
            &property_key,
            statement.span
        )?);
        match expressions::object_set(
            realm,
            target,
            property_key,
            value,
            ctx.strict,
            statement.span,
        )? {
            Ok(()) => {}
            Err(abrupt) => return Ok(abrupt),
        }
    }

    // Fresh abstract string binding for the loop variable; keys found
    // only at runtime flow through the residual loop.
    let key_value = realm.create_abstract(
        TypeDomain::of(TypeTag::String),
        ValueDomain::top(),
        vec![Value::Object(source)],
        SourceTemplate::literal(loop_var),
        Some(AbstractKind::LoopKey),
    );
    let Value::Abstract(key_id) = key_value.clone() else {
        unreachable!("create_abstract returns abstract values");
    };
    match evaluator::bind_for_in_variable(realm, statement, key_value, ctx)? {
        Ok(()) => {}
        Err(abrupt) => return Ok(abrupt),
    }

    // The target now holds keys not known at build time.
    if !realm.heap.get(target)?.partial {
        realm.log.record(MutationDelta::PartialBit {
            object: target,
            prior: false,
        });
        realm.heap.get_mut(target)?.partial = true;
    }
    realm.active_generator().push_residual_for_in(
        Value::Object(source),
        Value::Object(target),
        key_id,
    );
    Ok(Completion::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::EngineConfig;

    fn realm() -> Realm {
        Realm::new(EngineConfig::default())
    }

    fn abstract_bool(realm: &mut Realm, name: &str) -> Value {
        realm.create_abstract(
            TypeDomain::of(TypeTag::Boolean),
            ValueDomain::top(),
            vec![],
            SourceTemplate::literal(name),
            None,
        )
    }

    #[test]
    fn join_values_folds_equal_sides() {
        let mut r = realm();
        let cond = abstract_bool(&mut r, "c");
        let joined = join_values(&mut r, cond, Value::Number(1.0), Value::Number(1.0));
        assert_eq!(joined, Value::Number(1.0));
    }

    #[test]
    fn join_values_mints_conditional_abstract() {
        let mut r = realm();
        let cond = abstract_bool(&mut r, "c");
        let joined = join_values(&mut r, cond, Value::Number(1.0), Value::Number(2.0));
        let Value::Abstract(id) = joined else {
            panic!("expected abstract join value");
        };
        let value = r.abstracts.get(id);
        assert_eq!(value.kind, Some(AbstractKind::Join));
        assert_eq!(value.args.len(), 3);
        assert!(value.types.includes(TypeTag::Number));
    }

    #[test]
    fn join_completions_rejects_mixed_abrupt_shapes() {
        let mut r = realm();
        let cond = abstract_bool(&mut r, "c");
        let result = join_completions(
            &mut r,
            cond,
            Completion::Return(Value::Undefined),
            Completion::Break {
                label: None,
                value: Value::Undefined,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn join_completions_pairs_same_kind_throws() {
        let mut r = realm();
        let cond = abstract_bool(&mut r, "c");
        let a = r.throw_error(
            crate::completions::ModelErrorKind::Type,
            "a",
            crate::ast::SourceSpan::synthetic(),
        );
        let b = r.throw_error(
            crate::completions::ModelErrorKind::Type,
            "b",
            crate::ast::SourceSpan::synthetic(),
        );
        let joined = join_completions(&mut r, cond, a, b).unwrap();
        assert!(matches!(joined, Completion::Joined(_)));
    }

    #[test]
    fn join_completions_rejects_different_error_kinds() {
        let mut r = realm();
        let cond = abstract_bool(&mut r, "c");
        let a = r.throw_error(
            crate::completions::ModelErrorKind::Type,
            "a",
            crate::ast::SourceSpan::synthetic(),
        );
        let b = r.throw_error(
            crate::completions::ModelErrorKind::Range,
            "b",
            crate::ast::SourceSpan::synthetic(),
        );
        assert!(join_completions(&mut r, cond, a, b).is_err());
    }

    #[test]
    fn merge_rejects_accessor_with_data() {
        let mut r = realm();
        let cond = abstract_bool(&mut r, "c");
        let data = Some(PropertyDescriptor::data(Value::Number(1.0)));
        let accessor = Some(PropertyDescriptor::Accessor {
            get: None,
            set: None,
            enumerable: true,
            configurable: true,
        });
        assert!(merge_descriptors(&mut r, &cond, data, accessor).is_err());
    }
}
