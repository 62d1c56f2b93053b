//! Expression evaluation: references, property access, operators, calls.
//!
//! Every routine implements the Standard's semantic operation over the
//! joined concrete/abstract lattice: concrete inputs are computed at build
//! time; abstract inputs produce derived abstract values through the
//! effect generator; unsoundly-abstract cases raise introspection
//! diagnostics.

use crate::ast::{
    AssignOp, BinaryOp, Expression, FunctionExpression, LogicalOp, MemberKey, ObjectProperty,
    PropertyKind, PropertyName, SourceSpan, UnaryOp, UpdateOp,
};
use crate::completions::{Completion, ModelErrorKind};
use crate::diagnostics::{EngineResult, PP_NON_SIMPLE_BASE, PP_NOT_CALLABLE};
use crate::evaluator::{hoisted_var_names, EvalCtx};
use crate::intrinsics;
use crate::mutation_log::MutationDelta;
use crate::objects::{Callable, ObjectRecord, PropertyDescriptor, PropertyKey, UserFunction};
use crate::realm::{DeriveOpts, ExecutionContext, Realm};
use crate::speculation;
use crate::values::{
    AbstractKind, ObjectHandle, SourceTemplate, TemplatePart, TypeDomain, TypeTag, Value,
    ValueDomain,
};

/// Unwrap a normal completion's value or propagate the abrupt completion.
macro_rules! try_value {
    ($completion:expr) => {
        match $completion {
            $crate::completions::Completion::Normal(value) => value,
            abrupt => return Ok(abrupt),
        }
    };
}
pub(crate) use try_value;

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Reference base: an environment or a value (undefined, object,
/// primitive-wrapper candidate, or abstract).
#[derive(Debug, Clone, PartialEq)]
pub enum RefBase {
    Env(crate::environment::EnvHandle),
    Value(Value),
}

/// Referenced name.
#[derive(Debug, Clone, PartialEq)]
pub enum RefName {
    String(String),
    Key(PropertyKey),
    /// Abstract key value.
    Abstract(Value),
}

/// A resolved reference, per the Standard's Reference specification type.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub base: RefBase,
    pub name: RefName,
    pub strict: bool,
    pub this_value: Option<Value>,
}

/// Resolve an expression in reference position (assignment targets,
/// `delete`, `typeof`, update expressions).
pub fn eval_to_reference(
    realm: &mut Realm,
    expr: &Expression,
    ctx: EvalCtx,
) -> EngineResult<Result<Reference, Completion>> {
    match expr {
        Expression::Identifier { name, span: _ } => {
            let holder = realm.envs.lookup(&realm.heap, ctx.env, name)?;
            Ok(Ok(Reference {
                base: match holder {
                    Some(env) => RefBase::Env(env),
                    None => RefBase::Value(Value::Undefined),
                },
                name: RefName::String(name.clone()),
                strict: ctx.strict,
                this_value: None,
            }))
        }
        Expression::Member { object, key, span } => {
            let base = match eval_expression(realm, object, ctx)? {
                Completion::Normal(v) => v,
                abrupt => return Ok(Err(abrupt)),
            };
            let name = match key {
                MemberKey::Static(property) => RefName::Key(PropertyKey::string(property)),
                MemberKey::Computed(key_expr) => {
                    let key_value = match eval_expression(realm, key_expr, ctx)? {
                        Completion::Normal(v) => v,
                        abrupt => return Ok(Err(abrupt)),
                    };
                    match value_to_key(realm, &key_value, *span)? {
                        Ok(key) => RefName::Key(key),
                        Err(abstract_key) => RefName::Abstract(abstract_key),
                    }
                }
            };
            Ok(Ok(Reference {
                base: RefBase::Value(base.clone()),
                name,
                strict: ctx.strict,
                this_value: Some(base),
            }))
        }
        _ => Ok(Err(realm.throw_error(
            ModelErrorKind::Reference,
            "invalid reference target",
            expr.span(),
        ))),
    }
}

/// Convert a concrete value to a property key; abstract values come back
/// on the `Err` side.
pub fn value_to_key(
    realm: &mut Realm,
    value: &Value,
    span: SourceSpan,
) -> EngineResult<Result<PropertyKey, Value>> {
    match value {
        Value::Abstract(_) => Ok(Err(value.clone())),
        Value::Symbol(id) => Ok(Ok(PropertyKey::Symbol(*id))),
        Value::Object(_) => {
            // ToPropertyKey on objects needs ToPrimitive; not modeled.
            let _ = span;
            Ok(Ok(PropertyKey::string("[object Object]")))
        }
        other => {
            let text = other
                .to_string_primitive()
                .unwrap_or_else(|| "undefined".to_string());
            Ok(Ok(PropertyKey::string(text)))
        }
    }
}

/// `GetValue(V)`.
pub fn get_value(
    realm: &mut Realm,
    reference: &Reference,
    span: SourceSpan,
) -> EngineResult<Completion> {
    match &reference.base {
        RefBase::Env(_) => {
            let RefName::String(name) = &reference.name else {
                return Err(crate::diagnostics::EngineError::Invariant(
                    "environment reference with non-string name".to_string(),
                ));
            };
            match realm.envs.get_binding(&realm.heap, ctx_env(reference, realm), name)? {
                Ok(value) => Ok(Completion::Normal(value)),
                Err(error) => Ok(realm.throw_model_error(error, span)),
            }
        }
        RefBase::Value(Value::Undefined) | RefBase::Value(Value::Null) => {
            let name = reference_name_text(&reference.name);
            Ok(realm.throw_error(
                ModelErrorKind::Type,
                &format!("cannot read properties of undefined (reading '{name}')"),
                span,
            ))
        }
        RefBase::Value(Value::Object(handle)) => match &reference.name {
            RefName::Key(key) => object_get(realm, *handle, key, span),
            RefName::Abstract(key_value) => {
                abstract_key_get(realm, Value::Object(*handle), key_value.clone(), span)
            }
            RefName::String(name) => {
                object_get(realm, *handle, &PropertyKey::string(name), span)
            }
        },
        RefBase::Value(Value::Str(text)) => Ok(Completion::Normal(string_member(
            text,
            &reference.name,
        ))),
        RefBase::Value(value @ Value::Abstract(_)) => match &reference.name {
            RefName::Key(key) => abstract_base_get(realm, value.clone(), key, span),
            RefName::Abstract(key_value) => {
                abstract_key_get(realm, value.clone(), key_value.clone(), span)
            }
            RefName::String(name) => {
                abstract_base_get(realm, value.clone(), &PropertyKey::string(name), span)
            }
        },
        RefBase::Value(_) => Ok(Completion::Normal(Value::Undefined)),
    }
}

fn ctx_env(reference: &Reference, realm: &Realm) -> crate::environment::EnvHandle {
    match reference.base {
        RefBase::Env(env) => env,
        _ => realm.global_env,
    }
}

fn reference_name_text(name: &RefName) -> String {
    match name {
        RefName::String(s) => s.clone(),
        RefName::Key(key) => key.to_string(),
        RefName::Abstract(_) => "<abstract>".to_string(),
    }
}

/// Property reads on string primitives: `length` and index access.
fn string_member(text: &str, name: &RefName) -> Value {
    let key = match name {
        RefName::String(s) => s.clone(),
        RefName::Key(PropertyKey::String(s)) => s.clone(),
        _ => return Value::Undefined,
    };
    if key == "length" {
        return Value::Number(text.chars().count() as f64);
    }
    if let Ok(index) = key.parse::<usize>() {
        if let Some(c) = text.chars().nth(index) {
            return Value::string(c.to_string());
        }
    }
    Value::Undefined
}

// ---------------------------------------------------------------------------
// Property access
// ---------------------------------------------------------------------------

/// `[[Get]]` with a concrete base and key: descriptor lookup along the
/// prototype chain, the partial-object read rule, getter invocation.
pub fn object_get(
    realm: &mut Realm,
    handle: ObjectHandle,
    key: &PropertyKey,
    span: SourceSpan,
) -> EngineResult<Completion> {
    let found = realm.heap.lookup_property(handle, key)?;
    match found {
        Some((_, PropertyDescriptor::Data { value, .. })) => Ok(Completion::Normal(value)),
        Some((owner, PropertyDescriptor::Accessor { get, .. })) => match get {
            Some(getter) => {
                let _ = owner;
                call_function(
                    realm,
                    getter,
                    Value::Object(handle),
                    Vec::new(),
                    EvalCtx {
                        env: realm.global_env,
                        strict: true,
                    },
                    span,
                )
            }
            None => Ok(Completion::Normal(Value::Undefined)),
        },
        None => {
            let record = realm.heap.get(handle)?;
            if !record.partial {
                return Ok(Completion::Normal(Value::Undefined));
            }
            if !record.simple {
                return Err(realm.fatal(
                    PP_NON_SIMPLE_BASE,
                    format!("read of unknown key `{key}` on a non-simple partial object"),
                ));
            }
            // Partial & simple: the key may exist at runtime.
            let key_value = match key {
                PropertyKey::String(s) => Value::string(s.clone()),
                PropertyKey::Symbol(id) => Value::Symbol(*id),
            };
            let template = match key {
                PropertyKey::String(s) if is_identifier(s) => SourceTemplate::member(s),
                _ => SourceTemplate::computed_member(),
            };
            let args = match &template.parts[..] {
                [TemplatePart::Arg(0), TemplatePart::Text(_)] => vec![Value::Object(handle)],
                _ => vec![Value::Object(handle), key_value],
            };
            Ok(Completion::Normal(realm.derive(
                TypeDomain::top(),
                ValueDomain::top(),
                args,
                template,
                DeriveOpts {
                    kind: Some(AbstractKind::SentinelMember),
                    is_pure: true,
                    skip_invariant: true,
                },
            )))
        }
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Access with an abstract key on a concrete or abstract base.
fn abstract_key_get(
    realm: &mut Realm,
    base: Value,
    key: Value,
    _span: SourceSpan,
) -> EngineResult<Completion> {
    if let Value::Object(handle) = &base {
        let record = realm.heap.get(*handle)?;
        if !record.simple {
            return Err(realm.fatal(
                PP_NON_SIMPLE_BASE,
                "computed access with an abstract key on a non-simple object",
            ));
        }
    }
    Ok(Completion::Normal(realm.derive(
        TypeDomain::top(),
        ValueDomain::top(),
        vec![base, key],
        SourceTemplate::computed_member(),
        DeriveOpts {
            kind: Some(AbstractKind::SentinelMember),
            is_pure: true,
            skip_invariant: true,
        },
    )))
}

/// Access with a concrete key on an abstract base.
fn abstract_base_get(
    realm: &mut Realm,
    base: Value,
    key: &PropertyKey,
    _span: SourceSpan,
) -> EngineResult<Completion> {
    let template = match key {
        PropertyKey::String(s) if is_identifier(s) => SourceTemplate::member(s),
        PropertyKey::String(s) => {
            let mut template = SourceTemplate::default();
            template.parts.push(TemplatePart::Arg(0));
            template
                .parts
                .push(TemplatePart::Text(format!("[{}]", quote_string(s))));
            template
        }
        PropertyKey::Symbol(_) => SourceTemplate::computed_member(),
    };
    Ok(Completion::Normal(realm.derive(
        TypeDomain::top(),
        ValueDomain::top(),
        vec![base],
        template,
        DeriveOpts {
            kind: Some(AbstractKind::SentinelMember),
            is_pure: true,
            skip_invariant: true,
        },
    )))
}

fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// `PutValue(V, W)`.
pub fn put_value(
    realm: &mut Realm,
    reference: &Reference,
    value: Value,
    span: SourceSpan,
) -> EngineResult<Result<(), Completion>> {
    match &reference.base {
        RefBase::Env(env) => {
            let RefName::String(name) = &reference.name else {
                return Err(crate::diagnostics::EngineError::Invariant(
                    "environment reference with non-string name".to_string(),
                ));
            };
            match realm.envs.set_binding(
                &mut realm.log,
                &mut realm.heap,
                *env,
                name,
                value,
                reference.strict,
            )? {
                Ok(()) => Ok(Ok(())),
                Err(error) => Ok(Err(realm.throw_model_error(error, span))),
            }
        }
        RefBase::Value(Value::Undefined) => {
            let RefName::String(name) = &reference.name else {
                return Ok(Err(realm.throw_error(
                    ModelErrorKind::Type,
                    "cannot set properties of undefined",
                    span,
                )));
            };
            // Unresolvable reference: strict writes throw, sloppy writes
            // create a global.
            if reference.strict {
                return Ok(Err(realm.throw_error(
                    ModelErrorKind::Reference,
                    &format!("{name} is not defined"),
                    span,
                )));
            }
            let env = realm.global_env;
            match realm
                .envs
                .set_binding(&mut realm.log, &mut realm.heap, env, name, value, false)?
            {
                Ok(()) => Ok(Ok(())),
                Err(error) => Ok(Err(realm.throw_model_error(error, span))),
            }
        }
        RefBase::Value(Value::Null) => Ok(Err(realm.throw_error(
            ModelErrorKind::Type,
            "cannot set properties of null",
            span,
        ))),
        RefBase::Value(Value::Object(handle)) => match &reference.name {
            RefName::Key(key) => {
                object_set(realm, *handle, key.clone(), value, reference.strict, span)
            }
            RefName::String(name) => object_set(
                realm,
                *handle,
                PropertyKey::string(name),
                value,
                reference.strict,
                span,
            ),
            RefName::Abstract(key_value) => {
                abstract_key_set(realm, Value::Object(*handle), key_value.clone(), value)
            }
        },
        RefBase::Value(base @ Value::Abstract(_)) => match &reference.name {
            RefName::Abstract(key_value) => {
                abstract_key_set(realm, base.clone(), key_value.clone(), value)
            }
            RefName::Key(key) => {
                let key_value = match key {
                    PropertyKey::String(s) => Value::string(s.clone()),
                    PropertyKey::Symbol(id) => Value::Symbol(*id),
                };
                abstract_key_set(realm, base.clone(), key_value, value)
            }
            RefName::String(name) => {
                abstract_key_set(realm, base.clone(), Value::string(name.clone()), value)
            }
        },
        RefBase::Value(_) => {
            // Writes to primitive bases are silently dropped in sloppy
            // mode, TypeError in strict mode.
            if reference.strict {
                Ok(Err(realm.throw_error(
                    ModelErrorKind::Type,
                    "cannot create property on primitive value",
                    span,
                )))
            } else {
                Ok(Ok(()))
            }
        }
    }
}

/// `[[Set]]` with concrete base and key.
pub fn object_set(
    realm: &mut Realm,
    handle: ObjectHandle,
    key: PropertyKey,
    value: Value,
    strict: bool,
    span: SourceSpan,
) -> EngineResult<Result<(), Completion>> {
    // Setter anywhere on the chain wins.
    if let Some((_, PropertyDescriptor::Accessor { set, .. })) =
        realm.heap.lookup_property(handle, &key)?
    {
        return match set {
            Some(setter) => {
                let completion = call_function(
                    realm,
                    setter,
                    Value::Object(handle),
                    vec![value],
                    EvalCtx {
                        env: realm.global_env,
                        strict: true,
                    },
                    span,
                )?;
                match completion {
                    Completion::Normal(_) => Ok(Ok(())),
                    abrupt => Ok(Err(abrupt)),
                }
            }
            None => {
                if strict {
                    Ok(Err(realm.throw_error(
                        ModelErrorKind::Type,
                        &format!("cannot set property '{key}' which has only a getter"),
                        span,
                    )))
                } else {
                    Ok(Ok(()))
                }
            }
        };
    }

    let own_prior = realm.heap.get(handle)?.get_own_property(&key).cloned();
    if let Some(PropertyDescriptor::Data { writable: false, .. }) = &own_prior {
        if strict {
            return Ok(Err(realm.throw_error(
                ModelErrorKind::Type,
                &format!("cannot assign to read only property '{key}'"),
                span,
            )));
        }
        return Ok(Ok(()));
    }
    let descriptor = match own_prior.clone() {
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
        _ => PropertyDescriptor::data(value),
    };
    let defined = realm
        .heap
        .get_mut(handle)?
        .define_own_property(key.clone(), descriptor);
    if defined {
        realm.log.record_property(handle, key, own_prior);
        Ok(Ok(()))
    } else if strict {
        Ok(Err(realm.throw_error(
            ModelErrorKind::Type,
            &format!("cannot add property '{key}', object is not extensible"),
            span,
        )))
    } else {
        Ok(Ok(()))
    }
}

/// Write through an abstract key (or to an abstract base): the write is
/// residualized and the target (when concrete) becomes partial, since an
/// unknown key is now populated.
fn abstract_key_set(
    realm: &mut Realm,
    base: Value,
    key: Value,
    value: Value,
) -> EngineResult<Result<(), Completion>> {
    if let Value::Object(handle) = &base {
        let handle = *handle;
        let record = realm.heap.get(handle)?;
        if !record.simple {
            return Err(realm.fatal(
                PP_NON_SIMPLE_BASE,
                "computed write with an abstract key on a non-simple object",
            ));
        }
        if !record.partial {
            realm.log.record(MutationDelta::PartialBit {
                object: handle,
                prior: false,
            });
            realm.heap.get_mut(handle)?.partial = true;
        }
    }
    realm
        .active_generator()
        .emit_property_assignment(base, key, value);
    Ok(Ok(()))
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Call `callee` with `this` and `args`. Concrete callees dispatch to the
/// user body or native handler; abstract callees whose types admit
/// Function residualize through `derive`.
pub fn call_function(
    realm: &mut Realm,
    callee: Value,
    this: Value,
    args: Vec<Value>,
    _ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    match &callee {
        Value::Object(handle) => {
            let callable = realm.heap.get(*handle)?.callable.clone();
            match callable {
                Some(Callable::Native(native)) => {
                    intrinsics::apply_native(realm, native, &this, &args, span)
                }
                Some(Callable::User(function)) => {
                    call_user_function(realm, *handle, &function, this, args, span)
                }
                None => Ok(realm.throw_error(
                    ModelErrorKind::Type,
                    "value is not a function",
                    span,
                )),
            }
        }
        Value::Abstract(id) => {
            let abstract_value = realm.abstracts.get(*id).clone();
            if !abstract_value.might_be_callable() && !abstract_value.types.is_top() {
                return Err(realm.fatal(
                    PP_NOT_CALLABLE,
                    "call through an abstract value whose types exclude Function",
                ));
            }
            let mut call_args = vec![callee];
            call_args.extend(args);
            let template = SourceTemplate::call(call_args.len() - 1);
            Ok(Completion::Normal(realm.derive(
                TypeDomain::top(),
                ValueDomain::top(),
                call_args,
                template,
                DeriveOpts {
                    kind: Some(AbstractKind::ResidualCall),
                    is_pure: false,
                    skip_invariant: true,
                },
            )))
        }
        _ => Ok(realm.throw_error(ModelErrorKind::Type, "value is not a function", span)),
    }
}

fn call_user_function(
    realm: &mut Realm,
    function_object: ObjectHandle,
    function: &UserFunction,
    this: Value,
    args: Vec<Value>,
    span: SourceSpan,
) -> EngineResult<Completion> {
    if realm.context_depth() as u32 >= realm.config.max_call_depth {
        return Ok(realm.throw_error(
            ModelErrorKind::Range,
            "maximum call stack size exceeded",
            span,
        ));
    }

    let env = realm
        .envs
        .alloc_function(function.env, Some(function_object), false);
    let this_value = if function.strict {
        this
    } else {
        match this {
            Value::Undefined | Value::Null => Value::Object(realm.global_object()),
            other => other,
        }
    };
    match realm.envs.bind_this_value(env, this_value)? {
        Ok(()) => {}
        Err(error) => return Ok(realm.throw_model_error(error, span)),
    }

    let body_ctx = EvalCtx {
        env,
        strict: function.strict,
    };
    for (index, param) in function.params.iter().enumerate() {
        realm
            .envs
            .create_mutable_binding(&mut realm.log, env, param, false)?;
        let value = args.get(index).cloned().unwrap_or(Value::Undefined);
        realm
            .envs
            .initialize_binding(&mut realm.log, env, param, value)?;
    }
    for name in hoisted_var_names(&function.body.body) {
        if realm.envs.own_binding(env, &name)?.is_none() {
            realm
                .envs
                .create_mutable_binding(&mut realm.log, env, &name, false)?;
            realm
                .envs
                .initialize_binding(&mut realm.log, env, &name, Value::Undefined)?;
        }
    }
    for statement in &function.body.body {
        if let crate::ast::Statement::Function(declaration) = statement {
            let nested = FunctionExpression {
                name: Some(declaration.name.clone()),
                params: declaration.params.clone(),
                body: declaration.body.clone(),
                span: declaration.span,
            };
            let value = create_function_value(realm, &nested, body_ctx);
            if realm.envs.own_binding(env, &declaration.name)?.is_none() {
                realm
                    .envs
                    .create_mutable_binding(&mut realm.log, env, &declaration.name, false)?;
            }
            realm
                .envs
                .initialize_binding(&mut realm.log, env, &declaration.name, value)?;
        }
    }

    realm.enter_context(ExecutionContext {
        env,
        function: Some(function_object),
        strict: function.strict,
    });
    let result = crate::evaluator::eval_statement_list(realm, &function.body.body, body_ctx);
    realm.leave_context()?;
    let completion = result?;
    fold_call_completion(realm, completion)
}

/// Fold a function body's completion into the call's result value.
fn fold_call_completion(realm: &mut Realm, completion: Completion) -> EngineResult<Completion> {
    match completion {
        Completion::Return(value) => Ok(Completion::Normal(value)),
        Completion::Normal(_) => Ok(Completion::Normal(Value::Undefined)),
        Completion::Throw { value, span } => Ok(Completion::Throw { value, span }),
        Completion::Joined(joined) => {
            match (&joined.consequent, &joined.alternate) {
                (Completion::Return(a), Completion::Return(b)) => {
                    let value =
                        speculation::join_values(realm, joined.condition.clone(), a.clone(), b.clone());
                    Ok(Completion::Normal(value))
                }
                _ => Ok(Completion::Joined(joined)),
            }
        }
        Completion::PossiblyNormal(pn) => match &pn.abrupt {
            Completion::Return(returned) => {
                // The normal path fell off the end of the body.
                let (a, b) = if pn.condition_selects_normal {
                    (Value::Undefined, returned.clone())
                } else {
                    (returned.clone(), Value::Undefined)
                };
                let value = speculation::join_values(realm, pn.condition.clone(), a, b);
                Ok(Completion::Normal(value))
            }
            _ => Ok(Completion::PossiblyNormal(pn)),
        },
        other => Err(crate::diagnostics::EngineError::Invariant(format!(
            "loop completion escaped a function body: {other:?}"
        ))),
    }
}

/// `new callee(args)`.
pub fn construct(
    realm: &mut Realm,
    callee: Value,
    args: Vec<Value>,
    _ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    match &callee {
        Value::Object(handle) => {
            let callable = realm.heap.get(*handle)?.callable.clone();
            match callable {
                Some(Callable::Native(native)) => {
                    intrinsics::apply_native(realm, native, &Value::Undefined, &args, span)
                }
                Some(Callable::User(function)) => {
                    // this = new object whose prototype is callee.prototype.
                    let proto = match realm
                        .heap
                        .lookup_property(*handle, &PropertyKey::string("prototype"))?
                    {
                        Some((_, desc)) => match desc.value() {
                            Some(Value::Object(p)) => *p,
                            _ => realm.intrinsics.object_prototype,
                        },
                        None => realm.intrinsics.object_prototype,
                    };
                    let this = realm.heap.alloc(ObjectRecord::with_prototype(Some(proto)));
                    let completion = call_user_function(
                        realm,
                        *handle,
                        &function,
                        Value::Object(this),
                        args,
                        span,
                    )?;
                    match completion {
                        Completion::Normal(Value::Object(returned)) => {
                            Ok(Completion::Normal(Value::Object(returned)))
                        }
                        Completion::Normal(_) => Ok(Completion::Normal(Value::Object(this))),
                        abrupt => Ok(abrupt),
                    }
                }
                None => Ok(realm.throw_error(
                    ModelErrorKind::Type,
                    "value is not a constructor",
                    span,
                )),
            }
        }
        Value::Abstract(_) => {
            let mut call_args = vec![callee];
            call_args.extend(args);
            let mut template = SourceTemplate::call(call_args.len() - 1);
            template
                .parts
                .insert(0, TemplatePart::Text("new ".to_string()));
            Ok(Completion::Normal(realm.derive(
                TypeDomain::of(TypeTag::Object),
                ValueDomain::top(),
                call_args,
                template,
                DeriveOpts {
                    kind: Some(AbstractKind::ResidualCall),
                    is_pure: false,
                    skip_invariant: true,
                },
            )))
        }
        _ => Ok(realm.throw_error(ModelErrorKind::Type, "value is not a constructor", span)),
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn to_primitive_string(realm: &Realm, value: &Value) -> String {
    match value {
        Value::Object(handle) => match realm.heap.get(*handle) {
            Ok(record) if record.class_tag.as_deref() == Some("Array") => {
                let mut parts = Vec::new();
                let len = record
                    .get_own_property(&PropertyKey::string("length"))
                    .and_then(|d| d.value().cloned())
                    .and_then(|v| v.to_number_primitive())
                    .unwrap_or(0.0) as usize;
                for i in 0..len {
                    let element = record
                        .get_own_property(&PropertyKey::string(i.to_string()))
                        .and_then(|d| d.value().cloned())
                        .unwrap_or(Value::Undefined);
                    parts.push(match element {
                        Value::Undefined | Value::Null => String::new(),
                        other => to_primitive_string(realm, &other),
                    });
                }
                parts.join(",")
            }
            Ok(record) if record.is_callable() => "function".to_string(),
            _ => "[object Object]".to_string(),
        },
        other => other
            .to_string_primitive()
            .unwrap_or_else(|| "[object Object]".to_string()),
    }
}

fn to_number(realm: &Realm, value: &Value) -> f64 {
    match value {
        Value::Object(_) => {
            let text = to_primitive_string(realm, value);
            if text.trim().is_empty() {
                0.0
            } else {
                text.trim().parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        other => other.to_number_primitive().unwrap_or(f64::NAN),
    }
}

/// Binary operation over two evaluated operands.
pub fn apply_binary(
    realm: &mut Realm,
    operator: BinaryOp,
    left: Value,
    right: Value,
    span: SourceSpan,
) -> EngineResult<Completion> {
    if !left.is_concrete() || !right.is_concrete() {
        let types = match operator {
            BinaryOp::Add => TypeDomain::of_tags(&[TypeTag::Number, TypeTag::String]),
            BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::UShr => TypeDomain::of(TypeTag::Number),
            _ => TypeDomain::of(TypeTag::Boolean),
        };
        return Ok(Completion::Normal(realm.derive(
            types,
            ValueDomain::top(),
            vec![left, right],
            SourceTemplate::binary(operator.as_str()),
            DeriveOpts {
                kind: None,
                is_pure: true,
                skip_invariant: true,
            },
        )));
    }

    let result = match operator {
        BinaryOp::Add => {
            let left_string = matches!(left, Value::Str(_) | Value::Object(_));
            let right_string = matches!(right, Value::Str(_) | Value::Object(_));
            if left_string || right_string {
                let mut text = to_primitive_string(realm, &left);
                text.push_str(&to_primitive_string(realm, &right));
                Value::string(text)
            } else {
                Value::Number(to_number(realm, &left) + to_number(realm, &right))
            }
        }
        BinaryOp::Sub => Value::Number(to_number(realm, &left) - to_number(realm, &right)),
        BinaryOp::Mul => Value::Number(to_number(realm, &left) * to_number(realm, &right)),
        BinaryOp::Div => Value::Number(to_number(realm, &left) / to_number(realm, &right)),
        BinaryOp::Mod => Value::Number(to_number(realm, &left) % to_number(realm, &right)),
        BinaryOp::BitAnd => Value::Number(f64::from(to_i32(realm, &left) & to_i32(realm, &right))),
        BinaryOp::BitOr => Value::Number(f64::from(to_i32(realm, &left) | to_i32(realm, &right))),
        BinaryOp::BitXor => Value::Number(f64::from(to_i32(realm, &left) ^ to_i32(realm, &right))),
        BinaryOp::Shl => Value::Number(f64::from(
            to_i32(realm, &left) << (to_u32(realm, &right) & 31),
        )),
        BinaryOp::Shr => Value::Number(f64::from(
            to_i32(realm, &left) >> (to_u32(realm, &right) & 31),
        )),
        BinaryOp::UShr => Value::Number(f64::from(
            to_u32(realm, &left) >> (to_u32(realm, &right) & 31),
        )),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(&right).unwrap_or(false)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(&right).unwrap_or(false)),
        BinaryOp::Eq => Value::Bool(loose_equals(realm, &left, &right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(realm, &left, &right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            compare(realm, operator, &left, &right)
        }
        BinaryOp::In => {
            let Value::Object(handle) = &right else {
                return Ok(realm.throw_error(
                    ModelErrorKind::Type,
                    "'in' operator applied to non-object",
                    span,
                ));
            };
            let handle = *handle;
            let key = match value_to_key(realm, &left, span)? {
                Ok(key) => key,
                Err(abstract_key) => {
                    return Ok(Completion::Normal(realm.derive(
                        TypeDomain::of(TypeTag::Boolean),
                        ValueDomain::top(),
                        vec![abstract_key, right],
                        SourceTemplate::binary("in"),
                        DeriveOpts {
                            kind: Some(AbstractKind::KnownPropertyCheck),
                            is_pure: true,
                            skip_invariant: true,
                        },
                    )))
                }
            };
            let present = realm.heap.has_property(handle, &key)?;
            if !present && realm.heap.get(handle)?.partial {
                let key_value = Value::string(key.to_string());
                return Ok(Completion::Normal(realm.derive(
                    TypeDomain::of(TypeTag::Boolean),
                    ValueDomain::top(),
                    vec![key_value, right],
                    SourceTemplate::binary("in"),
                    DeriveOpts {
                        kind: Some(AbstractKind::KnownPropertyCheck),
                        is_pure: true,
                        skip_invariant: true,
                    },
                )));
            }
            Value::Bool(present)
        }
        BinaryOp::InstanceOf => {
            let Value::Object(ctor) = &right else {
                return Ok(realm.throw_error(
                    ModelErrorKind::Type,
                    "right-hand side of 'instanceof' is not callable",
                    span,
                ));
            };
            let ctor = *ctor;
            let proto = realm
                .heap
                .lookup_property(ctor, &PropertyKey::string("prototype"))?
                .and_then(|(_, d)| d.value().cloned());
            match (left, proto) {
                (Value::Object(mut current), Some(Value::Object(proto))) => {
                    let mut found = false;
                    while let Some(parent) = realm.heap.get(current)?.prototype {
                        if parent == proto {
                            found = true;
                            break;
                        }
                        current = parent;
                    }
                    Value::Bool(found)
                }
                _ => Value::Bool(false),
            }
        }
    };
    Ok(Completion::Normal(result))
}

fn to_i32(realm: &Realm, value: &Value) -> i32 {
    let n = to_number(realm, value);
    if n.is_nan() || n.is_infinite() {
        0
    } else {
        n as i64 as i32
    }
}

fn to_u32(realm: &Realm, value: &Value) -> u32 {
    to_i32(realm, value) as u32
}

fn loose_equals(realm: &Realm, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
            to_number(realm, left) == to_number(realm, right)
        }
        (Value::Bool(_), _) => loose_equals(realm, &Value::Number(to_number(realm, left)), right),
        (_, Value::Bool(_)) => loose_equals(realm, left, &Value::Number(to_number(realm, right))),
        _ => left.strict_equals(right).unwrap_or(false),
    }
}

fn compare(realm: &Realm, operator: BinaryOp, left: &Value, right: &Value) -> Value {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return Value::Bool(match operator {
            BinaryOp::Lt => a < b,
            BinaryOp::LtEq => a <= b,
            BinaryOp::Gt => a > b,
            BinaryOp::GtEq => a >= b,
            _ => false,
        });
    }
    let a = to_number(realm, left);
    let b = to_number(realm, right);
    Value::Bool(match operator {
        BinaryOp::Lt => a < b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::GtEq => a >= b,
        _ => false,
    })
}

/// `typeof` over the joined lattice: a singleton types domain folds to a
/// concrete string, anything wider derives.
pub fn type_of_value(realm: &mut Realm, value: &Value) -> EngineResult<Value> {
    match value {
        Value::Object(handle) => {
            let record = realm.heap.get(*handle)?;
            Ok(Value::string(if record.is_callable() {
                "function"
            } else {
                "object"
            }))
        }
        Value::Abstract(id) => {
            let abstract_value = realm.abstracts.get(*id).clone();
            if let Some(tag) = abstract_value.types.singleton() {
                return Ok(Value::string(tag.type_of()));
            }
            Ok(realm.derive(
                TypeDomain::of(TypeTag::String),
                ValueDomain::top(),
                vec![value.clone()],
                SourceTemplate::unary("typeof"),
                DeriveOpts {
                    kind: Some(AbstractKind::KnownPropertyCheck),
                    is_pure: true,
                    skip_invariant: true,
                },
            ))
        }
        concrete => {
            let tag = concrete
                .concrete_tag()
                .ok_or_else(|| crate::diagnostics::EngineError::Invariant(
                    "concrete value without a tag".to_string(),
                ))?;
            Ok(Value::string(tag.type_of()))
        }
    }
}

// ---------------------------------------------------------------------------
// Expression dispatch
// ---------------------------------------------------------------------------

/// Evaluate an expression to a completion.
pub fn eval_expression(
    realm: &mut Realm,
    expr: &Expression,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    realm.current_span = expr.span();
    match expr {
        Expression::NumberLiteral { value, .. } => Ok(Completion::Normal(Value::Number(*value))),
        Expression::StringLiteral { value, .. } => {
            Ok(Completion::Normal(Value::string(value.clone())))
        }
        Expression::BooleanLiteral { value, .. } => Ok(Completion::Normal(Value::Bool(*value))),
        Expression::NullLiteral { .. } => Ok(Completion::Normal(Value::Null)),
        Expression::Identifier { name, span } => {
            match realm.envs.get_binding(&realm.heap, ctx.env, name)? {
                Ok(value) => Ok(Completion::Normal(value)),
                Err(error) => Ok(realm.throw_model_error(error, *span)),
            }
        }
        Expression::This { span } => match realm.envs.get_this(ctx.env)? {
            Ok(value) => Ok(Completion::Normal(value)),
            Err(error) => Ok(realm.throw_model_error(error, *span)),
        },
        Expression::ArrayLiteral { elements, .. } => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                match element {
                    Some(expr) => values.push(try_value!(eval_expression(realm, expr, ctx)?)),
                    None => values.push(Value::Undefined),
                }
            }
            let handle = realm.create_array(values);
            Ok(Completion::Normal(Value::Object(handle)))
        }
        Expression::ObjectLiteral { properties, span } => {
            eval_object_literal(realm, properties, ctx, *span)
        }
        Expression::Function(function) => {
            Ok(Completion::Normal(create_function_value(realm, function, ctx)))
        }
        Expression::Member { .. } => {
            let reference = match eval_to_reference(realm, expr, ctx)? {
                Ok(r) => r,
                Err(abrupt) => return Ok(abrupt),
            };
            get_value(realm, &reference, expr.span())
        }
        Expression::Call {
            callee,
            arguments,
            span,
        } => eval_call(realm, callee, arguments, ctx, *span),
        Expression::New {
            callee,
            arguments,
            span,
        } => {
            let callee_value = try_value!(eval_expression(realm, callee, ctx)?);
            let mut args = Vec::with_capacity(arguments.len());
            for argument in arguments {
                args.push(try_value!(eval_expression(realm, argument, ctx)?));
            }
            construct(realm, callee_value, args, ctx, *span)
        }
        Expression::Unary {
            operator,
            argument,
            span,
        } => eval_unary(realm, *operator, argument, ctx, *span),
        Expression::Binary {
            operator,
            left,
            right,
            span,
        } => {
            let left_value = try_value!(eval_expression(realm, left, ctx)?);
            let right_value = try_value!(eval_expression(realm, right, ctx)?);
            apply_binary(realm, *operator, left_value, right_value, *span)
        }
        Expression::Logical {
            operator,
            left,
            right,
            span,
        } => eval_logical(realm, *operator, left, right, ctx, *span),
        Expression::Conditional {
            test,
            consequent,
            alternate,
            span,
        } => {
            let test_value = try_value!(eval_expression(realm, test, ctx)?);
            match test_value.to_boolean() {
                Some(true) => eval_expression(realm, consequent, ctx),
                Some(false) => eval_expression(realm, alternate, ctx),
                None => speculation::join_expression_branches(
                    realm,
                    test_value,
                    consequent,
                    alternate,
                    ctx,
                    *span,
                ),
            }
        }
        Expression::Assignment {
            operator,
            target,
            value,
            span,
        } => eval_assignment(realm, *operator, target, value, ctx, *span),
        Expression::Update {
            operator,
            prefix,
            argument,
            span,
        } => eval_update(realm, *operator, *prefix, argument, ctx, *span),
        Expression::Sequence { expressions, .. } => {
            let mut last = Value::Undefined;
            for expr in expressions {
                last = try_value!(eval_expression(realm, expr, ctx)?);
            }
            Ok(Completion::Normal(last))
        }
        Expression::Raw { span, .. } => Err(realm.fatal(
            crate::diagnostics::PP_ABSTRACT_COERCION,
            format!(
                "raw expressions cannot be interpreted (line {})",
                span.start_line
            ),
        )),
    }
}

fn eval_object_literal(
    realm: &mut Realm,
    properties: &[ObjectProperty],
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    let proto = realm.intrinsics.object_prototype;
    let handle = realm.heap.alloc(ObjectRecord::with_prototype(Some(proto)));
    for property in properties {
        let key = match &property.key {
            PropertyName::Identifier(name) => PropertyKey::string(name),
            PropertyName::StringLiteral(text) => PropertyKey::string(text),
            PropertyName::NumberLiteral(n) => {
                PropertyKey::string(crate::values::format_number(*n))
            }
            PropertyName::Computed(expr) => {
                let key_value = try_value!(eval_expression(realm, expr, ctx)?);
                match value_to_key(realm, &key_value, span)? {
                    Ok(key) => key,
                    Err(_) => {
                        return Err(realm.fatal(
                            PP_NON_SIMPLE_BASE,
                            "abstract computed key in object literal",
                        ))
                    }
                }
            }
        };
        let value = try_value!(eval_expression(realm, &property.value, ctx)?);
        let descriptor = match property.kind {
            PropertyKind::Init => PropertyDescriptor::data(value),
            PropertyKind::Get => PropertyDescriptor::Accessor {
                get: Some(value),
                set: None,
                enumerable: true,
                configurable: true,
            },
            PropertyKind::Set => {
                // Merge with an existing getter under the same key.
                let existing_get = realm
                    .heap
                    .get(handle)?
                    .get_own_property(&key)
                    .and_then(|d| match d {
                        PropertyDescriptor::Accessor { get, .. } => get.clone(),
                        PropertyDescriptor::Data { .. } => None,
                    });
                PropertyDescriptor::Accessor {
                    get: existing_get,
                    set: Some(value),
                    enumerable: true,
                    configurable: true,
                }
            }
        };
        realm.heap.get_mut(handle)?.define_own_property(key, descriptor);
    }
    Ok(Completion::Normal(Value::Object(handle)))
}

/// Allocate a function object for a function expression or declaration.
pub fn create_function_value(
    realm: &mut Realm,
    function: &FunctionExpression,
    ctx: EvalCtx,
) -> Value {
    let strict = ctx.strict || has_use_strict(&function.body.body);
    let proto = realm.intrinsics.function_prototype;
    let mut record = ObjectRecord::with_prototype(Some(proto));
    record.class_tag = Some("Function".to_string());
    record.callable = Some(Callable::User(UserFunction {
        name: function.name.clone(),
        params: function.params.clone(),
        body: function.body.clone(),
        env: ctx.env,
        strict,
    }));
    record.define_own_property(
        PropertyKey::string("length"),
        PropertyDescriptor::Data {
            value: Value::Number(function.params.len() as f64),
            writable: false,
            enumerable: false,
            configurable: true,
        },
    );
    if let Some(name) = &function.name {
        record.define_own_property(
            PropertyKey::string("name"),
            PropertyDescriptor::Data {
                value: Value::string(name.clone()),
                writable: false,
                enumerable: false,
                configurable: true,
            },
        );
    }
    let handle = realm.heap.alloc(record);

    // `.prototype` object with a constructor back-reference.
    let object_proto = realm.intrinsics.object_prototype;
    let mut proto_record = ObjectRecord::with_prototype(Some(object_proto));
    proto_record.define_own_property(
        PropertyKey::string("constructor"),
        PropertyDescriptor::method(Value::Object(handle)),
    );
    let proto_handle = realm.heap.alloc(proto_record);
    if let Ok(record) = realm.heap.get_mut(handle) {
        record.define_own_property(
            PropertyKey::string("prototype"),
            PropertyDescriptor::Data {
                value: Value::Object(proto_handle),
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );
    }
    Value::Object(handle)
}

pub fn has_use_strict(body: &[crate::ast::Statement]) -> bool {
    matches!(
        body.first(),
        Some(crate::ast::Statement::Expression(statement))
            if matches!(
                &statement.expression,
                Expression::StringLiteral { value, .. } if value == "use strict"
            )
    )
}

fn eval_call(
    realm: &mut Realm,
    callee: &Expression,
    arguments: &[Expression],
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    // Member callees supply their base object as `this`.
    let (callee_value, this) = match callee {
        Expression::Member { .. } => {
            let reference = match eval_to_reference(realm, callee, ctx)? {
                Ok(r) => r,
                Err(abrupt) => return Ok(abrupt),
            };
            let this = reference.this_value.clone().unwrap_or(Value::Undefined);
            let value = try_value!(get_value(realm, &reference, span)?);
            (value, this)
        }
        _ => {
            let value = try_value!(eval_expression(realm, callee, ctx)?);
            (value, Value::Undefined)
        }
    };
    let mut args = Vec::with_capacity(arguments.len());
    for argument in arguments {
        args.push(try_value!(eval_expression(realm, argument, ctx)?));
    }
    call_function(realm, callee_value, this, args, ctx, span)
}

fn eval_unary(
    realm: &mut Realm,
    operator: UnaryOp,
    argument: &Expression,
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    match operator {
        UnaryOp::TypeOf => {
            // `typeof x` with an unresolvable x is "undefined", not a throw.
            if let Expression::Identifier { name, .. } = argument {
                if realm.envs.lookup(&realm.heap, ctx.env, name)?.is_none() {
                    return Ok(Completion::Normal(Value::string("undefined")));
                }
            }
            let value = try_value!(eval_expression(realm, argument, ctx)?);
            Ok(Completion::Normal(type_of_value(realm, &value)?))
        }
        UnaryOp::Delete => eval_delete(realm, argument, ctx, span),
        UnaryOp::Void => {
            try_value!(eval_expression(realm, argument, ctx)?);
            Ok(Completion::Normal(Value::Undefined))
        }
        _ => {
            let value = try_value!(eval_expression(realm, argument, ctx)?);
            if !value.is_concrete() {
                let types = match operator {
                    UnaryOp::Not => TypeDomain::of(TypeTag::Boolean),
                    _ => TypeDomain::of(TypeTag::Number),
                };
                return Ok(Completion::Normal(realm.derive(
                    types,
                    ValueDomain::top(),
                    vec![value],
                    SourceTemplate::unary(operator.as_str()),
                    DeriveOpts {
                        kind: None,
                        is_pure: true,
                        skip_invariant: true,
                    },
                )));
            }
            let result = match operator {
                UnaryOp::Minus => Value::Number(-to_number(realm, &value)),
                UnaryOp::Plus => Value::Number(to_number(realm, &value)),
                UnaryOp::Not => Value::Bool(!value.to_boolean().unwrap_or(false)),
                UnaryOp::BitNot => Value::Number(f64::from(!to_i32(realm, &value))),
                UnaryOp::TypeOf | UnaryOp::Void | UnaryOp::Delete => unreachable!("handled above"),
            };
            Ok(Completion::Normal(result))
        }
    }
}

fn eval_delete(
    realm: &mut Realm,
    argument: &Expression,
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    match argument {
        Expression::Member { .. } => {
            let reference = match eval_to_reference(realm, argument, ctx)? {
                Ok(r) => r,
                Err(abrupt) => return Ok(abrupt),
            };
            match (&reference.base, &reference.name) {
                (RefBase::Value(Value::Object(handle)), RefName::Key(key)) => {
                    let prior = realm.heap.get(*handle)?.get_own_property(key).cloned();
                    let deleted = realm.heap.get_mut(*handle)?.delete_property(key);
                    if deleted && prior.is_some() {
                        realm.log.record_property(*handle, key.clone(), prior);
                    }
                    if !deleted && ctx.strict {
                        return Ok(realm.throw_error(
                            ModelErrorKind::Type,
                            &format!("cannot delete property '{key}'"),
                            span,
                        ));
                    }
                    Ok(Completion::Normal(Value::Bool(deleted)))
                }
                (RefBase::Value(base @ Value::Abstract(_)), name) => {
                    let key_value = match name {
                        RefName::Abstract(v) => v.clone(),
                        RefName::Key(PropertyKey::String(s)) => Value::string(s.clone()),
                        RefName::Key(PropertyKey::Symbol(id)) => Value::Symbol(*id),
                        RefName::String(s) => Value::string(s.clone()),
                    };
                    realm
                        .active_generator()
                        .emit_property_delete(base.clone(), key_value);
                    Ok(Completion::Normal(Value::Bool(true)))
                }
                _ => Ok(Completion::Normal(Value::Bool(true))),
            }
        }
        Expression::Identifier { name, .. } => {
            if ctx.strict {
                return Ok(realm.throw_error(
                    ModelErrorKind::Syntax,
                    "delete of an unqualified identifier in strict mode",
                    span,
                ));
            }
            match realm.envs.lookup(&realm.heap, ctx.env, name)? {
                Some(env) => {
                    let deleted =
                        realm
                            .envs
                            .delete_binding(&mut realm.log, &mut realm.heap, env, name)?;
                    Ok(Completion::Normal(Value::Bool(deleted)))
                }
                None => Ok(Completion::Normal(Value::Bool(true))),
            }
        }
        _ => {
            try_value!(eval_expression(realm, argument, ctx)?);
            Ok(Completion::Normal(Value::Bool(true)))
        }
    }
}

fn eval_logical(
    realm: &mut Realm,
    operator: LogicalOp,
    left: &Expression,
    right: &Expression,
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    let left_value = try_value!(eval_expression(realm, left, ctx)?);
    match left_value.to_boolean() {
        Some(truthy) => {
            let take_right = match operator {
                LogicalOp::And => truthy,
                LogicalOp::Or => !truthy,
            };
            if take_right {
                eval_expression(realm, right, ctx)
            } else {
                Ok(Completion::Normal(left_value))
            }
        }
        None => speculation::join_logical(realm, operator, left_value, right, ctx, span),
    }
}

fn eval_assignment(
    realm: &mut Realm,
    operator: AssignOp,
    target: &Expression,
    value: &Expression,
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    let reference = match eval_to_reference(realm, target, ctx)? {
        Ok(r) => r,
        Err(abrupt) => return Ok(abrupt),
    };
    let new_value = match operator.binary_op() {
        None => try_value!(eval_expression(realm, value, ctx)?),
        Some(binary) => {
            let current = try_value!(get_value(realm, &reference, span)?);
            let operand = try_value!(eval_expression(realm, value, ctx)?);
            try_value!(apply_binary(realm, binary, current, operand, span)?)
        }
    };
    match put_value(realm, &reference, new_value.clone(), span)? {
        Ok(()) => Ok(Completion::Normal(new_value)),
        Err(abrupt) => Ok(abrupt),
    }
}

fn eval_update(
    realm: &mut Realm,
    operator: UpdateOp,
    prefix: bool,
    argument: &Expression,
    ctx: EvalCtx,
    span: SourceSpan,
) -> EngineResult<Completion> {
    let reference = match eval_to_reference(realm, argument, ctx)? {
        Ok(r) => r,
        Err(abrupt) => return Ok(abrupt),
    };
    let current = try_value!(get_value(realm, &reference, span)?);
    if !current.is_concrete() {
        let delta = match operator {
            UpdateOp::Increment => BinaryOp::Add,
            UpdateOp::Decrement => BinaryOp::Sub,
        };
        let new_value = try_value!(apply_binary(
            realm,
            delta,
            current.clone(),
            Value::Number(1.0),
            span
        )?);
        match put_value(realm, &reference, new_value.clone(), span)? {
            Ok(()) => {
                return Ok(Completion::Normal(if prefix { new_value } else { current }))
            }
            Err(abrupt) => return Ok(abrupt),
        }
    }
    let old_number = to_number(realm, &current);
    let new_number = match operator {
        UpdateOp::Increment => old_number + 1.0,
        UpdateOp::Decrement => old_number - 1.0,
    };
    match put_value(realm, &reference, Value::Number(new_number), span)? {
        Ok(()) => Ok(Completion::Normal(Value::Number(if prefix {
            new_number
        } else {
            old_number
        }))),
        Err(abrupt) => Ok(abrupt),
    }
}
