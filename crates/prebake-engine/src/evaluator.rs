//! Statement dispatch: the per-node-kind evaluation routines.
//!
//! Dispatch order per node: record the source span on the realm, poll the
//! deadline, evaluate, fold any possibly-normal completion produced by an
//! abstract-condition join into the rest of the statement list.
//!
//! Control-flow frames move through
//! `Running → (ThrowPending | BreakPending | ContinuePending |
//! ReturnPending | Normal)`: loops consume `Continue` with a matching
//! label and restart, `Break` unwinds to the nearest matching label, and
//! everything else propagates to the caller.

use crate::ast::{
    BlockStatement, ForInStatement, ForInTarget, ForInit, ForStatement, FunctionDeclaration,
    FunctionExpression, IfStatement, Program, Statement, SwitchStatement, TryStatement,
    VariableDeclaration, VariableKind, WhileStatement,
};
use crate::completions::Completion;
use crate::diagnostics::{
    EngineResult, PP_DEADLINE_EXCEEDED, PP_UNSUPPORTED_ABSTRACT_CONTROL, PP_UNSUPPORTED_FOR_IN,
};
use crate::environment::EnvHandle;
use crate::expressions::{
    create_function_value, eval_expression, eval_to_reference, has_use_strict, put_value,
    try_value,
};
use crate::objects::PropertyKey;
use crate::realm::{ExecutionContext, Realm};
use crate::speculation;
use crate::values::Value;

/// Per-evaluation context: the active lexical environment and strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalCtx {
    pub env: EnvHandle,
    pub strict: bool,
}

// ---------------------------------------------------------------------------
// Program entry
// ---------------------------------------------------------------------------

/// Interpret a whole program against the realm. The returned completion's
/// value is the program's completion value; abrupt completions bubble out
/// uncaught (the driver residualizes them).
pub fn evaluate_program(realm: &mut Realm, program: &Program) -> EngineResult<Completion> {
    let strict = has_use_strict(&program.body);
    let ctx = EvalCtx {
        env: realm.global_env,
        strict,
    };
    realm.enter_context(ExecutionContext {
        env: ctx.env,
        function: None,
        strict,
    });
    realm.start_deadline();

    let hoist_result = hoist_global_declarations(realm, &program.body, ctx);
    let completion = match hoist_result {
        Ok(()) => eval_statement_list(realm, &program.body, ctx),
        Err(error) => Err(error),
    };
    realm.leave_context()?;
    completion
}

/// Global hoisting: `var` names become global var bindings, function
/// declarations are created and initialized, lexical declarations get
/// uninitialized bindings on the global declarative record.
fn hoist_global_declarations(
    realm: &mut Realm,
    body: &[Statement],
    ctx: EvalCtx,
) -> EngineResult<()> {
    for name in hoisted_var_names(body) {
        realm.envs.create_global_var_binding(
            &mut realm.log,
            &mut realm.heap,
            realm.global_env,
            &name,
        )?;
    }
    for statement in body {
        match statement {
            Statement::Function(declaration) => {
                realm.envs.create_global_var_binding(
                    &mut realm.log,
                    &mut realm.heap,
                    realm.global_env,
                    &declaration.name,
                )?;
                let value = function_declaration_value(realm, declaration, ctx);
                realm
                    .envs
                    .set_binding(
                        &mut realm.log,
                        &mut realm.heap,
                        ctx.env,
                        &declaration.name,
                        value,
                        false,
                    )?
                    .map_err(|e| {
                        crate::diagnostics::EngineError::Invariant(format!(
                            "global function binding failed: {}",
                            e.message
                        ))
                    })?;
            }
            Statement::Variable(declaration)
                if !matches!(declaration.kind, VariableKind::Var) =>
            {
                for declarator in &declaration.declarators {
                    match declaration.kind {
                        VariableKind::Let => realm.envs.create_mutable_binding(
                            &mut realm.log,
                            ctx.env,
                            &declarator.name,
                            false,
                        )?,
                        VariableKind::Const => realm.envs.create_immutable_binding(
                            &mut realm.log,
                            ctx.env,
                            &declarator.name,
                            ctx.strict,
                        )?,
                        VariableKind::Var => unreachable!("guarded above"),
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn function_declaration_value(
    realm: &mut Realm,
    declaration: &FunctionDeclaration,
    ctx: EvalCtx,
) -> Value {
    let expression = FunctionExpression {
        name: Some(declaration.name.clone()),
        params: declaration.params.clone(),
        body: declaration.body.clone(),
        span: declaration.span,
    };
    create_function_value(realm, &expression, ctx)
}

/// Function-scoped `var` names of a statement list, skipping nested
/// function bodies.
pub fn hoisted_var_names(body: &[Statement]) -> Vec<String> {
    let mut names = Vec::new();
    for statement in body {
        collect_var_names(statement, &mut names);
    }
    names
}

fn collect_var_names(statement: &Statement, names: &mut Vec<String>) {
    let mut push = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };
    match statement {
        Statement::Variable(declaration) if matches!(declaration.kind, VariableKind::Var) => {
            for declarator in &declaration.declarators {
                push(&declarator.name);
            }
        }
        Statement::Block(block) => {
            for inner in &block.body {
                collect_var_names(inner, names);
            }
        }
        Statement::If(statement) => {
            collect_var_names(&statement.consequent, names);
            if let Some(alternate) = &statement.alternate {
                collect_var_names(alternate, names);
            }
        }
        Statement::For(statement) => {
            if let Some(ForInit::Declaration(declaration)) = &statement.init {
                if matches!(declaration.kind, VariableKind::Var) {
                    for declarator in &declaration.declarators {
                        push(&declarator.name);
                    }
                }
            }
            collect_var_names(&statement.body, names);
        }
        Statement::ForIn(statement) => {
            if let ForInTarget::Declaration(VariableKind::Var, name) = &statement.left {
                push(name);
            }
            collect_var_names(&statement.body, names);
        }
        Statement::While(statement) => collect_var_names(&statement.body, names),
        Statement::DoWhile(statement) => collect_var_names(&statement.body, names),
        Statement::Switch(statement) => {
            for case in &statement.cases {
                for inner in &case.body {
                    collect_var_names(inner, names);
                }
            }
        }
        Statement::Try(statement) => {
            for inner in &statement.block.body {
                collect_var_names(inner, names);
            }
            if let Some(handler) = &statement.handler {
                for inner in &handler.body.body {
                    collect_var_names(inner, names);
                }
            }
            if let Some(finalizer) = &statement.finalizer {
                for inner in &finalizer.body {
                    collect_var_names(inner, names);
                }
            }
        }
        Statement::Labeled(statement) => collect_var_names(&statement.body, names),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Statement lists
// ---------------------------------------------------------------------------

/// Evaluate a statement list with completion-value chaining. When a
/// statement joins into a possibly-normal completion, the remainder of the
/// list runs speculatively under the normal-path condition and re-joins.
pub fn eval_statement_list(
    realm: &mut Realm,
    statements: &[Statement],
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    let mut value = Value::Undefined;
    for (index, statement) in statements.iter().enumerate() {
        let completion = eval_statement(realm, statement, ctx)?;
        match completion {
            Completion::Normal(v) => {
                // Expression statements always produce a value; other
                // statements only forward a non-empty one.
                if matches!(statement, Statement::Expression(_)) || !matches!(v, Value::Undefined) {
                    value = v;
                }
            }
            Completion::PossiblyNormal(pn) => {
                let rest = &statements[index + 1..];
                return speculation::continue_after_possibly_normal(realm, *pn, rest, ctx, value);
            }
            abrupt => return Ok(abrupt.update_empty(value)),
        }
    }
    Ok(Completion::Normal(value))
}

// ---------------------------------------------------------------------------
// Statement dispatch
// ---------------------------------------------------------------------------

/// Evaluate one statement.
pub fn eval_statement(
    realm: &mut Realm,
    statement: &Statement,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    realm.current_span = statement.span();
    realm.check_deadline()?;
    match statement {
        Statement::Empty { .. } => Ok(Completion::empty()),
        Statement::Expression(statement) => eval_expression(realm, &statement.expression, ctx),
        Statement::Variable(declaration) => eval_variable_declaration(realm, declaration, ctx),
        Statement::Function(_) => {
            // Created and bound during hoisting.
            Ok(Completion::empty())
        }
        Statement::Block(block) => eval_block(realm, block, ctx),
        Statement::If(statement) => eval_if(realm, statement, ctx),
        Statement::While(statement) => eval_while(realm, statement, ctx, &[]),
        Statement::DoWhile(statement) => eval_do_while(realm, statement, ctx, &[]),
        Statement::For(statement) => eval_for(realm, statement, ctx, &[]),
        Statement::ForIn(statement) => eval_for_in(realm, statement, ctx, &[]),
        Statement::Switch(statement) => eval_switch(realm, statement, ctx),
        Statement::Try(statement) => eval_try(realm, statement, ctx),
        Statement::Throw(statement) => {
            let value = try_value!(eval_expression(realm, &statement.argument, ctx)?);
            Ok(Completion::Throw {
                value,
                span: statement.span,
            })
        }
        Statement::Return(statement) => {
            let value = match &statement.argument {
                Some(expr) => try_value!(eval_expression(realm, expr, ctx)?),
                None => Value::Undefined,
            };
            Ok(Completion::Return(value))
        }
        Statement::Break { label, .. } => Ok(Completion::Break {
            label: label.clone(),
            value: Value::Undefined,
        }),
        Statement::Continue { label, .. } => Ok(Completion::Continue {
            label: label.clone(),
            value: Value::Undefined,
        }),
        Statement::Labeled(statement) => eval_labeled(realm, statement, ctx),
    }
}

fn eval_variable_declaration(
    realm: &mut Realm,
    declaration: &VariableDeclaration,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    for declarator in &declaration.declarators {
        match declaration.kind {
            VariableKind::Var => {
                // Binding exists from hoisting; the declarator initializer
                // is an assignment.
                if let Some(init) = &declarator.init {
                    let value = try_value!(eval_expression(realm, init, ctx)?);
                    match realm.envs.set_binding(
                        &mut realm.log,
                        &mut realm.heap,
                        ctx.env,
                        &declarator.name,
                        value,
                        false,
                    )? {
                        Ok(()) => {}
                        Err(error) => {
                            return Ok(realm.throw_model_error(error, declarator.span))
                        }
                    }
                }
            }
            VariableKind::Let | VariableKind::Const => {
                // Binding was created (uninitialized) at scope entry.
                let value = match &declarator.init {
                    Some(init) => try_value!(eval_expression(realm, init, ctx)?),
                    None => Value::Undefined,
                };
                realm.envs.initialize_binding(
                    &mut realm.log,
                    ctx.env,
                    &declarator.name,
                    value,
                )?;
            }
        }
    }
    Ok(Completion::empty())
}

fn eval_block(realm: &mut Realm, block: &BlockStatement, ctx: EvalCtx) -> EngineResult<Completion> {
    let env = realm.envs.alloc_declarative(ctx.env);
    let block_ctx = EvalCtx { env, ..ctx };
    hoist_lexical_declarations(realm, &block.body, block_ctx)?;
    eval_statement_list(realm, &block.body, block_ctx)
}

/// Block-entry pass creating uninitialized lexical bindings and function
/// declarations.
fn hoist_lexical_declarations(
    realm: &mut Realm,
    body: &[Statement],
    ctx: EvalCtx,
) -> EngineResult<()> {
    for statement in body {
        match statement {
            Statement::Variable(declaration) => match declaration.kind {
                VariableKind::Let => {
                    for declarator in &declaration.declarators {
                        realm.envs.create_mutable_binding(
                            &mut realm.log,
                            ctx.env,
                            &declarator.name,
                            false,
                        )?;
                    }
                }
                VariableKind::Const => {
                    for declarator in &declaration.declarators {
                        realm.envs.create_immutable_binding(
                            &mut realm.log,
                            ctx.env,
                            &declarator.name,
                            ctx.strict,
                        )?;
                    }
                }
                VariableKind::Var => {}
            },
            Statement::Function(declaration) => {
                realm.envs.create_mutable_binding(
                    &mut realm.log,
                    ctx.env,
                    &declaration.name,
                    false,
                )?;
                let value = function_declaration_value(realm, declaration, ctx);
                realm.envs.initialize_binding(
                    &mut realm.log,
                    ctx.env,
                    &declaration.name,
                    value,
                )?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn eval_if(realm: &mut Realm, statement: &IfStatement, ctx: EvalCtx) -> EngineResult<Completion> {
    let test = try_value!(eval_expression(realm, &statement.test, ctx)?);
    match test.to_boolean() {
        Some(true) => eval_statement(realm, &statement.consequent, ctx),
        Some(false) => match &statement.alternate {
            Some(alternate) => eval_statement(realm, alternate, ctx),
            None => Ok(Completion::empty()),
        },
        None => speculation::join_if_branches(
            realm,
            test,
            &statement.consequent,
            statement.alternate.as_deref(),
            ctx,
        ),
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

fn loop_guard(realm: &mut Realm, iterations: u64) -> EngineResult<()> {
    if iterations > realm.config.max_loop_iterations {
        return Err(realm.fatal(
            PP_DEADLINE_EXCEEDED,
            "loop exceeded the iteration budget without terminating",
        ));
    }
    realm.check_deadline()
}

/// Shared loop-body handling: returns `Ok(None)` to keep iterating,
/// `Ok(Some(completion))` to stop with that completion.
fn handle_loop_body_completion(
    completion: Completion,
    labels: &[String],
    value: &mut Value,
) -> Result<Option<Completion>, Completion> {
    match completion {
        Completion::Normal(v) => {
            if !matches!(v, Value::Undefined) {
                *value = v;
            }
            Ok(None)
        }
        c if c.consumes_continue(labels) => {
            if let Some(v) = c.value() {
                if !matches!(v, Value::Undefined) {
                    *value = v.clone();
                }
            }
            Ok(None)
        }
        c if c.consumes_break(labels) => Ok(Some(Completion::Normal(value.clone()))),
        abrupt => Err(abrupt),
    }
}

fn eval_while(
    realm: &mut Realm,
    statement: &WhileStatement,
    ctx: EvalCtx,
    labels: &[String],
) -> EngineResult<Completion> {
    let mut value = Value::Undefined;
    let mut iterations: u64 = 0;
    loop {
        iterations += 1;
        loop_guard(realm, iterations)?;
        let test = try_value!(eval_expression(realm, &statement.test, ctx)?);
        match test.to_boolean() {
            Some(true) => {}
            Some(false) => return Ok(Completion::Normal(value)),
            None => {
                return Err(realm.fatal(
                    PP_UNSUPPORTED_ABSTRACT_CONTROL,
                    "while-loop guard is abstract; the loop cannot be folded",
                ))
            }
        }
        let completion = eval_statement(realm, &statement.body, ctx)?;
        match handle_loop_body_completion(completion, labels, &mut value) {
            Ok(None) => {}
            Ok(Some(done)) => return Ok(done),
            Err(abrupt) => return Ok(abrupt.update_empty(value)),
        }
    }
}

fn eval_do_while(
    realm: &mut Realm,
    statement: &crate::ast::DoWhileStatement,
    ctx: EvalCtx,
    labels: &[String],
) -> EngineResult<Completion> {
    let mut value = Value::Undefined;
    let mut iterations: u64 = 0;
    loop {
        iterations += 1;
        loop_guard(realm, iterations)?;
        let completion = eval_statement(realm, &statement.body, ctx)?;
        match handle_loop_body_completion(completion, labels, &mut value) {
            Ok(None) => {}
            Ok(Some(done)) => return Ok(done),
            Err(abrupt) => return Ok(abrupt.update_empty(value)),
        }
        let test = try_value!(eval_expression(realm, &statement.test, ctx)?);
        match test.to_boolean() {
            Some(true) => {}
            Some(false) => return Ok(Completion::Normal(value)),
            None => {
                return Err(realm.fatal(
                    PP_UNSUPPORTED_ABSTRACT_CONTROL,
                    "do-while guard is abstract; the loop cannot be folded",
                ))
            }
        }
    }
}

fn eval_for(
    realm: &mut Realm,
    statement: &ForStatement,
    ctx: EvalCtx,
    labels: &[String],
) -> EngineResult<Completion> {
    let env = realm.envs.alloc_declarative(ctx.env);
    let loop_ctx = EvalCtx { env, ..ctx };

    match &statement.init {
        Some(ForInit::Declaration(declaration)) => {
            if !matches!(declaration.kind, VariableKind::Var) {
                hoist_lexical_declarations(
                    realm,
                    &[Statement::Variable(declaration.clone())],
                    loop_ctx,
                )?;
            }
            try_value!(eval_variable_declaration(realm, declaration, loop_ctx)?);
        }
        Some(ForInit::Expression(expr)) => {
            try_value!(eval_expression(realm, expr, loop_ctx)?);
        }
        None => {}
    }

    let mut value = Value::Undefined;
    let mut iterations: u64 = 0;
    loop {
        iterations += 1;
        loop_guard(realm, iterations)?;
        if let Some(test) = &statement.test {
            let test_value = try_value!(eval_expression(realm, test, loop_ctx)?);
            match test_value.to_boolean() {
                Some(true) => {}
                Some(false) => return Ok(Completion::Normal(value)),
                None => {
                    return Err(realm.fatal(
                        PP_UNSUPPORTED_ABSTRACT_CONTROL,
                        "for-loop guard is abstract; the loop cannot be folded",
                    ))
                }
            }
        }
        let completion = eval_statement(realm, &statement.body, loop_ctx)?;
        match handle_loop_body_completion(completion, labels, &mut value) {
            Ok(None) => {}
            Ok(Some(done)) => return Ok(done),
            Err(abrupt) => return Ok(abrupt.update_empty(value)),
        }
        if let Some(update) = &statement.update {
            try_value!(eval_expression(realm, update, loop_ctx)?);
        }
    }
}

// ---------------------------------------------------------------------------
// for-in
// ---------------------------------------------------------------------------

fn eval_for_in(
    realm: &mut Realm,
    statement: &ForInStatement,
    ctx: EvalCtx,
    labels: &[String],
) -> EngineResult<Completion> {
    let iterated = try_value!(eval_expression(realm, &statement.right, ctx)?);
    match &iterated {
        Value::Undefined | Value::Null => Ok(Completion::empty()),
        Value::Object(handle) => {
            let record = realm.heap.get(*handle)?;
            if record.partial {
                if record.simple {
                    speculation::residualize_for_in(realm, statement, *handle, ctx)
                } else {
                    Err(realm.fatal(
                        PP_UNSUPPORTED_FOR_IN,
                        "for-in over a partial object that is not simple",
                    ))
                }
            } else {
                concrete_for_in(realm, statement, *handle, ctx, labels)
            }
        }
        Value::Abstract(_) => Err(realm.fatal(
            PP_UNSUPPORTED_FOR_IN,
            "for-in over an abstract value that is not modeled as simple and partial",
        )),
        _ => Ok(Completion::empty()),
    }
}

/// Enumerate a concrete object's own enumerable string keys, each exactly
/// once, in insertion order (array indices first, per key order).
fn concrete_for_in(
    realm: &mut Realm,
    statement: &ForInStatement,
    handle: crate::values::ObjectHandle,
    ctx: EvalCtx,
    labels: &[String],
) -> EngineResult<Completion> {
    let keys = realm.heap.get(handle)?.enumerable_string_keys();
    let mut value = Value::Undefined;
    for key in keys {
        // Keys deleted during iteration are skipped.
        if !realm
            .heap
            .get(handle)?
            .has_own_property(&PropertyKey::string(&key))
        {
            continue;
        }
        match bind_for_in_variable(realm, statement, Value::string(key), ctx)? {
            Ok(()) => {}
            Err(abrupt) => return Ok(abrupt),
        }
        let completion = eval_statement(realm, &statement.body, ctx)?;
        match handle_loop_body_completion(completion, labels, &mut value) {
            Ok(None) => {}
            Ok(Some(done)) => return Ok(done),
            Err(abrupt) => return Ok(abrupt.update_empty(value)),
        }
    }
    Ok(Completion::Normal(value))
}

/// Assign the loop key to the `for (… in …)` left-hand side.
pub fn bind_for_in_variable(
    realm: &mut Realm,
    statement: &ForInStatement,
    key: Value,
    ctx: EvalCtx,
) -> EngineResult<Result<(), Completion>> {
    match &statement.left {
        ForInTarget::Declaration(_, name) => {
            if realm.envs.lookup(&realm.heap, ctx.env, name)?.is_none() {
                realm
                    .envs
                    .create_mutable_binding(&mut realm.log, ctx.env, name, false)?;
                realm
                    .envs
                    .initialize_binding(&mut realm.log, ctx.env, name, key)?;
                return Ok(Ok(()));
            }
            match realm
                .envs
                .set_binding(&mut realm.log, &mut realm.heap, ctx.env, name, key, false)?
            {
                Ok(()) => Ok(Ok(())),
                Err(error) => Ok(Err(realm.throw_model_error(error, statement.span))),
            }
        }
        ForInTarget::Pattern(expr) => {
            let reference = match eval_to_reference(realm, expr, ctx)? {
                Ok(r) => r,
                Err(abrupt) => return Ok(Err(abrupt)),
            };
            put_value(realm, &reference, key, statement.span)
        }
    }
}

// ---------------------------------------------------------------------------
// switch / try / labels
// ---------------------------------------------------------------------------

fn eval_switch(
    realm: &mut Realm,
    statement: &SwitchStatement,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    let discriminant = try_value!(eval_expression(realm, &statement.discriminant, ctx)?);
    if !discriminant.is_concrete() {
        return Err(realm.fatal(
            PP_UNSUPPORTED_ABSTRACT_CONTROL,
            "switch discriminant is abstract; the dispatch cannot be folded",
        ));
    }

    // Select the first strictly-equal case, falling back to default.
    let mut start = None;
    for (index, case) in statement.cases.iter().enumerate() {
        if let Some(test) = &case.test {
            let test_value = try_value!(eval_expression(realm, test, ctx)?);
            if discriminant.strict_equals(&test_value) == Some(true) {
                start = Some(index);
                break;
            }
        }
    }
    if start.is_none() {
        start = statement.cases.iter().position(|case| case.test.is_none());
    }
    let Some(start) = start else {
        return Ok(Completion::empty());
    };

    let env = realm.envs.alloc_declarative(ctx.env);
    let switch_ctx = EvalCtx { env, ..ctx };
    let mut value = Value::Undefined;
    for case in &statement.cases[start..] {
        for inner in &case.body {
            let completion = eval_statement(realm, inner, switch_ctx)?;
            match completion {
                Completion::Normal(v) => {
                    if !matches!(v, Value::Undefined) {
                        value = v;
                    }
                }
                c if c.consumes_break(&[]) => return Ok(Completion::Normal(value)),
                abrupt => return Ok(abrupt.update_empty(value)),
            }
        }
    }
    Ok(Completion::Normal(value))
}

fn eval_try(realm: &mut Realm, statement: &TryStatement, ctx: EvalCtx) -> EngineResult<Completion> {
    let block_completion = eval_block(realm, &statement.block, ctx)?;

    let handled = match block_completion {
        Completion::Throw { value, span: throw_span } => match &statement.handler {
            Some(handler) => {
                let env = realm.envs.alloc_declarative(ctx.env);
                let catch_ctx = EvalCtx { env, ..ctx };
                if let Some(param) = &handler.param {
                    realm
                        .envs
                        .create_mutable_binding(&mut realm.log, env, param, false)?;
                    realm
                        .envs
                        .initialize_binding(&mut realm.log, env, param, value)?;
                }
                hoist_lexical_declarations(realm, &handler.body.body, catch_ctx)?;
                eval_statement_list(realm, &handler.body.body, catch_ctx)?
            }
            None => Completion::Throw {
                value,
                span: throw_span,
            },
        },
        other => other,
    };

    match &statement.finalizer {
        Some(finalizer) => {
            let finally_completion = eval_block(realm, finalizer, ctx)?;
            // A normal finally re-raises the incoming completion; an
            // abrupt finally wins.
            if finally_completion.is_abrupt() {
                Ok(finally_completion)
            } else {
                Ok(handled)
            }
        }
        None => Ok(handled),
    }
}

fn eval_labeled(
    realm: &mut Realm,
    statement: &crate::ast::LabeledStatement,
    ctx: EvalCtx,
) -> EngineResult<Completion> {
    // Collect the full label chain down to the labeled loop.
    let mut labels = vec![statement.label.clone()];
    let mut body: &Statement = &statement.body;
    while let Statement::Labeled(inner) = body {
        labels.push(inner.label.clone());
        body = &inner.body;
    }

    let completion = match body {
        Statement::While(inner) => eval_while(realm, inner, ctx, &labels)?,
        Statement::DoWhile(inner) => eval_do_while(realm, inner, ctx, &labels)?,
        Statement::For(inner) => eval_for(realm, inner, ctx, &labels)?,
        Statement::ForIn(inner) => eval_for_in(realm, inner, ctx, &labels)?,
        other => {
            let inner_completion = eval_statement(realm, other, ctx)?;
            if inner_completion.consumes_break(&labels) {
                Completion::Normal(
                    inner_completion
                        .value()
                        .cloned()
                        .unwrap_or(Value::Undefined),
                )
            } else {
                inner_completion
            }
        }
    };
    // A break targeting one of our labels stops here.
    if completion.consumes_break(&labels) {
        return Ok(Completion::Normal(
            completion.value().cloned().unwrap_or(Value::Undefined),
        ));
    }
    Ok(completion)
}

