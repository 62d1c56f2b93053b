#![forbid(unsafe_code)]
//! Integration tests for speculative evaluation: effect-capture frames,
//! rollback neutrality, commit, and abstract-condition branch joins.

use prebake_engine::ast::{ParseGoal, Statement};
use prebake_engine::diagnostics::{PP_UNJOINABLE_COMPLETIONS, PP_UNSUPPORTED_ABSTRACT_CONTROL};
use prebake_engine::evaluator::{evaluate_program, EvalCtx};
use prebake_engine::parser::{CanonicalParser, ScriptParser};
use prebake_engine::realm::{EngineConfig, Realm};
use prebake_engine::speculation;
use prebake_engine::{partially_evaluate, Completion};

// ============================================================================
// Helpers
// ============================================================================

fn parse_body(source: &str) -> Vec<Statement> {
    CanonicalParser
        .parse(source, "<speculation>", ParseGoal::Script, 1)
        .expect("test source must parse")
        .body
}

/// Realm with `var a = {}; a.x = 1;` already interpreted.
fn prepared_realm() -> Realm {
    let program = CanonicalParser
        .parse("var a = {}; a.x = 1;", "<setup>", ParseGoal::Script, 1)
        .unwrap();
    let mut realm = Realm::new(EngineConfig::default());
    evaluate_program(&mut realm, &program).unwrap();
    realm
}

// ============================================================================
// 1. Rollback neutrality
// ============================================================================

#[test]
fn discarded_speculation_restores_bit_identical_state() {
    let mut realm = prepared_realm();
    let heap_before = realm.heap.clone();
    let envs_before = realm.envs.clone();
    let log_len_before = realm.log.len();

    let statements = parse_body("{ a.x = 2; a.y = 3; fresh = {}; }");
    let ctx = EvalCtx {
        env: realm.global_env,
        strict: false,
    };
    let speculation =
        speculation::evaluate_node_for_effects(&mut realm, &statements[0], ctx, "probe").unwrap();
    speculation::discard(&mut realm, &speculation);

    assert_eq!(realm.heap, heap_before);
    assert_eq!(realm.envs, envs_before);
    assert_eq!(realm.log.len(), log_len_before);
}

#[test]
fn speculation_reports_modified_properties_and_completion() {
    let mut realm = prepared_realm();
    let statements = parse_body("{ a.x = 2; }");
    let ctx = EvalCtx {
        env: realm.global_env,
        strict: false,
    };
    let speculation =
        speculation::evaluate_node_for_effects(&mut realm, &statements[0], ctx, "probe").unwrap();

    assert!(matches!(speculation.completion, Completion::Normal(_)));
    assert_eq!(speculation.modified_properties.len(), 1);
    let (_, key, descriptor) = &speculation.modified_properties[0];
    assert_eq!(key.to_string(), "x");
    assert!(descriptor.is_some());
    speculation::discard(&mut realm, &speculation);
}

// ============================================================================
// 2. Commit
// ============================================================================

#[test]
fn committed_speculation_applies_the_after_state() {
    let mut realm = prepared_realm();
    let statements = parse_body("{ a.x = 2; }");
    let ctx = EvalCtx {
        env: realm.global_env,
        strict: false,
    };
    let speculation =
        speculation::evaluate_node_for_effects(&mut realm, &statements[0], ctx, "probe").unwrap();
    speculation::commit(&mut realm, speculation).unwrap();

    // Re-read a.x through a fresh interpretation step.
    let program = CanonicalParser
        .parse("a.x;", "<check>", ParseGoal::Script, 1)
        .unwrap();
    let completion = evaluate_program(&mut realm, &program).unwrap();
    assert_eq!(
        completion,
        Completion::Normal(prebake_engine::Value::Number(2.0))
    );
}

// ============================================================================
// 3. Branch joins through the public pipeline
// ============================================================================

#[test]
fn abstract_guard_joins_heap_writes_into_conditionals() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        var a = {};
        if (c) { a.x = 1; } else { a.x = 2; }
    ";
    let run = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap();
    assert!(run.output.code.contains("a.x = cond ? 1 : 2;"));
    // Neither branch survives as a separate assignment.
    assert!(!run.output.code.contains("a.x = 1;"));
    assert!(!run.output.code.contains("a.x = 2;"));
}

#[test]
fn equal_branch_writes_fold_without_a_condition() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        var a = {};
        if (c) { a.x = 1; } else { a.x = 1; }
    ";
    let run = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap();
    assert!(run.output.code.contains("a.x = 1;"));
    assert!(!run.output.code.contains("cond ?"));
}

#[test]
fn branch_effects_wrap_in_a_residual_conditional() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        if (c) { console.log(\"then\"); } else { console.log(\"else\"); }
    ";
    let run = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap();
    assert!(run.output.code.contains("if (cond)"));
    assert!(run.output.code.contains("console.log(\"then\");"));
    assert!(run.output.code.contains("console.log(\"else\");"));
}

#[test]
fn both_branches_throwing_the_same_kind_join() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        if (c) { throw new Error(\"a\"); } else { throw new Error(\"b\"); }
    ";
    let run = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap();
    assert!(run.output.code.contains("if (cond)"));
    assert!(run.output.code.contains("throw new Error(\"a\");"));
    assert!(run.output.code.contains("throw new Error(\"b\");"));
}

#[test]
fn branches_throwing_different_kinds_are_unjoinable() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        if (c) { throw new Error(\"a\"); } else { throw new TypeError(\"b\"); }
    ";
    let error = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap_err();
    assert_eq!(error.code(), Some(PP_UNJOINABLE_COMPLETIONS));
}

#[test]
fn possibly_normal_branch_continues_the_program() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        var r = 0;
        if (c) { throw new Error(\"early\"); }
        r = 1;
    ";
    let run = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap();
    // The throw survives under its condition; the tail still runs on the
    // normal path.
    assert!(run.output.code.contains("throw new Error(\"early\");"));
    assert!(run.output.code.contains("var r ="));
}

#[test]
fn abstract_logical_operands_join() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        var r = c && 2;
        r;
    ";
    let run = partially_evaluate(source, "<join>", EngineConfig::default()).unwrap();
    assert!(run.output.code.contains("cond ? 2 : cond"));
}

// ============================================================================
// 4. Abstract control flow the engine refuses to fold
// ============================================================================

#[test]
fn abstract_while_guard_is_rejected() {
    let source = "
        var c = __abstract(\"boolean\", \"cond\");
        while (c) { }
    ";
    let error = partially_evaluate(source, "<loop>", EngineConfig::default()).unwrap_err();
    assert_eq!(error.code(), Some(PP_UNSUPPORTED_ABSTRACT_CONTROL));
}

#[test]
fn abstract_switch_discriminant_is_rejected() {
    let source = "
        var c = __abstract(\"number\", \"n\");
        switch (c) { case 1: break; }
    ";
    let error = partially_evaluate(source, "<switch>", EngineConfig::default()).unwrap_err();
    assert_eq!(error.code(), Some(PP_UNSUPPORTED_ABSTRACT_CONTROL));
}
