#![forbid(unsafe_code)]
//! Integration tests for the abstract interpreter on fully concrete
//! programs: exercises `CanonicalParser`, `Realm`, `evaluate_program`
//! and the completion algebra from outside the crate boundary.

use prebake_engine::ast::ParseGoal;
use prebake_engine::completions::Completion;
use prebake_engine::evaluator::evaluate_program;
use prebake_engine::parser::{CanonicalParser, ScriptParser};
use prebake_engine::realm::{EngineConfig, Realm};
use prebake_engine::values::Value;

// ============================================================================
// Helpers
// ============================================================================

fn run(source: &str) -> (Realm, Completion) {
    let program = CanonicalParser
        .parse(source, "<integration>", ParseGoal::Script, 1)
        .expect("test source must parse");
    let mut realm = Realm::new(EngineConfig::default());
    let completion = evaluate_program(&mut realm, &program).expect("interpretation must not fail");
    (realm, completion)
}

fn value_of(source: &str) -> Value {
    let (_, completion) = run(source);
    match completion {
        Completion::Normal(value) => value,
        other => panic!("expected a normal completion, got {other:?}"),
    }
}

fn number_of(source: &str) -> f64 {
    match value_of(source) {
        Value::Number(n) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

fn string_of(source: &str) -> String {
    match value_of(source) {
        Value::Str(s) => s,
        other => panic!("expected a string, got {other:?}"),
    }
}

// ============================================================================
// 1. Expressions
// ============================================================================

#[test]
fn arithmetic_folds_with_precedence() {
    assert_eq!(number_of("1 + 2 * 3;"), 7.0);
    assert_eq!(number_of("(1 + 2) * 3;"), 9.0);
    assert_eq!(number_of("7 % 4;"), 3.0);
    assert_eq!(number_of("1 / 0;"), f64::INFINITY);
}

#[test]
fn string_concatenation_coerces() {
    assert_eq!(string_of("\"a\" + 1;"), "a1");
    assert_eq!(string_of("1 + \"a\";"), "1a");
    assert_eq!(string_of("\"n=\" + (1 + 2);"), "n=3");
}

#[test]
fn equality_operators() {
    assert_eq!(value_of("1 === 1;"), Value::Bool(true));
    assert_eq!(value_of("1 === \"1\";"), Value::Bool(false));
    assert_eq!(value_of("1 == \"1\";"), Value::Bool(true));
    assert_eq!(value_of("null == undefined;"), Value::Bool(true));
    assert_eq!(value_of("NaN === NaN;"), Value::Bool(false));
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(number_of("1 && 2;"), 2.0);
    assert_eq!(number_of("0 || 3;"), 3.0);
    assert_eq!(value_of("0 && neverEvaluated;"), Value::Number(0.0));
}

#[test]
fn typeof_and_void() {
    assert_eq!(string_of("typeof 1;"), "number");
    assert_eq!(string_of("typeof \"s\";"), "string");
    assert_eq!(string_of("typeof undeclared;"), "undefined");
    assert_eq!(string_of("typeof function(){};"), "function");
    assert_eq!(value_of("void 7;"), Value::Undefined);
}

#[test]
fn conditional_and_sequence() {
    assert_eq!(number_of("true ? 1 : 2;"), 1.0);
    assert_eq!(number_of("1, 2, 3;"), 3.0);
}

// ============================================================================
// 2. Bindings and scopes
// ============================================================================

#[test]
fn var_declarations_and_updates() {
    assert_eq!(number_of("var x = 1; x = x + 1; x;"), 2.0);
    assert_eq!(number_of("var x = 5; x += 2; x;"), 7.0);
    assert_eq!(number_of("var i = 0; i++; i++; i;"), 2.0);
    assert_eq!(number_of("var i = 3; --i;"), 2.0);
}

#[test]
fn lexical_declarations_shadow() {
    assert_eq!(
        number_of("let x = 1; { let x = 2; } x;"),
        1.0
    );
}

#[test]
fn tdz_read_throws() {
    let (_, completion) = run("{ x; let x = 1; }");
    assert!(completion.is_throw());
}

#[test]
fn strict_assignment_to_undeclared_throws() {
    let (_, completion) = run("\"use strict\"; ghost = 1;");
    assert!(completion.is_throw());
}

#[test]
fn sloppy_assignment_creates_global() {
    assert_eq!(number_of("ghost = 7; ghost;"), 7.0);
}

// ============================================================================
// 3. Functions
// ============================================================================

#[test]
fn function_declaration_and_call() {
    assert_eq!(number_of("function add(a, b) { return a + b; } add(2, 3);"), 5.0);
}

#[test]
fn missing_arguments_are_undefined() {
    assert_eq!(
        value_of("function first(a, b) { return b; } first(1);"),
        Value::Undefined
    );
}

#[test]
fn closures_capture_environments() {
    let source = "
        function make() {
            var c = 0;
            return function() { c = c + 1; return c; };
        }
        var tick = make();
        tick();
        tick();
    ";
    assert_eq!(number_of(source), 2.0);
}

#[test]
fn this_binding_through_member_calls() {
    let source = "
        var o = {};
        o.v = 42;
        o.m = function() { return this.v; };
        o.m();
    ";
    assert_eq!(number_of(source), 42.0);
}

#[test]
fn constructors_and_instanceof() {
    let source = "
        function Point(x) { this.x = x; }
        var p = new Point(4);
        p.x;
    ";
    assert_eq!(number_of(source), 4.0);
    assert_eq!(
        value_of("function F() {} var f = new F(); f instanceof F;"),
        Value::Bool(true)
    );
}

#[test]
fn call_of_non_callable_throws() {
    let (_, completion) = run("var x = 1; x();");
    assert!(completion.is_throw());
}

// ============================================================================
// 4. Control flow
// ============================================================================

#[test]
fn if_else_selects_concretely() {
    assert_eq!(number_of("var r = 0; if (1 < 2) { r = 1; } else { r = 2; } r;"), 1.0);
}

#[test]
fn while_and_do_while() {
    assert_eq!(number_of("var n = 0; while (n < 3) { n = n + 1; } n;"), 3.0);
    assert_eq!(number_of("var n = 0; do { n++; } while (n < 3); n;"), 3.0);
}

#[test]
fn for_loop_with_update() {
    assert_eq!(
        number_of("var s = 0; for (var i = 1; i <= 4; i++) { s = s + i; } s;"),
        10.0
    );
}

#[test]
fn labeled_continue_targets_outer_loop() {
    let source = "
        var s = 0;
        outer: for (var i = 0; i < 3; i++) {
            for (var j = 0; j < 3; j++) {
                if (j === 1) { continue outer; }
                s = s + 1;
            }
        }
        s;
    ";
    assert_eq!(number_of(source), 3.0);
}

#[test]
fn labeled_break_unwinds() {
    let source = "
        var s = 0;
        outer: for (var i = 0; i < 3; i++) {
            for (var j = 0; j < 3; j++) {
                if (i === 1) { break outer; }
                s = s + 1;
            }
        }
        s;
    ";
    assert_eq!(number_of(source), 3.0);
}

#[test]
fn switch_with_fallthrough_and_default() {
    let source = "
        var r = 0;
        switch (2) {
            case 1: r = 1; break;
            case 2: r = 2;
            case 3: r = 3; break;
            default: r = 9;
        }
        r;
    ";
    assert_eq!(number_of(source), 3.0);
    let source_default = "
        var r = 0;
        switch (42) {
            case 1: r = 1; break;
            default: r = 9;
        }
        r;
    ";
    assert_eq!(number_of(source_default), 9.0);
}

// ============================================================================
// 5. Exceptions
// ============================================================================

#[test]
fn throw_and_catch() {
    assert_eq!(
        string_of("try { throw new Error(\"boom\"); } catch (e) { e.message; }"),
        "boom"
    );
}

#[test]
fn finally_runs_and_reraises() {
    let source = "
        var log = \"\";
        try {
            try { throw new Error(\"x\"); } finally { log = log + \"f\"; }
        } catch (e) {
            log = log + \"c\";
        }
        log;
    ";
    assert_eq!(string_of(source), "fc");
}

#[test]
fn normal_finally_preserves_the_try_result() {
    assert_eq!(
        number_of("var r = 0; try { r = 1; } finally { r = 2; } r;"),
        2.0
    );
}

#[test]
fn abrupt_finally_wins() {
    let source = "
        var r = 0;
        try {
            try { r = 1; } finally { throw new Error(\"f\"); }
        } catch (e) {
            r = 9;
        }
        r;
    ";
    assert_eq!(number_of(source), 9.0);
}

#[test]
fn uncaught_throw_escapes_as_completion() {
    let (realm, completion) = run("throw new Error(\"boom\");");
    let Completion::Throw { value, .. } = completion else {
        panic!("expected a throw completion");
    };
    let Value::Object(handle) = value else {
        panic!("expected an error object");
    };
    let record = realm.heap.get(handle).unwrap();
    assert_eq!(record.class_tag.as_deref(), Some("Error"));
}

// ============================================================================
// 6. Objects and for-in
// ============================================================================

#[test]
fn property_reads_walk_the_prototype_chain() {
    let source = "
        function Base() {}
        Base.prototype.shared = 10;
        var child = new Base();
        child.own = 1;
        child.shared + child.own;
    ";
    assert_eq!(number_of(source), 11.0);
}

#[test]
fn for_in_yields_keys_in_insertion_order_indices_first() {
    let source = "
        var o = {};
        o.b = 1;
        o[\"2\"] = 2;
        o.a = 3;
        var keys = \"\";
        for (var k in o) { keys = keys + k; }
        keys;
    ";
    assert_eq!(string_of(source), "2ba");
}

#[test]
fn for_in_skips_each_key_exactly_once() {
    let source = "
        var o = {};
        o.a = 1;
        o.b = 2;
        var count = 0;
        for (var k in o) { count = count + 1; }
        count;
    ";
    assert_eq!(number_of(source), 2.0);
}

#[test]
fn delete_removes_own_properties() {
    assert_eq!(
        value_of("var o = {}; o.x = 1; delete o.x; o.x === undefined;"),
        Value::Bool(true)
    );
    assert_eq!(value_of("var o = {}; o.x = 1; \"x\" in o;"), Value::Bool(true));
    assert_eq!(
        value_of("var o = {}; o.x = 1; delete o.x; \"x\" in o;"),
        Value::Bool(false)
    );
}

#[test]
fn object_literals_with_nested_values() {
    let source = "
        var config = {name: \"engine\", limits: {depth: 4}};
        config.limits.depth + config.name.length;
    ";
    assert_eq!(number_of(source), 10.0);
}

#[test]
fn arrays_track_indices_and_length() {
    assert_eq!(number_of("var a = [1, 2, 3]; a[0] + a[2];"), 4.0);
    assert_eq!(number_of("var a = [1, 2, 3]; a.length;"), 3.0);
}

#[test]
fn loop_budget_aborts_runaway_interpretation() {
    let program = CanonicalParser
        .parse("var i = 0; while (i < 10) { }", "<t>", ParseGoal::Script, 1)
        .unwrap();
    let mut realm = Realm::new(EngineConfig {
        max_loop_iterations: 100,
        ..EngineConfig::default()
    });
    let error = evaluate_program(&mut realm, &program).unwrap_err();
    assert!(error.is_deadline());
}
