#![forbid(unsafe_code)]
//! End-to-end residualization tests: the seed scenarios, determinism,
//! idempotence, pure-entry dropping and declaration-before-use ordering.

use prebake_engine::diagnostics::PP_UNSUPPORTED_FOR_IN;
use prebake_engine::partially_evaluate;
use prebake_engine::realm::EngineConfig;

fn evaluate(source: &str) -> String {
    partially_evaluate(source, "<residual>", EngineConfig::default())
        .expect("partial evaluation must succeed")
        .output
        .code
}

// ============================================================================
// 1. Seed scenarios
// ============================================================================

#[test]
fn constant_arithmetic_bakes_into_the_declaration() {
    let code = evaluate("var x = 1 + 2; x;");
    assert!(code.contains("var x = 3;"));
    assert!(code.contains("3;"));
    assert!(!code.contains("1 + 2"));
}

#[test]
fn redundant_writes_fold_to_the_final_value() {
    let code = evaluate("var a = {}; a.x = 1; a.x = 2;");
    assert!(code.contains("var a = {};"));
    assert!(code.contains("a.x = 2;"));
    assert!(!code.contains("a.x = 1;"));
}

#[test]
fn for_in_over_non_simple_abstract_is_a_fatal_pp0013() {
    let source = "var o = __abstract(\"object\", \"obj\"); for (var k in o) { }";
    let error = partially_evaluate(source, "<residual>", EngineConfig::default()).unwrap_err();
    assert_eq!(error.code(), Some(PP_UNSUPPORTED_FOR_IN));
}

#[test]
fn for_in_copy_over_simple_partial_object_residualizes() {
    let source = "
        var o = __abstract_simple_partial(\"src\");
        var t = {};
        for (var k in o) { t[k] = o[k]; }
    ";
    let code = evaluate(source);
    assert!(code.contains("for (var k in src)"));
    assert!(code.contains("t[k] = src[k];"));
    assert!(code.contains("var t = {};"));
}

#[test]
fn top_level_throw_survives_verbatim() {
    let code = evaluate("throw new Error(\"boom\");");
    assert_eq!(code, "throw new Error(\"boom\");\n");
}

#[test]
fn console_log_is_emitted_exactly_once() {
    let code = evaluate("console.log(\"hi\");");
    assert_eq!(code, "console.log(\"hi\");\n");
    assert_eq!(code.matches("console.log").count(), 1);
}

// ============================================================================
// 2. Universal properties
// ============================================================================

#[test]
fn output_is_deterministic_across_runs() {
    let source = "
        var o = __abstract_simple_partial(\"src\");
        var a = {};
        a.first = o.alpha;
        a.second = o.beta;
        console.log(\"done\");
    ";
    let first = partially_evaluate(source, "<residual>", EngineConfig::default()).unwrap();
    let second = partially_evaluate(source, "<residual>", EngineConfig::default()).unwrap();
    assert_eq!(first.output.code, second.output.code);
    assert_eq!(first.output.hash, second.output.hash);
}

#[test]
fn residualization_is_idempotent_on_concrete_programs() {
    let source = "var x = 1 + 2; var y = x * 2; console.log(\"go\"); y;";
    let once = evaluate(source);
    let twice = evaluate(&once);
    let thrice = evaluate(&twice);
    assert_eq!(twice, thrice);
}

#[test]
fn unreferenced_pure_reads_are_dropped() {
    let source = "
        var o = __abstract_simple_partial(\"src\");
        o.unused;
        0;
    ";
    let code = evaluate(source);
    assert!(!code.contains("unused"));
}

#[test]
fn referenced_pure_reads_survive() {
    let source = "
        var o = __abstract_simple_partial(\"src\");
        var kept = o.field;
        kept;
    ";
    let code = evaluate(source);
    assert!(code.contains("src.field"));
    assert!(code.contains("var kept ="));
}

#[test]
fn every_identifier_is_declared_before_use() {
    let source = "
        var o = __abstract_simple_partial(\"src\");
        var wrapper = {};
        wrapper.inner = {};
        wrapper.inner.value = o.data;
        console.log(\"ready\");
    ";
    let code = evaluate(source);
    // Each generated `_`-prefixed or user declaration precedes its first
    // use on an earlier line.
    let lines: Vec<&str> = code.lines().collect();
    for (index, line) in lines.iter().enumerate() {
        if let Some(rest) = line.trim().strip_prefix("var ") {
            if let Some(name) = rest.split([' ', '=', ';']).next() {
                for earlier in &lines[..index] {
                    assert!(
                        !earlier.contains(&format!("{name}."))
                            && !earlier.contains(&format!("{name}[")),
                        "`{name}` used before declaration:\n{code}"
                    );
                }
            }
        }
    }
}

#[test]
fn cyclic_object_graphs_use_post_hoc_assignment() {
    let source = "
        var a = {};
        var b = {};
        a.other = b;
        b.other = a;
        console.log(\"tied\");
    ";
    let code = evaluate(source);
    assert!(code.contains("var a = {};"));
    assert!(code.contains("var b = {};"));
    assert!(code.contains("a.other = b;"));
    assert!(code.contains("b.other = a;"));
}

// ============================================================================
// 3. Derived values and invariants
// ============================================================================

#[test]
fn residual_calls_declare_fresh_bindings() {
    let source = "
        var f = __abstract(\"function\", \"extern\");
        var r = f(1, 2);
        r;
    ";
    let code = evaluate(source);
    assert!(code.contains("extern(1, 2)"));
    assert!(code.contains("var r ="));
}

#[test]
fn residual_helper_emits_a_typeof_guard() {
    let source = "
        var g = __abstract(\"function\", \"getN\");
        var n = __residual(\"number\", g);
        n;
    ";
    let code = evaluate(source);
    assert!(code.contains("getN()"));
    assert!(code.contains("typeof "));
    assert!(code.contains("!== \"number\""));
    assert!(code.contains("throw new Error("));
}

#[test]
fn known_keys_copy_at_build_time_alongside_the_residual_loop() {
    let source = "
        var o = __abstract_simple_partial(\"src\");
        var probe = o.known;
        probe;
        var t = {};
        for (var k in o) { t[k] = o[k]; }
    ";
    let code = evaluate(source);
    // The loop still exists for runtime-only keys.
    assert!(code.contains("for (var k in src)"));
    // The sentinel read of `known` survives as a declaration.
    assert!(code.contains("src.known"));
}

#[test]
fn global_creations_in_sloppy_mode_survive() {
    let code = evaluate("ghost = 7; ghost;");
    assert!(code.contains("ghost = 7;"));
}

#[test]
fn strict_mode_undeclared_assignment_residualizes_the_reference_error() {
    let code = evaluate("\"use strict\"; ghost = 1;");
    assert!(code.contains("ReferenceError"));
    assert!(code.contains("throw"));
}

#[test]
fn functions_residualize_with_their_bodies() {
    let source = "
        var helper = function(x) { return x + 1; };
        console.log(\"keep\");
        helper;
    ";
    let code = evaluate(source);
    assert!(code.contains("function"));
    assert!(code.contains("return x + 1;"));
}
