#![forbid(unsafe_code)]
//! Whole-program partial evaluator core.
//!
//! The engine interprets a program's startup ahead of time against a
//! symbolic model of the runtime, folds all side-effect-free work into
//! the final heap, and re-materializes the rest: residual effects as a
//! linearized statement sequence, the final heap as a graph of literal
//! declarations.
//!
//! Three subsystems make up the core:
//!
//! - the **abstract interpreter** ([`evaluator`], [`expressions`],
//!   [`speculation`]): the Standard's semantic operations over a joined
//!   lattice of concrete and abstract values;
//! - the **effect generator** ([`effects`]): the tree-shaped log of
//!   externally observable operations with dependency tracking and
//!   purity marking;
//! - the **residualizer** ([`residualizer`], [`names`], [`codegen`]):
//!   reachability, scheduling, name allocation and source emission.

pub mod ast;
pub mod codegen;
pub mod completions;
pub mod diagnostics;
pub mod effects;
pub mod environment;
pub mod evaluator;
pub mod expressions;
pub mod intrinsics;
pub mod mutation_log;
pub mod names;
pub mod objects;
pub mod parser;
pub mod realm;
pub mod residualizer;
pub mod speculation;
pub mod values;

use serde::{Deserialize, Serialize};

use crate::ast::ParseGoal;
use crate::diagnostics::{Diagnostic, EngineError, EngineResult, PP_PARSE_FAILED};
use crate::parser::{classify_parse_failure, CanonicalParser, ScriptParser};
use crate::realm::{EngineConfig, EngineEvent, Realm};
use crate::residualizer::ResidualOutput;

pub use crate::completions::Completion;
pub use crate::realm::DeriveOpts;
pub use crate::values::Value;

/// Result of one partial-evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialEvalRun {
    pub output: ResidualOutput,
    /// Sequence-numbered interpretation milestones.
    pub events: Vec<EngineEvent>,
}

/// Parse, interpret and residualize a single script.
pub fn partially_evaluate(
    source: &str,
    source_label: &str,
    config: EngineConfig,
) -> EngineResult<PartialEvalRun> {
    let program = CanonicalParser
        .parse(source, source_label, ParseGoal::Script, 1)
        .map_err(|error| {
            let kind = classify_parse_failure(&error.message);
            EngineError::Fatal(Diagnostic::fatal(
                PP_PARSE_FAILED,
                format!("{kind:?}: {error}"),
                error.span,
            ))
        })?;
    let mut realm = Realm::new(config);
    let completion = evaluator::evaluate_program(&mut realm, &program)?;
    let output = residualizer::residualize(&mut realm, completion)?;
    Ok(PartialEvalRun {
        output,
        events: realm.events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constant_arithmetic_into_the_declaration() {
        let run = partially_evaluate("var x = 1 + 2; x;", "<test>", EngineConfig::default())
            .unwrap();
        assert!(run.output.code.contains("var x = 3;"));
        assert!(run.output.code.contains("3;"));
        assert!(!run.output.code.contains("1 + 2"));
    }

    #[test]
    fn parse_failures_surface_as_fatal_diagnostics() {
        let error =
            partially_evaluate("var = ;", "<test>", EngineConfig::default()).unwrap_err();
        assert_eq!(error.code(), Some(PP_PARSE_FAILED));
    }

    #[test]
    fn runs_are_deterministic() {
        let source = "var a = {}; a.x = 1; a.x = 2; console.log(\"hi\");";
        let first = partially_evaluate(source, "<test>", EngineConfig::default()).unwrap();
        let second = partially_evaluate(source, "<test>", EngineConfig::default()).unwrap();
        assert_eq!(first.output.code, second.output.code);
        assert_eq!(first.output.hash, second.output.hash);
    }
}
