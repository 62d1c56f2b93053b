//! The realm: process-wide container of all interpreter state.
//!
//! Every operation takes the realm as an explicit parameter; there are no
//! ambient singletons. The realm owns the heap, the environment and
//! abstract-value arenas, the modification log, the generator stack (root
//! at the bottom, speculation frames above it), the name and prelude
//! generators, the diagnostics handler and the deadline.
//!
//! The engine is single-threaded and strictly sequential: one execution
//! context stack per realm, mutated by `enter`/`leave` pairs. The deadline
//! is polled at statement boundaries; exceedance reports a fatal
//! diagnostic with its own code.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ast::SourceSpan;
use crate::completions::{Completion, ModelError, ModelErrorKind};
use crate::diagnostics::{
    CollectingHandler, Diagnostic, DiagnosticHandler, EngineError, EngineResult, Severity,
    PP_DEADLINE_EXCEEDED,
};
use crate::effects::EffectGenerator;
use crate::environment::{EnvHandle, EnvironmentArena};
use crate::intrinsics::{self, Intrinsics};
use crate::mutation_log::{LogMark, MutationLog};
use crate::names::{NameGenerator, PreludeGenerator};
use crate::objects::{ObjectHeap, ObjectRecord, PropertyDescriptor, PropertyKey};
use crate::values::{
    AbstractArena, AbstractId, AbstractKind, AbstractValue, ObjectHandle, SourceTemplate,
    TemplatePart, TypeDomain, TypeTag, Value, ValueDomain,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine configuration. Serde-serializable so drivers can persist the
/// exact settings that produced an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for interpretation; `None` disables the check.
    pub deadline_ms: Option<u64>,
    /// Suffix appended to every generated identifier. Fixing it makes
    /// builds byte-identical.
    pub unique_suffix: String,
    /// Append provenance hints to generated identifiers.
    pub debug_names: bool,
    pub max_call_depth: u32,
    /// Bound on concrete loop iterations before interpretation gives up.
    pub max_loop_iterations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: None,
            unique_suffix: String::new(),
            debug_names: false,
            max_call_depth: 256,
            max_loop_iterations: 100_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

/// Interpretation milestones, sequence-numbered for deterministic replay
/// assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    SpeculationOpened,
    SpeculationCommitted,
    SpeculationRolledBack,
    DiagnosticReported,
    ResidualizationStarted,
    ResidualizationFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub sequence: u64,
    pub kind: EngineEventKind,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Execution contexts
// ---------------------------------------------------------------------------

/// One frame of the execution-context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub env: EnvHandle,
    pub function: Option<ObjectHandle>,
    pub strict: bool,
}

// ---------------------------------------------------------------------------
// Derive options
// ---------------------------------------------------------------------------

/// Options for [`Realm::derive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeriveOpts {
    pub kind: Option<AbstractKind>,
    pub is_pure: bool,
    /// Skip the runtime `typeof` guard normally emitted with the
    /// declaration.
    pub skip_invariant: bool,
}

// ---------------------------------------------------------------------------
// Realm
// ---------------------------------------------------------------------------

pub struct Realm {
    pub config: EngineConfig,
    pub heap: ObjectHeap,
    pub envs: EnvironmentArena,
    pub abstracts: AbstractArena,
    pub log: MutationLog,
    pub intrinsics: Intrinsics,
    pub global_env: EnvHandle,
    pub names: NameGenerator,
    pub prelude: PreludeGenerator,
    pub handler: Box<dyn DiagnosticHandler>,
    pub events: Vec<EngineEvent>,
    pub current_span: SourceSpan,
    /// Log mark taken right after intrinsic installation: everything
    /// after it is user effect.
    pub initial_mark: LogMark,
    generator_stack: Vec<EffectGenerator>,
    context_stack: Vec<ExecutionContext>,
    next_sequence: u64,
    deadline: Option<Instant>,
}

impl Realm {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_handler(config, Box::new(CollectingHandler::default()))
    }

    pub fn with_handler(config: EngineConfig, handler: Box<dyn DiagnosticHandler>) -> Self {
        let mut heap = ObjectHeap::new();
        let intrinsics = intrinsics::install(&mut heap);
        let mut envs = EnvironmentArena::new();
        let global_env = envs.alloc_global(intrinsics.global, intrinsics.global);
        let log = MutationLog::new();
        let abstracts = AbstractArena::new();
        let initial_mark = log.mark(&heap, &envs, &abstracts);
        let names = NameGenerator::new(config.unique_suffix.clone(), config.debug_names);
        Self {
            config,
            heap,
            envs,
            abstracts,
            log,
            intrinsics,
            global_env,
            names,
            prelude: PreludeGenerator::new(),
            handler,
            events: Vec::new(),
            current_span: SourceSpan::synthetic(),
            initial_mark,
            generator_stack: vec![EffectGenerator::root()],
            context_stack: Vec::new(),
            next_sequence: 0,
            deadline: None,
        }
    }

    pub fn global_object(&self) -> ObjectHandle {
        self.intrinsics.global
    }

    // -- Events -------------------------------------------------------------

    pub fn record_event(&mut self, kind: EngineEventKind, detail: impl Into<String>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.events.push(EngineEvent {
            sequence,
            kind,
            detail: detail.into(),
        });
    }

    // -- Diagnostics --------------------------------------------------------

    /// Report a diagnostic through the handler and the event stream.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.record_event(
            EngineEventKind::DiagnosticReported,
            format!("{} {}", diagnostic.code, diagnostic.severity),
        );
        self.handler.report(&diagnostic);
    }

    /// Report a fatal diagnostic and hand back the sentinel to raise.
    pub fn fatal(&mut self, code: &str, message: impl Into<String>) -> EngineError {
        let diagnostic = Diagnostic::fatal(code, message, Some(self.current_span));
        self.report(diagnostic.clone());
        EngineError::Fatal(diagnostic)
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>) {
        let diagnostic = Diagnostic::new(
            code,
            Severity::Warning,
            message,
            Some(self.current_span),
        );
        self.report(diagnostic);
    }

    // -- Deadline -----------------------------------------------------------

    /// Arm the deadline from the configured budget.
    pub fn start_deadline(&mut self) {
        self.deadline = self
            .config
            .deadline_ms
            .map(|ms| Instant::now() + std::time::Duration::from_millis(ms));
    }

    /// Polled at every statement boundary; cancellation is cooperative
    /// through the same check.
    pub fn check_deadline(&mut self) -> EngineResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(self.fatal(
                    PP_DEADLINE_EXCEEDED,
                    "interpretation exceeded the configured deadline",
                ));
            }
        }
        Ok(())
    }

    // -- Execution contexts -------------------------------------------------

    pub fn enter_context(&mut self, context: ExecutionContext) {
        self.context_stack.push(context);
    }

    pub fn leave_context(&mut self) -> EngineResult<ExecutionContext> {
        self.context_stack.pop().ok_or_else(|| {
            EngineError::Invariant("leave_context without matching enter".to_string())
        })
    }

    pub fn context_depth(&self) -> usize {
        self.context_stack.len()
    }

    // -- Generator stack ----------------------------------------------------

    /// The generator new entries are appended to.
    pub fn active_generator(&mut self) -> &mut EffectGenerator {
        self.generator_stack
            .last_mut()
            .expect("generator stack is never empty")
    }

    pub fn push_generator(&mut self, label: &str) {
        self.generator_stack.push(EffectGenerator::new(label));
    }

    pub fn pop_generator(&mut self) -> EngineResult<EffectGenerator> {
        if self.generator_stack.len() <= 1 {
            return Err(EngineError::Invariant(
                "pop_generator would remove the root generator".to_string(),
            ));
        }
        Ok(self.generator_stack.pop().expect("checked length above"))
    }

    pub fn generator_depth(&self) -> usize {
        self.generator_stack.len()
    }

    /// Take the finished root generator (residualization consumes it).
    pub fn take_root_generator(&mut self) -> EngineResult<EffectGenerator> {
        if self.generator_stack.len() != 1 {
            return Err(EngineError::Invariant(format!(
                "{} speculation frames still open",
                self.generator_stack.len() - 1
            )));
        }
        Ok(std::mem::replace(
            &mut self.generator_stack[0],
            EffectGenerator::root(),
        ))
    }

    // -- Modification log ---------------------------------------------------

    /// Append a binding's prior state to the modification log so a
    /// speculative frame can restore it.
    pub fn record_modified_binding(
        &mut self,
        env: EnvHandle,
        name: &str,
        prior: Option<crate::environment::Binding>,
    ) {
        self.log.record_binding(env, name, prior);
    }

    /// Append a property's prior descriptor to the modification log.
    pub fn record_modified_property(
        &mut self,
        object: ObjectHandle,
        key: PropertyKey,
        prior: Option<PropertyDescriptor>,
    ) {
        self.log.record_property(object, key, prior);
    }

    // -- Abstract values ----------------------------------------------------

    /// Mint a fresh abstract value. Argument values are snapshot; the
    /// origin template is opaque to the interpreter.
    pub fn create_abstract(
        &mut self,
        types: TypeDomain,
        values: ValueDomain,
        args: Vec<Value>,
        template: SourceTemplate,
        kind: Option<AbstractKind>,
    ) -> Value {
        let id = self.abstracts.alloc(AbstractValue {
            types,
            values,
            args,
            template,
            kind,
            object_candidates: Vec::new(),
        });
        Value::Abstract(id)
    }

    /// Append a variable-declaration entry to the active generator and
    /// return a fresh abstract value bound to it. Unless skipped, a
    /// runtime `typeof` guard is emitted so a mis-modeled intrinsic fails
    /// loudly in the produced program instead of misbehaving silently.
    pub fn derive(
        &mut self,
        types: TypeDomain,
        values: ValueDomain,
        args: Vec<Value>,
        template: SourceTemplate,
        opts: DeriveOpts,
    ) -> Value {
        let invariant_tag = if opts.skip_invariant {
            None
        } else {
            types.singleton().filter(|tag| {
                !matches!(tag, TypeTag::Object | TypeTag::Function | TypeTag::Null)
            })
        };
        let id = self.abstracts.alloc(AbstractValue {
            types,
            values,
            args: args.clone(),
            template: template.clone(),
            kind: opts.kind,
            object_candidates: Vec::new(),
        });
        self.active_generator()
            .push_derived(args, template, id, opts.is_pure);
        if let Some(tag) = invariant_tag {
            let condition = SourceTemplate::from_parts(vec![
                TemplatePart::Text("typeof ".to_string()),
                TemplatePart::Arg(0),
                TemplatePart::Text(format!(" !== \"{}\"", tag.type_of())),
            ]);
            let message = format!("expected a {} value", tag.type_of());
            self.active_generator().entries.push(crate::effects::EffectEntry {
                args: vec![Value::Abstract(id)],
                template: crate::effects::EffectTemplate::Invariant { condition, message },
                declared: None,
                children: Vec::new(),
                pure: true,
            });
        }
        Value::Abstract(id)
    }

    pub fn abstract_value(&self, id: AbstractId) -> &AbstractValue {
        self.abstracts.get(id)
    }

    // -- Model errors -------------------------------------------------------

    /// Materialize a model error as a thrown error object.
    pub fn throw_model_error(&mut self, error: ModelError, span: SourceSpan) -> Completion {
        self.throw_error(error.kind, &error.message, span)
    }

    /// Construct an error object of the given kind and wrap it in a
    /// `Throw` completion carrying the original location.
    pub fn throw_error(
        &mut self,
        kind: ModelErrorKind,
        message: &str,
        span: SourceSpan,
    ) -> Completion {
        let value = self.create_error_object(kind, message);
        Completion::Throw { value, span }
    }

    pub fn create_error_object(&mut self, kind: ModelErrorKind, message: &str) -> Value {
        let prototype = self.intrinsics.error_prototype_for(kind.constructor_name());
        let mut record = ObjectRecord::with_prototype(Some(prototype));
        record.class_tag = Some(kind.constructor_name().to_string());
        record.internal_slots.insert(
            "ErrorData".to_string(),
            Value::string(kind.constructor_name()),
        );
        record.define_own_property(
            PropertyKey::string("message"),
            PropertyDescriptor::method(Value::string(message)),
        );
        Value::Object(self.heap.alloc(record))
    }

    // -- Array helper -------------------------------------------------------

    /// Allocate an array object holding `elements`.
    pub fn create_array(&mut self, elements: Vec<Value>) -> ObjectHandle {
        let mut record = ObjectRecord::with_prototype(Some(self.intrinsics.array_prototype));
        record.class_tag = Some("Array".to_string());
        let length = elements.len();
        for (index, element) in elements.into_iter().enumerate() {
            record.define_own_property(
                PropertyKey::string(index.to_string()),
                PropertyDescriptor::data(element),
            );
        }
        record.define_own_property(
            PropertyKey::string("length"),
            PropertyDescriptor::Data {
                value: Value::Number(length as f64),
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );
        self.heap.alloc(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_boots_with_root_generator_and_global() {
        let realm = Realm::new(EngineConfig::default());
        assert_eq!(realm.generator_depth(), 1);
        assert!(realm.heap.len() > 0);
        assert_eq!(realm.context_depth(), 0);
    }

    #[test]
    fn context_enter_leave_must_pair() {
        let mut realm = Realm::new(EngineConfig::default());
        realm.enter_context(ExecutionContext {
            env: realm.global_env,
            function: None,
            strict: false,
        });
        assert!(realm.leave_context().is_ok());
        assert!(realm.leave_context().is_err());
    }

    #[test]
    fn pop_generator_protects_the_root() {
        let mut realm = Realm::new(EngineConfig::default());
        assert!(realm.pop_generator().is_err());
        realm.push_generator("speculative");
        assert!(realm.pop_generator().is_ok());
    }

    #[test]
    fn derive_emits_declaration_and_typeof_guard() {
        let mut realm = Realm::new(EngineConfig::default());
        let value = realm.derive(
            TypeDomain::of(TypeTag::Number),
            ValueDomain::top(),
            vec![],
            SourceTemplate::literal("outside"),
            DeriveOpts::default(),
        );
        assert!(matches!(value, Value::Abstract(_)));
        let root = realm.take_root_generator().unwrap();
        assert_eq!(root.len(), 2);
        assert!(root.entries[0].declared.is_some());
        assert!(root.entries[1].pure);
    }

    #[test]
    fn derive_skip_invariant_emits_single_entry() {
        let mut realm = Realm::new(EngineConfig::default());
        realm.derive(
            TypeDomain::of(TypeTag::Number),
            ValueDomain::top(),
            vec![],
            SourceTemplate::literal("outside"),
            DeriveOpts {
                skip_invariant: true,
                ..DeriveOpts::default()
            },
        );
        let root = realm.take_root_generator().unwrap();
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn thrown_error_objects_carry_kind_and_message() {
        let mut realm = Realm::new(EngineConfig::default());
        let completion =
            realm.throw_error(ModelErrorKind::Type, "bad value", SourceSpan::synthetic());
        let Completion::Throw { value, .. } = completion else {
            panic!("expected throw completion");
        };
        let Value::Object(handle) = value else {
            panic!("expected error object");
        };
        let record = realm.heap.get(handle).unwrap();
        assert_eq!(record.class_tag.as_deref(), Some("TypeError"));
        let message = record
            .get_own_property(&PropertyKey::string("message"))
            .and_then(|d| d.value().cloned());
        assert_eq!(message, Some(Value::string("bad value")));
    }

    #[test]
    fn deadline_disabled_by_default() {
        let mut realm = Realm::new(EngineConfig::default());
        realm.start_deadline();
        assert!(realm.check_deadline().is_ok());
    }

    #[test]
    fn events_are_sequence_numbered() {
        let mut realm = Realm::new(EngineConfig::default());
        realm.record_event(EngineEventKind::SpeculationOpened, "if-branch");
        realm.record_event(EngineEventKind::SpeculationRolledBack, "if-branch");
        assert_eq!(realm.events[0].sequence, 0);
        assert_eq!(realm.events[1].sequence, 1);
    }
}
