//! Intrinsics: the contract built-ins honor, plus the core registry.
//!
//! A built-in is an object whose callable payload is a [`NativeFn`]
//! variant; dispatch is a closed enum match, so the set of natives is
//! known statically and every payload stays serializable. The contract
//! each body honors:
//!
//! - concrete inputs produce concrete outputs where the Standard allows;
//! - otherwise the result is derived through the effect generator, never
//!   computed by guessing;
//! - state changes only through the heap and the mutation log, so
//!   speculation can roll them back.
//!
//! Only the singletons the partial evaluator itself needs are installed
//! here; the full library surface plugs in through the same contract.

use serde::{Deserialize, Serialize};

use crate::ast::SourceSpan;
use crate::completions::{Completion, ModelErrorKind};
use crate::diagnostics::{EngineResult, PP_ABSTRACT_COERCION, PP_UNSUPPORTED_FOR_IN};
use crate::mutation_log::MutationDelta;
use crate::objects::{Callable, ObjectHeap, ObjectRecord, PropertyDescriptor, PropertyKey};
use crate::realm::{DeriveOpts, Realm};
use crate::values::{
    AbstractKind, ObjectHandle, SourceTemplate, TypeDomain, Value, ValueDomain,
};

// ---------------------------------------------------------------------------
// NativeFn
// ---------------------------------------------------------------------------

/// Error-constructor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCtor {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    SyntaxError,
}

impl ErrorCtor {
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::ReferenceError => "ReferenceError",
            Self::RangeError => "RangeError",
            Self::SyntaxError => "SyntaxError",
        }
    }
}

/// The native call handlers known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeFn {
    ConsoleLog,
    ObjectConstructor,
    ObjectKeys,
    ErrorConstructor(ErrorCtor),
    /// `__abstract(typeString, nameTemplate)`: mint an abstract input.
    Abstract,
    /// `__abstract_simple_partial(name)`: a concrete stand-in object
    /// that is simple and partial.
    AbstractSimplePartial,
    /// `__makeSimple(object)`.
    MakeSimple,
    /// `__makePartial(object)`.
    MakePartial,
    /// `__residual(typeString, fn, …args)`: force a residual call.
    Residual,
}

// ---------------------------------------------------------------------------
// Intrinsics registry
// ---------------------------------------------------------------------------

/// Handles of the intrinsic singletons owned by a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub global: ObjectHandle,
    pub object_prototype: ObjectHandle,
    pub function_prototype: ObjectHandle,
    pub array_prototype: ObjectHandle,
    pub error_prototype: ObjectHandle,
    pub type_error_prototype: ObjectHandle,
    pub reference_error_prototype: ObjectHandle,
    pub range_error_prototype: ObjectHandle,
    pub syntax_error_prototype: ObjectHandle,
    pub object_constructor: ObjectHandle,
    pub console: ObjectHandle,
}

impl Intrinsics {
    /// Prototype for error objects of the given constructor name.
    pub fn error_prototype_for(&self, name: &str) -> ObjectHandle {
        match name {
            "TypeError" => self.type_error_prototype,
            "ReferenceError" => self.reference_error_prototype,
            "RangeError" => self.range_error_prototype,
            "SyntaxError" => self.syntax_error_prototype,
            _ => self.error_prototype,
        }
    }
}

fn alloc_native(
    heap: &mut ObjectHeap,
    function_prototype: ObjectHandle,
    function: NativeFn,
    path: &str,
) -> ObjectHandle {
    let mut record = ObjectRecord::with_prototype(Some(function_prototype));
    record.class_tag = Some("Function".to_string());
    record.callable = Some(Callable::Native(function));
    record.intrinsic_name = Some(path.to_string());
    heap.alloc(record)
}

fn define_method(heap: &mut ObjectHeap, on: ObjectHandle, name: &str, value: Value) {
    if let Ok(record) = heap.get_mut(on) {
        record.define_own_property(PropertyKey::string(name), PropertyDescriptor::method(value));
    }
}

fn alloc_prototype(heap: &mut ObjectHeap, proto: Option<ObjectHandle>, path: &str) -> ObjectHandle {
    let mut record = ObjectRecord::with_prototype(proto);
    record.intrinsic_name = Some(path.to_string());
    heap.alloc(record)
}

/// Build the intrinsic object graph on a fresh heap.
pub fn install(heap: &mut ObjectHeap) -> Intrinsics {
    let object_prototype = alloc_prototype(heap, None, "Object.prototype");
    let function_prototype = alloc_prototype(heap, Some(object_prototype), "Function.prototype");
    let array_prototype = alloc_prototype(heap, Some(object_prototype), "Array.prototype");
    let error_prototype = alloc_prototype(heap, Some(object_prototype), "Error.prototype");
    let type_error_prototype = alloc_prototype(heap, Some(error_prototype), "TypeError.prototype");
    let reference_error_prototype =
        alloc_prototype(heap, Some(error_prototype), "ReferenceError.prototype");
    let range_error_prototype =
        alloc_prototype(heap, Some(error_prototype), "RangeError.prototype");
    let syntax_error_prototype =
        alloc_prototype(heap, Some(error_prototype), "SyntaxError.prototype");

    let mut global_record = ObjectRecord::with_prototype(Some(object_prototype));
    global_record.intrinsic_name = Some("global".to_string());
    let global = heap.alloc(global_record);

    // Object constructor and its static methods.
    let object_constructor = alloc_native(
        heap,
        function_prototype,
        NativeFn::ObjectConstructor,
        "Object",
    );
    let object_keys = alloc_native(heap, function_prototype, NativeFn::ObjectKeys, "Object.keys");
    define_method(heap, object_constructor, "keys", Value::Object(object_keys));
    define_method(
        heap,
        object_constructor,
        "prototype",
        Value::Object(object_prototype),
    );
    define_method(
        heap,
        object_prototype,
        "constructor",
        Value::Object(object_constructor),
    );

    // Error constructor family.
    let error_ctors = [
        (ErrorCtor::Error, error_prototype),
        (ErrorCtor::TypeError, type_error_prototype),
        (ErrorCtor::ReferenceError, reference_error_prototype),
        (ErrorCtor::RangeError, range_error_prototype),
        (ErrorCtor::SyntaxError, syntax_error_prototype),
    ];
    for (ctor, prototype) in error_ctors {
        let ctor_object = alloc_native(
            heap,
            function_prototype,
            NativeFn::ErrorConstructor(ctor),
            ctor.name(),
        );
        define_method(heap, ctor_object, "prototype", Value::Object(prototype));
        define_method(heap, prototype, "constructor", Value::Object(ctor_object));
        define_method(heap, prototype, "name", Value::string(ctor.name()));
        define_method(heap, global, ctor.name(), Value::Object(ctor_object));
    }

    // console.log
    let console = alloc_prototype(heap, Some(object_prototype), "console");
    let console_log = alloc_native(heap, function_prototype, NativeFn::ConsoleLog, "console.log");
    define_method(heap, console, "log", Value::Object(console_log));

    // Partial-evaluation helpers.
    let helpers = [
        (NativeFn::Abstract, "__abstract"),
        (NativeFn::AbstractSimplePartial, "__abstract_simple_partial"),
        (NativeFn::MakeSimple, "__makeSimple"),
        (NativeFn::MakePartial, "__makePartial"),
        (NativeFn::Residual, "__residual"),
    ];
    for (function, name) in helpers {
        let handle = alloc_native(heap, function_prototype, function, name);
        define_method(heap, global, name, Value::Object(handle));
    }

    define_method(heap, global, "Object", Value::Object(object_constructor));
    define_method(heap, global, "console", Value::Object(console));
    define_method(heap, global, "globalThis", Value::Object(global));
    if let Ok(record) = heap.get_mut(global) {
        record.define_own_property(
            PropertyKey::string("undefined"),
            PropertyDescriptor::data_frozen(Value::Undefined),
        );
        record.define_own_property(
            PropertyKey::string("NaN"),
            PropertyDescriptor::data_frozen(Value::Number(f64::NAN)),
        );
        record.define_own_property(
            PropertyKey::string("Infinity"),
            PropertyDescriptor::data_frozen(Value::Number(f64::INFINITY)),
        );
    }

    Intrinsics {
        global,
        object_prototype,
        function_prototype,
        array_prototype,
        error_prototype,
        type_error_prototype,
        reference_error_prototype,
        range_error_prototype,
        syntax_error_prototype,
        object_constructor,
        console,
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Invoke a native handler. Model errors come back as `Throw`
/// completions; introspection failures raise the fatal sentinel.
pub fn apply_native(
    realm: &mut Realm,
    function: NativeFn,
    _this: &Value,
    args: &[Value],
    span: SourceSpan,
) -> EngineResult<Completion> {
    match function {
        NativeFn::ConsoleLog => {
            realm.active_generator().emit_console_log(args.to_vec());
            Ok(Completion::Normal(Value::Undefined))
        }
        NativeFn::ObjectConstructor => match args.first() {
            Some(Value::Object(handle)) => Ok(Completion::Normal(Value::Object(*handle))),
            _ => {
                let proto = realm.intrinsics.object_prototype;
                let handle = realm.heap.alloc(ObjectRecord::with_prototype(Some(proto)));
                Ok(Completion::Normal(Value::Object(handle)))
            }
        },
        NativeFn::ObjectKeys => object_keys(realm, args, span),
        NativeFn::ErrorConstructor(ctor) => {
            let message = args.first().cloned().unwrap_or(Value::Undefined);
            Ok(Completion::Normal(construct_error(realm, ctor, message)))
        }
        NativeFn::Abstract => abstract_helper(realm, args),
        NativeFn::AbstractSimplePartial => abstract_simple_partial(realm, args),
        NativeFn::MakeSimple => match args.first() {
            Some(value @ Value::Object(_)) => Ok(Completion::Normal(value.clone())),
            _ => Ok(realm.throw_error(
                ModelErrorKind::Type,
                "__makeSimple expects an object",
                span,
            )),
        },
        NativeFn::MakePartial => match args.first() {
            Some(Value::Object(handle)) => {
                let handle = *handle;
                let prior = realm.heap.get(handle)?.partial;
                if !prior {
                    realm.log.record(MutationDelta::PartialBit {
                        object: handle,
                        prior,
                    });
                    realm.heap.get_mut(handle)?.partial = true;
                }
                Ok(Completion::Normal(Value::Object(handle)))
            }
            _ => Ok(realm.throw_error(
                ModelErrorKind::Type,
                "__makePartial expects an object",
                span,
            )),
        },
        NativeFn::Residual => residual_helper(realm, args),
    }
}

fn object_keys(realm: &mut Realm, args: &[Value], span: SourceSpan) -> EngineResult<Completion> {
    match args.first() {
        Some(Value::Object(handle)) => {
            let record = realm.heap.get(*handle)?;
            if record.partial {
                return Err(realm.fatal(
                    PP_UNSUPPORTED_FOR_IN,
                    "cannot enumerate the keys of a partial object",
                ));
            }
            let keys: Vec<Value> = record
                .enumerable_string_keys()
                .into_iter()
                .map(Value::string)
                .collect();
            let array = realm.create_array(keys);
            Ok(Completion::Normal(Value::Object(array)))
        }
        Some(Value::Abstract(_)) => Err(realm.fatal(
            PP_UNSUPPORTED_FOR_IN,
            "cannot enumerate the keys of an abstract value",
        )),
        _ => Ok(realm.throw_error(
            ModelErrorKind::Type,
            "Object.keys called on non-object",
            span,
        )),
    }
}

/// Shared by `new Error(…)` and plain `Error(…)` calls.
pub fn construct_error(realm: &mut Realm, ctor: ErrorCtor, message: Value) -> Value {
    let prototype = realm.intrinsics.error_prototype_for(ctor.name());
    let mut record = ObjectRecord::with_prototype(Some(prototype));
    record.class_tag = Some(ctor.name().to_string());
    record
        .internal_slots
        .insert("ErrorData".to_string(), Value::string(ctor.name()));
    if !matches!(message, Value::Undefined) {
        let message_value = match &message {
            Value::Abstract(_) => message.clone(),
            other => other
                .to_string_primitive()
                .map(Value::string)
                .unwrap_or_else(|| message.clone()),
        };
        record.define_own_property(
            PropertyKey::string("message"),
            PropertyDescriptor::method(message_value),
        );
    }
    Value::Object(realm.heap.alloc(record))
}

fn abstract_helper(realm: &mut Realm, args: &[Value]) -> EngineResult<Completion> {
    let type_name = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        _ => String::new(),
    };
    let types = match TypeDomain::from_type_string(&type_name) {
        Some(types) => types,
        None => {
            return Err(realm.fatal(
                PP_ABSTRACT_COERCION,
                format!("unknown abstract type \"{type_name}\""),
            ))
        }
    };
    let name = match args.get(1) {
        Some(Value::Str(s)) => s.clone(),
        _ => {
            return Err(realm.fatal(
                PP_ABSTRACT_COERCION,
                "__abstract requires a name template for residualization",
            ))
        }
    };
    Ok(Completion::Normal(realm.create_abstract(
        types,
        ValueDomain::top(),
        vec![],
        SourceTemplate::literal(name),
        None,
    )))
}

fn abstract_simple_partial(realm: &mut Realm, args: &[Value]) -> EngineResult<Completion> {
    let name = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        _ => {
            return Err(realm.fatal(
                PP_ABSTRACT_COERCION,
                "__abstract_simple_partial requires a name",
            ))
        }
    };
    let proto = realm.intrinsics.object_prototype;
    let mut record = ObjectRecord::with_prototype(Some(proto));
    record.partial = true;
    record.intrinsic_name = Some(name);
    let handle = realm.heap.alloc(record);
    Ok(Completion::Normal(Value::Object(handle)))
}

fn residual_helper(realm: &mut Realm, args: &[Value]) -> EngineResult<Completion> {
    let type_name = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        _ => String::new(),
    };
    let types = TypeDomain::from_type_string(&type_name).unwrap_or(TypeDomain::Top);
    let callee_and_args: Vec<Value> = args.iter().skip(1).cloned().collect();
    if callee_and_args.is_empty() {
        return Err(realm.fatal(
            PP_ABSTRACT_COERCION,
            "__residual requires a function argument",
        ));
    }
    let template = SourceTemplate::call(callee_and_args.len() - 1);
    let value = realm.derive(
        types,
        ValueDomain::top(),
        callee_and_args,
        template,
        DeriveOpts {
            kind: Some(AbstractKind::ResidualCall),
            is_pure: false,
            skip_invariant: false,
        },
    );
    Ok(Completion::Normal(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::EngineConfig;

    fn realm() -> Realm {
        Realm::new(EngineConfig::default())
    }

    fn span() -> SourceSpan {
        SourceSpan::synthetic()
    }

    #[test]
    fn install_wires_global_bindings() {
        let realm = realm();
        let global = realm.global_object();
        for name in [
            "Object",
            "Error",
            "TypeError",
            "console",
            "__abstract",
            "__abstract_simple_partial",
        ] {
            assert!(
                realm
                    .heap
                    .get(global)
                    .unwrap()
                    .has_own_property(&PropertyKey::string(name)),
                "missing global {name}"
            );
        }
    }

    #[test]
    fn console_log_records_one_entry() {
        let mut r = realm();
        let completion = apply_native(
            &mut r,
            NativeFn::ConsoleLog,
            &Value::Undefined,
            &[Value::string("hi")],
            span(),
        )
        .unwrap();
        assert_eq!(completion, Completion::Normal(Value::Undefined));
        let root = r.take_root_generator().unwrap();
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn abstract_helper_requires_valid_type() {
        let mut r = realm();
        let err = apply_native(
            &mut r,
            NativeFn::Abstract,
            &Value::Undefined,
            &[Value::string("wibble"), Value::string("x")],
            span(),
        );
        assert!(err.is_err());

        let ok = apply_native(
            &mut r,
            NativeFn::Abstract,
            &Value::Undefined,
            &[Value::string("number"), Value::string("n")],
            span(),
        )
        .unwrap();
        let Completion::Normal(Value::Abstract(id)) = ok else {
            panic!("expected abstract value");
        };
        assert!(r
            .abstract_value(id)
            .types
            .includes(crate::values::TypeTag::Number));
    }

    #[test]
    fn simple_partial_objects_are_marked() {
        let mut r = realm();
        let completion = apply_native(
            &mut r,
            NativeFn::AbstractSimplePartial,
            &Value::Undefined,
            &[Value::string("src")],
            span(),
        )
        .unwrap();
        let Completion::Normal(Value::Object(handle)) = completion else {
            panic!("expected object");
        };
        let record = r.heap.get(handle).unwrap();
        assert!(record.partial);
        assert!(record.simple);
        assert_eq!(record.intrinsic_name.as_deref(), Some("src"));
    }

    #[test]
    fn object_keys_rejects_partial_objects() {
        let mut r = realm();
        let Completion::Normal(partial) = apply_native(
            &mut r,
            NativeFn::AbstractSimplePartial,
            &Value::Undefined,
            &[Value::string("src")],
            span(),
        )
        .unwrap() else {
            panic!("expected normal completion");
        };
        let err = apply_native(&mut r, NativeFn::ObjectKeys, &Value::Undefined, &[partial], span());
        assert!(err.is_err());
    }

    #[test]
    fn error_constructor_builds_tagged_objects() {
        let mut r = realm();
        let value = construct_error(&mut r, ErrorCtor::RangeError, Value::string("too big"));
        let Value::Object(handle) = value else {
            panic!("expected object");
        };
        let record = r.heap.get(handle).unwrap();
        assert_eq!(record.class_tag.as_deref(), Some("RangeError"));
        assert_eq!(record.prototype, Some(r.intrinsics.range_error_prototype));
    }
}
