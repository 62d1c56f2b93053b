//! Value model: the joined lattice of concrete and abstract values.
//!
//! `Value` is a closed sum over the eight runtime type tags. Objects and
//! abstract values are arena-allocated and referenced by stable handles so
//! cyclic graphs stay representable and every artifact remains
//! serde-serializable.
//!
//! Abstract values are immutable after construction; their argument lists
//! form an acyclic dependency DAG because an abstract value can only refer
//! to values that existed before it was minted.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Identity-unique symbol. Well-known symbols occupy the low ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// Opaque handle referencing an object record on the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Opaque handle referencing an abstract value in the abstract arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbstractId(pub u32);

impl fmt::Display for AbstractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "abstract#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A runtime value of the interpreted language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
    Abstract(AbstractId),
}

impl Value {
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Fully known at build time?
    pub fn is_concrete(&self) -> bool {
        !matches!(self, Self::Abstract(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// The type tag for concrete values; `None` for abstract values, whose
    /// tag lives in their types domain.
    pub fn concrete_tag(&self) -> Option<TypeTag> {
        match self {
            Self::Undefined => Some(TypeTag::Undefined),
            Self::Null => Some(TypeTag::Null),
            Self::Bool(_) => Some(TypeTag::Boolean),
            Self::Number(_) => Some(TypeTag::Number),
            Self::Str(_) => Some(TypeTag::String),
            Self::Symbol(_) => Some(TypeTag::Symbol),
            Self::Object(_) => Some(TypeTag::Object),
            Self::Abstract(_) => None,
        }
    }

    /// SameValue: like `==` on bits: NaN equals NaN, zero signs distinct.
    /// Identity for objects, symbols and abstract values.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_positive() == b.is_sign_positive()
                }
            }
            _ => self == other,
        }
    }

    /// Strict equality on concrete values. `None` when either side is
    /// abstract (the answer is not known at build time).
    pub fn strict_equals(&self, other: &Self) -> Option<bool> {
        match (self, other) {
            (Self::Abstract(_), _) | (_, Self::Abstract(_)) => None,
            (Self::Number(a), Self::Number(b)) => Some(a == b),
            _ => Some(self == other),
        }
    }

    /// ToBoolean for concrete values; `None` when abstract.
    pub fn to_boolean(&self) -> Option<bool> {
        match self {
            Self::Undefined | Self::Null => Some(false),
            Self::Bool(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0 && !n.is_nan()),
            Self::Str(s) => Some(!s.is_empty()),
            Self::Symbol(_) | Self::Object(_) => Some(true),
            Self::Abstract(_) => None,
        }
    }

    /// ToNumber for primitives; `None` for objects (needs ToPrimitive) and
    /// abstract values.
    pub fn to_number_primitive(&self) -> Option<f64> {
        match self {
            Self::Undefined => Some(f64::NAN),
            Self::Null => Some(0.0),
            Self::Bool(true) => Some(1.0),
            Self::Bool(false) => Some(0.0),
            Self::Number(n) => Some(*n),
            Self::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    Some(trimmed.parse::<f64>().unwrap_or(f64::NAN))
                }
            }
            Self::Symbol(_) | Self::Object(_) | Self::Abstract(_) => None,
        }
    }

    /// ToString for primitives; `None` for objects and abstract values.
    pub fn to_string_primitive(&self) -> Option<String> {
        match self {
            Self::Undefined => Some("undefined".to_string()),
            Self::Null => Some("null".to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) => Some(format_number(*n)),
            Self::Str(s) => Some(s.clone()),
            Self::Symbol(_) | Self::Object(_) | Self::Abstract(_) => None,
        }
    }
}

/// Number-to-string per the Standard's observable cases: integers print
/// without a fraction, NaN and the infinities print by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ---------------------------------------------------------------------------
// TypeTag and TypeDomain
// ---------------------------------------------------------------------------

/// The runtime type tags. `Function` is tracked separately from `Object`
/// so call sites can reason about abstract callees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    Object,
    Function,
}

impl TypeTag {
    /// The `typeof` result for this tag.
    pub fn type_of(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Symbol => "symbol",
            Self::Object => "object",
            Self::Function => "function",
        }
    }
}

/// Set of possible type tags for an abstract value. `Top` is all eight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDomain {
    Top,
    Set(BTreeSet<TypeTag>),
}

impl TypeDomain {
    pub fn top() -> Self {
        Self::Top
    }

    pub fn of(tag: TypeTag) -> Self {
        let mut set = BTreeSet::new();
        set.insert(tag);
        Self::Set(set)
    }

    pub fn of_tags(tags: &[TypeTag]) -> Self {
        Self::Set(tags.iter().copied().collect())
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }

    pub fn includes(&self, tag: TypeTag) -> bool {
        match self {
            Self::Top => true,
            Self::Set(set) => set.contains(&tag),
        }
    }

    /// Exactly one tag?
    pub fn singleton(&self) -> Option<TypeTag> {
        match self {
            Self::Top => None,
            Self::Set(set) => {
                if set.len() == 1 {
                    set.iter().next().copied()
                } else {
                    None
                }
            }
        }
    }

    pub fn might_be_object(&self) -> bool {
        self.includes(TypeTag::Object) || self.includes(TypeTag::Function)
    }

    pub fn might_be_callable(&self) -> bool {
        self.includes(TypeTag::Function)
    }

    /// Lattice join: set union, `Top` absorbing.
    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Set(a), Self::Set(b)) => Self::Set(a.union(b).copied().collect()),
        }
    }

    /// Maps the type strings accepted by the `__abstract` helper.
    pub fn from_type_string(name: &str) -> Option<Self> {
        let tag = match name {
            "undefined" => TypeTag::Undefined,
            "null" => TypeTag::Null,
            "boolean" => TypeTag::Boolean,
            "number" => TypeTag::Number,
            "string" => TypeTag::String,
            "symbol" => TypeTag::Symbol,
            "object" => TypeTag::Object,
            "function" => TypeTag::Function,
            "" => return Some(Self::Top),
            _ => return None,
        };
        Some(Self::of(tag))
    }
}

// ---------------------------------------------------------------------------
// ValueDomain
// ---------------------------------------------------------------------------

/// Widening bound: beyond this many candidates the domain collapses to ⊤.
const MAX_VALUE_CANDIDATES: usize = 8;

/// Finite set of candidate concrete values, or ⊤.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueDomain {
    Top,
    Candidates(Vec<Value>),
}

impl ValueDomain {
    pub fn top() -> Self {
        Self::Top
    }

    pub fn of(value: Value) -> Self {
        Self::Candidates(vec![value])
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }

    pub fn candidates(&self) -> Option<&[Value]> {
        match self {
            Self::Top => None,
            Self::Candidates(values) => Some(values),
        }
    }

    /// Join with SameValue-deduplication and widening.
    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Candidates(a), Self::Candidates(b)) => {
                let mut merged: Vec<Value> = a.clone();
                for candidate in b {
                    if !merged.iter().any(|v| v.same_value(candidate)) {
                        merged.push(candidate.clone());
                    }
                }
                if merged.len() > MAX_VALUE_CANDIDATES {
                    Self::Top
                } else {
                    Self::Candidates(merged)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Origin templates
// ---------------------------------------------------------------------------

/// One piece of an origin template: literal source text or a hole filled
/// by the expression of the n-th argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplatePart {
    Text(String),
    Arg(usize),
}

/// A source-fragment template with holes for argument values. Opaque to
/// the interpreter; only the residualizer expands it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceTemplate {
    pub parts: Vec<TemplatePart>,
}

impl SourceTemplate {
    /// Template that is pure literal text (e.g. a free variable name).
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TemplatePart::Text(text.into())],
        }
    }

    pub fn from_parts(parts: Vec<TemplatePart>) -> Self {
        Self { parts }
    }

    /// `A0.property`
    pub fn member(property: &str) -> Self {
        Self {
            parts: vec![
                TemplatePart::Arg(0),
                TemplatePart::Text(format!(".{property}")),
            ],
        }
    }

    /// `A0[A1]`
    pub fn computed_member() -> Self {
        Self {
            parts: vec![
                TemplatePart::Arg(0),
                TemplatePart::Text("[".to_string()),
                TemplatePart::Arg(1),
                TemplatePart::Text("]".to_string()),
            ],
        }
    }

    /// `A0(A1, …, An)`
    pub fn call(arg_count: usize) -> Self {
        let mut parts = vec![TemplatePart::Arg(0), TemplatePart::Text("(".to_string())];
        for i in 0..arg_count {
            if i > 0 {
                parts.push(TemplatePart::Text(", ".to_string()));
            }
            parts.push(TemplatePart::Arg(i + 1));
        }
        parts.push(TemplatePart::Text(")".to_string()));
        Self { parts }
    }

    /// `A0 <op> A1`
    pub fn binary(op: &str) -> Self {
        Self {
            parts: vec![
                TemplatePart::Arg(0),
                TemplatePart::Text(format!(" {op} ")),
                TemplatePart::Arg(1),
            ],
        }
    }

    /// `<op> A0` (space-separated for word operators).
    pub fn unary(op: &str) -> Self {
        let text = if op.chars().all(|c| c.is_ascii_alphabetic()) {
            format!("{op} ")
        } else {
            op.to_string()
        };
        Self {
            parts: vec![TemplatePart::Text(text), TemplatePart::Arg(0)],
        }
    }

    /// Highest hole index referenced, if any.
    pub fn max_hole(&self) -> Option<usize> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                TemplatePart::Arg(i) => Some(*i),
                TemplatePart::Text(_) => None,
            })
            .max()
    }
}

// ---------------------------------------------------------------------------
// Abstract values
// ---------------------------------------------------------------------------

/// Kind tag used by the abstract interpreter to recognize and simplify
/// known shapes of abstract value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractKind {
    /// Template for a property-name condition (`name in obj` shape).
    PropertyNameCondition,
    /// Sentinel member expression (`obj.key` over a partial object).
    SentinelMember,
    /// Check for a known property.
    KnownPropertyCheck,
    /// Result of a residualized call.
    ResidualCall,
    /// Loop key introduced by a residual `for-in`.
    LoopKey,
    /// Conditional join of two branch values.
    Join,
}

/// An unknown runtime value: type and value lattice information plus the
/// origin expression template that can re-materialize it in source form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractValue {
    pub types: TypeDomain,
    pub values: ValueDomain,
    /// Ordered argument values filling the template holes. Also the data
    /// dependencies of this value.
    pub args: Vec<Value>,
    pub template: SourceTemplate,
    pub kind: Option<AbstractKind>,
    /// Concrete object candidates when this is an abstract object with a
    /// finite value set.
    pub object_candidates: Vec<ObjectHandle>,
}

impl AbstractValue {
    pub fn might_be_object(&self) -> bool {
        self.types.might_be_object()
    }

    pub fn might_be_callable(&self) -> bool {
        self.types.might_be_callable()
    }
}

/// Arena owning every abstract value of a realm. Entries are immutable
/// once allocated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbstractArena {
    items: Vec<AbstractValue>,
}

impl AbstractArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: AbstractValue) -> AbstractId {
        let id = AbstractId(self.items.len() as u32);
        self.items.push(value);
        id
    }

    pub fn get(&self, id: AbstractId) -> &AbstractValue {
        &self.items[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every abstract value allocated at or after `mark` (rollback of
    /// a discarded speculation).
    pub fn truncate(&mut self, mark: usize) {
        self.items.truncate(mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // 1. Value predicates and equality
    // -----------------------------------------------------------------------

    #[test]
    fn same_value_handles_nan_and_zero_signs() {
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
        assert!(!Value::Number(0.0).same_value(&Value::Number(-0.0)));
        assert!(Value::Number(1.5).same_value(&Value::Number(1.5)));
    }

    #[test]
    fn strict_equals_is_unknown_for_abstract() {
        let abstract_value = Value::Abstract(AbstractId(0));
        assert_eq!(abstract_value.strict_equals(&Value::Number(1.0)), None);
        assert_eq!(
            Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)),
            Some(false)
        );
        assert_eq!(
            Value::string("a").strict_equals(&Value::string("a")),
            Some(true)
        );
    }

    #[test]
    fn to_boolean_truth_table() {
        assert_eq!(Value::Undefined.to_boolean(), Some(false));
        assert_eq!(Value::Null.to_boolean(), Some(false));
        assert_eq!(Value::Number(0.0).to_boolean(), Some(false));
        assert_eq!(Value::Number(f64::NAN).to_boolean(), Some(false));
        assert_eq!(Value::string("").to_boolean(), Some(false));
        assert_eq!(Value::string("x").to_boolean(), Some(true));
        assert_eq!(Value::Object(ObjectHandle(0)).to_boolean(), Some(true));
        assert_eq!(Value::Abstract(AbstractId(0)).to_boolean(), None);
    }

    #[test]
    fn to_number_of_strings() {
        assert_eq!(Value::string(" 42 ").to_number_primitive(), Some(42.0));
        assert_eq!(Value::string("").to_number_primitive(), Some(0.0));
        assert!(Value::string("x").to_number_primitive().unwrap().is_nan());
        assert_eq!(Value::Object(ObjectHandle(0)).to_number_primitive(), None);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    // -----------------------------------------------------------------------
    // 2. Type domain lattice
    // -----------------------------------------------------------------------

    #[test]
    fn type_domain_join_and_membership() {
        let strings = TypeDomain::of(TypeTag::String);
        let numbers = TypeDomain::of(TypeTag::Number);
        let joined = strings.join(&numbers);
        assert!(joined.includes(TypeTag::String));
        assert!(joined.includes(TypeTag::Number));
        assert!(!joined.includes(TypeTag::Object));
        assert!(joined.join(&TypeDomain::top()).is_top());
        assert_eq!(strings.singleton(), Some(TypeTag::String));
        assert_eq!(joined.singleton(), None);
    }

    #[test]
    fn type_domain_from_strings() {
        assert_eq!(
            TypeDomain::from_type_string("object"),
            Some(TypeDomain::of(TypeTag::Object))
        );
        assert_eq!(TypeDomain::from_type_string(""), Some(TypeDomain::Top));
        assert_eq!(TypeDomain::from_type_string("wat"), None);
    }

    #[test]
    fn function_counts_as_object_like() {
        let f = TypeDomain::of(TypeTag::Function);
        assert!(f.might_be_object());
        assert!(f.might_be_callable());
        assert!(!TypeDomain::of(TypeTag::Object).might_be_callable());
    }

    // -----------------------------------------------------------------------
    // 3. Value domain lattice
    // -----------------------------------------------------------------------

    #[test]
    fn value_domain_join_dedups_by_same_value() {
        let a = ValueDomain::of(Value::Number(1.0));
        let b = ValueDomain::of(Value::Number(1.0));
        let joined = a.join(&b);
        assert_eq!(joined.candidates().unwrap().len(), 1);
    }

    #[test]
    fn value_domain_widens_to_top() {
        let mut domain = ValueDomain::Candidates(vec![]);
        for i in 0..9 {
            domain = domain.join(&ValueDomain::of(Value::Number(f64::from(i))));
        }
        assert!(domain.is_top());
    }

    // -----------------------------------------------------------------------
    // 4. Templates
    // -----------------------------------------------------------------------

    #[test]
    fn template_builders_reference_expected_holes() {
        assert_eq!(SourceTemplate::literal("obj").max_hole(), None);
        assert_eq!(SourceTemplate::member("x").max_hole(), Some(0));
        assert_eq!(SourceTemplate::computed_member().max_hole(), Some(1));
        assert_eq!(SourceTemplate::call(2).max_hole(), Some(2));
        assert_eq!(SourceTemplate::binary("+").max_hole(), Some(1));
    }

    // -----------------------------------------------------------------------
    // 5. Abstract arena
    // -----------------------------------------------------------------------

    fn plain_abstract() -> AbstractValue {
        AbstractValue {
            types: TypeDomain::top(),
            values: ValueDomain::top(),
            args: vec![],
            template: SourceTemplate::literal("x"),
            kind: None,
            object_candidates: vec![],
        }
    }

    #[test]
    fn arena_alloc_and_truncate() {
        let mut arena = AbstractArena::new();
        let first = arena.alloc(plain_abstract());
        let mark = arena.len();
        let second = arena.alloc(plain_abstract());
        assert_eq!(first, AbstractId(0));
        assert_eq!(second, AbstractId(1));
        arena.truncate(mark);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn abstract_value_serde_roundtrip() {
        let value = AbstractValue {
            types: TypeDomain::of(TypeTag::String),
            values: ValueDomain::of(Value::string("k")),
            args: vec![Value::Object(ObjectHandle(2))],
            template: SourceTemplate::member("name"),
            kind: Some(AbstractKind::SentinelMember),
            object_candidates: vec![],
        };
        let json = serde_json::to_string(&value).unwrap();
        let back: AbstractValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}
