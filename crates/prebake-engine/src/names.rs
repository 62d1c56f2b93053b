//! Identifier allocation for the residual program.
//!
//! [`NameGenerator`] issues monotone base-62 identifiers, filtered against
//! a forbidden set (names already used by surviving user bindings) and
//! tagged with an optional per-build unique suffix so two builds can be
//! told apart, or made byte-identical by fixing the suffix.
//!
//! [`PreludeGenerator`] memoizes references to well-known paths
//! (`global`, `global.Object.prototype`, …): the first use mints a name
//! and records a top-level `var` declaration, later uses reuse it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::environment::NameSet;

const BASE62: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn base62(mut n: u64) -> String {
    let mut out = Vec::new();
    loop {
        out.push(BASE62[(n % 62) as usize]);
        n /= 62;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    // The leading `_` in generated names keeps digit-initial encodings
    // valid identifiers.
    String::from_utf8(out).unwrap_or_default()
}

/// Monotone residual-identifier allocator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameGenerator {
    counter: u64,
    /// Appended to every generated name; fix it for reproducible builds.
    pub unique_suffix: String,
    forbidden: NameSet,
    /// Append a sanitized provenance hint to generated names.
    pub debug_suffixes: bool,
}

impl NameGenerator {
    pub fn new(unique_suffix: impl Into<String>, debug_suffixes: bool) -> Self {
        Self {
            counter: 0,
            unique_suffix: unique_suffix.into(),
            forbidden: NameSet::new(),
            debug_suffixes,
        }
    }

    /// Reserve `name` so it is never generated.
    pub fn forbid(&mut self, name: &str) {
        self.forbidden.insert(name.to_string());
    }

    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden.contains(name)
    }

    /// Mint the next free identifier. `provenance` feeds the optional
    /// debug suffix only; it never affects uniqueness.
    pub fn generate(&mut self, provenance: &str) -> String {
        loop {
            let mut name = format!("_{}", base62(self.counter));
            self.counter += 1;
            if self.debug_suffixes {
                let hint = sanitize_hint(provenance);
                if !hint.is_empty() {
                    name.push('$');
                    name.push_str(&hint);
                }
            }
            name.push_str(&self.unique_suffix);
            if !self.forbidden.contains(&name) {
                self.forbidden.insert(name.clone());
                return name;
            }
        }
    }
}

fn sanitize_hint(provenance: &str) -> String {
    provenance
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(16)
        .collect()
}

// ---------------------------------------------------------------------------
// PreludeGenerator
// ---------------------------------------------------------------------------

/// One memoized intrinsic reference: `var <name> = <path>;`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreludeDeclaration {
    pub name: String,
    pub path: String,
}

/// Cache of references to built-in object paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreludeGenerator {
    cache: BTreeMap<String, String>,
    declarations: Vec<PreludeDeclaration>,
}

impl PreludeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for `path`, minting a prelude declaration on first use.
    pub fn memoize(&mut self, names: &mut NameGenerator, path: &str) -> String {
        if let Some(existing) = self.cache.get(path) {
            return existing.clone();
        }
        let hint = path.rsplit('.').next().unwrap_or(path);
        let name = names.generate(hint);
        self.cache.insert(path.to_string(), name.clone());
        self.declarations.push(PreludeDeclaration {
            name: name.clone(),
            path: path.to_string(),
        });
        name
    }

    /// Declarations in first-use order.
    pub fn declarations(&self) -> &[PreludeDeclaration] {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base62_progression() {
        let mut names = NameGenerator::new("", false);
        assert_eq!(names.generate(""), "_a");
        assert_eq!(names.generate(""), "_b");
        for _ in 2..61 {
            names.generate("");
        }
        assert_eq!(names.generate(""), "_9");
        assert_eq!(names.generate(""), "_ba");
    }

    #[test]
    fn forbidden_names_are_skipped() {
        let mut names = NameGenerator::new("", false);
        names.forbid("_a");
        assert_eq!(names.generate(""), "_b");
    }

    #[test]
    fn unique_suffix_and_debug_hint() {
        let mut names = NameGenerator::new("$9", true);
        let name = names.generate("console.log");
        assert_eq!(name, "_a$consolelog$9");
    }

    #[test]
    fn generated_names_never_repeat() {
        let mut names = NameGenerator::new("", false);
        let a = names.generate("x");
        let b = names.generate("x");
        assert_ne!(a, b);
    }

    #[test]
    fn prelude_memoizes_paths() {
        let mut names = NameGenerator::new("", false);
        let mut prelude = PreludeGenerator::new();
        let first = prelude.memoize(&mut names, "global.Object.prototype");
        let second = prelude.memoize(&mut names, "global.Object.prototype");
        assert_eq!(first, second);
        assert_eq!(prelude.declarations().len(), 1);
        assert_eq!(prelude.declarations()[0].path, "global.Object.prototype");

        let other = prelude.memoize(&mut names, "global");
        assert_ne!(first, other);
        assert_eq!(prelude.declarations().len(), 2);
    }
}
