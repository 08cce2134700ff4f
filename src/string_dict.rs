//! Interning for identifiers and property names.
//!
//! Binding names and property keys are compared on every load, store and
//! field access. Interning them once per context means repeated lookups
//! clone an `Rc` instead of allocating a new string.

use rustc_hash::FxHashMap;

use crate::value::{CheapClone, JsString, PropertyKey};

/// Per-context string interner.
#[derive(Debug)]
pub struct StringDict {
    strings: FxHashMap<Box<str>, JsString>,
}

impl StringDict {
    pub fn new() -> Self {
        Self {
            strings: FxHashMap::default(),
        }
    }

    /// Dictionary seeded with the names the runtime itself uses.
    pub fn with_common_strings() -> Self {
        let mut dict = Self::new();
        for s in COMMON_STRINGS {
            dict.get_or_insert(s);
        }
        dict
    }

    /// Return the shared instance of `s`, inserting it on first use.
    pub fn get_or_insert(&mut self, s: &str) -> JsString {
        if let Some(existing) = self.strings.get(s) {
            return existing.cheap_clone();
        }
        let interned = JsString::from(s);
        self.strings.insert(s.into(), interned.cheap_clone());
        interned
    }

    pub fn get(&self, s: &str) -> Option<JsString> {
        self.strings.get(s).map(CheapClone::cheap_clone)
    }

    /// Intern a string that was created elsewhere.
    pub fn insert(&mut self, s: JsString) -> JsString {
        if let Some(existing) = self.strings.get(s.as_str()) {
            return existing.cheap_clone();
        }
        self.strings.insert(s.as_str().into(), s.cheap_clone());
        s
    }

    /// Property key for `s`, interning non-index names
    pub fn key(&mut self, s: &str) -> PropertyKey {
        match PropertyKey::parse_index(s) {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::String(self.get_or_insert(s)),
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for StringDict {
    fn default() -> Self {
        Self::new()
    }
}

/// Names the runtime looks up on every call, property access or await.
const COMMON_STRINGS: &[&str] = &[
    // Object properties
    "length",
    "prototype",
    "constructor",
    "name",
    "message",
    "stack",
    "cause",
    // Conversion
    "toString",
    "valueOf",
    "toJSON",
    // Iteration protocol
    "next",
    "done",
    "value",
    "return",
    "throw",
    // Promises and await
    "then",
    "catch",
    "finally",
    // Disposal
    "error",
    "suppressed",
    // Modules
    "default",
    // Collections
    "size",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_dict_deduplication() {
        let mut dict = StringDict::new();
        let s1 = dict.get_or_insert("hello");
        let s2 = dict.get_or_insert("hello");

        assert_eq!(s1, s2);
        // one shared allocation
        assert!(std::ptr::eq(s1.as_str(), s2.as_str()));
    }

    #[test]
    fn test_string_dict_different_strings() {
        let mut dict = StringDict::new();
        let s1 = dict.get_or_insert("hello");
        let s2 = dict.get_or_insert("world");

        assert_ne!(s1, s2);
        assert!(!std::ptr::eq(s1.as_str(), s2.as_str()));
    }

    #[test]
    fn test_common_strings_preloaded() {
        let dict = StringDict::with_common_strings();
        assert!(dict.get("length").is_some());
        assert!(dict.get("then").is_some());
        assert!(dict.get("suppressed").is_some());
        assert!(dict.get("Symbol.dispose").is_none());
    }

    #[test]
    fn test_key_keeps_indices_numeric() {
        let mut dict = StringDict::new();
        assert_eq!(dict.key("3"), PropertyKey::Index(3));
        assert_eq!(dict.key("x"), PropertyKey::String(JsString::from("x")));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_string_dict_len() {
        let mut dict = StringDict::new();
        assert_eq!(dict.len(), 0);
        assert!(dict.is_empty());

        dict.get_or_insert("hello");
        assert_eq!(dict.len(), 1);
        assert!(!dict.is_empty());

        // Same string doesn't increase count
        dict.get_or_insert("hello");
        assert_eq!(dict.len(), 1);

        dict.get_or_insert("world");
        assert_eq!(dict.len(), 2);
    }
}
