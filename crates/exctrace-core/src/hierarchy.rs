//! Class hierarchy: an "is immediate base of" relation over qualified class
//! names, with a memoized transitive-closure `is_subclass_of` query.
//!
//! Subclass reachability only needs a plain BFS over the base-class edges,
//! not a full C3 linearization, so that's what this is: a `(child,
//! ancestor) -> bool` memo table invalidated whenever a new class is
//! registered.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

/// Built-in exception roots always present (spec §4.2).
pub const BUILTIN_ROOTS: &[&str] = &["Exception", "BaseException"];

#[derive(Debug, Clone)]
pub struct ExceptionHierarchy {
    /// qualified class name -> immediate base qualified names, as written.
    bases: HashMap<String, Vec<String>>,
    /// reverse edges: qualified base name -> direct subclasses.
    subclasses: HashMap<String, Vec<String>>,
    memo: RefCell<HashMap<(String, String), bool>>,
}

impl Default for ExceptionHierarchy {
    fn default() -> Self {
        ExceptionHierarchy::new()
    }
}

impl ExceptionHierarchy {
    pub fn new() -> Self {
        let mut h = ExceptionHierarchy {
            bases: HashMap::new(),
            subclasses: HashMap::new(),
            memo: RefCell::new(HashMap::new()),
        };
        for root in BUILTIN_ROOTS {
            h.bases.entry((*root).to_string()).or_default();
        }
        h
    }

    /// Register a class and its base names as written. An unresolved base
    /// name (e.g. imported from an unanalyzed module) is kept as-is: it
    /// becomes its own root, never fabricated as a subclass of anything.
    /// Clears the memoization table (spec §4.2: "adding a class invalidates
    /// the closure cache").
    pub fn add_class(&mut self, qualified_name: impl Into<String>, base_names: Vec<String>) {
        let qualified_name = qualified_name.into();
        for base in &base_names {
            self.subclasses
                .entry(base.clone())
                .or_default()
                .push(qualified_name.clone());
            self.bases.entry(base.clone()).or_default();
        }
        self.bases.insert(qualified_name, base_names);
        self.memo.borrow_mut().clear();
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.bases.contains_key(qualified_name)
    }

    /// BFS over the "is base of" relation (i.e. walking from `child` through
    /// its bases) looking for `ancestor`. `is_subclass_of(X, X)` is true for
    /// every known class (spec §4.2), including classes known only because
    /// they appear as an unresolved base elsewhere.
    pub fn is_subclass_of(&self, child: &str, ancestor: &str) -> bool {
        if child == ancestor {
            return true;
        }
        let memo_key = (child.to_string(), ancestor.to_string());
        if let Some(hit) = self.memo.borrow().get(&memo_key) {
            return *hit;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(child);
        visited.insert(child);
        let mut found = false;

        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                found = true;
                break;
            }
            if let Some(bases) = self.bases.get(current) {
                for base in bases {
                    if visited.insert(base.as_str()) {
                        queue.push_back(base.as_str());
                    }
                }
            }
        }

        self.memo.borrow_mut().insert(memo_key, found);
        found
    }

    /// All classes known to be exceptions: transitively subclassing
    /// `Exception` (or `BaseException`) in the accumulated hierarchy.
    pub fn get_all_exception_types(&self) -> Vec<String> {
        self.bases
            .keys()
            .filter(|name| {
                BUILTIN_ROOTS.contains(&name.as_str())
                    || BUILTIN_ROOTS
                        .iter()
                        .any(|root| self.is_subclass_of(name, root))
            })
            .cloned()
            .collect()
    }

    /// Every class (transitively) subclassing `ancestor`, not including
    /// `ancestor` itself.
    pub fn get_subclasses(&self, ancestor: &str) -> Vec<String> {
        self.bases
            .keys()
            .filter(|name| name.as_str() != ancestor && self.is_subclass_of(name, ancestor))
            .cloned()
            .collect()
    }

    /// Expand a single caught class name to itself plus every known
    /// subclass, for catch-compatibility checks (spec §4.7 "Catch-compatibility").
    pub fn expand_with_subclasses(&self, class_name: &str) -> HashSet<String> {
        let mut set: HashSet<String> = HashSet::new();
        set.insert(class_name.to_string());
        set.extend(self.get_subclasses(class_name));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflexive_for_every_registered_class() {
        let mut h = ExceptionHierarchy::new();
        h.add_class("ValueError", vec!["Exception".to_string()]);
        assert!(h.is_subclass_of("ValueError", "ValueError"));
        assert!(h.is_subclass_of("Exception", "Exception"));
    }

    #[test]
    fn transitive_subclass_through_chain() {
        let mut h = ExceptionHierarchy::new();
        h.add_class("ValueError", vec!["Exception".to_string()]);
        h.add_class("MyErr", vec!["ValueError".to_string()]);
        assert!(h.is_subclass_of("MyErr", "Exception"));
        assert!(h.is_subclass_of("MyErr", "ValueError"));
        assert!(!h.is_subclass_of("ValueError", "MyErr"));
    }

    #[test]
    fn unresolved_base_is_its_own_root_not_fabricated() {
        let mut h = ExceptionHierarchy::new();
        h.add_class("Weird", vec!["some.external.Base".to_string()]);
        assert!(!h.is_subclass_of("Weird", "Exception"));
        assert!(h.is_subclass_of("Weird", "Weird"));
    }

    #[test]
    fn adding_class_invalidates_memo() {
        let mut h = ExceptionHierarchy::new();
        h.add_class("A", vec![]);
        assert!(!h.is_subclass_of("A", "B"));
        h.add_class("B", vec![]);
        h.add_class("A", vec!["B".to_string()]);
        assert!(h.is_subclass_of("A", "B"));
    }

    #[test]
    fn get_subclasses_returns_transitive_set() {
        let mut h = ExceptionHierarchy::new();
        h.add_class("ValueError", vec!["Exception".to_string()]);
        h.add_class("MyErr", vec!["ValueError".to_string()]);
        let subs = h.get_subclasses("Exception");
        assert!(subs.contains(&"ValueError".to_string()));
        assert!(subs.contains(&"MyErr".to_string()));
    }

    #[test]
    fn expand_with_subclasses_includes_self() {
        let mut h = ExceptionHierarchy::new();
        h.add_class("MyErr", vec!["ValueError".to_string()]);
        let expanded = h.expand_with_subclasses("MyErr");
        assert!(expanded.contains("MyErr"));
        assert_eq!(expanded.len(), 1);
    }

    #[test]
    fn no_cycles_created_by_construction() {
        // Invariant 3 (spec §8): antisymmetry. add_class never creates a
        // cycle because bases only point "outward"; this documents the
        // guarantee rather than constructing an adversarial cycle (which
        // would require the caller to misuse the API against its contract).
        let mut h = ExceptionHierarchy::new();
        h.add_class("A", vec!["B".to_string()]);
        h.add_class("B", vec!["C".to_string()]);
        assert!(!h.is_subclass_of("C", "A"));
    }
}
