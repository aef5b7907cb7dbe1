//! Discovery of indirect references and literal assignments in a buffer.
//!
//! Detection is rebuilt from scratch on every pass, so only what the current
//! buffer contains is in force.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

/// `$GLOBALS['name'][N]`, `$name[N]` and `${'name'}[N]`.
static ARRAY_REGEXES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\$GLOBALS\['([^']+)'\]\[(\d+)\]").unwrap(),
        Regex::new(r"\$([a-zA-Z_][a-zA-Z0-9_]*)\[(\d+)\]").unwrap(),
        Regex::new(r#"\$\{['"]([^'"]+)['"]\}\[(\d+)\]"#).unwrap(),
    ]
});

/// An identifier (any script) directly followed by `(` integer `)`.
static FUNCTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([^\W\d]\w*)\(\d+\)").unwrap());

static VARIABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*['"]([^'"]+)['"]"#).unwrap()
});

/// Everything one detection sweep found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detections {
    /// Array name to every index referenced anywhere in the buffer.
    pub arrays: BTreeMap<String, BTreeSet<usize>>,
    /// Distinct function names in order of first appearance. Arguments are
    /// re-read per occurrence during resolution.
    pub functions: Vec<String>,
    /// Variable name to the last literal assigned to it.
    pub variables: BTreeMap<String, String>,
}

impl Detections {
    pub fn scan(source: &str) -> Self {
        Self {
            arrays: detect_arrays(source),
            functions: detect_functions(source),
            variables: detect_variables(source),
        }
    }
}

/// True if a call whose name starts right after `prefix` is a variable,
/// method or static call (`$f(..)`, `->f(..)`, `::f(..)`).
pub(crate) fn is_dynamic_call(prefix: &str) -> bool {
    prefix.ends_with('$') || prefix.ends_with("->") || prefix.ends_with("::")
}

/// Array name to referenced indices. A name whose index does not fit a
/// `usize` is still recorded, with no index.
pub fn detect_arrays(source: &str) -> BTreeMap<String, BTreeSet<usize>> {
    let mut arrays: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    for regex in ARRAY_REGEXES.iter() {
        for caps in regex.captures_iter(source) {
            let indices = arrays.entry(caps[1].to_owned()).or_default();
            if let Ok(index) = caps[2].parse::<usize>() {
                indices.insert(index);
            }
        }
    }
    arrays
}

pub fn detect_functions(source: &str) -> Vec<String> {
    let mut functions: Vec<String> = Vec::new();
    for caps in FUNCTION_REGEX.captures_iter(source) {
        let start = caps.get(0).map_or(0, |m| m.start());
        if is_dynamic_call(&source[..start]) {
            continue;
        }
        let name = &caps[1];
        if !functions.iter().any(|seen| seen == name) {
            functions.push(name.to_owned());
        }
    }
    functions
}

pub fn detect_variables(source: &str) -> BTreeMap<String, String> {
    VARIABLE_REGEX
        .captures_iter(source)
        .map(|caps| (caps[1].to_owned(), caps[2].to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_arrays() {
        let source = r#"$GLOBALS['_a'][1] . $_a[1] . $b[0] . ${'c'}[3] . ${"c"}[2] . $d['k']"#;
        let arrays = detect_arrays(source);

        assert_eq!(arrays.len(), 3);
        assert_eq!(arrays["_a"], BTreeSet::from([1]));
        assert_eq!(arrays["b"], BTreeSet::from([0]));
        assert_eq!(arrays["c"], BTreeSet::from([2, 3]));
        assert!(!arrays.contains_key("d"));
        assert!(!arrays.contains_key("GLOBALS"));
    }

    #[test]
    fn test_detect_arrays_oversized_index() {
        let source = "$a[99999999999999999999999] . $b[1] . $b[99999999999999999999999]";
        let arrays = detect_arrays(source);
        assert_eq!(arrays.len(), 2);
        assert!(arrays["a"].is_empty());
        assert_eq!(arrays["b"], BTreeSet::from([1]));
    }

    #[test]
    fn test_detect_functions() {
        let source = "_f(1) . Функция(2) . _f(3) . g('x') . $h(4) . 5(6)";
        assert_eq!(detect_functions(source), vec!["_f", "Функция"]);
        let source = "$o->m(1) . C::s(2) . $h(3) . h(4)";
        assert_eq!(detect_functions(source), vec!["h"]);
        assert!(detect_functions("f(1.5) . f( 2 )").is_empty());
    }

    #[test]
    fn test_is_dynamic_call() {
        assert!(is_dynamic_call("echo $"));
        assert!(is_dynamic_call("$o->"));
        assert!(is_dynamic_call("Cls::"));
        assert!(!is_dynamic_call("echo "));
        assert!(!is_dynamic_call(""));
        assert!(!is_dynamic_call("a - "));
    }

    #[test]
    fn test_detect_variables() {
        let source = r#"$a = 'one'; $b="two"; $a = 'three'; $c = $a; $d == 'x';"#;
        let variables = detect_variables(source);

        assert_eq!(variables.len(), 2);
        assert_eq!(variables["a"], "three");
        assert_eq!(variables["b"], "two");
    }

    #[test]
    fn test_scan() {
        let detections = Detections::scan("$k = 'v'; echo $GLOBALS['t'][0], f(2);");
        assert_eq!(detections.arrays.len(), 1);
        assert_eq!(detections.functions, vec!["f"]);
        assert_eq!(detections.variables["k"], "v");
        assert_eq!(Detections::scan(""), Detections::default());
    }
}
