//! Rewrites indirect array and function references using the environment.
//!
//! A reference the environment cannot answer is left as it is.

use std::collections::{BTreeMap, BTreeSet};

use regex::{Captures, Regex};

use crate::detect::is_dynamic_call;
use crate::environment::{CallableRegistry, GlobalTable};
use crate::stats::Trace;

/// Indexed-access rules for one array name, in the three surface syntaxes.
fn array_regexes(name: &str) -> Vec<Regex> {
    let escaped = regex::escape(name);
    [
        format!(r"\$GLOBALS\['{escaped}'\]\[(\d+)\]"),
        format!(r"\${escaped}\[(\d+)\]"),
        format!(r#"\$\{{['"]{escaped}['"]\}}\[(\d+)\]"#),
    ]
    .iter()
    .filter_map(|pattern| {
        Regex::new(pattern)
            .map_err(|err| log::trace!("Skipping array rule for {name}: {err}"))
            .ok()
    })
    .collect()
}

/// Replaces every indexed reference of each detected array with the value
/// stored in `globals`.
pub fn resolve_arrays(
    source: &str,
    arrays: &BTreeMap<String, BTreeSet<usize>>,
    globals: &GlobalTable,
    trace: &mut Trace,
) -> String {
    let mut output = source.to_owned();
    for name in arrays.keys() {
        trace.push(format!("Processing array: {name}"));
        if !globals.contains(name) {
            continue;
        }
        for regex in array_regexes(name) {
            output = regex
                .replace_all(&output, |caps: &Captures| {
                    caps[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| globals.get(name, index))
                        .map(|value| value.to_literal())
                        .unwrap_or_else(|| caps[0].to_owned())
                })
                .into_owned();
        }
    }
    output
}

/// Replaces every `name(N)` of each detected function with the result of the
/// registered callable. Variable, method and static calls are left alone.
pub fn resolve_functions(
    source: &str,
    functions: &[String],
    callables: &CallableRegistry,
    trace: &mut Trace,
) -> String {
    let mut output = source.to_owned();
    for name in functions {
        trace.push(format!("Processing function: {name}"));
        let Some(callable) = callables.get(name) else {
            continue;
        };
        let regex = match Regex::new(&format!(r"\b{}\((\d+)\)", regex::escape(name))) {
            Ok(regex) => regex,
            Err(err) => {
                log::trace!("Skipping function rule for {name}: {err}");
                continue;
            }
        };
        let rewritten = regex
            .replace_all(&output, |caps: &Captures| {
                let start = caps.get(0).map_or(0, |m| m.start());
                if is_dynamic_call(&output[..start]) {
                    return caps[0].to_owned();
                }
                match caps[1].parse::<i64>() {
                    Ok(argument) => callable(argument).to_literal(),
                    Err(_) => caps[0].to_owned(),
                }
            })
            .into_owned();
        output = rewritten;
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{detect_arrays, detect_functions};
    use crate::environment::Value;

    fn globals() -> GlobalTable {
        let mut globals = GlobalTable::new();
        globals.insert("_s", ["it's", "b"]);
        globals.insert("_n", [Value::Int(10), Value::Float(0.5)]);
        globals
    }

    fn letters(index: i64) -> Value {
        match index {
            0 => Value::from("zero"),
            _ => Value::Int(index * 100),
        }
    }

    #[test]
    fn test_resolve_arrays() {
        fn check(input: &str, expected: &str) {
            let mut trace = Trace::new();
            let output = resolve_arrays(input, &detect_arrays(input), &globals(), &mut trace);
            assert_eq!(output, expected, "Resolving {input}");
        }

        check("echo $GLOBALS['_s'][0];", r"echo 'it\'s';");
        check("$_s[1] . ${'_s'}[1] . ${\"_n\"}[0]", "'b' . 'b' . 10");
        check("$x = $_n[1] * 2;", "$x = 0.5 * 2;");
        // Missing name or index stays put.
        check("$GLOBALS['_m'][0] . $_s[7]", "$GLOBALS['_m'][0] . $_s[7]");
    }

    #[test]
    fn test_resolve_arrays_trace() {
        let input = "$_a[0] . $_b[1]";
        let mut trace = Trace::new();
        resolve_arrays(input, &detect_arrays(input), &GlobalTable::new(), &mut trace);
        assert_eq!(
            trace.lines(),
            ["Processing array: _a", "Processing array: _b"]
        );
    }

    #[test]
    fn test_resolve_functions() {
        fn check(input: &str, expected: &str) {
            let mut registry = CallableRegistry::new();
            registry.register("_f", letters).unwrap();
            let mut trace = Trace::new();
            let output = resolve_functions(input, &detect_functions(input), &registry, &mut trace);
            assert_eq!(output, expected, "Resolving {input}");
        }

        check("echo _f(0);", "echo 'zero';");
        check("_f(1) + _f(2)", "100 + 200");
        check("x_f(1) . _g(1)", "x_f(1) . _g(1)");
        check("_f(99999999999999999999)", "_f(99999999999999999999)");
        check("$_f(1) . _f(1)", "$_f(1) . 100");
        check("$o->_f(2) . K::_f(3) . _f(0)", "$o->_f(2) . K::_f(3) . 'zero'");
    }
}
