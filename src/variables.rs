//! Replaces uses of literal-valued variables with their value.
//!
//! Replacement is textual and scope-unaware: every use of a name gets the
//! single value detected for it in the current pass. Assignment targets are
//! never rewritten.

use std::collections::BTreeMap;

use regex::Regex;

use crate::literal;

/// True if the text right after a variable makes it the target of an
/// assignment or increment (`=`, `.=`, `**=`, `<<=`, `++`, ...), but not a
/// comparison (`==`, `<=`) or array arrow (`=>`).
fn is_assignment_target(rest: &str) -> bool {
    let rest = rest.trim_start();
    if rest.starts_with("++") || rest.starts_with("--") {
        return true;
    }
    let rest = ["**", "<<", ">>", "??"]
        .iter()
        .find_map(|op| rest.strip_prefix(op))
        .or_else(|| rest.strip_prefix(['.', '+', '-', '*', '/', '%', '^', '|', '&']))
        .unwrap_or(rest);
    rest.starts_with('=') && !rest.starts_with("==") && !rest.starts_with("=>")
}

/// Rewrites every `$name` use for each binding to the quoted value.
pub fn substitute(source: &str, bindings: &BTreeMap<String, String>) -> String {
    let mut output = source.to_owned();
    for (name, value) in bindings {
        let regex = match Regex::new(&format!(r"\${}\b", regex::escape(name))) {
            Ok(regex) => regex,
            Err(err) => {
                log::trace!("Skipping variable rule for {name}: {err}");
                continue;
            }
        };
        let replacement = literal::quote(value);

        let mut rewritten = String::with_capacity(output.len());
        let mut last = 0;
        for m in regex.find_iter(&output) {
            if is_assignment_target(&output[m.end()..]) {
                continue;
            }
            rewritten.push_str(&output[last..m.start()]);
            rewritten.push_str(&replacement);
            last = m.end();
        }
        rewritten.push_str(&output[last..]);
        output = rewritten;
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::detect_variables;

    fn check(input: &str, expected: &str) {
        let output = substitute(input, &detect_variables(input));
        assert_eq!(output, expected, "Substituting in {input}");
    }

    #[test]
    fn test_substitute() {
        check("$name = 'secret'; echo $name;", "$name = 'secret'; echo 'secret';");
        check(r#"$k = "v1"; f($k, $key);"#, r#"$k = "v1"; f('v1', $key);"#);
        check(r"$p = 'C:\dir'; echo $p;", r"$p = 'C:\dir'; echo 'C:\\dir';");
        check("$x = 'hello';", "$x = 'hello';");
        check("echo $v; $v = 'late';", "echo 'late'; $v = 'late';");
    }

    #[test]
    fn test_assignment_targets_kept() {
        check(
            "$s = 'a'; $s .= 'b'; $s++; if ($s == 'a') {} $m = [$s => 1];",
            "$s = 'a'; $s .= 'b'; $s++; if ('a' == 'a') {} $m = ['a' => 1];",
        );
        check(
            "$a = '2'; $a **= 3; $a <<= 1; $a >>= 1; $b = $a << 2;",
            "$a = '2'; $a **= 3; $a <<= 1; $a >>= 1; $b = '2' << 2;",
        );
    }

    #[test]
    fn test_is_assignment_target() {
        assert!(is_assignment_target(" = 1"));
        assert!(is_assignment_target("=1"));
        assert!(is_assignment_target(" .= 'x'"));
        assert!(is_assignment_target("??= 'x'"));
        assert!(is_assignment_target("--;"));
        assert!(!is_assignment_target(" == 1"));
        assert!(!is_assignment_target(" => 1"));
        assert!(!is_assignment_target(";"));
        assert!(!is_assignment_target(" - 1"));
        assert!(is_assignment_target(" **= 2"));
        assert!(is_assignment_target(" <<= 1"));
        assert!(is_assignment_target(">>= 1"));
        assert!(!is_assignment_target(" << 1"));
        assert!(!is_assignment_target(" <= 1"));
        assert!(!is_assignment_target(" ** 2"));
    }
}
