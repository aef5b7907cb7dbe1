//! A utility for reversing simple PHP source obfuscation.
//!
//! The decoder **replaces** indirection tricks with the literal values they
//! stand for: encoded string literals, indirect array and function lookups and
//! inline arithmetic.
//!
//! ## Typical obfuscated input
//! ```php
//! $GLOBALS['_x'] = array(...);
//! $a = base64_decode('aGVsbG8=') . chr(33) . str_rot13('jbeyq');
//! echo $GLOBALS['_x'][(1+2)] . _f(17);
//! ```
//!
//! Decoding runs up to five detect-and-rewrite passes and stops early once a
//! pass leaves the buffer unchanged. Array and function lookups are answered
//! from an explicit [`Environment`]; nothing is read from process state and
//! no host function outside a registered allow-list is ever called.
//!
//! # Examples
//!
//! ```rust
//! use deobfuscator_rs::Environment;
//!
//! let source = "$x = base64_decode('aGVsbG8=') . chr(33);";
//! let decoded = deobfuscator_rs::decode(source, &Environment::default());
//! assert_eq!(decoded, "$x = 'hello' . '!';");
//! ```

use crate::catalog::PatternKind;

pub mod catalog;
mod config;
mod decoder;
mod detect;
mod environment;
mod error;
mod evaluator;
pub mod literal;
mod normalize;
mod resolve;
mod stats;
mod variables;

pub use crate::config::{DEFAULT_MAX_PASSES, DecoderConfig};
pub use crate::decoder::Decoder;
pub use crate::detect::Detections;
pub use crate::environment::{Callable, CallableRegistry, Environment, GlobalTable, Value};
pub use crate::error::{Error, Result};
pub use crate::evaluator::{ALLOWED_FUNCTIONS, EvalError, evaluate};
pub use crate::normalize::normalize;
pub use crate::stats::{Statistics, Trace};

/// Detects whether the input contains any catalogued obfuscation pattern.
///
/// # Examples
///
/// ```rust
/// assert!(deobfuscator_rs::detect("echo chr(72);"));
/// assert!(deobfuscator_rs::detect(r#"echo "\x48";"#));
/// assert!(!deobfuscator_rs::detect("echo 'plain';"));
/// assert!(!deobfuscator_rs::detect(""));
/// ```
#[inline]
pub fn detect(source: &str) -> bool {
    PatternKind::ALL
        .iter()
        .any(|kind| kind.pattern().regex.is_match(source))
}

/// Decodes `source` with the default configuration.
///
/// This is the main entry point. Use [`Decoder`] directly to change the pass
/// budget or to read the statistics, detected references and trace after the
/// run.
pub fn decode(source: &str, environment: &Environment) -> String {
    Decoder::new(source, environment).decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        fn positive(input: &str) {
            assert!(detect(input), "Should detect obfuscation in: {}", input);
        }

        fn negative(input: &str) {
            assert!(!detect(input), "Should NOT detect obfuscation in: {}", input);
        }

        negative("");
        negative("$a = 'b';");
        negative("mychr(5)");

        positive("base64_decode('aGk=')");
        positive("chr (65)");
        positive("str_rot13(\"nop\")");
        positive("eval($code)");
        positive("gzinflate($blob)");
    }

    #[test]
    fn test_decode() {
        fn check(input: &str, expected: &str) {
            let result = decode(input, &Environment::default());
            assert_eq!(result, expected, "Decoding failed for input");
        }

        check("$x = base64_decode('aGVsbG8=');", "$x = 'hello';");
        check(
            "<?php\n\n$p = str_rot13('cnff');\n$u = strtoupper($p);\necho $p;",
            "<?php\n$p = 'pass'; $u = 'PASS'; echo 'pass';",
        );
        check(
            "<?php $k = chr(97) . chr(98);;\necho strrev('cba');",
            "<?php\n$k = 'a' . 'b'; echo 'abc';",
        );
        check("plain text   stays", "plain text stays");
    }
}
