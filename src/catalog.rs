//! Declarative table of the obfuscation kinds the engine recognizes.
//!
//! Each entry pairs a detection rule with an optional decode function. Kinds
//! without a decoder only contribute to the diagnostic census.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::literal::{self, LiteralDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// `base64_decode('...')`
    Base64,
    /// `\xNN` escape sequences
    HexEscape,
    /// `chr(N)`
    CharCode,
    /// `str_rot13('...')`
    Rot13,
    /// `eval(...)`, counted only
    Eval,
    /// `gzinflate(...)`, counted only
    Gzinflate,
}

impl PatternKind {
    /// Every kind in catalog order.
    pub const ALL: [PatternKind; 6] = [
        PatternKind::Base64,
        PatternKind::HexEscape,
        PatternKind::CharCode,
        PatternKind::Rot13,
        PatternKind::Eval,
        PatternKind::Gzinflate,
    ];

    /// Kinds with a decoder, in the order a pass applies them.
    pub const DECODABLE: [PatternKind; 4] = [
        PatternKind::Base64,
        PatternKind::HexEscape,
        PatternKind::CharCode,
        PatternKind::Rot13,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PatternKind::Base64 => "base64",
            PatternKind::HexEscape => "hex",
            PatternKind::CharCode => "chr",
            PatternKind::Rot13 => "str_rot13",
            PatternKind::Eval => "eval",
            PatternKind::Gzinflate => "gzinflate",
        }
    }

    pub fn pattern(self) -> &'static Pattern {
        &CATALOG[self as usize]
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One catalog entry.
#[derive(Debug)]
pub struct Pattern {
    pub kind: PatternKind,
    pub regex: Regex,
    pub decoder: Option<LiteralDecoder>,
}

impl Pattern {
    fn new(kind: PatternKind, regex: &str, decoder: Option<LiteralDecoder>) -> Self {
        Self {
            kind,
            regex: Regex::new(regex).unwrap(),
            decoder,
        }
    }

    /// Number of non-overlapping matches in `source`.
    pub fn count(&self, source: &str) -> usize {
        self.regex.find_iter(source).count()
    }
}

// Indexed by `PatternKind as usize`; keep in declaration order.
static CATALOG: LazyLock<[Pattern; 6]> = LazyLock::new(|| {
    [
        Pattern::new(
            PatternKind::Base64,
            r#"\bbase64_decode\s*\(\s*['"]([A-Za-z0-9+/=]+)['"]\s*\)"#,
            Some(literal::base64),
        ),
        Pattern::new(
            PatternKind::HexEscape,
            r"(?:\\x[0-9a-fA-F]{2})+",
            Some(literal::hex_escape),
        ),
        Pattern::new(
            PatternKind::CharCode,
            r"\bchr\s*\(\s*(\d+)\s*\)",
            Some(literal::char_code),
        ),
        Pattern::new(
            PatternKind::Rot13,
            r#"\bstr_rot13\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
            Some(literal::rot13),
        ),
        Pattern::new(PatternKind::Eval, r"\beval\s*\(\s*(.+?)\s*\)", None),
        Pattern::new(PatternKind::Gzinflate, r"\bgzinflate\s*\(\s*(.+?)\s*\)", None),
    ]
});

/// Counts matches per catalogued kind, skipping kinds that do not occur.
///
/// Purely diagnostic: decoders re-match their own rule when applied.
pub fn census(source: &str) -> Vec<(PatternKind, usize)> {
    PatternKind::ALL
        .iter()
        .map(|&kind| (kind, kind.pattern().count(source)))
        .filter(|&(_, count)| count > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order() {
        for kind in PatternKind::ALL {
            assert_eq!(kind.pattern().kind, kind);
        }
        for kind in PatternKind::DECODABLE {
            assert!(kind.pattern().decoder.is_some(), "{kind} has no decoder");
        }
        assert!(PatternKind::Eval.pattern().decoder.is_none());
    }

    #[test]
    fn test_census() {
        let source = r#"eval(base64_decode('aGk=')); $a = "\x41\x42" . chr(67) . chr( 68 );"#;
        assert_eq!(
            census(source),
            vec![
                (PatternKind::Base64, 1),
                (PatternKind::HexEscape, 1),
                (PatternKind::CharCode, 2),
                (PatternKind::Eval, 1),
            ]
        );
        assert!(census("echo 'plain';").is_empty());
    }

    #[test]
    fn test_word_boundary() {
        assert_eq!(PatternKind::CharCode.pattern().count("mychr(65)"), 0);
        assert_eq!(PatternKind::CharCode.pattern().count("chr (65)"), 1);
    }
}
