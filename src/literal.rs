//! Decoders that turn one encoded token into its literal text form.
//!
//! A decoder receives the captures of its catalog rule and returns the
//! replacement text, or `None` to leave the match untouched.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine as _, alphabet};
use regex::Captures;

use crate::catalog::Pattern;

/// Text that replaces one match, plus how many encoded units it consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub text: String,
    pub units: usize,
}

impl Replacement {
    fn single(text: String) -> Self {
        Self { text, units: 1 }
    }
}

pub type LiteralDecoder = fn(&Captures<'_>) -> Option<Replacement>;

/// Accepts missing padding and stray trailing bits, like PHP's non-strict
/// `base64_decode`.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// `base64_decode('...')` to a quoted literal. Payloads that do not decode to
/// UTF-8 text are rejected.
pub fn base64(caps: &Captures<'_>) -> Option<Replacement> {
    let bytes = LENIENT_BASE64
        .decode(&caps[1])
        .map_err(|err| log::trace!("base64 payload {:?} rejected: {err}", &caps[1]))
        .ok()?;
    let text = String::from_utf8(bytes)
        .map_err(|err| log::trace!("base64 payload {:?} is not text: {err}", &caps[1]))
        .ok()?;
    Some(Replacement::single(quote(&text)))
}

/// A run of `\xNN` escapes to the raw characters it encodes, without quotes.
///
/// The run is decoded as one byte string so multi-byte UTF-8 sequences
/// survive; invalid UTF-8 falls back to one Latin-1 character per byte.
pub fn hex_escape(caps: &Captures<'_>) -> Option<Replacement> {
    let bytes = caps[0]
        .as_bytes()
        .chunks(4)
        .map(|escape| {
            std::str::from_utf8(escape.get(2..)?)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
        })
        .collect::<Option<Vec<u8>>>()?;
    let units = bytes.len();
    let text = String::from_utf8(bytes)
        .unwrap_or_else(|err| err.into_bytes().into_iter().map(char::from).collect());
    Some(Replacement { text, units })
}

/// `chr(N)` to a quoted single character. Codes wrap modulo 256.
pub fn char_code(caps: &Captures<'_>) -> Option<Replacement> {
    let code: u64 = caps[1].parse().ok()?;
    let ch = char::from((code % 256) as u8);
    Some(Replacement::single(quote(&ch.to_string())))
}

/// `str_rot13('...')` to its rotated, quoted literal.
pub fn rot13(caps: &Captures<'_>) -> Option<Replacement> {
    let rotated = caps[1]
        .chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a') + 13) % 26 + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A') + 13) % 26 + b'A') as char,
            _ => c,
        })
        .collect::<String>();
    Some(Replacement::single(quote(&rotated)))
}

/// Applies the decoder of `pattern` to every match in `source`.
///
/// Returns the rewritten buffer and the number of units decoded. Matches the
/// decoder rejects are kept verbatim.
pub(crate) fn apply(pattern: &Pattern, source: &str) -> (String, usize) {
    let Some(decoder) = pattern.decoder else {
        return (source.to_owned(), 0);
    };

    let mut decoded = 0;
    let output = pattern
        .regex
        .replace_all(source, |caps: &Captures| match decoder(caps) {
            Some(replacement) => {
                decoded += replacement.units;
                replacement.text
            }
            None => caps[0].to_owned(),
        })
        .into_owned();
    (output, decoded)
}

/// Backslash-escapes `'`, `"`, `\` and NUL.
pub fn addslashes(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\'' | '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\0' => escaped.push_str("\\0"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Wraps `value` in single quotes after escaping it.
pub fn quote(value: &str) -> String {
    format!("'{}'", addslashes(value))
}

/// Formats a float with 14 significant digits, switching to exponent form
/// outside `1e-4..1e14`. Integral values print without a fraction.
pub fn format_float(value: f64) -> String {
    const PRECISION: i32 = 14;

    if value.is_nan() {
        return "NAN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_owned();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }

    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= PRECISION {
        let formatted = format!("{:.*e}", (PRECISION - 1) as usize, value);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mut mantissa = trim_fraction(mantissa).to_owned();
        if !mantissa.contains('.') {
            mantissa.push_str(".0");
        }
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}E{sign}{}", exp.abs());
    }

    let decimals = (PRECISION - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{value:.decimals$}")).to_owned()
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}
