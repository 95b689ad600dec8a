//! Number <-> string conversions and canonical numeric index strings
//!
//! `number_to_string` is Number::toString(10) (shortest round-trip digits,
//! ECMAScript exponent rules) via `ryu-js`. `string_to_number` is
//! StringToNumber: the StringNumericLiteral grammar is checked here and the
//! decimal digits are handed to `fast-float`.

use crate::object::PropertyKey;

/// Largest integer a Number represents exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Number::toString with radix 10
pub fn number_to_string(n: f64) -> String {
    let mut buffer = ryu_js::Buffer::new();
    buffer.format(n).to_string()
}

/// WhiteSpace or LineTerminator
fn is_js_whitespace(c: char) -> bool {
    matches!(
        c,
        '\u{0009}'
            | '\u{000A}'
            | '\u{000B}'
            | '\u{000C}'
            | '\u{000D}'
            | '\u{0020}'
            | '\u{00A0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200A}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}'
            | '\u{FEFF}'
    )
}

/// Strip leading and trailing WhiteSpace and LineTerminator
pub fn trim_js_whitespace(s: &str) -> &str {
    s.trim_matches(is_js_whitespace)
}

/// StringToNumber; NaN when `s` is not a StringNumericLiteral
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = trim_js_whitespace(s);
    if trimmed.is_empty() {
        return 0.0;
    }

    if let Some(n) = parse_non_decimal(trimmed) {
        return n;
    }

    let (negative, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let magnitude = if unsigned == "Infinity" {
        f64::INFINITY
    } else if is_unsigned_decimal_literal(unsigned) {
        match fast_float::parse::<f64, _>(unsigned) {
            Ok(n) => n,
            Err(_) => return f64::NAN,
        }
    } else {
        return f64::NAN;
    };

    if negative { -magnitude } else { magnitude }
}

/// `0x`, `0o` and `0b` literals (unsigned only)
fn parse_non_decimal(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'0' {
        return None;
    }
    let radix = match bytes[1] {
        b'x' | b'X' => 16,
        b'o' | b'O' => 8,
        b'b' | b'B' => 2,
        _ => return None,
    };
    let digits = &s[2..];
    if digits.is_empty() {
        return Some(f64::NAN);
    }
    let mut value = 0.0f64;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => value = value * f64::from(radix) + f64::from(d),
            None => return Some(f64::NAN),
        }
    }
    Some(value)
}

/// StrUnsignedDecimalLiteral without the `Infinity` alternative:
/// `digits [. digits?] [exp]` or `. digits [exp]`
fn is_unsigned_decimal_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;

    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
    }

    if int_digits == 0 && frac_digits == 0 {
        return false;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// Result of CanonicalNumericIndexString for a key that is canonical
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanonicalNumericIndex {
    /// A non-negative integral Number no larger than 2^53 - 1
    Integer(u64),
    /// The string `"-0"`
    MinusZero,
    /// Any other canonical numeric string (`"-1"`, `"1.5"`, `"NaN"`, `"Infinity"`)
    NotAnIndex(f64),
}

impl CanonicalNumericIndex {
    /// The element index, when this could address an element at all
    pub fn as_index(self) -> Option<u64> {
        match self {
            Self::Integer(index) => Some(index),
            Self::MinusZero | Self::NotAnIndex(_) => None,
        }
    }
}

/// CanonicalNumericIndexString for a string
///
/// `None` when `ToString(ToNumber(s))` does not reproduce `s`.
pub fn canonical_numeric_index(s: &str) -> Option<CanonicalNumericIndex> {
    if s == "-0" {
        return Some(CanonicalNumericIndex::MinusZero);
    }
    let n = string_to_number(s);
    if number_to_string(n) != s {
        return None;
    }
    if n.fract() == 0.0 && (0.0..=MAX_SAFE_INTEGER).contains(&n) {
        Some(CanonicalNumericIndex::Integer(n as u64))
    } else {
        Some(CanonicalNumericIndex::NotAnIndex(n))
    }
}

/// CanonicalNumericIndexString for a property key
///
/// Integer keys are canonical by construction; symbols never are.
pub fn canonical_numeric_index_string(key: &PropertyKey) -> Option<CanonicalNumericIndex> {
    match key {
        PropertyKey::Index(index) => Some(CanonicalNumericIndex::Integer(u64::from(*index))),
        PropertyKey::String(s) => canonical_numeric_index(s),
        PropertyKey::Symbol(_) => None,
    }
}
