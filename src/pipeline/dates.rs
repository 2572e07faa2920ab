//! Date rules: recognise date markers and normalise their numerals.
//!
//! Chronicles in Arabic script mix Western digits (`1949/8/17`) with
//! Arabic-indic ones (`١٩٤٩/٨/١٧`), sometimes in the same date, and OCR
//! picks separators freely among `/`, `-` and `.`. These rules are pure and
//! never fail: anything that does not look like a clean three-part date is
//! passed through digit-normalised rather than rejected.

use once_cell::sync::Lazy;
use regex::Regex;

/// Digit class accepted in date markers: Western, Arabic-indic
/// (U+0660–0669) and extended Arabic-indic (U+06F0–06F9).
const DIGIT: &str = "[0-9\u{0660}-\u{0669}\u{06F0}-\u{06F9}]";

/// Four-digit year, then two groups of one or two digits.
static RE_DATE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{d}{{4}}[/\-.]{d}{{1,2}}[/\-.]{d}{{1,2}}",
        d = DIGIT
    ))
    .unwrap()
});

static RE_NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]+").unwrap());

/// Whether `text` contains a date marker anywhere.
pub fn is_date_marker(text: &str) -> bool {
    RE_DATE_MARKER.is_match(text.trim())
}

/// Map Arabic-indic and extended Arabic-indic digits to `0-9`, leaving
/// every other character untouched.
pub fn normalize_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => western(c, '\u{0660}'),
            '\u{06F0}'..='\u{06F9}' => western(c, '\u{06F0}'),
            other => other,
        })
        .collect()
}

fn western(c: char, zero: char) -> char {
    char::from(b'0' + (c as u32 - zero as u32) as u8)
}

/// Normalise a marker into `YYYY/MM/DD`.
///
/// Digits are normalised first, then the text is split on runs of
/// non-digits. Exactly three groups are reassembled zero-padded (`8` → `08`,
/// `007` → `07`); any other count returns the digit-normalised text as is.
pub fn normalize_date(raw: &str) -> String {
    let ascii = normalize_digits(raw);
    let groups: Vec<&str> = RE_NON_DIGITS
        .split(&ascii)
        .filter(|g| !g.is_empty())
        .collect();

    match groups.as_slice() {
        [year, month, day] => format!(
            "{}/{}/{}",
            zero_pad(year, 4),
            zero_pad(month, 2),
            zero_pad(day, 2)
        ),
        _ => ascii,
    }
}

/// Integer-style formatting of a digit run: leading zeros dropped, then
/// left-padded to `width`. Works on the string so long runs cannot overflow.
fn zero_pad(digits: &str, width: usize) -> String {
    let significant = digits.trim_start_matches('0');
    let significant = if significant.is_empty() { "0" } else { significant };
    format!("{significant:0>width$}")
}
