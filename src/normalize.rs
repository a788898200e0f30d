//! Text and digit normalization used by the reconciliation matcher.
//!
//! Two digit forms exist: [`digits_only`] keeps leading zeros and
//! is what goes over the wire (a CPF keeps its zeros), while
//! [`normalize_digits`] also strips leading zeros and is the comparison key,
//! so `"0123"` and `"123"` reconcile as equal.

/// Uppercase, fold Latin diacritics to ASCII, collapse whitespace runs, trim.
/// Idempotent; empty input yields an empty string.
pub fn normalize_text(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut pending_space = false;
    for ch in value.trim().chars() {
        if ch.is_whitespace() {
            pending_space = !output.is_empty();
            continue;
        }
        // Decomposed input carries its accents as combining marks.
        if is_combining_mark(ch) {
            continue;
        }
        if pending_space {
            output.push(' ');
            pending_space = false;
        }
        for upper in ch.to_uppercase() {
            output.push(fold_diacritic(upper));
        }
    }
    output
}

fn is_combining_mark(ch: char) -> bool {
    matches!(ch, '\u{0300}'..='\u{036F}')
}

/// Strip every non-digit character, keeping leading zeros.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Comparison form of a digit string: non-digits stripped, then leading
/// zeros. An all-zero value collapses to `"0"`; no digits at all yields `""`.
pub fn normalize_digits(value: &str) -> String {
    let digits = digits_only(value);
    if digits.is_empty() {
        return String::new();
    }
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

/// Token-containment name match. Both names are normalized; tokens of length
/// <= 2 are discarded. Holds when every token of `a` is a substring of, or
/// contains, some token of `b`.
///
/// Asymmetric: `a` is the order's display name, expected to be a shorthand
/// subset of the registered legal name `b`.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let tokens_a: Vec<&str> = a.split(' ').filter(|t| t.len() > 2).collect();
    let tokens_b: Vec<&str> = b.split(' ').filter(|t| t.len() > 2).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return false;
    }
    tokens_a
        .iter()
        .all(|ta| tokens_b.iter().any(|tb| tb.contains(ta) || ta.contains(tb)))
}

/// ASCII fold for the Latin-1 accented letters that occur in Portuguese
/// names. Input is already uppercased.
fn fold_diacritic(ch: char) -> char {
    match ch {
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'Ç' => 'C',
        'Ñ' => 'N',
        'Ý' => 'Y',
        other => other,
    }
}
