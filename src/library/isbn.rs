//! ISBN normalization.

/// Strip separators and convert ISBN-10 to ISBN-13.
///
/// Returns `None` unless the input is a well-formed ISBN-10 (last character
/// may be `X`) or a 13-digit ISBN.
pub fn normalize(isbn: &str) -> Option<String> {
    let clean: String = isbn
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase();

    // Byte offsets below assume one byte per character.
    if !clean.is_ascii() {
        return None;
    }

    match clean.len() {
        10 if is_isbn10(&clean) => Some(isbn10_to_13(&clean)),
        13 if clean.chars().all(|c| c.is_ascii_digit()) => Some(clean),
        _ => None,
    }
}

fn is_isbn10(clean: &str) -> bool {
    let (body, check) = clean.split_at(9);
    body.chars().all(|c| c.is_ascii_digit())
        && check.chars().all(|c| c.is_ascii_digit() || c == 'X')
}

/// Convert a validated ISBN-10 to ISBN-13 with the 978 prefix. The ISBN-10
/// check digit is discarded and recomputed.
fn isbn10_to_13(isbn10: &str) -> String {
    let core = format!("978{}", &isbn10[..9]);
    let sum: u32 = core
        .bytes()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    let check = (10 - sum % 10) % 10;
    format!("{}{}", core, check)
}

/// Hyphenated display form of an ISBN-13 (approximate grouping).
pub fn format(isbn: &str) -> String {
    match normalize(isbn) {
        Some(clean) => format!(
            "{}-{}-{}-{}-{}",
            &clean[..3],
            &clean[3..4],
            &clean[4..8],
            &clean[8..12],
            &clean[12..]
        ),
        None => isbn.to_string(),
    }
}
