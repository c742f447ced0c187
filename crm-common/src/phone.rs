//! Phone number normalization
//!
//! Canonical form is a digit string carrying the `84` country code. Phone
//! equality across sources is always decided on canonical forms, and stored
//! records are matched against both the international (`84…`) and the
//! national trunk (`0…`) spelling.

/// Country code prepended to national numbers
pub const COUNTRY_CODE: &str = "84";

/// Shortest digit run accepted as a phone number
pub const MIN_DIGITS: usize = 9;

/// Canonicalize a raw phone string, returning an empty string when unusable
///
/// ```
/// use crm_common::phone::normalize_phone;
///
/// assert_eq!(normalize_phone("0912 345 678"), "84912345678");
/// assert_eq!(normalize_phone("+84 (912) 345-678"), "84912345678");
/// assert_eq!(normalize_phone("12345"), "");
/// ```
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < MIN_DIGITS {
        return String::new();
    }
    if let Some(rest) = digits.strip_prefix('0') {
        format!("{COUNTRY_CODE}{rest}")
    } else if digits.starts_with(COUNTRY_CODE) {
        digits
    } else {
        format!("{COUNTRY_CODE}{digits}")
    }
}

/// Normalize a list, dropping unusable entries and duplicates (order preserved)
pub fn normalize_phones<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for phone in raw {
        let normalized = normalize_phone(phone.as_ref());
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

/// Spellings under which a canonical number may appear in stored records
pub fn phone_variants(normalized: &str) -> Vec<String> {
    if normalized.is_empty() {
        return Vec::new();
    }
    let mut variants = vec![normalized.to_string()];
    if let Some(national) = normalized.strip_prefix(COUNTRY_CODE) {
        variants.push(format!("0{national}"));
    }
    variants
}

/// Variants of every number in a list, deduplicated
pub fn all_variants(normalized: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for phone in normalized {
        for v in phone_variants(phone) {
            if !out.contains(&v) {
                out.push(v);
            }
        }
    }
    out
}
