//! Phone number normalization used for duplicate-customer matching.

/// Minimum digits before a duplicate lookup is worth running.
pub const LOOKUP_MIN_DIGITS: usize = 8;

/// Keep ASCII digits only: `"(51) 99876-5432"` → `"51998765432"`.
pub fn digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// True once the typed number has enough digits to look up.
pub fn is_lookup_ready(value: &str) -> bool {
    digits(value).len() >= LOOKUP_MIN_DIGITS
}

/// Format 10/11-digit Brazilian numbers as `(AA) NNNNN-NNNN`.
/// Anything else is returned trimmed, as typed.
pub fn format_display(value: &str) -> String {
    let d = digits(value);
    match d.len() {
        11 => format!("({}) {}-{}", &d[..2], &d[2..7], &d[7..]),
        10 => format!("({}) {}-{}", &d[..2], &d[2..6], &d[6..]),
        _ => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_strips_mask() {
        assert_eq!(digits("(51) 99876-5432"), "51998765432");
        assert_eq!(digits("+55 51 3333.4444"), "555133334444");
        assert_eq!(digits("sem telefone"), "");
    }

    #[test]
    fn test_lookup_threshold() {
        assert!(!is_lookup_ready("9987-654"));
        assert!(is_lookup_ready("9987-6543"));
        assert!(is_lookup_ready("(51) 99876-5432"));
    }

    #[test]
    fn test_format_display() {
        assert_eq!(format_display("51998765432"), "(51) 99876-5432");
        assert_eq!(format_display("5133334444"), "(51) 3333-4444");
        assert_eq!(format_display(" 12345 "), "12345");
    }
}
