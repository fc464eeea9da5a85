//! Brazilian real amounts, held as integer cents.
//!
//! Input comes from a masked field (`1.234,56`) or raw keystrokes; output
//! is always `pt-BR` grouping with two decimals.

use thiserror::Error;

/// Largest amount a single sale may carry: R$ 1.000.000.000,00.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount is empty")]
    Empty,

    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Amount too large: {0}")]
    Overflow(String),
}

/// Parse a `pt-BR` formatted amount into cents.
///
/// Accepts an optional `R$` prefix, optional thousands dots and at most two
/// decimals after a comma: `"1.234,56"`, `"R$ 80"`, `"0,5"`.
pub fn parse_brl(input: &str) -> Result<i64, MoneyError> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("R$").unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        return Err(MoneyError::Empty);
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };

    let (int_part, frac_part) = match body.split_once(',') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (body, ""),
    };

    if frac_part.len() > 2 || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::Invalid(input.to_string()));
    }
    if !valid_grouping(int_part) {
        return Err(MoneyError::Invalid(input.to_string()));
    }

    let int_digits: String = int_part.chars().filter(|c| *c != '.').collect();
    let units: i64 = if int_digits.is_empty() {
        0
    } else {
        int_digits
            .parse()
            .map_err(|_| MoneyError::Overflow(input.to_string()))?
    };
    let cents: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().unwrap_or(0) * 10,
        _ => frac_part.parse::<i64>().unwrap_or(0),
    };

    let total = units
        .checked_mul(100)
        .and_then(|v| v.checked_add(cents))
        .ok_or_else(|| MoneyError::Overflow(input.to_string()))?;
    Ok(if negative { -total } else { total })
}

/// Integer part may be plain digits or dot-grouped thousands (`1.234.567`).
fn valid_grouping(int_part: &str) -> bool {
    if int_part.is_empty() {
        return true;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    if !int_part.contains('.') {
        return true;
    }
    let mut groups = int_part.split('.');
    let head = groups.next().unwrap_or("");
    if head.is_empty() || head.len() > 3 {
        return false;
    }
    groups.all(|g| g.len() == 3)
}

/// Format cents as `1.234,56` (no currency symbol).
pub fn format_brl(cents: i64) -> String {
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let units = (abs / 100).to_string();
    let frac = abs % 100;

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}{},{:02}", if negative { "-" } else { "" }, grouped, frac)
}

/// Format cents with the currency symbol: `R$ 1.234,56`.
pub fn format_brl_symbol(cents: i64) -> String {
    format!("R$ {}", format_brl(cents))
}

/// Interpret raw keystrokes the way the masked input does: strip everything
/// that is not a digit and read the rest as cents. `None` when no digits.
pub fn from_keystrokes(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .skip_while(|c| *c == '0')
        .collect();
    if raw.chars().any(|c| c.is_ascii_digit()) && digits.is_empty() {
        return Some(0);
    }
    if digits.is_empty() {
        return None;
    }
    // Anything longer than i64 cents is a stuck key; clamp instead of failing.
    Some(digits.parse::<i64>().unwrap_or(i64::MAX))
}
