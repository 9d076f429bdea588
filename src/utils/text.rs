use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").unwrap());

/// Parse a display price into a decimal amount.
///
/// Handles both the European convention (`1.234,56`, `19,99 EUR`) and the
/// plain decimal-point convention (`€19.99`, `1,299.99`). Currency symbols,
/// letters and whitespace are ignored. Returns `None` for anything that does
/// not contain a usable number; never panics.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');

    let normalized = match (has_comma, has_dot) {
        (true, true) => {
            // Both separators present: the one occurring last is the decimal
            // separator, the other marks thousands.
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (true, false) => normalize_single_separator(&cleaned, ','),
        (false, true) => normalize_single_separator(&cleaned, '.'),
        (false, false) => cleaned,
    };

    Decimal::from_str(&normalized).ok()
}

/// A lone separator followed by exactly three digits is a thousands mark
/// (`1,234` / `1.234`); anything else is a decimal separator (`19,99`, `1,5`).
fn normalize_single_separator(cleaned: &str, sep: char) -> String {
    let occurrences = cleaned.matches(sep).count();
    let tail_len = cleaned.rfind(sep).map(|i| cleaned.len() - i - 1).unwrap_or(0);

    if occurrences > 1 || tail_len == 3 {
        cleaned.replace(sep, "")
    } else if sep == ',' {
        cleaned.replace(',', ".")
    } else {
        cleaned.to_string()
    }
}

/// Extract a discount percentage from display text like `"-20%"` or `"20% off"`.
///
/// Takes the absolute value of the first integer run and accepts only the
/// range (0, 100]. Out-of-range or absent values yield `None`.
pub fn parse_discount_percent(text: &str) -> Option<u8> {
    let m = DIGIT_RUN.find(text)?;
    let value: i64 = m.as_str().parse().ok()?;
    let value = value.abs();
    if value > 0 && value <= 100 {
        Some(value as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[rstest]
    #[case("19,99 EUR", "19.99")]
    #[case("€19.99", "19.99")]
    #[case("39,95 €", "39.95")]
    #[case("1.234,56", "1234.56")]
    #[case("1,299.99", "1299.99")]
    #[case("$1,234", "1234")]
    #[case("1.234", "1234")]
    #[case("1,5", "1.5")]
    #[case("  49,95 € ", "49.95")]
    #[case("129", "129")]
    fn test_parse_price_conventions(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse_price(input), Some(dec(expected)), "input: {input:?}");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("sold out")]
    #[case("€")]
    fn test_parse_price_unparseable(#[case] input: &str) {
        assert_eq!(parse_price(input), None, "input: {input:?}");
    }

    #[test]
    fn test_parse_price_absent_input() {
        // Callers hold Option<String> from selector chains; absent flows to None.
        let absent: Option<String> = None;
        assert_eq!(absent.as_deref().and_then(parse_price), None);
    }

    #[rstest]
    #[case("-20%", Some(20))]
    #[case("20% off", Some(20))]
    #[case("−30%", Some(30))]
    #[case("100%", Some(100))]
    #[case("150%", None)]
    #[case("0%", None)]
    #[case("no discount", None)]
    #[case("", None)]
    fn test_parse_discount_percent(#[case] input: &str, #[case] expected: Option<u8>) {
        assert_eq!(parse_discount_percent(input), expected, "input: {input:?}");
    }
}
