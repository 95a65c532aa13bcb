//! Value comparison of Kubernetes resource quantities.
//!
//! The API server stores quantities in canonical form (`1000m` becomes `1`,
//! `1024Mi` becomes `1Gi`), so two spellings are compared by the amount they
//! denote rather than by text.

use serde_json::Value;

/// Scale of the internal representation: amounts are counted in nano-units.
const NANO_EXP: i32 = 9;

/// True when both values are quantity strings denoting the same amount.
pub fn same(a: &Value, b: &Value) -> bool {
    match (a.as_str().and_then(parse), b.as_str().and_then(parse)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Amount of a quantity in nano-units. Fractions below a nano-unit round up,
/// matching the server. `None` when the text is not a quantity or overflows.
pub fn parse(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let (negative, raw) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mantissa: i128 = format!("{whole}{fraction}").parse().ok()?;
    let (binary, decimal_exp) = multiplier(suffix)?;
    let exp = decimal_exp + NANO_EXP - i32::try_from(fraction.len()).ok()?;

    let scaled = mantissa.checked_mul(binary)?;
    let amount = if exp >= 0 {
        scaled.checked_mul(10i128.checked_pow(exp.unsigned_abs())?)?
    } else {
        let divisor = 10i128.checked_pow(exp.unsigned_abs())?;
        scaled.checked_add(divisor - 1)? / divisor
    };
    Some(if negative { -amount } else { amount })
}

/// (binary factor, decimal exponent) of a suffix.
fn multiplier(suffix: &str) -> Option<(i128, i32)> {
    let decimal = |exp: i32| Some((1i128, exp));
    let binary = |shift: u32| Some((1i128 << shift, 0i32));
    match suffix {
        "" => decimal(0),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        _ => {
            let exp = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            let exp: i32 = exp.parse().ok()?;
            (exp.abs() <= 30).then_some((1, exp))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_spellings_match() {
        for (a, b) in [
            ("1000m", "1"),
            ("0.5", "500m"),
            ("1024Mi", "1Gi"),
            ("1e3", "1k"),
            ("1.5Gi", "1536Mi"),
            ("100M", "100000k"),
        ] {
            assert_eq!(parse(a), parse(b), "{a} vs {b}");
            assert!(parse(a).is_some(), "{a}");
        }
    }

    #[test]
    fn different_amounts_differ() {
        assert_ne!(parse("100Mi"), parse("100M"));
        assert_ne!(parse("1"), parse("999m"));
        assert_eq!(parse("-1"), Some(-1_000_000_000));
    }

    #[test]
    fn rejects_non_quantities() {
        for raw in ["", ".", "abc", "1.2.3", "12Xi", "1e99"] {
            assert_eq!(parse(raw), None, "{raw}");
        }
    }

    #[test]
    fn same_requires_two_quantities() {
        assert!(same(&json!("250m"), &json!("0.25")));
        assert!(!same(&json!("250m"), &json!(250)));
        assert!(!same(&json!("x"), &json!("x")));
    }
}
