/// Rounds half away from zero to two decimals.
///
/// The value is first snapped to a millionth of a cent so binary noise such as
/// `30.005 -> 30.004999...` does not flip the rounding direction.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let cents = (value * 100.0 * 1e6).round() / 1e6;
    cents.round() / 100.0
}

/// Sums the finite values and rounds the result to cents.
pub fn sum(values: &[f64]) -> f64 {
    round2(values.iter().filter(|v| v.is_finite()).sum())
}

/// Formats a value as Brazilian reais, e.g. `R$ 1.234,56`.
pub fn format_brl(value: f64) -> String {
    let rounded = round2(value);
    let negative = rounded < 0.0;
    let cents = (rounded.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!(
        "{}R$ {},{:02}",
        if negative { "-" } else { "" },
        grouped,
        frac
    )
}
