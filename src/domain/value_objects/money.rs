/// Currencies the processor treats as having no decimal places; their minor
/// unit equals their major unit.
const ZERO_DECIMAL_CURRENCIES: [&str; 15] = [
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "vnd", "vuv", "xaf",
    "xof", "xpf",
];

/// Minimum charge amount accepted by the processor, in minor units.
pub const MINIMUM_AMOUNT_MINOR: i64 = 50;

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES.contains(&currency.to_lowercase().as_str())
}

/// Converts a major-unit amount ("10.00") to the processor's minor units.
pub fn to_minor_units(amount: f64, currency: &str) -> i64 {
    if is_zero_decimal(currency) {
        amount.round() as i64
    } else {
        (amount * 100.0).round() as i64
    }
}

/// Converts minor units back to a major-unit amount for display.
pub fn from_minor_units(minor: i64, currency: &str) -> f64 {
    if is_zero_decimal(currency) {
        minor as f64
    } else {
        minor as f64 / 100.0
    }
}

/// Formats a minor-unit amount for order notes, e.g. `"10.00 USD"`.
pub fn format_amount(minor: i64, currency: &str) -> String {
    if is_zero_decimal(currency) {
        format!("{} {}", minor, currency.to_uppercase())
    } else {
        format!("{:.2} {}", minor as f64 / 100.0, currency.to_uppercase())
    }
}
