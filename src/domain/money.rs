use std::fmt;

/// Money is represented as integer minor units to avoid floating-point precision issues.
/// For INR/EUR/USD, 1 unit = 100 minor units, so 50.00 = 5000.
pub type Cents = i64;

/// Commission and similar rates are expressed in basis points: 10000 = 100%.
pub type BasisPoints = i64;

pub const BASIS_POINTS_PER_UNIT: BasisPoints = 10_000;

/// Format minor units as a human-readable currency string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.abs();
    let units = abs_cents / 100;
    let remainder = abs_cents % 100;
    format!("{}{}.{:02}", sign, units, remainder)
}

/// Parse a decimal string into minor units.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let negative = input.starts_with('-');
    let input = input.trim_start_matches('-');

    let parts: Vec<&str> = input.split('.').collect();
    match parts.len() {
        1 => {
            let units: i64 = parts[0]
                .parse()
                .map_err(|_| ParseCentsError::InvalidFormat)?;
            let cents = units.checked_mul(100).ok_or(ParseCentsError::Overflow)?;
            Ok(if negative { -cents } else { cents })
        }
        2 => {
            let units: i64 = if parts[0].is_empty() {
                0
            } else {
                parts[0]
                    .parse()
                    .map_err(|_| ParseCentsError::InvalidFormat)?
            };

            let decimal_str = parts[1];
            if !decimal_str.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseCentsError::InvalidFormat);
            }
            let decimal_cents: i64 = match decimal_str.len() {
                0 => 0,
                1 => {
                    decimal_str
                        .parse::<i64>()
                        .map_err(|_| ParseCentsError::InvalidFormat)?
                        * 10
                }
                2 => decimal_str
                    .parse()
                    .map_err(|_| ParseCentsError::InvalidFormat)?,
                // Sub-minor precision is not representable
                _ => return Err(ParseCentsError::TooPrecise),
            };

            let cents = units
                .checked_mul(100)
                .and_then(|c| c.checked_add(decimal_cents))
                .ok_or(ParseCentsError::Overflow)?;
            Ok(if negative { -cents } else { cents })
        }
        _ => Err(ParseCentsError::InvalidFormat),
    }
}

/// Price a session of `minutes` at `rate_per_hour` minor units, rounding half up.
///
/// Returns `None` on overflow or when either input is negative.
pub fn prorate_hourly(rate_per_hour: Cents, minutes: i64) -> Option<Cents> {
    if rate_per_hour < 0 || minutes < 0 {
        return None;
    }
    let scaled = rate_per_hour.checked_mul(minutes)?;
    Some((scaled + 30) / 60)
}

/// Apply a basis-point rate to an amount, rounding half up.
pub fn apply_basis_points(amount: Cents, rate: BasisPoints) -> Option<Cents> {
    if amount < 0 || !(0..=BASIS_POINTS_PER_UNIT).contains(&rate) {
        return None;
    }
    let scaled = amount.checked_mul(rate)?;
    Some((scaled + BASIS_POINTS_PER_UNIT / 2) / BASIS_POINTS_PER_UNIT)
}

/// Format basis points as a percentage string. Example: 1050 -> "10.50%"
pub fn format_basis_points(rate: BasisPoints) -> String {
    format!("{}.{:02}%", rate / 100, rate % 100)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
    TooPrecise,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::TooPrecise => write!(f, "more than two decimal places"),
            ParseCentsError::Overflow => write!(f, "amount out of range"),
        }
    }
}

impl std::error::Error for ParseCentsError {}
