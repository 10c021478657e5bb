//! Fixed-point currency amounts
use super::error::MoneyError;
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Currency {
    #[n(0)]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
    #[n(3)]
    EGP,
}

impl Currency {
    pub const fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::GBP => "GBP",
            Currency::EUR => "EUR",
            Currency::EGP => "EGP",
        }
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "GBP" => Ok(Currency::GBP),
            "EUR" => Ok(Currency::EUR),
            "EGP" => Ok(Currency::EGP),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// An amount in minor units (cents, piastres) of a single currency.
///
/// Every supported currency has two fractional digits, so `1500` is `15.00`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Money {
    #[n(0)]
    amount: u64,
    #[n(1)]
    currency: Currency,
}

const MINOR_PER_MAJOR: u64 = 100;

impl Money {
    pub const fn new(amount: u64, currency: Currency) -> Self {
        Self { amount, currency }
    }
    pub const fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }
    /// Amount in minor units.
    pub const fn amount(&self) -> u64 {
        self.amount
    }
    pub const fn currency(&self) -> Currency {
        self.currency
    }
    pub const fn is_positive(&self) -> bool {
        self.amount > 0
    }
    pub fn checked_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        self.amount
            .checked_add(other.amount)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }
    pub fn checked_sub(&self, other: Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        self.amount
            .checked_sub(other.amount)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or(MoneyError::Underflow)
    }
    fn same_currency(&self, other: Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(self.currency, other.currency));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount / MINOR_PER_MAJOR,
            self.amount % MINOR_PER_MAJOR,
            self.currency.code()
        )
    }
}

/// Parses `"<major>[.<minor>] <CUR>"`, e.g. `"15.50 USD"` or `"7 EGP"`.
impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || MoneyError::Parse(s.to_string());

        let mut parts = s.split_whitespace();
        let number = parts.next().ok_or_else(parse_err)?;
        let currency: Currency = parts.next().ok_or_else(parse_err)?.parse()?;
        if parts.next().is_some() {
            return Err(parse_err());
        }

        let (major, minor) = match number.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (number, ""),
        };
        if major.is_empty() || minor.len() > 2 || !major.chars().all(|c| c.is_ascii_digit()) {
            return Err(parse_err());
        }
        if !minor.chars().all(|c| c.is_ascii_digit()) {
            return Err(parse_err());
        }

        let major: u64 = major.parse().map_err(|_| parse_err())?;
        // "1.5" means 1.50
        let minor: u64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<u64>().map_err(|_| parse_err())? * 10,
            _ => minor.parse().map_err(|_| parse_err())?,
        };

        let amount = major
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|m| m.checked_add(minor))
            .ok_or(MoneyError::Overflow)?;

        Ok(Money::new(amount, currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_two_fraction_digits() {
        assert_eq!(Money::new(1500, Currency::USD).to_string(), "15.00 USD");
        assert_eq!(Money::new(7, Currency::EGP).to_string(), "0.07 EGP");
    }

    #[test]
    fn parses_major_and_minor_units() {
        assert_eq!("15.50 usd".parse::<Money>(), Ok(Money::new(1550, Currency::USD)));
        assert_eq!("1.5 GBP".parse::<Money>(), Ok(Money::new(150, Currency::GBP)));
        assert_eq!("12 EGP".parse::<Money>(), Ok(Money::new(1200, Currency::EGP)));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!("12.345 USD".parse::<Money>().is_err());
        assert!("-1 USD".parse::<Money>().is_err());
        assert!("12".parse::<Money>().is_err());
        assert!("12 XYZ".parse::<Money>().is_err());
        assert!(".50 USD".parse::<Money>().is_err());
    }

    #[test]
    fn arithmetic_refuses_mixed_currencies() {
        let usd = Money::new(100, Currency::USD);
        let eur = Money::new(100, Currency::EUR);

        assert_eq!(
            usd.checked_add(eur),
            Err(MoneyError::CurrencyMismatch(Currency::USD, Currency::EUR))
        );
        assert_eq!(usd.checked_sub(Money::new(101, Currency::USD)), Err(MoneyError::Underflow));
        assert_eq!(
            usd.checked_add(Money::new(50, Currency::USD)),
            Ok(Money::new(150, Currency::USD))
        );
    }
}
