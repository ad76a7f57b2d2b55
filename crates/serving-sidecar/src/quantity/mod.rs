//! An exact representation of Kubernetes resource quantities.
//!
//! Quantities are stored as `mantissa * 10^exponent` with an integer mantissa, so parsing,
//! comparison and scaling to milli-units never lose precision. Values are rounded up to nano
//! precision on construction, which matches what the API server does.
use std::{
    cmp::Ordering,
    fmt::{Display, Write as _},
    str::FromStr,
};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use serde::{Deserialize, Serialize, de::Visitor};
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};

mod suffix;

pub use suffix::*;

/// The smallest exponent a quantity is stored with (nano).
const MIN_EXPONENT: i32 = -9;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ParseQuantityError {
    #[snafu(display("input is either empty or contains non-ascii characters"))]
    InvalidFormat,

    #[snafu(display("failed to parse the numeric part of {input:?}"))]
    InvalidNumber { input: String },

    #[snafu(display("failed to parse suffix"))]
    InvalidSuffix { source: ParseSuffixError },

    #[snafu(display("quantity {input:?} is too large to be represented"))]
    TooLarge { input: String },
}

/// A resource quantity like `100m`, `1.5Gi` or `1e3`.
///
/// Equality and ordering are numeric: `1Ki` equals `1024` and `1000m` equals `1`. The [`Format`]
/// only influences how the quantity is printed.
#[derive(Clone, Copy, Debug)]
pub struct Quantity {
    mantissa: i128,
    exponent: i32,
    format: Format,
}

impl Quantity {
    pub const ZERO: Self = Self {
        mantissa: 0,
        exponent: 0,
        format: Format::DecimalSI,
    };

    /// Creates a quantity of `value / 1000` units.
    pub fn from_milli(value: i64, format: Format) -> Self {
        Self::new(i128::from(value), -3, format)
    }

    /// Creates a quantity of `value` whole units.
    pub fn from_value(value: i64, format: Format) -> Self {
        Self::new(i128::from(value), 0, format)
    }

    fn new(mantissa: i128, exponent: i32, format: Format) -> Self {
        let (mantissa, exponent) = round_up_to_nano(mantissa, exponent);
        let (mantissa, exponent) = normalize(mantissa, exponent);

        Self {
            mantissa,
            exponent,
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Returns `ceil(self)`, saturating at the bounds of [`i64`].
    pub fn value(&self) -> i64 {
        self.scaled_ceil(0)
    }

    /// Returns `ceil(self * 1000)`, saturating at the bounds of [`i64`].
    pub fn milli_value(&self) -> i64 {
        self.scaled_ceil(-3)
    }

    /// Returns `ceil(self * 10^-scale)` saturated into [`i64`].
    fn scaled_ceil(&self, scale: i32) -> i64 {
        let shift = self.exponent.saturating_sub(scale);

        let scaled = if shift >= 0 {
            pow10(shift.unsigned_abs())
                .and_then(|factor| self.mantissa.checked_mul(factor))
                .unwrap_or(if self.mantissa.is_negative() {
                    i128::MIN
                } else {
                    i128::MAX
                })
        } else {
            match pow10(shift.unsigned_abs()) {
                Some(divisor) => {
                    let quotient = self.mantissa.div_euclid(divisor);
                    if self.mantissa.rem_euclid(divisor) == 0 {
                        quotient
                    } else {
                        quotient + 1
                    }
                }
                // The divisor exceeds every representable mantissa, so only the sign is left.
                None => i128::from(self.mantissa > 0),
            }
        };

        i64::try_from(scaled).unwrap_or(if scaled.is_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    /// Returns the mantissa rescaled to the (smaller or equal) `exponent`, or [`None`] on
    /// overflow.
    fn mantissa_at(&self, exponent: i32) -> Option<i128> {
        let shift = u32::try_from(self.exponent.checked_sub(exponent)?).ok()?;
        self.mantissa.checked_mul(pow10(shift)?)
    }

    /// Returns the integral value if the quantity has no fractional part and fits.
    fn as_integer(&self) -> Option<i128> {
        if self.exponent < 0 {
            return None;
        }

        self.mantissa_at(0)
    }

    fn fmt_binary_si(value: i128, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut amount = value;
        let mut multiple = None;

        for candidate in BinaryMultiple::ALL {
            if amount % 1024 != 0 {
                break;
            }

            amount /= 1024;
            multiple = Some(candidate);
        }

        match multiple {
            Some(multiple) => write!(f, "{amount}{multiple}"),
            None => write!(f, "{amount}"),
        }
    }

    fn fmt_decimal(&self, format: Format, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The exponent is lowered to the next multiple of three so that it maps onto a suffix.
        let remainder = self.exponent.rem_euclid(3);
        let Some(mantissa) = pow10(remainder.unsigned_abs())
            .and_then(|factor| self.mantissa.checked_mul(factor))
        else {
            return write!(f, "{}e{}", self.mantissa, self.exponent);
        };
        let exponent = self.exponent - remainder;

        if exponent == 0 {
            return write!(f, "{mantissa}");
        }

        match (format, DecimalMultiple::from_exponent(exponent)) {
            (Format::DecimalExponent, _) | (_, None) => write!(f, "{mantissa}e{exponent}"),
            (_, Some(multiple)) => write!(f, "{mantissa}{multiple}"),
        }
    }
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ensure!(!input.is_empty() && input.is_ascii(), InvalidFormatSnafu);

        let (negative, unsigned) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input.strip_prefix('+').unwrap_or(input)),
        };

        let suffix_index = unsigned
            .find(|c: char| c != '.' && !c.is_ascii_digit())
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(suffix_index);

        let (mut mantissa, mut exponent) = parse_decimal(number, input)?;

        let format = match Suffix::from_str(suffix).context(InvalidSuffixSnafu)? {
            Suffix::None => Format::DecimalSI,
            Suffix::DecimalMultiple(multiple) => {
                exponent = exponent
                    .checked_add(multiple.exponent())
                    .context(TooLargeSnafu { input })?;
                Format::DecimalSI
            }
            Suffix::BinaryMultiple(multiple) => {
                mantissa = mantissa
                    .checked_mul(multiple.factor())
                    .context(TooLargeSnafu { input })?;
                Format::BinarySI
            }
            Suffix::DecimalExponent(shift) => {
                exponent = exponent
                    .checked_add(shift)
                    .context(TooLargeSnafu { input })?;
                Format::DecimalExponent
            }
        };

        if negative {
            mantissa = -mantissa;
        }

        Ok(Self::new(mantissa, exponent, format))
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mantissa == 0 {
            return f.write_char('0');
        }

        // Small or fractional binary quantities are printed as decimal to avoid confusion and
        // precision loss, e.g. 0.5Ki becomes 512 and 100m stays 100m.
        if self.format == Format::BinarySI {
            if let Some(value) = self.as_integer().filter(|value| value.abs() >= 1024) {
                return Self::fmt_binary_si(value, f);
            }

            return self.fmt_decimal(Format::DecimalSI, f);
        }

        self.fmt_decimal(self.format, f)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        let signs = self.mantissa.signum().cmp(&other.mantissa.signum());
        if signs != Ordering::Equal || self.mantissa == 0 {
            return signs;
        }

        let exponent = self.exponent.min(other.exponent);
        match (self.mantissa_at(exponent), other.mantissa_at(exponent)) {
            (Some(lhs), Some(rhs)) => lhs.cmp(&rhs),
            // Only the operand with the bigger exponent is scaled up, so an overflow means it has
            // the bigger magnitude. Both operands have the same sign at this point.
            (None, _) if self.mantissa > 0 => Ordering::Greater,
            (None, _) => Ordering::Less,
            (_, None) if other.mantissa > 0 => Ordering::Less,
            (_, None) => Ordering::Greater,
        }
    }
}

impl From<Quantity> for K8sQuantity {
    fn from(value: Quantity) -> Self {
        K8sQuantity(value.to_string())
    }
}

impl From<&Quantity> for K8sQuantity {
    fn from(value: &Quantity) -> Self {
        K8sQuantity(value.to_string())
    }
}

impl TryFrom<K8sQuantity> for Quantity {
    type Error = ParseQuantityError;

    fn try_from(value: K8sQuantity) -> Result<Self, Self::Error> {
        Self::from_str(&value.0)
    }
}

impl TryFrom<&K8sQuantity> for Quantity {
    type Error = ParseQuantityError;

    fn try_from(value: &K8sQuantity) -> Result<Self, Self::Error> {
        Self::from_str(&value.0)
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a valid quantity")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Quantity::from_str(v).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(QuantityVisitor)
    }
}

fn pow10(exponent: u32) -> Option<i128> {
    10i128.checked_pow(exponent)
}

/// Parses `<digits>[.<digits>]` into a mantissa and a (negative) exponent.
fn parse_decimal(number: &str, input: &str) -> Result<(i128, i32), ParseQuantityError> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    ensure!(
        !(whole.is_empty() && fraction.is_empty()) && !fraction.contains('.'),
        InvalidNumberSnafu { input }
    );

    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|mantissa| mantissa.checked_add(i128::from(digit - b'0')))
            .context(TooLargeSnafu { input })?;
    }

    let exponent = i32::try_from(fraction.len())
        .ok()
        .context(TooLargeSnafu { input })?;

    Ok((mantissa, -exponent))
}

/// Rounds away from zero to nano precision.
fn round_up_to_nano(mantissa: i128, exponent: i32) -> (i128, i32) {
    if exponent >= MIN_EXPONENT {
        return (mantissa, exponent);
    }

    let shift = MIN_EXPONENT.abs_diff(exponent);
    let rounded = match pow10(shift) {
        Some(divisor) => {
            let quotient = mantissa / divisor;
            if mantissa % divisor == 0 {
                quotient
            } else {
                quotient + mantissa.signum()
            }
        }
        None => mantissa.signum(),
    };

    (rounded, MIN_EXPONENT)
}

/// Strips trailing zeros from the mantissa so that equal values share a representation.
fn normalize(mut mantissa: i128, mut exponent: i32) -> (i128, i32) {
    if mantissa == 0 {
        return (0, 0);
    }

    while mantissa % 10 == 0 {
        mantissa /= 10;
        exponent = exponent.saturating_add(1);
    }

    (mantissa, exponent)
}
