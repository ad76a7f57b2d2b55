use std::str::FromStr;

use snafu::Snafu;

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("failed to parse {input:?} as quantity suffix"))]
pub struct ParseSuffixError {
    input: String,
}

/// The suffix of a quantity as written in its serialized form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suffix {
    /// No suffix, the number is taken as is.
    None,
    BinaryMultiple(BinaryMultiple),
    DecimalMultiple(DecimalMultiple),

    /// Scientific notation, e.g. the `e3` in `1.5e3`.
    DecimalExponent(i32),
}

impl FromStr for Suffix {
    type Err = ParseSuffixError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Ok(Self::None);
        }

        if let Ok(binary) = BinaryMultiple::from_str(input) {
            return Ok(Self::BinaryMultiple(binary));
        }

        // NOTE: A lone "E" is the exa multiple, which is why this is checked before the exponent.
        if let Ok(decimal) = DecimalMultiple::from_str(input) {
            return Ok(Self::DecimalMultiple(decimal));
        }

        if let Some(Ok(exponent)) = input.strip_prefix(['e', 'E']).map(i32::from_str) {
            return Ok(Self::DecimalExponent(exponent));
        }

        ParseSuffixSnafu { input }.fail()
    }
}

/// The serialization format of a quantity. It is derived from the suffix the quantity was parsed
/// from and decides how the quantity is printed again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum Format {
    /// Powers of ten with SI suffixes, e.g. `100m` or `2k`.
    #[default]
    DecimalSI,

    /// Powers of 1024, e.g. `128Mi`.
    BinarySI,

    /// Scientific notation, e.g. `1e3`.
    DecimalExponent,
}

/// Supported byte-multiples based on powers of 2.
///
/// These units are defined in IEC 80000-13 and are supported by other standards bodies like NIST.
/// The following list contains examples using the official units which Kubernetes adopted with
/// slight changes (mentioned in parentheses).
///
/// ```plain
/// - 1024^1, KiB (Ki), Kibibyte
/// - 1024^2, MiB (Mi), Mebibyte
/// - 1024^3, GiB (Gi), Gibibyte
/// - 1024^4, TiB (Ti), Tebibyte
/// - 1024^5, PiB (Pi), Pebibyte
/// - 1024^6, EiB (Ei), Exbibyte
/// ```
///
/// All units bigger than Exbibyte are not a valid suffix according to the [Kubernetes serialization
/// format][k8s-serialization-format].
///
/// [k8s-serialization-format]: https://github.com/kubernetes/apimachinery/blob/8c60292e48e46c4faa1e92acb232ce6adb37512c/pkg/api/resource/quantity.go#L37-L59
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum BinaryMultiple {
    #[strum(serialize = "Ki")]
    Kibi,

    #[strum(serialize = "Mi")]
    Mebi,

    #[strum(serialize = "Gi")]
    Gibi,

    #[strum(serialize = "Ti")]
    Tebi,

    #[strum(serialize = "Pi")]
    Pebi,

    #[strum(serialize = "Ei")]
    Exbi,
}

impl BinaryMultiple {
    /// All multiples, from the smallest to the largest.
    pub const ALL: [Self; 6] = [
        Self::Kibi,
        Self::Mebi,
        Self::Gibi,
        Self::Tebi,
        Self::Pebi,
        Self::Exbi,
    ];

    /// Returns the exponent based on powers of 2.
    pub fn exponent(self) -> u32 {
        match self {
            Self::Kibi => 10,
            Self::Mebi => 20,
            Self::Gibi => 30,
            Self::Tebi => 40,
            Self::Pebi => 50,
            Self::Exbi => 60,
        }
    }

    pub fn factor(self) -> i128 {
        1 << self.exponent()
    }
}

/// Supported multiples based on powers of 10.
///
/// Kubernetes uses the shortened SI units. It should also be noted that there is an inconsistency
/// in the format Kubernetes uses: kilo uses 'k' while all bigger multiples are upper case.
///
/// ```plain
/// - 1000^-3, (n): nano
/// - 1000^-2, (u): micro
/// - 1000^-1, (m): milli
/// - 1000^ 1, (k): kilo
/// - 1000^ 2, (M): Mega
/// - 1000^ 3, (G): Giga
/// - 1000^ 4, (T): Tera
/// - 1000^ 5, (P): Peta
/// - 1000^ 6, (E): Exa
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum DecimalMultiple {
    #[strum(serialize = "n")]
    Nano,

    #[strum(serialize = "u")]
    Micro,

    #[strum(serialize = "m")]
    Milli,

    #[strum(serialize = "k")]
    Kilo,

    #[strum(serialize = "M")]
    Mega,

    #[strum(serialize = "G")]
    Giga,

    #[strum(serialize = "T")]
    Tera,

    #[strum(serialize = "P")]
    Peta,

    #[strum(serialize = "E")]
    Exa,
}

impl DecimalMultiple {
    /// Returns the exponent based on powers of 10.
    pub fn exponent(self) -> i32 {
        match self {
            Self::Nano => -9,
            Self::Micro => -6,
            Self::Milli => -3,
            Self::Kilo => 3,
            Self::Mega => 6,
            Self::Giga => 9,
            Self::Tera => 12,
            Self::Peta => 15,
            Self::Exa => 18,
        }
    }

    /// Returns the multiple for the given power of 10, if there is one.
    pub fn from_exponent(exponent: i32) -> Option<Self> {
        match exponent {
            -9 => Some(Self::Nano),
            -6 => Some(Self::Micro),
            -3 => Some(Self::Milli),
            3 => Some(Self::Kilo),
            6 => Some(Self::Mega),
            9 => Some(Self::Giga),
            12 => Some(Self::Tera),
            15 => Some(Self::Peta),
            18 => Some(Self::Exa),
            _ => None,
        }
    }
}
