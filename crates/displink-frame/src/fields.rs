//! Typed W12 field values.

use std::fmt;
use std::str::FromStr;

use crate::error::FieldError;

macro_rules! selector_table {
    (@first $first:literal $(, $rest:literal)*) => { $first };
    ($ty:ident, $field:literal, { $($variant:ident = $value:literal => [$($name:literal),+]),+ $(,)? }) => {
        impl $ty {
            /// Numeric selector value.
            pub fn as_u8(self) -> u8 {
                match self {
                    $($ty::$variant => $value,)+
                }
            }

            /// ASCII digit placed on the wire.
            pub fn as_digit(self) -> u8 {
                b'0' + self.as_u8()
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => selector_table!(@first $($name),+),)+
                }
            }

            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];
        }

        impl TryFrom<u8> for $ty {
            type Error = FieldError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($ty::$variant),)+
                    _ => Err(FieldError::OutOfRange {
                        field: $field,
                        value,
                        max: ($ty::ALL.len() - 1) as u8,
                    }),
                }
            }
        }

        /// Accepts the selector digit or any of its names.
        impl FromStr for $ty {
            type Err = FieldError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.trim().to_ascii_lowercase();
                if let Ok(value) = lowered.parse::<u8>() {
                    return $ty::try_from(value);
                }
                match lowered.as_str() {
                    $($($name)|+ => Ok($ty::$variant),)+
                    _ => Err(FieldError::UnknownName {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

/// Display language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    Portuguese,
    English,
    Spanish,
}

selector_table!(Language, "language", {
    Portuguese = 0 => ["pt", "portuguese"],
    English = 1 => ["en", "english"],
    Spanish = 2 => ["es", "spanish"],
});

/// Text shown above the weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Message {
    #[default]
    Weight,
    Stop,
    Wait,
    Go,
}

selector_table!(Message, "message", {
    Weight = 0 => ["weight"],
    Stop = 1 => ["stop"],
    Wait = 2 => ["wait"],
    Go = 3 => ["go"],
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SemaphoreColor {
    #[default]
    Off,
    Green,
    Red,
    Yellow,
}

selector_table!(SemaphoreColor, "semaphore color", {
    Off = 0 => ["off"],
    Green = 1 => ["green"],
    Red = 2 => ["red"],
    Yellow = 3 => ["yellow"],
});

impl SemaphoreColor {
    /// Color from the low two bits of `value`; higher bits are ignored.
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0 => SemaphoreColor::Off,
            1 => SemaphoreColor::Green,
            2 => SemaphoreColor::Red,
            _ => SemaphoreColor::Yellow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BargraphDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

selector_table!(BargraphDirection, "bargraph direction", {
    LeftToRight = 0 => ["ltr", "left-to-right"],
    RightToLeft = 1 => ["rtl", "right-to-left"],
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WeightSign {
    #[default]
    Plus,
    Minus,
}

impl WeightSign {
    pub fn as_char(self) -> char {
        match self {
            WeightSign::Plus => '+',
            WeightSign::Minus => '-',
        }
    }
}

impl TryFrom<char> for WeightSign {
    type Error = FieldError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '+' => Ok(WeightSign::Plus),
            '-' => Ok(WeightSign::Minus),
            other => Err(FieldError::InvalidSign(other)),
        }
    }
}

impl FromStr for WeightSign {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => WeightSign::try_from(c),
            _ => Err(FieldError::UnknownName {
                field: "weight sign",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for WeightSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One traffic light: color plus blink flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Semaphore {
    pub color: SemaphoreColor,
    pub blink: bool,
}

impl Semaphore {
    pub const BLINK_BIT: u8 = 1 << 7;

    pub fn new(color: SemaphoreColor, blink: bool) -> Self {
        Self { color, blink }
    }

    /// Wire byte: color in bits 0-1, blink in bit 7.
    pub fn to_byte(self) -> u8 {
        let blink = if self.blink { Self::BLINK_BIT } else { 0 };
        self.color.as_u8() | blink
    }
}

/// Everything one display update carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct W12Fields {
    pub language: Language,
    pub message: Message,
    pub left: Semaphore,
    pub right: Semaphore,
    pub sign: WeightSign,
    /// Up to six characters, e.g. `123.45`.
    pub weight: String,
    /// Up to two characters, e.g. `kg`.
    pub unit: String,
    pub bargraph_direction: BargraphDirection,
    /// 0-96 on the physical display.
    pub bargraph_value: u8,
}
