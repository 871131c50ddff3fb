/// Errors raised while turning user input into W12 field values.
///
/// Building a frame from typed fields never fails; these only come from the
/// conversions into those types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// A numeric selector is outside the field's table.
    #[error("{field} selector {value} out of range (0..={max})")]
    OutOfRange {
        field: &'static str,
        value: u8,
        max: u8,
    },

    /// A selector name matched no entry.
    #[error("unknown {field} {value:?}")]
    UnknownName { field: &'static str, value: String },

    /// The weight sign is neither `+` nor `-`.
    #[error("invalid weight sign {0:?} (expected '+' or '-')")]
    InvalidSign(char),
}

pub type Result<T> = std::result::Result<T, FieldError>;
