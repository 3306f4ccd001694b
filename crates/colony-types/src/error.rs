//! Error types for simulated calendar arithmetic.

/// Errors produced when constructing or advancing a simulated time value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeError {
    /// A calendar field is outside its valid range.
    #[error("invalid calendar field {field}: {value}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for diagnostics.
        value: String,
    },

    /// Elapsed amounts must be finite and non-negative; clocks never rewind.
    #[error("invalid elapsed amount: {amount} millisols")]
    InvalidElapsed {
        /// The rejected amount.
        amount: f64,
    },

    /// The calendar would advance beyond its representable range.
    #[error("simulated time overflow")]
    Overflow,
}
