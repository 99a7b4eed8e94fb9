use core::fmt;

/// A single semantic finding.
///
/// Diagnostics are free text with no code or fix-it attached; tooling
/// keys off the message and the order in which the checking walk
/// discovered it, so both must stay stable for identical input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
