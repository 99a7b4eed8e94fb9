//! The Opal semantic type system.
//!
//! The type set is closed: the checker and the back end both dispatch
//! exhaustively over it, so adding a variant is a compile-time signal
//! to revisit every consumer.

use core::fmt;

/// Type of a value or expression.
///
/// `Error` is the bottom/unknown type: it unifies with everything so
/// that one root-cause diagnostic does not cascade into an avalanche
/// of follow-on mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Error,
    Void,
    Bool,
    I32,
    String,
    Char,
}

impl SemanticType {
    /// Resolve a built-in type name. Struct names and anything else are
    /// the checker's business, not this table's.
    pub fn from_name(name: &str) -> Option<SemanticType> {
        match name {
            "i32" => Some(SemanticType::I32),
            "bool" => Some(SemanticType::Bool),
            "string" => Some(SemanticType::String),
            "char" => Some(SemanticType::Char),
            "()" => Some(SemanticType::Void),
            _ => None,
        }
    }

    /// Compatibility used everywhere the checker compares types:
    /// `Error` absorbs both sides, otherwise exact equality.
    pub fn matches(self, other: SemanticType) -> bool {
        self == SemanticType::Error || other == SemanticType::Error || self == other
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Error => "<error>",
            SemanticType::Void => "()",
            SemanticType::Bool => "bool",
            SemanticType::I32 => "i32",
            SemanticType::String => "string",
            SemanticType::Char => "char",
        };
        f.write_str(name)
    }
}

/// A function's externally visible shape, independent of its body.
///
/// Built once per compilation unit by the checker and read thereafter
/// by the code generator; a variadic signature only constrains the
/// fixed parameter prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<SemanticType>,
    pub ret: SemanticType,
    pub variadic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_type_names() {
        assert_eq!(SemanticType::from_name("i32"), Some(SemanticType::I32));
        assert_eq!(SemanticType::from_name("()"), Some(SemanticType::Void));
        assert_eq!(SemanticType::from_name("Point"), None);
    }

    #[test]
    fn error_type_absorbs_mismatches() {
        assert!(SemanticType::Error.matches(SemanticType::I32));
        assert!(SemanticType::Bool.matches(SemanticType::Error));
        assert!(!SemanticType::Bool.matches(SemanticType::I32));
    }

    #[test]
    fn displays_surface_names() {
        assert_eq!(SemanticType::I32.to_string(), "i32");
        assert_eq!(SemanticType::Void.to_string(), "()");
        assert_eq!(SemanticType::Error.to_string(), "<error>");
    }
}
