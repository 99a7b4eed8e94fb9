use thiserror::Error;

/// Errors produced by the compilation pipeline.
///
/// The three tiers deliberately propagate differently: lex/parse errors
/// abort their stage at the first malformed construct, semantic problems
/// are accumulated as [`crate::diagnostic::Diagnostic`]s and only folded
/// into `Semantic` by callers that treat them as fatal, and `Emit` marks
/// an internal inconsistency or unimplemented lowering in the back end.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("lex error at {line}:{column}: {message}")]
    Lex {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("semantic check failed:\n{0}")]
    Semantic(String),
    #[error("emit error: {0}")]
    Emit(String),
}
