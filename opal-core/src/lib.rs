//! Core compiler pipeline for the Opal language.
//!
//! The pipeline is roughly:
//!
//!   source .opal
//!     -> lexer        (tokens)
//!     -> parser       (AST)
//!     -> typecheck    (diagnostics + function signatures)
//!     -> codegen_wasm (wasm-encoder module + string table)
//!
//! Higher-level tools (CLI, runners, etc.) should depend on this crate
//! rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic layer: types and the two-pass checker
// ---------------------------------------------------------------------

pub mod types;
pub mod typecheck;

// ---------------------------------------------------------------------
// Builtins, code generation, and compiler orchestration
// ---------------------------------------------------------------------

pub mod builtins;
pub mod codegen_wasm;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompilationArtifact, analyze, compile};
pub use diagnostic::Diagnostic;
pub use error::CoreError;
pub use types::{FunctionSignature, SemanticType};
