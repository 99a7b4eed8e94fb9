//! The compilation pipeline: lex, parse, check, emit.
//!
//! Lex and parse errors are fatal and positioned; semantic checking
//! accumulates diagnostics and only becomes fatal here, at the
//! boundary, so a caller that just wants analysis ([`analyze`]) still
//! sees every diagnostic at once.

use crate::codegen_wasm;
use crate::error::CoreError;
use crate::lexer::lex;
use crate::parser::parse;
use crate::typecheck::{self, SemanticResult};

/// Everything a runner needs: the wasm module and its side tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub wasm: Vec<u8>,
    /// String table backing `string` handles in the module.
    pub strings: Vec<String>,
    /// Whether the module imports the `opal` host print functions.
    pub uses_println: bool,
}

/// Run the front end only: lex, parse, and check, returning every
/// semantic diagnostic without treating them as fatal.
pub fn analyze(source: &str) -> Result<SemanticResult, CoreError> {
    let tokens = lex(source)?;
    let unit = parse(&tokens)?;
    Ok(typecheck::check(&unit))
}

/// Compile a source file to a wasm module exporting `main`.
pub fn compile(source: &str) -> Result<CompilationArtifact, CoreError> {
    let tokens = lex(source)?;
    let unit = parse(&tokens)?;

    let semantics = typecheck::check(&unit);
    if semantics.has_errors() {
        let joined = semantics
            .diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(CoreError::Semantic(joined));
    }

    let module = codegen_wasm::emit(&unit, &semantics)?;
    Ok(CompilationArtifact {
        wasm: module.wasm,
        strings: module.strings,
        uses_println: module.uses_println,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_complete_program_end_to_end() {
        let artifact = compile(
            "fn square(x: i32) -> i32 => x * x;\nfn main() -> i32 => square(6) + 6;",
        )
        .expect("compiles");

        wasmparser::Validator::new()
            .validate_all(&artifact.wasm)
            .expect("module validates");

        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, &artifact.wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let result = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("main export")
            .call(&mut store, ())
            .expect("main runs");
        assert_eq!(result, 42);
    }

    #[test]
    fn lex_errors_are_positioned() {
        let err = compile("fn main() -> i32 => 1 # 2;").expect_err("bad character");
        let message = err.to_string();
        assert!(message.starts_with("lex error at 1:23"), "{message}");
    }

    #[test]
    fn parse_errors_are_positioned() {
        let err = compile("fn main( -> i32 => 1;").expect_err("bad parameter list");
        assert!(err.to_string().starts_with("parse error at 1:10"));
    }

    #[test]
    fn semantic_errors_carry_every_diagnostic() {
        let err = compile(
            "fn main() -> i32 {\n var x: i32 = true;\n unknown(x);\n x\n}",
        )
        .expect_err("two diagnostics");
        let message = err.to_string();
        assert!(message.starts_with("semantic check failed:"));
        assert!(message.contains("Variable 'x' declared as 'i32' but initialized with 'bool'."));
        assert!(message.contains("Unknown function 'unknown'."));
    }

    #[test]
    fn analyze_reports_without_failing() {
        let semantics = analyze("fn main() -> i32 => missing;").expect("front end runs");
        assert!(semantics.has_errors());
        assert_eq!(semantics.diagnostics.len(), 1);
    }

    #[test]
    fn missing_entry_point_surfaces_as_an_emit_error() {
        let err = compile("fn helper() -> i32 => 1;").expect_err("no main");
        assert_eq!(err.to_string(), "emit error: Entry point 'main' was not found.");
    }
}
