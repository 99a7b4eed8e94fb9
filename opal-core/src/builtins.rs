//! Built-in functions and the host imports that back them.
//!
//! Opal has a single built-in today, the variadic `println`. It is
//! registered as an ordinary signature so call checking needs no
//! special case, and it lowers to the two host print functions below,
//! which a runner must provide under the `opal` import module.

use wasm_encoder::ValType;

use crate::ast::{
    Block, CompilationUnit, Decl, Expr, FunctionBody, Stmt,
};
use crate::types::{FunctionSignature, SemanticType};

/// Import module every host print function lives under.
pub const HOST_MODULE: &str = "opal";

/// Shape of one host function the emitted module may import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostImport {
    pub module: &'static str,
    pub name: &'static str,
    pub params: &'static [ValType],
    pub results: &'static [ValType],
}

/// Prints the string-table entry for the given handle.
pub const PRINT_STR: HostImport = HostImport {
    module: HOST_MODULE,
    name: "print_str",
    params: &[ValType::I32],
    results: &[],
};

/// Prints a decimal i32 (also used for bool and char arguments).
pub const PRINT_I32: HostImport = HostImport {
    module: HOST_MODULE,
    name: "print_i32",
    params: &[ValType::I32],
    results: &[],
};

/// Signatures pre-registered before user declarations are collected.
pub fn signatures() -> Vec<FunctionSignature> {
    vec![FunctionSignature {
        name: "println".to_string(),
        params: vec![SemanticType::String],
        ret: SemanticType::Void,
        variadic: true,
    }]
}

/// Whether any reachable position in the unit calls `println`. Imports
/// occupy the low function indices, so the back end must know this
/// before numbering user functions.
pub fn uses_println(unit: &CompilationUnit) -> bool {
    unit.declarations.iter().any(|decl| match decl {
        Decl::Function(f) => match &f.body {
            FunctionBody::Expr(expr) => expr_uses_println(expr),
            FunctionBody::Block(block) => block_uses_println(block),
        },
        Decl::Variable(v) => v
            .initializer
            .as_ref()
            .is_some_and(expr_uses_println),
        Decl::Struct(_) => false,
    })
}

fn block_uses_println(block: &Block) -> bool {
    block.statements.iter().any(|stmt| match stmt {
        Stmt::Expr(expr) => expr_uses_println(expr),
        Stmt::Variable(v) => v
            .initializer
            .as_ref()
            .is_some_and(expr_uses_println),
    })
}

fn expr_uses_println(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(_) | Expr::Literal(_) => false,
        Expr::Unary { operand, .. } => expr_uses_println(operand),
        Expr::Binary { left, right, .. } => {
            expr_uses_println(left) || expr_uses_println(right)
        }
        Expr::Call { callee, arguments } => {
            matches!(callee.as_ref(), Expr::Identifier(name) if name == "println")
                || expr_uses_println(callee)
                || arguments.iter().any(expr_uses_println)
        }
        Expr::MemberAccess { target, .. } => expr_uses_println(target),
        Expr::Group(inner) => expr_uses_println(inner),
        Expr::Block(block) => block_uses_println(block),
        Expr::If {
            condition,
            then_expr,
            else_expr,
        } => {
            expr_uses_println(condition)
                || expr_uses_println(then_expr)
                || else_expr.as_deref().is_some_and(expr_uses_println)
        }
        Expr::Match { scrutinee, arms } => {
            expr_uses_println(scrutinee)
                || arms.iter().any(|arm| expr_uses_println(&arm.expr))
        }
        Expr::StructLiteral { fields, .. } => {
            fields.iter().any(|field| expr_uses_println(&field.value))
        }
    }
}
