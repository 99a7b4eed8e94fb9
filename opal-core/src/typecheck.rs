//! Two-pass semantic checker for Opal.
//!
//! Pass 1 registers every function signature (and struct shape) so that
//! bodies can call forward. Pass 2 walks each body inferring a type for
//! every expression. Checking never aborts: all failures become
//! [`Diagnostic`]s, appended in discovery order, and the `Error` type
//! absorbs further comparisons so one root cause is reported once.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{
    Block, CompilationUnit, Decl, Expr, FunctionBody, FunctionDecl, Literal, LiteralKind,
    Pattern, Stmt, StructDecl, VariableDecl,
};
use crate::builtins;
use crate::diagnostic::Diagnostic;
use crate::types::{FunctionSignature, SemanticType};

/// Outcome of checking one compilation unit.
///
/// Always complete: functions with defects still get a best-effort
/// signature so later stages do not cascade spuriously. The caller
/// decides whether diagnostics are fatal.
#[derive(Debug)]
pub struct SemanticResult {
    pub diagnostics: Vec<Diagnostic>,
    pub functions: BTreeMap<String, FunctionSignature>,
}

impl SemanticResult {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Check a compilation unit, producing diagnostics and the function table.
pub fn check(unit: &CompilationUnit) -> SemanticResult {
    let mut checker = Checker::default();
    checker.run(unit);
    SemanticResult {
        diagnostics: checker.diagnostics,
        functions: checker.functions,
    }
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
    functions: BTreeMap<String, FunctionSignature>,
    structs: BTreeMap<String, Vec<(String, SemanticType)>>,
}

impl Checker {
    fn run(&mut self, unit: &CompilationUnit) {
        for builtin in builtins::signatures() {
            self.functions.insert(builtin.name.clone(), builtin);
        }

        self.collect_structs(unit);
        self.collect_function_signatures(unit);

        for decl in &unit.declarations {
            match decl {
                Decl::Function(f) => self.check_function(f),
                Decl::Variable(v) => self.check_top_level_variable(v),
                Decl::Struct(_) => {}
            }
        }
    }

    fn error(&mut self, message: String) {
        self.diagnostics.push(Diagnostic::new(message));
    }

    // Struct names are collected before field types resolve so that
    // fields may reference structs declared later in the unit.
    fn collect_structs(&mut self, unit: &CompilationUnit) {
        for decl in &unit.declarations {
            if let Decl::Struct(StructDecl { name, .. }) = decl {
                if self.structs.contains_key(name) {
                    self.error(format!("Duplicate struct '{name}'."));
                } else {
                    self.structs.insert(name.clone(), Vec::new());
                }
            }
        }

        for decl in &unit.declarations {
            if let Decl::Struct(s) = decl {
                let mut fields = Vec::with_capacity(s.fields.len());
                for field in &s.fields {
                    let ty = self.resolve_type_name(&field.type_name);
                    fields.push((field.name.clone(), ty));
                }
                if let Some(entry) = self.structs.get_mut(&s.name) {
                    if entry.is_empty() {
                        *entry = fields;
                    }
                }
            }
        }
    }

    fn collect_function_signatures(&mut self, unit: &CompilationUnit) {
        for decl in &unit.declarations {
            let Decl::Function(f) = decl else { continue };

            if self.functions.contains_key(&f.name) {
                self.error(format!("Duplicate function '{}'.", f.name));
                continue;
            }

            let mut params = Vec::with_capacity(f.params.len());
            for param in &f.params {
                let ty = self.resolve_type_name(&param.type_name);
                params.push(ty);
            }

            // A missing annotation starts as Error and is refined once
            // the body has been inferred in pass 2.
            let ret = match &f.return_type {
                Some(name) => self.resolve_type_name(name),
                None => SemanticType::Error,
            };

            self.functions.insert(
                f.name.clone(),
                FunctionSignature {
                    name: f.name.clone(),
                    params,
                    ret,
                    variadic: false,
                },
            );
        }
    }

    /// Resolve a declared type name, reporting unknown names. A name
    /// that matches a declared struct is opaque: struct identity does
    /// not flow through inference, so it resolves to `Error` silently.
    fn resolve_type_name(&mut self, name: &str) -> SemanticType {
        if let Some(ty) = SemanticType::from_name(name) {
            return ty;
        }
        if self.structs.contains_key(name) {
            return SemanticType::Error;
        }
        self.error(format!("Unknown type '{name}'."));
        SemanticType::Error
    }

    /// Same resolution without diagnostics, for pass-2 re-reads of
    /// names pass 1 already reported.
    fn lookup_type_name(&self, name: &str) -> SemanticType {
        SemanticType::from_name(name).unwrap_or(SemanticType::Error)
    }

    fn check_function(&mut self, f: &FunctionDecl) {
        let mut scope = Scope::new();

        for param in &f.params {
            let ty = self.lookup_type_name(&param.type_name);
            if !scope.declare(&param.name, ty) {
                self.error(format!(
                    "Duplicate parameter '{}' in function '{}'.",
                    param.name, f.name
                ));
            }
        }

        let declared = f.return_type.as_deref().map(|n| self.lookup_type_name(n));

        match &f.body {
            FunctionBody::Expr(expr) => {
                let actual = self.infer_expr(expr, &mut scope);
                match declared {
                    None => self.update_return_type(&f.name, actual),
                    Some(expected) if !expected.matches(actual) => self.error(format!(
                        "Function '{}' expects return type '{expected}' but expression body is '{actual}'.",
                        f.name
                    )),
                    Some(_) => {}
                }
            }
            FunctionBody::Block(block) => {
                let last = self.infer_block(block, &mut scope);
                match declared {
                    None => self.update_return_type(&f.name, last),
                    // A declared () return ignores the trailing value.
                    Some(expected)
                        if expected != SemanticType::Void && !expected.matches(last) =>
                    {
                        self.error(format!(
                            "Function '{}' expects return type '{expected}' but block returns '{last}'.",
                            f.name
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    fn update_return_type(&mut self, name: &str, inferred: SemanticType) {
        if let Some(sig) = self.functions.get_mut(name) {
            sig.ret = inferred;
        }
    }

    fn check_top_level_variable(&mut self, variable: &VariableDecl) {
        let declared = variable
            .type_name
            .as_deref()
            .map(|n| self.resolve_type_name(n));

        if let Some(init) = &variable.initializer {
            let mut scope = Scope::new();
            let actual = self.infer_expr(init, &mut scope);
            if let Some(declared) = declared {
                if !declared.matches(actual) {
                    self.error(format!(
                        "Top-level variable '{}' declared as '{declared}' but initialized with '{actual}'.",
                        variable.name
                    ));
                }
            }
        }
    }

    /// The type of a block is the type of its last expression
    /// statement; Void when it is empty or ends in a variable statement.
    fn infer_block(&mut self, block: &Block, scope: &mut Scope) -> SemanticType {
        scope.push();
        let mut last = SemanticType::Void;

        for stmt in &block.statements {
            match stmt {
                Stmt::Variable(v) => {
                    self.check_variable_stmt(v, scope);
                    last = SemanticType::Void;
                }
                Stmt::Expr(e) => {
                    last = self.infer_expr(e, scope);
                }
            }
        }

        scope.pop();
        last
    }

    fn check_variable_stmt(&mut self, variable: &VariableDecl, scope: &mut Scope) {
        let declared = variable
            .type_name
            .as_deref()
            .map(|n| self.resolve_type_name(n));

        let actual = variable
            .initializer
            .as_ref()
            .map(|init| self.infer_expr(init, scope));

        let final_type = match (declared, actual) {
            (Some(declared), Some(actual)) => {
                if !declared.matches(actual) {
                    self.error(format!(
                        "Variable '{}' declared as '{declared}' but initialized with '{actual}'.",
                        variable.name
                    ));
                }
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(actual)) => actual,
            (None, None) => {
                self.error(format!(
                    "Variable '{}' needs a type annotation or initializer.",
                    variable.name
                ));
                SemanticType::Error
            }
        };

        if !scope.declare(&variable.name, final_type) {
            self.error(format!(
                "Variable '{}' is already defined in this scope.",
                variable.name
            ));
        }
    }

    fn infer_expr(&mut self, expr: &Expr, scope: &mut Scope) -> SemanticType {
        match expr {
            Expr::Identifier(name) => match scope.lookup(name) {
                Some(ty) => ty,
                None => {
                    self.error(format!("Unknown identifier '{name}'."));
                    SemanticType::Error
                }
            },

            Expr::Literal(literal) => literal_type(literal),

            Expr::Unary { operator, operand } => {
                let operand_ty = self.infer_expr(operand, scope);
                match operator.as_str() {
                    "!" => {
                        if !SemanticType::Bool.matches(operand_ty) {
                            self.error(format!(
                                "Operator '!' requires bool but got '{operand_ty}'."
                            ));
                        }
                        SemanticType::Bool
                    }
                    "-" => {
                        if !SemanticType::I32.matches(operand_ty) {
                            self.error(format!("Unary '-' requires i32 but got '{operand_ty}'."));
                        }
                        SemanticType::I32
                    }
                    other => {
                        self.error(format!("Unsupported unary operator '{other}'."));
                        SemanticType::Error
                    }
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left_ty = self.infer_expr(left, scope);
                let right_ty = self.infer_expr(right, scope);
                self.infer_binary(operator, left_ty, right_ty)
            }

            Expr::Group(inner) => self.infer_expr(inner, scope),

            Expr::Block(block) => self.infer_block(block, scope),

            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => {
                let cond_ty = self.infer_expr(condition, scope);
                if !SemanticType::Bool.matches(cond_ty) {
                    self.error(format!("If condition must be bool, got '{cond_ty}'."));
                }

                let then_ty = self.infer_expr(then_expr, scope);
                let Some(else_expr) = else_expr else {
                    // Without an else arm the construct never produces
                    // a value, whatever the then branch infers to.
                    return SemanticType::Void;
                };

                let else_ty = self.infer_expr(else_expr, scope);
                if !then_ty.matches(else_ty) {
                    self.error(format!(
                        "If branches must have the same type, got '{then_ty}' and '{else_ty}'."
                    ));
                    return SemanticType::Error;
                }
                then_ty
            }

            Expr::Call { callee, arguments } => self.infer_call(callee, arguments, scope),

            Expr::MemberAccess { member, .. } => {
                self.error(format!(
                    "Member access '{member}' is not type-checked yet."
                ));
                SemanticType::Error
            }

            Expr::Match { scrutinee, arms } => self.infer_match(scrutinee, arms, scope),

            Expr::StructLiteral {
                struct_name,
                fields,
            } => self.infer_struct_literal(struct_name, fields, scope),
        }
    }

    fn infer_binary(
        &mut self,
        operator: &str,
        left: SemanticType,
        right: SemanticType,
    ) -> SemanticType {
        match operator {
            "+" | "-" | "*" | "/" | "%" => {
                self.require_both(operator, SemanticType::I32, left, right, SemanticType::I32)
            }
            "==" | "!=" => {
                if !left.matches(right) {
                    self.error(format!(
                        "Operator '{operator}' requires both sides to match, got '{left}' and '{right}'."
                    ));
                    return SemanticType::Error;
                }
                SemanticType::Bool
            }
            "<" | "<=" | ">" | ">=" => {
                self.require_both(operator, SemanticType::I32, left, right, SemanticType::Bool)
            }
            "&&" | "||" => {
                self.require_both(operator, SemanticType::Bool, left, right, SemanticType::Bool)
            }
            other => {
                self.error(format!("Unsupported operator '{other}'."));
                SemanticType::Error
            }
        }
    }

    fn require_both(
        &mut self,
        operator: &str,
        expected: SemanticType,
        left: SemanticType,
        right: SemanticType,
        result: SemanticType,
    ) -> SemanticType {
        if !expected.matches(left) || !expected.matches(right) {
            self.error(format!(
                "Operator '{operator}' expects '{expected}' operands but got '{left}' and '{right}'."
            ));
            return SemanticType::Error;
        }
        result
    }

    fn infer_call(&mut self, callee: &Expr, arguments: &[Expr], scope: &mut Scope) -> SemanticType {
        let Expr::Identifier(name) = callee else {
            self.error(
                "Only simple function calls are supported (callee must be an identifier)."
                    .to_string(),
            );
            return SemanticType::Error;
        };

        let Some(signature) = self.functions.get(name).cloned() else {
            self.error(format!("Unknown function '{name}'."));
            return SemanticType::Error;
        };

        if !signature.variadic && signature.params.len() != arguments.len() {
            self.error(format!(
                "Function '{name}' expects {} arguments but got {}.",
                signature.params.len(),
                arguments.len()
            ));
        }

        // Variadic signatures only constrain the fixed prefix.
        let check_count = arguments.len().min(signature.params.len());
        for i in 0..check_count {
            let arg_ty = self.infer_expr(&arguments[i], scope);
            let expected = signature.params[i];
            if !expected.matches(arg_ty) {
                self.error(format!(
                    "Argument {} of '{name}' expects '{expected}' but got '{arg_ty}'.",
                    i + 1
                ));
            }
        }

        signature.ret
    }

    fn infer_match(
        &mut self,
        scrutinee: &Expr,
        arms: &[crate::ast::MatchArm],
        scope: &mut Scope,
    ) -> SemanticType {
        if arms.is_empty() {
            self.error("Match expression must have at least one arm.".to_string());
            return SemanticType::Error;
        }

        let scrutinee_ty = self.infer_expr(scrutinee, scope);
        let mut result: Option<SemanticType> = None;

        for (index, arm) in arms.iter().enumerate() {
            match &arm.pattern {
                Pattern::Wildcard => {
                    if index + 1 != arms.len() {
                        self.error("Wildcard match arm must be the last arm.".to_string());
                    }
                }
                Pattern::Literal(literal) => {
                    let pattern_ty = literal_type(literal);
                    if !pattern_ty.matches(scrutinee_ty) {
                        self.error(format!(
                            "Match pattern expects '{scrutinee_ty}' but pattern is '{pattern_ty}'."
                        ));
                    }
                }
            }

            let arm_ty = self.infer_expr(&arm.expr, scope);
            match result {
                None => result = Some(arm_ty),
                // Every arm must agree with the first arm's type.
                Some(first) if !first.matches(arm_ty) => {
                    self.error(format!(
                        "Match arms must have the same type, got '{first}' and '{arm_ty}'."
                    ));
                }
                Some(_) => {}
            }
        }

        result.unwrap_or(SemanticType::Error)
    }

    fn infer_struct_literal(
        &mut self,
        struct_name: &str,
        fields: &[crate::ast::StructFieldInit],
        scope: &mut Scope,
    ) -> SemanticType {
        let Some(declared_fields) = self.structs.get(struct_name).cloned() else {
            self.error(format!("Unknown struct '{struct_name}'."));
            for field in fields {
                self.infer_expr(&field.value, scope);
            }
            return SemanticType::Error;
        };

        let mut seen: Vec<&str> = Vec::with_capacity(fields.len());
        for field in fields {
            let value_ty = self.infer_expr(&field.value, scope);

            if seen.contains(&field.name.as_str()) {
                self.error(format!(
                    "Duplicate field '{}' in struct literal '{struct_name}'.",
                    field.name
                ));
                continue;
            }
            seen.push(&field.name);

            match declared_fields.iter().find(|(name, _)| *name == field.name) {
                None => self.error(format!(
                    "Unknown field '{}' in struct literal '{struct_name}'.",
                    field.name
                )),
                Some((_, expected)) => {
                    if !expected.matches(value_ty) {
                        self.error(format!(
                            "Field '{}' of struct '{struct_name}' expects '{expected}' but got '{value_ty}'.",
                            field.name
                        ));
                    }
                }
            }
        }

        for (name, _) in &declared_fields {
            if !seen.contains(&name.as_str()) {
                self.error(format!(
                    "Missing field '{name}' in struct literal '{struct_name}'."
                ));
            }
        }

        // Struct values are opaque to inference.
        SemanticType::Error
    }
}

fn literal_type(literal: &Literal) -> SemanticType {
    match literal.kind {
        LiteralKind::Integer => SemanticType::I32,
        LiteralKind::String | LiteralKind::BacktickString => SemanticType::String,
        LiteralKind::Char => SemanticType::Char,
        LiteralKind::True | LiteralKind::False => SemanticType::Bool,
        // Intentionally unsupported; the back end rejects any float
        // that survives to emission.
        LiteralKind::Float => SemanticType::Error,
    }
}

/// Chained lexical scopes as an explicit stack of frames: push on block
/// entry, pop on exit, lookup falls through from innermost outward.
struct Scope {
    frames: Vec<HashMap<String, SemanticType>>,
}

impl Scope {
    fn new() -> Self {
        Scope {
            frames: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    /// Declare in the innermost frame; false if the name already exists
    /// there. Shadowing an outer frame is allowed.
    fn declare(&mut self, name: &str, ty: SemanticType) -> bool {
        let frame = self.frames.last_mut().expect("scope has a frame");
        if frame.contains_key(name) {
            return false;
        }
        frame.insert(name.to_string(), ty);
        true
    }

    fn lookup(&self, name: &str) -> Option<SemanticType> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }
}
