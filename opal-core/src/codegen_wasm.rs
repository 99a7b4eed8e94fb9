//! Stack-machine code generation to WebAssembly.
//!
//! Every Opal value lowers to a single `i32`: bool as 0/1, char as its
//! UTF-16 code unit, string as a handle into the module's string table
//! (-1 is the null handle). Void produces no value. Instructions are
//! collected into a buffer per function so that the block type of an
//! `if` or `match` can be patched once the first branch has been
//! emitted; the buffer is replayed into the encoder afterwards, when
//! the scratch-local count is also final.
//!
//! Unlike the checker, this stage is fail-fast: anything the back end
//! cannot lower (struct literals, member access, floats, top-level
//! variables) is a hard [`CoreError::Emit`].

use std::collections::HashMap;

use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, Module, TypeSection, ValType,
};

use crate::ast::{
    Block, CompilationUnit, Decl, Expr, FunctionBody, FunctionDecl, Literal, LiteralKind,
    MatchArm, Pattern, Stmt, VariableDecl,
};
use crate::builtins::{self, HostImport, PRINT_I32, PRINT_STR};
use crate::error::CoreError;
use crate::typecheck::SemanticResult;
use crate::types::SemanticType;

/// An emitted wasm module plus the side tables a runner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub wasm: Vec<u8>,
    /// String table; a string value at runtime is an index in here.
    pub strings: Vec<String>,
    /// Whether the module imports the host print functions.
    pub uses_println: bool,
}

/// Lower a checked unit to a wasm module exporting `main`.
pub fn emit(unit: &CompilationUnit, semantics: &SemanticResult) -> Result<CompiledModule, CoreError> {
    for decl in &unit.declarations {
        if let Decl::Variable(v) = decl {
            return Err(CoreError::Emit(format!(
                "Top-level variable '{}' is not supported by the wasm back end.",
                v.name
            )));
        }
    }

    let uses_println = builtins::uses_println(unit);
    let imports: &[HostImport] = if uses_println {
        &[PRINT_STR, PRINT_I32]
    } else {
        &[]
    };

    let mut cx = ModuleCx {
        slots: HashMap::new(),
        strings: Vec::new(),
        string_indices: HashMap::new(),
        print_str_index: uses_println.then_some(0),
        print_i32_index: uses_println.then_some(1),
    };

    // Imports occupy the low function indices; user functions follow
    // in declaration order. Later duplicates were already diagnosed,
    // the first declaration wins here.
    let mut bodies: Vec<&FunctionDecl> = Vec::new();
    for decl in &unit.declarations {
        let Decl::Function(f) = decl else { continue };
        if cx.slots.contains_key(&f.name) {
            continue;
        }

        let params = f
            .params
            .iter()
            .map(|p| {
                let ty = SemanticType::from_name(&p.type_name).unwrap_or(SemanticType::Error);
                (p.name.clone(), ty)
            })
            .collect();
        let ret = semantics
            .functions
            .get(&f.name)
            .map(|sig| sig.ret)
            .unwrap_or(SemanticType::Error);

        let index = imports.len() as u32 + bodies.len() as u32;
        cx.slots.insert(f.name.clone(), MethodSlot { index, params, ret });
        bodies.push(f);
    }

    let mut types = TypeSection::new();
    for import in imports {
        types.ty().function(
            import.params.iter().copied(),
            import.results.iter().copied(),
        );
    }
    for f in &bodies {
        let slot = &cx.slots[&f.name];
        let params = vec![ValType::I32; slot.params.len()];
        let results: Vec<ValType> = value_type(slot.ret).into_iter().collect();
        types.ty().function(params, results);
    }

    let mut import_section = ImportSection::new();
    for (type_index, import) in imports.iter().enumerate() {
        import_section.import(
            import.module,
            import.name,
            EntityType::Function(type_index as u32),
        );
    }

    let mut functions = FunctionSection::new();
    for i in 0..bodies.len() {
        functions.function((imports.len() + i) as u32);
    }

    let main_index = cx
        .slots
        .get("main")
        .map(|slot| slot.index)
        .ok_or_else(|| CoreError::Emit("Entry point 'main' was not found.".to_string()))?;
    let mut exports = ExportSection::new();
    exports.export("main", ExportKind::Func, main_index);

    let mut code = CodeSection::new();
    for f in &bodies {
        let function = emit_function(f, &mut cx)?;
        code.function(&function);
    }

    let mut module = Module::new();
    module.section(&types);
    if !imports.is_empty() {
        module.section(&import_section);
    }
    module.section(&functions);
    module.section(&exports);
    module.section(&code);

    Ok(CompiledModule {
        wasm: module.finish(),
        strings: cx.strings,
        uses_println,
    })
}

struct MethodSlot {
    index: u32,
    params: Vec<(String, SemanticType)>,
    ret: SemanticType,
}

struct ModuleCx {
    slots: HashMap<String, MethodSlot>,
    strings: Vec<String>,
    string_indices: HashMap<String, i32>,
    print_str_index: Option<u32>,
    print_i32_index: Option<u32>,
}

impl ModuleCx {
    /// Deduplicating interner: equal contents share one handle, so
    /// handle equality is string equality within a module.
    fn intern(&mut self, decoded: String) -> i32 {
        if let Some(&index) = self.string_indices.get(&decoded) {
            return index;
        }
        let index = self.strings.len() as i32;
        self.string_indices.insert(decoded.clone(), index);
        self.strings.push(decoded);
        index
    }
}

fn value_type(ty: SemanticType) -> Option<ValType> {
    match ty {
        SemanticType::Void => None,
        _ => Some(ValType::I32),
    }
}

fn emit_function(f: &FunctionDecl, cx: &mut ModuleCx) -> Result<Function, CoreError> {
    let (param_count, ret) = {
        let slot = &cx.slots[&f.name];
        (slot.params.len() as u32, slot.ret)
    };

    let mut emitter = FunctionEmitter {
        cx,
        function_name: &f.name,
        instructions: Vec::new(),
        locals: HashMap::new(),
        local_count: param_count,
    };
    for (i, param) in f.params.iter().enumerate() {
        let ty = SemanticType::from_name(&param.type_name).unwrap_or(SemanticType::Error);
        emitter.locals.insert(param.name.clone(), (i as u32, ty));
    }

    match &f.body {
        FunctionBody::Expr(expr) => {
            let ty = emitter.emit_expr(expr)?;
            emitter.reconcile_result(ty, ret);
        }
        FunctionBody::Block(block) => {
            let ty = emitter.emit_body_block(block)?;
            emitter.reconcile_result(ty, ret);
        }
    }

    let extra = emitter.local_count - param_count;
    let instructions = emitter.instructions;
    let mut function = Function::new(if extra > 0 {
        vec![(extra, ValType::I32)]
    } else {
        vec![]
    });
    for instruction in &instructions {
        function.instruction(instruction);
    }
    function.instruction(&Instruction::End);
    Ok(function)
}

struct FunctionEmitter<'a> {
    cx: &'a mut ModuleCx,
    function_name: &'a str,
    instructions: Vec<Instruction<'static>>,
    /// Flat per-function namespace: block scoping is the checker's
    /// concern, locals here may not reuse a name.
    locals: HashMap<String, (u32, SemanticType)>,
    local_count: u32,
}

impl FunctionEmitter<'_> {
    fn push(&mut self, instruction: Instruction<'static>) {
        self.instructions.push(instruction);
    }

    fn alloc_scratch(&mut self) -> u32 {
        let index = self.local_count;
        self.local_count += 1;
        index
    }

    fn emit_err(&self, message: impl Into<String>) -> CoreError {
        CoreError::Emit(message.into())
    }

    /// Align the value stack with the function's declared result.
    fn reconcile_result(&mut self, produced: SemanticType, ret: SemanticType) {
        match (value_type(produced), value_type(ret)) {
            (Some(_), None) => self.push(Instruction::Drop),
            (None, Some(_)) => self.push(Instruction::I32Const(0)),
            _ => {}
        }
    }

    /// A function body block: intermediate expression values are
    /// dropped, the final statement's value is the result.
    fn emit_body_block(&mut self, block: &Block) -> Result<SemanticType, CoreError> {
        let mut last = SemanticType::Void;
        let count = block.statements.len();
        for (i, stmt) in block.statements.iter().enumerate() {
            match stmt {
                Stmt::Variable(v) => {
                    self.emit_variable(v)?;
                    last = SemanticType::Void;
                }
                Stmt::Expr(expr) => {
                    let ty = self.emit_expr(expr)?;
                    if i + 1 != count && value_type(ty).is_some() {
                        self.push(Instruction::Drop);
                    }
                    last = ty;
                }
            }
        }
        Ok(last)
    }

    fn emit_variable(&mut self, variable: &VariableDecl) -> Result<(), CoreError> {
        let declared = variable
            .type_name
            .as_deref()
            .and_then(SemanticType::from_name);

        let ty = match &variable.initializer {
            Some(init) => {
                let inferred = self.emit_expr(init)?;
                if value_type(inferred).is_none() {
                    return Err(self.emit_err(format!(
                        "Variable '{}' cannot be initialized with a '()' value.",
                        variable.name
                    )));
                }
                declared.unwrap_or(inferred)
            }
            None => {
                let Some(declared) = declared else {
                    return Err(self.emit_err(format!(
                        "Variable '{}' has no type to default-initialize.",
                        variable.name
                    )));
                };
                self.push(Instruction::I32Const(default_value(declared, &variable.name)?));
                declared
            }
        };

        if self.locals.contains_key(&variable.name) {
            return Err(self.emit_err(format!(
                "Duplicate local variable '{}' in function '{}'.",
                variable.name, self.function_name
            )));
        }
        let index = self.alloc_scratch();
        self.locals.insert(variable.name.clone(), (index, ty));
        self.push(Instruction::LocalSet(index));
        Ok(())
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<SemanticType, CoreError> {
        match expr {
            Expr::Identifier(name) => {
                let Some(&(index, ty)) = self.locals.get(name.as_str()) else {
                    return Err(self.emit_err(format!(
                        "Unknown local variable '{name}' in function '{}'.",
                        self.function_name
                    )));
                };
                self.push(Instruction::LocalGet(index));
                Ok(ty)
            }

            Expr::Literal(literal) => self.emit_literal(literal),

            Expr::Unary { operator, operand } => match operator.as_str() {
                "!" => {
                    self.emit_expr(operand)?;
                    self.push(Instruction::I32Eqz);
                    Ok(SemanticType::Bool)
                }
                "-" => {
                    self.push(Instruction::I32Const(0));
                    self.emit_expr(operand)?;
                    self.push(Instruction::I32Sub);
                    Ok(SemanticType::I32)
                }
                other => Err(self.emit_err(format!("Unsupported unary operator '{other}'."))),
            },

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left_ty = self.emit_expr(left)?;
                let right_ty = self.emit_expr(right)?;
                let (instruction, result) = binary_lowering(operator)
                    .ok_or_else(|| self.emit_err(format!("Unsupported operator '{operator}'.")))?;
                self.check_operands(operator, left_ty, right_ty)?;
                self.push(instruction);
                Ok(result)
            }

            Expr::Group(inner) => self.emit_expr(inner),

            Expr::Call { callee, arguments } => self.emit_call(callee, arguments),

            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => self.emit_if(condition, then_expr, else_expr.as_deref()),

            Expr::Match { scrutinee, arms } => self.emit_match(scrutinee, arms),

            Expr::Block(_) => Err(self.emit_err(
                "Block expressions are not supported by the wasm back end.".to_string(),
            )),

            Expr::MemberAccess { member, .. } => Err(self.emit_err(format!(
                "Member access '{member}' is not supported by the wasm back end."
            ))),

            Expr::StructLiteral { struct_name, .. } => Err(self.emit_err(format!(
                "Struct literal '{struct_name}' is not supported by the wasm back end."
            ))),
        }
    }

    fn emit_literal(&mut self, literal: &Literal) -> Result<SemanticType, CoreError> {
        match literal.kind {
            LiteralKind::String => {
                let handle = self.cx.intern(decode_string(&literal.value));
                self.push(Instruction::I32Const(handle));
                Ok(SemanticType::String)
            }
            LiteralKind::BacktickString => {
                // Backtick contents are taken verbatim.
                let handle = self.cx.intern(literal.value.clone());
                self.push(Instruction::I32Const(handle));
                Ok(SemanticType::String)
            }
            _ => {
                let (value, ty) = scalar_literal(literal)?;
                self.push(Instruction::I32Const(value));
                Ok(ty)
            }
        }
    }

    fn emit_call(&mut self, callee: &Expr, arguments: &[Expr]) -> Result<SemanticType, CoreError> {
        let Expr::Identifier(name) = callee else {
            return Err(self.emit_err("Call target must be a function name.".to_string()));
        };

        if name == "println" {
            return self.emit_println(arguments);
        }

        let (index, params, ret) = {
            let Some(slot) = self.cx.slots.get(name.as_str()) else {
                return Err(self.emit_err(format!("Unknown function '{name}'.")));
            };
            (slot.index, slot.params.clone(), slot.ret)
        };

        if params.len() != arguments.len() {
            return Err(self.emit_err(format!(
                "Function '{name}' expects {} arguments but got {}.",
                params.len(),
                arguments.len()
            )));
        }
        for (i, (argument, (_, expected))) in arguments.iter().zip(&params).enumerate() {
            let actual = self.emit_expr(argument)?;
            if !expected.matches(actual) {
                return Err(self.emit_err(format!(
                    "Argument {} of '{name}' expects '{expected}' but got '{actual}'.",
                    i + 1
                )));
            }
        }

        self.push(Instruction::Call(index));
        Ok(ret)
    }

    /// Each argument becomes one host call: strings go to `print_str`
    /// by handle, every other value goes to `print_i32`.
    fn emit_println(&mut self, arguments: &[Expr]) -> Result<SemanticType, CoreError> {
        let (print_str, print_i32) = match (self.cx.print_str_index, self.cx.print_i32_index) {
            (Some(s), Some(i)) => (s, i),
            _ => {
                return Err(self.emit_err(
                    "Host print imports were not declared for this module.".to_string(),
                ));
            }
        };

        for argument in arguments {
            let ty = self.emit_expr(argument)?;
            match ty {
                SemanticType::Void => {
                    return Err(
                        self.emit_err("Cannot print a value of type '()'.".to_string())
                    );
                }
                SemanticType::String => self.push(Instruction::Call(print_str)),
                _ => self.push(Instruction::Call(print_i32)),
            }
        }
        Ok(SemanticType::Void)
    }

    fn emit_if(
        &mut self,
        condition: &Expr,
        then_expr: &Expr,
        else_expr: Option<&Expr>,
    ) -> Result<SemanticType, CoreError> {
        self.emit_expr(condition)?;
        let header = self.instructions.len();
        self.push(Instruction::If(BlockType::Empty));

        let then_ty = self.emit_expr(then_expr)?;

        let Some(else_expr) = else_expr else {
            // Statement form: the construct yields nothing.
            if value_type(then_ty).is_some() {
                self.push(Instruction::Drop);
            }
            self.push(Instruction::End);
            return Ok(SemanticType::Void);
        };

        let block_type = match value_type(then_ty) {
            Some(vt) => BlockType::Result(vt),
            None => BlockType::Empty,
        };
        self.instructions[header] = Instruction::If(block_type);

        self.push(Instruction::Else);
        let else_ty = self.emit_expr(else_expr)?;
        // The checker guarantees agreement; keep the stack balanced if
        // one arm bottomed out as Error-typed Void.
        match (value_type(then_ty), value_type(else_ty)) {
            (Some(_), None) => self.push(Instruction::I32Const(0)),
            (None, Some(_)) => self.push(Instruction::Drop),
            _ => {}
        }
        self.push(Instruction::End);
        Ok(then_ty)
    }

    /// Lowering: the scrutinee is stored once in a scratch local, then
    /// each literal arm gets its own inner block that compares and
    /// skips forward on mismatch; a taken arm branches to the outer
    /// block's end. A trailing wildcard falls through; without one the
    /// fallthrough traps.
    fn emit_match(
        &mut self,
        scrutinee: &Expr,
        arms: &[MatchArm],
    ) -> Result<SemanticType, CoreError> {
        if arms.is_empty() {
            return Err(self.emit_err("Match expression must have at least one arm.".to_string()));
        }

        let scrutinee_ty = self.emit_expr(scrutinee)?;
        if value_type(scrutinee_ty).is_none() {
            return Err(self.emit_err("Cannot match on a '()' value.".to_string()));
        }
        let scratch = self.alloc_scratch();
        self.push(Instruction::LocalSet(scratch));

        let outer = self.instructions.len();
        self.push(Instruction::Block(BlockType::Empty));

        let mut result_ty: Option<SemanticType> = None;
        let mut has_wildcard = false;

        for arm in arms {
            match &arm.pattern {
                Pattern::Literal(literal) => {
                    self.push(Instruction::Block(BlockType::Empty));
                    self.push(Instruction::LocalGet(scratch));
                    let value = self.pattern_value(literal)?;
                    self.push(Instruction::I32Const(value));
                    self.push(Instruction::I32Ne);
                    self.push(Instruction::BrIf(0));

                    let arm_ty = self.emit_expr(&arm.expr)?;
                    self.record_arm_type(&mut result_ty, arm_ty, outer);
                    self.push(Instruction::Br(1));
                    self.push(Instruction::End);
                }
                Pattern::Wildcard => {
                    has_wildcard = true;
                    let arm_ty = self.emit_expr(&arm.expr)?;
                    self.record_arm_type(&mut result_ty, arm_ty, outer);
                    break;
                }
            }
        }

        if !has_wildcard {
            // No arm matched.
            self.push(Instruction::Unreachable);
        }
        self.push(Instruction::End);

        Ok(result_ty.unwrap_or(SemanticType::Void))
    }

    /// First arm fixes the outer block's result type; later arms are
    /// coerced to it when an Error-typed arm left the stack unbalanced.
    fn record_arm_type(
        &mut self,
        result_ty: &mut Option<SemanticType>,
        arm_ty: SemanticType,
        outer: usize,
    ) {
        match *result_ty {
            None => {
                *result_ty = Some(arm_ty);
                if let Some(vt) = value_type(arm_ty) {
                    self.instructions[outer] = Instruction::Block(BlockType::Result(vt));
                }
            }
            Some(first) => match (value_type(first), value_type(arm_ty)) {
                (Some(_), None) => self.push(Instruction::I32Const(0)),
                (None, Some(_)) => self.push(Instruction::Drop),
                _ => {}
            },
        }
    }

    /// The checker already validated these; emission re-checks against
    /// its own type tracking so a checker bug cannot produce a module
    /// with a silently misinterpreted operand.
    fn check_operands(
        &self,
        operator: &str,
        left: SemanticType,
        right: SemanticType,
    ) -> Result<(), CoreError> {
        let ok = match operator {
            "==" | "!=" => left.matches(right),
            "&&" | "||" => {
                SemanticType::Bool.matches(left) && SemanticType::Bool.matches(right)
            }
            _ => SemanticType::I32.matches(left) && SemanticType::I32.matches(right),
        };
        if ok {
            Ok(())
        } else {
            Err(self.emit_err(format!(
                "Operator '{operator}' cannot be applied to '{left}' and '{right}'."
            )))
        }
    }

    /// Pattern constant as an i32 to compare against the scrutinee.
    /// String patterns compare by handle, which interning makes exact.
    fn pattern_value(&mut self, literal: &Literal) -> Result<i32, CoreError> {
        match literal.kind {
            LiteralKind::String => Ok(self.cx.intern(decode_string(&literal.value))),
            LiteralKind::BacktickString => Ok(self.cx.intern(literal.value.clone())),
            _ => scalar_literal(literal).map(|(value, _)| value),
        }
    }
}

fn binary_lowering(operator: &str) -> Option<(Instruction<'static>, SemanticType)> {
    let lowered = match operator {
        "+" => (Instruction::I32Add, SemanticType::I32),
        "-" => (Instruction::I32Sub, SemanticType::I32),
        "*" => (Instruction::I32Mul, SemanticType::I32),
        "/" => (Instruction::I32DivS, SemanticType::I32),
        "%" => (Instruction::I32RemS, SemanticType::I32),
        "==" => (Instruction::I32Eq, SemanticType::Bool),
        "!=" => (Instruction::I32Ne, SemanticType::Bool),
        "<" => (Instruction::I32LtS, SemanticType::Bool),
        "<=" => (Instruction::I32LeS, SemanticType::Bool),
        ">" => (Instruction::I32GtS, SemanticType::Bool),
        ">=" => (Instruction::I32GeS, SemanticType::Bool),
        // Both operands are bool 0/1 here, so the bitwise forms are
        // exact; evaluation is not short-circuiting.
        "&&" => (Instruction::I32And, SemanticType::Bool),
        "||" => (Instruction::I32Or, SemanticType::Bool),
        _ => return None,
    };
    Some(lowered)
}

fn default_value(ty: SemanticType, name: &str) -> Result<i32, CoreError> {
    match ty {
        SemanticType::I32 | SemanticType::Bool | SemanticType::Char => Ok(0),
        // Null string handle.
        SemanticType::String => Ok(-1),
        SemanticType::Void | SemanticType::Error => Err(CoreError::Emit(format!(
            "Variable '{name}' of type '{ty}' cannot be default-initialized."
        ))),
    }
}

fn scalar_literal(literal: &Literal) -> Result<(i32, SemanticType), CoreError> {
    match literal.kind {
        LiteralKind::Integer => {
            let digits: String = literal
                .value
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            let value = digits.parse::<i32>().map_err(|_| {
                CoreError::Emit(format!(
                    "Integer literal '{}' is out of range.",
                    literal.value
                ))
            })?;
            Ok((value, SemanticType::I32))
        }
        LiteralKind::Char => {
            let code = decode_char(&literal.value)?;
            Ok((code as i32, SemanticType::Char))
        }
        LiteralKind::True => Ok((1, SemanticType::Bool)),
        LiteralKind::False => Ok((0, SemanticType::Bool)),
        LiteralKind::Float => Err(CoreError::Emit(format!(
            "Float literal '{}' is not supported by the wasm back end.",
            literal.value
        ))),
        LiteralKind::String | LiteralKind::BacktickString => Err(CoreError::Emit(
            "String literal is not valid in this position.".to_string(),
        )),
    }
}

/// Interpret the escapes the lexer left raw in a string span.
fn decode_string(raw: &str) -> String {
    let mut decoded = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => decoded.push('\n'),
            Some('r') => decoded.push('\r'),
            Some('t') => decoded.push('\t'),
            Some('0') => decoded.push('\0'),
            Some(other) => decoded.push(other),
            None => decoded.push('\\'),
        }
    }
    decoded
}

/// Decode a char span to its code point; must fit one UTF-16 unit
/// because char lowers to an i32 holding exactly that.
fn decode_char(raw: &str) -> Result<u32, CoreError> {
    let mut chars = raw.chars();
    let decoded = match (chars.next(), chars.next(), chars.next()) {
        (Some('\\'), Some(escape), None) => match escape {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            '\'' => '\'',
            '"' => '"',
            '\\' => '\\',
            other => {
                return Err(CoreError::Emit(format!(
                    "Unknown escape sequence '\\{other}' in character literal."
                )));
            }
        },
        (Some(c), None, _) => c,
        _ => {
            return Err(CoreError::Emit(format!(
                "Invalid character literal '{raw}'."
            )));
        }
    };

    let code = decoded as u32;
    if code > 0xFFFF {
        return Err(CoreError::Emit(format!(
            "Character literal '{raw}' does not fit in a UTF-16 code unit."
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::typecheck::check;

    fn compile(source: &str) -> Result<CompiledModule, CoreError> {
        let unit = parse(&lex(source).expect("lex")).expect("parse");
        let semantics = check(&unit);
        assert!(!semantics.has_errors(), "{:?}", semantics.diagnostics);
        emit(&unit, &semantics)
    }

    fn validate(wasm: &[u8]) {
        wasmparser::Validator::new()
            .validate_all(wasm)
            .expect("module validates");
    }

    fn run_main(module: &CompiledModule) -> i32 {
        let engine = wasmi::Engine::default();
        let wasm_module = wasmi::Module::new(&engine, &module.wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &wasm_module)
            .expect("instantiate");
        instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("main export")
            .call(&mut store, ())
            .expect("main runs")
    }

    fn run_main_with_output(module: &CompiledModule) -> (i32, Vec<String>) {
        let engine = wasmi::Engine::default();
        let wasm_module = wasmi::Module::new(&engine, &module.wasm).expect("module");
        let mut linker: wasmi::Linker<Vec<String>> = wasmi::Linker::new(&engine);

        let strings = module.strings.clone();
        linker
            .func_wrap(
                "opal",
                "print_str",
                move |mut caller: wasmi::Caller<'_, Vec<String>>, handle: i32| {
                    let text = strings
                        .get(handle as usize)
                        .cloned()
                        .unwrap_or_else(|| "<null>".to_string());
                    caller.data_mut().push(text);
                },
            )
            .expect("link print_str");
        linker
            .func_wrap(
                "opal",
                "print_i32",
                |mut caller: wasmi::Caller<'_, Vec<String>>, value: i32| {
                    caller.data_mut().push(value.to_string());
                },
            )
            .expect("link print_i32");

        let mut store = wasmi::Store::new(&engine, Vec::new());
        let instance = linker
            .instantiate_and_start(&mut store, &wasm_module)
            .expect("instantiate");
        let result = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("main export")
            .call(&mut store, ())
            .expect("main runs");
        (result, store.into_data())
    }

    #[test]
    fn arithmetic_and_calls_compute_through_wasmi() {
        let module = compile(
            "fn add(a: i32, b: i32) -> i32 => a + b;\nfn main() -> i32 => add(2, 3) * 4;",
        )
        .expect("emits");
        validate(&module.wasm);
        assert!(!module.uses_println);
        assert_eq!(run_main(&module), 20);
    }

    #[test]
    fn unary_operators_lower_correctly() {
        let module =
            compile("fn main() -> i32 => if !(1 > 2) => -(3 - 10) else => 0;").expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 7);
    }

    #[test]
    fn logical_operators_evaluate_on_bool_values() {
        let module = compile(
            "fn main() -> i32 => if true && !false || 1 > 2 => 1 else => 0;",
        )
        .expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 1);
    }

    #[test]
    fn locals_and_block_bodies_evaluate_in_order() {
        let module = compile(
            "fn main() -> i32 {\n var a: i32 = 6;\n var b: i32 = a * 7;\n b - a % 4\n}",
        )
        .expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 40);
    }

    #[test]
    fn if_else_selects_a_branch_value() {
        let module =
            compile("fn pick(flag: bool) -> i32 => if flag => 1 else => 2;\nfn main() -> i32 => pick(false) * 10 + pick(true);")
                .expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 21);
    }

    #[test]
    fn match_falls_through_to_the_wildcard() {
        let module = compile("fn main() -> i32 => match 2 { 0 => 10, 1 => 11, _ => 99 };")
            .expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 99);
    }

    #[test]
    fn match_selects_a_literal_arm() {
        let module = compile(
            "fn classify(c: char) -> i32 => match c { 'a' => 1, 'b' => 2, _ => 0 };\nfn main() -> i32 => classify('b');",
        )
        .expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 2);
    }

    #[test]
    fn string_patterns_match_by_interned_handle() {
        let module = compile(
            "fn tag(s: string) -> i32 => match s { \"a\" => 1, \"b\" => 2, _ => 0 };\nfn main() -> i32 => tag(\"b\");",
        )
        .expect("emits");
        validate(&module.wasm);
        assert_eq!(module.strings, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(run_main(&module), 2);
    }

    #[test]
    fn match_without_wildcard_traps_on_no_match() {
        let module =
            compile("fn main() -> i32 => match 5 { 0 => 10, 1 => 11 };").expect("emits");
        validate(&module.wasm);

        let engine = wasmi::Engine::default();
        let wasm_module = wasmi::Module::new(&engine, &module.wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &wasm_module)
            .expect("instantiate");
        let result = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("main export")
            .call(&mut store, ());
        assert!(result.is_err());
    }

    #[test]
    fn println_imports_and_prints_each_argument() {
        let module = compile(
            "fn main() -> i32 {\n println(\"total:\", 6 * 7, true);\n println(\"done\");\n 0\n}",
        )
        .expect("emits");
        validate(&module.wasm);
        assert!(module.uses_println);
        assert_eq!(module.strings, vec!["total:".to_string(), "done".to_string()]);

        let (result, output) = run_main_with_output(&module);
        assert_eq!(result, 0);
        assert_eq!(output, vec!["total:", "42", "1", "done"]);
    }

    #[test]
    fn equal_string_literals_share_one_handle() {
        let module = compile(
            "fn main() -> i32 {\n println(\"x\", \"x\");\n if \"x\" == \"x\" => 1 else => 0\n}",
        )
        .expect("emits");
        validate(&module.wasm);
        assert_eq!(module.strings, vec!["x".to_string()]);
        let (result, output) = run_main_with_output(&module);
        assert_eq!(result, 1);
        assert_eq!(output, vec!["x", "x"]);
    }

    #[test]
    fn string_escapes_decode_into_the_table() {
        let module = compile("fn main() -> i32 {\n println(\"a\\tb\\n\");\n 0\n}").expect("emits");
        assert_eq!(module.strings, vec!["a\tb\n".to_string()]);
    }

    #[test]
    fn modules_without_println_have_no_imports() {
        let module = compile("fn main() -> i32 => 1;").expect("emits");
        validate(&module.wasm);
        assert!(!module.uses_println);
        assert!(module.strings.is_empty());
    }

    #[test]
    fn emission_is_deterministic() {
        let source = "fn helper(x: i32) -> i32 => x + 1;\nfn main() -> i32 {\n println(\"n\", helper(4));\n helper(10)\n}";
        let first = compile(source).expect("emits");
        let second = compile(source).expect("emits");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_main_is_fatal() {
        let err = compile("fn helper() -> i32 => 1;").expect_err("no entry point");
        assert!(err.to_string().contains("Entry point 'main' was not found."));
    }

    #[test]
    fn struct_literals_are_rejected_at_emission() {
        let unit = parse(&lex(
            "struct Point { x: i32 }\nfn main() -> i32 {\n var p: Point = Point { x: 1 };\n 0\n}",
        )
        .expect("lex"))
        .expect("parse");
        let semantics = check(&unit);
        assert!(!semantics.has_errors());
        let err = emit(&unit, &semantics).expect_err("struct literal rejected");
        assert!(err.to_string().contains("Struct literal 'Point'"));
    }

    #[test]
    fn block_expressions_are_rejected_at_emission() {
        let unit = parse(&lex("fn main() -> i32 => { 1 };").expect("lex")).expect("parse");
        let semantics = check(&unit);
        assert!(!semantics.has_errors());
        let err = emit(&unit, &semantics).expect_err("block expression rejected");
        assert!(err.to_string().contains("Block expressions"));
    }

    #[test]
    fn top_level_variables_are_rejected_at_emission() {
        let unit = parse(&lex("const limit: i32 = 10;\nfn main() -> i32 => 1;").expect("lex"))
            .expect("parse");
        let semantics = check(&unit);
        assert!(!semantics.has_errors());
        let err = emit(&unit, &semantics).expect_err("top-level variable rejected");
        assert!(err.to_string().contains("Top-level variable 'limit'"));
    }

    #[test]
    fn wide_char_literal_is_fatal() {
        let unit = parse(&lex("fn main() -> i32 {\n var c: char = '\u{1F600}';\n 0\n}").expect("lex"))
            .expect("parse");
        let semantics = check(&unit);
        assert!(!semantics.has_errors());
        let err = emit(&unit, &semantics).expect_err("wide char rejected");
        assert!(err.to_string().contains("UTF-16"));
    }

    #[test]
    fn integer_overflow_is_fatal() {
        let unit = parse(&lex("fn main() -> i32 => 99999999999;").expect("lex")).expect("parse");
        let semantics = check(&unit);
        let err = emit(&unit, &semantics).expect_err("overflow rejected");
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn void_functions_emit_no_result() {
        let module = compile(
            "fn shout() { println(\"hi\"); }\nfn main() -> i32 {\n shout();\n 0\n}",
        )
        .expect("emits");
        validate(&module.wasm);
        let (result, output) = run_main_with_output(&module);
        assert_eq!(result, 0);
        assert_eq!(output, vec!["hi"]);
    }

    #[test]
    fn default_initialized_locals_use_zero_and_null_handles() {
        let module = compile(
            "fn main() -> i32 {\n var n: i32;\n var s: string;\n if s == s => n else => 1\n}",
        )
        .expect("emits");
        validate(&module.wasm);
        assert_eq!(run_main(&module), 0);
    }
}
