//! Recursive-descent parser for Opal.
//!
//! One error aborts the parse; there is no recovery, because later
//! stages have nothing reliable to check without a valid tree.
//! Expressions use precedence climbing: each binary level recurses
//! with `precedence + 1`, which yields left associativity, and postfix
//! call/member access loop after every primary so `f(x).y(z)` chains.

use crate::ast::{
    Block, CompilationUnit, Decl, Expr, FunctionBody, FunctionDecl, Literal, LiteralKind,
    MatchArm, Parameter, Pattern, Stmt, StructDecl, StructFieldDecl, StructFieldInit,
    VariableDecl,
};
use crate::error::CoreError;
use crate::lexer::{Token, TokenKind};

/// Parse a token stream into a compilation unit.
pub fn parse(tokens: &[Token]) -> Result<CompilationUnit, CoreError> {
    Parser {
        tokens,
        position: 0,
    }
    .parse_compilation_unit()
}

/// Binding power of unary `!` / `-`: tighter than every binary operator.
const UNARY_PRECEDENCE: u8 = 7;

struct Parser<'t> {
    tokens: &'t [Token],
    position: usize,
}

impl<'t> Parser<'t> {
    fn parse_compilation_unit(&mut self) -> Result<CompilationUnit, CoreError> {
        let mut declarations = Vec::new();

        while !self.is_at_end() {
            if self.matches(TokenKind::Fn) {
                declarations.push(Decl::Function(self.parse_function_decl()?));
            } else if self.matches(TokenKind::Struct) {
                declarations.push(Decl::Struct(self.parse_struct_decl()?));
            } else if self.check(TokenKind::Const)
                || self.check(TokenKind::Var)
                || self.check(TokenKind::Mut)
            {
                declarations.push(Decl::Variable(self.parse_variable_decl()?));
            } else {
                return Err(self.error(format!(
                    "unexpected token at top level: {:?}",
                    self.current().kind
                )));
            }
        }

        Ok(CompilationUnit { declarations })
    }

    fn parse_function_decl(&mut self) -> Result<FunctionDecl, CoreError> {
        let name = self
            .consume(TokenKind::Identifier, "expected function name")?
            .text
            .clone();
        self.consume(TokenKind::LParen, "expected '(' after function name")?;

        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param_name = self
                    .consume(TokenKind::Identifier, "expected parameter name")?
                    .text
                    .clone();
                self.consume(TokenKind::Colon, "expected ':' after parameter name")?;
                let type_name =
                    self.parse_type_name_until(&[TokenKind::Comma, TokenKind::RParen])?;
                params.push(Parameter {
                    name: param_name,
                    type_name,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after parameters")?;

        let return_type = if self.matches(TokenKind::Arrow) {
            Some(self.parse_type_name_until(&[
                TokenKind::FatArrow,
                TokenKind::LBrace,
                TokenKind::Semicolon,
            ])?)
        } else {
            None
        };

        let body = if self.matches(TokenKind::FatArrow) {
            let expr = self.parse_expression(1)?;
            self.consume(
                TokenKind::Semicolon,
                "expected ';' after expression-bodied function",
            )?;
            FunctionBody::Expr(expr)
        } else {
            FunctionBody::Block(self.parse_block()?)
        };

        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
        })
    }

    fn parse_struct_decl(&mut self) -> Result<StructDecl, CoreError> {
        let name = self
            .consume(TokenKind::Identifier, "expected struct name")?
            .text
            .clone();
        self.consume(TokenKind::LBrace, "expected '{' after struct name")?;

        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let field_name = self
                .consume(TokenKind::Identifier, "expected field name")?
                .text
                .clone();
            self.consume(TokenKind::Colon, "expected ':' after field name")?;
            let type_name = self.parse_type_name_until(&[TokenKind::Comma, TokenKind::RBrace])?;
            fields.push(StructFieldDecl {
                name: field_name,
                type_name,
            });
            self.matches(TokenKind::Comma);
        }

        self.consume(TokenKind::RBrace, "expected '}' after struct fields")?;
        Ok(StructDecl { name, fields })
    }

    fn parse_variable_decl(&mut self) -> Result<VariableDecl, CoreError> {
        let is_mutable = self.matches(TokenKind::Mut);
        let is_const = self.matches(TokenKind::Const);
        if !is_const {
            self.consume(TokenKind::Var, "expected 'var' or 'const'")?;
        }

        let name = self
            .consume(TokenKind::Identifier, "expected variable name")?
            .text
            .clone();

        let type_name = if self.matches(TokenKind::Colon) {
            Some(self.parse_type_name_until(&[TokenKind::Assign, TokenKind::Semicolon])?)
        } else {
            None
        };

        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression(1)?)
        } else {
            None
        };

        self.consume(TokenKind::Semicolon, "expected ';' after variable declaration")?;
        Ok(VariableDecl {
            is_const,
            is_mutable,
            name,
            type_name,
            initializer,
        })
    }

    fn parse_block(&mut self) -> Result<Block, CoreError> {
        self.consume(TokenKind::LBrace, "expected '{' to start block")?;
        let mut statements = Vec::new();

        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.check(TokenKind::Const) || self.check(TokenKind::Var) || self.check(TokenKind::Mut)
            {
                statements.push(Stmt::Variable(self.parse_variable_decl()?));
                continue;
            }

            let expr = self.parse_expression(1)?;
            self.matches(TokenKind::Semicolon);
            statements.push(Stmt::Expr(expr));
        }

        self.consume(TokenKind::RBrace, "expected '}' to end block")?;
        Ok(Block { statements })
    }

    fn parse_expression(&mut self, min_precedence: u8) -> Result<Expr, CoreError> {
        let mut left = self.parse_prefix()?;

        loop {
            if self.check(TokenKind::LParen) {
                left = self.parse_call(left)?;
                continue;
            }

            if self.matches(TokenKind::Dot) {
                let member = self
                    .consume(TokenKind::Identifier, "expected member name after '.'")?
                    .text
                    .clone();
                left = Expr::MemberAccess {
                    target: Box::new(left),
                    member,
                };
                continue;
            }

            let precedence = binary_precedence(self.current().kind);
            if precedence < min_precedence || precedence == 0 {
                break;
            }

            let operator = self.advance().text.clone();
            let right = self.parse_expression(precedence + 1)?;
            left = Expr::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, CoreError> {
        // Capitalized identifier directly before '{' is taken as a
        // struct literal. This is a syntactic convention, not a symbol
        // lookup, and a capitalized variable name used right before a
        // block will misparse; kept for compatibility.
        if self.check(TokenKind::Identifier)
            && self.peek_kind(1) == TokenKind::LBrace
            && looks_like_type_name(&self.current().text)
        {
            return self.parse_struct_literal();
        }

        if self.matches(TokenKind::Match) {
            return self.parse_match_expr();
        }

        if self.matches(TokenKind::If) {
            return self.parse_if_expr();
        }

        if self.check(TokenKind::LBrace) {
            return Ok(Expr::Block(self.parse_block()?));
        }

        if self.matches(TokenKind::Bang) {
            return Ok(Expr::Unary {
                operator: "!".to_string(),
                operand: Box::new(self.parse_expression(UNARY_PRECEDENCE)?),
            });
        }

        if self.matches(TokenKind::Minus) {
            return Ok(Expr::Unary {
                operator: "-".to_string(),
                operand: Box::new(self.parse_expression(UNARY_PRECEDENCE)?),
            });
        }

        if self.matches(TokenKind::LParen) {
            let inner = self.parse_expression(1)?;
            self.consume(TokenKind::RParen, "expected ')' after grouped expression")?;
            return Ok(Expr::Group(Box::new(inner)));
        }

        if self.matches(TokenKind::Identifier) {
            return Ok(Expr::Identifier(self.previous().text.clone()));
        }

        if let Some(literal) = self.match_literal() {
            return Ok(Expr::Literal(literal));
        }

        Err(self.error(format!(
            "expected expression but found {:?}",
            self.current().kind
        )))
    }

    fn match_literal(&mut self) -> Option<Literal> {
        let kind = match self.current().kind {
            TokenKind::Integer => LiteralKind::Integer,
            TokenKind::Float => LiteralKind::Float,
            TokenKind::String => LiteralKind::String,
            TokenKind::Char => LiteralKind::Char,
            TokenKind::BacktickString => LiteralKind::BacktickString,
            TokenKind::True => LiteralKind::True,
            TokenKind::False => LiteralKind::False,
            _ => return None,
        };
        let value = self.advance().text.clone();
        Some(Literal { kind, value })
    }

    fn parse_struct_literal(&mut self) -> Result<Expr, CoreError> {
        let struct_name = self
            .consume(TokenKind::Identifier, "expected struct name in literal")?
            .text
            .clone();
        self.consume(TokenKind::LBrace, "expected '{' in struct literal")?;

        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let name = self
                .consume(TokenKind::Identifier, "expected field name in struct literal")?
                .text
                .clone();
            self.consume(TokenKind::Colon, "expected ':' in struct literal field")?;
            let value = self.parse_expression(1)?;
            fields.push(StructFieldInit { name, value });
            self.matches(TokenKind::Comma);
        }

        self.consume(TokenKind::RBrace, "expected '}' after struct literal")?;
        Ok(Expr::StructLiteral {
            struct_name,
            fields,
        })
    }

    fn parse_match_expr(&mut self) -> Result<Expr, CoreError> {
        let scrutinee = self.parse_expression(1)?;
        self.consume(TokenKind::LBrace, "expected '{' after match scrutinee")?;

        let mut arms = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let pattern = self.parse_pattern()?;
            self.consume(TokenKind::FatArrow, "expected '=>' in match arm")?;
            let expr = self.parse_expression(1)?;
            arms.push(MatchArm { pattern, expr });

            // Comma and semicolon are both accepted as optional arm
            // separators.
            self.matches(TokenKind::Comma);
            self.matches(TokenKind::Semicolon);
        }

        self.consume(TokenKind::RBrace, "expected '}' after match arms")?;
        Ok(Expr::Match {
            scrutinee: Box::new(scrutinee),
            arms,
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, CoreError> {
        if self.matches(TokenKind::Underscore) {
            return Ok(Pattern::Wildcard);
        }

        if let Some(literal) = self.match_literal() {
            return Ok(Pattern::Literal(literal));
        }

        Err(self.error(format!(
            "unsupported match pattern token: {:?}",
            self.current().kind
        )))
    }

    fn parse_if_expr(&mut self) -> Result<Expr, CoreError> {
        let condition = self.parse_expression(1)?;

        let then_expr = if self.matches(TokenKind::FatArrow) {
            self.parse_expression(1)?
        } else {
            Expr::Block(self.parse_block()?)
        };

        let else_expr = if self.matches(TokenKind::Else) {
            Some(if self.matches(TokenKind::FatArrow) {
                self.parse_expression(1)?
            } else if self.matches(TokenKind::If) {
                self.parse_if_expr()?
            } else {
                Expr::Block(self.parse_block()?)
            })
        } else {
            None
        };

        Ok(Expr::If {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: else_expr.map(Box::new),
        })
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr, CoreError> {
        self.consume(TokenKind::LParen, "expected '(' for function call")?;
        let mut arguments = Vec::new();

        if !self.check(TokenKind::RParen) {
            loop {
                arguments.push(self.parse_expression(1)?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            arguments,
        })
    }

    /// Type names are raw token spans up to a terminator; the language
    /// has no compound type grammar yet, so no structure is recovered.
    fn parse_type_name_until(&mut self, terminators: &[TokenKind]) -> Result<String, CoreError> {
        let start = self.position;
        while !self.is_at_end() && !terminators.contains(&self.current().kind) {
            self.advance();
        }

        if self.position == start {
            return Err(self.error("expected type name".to_string()));
        }

        Ok(self.tokens[start..self.position]
            .iter()
            .map(|t| t.text.as_str())
            .collect())
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len() || self.tokens[self.position].kind == TokenKind::Eof
    }

    fn current(&self) -> &Token {
        if self.position < self.tokens.len() {
            &self.tokens[self.position]
        } else {
            // The lexer guarantees a trailing Eof token.
            self.tokens.last().expect("token stream has an Eof sentinel")
        }
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.position - 1]
    }

    fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.position + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.previous()
    }

    fn check(&self, kind: TokenKind) -> bool {
        if kind == TokenKind::Eof {
            return self.current().kind == TokenKind::Eof;
        }
        !self.is_at_end() && self.current().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, CoreError> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        Err(self.error(message.to_string()))
    }

    fn error(&self, message: String) -> CoreError {
        let token = self.current();
        CoreError::Parse {
            line: token.line,
            column: token.column,
            message,
        }
    }
}

fn binary_precedence(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::OrOr => 1,
        TokenKind::AndAnd => 2,
        TokenKind::Equals | TokenKind::BangEquals => 3,
        TokenKind::LessThan
        | TokenKind::LessThanEquals
        | TokenKind::GreaterThan
        | TokenKind::GreaterThanEquals => 4,
        TokenKind::Plus | TokenKind::Minus => 5,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 6,
        _ => 0,
    }
}

fn looks_like_type_name(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_source(source: &str) -> CompilationUnit {
        let tokens = lex(source).expect("lex");
        parse(&tokens).expect("parse")
    }

    fn first_function_body(unit: &CompilationUnit) -> &Expr {
        match &unit.declarations[0] {
            Decl::Function(f) => match &f.body {
                FunctionBody::Expr(e) => e,
                FunctionBody::Block(_) => panic!("expected expression body"),
            },
            _ => panic!("expected function declaration"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let unit = parse_source("fn main() -> i32 => 1 + 2 * 3;");
        let Expr::Binary { operator, right, .. } = first_function_body(&unit) else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, "+");
        assert!(
            matches!(right.as_ref(), Expr::Binary { operator, .. } if operator == "*"),
            "right operand should be the multiplication"
        );
    }

    #[test]
    fn same_precedence_associates_left() {
        let unit = parse_source("fn main() -> i32 => 10 - 3 - 2;");
        let Expr::Binary { left, operator, .. } = first_function_body(&unit) else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, "-");
        assert!(matches!(left.as_ref(), Expr::Binary { operator, .. } if operator == "-"));
    }

    #[test]
    fn call_and_member_chains_parse_postfix() {
        let unit = parse_source("fn main() -> i32 => f(x).y(z);");
        let Expr::Call { callee, arguments } = first_function_body(&unit) else {
            panic!("expected call");
        };
        assert_eq!(arguments.len(), 1);
        assert!(matches!(callee.as_ref(), Expr::MemberAccess { .. }));
    }

    #[test]
    fn capitalized_identifier_before_brace_is_a_struct_literal() {
        let unit = parse_source("fn main() -> i32 => Point { x: 1, y: 2 };");
        let Expr::StructLiteral { struct_name, fields } = first_function_body(&unit) else {
            panic!("expected struct literal");
        };
        assert_eq!(struct_name, "Point");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn lowercase_identifier_before_brace_is_not_a_struct_literal() {
        // `point` parses as a plain identifier; the block that follows
        // becomes a separate statement.
        let unit = parse_source("fn main() { point { 1 } }");
        let Decl::Function(f) = &unit.declarations[0] else {
            panic!("expected function");
        };
        let FunctionBody::Block(block) = &f.body else {
            panic!("expected block body");
        };
        assert_eq!(block.statements.len(), 2);
        assert!(matches!(&block.statements[0], Stmt::Expr(Expr::Identifier(n)) if n == "point"));
        assert!(matches!(&block.statements[1], Stmt::Expr(Expr::Block(_))));
    }

    #[test]
    fn if_accepts_arrow_and_block_and_chained_else() {
        let unit = parse_source("fn main() -> i32 => if a => 1 else if b => 2 else => 3;");
        let Expr::If { else_expr, .. } = first_function_body(&unit) else {
            panic!("expected if expression");
        };
        let nested = else_expr.as_ref().expect("else branch");
        assert!(matches!(nested.as_ref(), Expr::If { .. }));
    }

    #[test]
    fn match_arms_accept_comma_and_semicolon_separators() {
        let unit = parse_source("fn main() -> i32 => match x { 0 => 1, 1 => 2; _ => 3 };");
        let Expr::Match { arms, .. } = first_function_body(&unit) else {
            panic!("expected match expression");
        };
        assert_eq!(arms.len(), 3);
        assert!(matches!(arms[2].pattern, Pattern::Wildcard));
    }

    #[test]
    fn parses_declarations_and_variable_forms() {
        let unit = parse_source(
            "struct Point { x: i32, y: i32 }\n\
             const limit: i32 = 10;\n\
             mut var total = 0;\n\
             fn main() { var a: bool = true; a }",
        );
        assert_eq!(unit.declarations.len(), 4);
        assert!(matches!(&unit.declarations[0], Decl::Struct(s) if s.fields.len() == 2));
        assert!(matches!(&unit.declarations[1], Decl::Variable(v) if v.is_const));
        assert!(matches!(&unit.declarations[2], Decl::Variable(v) if v.is_mutable));
    }

    #[test]
    fn reparsing_identical_source_yields_identical_trees() {
        let source = "fn add(a: i32, b: i32) -> i32 => a + b;\nfn main() -> i32 => add(2, 3) * 4;";
        assert_eq!(parse_source(source), parse_source(source));
    }

    #[test]
    fn unary_operators_bind_tighter_than_binary() {
        let unit = parse_source("fn main() -> i32 => -a + b;");
        let Expr::Binary { left, operator, .. } = first_function_body(&unit) else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, "+");
        assert!(matches!(left.as_ref(), Expr::Unary { operator, .. } if operator == "-"));
    }

    #[test]
    fn reports_positioned_syntax_errors() {
        let tokens = lex("fn main( -> i32 => 1;").expect("lex");
        let err = parse(&tokens).unwrap_err();
        let CoreError::Parse { line, column, message } = err else {
            panic!("expected parse error");
        };
        assert_eq!(line, 1);
        assert!(column > 1);
        assert!(message.contains("parameter name"));
    }

    #[test]
    fn rejects_unknown_top_level_tokens() {
        let tokens = lex("impl Foo {}").expect("lex");
        let err = parse(&tokens).unwrap_err();
        assert!(err.to_string().contains("unexpected token at top level"));
    }

    #[test]
    fn missing_type_name_is_an_error() {
        let tokens = lex("fn f(a:) {}").expect("lex");
        let err = parse(&tokens).unwrap_err();
        assert!(err.to_string().contains("expected type name"));
    }
}
