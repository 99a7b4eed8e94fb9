//! Abstract syntax tree for Opal.
//!
//! The parser produces one [`CompilationUnit`] per source file; it owns
//! every child node exclusively (a tree, no sharing) and nothing
//! mutates it after construction. The checker and the code generator
//! both dispatch exhaustively over these variants so that adding one is
//! flagged statically in every consumer.

/// Root of the AST: the ordered top-level declarations of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    pub declarations: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Function(FunctionDecl),
    Struct(StructDecl),
    Variable(VariableDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    /// Raw type-name span, `None` when the return type is inferred.
    pub return_type: Option<String>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

/// Exactly one body form is present. The distinction matters twice:
/// an expression body's type *is* the inferred return type, and a
/// block body needs explicit return synthesis during emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionBody {
    Expr(Expr),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<StructFieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFieldDecl {
    pub name: String,
    pub type_name: String,
}

/// `const`/`var` declaration, used both at top level and as a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDecl {
    pub is_const: bool,
    pub is_mutable: bool,
    pub name: String,
    pub type_name: Option<String>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Expr(Expr),
    Variable(VariableDecl),
}

/// Ordered statements with their own lexical scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralKind {
    Integer,
    Float,
    String,
    Char,
    BacktickString,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub kind: LiteralKind,
    /// Raw token text; escapes and suffixes are interpreted later.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Identifier(String),
    Literal(Literal),
    Unary {
        operator: String,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: String,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    MemberAccess {
        target: Box<Expr>,
        member: String,
    },
    Group(Box<Expr>),
    /// A block in expression position; its value is the value of the
    /// last statement.
    Block(Block),
    If {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Option<Box<Expr>>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    StructLiteral {
        struct_name: String,
        fields: Vec<StructFieldInit>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `_`, matches anything; must be the final arm.
    Wildcard,
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFieldInit {
    pub name: String,
    pub value: Expr,
}
