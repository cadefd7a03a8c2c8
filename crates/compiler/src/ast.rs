//! Abstract syntax tree.
//!
//! The parser produces this tree and the compiler lowers it to bytecode.
//! Every node records the 1-based source line it started on.

use crate::token::Lexeme;

/// A function parameter: `[ref] name [as TypeExpression]`.
#[derive(Debug)]
pub struct Param {
    pub name: String,
    /// Expression evaluating to a Class at closure-construction time;
    /// None means Object (any value).
    pub type_expr: Option<Ast>,
    pub by_ref: bool,
    pub line: usize,
}

/// Loop variable of a `foreach` value binding.
#[derive(Debug)]
pub struct ForeachVar {
    pub name: String,
    pub by_ref: bool,
}

#[derive(Debug)]
pub enum Ast {
    /// null, true, false, nan, plus `pass`, which compiles to nothing.
    Constant {
        line: usize,
        lexeme: Lexeme,
    },
    Integer {
        line: usize,
        value: i64,
    },
    Float {
        line: usize,
        value: f64,
    },
    Str {
        line: usize,
        value: String,
    },
    Variable {
        line: usize,
        name: String,
    },
    Unary {
        line: usize,
        op: Lexeme,
        expr: Box<Ast>,
    },
    Binary {
        line: usize,
        op: Lexeme,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    /// Flattened `&` chain.
    Concat {
        line: usize,
        items: Vec<Ast>,
    },
    Call {
        line: usize,
        callee: Box<Ast>,
        args: Vec<Ast>,
    },
    /// `expr[i]` or `expr[i, j]`.
    Index {
        line: usize,
        expr: Box<Ast>,
        indices: Vec<Ast>,
    },
    /// `expr.name`.
    Dot {
        line: usize,
        expr: Box<Ast>,
        name: String,
    },
    /// `ref expr`.
    Reference {
        line: usize,
        expr: Box<Ast>,
    },
    Assignment {
        line: usize,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    /// `x if cond else y`.
    CondExpr {
        line: usize,
        cond: Box<Ast>,
        then: Box<Ast>,
        otherwise: Box<Ast>,
    },
    StatementList {
        line: usize,
        statements: Vec<Ast>,
        opens_scope: bool,
    },
    Declaration {
        line: usize,
        lhs: Vec<Ast>,
        rhs: Vec<Ast>,
        local: bool,
    },
    Print {
        line: usize,
        exprs: Vec<Ast>,
        newline: bool,
    },
    AssertStmt {
        line: usize,
        cond: Box<Ast>,
        message: Option<Box<Ast>>,
    },
    If {
        line: usize,
        /// (condition, block) pairs: the `if` branch then any `elsif`s.
        branches: Vec<(Ast, Ast)>,
        else_block: Option<Box<Ast>>,
    },
    While {
        line: usize,
        cond: Box<Ast>,
        body: Box<Ast>,
    },
    /// `repeat ... until cond`: the body runs at least once, the loop
    /// exits when the condition turns true.
    Repeat {
        line: usize,
        body: Box<Ast>,
        cond: Box<Ast>,
    },
    For {
        line: usize,
        var: String,
        start: Box<Ast>,
        end: Box<Ast>,
        step: Option<Box<Ast>>,
        down: bool,
        body: Box<Ast>,
    },
    Foreach {
        line: usize,
        /// Key variable; absent in the single-variable form, which binds
        /// values.
        key: Option<String>,
        value: ForeachVar,
        collection: Box<Ast>,
        body: Box<Ast>,
    },
    LoopExit {
        line: usize,
        is_break: bool,
    },
    FunctionDef {
        line: usize,
        name: String,
        params: Vec<Param>,
        body: Box<Ast>,
        local: bool,
    },
    Return {
        line: usize,
        expr: Option<Box<Ast>>,
    },
    ListLit {
        line: usize,
        items: Vec<Ast>,
    },
    TableLit {
        line: usize,
        pairs: Vec<(Ast, Ast)>,
    },
    SetLit {
        line: usize,
        items: Vec<Ast>,
    },
    /// `@[a, b; c, d]`: rows separated by semicolons.
    ArrayLit {
        line: usize,
        rows: Vec<Vec<Ast>>,
    },
    ThrowStmt {
        line: usize,
        expr: Box<Ast>,
    },
}

impl Ast {
    pub fn line(&self) -> usize {
        match self {
            Ast::Constant { line, .. }
            | Ast::Integer { line, .. }
            | Ast::Float { line, .. }
            | Ast::Str { line, .. }
            | Ast::Variable { line, .. }
            | Ast::Unary { line, .. }
            | Ast::Binary { line, .. }
            | Ast::Concat { line, .. }
            | Ast::Call { line, .. }
            | Ast::Index { line, .. }
            | Ast::Dot { line, .. }
            | Ast::Reference { line, .. }
            | Ast::Assignment { line, .. }
            | Ast::CondExpr { line, .. }
            | Ast::StatementList { line, .. }
            | Ast::Declaration { line, .. }
            | Ast::Print { line, .. }
            | Ast::AssertStmt { line, .. }
            | Ast::If { line, .. }
            | Ast::While { line, .. }
            | Ast::Repeat { line, .. }
            | Ast::For { line, .. }
            | Ast::Foreach { line, .. }
            | Ast::LoopExit { line, .. }
            | Ast::FunctionDef { line, .. }
            | Ast::Return { line, .. }
            | Ast::ListLit { line, .. }
            | Ast::TableLit { line, .. }
            | Ast::SetLit { line, .. }
            | Ast::ArrayLit { line, .. }
            | Ast::ThrowStmt { line, .. } => *line,
        }
    }

    /// True for nodes that leave a value on the stack when used as a
    /// statement (the compiler pops it).
    pub fn is_expression(&self) -> bool {
        matches!(
            self,
            Ast::Constant { .. }
                | Ast::Integer { .. }
                | Ast::Float { .. }
                | Ast::Str { .. }
                | Ast::Variable { .. }
                | Ast::Unary { .. }
                | Ast::Binary { .. }
                | Ast::Concat { .. }
                | Ast::Call { .. }
                | Ast::Index { .. }
                | Ast::Dot { .. }
                | Ast::Reference { .. }
                | Ast::CondExpr { .. }
                | Ast::ListLit { .. }
                | Ast::TableLit { .. }
                | Ast::SetLit { .. }
                | Ast::ArrayLit { .. }
        )
    }
}
