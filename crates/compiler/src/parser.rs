//! Recursive-descent parser.
//!
//! Statements are newline- or semicolon-terminated. Blocks close on `end`
//! (`elsif`/`else` also close an `if` block). Operator precedence, loosest
//! first: conditional (`x if c else y`), `or`, `and`, `not`, comparison,
//! additive (`+ -` and the n-ary `&` concatenation), multiplicative
//! (`* / %`), unary minus, power (`^`), then postfix call/index/dot.

use merle_core::error::{syntax_error, Result, RuntimeError};

use crate::ast::{Ast, ForeachVar, Param};
use crate::scanner::tokenize;
use crate::token::{Lexeme, Token};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Parser> {
        Ok(Parser {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    //-- token plumbing -----------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn check(&self, lexeme: Lexeme) -> bool {
        self.current().is(lexeme)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn accept(&mut self, lexeme: Lexeme) -> bool {
        if self.check(lexeme) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        syntax_error(message.into()).with_line(self.line())
    }

    fn expect(&mut self, lexeme: Lexeme, hint: &str) -> Result<()> {
        if !self.check(lexeme) {
            return Err(self.error(format!(
                "Expected \"{}\" {} but got \"{}\"",
                lexeme.name(),
                hint,
                self.current().describe()
            )));
        }
        self.advance();
        Ok(())
    }

    fn skip_separators(&mut self) {
        while self.current().is_separator() {
            self.advance();
        }
    }

    fn skip_empty_lines(&mut self) {
        while self.check(Lexeme::Eol) {
            self.advance();
        }
    }

    fn parse_identifier(&mut self, hint: &str) -> Result<String> {
        if !self.check(Lexeme::Identifier) {
            return Err(self.error(format!(
                "Expected an identifier {} but got \"{}\"",
                hint,
                self.current().describe()
            )));
        }
        let name = self.current().spelling.clone();
        self.advance();
        Ok(name)
    }

    //-- entry point --------------------------------------------------------

    pub fn parse(&mut self) -> Result<Ast> {
        let line = self.line();
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.check(Lexeme::Eot) {
            statements.push(self.parse_statement()?);
            self.skip_separators();
        }
        Ok(Ast::StatementList {
            line,
            statements,
            opens_scope: false,
        })
    }

    //-- statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Ast> {
        let line = self.line();
        if self.accept(Lexeme::Print) {
            self.parse_print_statement(line)
        } else if self.accept(Lexeme::Local) {
            self.skip_empty_lines();
            if self.accept(Lexeme::Function) {
                return self.parse_function_declaration(line, true);
            }
            // "var" is optional after "local".
            self.accept(Lexeme::Var);
            self.parse_declaration(line, true)
        } else if self.accept(Lexeme::Var) {
            self.parse_declaration(line, false)
        } else if self.accept(Lexeme::If) {
            self.parse_if_statement(line)
        } else if self.accept(Lexeme::While) {
            self.parse_while_statement(line)
        } else if self.accept(Lexeme::Repeat) {
            self.parse_repeat_statement(line)
        } else if self.accept(Lexeme::For) {
            self.parse_for_statement(line)
        } else if self.accept(Lexeme::Foreach) {
            self.parse_foreach_statement(line)
        } else if self.accept(Lexeme::Function) {
            self.parse_function_declaration(line, false)
        } else if self.accept(Lexeme::Return) {
            let expr = if self.current().is_separator() || self.check(Lexeme::Eot) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            Ok(Ast::Return { line, expr })
        } else if self.accept(Lexeme::Break) {
            Ok(Ast::LoopExit {
                line,
                is_break: true,
            })
        } else if self.accept(Lexeme::Continue) {
            Ok(Ast::LoopExit {
                line,
                is_break: false,
            })
        } else if self.accept(Lexeme::Assert) {
            self.parse_assertion(line)
        } else if self.accept(Lexeme::Throw) {
            let expr = Box::new(self.parse_expression()?);
            Ok(Ast::ThrowStmt { line, expr })
        } else if self.accept(Lexeme::Do) {
            self.parse_statements(true)
        } else if self.accept(Lexeme::Pass) {
            Ok(Ast::Constant {
                line,
                lexeme: Lexeme::Pass,
            })
        } else {
            self.parse_expression_statement()
        }
    }

    /// Statements up to `end`.
    fn parse_statements(&mut self, opens_scope: bool) -> Result<Ast> {
        let line = self.line();
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.check(Lexeme::End) {
            if self.check(Lexeme::Eot) {
                return Err(self.error("Expected \"end\" to close the block"));
            }
            statements.push(self.parse_statement()?);
            self.skip_separators();
        }
        self.advance();
        Ok(Ast::StatementList {
            line,
            statements,
            opens_scope,
        })
    }

    /// Statements of an `if` branch, stopping on `end`, `elsif` or `else`.
    /// The caller consumes the closing token.
    fn parse_if_block(&mut self) -> Result<Ast> {
        let line = self.line();
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.check(Lexeme::End) && !self.check(Lexeme::Elsif) && !self.check(Lexeme::Else)
        {
            if self.check(Lexeme::Eot) {
                return Err(self.error("Expected \"end\" to close the \"if\" statement"));
            }
            statements.push(self.parse_statement()?);
            self.skip_separators();
        }
        Ok(Ast::StatementList {
            line,
            statements,
            opens_scope: true,
        })
    }

    fn parse_print_statement(&mut self, line: usize) -> Result<Ast> {
        let mut exprs = vec![self.parse_expression()?];
        let mut newline = true;
        while self.accept(Lexeme::Comma) {
            // A trailing comma suppresses the newline.
            if self.check(Lexeme::Eol) || self.check(Lexeme::Eot) {
                newline = false;
                break;
            }
            exprs.push(self.parse_expression()?);
        }
        Ok(Ast::Print {
            line,
            exprs,
            newline,
        })
    }

    fn parse_declaration(&mut self, line: usize, local: bool) -> Result<Ast> {
        let hint = "in variable declaration";
        let mut lhs = Vec::new();
        loop {
            let var_line = self.line();
            let name = self.parse_identifier(hint)?;
            lhs.push(Ast::Variable {
                line: var_line,
                name,
            });
            if !self.accept(Lexeme::Comma) {
                break;
            }
        }
        let mut rhs = Vec::new();
        if self.accept(Lexeme::OpAssign) {
            rhs.push(self.parse_expression()?);
            while self.accept(Lexeme::Comma) {
                rhs.push(self.parse_expression()?);
            }
        }
        if !rhs.is_empty() && lhs.len() != rhs.len() {
            return Err(self.error(
                "Invalid declaration: the number of elements on the left hand side and right \
                 hand side doesn't match",
            ));
        }
        Ok(Ast::Declaration {
            line,
            lhs,
            rhs,
            local,
        })
    }

    fn parse_assertion(&mut self, line: usize) -> Result<Ast> {
        let cond = Box::new(self.parse_expression()?);
        let message = if self.accept(Lexeme::Comma) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Ast::AssertStmt {
            line,
            cond,
            message,
        })
    }

    fn parse_if_statement(&mut self, line: usize) -> Result<Ast> {
        let mut branches = Vec::new();
        let cond = self.parse_expression()?;
        self.expect(Lexeme::Then, "in \"if\" statement")?;
        let block = self.parse_if_block()?;
        branches.push((cond, block));
        let mut else_block = None;
        loop {
            if self.accept(Lexeme::Elsif) {
                let cond = self.parse_expression()?;
                self.expect(Lexeme::Then, "in \"elsif\" condition")?;
                let block = self.parse_if_block()?;
                branches.push((cond, block));
            } else if self.accept(Lexeme::Else) {
                else_block = Some(Box::new(self.parse_if_block()?));
                self.expect(Lexeme::End, "to close the \"if\" statement")?;
                break;
            } else {
                self.expect(Lexeme::End, "to close the \"if\" statement")?;
                break;
            }
        }
        Ok(Ast::If {
            line,
            branches,
            else_block,
        })
    }

    fn parse_while_statement(&mut self, line: usize) -> Result<Ast> {
        let cond = Box::new(self.parse_expression()?);
        self.expect(Lexeme::Do, "in \"while\" statement")?;
        let body = Box::new(self.parse_statements(true)?);
        Ok(Ast::While { line, cond, body })
    }

    /// `repeat <statements> until <cond>`.
    fn parse_repeat_statement(&mut self, line: usize) -> Result<Ast> {
        let body_line = self.line();
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.check(Lexeme::Until) {
            if self.check(Lexeme::Eot) {
                return Err(self.error("Expected \"until\" to close the \"repeat\" statement"));
            }
            statements.push(self.parse_statement()?);
            self.skip_separators();
        }
        self.advance();
        let body = Ast::StatementList {
            line: body_line,
            statements,
            opens_scope: true,
        };
        let cond = Box::new(self.parse_expression()?);
        Ok(Ast::Repeat {
            line,
            body: Box::new(body),
            cond,
        })
    }

    fn parse_for_statement(&mut self, line: usize) -> Result<Ast> {
        let hint = "in \"for\" loop";
        // The var keyword is optional.
        self.accept(Lexeme::Var);
        let var = self.parse_identifier(hint)?;
        self.expect(Lexeme::OpAssign, hint)?;
        let start = Box::new(self.parse_expression()?);
        let down = if self.accept(Lexeme::To) {
            false
        } else if self.accept(Lexeme::Downto) {
            true
        } else {
            return Err(self.error("Expected \"to\" or \"downto\" in \"for\" loop"));
        };
        let end = Box::new(self.parse_expression()?);
        let step = if self.accept(Lexeme::Step) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(Lexeme::Do, hint)?;
        // The compiler opens the scope itself so the loop variable lives
        // inside it.
        let body = Box::new(self.parse_statements(false)?);
        Ok(Ast::For {
            line,
            var,
            start,
            end,
            step,
            down,
            body,
        })
    }

    fn parse_foreach_statement(&mut self, line: usize) -> Result<Ast> {
        let hint = "in \"foreach\" loop";
        let first = self.parse_identifier(hint)?;
        let (key, value) = if self.accept(Lexeme::Comma) {
            let by_ref = self.accept(Lexeme::Ref);
            let name = self.parse_identifier(hint)?;
            (Some(first), ForeachVar { name, by_ref })
        } else {
            // A single variable binds values, not keys.
            (
                None,
                ForeachVar {
                    name: first,
                    by_ref: false,
                },
            )
        };
        self.expect(Lexeme::In, hint)?;
        let mut collection = self.parse_expression()?;
        // The iterator grabs the collection by reference.
        if !matches!(collection, Ast::Reference { .. }) {
            collection = Ast::Reference {
                line: collection.line(),
                expr: Box::new(collection),
            };
        }
        self.expect(Lexeme::Do, hint)?;
        let body = Box::new(self.parse_statements(false)?);
        Ok(Ast::Foreach {
            line,
            key,
            value,
            collection: Box::new(collection),
            body,
        })
    }

    fn parse_function_declaration(&mut self, line: usize, local: bool) -> Result<Ast> {
        let hint = "in function declaration";
        let name = self.parse_identifier(hint)?;
        self.expect(Lexeme::LParen, hint)?;
        let params = self.parse_parameters()?;
        // The function opens its own scope so the parameters live in it.
        let body = Box::new(self.parse_statements(false)?);
        Ok(Ast::FunctionDef {
            line,
            name,
            params,
            body,
            local,
        })
    }

    fn parse_parameters(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        if self.accept(Lexeme::RParen) {
            return Ok(params);
        }
        loop {
            params.push(self.parse_parameter()?);
            if !self.accept(Lexeme::Comma) {
                break;
            }
        }
        self.expect(Lexeme::RParen, "in parameter list")?;
        Ok(params)
    }

    fn parse_parameter(&mut self) -> Result<Param> {
        let line = self.line();
        let by_ref = self.accept(Lexeme::Ref);
        let name = self.parse_identifier("in parameter list")?;
        let type_expr = if self.accept(Lexeme::As) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Param {
            name,
            type_expr,
            by_ref,
            line,
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Ast> {
        let line = self.line();
        let expr = self.parse_expression()?;
        if self.accept(Lexeme::OpAssign) {
            let rhs = self.parse_expression()?;
            return Ok(Ast::Assignment {
                line,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            });
        }
        Ok(expr)
    }

    //-- expressions --------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Ast> {
        self.parse_conditional_expression()
    }

    fn parse_conditional_expression(&mut self) -> Result<Ast> {
        let expr = self.parse_or_expression()?;
        if self.accept(Lexeme::If) {
            let line = expr.line();
            let cond = self.parse_expression()?;
            self.expect(Lexeme::Else, "in conditional expression")?;
            let otherwise = self.parse_expression()?;
            return Ok(Ast::CondExpr {
                line,
                cond: Box::new(cond),
                then: Box::new(expr),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(expr)
    }

    fn parse_or_expression(&mut self) -> Result<Ast> {
        let expr = self.parse_and_expression()?;
        if self.check(Lexeme::Or) {
            let line = self.line();
            self.advance();
            return Ok(Ast::Binary {
                line,
                op: Lexeme::Or,
                lhs: Box::new(expr),
                rhs: Box::new(self.parse_or_expression()?),
            });
        }
        Ok(expr)
    }

    fn parse_and_expression(&mut self) -> Result<Ast> {
        let expr = self.parse_not_expression()?;
        if self.check(Lexeme::And) {
            let line = self.line();
            self.advance();
            return Ok(Ast::Binary {
                line,
                op: Lexeme::And,
                lhs: Box::new(expr),
                rhs: Box::new(self.parse_and_expression()?),
            });
        }
        Ok(expr)
    }

    fn parse_not_expression(&mut self) -> Result<Ast> {
        if self.check(Lexeme::Not) {
            let line = self.line();
            self.advance();
            return Ok(Ast::Unary {
                line,
                op: Lexeme::Not,
                expr: Box::new(self.parse_comp_expression()?),
            });
        }
        self.parse_comp_expression()
    }

    fn parse_comp_expression(&mut self) -> Result<Ast> {
        let mut expr = self.parse_additive_expression()?;
        while matches!(
            self.current().lexeme,
            Lexeme::OpEqual
                | Lexeme::OpNotEqual
                | Lexeme::OpGreaterEqual
                | Lexeme::OpGreaterThan
                | Lexeme::OpLessEqual
                | Lexeme::OpLessThan
                | Lexeme::OpCompare
        ) {
            let op = self.current().lexeme;
            let line = self.line();
            self.advance();
            expr = Ast::Binary {
                line,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.parse_additive_expression()?),
            };
        }
        Ok(expr)
    }

    fn parse_additive_expression(&mut self) -> Result<Ast> {
        let mut expr = self.parse_multiplicative_expression()?;
        if self.accept(Lexeme::OpConcat) {
            return self.parse_concat_expression(expr);
        }
        while matches!(self.current().lexeme, Lexeme::OpPlus | Lexeme::OpMinus) {
            let op = self.current().lexeme;
            let line = self.line();
            self.advance();
            expr = Ast::Binary {
                line,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.parse_multiplicative_expression()?),
            };
        }
        Ok(expr)
    }

    /// Flatten a chain of `&` into a single n-ary node, so the compiler
    /// emits one Concat.
    fn parse_concat_expression(&mut self, first: Ast) -> Result<Ast> {
        let line = first.line();
        let mut items = vec![first, self.parse_multiplicative_expression()?];
        while self.accept(Lexeme::OpConcat) {
            items.push(self.parse_multiplicative_expression()?);
        }
        Ok(Ast::Concat { line, items })
    }

    fn parse_multiplicative_expression(&mut self) -> Result<Ast> {
        let mut expr = self.parse_signed_expression()?;
        while matches!(
            self.current().lexeme,
            Lexeme::OpStar | Lexeme::OpSlash | Lexeme::OpMod
        ) {
            let op = self.current().lexeme;
            let line = self.line();
            self.advance();
            expr = Ast::Binary {
                line,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.parse_signed_expression()?),
            };
        }
        Ok(expr)
    }

    fn parse_signed_expression(&mut self) -> Result<Ast> {
        if self.check(Lexeme::OpMinus) {
            let line = self.line();
            self.advance();
            return Ok(Ast::Unary {
                line,
                op: Lexeme::OpMinus,
                expr: Box::new(self.parse_exponential_expression()?),
            });
        }
        self.parse_exponential_expression()
    }

    fn parse_exponential_expression(&mut self) -> Result<Ast> {
        let mut expr = self.parse_postfix_expression()?;
        while self.check(Lexeme::OpPower) {
            let line = self.line();
            self.advance();
            expr = Ast::Binary {
                line,
                op: Lexeme::OpPower,
                lhs: Box::new(expr),
                rhs: Box::new(self.parse_postfix_expression()?),
            };
        }
        Ok(expr)
    }

    fn parse_postfix_expression(&mut self) -> Result<Ast> {
        let mut expr = self.parse_ref_expression()?;
        loop {
            if self.accept(Lexeme::Dot) {
                let line = self.line();
                let name = self.parse_identifier("in dot expression")?;
                expr = Ast::Dot {
                    line,
                    expr: Box::new(expr),
                    name,
                };
            } else if self.accept(Lexeme::LSquare) {
                let line = self.line();
                let mut indices = vec![self.parse_expression()?];
                while self.accept(Lexeme::Comma) {
                    indices.push(self.parse_expression()?);
                }
                self.expect(Lexeme::RSquare, "in index")?;
                expr = Ast::Index {
                    line,
                    expr: Box::new(expr),
                    indices,
                };
            } else if self.accept(Lexeme::LParen) {
                let line = expr.line();
                let args = self.parse_arguments()?;
                expr = Ast::Call {
                    line,
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_ref_expression(&mut self) -> Result<Ast> {
        if self.check(Lexeme::Ref) {
            let line = self.line();
            self.advance();
            return Ok(Ast::Reference {
                line,
                expr: Box::new(self.parse_expression()?),
            });
        }
        self.parse_primary_expression()
    }

    fn parse_arguments(&mut self) -> Result<Vec<Ast>> {
        let mut args = Vec::new();
        if self.accept(Lexeme::RParen) {
            return Ok(args);
        }
        args.push(self.parse_expression()?);
        while self.accept(Lexeme::Comma) {
            args.push(self.parse_expression()?);
        }
        self.expect(Lexeme::RParen, "in argument list")?;
        Ok(args)
    }

    fn parse_primary_expression(&mut self) -> Result<Ast> {
        let line = self.line();
        match self.current().lexeme {
            Lexeme::Identifier => {
                let name = self.current().spelling.clone();
                self.advance();
                Ok(Ast::Variable { line, name })
            }
            Lexeme::StringLiteral => {
                let value = self.current().spelling.clone();
                self.advance();
                Ok(Ast::Str { line, value })
            }
            Lexeme::IntegerLiteral => {
                let value = self
                    .current()
                    .spelling
                    .parse::<i64>()
                    .map_err(|_| self.error("Invalid integer literal"))?;
                self.advance();
                Ok(Ast::Integer { line, value })
            }
            Lexeme::FloatLiteral => {
                let value = self
                    .current()
                    .spelling
                    .parse::<f64>()
                    .map_err(|_| self.error("Invalid float literal"))?;
                self.advance();
                Ok(Ast::Float { line, value })
            }
            Lexeme::True | Lexeme::False | Lexeme::Null | Lexeme::Nan => {
                let lexeme = self.current().lexeme;
                self.advance();
                Ok(Ast::Constant { line, lexeme })
            }
            Lexeme::LSquare => {
                self.advance();
                self.parse_list_literal(line)
            }
            Lexeme::LCurl => {
                self.advance();
                self.parse_table_literal(line)
            }
            Lexeme::At => {
                self.advance();
                self.expect(Lexeme::LSquare, "in array literal")?;
                self.parse_array_literal(line)
            }
            Lexeme::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Lexeme::RParen, "in parenthesized expression")?;
                Ok(expr)
            }
            _ => Err(self.error(format!(
                "Invalid expression near \"{}\"",
                self.current().describe()
            ))),
        }
    }

    fn parse_list_literal(&mut self, line: usize) -> Result<Ast> {
        self.skip_empty_lines();
        if self.accept(Lexeme::RSquare) {
            return Ok(Ast::ListLit {
                line,
                items: Vec::new(),
            });
        }
        let mut items = vec![self.parse_expression()?];
        self.skip_empty_lines();
        while self.accept(Lexeme::Comma) {
            self.skip_empty_lines();
            items.push(self.parse_expression()?);
            self.skip_empty_lines();
        }
        self.expect(Lexeme::RSquare, "at the end of list literal")?;
        Ok(Ast::ListLit { line, items })
    }

    /// `{k: v, ...}` is a table; `{a, b, ...}` is a set; `{}` is an empty
    /// table.
    fn parse_table_literal(&mut self, line: usize) -> Result<Ast> {
        let hint = "in table literal";
        self.skip_empty_lines();
        if self.accept(Lexeme::RCurl) {
            return Ok(Ast::TableLit {
                line,
                pairs: Vec::new(),
            });
        }
        let first = self.parse_expression()?;
        if !self.check(Lexeme::Colon) {
            // Set literal.
            let mut items = vec![first];
            self.skip_empty_lines();
            while self.accept(Lexeme::Comma) {
                self.skip_empty_lines();
                items.push(self.parse_expression()?);
                self.skip_empty_lines();
            }
            self.expect(Lexeme::RCurl, "at the end of set literal")?;
            return Ok(Ast::SetLit { line, items });
        }
        self.advance();
        let mut pairs = vec![(first, self.parse_expression()?)];
        self.skip_empty_lines();
        while self.accept(Lexeme::Comma) {
            self.skip_empty_lines();
            let key = self.parse_expression()?;
            self.expect(Lexeme::Colon, hint)?;
            let value = self.parse_expression()?;
            pairs.push((key, value));
            self.skip_empty_lines();
        }
        self.expect(Lexeme::RCurl, hint)?;
        Ok(Ast::TableLit { line, pairs })
    }

    /// `@[a, b; c, d]`, rows separated by semicolons.
    fn parse_array_literal(&mut self, line: usize) -> Result<Ast> {
        let hint = "in array literal";
        self.skip_empty_lines();
        let mut rows = Vec::new();
        let mut row = Vec::new();
        loop {
            row.push(self.parse_expression()?);
            self.skip_empty_lines();
            if self.accept(Lexeme::Comma) {
                self.skip_empty_lines();
                continue;
            }
            if self.accept(Lexeme::Semicolon) {
                self.skip_empty_lines();
                rows.push(std::mem::take(&mut row));
                continue;
            }
            self.expect(Lexeme::RSquare, hint)?;
            rows.push(row);
            break;
        }
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(RuntimeError::at_line(
                merle_core::ErrorKind::Syntax,
                line,
                "All rows of an array literal must have the same length",
            ));
        }
        Ok(Ast::ArrayLit { line, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Ast {
        Parser::new(source).unwrap().parse().unwrap()
    }

    fn statements(ast: Ast) -> Vec<Ast> {
        match ast {
            Ast::StatementList { statements, .. } => statements,
            other => panic!("expected a statement list, got {:?}", other),
        }
    }

    #[test]
    fn test_declaration() {
        let stmts = statements(parse("var x = 1 + 2"));
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Ast::Declaration { lhs, rhs, local, .. } => {
                assert_eq!(lhs.len(), 1);
                assert_eq!(rhs.len(), 1);
                assert!(!local);
            }
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_declaration_arity_mismatch() {
        assert!(Parser::new("var a, b = 1").unwrap().parse().is_err());
    }

    #[test]
    fn test_precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4).
        let stmts = statements(parse("2 + 3 * 4"));
        match &stmts[0] {
            Ast::Binary {
                op: Lexeme::OpPlus,
                rhs,
                ..
            } => {
                assert!(matches!(
                    **rhs,
                    Ast::Binary {
                        op: Lexeme::OpStar,
                        ..
                    }
                ));
            }
            other => panic!("expected +, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_flattening() {
        let stmts = statements(parse("a & b & c & d"));
        match &stmts[0] {
            Ast::Concat { items, .. } => assert_eq!(items.len(), 4),
            other => panic!("expected a concat, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elsif_else() {
        let stmts = statements(parse(
            "if a then\n pass\nelsif b then\n pass\nelse\n pass\nend",
        ));
        match &stmts[0] {
            Ast::If {
                branches,
                else_block,
                ..
            } => {
                assert_eq!(branches.len(), 2);
                assert!(else_block.is_some());
            }
            other => panic!("expected an if, got {:?}", other),
        }
    }

    #[test]
    fn test_foreach_single_variable_binds_value() {
        let stmts = statements(parse("foreach v in lst do\n pass\nend"));
        match &stmts[0] {
            Ast::Foreach {
                key,
                value,
                collection,
                ..
            } => {
                assert!(key.is_none());
                assert_eq!(value.name, "v");
                assert!(matches!(**collection, Ast::Reference { .. }));
            }
            other => panic!("expected a foreach, got {:?}", other),
        }
    }

    #[test]
    fn test_foreach_ref_value() {
        let stmts = statements(parse("foreach i, ref v in lst do\n pass\nend"));
        match &stmts[0] {
            Ast::Foreach { key, value, .. } => {
                assert_eq!(key.as_deref(), Some("i"));
                assert!(value.by_ref);
            }
            other => panic!("expected a foreach, got {:?}", other),
        }
    }

    #[test]
    fn test_function_with_typed_params() {
        let stmts = statements(parse("function f(x as Integer, ref y)\n return x\nend"));
        match &stmts[0] {
            Ast::FunctionDef { name, params, .. } => {
                assert_eq!(name, "f");
                assert_eq!(params.len(), 2);
                assert!(params[0].type_expr.is_some());
                assert!(!params[0].by_ref);
                assert!(params[1].by_ref);
            }
            other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn test_method_call_chain() {
        let stmts = statements(parse("t.keys.sort"));
        assert!(matches!(&stmts[0], Ast::Dot { .. }));
    }

    #[test]
    fn test_table_and_set_literals() {
        let stmts = statements(parse("{\"a\": 1, \"b\": 2}"));
        assert!(matches!(&stmts[0], Ast::TableLit { pairs, .. } if pairs.len() == 2));
        let stmts = statements(parse("{1, 2, 3}"));
        assert!(matches!(&stmts[0], Ast::SetLit { items, .. } if items.len() == 3));
        let stmts = statements(parse("{}"));
        assert!(matches!(&stmts[0], Ast::TableLit { pairs, .. } if pairs.is_empty()));
    }

    #[test]
    fn test_array_literal() {
        let stmts = statements(parse("@[1, 2; 3, 4]"));
        match &stmts[0] {
            Ast::ArrayLit { rows, .. } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].len(), 2);
            }
            other => panic!("expected an array literal, got {:?}", other),
        }
        assert!(Parser::new("@[1, 2; 3]").unwrap().parse().is_err());
    }

    #[test]
    fn test_conditional_expression() {
        let stmts = statements(parse("var m = a if a > b else b"));
        match &stmts[0] {
            Ast::Declaration { rhs, .. } => {
                assert!(matches!(&rhs[0], Ast::CondExpr { .. }));
            }
            other => panic!("expected a declaration, got {:?}", other),
        }
    }
}
