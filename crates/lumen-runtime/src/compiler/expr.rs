//! Expression parsing
//!
//! The Pratt core: every token kind maps to a `(prefix, infix, precedence)`
//! rule, and [`Compiler::parse_precedence`] drives them. Expression rules
//! emit bytecode directly; the stack effect of every rule is exactly one
//! pushed value.

use super::Compiler;
use crate::bytecode::OpCode;
use crate::token::TokenKind;
use crate::value::Value;

/// Binding strength, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    None,
    /// `=` and the compound assignments
    Assignment,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-` and the bitwise/shift operators
    Term,
    /// `*` `/` `%`
    Factor,
    /// `!` unary `-`
    Unary,
    /// `.` `()` `[]`
    Call,
    Primary,
}

impl Precedence {
    /// One level stronger; used for left-associative infix operators.
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

type ParseFn<'h> = fn(&mut Compiler<'h>, bool);

/// A row of the Pratt table.
pub(super) struct ParseRule<'h> {
    prefix: Option<ParseFn<'h>>,
    infix: Option<ParseFn<'h>>,
    precedence: Precedence,
}

fn rule<'h>(
    prefix: Option<ParseFn<'h>>,
    infix: Option<ParseFn<'h>>,
    precedence: Precedence,
) -> ParseRule<'h> {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

impl<'h> Compiler<'h> {
    fn rule_for(kind: TokenKind) -> ParseRule<'h> {
        use Precedence as P;
        use TokenKind::*;
        match kind {
            LeftParen => rule(Some(Self::grouping), Some(Self::call), P::Call),
            LeftBracket => rule(Some(Self::array_literal), Some(Self::index), P::Call),
            LeftBrace => rule(Some(Self::table_literal), None, P::None),
            Dot => rule(None, Some(Self::dot), P::Call),
            Minus => rule(Some(Self::unary), Some(Self::binary), P::Term),
            Plus => rule(None, Some(Self::binary), P::Term),
            Slash | Star | Percent => rule(None, Some(Self::binary), P::Factor),
            // The ladder has no dedicated bitwise tier; these bind like `+`.
            Amp | Pipe | Caret | LessLess | GreaterGreater => {
                rule(None, Some(Self::binary), P::Term)
            }
            Bang => rule(Some(Self::unary), None, P::None),
            BangEqual | EqualEqual => rule(None, Some(Self::binary), P::Equality),
            Greater | GreaterEqual | Less | LessEqual => {
                rule(None, Some(Self::binary), P::Comparison)
            }
            Identifier => rule(Some(Self::variable), None, P::None),
            String => rule(Some(Self::string), None, P::None),
            Number => rule(Some(Self::number), None, P::None),
            And => rule(None, Some(Self::and_operator), P::And),
            Or => rule(None, Some(Self::or_operator), P::Or),
            True | False | Nil => rule(Some(Self::literal), None, P::None),
            Super => rule(Some(Self::super_expr), None, P::None),
            This => rule(Some(Self::this_expr), None, P::None),
            _ => rule(None, None, P::None),
        }
    }

    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Consume a prefix expression, then infix operators while the next
    /// token binds at least as strongly as `precedence`. Assignment is only
    /// offered to rules reached at assignment precedence or below.
    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::rule_for(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule_for(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::rule_for(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_assignment_operator().is_some() {
            self.error("Invalid assignment target.");
        }
    }

    /// Match `=` or a compound assignment, returning the desugared binary
    /// opcode (`None` for plain `=`, wrapped `None` result when nothing
    /// matched).
    fn match_assignment_operator(&mut self) -> Option<Option<OpCode>> {
        let op = match self.current.kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(OpCode::Add),
            TokenKind::MinusEqual => Some(OpCode::Sub),
            TokenKind::StarEqual => Some(OpCode::Mul),
            TokenKind::SlashEqual => Some(OpCode::Div),
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    // ── Prefix rules ─────────────────────────────────────────────────────

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary dispatched on non-unary token"),
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let text = self.previous.lexeme.clone();
        let parsed = if let Some(digits) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
            i64::from_str_radix(digits, 16).ok().map(|n| n as f64)
        } else if let Some(digits) = text.strip_prefix("0b").or(text.strip_prefix("0B")) {
            i64::from_str_radix(digits, 2).ok().map(|n| n as f64)
        } else if let Some(digits) = text.strip_prefix("0o").or(text.strip_prefix("0O")) {
            i64::from_str_radix(digits, 8).ok().map(|n| n as f64)
        } else {
            text.parse::<f64>().ok()
        };
        match parsed {
            Some(value) => self.emit_constant(Value::Number(value)),
            None => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme.clone();
        let content = unescape(&lexeme[1..lexeme.len() - 1]);
        let handle = self.heap.intern(&content);
        self.emit_constant(Value::Obj(handle));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            _ => unreachable!("literal dispatched on non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.clone();
        self.named_variable(&name, can_assign);
    }

    /// Array literal: `[e1, e2, ...]`
    fn array_literal(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression();
                count += 1;
                if count > u8::MAX as usize {
                    self.error("Can't have more than 255 elements in an array literal.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RightBracket) {
                    break; // trailing comma
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after array elements.");
        self.emit_op_byte(OpCode::SetArray, count.min(u8::MAX as usize) as u8);
    }

    /// Table literal: `{k1: v1, k2: v2, ...}`
    fn table_literal(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.expression();
                self.consume(TokenKind::Colon, "Expect ':' after table key.");
                self.expression();
                count += 1;
                if count > u8::MAX as usize {
                    self.error("Can't have more than 255 entries in a table literal.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RightBrace) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after table entries.");
        self.emit_op_byte(OpCode::SetTable, count.min(u8::MAX as usize) as u8);
    }

    fn this_expr(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_expr(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method_name = self.previous.lexeme.clone();
        let name = self.identifier_constant(&method_name);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::GetSuper, name);
        }
    }

    // ── Infix rules ──────────────────────────────────────────────────────

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::rule_for(operator).precedence.next();
        self.parse_precedence(precedence);

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Sub),
            TokenKind::Star => self.emit_op(OpCode::Mul),
            TokenKind::Slash => self.emit_op(OpCode::Div),
            TokenKind::Percent => self.emit_op(OpCode::Mod),
            TokenKind::Amp => self.emit_op(OpCode::BitAnd),
            TokenKind::Pipe => self.emit_op(OpCode::BitOr),
            TokenKind::Caret => self.emit_op(OpCode::BitXor),
            TokenKind::LessLess => self.emit_op(OpCode::ShiftLeft),
            TokenKind::GreaterGreater => self.emit_op(OpCode::ShiftRight),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            _ => unreachable!("binary dispatched on non-binary token"),
        }
    }

    fn and_operator(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_operator(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let property = self.previous.lexeme.clone();
        let name = self.identifier_constant(&property);

        if can_assign {
            if let Some(desugared) = self.match_assignment_operator() {
                match desugared {
                    None => {
                        self.expression();
                        self.emit_op_byte(OpCode::SetProperty, name);
                    }
                    Some(op) => {
                        // receiver; receiver.prop; rhs; op; receiver.prop = result
                        self.emit_op(OpCode::Dup);
                        self.emit_op_byte(OpCode::GetProperty, name);
                        self.expression();
                        self.emit_op(op);
                        self.emit_op_byte(OpCode::SetProperty, name);
                    }
                }
                return;
            }
        }
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name);
        }
    }

    fn index(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetIndex);
        } else {
            self.emit_op(OpCode::Index);
        }
    }

    // ── Shared helpers ───────────────────────────────────────────────────

    pub(super) fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                argc += 1;
                if argc > u8::MAX as usize {
                    self.error("Can't have more than 255 arguments.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc.min(u8::MAX as usize) as u8
    }

    /// Compile a read, write, or compound write of a named variable,
    /// resolving locals, then upvalues, then falling back to a global.
    pub(super) fn named_variable(&mut self, name: &str, can_assign: bool) {
        let resolved_local = match self.ctx.resolve_local(name) {
            Ok(slot) => slot,
            Err(message) => {
                self.error(message);
                return;
            }
        };
        let (get_op, set_op, arg) = match resolved_local {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => match self.ctx.resolve_upvalue(name) {
                Ok(Some(index)) => (OpCode::GetUpvalue, OpCode::SetUpvalue, index),
                Ok(None) => {
                    let index = self.identifier_constant(name);
                    (OpCode::GetGlobal, OpCode::SetGlobal, index)
                }
                Err(message) => {
                    self.error(message);
                    return;
                }
            },
        };

        if can_assign {
            if let Some(desugared) = self.match_assignment_operator() {
                match desugared {
                    None => {
                        self.expression();
                        self.emit_op_byte(set_op, arg);
                    }
                    Some(op) => {
                        // `a -= b` reads a, evaluates b, then subtracts: the
                        // right operand is evaluated second, as written.
                        self.emit_op_byte(get_op, arg);
                        self.expression();
                        self.emit_op(op);
                        self.emit_op_byte(set_op, arg);
                    }
                }
                return;
            }
        }
        self.emit_op_byte(get_op, arg);
    }
}

/// Process the escape sequences of a string literal body.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
