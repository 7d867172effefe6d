//! Declaration and statement parsing
//!
//! Statements have zero stack effect; control flow is lowered to forward
//! jumps patched once the target is known and backward `Loop` jumps emitted
//! against a recorded offset. `break` threads pending patch sites through
//! the current function context; `continue` jumps to the active loop start
//! (the increment clause, for `for` loops).

use super::{ClassContext, Compiler, FunctionKind};
use crate::bytecode::OpCode;
use crate::object::Obj;
use crate::token::TokenKind;
use crate::value::Value;

/// Saved loop bookkeeping, restored when a loop statement ends.
struct LoopState {
    in_loop: bool,
    loop_start: usize,
    loop_scope_depth: i32,
    break_jumps: Vec<usize>,
    loop_switch_subjects: usize,
}

impl<'h> Compiler<'h> {
    pub(super) fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Dump) {
            self.dump_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Switch) {
            self.switch_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    pub(super) fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    // ── Declarations ─────────────────────────────────────────────────────

    fn let_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        let name = self.previous.lexeme.clone();
        // A function may refer to itself; it is initialized before its body.
        self.mark_initialized();
        self.function(FunctionKind::Function, &name);
        self.define_variable(global);
    }

    /// Compile a function body in a fresh context and emit the `Closure`
    /// instruction (with its upvalue descriptor pairs) in the enclosing one.
    fn function(&mut self, kind: FunctionKind, name: &str) {
        self.push_fn_compiler(kind, name);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.ctx.function.arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.ctx.function.arity = self.ctx.function.arity.saturating_add(1);
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.pop_fn_compiler();
        let handle = self.heap.alloc_pinned(Obj::Function(function));
        let constant = self.make_constant(Value::Obj(handle));
        self.emit_op_byte(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme.clone();
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable();
        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassContext {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous.lexeme.clone();
            if super_name == class_name {
                self.error("A class can't inherit from itself.");
            }
            self.named_variable(&super_name, false);

            // A scoped local named `super` carries the superclass for
            // `super.x` resolution inside the methods.
            self.begin_scope();
            self.add_local("super".to_string());
            self.define_variable(0);

            self.named_variable(&class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(&class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.consume(TokenKind::Identifier, "Expect method or property name.");
            let member = self.previous.lexeme.clone();
            let member_constant = self.identifier_constant(&member);
            if self.match_token(TokenKind::Equal) {
                // Field default: evaluated once, at class definition time.
                self.expression();
                self.consume(TokenKind::Semicolon, "Expect ';' after property default.");
                self.emit_op_byte(OpCode::Property, member_constant);
            } else {
                let kind = if member == "init" {
                    FunctionKind::Initializer
                } else {
                    FunctionKind::Method
                };
                self.function(kind, &member);
                self.emit_op_byte(OpCode::Method, member_constant);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let had_superclass = self
            .classes
            .last()
            .is_some_and(|class| class.has_superclass);
        if had_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    // ── Simple statements ────────────────────────────────────────────────

    fn dump_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Dump);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn return_statement(&mut self) {
        if self.ctx.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_implicit_return();
            return;
        }
        if self.ctx.kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit_op(OpCode::Return);
    }

    // ── Control flow ─────────────────────────────────────────────────────

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().current_offset();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        let saved = self.begin_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
        self.end_loop(saved);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().current_offset();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // Trampoline: the body jumps back to the increment, and the
            // increment loops back to the condition.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().current_offset();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        let saved = self.begin_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_loop(saved);
        self.end_scope();
    }

    /// Lower a switch: the subject stays on the stack while cases test
    /// against a duplicate. Matching cases pop it themselves and jump past
    /// the final residual pop; the fall-through path pops it exactly once.
    fn switch_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'switch'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after switch value.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before switch body.");

        let mut exit_jumps = Vec::new();
        let mut seen_default = false;
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if self.match_token(TokenKind::Case) {
                if seen_default {
                    self.error("'default' must be the last switch case.");
                }
                self.emit_op(OpCode::Dup);
                self.expression();
                self.consume(TokenKind::Colon, "Expect ':' after case value.");
                self.emit_op(OpCode::Equal);
                let next_case = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop); // comparison result
                self.emit_op(OpCode::Pop); // switch value
                // Scoped so case-local declarations are popped before the
                // exit jump; the fall-through path never created them.
                self.begin_scope();
                self.case_body();
                self.end_scope();
                exit_jumps.push(self.emit_jump(OpCode::Jump));
                self.patch_jump(next_case);
                self.emit_op(OpCode::Pop); // comparison result, false path
            } else if self.match_token(TokenKind::Default) {
                self.consume(TokenKind::Colon, "Expect ':' after 'default'.");
                seen_default = true;
                // The subject is still on the stack while a default body
                // runs; `break`/`continue` inside it must pop it.
                self.ctx.switch_subjects += 1;
                self.begin_scope();
                self.case_body();
                self.end_scope();
                self.ctx.switch_subjects -= 1;
            } else {
                self.error_at_current("Expect 'case' or 'default' in switch body.");
                self.advance();
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after switch body.");

        // Residual switch value on the fall-through path; matched cases
        // jump past this pop.
        self.emit_op(OpCode::Pop);
        for exit in exit_jumps {
            self.patch_jump(exit);
        }
    }

    fn case_body(&mut self) {
        while !self.check(TokenKind::Case)
            && !self.check(TokenKind::Default)
            && !self.check(TokenKind::RightBrace)
            && !self.check(TokenKind::Eof)
        {
            self.declaration();
        }
    }

    fn break_statement(&mut self) {
        if !self.ctx.in_loop {
            self.error("Can't use 'break' outside of a loop.");
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
        self.discard_to_loop_boundary();
        let jump = self.emit_jump(OpCode::Jump);
        self.ctx.break_jumps.push(jump);
    }

    fn continue_statement(&mut self) {
        if !self.ctx.in_loop {
            self.error("Can't use 'continue' outside of a loop.");
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
        self.discard_to_loop_boundary();
        let loop_start = self.ctx.loop_start;
        self.emit_loop(loop_start);
    }

    /// Pop everything the jump out of the loop body would strand: locals of
    /// scopes inside the loop, plus subjects of enclosing switch defaults.
    fn discard_to_loop_boundary(&mut self) {
        let loop_scope_depth = self.ctx.loop_scope_depth;
        self.emit_pops_to_depth(loop_scope_depth);
        let stranded_subjects = self.ctx.switch_subjects - self.ctx.loop_switch_subjects;
        for _ in 0..stranded_subjects {
            self.emit_op(OpCode::Pop);
        }
    }

    fn begin_loop(&mut self, loop_start: usize) -> LoopState {
        let saved = LoopState {
            in_loop: self.ctx.in_loop,
            loop_start: self.ctx.loop_start,
            loop_scope_depth: self.ctx.loop_scope_depth,
            break_jumps: std::mem::take(&mut self.ctx.break_jumps),
            loop_switch_subjects: self.ctx.loop_switch_subjects,
        };
        self.ctx.in_loop = true;
        self.ctx.loop_start = loop_start;
        self.ctx.loop_scope_depth = self.ctx.scope_depth;
        self.ctx.loop_switch_subjects = self.ctx.switch_subjects;
        saved
    }

    fn end_loop(&mut self, saved: LoopState) {
        let breaks = std::mem::take(&mut self.ctx.break_jumps);
        for jump in breaks {
            self.patch_jump(jump);
        }
        self.ctx.in_loop = saved.in_loop;
        self.ctx.loop_start = saved.loop_start;
        self.ctx.loop_scope_depth = saved.loop_scope_depth;
        self.ctx.break_jumps = saved.break_jumps;
        self.ctx.loop_switch_subjects = saved.loop_switch_subjects;
    }
}
