//! Single-pass bytecode compiler
//!
//! A Pratt parser that emits bytecode directly while consuming tokens; there
//! is no AST. Nested function compilations form a chain of [`FnCompiler`]
//! contexts, class bodies a stack of [`ClassContext`]s. Errors accumulate as
//! [`Diagnostic`]s; panic mode suppresses the cascade until a statement
//! boundary.

mod expr;
mod stmt;

use crate::bytecode::{Chunk, OpCode};
use crate::diagnostic::{Diagnostic, ErrorAt};
use crate::heap::Heap;
use crate::lexer::Lexer;
use crate::object::{Function, Obj, ObjRef};
use crate::token::{Token, TokenKind};
use crate::value::Value;

/// Maximum locals per function (slot operands are one byte).
const MAX_LOCALS: usize = 256;
/// Maximum upvalues per function.
const MAX_UPVALUES: usize = 256;

/// Compile source to the top-level script function.
///
/// The returned function (and every function object created along the way)
/// is left pinned in the heap; the caller owns unpinning once the function
/// is rooted elsewhere.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<Diagnostic>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_script();
    if compiler.had_error {
        Err(compiler.diagnostics)
    } else {
        Ok(compiler.heap.alloc_pinned(Obj::Function(function)))
    }
}

/// What kind of function body is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable slot.
struct Local {
    name: String,
    /// Scope depth; −1 while the initializer is still being compiled
    depth: i32,
    /// Captured by a nested closure: close instead of pop at scope exit
    is_captured: bool,
}

/// One upvalue of the function being compiled: an index into the enclosing
/// function's locals (`is_local`) or into its upvalue list.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct CompiledUpvalue {
    pub index: u8,
    pub is_local: bool,
}

/// Per-function compilation context.
pub(crate) struct FnCompiler {
    enclosing: Option<Box<FnCompiler>>,
    pub function: Function,
    kind: FunctionKind,
    locals: Vec<Local>,
    pub upvalues: Vec<CompiledUpvalue>,
    scope_depth: i32,
    /// Loop bookkeeping for `break`/`continue`
    in_loop: bool,
    loop_start: usize,
    loop_scope_depth: i32,
    break_jumps: Vec<usize>,
    /// Switch subjects live on the stack at the current compile point (only
    /// default bodies count; matched cases pop the subject before running)
    switch_subjects: usize,
    /// `switch_subjects` as of the innermost loop entry
    loop_switch_subjects: usize,
}

impl FnCompiler {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 belongs to the callee: the receiver for methods and
        // initializers, unnameable otherwise.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        FnCompiler {
            enclosing: None,
            function: Function {
                arity: 0,
                upvalue_count: 0,
                name,
                chunk: Chunk::new(),
            },
            kind,
            locals: vec![Local {
                name: slot_zero.to_string(),
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            in_loop: false,
            loop_start: 0,
            loop_scope_depth: 0,
            break_jumps: Vec::new(),
            switch_subjects: 0,
            loop_switch_subjects: 0,
        }
    }

    /// Search locals back-to-front. `Err` when the local is read inside its
    /// own initializer.
    fn resolve_local(&self, name: &str) -> Result<Option<u8>, &'static str> {
        for (index, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(index as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8, &'static str> {
        let upvalue = CompiledUpvalue { index, is_local };
        if let Some(existing) = self.upvalues.iter().position(|u| *u == upvalue) {
            return Ok(existing as u8);
        }
        if self.upvalues.len() >= MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(upvalue);
        self.function.upvalue_count = self.upvalues.len();
        Ok((self.upvalues.len() - 1) as u8)
    }

    /// Resolve a name against enclosing functions, creating the upvalue
    /// chain along the way.
    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, &'static str> {
        let Some(enclosing) = self.enclosing.as_mut() else {
            return Ok(None);
        };
        if let Some(local) = enclosing.resolve_local(name)? {
            enclosing.locals[local as usize].is_captured = true;
            return self.add_upvalue(local, true).map(Some);
        }
        if let Some(upvalue) = enclosing.resolve_upvalue(name)? {
            return self.add_upvalue(upvalue, false).map(Some);
        }
        Ok(None)
    }
}

/// Class compilation context, one per nested `class` declaration.
pub(crate) struct ClassContext {
    pub has_superclass: bool,
}

/// Compiler state: scanner cursor, the chain of function contexts, and the
/// accumulated diagnostics.
pub(crate) struct Compiler<'h> {
    lexer: Lexer,
    pub current: Token,
    pub previous: Token,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    pub heap: &'h mut Heap,
    pub(crate) ctx: Box<FnCompiler>,
    pub(crate) classes: Vec<ClassContext>,
}

impl<'h> Compiler<'h> {
    fn new(source: &str, heap: &'h mut Heap) -> Self {
        Compiler {
            lexer: Lexer::new(source),
            current: Token::synthetic("<before first token>"),
            previous: Token::synthetic("<before first token>"),
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            heap,
            ctx: Box::new(FnCompiler::new(FunctionKind::Script, None)),
            classes: Vec::new(),
        }
    }

    // ── Token cursor ─────────────────────────────────────────────────────

    pub fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, Token::synthetic(""));
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    pub fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ── Error reporting ──────────────────────────────────────────────────

    /// Report an error at the previous token (the one a rule just acted on).
    pub fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    pub fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let at = match token.kind {
            TokenKind::Eof => ErrorAt::End,
            TokenKind::Error => ErrorAt::Nowhere,
            _ => ErrorAt::Token(token.lexeme.clone()),
        };
        self.diagnostics
            .push(Diagnostic::new(token.line, at, message));
    }

    /// Skip tokens until a likely statement boundary, then resume parsing.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Let
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Dump
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ── Emission ─────────────────────────────────────────────────────────

    pub fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.ctx.function.chunk
    }

    pub fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    pub fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    pub fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    pub fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    pub fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    pub fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, index);
    }

    /// Intern `name` and add it to the constant pool.
    pub fn identifier_constant(&mut self, name: &str) -> u8 {
        let handle = self.heap.intern(name);
        self.make_constant(Value::Obj(handle))
    }

    /// Emit a forward jump with a placeholder operand; returns the operand
    /// offset for [`Self::patch_jump`].
    pub fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.current_chunk().current_offset() - 2
    }

    /// Point the jump at `operand_offset` to the current end of code.
    pub fn patch_jump(&mut self, operand_offset: usize) {
        let distance = self.current_chunk().current_offset() - operand_offset - 2;
        if distance > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.current_chunk()
            .patch_u16(operand_offset, distance as u16);
    }

    /// Emit a backward jump to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let distance = self.current_chunk().current_offset() - loop_start + 2;
        if distance > u16::MAX as usize {
            self.error("Loop body too large.");
            self.emit_byte(0xFF);
            self.emit_byte(0xFF);
            return;
        }
        self.emit_byte((distance >> 8) as u8);
        self.emit_byte((distance & 0xFF) as u8);
    }

    fn emit_implicit_return(&mut self) {
        if self.ctx.kind == FunctionKind::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    // ── Function context management ──────────────────────────────────────

    fn push_fn_compiler(&mut self, kind: FunctionKind, name: &str) {
        let name_handle = self.heap.intern(name);
        let new_ctx = Box::new(FnCompiler::new(kind, Some(name_handle)));
        let outer = std::mem::replace(&mut self.ctx, new_ctx);
        self.ctx.enclosing = Some(outer);
    }

    /// Finish the innermost function, restoring its enclosing context.
    fn pop_fn_compiler(&mut self) -> (Function, Vec<CompiledUpvalue>) {
        self.emit_implicit_return();
        let enclosing = self
            .ctx
            .enclosing
            .take()
            .unwrap_or_else(|| unreachable!("popped the script context"));
        let finished = std::mem::replace(&mut self.ctx, enclosing);
        (finished.function, finished.upvalues)
    }

    fn end_script(&mut self) -> Function {
        self.emit_implicit_return();
        let script = std::mem::replace(
            &mut self.ctx,
            Box::new(FnCompiler::new(FunctionKind::Script, None)),
        );
        script.function
    }

    // ── Scopes and locals ────────────────────────────────────────────────

    pub fn begin_scope(&mut self) {
        self.ctx.scope_depth += 1;
    }

    pub fn end_scope(&mut self) {
        self.ctx.scope_depth -= 1;
        while self
            .ctx
            .locals
            .last()
            .is_some_and(|local| local.depth > self.ctx.scope_depth)
        {
            let captured = self.ctx.locals.pop().is_some_and(|local| local.is_captured);
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    /// Emit pops for locals deeper than `target_depth` without discarding
    /// them, for `break`/`continue` jumping out of nested scopes.
    pub fn emit_pops_to_depth(&mut self, target_depth: i32) {
        let ops: Vec<OpCode> = self
            .ctx
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > target_depth)
            .map(|local| {
                if local.is_captured {
                    OpCode::CloseUpvalue
                } else {
                    OpCode::Pop
                }
            })
            .collect();
        for op in ops {
            self.emit_op(op);
        }
    }

    /// Parse a variable name; returns its name-constant index for globals,
    /// 0 for locals.
    pub fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    /// Record a local declaration. Globals are late-bound by name and need
    /// no declaration step.
    pub fn declare_variable(&mut self) {
        if self.ctx.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let redeclared = self
            .ctx
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth == -1 || local.depth >= self.ctx.scope_depth)
            .any(|local| local.name == name);
        if redeclared {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    pub fn add_local(&mut self, name: String) {
        if self.ctx.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    pub fn mark_initialized(&mut self) {
        if self.ctx.scope_depth == 0 {
            return;
        }
        if let Some(local) = self.ctx.locals.last_mut() {
            local.depth = self.ctx.scope_depth;
        }
    }

    pub fn define_variable(&mut self, global: u8) {
        if self.ctx.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }
}
