//! Stack-based virtual machine
//!
//! Executes bytecode with a value stack and a call-frame stack. The central
//! loop reads one opcode byte, dispatches, and mutates the stack and the
//! current frame's instruction pointer. Arithmetic and comparison on
//! same-class instances route through the cached `__op` method-name hooks;
//! runtime failures unwind by resetting the stack and surface as a message
//! plus a most-recent-first stack trace.

mod frame;

pub use frame::CallFrame;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::Write as _;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::bytecode::{disassemble, OpCode};
use crate::compiler;
use crate::diagnostic::Diagnostic;
use crate::heap::Heap;
use crate::object::{
    BoundMethod, Closure, Instance, Native, NativeFn, Obj, ObjRef, Table, TableKey, Upvalue,
};
use crate::stdlib;
use crate::value::Value;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;
/// Maximum value-stack depth.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// Where `dump` and natives print. Defaults to stdout; embedders and tests
/// swap in their own sink.
pub type OutputWriter = Rc<RefCell<dyn std::io::Write>>;

/// The default output writer.
pub fn stdout_writer() -> OutputWriter {
    Rc::new(RefCell::new(std::io::stdout()))
}

/// Runtime failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("Operands must be numbers.")]
    NonNumericOperands,
    #[error("Operand must be a number.")]
    NonNumericOperand,
    #[error("Operands must be two joinable types.")]
    UnjoinableOperands,
    #[error("Operands are instances of different classes.")]
    CrossClassOperands,
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Undefined key '{0}'.")]
    UndefinedKey(String),
    #[error("Array index must be an integer.")]
    BadArrayIndex,
    #[error("Array index out of bounds.")]
    ArrayIndexOutOfBounds,
    #[error("String index must be an integer.")]
    BadStringIndex,
    #[error("String index out of bounds.")]
    StringIndexOutOfBounds,
    #[error("Strings cannot be assigned by index.")]
    ImmutableString,
    #[error("Only strings, arrays, and tables can be indexed.")]
    NotIndexable,
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Only instances and tables have properties.")]
    NoProperties,
    #[error("Superclass must be a class.")]
    NonClassSuperclass,
    #[error("{0}")]
    Native(String),
    #[error("Unknown opcode {0}.")]
    UnknownOpcode(u8),
}

/// A runtime error rendered for the host: the message followed by one
/// `[line N] in f()` entry per live frame, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeReport {
    pub message: String,
    pub trace: Vec<String>,
}

impl fmt::Display for RuntimeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for line in &self.trace {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

/// The tri-state outcome of [`Vm::interpret`], minus success.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    Compile(Vec<Diagnostic>),
    Runtime(RuntimeReport),
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(diagnostics) => {
                let mut first = true;
                for diagnostic in diagnostics {
                    if !first {
                        writeln!(f)?;
                    }
                    first = false;
                    write!(f, "{diagnostic}")?;
                }
                Ok(())
            }
            InterpretError::Runtime(report) => write!(f, "{report}"),
        }
    }
}

impl std::error::Error for InterpretError {}

/// Interned method names for operator overloading, created once at VM
/// startup and rooted for the VM's lifetime.
struct Hooks {
    init: ObjRef,
    add: ObjRef,
    sub: ObjRef,
    mul: ObjRef,
    div: ObjRef,
    modulo: ObjRef,
    bit_and: ObjRef,
    bit_or: ObjRef,
    bit_xor: ObjRef,
    not: ObjRef,
    eq: ObjRef,
    gt: ObjRef,
    lt: ObjRef,
}

impl Hooks {
    fn new(heap: &mut Heap) -> Self {
        Hooks {
            init: heap.intern("init"),
            add: heap.intern("__add"),
            sub: heap.intern("__sub"),
            mul: heap.intern("__mul"),
            div: heap.intern("__div"),
            modulo: heap.intern("__mod"),
            bit_and: heap.intern("__and"),
            bit_or: heap.intern("__or"),
            bit_xor: heap.intern("__xor"),
            not: heap.intern("__not"),
            eq: heap.intern("__eq"),
            gt: heap.intern("__gt"),
            lt: heap.intern("__lt"),
        }
    }

    fn all(&self) -> [ObjRef; 13] {
        [
            self.init,
            self.add,
            self.sub,
            self.mul,
            self.div,
            self.modulo,
            self.bit_and,
            self.bit_or,
            self.bit_xor,
            self.not,
            self.eq,
            self.gt,
            self.lt,
        ]
    }
}

/// Virtual machine state
pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<ObjRef, Value>,
    /// Open upvalues as `(stack slot, upvalue object)`, strictly descending
    /// by slot; at most one entry per slot.
    open_upvalues: Vec<(usize, ObjRef)>,
    hooks: Hooks,
    output: OutputWriter,
}

impl Vm {
    /// Create a VM with the standard natives installed.
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let hooks = Hooks::new(&mut heap);
        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            hooks,
            output: stdout_writer(),
        };
        stdlib::install(&mut vm);
        vm
    }

    /// Redirect `dump` and native output.
    pub fn set_output(&mut self, output: OutputWriter) {
        self.output = output;
    }

    /// Register a native callable under `name` in the globals table.
    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let name_handle = self.heap.intern(name);
        let native = self.alloc(Obj::Native(Native {
            name: name_handle,
            arity,
            function,
        }));
        self.globals.insert(name_handle, Value::Obj(native));
    }

    /// Compile and run a top-level script. The VM is reusable after an
    /// error; globals persist across calls.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = match compiler::compile(source, &mut self.heap) {
            Ok(function) => function,
            Err(diagnostics) => {
                self.heap.truncate_pins(0);
                return Err(InterpretError::Compile(diagnostics));
            }
        };

        self.reset();
        self.stack.push(Value::Obj(function));
        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack[0] = Value::Obj(closure);
        self.heap.truncate_pins(0);

        let outcome = self.call_closure(closure, 0).and_then(|()| self.run());
        outcome.map_err(|error| {
            let report = self.runtime_report(&error);
            self.reset();
            InterpretError::Runtime(report)
        })
    }

    /// Compile `source` and return the disassembly of the script function
    /// and every function constant reachable from it.
    pub fn disassemble_source(&mut self, source: &str) -> Result<String, InterpretError> {
        let script = match compiler::compile(source, &mut self.heap) {
            Ok(function) => function,
            Err(diagnostics) => {
                self.heap.truncate_pins(0);
                return Err(InterpretError::Compile(diagnostics));
            }
        };

        let mut output = String::new();
        let mut pending = vec![script];
        let mut seen = vec![];
        while let Some(handle) = pending.pop() {
            if seen.contains(&handle) {
                continue;
            }
            seen.push(handle);
            let Obj::Function(function) = self.heap.get(handle) else {
                continue;
            };
            let name = match function.name {
                Some(name) => self.heap.string_slice(name).to_string(),
                None => "script".to_string(),
            };
            output.push_str(&disassemble(&self.heap, &function.chunk, &name));
            for &constant in &function.chunk.constants {
                if let Value::Obj(child) = constant {
                    if matches!(self.heap.get(child), Obj::Function(_)) {
                        pending.push(child);
                    }
                }
            }
        }
        self.heap.truncate_pins(0);
        Ok(output)
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn runtime_report(&self, error: &RuntimeError) -> RuntimeReport {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.closure_function(frame.closure);
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let location = match function.name {
                Some(name) => format!("{}()", self.heap.string_slice(name)),
                None => "script".to_string(),
            };
            trace.push(format!("[line {line}] in {location}"));
        }
        RuntimeReport {
            message: error.to_string(),
            trace,
        }
    }

    // ── Allocation with the full root set ────────────────────────────────

    /// Allocate through the collector. The roots are the value stack, frame
    /// closures, globals, open upvalues, and the operator hooks; the heap
    /// adds interned strings and pinned objects itself.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        let Vm {
            heap,
            stack,
            frames,
            globals,
            open_upvalues,
            hooks,
            ..
        } = self;
        heap.maybe_collect(|marker| {
            for &value in stack.iter() {
                marker.mark_value(value);
            }
            for frame in frames.iter() {
                marker.mark_object(frame.closure);
            }
            for (&name, &value) in globals.iter() {
                marker.mark_object(name);
                marker.mark_value(value);
            }
            for &(_, upvalue) in open_upvalues.iter() {
                marker.mark_object(upvalue);
            }
            for hook in hooks.all() {
                marker.mark_object(hook);
            }
        });
        heap.alloc_raw(obj)
    }

    // ── Stack primitives ─────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ── Instruction reading ──────────────────────────────────────────────

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no call frame");
        let closure = frame.closure;
        let ip = frame.ip;
        frame.ip += 1;
        self.heap.closure_function(closure).chunk.code[ip]
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("no call frame");
        let closure = frame.closure;
        let ip = frame.ip;
        frame.ip += 2;
        self.heap.closure_function(closure).chunk.read_u16(ip)
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("no call frame");
        self.heap.closure_function(frame.closure).chunk.constants[index]
    }

    /// Read a name-constant operand; the compiler only emits interned
    /// string constants for these.
    fn read_name(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(handle) => handle,
            _ => unreachable!("name constant is not a string"),
        }
    }

    // ── Dispatch loop ────────────────────────────────────────────────────

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let op =
                OpCode::try_from(self.read_byte()).map_err(RuntimeError::UnknownOpcode)?;
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let top = self.peek(0);
                    self.push(top)?;
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no call frame").slots;
                    let value = self.stack[base + slot];
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no call frame").slots;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no call frame").closure;
                    let upvalue = match self.heap.get(closure) {
                        Obj::Closure(c) => c.upvalues[index],
                        _ => unreachable!("frame closure is not a closure"),
                    };
                    let value = match *self.heap.get(upvalue) {
                        Obj::Upvalue(Upvalue::Open(slot)) => self.stack[slot],
                        Obj::Upvalue(Upvalue::Closed(value)) => value,
                        _ => unreachable!("expected upvalue object"),
                    };
                    self.push(value)?;
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no call frame").closure;
                    let upvalue = match self.heap.get(closure) {
                        Obj::Closure(c) => c.upvalues[index],
                        _ => unreachable!("frame closure is not a closure"),
                    };
                    let value = self.peek(0);
                    match self.heap.get_mut(upvalue) {
                        Obj::Upvalue(u) => match u {
                            Upvalue::Open(slot) => {
                                let slot = *slot;
                                self.stack[slot] = value;
                            }
                            Upvalue::Closed(stored) => *stored = value,
                        },
                        _ => unreachable!("expected upvalue object"),
                    }
                }

                OpCode::GetGlobal => {
                    let name = self.read_name();
                    match self.globals.get(&name) {
                        Some(&value) => self.push(value)?,
                        None => {
                            return Err(RuntimeError::UndefinedVariable(
                                self.heap.string_slice(name).to_string(),
                            ))
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_name();
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_name();
                    if !self.globals.contains_key(&name) {
                        return Err(RuntimeError::UndefinedVariable(
                            self.heap.string_slice(name).to_string(),
                        ));
                    }
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                }

                OpCode::GetProperty => self.get_property()?,
                OpCode::SetProperty => self.set_property()?,
                OpCode::GetSuper => {
                    let name = self.read_name();
                    let superclass = match self.pop() {
                        Value::Obj(handle) => handle,
                        _ => return Err(RuntimeError::NonClassSuperclass),
                    };
                    self.bind_method(superclass, name)?;
                }

                OpCode::Equal => self.equal_values()?,
                OpCode::Greater => {
                    let hook = self.hooks.gt;
                    self.comparison_op(hook, |a, b| a > b)?;
                }
                OpCode::Less => {
                    let hook = self.hooks.lt;
                    self.comparison_op(hook, |a, b| a < b)?;
                }

                OpCode::Add => self.add_values()?,
                OpCode::Sub => {
                    let hook = self.hooks.sub;
                    self.arithmetic_op(hook, |a, b| a - b)?;
                }
                OpCode::Mul => {
                    let hook = self.hooks.mul;
                    self.arithmetic_op(hook, |a, b| a * b)?;
                }
                OpCode::Div => {
                    let hook = self.hooks.div;
                    self.arithmetic_op(hook, |a, b| a / b)?;
                }
                OpCode::Mod => {
                    let hook = self.hooks.modulo;
                    self.arithmetic_op(hook, |a, b| a % b)?;
                }
                OpCode::BitAnd => {
                    let hook = self.hooks.bit_and;
                    self.arithmetic_op(hook, |a, b| ((a as i64) & (b as i64)) as f64)?;
                }
                OpCode::BitOr => {
                    let hook = self.hooks.bit_or;
                    self.arithmetic_op(hook, |a, b| ((a as i64) | (b as i64)) as f64)?;
                }
                OpCode::BitXor => {
                    let hook = self.hooks.bit_xor;
                    self.arithmetic_op(hook, |a, b| ((a as i64) ^ (b as i64)) as f64)?;
                }
                OpCode::ShiftLeft => {
                    self.numeric_op(|a, b| ((a as i64) << ((b as i64) & 63)) as f64)?;
                }
                OpCode::ShiftRight => {
                    self.numeric_op(|a, b| ((a as i64) >> ((b as i64) & 63)) as f64)?;
                }

                OpCode::Not => {
                    let hook = self.hooks.not;
                    if let Some(method) = self.instance_method(self.peek(0), hook) {
                        self.call_value(method, 0)?;
                    } else {
                        let value = self.pop();
                        self.push(Value::Bool(value.is_falsey()))?;
                    }
                }
                OpCode::Negate => {
                    let value = self.pop();
                    match value {
                        Value::Number(n) => self.push(Value::Number(-n))?,
                        _ => return Err(RuntimeError::NonNumericOperand),
                    }
                }
                OpCode::Increment => {
                    let value = self.pop();
                    match value {
                        Value::Number(n) => self.push(Value::Number(n + 1.0))?,
                        _ => return Err(RuntimeError::NonNumericOperand),
                    }
                }
                OpCode::Decrement => {
                    let value = self.pop();
                    match value {
                        Value::Number(n) => self.push(Value::Number(n - 1.0))?,
                        _ => return Err(RuntimeError::NonNumericOperand),
                    }
                }

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().expect("no call frame").ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().expect("no call frame").ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().expect("no call frame").ip -= offset;
                }

                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => self.invoke()?,
                OpCode::SuperInvoke => {
                    let name = self.read_name();
                    let argc = self.read_byte();
                    let superclass = match self.pop() {
                        Value::Obj(handle) => handle,
                        _ => return Err(RuntimeError::NonClassSuperclass),
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }

                OpCode::Index => self.index_get()?,
                OpCode::SetIndex => self.index_set()?,

                OpCode::Closure => self.make_closure()?,
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                OpCode::SetTable => {
                    let count = self.read_byte() as usize;
                    let base = self.stack.len() - 2 * count;
                    let mut entries = IndexMap::with_capacity(count);
                    for pair in 0..count {
                        let key = TableKey::from_value(self.stack[base + 2 * pair]);
                        let value = self.stack[base + 2 * pair + 1];
                        entries.insert(key, value);
                    }
                    let table = self.alloc(Obj::Table(Table { entries }));
                    self.stack.truncate(base);
                    self.push(Value::Obj(table))?;
                }
                OpCode::SetArray => {
                    let count = self.read_byte() as usize;
                    let base = self.stack.len() - count;
                    let items = self.stack[base..].to_vec();
                    let array = self.alloc(Obj::Array(items));
                    self.stack.truncate(base);
                    self.push(Value::Obj(array))?;
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no call frame");
                    self.close_upvalues(frame.slots);
                    if self.frames.is_empty() {
                        // Pop the script closure and terminate.
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
                OpCode::Dump => {
                    let value = self.pop();
                    let text = self.heap.display_value(value);
                    let _ = writeln!(self.output.borrow_mut(), "{text}");
                }

                OpCode::Class => {
                    let name = self.read_name();
                    let class = self.alloc(Obj::Class(crate::object::Class::new(name)));
                    self.push(Value::Obj(class))?;
                }
                OpCode::Method => {
                    let name = self.read_name();
                    let method = self.peek(0);
                    let class = self.peek(1);
                    match class.as_obj().map(|h| self.heap.get_mut(h)) {
                        Some(Obj::Class(c)) => {
                            c.methods.insert(name, method);
                        }
                        _ => unreachable!("method bound to non-class"),
                    }
                    self.pop();
                }
                OpCode::Property => {
                    let name = self.read_name();
                    let default = self.peek(0);
                    let class = self.peek(1);
                    match class.as_obj().map(|h| self.heap.get_mut(h)) {
                        Some(Obj::Class(c)) => {
                            c.defaults.insert(name, default);
                        }
                        _ => unreachable!("property bound to non-class"),
                    }
                    self.pop();
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    let (methods, defaults) = match superclass.as_obj().map(|h| self.heap.get(h)) {
                        Some(Obj::Class(parent)) => (parent.methods.clone(), parent.defaults.clone()),
                        _ => return Err(RuntimeError::NonClassSuperclass),
                    };
                    let subclass = self.peek(0);
                    match subclass.as_obj().map(|h| self.heap.get_mut(h)) {
                        Some(Obj::Class(child)) => {
                            child.methods.extend(methods);
                            child.defaults.extend(defaults);
                        }
                        _ => unreachable!("inherit into non-class"),
                    }
                    self.pop();
                }
            }
        }
    }

    // ── Property access ──────────────────────────────────────────────────

    fn get_property(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_name();
        let target = self.peek(0);
        let Some(handle) = target.as_obj() else {
            return Err(RuntimeError::NoProperties);
        };
        match self.heap.get(handle) {
            Obj::Instance(instance) => {
                let field = instance.fields.get(&name).copied();
                let class = instance.class;
                match field {
                    Some(value) => {
                        self.pop();
                        self.push(value)
                    }
                    None => self.bind_method(class, name),
                }
            }
            Obj::Table(table) => match table.entries.get(&TableKey::Obj(name)).copied() {
                Some(value) => {
                    self.pop();
                    self.push(value)
                }
                None => Err(RuntimeError::UndefinedKey(
                    self.heap.string_slice(name).to_string(),
                )),
            },
            _ => Err(RuntimeError::NoProperties),
        }
    }

    fn set_property(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_name();
        let value = self.peek(0);
        let target = self.peek(1);
        let Some(handle) = target.as_obj() else {
            return Err(RuntimeError::NoProperties);
        };
        match self.heap.get_mut(handle) {
            Obj::Instance(instance) => {
                instance.fields.insert(name, value);
            }
            Obj::Table(table) => {
                table.entries.insert(TableKey::Obj(name), value);
            }
            _ => return Err(RuntimeError::NoProperties),
        }
        self.pop();
        self.pop();
        self.push(value)
    }

    /// Produce a bound method from `class.name` and the receiver on top of
    /// the stack.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let method = match self.heap.get(class) {
            Obj::Class(c) => c.methods.get(&name).and_then(|m| m.as_obj()),
            _ => None,
        };
        let Some(method) = method else {
            return Err(RuntimeError::UndefinedProperty(
                self.heap.string_slice(name).to_string(),
            ));
        };
        let receiver = self.peek(0);
        let bound = self.alloc(Obj::BoundMethod(BoundMethod { receiver, method }));
        self.pop();
        self.push(Value::Obj(bound))
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        let Some(handle) = callee.as_obj() else {
            return Err(RuntimeError::NotCallable);
        };
        match self.heap.get(handle) {
            Obj::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, argc)
            }
            Obj::Class(class) => {
                let defaults = class.defaults.clone();
                let init = class.methods.get(&self.hooks.init).and_then(|m| m.as_obj());
                let instance = self.alloc(Obj::Instance(Instance {
                    class: handle,
                    fields: defaults,
                }));
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = Value::Obj(instance);
                match init {
                    Some(init) => self.call_closure(init, argc),
                    None if argc != 0 => Err(RuntimeError::ArityMismatch {
                        expected: 0,
                        got: argc,
                    }),
                    None => Ok(()),
                }
            }
            Obj::Closure(_) => self.call_closure(handle, argc),
            Obj::Native(native) => {
                if argc != native.arity {
                    return Err(RuntimeError::ArityMismatch {
                        expected: native.arity,
                        got: argc,
                    });
                }
                let function = native.function;
                let arg_base = self.stack.len() - argc as usize;
                let args: Vec<Value> = self.stack[arg_base..].to_vec();
                let result =
                    function(&mut self.heap, &args).map_err(RuntimeError::Native)?;
                self.stack.truncate(arg_base - 1);
                self.push(result)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let arity = self.heap.closure_function(closure).arity;
        if argc != arity {
            return Err(RuntimeError::ArityMismatch {
                expected: arity,
                got: argc,
            });
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        let slots = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame::new(closure, slots));
        Ok(())
    }

    /// `receiver.name(args)` without materializing a bound method, unless a
    /// field shadows the method name.
    fn invoke(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_name();
        let argc = self.read_byte();
        let receiver = self.peek(argc as usize);
        let Some(handle) = receiver.as_obj() else {
            return Err(RuntimeError::NoProperties);
        };
        match self.heap.get(handle) {
            Obj::Instance(instance) => {
                let shadowing_field = instance.fields.get(&name).copied();
                let class = instance.class;
                match shadowing_field {
                    Some(field) => {
                        let slot = self.stack.len() - argc as usize - 1;
                        self.stack[slot] = field;
                        self.call_value(field, argc)
                    }
                    None => self.invoke_from_class(class, name, argc),
                }
            }
            Obj::Table(table) => {
                let value = table.entries.get(&TableKey::Obj(name)).copied();
                match value {
                    Some(value) => {
                        let slot = self.stack.len() - argc as usize - 1;
                        self.stack[slot] = value;
                        self.call_value(value, argc)
                    }
                    None => Err(RuntimeError::UndefinedKey(
                        self.heap.string_slice(name).to_string(),
                    )),
                }
            }
            _ => Err(RuntimeError::NoProperties),
        }
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = match self.heap.get(class) {
            Obj::Class(c) => c.methods.get(&name).and_then(|m| m.as_obj()),
            _ => None,
        };
        match method {
            Some(method) => self.call_closure(method, argc),
            None => Err(RuntimeError::UndefinedProperty(
                self.heap.string_slice(name).to_string(),
            )),
        }
    }

    // ── Operators ────────────────────────────────────────────────────────

    fn instance_class(&self, value: Value) -> Option<ObjRef> {
        match value.as_obj().map(|h| self.heap.get(h)) {
            Some(Obj::Instance(instance)) => Some(instance.class),
            _ => None,
        }
    }

    /// The `hook` method of `value`'s class, when `value` is an instance
    /// whose class defines it.
    fn instance_method(&self, value: Value, hook: ObjRef) -> Option<Value> {
        let class = self.instance_class(value)?;
        match self.heap.get(class) {
            Obj::Class(c) => c.methods.get(&hook).copied(),
            _ => None,
        }
    }

    /// Dispatch `lhs __op rhs` for two instances: same class required, the
    /// method runs with the left operand as receiver and the right as the
    /// sole argument.
    fn dispatch_hook_binary(&mut self, hook: ObjRef) -> Result<(), RuntimeError> {
        let lhs_class = self.instance_class(self.peek(1));
        let rhs_class = self.instance_class(self.peek(0));
        let (Some(lhs_class), Some(rhs_class)) = (lhs_class, rhs_class) else {
            unreachable!("hook dispatch on non-instances");
        };
        if lhs_class != rhs_class {
            return Err(RuntimeError::CrossClassOperands);
        }
        let method = match self.heap.get(lhs_class) {
            Obj::Class(c) => c.methods.get(&hook).copied(),
            _ => None,
        };
        match method {
            Some(method) => self.call_value(method, 1),
            None => Err(RuntimeError::UndefinedProperty(
                self.heap.string_slice(hook).to_string(),
            )),
        }
    }

    fn both_instances(&self) -> bool {
        self.instance_class(self.peek(0)).is_some() && self.instance_class(self.peek(1)).is_some()
    }

    fn numeric_op(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let (Value::Number(a), Value::Number(b)) = (self.peek(1), self.peek(0)) else {
            return Err(RuntimeError::NonNumericOperands);
        };
        self.pop();
        self.pop();
        self.push(Value::Number(f(a, b)))
    }

    fn arithmetic_op(
        &mut self,
        hook: ObjRef,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        if self.both_instances() {
            return self.dispatch_hook_binary(hook);
        }
        self.numeric_op(f)
    }

    fn comparison_op(
        &mut self,
        hook: ObjRef,
        f: impl Fn(f64, f64) -> bool,
    ) -> Result<(), RuntimeError> {
        if self.both_instances() {
            return self.dispatch_hook_binary(hook);
        }
        let (Value::Number(a), Value::Number(b)) = (self.peek(1), self.peek(0)) else {
            return Err(RuntimeError::NonNumericOperands);
        };
        self.pop();
        self.pop();
        self.push(Value::Bool(f(a, b)))
    }

    fn equal_values(&mut self) -> Result<(), RuntimeError> {
        if self.both_instances() {
            let lhs_class = self.instance_class(self.peek(1));
            let rhs_class = self.instance_class(self.peek(0));
            if lhs_class != rhs_class {
                return Err(RuntimeError::CrossClassOperands);
            }
            if self.instance_method(self.peek(1), self.hooks.eq).is_some() {
                let hook = self.hooks.eq;
                return self.dispatch_hook_binary(hook);
            }
            // Same class, no `__eq`: identity.
        }
        let b = self.pop();
        let a = self.pop();
        self.push(Value::Bool(a == b))
    }

    fn add_values(&mut self) -> Result<(), RuntimeError> {
        let rhs = self.peek(0);
        let lhs = self.peek(1);
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b))
            }
            (Value::Obj(l), Value::Obj(r)) => {
                enum Joined {
                    Text(String),
                    Table(IndexMap<TableKey, Value>),
                    Array(Vec<Value>),
                    Hook,
                }
                let joined = match (self.heap.get(l), self.heap.get(r)) {
                    (Obj::String(a), Obj::String(b)) => {
                        Joined::Text(format!("{}{}", a.chars, b.chars))
                    }
                    (Obj::Table(a), Obj::Table(b)) => {
                        // Right-biased merge: left entries first, right
                        // entries overwrite.
                        let mut entries = a.entries.clone();
                        for (&key, &value) in &b.entries {
                            entries.insert(key, value);
                        }
                        Joined::Table(entries)
                    }
                    (Obj::Array(a), Obj::Array(b)) => {
                        let mut items = a.clone();
                        items.extend_from_slice(b);
                        Joined::Array(items)
                    }
                    (Obj::Instance(_), Obj::Instance(_)) => Joined::Hook,
                    _ => return Err(RuntimeError::UnjoinableOperands),
                };
                match joined {
                    Joined::Text(text) => {
                        let handle = self.heap.intern(&text);
                        self.pop();
                        self.pop();
                        self.push(Value::Obj(handle))
                    }
                    Joined::Table(entries) => {
                        let handle = self.alloc(Obj::Table(Table { entries }));
                        self.pop();
                        self.pop();
                        self.push(Value::Obj(handle))
                    }
                    Joined::Array(items) => {
                        let handle = self.alloc(Obj::Array(items));
                        self.pop();
                        self.pop();
                        self.push(Value::Obj(handle))
                    }
                    Joined::Hook => {
                        let hook = self.hooks.add;
                        self.dispatch_hook_binary(hook)
                    }
                }
            }
            _ => Err(RuntimeError::UnjoinableOperands),
        }
    }

    // ── Indexing ─────────────────────────────────────────────────────────

    fn index_get(&mut self) -> Result<(), RuntimeError> {
        let key = self.peek(0);
        let target = self.peek(1);
        let Some(handle) = target.as_obj() else {
            return Err(RuntimeError::NotIndexable);
        };
        match self.heap.get(handle) {
            Obj::String(s) => {
                let index = integer_index(key).ok_or(RuntimeError::BadStringIndex)?;
                let ch = s
                    .chars
                    .chars()
                    .nth(index)
                    .ok_or(RuntimeError::StringIndexOutOfBounds)?;
                let result = self.heap.intern(&ch.to_string());
                self.pop();
                self.pop();
                self.push(Value::Obj(result))
            }
            Obj::Array(items) => {
                let index = integer_index(key).ok_or(RuntimeError::BadArrayIndex)?;
                let value = items
                    .get(index)
                    .copied()
                    .ok_or(RuntimeError::ArrayIndexOutOfBounds)?;
                self.pop();
                self.pop();
                self.push(value)
            }
            Obj::Table(table) => {
                let value = table.entries.get(&TableKey::from_value(key)).copied();
                match value {
                    Some(value) => {
                        self.pop();
                        self.pop();
                        self.push(value)
                    }
                    None => Err(RuntimeError::UndefinedKey(self.heap.display_value(key))),
                }
            }
            _ => Err(RuntimeError::NotIndexable),
        }
    }

    fn index_set(&mut self) -> Result<(), RuntimeError> {
        let value = self.peek(0);
        let key = self.peek(1);
        let target = self.peek(2);
        let Some(handle) = target.as_obj() else {
            return Err(RuntimeError::NotIndexable);
        };
        match self.heap.get_mut(handle) {
            Obj::Array(items) => {
                let index = integer_index(key).ok_or(RuntimeError::BadArrayIndex)?;
                match items.get_mut(index) {
                    Some(slot) => *slot = value,
                    None => return Err(RuntimeError::ArrayIndexOutOfBounds),
                }
            }
            Obj::Table(table) => {
                table.entries.insert(TableKey::from_value(key), value);
            }
            Obj::String(_) => return Err(RuntimeError::ImmutableString),
            _ => return Err(RuntimeError::NotIndexable),
        }
        self.pop();
        self.pop();
        self.pop();
        self.push(value)
    }

    // ── Closures and upvalues ────────────────────────────────────────────

    fn make_closure(&mut self) -> Result<(), RuntimeError> {
        let function = match self.read_constant() {
            Value::Obj(handle) => handle,
            _ => unreachable!("closure constant is not a function"),
        };
        let upvalue_count = match self.heap.get(function) {
            Obj::Function(f) => f.upvalue_count,
            _ => unreachable!("closure constant is not a function"),
        };

        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }));
        self.push(Value::Obj(closure))?;

        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            let upvalue = if is_local {
                let base = self.frames.last().expect("no call frame").slots;
                self.capture_upvalue(base + index)
            } else {
                let enclosing = self.frames.last().expect("no call frame").closure;
                match self.heap.get(enclosing) {
                    Obj::Closure(c) => c.upvalues[index],
                    _ => unreachable!("frame closure is not a closure"),
                }
            };
            match self.heap.get_mut(closure) {
                Obj::Closure(c) => c.upvalues.push(upvalue),
                _ => unreachable!("allocated closure vanished"),
            }
        }
        Ok(())
    }

    /// Find or create the open upvalue for `slot`, keeping the open list
    /// strictly descending by slot with at most one entry per slot.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let position = self
            .open_upvalues
            .iter()
            .position(|&(open_slot, _)| open_slot <= slot);
        if let Some(index) = position {
            if self.open_upvalues[index].0 == slot {
                return self.open_upvalues[index].1;
            }
        }
        let upvalue = self.alloc(Obj::Upvalue(Upvalue::Open(slot)));
        let insert_at = position.unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, (slot, upvalue));
        upvalue
    }

    /// Close every open upvalue at or above `boundary`: copy the live stack
    /// value into the upvalue and drop it from the open list.
    fn close_upvalues(&mut self, boundary: usize) {
        while let Some(&(slot, upvalue)) = self.open_upvalues.first() {
            if slot < boundary {
                break;
            }
            let value = self.stack[slot];
            match self.heap.get_mut(upvalue) {
                Obj::Upvalue(u) => *u = Upvalue::Closed(value),
                _ => unreachable!("expected upvalue object"),
            }
            self.open_upvalues.remove(0);
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// A non-negative integral number, as a container index.
fn integer_index(value: Value) -> Option<usize> {
    match value {
        Value::Number(n) if n.fract() == 0.0 && n >= 0.0 && n <= usize::MAX as f64 => {
            Some(n as usize)
        }
        _ => None,
    }
}
