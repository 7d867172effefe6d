//! Handle-indexed object heap with mark-and-sweep collection
//!
//! Objects live in a slot arena addressed by [`ObjRef`] handles; freed slots
//! are recycled through a free list. Collection is triggered from allocation
//! sites once the live count crosses a threshold. The caller supplies the
//! root set as a marking closure; the heap adds its own permanent roots (the
//! string interner and the pin stack) before tracing.
//!
//! The interner lives here too: every string creation path goes through
//! [`Heap::intern`], so equal content always yields the same handle.

use std::collections::HashMap;

use crate::object::{Function, LumenString, Obj, ObjRef, TableKey, Upvalue};
use crate::value::{format_number, Value};

/// Live-object count that triggers the first collection.
const GC_INITIAL_THRESHOLD: usize = 256;
/// Growth factor applied to the threshold after each collection.
const GC_HEAP_GROW_FACTOR: usize = 2;

/// Root marker handed to the root-set closure during collection.
pub struct Marker {
    gray: Vec<ObjRef>,
}

impl Marker {
    /// Mark a value as reachable.
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    /// Mark an object as reachable.
    pub fn mark_object(&mut self, handle: ObjRef) {
        self.gray.push(handle);
    }
}

/// The object heap
pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    /// Interner: content to canonical handle. Entries are permanent roots.
    strings: HashMap<Box<str>, ObjRef>,
    /// Temporary roots for objects not yet reachable from the VM, e.g. the
    /// functions of an in-progress compilation.
    pins: Vec<ObjRef>,
    live: usize,
    next_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: HashMap::new(),
            pins: Vec::new(),
            live: 0,
            next_gc: GC_INITIAL_THRESHOLD,
        }
    }

    /// Number of live objects, interned strings included.
    pub fn live_objects(&self) -> usize {
        self.live
    }

    // ── Allocation ───────────────────────────────────────────────────────

    /// Allocate without considering collection. Used where the new object
    /// would not yet be visible to the root set; the next [`Self::maybe_collect`]
    /// settles the books.
    pub fn alloc_raw(&mut self, obj: Obj) -> ObjRef {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(obj));
                ObjRef(index)
            }
        }
    }

    /// Allocate and pin, keeping the object alive until the pin stack is
    /// truncated past it.
    pub fn alloc_pinned(&mut self, obj: Obj) -> ObjRef {
        let handle = self.alloc_raw(obj);
        self.pins.push(handle);
        handle
    }

    /// Intern a string, returning the canonical handle for its content.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        if let Some(&handle) = self.strings.get(s) {
            return handle;
        }
        let boxed: Box<str> = s.into();
        let handle = self.alloc_raw(Obj::String(LumenString::new(boxed.clone())));
        self.strings.insert(boxed, handle);
        handle
    }

    // ── Pins ─────────────────────────────────────────────────────────────

    pub fn pin(&mut self, handle: ObjRef) {
        self.pins.push(handle);
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn truncate_pins(&mut self, len: usize) {
        self.pins.truncate(len);
    }

    // ── Collection ───────────────────────────────────────────────────────

    /// Collect if the live count has crossed the threshold. `mark_roots`
    /// must mark everything reachable from the caller's state; interned
    /// strings and pinned objects are added by the heap itself.
    pub fn maybe_collect(&mut self, mark_roots: impl FnOnce(&mut Marker)) {
        if self.live >= self.next_gc {
            self.collect_now(mark_roots);
        }
    }

    /// Unconditionally run a full mark-and-sweep cycle.
    pub fn collect_now(&mut self, mark_roots: impl FnOnce(&mut Marker)) {
        let mut marker = Marker { gray: Vec::new() };
        mark_roots(&mut marker);
        for &handle in self.strings.values() {
            marker.gray.push(handle);
        }
        for &handle in &self.pins {
            marker.gray.push(handle);
        }

        let mut marked = vec![false; self.slots.len()];
        let mut gray = marker.gray;
        while let Some(handle) = gray.pop() {
            let index = handle.index();
            if marked[index] {
                continue;
            }
            marked[index] = true;
            if let Some(obj) = &self.slots[index] {
                trace_children(obj, &mut gray);
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marked[index] {
                *slot = None;
                self.free.push(index as u32);
                self.live -= 1;
            }
        }
        self.next_gc = (self.live * GC_HEAP_GROW_FACTOR).max(GC_INITIAL_THRESHOLD);
    }

    // ── Access ───────────────────────────────────────────────────────────

    /// Look up an object. The handle must be live; the compiler and VM only
    /// hold handles the collector can see, so a dead handle is a bug.
    pub fn get(&self, handle: ObjRef) -> &Obj {
        self.slots[handle.index()]
            .as_ref()
            .unwrap_or_else(|| unreachable!("use of collected object slot {}", handle.index()))
    }

    pub fn get_mut(&mut self, handle: ObjRef) -> &mut Obj {
        self.slots[handle.index()]
            .as_mut()
            .unwrap_or_else(|| unreachable!("use of collected object slot {}", handle.index()))
    }

    /// The function behind a closure handle.
    pub fn closure_function(&self, closure: ObjRef) -> &Function {
        match self.get(closure) {
            Obj::Closure(c) => match self.get(c.function) {
                Obj::Function(f) => f,
                _ => unreachable!("closure over non-function"),
            },
            _ => unreachable!("expected closure object"),
        }
    }

    /// The character content of a string object.
    pub fn string_slice(&self, handle: ObjRef) -> &str {
        match self.get(handle) {
            Obj::String(s) => &s.chars,
            _ => unreachable!("expected string object"),
        }
    }

    // ── Display ──────────────────────────────────────────────────────────

    /// Render a value the way `dump` prints it.
    pub fn display_value(&self, value: Value) -> String {
        self.display(value, false)
    }

    fn display(&self, value: Value, in_container: bool) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(handle) => match self.get(handle) {
                Obj::String(s) => {
                    if in_container {
                        format!("\"{}\"", s.chars)
                    } else {
                        s.chars.to_string()
                    }
                }
                Obj::Function(f) => match f.name {
                    Some(name) => format!("<fn {}>", self.string_slice(name)),
                    None => "<script>".to_string(),
                },
                Obj::Closure(c) => self.display(Value::Obj(c.function), in_container),
                Obj::Upvalue(_) => "<upvalue>".to_string(),
                Obj::Class(c) => format!("<class {}>", self.string_slice(c.name)),
                Obj::Instance(i) => {
                    let class_name = match self.get(i.class) {
                        Obj::Class(c) => self.string_slice(c.name),
                        _ => unreachable!("instance of non-class"),
                    };
                    format!("<instance of {class_name}>")
                }
                Obj::BoundMethod(_) => "<bound method>".to_string(),
                Obj::Native(_) => "<native fn>".to_string(),
                Obj::Table(t) => {
                    let entries: Vec<String> = t
                        .entries
                        .iter()
                        .map(|(k, v)| {
                            format!(
                                "{}: {}",
                                self.display(k.to_value(), true),
                                self.display(*v, true)
                            )
                        })
                        .collect();
                    format!("{{{}}}", entries.join(", "))
                }
                Obj::Array(items) => {
                    let rendered: Vec<String> =
                        items.iter().map(|v| self.display(*v, true)).collect();
                    format!("[{}]", rendered.join(", "))
                }
            },
        }
    }

    /// Short type name for diagnostics and the `typeof` native.
    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Obj(handle) => match self.get(handle) {
                Obj::String(_) => "string",
                Obj::Function(_) | Obj::Closure(_) => "function",
                Obj::Upvalue(_) => "upvalue",
                Obj::Class(_) => "class",
                Obj::Instance(_) => "instance",
                Obj::BoundMethod(_) => "function",
                Obj::Native(_) => "function",
                Obj::Table(_) => "table",
                Obj::Array(_) => "array",
            },
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn trace_children(obj: &Obj, gray: &mut Vec<ObjRef>) {
    let push_value = |gray: &mut Vec<ObjRef>, value: Value| {
        if let Value::Obj(handle) = value {
            gray.push(handle);
        }
    };
    match obj {
        Obj::String(_) => {}
        Obj::Function(f) => {
            if let Some(name) = f.name {
                gray.push(name);
            }
            for &constant in &f.chunk.constants {
                push_value(gray, constant);
            }
        }
        Obj::Closure(c) => {
            gray.push(c.function);
            gray.extend_from_slice(&c.upvalues);
        }
        Obj::Upvalue(Upvalue::Closed(value)) => push_value(gray, *value),
        Obj::Upvalue(Upvalue::Open(_)) => {}
        Obj::Class(c) => {
            gray.push(c.name);
            for (&name, &method) in &c.methods {
                gray.push(name);
                push_value(gray, method);
            }
            for (&name, &default) in &c.defaults {
                gray.push(name);
                push_value(gray, default);
            }
        }
        Obj::Instance(i) => {
            gray.push(i.class);
            for (&name, &field) in &i.fields {
                gray.push(name);
                push_value(gray, field);
            }
        }
        Obj::BoundMethod(b) => {
            push_value(gray, b.receiver);
            gray.push(b.method);
        }
        Obj::Native(n) => gray.push(n.name),
        Obj::Table(t) => {
            for (&key, &value) in &t.entries {
                if let TableKey::Obj(handle) = key {
                    gray.push(handle);
                }
                push_value(gray, value);
            }
        }
        Obj::Array(items) => {
            for &item in items {
                push_value(gray, item);
            }
        }
    }
}
