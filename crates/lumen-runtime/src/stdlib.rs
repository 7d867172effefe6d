//! Native functions and the module registry
//!
//! Top-level natives are installed into every VM's globals table. Module
//! natives live in a static registry consulted by the `module(name)` native,
//! which materializes a table of the module's functions (plus whatever its
//! post-init hook adds).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::heap::Heap;
use crate::object::{Native, NativeFn, Obj, Table, TableKey};
use crate::value::Value;
use crate::vm::Vm;

/// One registered module: its name, its natives as `(name, arity, fn)`, and
/// an optional hook run after the functions are inserted.
pub struct ModuleDef {
    pub name: &'static str,
    pub fns: &'static [(&'static str, u8, NativeFn)],
    pub post_init: Option<fn(&mut Heap, &mut Table)>,
}

/// The static module registry.
pub static MODULES: &[ModuleDef] = &[
    ModuleDef {
        name: "math",
        fns: &[
            ("sqrt", 1, math_sqrt),
            ("floor", 1, math_floor),
            ("ceil", 1, math_ceil),
            ("abs", 1, math_abs),
            ("pow", 2, math_pow),
            ("random", 0, math_random),
        ],
        post_init: Some(math_post_init),
    },
    ModuleDef {
        name: "time",
        fns: &[("clock", 0, clock), ("now", 0, time_now)],
        post_init: None,
    },
];

/// Install the top-level natives into a fresh VM.
pub fn install(vm: &mut Vm) {
    vm.define_native("clock", 0, clock);
    vm.define_native("len", 1, len);
    vm.define_native("typeof", 1, type_of);
    vm.define_native("str", 1, to_str);
    vm.define_native("module", 1, module);
}

// ── Top-level natives ────────────────────────────────────────────────────

fn clock(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

fn len(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let length = match args[0].as_obj().map(|handle| heap.get(handle)) {
        Some(Obj::String(s)) => s.chars.chars().count(),
        Some(Obj::Array(items)) => items.len(),
        Some(Obj::Table(table)) => table.entries.len(),
        _ => return Err("len() expects a string, array, or table.".to_string()),
    };
    Ok(Value::Number(length as f64))
}

fn type_of(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let name = heap.type_name(args[0]);
    Ok(Value::Obj(heap.intern(name)))
}

fn to_str(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let text = heap.display_value(args[0]);
    Ok(Value::Obj(heap.intern(&text)))
}

/// Produce a table populated with a registered module's functions.
fn module(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let name = match args[0].as_obj().map(|handle| heap.get(handle)) {
        Some(Obj::String(s)) => s.chars.to_string(),
        _ => return Err("module() expects a module name string.".to_string()),
    };
    let Some(def) = MODULES.iter().find(|m| m.name == name) else {
        return Err(format!("Unknown module '{name}'."));
    };

    let mut table = Table::default();
    for &(fn_name, arity, function) in def.fns {
        let fn_name_handle = heap.intern(fn_name);
        let native = heap.alloc_raw(Obj::Native(Native {
            name: fn_name_handle,
            arity,
            function,
        }));
        table
            .entries
            .insert(TableKey::Obj(fn_name_handle), Value::Obj(native));
    }
    if let Some(post_init) = def.post_init {
        post_init(heap, &mut table);
    }
    Ok(Value::Obj(heap.alloc_raw(Obj::Table(table))))
}

// ── math module ──────────────────────────────────────────────────────────

fn number_arg(args: &[Value], index: usize, name: &str) -> Result<f64, String> {
    args[index]
        .as_number()
        .ok_or_else(|| format!("{name}() expects a number."))
}

fn math_sqrt(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number_arg(args, 0, "sqrt")?.sqrt()))
}

fn math_floor(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number_arg(args, 0, "floor")?.floor()))
}

fn math_ceil(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number_arg(args, 0, "ceil")?.ceil()))
}

fn math_abs(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number_arg(args, 0, "abs")?.abs()))
}

fn math_pow(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let base = number_arg(args, 0, "pow")?;
    let exponent = number_arg(args, 1, "pow")?;
    Ok(Value::Number(base.powf(exponent)))
}

fn math_random(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(rand::random::<f64>()))
}

fn math_post_init(heap: &mut Heap, table: &mut Table) {
    let pi = heap.intern("pi");
    table
        .entries
        .insert(TableKey::Obj(pi), Value::Number(std::f64::consts::PI));
}

// ── time module ──────────────────────────────────────────────────────────

fn time_now(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(elapsed.as_millis() as f64))
}
