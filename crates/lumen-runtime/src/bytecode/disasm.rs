//! Bytecode disassembler
//!
//! Converts a chunk back to a human-readable listing, one instruction per
//! line with offsets, source lines, operands, and resolved jump targets.
//! Purely observational: all state is local to a single invocation, and
//! nothing in the VM or heap is mutated.

use super::{Chunk, OpCode};
use crate::heap::Heap;
use crate::object::Obj;
use crate::value::Value;
use std::fmt::Write;

/// Disassemble a whole chunk.
///
/// # Format
/// ```text
/// == script ==
/// 0000    1 Constant            0  '1'
/// 0002    | Dump
/// 0003    2 Jump                12 (-> 0018)
/// ```
pub fn disassemble(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut output = String::new();
    writeln!(output, "== {name} ==").unwrap();

    let mut offset = 0;
    while offset < chunk.code.len() {
        let line = disassemble_instruction(heap, chunk, &mut offset);
        writeln!(output, "{line}").unwrap();
    }
    output
}

/// Disassemble the instruction at `offset`, advancing it past the operands.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: &mut usize) -> String {
    let start = *offset;
    let line = if start > 0 && chunk.line_at(start) == chunk.line_at(start - 1) {
        "   |".to_string()
    } else {
        format!("{:4}", chunk.line_at(start))
    };

    let byte = chunk.code[start];
    *offset += 1;
    let opcode = match OpCode::try_from(byte) {
        Ok(op) => op,
        Err(_) => return format!("{start:04} {line} <invalid opcode {byte:#04x}>"),
    };

    match opcode {
        // Single-byte constant-pool index
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method
        | OpCode::Property => {
            let index = read_u8(chunk, offset);
            let value = constant_text(heap, chunk, index);
            let name = format!("{opcode:?}");
            format!("{start:04} {line} {name:<16} {index:4}  '{value}'")
        }

        // Single-byte slot or count
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call
        | OpCode::SetTable
        | OpCode::SetArray => {
            let operand = read_u8(chunk, offset);
            let name = format!("{opcode:?}");
            format!("{start:04} {line} {name:<16} {operand:4}")
        }

        // Name index + argument count
        OpCode::Invoke | OpCode::SuperInvoke => {
            let index = read_u8(chunk, offset);
            let argc = read_u8(chunk, offset);
            let name = constant_text(heap, chunk, index);
            let op_name = format!("{opcode:?}");
            format!("{start:04} {line} {op_name:<16} {index:4}  '{name}' ({argc} args)")
        }

        // Big-endian u16 jump offsets
        OpCode::Jump | OpCode::JumpIfFalse => {
            let distance = read_u16(chunk, offset);
            let target = *offset + distance as usize;
            let name = format!("{opcode:?}");
            format!("{start:04} {line} {name:<16} {distance:4} (-> {target:04})")
        }
        OpCode::Loop => {
            let distance = read_u16(chunk, offset);
            let target = *offset - distance as usize;
            let name = format!("{opcode:?}");
            format!("{start:04} {line} {name:<16} {distance:4} (-> {target:04})")
        }

        // Function constant followed by (is_local, index) pairs
        OpCode::Closure => {
            let index = read_u8(chunk, offset);
            let mut text = format!(
                "{start:04} {line} {:<16} {index:4}  '{}'",
                "Closure",
                constant_text(heap, chunk, index)
            );
            let upvalue_count = match chunk.constants.get(index as usize) {
                Some(Value::Obj(handle)) => match heap.get(*handle) {
                    Obj::Function(f) => f.upvalue_count,
                    _ => 0,
                },
                _ => 0,
            };
            for _ in 0..upvalue_count {
                let pair_offset = *offset;
                let is_local = read_u8(chunk, offset) != 0;
                let slot = read_u8(chunk, offset);
                write!(
                    text,
                    "\n{pair_offset:04}    |   {} {slot}",
                    if is_local { "local" } else { "upvalue" }
                )
                .unwrap();
            }
            text
        }

        // No operands
        _ => format!("{start:04} {line} {opcode:?}"),
    }
}

fn read_u8(chunk: &Chunk, offset: &mut usize) -> u8 {
    let value = chunk.code.get(*offset).copied().unwrap_or(0);
    *offset += 1;
    value
}

fn read_u16(chunk: &Chunk, offset: &mut usize) -> u16 {
    let high = u16::from(chunk.code.get(*offset).copied().unwrap_or(0));
    let low = u16::from(chunk.code.get(*offset + 1).copied().unwrap_or(0));
    *offset += 2;
    (high << 8) | low
}

fn constant_text(heap: &Heap, chunk: &Chunk, index: u8) -> String {
    match chunk.constants.get(index as usize) {
        Some(value) => heap.display_value(*value),
        None => format!("<bad constant {index}>"),
    }
}
