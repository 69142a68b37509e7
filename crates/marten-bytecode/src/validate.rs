//! Descriptor validation
//!
//! Runs once at build time so the dispatch loop can trust the stream: every
//! instruction decodes, every index-like immediate is in bounds for its
//! table, and every branch or handler entry lands on an instruction
//! boundary. The loop itself never re-checks any of this.

use rustc_hash::FxHashSet;

use crate::builder::CodeDescriptor;
use crate::error::{BytecodeError, Result};
use crate::opcode::{ImmediateKind, Opcode};

fn read_u16(words: &[u16], at: u32) -> u32 {
    words[at as usize] as u32
}

fn read_u32(words: &[u16], at: u32) -> u32 {
    words[at as usize] as u32 | ((words[at as usize + 1] as u32) << 16)
}

/// Validate a freshly built descriptor
pub fn validate(descriptor: &CodeDescriptor) -> Result<()> {
    let words = &descriptor.words;
    let len = words.len() as u32;

    // First pass: decode the walk and collect instruction starts.
    let mut starts = FxHashSet::default();
    let mut bci = 0u32;
    while bci < len {
        let raw = words[bci as usize];
        let op = Opcode::from_raw(raw).ok_or(BytecodeError::InvalidOpcode { raw, bci })?;
        if op.is_quickened() {
            return Err(BytecodeError::Builder(format!(
                "quickened opcode {op} at bci {bci} in pristine template"
            )));
        }
        if bci + op.len() > len {
            return Err(BytecodeError::TruncatedInstruction { bci });
        }
        starts.insert(bci);
        bci += op.len();
    }

    // Second pass: bounds-check every immediate now that starts are known.
    let mut bci = 0u32;
    while bci < len {
        let op = Opcode::from_raw(words[bci as usize]).expect("checked in first pass");
        for imm in op.immediates() {
            let at = bci + imm.offset;
            let check = |value: u32, limit: u32, kind: &'static str| -> Result<()> {
                if value >= limit {
                    return Err(BytecodeError::ImmediateOutOfBounds {
                        kind,
                        value,
                        limit,
                        bci,
                    });
                }
                Ok(())
            };
            match imm.kind {
                ImmediateKind::BranchTarget => {
                    let target = read_u32(words, at);
                    if !starts.contains(&target) {
                        return Err(BytecodeError::MisalignedBranchTarget { target, bci });
                    }
                }
                ImmediateKind::StackPointer => {
                    let sp = read_u16(words, at);
                    if sp > descriptor.max_stack as u32 {
                        return Err(BytecodeError::ImmediateOutOfBounds {
                            kind: "stack pointer",
                            value: sp,
                            limit: descriptor.max_stack as u32 + 1,
                            bci,
                        });
                    }
                }
                ImmediateKind::FrameIndex => {
                    check(read_u16(words, at), descriptor.max_locals as u32, "frame index")?;
                }
                // materialized access names a sibling root and an index into
                // that root's local table; neither can be checked until the
                // root set is assembled
                ImmediateKind::LocalRoot | ImmediateKind::LocalIndex => {}
                ImmediateKind::ConstantIndex => {
                    check(read_u16(words, at), descriptor.constants.len() as u32, "constant index")?;
                }
                ImmediateKind::BranchProfile => {
                    check(
                        read_u16(words, at),
                        descriptor.branch_profile_count as u32,
                        "branch profile",
                    )?;
                }
                ImmediateKind::LoopCounter => {
                    check(
                        read_u16(words, at),
                        descriptor.loop_counter_count as u32,
                        "loop counter",
                    )?;
                }
                ImmediateKind::TagNode => {
                    check(read_u16(words, at), descriptor.tag_node_count as u32, "tag node")?;
                }
                // literal kinds carry no table reference
                _ => {}
            }
        }
        bci += op.len();
    }

    // Handler table: well-formed guard ranges, aligned entry points.
    for (index, entry) in descriptor.handlers.iter().enumerate() {
        if entry.start > entry.end || entry.end > len {
            return Err(BytecodeError::InvalidHandlerRange {
                index,
                start: entry.start,
                end: entry.end,
                len,
            });
        }
        if !starts.contains(&entry.handler_bci) {
            return Err(BytecodeError::MisalignedBranchTarget {
                target: entry.handler_bci,
                bci: entry.start,
            });
        }
        if entry.handler_sp > descriptor.max_stack {
            return Err(BytecodeError::ImmediateOutOfBounds {
                kind: "handler stack pointer",
                value: entry.handler_sp as u32,
                limit: descriptor.max_stack as u32 + 1,
                bci: entry.start,
            });
        }
        if entry.kind == crate::handler::HandlerKind::TagExceptional
            && entry.tag_node >= descriptor.tag_node_count
        {
            return Err(BytecodeError::ImmediateOutOfBounds {
                kind: "tag node",
                value: entry.tag_node as u32,
                limit: descriptor.tag_node_count as u32,
                bci: entry.start,
            });
        }
    }

    // Local descriptors must reference frame slots that exist.
    for (index, d) in descriptor.locals.iter().enumerate() {
        if d.frame_index >= descriptor.max_locals {
            return Err(BytecodeError::InvalidLocalDescriptor {
                index,
                frame_index: d.frame_index,
                max_locals: descriptor.max_locals,
            });
        }
    }

    Ok(())
}
