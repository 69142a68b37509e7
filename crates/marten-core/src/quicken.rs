//! Quickening policy
//!
//! The dispatch loop reports what it observed at a site; this module picks
//! the rewrite target. Rewrites only walk up the family lattice: a pristine
//! generic site takes its first observed specialization, any conflicting
//! later observation lands on the terminal boxed form, and pinned sites
//! skip the intermediate step entirely. All paths go through
//! [`BytecodeUnit::rewrite_opcode`], so a racing rewrite can never change
//! an instruction's length or family.

use marten_bytecode::{BytecodeUnit, Opcode};

use crate::local_tags::LocalTag;

/// Rewrite `bci` toward `desired`, a specialized sibling the loop just
/// observed evidence for.
pub(crate) fn quicken_to(unit: &BytecodeUnit, bci: u32, desired: Opcode, pinned: bool) {
    let Some(current) = unit.opcode_at(bci) else {
        return;
    };
    let target = if pinned && desired != current.generic() {
        match current.generic().boxed_form() {
            Some(boxed) => boxed,
            None => return,
        }
    } else if current == current.generic() {
        desired
    } else if current == desired {
        return;
    } else {
        // conflicting specializations converge on the boxed form
        match current.generic().boxed_form() {
            Some(boxed) => boxed,
            None => return,
        }
    };
    if target != current {
        tracing::trace!(bci, from = %current, to = %target, "quicken");
        // a concurrent rewrite of the same site is fine, both targets are
        // in the family
        let _ = unit.rewrite_opcode(bci, target);
    }
}

/// Deoptimize `bci` to its terminal boxed form after a failed fast path
pub(crate) fn generalize(unit: &BytecodeUnit, bci: u32) {
    let Some(current) = unit.opcode_at(bci) else {
        return;
    };
    if let Some(boxed) = current.boxed_form()
        && boxed != current
    {
        tracing::trace!(bci, from = %current, to = %boxed, "generalize");
        let _ = unit.rewrite_opcode(bci, boxed);
    }
}

/// Specialized load form for a cached local tag
pub(crate) fn load_for_tag(tag: LocalTag) -> Opcode {
    match tag {
        LocalTag::Bool => Opcode::LoadLocalBool,
        LocalTag::Int => Opcode::LoadLocalInt,
        LocalTag::Long => Opcode::LoadLocalLong,
        LocalTag::Double => Opcode::LoadLocalDouble,
        LocalTag::Illegal | LocalTag::Object => Opcode::LoadLocalBoxed,
    }
}

/// Specialized store form for a cached local tag
pub(crate) fn store_for_tag(tag: LocalTag) -> Opcode {
    match tag {
        LocalTag::Bool => Opcode::StoreLocalBool,
        LocalTag::Int => Opcode::StoreLocalInt,
        LocalTag::Long => Opcode::StoreLocalLong,
        LocalTag::Double => Opcode::StoreLocalDouble,
        LocalTag::Illegal | LocalTag::Object => Opcode::StoreLocalBoxed,
    }
}
