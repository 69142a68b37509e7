//! Control state word
//!
//! Dispatch threads a single `u64` through every transfer of control:
//! bits `[0, 32)` hold the bci, bits `[32, 48)` the stack pointer, and bit
//! 48 selects the materialized continuation frame for local access. A bci
//! of [`RETURN_BCI`] marks a completed activation.

/// Sentinel bci meaning the activation has returned
pub const RETURN_BCI: u32 = 0xFFFF_FFFF;

const SP_SHIFT: u32 = 32;
const BCI_MASK: u64 = 0xFFFF_FFFF;
const SP_MASK: u64 = 0xFFFF << SP_SHIFT;
const CONTINUATION_BIT: u64 = 1 << 48;

/// Pack a state word
#[inline]
pub const fn encode(bci: u32, sp: u16, continuation_frame: bool) -> u64 {
    let mut state = (bci as u64) | ((sp as u64) << SP_SHIFT);
    if continuation_frame {
        state |= CONTINUATION_BIT;
    }
    state
}

/// State word for a completed activation, preserving only the frame bit
#[inline]
pub const fn encode_return(state: u64) -> u64 {
    (state & CONTINUATION_BIT) | (RETURN_BCI as u64)
}

/// Replace the bci, preserving sp and the frame bit
#[inline]
pub const fn with_bci(state: u64, bci: u32) -> u64 {
    (state & !BCI_MASK) | (bci as u64)
}

/// Replace the sp, preserving bci and the frame bit
#[inline]
pub const fn with_sp(state: u64, sp: u16) -> u64 {
    (state & !SP_MASK) | ((sp as u64) << SP_SHIFT)
}

/// Extract the bci
#[inline]
pub const fn bci(state: u64) -> u32 {
    (state & BCI_MASK) as u32
}

/// Extract the stack pointer
#[inline]
pub const fn sp(state: u64) -> u16 {
    ((state & SP_MASK) >> SP_SHIFT) as u16
}

/// Whether local access goes through the materialized continuation frame
#[inline]
pub const fn uses_continuation_frame(state: u64) -> bool {
    state & CONTINUATION_BIT != 0
}

/// Set the continuation frame bit
#[inline]
pub const fn with_continuation_frame(state: u64) -> u64 {
    state | CONTINUATION_BIT
}

/// Clear the continuation frame bit; local access goes to the executing
/// frame itself
#[inline]
pub const fn clear_continuation_frame(state: u64) -> u64 {
    state & !CONTINUATION_BIT
}

/// Whether the activation has completed
#[inline]
pub const fn is_return(state: u64) -> bool {
    bci(state) == RETURN_BCI
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn return_state_preserves_frame_bit() {
        let state = encode(12, 3, true);
        let ret = encode_return(state);
        assert!(is_return(ret));
        assert!(uses_continuation_frame(ret));
        assert!(!uses_continuation_frame(encode_return(encode(12, 3, false))));
    }

    #[test]
    fn with_bci_preserves_rest() {
        let state = encode(100, 7, true);
        let moved = with_bci(state, 42);
        assert_eq!(bci(moved), 42);
        assert_eq!(sp(moved), 7);
        assert!(uses_continuation_frame(moved));
    }

    proptest! {
        #[test]
        fn roundtrip(bci_in in 0u32..RETURN_BCI, sp_in: u16, cont: bool) {
            let state = encode(bci_in, sp_in, cont);
            prop_assert_eq!(bci(state), bci_in);
            prop_assert_eq!(sp(state), sp_in);
            prop_assert_eq!(uses_continuation_frame(state), cont);
            prop_assert!(!is_return(state));
        }

        #[test]
        fn with_sp_only_touches_sp(bci_in in 0u32..RETURN_BCI, sp_a: u16, sp_b: u16, cont: bool) {
            let state = with_sp(encode(bci_in, sp_a, cont), sp_b);
            prop_assert_eq!(bci(state), bci_in);
            prop_assert_eq!(sp(state), sp_b);
            prop_assert_eq!(uses_continuation_frame(state), cont);
        }
    }
}
