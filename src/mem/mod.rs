//! Memory model: access qualifiers, atomic operations, and the offset-based
//! intrinsics the lowering passes emit in place of variable dereferences.
//!
//! An intrinsic's operands ride in the surrounding [`Expr::Intrinsic`]
//! node's argument list; the [`MemOp`] itself carries only the immediates
//! (result type, write mask, access flags). Operand order:
//!
//! * `BufferLoad`: `[block_index, offset]`
//! * `BufferStore`: `[block_index, offset, value]`
//! * `SharedLoad`: `[offset]`
//! * `SharedStore`: `[offset, value]`
//! * `Atomic` (buffer): `[block_index, offset, data]` (`[.., data2]` for
//!   compare-swap); (shared): the same minus `block_index`
//! * `BufferSize`: `[block_index]`
//!
//! `block_index` is the linker-assigned binding, plus the instance index for
//! instanced block arrays. All offsets are in bytes.
//!
//! [`Expr::Intrinsic`]: crate::ir::Expr::Intrinsic

use crate::ir::{Type, WriteMask};
use bitflags::bitflags;

pub mod layout;

#[cfg(test)]
mod layout_tests;

bitflags! {
    /// Memory-access qualifiers attached to SSBO fields, forwarded verbatim
    /// onto every intrinsic touching the qualified memory so the backend can
    /// apply them to the generated accesses.
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
    pub struct MemAccess: u8 {
        const COHERENT = 1 << 0;
        const RESTRICT = 1 << 1;
        const VOLATILE = 1 << 2;
        const READONLY = 1 << 3;
        const WRITEONLY = 1 << 4;
    }
}

/// Atomic read-modify-write operations on a 32-bit integer location.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AtomicOp {
    Add,
    Min,
    Max,
    And,
    Or,
    Xor,
    Exchange,
    /// Two data operands: comparator, then new value.
    CompSwap,
}

impl AtomicOp {
    /// Data operand count (not counting the memory location).
    pub fn data_operands(self) -> usize {
        match self {
            AtomicOp::CompSwap => 2,
            _ => 1,
        }
    }
}

/// Which address space a lowered atomic targets.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AtomicSpace {
    Buffer,
    Shared,
}

/// The closed set of offset-based memory intrinsics. The backend code
/// generator consumes these; nothing upstream of the lowering passes
/// produces them.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MemOp {
    /// Load `ty` bytes' worth of a scalar/vector from a buffer block.
    BufferLoad { ty: Type, access: MemAccess },
    /// Store a scalar/vector into a buffer block, under `write_mask`.
    BufferStore { write_mask: WriteMask, access: MemAccess },
    /// Load a scalar/vector from workgroup-shared memory.
    SharedLoad { ty: Type },
    /// Store a scalar/vector into workgroup-shared memory.
    SharedStore { write_mask: WriteMask },
    /// Atomic read-modify-write at a byte offset; yields the prior value.
    Atomic { op: AtomicOp, ty: Type, space: AtomicSpace, access: MemAccess },
    /// The bound buffer's size in bytes, as a `uint`; the lowered form of
    /// `.length()` feeds this into stride arithmetic.
    BufferSize,
}
