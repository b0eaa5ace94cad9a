//! Lowering of buffer-backed variable accesses to offset-based intrinsics.
//!
//! [`lower_module`] runs, over each function body:
//! 1. [`bulk::BulkCopySplitter`], splitting whole-aggregate copies into
//!    per-element assignments;
//! 2. [`atomics::AtomicRewriter`], redirecting atomic built-in calls to
//!    offset-based atomic intrinsics;
//! 3. the three storage-class drivers ([`ubo`], [`ssbo`], [`shared`]) to a
//!    fixed point, since each rewrite can expose further buffer-backed
//!    dereferences (e.g. a UBO-indexed SSBO access).

use crate::ir::{BlockId, BufferStorage, Module, Stmt, Type, VarDecl, VarId, VarKind};
use crate::mem::layout::{LayoutCache, LayoutConfig, TypeLayout};
use crate::transform::rewrite_stmt_list;
use crate::{Diag, FxIndexMap};
use std::mem;

mod atomics;
mod bulk;
mod plan;
mod shared;
mod ssbo;
mod ubo;


/// One shared variable's allocated range.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SharedSlot {
    pub offset: u32,
    pub size: u32,
}

/// Flat offsets assigned to workgroup-shared variables, scoped to one
/// compilation unit. Entries are created lazily on first reference and are
/// never reassigned or shrunk.
#[derive(Default, Debug)]
pub struct SharedVariableTable {
    slots: FxIndexMap<VarId, SharedSlot>,
    total: u32,
}

impl SharedVariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes allocated so far.
    pub fn total_size(&self) -> u32 {
        self.total
    }

    pub fn slot(&self, var: VarId) -> Option<SharedSlot> {
        self.slots.get(&var).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, SharedSlot)> + '_ {
        self.slots.iter().map(|(&v, &s)| (v, s))
    }

    /// The flat offset of `var`, allocating it past all existing slots on
    /// first reference.
    pub(crate) fn slot_of(&mut self, var: VarId, layout: &TypeLayout) -> Result<u32, Diag> {
        if let Some(slot) = self.slots.get(&var) {
            return Ok(slot.offset);
        }
        if layout.dyn_unit_stride.is_some() {
            return Err(Diag::bug([
                "unsized shared variable of type ".into(),
                layout.ty.clone().into(),
            ]));
        }
        // Aggregates start on a 16-byte boundary even under relaxed packing.
        let align = if layout.ty.is_aggregate() { layout.align.max(16) } else { layout.align };
        let offset = align_or_overflow(self.total, align)?;
        self.total = offset
            .checked_add(layout.size)
            .ok_or_else(|| Diag::bug(["shared memory allocation overflows".into()]))?;
        self.slots.insert(var, SharedSlot { offset, size: layout.size });
        Ok(offset)
    }

    pub(crate) fn check_limit(&self, config: &LayoutConfig) -> Result<(), Diag> {
        let (used, limit) = (self.total, config.max_shared_memory_size);
        if used > limit {
            return Err(Diag::err([format!("too much shared memory used ({used}/{limit})").into()]));
        }
        Ok(())
    }
}

fn align_or_overflow(offset: u32, align: u32) -> Result<u32, Diag> {
    let mask = align.max(1) - 1;
    offset
        .checked_add(mask)
        .map(|o| o & !mask)
        .ok_or_else(|| Diag::bug(["shared memory allocation overflows".into()]))
}

/// The storage class backing a variable, with the owning block where there
/// is one.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum StorageKind {
    Local,
    Uniform(BlockId),
    Storage(BlockId),
    Shared,
}

pub(crate) fn storage_kind(module: &Module, var: VarId) -> StorageKind {
    match module[var].kind {
        VarKind::Local => StorageKind::Local,
        VarKind::Shared => StorageKind::Shared,
        VarKind::BlockInstance { block } | VarKind::BlockField { block, .. } => {
            match module[block].storage {
                BufferStorage::Uniform => StorageKind::Uniform(block),
                BufferStorage::Storage => StorageKind::Storage(block),
            }
        }
    }
}

/// State threaded through every pass over one shader stage.
pub(crate) struct LowerCx<'a> {
    pub module: &'a mut Module,
    pub layouts: LayoutCache,
    pub shared: SharedVariableTable,
    pub config: LayoutConfig,
    tmp_counter: u32,
}

impl LowerCx<'_> {
    /// Declare a fresh local temporary, named for the pass that needed it.
    pub fn new_temp(&mut self, prefix: &str, ty: Type) -> VarId {
        let n = self.tmp_counter;
        self.tmp_counter += 1;
        self.module.declare_var(VarDecl::local(format!("{prefix}{n}"), ty))
    }
}

/// Lower every buffer/shared-backed access in `module`.
///
/// `shared` carries any pre-assigned shared-memory slots (normally empty);
/// the updated table is returned so the caller can hand the final offsets to
/// the backend.
pub fn lower_module(
    module: &mut Module,
    config: &LayoutConfig,
    shared: SharedVariableTable,
) -> Result<SharedVariableTable, Diag> {
    let mut cx = LowerCx {
        module,
        layouts: LayoutCache::new(),
        shared,
        config: *config,
        tmp_counter: 0,
    };
    for i in 0..cx.module.funcs.len() {
        // The body is taken out so passes can declare temporaries while
        // rewriting it.
        let mut body = mem::take(&mut cx.module.funcs[i].body);
        let result = lower_body(&mut cx, &mut body);
        cx.module.funcs[i].body = body;
        result?;
    }
    cx.shared.check_limit(config)?;
    Ok(cx.shared)
}

fn lower_body(cx: &mut LowerCx<'_>, body: &mut Vec<Stmt>) -> Result<(), Diag> {
    // Nested aggregates split over multiple rounds.
    while rewrite_stmt_list(&mut bulk::BulkCopySplitter { cx: &mut *cx }, body)? {}
    while rewrite_stmt_list(&mut atomics::AtomicRewriter { cx: &mut *cx }, body)? {}
    loop {
        let mut changed = rewrite_stmt_list(&mut ubo::UboLowerer { cx: &mut *cx }, body)?;
        changed |= rewrite_stmt_list(&mut ssbo::SsboLowerer { cx: &mut *cx }, body)?;
        changed |= rewrite_stmt_list(&mut shared::SharedLowerer { cx: &mut *cx }, body)?;
        if !changed {
            break;
        }
    }
    Ok(())
}
