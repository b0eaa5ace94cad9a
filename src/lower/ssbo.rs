//! Shader-storage-buffer access lowering: loads, stores, and the unsized
//! trailing array's `.length()` query. Per-field access flags (coherent/
//! restrict/volatile/readonly/writeonly) ride on every emitted intrinsic.

use crate::Diag;
use crate::ir::{BinOp, Const, Expr, Stmt, TypeKind};
use crate::lower::plan::{AccessEmitter, AccessPlanner, ChainRoot, LoadStoreUnit, walk_chain};
use crate::lower::{LowerCx, StorageKind, storage_kind};
use crate::mem::{MemAccess, MemOp};
use crate::transform::{Rewriter, Transformed};

pub(crate) struct SsboLowerer<'a, 'm> {
    pub cx: &'a mut LowerCx<'m>,
}

struct SsboEmitter {
    block_index: Expr,
    access: MemAccess,
}

impl AccessEmitter for SsboEmitter {
    fn emit_load(&mut self, unit: &LoadStoreUnit) -> Expr {
        Expr::Intrinsic {
            op: MemOp::BufferLoad { ty: unit.ty.clone(), access: self.access },
            args: vec![self.block_index.clone(), unit.offset.materialize()],
        }
    }

    fn emit_store(&mut self, unit: &LoadStoreUnit, value: Expr) -> Stmt {
        Stmt::Eval(Expr::Intrinsic {
            op: MemOp::BufferStore { write_mask: unit.write_mask, access: self.access },
            args: vec![self.block_index.clone(), unit.offset.materialize(), value],
        })
    }
}

impl SsboLowerer<'_, '_> {
    fn is_ssbo_chain(&self, expr: &Expr) -> bool {
        expr.is_chain_node()
            && expr
                .chain_root()
                .is_some_and(|root| matches!(storage_kind(self.cx.module, root), StorageKind::Storage(_)))
    }

    /// Lower `chain.length()` on the unsized trailing array:
    /// `max(0, (buffer_size - base_offset) / stride)`.
    fn lower_length(&mut self, base: &Expr) -> Result<Expr, Diag> {
        let walked = walk_chain(self.cx, base)?
            .ok_or_else(|| Diag::bug(["length query on a non-buffer chain".into()]))?;
        let index = match &walked.root {
            ChainRoot::Block { index, .. } => index.clone(),
            ChainRoot::Shared => {
                return Err(Diag::bug(["length query on shared storage".into()]));
            }
        };
        if !matches!(&*walked.ty, TypeKind::Array { len: None, .. }) {
            return Err(Diag::bug([
                "length query on sized type ".into(),
                walked.ty.clone().into(),
            ]));
        }
        let layout = walked.layout(self.cx)?;
        let stride = layout
            .dyn_unit_stride
            .ok_or_else(|| Diag::bug(["unsized array without a stride".into()]))?;
        // The array is the block's trailing field, so its base offset is
        // always a compile-time constant.
        let base_offset = walked
            .offset
            .as_const()
            .ok_or_else(|| Diag::bug(["unsized array at a runtime offset".into()]))?;
        let buffer_size = Expr::Intrinsic { op: MemOp::BufferSize, args: vec![index] };
        let elems = Expr::binary(
            BinOp::IDiv,
            Expr::binary(BinOp::ISub, buffer_size, Expr::u32(base_offset)),
            Expr::u32(stride.get()),
        );
        // `.length()` is signed; clamp in case the bound buffer is smaller
        // than the fixed part of the block.
        Ok(Expr::binary(BinOp::IMax, Expr::Const(Const::I32(0)), elems))
    }
}

impl Rewriter for SsboLowerer<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Transformed<Vec<Stmt>>, Diag> {
        let Stmt::Assign { lhs, rhs, write_mask } = stmt else {
            return Ok(Transformed::Unchanged);
        };
        if !self.is_ssbo_chain(lhs) {
            return Ok(Transformed::Unchanged);
        }
        let walked = walk_chain(self.cx, lhs)?
            .ok_or_else(|| Diag::bug(["storage chain failed to resolve".into()]))?;
        let mut emitter = match &walked.root {
            ChainRoot::Block { index, .. } => {
                SsboEmitter { block_index: index.clone(), access: walked.access }
            }
            ChainRoot::Shared => {
                return Err(Diag::bug(["storage chain resolved to shared storage".into()]));
            }
        };
        let mut out = vec![];
        AccessPlanner { cx: &mut *self.cx }.lower_store(
            &walked,
            rhs.clone(),
            *write_mask,
            &mut emitter,
            &mut out,
        )?;
        Ok(Transformed::Changed(out))
    }

    fn rewrite_expr(
        &mut self,
        expr: &Expr,
        prelude: &mut Vec<Stmt>,
    ) -> Result<Transformed<Expr>, Diag> {
        if let Expr::ArrayLength { base } = expr {
            if self.is_ssbo_chain(base) {
                return Ok(Transformed::Changed(self.lower_length(base)?));
            }
            return Ok(Transformed::Unchanged);
        }
        if !self.is_ssbo_chain(expr) {
            return Ok(Transformed::Unchanged);
        }
        let walked = walk_chain(self.cx, expr)?
            .ok_or_else(|| Diag::bug(["storage chain failed to resolve".into()]))?;
        let mut emitter = match &walked.root {
            ChainRoot::Block { index, .. } => {
                SsboEmitter { block_index: index.clone(), access: walked.access }
            }
            ChainRoot::Shared => {
                return Err(Diag::bug(["storage chain resolved to shared storage".into()]));
            }
        };
        let loaded =
            AccessPlanner { cx: &mut *self.cx }.lower_load(&walked, &mut emitter, prelude)?;
        Ok(Transformed::Changed(loaded))
    }
}
