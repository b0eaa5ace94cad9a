//! Uniform-buffer access lowering. UBO chains only ever produce loads;
//! a UBO-rooted store target is a front-end defect.

use crate::Diag;
use crate::ir::{Expr, Stmt};
use crate::lower::plan::{AccessEmitter, AccessPlanner, ChainRoot, LoadStoreUnit, walk_chain};
use crate::lower::{LowerCx, StorageKind, storage_kind};
use crate::mem::{MemAccess, MemOp};
use crate::transform::{Rewriter, Transformed};

pub(crate) struct UboLowerer<'a, 'm> {
    pub cx: &'a mut LowerCx<'m>,
}

struct UboEmitter {
    block_index: Expr,
    access: MemAccess,
}

impl AccessEmitter for UboEmitter {
    fn emit_load(&mut self, unit: &LoadStoreUnit) -> Expr {
        Expr::Intrinsic {
            op: MemOp::BufferLoad { ty: unit.ty.clone(), access: self.access },
            args: vec![self.block_index.clone(), unit.offset.materialize()],
        }
    }

    fn emit_store(&mut self, _unit: &LoadStoreUnit, _value: Expr) -> Stmt {
        // `rewrite_stmt` rejects UBO store targets before planning starts.
        unreachable!("store into a uniform block")
    }
}

impl Rewriter for UboLowerer<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Transformed<Vec<Stmt>>, Diag> {
        if let Stmt::Assign { lhs, .. } = stmt
            && let Some(root) = lhs.chain_root()
            && let StorageKind::Uniform(_) = storage_kind(self.cx.module, root)
        {
            return Err(Diag::bug(["assignment into a read-only uniform block".into()]));
        }
        Ok(Transformed::Unchanged)
    }

    fn rewrite_expr(
        &mut self,
        expr: &Expr,
        prelude: &mut Vec<Stmt>,
    ) -> Result<Transformed<Expr>, Diag> {
        if !expr.is_chain_node() {
            return Ok(Transformed::Unchanged);
        }
        let Some(root) = expr.chain_root() else { return Ok(Transformed::Unchanged) };
        if !matches!(storage_kind(self.cx.module, root), StorageKind::Uniform(_)) {
            return Ok(Transformed::Unchanged);
        }
        let walked = walk_chain(self.cx, expr)?
            .ok_or_else(|| Diag::bug(["uniform chain failed to resolve".into()]))?;
        let mut emitter = match &walked.root {
            ChainRoot::Block { index, .. } => {
                UboEmitter { block_index: index.clone(), access: walked.access }
            }
            ChainRoot::Shared => {
                return Err(Diag::bug(["uniform chain resolved to shared storage".into()]));
            }
        };
        let loaded =
            AccessPlanner { cx: &mut *self.cx }.lower_load(&walked, &mut emitter, prelude)?;
        Ok(Transformed::Changed(loaded))
    }
}
