//! Workgroup-shared-memory access lowering. Offsets come from the
//! [`SharedVariableTable`], which allocates each shared variable a flat
//! slot on its first reference.
//!
//! [`SharedVariableTable`]: crate::lower::SharedVariableTable

use crate::Diag;
use crate::ir::{Expr, Stmt};
use crate::lower::plan::{AccessEmitter, AccessPlanner, ChainRoot, LoadStoreUnit, Walked, walk_chain};
use crate::lower::{LowerCx, StorageKind, storage_kind};
use crate::mem::MemOp;
use crate::transform::{Rewriter, Transformed};

pub(crate) struct SharedLowerer<'a, 'm> {
    pub cx: &'a mut LowerCx<'m>,
}

struct SharedEmitter;

impl AccessEmitter for SharedEmitter {
    fn emit_load(&mut self, unit: &LoadStoreUnit) -> Expr {
        Expr::Intrinsic {
            op: MemOp::SharedLoad { ty: unit.ty.clone() },
            args: vec![unit.offset.materialize()],
        }
    }

    fn emit_store(&mut self, unit: &LoadStoreUnit, value: Expr) -> Stmt {
        Stmt::Eval(Expr::Intrinsic {
            op: MemOp::SharedStore { write_mask: unit.write_mask },
            args: vec![unit.offset.materialize(), value],
        })
    }
}

impl SharedLowerer<'_, '_> {
    fn is_shared_chain(&self, expr: &Expr) -> bool {
        expr.is_chain_node()
            && expr
                .chain_root()
                .is_some_and(|root| storage_kind(self.cx.module, root) == StorageKind::Shared)
    }

    fn walk(&mut self, expr: &Expr) -> Result<Walked, Diag> {
        let walked = walk_chain(self.cx, expr)?
            .ok_or_else(|| Diag::bug(["shared chain failed to resolve".into()]))?;
        match walked.root {
            ChainRoot::Shared => Ok(walked),
            ChainRoot::Block { .. } => {
                Err(Diag::bug(["shared chain resolved to a buffer block".into()]))
            }
        }
    }
}

impl Rewriter for SharedLowerer<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Transformed<Vec<Stmt>>, Diag> {
        let Stmt::Assign { lhs, rhs, write_mask } = stmt else {
            return Ok(Transformed::Unchanged);
        };
        if !self.is_shared_chain(lhs) {
            return Ok(Transformed::Unchanged);
        }
        let walked = self.walk(lhs)?;
        let mut out = vec![];
        AccessPlanner { cx: &mut *self.cx }.lower_store(
            &walked,
            rhs.clone(),
            *write_mask,
            &mut SharedEmitter,
            &mut out,
        )?;
        Ok(Transformed::Changed(out))
    }

    fn rewrite_expr(
        &mut self,
        expr: &Expr,
        prelude: &mut Vec<Stmt>,
    ) -> Result<Transformed<Expr>, Diag> {
        if !self.is_shared_chain(expr) {
            return Ok(Transformed::Unchanged);
        }
        let walked = self.walk(expr)?;
        let loaded =
            AccessPlanner { cx: &mut *self.cx }.lower_load(&walked, &mut SharedEmitter, prelude)?;
        Ok(Transformed::Changed(loaded))
    }
}
