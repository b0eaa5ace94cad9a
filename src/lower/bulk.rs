//! Whole-aggregate copy splitting.
//!
//! An assignment copying an entire array or struct out of (or into)
//! buffer/shared storage would otherwise lower to one aggregate load
//! followed by one aggregate store, keeping every element's value live at
//! once. Splitting it into per-element assignments first bounds the peak
//! live-value count to one element, and lets each element lower
//! independently. Nested aggregates split over successive rounds.

use crate::Diag;
use crate::ir::{Expr, Stmt, TypeKind, WriteMask};
use crate::lower::{LowerCx, StorageKind, storage_kind};
use crate::transform::{Rewriter, Transformed};

pub(crate) struct BulkCopySplitter<'a, 'm> {
    pub cx: &'a mut LowerCx<'m>,
}

impl BulkCopySplitter<'_, '_> {
    fn is_lowered_chain(&self, expr: &Expr) -> bool {
        expr.is_chain_node()
            && expr
                .chain_root()
                .is_some_and(|root| storage_kind(self.cx.module, root) != StorageKind::Local)
    }
}

impl Rewriter for BulkCopySplitter<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Transformed<Vec<Stmt>>, Diag> {
        let Stmt::Assign { lhs, rhs, .. } = stmt else {
            return Ok(Transformed::Unchanged);
        };
        // Both sides must be plain dereference chains of the same aggregate
        // type, with at least one side backed by buffer/shared storage.
        if !lhs.is_chain_node() || !rhs.is_chain_node() {
            return Ok(Transformed::Unchanged);
        }
        if !self.is_lowered_chain(lhs) && !self.is_lowered_chain(rhs) {
            return Ok(Transformed::Unchanged);
        }
        let ty = lhs.type_of(self.cx.module);
        if ty != rhs.type_of(self.cx.module) {
            return Err(Diag::bug(["aggregate copy between mismatched types".into()]));
        }

        let split = match &*ty {
            TypeKind::Array { elem, len: Some(len) } => {
                let mask = WriteMask::for_type(elem);
                (0..len.get())
                    .map(|i| Stmt::Assign {
                        lhs: Expr::index(lhs.clone(), Expr::u32(i)),
                        rhs: Expr::index(rhs.clone(), Expr::u32(i)),
                        write_mask: mask,
                    })
                    .collect()
            }
            TypeKind::Array { len: None, .. } => {
                return Err(Diag::bug(["aggregate copy of an unsized array".into()]));
            }
            TypeKind::Struct(def) => def
                .fields
                .iter()
                .enumerate()
                .map(|(i, field)| Stmt::Assign {
                    lhs: Expr::field(lhs.clone(), i as u32),
                    rhs: Expr::field(rhs.clone(), i as u32),
                    write_mask: WriteMask::for_type(&field.ty),
                })
                .collect(),
            // Scalars, vectors and matrices lower as units.
            TypeKind::Scalar(_) | TypeKind::Vector { .. } | TypeKind::Matrix { .. } => {
                return Ok(Transformed::Unchanged);
            }
        };
        Ok(Transformed::Changed(split))
    }
}
