//! Atomic built-in redirection.
//!
//! An atomic call whose first operand dereferences a buffer- or
//! shared-backed scalar becomes an offset-based atomic intrinsic carrying
//! the owning block index (buffer only), the byte offset, the data
//! operand(s), and the field's access flags. The operand is always a plain
//! scalar, so planning never produces more than one unit.

use crate::Diag;
use crate::ir::{Expr, Stmt, TypeKind};
use crate::lower::plan::{ChainRoot, walk_chain};
use crate::lower::{LowerCx, StorageKind, storage_kind};
use crate::mem::{AtomicSpace, MemOp};
use crate::transform::{Rewriter, Transformed};

pub(crate) struct AtomicRewriter<'a, 'm> {
    pub cx: &'a mut LowerCx<'m>,
}

impl Rewriter for AtomicRewriter<'_, '_> {
    fn rewrite_expr(
        &mut self,
        expr: &Expr,
        _prelude: &mut Vec<Stmt>,
    ) -> Result<Transformed<Expr>, Diag> {
        let Expr::AtomicCall { op, args } = expr else {
            return Ok(Transformed::Unchanged);
        };
        let Some(target) = args.first() else {
            return Err(Diag::bug(["atomic call without a target operand".into()]));
        };
        let storage = target.chain_root().map(|root| storage_kind(self.cx.module, root));
        match storage {
            Some(StorageKind::Storage(_) | StorageKind::Shared) => {}
            Some(StorageKind::Uniform(_)) => {
                return Err(Diag::bug(["atomic on a read-only uniform block".into()]));
            }
            Some(StorageKind::Local) | None => return Ok(Transformed::Unchanged),
        }
        if args.len() - 1 != op.data_operands() {
            return Err(Diag::bug(["atomic call with a wrong operand count".into()]));
        }

        let walked = walk_chain(self.cx, target)?
            .ok_or_else(|| Diag::bug(["atomic target failed to resolve".into()]))?;
        if !matches!(&*walked.ty, TypeKind::Scalar(_))
            || walked.matrix_stride.is_some()
            || walked.swizzle.is_some()
        {
            return Err(Diag::bug([
                "atomic target is not a plain scalar: ".into(),
                walked.ty.clone().into(),
            ]));
        }

        let mut intrinsic_args: Vec<Expr> = Vec::new();
        let space = match &walked.root {
            ChainRoot::Block { index, .. } => {
                intrinsic_args.push(index.clone());
                AtomicSpace::Buffer
            }
            ChainRoot::Shared => AtomicSpace::Shared,
        };
        intrinsic_args.push(walked.offset.materialize());
        intrinsic_args.extend(args.iter().skip(1).cloned());

        Ok(Transformed::Changed(Expr::Intrinsic {
            op: MemOp::Atomic {
                op: *op,
                ty: walked.ty.clone(),
                space,
                access: walked.access,
            },
            args: intrinsic_args,
        }))
    }
}
