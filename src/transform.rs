//! Statement/expression tree rewriting, shared by all the lowering passes.
//!
//! Each pass implements [`Rewriter`] and is driven by [`rewrite_stmt_list`],
//! which walks a function body top-down, splices statement replacements in
//! place, and inserts any prelude statements a rewritten expression needs
//! just before the statement containing it.

use crate::Diag;
use crate::ir::{Expr, Stmt};

/// The result of a rewrite attempt, tracking whether anything was produced.
///
/// Expressing "no change" without cloning the input is what keeps the
/// fixpoint driver cheap on already-lowered trees.
#[derive(Copy, Clone, Debug)]
pub enum Transformed<T> {
    /// The input remains as it was.
    Unchanged,
    /// The input was replaced with this value.
    Changed(T),
}

impl<T> Transformed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transformed<U> {
        match self {
            Transformed::Unchanged => Transformed::Unchanged,
            Transformed::Changed(new) => Transformed::Changed(f(new)),
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Transformed::Changed(_))
    }
}

/// One lowering pass' rewrite rules. Both methods default to `Unchanged`;
/// a pass overrides whichever granularity it works at.
pub trait Rewriter {
    /// Attempt to replace a whole statement with zero or more statements.
    /// When this succeeds the statement's subexpressions are not visited.
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Transformed<Vec<Stmt>>, Diag> {
        let _ = stmt;
        Ok(Transformed::Unchanged)
    }

    /// Attempt to replace one expression, pushing any statements the
    /// replacement needs evaluated first onto `prelude`. Applied top-down;
    /// a successful rewrite ends descent into that subtree.
    fn rewrite_expr(&mut self, expr: &Expr, prelude: &mut Vec<Stmt>) -> Result<Transformed<Expr>, Diag> {
        let _ = (expr, prelude);
        Ok(Transformed::Unchanged)
    }
}

/// Rewrite every statement in `stmts` in place. Returns whether anything
/// changed, so a driver can iterate to a fixed point.
pub fn rewrite_stmt_list(r: &mut impl Rewriter, stmts: &mut Vec<Stmt>) -> Result<bool, Diag> {
    let mut changed = false;
    let mut i = 0;
    while i < stmts.len() {
        match r.rewrite_stmt(&stmts[i])? {
            Transformed::Changed(replacement) => {
                let n = replacement.len();
                stmts.splice(i..=i, replacement);
                changed = true;
                // The replacements are this pass' own output; skip them.
                i += n;
            }
            Transformed::Unchanged => {
                let mut prelude = vec![];
                changed |= rewrite_stmt_exprs(r, &mut stmts[i], &mut prelude)?;
                let n = prelude.len();
                if n > 0 {
                    stmts.splice(i..i, prelude);
                    changed = true;
                }
                i += n + 1;
            }
        }
    }
    Ok(changed)
}

fn rewrite_stmt_exprs(
    r: &mut impl Rewriter,
    stmt: &mut Stmt,
    prelude: &mut Vec<Stmt>,
) -> Result<bool, Diag> {
    match stmt {
        Stmt::Assign { lhs, rhs, .. } => {
            // The left-hand side is a store target: rewriting its chain
            // spine into a load would corrupt the assignment, so only the
            // value-position subexpressions inside it are visited.
            let mut changed = rewrite_lvalue(r, lhs, prelude)?;
            changed |= rewrite_expr_in_place(r, rhs, prelude)?;
            Ok(changed)
        }
        Stmt::Eval(expr) => rewrite_expr_in_place(r, expr, prelude),
        Stmt::If { cond, then_branch, else_branch } => {
            let mut changed = rewrite_expr_in_place(r, cond, prelude)?;
            changed |= rewrite_stmt_list(r, then_branch)?;
            changed |= rewrite_stmt_list(r, else_branch)?;
            Ok(changed)
        }
        Stmt::Loop { body } | Stmt::Block(body) => rewrite_stmt_list(r, body),
    }
}

/// Top-down expression rewriting: offer `expr` to the rewriter, and only on
/// `Unchanged` recurse into its children.
fn rewrite_expr_in_place(
    r: &mut impl Rewriter,
    expr: &mut Expr,
    prelude: &mut Vec<Stmt>,
) -> Result<bool, Diag> {
    if let Transformed::Changed(new) = r.rewrite_expr(expr, prelude)? {
        *expr = new;
        return Ok(true);
    }
    let mut changed = false;
    match expr {
        Expr::Const(_) | Expr::VarRef(_) => {}
        Expr::Index { base, index } => {
            changed |= rewrite_expr_in_place(r, base, prelude)?;
            changed |= rewrite_expr_in_place(r, index, prelude)?;
        }
        Expr::Field { base, .. } | Expr::Swizzle { base, .. } | Expr::ArrayLength { base } => {
            changed |= rewrite_expr_in_place(r, base, prelude)?;
        }
        Expr::Binary { lhs, rhs, .. } => {
            changed |= rewrite_expr_in_place(r, lhs, prelude)?;
            changed |= rewrite_expr_in_place(r, rhs, prelude)?;
        }
        Expr::Construct { args, .. } => {
            for arg in args {
                changed |= rewrite_expr_in_place(r, arg, prelude)?;
            }
        }
        Expr::AtomicCall { args, .. } | Expr::Intrinsic { args, .. } => {
            for arg in args {
                changed |= rewrite_expr_in_place(r, arg, prelude)?;
            }
        }
    }
    Ok(changed)
}

/// Rewrite only the value-position subexpressions of a store target: the
/// indices along the chain spine. The spine nodes themselves are never
/// offered to the rewriter.
fn rewrite_lvalue(
    r: &mut impl Rewriter,
    lvalue: &mut Expr,
    prelude: &mut Vec<Stmt>,
) -> Result<bool, Diag> {
    match lvalue {
        Expr::VarRef(_) => Ok(false),
        Expr::Index { base, index } => {
            let mut changed = rewrite_lvalue(r, base, prelude)?;
            changed |= rewrite_expr_in_place(r, index, prelude)?;
            Ok(changed)
        }
        Expr::Field { base, .. } | Expr::Swizzle { base, .. } => rewrite_lvalue(r, base, prelude),
        // A non-chain left-hand side is not rewritable here; leave it for
        // the pass' own `rewrite_stmt` to diagnose.
        _ => Ok(false),
    }
}
