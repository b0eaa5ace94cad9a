//! Offset planning: turning a dereference chain into a base offset plus a
//! tree of scalar/vector load-store units.
//!
//! [`walk_chain`] resolves a chain to its root storage, folding constant
//! array indices into the byte offset and stride-multiplying dynamic ones.
//! [`AccessPlanner`] then decomposes the accessed type into
//! [`LoadStoreUnit`]s, each small enough for one intrinsic, and hands them
//! to the calling driver's [`AccessEmitter`].

use crate::Diag;
use crate::ir::{
    BinOp, BlockId, Expr, MatrixLayout, Packing, Stmt, SwizzleComps, Type, TypeKind, VarId,
    VarKind, WriteMask,
};
use crate::lower::{LowerCx, StorageKind, storage_kind};
use crate::mem::MemAccess;
use crate::mem::layout::{Components, TypeLayout};
use itertools::Itertools as _;
use std::num::NonZeroU32;
use std::rc::Rc;

/// A byte offset: compile-time constant part plus an optional runtime part.
///
/// Strides are folded into the runtime term as it is built; after
/// construction the two parts are only ever summed.
#[derive(Clone, Debug)]
pub(crate) struct OffsetExpr {
    constant: u32,
    dynamic: Option<Expr>,
}

impl OffsetExpr {
    pub fn zero() -> Self {
        Self { constant: 0, dynamic: None }
    }

    /// `Some` only when there is no runtime component.
    pub fn as_const(&self) -> Option<u32> {
        self.dynamic.is_none().then_some(self.constant)
    }

    pub fn add_const(&mut self, bytes: u32) -> Result<(), Diag> {
        self.constant = self
            .constant
            .checked_add(bytes)
            .ok_or_else(|| Diag::bug(["byte offset overflows".into()]))?;
        Ok(())
    }

    /// Add `index * stride`, folding into the constant part when `index` is
    /// a compile-time constant.
    pub fn add_index(&mut self, index: &Expr, stride: u32) -> Result<(), Diag> {
        match index.as_const_u32() {
            Some(i) => {
                let bytes = i
                    .checked_mul(stride)
                    .ok_or_else(|| Diag::bug(["byte offset overflows".into()]))?;
                self.add_const(bytes)
            }
            None => {
                let term = Expr::binary(BinOp::IMul, index.clone(), Expr::u32(stride));
                self.dynamic = Some(match self.dynamic.take() {
                    Some(dynamic) => Expr::binary(BinOp::IAdd, dynamic, term),
                    None => term,
                });
                Ok(())
            }
        }
    }

    /// The offset as a single expression operand.
    pub fn materialize(&self) -> Expr {
        match (&self.dynamic, self.constant) {
            (None, c) => Expr::u32(c),
            (Some(dynamic), 0) => dynamic.clone(),
            (Some(dynamic), c) => Expr::binary(BinOp::IAdd, dynamic.clone(), Expr::u32(c)),
        }
    }
}

/// One intrinsic's worth of memory access: a scalar or vector at an offset.
pub(crate) struct LoadStoreUnit {
    pub offset: OffsetExpr,
    pub ty: Type,
    /// Destination component mask (stores only).
    pub write_mask: WriteMask,
    /// The matrix-column component this unit gathers/scatters, when a
    /// row-major column access is split into per-component scalar units.
    pub channel: Option<u8>,
}

/// Per-storage-class intrinsic construction, implemented by each driver.
pub(crate) trait AccessEmitter {
    fn emit_load(&mut self, unit: &LoadStoreUnit) -> Expr;
    fn emit_store(&mut self, unit: &LoadStoreUnit, value: Expr) -> Stmt;
}

/// The storage a chain resolved to.
pub(crate) enum ChainRoot {
    /// A buffer block; `index` is the runtime block index (linker binding
    /// plus any instance-array index).
    Block { block: BlockId, index: Expr },
    /// The shared-memory pseudo-block.
    Shared,
}

/// The result of resolving a dereference chain.
pub(crate) struct Walked {
    pub root: ChainRoot,
    pub packing: Packing,
    pub offset: OffsetExpr,
    /// Type at the end of the chain (before any trailing multi-component
    /// swizzle).
    pub ty: Type,
    /// Inherited matrix-layout context at the end of the chain.
    pub row_major: bool,
    /// `Some(stride)` when the chain ends inside a row-major matrix: the
    /// addressed vector's components sit `stride` bytes apart.
    pub matrix_stride: Option<NonZeroU32>,
    pub access: MemAccess,
    /// A trailing multi-component swizzle, deferred for the caller to apply
    /// as a register swizzle (load) or a write mask (store).
    pub swizzle: Option<SwizzleComps>,
}

impl Walked {
    pub fn layout(&self, cx: &LowerCx<'_>) -> Result<Rc<TypeLayout>, Diag> {
        Ok(cx.layouts.layout_of(&self.ty, self.packing, self.row_major)?)
    }
}

fn malformed(what: &str) -> Diag {
    Diag::bug([format!("malformed dereference chain: {what}").into()])
}

/// The effective matrix layout of a chain's root variable, from the variable
/// qualifier down to the owning block's default.
fn root_matrix_layout(cx: &LowerCx<'_>, var: VarId) -> MatrixLayout {
    let decl = &cx.module[var];
    if decl.matrix_layout != MatrixLayout::Inherited {
        return decl.matrix_layout;
    }
    match decl.kind {
        VarKind::BlockField { block, field } => {
            let block = &cx.module[block];
            let field_layout = block.fields[field as usize].matrix_layout;
            if field_layout != MatrixLayout::Inherited { field_layout } else { block.matrix_layout }
        }
        VarKind::BlockInstance { block } => cx.module[block].matrix_layout,
        VarKind::Local | VarKind::Shared => MatrixLayout::Inherited,
    }
}

/// Resolve `expr` as a dereference chain into buffer/shared storage.
///
/// Returns `Ok(None)` if the expression is not a chain, or is a chain rooted
/// in local storage; either way it is not this pass' concern. Chains that do
/// resolve but violate the input contract produce `Err`.
pub(crate) fn walk_chain(cx: &mut LowerCx<'_>, expr: &Expr) -> Result<Option<Walked>, Diag> {
    // The spine, collected leaf-to-root, then replayed root-first.
    let mut spine = vec![];
    let mut node = expr;
    let root_var = loop {
        match node {
            Expr::VarRef(v) => break *v,
            Expr::Index { base, .. } | Expr::Field { base, .. } | Expr::Swizzle { base, .. } => {
                spine.push(node);
                node = base;
            }
            _ => return Ok(None),
        }
    };

    let row_major = root_matrix_layout(cx, root_var) == MatrixLayout::RowMajor;
    // `Some(binding)` while an instanced block array's instance dimension
    // has not been consumed yet.
    let mut pending_instance = None;
    // `Some(block)` while the next field access selects a top-level block
    // field (whose access flags apply to the whole subtree).
    let mut at_block_top = None;

    let mut walked = match storage_kind(cx.module, root_var) {
        StorageKind::Local => return Ok(None),
        StorageKind::Uniform(block) | StorageKind::Storage(block) => {
            let desc = &cx.module[block];
            let packing = desc.packing;
            let mut offset = OffsetExpr::zero();
            let mut access = MemAccess::empty();
            let ty = match cx.module[root_var].kind {
                VarKind::BlockInstance { .. } => {
                    if desc.instance_array_len.is_some() {
                        pending_instance = Some(desc.binding);
                    }
                    at_block_top = Some(block);
                    desc.instance_type()
                }
                VarKind::BlockField { field, .. } => {
                    let field = field as usize;
                    access = desc.fields[field].access;
                    let contents = desc.contents_type();
                    let block_row_major = desc.matrix_layout == MatrixLayout::RowMajor;
                    let layout = cx.layouts.layout_of(&contents, packing, block_row_major)?;
                    match &layout.components {
                        Components::Fields { offsets, .. } => offset.add_const(offsets[field])?,
                        Components::Scalar | Components::Elements { .. } => {
                            return Err(malformed("block contents are not a struct"));
                        }
                    }
                    desc.fields[field].ty.clone()
                }
                VarKind::Local | VarKind::Shared => return Err(malformed("impossible root kind")),
            };
            Walked {
                root: ChainRoot::Block { block, index: Expr::u32(cx.module[block].binding) },
                packing,
                offset,
                ty,
                row_major,
                matrix_stride: None,
                access,
                swizzle: None,
            }
        }
        StorageKind::Shared => {
            // Shared memory has no block-instance concept; relaxed packing.
            let ty = cx.module[root_var].ty.clone();
            let layout = cx.layouts.layout_of(&ty, Packing::Std430, row_major)?;
            let mut offset = OffsetExpr::zero();
            offset.add_const(cx.shared.slot_of(root_var, &layout)?)?;
            Walked {
                root: ChainRoot::Shared,
                packing: Packing::Std430,
                offset,
                ty,
                row_major,
                matrix_stride: None,
                access: MemAccess::empty(),
                swizzle: None,
            }
        }
    };

    for step in spine.into_iter().rev() {
        if walked.swizzle.is_some() {
            return Err(malformed("dereference past a multi-component swizzle"));
        }
        match step {
            Expr::Index { index, .. } => {
                if let Some(binding) = pending_instance.take() {
                    walked.root = ChainRoot::Block {
                        block: match walked.root {
                            ChainRoot::Block { block, .. } => block,
                            ChainRoot::Shared => return Err(malformed("instanced shared root")),
                        },
                        index: match index.as_const_u32() {
                            Some(i) => Expr::u32(binding + i),
                            None => {
                                Expr::binary(BinOp::IAdd, (**index).clone(), Expr::u32(binding))
                            }
                        },
                    };
                    walked.ty = match &*walked.ty {
                        TypeKind::Array { elem, .. } => elem.clone(),
                        _ => return Err(malformed("instanced block is not array-typed")),
                    };
                    continue;
                }
                walk_index(cx, &mut walked, index)?;
            }
            Expr::Field { field, .. } => {
                let def = match &*walked.ty {
                    TypeKind::Struct(def) => def.clone(),
                    _ => return Err(malformed("field access on a non-struct")),
                };
                let layout = cx.layouts.layout_of(&walked.ty, walked.packing, walked.row_major)?;
                let field_offset = match &layout.components {
                    Components::Fields { offsets, .. } => offsets[*field as usize],
                    Components::Scalar | Components::Elements { .. } => {
                        return Err(malformed("field access on a non-struct"));
                    }
                };
                walked.offset.add_const(field_offset)?;
                if let Some(block) = at_block_top.take() {
                    walked.access = cx.module[block].fields[*field as usize].access;
                }
                let field = &def.fields[*field as usize];
                walked.row_major = field.matrix_layout.resolve(walked.row_major);
                walked.ty = field.ty.clone();
            }
            Expr::Swizzle { comps, .. } => {
                if comps.len() == 1 {
                    let comp = Expr::u32(comps[0].into());
                    walk_index(cx, &mut walked, &comp)?;
                } else {
                    walked.swizzle = Some(comps.clone());
                }
            }
            _ => return Err(malformed("non-chain spine node")),
        }
    }

    if pending_instance.is_some() {
        return Err(malformed("instanced block array used without an instance index"));
    }
    Ok(Some(walked))
}

/// One array/matrix/vector indexing step.
fn walk_index(cx: &mut LowerCx<'_>, walked: &mut Walked, index: &Expr) -> Result<(), Diag> {
    match &*walked.ty.clone() {
        TypeKind::Array { .. } => {
            let layout = cx.layouts.layout_of(&walked.ty, walked.packing, walked.row_major)?;
            let (stride, elem) =
                layout.elements().ok_or_else(|| malformed("array without elements"))?;
            walked.offset.add_index(index, stride.get())?;
            walked.ty = elem.ty.clone();
        }
        &TypeKind::Matrix { rows, elem, .. } => {
            let layout = cx.layouts.layout_of(&walked.ty, walked.packing, walked.row_major)?;
            let (stride, _) =
                layout.elements().ok_or_else(|| malformed("matrix without elements"))?;
            if walked.row_major {
                // Column c of a row-major matrix: scalars `stride` bytes
                // apart, starting `c * scalar_width` into the matrix.
                walked.offset.add_index(index, elem.byte_width())?;
                walked.matrix_stride = Some(stride);
            } else {
                walked.offset.add_index(index, stride.get())?;
            }
            walked.ty = TypeKind::vector(elem, rows);
        }
        &TypeKind::Vector { elem, .. } => {
            // Inside a row-major matrix column the components are a matrix
            // stride apart, not a scalar width.
            let stride = match walked.matrix_stride.take() {
                Some(stride) => stride.get(),
                None => elem.byte_width(),
            };
            walked.offset.add_index(index, stride)?;
            walked.ty = TypeKind::scalar(elem);
        }
        TypeKind::Scalar(_) | TypeKind::Struct(_) => {
            return Err(malformed("index into a non-indexable type"));
        }
    }
    Ok(())
}

/// Decomposes one resolved chain access into load-store units.
pub(crate) struct AccessPlanner<'a, 'm> {
    pub cx: &'a mut LowerCx<'m>,
}

impl AccessPlanner<'_, '_> {
    /// Lower a read of `walked`'s storage. Scalar/vector reads become a
    /// single intrinsic in expression position; anything needing multiple
    /// units goes through a shadow temporary filled by `prelude` statements.
    pub fn lower_load(
        &mut self,
        walked: &Walked,
        emitter: &mut dyn AccessEmitter,
        prelude: &mut Vec<Stmt>,
    ) -> Result<Expr, Diag> {
        let loaded = match (&*walked.ty, walked.matrix_stride) {
            (TypeKind::Scalar(_) | TypeKind::Vector { .. }, None) => {
                emitter.emit_load(&LoadStoreUnit {
                    offset: walked.offset.clone(),
                    ty: walked.ty.clone(),
                    write_mask: WriteMask::for_type(&walked.ty),
                    channel: None,
                })
            }
            _ => {
                // Aggregate (or row-major gathered) read: fill a shadow
                // temporary leaf by leaf, then refer to it.
                let tmp = self.cx.new_temp("load_tmp", walked.ty.clone());
                let layout = walked.layout(self.cx)?;
                self.emit_access(
                    emitter,
                    prelude,
                    AccessDir::Load,
                    &Expr::var(tmp),
                    &walked.offset,
                    &layout,
                    walked.row_major,
                    walked.matrix_stride,
                )?;
                Expr::var(tmp)
            }
        };
        Ok(match &walked.swizzle {
            Some(comps) => Expr::swizzle(loaded, comps.iter().copied()),
            None => loaded,
        })
    }

    /// Lower a write of `value` into `walked`'s storage, appending the
    /// resulting statements to `out`.
    pub fn lower_store(
        &mut self,
        walked: &Walked,
        value: Expr,
        write_mask: WriteMask,
        emitter: &mut dyn AccessEmitter,
        out: &mut Vec<Stmt>,
    ) -> Result<(), Diag> {
        if let Some(comps) = &walked.swizzle {
            // A swizzled store turns into the base vector's store under the
            // swizzle's mask. Only monotone swizzles reach this pass; the
            // front-end normalizes permuting ones into full-vector writes.
            if !comps.iter().tuple_windows().all(|(a, b)| a < b) {
                return Err(malformed("permuting swizzle as a store target"));
            }
            if let Some(stride) = walked.matrix_stride {
                // Swizzled store into a row-major matrix column: scatter the
                // selected components as scalars.
                let elem = match &*walked.ty {
                    &TypeKind::Vector { elem, .. } => elem,
                    _ => return Err(malformed("swizzle of a non-vector")),
                };
                let tmp = self.cx.new_temp("store_tmp", value.type_of(self.cx.module));
                out.push(Stmt::Assign {
                    lhs: Expr::var(tmp),
                    rhs: value,
                    write_mask: WriteMask::all(comps.len() as u8),
                });
                for (i, &c) in comps.iter().enumerate() {
                    let mut comp_offset = walked.offset.clone();
                    comp_offset.add_const(u32::from(c) * stride.get())?;
                    let unit = LoadStoreUnit {
                        offset: comp_offset,
                        ty: TypeKind::scalar(elem),
                        write_mask: WriteMask::SCALAR,
                        channel: Some(c),
                    };
                    let comp_value = Expr::swizzle(Expr::var(tmp), [i as u8]);
                    out.push(emitter.emit_store(&unit, comp_value));
                }
                return Ok(());
            }
            out.push(emitter.emit_store(
                &LoadStoreUnit {
                    offset: walked.offset.clone(),
                    ty: walked.ty.clone(),
                    write_mask: WriteMask::from_swizzle(comps),
                    channel: None,
                },
                value,
            ));
            return Ok(());
        }

        match (&*walked.ty, walked.matrix_stride) {
            (TypeKind::Scalar(_) | TypeKind::Vector { .. }, None) => {
                out.push(emitter.emit_store(
                    &LoadStoreUnit {
                        offset: walked.offset.clone(),
                        ty: walked.ty.clone(),
                        write_mask,
                        channel: None,
                    },
                    value,
                ));
            }
            _ => {
                // Multi-unit store: evaluate the value once into a
                // temporary, then scatter it leaf by leaf.
                let tmp = self.cx.new_temp("store_tmp", walked.ty.clone());
                out.push(Stmt::Assign {
                    lhs: Expr::var(tmp),
                    rhs: value,
                    write_mask: WriteMask::for_type(&walked.ty),
                });
                let layout = walked.layout(self.cx)?;
                self.emit_access(
                    emitter,
                    out,
                    AccessDir::Store,
                    &Expr::var(tmp),
                    &walked.offset,
                    &layout,
                    walked.row_major,
                    walked.matrix_stride,
                )?;
            }
        }
        Ok(())
    }

    /// Recursive structural descent: one load-store unit per scalar/vector
    /// leaf, shadowed by the matching dereference of `target` (the shadow
    /// temporary).
    #[allow(clippy::too_many_arguments)]
    fn emit_access(
        &mut self,
        emitter: &mut dyn AccessEmitter,
        out: &mut Vec<Stmt>,
        dir: AccessDir,
        target: &Expr,
        offset: &OffsetExpr,
        layout: &TypeLayout,
        row_major: bool,
        matrix_stride: Option<NonZeroU32>,
    ) -> Result<(), Diag> {
        match &*layout.ty.clone() {
            TypeKind::Scalar(_) => {
                let unit = LoadStoreUnit {
                    offset: offset.clone(),
                    ty: layout.ty.clone(),
                    write_mask: WriteMask::SCALAR,
                    channel: None,
                };
                out.push(self.leaf(emitter, dir, target.clone(), &unit));
            }

            &TypeKind::Vector { elem, comps } => match matrix_stride {
                None => {
                    let unit = LoadStoreUnit {
                        offset: offset.clone(),
                        ty: layout.ty.clone(),
                        write_mask: WriteMask::all(comps),
                        channel: None,
                    };
                    out.push(self.leaf(emitter, dir, target.clone(), &unit));
                }
                // A row-major matrix column: gather/scatter one scalar per
                // component, a matrix stride apart.
                Some(stride) => {
                    for c in 0..comps {
                        let mut comp_offset = offset.clone();
                        comp_offset.add_const(u32::from(c) * stride.get())?;
                        let unit = LoadStoreUnit {
                            offset: comp_offset,
                            ty: TypeKind::scalar(elem),
                            write_mask: WriteMask::SCALAR,
                            channel: Some(c),
                        };
                        let comp_target = Expr::swizzle(target.clone(), [c]);
                        out.push(self.leaf(emitter, dir, comp_target, &unit));
                    }
                }
            },

            &TypeKind::Matrix { cols, rows, elem } => {
                let (stride, _) =
                    layout.elements().ok_or_else(|| malformed("matrix without elements"))?;
                let col_ty = TypeKind::vector(elem, rows);
                // Vector layouts are identical under both packings.
                let col_layout = self.cx.layouts.layout_of(&col_ty, Packing::Std430, false)?;
                for c in 0..cols {
                    let mut col_offset = offset.clone();
                    let (step, col_stride) = if row_major {
                        (u32::from(c) * elem.byte_width(), Some(stride))
                    } else {
                        (u32::from(c) * stride.get(), None)
                    };
                    col_offset.add_const(step)?;
                    let col_target = Expr::index(target.clone(), Expr::u32(c.into()));
                    self.emit_access(
                        emitter,
                        out,
                        dir,
                        &col_target,
                        &col_offset,
                        &col_layout,
                        false,
                        col_stride,
                    )?;
                }
            }

            TypeKind::Array { .. } => {
                let (stride, elem, len) = match &layout.components {
                    Components::Elements { stride, elem, fixed_len: Some(len) } => {
                        (*stride, elem.clone(), *len)
                    }
                    _ => return Err(malformed("aggregate copy of an unsized array")),
                };
                for i in 0..len.get() {
                    let mut elem_offset = offset.clone();
                    elem_offset.add_const(i * stride.get())?;
                    let elem_target = Expr::index(target.clone(), Expr::u32(i));
                    self.emit_access(
                        emitter,
                        out,
                        dir,
                        &elem_target,
                        &elem_offset,
                        &elem,
                        row_major,
                        None,
                    )?;
                }
            }

            TypeKind::Struct(def) => {
                let (offsets, layouts) = match &layout.components {
                    Components::Fields { offsets, layouts } => (offsets.clone(), layouts.clone()),
                    _ => return Err(malformed("struct without fields")),
                };
                for (i, (field_offset, field_layout)) in
                    offsets.iter().zip(&layouts).enumerate()
                {
                    let mut child_offset = offset.clone();
                    child_offset.add_const(*field_offset)?;
                    let field_row_major =
                        def.fields[i].matrix_layout.resolve(row_major);
                    let field_target = Expr::field(target.clone(), i as u32);
                    self.emit_access(
                        emitter,
                        out,
                        dir,
                        &field_target,
                        &child_offset,
                        field_layout,
                        field_row_major,
                        None,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn leaf(
        &mut self,
        emitter: &mut dyn AccessEmitter,
        dir: AccessDir,
        target: Expr,
        unit: &LoadStoreUnit,
    ) -> Stmt {
        match dir {
            AccessDir::Load => Stmt::Assign {
                lhs: target,
                rhs: emitter.emit_load(unit),
                write_mask: unit.write_mask,
            },
            AccessDir::Store => emitter.emit_store(unit, target),
        }
    }
}

#[derive(Copy, Clone)]
enum AccessDir {
    Load,
    Store,
}
