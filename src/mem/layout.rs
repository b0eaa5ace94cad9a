//! Byte-level layout computation for buffer blocks and shared memory.
//!
//! Layouts are memoized per `(type, packing, row-majorness)`: a type laid
//! out twice yields the identical `Rc<TypeLayout>`, and the offsets it
//! reports never depend on where in the block the type appears (only the
//! caller's base offset does).

use crate::ir::{Packing, StructDef, Type, TypeKind};
use crate::{Diag, FxIndexMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::num::NonZeroU32;
use std::rc::Rc;

/// Tunable limits for layout and lowering.
#[derive(Copy, Clone, Debug)]
pub struct LayoutConfig {
    /// Total workgroup-shared memory available, in bytes. Exceeding it is a
    /// fatal compile error.
    pub max_shared_memory_size: u32,
}

impl LayoutConfig {
    /// The OpenGL-mandated minimum for `GL_MAX_COMPUTE_SHARED_MEMORY_SIZE`.
    pub const GL_MIN_SHARED_MEMORY_SIZE: u32 = 32 * 1024;
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self { max_shared_memory_size: Self::GL_MIN_SHARED_MEMORY_SIZE }
    }
}

/// Error in computing a layout, wrapping a [`Diag`].
#[derive(Debug)]
pub struct LayoutError(pub(crate) Diag);

impl From<LayoutError> for Diag {
    fn from(err: LayoutError) -> Diag {
        err.0
    }
}

impl LayoutError {
    fn bad(reason: impl Into<String>, ty: &Type) -> Self {
        Self(Diag::bug([reason.into().into(), " ".into(), ty.clone().into()]))
    }
}

/// The computed layout of one type under one packing/majorness context.
#[derive(PartialEq, Eq, Debug)]
pub struct TypeLayout {
    pub ty: Type,
    pub align: u32,
    /// Fixed byte size; `0` for an unsized array, whose occupancy is
    /// `dyn_unit_stride * runtime_length` past its base offset.
    pub size: u32,
    pub dyn_unit_stride: Option<NonZeroU32>,
    pub components: Components,
}

impl TypeLayout {
    /// Stride and element layout if this is array-shaped (arrays, matrices,
    /// and vectors all decompose this way).
    pub fn elements(&self) -> Option<(NonZeroU32, &Rc<TypeLayout>)> {
        match &self.components {
            Components::Elements { stride, elem, .. } => Some((*stride, elem)),
            Components::Scalar | Components::Fields { .. } => None,
        }
    }
}

/// The positions of a type's direct constituents.
#[derive(PartialEq, Eq, Debug)]
pub enum Components {
    Scalar,

    /// Uniformly strided elements (vector components, matrix columns or
    /// rows, array elements).
    Elements {
        stride: NonZeroU32,
        elem: Rc<TypeLayout>,
        /// `None` only for an unsized trailing array.
        fixed_len: Option<NonZeroU32>,
    },

    /// Struct fields, at individually computed offsets.
    Fields {
        offsets: SmallVec<[u32; 4]>,
        layouts: SmallVec<[Rc<TypeLayout>; 4]>,
    },
}

fn align_to(size: u32, align: u32) -> Option<u32> {
    let mask = align.checked_sub(1)?;
    Some(size.checked_add(mask)? & !mask)
}

/// Memoizing layout computer.
pub struct LayoutCache {
    cache: RefCell<FxIndexMap<(Type, Packing, bool), Rc<TypeLayout>>>,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self { cache: RefCell::new(FxIndexMap::default()) }
    }

    /// Compute (or recall) the layout of `ty` under `packing`, with
    /// `row_major` giving the inherited matrix-layout context.
    pub fn layout_of(
        &self,
        ty: &Type,
        packing: Packing,
        row_major: bool,
    ) -> Result<Rc<TypeLayout>, LayoutError> {
        // Row-majorness only matters where a matrix can occur.
        let row_major = row_major && contains_matrix(ty);
        let key = (ty.clone(), packing, row_major);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let layout = Rc::new(self.compute(ty, packing, row_major)?);
        self.cache.borrow_mut().insert(key, layout.clone());
        Ok(layout)
    }

    fn compute(&self, ty: &Type, packing: Packing, row_major: bool) -> Result<TypeLayout, LayoutError> {
        match &**ty {
            &TypeKind::Scalar(s) => {
                let w = s.byte_width();
                Ok(TypeLayout {
                    ty: ty.clone(),
                    align: w,
                    size: w,
                    dyn_unit_stride: None,
                    components: Components::Scalar,
                })
            }

            &TypeKind::Vector { elem, comps } => {
                let w = elem.byte_width();
                // 3-component vectors align like 4-component ones, in both
                // packings.
                let align = w * if comps == 2 { 2 } else { 4 };
                let scalar = self.layout_of(&TypeKind::scalar(elem), packing, false)?;
                Ok(TypeLayout {
                    ty: ty.clone(),
                    align,
                    size: w * u32::from(comps),
                    dyn_unit_stride: None,
                    components: Components::Elements {
                        stride: NonZeroU32::new(w).ok_or_else(|| LayoutError::bad("zero-width scalar in", ty))?,
                        elem: scalar,
                        fixed_len: NonZeroU32::new(comps.into()),
                    },
                })
            }

            &TypeKind::Matrix { cols, rows, elem } => {
                // A matrix lays out as an array of its constituent vectors:
                // `rows` row-vectors of `cols` components when row-major,
                // `cols` column-vectors of `rows` components otherwise.
                let (count, comps) = if row_major { (rows, cols) } else { (cols, rows) };
                let vec_ty = TypeKind::vector(elem, comps);
                let vec_layout = self.layout_of(&vec_ty, packing, false)?;
                let mut stride = vec_layout.align;
                if packing == Packing::Std140 {
                    stride = stride.max(16);
                }
                let size = stride
                    .checked_mul(count.into())
                    .ok_or_else(|| LayoutError::bad("matrix size overflows in", ty))?;
                Ok(TypeLayout {
                    ty: ty.clone(),
                    align: stride,
                    size,
                    dyn_unit_stride: None,
                    components: Components::Elements {
                        stride: NonZeroU32::new(stride)
                            .ok_or_else(|| LayoutError::bad("zero matrix stride in", ty))?,
                        elem: vec_layout,
                        fixed_len: NonZeroU32::new(count.into()),
                    },
                })
            }

            TypeKind::Array { elem, len } => {
                let elem_layout = self.layout_of(elem, packing, row_major)?;
                if elem_layout.dyn_unit_stride.is_some() {
                    return Err(LayoutError::bad("unsized element type in", ty));
                }
                // Stride granularity: std140 rounds to 16; std430 packs
                // vector elements back-to-back at scalar granularity while
                // aggregates keep their own alignment.
                let stride_align = match (packing, &**elem) {
                    (Packing::Std140, _) => elem_layout.align.max(16),
                    (Packing::Std430, TypeKind::Vector { elem: s, .. }) => s.byte_width(),
                    (Packing::Std430, _) => elem_layout.align,
                };
                let stride = align_to(elem_layout.size, stride_align)
                    .ok_or_else(|| LayoutError::bad("array stride overflows in", ty))?;
                let stride = NonZeroU32::new(stride)
                    .ok_or_else(|| LayoutError::bad("zero array stride in", ty))?;
                let mut align = elem_layout.align;
                if packing == Packing::Std140 {
                    align = align.max(16);
                }
                let (size, dyn_unit_stride) = match len {
                    Some(len) => {
                        let size = stride
                            .get()
                            .checked_mul(len.get())
                            .ok_or_else(|| LayoutError::bad("array size overflows in", ty))?;
                        (size, None)
                    }
                    None => (0, Some(stride)),
                };
                Ok(TypeLayout {
                    ty: ty.clone(),
                    align,
                    size,
                    dyn_unit_stride,
                    components: Components::Elements { stride, elem: elem_layout, fixed_len: *len },
                })
            }

            TypeKind::Struct(def) => self.compute_struct(ty, def, packing, row_major),
        }
    }

    fn compute_struct(
        &self,
        ty: &Type,
        def: &StructDef,
        packing: Packing,
        row_major: bool,
    ) -> Result<TypeLayout, LayoutError> {
        let mut offsets = SmallVec::with_capacity(def.fields.len());
        let mut layouts: SmallVec<[Rc<TypeLayout>; 4]> = SmallVec::with_capacity(def.fields.len());
        let mut offset = 0u32;
        let mut align = 0u32;
        let mut dyn_unit_stride = None;

        for (i, field) in def.fields.iter().enumerate() {
            let field_row_major = field.matrix_layout.resolve(row_major);
            let field_layout = self.layout_of(&field.ty, packing, field_row_major)?;

            if dyn_unit_stride.is_some() {
                return Err(LayoutError::bad("unsized field before the last field of", ty));
            }

            let field_offset = match field.explicit_offset {
                // An explicit offset wins outright; the front-end has
                // already validated it against the field's alignment.
                Some(explicit) => explicit,
                None => align_to(offset, field_layout.align)
                    .ok_or_else(|| LayoutError::bad("field offset overflows in", ty))?,
            };

            if field_layout.dyn_unit_stride.is_some() {
                if i != def.fields.len() - 1 {
                    return Err(LayoutError::bad("unsized field before the last field of", ty));
                }
                dyn_unit_stride = field_layout.dyn_unit_stride;
                // The unsized field contributes nothing to the fixed size;
                // the struct's fixed size is exactly its base offset.
                offset = field_offset;
            } else {
                offset = field_offset
                    .checked_add(field_layout.size)
                    .ok_or_else(|| LayoutError::bad("struct size overflows in", ty))?;
            }

            align = align.max(field_layout.align);
            offsets.push(field_offset);
            layouts.push(field_layout);
        }

        if packing == Packing::Std140 {
            align = align.max(16);
        }
        align = align.max(1);
        let size = if dyn_unit_stride.is_some() {
            offset
        } else {
            align_to(offset, align).ok_or_else(|| LayoutError::bad("struct size overflows in", ty))?
        };

        Ok(TypeLayout {
            ty: ty.clone(),
            align,
            size,
            dyn_unit_stride,
            components: Components::Fields { offsets, layouts },
        })
    }
}

impl Default for LayoutCache {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_matrix(ty: &Type) -> bool {
    match &**ty {
        TypeKind::Scalar(_) | TypeKind::Vector { .. } => false,
        TypeKind::Matrix { .. } => true,
        TypeKind::Array { elem, .. } => contains_matrix(elem),
        TypeKind::Struct(def) => def.fields.iter().any(|f| contains_matrix(&f.ty)),
    }
}
