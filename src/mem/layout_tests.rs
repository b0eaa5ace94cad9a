use crate::ir::{MatrixLayout, Packing, Scalar, StructDef, StructField, Type, TypeKind};
use crate::mem::layout::{Components, LayoutCache};
use pretty_assertions::assert_eq;
use std::num::NonZeroU32;
use std::rc::Rc;

fn float() -> Type {
    TypeKind::scalar(Scalar::F32)
}

fn int() -> Type {
    TypeKind::scalar(Scalar::I32)
}

fn vec(comps: u8) -> Type {
    TypeKind::vector(Scalar::F32, comps)
}

fn structure(name: &str, fields: Vec<StructField>) -> Type {
    TypeKind::structure(Rc::new(StructDef { name: name.into(), fields }))
}

fn stride_of(cache: &LayoutCache, ty: &Type, packing: Packing) -> u32 {
    let layout = cache.layout_of(ty, packing, false).map_err(|e| e.0.to_string()).unwrap();
    match &layout.components {
        Components::Elements { stride, .. } => stride.get(),
        _ => panic!("not array-shaped: {ty}"),
    }
}

fn field_offsets(cache: &LayoutCache, ty: &Type, packing: Packing) -> Vec<u32> {
    let layout = cache.layout_of(ty, packing, false).map_err(|e| e.0.to_string()).unwrap();
    match &layout.components {
        Components::Fields { offsets, .. } => offsets.to_vec(),
        _ => panic!("not a struct: {ty}"),
    }
}

#[test]
fn scalar_layouts() {
    let cache = LayoutCache::new();
    for packing in [Packing::Std140, Packing::Std430] {
        let f = cache.layout_of(&float(), packing, false).unwrap();
        assert_eq!((f.align, f.size), (4, 4));
        let d = cache.layout_of(&TypeKind::scalar(Scalar::F64), packing, false).unwrap();
        assert_eq!((d.align, d.size), (8, 8));
        let b = cache.layout_of(&TypeKind::scalar(Scalar::Bool), packing, false).unwrap();
        assert_eq!((b.align, b.size), (4, 4));
    }
}

#[test]
fn vec3_always_aligns_to_16() {
    let cache = LayoutCache::new();
    for packing in [Packing::Std140, Packing::Std430] {
        let layout = cache.layout_of(&vec(3), packing, false).unwrap();
        assert_eq!(layout.align, 16);
        assert_eq!(layout.size, 12);
    }
    let v2 = cache.layout_of(&vec(2), Packing::Std140, false).unwrap();
    assert_eq!((v2.align, v2.size), (8, 8));
}

#[test]
fn array_of_vec3_stride_rounds_only_when_tight_padded() {
    let cache = LayoutCache::new();
    let arr = TypeKind::array(vec(3), 4);
    assert_eq!(stride_of(&cache, &arr, Packing::Std140), 16);
    assert_eq!(stride_of(&cache, &arr, Packing::Std430), 12);
}

#[test]
fn array_of_scalar_strides() {
    let cache = LayoutCache::new();
    let arr = TypeKind::array(int(), 4);
    assert_eq!(stride_of(&cache, &arr, Packing::Std140), 16);
    assert_eq!(stride_of(&cache, &arr, Packing::Std430), 4);
    let layout = cache.layout_of(&arr, Packing::Std430, false).unwrap();
    assert_eq!(layout.size, 16);
}

#[test]
fn struct_field_offsets_tight_padded() {
    // struct { float a; vec3 b; } under std140: a at 0, b at 16, size 32.
    let cache = LayoutCache::new();
    let st = structure(
        "S",
        vec![StructField::new("a", float()), StructField::new("b", vec(3))],
    );
    assert_eq!(field_offsets(&cache, &st, Packing::Std140), vec![0, 16]);
    let layout = cache.layout_of(&st, Packing::Std140, false).unwrap();
    assert_eq!(layout.size, 32);
    assert_eq!(layout.align, 16);
}

#[test]
fn struct_relaxed_packing_skips_aggregate_rounding() {
    let cache = LayoutCache::new();
    let st = structure(
        "S",
        vec![StructField::new("a", float()), StructField::new("b", float())],
    );
    let layout = cache.layout_of(&st, Packing::Std430, false).unwrap();
    assert_eq!(field_offsets(&cache, &st, Packing::Std430), vec![0, 4]);
    assert_eq!((layout.align, layout.size), (4, 8));
    // The same struct under std140 pads out to a 16-byte multiple.
    let layout = cache.layout_of(&st, Packing::Std140, false).unwrap();
    assert_eq!((layout.align, layout.size), (16, 16));
}

#[test]
fn explicit_field_offset_wins() {
    let cache = LayoutCache::new();
    let mut b = StructField::new("b", float());
    b.explicit_offset = Some(64);
    let st = structure("S", vec![StructField::new("a", float()), b]);
    assert_eq!(field_offsets(&cache, &st, Packing::Std430), vec![0, 64]);
    let layout = cache.layout_of(&st, Packing::Std430, false).unwrap();
    assert_eq!(layout.size, 68);
}

#[test]
fn matrix_strides() {
    let cache = LayoutCache::new();
    let mat3 = TypeKind::matrix(3, 3, Scalar::F32);
    // Column-major mat3: 3 columns of vec3, stride 16 in both packings
    // (vec3 aligns to 16 regardless).
    for packing in [Packing::Std140, Packing::Std430] {
        let layout = cache.layout_of(&mat3, packing, false).unwrap();
        assert_eq!(layout.size, 48);
        assert_eq!(stride_of(&cache, &mat3, packing), 16);
    }
    // mat2: vec2 columns align to 8; only std140 rounds the stride to 16.
    let mat2 = TypeKind::matrix(2, 2, Scalar::F32);
    let layout = cache.layout_of(&mat2, Packing::Std140, false).unwrap();
    assert_eq!((layout.align, layout.size), (16, 32));
    let layout = cache.layout_of(&mat2, Packing::Std430, false).unwrap();
    assert_eq!((layout.align, layout.size), (8, 16));
}

#[test]
fn row_major_matrix_decomposes_into_rows() {
    let cache = LayoutCache::new();
    // mat4x2 (4 columns, 2 rows): row-major storage is 2 row-vectors of 4
    // components, so the stride jumps to 16 and the size shrinks to 32.
    let mat = TypeKind::matrix(4, 2, Scalar::F32);
    let col_major = cache.layout_of(&mat, Packing::Std430, false).unwrap();
    assert_eq!((col_major.align, col_major.size), (8, 32));
    let row_major = cache.layout_of(&mat, Packing::Std430, true).unwrap();
    assert_eq!((row_major.align, row_major.size), (16, 32));
    match &row_major.components {
        Components::Elements { stride, fixed_len, .. } => {
            assert_eq!(stride.get(), 16);
            assert_eq!(*fixed_len, NonZeroU32::new(2));
        }
        _ => panic!("matrix is not array-shaped"),
    }
}

#[test]
fn row_majorness_only_affects_matrix_bearing_types() {
    let cache = LayoutCache::new();
    // Layouts of matrix-free types are shared between both majorness
    // contexts.
    let arr = TypeKind::array(vec(4), 8);
    let a = cache.layout_of(&arr, Packing::Std430, false).unwrap();
    let b = cache.layout_of(&arr, Packing::Std430, true).unwrap();
    assert!(Rc::ptr_eq(&a, &b));
}

#[test]
fn unsized_trailing_array() {
    let cache = LayoutCache::new();
    let tail = TypeKind::unsized_array(vec(4));
    let layout = cache.layout_of(&tail, Packing::Std430, false).unwrap();
    assert_eq!(layout.size, 0);
    assert_eq!(layout.dyn_unit_stride, NonZeroU32::new(16));

    // As a trailing struct field: the fixed size is exactly its offset.
    let st = structure(
        "S",
        vec![StructField::new("head", TypeKind::array(vec(4), 2)), StructField::new("tail", tail)],
    );
    let layout = cache.layout_of(&st, Packing::Std430, false).unwrap();
    assert_eq!(field_offsets(&cache, &st, Packing::Std430), vec![0, 32]);
    assert_eq!(layout.size, 32);
    assert_eq!(layout.dyn_unit_stride, NonZeroU32::new(16));
}

#[test]
fn unsized_array_before_last_field_is_rejected() {
    let cache = LayoutCache::new();
    let st = structure(
        "S",
        vec![
            StructField::new("tail", TypeKind::unsized_array(vec(4))),
            StructField::new("after", float()),
        ],
    );
    assert!(cache.layout_of(&st, Packing::Std430, false).is_err());
}

#[test]
fn layout_is_deterministic_and_cached() {
    let cache = LayoutCache::new();
    let st = structure(
        "S",
        vec![StructField::new("a", float()), StructField::new("b", vec(3))],
    );
    let first = cache.layout_of(&st, Packing::Std140, false).unwrap();
    let second = cache.layout_of(&st, Packing::Std140, false).unwrap();
    assert!(Rc::ptr_eq(&first, &second));

    // A structurally equal type hits the same cache entry.
    let same = structure(
        "S",
        vec![StructField::new("a", float()), StructField::new("b", vec(3))],
    );
    let third = cache.layout_of(&same, Packing::Std140, false).unwrap();
    assert!(Rc::ptr_eq(&first, &third));
}

#[test]
fn nested_struct_in_array() {
    let cache = LayoutCache::new();
    // struct { vec3 p; float w; } packs to 16 bytes under std430, so an
    // array of it strides at 16 under both packings.
    let st = structure(
        "Elem",
        vec![StructField::new("p", vec(3)), StructField::new("w", float())],
    );
    assert_eq!(field_offsets(&cache, &st, Packing::Std430), vec![0, 12]);
    let arr = TypeKind::array(st, 3);
    assert_eq!(stride_of(&cache, &arr, Packing::Std430), 16);
    assert_eq!(stride_of(&cache, &arr, Packing::Std140), 16);
}

#[test]
fn inherited_matrix_layout_resolves_per_field() {
    let cache = LayoutCache::new();
    let mat = TypeKind::matrix(4, 2, Scalar::F32);
    let mut row = StructField::new("r", mat.clone());
    row.matrix_layout = MatrixLayout::RowMajor;
    let mut col = StructField::new("c", mat);
    col.matrix_layout = MatrixLayout::ColMajor;
    let st = structure("M", vec![row, col]);
    // In a column-major context the row-major qualifier still applies:
    // field `r` is 2 row-vectors (stride 16), field `c` is 4 columns
    // (stride 8, size 32) starting at the next 8-byte boundary.
    let layout = cache.layout_of(&st, Packing::Std430, false).unwrap();
    assert_eq!(field_offsets(&cache, &st, Packing::Std430), vec![0, 32]);
    assert_eq!(layout.size, 64);
}
