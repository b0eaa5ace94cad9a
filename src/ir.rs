//! IR data types for one shader stage: types, interface blocks, variables,
//! and the expression/statement tree the lowering passes rewrite.
//!
//! The input tree is produced by the front-end (parser/type-checker) and the
//! linker: by the time the lowering passes run, every buffer/shared-backed
//! variable carries its storage class, owning block, explicit offsets and
//! matrix-layout qualifiers, and (SSBO only) memory-access flags.

use crate::mem::{AtomicOp, MemAccess, MemOp};
use arrayvec::ArrayVec;
use std::fmt;
use std::num::NonZeroU32;
use std::ops;
use std::rc::Rc;

/// A scalar component type. `Bool` occupies 4 bytes in buffer memory (it is
/// stored as a 32-bit integer, as in GLSL).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Scalar {
    I32,
    U32,
    F32,
    F64,
    Bool,
}

impl Scalar {
    pub fn byte_width(self) -> u32 {
        match self {
            Scalar::F64 => 8,
            Scalar::I32 | Scalar::U32 | Scalar::F32 | Scalar::Bool => 4,
        }
    }
}

/// A type descriptor. The set of kinds is fixed by the language's type
/// grammar, so passes dispatch on it by exhaustive matching.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    Scalar(Scalar),
    Vector {
        elem: Scalar,
        /// Component count, 2..=4.
        comps: u8,
    },
    Matrix {
        cols: u8,
        rows: u8,
        elem: Scalar,
    },
    Array {
        elem: Type,
        /// `None` for an unsized trailing array, whose length is determined
        /// at runtime by the bound buffer's size.
        len: Option<NonZeroU32>,
    },
    Struct(Rc<StructDef>),
}

/// Types are compared and hashed structurally (layouts are cached by type),
/// and shared via `Rc` (nested types reference their component types).
pub type Type = Rc<TypeKind>;

impl TypeKind {
    pub fn scalar(elem: Scalar) -> Type {
        Rc::new(TypeKind::Scalar(elem))
    }

    pub fn vector(elem: Scalar, comps: u8) -> Type {
        Rc::new(TypeKind::Vector { elem, comps })
    }

    pub fn matrix(cols: u8, rows: u8, elem: Scalar) -> Type {
        Rc::new(TypeKind::Matrix { cols, rows, elem })
    }

    pub fn array(elem: Type, len: u32) -> Type {
        Rc::new(TypeKind::Array { elem, len: NonZeroU32::new(len) })
    }

    pub fn unsized_array(elem: Type) -> Type {
        Rc::new(TypeKind::Array { elem, len: None })
    }

    pub fn structure(def: Rc<StructDef>) -> Type {
        Rc::new(TypeKind::Struct(def))
    }

    /// Whether this is an array or struct (the kinds split element-wise by
    /// aggregate-copy splitting and shadow-temporary planning).
    pub fn is_aggregate(&self) -> bool {
        matches!(self, TypeKind::Array { .. } | TypeKind::Struct(_))
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalar_name = |s: Scalar| match s {
            Scalar::I32 => "int",
            Scalar::U32 => "uint",
            Scalar::F32 => "float",
            Scalar::F64 => "double",
            Scalar::Bool => "bool",
        };
        let vec_prefix = |s: Scalar| match s {
            Scalar::I32 => "i",
            Scalar::U32 => "u",
            Scalar::F32 => "",
            Scalar::F64 => "d",
            Scalar::Bool => "b",
        };
        match self {
            TypeKind::Scalar(s) => write!(f, "{}", scalar_name(*s)),
            TypeKind::Vector { elem, comps } => write!(f, "{}vec{comps}", vec_prefix(*elem)),
            TypeKind::Matrix { cols, rows, elem } => {
                if cols == rows {
                    write!(f, "{}mat{cols}", vec_prefix(*elem))
                } else {
                    write!(f, "{}mat{cols}x{rows}", vec_prefix(*elem))
                }
            }
            TypeKind::Array { elem, len: Some(len) } => write!(f, "{elem}[{len}]"),
            TypeKind::Array { elem, len: None } => write!(f, "{elem}[]"),
            TypeKind::Struct(def) => write!(f, "{}", def.name),
        }
    }
}

/// A named aggregate type definition.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<StructField>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    /// An explicit byte offset always wins over the computed running offset.
    pub explicit_offset: Option<u32>,
    pub matrix_layout: MatrixLayout,
}

impl StructField {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty, explicit_offset: None, matrix_layout: MatrixLayout::Inherited }
    }
}

/// Matrix-layout qualifier. `Inherited` defers to the enclosing context;
/// `Inherited` at every level defaults to column-major.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MatrixLayout {
    RowMajor,
    ColMajor,
    Inherited,
}

impl MatrixLayout {
    /// Resolve against the enclosing context's row-majorness.
    pub fn resolve(self, inherited_row_major: bool) -> bool {
        match self {
            MatrixLayout::RowMajor => true,
            MatrixLayout::ColMajor => false,
            MatrixLayout::Inherited => inherited_row_major,
        }
    }
}

/// Standardized packing rules for field offsets, alignments and array strides
/// inside a buffer block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Packing {
    /// Tight-padded: array/matrix strides and aggregate alignments round up
    /// to 16 bytes.
    Std140,
    /// Relaxed: no 16-byte rounding beyond a type's own requirements.
    Std430,
}

/// Which kind of externally allocated buffer a block describes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BufferStorage {
    /// Uniform buffer object: read-only from the shader.
    Uniform,
    /// Shader storage buffer object: read-write, supports atomics and an
    /// unsized trailing array.
    Storage,
}

/// One field of an [`InterfaceBlock`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockField {
    pub name: String,
    pub ty: Type,
    pub explicit_offset: Option<u32>,
    pub matrix_layout: MatrixLayout,
    /// Memory-access qualifiers; meaningful for SSBO fields only.
    pub access: MemAccess,
}

impl BlockField {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            explicit_offset: None,
            matrix_layout: MatrixLayout::Inherited,
            access: MemAccess::empty(),
        }
    }
}

/// An interface block, produced once per compilation unit by the linker and
/// immutable for the duration of the lowering pass.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InterfaceBlock {
    pub name: String,
    pub storage: BufferStorage,
    pub packing: Packing,
    /// Linker-assigned binding index; the base `block_index` of every
    /// intrinsic emitted for this block.
    pub binding: u32,
    /// Block-level matrix-layout default, applying to fields that inherit.
    pub matrix_layout: MatrixLayout,
    pub fields: Vec<BlockField>,
    /// `Some` for an instanced block array (`uniform B { ... } b[4];`); the
    /// instance index offsets the binding at runtime.
    pub instance_array_len: Option<NonZeroU32>,
}

impl InterfaceBlock {
    /// The block's contents viewed as a struct type, for layout computation
    /// and planner descent.
    pub fn contents_type(&self) -> Type {
        TypeKind::structure(Rc::new(StructDef {
            name: self.name.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| StructField {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                    explicit_offset: f.explicit_offset,
                    matrix_layout: f.matrix_layout,
                })
                .collect(),
        }))
    }

    /// The type of a named instance of this block (wrapping the contents in
    /// an array for instanced block arrays).
    pub fn instance_type(&self) -> Type {
        let contents = self.contents_type();
        match self.instance_array_len {
            Some(len) => TypeKind::array(contents, len.get()),
            None => contents,
        }
    }
}

/// Entity handle for an [`InterfaceBlock`] in a [`Module`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

/// Entity handle for a [`VarDecl`] in a [`Module`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct VarId(pub u32);

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    pub kind: VarKind,
    /// Per-variable matrix-layout qualifier (the outermost chain link the
    /// row-major resolver consults).
    pub matrix_layout: MatrixLayout,
}

impl VarDecl {
    pub fn local(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty, kind: VarKind::Local, matrix_layout: MatrixLayout::Inherited }
    }

    pub fn shared(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty, kind: VarKind::Shared, matrix_layout: MatrixLayout::Inherited }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum VarKind {
    /// Function-local (or private global) storage; not lowered.
    Local,
    /// A named instance of an interface block (or of an instanced block array).
    BlockInstance { block: BlockId },
    /// One member of a non-instanced block, entered into the global scope by
    /// the front-end; the linker's per-field offset table (i.e. the block's
    /// field layout) locates it.
    BlockField { block: BlockId, field: u32 },
    /// Workgroup-shared memory; assigned a flat offset on first reference.
    Shared,
}

/// A compile-time constant operand.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Const {
    U32(u32),
    I32(i32),
    /// An `f32` stored as its bit pattern, keeping `Eq`/`Hash` derivable.
    F32Bits(u32),
    Bool(bool),
}

impl Const {
    /// The conservative "small index" reading shared by stride folding and
    /// block-array resolution (only `0..=i32::MAX` is accepted).
    pub fn as_u32(self) -> Option<u32> {
        match self {
            Const::U32(x) => Some(x),
            Const::I32(x) => u32::try_from(x).ok(),
            Const::F32Bits(_) | Const::Bool(_) => None,
        }
    }

    pub fn scalar_type(self) -> Type {
        TypeKind::scalar(match self {
            Const::U32(_) => Scalar::U32,
            Const::I32(_) => Scalar::I32,
            Const::F32Bits(_) => Scalar::F32,
            Const::Bool(_) => Scalar::Bool,
        })
    }
}

/// Integer operators used by synthesized offset arithmetic and the unsized
/// array length query.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BinOp {
    IAdd,
    ISub,
    IMul,
    IDiv,
    IMax,
}

/// Swizzle component selection (`.x`, `.xyz`, ...), at most 4 components.
pub type SwizzleComps = ArrayVec<u8, 4>;

/// The expression tree.
///
/// `VarRef`/`Index`/`Field`/`Swizzle` form dereference chains: every chain
/// resolves, by walking to its root `VarRef`, to exactly one variable, and a
/// buffer/shared-backed chain never spans two blocks. Chains into
/// buffer-backed storage are consumed by the lowering pass and replaced by
/// `Intrinsic` trees.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Expr {
    Const(Const),
    VarRef(VarId),
    Index { base: Box<Expr>, index: Box<Expr> },
    Field { base: Box<Expr>, field: u32 },
    Swizzle { base: Box<Expr>, comps: SwizzleComps },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Vector/aggregate constructor (input programs only; the pass never
    /// synthesizes one).
    Construct { ty: Type, args: Vec<Expr> },
    /// `.length()` on an unsized trailing array (input form; lowered to a
    /// buffer-size query).
    ArrayLength { base: Box<Expr> },
    /// An atomic built-in call on a buffer/shared-backed scalar (input form;
    /// redirected to an offset-based atomic intrinsic).
    AtomicCall { op: AtomicOp, args: Vec<Expr> },
    /// An emitted load/store/atomic/buffer-size intrinsic (output form,
    /// consumed by the backend code generator).
    Intrinsic { op: MemOp, args: Vec<Expr> },
}

impl Expr {
    pub fn u32(x: u32) -> Expr {
        Expr::Const(Const::U32(x))
    }

    pub fn var(v: VarId) -> Expr {
        Expr::VarRef(v)
    }

    pub fn index(base: Expr, index: Expr) -> Expr {
        Expr::Index { base: Box::new(base), index: Box::new(index) }
    }

    pub fn field(base: Expr, field: u32) -> Expr {
        Expr::Field { base: Box::new(base), field }
    }

    pub fn swizzle(base: Expr, comps: impl IntoIterator<Item = u8>) -> Expr {
        Expr::Swizzle { base: Box::new(base), comps: comps.into_iter().collect() }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn as_const_u32(&self) -> Option<u32> {
        match self {
            Expr::Const(c) => c.as_u32(),
            _ => None,
        }
    }

    /// Whether this node is a dereference-chain link (as opposed to a value
    /// computation).
    pub fn is_chain_node(&self) -> bool {
        matches!(
            self,
            Expr::VarRef(_) | Expr::Index { .. } | Expr::Field { .. } | Expr::Swizzle { .. }
        )
    }

    /// The root `VarRef` of a dereference chain, if this is one.
    pub fn chain_root(&self) -> Option<VarId> {
        match self {
            Expr::VarRef(v) => Some(*v),
            Expr::Index { base, .. } | Expr::Field { base, .. } | Expr::Swizzle { base, .. } => {
                base.chain_root()
            }
            Expr::Const(_)
            | Expr::Binary { .. }
            | Expr::Construct { .. }
            | Expr::ArrayLength { .. }
            | Expr::AtomicCall { .. }
            | Expr::Intrinsic { .. } => None,
        }
    }

    /// The type of this expression, as established by the front-end
    /// type-checker.
    pub fn type_of(&self, module: &Module) -> Type {
        match self {
            Expr::Const(c) => c.scalar_type(),
            Expr::VarRef(v) => module[*v].ty.clone(),
            Expr::Index { base, .. } => match &*base.type_of(module) {
                TypeKind::Array { elem, .. } => elem.clone(),
                TypeKind::Matrix { rows, elem, .. } => TypeKind::vector(*elem, *rows),
                TypeKind::Vector { elem, .. } => TypeKind::scalar(*elem),
                TypeKind::Scalar(_) | TypeKind::Struct(_) => {
                    unreachable!("ill-typed index expression")
                }
            },
            Expr::Field { base, field } => match &*base.type_of(module) {
                TypeKind::Struct(def) => def.fields[*field as usize].ty.clone(),
                _ => unreachable!("ill-typed field access"),
            },
            Expr::Swizzle { base, comps } => match &*base.type_of(module) {
                &TypeKind::Vector { elem, .. } => {
                    if comps.len() == 1 {
                        TypeKind::scalar(elem)
                    } else {
                        TypeKind::vector(elem, comps.len() as u8)
                    }
                }
                _ => unreachable!("ill-typed swizzle"),
            },
            Expr::Binary { lhs, .. } => lhs.type_of(module),
            Expr::Construct { ty, .. } => ty.clone(),
            Expr::ArrayLength { .. } => TypeKind::scalar(Scalar::I32),
            Expr::AtomicCall { args, .. } => args[0].type_of(module),
            Expr::Intrinsic { op, args } => match op {
                MemOp::BufferLoad { ty, .. }
                | MemOp::SharedLoad { ty }
                | MemOp::Atomic { ty, .. } => ty.clone(),
                MemOp::BufferSize => TypeKind::scalar(Scalar::U32),
                MemOp::BufferStore { .. } | MemOp::SharedStore { .. } => {
                    // Stores are statements in all but name; their "value" is
                    // never consumed.
                    args[args.len() - 1].type_of(module)
                }
            },
        }
    }
}

/// A store's component mask: bit `i` selects component `i` of the
/// destination. For scalar (and aggregate-element) assignments the mask is a
/// single bit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct WriteMask(pub u8);

impl WriteMask {
    pub const SCALAR: WriteMask = WriteMask(0b1);

    pub fn all(comps: u8) -> WriteMask {
        WriteMask((1u8 << comps) - 1)
    }

    pub fn single(comp: u8) -> WriteMask {
        WriteMask(1 << comp)
    }

    pub fn from_swizzle(comps: &SwizzleComps) -> WriteMask {
        WriteMask(comps.iter().fold(0, |m, &c| m | (1 << c)))
    }

    /// The full mask for a value of type `ty` (vectors get one bit per
    /// component, everything else writes as a unit).
    pub fn for_type(ty: &Type) -> WriteMask {
        match &**ty {
            TypeKind::Vector { comps, .. } => WriteMask::all(*comps),
            _ => WriteMask::SCALAR,
        }
    }
}

/// The statement tree. Assignments are statements (the front-end normalizes
/// expression-position assignments away), which is what lets the lowering
/// passes expand one statement into a prelude plus a replacement.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Stmt {
    Assign { lhs: Expr, rhs: Expr, write_mask: WriteMask },
    Eval(Expr),
    If { cond: Expr, then_branch: Vec<Stmt>, else_branch: Vec<Stmt> },
    Loop { body: Vec<Stmt> },
    Block(Vec<Stmt>),
}

impl Stmt {
    /// An assignment with the full write mask for `lhs`'s type.
    pub fn assign(module: &Module, lhs: Expr, rhs: Expr) -> Stmt {
        let write_mask = WriteMask::for_type(&lhs.type_of(module));
        Stmt::Assign { lhs, rhs, write_mask }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FuncDef {
    pub name: String,
    pub body: Vec<Stmt>,
}

/// One shader stage's IR: interface blocks (read-only linker output),
/// variable declarations, and function bodies.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Module {
    pub blocks: Vec<InterfaceBlock>,
    pub vars: Vec<VarDecl>,
    pub funcs: Vec<FuncDef>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_block(&mut self, block: InterfaceBlock) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn declare_var(&mut self, var: VarDecl) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(var);
        id
    }

    /// Declare a named instance variable for `block` (the usual way a block
    /// enters the expression tree).
    pub fn declare_block_instance(&mut self, block: BlockId, name: impl Into<String>) -> VarId {
        let decl = VarDecl {
            name: name.into(),
            ty: self[block].instance_type(),
            kind: VarKind::BlockInstance { block },
            matrix_layout: MatrixLayout::Inherited,
        };
        self.declare_var(decl)
    }

    /// Declare a global-scope variable standing for one member of a
    /// non-instanced `block`.
    pub fn declare_block_field_var(&mut self, block: BlockId, field: u32) -> VarId {
        let f = &self[block].fields[field as usize];
        let decl = VarDecl {
            name: f.name.clone(),
            ty: f.ty.clone(),
            kind: VarKind::BlockField { block, field },
            matrix_layout: f.matrix_layout,
        };
        self.declare_var(decl)
    }
}

impl ops::Index<BlockId> for Module {
    type Output = InterfaceBlock;
    fn index(&self, id: BlockId) -> &InterfaceBlock {
        &self.blocks[id.0 as usize]
    }
}

impl ops::Index<VarId> for Module {
    type Output = VarDecl;
    fn index(&self, id: VarId) -> &VarDecl {
        &self.vars[id.0 as usize]
    }
}
