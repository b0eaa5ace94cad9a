//! `slir` is the middle-end of a shading-language compiler, reduced to the
//! passes that deal with buffer-backed storage: it rewrites references to
//! variables whose storage lives in a uniform buffer (UBO), a shader storage
//! buffer (SSBO), or workgroup-shared memory into explicit byte-offset
//! load/store/atomic intrinsics, computing std140/std430 memory layouts
//! exactly (nested structs/arrays, row/column-major matrices, unsized
//! trailing arrays, atomics).
//!
//! #### Notable types/modules
//!
//! ##### IR data types
//! * [`ir::Module`]: owns [`ir::InterfaceBlock`]s, [`ir::VarDecl`]s and
//!   [`ir::FuncDef`]s for one shader stage
//! * [`ir::Expr`]/[`ir::Stmt`]: the expression/statement tree the passes
//!   rewrite, including the closed dereference-chain grammar
//!
//! ##### Utilities and passes
//! * [`mem::layout::LayoutCache`]: std140/std430 layout computation
//! * [`lower::lower_module`]: the buffer-backed-variable lowering pass
//! * [`transform`]: tree-rewriting utilities shared by the passes

// BEGIN - Embark standard lints v6 for Rust 1.55+
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_digit_groups,
    clippy::large_stack_arrays,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::missing_enforced_import_renames,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_for_each,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::rc_mutex,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v6 for Rust 1.55+
// crate-specific exceptions:
#![allow(
    // NOTE(slir) ignored for readability (`match` used when `if let` is too long).
    clippy::single_match_else,
)]
// NOTE(slir) this is stronger than the "Embark standard lints" above, because
// we almost never need `unsafe` code and this is a further "speed bump" to it.
#![forbid(unsafe_code)]

// NOTE(slir) all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod ir;
pub mod lower;
pub mod mem;
pub mod transform;

use std::borrow::Cow;
use std::fmt;

// HACK(slir) work around the lack of an `FxIndexMap` type alias elsewhere.
#[doc(hidden)]
type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Diagnostics produced by `slir` passes.
///
/// A pass either completes, or returns the single fatal [`Diag`] that stopped
/// it; the shader stage being compiled is then abandoned, with no effect on
/// sibling stages.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Diag {
    pub level: DiagLevel,
    pub message: Vec<DiagMsgPart>,
}

impl Diag {
    pub fn new(level: DiagLevel, message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self { level, message: message.into_iter().collect() }
    }

    /// An invariant of the IR (or of this crate itself) was broken: the input
    /// was not produced by a conforming front-end, or a pass has a defect.
    #[track_caller]
    pub fn bug(message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self::new(DiagLevel::Bug(std::panic::Location::caller()), message)
    }

    pub fn err(message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self::new(DiagLevel::Error, message)
    }
}

/// The "severity" level of a [`Diag`]nostic.
///
/// Note: `Bug` diagnostics track their emission point for easier identification.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DiagLevel {
    Bug(&'static std::panic::Location<'static>),
    Error,
}

/// One part of a [`Diag`]nostic message, allowing rich interpolation.
#[derive(Clone, PartialEq, Eq, Hash, Debug, derive_more::From)]
pub enum DiagMsgPart {
    Plain(Cow<'static, str>),

    Type(ir::Type),
}

// A forwarded (blanket) `From` impl on `Plain` would be incoherent with
// `From<ir::Type>` (`Type` is an `Rc` alias), so spell out the string
// conversions instead.
impl From<&'static str> for DiagMsgPart {
    fn from(s: &'static str) -> Self {
        DiagMsgPart::Plain(s.into())
    }
}

impl From<String> for DiagMsgPart {
    fn from(s: String) -> Self {
        DiagMsgPart::Plain(s.into())
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let DiagLevel::Bug(location) = self.level {
            write!(f, "BUG({location}): ")?;
        }
        for part in &self.message {
            match part {
                DiagMsgPart::Plain(s) => write!(f, "{s}")?,
                DiagMsgPart::Type(ty) => write!(f, "{ty}")?,
            }
        }
        Ok(())
    }
}
