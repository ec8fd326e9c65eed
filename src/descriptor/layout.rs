//! Native size and alignment computation for descriptors.
//!
//! Layouts are resolved once, when a record is registered, and reused for
//! every call; nothing is re-derived mid-invocation.

use std::ffi::c_void;
use std::mem;

use super::{Catalog, FieldDesc, TypeDesc};

/// Align a value up to the nearest multiple of alignment.
#[inline]
pub fn align_to(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Native size and alignment of one type shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NativeLayout {
    pub size: usize,
    pub align: usize,
}

impl NativeLayout {
    const fn of<T>() -> Self {
        Self {
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
        }
    }

    /// Layout of a native pointer.
    pub const fn pointer() -> Self {
        Self::of::<*const c_void>()
    }
}

/// Compute the native layout of a type shape.
///
/// Returns `None` when a record or enum id does not resolve in the catalog.
/// Booleans occupy a C `int`; compound types other than embedded records
/// occupy one pointer.
pub fn layout_of(ty: &TypeDesc, catalog: &Catalog) -> Option<NativeLayout> {
    Some(match ty {
        TypeDesc::Void => NativeLayout::pointer(),
        TypeDesc::Bool => NativeLayout::of::<i32>(),
        TypeDesc::I8 => NativeLayout::of::<i8>(),
        TypeDesc::U8 => NativeLayout::of::<u8>(),
        TypeDesc::I16 => NativeLayout::of::<i16>(),
        TypeDesc::U16 => NativeLayout::of::<u16>(),
        TypeDesc::I32 => NativeLayout::of::<i32>(),
        TypeDesc::U32 => NativeLayout::of::<u32>(),
        TypeDesc::I64 => NativeLayout::of::<i64>(),
        TypeDesc::U64 => NativeLayout::of::<u64>(),
        TypeDesc::F32 => NativeLayout::of::<f32>(),
        TypeDesc::F64 => NativeLayout::of::<f64>(),
        TypeDesc::Char => NativeLayout::of::<u32>(),
        TypeDesc::Utf8
        | TypeDesc::Filename
        | TypeDesc::Array(_)
        | TypeDesc::List(_)
        | TypeDesc::Map(_, _)
        | TypeDesc::Object(_)
        | TypeDesc::Callback(_)
        | TypeDesc::ErrorValue => NativeLayout::pointer(),
        TypeDesc::Record(id) => {
            let rec = catalog.record(*id)?;
            NativeLayout {
                size: rec.size,
                align: rec.align,
            }
        }
        TypeDesc::Enum(id) | TypeDesc::Flags(id) => {
            let desc = catalog.enum_(*id)?;
            layout_of(&desc.storage, catalog)?
        }
    })
}

/// Lay out record fields with native C rules: each field aligned to its own
/// alignment, total size padded to the strictest alignment.
///
/// Record and enum ids that do not resolve yet are laid out pointer-sized;
/// register nested types first to avoid this.
pub(crate) fn lay_out_fields(
    catalog: &Catalog,
    fields: &[(&str, TypeDesc)],
) -> (Vec<FieldDesc>, usize, usize) {
    let mut out = Vec::with_capacity(fields.len());
    let mut offset = 0usize;
    let mut max_align = 1usize;

    for (name, ty) in fields {
        let layout = layout_of(ty, catalog).unwrap_or(NativeLayout::pointer());
        offset = align_to(offset, layout.align);
        out.push(FieldDesc {
            name: name.to_string(),
            ty: ty.clone(),
            offset,
        });
        offset += layout.size;
        max_align = max_align.max(layout.align);
    }

    (out, align_to(offset, max_align), max_align)
}
