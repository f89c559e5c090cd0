//! Size/alignment/ABI-representation classification for [`Type`].
//!
//! This is the `LayoutOf` half of `liric_abi`'s generic `TyAndLayout<T>`:
//! given a concrete [`Type`], compute its [`Layout`] the way a backend
//! needs it (byte size, byte alignment, and whether it is passed as a
//! scalar, a scalar pair, or indirectly through memory). Struct/array
//! layout follows plain C rules (natural alignment, fields laid out in
//! declaration order) unless the struct is `packed`.

use crate::types::Type;
use liric_abi::{AbiAndPrefAlign, Align, BackendRepr, Layout, Primitive, Size, TyAndLayout};

fn align(bytes: u64) -> AbiAndPrefAlign {
    AbiAndPrefAlign {
        abi: Align::from_bytes(bytes).unwrap(),
        pref: Align::from_bytes(bytes).unwrap(),
    }
}

/// Computes the layout of `ty` on a 64-bit host (x86-64 or aarch64: both
/// use LP64 data models with identical scalar sizes and alignments for
/// every type in spec.md's type grammar).
pub fn layout_of<'a>(ty: Type<'a>) -> TyAndLayout<Type<'a>> {
    let layout = match ty {
        Type::Void => Layout {
            size: Size::from_bytes(0),
            align: align(1),
            backend_repr: BackendRepr::Memory,
        },
        Type::I1 => scalar(1, Primitive::I1),
        Type::I8 => scalar(1, Primitive::I8),
        Type::I16 => scalar(2, Primitive::I16),
        Type::I32 => scalar(4, Primitive::I32),
        Type::I64 => scalar(8, Primitive::I64),
        Type::F32 => scalar(4, Primitive::F32),
        Type::F64 => scalar(8, Primitive::F64),
        Type::Ptr => scalar(8, Primitive::Pointer),
        Type::Array(elem, count) => {
            let elem_layout = layout_of(*elem);
            let elem_size = elem_layout.layout.size.bytes();
            let stride = elem_size.next_multiple_of(elem_layout.layout.align.abi.bytes().max(1));
            Layout {
                size: Size::from_bytes(stride * count),
                align: elem_layout.layout.align,
                backend_repr: BackendRepr::Memory,
            }
        }
        Type::Struct(fields, packed) => struct_layout(fields, packed),
        Type::Function(..) => Layout {
            size: Size::from_bytes(8),
            align: align(8),
            backend_repr: BackendRepr::Memory,
        },
    };
    TyAndLayout { ty, layout }
}

fn scalar(size: u64, prim: Primitive) -> Layout {
    Layout {
        size: Size::from_bytes(size),
        align: align(size),
        backend_repr: BackendRepr::Scalar(prim),
    }
}

/// Byte offset of each field within a struct laid out per `layout_of`'s
/// rules. Used by GEP lowering and the LLVM adapter's struct construction.
pub fn field_offsets<'a>(fields: &[Type<'a>], packed: bool) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut cursor = 0u64;
    for &field in fields {
        let field_layout = layout_of(field);
        let field_align = if packed {
            1
        } else {
            field_layout.layout.align.abi.bytes().max(1)
        };
        cursor = cursor.next_multiple_of(field_align);
        offsets.push(cursor);
        cursor += field_layout.layout.size.bytes();
    }
    offsets
}

fn struct_layout<'a>(fields: &[Type<'a>], packed: bool) -> Layout {
    let offsets = field_offsets(fields, packed);
    let mut size = 0u64;
    let mut max_align = 1u64;
    for (field, &offset) in fields.iter().zip(&offsets) {
        let field_layout = layout_of(*field);
        size = size.max(offset + field_layout.layout.size.bytes());
        if !packed {
            max_align = max_align.max(field_layout.layout.align.abi.bytes().max(1));
        }
    }
    if !packed {
        size = size.next_multiple_of(max_align);
    }

    // Two-eightword (<= 16 bytes) aggregates of exactly two scalar fields
    // are classified as a scalar pair so the ABI can keep them in a pair
    // of registers instead of forcing a memory round-trip; anything else
    // aggregate-shaped goes through memory.
    let backend_repr = match fields {
        [a, b] if size <= 16 => match (layout_of(*a).layout.backend_repr, layout_of(*b).layout.backend_repr) {
            (BackendRepr::Scalar(pa), BackendRepr::Scalar(pb)) => BackendRepr::ScalarPair(pa, pb),
            _ => BackendRepr::Memory,
        },
        _ => BackendRepr::Memory,
    };

    Layout {
        size: Size::from_bytes(size),
        align: align(max_align),
        backend_repr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sizes_match_c_conventions() {
        assert_eq!(layout_of(Type::I64).layout.size.bytes(), 8);
        assert_eq!(layout_of(Type::I32).layout.size.bytes(), 4);
        assert_eq!(layout_of(Type::Ptr).layout.size.bytes(), 8);
    }

    #[test]
    fn struct_layout_pads_for_alignment() {
        // { i8, i32 } packs to offset 0 / offset 4, size 8 (padding after i8).
        let fields = [Type::I8, Type::I32];
        let offsets = field_offsets(&fields, false);
        assert_eq!(offsets, vec![0, 4]);
        let layout = struct_layout(&fields, false);
        assert_eq!(layout.size.bytes(), 8);
    }

    #[test]
    fn packed_struct_has_no_padding() {
        let fields = [Type::I8, Type::I32];
        let offsets = field_offsets(&fields, true);
        assert_eq!(offsets, vec![0, 1]);
        let layout = struct_layout(&fields, true);
        assert_eq!(layout.size.bytes(), 5);
    }

    #[test]
    fn array_layout_scales_by_stride() {
        let layout = layout_of(Type::Array(&Type::I32, 4));
        assert_eq!(layout.layout.size.bytes(), 16);
    }
}
