use std::fmt;

/// A type in the Liric IR.
///
/// Primitive variants are plain tags; composite variants borrow their
/// substructure from the owning module's arena, so `Type<'a>` stays
/// `Copy` and cheap to pass around even though it can describe
/// arbitrarily deep aggregates.
///
/// **Invariant.** `Ptr` has no pointee type. Every `load`/`store`/`gep`
/// carries the element type explicitly on the instruction; this is the
/// "opaque pointer" model and it prevents phantom bitcasts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Type<'a> {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Opaque pointer; no pointee type travels with it.
    Ptr,
    Array(&'a Type<'a>, u64),
    Struct(&'a [Type<'a>], bool /* packed */),
    Function(&'a Type<'a>, &'a [Type<'a>], bool /* vararg */),
}

impl<'a> Type<'a> {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(..) | Type::Struct(..))
    }
}

impl fmt::Display for Type<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Array(elem, n) => write!(f, "[{} x {}]", n, elem),
            Type::Struct(fields, packed) => {
                if *packed {
                    write!(f, "<{{")?;
                } else {
                    write!(f, "{{")?;
                }
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                if *packed {
                    write!(f, "}}>")
                } else {
                    write!(f, "}}")
                }
            }
            Type::Function(ret, params, vararg) => {
                write!(f, "{} (", ret)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if *vararg {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
        }
    }
}
