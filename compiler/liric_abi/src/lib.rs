pub mod calling_convention;
pub mod layout;
pub mod reloc;
pub mod size_and_align;
pub mod target;

pub use layout::{BackendRepr, Layout, Primitive, TyAndLayout};
pub use reloc::RelocKind;
pub use size_and_align::{AbiAndPrefAlign, Align, AlignError, Size};
pub use target::{AddressSpace, BackendKind, Endianess, LiricTarget, TargetDataLayout, TargetTriple};
