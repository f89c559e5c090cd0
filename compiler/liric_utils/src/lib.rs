pub mod idx;
pub mod index_slice;
pub mod index_vec;
pub mod variadic_log_macros;

pub use idx::Idx;
pub use index_slice::IdxSlice;
pub use index_vec::IdxVec;
