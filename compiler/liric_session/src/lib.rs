//! The session layer (spec §4.3): the API surface a frontend or an
//! embedding application actually drives. Ties the IR (`liric_ir`), the
//! pluggable backend (`backend_lane`), and the JIT (`liric_jit`) together
//! behind one error taxonomy (`error`).

pub mod backend_lane;
pub mod error;
pub mod session;

pub use backend_lane::BackendLane;
pub use error::LiricError;
pub use session::{FuncSpec, Mode, Session};
