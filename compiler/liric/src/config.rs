//! The public configuration surface (spec §6): the option table a caller
//! sets before [`crate::Compiler::create`] builds a session out of it.
//! Kept as a plain struct with a builder method chain rather than a
//! config-file layer, matching the teacher's preference for explicit
//! constructors (`tidec` has no config crate; we do not invent one).

use liric_abi::{BackendKind, TargetTriple};
use liric_session::{LiricError, Mode};

/// `policy = DIRECT | IR` (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Each function is compiled on `func_end`; no IR optimization.
    Direct,
    /// Whole-module buffering; enables IR passes and the LLVM backend.
    Ir,
}

impl From<Policy> for Mode {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Direct => Mode::Direct,
            Policy::Ir => Mode::Ir,
        }
    }
}

/// `backend = ISEL | COPY_PATCH | LLVM` (spec §6), re-exported from
/// `liric_abi` since the public and session-level vocabularies coincide
/// exactly — no separate translation table needed.
pub type Backend = BackendKind;

/// The `target = <name or NULL>` option (spec §6): `None` picks the host;
/// `Some("x86_64")`, `Some("aarch64")`/`Some("arm64")`, or
/// `Some("riscv64-<abi>")` name an explicit one. Parsed lazily by
/// [`Config::resolve_target`] so an unsupported choice (spec.md's
/// non-goal: "cross-compilation beyond host-arch selection between
/// x86-64 and aarch64") surfaces as an `UNSUPPORTED` error from
/// `Compiler::create` rather than silently falling back to the host, per
/// spec §9's "never silently swallowed" rule for backend failures.
#[derive(Clone, Debug)]
pub struct Config {
    pub policy: Policy,
    pub backend: Backend,
    pub target: Option<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Direct
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            policy: Policy::default(),
            backend: BackendKind::Isel,
            target: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Validates the `policy`/`backend` combination spec §6 constrains:
    /// `backend = LLVM` requires `policy = IR`.
    pub fn validate(&self) -> Result<(), LiricError> {
        if self.backend == Backend::Llvm && self.policy != Policy::Ir {
            return Err(LiricError::Argument(
                "backend = LLVM requires policy = IR".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves `target` into a concrete [`TargetTriple`], `None` meaning
    /// "host". `x86_64` and `aarch64`/`arm64` map to the two host
    /// architectures `liric_isel`/`liric_object` actually implement;
    /// `riscv64-<abi>` is accepted syntactically (spec §6 lists it) but
    /// rejected here since no codegen or object lane emits for it.
    pub fn resolve_target(&self) -> Result<Option<TargetTriple>, LiricError> {
        let Some(name) = self.target.as_deref() else {
            return Ok(None);
        };
        match name {
            "x86_64" => Ok(Some(TargetTriple::new("x86_64", "unknown", "linux", "gnu", ""))),
            "aarch64" | "arm64" => {
                Ok(Some(TargetTriple::new("aarch64", "unknown", "linux", "gnu", "")))
            }
            other if other.starts_with("riscv64") => Err(LiricError::Unsupported(format!(
                "target `{other}`: riscv64 is accepted as a configuration value but has no \
                 codegen or object-emission lane (spec.md non-goal: host-arch selection is \
                 limited to x86-64 and aarch64)"
            ))),
            other => Err(LiricError::Argument(format!("unrecognized target `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_direct_isel_host() {
        let cfg = Config::new();
        assert_eq!(cfg.policy, Policy::Direct);
        assert_eq!(cfg.backend, Backend::Isel);
        assert!(cfg.resolve_target().unwrap().is_none());
    }

    #[test]
    fn llvm_backend_requires_ir_policy() {
        let cfg = Config::new().with_backend(Backend::Llvm);
        assert!(cfg.validate().is_err());
        let cfg = Config::new().with_backend(Backend::Llvm).with_policy(Policy::Ir);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn riscv64_target_is_explicitly_unsupported() {
        let cfg = Config::new().with_target("riscv64-lp64d");
        assert!(matches!(cfg.resolve_target(), Err(LiricError::Unsupported(_))));
    }

    #[test]
    fn arm64_alias_resolves_to_aarch64() {
        let cfg = Config::new().with_target("arm64");
        let triple = cfg.resolve_target().unwrap().unwrap();
        assert_eq!(triple.arch, "aarch64");
    }
}
