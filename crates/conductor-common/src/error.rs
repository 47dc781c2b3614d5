//! Stable error codes for the calling layer
//!
//! Every user-visible failure maps to a fixed code so the web layer can
//! render the right UI (upgrade prompt, quota banner, retry messaging)
//! without string-matching error text.

/// Trait for errors that expose a stable, documented code
pub trait ErrorCode {
    /// Machine-readable code, stable across releases
    fn code(&self) -> &'static str;
}
