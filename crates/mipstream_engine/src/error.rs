use crate::shader::ShaderSignature;

use mipstream_core::ReadError;

use thiserror::Error;

/// Errors surfaced by the streaming engine. Frame processing never aborts on these; they are
/// logged and the affected volume degrades (stale texture, empty LUT cell) until a later frame
/// succeeds.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    /// The program substrate rejected a shader variant. Fatal only for this signature;
    /// previously compiled variants keep working.
    #[error("shader assembly failed for {signature}: {reason}")]
    ShaderAssembly {
        signature: ShaderSignature,
        reason: String,
    },

    #[error(transparent)]
    Read(#[from] ReadError),
}
