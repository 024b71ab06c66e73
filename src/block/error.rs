use thiserror::Error;

/// Classification of a [`BlockError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The transport reported a failure (timeout, address, size, bus fault).
    #[error("Transport error")]
    Transport,
    /// Post-write readback disagrees with committed data under the verify mask.
    #[error("Verify error")]
    VerifyMismatch,
    /// Two variables claim the same bit without both allowing overlap.
    #[error("Overlap error")]
    Overlap,
    /// Invalid block, variable or transport configuration.
    #[error("Configuration error")]
    Configuration,
    /// A local get/set hook failed or rejected a value.
    #[error("Hook error")]
    Hook,
    /// A value could not be converted or combined.
    #[error("Value error")]
    Value,
}

/// Error raised by block configuration, staging and transactions.
///
/// Carries the block path and absolute address so messages can be traced
/// back to a physical location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Memory error for {path} at address {address:#010x}: {kind}. {message}")]
pub struct BlockError {
    kind: ErrorKind,
    path: String,
    address: u64,
    message: String,
}

impl BlockError {
    pub fn new(
        kind: ErrorKind,
        path: impl Into<String>,
        address: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            address,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_address_and_kind() {
        let err = BlockError::new(ErrorKind::Transport, "Top.Dev.Reg", 0x1000, "timeout");
        let msg = err.to_string();
        assert!(msg.contains("Top.Dev.Reg"));
        assert!(msg.contains("0x00001000"));
        assert!(msg.contains("Transport error"));
        assert!(msg.ends_with("timeout"));
    }

    #[test]
    fn accessors_round_trip_fields() {
        let err = BlockError::new(ErrorKind::Overlap, "a", 4, "b");
        assert_eq!(err.kind(), ErrorKind::Overlap);
        assert_eq!(err.path(), "a");
        assert_eq!(err.address(), 4);
        assert_eq!(err.message(), "b");
    }
}
