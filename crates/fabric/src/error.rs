use scouter_common::ScouterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("raw sockets not permitted (need root/CAP_NET_RAW)")]
    NotPermitted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("Unable to resolve host '{0}'.")]
    Resolution(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<FabricError> for ScouterError {
    fn from(err: FabricError) -> Self {
        match err {
            FabricError::NotPermitted => ScouterError::PermissionDenied(err.to_string()),
            FabricError::Resolution(name) => ScouterError::Resolution(name),
            FabricError::Unsupported(msg) => ScouterError::Validation(msg),
            FabricError::Io(e) => ScouterError::Io(e),
            FabricError::Malformed(msg) => ScouterError::Transport(msg),
        }
    }
}
