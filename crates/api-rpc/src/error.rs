//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use devkeep_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const INVALID_STATE: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const DEVICE_UNAVAILABLE: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const PERSISTENCE_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// JSON-RPC error code for an application error
pub fn error_code(err: &AppError) -> i32 {
    match err {
        AppError::Validation(_) | AppError::Serialization(_) => code::VALIDATION_ERROR,
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::InvalidState(_) => code::INVALID_STATE,
        AppError::DeviceUnavailable(_) => code::DEVICE_UNAVAILABLE,
        AppError::Persistence(_) => code::PERSISTENCE_ERROR,
        AppError::Protocol(_) | AppError::Execution(_) | AppError::Io(_) => code::SYSTEM_ERROR,
        AppError::Config(_) | AppError::Internal(_) => code::INTERNAL_ERROR,
    }
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(error_code(&err), err.to_string(), None::<()>)
}

pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use devkeep_core::port::{ExecutionError, ProtocolError};

    #[test]
    fn test_error_codes() {
        assert_eq!(error_code(&AppError::Validation("x".into())), 4000);
        assert_eq!(error_code(&AppError::NotFound("x".into())), 4001);
        assert_eq!(error_code(&AppError::InvalidState("x".into())), 4002);
        assert_eq!(error_code(&AppError::DeviceUnavailable("x".into())), 4004);
        assert_eq!(error_code(&AppError::Internal("x".into())), 5000);
        assert_eq!(error_code(&AppError::Persistence("x".into())), 5001);
        assert_eq!(
            error_code(&AppError::Protocol(ProtocolError::ConnectionClosed)),
            5002
        );
        assert_eq!(
            error_code(&AppError::Execution(ExecutionError::SpawnFailed("x".into()))),
            5002
        );
    }

    #[test]
    fn test_rpc_error_carries_message() {
        let err = to_rpc_error(AppError::NotFound("backup 2024-03-01_020000".into()));
        assert_eq!(err.code(), code::NOT_FOUND);
        assert!(err.message().contains("2024-03-01_020000"));
        assert_eq!(throttled().code(), code::THROTTLED);
    }
}
