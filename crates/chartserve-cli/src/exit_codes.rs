//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - bad reference, constraint or format
pub const VALIDATION_ERROR: i32 = 2;

/// Not found - chart, version or file does not exist
pub const NOT_FOUND: i32 = 3;

/// Authentication error - credentials missing or rejected
pub const AUTH_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Network error - upstream unreachable or timed out
pub const NETWORK_ERROR: i32 = 6;

/// Configuration error (sysexits.h EX_CONFIG)
pub const CONFIG_ERROR: i32 = 78;
