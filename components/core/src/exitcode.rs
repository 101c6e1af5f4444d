//! Exit-code contract shared between the Manager and the Watchdog.
//!
//! The Manager's normal lifecycle ends in one of two ways the Watchdog
//! must distinguish from an ordinary crash: a deliberate, non-retryable
//! stop (fatal config, `stop` control command) versus a clean exit that
//! still shouldn't trigger a respawn (e.g. `no_cop` observed mid-run).
//! Any other exit code is a crash and goes through the normal flap path.

/// The child asked not to be retried and is reporting failure.
pub const ERR_NO_RETRY_EXCODE: i32 = 121;

/// The child asked not to be retried but the outcome is not an error.
pub const OK_NO_RETRY_EXCODE: i32 = 120;

/// True if `code` means the Watchdog should not respawn the manager,
/// regardless of flap state.
pub fn is_no_retry(code: i32) -> bool {
    code == ERR_NO_RETRY_EXCODE || code == OK_NO_RETRY_EXCODE
}
