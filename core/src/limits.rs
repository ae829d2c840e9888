//! Length limits enforced by the service on string fields

/// Failure reasons
pub const MAX_REASON_LEN: usize = 256;
/// Failure details, activity results and heartbeat details
pub const MAX_DETAILS_LEN: usize = 32_768;
/// Poller identity
pub const MAX_IDENTITY_LEN: usize = 256;
/// Decision execution context
pub const MAX_EXECUTION_CONTEXT_LEN: usize = 32_768;

/// Truncate `value` to at most `max` bytes on a char boundary
pub fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Owned variant of [`truncate`]
pub fn truncate_owned(mut value: String, max: usize) -> String {
    let len = truncate(&value, max).len();
    value.truncate(len);
    value
}

/// Truncate a failure reason
pub fn reason(value: &str) -> String {
    truncate(value, MAX_REASON_LEN).to_string()
}

/// Truncate failure details
pub fn details(value: &str) -> String {
    truncate(value, MAX_DETAILS_LEN).to_string()
}
