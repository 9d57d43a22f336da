//! Application close codes and close-reason formatting.
//!
//! WebSocket close frames carry application codes in the 4xxx range,
//! computed as `4000 + <HTTP-like code>`. Reason strings are limited to a
//! single line and to the 123 bytes a close frame payload allows.

/// Maximum number of bytes a close-frame reason may occupy.
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Maps an HTTP-like status code into the application close-code range.
/// Codes below 1000 are shifted into the reserved 4xxx band; anything
/// already above that is passed through unchanged.
pub const fn close_code(status: u16) -> u16 {
    if status < 1000 {
        4000 + status
    } else {
        status
    }
}

pub const CLOSE_BAD_REQUEST: u16 = close_code(400);
pub const CLOSE_FORBIDDEN: u16 = close_code(403);
pub const CLOSE_METHOD_NOT_ALLOWED: u16 = close_code(405);
pub const CLOSE_CONFLICT: u16 = close_code(409);
pub const CLOSE_INTERNAL: u16 = close_code(500);

/// Reduces a reason string to its first line, truncated to fit a close
/// frame. Truncation respects UTF-8 character boundaries.
pub fn truncate_reason(reason: &str) -> String {
    let line = reason.lines().next().unwrap_or("");
    if line.len() <= MAX_CLOSE_REASON_BYTES {
        return line.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line[..end].to_string()
}
