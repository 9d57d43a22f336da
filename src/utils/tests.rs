use super::error::{close_code, truncate_reason, MAX_CLOSE_REASON_BYTES};
use super::logging::redact_key;

#[test]
fn test_close_code_shifts_http_codes() {
    assert_eq!(close_code(400), 4400);
    assert_eq!(close_code(403), 4403);
    assert_eq!(close_code(500), 4500);
}

#[test]
fn test_close_code_passes_through_reserved_range() {
    assert_eq!(close_code(4409), 4409);
}

#[test]
fn test_truncate_reason_keeps_short_lines() {
    assert_eq!(truncate_reason("No matching subscription"), "No matching subscription");
}

#[test]
fn test_truncate_reason_drops_later_lines() {
    assert_eq!(truncate_reason("first line\nsecond line"), "first line");
}

#[test]
fn test_truncate_reason_respects_byte_limit() {
    let long = "x".repeat(400);
    assert_eq!(truncate_reason(&long).len(), MAX_CLOSE_REASON_BYTES);
}

#[test]
fn test_truncate_reason_respects_char_boundaries() {
    let long = "é".repeat(200);
    let truncated = truncate_reason(&long);
    assert!(truncated.len() <= MAX_CLOSE_REASON_BYTES);
    assert!(truncated.chars().all(|c| c == 'é'));
}

#[test]
fn test_redact_key_hides_most_of_the_key() {
    let redacted = redact_key("K24CHARSTRINGAAAAAAAAAAA");
    assert_eq!(redacted, "K24C***");
    assert!(!redacted.contains("STRING"));
}

#[test]
fn test_redact_key_hides_short_keys_entirely() {
    assert_eq!(redact_key("short"), "***");
}
