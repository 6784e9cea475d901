use super::*;

#[test]
fn http_status_mapping() {
    assert_eq!(AppError::lock_conflict("n1", "alice").http_status(), 409);
    assert_eq!(AppError::denied("unlock_denied", "no").http_status(), 403);
    assert_eq!(AppError::malformed("bad_props", "oops").http_status(), 400);
    assert_eq!(AppError::not_found("no_node", "missing").http_status(), 404);
    assert_eq!(AppError::unavailable("sql_unavailable", "down").http_status(), 503);
    assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
}

#[test]
fn lock_conflict_reports_owner() {
    let e = AppError::lock_conflict("doc-1", "alice");
    assert_eq!(e.conflict_owner(), Some("alice"));
    assert_eq!(e.code_str(), "lock_conflict");
    assert_eq!(e.user_message(), "Document is locked by alice");
    assert_eq!(AppError::conflict("dup", "x").conflict_owner(), None);
}

#[test]
fn only_backend_failures_are_retryable() {
    assert!(AppError::backend("redb", "disk gone").is_retryable());
    assert!(!AppError::malformed("x", "y").is_retryable());
    assert!(!AppError::lock_conflict("n", "bob").is_retryable());
    assert_eq!(AppError::backend("redb", "disk gone").code_str(), "redb_unavailable");
}

#[test]
fn serializes_with_type_tag() {
    let v = serde_json::to_value(AppError::lock_conflict("n", "bob")).unwrap();
    assert_eq!(v["type"], "conflict");
    assert_eq!(v["owner"], "bob");
    let back: AppError = serde_json::from_value(v).unwrap();
    assert_eq!(back.conflict_owner(), Some("bob"));
}

#[test]
fn display_is_code_and_message() {
    assert_eq!(AppError::malformed("bad_id", "empty id").to_string(), "bad_id: empty id");
}
