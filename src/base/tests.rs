use crate::base::neterror::{ErrorCategory, NetError};

#[test]
fn test_net_error_roundtrip() {
    // Standard Chromium error
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    // Custom error
    let custom = NetError::RequestBodyNotBuffered;
    let custom_code = custom.as_i32();
    assert_eq!(custom_code, -10002);
    let custom_converted = NetError::from(custom_code);
    assert!(matches!(custom_converted, NetError::RequestBodyNotBuffered));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
}

#[test]
fn test_collision_avoidance() {
    // Verify that we are not using the Blob error range (-900 to -906)
    // defined in Chromium's net_error_list.h
    let blob_range = -906..=-900;

    for err in [NetError::RequestBodyNotBuffered, NetError::NotModified, NetError::PoolClosed] {
        assert!(!blob_range.contains(&err.as_i32()));
    }
}

#[test]
fn test_categories_are_distinct() {
    assert_eq!(NetError::RequestBodyNotBuffered.category(), ErrorCategory::BufferingRequired);
    assert_eq!(NetError::ConnectionTimedOut.category(), ErrorCategory::Timeout);
    assert_eq!(NetError::ConnectionAborted.category(), ErrorCategory::Cancelled);
    assert_eq!(NetError::InvalidHttpResponse.category(), ErrorCategory::Protocol);
    assert_eq!(
        NetError::ProxyNameNotResolved { domain: "proxy".into() }.category(),
        ErrorCategory::NameResolution
    );
    assert_eq!(
        NetError::HttpStatus { status: 404, reason: "Not Found".into() }.category(),
        ErrorCategory::Status
    );
}

#[test]
fn test_fatal_to_connection() {
    assert!(NetError::ContentLengthMismatch.is_fatal_to_connection());
    assert!(NetError::ConnectionTimedOut.is_fatal_to_connection());
    assert!(!NetError::NotModified.is_fatal_to_connection());
    assert!(!NetError::RequestBodyNotBuffered.is_fatal_to_connection());
}
