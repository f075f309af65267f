//! Conformance: DPP Status registry.
//!
//! Values are fixed by the wire format; names are what event logs print.

use dpp_core::errors::{is_valid_status, StatusCode, STATUS_NAMES};

#[test]
fn conformance_status_registry_exact_list() {
    let expected: [&str; 14] = [
        "OK",
        "NOT_COMPATIBLE",
        "AUTH_FAILURE",
        "UNWRAP_FAILURE",
        "BAD_GROUP",
        "CONFIGURE_FAILURE",
        "RESPONSE_PENDING",
        "INVALID_CONNECTOR",
        "NO_MATCH",
        "CONFIG_REJECTED",
        "NO_AP",
        "CONFIGURE_PENDING",
        "CSR_NEEDED",
        "CSR_BAD",
    ];
    assert_eq!(STATUS_NAMES, expected, "status names drifted");
}

#[test]
fn conformance_status_values_are_positions() {
    for (value, name) in STATUS_NAMES.iter().enumerate() {
        let status = StatusCode::try_from(value as u8).unwrap();
        assert_eq!(status.as_u8() as usize, value);
        assert_eq!(status.name(), *name);
    }
}

#[test]
fn conformance_status_named_values() {
    assert_eq!(StatusCode::ResponsePending.as_u8(), 6);
    assert_eq!(StatusCode::InvalidConnector.as_u8(), 7);
    assert_eq!(StatusCode::NoAp.as_u8(), 10);
    assert_eq!(StatusCode::CsrNeeded.as_u8(), 12);
}

#[test]
fn conformance_status_validator_rejects_unknown() {
    assert!(is_valid_status(13));
    assert!(!is_valid_status(14));
    assert!(!is_valid_status(0xff));
    assert_eq!(StatusCode::try_from(14), Err(14));
}

#[test]
fn conformance_status_display() {
    assert_eq!(StatusCode::NoMatch.to_string(), "NO_MATCH (8)");
}
