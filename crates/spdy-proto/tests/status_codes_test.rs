//! Status codes as seen by callers outside the crate: wire values and the
//! names used when they show up in JSON diagnostics.

use spdy_proto::{Frame, FrameType, GoAwayStatus, RstStatus};

#[test]
fn test_rst_status_wire_values() {
    assert_eq!(RstStatus::RefusedStream as u32, 3);
    assert_eq!(RstStatus::try_from(9), Ok(RstStatus::StreamAlreadyClosed));

    // 10 is unassigned
    assert_eq!(RstStatus::try_from(10), Err(10));
}

#[test]
fn test_go_away_status_wire_values() {
    assert_eq!(GoAwayStatus::try_from(2), Ok(GoAwayStatus::InternalError));
    assert_eq!(GoAwayStatus::try_from(3), Err(3));
}

#[test]
fn test_statuses_in_json() {
    let json = serde_json::to_string(&RstStatus::FlowControlError).unwrap();
    assert_eq!(json, r#""FlowControlError""#);

    let status: GoAwayStatus = serde_json::from_str(r#""ProtocolError""#).unwrap();
    assert_eq!(status, GoAwayStatus::ProtocolError);

    let frame_type: FrameType = serde_json::from_str(r#""WindowUpdate""#).unwrap();
    assert_eq!(frame_type, FrameType::WindowUpdate);
}

#[test]
fn test_go_away_frame_carries_last_good_id() {
    let frame = Frame::go_away(7, GoAwayStatus::Ok);
    assert_eq!(frame.frame_type(), FrameType::GoAway);
    assert_eq!(frame.stream_id(), None);
}
