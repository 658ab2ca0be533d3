//! Client and server sessions talking through a pair of in-memory transports

use bytes::Bytes;
use spdy_proto::{GoAwayStatus, HeaderBlock, Role};
use spdy_session::{
    CloseState, IncomingStreams, Session, SessionConfig, StreamEvent, StreamRequest, StreamState,
};
use spdy_transport::{channel_transport, FrameReceiver, TransportEvent};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

struct Peer {
    session: Session,
    incoming: IncomingStreams,
    outbound: FrameReceiver,
}

fn peer(role: Role, config: SessionConfig) -> Peer {
    let (transport, outbound) = channel_transport(format!("{}-conn", role.as_str()));
    let (session, incoming) = Session::new(role, config, Arc::new(transport)).unwrap();
    Peer {
        session,
        incoming,
        outbound,
    }
}

/// Deliver everything `from` has written to `to`. Returns true if `from`
/// closed its transport.
fn pump(from: &mut Peer, to: &Session) -> bool {
    let mut closed = false;
    while let Some(event) = from.outbound.try_recv() {
        match event {
            TransportEvent::Frame(frame) => to.handle_frame(frame).unwrap(),
            TransportEvent::Closed => closed = true,
        }
    }
    closed
}

#[tokio::test]
async fn test_request_response_exchange() {
    init_tracing();

    let mut client = peer(Role::Client, SessionConfig::client_default());
    let mut server = peer(Role::Server, SessionConfig::server_default());

    let request = client
        .session
        .open_stream(
            StreamRequest::new(
                HeaderBlock::new()
                    .with(":method", "GET")
                    .with(":path", "/index.html"),
            )
            .with_priority(3)
            .with_fin(true),
        )
        .unwrap();
    assert_eq!(request.state(), StreamState::HalfClosedLocal);
    pump(&mut client, &server.session);

    let accepted = server.incoming.next().await.unwrap();
    assert_eq!(accepted.id(), 1);
    assert_eq!(accepted.priority(), 3);
    match accepted.recv().await.unwrap() {
        Some(StreamEvent::Headers(headers)) => {
            assert_eq!(headers.get(":path"), Some("/index.html"));
        }
        other => panic!("expected headers, got {:?}", other),
    }
    assert_eq!(accepted.recv().await, Ok(None));

    accepted
        .reply(HeaderBlock::new().with(":status", "200"), false)
        .unwrap();
    let body = accepted
        .send_data(Bytes::from_static(b"<html></html>"), true)
        .unwrap();
    assert_eq!(body.completed().await, Ok(()));
    assert_eq!(server.session.stream_count(), 0);
    pump(&mut server, &client.session);

    match request.recv().await.unwrap() {
        Some(StreamEvent::Headers(headers)) => assert_eq!(headers.get(":status"), Some("200")),
        other => panic!("expected headers, got {:?}", other),
    }
    assert_eq!(
        request.recv().await,
        Ok(Some(StreamEvent::Data(Bytes::from_static(b"<html></html>"))))
    );
    assert_eq!(request.recv().await, Ok(None));
    assert_eq!(request.state(), StreamState::Closed);
    assert_eq!(client.session.stream_count(), 0);
}

#[tokio::test]
async fn test_compression_context_stays_in_step_across_streams() {
    init_tracing();

    let mut client = peer(Role::Client, SessionConfig::client_default());
    let mut server = peer(Role::Server, SessionConfig::server_default());

    for i in 0..20 {
        client
            .session
            .open_stream(StreamRequest::new(
                HeaderBlock::new()
                    .with(":method", "GET")
                    .with(":path", format!("/item/{}", i))
                    .with("user-agent", "spdy-session-test"),
            ))
            .unwrap();
    }
    pump(&mut client, &server.session);

    for i in 0..20u32 {
        let stream = server.incoming.next().await.unwrap();
        assert_eq!(stream.id(), 2 * i + 1);
        let Ok(Some(StreamEvent::Headers(headers))) = stream.recv().await else {
            panic!("missing headers on stream {}", stream.id());
        };
        assert_eq!(headers.get(":path"), Some(format!("/item/{}", i).as_str()));
        assert_eq!(headers.get("User-Agent"), Some("spdy-session-test"));
    }
}

#[tokio::test]
async fn test_settings_seed_streams_opened_afterwards() {
    init_tracing();

    let mut client = peer(Role::Client, SessionConfig::client_default());
    let server_config = SessionConfig::server_default()
        .with_local_initial_window_size(1024)
        .with_local_max_concurrent_streams(10);
    let mut server = peer(Role::Server, server_config);

    let before = client
        .session
        .open_stream(StreamRequest::new(HeaderBlock::new().with(":path", "/before")))
        .unwrap();

    server.session.advertise_settings().unwrap();
    pump(&mut server, &client.session);
    assert_eq!(client.session.peer_initial_window_size(), 1024);
    assert_eq!(client.session.peer_max_concurrent_streams(), 10);

    let after = client
        .session
        .open_stream(StreamRequest::new(HeaderBlock::new().with(":path", "/after")))
        .unwrap();
    assert_eq!(before.send_window(), 64 * 1024);
    assert_eq!(after.send_window(), 1024);

    pump(&mut client, &server.session);
    assert_eq!(server.session.stream_count(), 2);
    let _ = server.incoming.next().await.unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_between_peers() {
    init_tracing();

    let mut client = peer(Role::Client, SessionConfig::client_default());
    let mut server = peer(Role::Server, SessionConfig::server_default());

    let request = client
        .session
        .open_stream(StreamRequest::new(HeaderBlock::new().with(":path", "/slow")).with_fin(true))
        .unwrap();
    pump(&mut client, &server.session);
    let accepted = server.incoming.next().await.unwrap();

    server.session.go_away(GoAwayStatus::Ok).unwrap();
    assert!(!pump(&mut server, &client.session));
    assert_eq!(client.session.close_state(), CloseState::ClosingPeer);
    // The GOAWAY covers stream 1, so the client keeps waiting for its reply
    assert_eq!(request.state(), StreamState::HalfClosedLocal);

    // Finishing the stream drains both sessions
    accepted
        .reply(HeaderBlock::new().with(":status", "503"), true)
        .unwrap();
    assert!(pump(&mut server, &client.session));
    assert_eq!(server.session.stream_count(), 0);

    match request.recv().await.unwrap() {
        Some(StreamEvent::Headers(headers)) => assert_eq!(headers.get(":status"), Some("503")),
        other => panic!("expected headers, got {:?}", other),
    }
    assert_eq!(request.recv().await, Ok(None));
    assert_eq!(client.session.stream_count(), 0);
    assert_eq!(client.outbound.try_recv(), Some(TransportEvent::Closed));
}

#[tokio::test]
async fn test_streams_opened_after_peer_go_away_marker_fail() {
    init_tracing();

    let mut client = peer(Role::Client, SessionConfig::client_default());
    let mut server = peer(Role::Server, SessionConfig::server_default());

    let first = client
        .session
        .open_stream(StreamRequest::new(HeaderBlock::new().with(":path", "/first")))
        .unwrap();
    pump(&mut client, &server.session);
    let accepted = server.incoming.next().await.unwrap();

    server.session.go_away(GoAwayStatus::Ok).unwrap();

    // Crosses the GOAWAY on the wire
    let late = client
        .session
        .open_stream(StreamRequest::new(HeaderBlock::new().with(":path", "/late")))
        .unwrap();
    assert_eq!(late.id(), 3);

    assert!(!pump(&mut server, &client.session));
    assert_eq!(late.recv().await, Err(spdy_session::StreamError::SessionClosed));
    assert_eq!(first.state(), StreamState::Open);

    first.finish().unwrap();
    pump(&mut client, &server.session);
    assert_eq!(server.session.stream_count(), 1);
    assert!(server.incoming.try_next().is_none());

    accepted
        .reply(HeaderBlock::new().with(":status", "200"), false)
        .unwrap();
    accepted
        .send_data(Bytes::from_static(b"done"), true)
        .unwrap();
    assert!(pump(&mut server, &client.session));

    match first.recv().await.unwrap() {
        Some(StreamEvent::Headers(headers)) => assert_eq!(headers.get(":status"), Some("200")),
        other => panic!("expected headers, got {:?}", other),
    }
    assert_eq!(
        first.recv().await,
        Ok(Some(StreamEvent::Data(Bytes::from_static(b"done"))))
    );
    assert_eq!(first.recv().await, Ok(None));
    assert_eq!(client.session.stream_count(), 0);
    assert_eq!(client.outbound.try_recv(), Some(TransportEvent::Closed));
}

#[tokio::test]
async fn test_peer_reset_reaches_reader() {
    let mut client = peer(Role::Client, SessionConfig::client_default());
    let mut server = peer(Role::Server, SessionConfig::server_default());

    let request = client
        .session
        .open_stream(StreamRequest::new(HeaderBlock::new().with(":path", "/")))
        .unwrap();
    pump(&mut client, &server.session);

    let accepted = server.incoming.next().await.unwrap();
    accepted
        .reset(spdy_proto::RstStatus::RefusedStream)
        .unwrap();
    pump(&mut server, &client.session);

    assert_eq!(
        request.recv().await,
        Err(spdy_session::StreamError::Reset {
            stream_id: 1,
            status: spdy_proto::RstStatus::RefusedStream,
        })
    );
    assert_eq!(client.session.stream_count(), 0);
}
