use std::sync::Arc;
use std::time::Duration;

use micro_flow::channel::TokioChannel;
use micro_flow::config::StreamConfig;
use micro_flow::connection::HttpStream;
use micro_flow::flow::Publisher;
use micro_flow::operator::TokioScheduler;
use micro_flow::protocol::ParseError;
use micro_flow::sink::WriteSubscriber;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;

fn config() -> StreamConfig {
    StreamConfig::default().with_buffer_size(16)
}

#[tokio::test]
async fn head_and_body_over_a_duplex_stream() {
    let (mut client, server) = tokio::io::duplex(1024);
    let config = config();
    let stream = HttpStream::new(
        TokioChannel::new(server),
        config.buffer_pool(),
        Arc::new(TokioScheduler::current()),
        config,
    );

    client.write_all(b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello").await.unwrap();
    drop(client);

    let head = stream.read_head().unwrap().await.unwrap();
    assert_eq!(head.method(), &http::Method::POST);
    assert_eq!(head.target(), "/upload");
    assert_eq!(head.header("content-length").and_then(|h| h.value_str()), Some("5"));

    let (sink, mut received) = tokio::io::duplex(1024);
    let (writer, written) = WriteSubscriber::spawn(sink, &Handle::current());
    stream.body().unwrap().subscribe(writer).unwrap();

    assert_eq!(written.await.unwrap(), 5);
    let mut body = String::new();
    received.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "hello");

    assert_eq!(stream.publisher().pool().stats().leased, 0);
    assert!(stream.is_open());
}

#[tokio::test]
async fn truncated_head_reports_unexpected_end() {
    let (mut client, server) = tokio::io::duplex(1024);
    let config = config();
    let stream = HttpStream::new(
        TokioChannel::new(server),
        config.buffer_pool(),
        Arc::new(TokioScheduler::current()),
        config,
    );

    client.write_all(b"GET / HTTP/1.1\r\nHost: loc").await.unwrap();
    drop(client);

    let result = stream.read_head().unwrap().await;
    assert!(matches!(result, Err(ParseError::UnexpectedEnd { .. })));
}

#[tokio::test]
async fn silent_client_times_out() {
    let (_client, server) = tokio::io::duplex(1024);
    let config = config().with_idle_timeout(Duration::from_millis(20));
    let stream = HttpStream::new(
        TokioChannel::new(server),
        config.buffer_pool(),
        Arc::new(TokioScheduler::current()),
        config,
    );

    let result = stream.read_head().unwrap().await;
    match result {
        Err(ParseError::Flow { source }) => assert!(source.is_timeout()),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!stream.is_open());
}
