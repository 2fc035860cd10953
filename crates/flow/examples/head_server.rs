use std::sync::Arc;

use micro_flow::buffer::BufferPool;
use micro_flow::channel::TokioChannel;
use micro_flow::config::StreamConfig;
use micro_flow::connection::HttpStream;
use micro_flow::flow::Publisher;
use micro_flow::operator::{Scheduler, TokioScheduler};
use micro_flow::protocol::{FlowError, HttpError};
use micro_flow::sink::WriteSubscriber;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return Err(e);
        }
    };

    let config = StreamConfig::default();
    let pool = config.buffer_pool();
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::current());
    loop {
        let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let pool = pool.clone();
        let scheduler = Arc::clone(&scheduler);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = echo_body(tcp_stream, pool, scheduler, config).await {
                warn!(%remote_addr, cause = %e, "connection failed");
            }
        });
    }
}

/// Reads one request head, then echoes everything the client sends after it until the
/// client shuts down its side of the connection.
async fn echo_body(
    tcp_stream: TcpStream,
    pool: BufferPool,
    scheduler: Arc<dyn Scheduler>,
    config: StreamConfig,
) -> Result<(), HttpError> {
    let (reader, mut writer) = tcp_stream.into_split();
    let stream = HttpStream::new(TokioChannel::new(reader), pool, scheduler, config);

    let head = stream.read_head()?.await?;
    info!(method = %head.method(), target = head.target(), headers = head.headers().len(), "received request head");

    writer.write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n").await.map_err(FlowError::io)?;

    let (echo, written) = WriteSubscriber::spawn(writer, &Handle::current());
    stream.body()?.subscribe(echo)?;
    let total = written.await?;

    info!(total, "echoed request body");
    stream.close();
    Ok(())
}
