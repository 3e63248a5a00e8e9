//! The hop between the filtering proxy and the decision engine.
//!
//! The proxy connects, sends the JSON-encoded URL followed by
//! [`FRAME_END`], and reads the JSON-encoded verdict until the connection
//! closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::engine::DecisionEngine;
use crate::error::{P2pError, Result};
use crate::protocol::{decode_reply, decode_request, encode_reply, encode_request, FRAME_END, MAX_FRAME_BYTES};

/// Read one request frame, terminator stripped.
async fn read_frame<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<u8>> {
    let limit = (MAX_FRAME_BYTES + 1) as u64;
    let mut reader = BufReader::new(reader.take(limit));
    let mut frame = Vec::new();
    reader.read_until(FRAME_END, &mut frame).await?;
    match frame.last() {
        Some(&FRAME_END) => {
            frame.pop();
            Ok(frame)
        }
        _ if frame.len() as u64 >= limit => Err(P2pError::Protocol(format!(
            "request frame exceeds {} bytes",
            MAX_FRAME_BYTES
        ))),
        _ => Err(P2pError::Protocol("connection closed before end of frame".into())),
    }
}

async fn write_verdict<S: AsyncWrite + Unpin>(stream: &mut S, verdict: &str) -> Result<()> {
    stream.write_all(&encode_reply(verdict)?).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Answer one proxy connection and close it. A request that cannot be
/// read is still answered, with the allow verdict, and reported as an error.
pub async fn serve_proxy_connection<S>(mut stream: S, engine: &DecisionEngine) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_frame(&mut stream).await.and_then(|frame| decode_request(&frame));
    let url = match request {
        Ok(url) => url,
        Err(e) => {
            if let Err(write_err) = write_verdict(&mut stream, &engine.policy().allow()).await {
                debug!(error = %write_err, "could not answer unreadable request");
            }
            return Err(e);
        }
    };
    debug!(%url, "proxy request");
    let verdict = engine.classify(&url).await;
    write_verdict(&mut stream, &verdict).await
}

/// Accept proxy connections forever, one task per connection.
pub async fn serve_proxy(listener: TcpListener, engine: Arc<DecisionEngine>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "proxy listener ready");
    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = serve_proxy_connection(stream, &engine).await {
                warn!(%peer, error = %e, "proxy connection failed");
            }
        });
    }
}

/// Ask the engine listening on `addr` about `url`.
pub async fn query_proxy(addr: &str, url: &str, timeout: Duration) -> Result<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&encode_request(url)?).await?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        decode_reply(&reply)
    };
    tokio::time::timeout(timeout, exchange).await?
}
