//! Loopback Slack stand-ins for tests: a JSON Web API and an RTM socket

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Serve `respond(request_target)` as JSON for every request. Returns the
/// API base URL.
pub async fn serve_http<F>(respond: F) -> String
where
    F: Fn(&str) -> Value + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let body = respond(&target).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{}/api/", addr)
}

/// Accept RTM WebSocket sessions. Each session sends `frames` in order and
/// forwards every text frame it receives to the returned channel. When
/// `close_after` is set the server closes the socket once the frames are sent.
pub async fn serve_rtm(
    frames: Vec<String>,
    close_after: bool,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let frames = frames.clone();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut source) = ws.split();
                for frame in frames {
                    if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                if close_after {
                    let _ = sink.close().await;
                    return;
                }
                while let Some(Ok(msg)) = source.next().await {
                    if let WsMessage::Text(text) = msg {
                        let _ = seen_tx.send(text.as_str().to_string());
                    }
                }
            });
        }
    });

    (format!("ws://{}/websocket", addr), seen_rx)
}
