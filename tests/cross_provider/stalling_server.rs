//! A bare HTTP server that sends the first part of a streamed body and then
//! holds the connection open until released.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct StallingServer {
    base_url: String,
    release: watch::Sender<bool>,
}

impl StallingServer {
    /// Every connection receives `head`, waits for [`StallingServer::release`],
    /// then receives `tail` and is closed.
    pub async fn start(content_type: &'static str, head: String, tail: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release, released) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let head = head.clone();
                let tail = tail.clone();
                let mut released = released.clone();

                tokio::spawn(async move {
                    let mut request = vec![0u8; 64 * 1024];
                    let _ = socket.read(&mut request).await;

                    let headers = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\nconnection: close\r\n\r\n"
                    );
                    if socket.write_all(headers.as_bytes()).await.is_err() {
                        return;
                    }
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;

                    let released = released.wait_for(|released| *released).await.is_ok();
                    if !released {
                        return;
                    }
                    let _ = socket.write_all(tail.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            release,
        }
    }

    /// An OpenAI-style stream that stalls after its first delta.
    pub async fn openai() -> Self {
        let frame = |content: &str| {
            format!(
                "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{content}\"}},\"finish_reason\":null}}]}}\n\n"
            )
        };
        let head = frame("Hello");
        let tail = format!(
            "{}data: {{\"choices\":[{{\"index\":0,\"delta\":{{}},\"finish_reason\":\"stop\"}}]}}\n\ndata: [DONE]\n\n",
            frame(", world!")
        );
        Self::start("text/event-stream", head, tail).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Let every stalled connection finish its body.
    pub fn release(&self) {
        let _ = self.release.send(true);
    }
}
