//! HTTP adapter for the tagging prompt service

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{parse_response, TagGenerationError, TagGenerator, TagRequest};

const MAX_ERROR_BODY: usize = 512;

/// POSTs the tagging request as JSON to a prompt-execution endpoint
pub struct HttpTagGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTagGenerator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(Client::new(), endpoint, api_key)
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TagGenerator for HttpTagGenerator {
    async fn generate_tags(&self, request: &TagRequest) -> Result<Vec<String>, TagGenerationError> {
        debug!(
            endpoint = %self.endpoint,
            with_photo = request.photo_data_uri.is_some(),
            "requesting tags"
        );

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TagGenerationError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TagGenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TagGenerationError::Service {
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn make_generator(url: String, api_key: Option<String>) -> HttpTagGenerator {
        let client = Client::builder().no_proxy().build().unwrap();
        HttpTagGenerator::with_client(client, url, api_key)
    }

    /// One-shot HTTP server: captures the request, answers with `status` and `body`
    async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
        });

        (format!("http://{}/tags", addr), rx)
    }

    #[tokio::test]
    async fn test_posts_request_and_parses_tags() {
        let (url, captured) = serve_once("200 OK", r#"{"tags":["wallet","black","leather","zipper"]}"#).await;
        let generator = make_generator(url, Some("secret".to_string()));

        let request = TagRequest::new("black leather wallet with zipper", None).unwrap();
        let tags = generator.generate_tags(&request).await.unwrap();
        assert_eq!(tags, vec!["wallet", "black", "leather", "zipper"]);

        let raw = captured.await.unwrap();
        assert!(raw.starts_with("POST /tags"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(raw.contains(r#""description":"black leather wallet with zipper""#));
        assert!(!raw.contains("photoDataUri"));
    }

    #[tokio::test]
    async fn test_service_error_status() {
        let (url, _captured) = serve_once("500 Internal Server Error", r#"{"error":"model overloaded"}"#).await;
        let generator = make_generator(url, None);

        let request = TagRequest::new("blue umbrella", None).unwrap();
        match generator.generate_tags(&request).await {
            Err(TagGenerationError::Service { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("overloaded"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (url, _captured) = serve_once("200 OK", r#"{"tags":"wallet"}"#).await;
        let generator = make_generator(url, None);

        let request = TagRequest::new("blue umbrella", None).unwrap();
        assert!(matches!(
            generator.generate_tags(&request).await,
            Err(TagGenerationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let generator = make_generator(format!("http://{}/tags", addr), None);
        let request = TagRequest::new("blue umbrella", None).unwrap();
        assert!(matches!(
            generator.generate_tags(&request).await,
            Err(TagGenerationError::Transport(_))
        ));
    }
}
