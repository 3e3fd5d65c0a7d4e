//! Streamed HTTP transport for post event streams.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use log::*;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{config_error, transport_error, Error, TransportErrorKind};
use events::ResourceId;

/// Header used to resume a stream after the last event the client saw.
pub const LAST_EVENT_ID: &str = "Last-Event-ID";

const EVENT_STREAM: &str = "text/event-stream";

/// Raw body chunks of an established stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// Opens the server-streamed connection for one resource.
///
/// Implementations must not retry on their own: reconnection is driven entirely by
/// the connection manager.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        resource_id: &ResourceId,
        last_event_id: Option<&str>,
    ) -> Result<ByteStream, Error>;
}

/// Source of the caller's bearer credential. Obtaining and refreshing it is the
/// job of the auth layer; the transport asks for it on every connect.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<SecretString, Error>;
}

/// A fixed bearer token.
pub struct StaticToken {
    token: SecretString,
}

impl StaticToken {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<SecretString, Error> {
        Ok(SecretString::new(self.token.expose_secret().clone()))
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Timeout for establishing the TCP/TLS connection. The stream itself has none.
    pub connect_timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("feed-stream/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Connects to `GET {base_url}/posts/{resource_id}/events`.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    tokens: Box<dyn TokenProvider>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        tokens: Box<dyn TokenProvider>,
        config: HttpTransportConfig,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)
            .map_err(|e| config_error(&format!("invalid backend base URL `{base_url}`: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(config_error(&format!(
                "backend base URL `{base_url}` cannot be a base"
            )));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    /// The stream endpoint for a resource; the id is encoded as a single path segment.
    pub fn events_url(&self, resource_id: &ResourceId) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["posts", resource_id.as_str(), "events"]);
        }
        url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(
        &self,
        resource_id: &ResourceId,
        last_event_id: Option<&str>,
    ) -> Result<ByteStream, Error> {
        let url = self.events_url(resource_id);
        let token = self.tokens.bearer_token().await?;

        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache")
            .bearer_auth(token.expose_secret());
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID, id);
        }

        debug!("Opening event stream {url}");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(
                TransportErrorKind::Status(status.as_u16()),
                &format!("{url} answered {status}"),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(EVENT_STREAM) {
            return Err(transport_error(
                TransportErrorKind::NotEventStream,
                &format!("{url} answered with content type `{content_type}`"),
            ));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures_util::TryStreamExt;

    fn transport(base_url: &str) -> HttpTransport {
        HttpTransport::new(
            base_url,
            Box::new(StaticToken::new(SecretString::from("secret-token".to_string()))),
            HttpTransportConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_events_url() {
        let t = transport("https://api.example.com/v1/");
        assert_eq!(
            t.events_url(&ResourceId::new("post-1")).as_str(),
            "https://api.example.com/v1/posts/post-1/events"
        );

        let t = transport("https://api.example.com");
        assert_eq!(
            t.events_url(&ResourceId::new("a/b")).as_str(),
            "https://api.example.com/posts/a%2Fb/events"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpTransport::new(
            "not a url",
            Box::new(StaticToken::new(SecretString::from("t".to_string()))),
            HttpTransportConfig::default(),
        );

        assert_eq!(result.err().unwrap().error_kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_connect_streams_body_with_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts/post-1/events")
            .match_header("authorization", "Bearer secret-token")
            .match_header("accept", EVENT_STREAM)
            .with_status(200)
            .with_header("content-type", EVENT_STREAM)
            .with_body("event: comment.created\ndata: {\"id\":\"c1\"}\n\n")
            .create_async()
            .await;

        let stream = transport(&server.url())
            .connect(&ResourceId::new("post-1"), None)
            .await
            .unwrap();
        let body: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(
            body.concat(),
            b"event: comment.created\ndata: {\"id\":\"c1\"}\n\n".to_vec()
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_sends_last_event_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts/post-1/events")
            .match_header("last-event-id", "41")
            .with_status(200)
            .with_header("content-type", EVENT_STREAM)
            .create_async()
            .await;

        let _stream = transport(&server.url())
            .connect(&ResourceId::new("post-1"), Some("41"))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_reports_http_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/posts/missing/events")
            .with_status(404)
            .create_async()
            .await;

        let err = transport(&server.url())
            .connect(&ResourceId::new("missing"), None)
            .await
            .err()
            .unwrap();

        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::Status(404))
        );
        // The next attempt goes through backoff like any other failure
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_rejects_non_event_stream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/posts/post-1/events")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html></html>")
            .create_async()
            .await;

        let err = transport(&server.url())
            .connect(&ResourceId::new("post-1"), None)
            .await
            .err()
            .unwrap();

        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::NotEventStream)
        );
    }
}
