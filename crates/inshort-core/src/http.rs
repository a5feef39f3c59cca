//! Blocking JSON-over-HTTP client
//!
//! Async reqwest driven by a private current-thread tokio runtime, exposed
//! as a sync interface for the single-worker pipeline.

use std::time::Duration;

/// Connection and request settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("inshort/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Failure of a single remote fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure (`status: None`) or non-success status
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Response arrived but was not the JSON we expected
    Malformed(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Malformed(message) => write!(f, "malformed response: {message}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Build from a reqwest error with the URL stripped.
    ///
    /// The credential travels in the query string, so URLs never reach logs.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.without_url().to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            Self::Malformed(_) => None,
        }
    }

    /// Transport errors, 429, 5xx and malformed bodies are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(s), ..
            } => *s == 429 || (500..=599).contains(s),
            Self::Malformed(_) => true,
        }
    }
}

/// HTTP client owning its runtime. One per pipeline.
pub struct HttpClient {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> std::io::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(2)
            .build()
            .map_err(std::io::Error::other)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { client, runtime })
    }

    /// GET `url` with `query` parameters and parse the body as JSON.
    pub fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, FetchError> {
        let body = self.get_text(url, query)?;
        serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    pub fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        self.runtime.block_on(async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(FetchError::from_reqwest)?;
            response.text().await.map_err(FetchError::from_reqwest)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one canned response on a random local port; returns the base URL.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn retryable_classification() {
        let http = |status| FetchError::Http {
            status,
            message: String::new(),
        };
        assert!(http(None).is_retryable());
        assert!(http(Some(429)).is_retryable());
        assert!(http(Some(503)).is_retryable());
        assert!(!http(Some(404)).is_retryable());
        assert!(!http(Some(403)).is_retryable());
        assert!(FetchError::Malformed("eof".into()).is_retryable());
    }

    #[test]
    fn display_includes_status() {
        let e = FetchError::Http {
            status: Some(503),
            message: "busy".into(),
        };
        assert_eq!(e.to_string(), "HTTP 503: busy");
        assert_eq!(e.status(), Some(503));
    }

    #[test]
    fn parses_json_body() {
        let base = serve_once("200 OK", r#"{"bills": [{"number": "1"}]}"#);
        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let value = client.get_json(&format!("{base}/bill/119"), &[]).unwrap();
        assert_eq!(value["bills"][0]["number"], "1");
    }

    #[test]
    fn error_status_hides_credential() {
        let base = serve_once("503 Service Unavailable", "{}");
        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let err = client
            .get_json(&format!("{base}/bill/119"), &[("api_key", "SECRET".into())])
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("SECRET"));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let base = serve_once("200 OK", "<html>rate limited</html>");
        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let err = client.get_json(&base, &[]).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }
}
