//! Minimal JSON-over-HTTP/1 client.
//!
//! Each call opens a fresh connection, performs one request and closes.
//! Calls against the builder and runner are infrequent, so there is no
//! connection pool.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Uri};
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};

const USER_AGENT: &str = "hubdeploy-remote/0.1";

/// A JSON client bound to one service base URL.
#[derive(Debug, Clone)]
pub struct JsonClient {
    base: String,
    authority: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl JsonClient {
    /// `base` is an `http://host:port` URL, optionally with a path prefix.
    pub fn new(base: &str, api_key: Option<String>, timeout: Duration) -> RemoteResult<Self> {
        let base = base.trim_end_matches('/').to_string();
        let uri: Uri = base
            .parse()
            .map_err(|_| RemoteError::InvalidEndpoint(base.clone()))?;
        if uri.scheme_str() != Some("http") {
            return Err(RemoteError::InvalidEndpoint(base));
        }
        let authority = uri
            .authority()
            .map(|a| a.to_string())
            .ok_or_else(|| RemoteError::InvalidEndpoint(base.clone()))?;
        Ok(Self {
            base,
            authority,
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        let url = self.url(path);
        let body = self.send(Method::GET, &url, None).await?;
        decode(&url, &body)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> RemoteResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let payload = serde_json::to_vec(body).map_err(|e| RemoteError::Encode(e.to_string()))?;
        let resp = self.send(Method::POST, &url, Some(payload)).await?;
        decode(&url, &resp)
    }

    /// POST and ignore the response body.
    pub async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteResult<()> {
        let url = self.url(path);
        let payload = serde_json::to_vec(body).map_err(|e| RemoteError::Encode(e.to_string()))?;
        self.send(Method::POST, &url, Some(payload)).await?;
        Ok(())
    }

    pub async fn delete_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteResult<()> {
        let url = self.url(path);
        let payload = serde_json::to_vec(body).map_err(|e| RemoteError::Encode(e.to_string()))?;
        self.send(Method::DELETE, &url, Some(payload)).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn send(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> RemoteResult<Bytes> {
        match tokio::time::timeout(self.timeout, self.exchange(method, url, body)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(url.to_string())),
        }
    }

    async fn exchange(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> RemoteResult<Bytes> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| RemoteError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| transport(url, e))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(url)
            .header(http::header::HOST, &self.authority)
            .header(http::header::USER_AGENT, USER_AGENT);
        if body.is_some() {
            builder = builder.header(http::header::CONTENT_TYPE, "application/json");
        }
        if let Some(key) = &self.api_key {
            builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| transport(url, e))?;

        let resp = sender.send_request(req).await.map_err(|e| transport(url, e))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| transport(url, e))?
            .to_bytes();

        debug!(%method, %url, status = status.as_u16(), "remote call");
        if !status.is_success() {
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

fn transport(url: &str, e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> RemoteResult<T> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
