//! WebHDFS Upload Client
//!
//! Talks to the Hadoop WebHDFS REST API through `reqwest`:
//!
//! ```text
//! PUT /webhdfs/v1/<path>?op=CREATE   ──► namenode ──307 Location──►
//! PUT <Location> (file bytes)        ──► datanode ──201──►
//! PUT /webhdfs/v1/<path>?op=MKDIRS   ──► namenode ──200 {"boolean":true}
//! ```
//!
//! Failures carry the HTTP status; a `RemoteException` body naming
//! `FileNotFoundException` marks a missing parent directory. The connection
//! pool is sized once at construction and shared by every worker.
//!
//! The datanode PUT streams the entry body chunk by chunk, so at most
//! `chunk_queue_depth` chunks of any entry are in memory at once.

use super::{EntryBody, ErrorCode, UploadClient, UploadError, UploadOptions};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, LOCATION};
use reqwest::{redirect, Body, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

const WEBHDFS_PREFIX: [&str; 2] = ["webhdfs", "v1"];

/// Connection settings for a WebHDFS namenode
#[derive(Debug, Clone)]
pub struct WebHdfsConfig {
    /// Namenode base URL, e.g. `http://namenode:9870`
    pub endpoint: String,
    /// `user.name` for simple authentication
    pub user: Option<String>,
    /// Idle connections kept per host
    pub pool_size: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RemoteExceptionBody {
    #[serde(rename = "RemoteException")]
    remote_exception: RemoteException,
}

#[derive(Debug, Deserialize)]
struct RemoteException {
    exception: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BooleanBody {
    boolean: bool,
}

pub struct WebHdfsClient {
    config: WebHdfsConfig,
    base: Url,
    /// `None` once closed
    client: RwLock<Option<Client>>,
}

impl WebHdfsClient {
    pub fn new(config: WebHdfsConfig) -> Result<Self, UploadError> {
        let base = Url::parse(&config.endpoint).map_err(|e| {
            UploadError::status(400, format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(UploadError::status(
                400,
                format!("endpoint {} cannot carry a path", config.endpoint),
            ));
        }

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(config.pool_size)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| UploadError::status(400, format!("building HTTP client: {}", e)))?;

        Ok(WebHdfsClient {
            config,
            base,
            client: RwLock::new(Some(client)),
        })
    }

    fn client(&self) -> Result<Client, UploadError> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| UploadError::transient("WebHDFS client closed"))
    }

    /// `<endpoint>/webhdfs/v1/<path>?op=<op>&user.name=..&<params>`, with
    /// every path segment and query value percent-encoded
    fn op_url(
        &self,
        path: &str,
        op: &str,
        params: &[(&str, String)],
    ) -> Result<Url, UploadError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UploadError::status(400, format!("endpoint {} cannot carry a path", self.base))
            })?
            .pop_if_empty()
            .extend(WEBHDFS_PREFIX)
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", op);
            if let Some(user) = &self.config.user {
                query.append_pair("user.name", user);
            }
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn with_headers(request: RequestBuilder, options: &UploadOptions) -> Result<RequestBuilder, UploadError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| UploadError::status(400, format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| UploadError::status(400, format!("invalid header value: {}", e)))?;
            headers.append(name, value);
        }
        Ok(request.headers(headers))
    }

    fn send_error(e: reqwest::Error) -> UploadError {
        match e.status() {
            Some(status) => UploadError::status(status.as_u16(), e.to_string()),
            None => UploadError::transient(e.to_string()),
        }
    }

    /// Turn a non-success response into an `UploadError`
    async fn response_error(response: Response) -> UploadError {
        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return UploadError::status(
                    status,
                    format!("status {} and unreadable error body: {}", status, e),
                )
            }
        };

        match serde_json::from_slice::<RemoteExceptionBody>(&body) {
            Ok(parsed) => {
                let exception = parsed.remote_exception;
                let message = format!("{}: {}", exception.exception, exception.message);
                match ErrorCode::from_name(&exception.exception) {
                    Some(code) => UploadError {
                        code: Some(code),
                        status: Some(status),
                        message,
                    },
                    None => UploadError::status(status, message),
                }
            }
            Err(_) => UploadError::status(status, String::from_utf8_lossy(&body).into_owned()),
        }
    }
}

impl UploadClient for WebHdfsClient {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        body: &'a mut EntryBody,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client()?;

            let mut params = vec![("overwrite", options.overwrite.to_string())];
            if let Some(replication) = options.replication {
                params.push(("replication", replication.to_string()));
            }
            let url = self.op_url(path, "CREATE", &params)?;

            // Step 1: namenode answers with the datanode location
            let request = Self::with_headers(client.put(url), options)?;
            let response = request.send().await.map_err(Self::send_error)?;
            if response.status() != StatusCode::TEMPORARY_REDIRECT {
                return Err(Self::response_error(response).await);
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| UploadError::status(502, "CREATE redirect without Location"))?;
            debug!(path, location = %location, "WebHDFS CREATE redirected");

            // Step 2: stream bytes to the datanode
            let (mut chunks, stream) = mpsc::channel::<std::io::Result<Bytes>>(1);
            let request = Self::with_headers(client.put(location.as_str()), options)?
                .header(CONTENT_LENGTH, body.len())
                .body(Body::wrap_stream(stream));
            let pump = async move {
                while let Some(chunk) = body.next_chunk().await {
                    let failed = chunk.is_err();
                    // Send fails once the request is gone
                    if chunks.send(chunk).await.is_err() || failed {
                        break;
                    }
                }
            };
            let (response, ()) = tokio::join!(request.send(), pump);
            let response = response.map_err(Self::send_error)?;
            if response.status() != StatusCode::CREATED {
                return Err(Self::response_error(response).await);
            }
            Ok(())
        })
    }

    fn create_dir_all<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client()?;
            let response = client
                .put(self.op_url(path, "MKDIRS", &[])?)
                .send()
                .await
                .map_err(Self::send_error)?;
            if !response.status().is_success() {
                return Err(Self::response_error(response).await);
            }

            let body = response.bytes().await.map_err(Self::send_error)?;
            match serde_json::from_slice::<BooleanBody>(&body) {
                Ok(BooleanBody { boolean: true }) => Ok(()),
                Ok(BooleanBody { boolean: false }) => {
                    Err(UploadError::status(409, format!("MKDIRS {} returned false", path)))
                }
                Err(e) => Err(UploadError::status(
                    502,
                    format!("unexpected MKDIRS response: {}", e),
                )),
            }
        })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            // Dropping the last `Client` handle tears down the pool
            self.client.write().take();
        })
    }
}
