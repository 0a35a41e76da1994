//! HTTP transport for S3-compatible providers
//!
//! Optimized with:
//! - HTTP/1.1 with a tuned connection pool and TCP_NODELAY
//! - native-tls (OpenSSL) for TLS
//! - Zero-copy Bytes for uploads, chunked streaming for downloads
//! - Presigned query auth with UNSIGNED-PAYLOAD (no SHA256 of the body)
//! - Automatic retry with jitter for 429/503 responses and connection errors

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Write as FmtWrite;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::signer::SignerV4;
use super::{backoff_delay, xml, Transport};
use crate::config::{ClientConfig, Credentials};
use crate::error::{Result, StorageError};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::types::{
    BucketInfo, CompletedPart, ListObjectsOptions, ListObjectsPage, ObjectMetadata,
};

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Size of the frames an upload body is split into; progress is reported per frame
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Largest page ListObjectsV2 returns
const MAX_KEYS: u32 = 1000;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

type RequestBody = UnsyncBoxBody<Bytes, Infallible>;

fn empty_body() -> RequestBody {
    Full::new(Bytes::new()).boxed_unsync()
}

fn full_body(data: Bytes) -> RequestBody {
    Full::new(data).boxed_unsync()
}

/// Split `data` into frames and report each one to `tracker` as it is handed
/// to the connection. A replayed body re-reports from zero; the tracker drops
/// those values.
fn tracked_body(data: Bytes, tracker: Arc<ProgressTracker>) -> RequestBody {
    let len = data.len();
    let frames = (0..len).step_by(UPLOAD_CHUNK_SIZE).map(move |start| {
        let end = (start + UPLOAD_CHUNK_SIZE).min(len);
        tracker.report(end as u64);
        Ok::<_, Infallible>(Frame::data(data.slice(start..end)))
    });
    StreamBody::new(stream::iter(frames)).boxed_unsync()
}

fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn etag(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "etag").map(|s| s.trim_matches('"').to_string())
}

/// Turn a non-success response into a classified error
fn provider_error(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> StorageError {
    let request_id =
        header_str(headers, "x-amz-request-id").or_else(|| header_str(headers, "x-cos-request-id"));

    if let Some(err) = xml::parse_error_response(body) {
        return StorageError::from_provider(
            status.as_u16(),
            err.code,
            err.message,
            err.request_id.or(request_id),
        );
    }

    // HEAD responses and some proxies carry no error document
    let code = match status {
        StatusCode::BAD_REQUEST => "InvalidRequest".to_string(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "AccessDenied".to_string(),
        StatusCode::NOT_FOUND => "NotFound".to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("UnknownError")
            .replace(' ', ""),
    };
    StorageError::from_provider(
        status.as_u16(),
        code,
        String::from_utf8_lossy(body).into_owned(),
        request_id,
    )
}

/// S3 REST transport over hyper
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct HttpTransport {
    /// Hyper HTTP client with tuned connection pool
    client: HyperClient<HttpsConnector<HttpConnector>, RequestBody>,
    /// AWS SigV4 signer (with signing key cache)
    signer: SignerV4,
    /// Endpoint URL without trailing slash
    endpoint: String,
    region: String,
    /// Deadline for each response, and for each body chunk while downloading
    read_timeout: Duration,
    /// Retries after the first attempt on throttling or connection failure
    max_retries: u32,
}

impl HttpTransport {
    /// Create a transport for `config`.
    ///
    /// Set `STOWAGE_INSECURE_TLS=true` to skip certificate verification
    /// against self-signed test endpoints.
    pub fn new(config: &ClientConfig, credentials: &Credentials) -> Result<Self> {
        let insecure_tls = std::env::var("STOWAGE_INSECURE_TLS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout()));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        };
        let tls = tls.map_err(|e| {
            StorageError::Transport(format!("failed to build TLS connector: {}", e))
        })?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(64)
            .retry_canceled_requests(true)
            .set_host(true)
            .build(https);

        Ok(Self {
            client,
            signer: SignerV4::new(credentials, config.region()),
            endpoint: config.endpoint().to_string(),
            region: config.region().to_string(),
            read_timeout: config.read_timeout(),
            max_retries: config.max_retries(),
        })
    }

    /// Encode an object key, preserving forward slashes.
    /// Returns Cow::Borrowed when no encoding is needed.
    fn encode_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });

        if !needs_encoding {
            return Cow::Borrowed(key);
        }

        let mut result = String::with_capacity(key.len() + 32);
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                    result.push(byte as char);
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        Cow::Owned(result)
    }

    /// Encode a query parameter value (RFC 3986) into the target buffer
    fn url_encode_into(buf: &mut String, s: &str) {
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    buf.push(byte as char);
                }
                _ => {
                    buf.push('%');
                    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        let mut url = String::with_capacity(self.endpoint.len() + 1 + bucket.len());
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(bucket);
        url
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        let encoded_key = Self::encode_key(key);
        let mut url = String::with_capacity(
            self.endpoint.len() + 2 + bucket.len() + encoded_key.len(),
        );
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(bucket);
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    fn upload_url(&self, bucket: &str, key: &str, upload_id: &str, part_number: Option<u32>) -> String {
        let mut url = self.object_url(bucket, key);
        url.push('?');
        if let Some(part_number) = part_number {
            let _ = write!(url, "partNumber={}&", part_number);
        }
        url.push_str("uploadId=");
        Self::url_encode_into(&mut url, upload_id);
        url
    }

    fn list_buckets_url(&self, token: Option<&str>) -> String {
        let mut url = format!("{}/", self.endpoint);
        if let Some(token) = token {
            url.push_str("?continuation-token=");
            Self::url_encode_into(&mut url, token);
        }
        url
    }

    /// Build the URL of a ListObjectsV2 request.
    ///
    /// Parameters are ordered alphabetically so the signer's canonical query
    /// fast path can skip re-sorting.
    fn list_url(&self, bucket: &str, options: &ListObjectsOptions) -> String {
        let mut url = self.bucket_url(bucket);
        url.push_str("/?");

        if let Some(ref token) = options.continuation_token {
            url.push_str("continuation-token=");
            Self::url_encode_into(&mut url, token);
            url.push('&');
        }
        if let Some(ref delimiter) = options.delimiter {
            url.push_str("delimiter=");
            Self::url_encode_into(&mut url, delimiter);
            url.push('&');
        }
        let max_keys = options.max_keys.unwrap_or(MAX_KEYS).clamp(1, MAX_KEYS);
        let _ = write!(url, "list-type=2&max-keys={}", max_keys);
        if let Some(ref prefix) = options.prefix {
            url.push_str("&prefix=");
            Self::url_encode_into(&mut url, prefix);
        }
        url
    }

    fn timed_out(&self) -> StorageError {
        StorageError::Transport(format!("no response within {:?}", self.read_timeout))
    }

    /// Send a presigned request, retrying on 429/503 and connection failures.
    ///
    /// The request is re-signed and its body rebuilt on each attempt. The
    /// returned response may carry any status; its body is not read.
    async fn send<F>(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        validity: Duration,
        make_body: F,
    ) -> Result<Response<Incoming>>
    where
        F: Fn() -> RequestBody,
    {
        let mut attempt = 0u32;
        loop {
            // Re-sign on each attempt (timestamp changes)
            let signed = self.signer.presign(method.as_str(), url, headers.clone(), validity);

            let mut req = Request::builder().method(method.clone()).uri(&signed.url);
            for (key, value) in signed.headers.iter() {
                req = req.header(key, value);
            }
            let request = req.body(make_body()).map_err(|e| {
                StorageError::client("InvalidRequest", format!("request build error: {}", e))
            })?;

            debug!(method = %method, url = %url, attempt, "sending request");

            let reason = match tokio::time::timeout(self.read_timeout, self.client.request(request)).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    let throttled = status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE;
                    if !throttled || attempt >= self.max_retries {
                        return Ok(response);
                    }
                    // Drain body to return connection to pool, then retry
                    let _ = response.collect().await;
                    format!("status {}", status)
                }
                Ok(Err(e)) => {
                    if attempt >= self.max_retries {
                        return Err(StorageError::Transport(format!("request failed: {}", e)));
                    }
                    e.to_string()
                }
                Err(_) => {
                    if attempt >= self.max_retries {
                        return Err(self.timed_out());
                    }
                    "timed out".to_string()
                }
            };

            let delay = backoff_delay(RETRY_BASE_DELAY, attempt);
            warn!(method = %method, url = %url, attempt, reason = %reason, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Collect a response body under the read timeout
    async fn read_body(&self, response: Response<Incoming>) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let (parts, body) = response.into_parts();
        let body = tokio::time::timeout(self.read_timeout, body.collect())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| StorageError::Transport(format!("body error: {}", e)))?
            .to_bytes();
        Ok((parts.status, parts.headers, body))
    }

    /// Send, read the whole body, and fail on a non-success status
    async fn execute<F>(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        validity: Duration,
        make_body: F,
    ) -> Result<(HeaderMap, Bytes)>
    where
        F: Fn() -> RequestBody,
    {
        let response = self.send(method, url, headers, validity, make_body).await?;
        let (status, headers, body) = self.read_body(response).await?;
        if !status.is_success() {
            return Err(provider_error(status, &headers, &body));
        }
        Ok((headers, body))
    }

    /// Stream a download body into `destination`, returning the bytes written
    async fn write_body(
        &self,
        body: Incoming,
        destination: &Path,
        tracker: &ProgressTracker,
    ) -> Result<u64> {
        let file = tokio::fs::File::create(destination).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(256 * 1024, file);
        let mut body = BodyStream::new(body);
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.read_timeout, body.next())
                .await
                .map_err(|_| self.timed_out())?;
            let Some(frame) = next else { break };
            let frame = frame.map_err(|e| StorageError::Transport(format!("body error: {}", e)))?;
            if let Some(chunk) = frame.data_ref() {
                writer.write_all(chunk).await?;
                written += chunk.len() as u64;
                tracker.report(written);
            }
        }

        writer.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_bucket(&self, bucket: &str, validity: Duration) -> Result<BucketInfo> {
        let url = self.bucket_url(bucket);

        // us-east-1 is the implicit location and must not be named
        let body = if self.region == "us-east-1" {
            Bytes::new()
        } else {
            Bytes::from(xml::create_bucket_body(&self.region))
        };
        let mut headers = BTreeMap::new();
        if !body.is_empty() {
            headers.insert("content-type".to_string(), "application/xml".to_string());
        }

        let (resp_headers, _) = self
            .execute(Method::PUT, &url, headers, validity, || full_body(body.clone()))
            .await?;

        let mut info = BucketInfo::new(bucket.to_string());
        info.location = header_str(&resp_headers, "location").or_else(|| Some(format!("/{}", bucket)));
        Ok(info)
    }

    async fn list_buckets(&self, validity: Duration) -> Result<Vec<BucketInfo>> {
        let mut buckets = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let url = self.list_buckets_url(token.as_deref());
            let (_, body) = self
                .execute(Method::GET, &url, BTreeMap::new(), validity, empty_body)
                .await?;
            let page = xml::parse_list_buckets(&body)?;
            buckets.extend(page.buckets);

            match page.continuation_token {
                // A provider echoing the same token would never finish
                Some(next) if token.as_deref() != Some(next.as_str()) => {
                    debug!("Following ListBuckets continuation token");
                    token = Some(next);
                }
                _ => break,
            }
        }

        Ok(buckets)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        validity: Duration,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<ObjectMetadata> {
        let url = self.object_url(bucket, key);
        let size = data.len() as u64;

        let mut headers = BTreeMap::new();
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        headers.insert("content-md5".to_string(), content_md5(&data));
        headers.insert("content-length".to_string(), data.len().to_string());

        let tracker = Arc::new(ProgressTracker::new(progress, size));
        let (resp_headers, _) = self
            .execute(Method::PUT, &url, headers, validity, || {
                tracked_body(data.clone(), tracker.clone())
            })
            .await?;
        tracker.finish(size);

        let mut object = ObjectMetadata::new(bucket.to_string(), key.to_string(), size);
        object.etag = etag(&resp_headers);
        object.content_type = content_type.map(str::to_string);
        Ok(object)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        validity: Duration,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<ObjectMetadata> {
        let url = self.object_url(bucket, key);
        let response = self
            .send(Method::GET, &url, BTreeMap::new(), validity, empty_body)
            .await?;

        if !response.status().is_success() {
            let (status, headers, body) = self.read_body(response).await?;
            return Err(provider_error(status, &headers, &body));
        }

        let headers = response.headers().clone();
        let total = header_str(&headers, "content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let tracker = ProgressTracker::new(progress, total);

        let written = match self.write_body(response.into_body(), destination, &tracker).await {
            Ok(written) => written,
            Err(e) => {
                // Never leave a truncated file behind
                let _ = tokio::fs::remove_file(destination).await;
                return Err(e);
            }
        };
        tracker.finish(written);

        let mut object = ObjectMetadata::new(bucket.to_string(), key.to_string(), written);
        object.etag = etag(&headers);
        object.content_type = header_str(&headers, "content-type");
        Ok(object)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        validity: Duration,
    ) -> Result<ListObjectsPage> {
        let url = self.list_url(bucket, options);
        let (_, body) = self
            .execute(Method::GET, &url, BTreeMap::new(), validity, empty_body)
            .await?;

        let mut page = xml::parse_list_objects(bucket, &body)?;
        if page.prefix.is_none() {
            page.prefix = options.prefix.clone();
        }
        Ok(page)
    }

    async fn delete_object(&self, bucket: &str, key: &str, validity: Duration) -> Result<()> {
        let url = self.object_url(bucket, key);
        self.execute(Method::DELETE, &url, BTreeMap::new(), validity, empty_body)
            .await?;
        Ok(())
    }

    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        validity: Duration,
    ) -> Result<String> {
        let url = format!("{}?uploads", self.object_url(bucket, key));

        let mut headers = BTreeMap::new();
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type.to_string());
        }

        let (_, body) = self
            .execute(Method::POST, &url, headers, validity, empty_body)
            .await?;
        xml::parse_initiate_multipart(&body)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        validity: Duration,
    ) -> Result<String> {
        let url = self.upload_url(bucket, key, upload_id, Some(part_number));

        let mut headers = BTreeMap::new();
        headers.insert("content-md5".to_string(), content_md5(&data));
        headers.insert("content-length".to_string(), data.len().to_string());

        let (resp_headers, _) = self
            .execute(Method::PUT, &url, headers, validity, || full_body(data.clone()))
            .await?;

        etag(&resp_headers).ok_or_else(|| {
            StorageError::Transport(format!("part {} response carried no ETag", part_number))
        })
    }

    /// The returned size is 0; the caller knows how many bytes it uploaded.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        validity: Duration,
    ) -> Result<ObjectMetadata> {
        let url = self.upload_url(bucket, key, upload_id, None);
        let body = Bytes::from(xml::complete_multipart_body(parts));

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-md5".to_string(), content_md5(&body));

        let response = self
            .send(Method::POST, &url, headers, validity, || full_body(body.clone()))
            .await?;
        let (status, resp_headers, resp_body) = self.read_body(response).await?;

        // Completion can fail after a 200 status; the error is then in the body
        if !status.is_success() || xml::parse_error_response(&resp_body).is_some() {
            let status = if status.is_success() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                status
            };
            return Err(provider_error(status, &resp_headers, &resp_body));
        }

        let done = xml::parse_complete_multipart(&resp_body)?;
        let mut object = ObjectMetadata::new(bucket.to_string(), key.to_string(), 0);
        object.etag = done.etag;
        object.location = done.location;
        Ok(object)
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        validity: Duration,
    ) -> Result<()> {
        let url = self.upload_url(bucket, key, upload_id, None);
        self.execute(Method::DELETE, &url, BTreeMap::new(), validity, empty_body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::error::FaultKind;

    fn transport() -> HttpTransport {
        let mut settings = ClientSettings::new("125", "ap-guangzhou", "access", "secret");
        settings.endpoint = Some("http://127.0.0.1:9000/".to_string());
        let (config, credentials) = settings.build().unwrap();
        HttpTransport::new(&config, &credentials).unwrap()
    }

    #[test]
    fn test_encode_key_no_encoding() {
        let result = HttpTransport::encode_key("path/to/file.txt");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "path/to/file.txt");
    }

    #[test]
    fn test_encode_key_with_encoding() {
        let result = HttpTransport::encode_key("path/to/file with spaces.txt");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "path/to/file%20with%20spaces.txt");
    }

    #[test]
    fn test_urls() {
        let transport = transport();
        assert_eq!(
            transport.object_url("media-125", "a b.txt"),
            "http://127.0.0.1:9000/media-125/a%20b.txt"
        );
        assert_eq!(
            transport.upload_url("media-125", "k", "id/1", Some(3)),
            "http://127.0.0.1:9000/media-125/k?partNumber=3&uploadId=id%2F1"
        );
        assert_eq!(
            transport.upload_url("media-125", "k", "id", None),
            "http://127.0.0.1:9000/media-125/k?uploadId=id"
        );
    }

    #[test]
    fn test_list_url_is_sorted() {
        let transport = transport();
        let options = ListObjectsOptions::default()
            .with_prefix("photos/")
            .with_max_keys(5000)
            .with_continuation_token("t=1");
        assert_eq!(
            transport.list_url("media-125", &options),
            "http://127.0.0.1:9000/media-125/?continuation-token=t%3D1&list-type=2&max-keys=1000&prefix=photos%2F"
        );
    }

    #[test]
    fn test_list_buckets_url() {
        let transport = transport();
        assert_eq!(transport.list_buckets_url(None), "http://127.0.0.1:9000/");
        assert_eq!(
            transport.list_buckets_url(Some("b-125/x")),
            "http://127.0.0.1:9000/?continuation-token=b-125%2Fx"
        );
    }

    #[test]
    fn test_provider_error_classification() {
        let headers = HeaderMap::new();
        let body = b"<Error><Code>NoSuchBucket</Code><Message>missing</Message><RequestId>r1</RequestId></Error>";
        let err = provider_error(StatusCode::NOT_FOUND, &headers, body);
        assert_eq!(err.kind(), FaultKind::Server);
        assert_eq!(err.code(), "NoSuchBucket");
        assert_eq!(err.request_id(), Some("r1"));

        let err = provider_error(StatusCode::FORBIDDEN, &headers, b"");
        assert_eq!(err.kind(), FaultKind::Client);
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_content_md5() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[tokio::test]
    async fn test_tracked_body_reports_frames() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |p: crate::progress::Progress| sink.lock().unwrap().push(p.transferred));
        let total = UPLOAD_CHUNK_SIZE * 2 + 10;
        let tracker = Arc::new(ProgressTracker::new(observer, total as u64));

        let body = tracked_body(Bytes::from(vec![7u8; total]), tracker);
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.len(), total);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                UPLOAD_CHUNK_SIZE as u64,
                (UPLOAD_CHUNK_SIZE * 2) as u64,
                total as u64
            ]
        );
    }
}
