//! AWS Signature Version 4 query-string signer
//!
//! Every request is presigned: the authorization travels in the query string
//! and carries `X-Amz-Expires`, so each signature is only valid for the
//! requested window. Payloads are sent as `UNSIGNED-PAYLOAD`; integrity of
//! uploads is covered by a signed `content-md5` header instead.
//!
//! Optimized with:
//! - Pre-computed AWS4+secret_key bytes
//! - Daily signing key cache (avoids 4 HMAC operations per request)
//! - Zero-allocation URI encoding (hex lookup table, no format!())

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest validity SigV4 accepts for a presigned request (7 days)
pub const MAX_VALIDITY_SECS: u64 = 604_800;

/// A request URL carrying its signature, plus the headers that were signed
/// and therefore must be sent unchanged
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// AWS Signature Version 4 signer
pub struct SignerV4 {
    access_key: String,
    region: String,
    service: String,
    /// Pre-computed "AWS4" + secret_key as bytes
    aws4_key: Vec<u8>,
    /// Cached signing key per day: (date_stamp, derived_key)
    cached_signing_key: Mutex<Option<(String, [u8; 32])>>,
}

impl Clone for SignerV4 {
    fn clone(&self) -> Self {
        Self {
            access_key: self.access_key.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
            aws4_key: self.aws4_key.clone(),
            // Each clone gets its own cache (populated on first use)
            cached_signing_key: Mutex::new(None),
        }
    }
}

impl SignerV4 {
    pub fn new(credentials: &Credentials, region: &str) -> Self {
        Self {
            access_key: credentials.access_key().to_string(),
            region: region.to_string(),
            service: "s3".to_string(),
            aws4_key: format!("AWS4{}", credentials.secret_key()).into_bytes(),
            cached_signing_key: Mutex::new(None),
        }
    }

    /// Presign a request valid for `validity` from now.
    ///
    /// `headers` must use lowercase names; all of them are signed.
    pub fn presign(
        &self,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        validity: Duration,
    ) -> SignedRequest {
        self.presign_at(method, url, headers, validity, Utc::now())
    }

    fn presign_at(
        &self,
        method: &str,
        url: &str,
        mut headers: BTreeMap<String, String>,
        validity: Duration,
        now: DateTime<Utc>,
    ) -> SignedRequest {
        let (host, path, query) = Self::parse_url_fast(url);
        let base_url = url.split_once('?').map_or(url, |(base, _)| base);

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let expires = validity.as_secs().clamp(1, MAX_VALIDITY_SECS);

        headers.insert("host".to_string(), host.to_string());
        let canonical_headers = self.create_canonical_headers(&headers);
        let signed_headers = self.create_signed_headers(&headers);

        let credential_scope =
            format!("{}/{}/{}/aws4_request", date_stamp, self.region, self.service);

        // Caller query plus the auth parameters; canonicalization sorts them
        let mut full_query = String::with_capacity(query.len() + 256);
        full_query.push_str(query);
        if !full_query.is_empty() {
            full_query.push('&');
        }
        full_query.push_str("X-Amz-Algorithm=");
        full_query.push_str(ALGORITHM);
        full_query.push_str("&X-Amz-Credential=");
        Self::uri_encode_into(
            &mut full_query,
            &format!("{}/{}", self.access_key, credential_scope),
            true,
        );
        let _ = write!(full_query, "&X-Amz-Date={}&X-Amz-Expires={}", amz_date, expires);
        full_query.push_str("&X-Amz-SignedHeaders=");
        Self::uri_encode_into(&mut full_query, &signed_headers, true);

        let canonical_query = self.create_canonical_query_string(&full_query);

        // Path is used as-is because it's already URI-encoded by the caller
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, UNSIGNED_PAYLOAD
        );
        tracing::trace!(%canonical_request, "sigv4 canonical request");

        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&date_stamp, &string_to_sign);

        let mut signed_url =
            String::with_capacity(base_url.len() + canonical_query.len() + 96);
        signed_url.push_str(base_url);
        signed_url.push('?');
        signed_url.push_str(&canonical_query);
        signed_url.push_str("&X-Amz-Signature=");
        signed_url.push_str(&signature);

        SignedRequest {
            url: signed_url,
            headers,
        }
    }

    /// Fast URL component extraction without heap allocation.
    ///
    /// Returns (host_with_port, path, query) as `&str` slices into the original URL.
    /// Strips default ports (:443 for https, :80 for http) from the host.
    fn parse_url_fast(url: &str) -> (&str, &str, &str) {
        let after_scheme = if let Some(rest) = url.strip_prefix("https://") {
            rest
        } else if let Some(rest) = url.strip_prefix("http://") {
            rest
        } else {
            url
        };

        let (authority, path_and_query) = match after_scheme.find('/') {
            Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
            None => (after_scheme, "/"),
        };

        let (path, query) = match path_and_query.find('?') {
            Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
            None => (path_and_query, ""),
        };

        let host = if url.starts_with("https") {
            authority.strip_suffix(":443").unwrap_or(authority)
        } else {
            authority.strip_suffix(":80").unwrap_or(authority)
        };

        (host, path, query)
    }

    /// Create canonical query string (sorted by parameter name)
    ///
    /// Fast path: if all characters are already in canonical form, parameters
    /// are sorted, and all params have `=`, returns as-is. Params without `=`
    /// (like `?uploads`) fall through to the slow path.
    fn create_canonical_query_string(&self, query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let all_canonical = query.bytes().all(|b| {
            matches!(b,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9'
                | b'-' | b'_' | b'.' | b'~'
                | b'=' | b'&' | b'%'
            )
        });

        if all_canonical {
            let mut sorted = true;
            let mut all_have_equals = true;
            let mut last_key: &str = "";
            for pair in query.split('&') {
                let key = match pair.find('=') {
                    Some(pos) => &pair[..pos],
                    None => {
                        all_have_equals = false;
                        pair
                    }
                };
                if key < last_key {
                    sorted = false;
                    break;
                }
                last_key = key;
            }
            if sorted && all_have_equals {
                return query.to_string();
            }
        }

        // Slow path: decode, re-encode, sort
        let mut params: Vec<(String, String)> = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            params.push((
                Self::uri_encode(&decoded_key, true),
                Self::uri_encode(&decoded_value, true),
            ));
        }

        params.sort_unstable();

        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Create canonical headers - keys are already lowercase
    fn create_canonical_headers(&self, headers: &BTreeMap<String, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 64);
        for (k, v) in headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v.trim());
            result.push('\n');
        }
        result
    }

    /// Create signed headers list - keys are already lowercase and sorted by BTreeMap
    fn create_signed_headers(&self, headers: &BTreeMap<String, String>) -> String {
        headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// Calculate the signature with daily signing key cache
    fn calculate_signature(&self, date_stamp: &str, string_to_sign: &str) -> String {
        let signing_key = {
            let mut cache = self
                .cached_signing_key
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match cache.as_ref() {
                Some((cached_date, cached_key)) if cached_date == date_stamp => *cached_key,
                _ => {
                    let key = self.derive_signing_key(date_stamp);
                    *cache = Some((date_stamp.to_string(), key));
                    key
                }
            }
        };

        hex::encode(Self::hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// Derive signing key from date stamp (4 chained HMAC operations)
    fn derive_signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let k_date = Self::hmac_sha256(&self.aws4_key, date_stamp.as_bytes());
        let k_region = Self::hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = Self::hmac_sha256(&k_region, self.service.as_bytes());
        Self::hmac_sha256(&k_service, b"aws4_request")
    }

    /// HMAC-SHA256 returning fixed-size array
    fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);
        mac.finalize().into_bytes().into()
    }

    /// URI encode a string (RFC 3986) using hex lookup table
    fn uri_encode(s: &str, encode_slash: bool) -> String {
        let mut result = String::with_capacity(s.len() + 16);
        Self::uri_encode_into(&mut result, s, encode_slash);
        result
    }

    fn uri_encode_into(buf: &mut String, s: &str, encode_slash: bool) {
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    buf.push(byte as char);
                }
                b'/' if !encode_slash => {
                    buf.push('/');
                }
                _ => {
                    buf.push('%');
                    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
    }
}
