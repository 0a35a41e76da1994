//! S3 XML bodies: response parsers and request builders
//!
//! Parsers use byte-slice tag matching and `std::mem::take` so no String is
//! allocated per tag.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

use crate::error::{Result, StorageError};
use crate::types::{BucketInfo, CompletedPart, ListObjectsPage, ObjectInfo};

/// Error document returned by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

/// One page of a ListAllMyBuckets response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketListPage {
    pub buckets: Vec<BucketInfo>,
    /// Present when more buckets follow
    pub continuation_token: Option<String>,
}

/// Body of a CompleteMultipartUpload response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteResponse {
    pub location: Option<String>,
    pub etag: Option<String>,
}

fn reader(xml_data: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;
    reader
}

fn parse_error(err: impl std::fmt::Display) -> StorageError {
    StorageError::Transport(format!("invalid XML response: {}", err))
}

/// Parse a ListAllMyBuckets response
pub fn parse_list_buckets(xml_data: &[u8]) -> Result<BucketListPage> {
    let mut reader = reader(xml_data);
    let mut page = BucketListPage::default();
    let mut current: Option<BucketInfo> = None;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"Bucket" {
                    current = Some(BucketInfo::new(String::new()));
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(parse_error)?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Name" => {
                        if let Some(ref mut bucket) = current {
                            bucket.name = std::mem::take(&mut current_text);
                        }
                    }
                    b"CreationDate" => {
                        if let Some(ref mut bucket) = current {
                            bucket.creation_date = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Location" | b"BucketRegion" => {
                        if let Some(ref mut bucket) = current {
                            bucket.location = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Bucket" => {
                        if let Some(bucket) = current.take() {
                            page.buckets.push(bucket);
                        }
                    }
                    b"ContinuationToken" if !current_text.is_empty() => {
                        page.continuation_token = Some(std::mem::take(&mut current_text));
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e)),
            _ => {}
        }
    }

    Ok(page)
}

/// Parse a ListObjectsV2 response
pub fn parse_list_objects(bucket: &str, xml_data: &[u8]) -> Result<ListObjectsPage> {
    let mut reader = reader(xml_data);

    let mut page = ListObjectsPage {
        bucket: bucket.to_string(),
        ..Default::default()
    };
    let mut current_object: Option<ObjectInfo> = None;
    let mut current_text = String::with_capacity(256);
    let mut in_common_prefixes = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"Contents" => {
                    current_object = Some(ObjectInfo::new(String::new(), 0));
                }
                b"CommonPrefixes" => {
                    in_common_prefixes = true;
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(parse_error)?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut obj) = current_object {
                            obj.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"Size" => {
                        if let Some(ref mut obj) = current_object {
                            obj.size = current_text.parse().unwrap_or(0);
                        }
                    }
                    b"LastModified" => {
                        if let Some(ref mut obj) = current_object {
                            obj.last_modified = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"ETag" => {
                        if let Some(ref mut obj) = current_object {
                            obj.etag = Some(current_text.trim_matches('"').to_string());
                        }
                    }
                    b"StorageClass" => {
                        if let Some(ref mut obj) = current_object {
                            obj.storage_class = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Contents" => {
                        if let Some(obj) = current_object.take() {
                            page.objects.push(obj);
                        }
                    }
                    b"CommonPrefixes" => {
                        in_common_prefixes = false;
                    }
                    b"Prefix" => {
                        if in_common_prefixes {
                            page.common_prefixes.push(std::mem::take(&mut current_text));
                        } else if !current_text.is_empty() {
                            page.prefix = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"IsTruncated" => {
                        page.is_truncated = current_text == "true";
                    }
                    b"NextContinuationToken" => {
                        page.next_continuation_token = Some(std::mem::take(&mut current_text));
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e)),
            _ => {}
        }
    }

    Ok(page)
}

/// Extract the upload id from an InitiateMultipartUpload response
pub fn parse_initiate_multipart(xml_data: &[u8]) -> Result<String> {
    let mut reader = reader(xml_data);
    let mut upload_id = String::new();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(parse_error)?);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"UploadId" {
                    upload_id = std::mem::take(&mut current_text);
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e)),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(parse_error("missing UploadId"));
    }
    Ok(upload_id)
}

/// Parse a CompleteMultipartUpload response
pub fn parse_complete_multipart(xml_data: &[u8]) -> Result<CompleteResponse> {
    let mut reader = reader(xml_data);
    let mut response = CompleteResponse::default();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(parse_error)?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => response.location = Some(std::mem::take(&mut current_text)),
                    b"ETag" => response.etag = Some(current_text.trim_matches('"').to_string()),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e)),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse an error document. Returns `None` when the body is not one.
pub fn parse_error_response(xml_data: &[u8]) -> Option<ErrorResponse> {
    let mut reader = reader(xml_data);
    let mut response = ErrorResponse::default();
    let mut current_text = String::with_capacity(128);
    let mut seen_error = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"Error" {
                    seen_error = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => response.code = std::mem::take(&mut current_text),
                    b"Message" => response.message = std::mem::take(&mut current_text),
                    b"RequestId" => response.request_id = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    (seen_error && !response.code.is_empty()).then_some(response)
}

/// Build the CompleteMultipartUpload request body
pub fn complete_multipart_body(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 100);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>\"");
        xml_escape_into(&mut xml, part.etag.trim_matches('"'));
        xml.push_str("\"</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Build the CreateBucket request body pinning the bucket to `region`
pub fn create_bucket_body(region: &str) -> String {
    let mut xml = String::with_capacity(160);
    xml.push_str("<CreateBucketConfiguration><LocationConstraint>");
    xml_escape_into(&mut xml, region);
    xml.push_str("</LocationConstraint></CreateBucketConfiguration>");
    xml
}

/// Escape XML special characters into an existing buffer
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_objects() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>media-125</Name>
  <Prefix>photos/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token-2</NextContinuationToken>
  <Contents>
    <Key>photos/a&amp;b.jpg</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>1024</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>photos/c.jpg</Key>
    <Size>7</Size>
  </Contents>
  <CommonPrefixes><Prefix>photos/2024/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

        let page = parse_list_objects("media-125", xml).unwrap();
        assert_eq!(page.bucket, "media-125");
        assert_eq!(page.prefix.as_deref(), Some("photos/"));
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("token-2"));
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].key, "photos/a&b.jpg");
        assert_eq!(page.objects[0].etag.as_deref(), Some("abc"));
        assert_eq!(page.objects[0].size, 1024);
        assert_eq!(page.objects[1].size, 7);
        assert_eq!(page.common_prefixes, vec!["photos/2024/".to_string()]);
    }

    #[test]
    fn test_parse_list_buckets() {
        let xml = br#"<ListAllMyBucketsResult>
  <Owner><ID>125</ID></Owner>
  <Buckets>
    <Bucket><Name>media-125</Name><CreationDate>2024-01-01T00:00:00Z</CreationDate><Location>ap-guangzhou</Location></Bucket>
    <Bucket><Name>logs-125</Name></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

        let page = parse_list_buckets(xml).unwrap();
        let buckets = &page.buckets;
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].name, "media-125");
        assert_eq!(buckets[0].location.as_deref(), Some("ap-guangzhou"));
        assert_eq!(buckets[1].creation_date, None);
        assert_eq!(page.continuation_token, None);
    }

    #[test]
    fn test_parse_list_buckets_continuation() {
        let xml = br#"<ListAllMyBucketsResult>
  <Buckets>
    <Bucket><Name>a-125</Name></Bucket>
  </Buckets>
  <ContinuationToken>b-125</ContinuationToken>
</ListAllMyBucketsResult>"#;

        let page = parse_list_buckets(xml).unwrap();
        assert_eq!(page.buckets.len(), 1);
        assert_eq!(page.continuation_token.as_deref(), Some("b-125"));

        let xml = br#"<ListAllMyBucketsResult><Buckets/><ContinuationToken></ContinuationToken></ListAllMyBucketsResult>"#;
        let page = parse_list_buckets(xml).unwrap();
        assert!(page.buckets.is_empty());
        assert_eq!(page.continuation_token, None);
    }

    #[test]
    fn test_parse_multipart_responses() {
        let xml = br#"<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>k</Key><UploadId>up-1</UploadId></InitiateMultipartUploadResult>"#;
        assert_eq!(parse_initiate_multipart(xml).unwrap(), "up-1");
        assert!(parse_initiate_multipart(b"<InitiateMultipartUploadResult/>").is_err());

        let xml = br#"<CompleteMultipartUploadResult><Location>https://h/b/k</Location><ETag>"e-3"</ETag></CompleteMultipartUploadResult>"#;
        let done = parse_complete_multipart(xml).unwrap();
        assert_eq!(done.location.as_deref(), Some("https://h/b/k"));
        assert_eq!(done.etag.as_deref(), Some("e-3"));
    }

    #[test]
    fn test_parse_error_response() {
        let xml = br#"<?xml version="1.0"?><Error><Code>NoSuchKey</Code><Message>gone</Message><RequestId>req-9</RequestId></Error>"#;
        let err = parse_error_response(xml).unwrap();
        assert_eq!(err.code, "NoSuchKey");
        assert_eq!(err.message, "gone");
        assert_eq!(err.request_id.as_deref(), Some("req-9"));

        assert!(parse_error_response(b"").is_none());
        assert!(parse_error_response(b"<html>bad gateway</html>").is_none());
    }

    #[test]
    fn test_complete_body() {
        let parts = vec![
            CompletedPart::new(1, "\"a\"".to_string()),
            CompletedPart::new(2, "b".to_string()),
        ];
        assert_eq!(
            complete_multipart_body(&parts),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>\"a\"</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>\"b\"</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_create_bucket_body() {
        assert_eq!(
            create_bucket_body("ap-guangzhou"),
            "<CreateBucketConfiguration><LocationConstraint>ap-guangzhou</LocationConstraint></CreateBucketConfiguration>"
        );
    }
}
