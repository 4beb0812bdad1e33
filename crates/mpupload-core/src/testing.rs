//! In-memory S3 endpoint for tests.
//!
//! [`MockS3`] checks every request the way a real endpoint would: the payload
//! hash must match the body and the `Authorization` value must match a
//! signature recomputed from the received request. It stores part bytes,
//! validates the completion document against the stored ETags, and assembles
//! the final object. [`Fault`]s inject the failure modes the uploader has to
//! survive.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use mpupload_auth::{
    Credentials, RequestDescriptor, SIGNED_HEADERS, SigningContext, hash_payload,
    parse_authorization_header, sign,
};
use mpupload_xml::{
    CompleteMultipartUploadResult, CompletedMultipartUpload, CompletedPart,
    InitiateMultipartUploadResult, from_xml_expecting, to_xml,
};
use parking_lot::Mutex;
use reqwest::Url;

use crate::client::S3Client;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::{S3Request, S3Response, S3Transport};

pub(crate) const TEST_ACCESS_KEY: &str = "user_2mYvWbNbRzDeMoKeY";
pub(crate) const TEST_SECRET_KEY: &str = "rps_TESTSECRETKEY0123456789";
pub(crate) const TEST_REGION: &str = "EU-RO-1";

/// A failure the mock endpoint injects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Initiate answers `200` without an `<UploadId>`.
    InitiateWithoutUploadId,
    /// Initiate answers `403 AccessDenied`.
    RejectInitiate,
    /// The part is stored but its response is lost, `times` times.
    DropPartResponse { part_number: u32, times: u32 },
    /// Every upload of the part fails before reaching the server.
    PartUnreachable(u32),
    /// The part is acknowledged without an `ETag` header.
    PartWithoutEtag(u32),
    /// Complete answers `200` with an `<Error>` document.
    CompleteWithoutResult,
    /// Abort answers `500`.
    RejectAbort,
    /// The call fails before reaching the server, `times` times.
    Unreachable { call: Call, times: u32 },
}

/// Which multipart call a request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Call {
    Initiate,
    UploadPart(u32),
    Complete,
    Abort,
    Other,
}

/// One request as the mock received it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub call: Call,
    pub method: Method,
    pub url: String,
    pub path: String,
    pub query: String,
    pub host: String,
    pub payload_hash: String,
    pub content_type: Option<String>,
    pub part_number: Option<u32>,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct MockState {
    next_upload: u32,
    etag_seq: u64,
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<String, Vec<u8>>,
    calls: Vec<RecordedCall>,
    dropped: HashMap<u32, u32>,
    unreachable: HashMap<Call, u32>,
    stored: Vec<u32>,
    completions: Vec<Vec<CompletedPart>>,
    aborts: usize,
}

#[derive(Debug)]
pub(crate) struct MockS3 {
    credentials: Credentials,
    region: String,
    faults: Vec<Fault>,
    part_delay: Duration,
    slow_parts: HashMap<u32, Duration>,
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockS3 {
    pub(crate) fn new() -> Self {
        Self {
            credentials: Credentials::new(TEST_ACCESS_KEY, TEST_SECRET_KEY)
                .expect("test credentials are non-empty"),
            region: TEST_REGION.to_owned(),
            faults: Vec::new(),
            part_delay: Duration::ZERO,
            slow_parts: HashMap::new(),
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Hold every part upload for `delay` so that concurrent uploads overlap.
    pub(crate) fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = delay;
        self
    }

    /// Hold uploads of one part for `delay`, overriding the shared part delay.
    pub(crate) fn with_slow_part(mut self, part_number: u32, delay: Duration) -> Self {
        self.slow_parts.insert(part_number, delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn part_calls(&self, part_number: u32) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.part_number == Some(part_number))
            .count()
    }

    pub(crate) fn call_count(&self, call: Call) -> usize {
        self.state.lock().calls.iter().filter(|c| c.call == call).count()
    }

    /// Part numbers in the order their bytes were stored.
    pub(crate) fn stored_parts(&self) -> Vec<u32> {
        self.state.lock().stored.clone()
    }

    pub(crate) fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Part lists of every completion call that reached the mock.
    pub(crate) fn completions(&self) -> Vec<Vec<CompletedPart>> {
        self.state.lock().completions.clone()
    }

    pub(crate) fn abort_count(&self) -> usize {
        self.state.lock().aborts
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    fn has_fault(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    fn drop_budget(&self, part_number: u32) -> u32 {
        self.faults
            .iter()
            .find_map(|f| match f {
                Fault::DropPartResponse {
                    part_number: n,
                    times,
                } if *n == part_number => Some(*times),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Consume one injected connection failure for `call`, if any are left.
    fn reach(&self, call: Call) -> Result<(), UploadError> {
        let budget = self
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::Unreachable { call: c, times } if *c == call => Some(*times),
                _ => None,
            })
            .unwrap_or(0);

        let mut state = self.state.lock();
        let failed = state.unreachable.entry(call).or_insert(0);
        if *failed < budget {
            *failed += 1;
            return Err(UploadError::Transport(format!(
                "connection timed out during {call:?}"
            )));
        }
        Ok(())
    }

    fn verify_signature(&self, request: &S3Request, url: &Url) -> Result<(), S3Response> {
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned()
        };

        let payload_hash = header("x-amz-content-sha256");
        if payload_hash != hash_payload(&request.body) {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "XAmzContentSHA256Mismatch",
                "The provided 'x-amz-content-sha256' header does not match what was computed.",
            ));
        }

        let Ok(timestamp) = NaiveDateTime::parse_from_str(&header("x-amz-date"), "%Y%m%dT%H%M%SZ")
        else {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "AccessDenied",
                "X-Amz-Date is missing or malformed",
            ));
        };
        let timestamp = timestamp.and_utc();

        let Ok(claimed) = parse_authorization_header(&header("authorization")) else {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "AccessDenied",
                "Authorization header is missing or malformed",
            ));
        };
        if claimed.access_key_id != self.credentials.access_key_id() {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "InvalidAccessKeyId",
                "The AWS Access Key Id you provided does not exist in our records.",
            ));
        }
        let expected_scope = SigningContext::new(&timestamp, &self.region).credential_scope();
        if claimed.credential_scope() != expected_scope {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "AuthorizationHeaderMalformed",
                "The credential scope does not match the request date and region.",
            ));
        }
        if claimed.signed_headers.join(";") != SIGNED_HEADERS {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "AccessDenied",
                "SignedHeaders must cover host, x-amz-content-sha256 and x-amz-date",
            ));
        }

        let host = header("host");
        let descriptor = RequestDescriptor {
            method: request.method.as_str(),
            uri: url.path(),
            query: url.query().unwrap_or_default(),
            host: &host,
            payload_hash: &payload_hash,
            timestamp,
        };
        let recomputed = sign(&descriptor, &self.credentials, &self.region)
            .and_then(|value| parse_authorization_header(&value))
            .expect("mock signs with valid settings");

        if claimed.signature != recomputed.signature {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "SignatureDoesNotMatch",
                "The request signature we calculated does not match the signature you provided.",
            ));
        }
        Ok(())
    }

    fn initiate(&self, key: &str) -> S3Response {
        if self.has_fault(&Fault::RejectInitiate) {
            return error_response(StatusCode::FORBIDDEN, "AccessDenied", "Access Denied");
        }

        let upload_id = if self.has_fault(&Fault::InitiateWithoutUploadId) {
            None
        } else {
            let mut state = self.state.lock();
            state.next_upload += 1;
            // '+', '=' and '/' must survive query encoding.
            let id = format!("2~VXBsb2Fk+SUQ=/{}", state.next_upload);
            state.uploads.insert(
                id.clone(),
                PendingUpload {
                    key: key.to_owned(),
                    ..PendingUpload::default()
                },
            );
            Some(id)
        };

        let result = InitiateMultipartUploadResult {
            bucket: Some("bucket".to_owned()),
            key: Some(key.to_owned()),
            upload_id,
        };
        xml_response(
            StatusCode::OK,
            to_xml("InitiateMultipartUploadResult", &result).expect("serializable"),
        )
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<S3Response, UploadError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = self
            .slow_parts
            .get(&part_number)
            .copied()
            .unwrap_or(self.part_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.store_part(upload_id, part_number, body);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn store_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<S3Response, UploadError> {
        if self.has_fault(&Fault::PartUnreachable(part_number)) {
            return Err(UploadError::Transport(format!(
                "connection reset while sending part {part_number}"
            )));
        }

        let mut state = self.state.lock();
        state.etag_seq += 1;
        let etag = format!("\"{}-{}\"", &hash_payload(&body)[..32], state.etag_seq);

        let Some(upload) = state.uploads.get_mut(upload_id) else {
            return Ok(error_response(
                StatusCode::NOT_FOUND,
                "NoSuchUpload",
                "The specified upload does not exist.",
            ));
        };
        upload.parts.insert(part_number, (etag.clone(), body));
        state.stored.push(part_number);

        let budget = self.drop_budget(part_number);
        let dropped = state.dropped.entry(part_number).or_insert(0);
        if *dropped < budget {
            *dropped += 1;
            return Err(UploadError::Transport(format!(
                "timed out waiting for part {part_number} response"
            )));
        }

        let mut headers = HeaderMap::new();
        if !self.has_fault(&Fault::PartWithoutEtag(part_number)) {
            headers.insert("etag", HeaderValue::from_str(&etag).expect("ascii etag"));
        }
        Ok(S3Response {
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        })
    }

    fn complete(&self, upload_id: &str, body: &[u8]) -> S3Response {
        let document: CompletedMultipartUpload =
            match from_xml_expecting("CompleteMultipartUpload", body) {
                Ok(document) => document,
                Err(e) => {
                    return error_response(StatusCode::BAD_REQUEST, "MalformedXML", &e.to_string());
                }
            };

        let mut state = self.state.lock();
        state.completions.push(document.parts.clone());

        if self.has_fault(&Fault::CompleteWithoutResult) {
            return xml_response(
                StatusCode::OK,
                b"<Error><Code>InternalError</Code><Message>We encountered an internal error. \
                  Please try again.</Message></Error>"
                    .to_vec(),
            );
        }

        let Some(upload) = state.uploads.get(upload_id) else {
            return error_response(
                StatusCode::NOT_FOUND,
                "NoSuchUpload",
                "The specified upload does not exist.",
            );
        };

        if document.parts.is_empty()
            || document
                .parts
                .windows(2)
                .any(|w| w[0].part_number >= w[1].part_number)
        {
            return error_response(
                StatusCode::BAD_REQUEST,
                "InvalidPartOrder",
                "The list of parts was not in ascending order.",
            );
        }

        let mut object = Vec::new();
        for part in &document.parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => object.extend_from_slice(bytes),
                _ => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "InvalidPart",
                        "One or more of the specified parts could not be found.",
                    );
                }
            }
        }

        let key = upload.key.clone();
        state.uploads.remove(upload_id);
        state.objects.insert(key.clone(), object);

        let result = CompleteMultipartUploadResult {
            location: Some(format!("http://s3.test.local/bucket/{key}")),
            bucket: Some("bucket".to_owned()),
            key: Some(key),
            etag: Some(format!("\"assembled-{}\"", document.parts.len())),
        };
        xml_response(
            StatusCode::OK,
            to_xml("CompleteMultipartUploadResult", &result).expect("serializable"),
        )
    }

    fn abort(&self, upload_id: &str) -> S3Response {
        if self.has_fault(&Fault::RejectAbort) {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
                "We encountered an internal error. Please try again.",
            );
        }
        let mut state = self.state.lock();
        if state.uploads.remove(upload_id).is_none() {
            return error_response(
                StatusCode::NOT_FOUND,
                "NoSuchUpload",
                "The specified upload does not exist.",
            );
        }
        state.aborts += 1;
        S3Response {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

#[async_trait]
impl S3Transport for MockS3 {
    async fn send(&self, request: S3Request) -> Result<S3Response, UploadError> {
        let url = Url::parse(&request.url).expect("client sends absolute URLs");
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let part_number = params.get("partNumber").and_then(|n| n.parse().ok());
        let call = match (&request.method, part_number) {
            (&Method::POST, _) if params.contains_key("uploads") => Call::Initiate,
            (&Method::PUT, Some(n)) => Call::UploadPart(n),
            (&Method::POST, None) => Call::Complete,
            (&Method::DELETE, None) => Call::Abort,
            _ => Call::Other,
        };

        self.state.lock().calls.push(RecordedCall {
            call,
            method: request.method.clone(),
            url: request.url.clone(),
            path: url.path().to_owned(),
            query: url.query().unwrap_or_default().to_owned(),
            host: header_string(&request.headers, "host"),
            payload_hash: header_string(&request.headers, "x-amz-content-sha256"),
            content_type: request
                .headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned),
            part_number,
        });

        if let Err(rejection) = self.verify_signature(&request, &url) {
            return Ok(rejection);
        }

        let key = url
            .path()
            .splitn(3, '/')
            .nth(2)
            .unwrap_or_default()
            .to_owned();
        let upload_id = params.get("uploadId").cloned().unwrap_or_default();

        self.reach(call)?;
        match call {
            Call::Initiate => Ok(self.initiate(&key)),
            Call::UploadPart(n) => self.upload_part(&upload_id, n, request.body).await,
            Call::Complete => Ok(self.complete(&upload_id, &request.body)),
            Call::Abort => Ok(self.abort(&upload_id)),
            Call::Other => Ok(error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "MethodNotAllowed",
                "The specified method is not allowed against this resource.",
            )),
        }
    }
}

pub(crate) fn test_config() -> UploadConfig {
    UploadConfig::builder()
        .endpoint("http://s3.test.local".into())
        .region(TEST_REGION.into())
        .content_type("audio/wav".into())
        .retry_base_delay_ms(1)
        .retry_max_delay_ms(5)
        .build()
}

pub(crate) fn test_client(mock: MockS3) -> S3Client<MockS3> {
    test_client_with(mock, &test_config())
}

/// A client signing with the credentials the mock expects, under `config`.
pub(crate) fn test_client_with(mock: MockS3, config: &UploadConfig) -> S3Client<MockS3> {
    let credentials =
        Credentials::new(TEST_ACCESS_KEY, TEST_SECRET_KEY).expect("test credentials are non-empty");
    S3Client::new(mock, credentials, config).expect("test config is valid")
}

fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

fn xml_response(status: StatusCode, body: Vec<u8>) -> S3Response {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/xml"));
    S3Response {
        status,
        headers,
        body: Bytes::from(body),
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> S3Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Error><Code>{code}</Code><Message>{message}</Message><RequestId>tx-mock</RequestId></Error>"
    );
    xml_response(status, body.into_bytes())
}
