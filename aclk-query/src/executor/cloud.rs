//! Cloud queries: v1 answers as escaped JSON text, v2 as a binary HTTP
//! response, gzip compressed when the request allows it.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::QueryExecutor;
use crate::encode::{accepts_gzip, encode_json_string, endpoint_name, split_query, strip_control_characters, url_decode};
use crate::error::{AclkError, Result};
use crate::host::Host;
use crate::ports::ApiResponse;
use crate::record::QueryRecord;

pub const URL_API_V1: &str = "/api/v1/";

const ZLIB_CHUNK_SIZE: usize = 16384;

/// Timings and sizes reported on the access log.
struct Access<'a> {
    id: &'a str,
    idx: Option<usize>,
    sent: usize,
    size: usize,
    created: Instant,
    ready: Instant,
    code: u16,
    query: &'a str,
}

impl QueryExecutor {
    pub(super) fn cloud_query_v1(&self, record: &QueryRecord) -> Result<()> {
        let query = record.query().unwrap_or_default();
        if !query.starts_with(URL_API_V1) {
            return Err(AclkError::UnsupportedQuery(query.to_string()));
        }

        let (path, query_string) = split_query(query);
        let ready = Instant::now();
        let (response, _) = self.execute(record, ready, endpoint_name(path), query_string, self.hosts.localhost());
        let size = response.body.len();

        let sent = self.text_message(record, &response).and_then(|message| {
            // Text messages are UTF-8 on the wire; stray bytes in the body become U+FFFD
            self.transport
                .send(record.topic(), &String::from_utf8_lossy(&message), record.msg_id())
        });

        log_access(&Access {
            id: record.msg_id().unwrap_or("-"),
            idx: record.idx(),
            sent: if sent.is_ok() { size } else { 0 },
            size,
            created: record.created_mono(),
            ready,
            code: response.code,
            query,
        });
        sent
    }

    fn text_message(&self, record: &QueryRecord, response: &ApiResponse) -> Result<Vec<u8>> {
        let body = encode_json_string(&response.body, false);
        let headers = encode_json_string(&http_headers(&response.headers, false, response.body.len()), true);

        let mut message = self.header.build("http", record.msg_id(), self.version())?.into_bytes();
        message.extend_from_slice(b",\n\t\"payload\": ");
        message.extend_from_slice(format!("{{\n\"code\": {},\n\"body\": \"", response.code).as_bytes());
        message.extend_from_slice(&body);
        message.extend_from_slice(b"\",\n\"headers\": \"");
        message.extend_from_slice(&headers);
        message.extend_from_slice(b"\"\n}\n}");
        Ok(message)
    }

    pub(super) fn cloud_query_v2(&self, record: &QueryRecord) -> Result<()> {
        let request = record
            .cloud_request()
            .ok_or_else(|| AclkError::UnsupportedQuery(record.query().unwrap_or_default().to_string()))?;
        let query = record.query().unwrap_or(request.endpoint.as_str());

        let (path, query_string) = split_query(query);
        let decoded = url_decode(query_string);
        let ready = Instant::now();
        let (response, t_exec) = self.execute(record, ready, endpoint_name(path), &decoded, &request.host);
        let size = response.body.len();

        let compress = !response.body.is_empty() && accepts_gzip(&request.data);
        let (sent_bytes, sent) = match self.binary_message(record, &response, compress, t_exec) {
            Ok((message, body_len)) => {
                debug!("Cloud query {} body {} -> {} bytes", request.id, size, body_len);
                (body_len, self.transport.send_binary(record.topic(), &message, record.msg_id()))
            }
            Err(e) => (0, Err(e)),
        };

        log_access(&Access {
            id: &request.id.to_string(),
            idx: record.idx(),
            sent: if sent.is_ok() { sent_bytes } else { 0 },
            size,
            created: record.created_mono(),
            ready,
            code: response.code,
            query,
        });
        sent
    }

    /// JSON header, blank line, HTTP header block, body. Returns the message
    /// and the body length as sent.
    fn binary_message(
        &self,
        record: &QueryRecord,
        response: &ApiResponse,
        compress: bool,
        t_exec: Duration,
    ) -> Result<(Vec<u8>, usize)> {
        let body: Cow<'_, [u8]> = if compress {
            Cow::Owned(gzip(&response.body).map_err(AclkError::Compression)?)
        } else {
            Cow::Borrowed(response.body.as_slice())
        };

        let mut message = self.header.build("http", record.msg_id(), self.version())?.into_bytes();
        message.extend_from_slice(
            format!(
                ",\"t-exec\": {},\"t-rx\": {},\"http-code\": {}",
                t_exec.as_micros(),
                record.created().timestamp_micros(),
                response.code
            )
            .as_bytes(),
        );
        message.extend_from_slice(b"}\r\n\r\n");
        message.extend_from_slice(&http_headers(&response.headers, compress, body.len()));
        message.extend_from_slice(&body);
        Ok((message, body.len()))
    }

    /// Run the internal API call and account for its timings.
    fn execute(
        &self,
        record: &QueryRecord,
        ready: Instant,
        endpoint: &str,
        query_string: &str,
        host: &Host,
    ) -> (ApiResponse, Duration) {
        self.stats
            .cloud_query_received_to_processed(micros(ready.saturating_duration_since(record.created_mono())));

        let response = self.engine.execute(host, endpoint, query_string);
        let t_exec = ready.elapsed();
        self.stats.cloud_query_db_time(micros(t_exec));
        (response, t_exec)
    }
}

/// Gzip (window 15+16, default level) in bounded input chunks.
fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    for chunk in body.chunks(ZLIB_CHUNK_SIZE) {
        encoder.write_all(chunk)?;
    }
    encoder.finish()
}

/// Response header block with encoding and length lines, blank-line terminated.
fn http_headers(headers: &[u8], gzipped: bool, content_length: usize) -> Vec<u8> {
    let mut block = headers.to_vec();
    while block.ends_with(b"\r\n\r\n") {
        block.truncate(block.len() - 2);
    }
    if !block.is_empty() && !block.ends_with(b"\r\n") {
        block.extend_from_slice(b"\r\n");
    }
    if gzipped {
        block.extend_from_slice(b"Content-Encoding: gzip\r\n");
    }
    block.extend_from_slice(format!("Content-Length: {}\r\n\r\n", content_length).as_bytes());
    block
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn log_access(access: &Access<'_>) {
    let now = Instant::now();
    let percent = if access.size == 0 {
        0.0
    } else {
        (access.sent as f64 - access.size as f64) / access.size as f64 * 100.0
    };
    let current = thread::current();
    info!(
        target: "access",
        "{}: {} '[ACLK]:{}' 'DATA' (sent/all = {}/{} bytes {:.0}%, prep/sent/total = {:.2}/{:.2}/{:.2} ms) {} '{}'",
        access.id,
        current.name().unwrap_or("-"),
        access.idx.map_or_else(|| "-".to_string(), |idx| idx.to_string()),
        access.sent,
        access.size,
        percent,
        millis(access.ready.saturating_duration_since(access.created)),
        millis(now.saturating_duration_since(access.ready)),
        millis(now.saturating_duration_since(access.created)),
        access.code,
        strip_control_characters(access.query),
    );
}
