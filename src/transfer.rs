//! Verified HTTP retrieval.
//!
//! Every request goes through one bounded redirect loop. Bodies are either
//! buffered (release metadata, checksum files) or streamed to a file while a
//! SHA-256 digest and byte count are computed over the bytes exactly as they
//! came off the wire, before any gzip decoding. A failed transfer never
//! leaves its output file behind.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use flate2::read::GzDecoder;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use crate::error::TransferError;

/// Redirects followed before a request is abandoned.
pub const MAX_REDIRECTS: usize = 5;

/// Length of a hex-encoded SHA-256 digest.
pub const CHECKSUM_HEX_LEN: usize = 64;

pub const USER_AGENT: &str = concat!("prebin/", env!("CARGO_PKG_VERSION"));

const GZIP_MEDIA_TYPES: [&str; 2] = ["application/gzip", "application/x-gzip"];

/// What a buffered response is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Json,
    Text,
}

impl ContentCategory {
    fn label(self) -> &'static str {
        match self {
            ContentCategory::Json => "json",
            ContentCategory::Text => "plain text",
        }
    }

    /// Release asset hosts serve checksum files as `application/octet-stream`,
    /// so that counts as text.
    fn accepts(self, media_type: &str) -> bool {
        match self {
            ContentCategory::Json => {
                media_type == "application/json" || media_type.ends_with("+json")
            }
            ContentCategory::Text => {
                media_type.starts_with("text/") || media_type == "application/octet-stream"
            }
        }
    }
}

/// Whether a gzip-encoded body is decoded before it reaches the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    /// Decode when the response says it is gzip.
    Auto,
    /// Write the body untouched.
    Raw,
}

/// A body streamed to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// Bytes received, before decoding.
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the received bytes, before decoding.
    pub sha256: String,
    pub decoded: bool,
}

/// A remote file together with what it must look like once downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedSource<'a> {
    pub url: &'a str,
    pub checksum_url: &'a str,
    pub size: u64,
}

/// Lowercase media type of a `Content-Type` value, parameters dropped.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_gzip_media(media_type: &str) -> bool {
    GZIP_MEDIA_TYPES.contains(&media_type)
}

fn response_media_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(media_type)
        .unwrap_or_default()
}

fn check_scheme(url: &Url) -> Result<(), TransferError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TransferError::UnsupportedScheme {
            url: url.to_string(),
            scheme: other.to_string(),
        }),
    }
}

fn parse_url(url: &str) -> Result<Url, TransferError> {
    let parsed = Url::parse(url).map_err(|err| TransferError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    check_scheme(&parsed)?;
    Ok(parsed)
}

/// Removes a partial output file. Best effort.
fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "could not remove partial download");
        }
    }
}

/// Hashes and counts everything read through it.
struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R> DigestReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, String) {
        (self.bytes, hex::encode(self.hasher.finalize()))
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

fn stream_to_file<R: Read>(body: R, dest: &Path, gzip: bool) -> io::Result<(u64, String)> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(dest)?);
    let mut reader = DigestReader::new(body);
    if gzip {
        io::copy(&mut GzDecoder::new(&mut reader), &mut writer)?;
        // bytes after the gzip member still count toward size and digest
        io::copy(&mut reader, &mut io::sink())?;
    } else {
        io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(reader.finish())
}

/// Blocking HTTP client with explicit redirect handling.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: Client,
}

impl TransferEngine {
    /// Creates an engine whose client never follows redirects on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, TransferError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(TransferError::Client)?;
        Ok(Self { client })
    }

    /// Issues a GET and follows up to [`MAX_REDIRECTS`] redirects, each one a
    /// fresh request carrying the original headers.
    ///
    /// Returns the first `200 OK` response. Responses left behind on the way
    /// are dropped, which closes their connections.
    fn open(&self, url: &str, headers: &HeaderMap) -> Result<Response, TransferError> {
        let mut current = parse_url(url)?;
        let mut hops = 0;
        loop {
            let response = self
                .client
                .get(current.clone())
                .headers(headers.clone())
                .send()
                .map_err(|source| TransferError::Network {
                    url: current.to_string(),
                    source,
                })?;
            let status = response.status();
            if status == StatusCode::OK {
                debug!(url = %current, hops, "request succeeded");
                return Ok(response);
            }
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| TransferError::MissingLocation {
                        url: current.to_string(),
                    })?;
                hops += 1;
                if hops > MAX_REDIRECTS {
                    return Err(TransferError::TooManyRedirects {
                        url: url.to_string(),
                        max: MAX_REDIRECTS,
                    });
                }
                let next = current.join(location).map_err(|err| TransferError::InvalidUrl {
                    url: location.to_string(),
                    reason: err.to_string(),
                })?;
                check_scheme(&next)?;
                debug!(from = %current, to = %next, hops, "following redirect");
                current = next;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(TransferError::NotFound {
                    url: current.to_string(),
                });
            }
            return Err(TransferError::UnexpectedStatus {
                url: current.to_string(),
                status: status.as_u16(),
            });
        }
    }

    /// Buffers a whole response body in memory.
    ///
    /// When `expect` is given, a response whose content type does not fit is
    /// rejected before its body is read.
    pub fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        expect: Option<ContentCategory>,
    ) -> Result<Vec<u8>, TransferError> {
        let response = self.open(url, headers)?;
        if let Some(category) = expect {
            let actual = response_media_type(&response);
            if !category.accepts(&actual) {
                return Err(TransferError::ContentType {
                    url: url.to_string(),
                    expected: category.label(),
                    actual,
                });
            }
        }
        let body = response.bytes().map_err(|source| TransferError::Network {
            url: url.to_string(),
            source,
        })?;
        Ok(body.to_vec())
    }

    pub fn fetch_text(&self, url: &str) -> Result<String, TransferError> {
        let body = self.fetch(url, &HeaderMap::new(), Some(ContentCategory::Text))?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Fetches a published checksum: exactly 64 hex characters.
    pub fn fetch_checksum(&self, url: &str) -> Result<String, TransferError> {
        let text = self.fetch_text(url)?;
        if text.len() != CHECKSUM_HEX_LEN {
            return Err(TransferError::ChecksumLength {
                url: url.to_string(),
                len: text.len(),
            });
        }
        if !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TransferError::MalformedChecksum {
                url: url.to_string(),
            });
        }
        Ok(text.to_ascii_lowercase())
    }

    /// Streams a response body into `dest`, creating parent directories.
    ///
    /// On any failure the partially written file is removed.
    pub fn download(
        &self,
        url: &str,
        headers: &HeaderMap,
        dest: &Path,
        decode: Decode,
    ) -> Result<Written, TransferError> {
        let response = self.open(url, headers)?;
        let gzip = decode == Decode::Auto && is_gzip_media(&response_media_type(&response));
        info!(url, dest = %dest.display(), gzip, "downloading");
        match stream_to_file(response, dest, gzip) {
            Ok((bytes, sha256)) => {
                debug!(bytes, %sha256, "download finished");
                Ok(Written {
                    bytes,
                    sha256,
                    decoded: gzip,
                })
            }
            Err(source) => {
                discard(dest);
                Err(TransferError::Io {
                    path: dest.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Downloads `source` into `dest` and trusts it only if both its size and
    /// its digest match what was published.
    ///
    /// The checksum is fetched first; the payload is never kept when either
    /// check fails.
    pub fn download_verified(
        &self,
        source: VerifiedSource<'_>,
        dest: &Path,
        decode: Decode,
    ) -> Result<Written, TransferError> {
        let expected = self.fetch_checksum(source.checksum_url)?;
        let written = self.download(source.url, &HeaderMap::new(), dest, decode)?;
        if written.bytes != source.size {
            discard(dest);
            return Err(TransferError::SizeMismatch {
                path: dest.to_path_buf(),
                expected: source.size,
                actual: written.bytes,
            });
        }
        if written.sha256 != expected {
            discard(dest);
            return Err(TransferError::ChecksumMismatch {
                path: dest.to_path_buf(),
                expected,
                actual: written.sha256,
            });
        }
        info!(dest = %dest.display(), bytes = written.bytes, "verified download");
        Ok(written)
    }
}
