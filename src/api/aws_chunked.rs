//! AWS chunked transfer encoding decoder with per-chunk signature checks
//!
//! When a client signs with `STREAMING-AWS4-HMAC-SHA256-PAYLOAD`, the body
//! is framed as:
//!
//! ```text
//! <hex-chunk-size>;chunk-signature=<signature>\r\n
//! <chunk-data>\r\n
//! ...
//! 0;chunk-signature=<signature>\r\n
//! \r\n
//! ```
//!
//! and each chunk's signature chains off the previous one:
//!
//! ```text
//! string-to-sign = "AWS4-HMAC-SHA256-PAYLOAD" \n timestamp \n scope \n
//!                  previous-signature \n SHA256("") \n SHA256(chunk-data)
//! ```
//!
//! [`decode_body`] wraps a raw body stream in this decoder and yields the
//! bare payload bytes, so downstream consumers never see the framing or
//! learn that signing exists. A chunk whose signature fails aborts the
//! stream before its bytes are released, which keeps tainted data out of
//! any committed object.

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of the empty string; fixed line of every chunk
/// string-to-sign.
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Chunk header lines have no business being longer than this.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Check if the request uses AWS chunked encoding
pub fn is_aws_chunked(headers: &axum::http::HeaderMap) -> bool {
    headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("STREAMING-"))
        .unwrap_or(false)
        || headers
            .get("content-encoding")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("aws-chunked"))
            .unwrap_or(false)
}

/// Get the decoded content length from headers
pub fn get_decoded_content_length(headers: &axum::http::HeaderMap) -> Option<u64> {
    headers
        .get("x-amz-decoded-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Marker error carried in the io::Error a failed chunk signature aborts
/// the stream with; the error layer maps it to SignatureDoesNotMatch.
#[derive(Debug)]
pub struct ChunkSignatureMismatch;

impl fmt::Display for ChunkSignatureMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("chunk signature does not match")
    }
}

impl std::error::Error for ChunkSignatureMismatch {}

/// Signature state carried across chunks, seeded by the verified request
/// signature from the Authorization header.
#[derive(Debug, Clone)]
pub struct ChunkVerifier {
    signing_key: Vec<u8>,
    timestamp: String,
    scope: String,
    previous_signature: String,
}

impl ChunkVerifier {
    pub fn new(signing_key: Vec<u8>, timestamp: String, scope: String, seed_signature: String) -> Self {
        Self {
            signing_key,
            timestamp,
            scope,
            previous_signature: seed_signature,
        }
    }

    /// Verify one chunk's signature and advance the chain.
    fn verify_chunk(&mut self, provided_hex: &str, data: &[u8]) -> bool {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256-PAYLOAD\n{}\n{}\n{}\n{}\n{}",
            self.timestamp,
            self.scope,
            self.previous_signature,
            EMPTY_SHA256,
            hex::encode(Sha256::digest(data)),
        );
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        let ok: bool = expected
            .as_bytes()
            .ct_eq(provided_hex.as_bytes())
            .into();
        if ok {
            self.previous_signature = provided_hex.to_string();
        }
        ok
    }
}

#[derive(Debug)]
enum DecodeState {
    /// Waiting for a complete `size;chunk-signature=...\r\n` line.
    Header,
    /// Collecting `size` data bytes plus the trailing CRLF.
    Data { size: usize, signature: String },
    /// Zero-size chunk seen; swallowing any trailers.
    Done,
}

/// Push-parser for the chunked framing. Buffers at most one chunk so a
/// chunk's bytes are only released after its signature checks out.
pub struct AwsChunkedDecoder {
    buf: BytesMut,
    state: DecodeState,
    verifier: Option<ChunkVerifier>,
}

impl AwsChunkedDecoder {
    /// `verifier` is None when auth is disabled; framing is still decoded.
    pub fn new(verifier: Option<ChunkVerifier>) -> Self {
        Self {
            buf: BytesMut::new(),
            state: DecodeState::Header,
            verifier,
        }
    }

    /// Feed raw bytes; returns any complete decoded chunks.
    pub fn push(&mut self, input: &[u8]) -> Result<Vec<Bytes>, std::io::Error> {
        self.buf.extend_from_slice(input);
        let mut out = Vec::new();

        loop {
            match &self.state {
                DecodeState::Header => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_HEADER_LINE {
                            return Err(malformed("chunk header line too long"));
                        }
                        break;
                    };
                    let line = self.buf.split_to(line_end + 2);
                    let header = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| malformed("chunk header is not UTF-8"))?;

                    let mut fields = header.split(';');
                    let size_hex = fields.next().unwrap_or_default().trim();
                    let size = usize::from_str_radix(size_hex, 16)
                        .map_err(|_| malformed("invalid chunk size"))?;
                    let signature = fields
                        .find_map(|f| f.trim().strip_prefix("chunk-signature="))
                        .unwrap_or_default()
                        .to_string();

                    if size == 0 {
                        if let Some(v) = &mut self.verifier {
                            if !v.verify_chunk(&signature, b"") {
                                return Err(signature_mismatch());
                            }
                        }
                        debug!("aws-chunked: terminal chunk verified");
                        self.state = DecodeState::Done;
                    } else {
                        self.state = DecodeState::Data { size, signature };
                    }
                }
                DecodeState::Data { size, signature } => {
                    // Wait for the full chunk plus its trailing CRLF.
                    if self.buf.len() < size + 2 {
                        break;
                    }
                    let size = *size;
                    let signature = signature.clone();

                    let data = self.buf.split_to(size).freeze();
                    let crlf = self.buf.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(malformed("missing CRLF after chunk data"));
                    }
                    if let Some(v) = &mut self.verifier {
                        if !v.verify_chunk(&signature, &data) {
                            return Err(signature_mismatch());
                        }
                    }
                    out.push(data);
                    self.state = DecodeState::Header;
                }
                // Trailing checksum headers and blank lines are ignored.
                DecodeState::Done => {
                    self.buf.clear();
                    break;
                }
            }
        }

        Ok(out)
    }

    /// The body stream ended; the framing must have, too.
    pub fn finish(&self) -> Result<(), std::io::Error> {
        match self.state {
            DecodeState::Done => Ok(()),
            _ => Err(malformed("chunked body truncated before terminal chunk")),
        }
    }
}

fn malformed(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn signature_mismatch() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, ChunkSignatureMismatch)
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Wrap a raw body stream in the chunk decoder, yielding payload bytes.
pub fn decode_body(
    inner: BoxStream<'static, Result<Bytes, std::io::Error>>,
    verifier: Option<ChunkVerifier>,
) -> BoxStream<'static, Result<Bytes, std::io::Error>> {
    struct State {
        inner: BoxStream<'static, Result<Bytes, std::io::Error>>,
        decoder: AwsChunkedDecoder,
        queue: VecDeque<Bytes>,
        finished: bool,
    }

    let state = State {
        inner,
        decoder: AwsChunkedDecoder::new(verifier),
        queue: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.queue.pop_front() {
                return Some((Ok(chunk), st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(data)) => match st.decoder.push(&data) {
                    Ok(chunks) => st.queue.extend(chunks),
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.finished = true;
                    if let Err(e) = st.decoder.finish() {
                        return Some((Err(e), st));
                    }
                }
            }
        }
    })
    .boxed()
}
