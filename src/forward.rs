//! C7 Forwarder: an opaque-origin reverse-proxy hop. Normalizes the request
//! path, forwards method/headers/body to the selected target (or the
//! gateway's default origin), and either streams the response back
//! untouched (SSE) or buffers it for classification (§4.6).
//!
//! Deliberately has no knowledge of any backend's wire schema — it forwards
//! bytes, not objects. Content-encoding is decoded only so the classifier
//! (C8) can read error bodies; successful bodies are never touched.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use tokio::io::AsyncReadExt;

use crate::classify;

/// Default upstream request timeout (§5).
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

pub type SseStream = std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

pub enum ForwardBody {
    /// Buffered body plus an error-safe summary, ready for the classifier.
    /// `normalized` is set when `decoded_text` replaces an upstream body the
    /// client can't be handed as-is (binary or undecodable) — the pipeline
    /// substitutes a small JSON error for `bytes` in that case instead of
    /// passing the original bytes through.
    Buffered { bytes: Bytes, decoded_text: Option<String>, normalized: bool },
    /// SSE (or otherwise streamed) body, forwarded byte-for-byte in order.
    Streamed(SseStream),
}

pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ForwardBody,
}

/// Collapse a repeated `/v1/v1/...` prefix down to a single `/v1` (§4.6
/// idempotent path-normalization law, §8).
pub fn normalize_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/v1") {
        let rest = rest.trim_start_matches("/v1");
        format!("/v1{rest}")
    } else {
        path.to_string()
    }
}

/// Forward a request to `origin` + `path`. `is_streaming` selects SSE
/// passthrough (no buffering, no decode) vs buffered classification mode.
pub async fn forward(
    client: &reqwest::Client,
    origin: &str,
    path: &str,
    method: Method,
    mut headers: HeaderMap,
    body: Bytes,
    is_streaming: bool,
) -> anyhow::Result<ForwardResponse> {
    let normalized = normalize_path(path);
    let url = format!("{}{}", origin.trim_end_matches('/'), normalized);

    headers.remove(http::header::HOST);

    let mut request = client.request(method, &url).timeout(DEFAULT_UPSTREAM_TIMEOUT);
    for (name, value) in headers.iter() {
        request = request.header(name, value);
    }
    let response = request.body(body).send().await?;

    let status = response.status();
    let response_headers = response.headers().clone();

    if is_streaming {
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from));
        return Ok(ForwardResponse {
            status,
            headers: response_headers,
            body: ForwardBody::Streamed(Box::pin(stream)),
        });
    }

    let raw = response.bytes().await?;
    let (decoded_text, normalized) = if status.is_success() {
        (None, false)
    } else {
        let (text, normalized) = decode_and_summarize(&raw, &response_headers).await;
        (Some(text), normalized)
    };

    Ok(ForwardResponse {
        status,
        headers: response_headers,
        body: ForwardBody::Buffered { bytes: raw, decoded_text, normalized },
    })
}

/// Decode `content-encoding` (gzip/x-gzip/br/deflate) if present, falling
/// back to a client-safe normalized message on decode failure or
/// binary-looking output (§4.6). The returned `bool` tells the caller
/// whether the text is a substitute message rather than the decoded upstream
/// body verbatim, so the pipeline knows to replace the client-facing bytes
/// too instead of just using the text for classification.
async fn decode_and_summarize(raw: &Bytes, headers: &HeaderMap) -> (String, bool) {
    let encoding = headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let decoded = match encoding.as_str() {
        "gzip" | "x-gzip" => decode_with(raw, Codec::Gzip).await,
        "br" => decode_with(raw, Codec::Brotli).await,
        "deflate" => decode_with(raw, Codec::Deflate).await,
        _ => Ok(raw.to_vec()),
    };

    let is_quota_like = String::from_utf8_lossy(raw).to_lowercase().contains("quota");

    match decoded {
        Ok(bytes) => match classify::normalize_error_body(&bytes, is_quota_like) {
            Some(replacement) => (replacement, true),
            None => (String::from_utf8_lossy(&bytes).into_owned(), false),
        },
        Err(_) => (
            classify::normalize_error_body(raw, is_quota_like)
                .unwrap_or_else(|| "upstream returned unreadable compressed error details".to_string()),
            true,
        ),
    }
}

enum Codec {
    Gzip,
    Brotli,
    Deflate,
}

async fn decode_with(raw: &Bytes, codec: Codec) -> anyhow::Result<Vec<u8>> {
    use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZlibDecoder};

    let owned = raw.to_vec();
    let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(owned) });
    let reader = tokio_util::io::StreamReader::new(stream);
    let buffered = tokio::io::BufReader::new(reader);

    let mut out = Vec::new();
    match codec {
        Codec::Gzip => {
            GzipDecoder::new(buffered).read_to_end(&mut out).await?;
        }
        Codec::Brotli => {
            BrotliDecoder::new(buffered).read_to_end(&mut out).await?;
        }
        Codec::Deflate => {
            ZlibDecoder::new(buffered).read_to_end(&mut out).await?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_collapses_double_v1() {
        assert_eq!(normalize_path("/v1/v1/chat/completions"), "/v1/chat/completions");
    }

    #[test]
    fn normalize_path_leaves_single_v1_untouched() {
        assert_eq!(normalize_path("/v1/chat/completions"), "/v1/chat/completions");
    }

    #[test]
    fn normalize_path_is_idempotent() {
        let once = normalize_path("/v1/v1/v1/models");
        let twice = normalize_path(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "/v1/models");
    }

    #[test]
    fn normalize_path_ignores_non_v1_paths() {
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[tokio::test]
    async fn decode_and_summarize_passes_through_plain_text() {
        let raw = Bytes::from_static(b"{\"error\":\"bad request\"}");
        let headers = HeaderMap::new();
        let (summary, normalized) = decode_and_summarize(&raw, &headers).await;
        assert!(summary.contains("bad request"));
        assert!(!normalized);
    }
}
