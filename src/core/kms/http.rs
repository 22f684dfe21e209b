//! Incremental HTTP/1.1 response framing for KMS replies.
//!
//! Only `Content-Length` framed responses are accepted. The whole response,
//! headers included, must fit in [`MAX_KMS_RESPONSE_LEN`] bytes.

use crate::core::constants::MAX_KMS_RESPONSE_LEN;
use crate::error::KmsError;

const PREFIX: &[u8] = b"HTTP/1.";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Head {
    status: u16,
    body_start: usize,
    total_len: usize,
}

/// Accumulates a response fed in arbitrary chunks.
#[derive(Debug, Default)]
pub(crate) struct ResponseParser {
    received: Vec<u8>,
    head: Option<Head>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes still required. Never increases.
    pub fn bytes_needed(&self) -> usize {
        match &self.head {
            Some(head) => head.total_len - self.received.len(),
            None => MAX_KMS_RESPONSE_LEN - self.received.len(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.head.is_some() && self.bytes_needed() == 0
    }

    pub fn received(&self) -> usize {
        self.received.len()
    }

    /// Append a chunk, parsing the header block as soon as it is complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), KmsError> {
        let needed = self.bytes_needed();
        if chunk.len() > needed {
            return Err(KmsError::TooManyBytes {
                needed,
                got: chunk.len(),
            });
        }
        self.received.extend_from_slice(chunk);

        if self.head.is_none() {
            let checked = self.received.len().min(PREFIX.len());
            if self.received[..checked] != PREFIX[..checked] {
                return Err(KmsError::MalformedResponse(
                    "response does not start with an HTTP/1.x status line".to_string(),
                ));
            }
            if let Some(pos) = find(&self.received, HEADER_END) {
                let head = parse_head(&self.received[..pos], pos + HEADER_END.len())?;
                if self.received.len() > head.total_len {
                    return Err(KmsError::TooManyBytes {
                        needed: head.total_len + chunk.len() - self.received.len(),
                        got: chunk.len(),
                    });
                }
                self.head = Some(head);
            } else if self.received.len() == MAX_KMS_RESPONSE_LEN {
                return Err(KmsError::ResponseTooLarge(MAX_KMS_RESPONSE_LEN));
            }
        }
        Ok(())
    }

    /// HTTP status code, once the header block has been parsed.
    pub fn status(&self) -> Option<u16> {
        self.head.as_ref().map(|h| h.status)
    }

    /// The response body. Only meaningful once complete.
    pub fn body(&self) -> &[u8] {
        match &self.head {
            Some(head) => &self.received[head.body_start..],
            None => &[],
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_head(block: &[u8], body_start: usize) -> Result<Head, KmsError> {
    let malformed = |reason: &str| KmsError::MalformedResponse(reason.to_string());
    let text = std::str::from_utf8(block).map_err(|_| malformed("header block is not UTF-8"))?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| malformed("invalid status line"))?;

    let mut content_length = None;
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed("invalid header line"))?;
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| malformed("invalid Content-Length"))?;
            content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Err(malformed("chunked transfer encoding is not supported"));
        }
    }

    let content_length = content_length.ok_or_else(|| malformed("missing Content-Length"))?;
    let total_len = body_start.saturating_add(content_length);
    if total_len > MAX_KMS_RESPONSE_LEN {
        return Err(KmsError::ResponseTooLarge(MAX_KMS_RESPONSE_LEN));
    }
    Ok(Head {
        status,
        body_start,
        total_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"ok\":true}";

    #[test]
    fn test_single_feed() {
        let mut parser = ResponseParser::new();
        parser.feed(REPLY).unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.status(), Some(200));
        assert_eq!(parser.body(), b"{\"ok\":true}");
    }

    #[test]
    fn test_byte_at_a_time_is_monotonic() {
        let mut parser = ResponseParser::new();
        let mut last = parser.bytes_needed();
        assert_eq!(last, MAX_KMS_RESPONSE_LEN);
        for b in REPLY {
            parser.feed(std::slice::from_ref(b)).unwrap();
            let now = parser.bytes_needed();
            assert!(now < last);
            last = now;
        }
        assert_eq!(last, 0);
        assert_eq!(parser.body(), b"{\"ok\":true}");
    }

    #[test]
    fn test_overfeed_rejected() {
        let mut extra = REPLY.to_vec();
        extra.extend_from_slice(b"trailing");
        let mut parser = ResponseParser::new();
        assert!(matches!(
            parser.feed(&extra),
            Err(KmsError::TooManyBytes { .. })
        ));

        let mut parser = ResponseParser::new();
        parser.feed(REPLY).unwrap();
        assert!(parser.feed(b"x").is_err());
    }

    #[test]
    fn test_bad_prefix_fails_eagerly() {
        let mut parser = ResponseParser::new();
        assert!(parser.feed(b"HT").is_ok());
        assert!(parser.feed(b"XP").is_err());

        let mut parser = ResponseParser::new();
        assert!(parser.feed(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_chunked_rejected() {
        let mut parser = ResponseParser::new();
        let reply = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(parser.feed(reply).is_err());
    }

    #[test]
    fn test_unterminated_header_block() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nX-Pad: ").unwrap();
        let padding = vec![b'a'; parser.bytes_needed()];
        assert!(matches!(
            parser.feed(&padding),
            Err(KmsError::ResponseTooLarge(_))
        ));
        assert!(!parser.is_complete());
    }

    #[test]
    fn test_oversized_content_length() {
        let mut parser = ResponseParser::new();
        let reply = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_KMS_RESPONSE_LEN);
        assert!(matches!(
            parser.feed(reply.as_bytes()),
            Err(KmsError::ResponseTooLarge(_))
        ));
    }
}
