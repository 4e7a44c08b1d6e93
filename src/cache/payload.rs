use std::io::{self, BufRead, Write};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::ERROR_STATUS;

/// Errors raised when stored bytes do not parse per the wire grammar. These
/// signal corruption or an incompatible format, never a normal cache miss.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("missing comment line")]
    MissingComment,
    #[error("malformed status line {0:?}")]
    MalformedStatusLine(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("truncated payload")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One HTTP exchange, exactly as persisted on disk:
///
/// ```text
/// # <comment>
/// HTTPDISK <status> <reason phrase>
/// <Header-Name>: <Header-Value>
///
/// <raw body bytes>
/// ```
///
/// Header values and the body are raw bytes with no implied encoding and must
/// round-trip unchanged, including sequences that are not valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, Bytes)>,
    pub body: Bytes,
    pub comment: String,
}

impl Payload {
    /// Build a payload from live response parts. Header names come out of an
    /// `http::HeaderMap` already lowercased; values are carried as raw bytes.
    pub fn from_parts(status: u16, reason: &str, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), Bytes::copy_from_slice(value.as_bytes())))
            .collect();
        Self {
            status,
            reason: reason.to_string(),
            headers,
            body,
            comment: String::new(),
        }
    }

    /// True for the sentinel payload that records a transport failure.
    pub fn is_error(&self) -> bool {
        self.status == ERROR_STATUS
    }

    /// First header value for `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_ref())
    }

    /// Rebuild an `http::HeaderMap`; entries with names or values the http
    /// crate rejects are dropped rather than failing the whole read.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    pub fn serialize(&self, sink: &mut impl Write) -> io::Result<()> {
        writeln!(sink, "# {}", self.comment)?;
        writeln!(sink, "HTTPDISK {} {}", self.status, self.reason)?;
        for (name, value) in &self.headers {
            write!(sink, "{name}: ")?;
            sink.write_all(value)?;
            sink.write_all(b"\n")?;
        }
        sink.write_all(b"\n")?;
        sink.write_all(&self.body)
    }

    /// The head alone (status line + headers + blank line), without the
    /// comment or body. Used by httpdisk-grep's `--head` output.
    pub fn serialize_head(&self, sink: &mut impl Write) -> io::Result<()> {
        writeln!(sink, "HTTPDISK {} {}", self.status, self.reason)?;
        for (name, value) in &self.headers {
            write!(sink, "{name}: ")?;
            sink.write_all(value)?;
            sink.write_all(b"\n")?;
        }
        sink.write_all(b"\n")
    }

    pub fn deserialize(source: &mut impl BufRead) -> Result<Self, PayloadError> {
        let mut payload = Self::read_head(source)?;
        let mut body = Vec::new();
        source.read_to_end(&mut body)?;
        payload.body = Bytes::from(body);
        Ok(payload)
    }

    /// Peek mode: read only as far as the status line. Supports cheap
    /// `status()` queries without materializing headers or body.
    pub fn peek_status(source: &mut impl BufRead) -> Result<u16, PayloadError> {
        Self::read_comment(source)?;
        let (status, _) = Self::read_status_line(source)?;
        Ok(status)
    }

    fn read_head(source: &mut impl BufRead) -> Result<Self, PayloadError> {
        let comment = Self::read_comment(source)?;
        let (status, reason) = Self::read_status_line(source)?;

        let mut headers = Vec::new();
        loop {
            let line = read_line(source)?.ok_or(PayloadError::Truncated)?;
            if line.is_empty() {
                break;
            }
            let split = line
                .windows(2)
                .position(|pair| pair == b": ")
                .ok_or_else(|| PayloadError::MalformedHeader(lossy(&line)))?;
            let name = std::str::from_utf8(&line[..split])
                .map_err(|_| PayloadError::MalformedHeader(lossy(&line)))?;
            headers.push((name.to_string(), Bytes::copy_from_slice(&line[split + 2..])));
        }

        Ok(Self {
            status,
            reason,
            headers,
            body: Bytes::new(),
            comment,
        })
    }

    fn read_comment(source: &mut impl BufRead) -> Result<String, PayloadError> {
        let line = read_line(source)?.ok_or(PayloadError::MissingComment)?;
        match line.strip_prefix(b"# ") {
            Some(comment) => Ok(String::from_utf8_lossy(comment).into_owned()),
            None if line == b"#" => Ok(String::new()),
            None => Err(PayloadError::MissingComment),
        }
    }

    fn read_status_line(source: &mut impl BufRead) -> Result<(u16, String), PayloadError> {
        let line = read_line(source)?.ok_or(PayloadError::Truncated)?;
        let text = std::str::from_utf8(&line)
            .map_err(|_| PayloadError::MalformedStatusLine(lossy(&line)))?;
        let malformed = || PayloadError::MalformedStatusLine(text.to_string());
        let rest = text.strip_prefix("HTTPDISK ").ok_or_else(malformed)?;
        let (status, reason) = rest.split_once(' ').ok_or_else(malformed)?;
        let status = status.parse::<u16>().map_err(|_| malformed())?;
        Ok((status, reason.to_string()))
    }
}

/// Read one `\n`-terminated line as raw bytes, without the terminator.
/// Returns None at end of input.
fn read_line(source: &mut impl BufRead) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = source.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(payload: &Payload) -> Payload {
        let mut bytes = Vec::new();
        payload.serialize(&mut bytes).expect("serialize");
        Payload::deserialize(&mut Cursor::new(bytes)).expect("deserialize")
    }

    #[test]
    fn round_trips_all_fields() {
        let payload = Payload {
            status: 200,
            reason: "OK".to_string(),
            headers: vec![
                ("HELLO".to_string(), Bytes::from_static(b"wor:ld")),
                ("name".to_string(), Bytes::from_static(b"john")),
            ],
            body: Bytes::from_static(b"hello world"),
            comment: "GET http://example.com".to_string(),
        };
        assert_eq!(round_trip(&payload), payload);
    }

    #[test]
    fn round_trips_raw_bytes() {
        // ISO-8859-1 bytes that are not valid UTF-8
        let cafe = Bytes::from_static(b"caf\xe9");
        let payload = Payload {
            status: 200,
            reason: "OK".to_string(),
            headers: vec![("cafe".to_string(), cafe.clone())],
            body: Bytes::from_static(b"\x00\xff\xfe binary \x80"),
            comment: String::new(),
        };
        let read = round_trip(&payload);
        assert_eq!(read.header("CAFE"), Some(cafe.as_ref()));
        assert_eq!(read.body, payload.body);
    }

    #[test]
    fn round_trips_empty_body_and_headers() {
        let payload = Payload {
            status: 999,
            reason: "ConnectionFailed connection refused".to_string(),
            ..Payload::default()
        };
        let read = round_trip(&payload);
        assert_eq!(read, payload);
        assert!(read.is_error());
    }

    #[test]
    fn exact_wire_layout() {
        let payload = Payload {
            status: 301,
            reason: "Moved Permanently".to_string(),
            headers: vec![("location".to_string(), Bytes::from_static(b"http://b"))],
            body: Bytes::from_static(b"gone"),
            comment: "GET http://a".to_string(),
        };
        let mut bytes = Vec::new();
        payload.serialize(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            b"# GET http://a\nHTTPDISK 301 Moved Permanently\nlocation: http://b\n\ngone"
        );
    }

    #[test]
    fn peek_reads_only_the_status() {
        let payload = Payload {
            status: 503,
            reason: "Service Unavailable".to_string(),
            body: Bytes::from_static(b"try later"),
            ..Payload::default()
        };
        let mut bytes = Vec::new();
        payload.serialize(&mut bytes).unwrap();
        let status = Payload::peek_status(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(status, 503);
    }

    #[test]
    fn rejects_malformed_input() {
        let cases: &[&[u8]] = &[
            b"",
            b"no comment\nHTTPDISK 200 OK\n\n",
            b"# c\nHTTP 200 OK\n\n",
            b"# c\nHTTPDISK abc OK\n\n",
            b"# c\nHTTPDISK 200 OK\nbad header line\n\n",
            b"# c\nHTTPDISK 200 OK\nname: value\n",
        ];
        for case in cases {
            let result = Payload::deserialize(&mut Cursor::new(case.to_vec()));
            assert!(result.is_err(), "expected failure for {:?}", lossy(case));
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let payload = Payload {
            headers: vec![("Content-Type".to_string(), Bytes::from_static(b"text/html"))],
            ..Payload::default()
        };
        assert_eq!(payload.header("content-type"), Some(b"text/html".as_ref()));
        assert_eq!(payload.header("missing"), None);
    }

    #[test]
    fn header_map_drops_invalid_entries() {
        let payload = Payload {
            headers: vec![
                ("ok".to_string(), Bytes::from_static(b"fine")),
                ("bad name".to_string(), Bytes::from_static(b"dropped")),
            ],
            ..Payload::default()
        };
        let map = payload.header_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("ok").unwrap(), "fine");
    }
}
