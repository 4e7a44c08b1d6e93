use bytes::Bytes;
use encoding_rs::{Encoding, REPLACEMENT};
use http::header;
use mime::Mime;

use super::Response;

/// Reconcile response body bytes against the declared Content-Type.
///
/// Bodies are raw bytes with no implied encoding, so without `utf8` there is
/// nothing to transform. With `utf8` set, text and JSON bodies are transcoded
/// from the declared charset to UTF-8, replacing invalid or undefined
/// sequences with `?`. Unknown charset labels fall back to binary; labels that
/// resolve to the replacement encoding cannot be converted at all and yield a
/// fixed diagnostic body instead.
pub(super) fn encode_body(response: &mut Response, utf8: bool) {
    let content_type = response
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Mime>().ok());

    let Some(content_type) = content_type else {
        return;
    };
    if !utf8 || !is_text(&content_type) {
        return;
    }

    let charset = content_type
        .get_param(mime::CHARSET)
        .map(|charset| charset.as_str().to_string());
    response.body = match charset {
        Some(label) => match Encoding::for_label(label.as_bytes()) {
            Some(encoding) if encoding == REPLACEMENT => Bytes::from(format!(
                "httpdisk could not convert from {label} to UTF-8"
            )),
            Some(encoding) => {
                let (text, _, _) = encoding.decode(&response.body);
                Bytes::from(text.replace('\u{fffd}', "?"))
            }
            // unrecognized charset: binary fallback
            None => binary_to_utf8(&response.body),
        },
        // no declared charset: binary fallback
        None => binary_to_utf8(&response.body),
    };
}

fn is_text(content_type: &Mime) -> bool {
    content_type.type_() == mime::TEXT
        || (content_type.type_() == mime::APPLICATION && content_type.subtype() == mime::JSON)
}

/// Binary bytes have no charset to convert from; anything outside ASCII
/// becomes `?`.
fn binary_to_utf8(body: &[u8]) -> Bytes {
    Bytes::from(
        body.iter()
            .map(|&byte| if byte.is_ascii() { byte as char } else { '?' })
            .collect::<String>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    const CAFE_LATIN1: &[u8] = b"caf\xe9";

    fn response(content_type: Option<&str>, body: &'static [u8]) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(value) = content_type {
            headers.insert(header::CONTENT_TYPE, value.parse().unwrap());
        }
        Response {
            status: 200,
            reason: "OK".to_string(),
            headers,
            body: Bytes::from_static(body),
            from_cache: false,
        }
    }

    #[test]
    fn no_utf8_option_leaves_bytes_alone() {
        let mut resp = response(Some("text/html; charset=iso-8859-1"), CAFE_LATIN1);
        encode_body(&mut resp, false);
        assert_eq!(resp.body, Bytes::from_static(CAFE_LATIN1));
    }

    #[test]
    fn transcodes_declared_charset() {
        let mut resp = response(Some("text/html; charset=iso-8859-1"), CAFE_LATIN1);
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from("café"));
    }

    #[test]
    fn json_counts_as_text() {
        let mut resp = response(
            Some("application/json; charset=utf-8"),
            b"{\"k\":\"caf\xc3\xa9\"}",
        );
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from("{\"k\":\"café\"}"));
    }

    #[test]
    fn invalid_sequences_become_question_marks() {
        let mut resp = response(Some("text/plain; charset=utf-8"), b"ok \xff\xfe end");
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from("ok ?? end"));
    }

    #[test]
    fn bogus_charset_falls_back_to_binary() {
        let mut resp = response(Some("text/html; charset=bogus"), CAFE_LATIN1);
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from("caf?"));
    }

    #[test]
    fn missing_charset_falls_back_to_binary() {
        let mut resp = response(Some("text/xml"), CAFE_LATIN1);
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from("caf?"));
    }

    #[test]
    fn unconvertible_charset_yields_diagnostic() {
        let mut resp = response(Some("text/plain; charset=utf-7"), b"+AGgAaQ-");
        encode_body(&mut resp, true);
        assert_eq!(
            resp.body,
            Bytes::from("httpdisk could not convert from utf-7 to UTF-8")
        );
    }

    #[test]
    fn non_text_bodies_are_untouched() {
        let mut resp = response(Some("image/png; charset=utf-8"), b"\x89PNG");
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from_static(b"\x89PNG"));
    }

    #[test]
    fn missing_content_type_is_untouched() {
        let mut resp = response(None, CAFE_LATIN1);
        encode_body(&mut resp, true);
        assert_eq!(resp.body, Bytes::from_static(CAFE_LATIN1));
    }
}
