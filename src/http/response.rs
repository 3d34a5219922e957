//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::{Headers, StatusCode};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use fileroute::http::{Response, StatusCode};
///
/// let response = Response::json(StatusCode::OK, &serde_json::json!({"status": "ok"})).unwrap();
/// assert_eq!(response.body_content(), br#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Type: application/json; charset=utf-8\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// Creates a response whose body is `value` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn json<T>(status: StatusCode, value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .body_bytes(body))
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Appends every header of `headers` in-place.
    pub fn merge_headers(&mut self, headers: Headers) {
        self.headers.extend(headers);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes.
    pub fn body_content(&self) -> &[u8] {
        &self.body
    }

    /// Returns whether the connection may be reused after this response.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>`, except on `1xx` and `204` responses, which
    ///   never carry a body.
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(self) -> BytesMut {
        self.encode(true)
    }

    /// Serializes the response as the answer to a `HEAD` request.
    ///
    /// Headers, including `Content-Length`, are the ones a `GET` would have
    /// produced; the body itself is not written.
    ///
    /// # Examples
    ///
    /// ```
    /// use fileroute::http::{Response, StatusCode};
    ///
    /// let bytes = Response::new(StatusCode::BAD_REQUEST).body("nope").into_head_bytes();
    /// assert!(bytes.ends_with(b"Content-Length: 4\r\n\r\n"));
    /// ```
    pub fn into_head_bytes(self) -> BytesMut {
        self.encode(false)
    }

    fn encode(mut self, write_body: bool) -> BytesMut {
        let bodiless = self.status.is_informational() || self.status == StatusCode::NO_CONTENT;
        if bodiless {
            self.body.clear();
        }
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        if !bodiless {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);

        if write_body && !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn json_sets_content_type_and_body() {
        let r = Response::json(StatusCode::CREATED, &json!({"id": 7})).unwrap();
        assert_eq!(r.status(), StatusCode::CREATED);
        assert_eq!(r.headers().get("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(r.body_content(), br#"{"id":7}"#);
    }

    #[test]
    fn json_rejects_non_string_map_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(Response::json(StatusCode::OK, &map).is_err());
    }

    #[test]
    fn plain_body_defaults_to_text() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.ends_with("Content-Length: 5\r\n\r\nHello"));
    }

    #[test]
    fn no_content_has_no_body_or_length() {
        let r = Response::new(StatusCode::NO_CONTENT);
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!s.contains("Content-Type"));
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn no_content_drops_stray_body() {
        let r = Response::new(StatusCode::NO_CONTENT).body("ignored");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("ignored"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn head_bytes_keep_length_but_omit_body() {
        let r = Response::json(StatusCode::BAD_REQUEST, &json!({"status": 400})).unwrap();
        let s = to_string(r.into_head_bytes());
        assert!(s.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(s.contains("Content-Type: application/json; charset=utf-8\r\n"));
        assert!(s.ends_with("Content-Length: 14\r\n\r\n"), "{s}");
    }

    #[test]
    fn keep_alive_flag_is_readable() {
        assert!(Response::new(StatusCode::OK).is_keep_alive());
        assert!(!Response::new(StatusCode::OK).keep_alive(false).is_keep_alive());
    }

    #[test]
    fn merged_headers_are_written() {
        let mut extra = Headers::new();
        extra.insert("X-Request-Id", "abc-123");
        let mut r = Response::new(StatusCode::OK);
        r.merge_headers(extra);
        let s = to_string(r.keep_alive(false).into_bytes());
        assert!(s.contains("X-Request-Id: abc-123\r\n"));
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn custom_status_uses_class_reason() {
        let r = Response::new(StatusCode::from_u16(499).unwrap());
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 499 Client Error\r\n"));
    }
}
