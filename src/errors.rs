use crate::{query, Version};
use std::{error, fmt, io};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidRequestTarget,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidHttpProtocol,
    UnsupportedVersion,

    InvalidHeader,
    InvalidHeaderName,
    TooManyHeaders,
    RequestHeaderTooLarge,
    InvalidContentLength,
    InvalidConnection,
    MalformedChunk,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    /// Peer closed the socket with no bytes read on an otherwise idle
    /// connection. Never surfaced to the application; the processor
    /// closes the socket without writing a response.
    UnexpectedEof,
    /// `SO_TIMEOUT`/`keepAliveTimeout` elapsed while waiting for the next
    /// request line or for body bytes mid-request.
    SocketTimeout,
    /// Peer reset the connection or the socket errored while a response
    /// was already partially written; nothing further can be sent.
    ClientAbort,
    /// A growable buffer hit its configured limit while growing, with no
    /// sink to flush the buffered bytes to first.
    BufferOverflow,
    /// The pluggable handshake hook rejected or failed a connection
    /// before any bytes were parsed.
    HandshakeFailed,
    /// A `ConnectionFilter` rejected the peer before the request line
    /// was read; the connection latch is released without dispatch.
    Rejected,

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (_, Self::$name { .. }, Version::Http09) => concat!(
                    "ERROR: ", stringify!($status_code)
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidRequestTarget: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidHttpProtocol: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        InvalidHeaderName: "400 Bad Request", "61"
            => r#"{"error":"Invalid header field name","code":"INVALID_HEADER_NAME"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        RequestHeaderTooLarge: "431 Request Header Fields Too Large", "60"
            => r#"{"error":"Request header too large","code":"HEADER_TOO_LARGE"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;
        MalformedChunk: "400 Bad Request", "59"
            => r#"{"error":"Malformed chunked body","code":"MALFORMED_CHUNK"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        BufferOverflow: "431 Request Header Fields Too Large", "57"
            => r#"{"error":"Internal buffer overflow","code":"BUFFER_OVERFLOW"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }

    /// Errors that must never reach `as_http`: the peer is gone, the
    /// handshake never completed, or the connection was rejected before
    /// a request line existed to respond to. The processor closes the
    /// socket directly for these.
    pub(crate) const fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof
                | Self::SocketTimeout
                | Self::ClientAbort
                | Self::HandshakeFailed
                | Self::Rejected
        )
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
