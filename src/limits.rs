//! Server configuration: binding, pool sizing, timeouts, and parse/response
//! buffer limits.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.
//!
//! # Examples
//!
//! ```no_run
//! # blocking_httpd::impt_default_handler!{MyHandler}
//! use blocking_httpd::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! fn main() {
//!     Server::builder()
//!         .bind("127.0.0.1", 8080)
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_threads: 500, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,      // More headers for complex APIs
//!             body_size: 16 * 1024,  // 16KB for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch();
//! }
//! ```

use std::time::Duration;

/// Controls binding, acceptor/worker-pool sizing, and overload behavior.
///
/// # Connection admission
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [------------------]  Yes  /----------------\  No  [-------------]
/// [ Submit to workers ] <=== | Queue has room? | ===> [ Sending 503 ]
/// [------------------]        \----------------/       [-------------]
///        ||
///        \/
/// [-----------------]
/// [ SocketProcessor  ]
/// [-----------------]
/// ```
///
/// `max_threads` bounds how many connections are processed concurrently.
/// Accepted sockets beyond the submission queue's capacity
/// (`max_pending_connections`) are answered with `503` by one of
/// `count_503_handlers` dedicated threads and the connection latch is
/// released without ever reaching a worker.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Address the listening socket binds to (default: `0.0.0.0`).
    pub address: std::net::IpAddr,
    /// TCP port the listening socket binds to (default: `8080`).
    pub port: u16,
    /// `listen()` backlog passed to the kernel (default: `100`).
    pub backlog: i32,
    /// Number of acceptor threads sharing the listening socket (default: `1`).
    ///
    /// More than one is only useful on platforms where concurrent `accept`
    /// on the same socket usefully parallelizes (e.g. `SO_REUSEPORT`-style
    /// kernels); `socket2` is used to configure the listener itself.
    pub acceptor_thread_count: usize,
    /// `TCP_NODELAY` on accepted sockets (default: `true`).
    pub tcp_nodelay: bool,
    /// `SO_LINGER` on accepted sockets (default: `None`, i.e. off).
    pub so_linger: Option<Duration>,

    /// Maximum number of simultaneously open connections (default: `0`).
    ///
    /// This is the connection-count latch from the spec's concurrency
    /// model, independent from `max_threads`: a connection that has gone
    /// idle waiting on a keep-alive read still holds a latch permit even
    /// if its worker thread is blocked rather than busy. `0` means "equal
    /// to `max_threads`".
    pub max_connections: usize,

    /// Maximum number of worker threads processing connections concurrently
    /// (default: `200`).
    pub max_threads: usize,

    /// Maximum number of accepted sockets waiting for a free worker thread
    /// (default: `250`).
    ///
    /// Accepted connections that exceed this bound receive an immediate
    /// HTTP `503` response instead of waiting.
    pub max_pending_connections: usize,

    /// Dedicated threads for queue-overflow `503` responses (default: `1`).
    ///
    /// Set to `0` to silently close the connection instead (not
    /// recommended for production HTTP servers).
    pub count_503_handlers: usize,

    /// Format for error responses (default: `true`).
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 55\r
    /// content-type: application/json\r
    /// \r
    /// {"error":"Invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 0\r
    /// \r
    /// ```
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            address: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 8080,
            backlog: 100,
            acceptor_thread_count: 1,
            tcp_nodelay: true,
            so_linger: None,

            max_connections: 0,
            max_threads: 200,
            max_pending_connections: 250,
            count_503_handlers: 1,
            json_errors: true,

            _priv: (),
        }
    }
}

/// Connection-level limits and timeouts.
///
/// Controls individual TCP connection behavior including timeouts,
/// lifetime, and request limits.
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for a byte once a request is in progress
    /// (default: `2 seconds`). Applies to reads mid-request-line,
    /// mid-headers, or mid-body (`SO_TIMEOUT`).
    ///
    /// Prevents slowloris-style attacks and frees resources from stalled
    /// clients.
    pub socket_read_timeout: Duration,

    /// Maximum idle duration between requests on a keep-alive connection
    /// (default: `30 seconds`). Distinct from `socket_read_timeout`: this
    /// is how long the connection may sit with nothing in flight before
    /// it is closed.
    pub keep_alive_timeout: Duration,

    /// Maximum duration to wait for writing data to socket (default: `3 seconds`).
    ///
    /// If data can't be written in time, connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    ///
    /// `1` disables keep-alive outright. Connection closes after
    /// processing this many requests.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of connection from establishment to closure (default: `2 minutes`).
    ///
    /// Final safety net that guarantees no connection lives longer than this duration.
    /// In practice, connections are typically cleaned up by `socket_read_timeout`
    /// or `max_requests_per_connection` long before this limit is reached.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            keep_alive_timeout: Duration::from_secs(30),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// ⚠️ **SECURITY-FIRST DEFAULTS**
///
/// These limits are intentionally conservative to prevent resource exhaustion
/// and various parsing attacks. They work well for:
/// - Simple REST APIs
/// - Microservices
/// - Internal tools
/// - Low-memory environments
///
/// 🔧 **You MAY need to increase these if you see:**
/// - `413 Payload Too Large` for legitimate requests
/// - `414 URI Too Long` for normal API calls
/// - `431 Request Header Fields Too Large`
///
/// # Memory Allocation Strategy
///
/// Each TCP connection pre-allocates a fixed-size buffer based on these limits:
///
/// ```text
/// Total Buffer = First Line + (Headers × Header Line) + Body + Overhead
/// ```
///
/// ## Buffer Size Calculation (Default Values)
///
/// | Component | Formula | Size | Purpose |
/// |-----------|---------|------|---------|
/// | First Line | `19 + url_size` | 275 B | `METHOD URL HTTP/1.1\r\n` |
/// | Headers | `header_count × Header Line` | 9,280 B | Headers storage |
/// | Header Line | `header_name_size + header_value_size + 4` | 580 B | `Name: Value\r\n` |
/// | Body | `body_size` | 4,096 B | Request payload |
/// | **Total** | **Sum + 2 bytes CRLF + struct (64 B)** | **13,717 B = ~13.4 KB** | Per connection buffer |
///
/// # Example
/// ```
/// use blocking_httpd::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_size = limits.estimated_buffer_size();
/// println!("Each connection needs {} bytes for data buffer", buffer_size);
/// ```
///
/// # Trade-off Considerations
///
/// - **Small limits**: Less memory, faster parsing, but may reject legitimate requests
/// - **Large limits**: More memory overhead, but handles complex APIs and large payloads
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in URL (default: `8 segments`).
    pub url_parts: usize,
    /// Maximum query string length (default: `128`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16 headers`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512 B`).
    pub header_value_size: usize,

    /// Reject requests whose header name contains a non-token byte instead
    /// of skipping the offending line and continuing (default: `true`).
    pub reject_illegal_header_name: bool,

    /// Maximum request body size in bytes (default: `4 KB`).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,
            reject_illegal_header_name: true,

            body_size: 4 * 1024,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated memory buffer size required per connection.
    ///
    /// This calculates the total buffer size needed to parse HTTP requests
    /// based on the current limits. The buffer includes space for:
    /// - HTTP request line
    /// - Headers (name + value for each header)
    /// - Request body
    /// - CRLF terminators
    ///
    /// # Note
    /// The returned size represents only the data buffer. Additional memory
    /// is used for the parser structure itself (~64 bytes).
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;
        self.precalc.url_size_memchr = self.url_size;
        self.precalc.len_http09 = self.precalc.first_line;

        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n" + Body
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2 + self.body_size
    }

    #[inline(always)]
    // First line HTTP response:
    // CONNECT /url/test HTTP/1.1\r\n
    // |-----| |-------| |------|
    //  Method    URl    Version
    //
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    // In Code: 19 + url_size
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Header:
    // Authorization: Sample%20Data\r\n
    // |-----------|  |-----------|
    //     Name           Value
    //
    // Formula: Name + ": " + Value +  "\r\n"
    // In Code: 4 + header_name_size + header_value_size
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
    pub(crate) h_line: usize,
    pub(crate) url_size_memchr: usize,
    pub(crate) len_http09: usize,
}

/// Configuration for response processing and memory allocation limits.
///
/// Controls how response buffers are allocated and managed to balance
/// memory usage and performance.
///
/// # Buffer Management
///
/// Based on the configured limits, response buffers are managed as follows:
/// ```rust
/// # use blocking_httpd::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<()> = Vec::with_capacity(limits.default_capacity);
/// #
/// // `buffer` is Vec
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
///
/// When the server starts, buffers are created with a capacity equal to `default_capacity`.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`).
    ///
    /// Enforced as a hard ceiling: a response whose buffer would grow past
    /// this is rejected before it ever reaches the socket, surfaced as a
    /// `431` (`BufferOverflow`), rather than growing it without bound. It
    /// is also the threshold past which the buffer is reallocated down to
    /// `default_capacity` instead of reused at the start of the next
    /// request (see `Response::reset`).
    pub max_capacity: usize,
    /// Size of the coalescing buffer sat in front of the socket write
    /// (default: `0`, disabled). Values `<= 500` disable coalescing
    /// outright and go straight to one `write_all` call per response, as
    /// if this were unset. Above that, response bytes are appended to a
    /// chunk bounded to this many bytes that flushes to the socket as it
    /// fills, turning a response bigger than `socket_buffer` into however
    /// many writes that size requires instead of one large one.
    pub socket_buffer: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

/// Limits governing optional `HTTP/0.9`-style request handling.
///
/// `HTTP/0.9` has no headers and no `Connection` negotiation, so keep-alive
/// is instead signalled through the `/keep_alive` URL-prefix convention
/// (see [`Url`](crate::Url)). Passing this struct to
/// [`ServerBuilder::http_09_limits`](crate::ServerBuilder::http_09_limits)
/// switches `HTTP/0.9` support on; omitting it rejects such requests outright.
#[derive(Debug, Clone)]
pub struct Http09Limits {
    /// Maximum number of requests allowed per `/keep_alive` connection
    /// (default: `100`).
    pub max_requests_per_connection: usize,
    /// Maximum lifetime of a `/keep_alive` connection (default: `2 minutes`).
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for Http09Limits {
    fn default() -> Self {
        Self {
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),

            _priv: (),
        }
    }
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
            socket_buffer: 0,

            _priv: (),
        }
    }
}
