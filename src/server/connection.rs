use crate::{
    chunk::ByteChunk,
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::{Method, Version},
    },
    limits::{ConnLimits, Http09Limits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{
    io::{self, Write},
    net::{SocketAddr, TcpStream},
    sync::Arc,
    time::Instant,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    /// Scratch buffer backing the coalescing `ByteChunk` in [`Self::write_bytes`];
    /// reused across every request on the connection instead of reallocated.
    out_buf: Vec<u8>,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) http_09_limits: Option<Http09Limits>,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.3),
            request: Request::new(&limits.3),
            response: Response::new(&limits.4),
            out_buf: Vec::new(),

            server_limits: limits.0,
            conn_limits: limits.1,
            http_09_limits: limits.2,
            req_limits: limits.3,
            resp_limits: limits.4,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Drives one accepted connection to completion on the calling (worker)
    /// thread: parses requests and dispatches them to the handler until the
    /// peer disconnects, a protocol error occurs, or a limit expires.
    #[inline]
    pub(crate) fn run(&mut self, stream: &mut TcpStream) -> Result<(), io::Error> {
        match self.impl_run(stream) {
            Ok(()) => Ok(()),
            Err(error) if error.is_silent() => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                log::debug!("responding with error: {error}");
                self.send_error(stream, error, self.request.version(), self.server_limits.json_errors)
            }
        }
    }

    #[inline]
    fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            self.reset_request_response();

            let read = self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .map_err(classify_io_error)?;
            if read == 0 {
                return Err(ErrorKind::UnexpectedEof);
            }

            self.response.version = self.parse(stream)?;

            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response);

            if self.request.method() == Method::Head {
                self.response.strip_body();
            }

            self.write_bytes(stream, self.response.buffer())?;

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }
}

/// Converts a blocking-I/O failure into the [`ErrorKind`] the rest of the
/// connection driver reasons about. `TimedOut`/`WouldBlock` comes from
/// `SO_RCVTIMEO`/`SO_SNDTIMEO` expiring mid-request; the reset/broken-pipe
/// family means the peer is already gone.
pub(crate) fn classify_io_error(err: io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::SocketTimeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ErrorKind::ClientAbort,
        io::ErrorKind::UnexpectedEof => ErrorKind::UnexpectedEof,
        _ => ErrorKind::from(err),
    }
}

/// Runs an I/O error raised inside a [`ByteChunk`] sink write back through
/// [`classify_io_error`], so a timed-out/reset socket underneath the
/// coalescing path still reports the same `ErrorKind` it would from a
/// direct `write_all`.
fn reclassify_chunk_error(err: ErrorKind) -> ErrorKind {
    match err {
        ErrorKind::Io(e) => classify_io_error(e.0),
        other => other,
    }
}

/// `send_error`'s signature predates `ErrorKind` and still returns
/// `io::Error` to match `run`'s; this recovers the original I/O error
/// where there is one, and stringifies anything else (`BufferOverflow`
/// included, though an error response is itself too large to be realistic).
fn into_io_error(err: ErrorKind) -> io::Error {
    match err {
        ErrorKind::Io(e) => e.0,
        other => io::Error::other(other.to_string()),
    }
}

impl ConnLimits {
    /// Sends a canned error directly, with none of `HttpConnection`'s
    /// `ByteChunk` coalescing or `max_capacity` guard. Used only by the
    /// pool-overflow handler thread, which rejects connections the worker
    /// pool has no room for and never has a live `HttpConnection` (and
    /// thus no `RespLimits`) to route through; the bodies it sends are
    /// the small canned [`ErrorKind::as_http`] payloads, not handler output.
    #[inline]
    pub(crate) fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        stream.set_write_timeout(Some(self.socket_write_timeout))?;
        stream.write_all(error.as_http(version, json_errors))
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn send_error(
        &mut self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .map_err(into_io_error)
    }

    /// Writes a fully-assembled response to `stream`. Rejects with
    /// [`BufferOverflow`](ErrorKind::BufferOverflow) before touching the
    /// socket if `response` exceeds `resp_limits.max_capacity`; otherwise
    /// writes straight through when coalescing is disabled
    /// (`socket_buffer <= 500`), or through a [`ByteChunk`] bounded to
    /// `socket_buffer` that batches the write into however many
    /// `socket_buffer`-sized `write_all` calls the response needs.
    #[inline]
    pub(crate) fn write_bytes(&mut self, stream: &mut TcpStream, response: &[u8]) -> Result<(), ErrorKind> {
        if response.len() > self.resp_limits.max_capacity {
            return Err(ErrorKind::BufferOverflow);
        }

        stream
            .set_write_timeout(Some(self.conn_limits.socket_write_timeout))
            .map_err(classify_io_error)?;

        if self.resp_limits.socket_buffer <= 500 {
            return stream.write_all(response).map_err(classify_io_error);
        }

        let mut chunk = ByteChunk::new(&mut self.out_buf, self.resp_limits.socket_buffer, Some(stream));
        chunk.append(response).map_err(reclassify_chunk_error)?;
        chunk.flush().map_err(reclassify_chunk_error)
    }
}

macro_rules! is_expired {
    ($self:expr, $limits:expr) => {
        Ok(!$self.response.keep_alive
            || $self.connection.request_count >= $limits.max_requests_per_connection
            || $self.connection.created.elapsed() > $limits.connection_lifetime)
    };
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        match (self.response.version, &self.http_09_limits) {
            (Version::Http09, Some(limits)) => is_expired!(self, limits),
            (Version::Http09, None) => Err(ErrorKind::UnsupportedVersion),
            _ => is_expired!(self, self.conn_limits),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use blocking_httpd::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/blocking_httpd/blob/main/examples/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use blocking_httpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use blocking_httpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     fn filter_deep(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request) == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use blocking_httpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     fn filter_deep(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request) == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM           Worker Thread|
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_deep  ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Fast, in-memory connection validation.
    ///
    /// Runs first, on the worker thread handling the connection. Keep this
    /// cheap: anything that blocks for a meaningful amount of time belongs in
    /// [`filter_deep`](Self::filter_deep) instead, since there is no separate
    /// stage to offload it to.
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Slower connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds, still on the worker
    /// thread handling the connection - this blocks that thread for its
    /// duration, so size the worker pool accordingly if this does real work.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    fn filter_deep(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> Result<(), Handled> {
        Ok(())
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//
