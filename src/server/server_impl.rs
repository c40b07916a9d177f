use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    limits::{ConnLimits, Http09Limits, ReqLimits, RespLimits, ServerLimits},
    server::connection::{ConnectionData, HttpConnection},
    ConnectionFilter, Version,
};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use socket2::{Domain, Socket, Type};
use std::{
    marker::{PhantomData, Send, Sync},
    net::{IpAddr, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use blocking_httpd::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use blocking_httpd::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     fn handle(&self, data: &mut State, req: &Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// Runs on the worker thread that owns the connection: blocking here
    /// blocks that connection (and only that connection) until it returns.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating whether the request was fully processed or
    /// requires further handling by other middleware.
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(&self, connection_data: &mut S, request: &Request, response: &mut Response) -> Handled;
}

/// An HTTP server that processes incoming connections and requests.
///
/// The server uses a pre-allocated connection pool for maximum performance
/// and implements graceful connection handling with configurable limits.
///
/// # Examples
///
/// ```no_run
/// use blocking_httpd::{Server, Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// fn main() {
///     Server::builder()
///         .bind("127.0.0.1", 8080)
///         .handler(MyHandler)
///         .build()
///         .launch()
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_tx: Sender<(TcpStream, SocketAddr)>,
    overflow_tx: Sender<(TcpStream, SocketAddr)>,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::Server;
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// ```
    #[inline]
    pub fn builder<H, S>() -> ServerBuilder<H, S, ()>
    where
        H: Handler<S>,
        S: ConnectionData,
    {
        ServerBuilder {
            handler: None,
            connection_filter: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
            http_09_limits: None,
        }
    }

    /// Returns the address the listening socket is actually bound to.
    ///
    /// Mainly useful after binding to port `0`, where the OS picks an
    /// ephemeral port that isn't known until the socket exists.
    #[inline]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts the server and begins accepting incoming connections.
    ///
    /// Blocks the calling thread for as long as the process runs. If
    /// [`acceptor_thread_count`](ServerLimits::acceptor_thread_count) is
    /// greater than one, the extra acceptor threads are spawned first and
    /// the calling thread runs the last one itself, so `launch` never
    /// returns a thread handle to join - there is nothing left to wait for.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::Server;
    ///
    /// Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch()
    /// ```
    #[inline]
    pub fn launch(self) {
        let extra_acceptors = self.server_limits.acceptor_thread_count.saturating_sub(1);

        for _ in 0..extra_acceptors {
            let listener = self
                .listener
                .try_clone()
                .expect("failed to clone listening socket for an extra acceptor thread");
            let stream_tx = self.stream_tx.clone();
            let overflow_tx = self.overflow_tx.clone();
            let server_limits = self.server_limits.clone();

            thread::spawn(move || {
                Self::accept_loop(&listener, &stream_tx, &overflow_tx, &server_limits)
            });
        }

        Self::accept_loop(
            &self.listener,
            &self.stream_tx,
            &self.overflow_tx,
            &self.server_limits,
        );
    }

    fn accept_loop(
        listener: &TcpListener,
        stream_tx: &Sender<(TcpStream, SocketAddr)>,
        overflow_tx: &Sender<(TcpStream, SocketAddr)>,
        server_limits: &ServerLimits,
    ) {
        loop {
            let (stream, addr) = match listener.accept() {
                Ok(value) => value,
                Err(error) => {
                    log::warn!("accept failed: {error}");
                    continue;
                }
            };

            let stream = Self::configure_stream(stream, server_limits);

            match stream_tx.try_send((stream, addr)) {
                Ok(()) => {}
                Err(TrySendError::Full(value)) => {
                    if overflow_tx.try_send(value).is_err() {
                        log::warn!("dropping connection from {addr}: overload queue is full");
                    }
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn configure_stream(stream: TcpStream, limits: &ServerLimits) -> TcpStream {
        let socket = Socket::from(stream);

        if let Err(error) = socket.set_nodelay(limits.tcp_nodelay) {
            log::warn!("failed to set TCP_NODELAY: {error}");
        }
        if let Some(linger) = limits.so_linger {
            if let Err(error) = socket.set_linger(Some(linger)) {
                log::warn!("failed to set SO_LINGER: {error}");
            }
        }

        socket.into()
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// # Protocol Support
///
/// - `HTTP/1.X` (HTTP/1.1 or HTTP/1.1): Always enabled
/// - [`HTTP/0.9+`](crate::limits::Http09Limits): Optional,
///   enabled by setting [`http_09_limits`](Self::http_09_limits)
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
    http_09_limits: Option<Http09Limits>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the address and port the listening socket will bind to.
    ///
    /// Equivalent to setting [`ServerLimits::address`] and
    /// [`ServerLimits::port`] directly; omitting this call keeps their
    /// defaults (`0.0.0.0:8080`).
    ///
    /// # Panics
    ///
    /// Panics if `address` does not parse as an IPv4 or IPv6 address.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::Server;
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// ```
    #[inline]
    #[track_caller]
    pub fn bind(mut self, address: &str, port: u16) -> Self {
        let address: IpAddr = address
            .parse()
            .expect("`bind` address must be a valid IP address");

        let limits = self.server_limits.get_or_insert_with(ServerLimits::default);
        limits.address = address;
        limits.port = port;

        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use blocking_httpd::{Server, Handler, Request, Response, Handled, StatusCode};
    ///
    /// struct MyStruct;
    ///
    /// impl Handler for MyStruct {
    ///     fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
    ///         resp.status(StatusCode::Ok).body("Hello World!")
    ///     }
    /// }
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct)
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use std::net::SocketAddr;
    /// use blocking_httpd::{ConnectionFilter, Server, Response, Handled, StatusCode};
    ///
    /// struct MyConnFilter {
    ///     blacklist: Vec<SocketAddr>
    /// }
    ///
    /// impl ConnectionFilter for MyConnFilter {
    ///     fn filter(
    ///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
    ///     ) -> Result<(), Handled> {
    ///         if self.blacklist.contains(&client_addr) {
    ///             Err(err_resp
    ///                 .status(StatusCode::Forbidden)
    ///                 .body("Your IP is permanently banned"))
    ///         } else {
    ///             Ok(())
    ///         }
    ///     }
    /// }
    ///
    /// let filter = MyConnFilter {
    ///     blacklist: vec![
    ///         "192.0.2.1:0".parse().unwrap(),
    ///         "198.51.100.1:0".parse().unwrap(),
    ///         "203.0.113.1:0".parse().unwrap(),
    ///         "10.0.0.1:0".parse().unwrap(),
    ///     ]
    /// };
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .conn_filter(filter)
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            handler: self.handler,
            connection_filter: Arc::new(filter),
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
            http_09_limits: self.http_09_limits,
        }
    }

    /// Configures binding, worker-pool sizing, and overload behavior.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::{Server, limits::ServerLimits};
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         max_threads: 500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        let (address, port) = self
            .server_limits
            .as_ref()
            .map(|current| (current.address, current.port))
            .unwrap_or((limits.address, limits.port));

        self.server_limits = Some(ServerLimits {
            address,
            port,
            ..limits
        });
        self
    }

    /// Configures connection-level timeouts and keep-alive behavior.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::{Server, limits::ConnLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         connection_lifetime: Duration::from_secs(200),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Enables and configures [`HTTP/0.9+`](crate::limits::Http09Limits) protocol support.
    ///
    /// # Note
    ///
    /// Omitting this call will completely disable HTTP/0.9+ support. The server
    /// will reject any HTTP/0.9+ requests, returning an error to the client.
    ///
    /// # Examples
    ///
    /// Enabling [`Http09Limits`]:
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::{Server, limits::Http09Limits};
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .http_09_limits(Http09Limits::default())
    ///     .build();
    /// ```
    /// Change [`Http09Limits`]:
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::{Server, limits::Http09Limits};
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .http_09_limits(Http09Limits {
    ///         // Your changes
    ///         max_requests_per_connection: 1000,
    ///         ..Http09Limits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn http_09_limits(mut self, limits: Http09Limits) -> Self {
        self.http_09_limits = Some(limits);
        self
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::{Server, limits::ReqLimits};
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .request_limits(ReqLimits {
    ///         // Your changes
    ///         url_size: 1024,
    ///         url_query_parts: 32,
    ///         url_parts: 20,
    ///         ..ReqLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::{Server, limits::RespLimits};
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .response_limits(RespLimits {
    ///         // Your changes
    ///         default_capacity: 1024,
    ///         max_capacity: 4096,
    ///         ..RespLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder, binds the listening socket, and constructs a
    /// [`Server`] instance. Spawns the worker thread pool and the
    /// queue-overflow handler thread(s) immediately; none of them do
    /// anything until [`launch`](Server::launch) starts accepting.
    ///
    /// # Panics
    ///
    /// - The `handler` method was not called.
    /// - Binding or listening on the configured address fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # blocking_httpd::impt_default_handler!{ MyStruct }
    /// use blocking_httpd::Server;
    ///
    /// let server = Server::builder()
    ///     .bind("127.0.0.1", 8080)
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// ```
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (handler, filter, limits) = self.get_all_parts();
        let server_limits = limits.0.clone();

        let listener = Self::bind_listener(&server_limits);

        let pending = server_limits.max_pending_connections.max(1);
        let (stream_tx, stream_rx) = bounded(pending);
        let (overflow_tx, overflow_rx) = bounded(pending);

        let worker_count = match server_limits.max_connections {
            0 => server_limits.max_threads,
            n => n,
        };
        for _ in 0..worker_count {
            Self::spawn_worker(&stream_rx, &limits, &filter, &handler);
        }

        if server_limits.count_503_handlers != 0 {
            for _ in 0..server_limits.count_503_handlers {
                Self::spawn_alarmist(&overflow_rx, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&overflow_rx);
        }

        Server {
            listener,
            stream_tx,
            overflow_tx,
            server_limits,
        }
    }

    fn bind_listener(limits: &ServerLimits) -> TcpListener {
        let domain = match limits.address {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };

        let socket =
            Socket::new(domain, Type::STREAM, None).expect("failed to create listening socket");
        socket
            .set_reuse_address(true)
            .expect("failed to set SO_REUSEADDR on listening socket");
        socket
            .bind(&SocketAddr::new(limits.address, limits.port).into())
            .expect("failed to bind listening socket");
        socket
            .listen(limits.backlog)
            .expect("failed to listen on bound socket");

        socket.into()
    }

    fn spawn_worker(
        rx: &Receiver<(TcpStream, SocketAddr)>,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
    ) {
        let rx = rx.clone();
        let filter = filter.clone();
        let mut conn = HttpConnection::new(handler.clone(), limits.clone());

        thread::spawn(move || {
            while let Ok((mut stream, addr)) = rx.recv() {
                let Ok(local_addr) = stream.local_addr() else {
                    continue;
                };

                if filter.filter(addr, local_addr, &mut conn.response).is_err()
                    || filter
                        .filter_deep(addr, local_addr, &mut conn.response)
                        .is_err()
                {
                    let _ = conn.write_bytes(&mut stream, conn.response.buffer());

                    conn.response.reset(&conn.resp_limits);
                    continue;
                }

                if let Err(error) = conn.run(&mut stream) {
                    log::debug!("connection from {addr} closed: {error}");
                }
            }
        });
    }

    fn spawn_alarmist(rx: &Receiver<(TcpStream, SocketAddr)>, limits: &AllLimits) {
        let rx = rx.clone();
        let (server_limits, conn_limits, ..) = limits.clone();

        thread::spawn(move || {
            while let Ok((mut stream, _)) = rx.recv() {
                let _ = conn_limits.send_error(
                    &mut stream,
                    ErrorKind::ServiceUnavailable,
                    Version::Http11,
                    server_limits.json_errors,
                );
            }
        });
    }

    fn spawn_quiet_alarmist(rx: &Receiver<(TcpStream, SocketAddr)>) {
        let rx = rx.clone();

        thread::spawn(move || {
            while let Ok((stream, _)) = rx.recv() {
                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (Arc<H>, Arc<F>, AllLimits) {
        (
            self.handler
                .expect("The `handler` method must be called to create"),
            self.connection_filter,
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.http_09_limits.clone(),
                self.request_limits
                    .clone()
                    .unwrap_or_default()
                    .precalculate(),
                self.response_limits.clone().unwrap_or_default(),
            ),
        )
    }
}

pub(crate) type AllLimits = (
    ServerLimits,
    ConnLimits,
    Option<Http09Limits>,
    ReqLimits,
    RespLimits,
);
