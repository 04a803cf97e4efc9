//! The bridge transport: one UDP socket, fire-and-forget commands and a
//! broadcast of everything the bridge sends back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::command::{Envelope, OutboundCommand};
use crate::errors::Error;
use crate::event::InboundEvent;
use crate::history::{Direction, HistorySummary, MessageHistory};
use crate::router::{self, EventFilter, EventRouter, Subscription};
use crate::runtime::{self, AsyncUdpSocket, JoinHandle, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Where the bridge lives and how to authenticate with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEndpoint {
    host: String,
    port: u16,
    access_token: String,
}

impl BridgeEndpoint {
    /// Builds an endpoint, failing if any part is missing.
    ///
    /// An empty host or token and port 0 count as missing.
    ///
    /// ```
    /// use connector_bridge_rs::{BridgeEndpoint, Error};
    ///
    /// let endpoint = BridgeEndpoint::new(Some("192.168.1.20"), Some(32100), Some("token")).unwrap();
    /// assert_eq!(endpoint.address(), "192.168.1.20:32100");
    ///
    /// let err = BridgeEndpoint::new(Some("192.168.1.20"), None, Some("")).unwrap_err();
    /// assert!(matches!(err, Error::Construction { .. }));
    /// ```
    pub fn new(host: Option<&str>, port: Option<u16>, access_token: Option<&str>) -> Result<Self> {
        let host = host.filter(|h| !h.is_empty());
        let port = port.filter(|p| *p != 0);
        let access_token = access_token.filter(|t| !t.is_empty());

        match (host, port, access_token) {
            (Some(host), Some(port), Some(access_token)) => Ok(BridgeEndpoint {
                host: host.to_string(),
                port,
                access_token: access_token.to_string(),
            }),
            (host, port, access_token) => {
                let mut missing = Vec::new();
                if host.is_none() {
                    missing.push("host");
                }
                if port.is_none() {
                    missing.push("port");
                }
                if access_token.is_none() {
                    missing.push("access token");
                }
                Err(Error::construction(&missing))
            }
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// `host:port`, bracketing bare IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// What the transport does with its socket after a failed send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SendFailurePolicy {
    /// Report the error and keep the socket usable.
    #[default]
    KeepOpen,
    /// Report the error and close the transport for good.
    Close,
}

/// Construction options for a [`BridgeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Local address to bind the socket to.
    pub bind_addr: String,
    pub send_failure_policy: SendFailurePolicy,
    /// Capacity of the message history.
    pub history_size: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            bind_addr: "0.0.0.0:0".to_string(),
            send_failure_policy: SendFailurePolicy::default(),
            history_size: MessageHistory::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Diagnostics for a bridge transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeDiagnostics {
    pub endpoint: String,
    pub local_addr: Option<String>,
    pub open: bool,
    pub subscriber_count: usize,
    pub subscriber_ids: Vec<Uuid>,
    pub published_count: u64,
    pub last_msg_id: u64,
    pub history: HistorySummary,
}

/// Owns the UDP socket shared by every accessory talking to one bridge.
///
/// Commands are sent fire-and-forget with [`BridgeTransport::send_message`].
/// Replies are not correlated with requests: every datagram that parses as
/// a JSON object is published on the transport's [`EventRouter`], and
/// consumers pick out what concerns them by mac and message type.
///
/// Obtain one through a [`BridgeContext`] so there is a single socket per
/// context, or with [`BridgeTransport::connect`] when managing it directly.
pub struct BridgeTransport {
    endpoint: BridgeEndpoint,
    socket: Arc<UdpSocket>,
    router: EventRouter,
    policy: SendFailurePolicy,
    running: Arc<AtomicBool>,
    last_msg_id: AtomicU64,
    history: Arc<runtime::Mutex<MessageHistory>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    const RECV_BUFFER: usize = 65_536;
    const RECV_POLL_MS: u64 = 500;
    const RECV_ERROR_BACKOFF_MS: u64 = 100;

    /// Binds a socket and starts the receive loop.
    pub async fn connect(endpoint: BridgeEndpoint, options: BridgeOptions) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(&options.bind_addr)
            .await
            .map_err(|e| Error::socket("bind", e))?;
        let socket = Arc::new(socket);

        let router = EventRouter::new();
        let running = Arc::new(AtomicBool::new(true));
        let history = Arc::new(runtime::Mutex::new(MessageHistory::with_max_entries(
            options.history_size,
        )));

        let handle = runtime::spawn(receive_loop(
            Arc::clone(&socket),
            router.clone(),
            Arc::clone(&running),
            Arc::clone(&history),
        ));

        debug!(
            "Bridge transport bound to {:?} for {}",
            socket.local_addr().ok(),
            endpoint.address()
        );

        Ok(Arc::new(BridgeTransport {
            endpoint,
            socket,
            router,
            policy: options.send_failure_policy,
            running,
            last_msg_id: AtomicU64::new(0),
            history,
            receiver: Mutex::new(Some(handle)),
        }))
    }

    pub fn endpoint(&self) -> &BridgeEndpoint {
        &self.endpoint
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))
    }

    pub fn send_failure_policy(&self) -> SendFailurePolicy {
        self.policy
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sends one command as a single datagram.
    ///
    /// Adds `msgId` and `AccessToken` first. Resolves once the socket has
    /// taken the datagram; replies, if any, arrive through the router.
    pub async fn send_message(&self, command: OutboundCommand) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }

        let msg_id = self.next_msg_id();
        let message = Envelope {
            command: &command,
            msg_id,
            access_token: self.endpoint.access_token(),
        }
        .to_value()
        .map_err(Error::JsonDump)?;
        let bytes = serde_json::to_vec(&message).map_err(Error::JsonDump)?;

        self.history.lock().await.record(Direction::Send, &message);

        match self.socket.send_to(&bytes, &self.endpoint.address()).await {
            Ok(_) => {
                debug!(
                    "Sent {} #{} for {} to {}",
                    command.msg_type(),
                    msg_id,
                    command.mac(),
                    self.endpoint.address()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to send {} for {}: {}",
                    command.msg_type(),
                    command.mac(),
                    e
                );
                self.history.lock().await.record_error(&e.to_string());
                if self.policy == SendFailurePolicy::Close {
                    self.close();
                }
                Err(Error::socket("send", e))
            }
        }
    }

    /// Sends a `ReadDevice` command.
    pub async fn read_device(&self, mac: &str, device_type: &str) -> Result<()> {
        self.send_message(OutboundCommand::read_device(mac, device_type))
            .await
    }

    /// Subscribes to events matching `filter`, see [`EventRouter::subscribe`].
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.router.subscribe(filter, handler)
    }

    /// Stops the receive loop and refuses further sends.
    pub fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Closing bridge transport for {}", self.endpoint.address());
        }
        // The loop notices the flag within one receive poll.
        router::lock(&self.receiver).take();
    }

    pub async fn history(&self) -> MessageHistory {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    pub async fn diagnostics(&self) -> BridgeDiagnostics {
        BridgeDiagnostics {
            endpoint: self.endpoint.address(),
            local_addr: self.socket.local_addr().ok().map(|a| a.to_string()),
            open: self.is_open(),
            subscriber_count: self.router.subscriber_count(),
            subscriber_ids: self.router.subscriber_ids(),
            published_count: self.router.published_count(),
            last_msg_id: self.last_msg_id.load(Ordering::SeqCst),
            history: self.history.lock().await.summary(),
        }
    }

    /// Current time in milliseconds, bumped past the previous id so ids
    /// stay strictly increasing even within one millisecond.
    fn next_msg_id(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let next = |last: u64| now.max(last + 1);
        match self
            .last_msg_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => next(last),
        }
    }
}

impl std::fmt::Debug for BridgeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeTransport")
            .field("endpoint", &self.endpoint.address())
            .field("open", &self.is_open())
            .field("router", &self.router)
            .finish()
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    router: EventRouter,
    running: Arc<AtomicBool>,
    history: Arc<runtime::Mutex<MessageHistory>>,
) {
    let mut buffer = vec![0u8; BridgeTransport::RECV_BUFFER];
    let poll = Duration::from_millis(BridgeTransport::RECV_POLL_MS);

    while running.load(Ordering::SeqCst) {
        let (size, addr) = match runtime::timeout(poll, socket.recv_from(&mut buffer)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                error!("Bridge socket receive error: {}", e);
                history.lock().await.record_error(&e.to_string());
                runtime::sleep(Duration::from_millis(BridgeTransport::RECV_ERROR_BACKOFF_MS)).await;
                continue;
            }
            Err(_) => continue,
        };

        match InboundEvent::parse(&buffer[..size]) {
            Ok(event) => {
                history
                    .lock()
                    .await
                    .record(Direction::Receive, &Value::Object(event.fields().clone()));
                debug!(
                    "Received {:?} for {:?} from {}",
                    event.msg_type(),
                    event.mac(),
                    addr
                );
                router.publish(&event);
            }
            Err(e) => {
                warn!("Dropping malformed datagram from {}: {}", addr, e);
                history.lock().await.record_dropped(&e.to_string());
            }
        }
    }

    debug!("Bridge receive loop stopped");
}

/// Holds at most one [`BridgeTransport`].
///
/// The first [`BridgeContext::acquire`] needs the full endpoint and creates
/// the transport; every later call ignores its arguments and returns the
/// same instance. Use [`BridgeContext::global`] for the process-wide
/// context, or create one and pass it to whatever needs the bridge.
pub struct BridgeContext {
    slot: runtime::Mutex<Option<Arc<BridgeTransport>>>,
    options: BridgeOptions,
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeContext {
    pub fn new() -> Self {
        Self::with_options(BridgeOptions::default())
    }

    /// A context whose transport, once created, uses `options`.
    pub fn with_options(options: BridgeOptions) -> Self {
        BridgeContext {
            slot: runtime::Mutex::new(None),
            options,
        }
    }

    /// The process-wide context.
    pub fn global() -> &'static BridgeContext {
        static GLOBAL: OnceLock<BridgeContext> = OnceLock::new();
        GLOBAL.get_or_init(BridgeContext::new)
    }

    /// Options a transport created by [`BridgeContext::acquire`] gets.
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Returns the context's transport, creating it on first use.
    pub async fn acquire(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        access_token: Option<&str>,
    ) -> Result<Arc<BridgeTransport>> {
        self.acquire_with(host, port, access_token, self.options.clone())
            .await
    }

    /// Like [`BridgeContext::acquire`], but creates the transport with
    /// `options` instead of the context's own. Ignored once it exists.
    pub async fn acquire_with(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        access_token: Option<&str>,
        options: BridgeOptions,
    ) -> Result<Arc<BridgeTransport>> {
        let mut slot = self.slot.lock().await;
        if let Some(transport) = slot.as_ref() {
            return Ok(Arc::clone(transport));
        }

        let endpoint = BridgeEndpoint::new(host, port, access_token)?;
        let transport = BridgeTransport::connect(endpoint, options).await?;
        *slot = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// Returns the existing transport, failing if none was created yet.
    pub async fn get(&self) -> Result<Arc<BridgeTransport>> {
        self.acquire(None, None, None).await
    }

    /// The transport, if one was created.
    pub async fn current(&self) -> Option<Arc<BridgeTransport>> {
        self.slot.lock().await.clone()
    }
}
