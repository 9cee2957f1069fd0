use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use syncbot_core::*;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::auth;
use crate::messages::{LoginArgs, WebsocketRequest};
use crate::{FtxConfig, EXCHANGE_NAME};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Live transport: the write half plus the task draining the read half.
struct Connection {
    writer: Arc<Mutex<WsWriter>>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    /// Sent in order on every connect. A login, when present, is first.
    queue: Vec<WebsocketRequest>,
    connection: Option<Connection>,
}

#[derive(Clone)]
struct SharedState(Arc<StdMutex<StreamState>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self) -> StreamState {
        *self.lock()
    }

    fn set(&self, state: StreamState) {
        *self.lock() = state;
    }

    /// Moves to `to` only while in `from`.
    fn transition(&self, from: StreamState, to: StreamState) -> bool {
        let mut state = self.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

/// FTX websocket stream.
///
/// Subscriptions queue up before `connect` and are replayed, in order, after
/// the login request on every connect. Every inbound frame is forwarded
/// verbatim to the [`StandardStream`].
pub struct FtxStream {
    config: FtxConfig,
    public_only: AtomicBool,
    connect_attempted: AtomicBool,
    state: SharedState,
    inner: Mutex<Inner>,
    sink: StandardStream,
}

impl FtxStream {
    pub fn new(config: FtxConfig) -> Self {
        Self::with_sink(config, StandardStream::default())
    }

    /// A stream writing into an existing sink.
    pub fn with_sink(config: FtxConfig, sink: StandardStream) -> Self {
        Self {
            config,
            public_only: AtomicBool::new(false),
            connect_attempted: AtomicBool::new(false),
            state: SharedState(Arc::new(StdMutex::new(StreamState::Disconnected))),
            inner: Mutex::new(Inner::default()),
            sink,
        }
    }

    /// Requests that will be sent on the next connect, in order.
    pub async fn pending_requests(&self) -> Vec<WebsocketRequest> {
        self.inner.lock().await.queue.clone()
    }

    fn login_request(&self) -> Result<WebsocketRequest, StreamError> {
        let (key, secret) = self
            .config
            .credentials()
            .ok_or(StreamError::MissingCredentials)?;
        let time = Utc::now().timestamp_millis();
        let sign = auth::sign(secret, &auth::login_payload(time))
            .map_err(|e| StreamError::ConnectionFailed(format!("Signing failed: {}", e)))?;
        Ok(WebsocketRequest::Login {
            args: LoginArgs {
                key: key.to_string(),
                sign,
                time,
                subaccount: self.config.subaccount.clone(),
            },
        })
    }

    async fn establish(&self, inner: &mut Inner) -> Result<(), StreamError> {
        info!(url = %self.config.ws_url, "Connecting to FTX websocket");
        let (ws, _) = connect_async(self.config.ws_url.as_str())
            .await
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;
        let (write, read) = ws.split();
        let writer = Arc::new(Mutex::new(write));

        for request in &inner.queue {
            send_request(&writer, request).await?;
        }

        // Connected must reach the sink before any forwarded frame.
        self.state.set(StreamState::Connected);
        self.sink.emit(StreamEvent::Connected {
            exchange: EXCHANGE_NAME.to_string(),
        });
        let reader = tokio::spawn(read_loop(
            read,
            Arc::clone(&writer),
            self.sink.clone(),
            self.state.clone(),
            Duration::from_secs(self.config.ping_interval_secs.max(1)),
        ));
        inner.connection = Some(Connection { writer, reader });
        Ok(())
    }

    async fn send_now(&self, inner: &Inner, request: &WebsocketRequest) -> Result<(), StreamError> {
        match &inner.connection {
            Some(connection) if self.state.get() == StreamState::Connected => {
                send_request(&connection.writer, request).await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Stream for FtxStream {
    fn set_public_only(&self) {
        if self.connect_attempted.load(Ordering::Acquire) {
            warn!("set_public_only after connect is ignored");
            return;
        }
        self.public_only.store(true, Ordering::Release);
    }

    fn is_public_only(&self) -> bool {
        self.public_only.load(Ordering::Acquire)
    }

    fn state(&self) -> StreamState {
        self.state.get()
    }

    async fn connect(&self, shutdown: &Shutdown) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().await;
        match self.state.get() {
            state @ (StreamState::Connecting | StreamState::Connected | StreamState::Closed) => {
                return Err(StreamError::InvalidState(state));
            }
            _ => {}
        }
        self.connect_attempted.store(true, Ordering::Release);

        // A login is only valid for the timestamp it was signed with.
        inner.queue.retain(|r| !r.is_login());
        if !self.is_public_only() {
            info!("Subscribing to private events");
            let login = self.login_request()?;
            inner.queue.insert(0, login);
        }
        if let Some(stale) = inner.connection.take() {
            stale.reader.abort();
        }

        self.state.set(StreamState::Connecting);
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(StreamError::Cancelled),
            result = self.establish(&mut *inner) => result,
        };

        match result {
            Ok(()) => {
                info!(requests = inner.queue.len(), "Connected to FTX websocket");
                Ok(())
            }
            Err(e) => {
                if let Some(partial) = inner.connection.take() {
                    partial.reader.abort();
                }
                self.state.set(StreamState::Failed);
                warn!(error = %e, "FTX websocket connect failed");
                Err(e)
            }
        }
    }

    async fn subscribe(
        &self,
        channel: Channel,
        symbol: &str,
        _options: SubscribeOptions,
    ) -> Result<(), StreamError> {
        let request =
            WebsocketRequest::from_subscription(&SubscriptionRequest::subscribe(channel, symbol))?;
        let mut inner = self.inner.lock().await;
        if inner.queue.contains(&request) {
            debug!(?request, "Already subscribed");
            return Ok(());
        }
        inner.queue.push(request.clone());
        self.send_now(&inner, &request).await
    }

    async fn unsubscribe(&self, channel: Channel, symbol: &str) -> Result<(), StreamError> {
        let subscribe =
            WebsocketRequest::from_subscription(&SubscriptionRequest::subscribe(channel, symbol))?;
        let unsubscribe =
            WebsocketRequest::from_subscription(&SubscriptionRequest::unsubscribe(channel, symbol))?;
        let mut inner = self.inner.lock().await;
        let before = inner.queue.len();
        inner.queue.retain(|r| r != &subscribe);
        if inner.queue.len() == before {
            return Ok(());
        }
        self.send_now(&inner, &unsubscribe).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().await;
        let Some(connection) = inner.connection.take() else {
            return Ok(());
        };
        connection.reader.abort();
        if let Err(e) = connection.writer.lock().await.close().await {
            debug!(error = %e, "Websocket close handshake failed");
        }
        self.state.set(StreamState::Closed);
        self.sink.emit(StreamEvent::Disconnected {
            exchange: EXCHANGE_NAME.to_string(),
            reason: "closed".to_string(),
        });
        info!("Closed FTX websocket");
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.sink.subscribe()
    }
}

async fn send_request(writer: &Mutex<WsWriter>, request: &WebsocketRequest) -> Result<(), StreamError> {
    let text =
        serde_json::to_string(request).map_err(|e| StreamError::SendFailed(e.to_string()))?;
    writer
        .lock()
        .await
        .send(Message::Text(text))
        .await
        .map_err(|e| StreamError::SendFailed(e.to_string()))
}

async fn read_loop(
    mut read: WsReader,
    writer: Arc<Mutex<WsWriter>>,
    sink: StandardStream,
    state: SharedState,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick.
    ping.tick().await;

    let reason = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => sink.emit(StreamEvent::Message {
                    exchange: EXCHANGE_NAME.to_string(),
                    payload: text,
                }),
                Some(Ok(Message::Binary(bytes))) => sink.emit(StreamEvent::Message {
                    exchange: EXCHANGE_NAME.to_string(),
                    payload: String::from_utf8_lossy(&bytes).into_owned(),
                }),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = writer.lock().await.send(Message::Pong(data)).await {
                        break e.to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
            _ = ping.tick() => {
                if let Err(e) = send_request(&writer, &WebsocketRequest::Ping).await {
                    break e.to_string();
                }
            }
        }
    };

    if state.transition(StreamState::Connected, StreamState::Disconnected) {
        warn!(%reason, "FTX websocket disconnected");
        sink.emit(StreamEvent::Disconnected {
            exchange: EXCHANGE_NAME.to_string(),
            reason,
        });
    }
}
