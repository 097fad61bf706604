//! Impure I/O operations for MQTT client
//!
//! Owns the `rumqttc` client and event loop. The event loop runs in its own
//! task, routes every event through [`MessageHandler`], keeps the connection
//! state current, raises listener events and resolves pending acknowledgements.

use super::acks::PendingAcks;
use super::connection::{ConnectionOptions, ConnectionState, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::events::EventDispatcher;
use crate::models::{
    ConnectedEventArgs, DisconnectedEventArgs, PublishResult, SubscribeResult, UnsubscribeResult,
};
use crate::transport::{Transport, TransportFactory};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, ConnectionError, EventLoop, QoS};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the event loop task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type SharedPending = Arc<StdMutex<PendingAcks>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn lock_pending(pending: &StdMutex<PendingAcks>) -> MutexGuard<'_, PendingAcks> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State the event-loop task shares with the transport
struct EventLoopContext {
    client_id: String,
    events: EventDispatcher,
    pending: SharedPending,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
}

/// `Transport` implementation on top of `rumqttc`
pub struct RumqttcTransport {
    options: ConnectionOptions,
    client: Arc<Mutex<AsyncClient>>,
    // Only `Send`; the mutex makes the transport `Sync` until the task takes it
    event_loop: Option<Mutex<EventLoop>>,
    events: EventDispatcher,
    pending: SharedPending,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl RumqttcTransport {
    pub fn new(options: ConnectionOptions, events: EventDispatcher) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(&options)?;

        Ok(Self {
            options,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Mutex::new(event_loop)),
            events,
            pending: Arc::new(StdMutex::new(PendingAcks::new())),
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            event_loop_handle: None,
        })
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Helper method to create a new client and event loop
    /// Used for the first connection and for connecting again after disconnect
    fn create_connection(options: &ConnectionOptions) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = options.to_mqtt_options()?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "Event loop stopped before ConnAck".into(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone().into()));
                    }
                    ConnectionState::Refused(ref reason) => {
                        return Err(MqttError::ConnectionRefused(reason.clone()));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionTimeout(timeout)),
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnect delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn run_event_loop(
        ctx: EventLoopContext,
        mut event_loop: EventLoop,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(client_id = %ctx.client_id, "Starting MQTT event loop");
        let mut was_connected = false;
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(
                                route,
                                &ctx,
                                &mut was_connected,
                                &mut reconnect_attempts,
                            ) {
                                break;
                            }
                        }
                        Err(e) => {
                            if !Self::handle_event_loop_error(
                                e,
                                &ctx,
                                &mut was_connected,
                                &mut reconnect_attempts,
                                shutdown_rx.clone(),
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }

        lock_pending(&ctx.pending).fail_all();
        info!(client_id = %ctx.client_id, "MQTT event loop stopped");
    }

    /// Process routed MQTT event
    /// Returns true to continue loop, false to break
    fn process_event_route(
        route: EventRoute,
        ctx: &EventLoopContext,
        was_connected: &mut bool,
        reconnect_attempts: &mut u32,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                let _ = ctx.state_tx.send(ConnectionState::Connected);
                *was_connected = true;
                *reconnect_attempts = 0;
                info!(client_id = %ctx.client_id, session_present, "Connected to MQTT broker");
                ctx.events
                    .emit_connected(&ConnectedEventArgs { session_present });
            }
            EventRoute::ConnectionRefused(reason) => {
                Self::handle_refusal(reason, ctx, was_connected);
                return false;
            }
            EventRoute::MessageReceived(args) => {
                debug!(target: "mqtt_transport", topic = %args.topic, bytes = args.payload.len(), "Received MQTT message");
                ctx.events.emit_message_received(&args);
            }
            EventRoute::PublishSent { packet_id } => {
                lock_pending(&ctx.pending).publish_sent(packet_id);
            }
            EventRoute::PublishParked { packet_id } => {
                debug!(target: "mqtt_transport", packet_id, "Publish waiting for packet id to free up");
                lock_pending(&ctx.pending).publish_parked(packet_id);
            }
            EventRoute::PublishAcknowledged { packet_id } => {
                if !lock_pending(&ctx.pending).publish_acknowledged(packet_id) {
                    debug!(target: "mqtt_transport", packet_id, "Publish ack with no waiter");
                }
            }
            EventRoute::PublishReceived { packet_id } => {
                lock_pending(&ctx.pending).publish_received(packet_id);
            }
            EventRoute::PublishCompleted { packet_id } => {
                if !lock_pending(&ctx.pending).publish_completed(packet_id) {
                    debug!(target: "mqtt_transport", packet_id, "Publish completion with no waiter");
                }
            }
            EventRoute::SubscribeSent { packet_id } => {
                lock_pending(&ctx.pending).subscribe_sent(packet_id);
            }
            EventRoute::SubscriptionAcknowledged {
                packet_id,
                return_codes,
            } => {
                debug!(target: "mqtt_transport", packet_id, ?return_codes, "Subscription acknowledged");
                lock_pending(&ctx.pending).subscription_acknowledged(packet_id, &return_codes);
            }
            EventRoute::UnsubscribeSent { packet_id } => {
                lock_pending(&ctx.pending).unsubscribe_sent(packet_id);
            }
            EventRoute::UnsubscriptionAcknowledged { packet_id } => {
                lock_pending(&ctx.pending).unsubscription_acknowledged(packet_id);
            }
            EventRoute::DisconnectSent => {
                let reason = "Client disconnected".to_string();
                let _ = ctx.state_tx.send(ConnectionState::Disconnected(reason.clone()));
                ctx.events.emit_disconnected(&DisconnectedEventArgs {
                    reason,
                    client_was_connected: *was_connected,
                });
                *was_connected = false;
                return false;
            }
            EventRoute::Disconnected => {
                // rumqttc reports the closed socket as an error on the next poll
                warn!(client_id = %ctx.client_id, "Broker sent DISCONNECT");
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
        true
    }

    /// Handle event loop error
    /// Returns true to keep polling (rumqttc reconnects), false to break
    async fn handle_event_loop_error(
        error: ConnectionError,
        ctx: &EventLoopContext,
        was_connected: &mut bool,
        reconnect_attempts: &mut u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        let (reason, refused) = MessageHandler::describe_connection_error(&error);
        if refused {
            Self::handle_refusal(reason, ctx, was_connected);
            return false;
        }

        if *was_connected {
            error!(client_id = %ctx.client_id, %reason, "MQTT connection lost");
        } else {
            warn!(client_id = %ctx.client_id, %reason, "MQTT connection attempt failed");
        }

        lock_pending(&ctx.pending).connection_lost();
        ctx.events.emit_disconnected(&DisconnectedEventArgs {
            reason: reason.clone(),
            client_was_connected: *was_connected,
        });
        let _ = ctx.state_tx.send(ConnectionState::Disconnected(reason));
        *was_connected = false;

        if !Self::interruptible_sleep(shutdown_rx, ctx.reconnect_delay).await {
            return false;
        }

        *reconnect_attempts += 1;
        info!(
            client_id = %ctx.client_id,
            attempt = *reconnect_attempts,
            "Reconnecting to MQTT broker"
        );
        let _ = ctx
            .state_tx
            .send(ConnectionState::Reconnecting(*reconnect_attempts));
        true
    }

    /// Broker rejected the credentials or client id; retrying cannot help
    fn handle_refusal(reason: String, ctx: &EventLoopContext, was_connected: &mut bool) {
        error!(client_id = %ctx.client_id, %reason, "Broker refused connection, stopping event loop");
        ctx.events.emit_disconnected(&DisconnectedEventArgs {
            reason: reason.clone(),
            client_was_connected: *was_connected,
        });
        let _ = ctx.state_tx.send(ConnectionState::Refused(reason));
        *was_connected = false;
    }

    /// Stop the event loop task without waiting and fail whatever is pending
    fn shutdown_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        lock_pending(&self.pending).fail_all();
    }

    /// Connect to the broker and wait for CONNACK
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        if self.is_connected() {
            return Err(MqttError::AlreadyConnected);
        }
        // A previous session may still be reconnecting in the background
        self.shutdown_event_loop();

        let event_loop = match self.event_loop.take() {
            Some(event_loop) => event_loop.into_inner(),
            None => {
                let (client, event_loop) = Self::create_connection(&self.options)?;
                *self.client.lock().await = client;
                event_loop
            }
        };

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let ctx = EventLoopContext {
            client_id: self.options.client_id.clone(),
            events: self.events.clone(),
            pending: self.pending.clone(),
            state_tx,
            reconnect_delay: self.options.reconnect_delay,
        };
        let span = tracing::info_span!("mqtt_event_loop", client_id = %self.options.client_id);
        let handle = tokio::spawn(Self::run_event_loop(ctx, event_loop, shutdown_rx).instrument(span));
        self.event_loop_handle = Some(handle);

        info!(
            client_id = %self.options.client_id,
            host = %self.options.host,
            mode = ?self.options.mode(),
            tls = self.options.tls,
            "Connecting to MQTT broker"
        );

        if let Err(e) =
            Self::wait_for_connection_confirmation(state_rx, self.options.connect_timeout).await
        {
            self.shutdown_event_loop();
            if !matches!(e, MqttError::ConnectionRefused(_)) {
                if let Some(state_tx) = &self.state_tx {
                    let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// Disconnect from the broker and stop the event loop task
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(handle) = self.event_loop_handle.take() else {
            debug!("Disconnect requested but the event loop is not running");
            return Ok(());
        };

        let was_connected = self.is_connected();
        if was_connected {
            let client = self.client.lock().await;
            if let Err(e) = client.disconnect().await {
                warn!("Failed to queue DISCONNECT: {}", e);
            }
        } else if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        let abort_handle = handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {
                info!("Event loop task shut down gracefully");
            }
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!("Event loop task ended with error: {}", e);
            }
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                abort_handle.abort();
            }
            _ => {}
        }
        self.shutdown_event_loop();

        // The loop raises this itself when DISCONNECT went out
        let already_reported = matches!(
            self.connection_state(),
            Some(ConnectionState::Disconnected(_) | ConnectionState::Refused(_))
        );
        if !already_reported {
            let reason = "Client disconnected".to_string();
            if let Some(state_tx) = &self.state_tx {
                let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
            }
            if was_connected {
                self.events.emit_disconnected(&DisconnectedEventArgs {
                    reason,
                    client_was_connected: true,
                });
            }
        }

        info!(client_id = %self.options.client_id, "MQTT client disconnected");
        Ok(())
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self
            .connection_state()
            .unwrap_or_else(|| ConnectionState::Disconnected("Never connected".to_string()));
        if !current_state.is_connected() {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Register a waiter and hand its request to the client on a detached task
    ///
    /// `send` may wait for room in the bounded request channel. Running both
    /// steps on their own task under the client lock means a caller dropped
    /// at any point still leaves exactly one waiter per queued request, in
    /// request order.
    async fn enqueue<R, F, Fut>(
        &self,
        register: impl FnOnce(&mut PendingAcks) -> oneshot::Receiver<R> + Send + 'static,
        withdraw: fn(&mut PendingAcks),
        send: F,
    ) -> Result<oneshot::Receiver<R>, BoxError>
    where
        R: Send + 'static,
        F: FnOnce(AsyncClient) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let client = self.client.clone();
        let pending = self.pending.clone();
        let task = tokio::spawn(async move {
            let client = client.lock_owned().await;
            let rx = register(&mut lock_pending(&pending));
            match send(AsyncClient::clone(&client)).await {
                Ok(()) => Ok(rx),
                Err(e) => {
                    withdraw(&mut lock_pending(&pending));
                    Err(e)
                }
            }
        });

        match task.await {
            Ok(Ok(rx)) => Ok(rx),
            Ok(Err(e)) => Err(Box::new(e)),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// Wait for a registered acknowledgement; a dropped sender means the loop stopped
    async fn await_ack<R>(rx: oneshot::Receiver<R>, fallback: impl FnOnce() -> R) -> R {
        rx.await.unwrap_or_else(|_| fallback())
    }
}

#[async_trait]
impl Transport for RumqttcTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        RumqttcTransport::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        RumqttcTransport::disconnect(self).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishResult, Self::Error> {
        self.check_connection_state()?;

        let owned_topic = topic.to_string();
        let rx = self
            .enqueue(
                move |pending| pending.register_publish(qos),
                PendingAcks::withdraw_last_publish,
                move |client| async move { client.publish(owned_topic, qos, retain, payload).await },
            )
            .await
            .map_err(MqttError::PublishFailed)?;

        debug!(target: "mqtt_transport", %topic, ?qos, retain, "Publish queued");
        Ok(Self::await_ack(rx, || PublishResult::not_acknowledged(None)).await)
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<SubscribeResult, Self::Error> {
        self.check_connection_state()?;

        let topics = vec![topic.to_string()];
        let registered = topics.clone();
        let owned_topic = topic.to_string();
        let rx = self
            .enqueue(
                move |pending| pending.register_subscribe(registered),
                PendingAcks::withdraw_last_subscribe,
                move |client| async move { client.subscribe(owned_topic, qos).await },
            )
            .await
            .map_err(|e| {
                MqttError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}").into())
            })?;

        info!(%topic, ?qos, "Subscribing");
        Ok(Self::await_ack(rx, || SubscribeResult::not_acknowledged(&topics)).await)
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<UnsubscribeResult, Self::Error> {
        self.check_connection_state()?;
        if topics.is_empty() {
            return Ok(UnsubscribeResult::default());
        }

        // v3.1.1 rumqttc sends one UNSUBSCRIBE per topic
        let mut receivers = Vec::with_capacity(topics.len());
        for topic in topics {
            let registered = vec![topic.clone()];
            let owned_topic = topic.clone();
            let rx = self
                .enqueue(
                    move |pending| pending.register_unsubscribe(registered),
                    PendingAcks::withdraw_last_unsubscribe,
                    move |client| async move { client.unsubscribe(owned_topic).await },
                )
                .await
                .map_err(|e| {
                    MqttError::UnsubscriptionFailed(
                        format!("Failed to unsubscribe from {topic}: {e}").into(),
                    )
                })?;
            receivers.push((topic, rx));
        }

        info!(count = topics.len(), "Unsubscribing");
        let mut result = UnsubscribeResult::default();
        for (topic, rx) in receivers {
            let single = std::slice::from_ref(topic);
            let partial =
                Self::await_ack(rx, || UnsubscribeResult::not_acknowledged(single)).await;
            result.items.extend(partial.items);
        }
        Ok(result)
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        RumqttcTransport::connection_state(self)
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        // Signal shutdown to background tasks if they're still running
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // Abort the event loop task if it's still running
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        // Users should call disconnect() for a clean DISCONNECT
    }
}

/// Creates `RumqttcTransport`s
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcTransportFactory;

impl TransportFactory for RumqttcTransportFactory {
    type Transport = RumqttcTransport;

    fn create(
        &self,
        options: ConnectionOptions,
        events: EventDispatcher,
    ) -> Result<RumqttcTransport, MqttError> {
        RumqttcTransport::new(options, events)
    }
}
