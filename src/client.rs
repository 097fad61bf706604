//! Adafruit IO client facade
//!
//! [`AdafruitMqttClient`] holds the account configuration, maps feed keys to
//! topics and forwards every operation to a transport created by
//! [`AdafruitMqttClient::init_client`]. Until then, connect, disconnect,
//! publish, subscribe and unsubscribe fail with [`ClientError::NotInitialized`].
//!
//! ```rust,no_run
//! use adafruit_io_mqtt::{AdafruitMqttClient, ConnectionMode};
//!
//! # async fn run() -> Result<(), adafruit_io_mqtt::ClientError> {
//! let mut client = AdafruitMqttClient::new("alice", "aio_key", None);
//! client.on_message_received(|message| {
//!     println!("{} = {:?}", message.topic, message.payload_str());
//! });
//!
//! client.init_client(ConnectionMode::Tcp, true)?;
//! client.connect().await?;
//! client.subscribe_feed("temperature").await?;
//! client.publish_feed("temperature", "21.5").await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{resolve_client_id, ClientConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::{EventDispatcher, ListenerHandle};
use crate::models::{
    ConnectedEventArgs, ConnectionMode, DisconnectedEventArgs, PublishResult,
    ReceivedMessageEventArgs, SubscribeResult, UnsubscribeResult,
};
use crate::topics::TopicBuilder;
use crate::transport::mqtt::RumqttcTransportFactory;
use crate::transport::{ConnectionOptions, Transport, TransportFactory};
use rumqttc::QoS;
use tracing::{debug, info};

/// MQTT client for one Adafruit IO account
#[derive(Debug)]
pub struct AdafruitMqttClient<F: TransportFactory = RumqttcTransportFactory> {
    config: ClientConfig,
    client_id: String,
    factory: F,
    events: EventDispatcher,
    options: Option<ConnectionOptions>,
    transport: Option<F::Transport>,
}

impl AdafruitMqttClient<RumqttcTransportFactory> {
    /// Client for `io.adafruit.com` on the default ports
    ///
    /// A random client id is generated when `client_id` is `None` or blank.
    pub fn new(username: &str, key: &str, client_id: Option<&str>) -> Self {
        let mut config = ClientConfig::new(username, key);
        config.connection.client_id = client_id.map(str::to_string);
        Self::build(config, RumqttcTransportFactory)
    }

    /// Client for a custom broker host on the default ports
    pub fn with_host(host: &str, username: &str, key: &str, client_id: Option<&str>) -> Self {
        let mut config = ClientConfig::new(username, key);
        config.connection.host = host.to_string();
        config.connection.client_id = client_id.map(str::to_string);
        Self::build(config, RumqttcTransportFactory)
    }

    /// Client for a custom broker host and ports
    pub fn with_ports(
        host: &str,
        secure_port: u16,
        insecure_port: u16,
        username: &str,
        key: &str,
        client_id: Option<&str>,
    ) -> Self {
        let mut config = ClientConfig::new(username, key);
        config.connection.host = host.to_string();
        config.connection.secure_port = secure_port;
        config.connection.insecure_port = insecure_port;
        config.connection.client_id = client_id.map(str::to_string);
        Self::build(config, RumqttcTransportFactory)
    }

    /// Client from a loaded configuration
    pub fn from_config(config: ClientConfig) -> ClientResult<Self> {
        Self::with_factory(config, RumqttcTransportFactory)
    }
}

impl<F: TransportFactory> AdafruitMqttClient<F> {
    /// Client whose transports come from `factory`
    pub fn with_factory(config: ClientConfig, factory: F) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self::build(config, factory))
    }

    fn build(config: ClientConfig, factory: F) -> Self {
        let client_id = resolve_client_id(config.connection.client_id.as_deref());
        debug!(%client_id, username = %config.username(), "Created Adafruit IO client");
        Self {
            config,
            client_id,
            factory,
            events: EventDispatcher::new(),
            options: None,
            transport: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> &str {
        self.config.username()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Options of the current transport, `None` before `init_client`
    pub fn connection_options(&self) -> Option<&ConnectionOptions> {
        self.options.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.is_connected())
    }

    /// `"<username>/feeds/<feed_key>"`
    pub fn topic_for_feed(&self, feed_key: &str) -> String {
        TopicBuilder::build_feed_topic(self.config.username(), feed_key)
    }

    /// Build connection options and create the transport
    ///
    /// `secure` selects the secure port and attaches TLS. `mode` selects a TCP
    /// connection or a WebSocket URL. Calling this again replaces the
    /// transport; the previous one is dropped, which stops its event loop.
    pub fn init_client(&mut self, mode: ConnectionMode, secure: bool) -> ClientResult<()> {
        let options = ConnectionOptions::build(&self.config, &self.client_id, mode, secure)
            .map_err(ClientError::transport)?;
        let transport = self
            .factory
            .create(options.clone(), self.events.clone())
            .map_err(ClientError::transport)?;

        if self.transport.replace(transport).is_some() {
            info!(client_id = %self.client_id, "Replaced existing transport");
        }
        info!(
            client_id = %self.client_id,
            mode = ?mode,
            secure,
            "Client initialized"
        );
        self.options = Some(options);
        Ok(())
    }

    /// `init_client` with the mode and security flag from the configuration
    pub fn init_from_config(&mut self) -> ClientResult<()> {
        let (mode, secure) = (self.config.connection.mode, self.config.connection.secure);
        self.init_client(mode, secure)
    }

    fn transport(&self) -> ClientResult<&F::Transport> {
        self.transport.as_ref().ok_or(ClientError::NotInitialized)
    }

    fn transport_mut(&mut self) -> ClientResult<&mut F::Transport> {
        self.transport.as_mut().ok_or(ClientError::NotInitialized)
    }

    #[tracing::instrument(name = "connect", skip(self), fields(client_id = %self.client_id))]
    pub async fn connect(&mut self) -> ClientResult<()> {
        self.transport_mut()?
            .connect()
            .await
            .map_err(ClientError::transport)
    }

    #[tracing::instrument(name = "disconnect", skip(self), fields(client_id = %self.client_id))]
    pub async fn disconnect(&mut self) -> ClientResult<()> {
        self.transport_mut()?
            .disconnect()
            .await
            .map_err(ClientError::transport)
    }

    /// Publish `value` to a feed with the configured QoS
    pub async fn publish_feed(
        &self,
        feed_key: &str,
        value: impl Into<Vec<u8>>,
    ) -> ClientResult<PublishResult> {
        let topic = self.topic_for_feed(feed_key);
        self.publish_topic(&topic, value).await
    }

    /// Publish `value` to a raw topic with the configured QoS
    pub async fn publish_topic(
        &self,
        topic: &str,
        value: impl Into<Vec<u8>>,
    ) -> ClientResult<PublishResult> {
        self.publish_topic_with(topic, value, self.config.qos(), false)
            .await
    }

    #[tracing::instrument(name = "publish", skip(self, value), fields(client_id = %self.client_id))]
    pub async fn publish_topic_with(
        &self,
        topic: &str,
        value: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<PublishResult> {
        self.transport()?
            .publish(topic, value.into(), qos, retain)
            .await
            .map_err(ClientError::transport)
    }

    pub async fn subscribe_feed(&self, feed_key: &str) -> ClientResult<SubscribeResult> {
        let topic = self.topic_for_feed(feed_key);
        self.subscribe_topic(&topic).await
    }

    pub async fn subscribe_topic(&self, topic: &str) -> ClientResult<SubscribeResult> {
        self.subscribe_topic_with(topic, self.config.qos()).await
    }

    #[tracing::instrument(name = "subscribe", skip(self), fields(client_id = %self.client_id))]
    pub async fn subscribe_topic_with(&self, topic: &str, qos: QoS) -> ClientResult<SubscribeResult> {
        self.transport()?
            .subscribe(topic, qos)
            .await
            .map_err(ClientError::transport)
    }

    /// Unsubscribe from feeds; keys are translated in order, duplicates kept
    pub async fn unsubscribe_feeds<S: AsRef<str>>(
        &self,
        feed_keys: &[S],
    ) -> ClientResult<UnsubscribeResult> {
        let topics = TopicBuilder::build_feed_topics(self.config.username(), feed_keys);
        self.unsubscribe_topics(&topics).await
    }

    pub async fn unsubscribe_topics<S: AsRef<str>>(
        &self,
        topics: &[S],
    ) -> ClientResult<UnsubscribeResult> {
        let topics: Vec<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();
        let transport = self.transport()?;
        debug!(client_id = %self.client_id, ?topics, "Unsubscribing");
        transport
            .unsubscribe(&topics)
            .await
            .map_err(ClientError::transport)
    }

    pub fn on_message_received<L>(&self, listener: L) -> ListenerHandle
    where
        L: Fn(&ReceivedMessageEventArgs) + Send + Sync + 'static,
    {
        self.events.on_message_received(listener)
    }

    pub fn on_connected<L>(&self, listener: L) -> ListenerHandle
    where
        L: Fn(&ConnectedEventArgs) + Send + Sync + 'static,
    {
        self.events.on_connected(listener)
    }

    pub fn on_disconnected<L>(&self, listener: L) -> ListenerHandle
    where
        L: Fn(&DisconnectedEventArgs) + Send + Sync + 'static,
    {
        self.events.on_disconnected(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.events.remove_listener(handle)
    }

    /// Shared listener registry, for wiring listeners from elsewhere
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }
}
