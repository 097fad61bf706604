//! Mock implementations for testing
//!
//! [`MockTransportFactory`] hands out [`MockTransport`]s that record every
//! call in a shared [`MockRecorder`] instead of talking to a broker. The
//! recorder can also inject inbound messages and connection loss through the
//! client's event dispatcher.

use crate::events::EventDispatcher;
use crate::models::{
    ConnectedEventArgs, DisconnectedEventArgs, PublishResult, ReceivedMessageEventArgs,
    SubscribeResult, UnsubscribeResult,
};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{ConnectionOptions, Transport, TransportFactory};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{QoS, SubscribeReasonCode};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One call made on a mock transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Disconnect,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topics: Vec<String>,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared view of everything the mock transports did
#[derive(Debug, Clone, Default)]
pub struct MockRecorder {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    created: Arc<Mutex<Vec<ConnectionOptions>>>,
    events: Arc<Mutex<Option<EventDispatcher>>>,
    state: Arc<Mutex<Option<ConnectionState>>>,
    next_packet_id: Arc<AtomicU16>,
}

impl MockRecorder {
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    /// Options passed to the factory, one entry per `init_client`
    pub fn created_options(&self) -> Vec<ConnectionOptions> {
        lock(&self.created).clone()
    }

    /// Topic lists of every unsubscribe call, in call order
    pub fn unsubscribed_topics(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Unsubscribe { topics } => Some(topics),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, payload, .. } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_history(&self) {
        lock(&self.calls).clear();
    }

    /// Deliver an inbound message to the client's listeners
    ///
    /// Returns false when no transport has been created yet.
    pub fn simulate_message(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let Some(events) = lock(&self.events).clone() else {
            return false;
        };
        events.emit_message_received(&ReceivedMessageEventArgs {
            topic: topic.to_string(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        });
        true
    }

    /// Drop the mock connection as if the broker went away
    pub fn simulate_connection_lost(&self, reason: &str) -> bool {
        let Some(events) = lock(&self.events).clone() else {
            return false;
        };
        let was_connected = {
            let mut state = lock(&self.state);
            let was_connected = matches!(*state, Some(ConnectionState::Connected));
            *state = Some(ConnectionState::Disconnected(reason.to_string()));
            was_connected
        };
        events.emit_disconnected(&DisconnectedEventArgs {
            reason: reason.to_string(),
            client_was_connected: was_connected,
        });
        true
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }

    fn state(&self) -> Option<ConnectionState> {
        lock(&self.state).clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = Some(state);
    }

    fn next_packet_id(&self) -> u16 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// Factory producing recording transports
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    recorder: MockRecorder,
    pub should_fail: bool,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transports whose every operation fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn recorder(&self) -> MockRecorder {
        self.recorder.clone()
    }
}

impl TransportFactory for MockTransportFactory {
    type Transport = MockTransport;

    fn create(
        &self,
        options: ConnectionOptions,
        events: EventDispatcher,
    ) -> Result<MockTransport, MqttError> {
        lock(&self.recorder.created).push(options.clone());
        *lock(&self.recorder.events) = Some(events.clone());
        *lock(&self.recorder.state) = None;

        Ok(MockTransport {
            options,
            events,
            recorder: self.recorder.clone(),
            should_fail: self.should_fail,
        })
    }
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    pub options: ConnectionOptions,
    events: EventDispatcher,
    recorder: MockRecorder,
    pub should_fail: bool,
}

impl MockTransport {
    fn check_connection_state(&self) -> Result<(), MqttError> {
        match self.recorder.state() {
            Some(ConnectionState::Connected) => Ok(()),
            other => Err(MqttError::NotConnected {
                state: other
                    .unwrap_or_else(|| ConnectionState::Disconnected("Never connected".to_string())),
            }),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.recorder.record(TransportCall::Connect);
        if self.should_fail {
            return Err(MqttError::ConnectionFailed("Mock connection failure".into()));
        }
        if self.is_connected() {
            return Err(MqttError::AlreadyConnected);
        }

        self.recorder.set_state(ConnectionState::Connected);
        self.events.emit_connected(&ConnectedEventArgs {
            session_present: false,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.recorder.record(TransportCall::Disconnect);
        if self.is_connected() {
            let reason = "Client disconnected".to_string();
            self.recorder
                .set_state(ConnectionState::Disconnected(reason.clone()));
            self.events.emit_disconnected(&DisconnectedEventArgs {
                reason,
                client_was_connected: true,
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishResult, Self::Error> {
        self.recorder.record(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        if self.should_fail {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }
        self.check_connection_state()?;

        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce | QoS::ExactlyOnce => Some(self.recorder.next_packet_id()),
        };
        Ok(PublishResult::success(packet_id))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<SubscribeResult, Self::Error> {
        self.recorder.record(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        if self.should_fail {
            return Err(MqttError::SubscriptionFailed("Mock subscribe failure".into()));
        }
        self.check_connection_state()?;

        Ok(SubscribeResult::from_return_codes(
            &[topic.to_string()],
            &[SubscribeReasonCode::Success(qos)],
        ))
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<UnsubscribeResult, Self::Error> {
        self.recorder.record(TransportCall::Unsubscribe {
            topics: topics.to_vec(),
        });
        if self.should_fail {
            return Err(MqttError::UnsubscriptionFailed(
                "Mock unsubscribe failure".into(),
            ));
        }
        self.check_connection_state()?;

        Ok(UnsubscribeResult::acknowledged(topics))
    }

    fn is_connected(&self) -> bool {
        matches!(self.recorder.state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        self.recorder.state()
    }
}
