//! In-process MQTT 3.1.1 broker for transport tests
//!
//! Speaks just enough of the protocol to drive `rumqttc` through a real
//! event loop on 127.0.0.1: accepts every CONNECT, grants every subscription
//! at the requested QoS, acknowledges QoS 1 publishes and echoes each publish
//! back to the sender at QoS 0.
#![allow(dead_code)]

use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{read, Packet};
use rumqttc::mqttbytes::Error as CodecError;
use rumqttc::{
    ConnAck, ConnectReturnCode, PingResp, PubAck, Publish, QoS, SubAck, SubscribeReasonCode,
    UnsubAck,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Default)]
struct BrokerState {
    received: Mutex<Vec<Packet>>,
    connections: AtomicUsize,
    /// Close the socket instead of answering the next QoS 1 publish
    drop_next_publish: AtomicBool,
}

pub struct LoopbackBroker {
    port: u16,
    state: Arc<BrokerState>,
    handle: JoinHandle<()>,
}

impl LoopbackBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(BrokerState::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            port,
            state,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Drop the connection on the next QoS 1 publish, leaving it unacknowledged
    pub fn drop_next_publish(&self) {
        self.state.drop_next_publish.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Every packet the broker decoded, in arrival order
    pub fn received(&self) -> Vec<Packet> {
        self.state.received.lock().unwrap().clone()
    }

    /// Packet ids of the QoS 1/2 publishes the broker received
    pub fn publish_ids(&self) -> Vec<u16> {
        self.received()
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Publish(publish) if publish.qos != QoS::AtMostOnce => Some(publish.pkid),
                _ => None,
            })
            .collect()
    }
}

impl Drop for LoopbackBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<BrokerState>) {
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        let packet = match read(&mut buffer, MAX_PACKET_SIZE) {
            Ok(packet) => packet,
            Err(CodecError::InsufficientBytes(_)) => match stream.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            },
            Err(_) => return,
        };
        state.received.lock().unwrap().push(packet.clone());

        let mut reply = BytesMut::new();
        match packet {
            Packet::Connect(_) => {
                ConnAck::new(ConnectReturnCode::Success, false)
                    .write(&mut reply)
                    .unwrap();
            }
            Packet::Subscribe(subscribe) => {
                let codes = subscribe
                    .filters
                    .iter()
                    .map(|filter| SubscribeReasonCode::Success(filter.qos))
                    .collect();
                SubAck::new(subscribe.pkid, codes).write(&mut reply).unwrap();
            }
            Packet::Unsubscribe(unsubscribe) => {
                UnsubAck::new(unsubscribe.pkid).write(&mut reply).unwrap();
            }
            Packet::Publish(publish) => {
                if publish.qos == QoS::AtLeastOnce {
                    if state.drop_next_publish.swap(false, Ordering::SeqCst) {
                        return;
                    }
                    PubAck::new(publish.pkid).write(&mut reply).unwrap();
                }
                Publish::new(publish.topic, QoS::AtMostOnce, publish.payload.to_vec())
                    .write(&mut reply)
                    .unwrap();
            }
            Packet::PingReq => {
                PingResp.write(&mut reply).unwrap();
            }
            Packet::Disconnect => return,
            _ => {}
        }

        if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broker_binds_ephemeral_port() {
        let broker = LoopbackBroker::start().await;
        assert_ne!(broker.port(), 0);
        assert_eq!(broker.connections(), 0);
        assert!(broker.received().is_empty());
    }
}
