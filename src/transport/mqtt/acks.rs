//! Correlation of broker acknowledgements with waiting callers
//!
//! `rumqttc` only reports packet identifiers once a request has been written
//! to the network (`Outgoing::Publish(pkid)` and friends), and it writes
//! requests in the order they were queued. A waiter is therefore queued per
//! request kind before the request is handed to the client, bound to its
//! packet identifier when the matching outgoing event arrives, and resolved
//! by the incoming PUBACK/PUBCOMP, SUBACK or UNSUBACK.
//!
//! Two `rumqttc` behaviours emit an outgoing PUBLISH that belongs to no new
//! request:
//!
//! - a publish whose packet id is still in use is parked (`Outgoing::AwaitAck`)
//!   and written later as `Outgoing::Publish` right before the ack that freed
//!   the id is reported;
//! - after a connection error, unacknowledged publishes are written again on
//!   the next connection with their original packet ids.
//!
//! SUBSCRIBE and UNSUBSCRIBE are never resent, so their waiters are failed
//! when the connection drops.

use crate::models::{PublishResult, SubscribeResult, UnsubscribeResult};
use rumqttc::{QoS, SubscribeReasonCode};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::oneshot;
use tracing::debug;

struct PublishWaiter {
    qos: QoS,
    tx: oneshot::Sender<PublishResult>,
}

/// A QoS 1/2 publish bound to its packet id
struct InflightPublish {
    qos: QoS,
    /// PUBREC seen; only PUBCOMP is outstanding and nothing will be resent
    released: bool,
    tx: oneshot::Sender<PublishResult>,
}

struct TopicsWaiter<R> {
    topics: Vec<String>,
    tx: oneshot::Sender<R>,
}

/// Requests waiting for the broker
#[derive(Default)]
pub struct PendingAcks {
    queued_publishes: VecDeque<PublishWaiter>,
    // Oldest first; one id can carry a QoS 2 publish awaiting PUBCOMP and a
    // newer publish, or a publish and the one parked behind it
    inflight_publishes: HashMap<u16, VecDeque<InflightPublish>>,
    parked_publish: Option<u16>,
    resend_publishes: HashSet<u16>,
    queued_subscribes: VecDeque<TopicsWaiter<SubscribeResult>>,
    inflight_subscribes: HashMap<u16, TopicsWaiter<SubscribeResult>>,
    queued_unsubscribes: VecDeque<TopicsWaiter<UnsubscribeResult>>,
    inflight_unsubscribes: HashMap<u16, TopicsWaiter<UnsubscribeResult>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter for the next publish request
    pub fn register_publish(&mut self, qos: QoS) -> oneshot::Receiver<PublishResult> {
        let (tx, rx) = oneshot::channel();
        self.queued_publishes.push_back(PublishWaiter { qos, tx });
        rx
    }

    /// Queue a waiter for the next subscribe request
    pub fn register_subscribe(&mut self, topics: Vec<String>) -> oneshot::Receiver<SubscribeResult> {
        let (tx, rx) = oneshot::channel();
        self.queued_subscribes.push_back(TopicsWaiter { topics, tx });
        rx
    }

    /// Queue a waiter for the next unsubscribe request
    pub fn register_unsubscribe(
        &mut self,
        topics: Vec<String>,
    ) -> oneshot::Receiver<UnsubscribeResult> {
        let (tx, rx) = oneshot::channel();
        self.queued_unsubscribes.push_back(TopicsWaiter { topics, tx });
        rx
    }

    /// Drop the most recently queued publish waiter after the request could not be queued
    pub fn withdraw_last_publish(&mut self) {
        self.queued_publishes.pop_back();
    }

    pub fn withdraw_last_subscribe(&mut self) {
        self.queued_subscribes.pop_back();
    }

    pub fn withdraw_last_unsubscribe(&mut self) {
        self.queued_unsubscribes.pop_back();
    }

    /// A PUBLISH left the client
    ///
    /// QoS 0 publishes complete here. The write of a parked publish and the
    /// resend of an unacknowledged one were bound earlier and consume nothing.
    pub fn publish_sent(&mut self, packet_id: u16) {
        if packet_id != 0 {
            if self.parked_publish == Some(packet_id) {
                self.parked_publish = None;
                debug!(packet_id, "Parked publish written");
                return;
            }
            if self.resend_publishes.remove(&packet_id) {
                debug!(packet_id, "Unacknowledged publish resent");
                return;
            }
        }
        let Some(waiter) = self.queued_publishes.pop_front() else {
            debug!(packet_id, "Outgoing publish with no waiter");
            return;
        };
        match waiter.qos {
            QoS::AtMostOnce => {
                // Receiver may have been dropped by a cancelled caller
                let _ = waiter.tx.send(PublishResult::success(None));
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => self.bind_publish(packet_id, waiter),
        }
    }

    /// A publish was parked because `packet_id` is still awaiting its ack
    ///
    /// The request is taken off the queue now; its PUBLISH is written once the
    /// earlier publish with the same id is acknowledged.
    pub fn publish_parked(&mut self, packet_id: u16) {
        let Some(waiter) = self.queued_publishes.pop_front() else {
            debug!(packet_id, "Parked publish with no waiter");
            return;
        };
        self.parked_publish = Some(packet_id);
        self.bind_publish(packet_id, waiter);
    }

    fn bind_publish(&mut self, packet_id: u16, waiter: PublishWaiter) {
        self.inflight_publishes
            .entry(packet_id)
            .or_default()
            .push_back(InflightPublish {
                qos: waiter.qos,
                released: false,
                tx: waiter.tx,
            });
    }

    /// PUBREC received for a QoS 2 publish
    pub fn publish_received(&mut self, packet_id: u16) {
        if let Some(entry) = self
            .inflight_publishes
            .get_mut(&packet_id)
            .and_then(|queue| {
                queue
                    .iter_mut()
                    .find(|p| p.qos == QoS::ExactlyOnce && !p.released)
            })
        {
            entry.released = true;
        }
    }

    /// PUBACK received; returns true if a waiter was resolved
    pub fn publish_acknowledged(&mut self, packet_id: u16) -> bool {
        self.resolve_publish(packet_id, |p| p.qos == QoS::AtLeastOnce)
    }

    /// PUBCOMP received; returns true if a waiter was resolved
    pub fn publish_completed(&mut self, packet_id: u16) -> bool {
        self.resolve_publish(packet_id, |p| p.qos == QoS::ExactlyOnce && p.released)
            || self.resolve_publish(packet_id, |p| p.qos == QoS::ExactlyOnce)
    }

    fn resolve_publish(
        &mut self,
        packet_id: u16,
        matches: impl Fn(&InflightPublish) -> bool,
    ) -> bool {
        let Some(queue) = self.inflight_publishes.get_mut(&packet_id) else {
            return false;
        };
        let Some(position) = queue.iter().position(matches) else {
            return false;
        };
        let resolved = queue.remove(position);
        if queue.is_empty() {
            self.inflight_publishes.remove(&packet_id);
        }
        match resolved {
            Some(publish) => {
                let _ = publish.tx.send(PublishResult::success(Some(packet_id)));
                true
            }
            None => false,
        }
    }

    /// SUBSCRIBE left the client
    ///
    /// A waiter still bound to `packet_id` lost its SUBACK: `rumqttc` only
    /// reuses an id it considers free, and never resends a SUBSCRIBE.
    pub fn subscribe_sent(&mut self, packet_id: u16) {
        if let Some(stale) = self.inflight_subscribes.remove(&packet_id) {
            debug!(packet_id, "Subscribe packet id reused before its SUBACK");
            let _ = stale.tx.send(SubscribeResult::not_acknowledged(&stale.topics));
        }
        if let Some(waiter) = self.queued_subscribes.pop_front() {
            self.inflight_subscribes.insert(packet_id, waiter);
        }
    }

    pub fn subscription_acknowledged(
        &mut self,
        packet_id: u16,
        return_codes: &[SubscribeReasonCode],
    ) -> bool {
        match self.inflight_subscribes.remove(&packet_id) {
            Some(waiter) => {
                let result = SubscribeResult::from_return_codes(&waiter.topics, return_codes);
                let _ = waiter.tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_sent(&mut self, packet_id: u16) {
        if let Some(stale) = self.inflight_unsubscribes.remove(&packet_id) {
            debug!(packet_id, "Unsubscribe packet id reused before its UNSUBACK");
            let _ = stale
                .tx
                .send(UnsubscribeResult::not_acknowledged(&stale.topics));
        }
        if let Some(waiter) = self.queued_unsubscribes.pop_front() {
            self.inflight_unsubscribes.insert(packet_id, waiter);
        }
    }

    pub fn unsubscription_acknowledged(&mut self, packet_id: u16) -> bool {
        match self.inflight_unsubscribes.remove(&packet_id) {
            Some(waiter) => {
                let _ = waiter.tx.send(UnsubscribeResult::acknowledged(&waiter.topics));
                true
            }
            None => false,
        }
    }

    /// The connection dropped and the event loop keeps polling
    ///
    /// Publishes without PUBACK/PUBREC will be written again with the same
    /// packet id. Subscribe and unsubscribe requests already written are lost.
    /// Queued requests are untouched; they go out on the next connection.
    pub fn connection_lost(&mut self) {
        self.resend_publishes = self
            .inflight_publishes
            .iter()
            .filter(|(packet_id, queue)| {
                // A parked publish is not resent; only the one it waits behind
                let resent = queue.iter().filter(|p| !p.released).count();
                let parked = usize::from(self.parked_publish == Some(**packet_id));
                resent > parked
            })
            .map(|(packet_id, _)| *packet_id)
            .collect();

        for (_, waiter) in self.inflight_subscribes.drain() {
            let _ = waiter.tx.send(SubscribeResult::not_acknowledged(&waiter.topics));
        }
        for (_, waiter) in self.inflight_unsubscribes.drain() {
            let _ = waiter
                .tx
                .send(UnsubscribeResult::not_acknowledged(&waiter.topics));
        }
    }

    /// Resolve every waiter as not acknowledged
    ///
    /// Called when the event loop stops for good; nothing queued or in
    /// flight can be answered after that.
    pub fn fail_all(&mut self) {
        self.parked_publish = None;
        self.resend_publishes.clear();
        for waiter in self.queued_publishes.drain(..) {
            let _ = waiter.tx.send(PublishResult::not_acknowledged(None));
        }
        for (packet_id, queue) in self.inflight_publishes.drain() {
            for publish in queue {
                let _ = publish
                    .tx
                    .send(PublishResult::not_acknowledged(Some(packet_id)));
            }
        }
        for waiter in self
            .queued_subscribes
            .drain(..)
            .chain(self.inflight_subscribes.drain().map(|(_, waiter)| waiter))
        {
            let _ = waiter.tx.send(SubscribeResult::not_acknowledged(&waiter.topics));
        }
        for waiter in self
            .queued_unsubscribes
            .drain(..)
            .chain(self.inflight_unsubscribes.drain().map(|(_, waiter)| waiter))
        {
            let _ = waiter
                .tx
                .send(UnsubscribeResult::not_acknowledged(&waiter.topics));
        }
    }

    /// Number of requests still waiting, queued or in flight
    pub fn len(&self) -> usize {
        self.queued_publishes.len()
            + self
                .inflight_publishes
                .values()
                .map(VecDeque::len)
                .sum::<usize>()
            + self.queued_subscribes.len()
            + self.inflight_subscribes.len()
            + self.queued_unsubscribes.len()
            + self.inflight_unsubscribes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
