// Copyright (c) 2017 Chef Software Inc. and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Named alarm queue with per-client subscription masks, per §4.8.
//! A bounded `VecDeque` guarded by a single mutex stands in for the
//! teacher's mutex-guarded linked list (§9's re-architecture note):
//! back-pressure is a slow subscriber getting disconnected rather than
//! the queue growing without limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

static LOGKEY: &'static str = "EVT";

/// The fixed alarm identifier space a subscription mask is a bit-set
/// over. New alarms are appended at the end; the numeric values are
/// part of the wire contract with external event-socket clients and
/// must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AlarmId {
    ProxyConfigError = 0,
    ProxyProcessDied = 1,
    ProxyProcessBorn = 2,
    ConfigUpdateFailed = 3,
    ConfigReloaded = 4,
    ProxyRestarting = 5,
    ProxyCoreSignalled = 6,
    LowMemory = 7,
}

impl AlarmId {
    pub fn name(&self) -> &'static str {
        match *self {
            AlarmId::ProxyConfigError => "MGMT_ALARM_PROXY_CONFIG_ERROR",
            AlarmId::ProxyProcessDied => "MGMT_ALARM_PROXY_PROCESS_DIED",
            AlarmId::ProxyProcessBorn => "MGMT_ALARM_PROXY_PROCESS_BORN",
            AlarmId::ConfigUpdateFailed => "MGMT_ALARM_CONFIG_UPDATE_FAILED",
            AlarmId::ConfigReloaded => "MGMT_ALARM_CONFIG_RELOADED",
            AlarmId::ProxyRestarting => "MGMT_ALARM_PROXY_RESTARTING",
            AlarmId::ProxyCoreSignalled => "MGMT_ALARM_PROXY_CORE_SIGNALLED",
            AlarmId::LowMemory => "MGMT_ALARM_LOW_MEMORY",
        }
    }

    fn bit(&self) -> u64 {
        1u64 << (*self as u32)
    }
}

const ALL_MASK: u64 = !0u64;

#[derive(Clone, Debug)]
pub struct Event {
    pub id: AlarmId,
    pub name: String,
    pub description: String,
    pub posted_at: Instant,
}

pub type ClientId = u64;

struct Inner {
    pending: VecDeque<Event>,
    subscribers: HashMap<ClientId, u64>,
    /// Alarms currently active, per §3's "only one alarm per id may be
    /// active at a time" -- `post` inserts/replaces the entry for its
    /// id, `resolve` removes it. Distinct from `pending`: this is
    /// queryable state (`EVENT_ACTIVE`/`EVENT_GET_MLT`), not a
    /// one-shot delivery queue.
    active: HashMap<AlarmId, Event>,
}

pub struct EventBus {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> EventBus {
        EventBus {
            inner: Mutex::new(Inner { pending: VecDeque::new(), subscribers: HashMap::new(), active: HashMap::new() }),
            capacity,
        }
    }

    /// Allocate an event, enqueue it for delivery, and mark its id
    /// active -- replacing any prior active event for the same id, per
    /// §3's at-most-one-active-per-id invariant. If the delivery queue
    /// is at capacity, the oldest pending event is dropped; the active
    /// table itself is never capacity-bounded since it holds at most
    /// one entry per `AlarmId`.
    pub fn post(&self, id: AlarmId, description: &str) {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        if inner.pending.len() >= self.capacity {
            inner.pending.pop_front();
        }
        let event = Event {
            id,
            name: id.name().to_string(),
            description: description.to_string(),
            posted_at: Instant::now(),
        };
        inner.pending.push_back(event.clone());
        inner.active.insert(id, event);
        outputln!("posted alarm {}: {}", id.name(), description);
    }

    /// Clear the active entry for `id`, if any. Returns whether an
    /// active alarm was actually present (used by `EVENT_RESOLVE`'s
    /// error code).
    pub fn resolve(&self, id: AlarmId) -> bool {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        inner.active.remove(&id).is_some()
    }

    /// Whether `id` currently has an active, unresolved alarm.
    pub fn is_active(&self, id: AlarmId) -> bool {
        self.inner.lock().expect("event bus poisoned").active.contains_key(&id)
    }

    /// Names of every currently active alarm, in the `EVENT_GET_MLT`
    /// wire format: `:`-delimited, insertion order not guaranteed.
    pub fn active_list(&self) -> String {
        let inner = self.inner.lock().expect("event bus poisoned");
        inner.active.values().map(|e| e.name.as_str()).collect::<Vec<_>>().join(":")
    }

    /// Register `client` for `id`, or for every alarm when `id` is
    /// `None` (the wire encoding for "empty name = all").
    pub fn register(&self, client: ClientId, id: Option<AlarmId>) {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        let mask = inner.subscribers.entry(client).or_insert(0);
        *mask |= id.map(|i| i.bit()).unwrap_or(ALL_MASK);
    }

    pub fn unregister(&self, client: ClientId, id: Option<AlarmId>) {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        if let Some(mask) = inner.subscribers.get_mut(&client) {
            *mask &= !id.map(|i| i.bit()).unwrap_or(ALL_MASK);
        }
    }

    pub fn drop_client(&self, client: ClientId) {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        inner.subscribers.remove(&client);
    }

    /// Drain pending events and, for each, compute the set of
    /// subscribers whose mask matches. The caller (ControlServer) owns
    /// actually writing `EVENT_NOTIFY` frames and is responsible for
    /// calling `drop_client` on any client a send fails for -- this
    /// method only knows about the mask table, not live sockets.
    pub fn drain_for_delivery(&self) -> Vec<(Event, Vec<ClientId>)> {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        let mut out = Vec::with_capacity(inner.pending.len());
        while let Some(event) = inner.pending.pop_front() {
            let bit = event.id.bit();
            let targets: Vec<ClientId> = inner
                .subscribers
                .iter()
                .filter(|&(_, mask)| mask & bit != 0)
                .map(|(client, _)| *client)
                .collect();
            out.push((event, targets));
        }
        out
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("event bus poisoned").subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_registered_for_specific_id_only_gets_that_id() {
        let bus = EventBus::new(16);
        bus.register(1, Some(AlarmId::ProxyProcessDied));
        bus.post(AlarmId::ProxyProcessDied, "died");
        bus.post(AlarmId::ConfigReloaded, "reloaded");

        let delivered = bus.drain_for_delivery();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].1, vec![1]);
        assert!(delivered[1].1.is_empty());
    }

    #[test]
    fn wildcard_subscription_receives_every_alarm() {
        let bus = EventBus::new(16);
        bus.register(1, None);
        bus.post(AlarmId::LowMemory, "swap low");
        let delivered = bus.drain_for_delivery();
        assert_eq!(delivered[0].1, vec![1]);
    }

    #[test]
    fn unregister_specific_id_leaves_others_intact() {
        let bus = EventBus::new(16);
        bus.register(1, None);
        bus.unregister(1, Some(AlarmId::LowMemory));
        bus.post(AlarmId::LowMemory, "swap low");
        bus.post(AlarmId::ConfigReloaded, "reloaded");
        let delivered = bus.drain_for_delivery();
        assert!(delivered[0].1.is_empty());
        assert_eq!(delivered[1].1, vec![1]);
    }

    #[test]
    fn queue_drops_oldest_event_past_capacity() {
        let bus = EventBus::new(2);
        bus.post(AlarmId::ConfigReloaded, "1");
        bus.post(AlarmId::ConfigReloaded, "2");
        bus.post(AlarmId::ConfigReloaded, "3");
        let delivered = bus.drain_for_delivery();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0.description, "2");
        assert_eq!(delivered[1].0.description, "3");
    }

    #[test]
    fn events_are_delivered_to_a_subscriber_in_post_order() {
        let bus = EventBus::new(16);
        bus.register(1, None);
        bus.post(AlarmId::ConfigReloaded, "first");
        bus.post(AlarmId::ConfigReloaded, "second");
        let delivered = bus.drain_for_delivery();
        assert_eq!(delivered[0].0.description, "first");
        assert_eq!(delivered[1].0.description, "second");
    }

    #[test]
    fn post_marks_the_alarm_active_until_resolved() {
        let bus = EventBus::new(16);
        assert!(!bus.is_active(AlarmId::ProxyProcessDied));
        bus.post(AlarmId::ProxyProcessDied, "server exited");
        assert!(bus.is_active(AlarmId::ProxyProcessDied));
        assert!(bus.resolve(AlarmId::ProxyProcessDied));
        assert!(!bus.is_active(AlarmId::ProxyProcessDied));
    }

    #[test]
    fn resolve_on_an_unposted_alarm_is_a_no_op() {
        let bus = EventBus::new(16);
        assert!(!bus.resolve(AlarmId::LowMemory));
    }

    #[test]
    fn a_second_post_for_the_same_id_replaces_the_active_entry() {
        let bus = EventBus::new(16);
        bus.post(AlarmId::ConfigUpdateFailed, "first failure");
        bus.post(AlarmId::ConfigUpdateFailed, "second failure");
        assert!(bus.is_active(AlarmId::ConfigUpdateFailed));
        // Delivery queue still sees both posts independently of the
        // single collapsed active entry.
        assert_eq!(bus.drain_for_delivery().len(), 2);
    }

    #[test]
    fn active_list_joins_active_alarm_names_with_colons() {
        let bus = EventBus::new(16);
        bus.post(AlarmId::LowMemory, "swap low");
        bus.post(AlarmId::ProxyConfigError, "bad config");
        let mut names: Vec<&str> = bus.active_list().split(':').collect();
        names.sort();
        assert_eq!(names, vec!["MGMT_ALARM_LOW_MEMORY", "MGMT_ALARM_PROXY_CONFIG_ERROR"]);
    }

    #[test]
    fn active_list_is_empty_when_nothing_is_active() {
        let bus = EventBus::new(16);
        assert_eq!(bus.active_list(), "");
    }
}
