// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process pub/sub backend.
//!
//! Topics are matched by name inside a domain. A sample written by any
//! DataWriter is copied into the queue of every DataReader of the same
//! domain and topic name. Requesters and Repliers meet on a service name:
//! requests fan out to every Replier of the service, replies to every
//! Requester.
//!
//! Names come from the object representation: a reference is the name
//! itself, XML carries it in the `<name>` of its `<topic>` element and binary
//! descriptions start with it as a CDR string.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{EntityId, Middleware};
use crate::protocol::Representation;

/// Samples kept per reader before the oldest is evicted.
pub const READER_QUEUE_DEPTH: usize = 256;

#[derive(Debug)]
struct ParticipantEntry {
    domain_id: i16,
    repr: Representation,
}

#[derive(Debug)]
struct TopicEntry {
    participant: EntityId,
    name: String,
    repr: Representation,
}

#[derive(Debug)]
struct GroupEntry {
    participant: EntityId,
    repr: Representation,
}

#[derive(Debug)]
struct EndpointEntry {
    domain_id: i16,
    name: String,
    repr: Representation,
    queue: VecDeque<Vec<u8>>,
}

impl EndpointEntry {
    fn push(&mut self, sample: &[u8]) {
        if self.queue.len() >= READER_QUEUE_DEPTH {
            self.queue.pop_front();
        }
        self.queue.push_back(sample.to_vec());
    }
}

#[derive(Debug, Default)]
struct Domain {
    participants: HashMap<EntityId, ParticipantEntry>,
    topics: HashMap<EntityId, TopicEntry>,
    publishers: HashMap<EntityId, GroupEntry>,
    subscribers: HashMap<EntityId, GroupEntry>,
    writers: HashMap<EntityId, EndpointEntry>,
    readers: HashMap<EntityId, EndpointEntry>,
    requesters: HashMap<EntityId, EndpointEntry>,
    repliers: HashMap<EntityId, EndpointEntry>,
}

impl Domain {
    fn domain_of(&self, participant: EntityId) -> Option<i16> {
        self.participants.get(&participant).map(|p| p.domain_id)
    }

    fn has_topic(&self, participant: EntityId, name: &str) -> bool {
        self.topics
            .values()
            .any(|t| t.participant == participant && t.name == name)
    }

    /// Endpoint under a publisher/subscriber: needs a topic of that name.
    fn topic_endpoint(&self, group: Option<&GroupEntry>, repr: &Representation) -> Option<EndpointEntry> {
        let group = group?;
        let name = repr.topic_name()?;
        if !self.has_topic(group.participant, &name) {
            return None;
        }
        Some(EndpointEntry {
            domain_id: self.domain_of(group.participant)?,
            name,
            repr: repr.clone(),
            queue: VecDeque::new(),
        })
    }

    fn service_endpoint(&self, participant: EntityId, repr: &Representation) -> Option<EndpointEntry> {
        Some(EndpointEntry {
            domain_id: self.domain_of(participant)?,
            name: repr.topic_name()?,
            repr: repr.clone(),
            queue: VecDeque::new(),
        })
    }
}

/// Minimal in-process middleware.
#[derive(Debug, Default)]
pub struct InMemoryMiddleware {
    state: Mutex<Domain>,
    data_ready: Condvar,
}

fn insert_new<T>(map: &mut HashMap<EntityId, T>, id: EntityId, entry: Option<T>) -> bool {
    match entry {
        Some(e) if !map.contains_key(&id) => {
            map.insert(id, e);
            true
        }
        _ => false,
    }
}

impl InMemoryMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a sample as if written by a remote publisher.
    /// Returns the number of readers it reached.
    pub fn publish(&self, domain_id: i16, topic_name: &str, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        let mut reached = 0;
        for reader in state.readers.values_mut() {
            if reader.domain_id == domain_id && reader.name == topic_name {
                reader.push(data);
                reached += 1;
            }
        }
        drop(state);
        if reached > 0 {
            self.data_ready.notify_all();
        }
        reached
    }

    /// Samples waiting in a DataReader queue.
    pub fn backlog(&self, datareader_id: EntityId) -> usize {
        self.state
            .lock()
            .readers
            .get(&datareader_id)
            .map(|r| r.queue.len())
            .unwrap_or(0)
    }

    /// Number of live entities of every kind.
    pub fn entity_count(&self) -> usize {
        let s = self.state.lock();
        s.participants.len()
            + s.topics.len()
            + s.publishers.len()
            + s.subscribers.len()
            + s.writers.len()
            + s.readers.len()
            + s.requesters.len()
            + s.repliers.len()
    }

    /// Copy `data` into every endpoint of `targets` sharing domain and name
    /// with the source endpoint.
    fn fan_out(
        &self,
        source: impl Fn(&Domain) -> Option<(i16, String)>,
        targets: impl Fn(&mut Domain) -> &mut HashMap<EntityId, EndpointEntry>,
        data: &[u8],
    ) -> bool {
        let mut state = self.state.lock();
        let Some((domain_id, name)) = source(&*state) else {
            return false;
        };
        for ep in targets(&mut *state).values_mut() {
            if ep.domain_id == domain_id && ep.name == name {
                ep.push(data);
            }
        }
        drop(state);
        self.data_ready.notify_all();
        true
    }

    /// Wait for a sample in the queue selected by `queue`.
    fn take(
        &self,
        queue: impl Fn(&mut Domain) -> Option<&mut EndpointEntry>,
        out: &mut Vec<u8>,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match queue(&mut *state) {
                None => return false,
                Some(ep) => {
                    if let Some(sample) = ep.queue.pop_front() {
                        *out = sample;
                        return true;
                    }
                }
            }
            if self.data_ready.wait_until(&mut state, deadline).timed_out() {
                return match queue(&mut *state).and_then(|ep| ep.queue.pop_front()) {
                    Some(sample) => {
                        *out = sample;
                        true
                    }
                    None => false,
                };
            }
        }
    }
}

impl Middleware for InMemoryMiddleware {
    fn create_participant(&self, id: EntityId, domain_id: i16, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = ParticipantEntry {
            domain_id,
            repr: repr.clone(),
        };
        insert_new(&mut s.participants, id, Some(entry))
    }

    fn create_topic(&self, id: EntityId, participant_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = match (s.participants.contains_key(&participant_id), repr.topic_name()) {
            (true, Some(name)) => Some(TopicEntry {
                participant: participant_id,
                name,
                repr: repr.clone(),
            }),
            _ => None,
        };
        insert_new(&mut s.topics, id, entry)
    }

    fn create_publisher(&self, id: EntityId, participant_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = s.participants.contains_key(&participant_id).then(|| GroupEntry {
            participant: participant_id,
            repr: repr.clone(),
        });
        insert_new(&mut s.publishers, id, entry)
    }

    fn create_subscriber(&self, id: EntityId, participant_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = s.participants.contains_key(&participant_id).then(|| GroupEntry {
            participant: participant_id,
            repr: repr.clone(),
        });
        insert_new(&mut s.subscribers, id, entry)
    }

    fn create_datawriter(&self, id: EntityId, publisher_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = s.topic_endpoint(s.publishers.get(&publisher_id), repr);
        insert_new(&mut s.writers, id, entry)
    }

    fn create_datareader(&self, id: EntityId, subscriber_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = s.topic_endpoint(s.subscribers.get(&subscriber_id), repr);
        insert_new(&mut s.readers, id, entry)
    }

    fn create_requester(&self, id: EntityId, participant_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = s.service_endpoint(participant_id, repr);
        insert_new(&mut s.requesters, id, entry)
    }

    fn create_replier(&self, id: EntityId, participant_id: EntityId, repr: &Representation) -> bool {
        let mut s = self.state.lock();
        let entry = s.service_endpoint(participant_id, repr);
        insert_new(&mut s.repliers, id, entry)
    }

    fn delete_participant(&self, id: EntityId) -> bool {
        self.state.lock().participants.remove(&id).is_some()
    }

    fn delete_topic(&self, id: EntityId) -> bool {
        self.state.lock().topics.remove(&id).is_some()
    }

    fn delete_publisher(&self, id: EntityId) -> bool {
        self.state.lock().publishers.remove(&id).is_some()
    }

    fn delete_subscriber(&self, id: EntityId) -> bool {
        self.state.lock().subscribers.remove(&id).is_some()
    }

    fn delete_datawriter(&self, id: EntityId) -> bool {
        self.state.lock().writers.remove(&id).is_some()
    }

    fn delete_datareader(&self, id: EntityId) -> bool {
        let removed = self.state.lock().readers.remove(&id).is_some();
        // Wake blocked reads so they notice the reader is gone.
        self.data_ready.notify_all();
        removed
    }

    fn delete_requester(&self, id: EntityId) -> bool {
        let removed = self.state.lock().requesters.remove(&id).is_some();
        self.data_ready.notify_all();
        removed
    }

    fn delete_replier(&self, id: EntityId) -> bool {
        let removed = self.state.lock().repliers.remove(&id).is_some();
        self.data_ready.notify_all();
        removed
    }

    fn matched_participant(&self, id: EntityId, domain_id: i16, repr: &Representation) -> bool {
        self.state
            .lock()
            .participants
            .get(&id)
            .is_some_and(|p| p.domain_id == domain_id && &p.repr == repr)
    }

    fn matched_topic(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().topics.get(&id).is_some_and(|t| &t.repr == repr)
    }

    fn matched_publisher(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().publishers.get(&id).is_some_and(|p| &p.repr == repr)
    }

    fn matched_subscriber(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().subscribers.get(&id).is_some_and(|p| &p.repr == repr)
    }

    fn matched_datawriter(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().writers.get(&id).is_some_and(|e| &e.repr == repr)
    }

    fn matched_datareader(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().readers.get(&id).is_some_and(|e| &e.repr == repr)
    }

    fn matched_requester(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().requesters.get(&id).is_some_and(|e| &e.repr == repr)
    }

    fn matched_replier(&self, id: EntityId, repr: &Representation) -> bool {
        self.state.lock().repliers.get(&id).is_some_and(|e| &e.repr == repr)
    }

    fn write_data(&self, datawriter_id: EntityId, data: &[u8]) -> bool {
        self.fan_out(
            |s| s.writers.get(&datawriter_id).map(|w| (w.domain_id, w.name.clone())),
            |s| &mut s.readers,
            data,
        )
    }

    fn write_request(&self, requester_id: EntityId, data: &[u8]) -> bool {
        self.fan_out(
            |s| s.requesters.get(&requester_id).map(|r| (r.domain_id, r.name.clone())),
            |s| &mut s.repliers,
            data,
        )
    }

    fn write_reply(&self, replier_id: EntityId, data: &[u8]) -> bool {
        self.fan_out(
            |s| s.repliers.get(&replier_id).map(|r| (r.domain_id, r.name.clone())),
            |s| &mut s.requesters,
            data,
        )
    }

    fn read_data(&self, datareader_id: EntityId, out: &mut Vec<u8>, timeout: Duration) -> bool {
        self.take(|s| s.readers.get_mut(&datareader_id), out, timeout)
    }

    fn read_request(&self, replier_id: EntityId, out: &mut Vec<u8>, timeout: Duration) -> bool {
        self.take(|s| s.repliers.get_mut(&replier_id), out, timeout)
    }

    fn read_reply(&self, requester_id: EntityId, out: &mut Vec<u8>, timeout: Duration) -> bool {
        self.take(|s| s.requesters.get_mut(&requester_id), out, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_ref(name: &str) -> Representation {
        Representation::ByReference(name.into())
    }

    /// participant 1, topic 2 ("Square"), publisher 3, subscriber 4.
    fn setup(mw: &InMemoryMiddleware) {
        assert!(mw.create_participant(1, 0, &by_ref("participant")));
        assert!(mw.create_topic(2, 1, &by_ref("Square")));
        assert!(mw.create_publisher(3, 1, &by_ref("")));
        assert!(mw.create_subscriber(4, 1, &by_ref("")));
    }

    #[test]
    fn test_writer_fans_out_to_readers() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(mw.create_datawriter(10, 3, &by_ref("Square")));
        assert!(mw.create_datareader(11, 4, &by_ref("Square")));
        assert!(mw.create_datareader(12, 4, &by_ref("Square")));

        assert!(mw.write_data(10, b"sample"));
        let mut out = Vec::new();
        assert!(mw.read_data(11, &mut out, Duration::from_millis(10)));
        assert_eq!(out, b"sample");
        assert_eq!(mw.backlog(12), 1);
    }

    #[test]
    fn test_endpoint_requires_topic() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(!mw.create_datawriter(10, 3, &by_ref("Circle")));
        assert!(!mw.create_datareader(11, 99, &by_ref("Square")));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(!mw.create_topic(2, 1, &by_ref("Square")));
    }

    #[test]
    fn test_read_times_out() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(mw.create_datareader(11, 4, &by_ref("Square")));
        let mut out = Vec::new();
        let start = Instant::now();
        assert!(!mw.read_data(11, &mut out, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!mw.read_data(99, &mut out, Duration::from_millis(30)));
    }

    #[test]
    fn test_blocked_read_wakes_on_publish() {
        let mw = std::sync::Arc::new(InMemoryMiddleware::new());
        setup(&mw);
        assert!(mw.create_datareader(11, 4, &by_ref("Square")));
        let publisher = mw.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(0, "Square", &[7]);
        });
        let mut out = Vec::new();
        assert!(mw.read_data(11, &mut out, Duration::from_secs(2)));
        assert_eq!(out, vec![7]);
        t.join().unwrap();
    }

    #[test]
    fn test_request_reply() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(mw.create_requester(20, 1, &by_ref("AddTwoInts")));
        assert!(mw.create_replier(21, 1, &by_ref("AddTwoInts")));
        assert!(mw.write_request(20, &[1, 2]));
        let mut out = Vec::new();
        assert!(mw.read_request(21, &mut out, Duration::ZERO));
        assert_eq!(out, vec![1, 2]);
        assert!(mw.write_reply(21, &[3]));
        assert!(mw.read_reply(20, &mut out, Duration::ZERO));
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn test_matching_compares_representation() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(mw.matched_participant(1, 0, &by_ref("participant")));
        assert!(!mw.matched_participant(1, 1, &by_ref("participant")));
        assert!(mw.matched_topic(2, &by_ref("Square")));
        assert!(!mw.matched_topic(2, &by_ref("Circle")));
    }

    #[test]
    fn test_queue_depth_evicts_oldest() {
        let mw = InMemoryMiddleware::new();
        setup(&mw);
        assert!(mw.create_datareader(11, 4, &by_ref("Square")));
        for i in 0..(READER_QUEUE_DEPTH + 1) {
            mw.publish(0, "Square", &(i as u32).to_le_bytes());
        }
        assert_eq!(mw.backlog(11), READER_QUEUE_DEPTH);
        let mut out = Vec::new();
        assert!(mw.read_data(11, &mut out, Duration::ZERO));
        assert_eq!(out, 1u32.to_le_bytes());
    }
}
