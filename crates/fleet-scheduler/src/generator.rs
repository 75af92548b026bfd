//! Polling watch source.
//!
//! A [`DiffGenerator`] lists objects on an interval, diffs the listing
//! against the previous one by key and resource version, and pushes the
//! resulting [`WatchEvent`]s to every subscriber. Subscribers get bounded
//! channels: a full channel loses the event (counted in
//! [`DiffGenerator::dropped`]) and a closed one is unsubscribed.
//!
//! With a resync period set, every Nth poll also re-emits unchanged objects
//! as `Updated { old, new }` with `old == new`, so consumers can recover
//! from lost adds and updates. A removal that finds a listener's channel
//! full is kept for that listener and retried at the start of every poll.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use fleet_core::{Fleet, Instance};

use crate::events::{ObjectEvent, WatchEvent};

/// Objects the generator can diff.
pub trait Versioned: Clone + Send + Sync + 'static {
    fn key(&self) -> &str;
    fn version(&self) -> u64;
}

impl Versioned for Instance {
    fn key(&self) -> &str {
        &self.meta.uid
    }

    fn version(&self) -> u64 {
        self.meta.resource_version
    }
}

impl Versioned for Fleet {
    fn key(&self) -> &str {
        &self.meta.name
    }

    fn version(&self) -> u64 {
        self.meta.resource_version
    }
}

pub type ListFn<T> = Box<dyn Fn() -> anyhow::Result<Vec<T>> + Send + Sync>;

struct Listener<T> {
    tx: mpsc::Sender<WatchEvent>,
    /// Removals that found the channel full, oldest first.
    unsent_removals: VecDeque<T>,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

fn deliver<T>(tx: &mpsc::Sender<WatchEvent>, event: ObjectEvent<T>) -> Delivery
where
    WatchEvent: From<ObjectEvent<T>>,
{
    match tx.try_send(event.into()) {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

pub struct DiffGenerator<T: Versioned> {
    name: &'static str,
    list: ListFn<T>,
    interval: Duration,
    resync_every: Option<u64>,
    previous: HashMap<String, T>,
    listeners: Vec<Listener<T>>,
    polls: u64,
    dropped: u64,
}

impl<T> DiffGenerator<T>
where
    T: Versioned,
    WatchEvent: From<ObjectEvent<T>>,
{
    pub fn new(name: &'static str, interval: Duration, list: ListFn<T>) -> Self {
        Self {
            name,
            list,
            interval,
            resync_every: None,
            previous: HashMap::new(),
            listeners: Vec::new(),
            polls: 0,
            dropped: 0,
        }
    }

    /// Re-emit every unchanged object once per `polls` polls.
    pub fn with_resync(mut self, polls: u64) -> Self {
        self.resync_every = (polls > 0).then_some(polls);
        self
    }

    /// Register a listener with a channel of `capacity` events.
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.listeners.push(Listener {
            tx,
            unsent_removals: VecDeque::new(),
        });
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Events lost to full listener channels, counting every failed
    /// removal retry.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Removals still waiting for room in some listener's channel.
    pub fn unsent_removals(&self) -> usize {
        self.listeners.iter().map(|l| l.unsent_removals.len()).sum()
    }

    /// List once and emit the difference. Returns how many events were
    /// produced. On a listing error the previous listing is kept.
    pub fn poll_once(&mut self) -> anyhow::Result<usize> {
        self.retry_removals();
        let current = (self.list)()?;
        self.polls += 1;
        let resync = self
            .resync_every
            .is_some_and(|every| self.polls % every == 0);

        let next: BTreeMap<String, T> = current
            .into_iter()
            .map(|obj| (obj.key().to_string(), obj))
            .collect();

        let mut events = Vec::new();
        for (key, obj) in &next {
            match self.previous.remove(key) {
                None => events.push(ObjectEvent::Added(obj.clone())),
                Some(old) if old.version() != obj.version() || resync => {
                    events.push(ObjectEvent::Updated {
                        old,
                        new: obj.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        let mut removed: Vec<(String, T)> = self.previous.drain().collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        events.extend(removed.into_iter().map(|(_, obj)| ObjectEvent::Removed(obj)));

        self.previous = next.into_iter().collect();

        let count = events.len();
        for event in events {
            self.emit(event);
        }
        if count > 0 {
            debug!(source = self.name, events = count, resync, "watch diff emitted");
        }
        Ok(count)
    }

    fn emit(&mut self, event: ObjectEvent<T>) {
        let mut dropped = 0;
        self.listeners.retain_mut(|listener| {
            // Nothing overtakes a held removal. Adds and updates are dropped
            // and come back on resync.
            if !listener.unsent_removals.is_empty() {
                if let ObjectEvent::Removed(obj) = &event {
                    listener.unsent_removals.push_back(obj.clone());
                }
                dropped += 1;
                return !listener.tx.is_closed();
            }
            match deliver(&listener.tx, event.clone()) {
                Delivery::Sent => true,
                Delivery::Full => {
                    if let ObjectEvent::Removed(obj) = &event {
                        listener.unsent_removals.push_back(obj.clone());
                    }
                    dropped += 1;
                    true
                }
                Delivery::Closed => false,
            }
        });
        if dropped > 0 {
            warn!(source = self.name, dropped, "listener channel full, event dropped");
            self.dropped += dropped;
        }
    }

    fn retry_removals(&mut self) {
        let mut delivered = 0;
        self.listeners.retain_mut(|listener| {
            while let Some(obj) = listener.unsent_removals.pop_front() {
                match deliver(&listener.tx, ObjectEvent::Removed(obj.clone())) {
                    Delivery::Sent => delivered += 1,
                    Delivery::Full => {
                        listener.unsent_removals.push_front(obj);
                        return true;
                    }
                    Delivery::Closed => return false,
                }
            }
            true
        });
        if delivered > 0 {
            debug!(source = self.name, delivered, "held removals delivered");
        }
    }

    /// Poll immediately, then every interval, until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = self.name,
            interval_ms = self.interval.as_millis() as u64,
            "watch generator started"
        );
        loop {
            if let Err(e) = self.poll_once() {
                warn!(source = self.name, error = %e, "listing failed");
            }
            if self.listeners.is_empty() {
                info!(source = self.name, "no listeners left, generator stopping");
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!(source = self.name, "watch generator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Shared = Arc<Mutex<Vec<Fleet>>>;

    fn generator(shared: &Shared) -> DiffGenerator<Fleet> {
        let source = shared.clone();
        DiffGenerator::new(
            "fleets",
            Duration::from_millis(10),
            Box::new(move || Ok(source.lock().unwrap().clone())),
        )
    }

    fn fleet(name: &str, version: u64) -> Fleet {
        let mut f = Fleet::new(name);
        f.meta.resource_version = version;
        f
    }

    fn drain(rx: &mut mpsc::Receiver<WatchEvent>) -> Vec<WatchEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn emits_adds_updates_and_removals() {
        let shared: Shared = Arc::new(Mutex::new(vec![fleet("b", 1), fleet("a", 1)]));
        let mut generator = generator(&shared);
        let mut rx = generator.subscribe(16);

        assert_eq!(generator.poll_once().unwrap(), 2);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                WatchEvent::Fleet(ObjectEvent::Added(fleet("a", 1))),
                WatchEvent::Fleet(ObjectEvent::Added(fleet("b", 1))),
            ]
        );

        *shared.lock().unwrap() = vec![fleet("a", 2)];
        assert_eq!(generator.poll_once().unwrap(), 2);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                WatchEvent::Fleet(ObjectEvent::Updated {
                    old: fleet("a", 1),
                    new: fleet("a", 2),
                }),
                WatchEvent::Fleet(ObjectEvent::Removed(fleet("b", 1))),
            ]
        );

        assert_eq!(generator.poll_once().unwrap(), 0);
    }

    #[test]
    fn resync_re_emits_unchanged_objects() {
        let shared: Shared = Arc::new(Mutex::new(vec![fleet("a", 1)]));
        let mut generator = generator(&shared).with_resync(2);
        let mut rx = generator.subscribe(16);

        generator.poll_once().unwrap();
        drain(&mut rx);
        assert_eq!(generator.poll_once().unwrap(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![WatchEvent::Fleet(ObjectEvent::Updated {
                old: fleet("a", 1),
                new: fleet("a", 1),
            })]
        );
        assert_eq!(generator.poll_once().unwrap(), 0);
    }

    #[test]
    fn full_listener_drops_and_closed_listener_is_removed() {
        let shared: Shared = Arc::new(Mutex::new(vec![fleet("a", 1), fleet("b", 1)]));
        let mut generator = generator(&shared);
        let mut small = generator.subscribe(1);
        let closed = generator.subscribe(4);
        drop(closed);

        generator.poll_once().unwrap();
        assert_eq!(generator.dropped(), 1);
        assert_eq!(generator.listener_count(), 1);
        assert_eq!(drain(&mut small).len(), 1);
    }

    #[test]
    fn removal_lost_to_full_channel_is_redelivered() {
        let shared: Shared = Arc::new(Mutex::new(vec![fleet("a", 1), fleet("b", 1)]));
        let mut generator = generator(&shared).with_resync(1);
        let mut rx = generator.subscribe(1);

        generator.poll_once().unwrap();
        drain(&mut rx);
        generator.poll_once().unwrap();
        drain(&mut rx);

        // Both fleets vanish in one poll; the channel holds only one event.
        shared.lock().unwrap().clear();
        generator.poll_once().unwrap();
        assert_eq!(generator.unsent_removals(), 1);

        let mut removed = Vec::new();
        for _ in 0..3 {
            for event in drain(&mut rx) {
                if let WatchEvent::Fleet(ObjectEvent::Removed(f)) = event {
                    removed.push(f.meta.name);
                }
            }
            generator.poll_once().unwrap();
        }
        assert_eq!(removed, ["a", "b"]);
        assert_eq!(generator.unsent_removals(), 0);
    }

    #[test]
    fn listing_error_keeps_previous_state() {
        let fail = Arc::new(Mutex::new(false));
        let flag = fail.clone();
        let mut generator: DiffGenerator<Fleet> = DiffGenerator::new(
            "fleets",
            Duration::from_millis(10),
            Box::new(move || -> anyhow::Result<Vec<Fleet>> {
                if *flag.lock().unwrap() {
                    anyhow::bail!("store unavailable");
                }
                Ok(vec![fleet("a", 1)])
            }),
        );
        let mut rx = generator.subscribe(8);

        generator.poll_once().unwrap();
        *fail.lock().unwrap() = true;
        assert!(generator.poll_once().is_err());
        *fail.lock().unwrap() = false;
        generator.poll_once().unwrap();

        // Only the initial add; the failed poll produced no removal.
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let shared: Shared = Arc::new(Mutex::new(vec![fleet("a", 1)]));
        let mut generator = generator(&shared);
        let mut rx = generator.subscribe(8);
        let (tx, shutdown) = watch::channel(false);

        let handle = tokio::spawn(generator.run(shutdown));
        let first = rx.recv().await.unwrap();
        assert_eq!(first, WatchEvent::Fleet(ObjectEvent::Added(fleet("a", 1))));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
