//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check listener bookkeeping, store bounds and notification
//! counts over random operation sequences.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{CacheEvent, CacheValue, LruStore, Store, TtlCache};
use crate::config::CacheOptions;
use crate::error::ListenerError;
use crate::events::{EventBus, Listener};

// == Test Configuration ==
const LISTENER_POOL: usize = 4;

#[derive(Debug, Clone)]
struct Payload;

impl From<ListenerError> for Payload {
    fn from(_: ListenerError) -> Self {
        Payload
    }
}

// == Strategies ==
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,3}"
}

#[derive(Debug, Clone)]
enum BusOp {
    On { event: usize, listener: usize },
    Off { event: usize, listener: usize },
}

fn bus_op_strategy() -> impl Strategy<Value = BusOp> {
    prop_oneof![
        (0..2usize, 0..LISTENER_POOL).prop_map(|(event, listener)| BusOp::On { event, listener }),
        (0..2usize, 0..LISTENER_POOL).prop_map(|(event, listener)| BusOp::Off { event, listener }),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: i64 },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), any::<i64>()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // For any sequence of on/off calls, listener_count equals the number of
    // distinct registered (event, listener) pairs.
    #[test]
    fn prop_listener_count_matches_registrations(ops in prop::collection::vec(bus_op_strategy(), 1..60)) {
        let bus: EventBus<Payload> = EventBus::new();
        let events = ["a", "b"];
        let listeners: Vec<Listener<Payload>> = (0..LISTENER_POOL)
            .map(|_| Listener::new(|_: &Payload| Ok(())))
            .collect();
        let mut expected: HashSet<(usize, usize)> = HashSet::new();

        for op in ops {
            match op {
                BusOp::On { event, listener } => {
                    bus.on(events[event], listeners[listener].clone());
                    expected.insert((event, listener));
                }
                BusOp::Off { event, listener } => {
                    bus.off(events[event], &listeners[listener]);
                    expected.remove(&(event, listener));
                }
            }

            for (idx, name) in events.iter().enumerate() {
                let count = expected.iter().filter(|(e, _)| *e == idx).count();
                prop_assert_eq!(bus.listener_count(name), count);
            }
        }
    }

    // Every emit reaches each registered listener exactly once.
    #[test]
    fn prop_emit_calls_each_listener_once(registrations in prop::collection::vec(0..LISTENER_POOL, 0..20)) {
        let bus: EventBus<Payload> = EventBus::new();
        let calls = Arc::new(Mutex::new(vec![0usize; LISTENER_POOL]));
        let listeners: Vec<Listener<Payload>> = (0..LISTENER_POOL)
            .map(|idx| {
                let calls = Arc::clone(&calls);
                Listener::new(move |_: &Payload| {
                    calls.lock()[idx] += 1;
                    Ok(())
                })
            })
            .collect();

        for idx in &registrations {
            bus.on("x", listeners[*idx].clone());
        }
        bus.emit("x", &Payload).unwrap();

        let registered: HashSet<usize> = registrations.into_iter().collect();
        for (idx, count) in calls.lock().iter().enumerate() {
            prop_assert_eq!(*count, usize::from(registered.contains(&idx)));
        }
    }

    // The store never holds more than its bound, and every entry that leaves it
    // is reported back.
    #[test]
    fn prop_store_capacity_enforcement(keys in prop::collection::vec(valid_key_strategy(), 1..200)) {
        let max_entries = 10;
        let mut store: LruStore<String, usize> = LruStore::new(max_entries, None);
        let mut distinct: HashSet<String> = HashSet::new();
        let mut evicted_total = 0;

        for (idx, key) in keys.into_iter().enumerate() {
            distinct.insert(key.clone());
            evicted_total += store.set(key, idx, None).len();
            prop_assert!(store.len() <= max_entries);
        }

        prop_assert_eq!(store.len(), distinct.len().min(max_entries));
        prop_assert_eq!(store.stats().evictions as usize, evicted_total);
    }

    // A delete is announced exactly when the key was present; sets are always
    // announced. Each announcement appears on both channels.
    #[test]
    fn prop_notifications_match_mutations(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let cache: TtlCache<String, i64> = TtlCache::new(CacheOptions::default());
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&log);
        cache.events().all_on(crate::events::WildcardListener::new(
            move |event: &str, _: &CacheEvent<String, i64>| {
                sink.lock().push(event.to_string());
                Ok(())
            },
        ));

        let mut present: HashSet<String> = HashSet::new();
        let mut expected = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    cache.set(key.clone(), CacheValue::Ready(value)).unwrap();
                    present.insert(key);
                    expected += 2;
                }
                CacheOp::Delete { key } => {
                    let existed = present.remove(&key);
                    prop_assert_eq!(cache.delete(&key).unwrap(), existed);
                    if existed {
                        expected += 2;
                    }
                }
            }
            prop_assert_eq!(log.lock().len(), expected);
        }

        prop_assert_eq!(cache.len(), present.len());
    }

    // Subscriber count always equals active subscriptions, and off fires only
    // when the last one leaves.
    #[test]
    fn prop_subscriber_count_tracks_active_subscriptions(cancel_order in prop::collection::vec(0..6usize, 0..12)) {
        let cache: TtlCache<String, i64> = TtlCache::new(CacheOptions::default());
        let offs = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&offs);
        cache.events().on(
            crate::cache::SUBSCRIPTION_OFF_EVENT,
            Listener::new(move |_: &CacheEvent<String, i64>| {
                *counter.lock() += 1;
                Ok(())
            }),
        );

        let key = "k".to_string();
        let subscriptions: Vec<_> = (0..6)
            .map(|_| {
                cache
                    .subscribe(&key, Listener::new(|_: &CacheEvent<String, i64>| Ok(())))
                    .unwrap()
            })
            .collect();

        let mut active: HashSet<usize> = (0..6).collect();
        for idx in cancel_order {
            subscriptions[idx].cancel().unwrap();
            active.remove(&idx);
            prop_assert_eq!(cache.subscribers(&key), active.len());
        }

        prop_assert_eq!(*offs.lock(), usize::from(active.is_empty()));
    }
}
