//! Integration Tests for the Batching Loader
//!
//! Exercises the public API end to end: batching, deduplication through the
//! shared cache key, cached failures, and the notifications subscribers see.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_test::{assert_err, assert_ok};
use ttl_item_cache::cache::{CacheEvent, Settled, TtlCache, DELETE_EVENT, SET_EVENT};
use ttl_item_cache::config::{json_key_fn, CacheOptions};
use ttl_item_cache::loader::BatchExecute;
use ttl_item_cache::{
    batch_fn, BatchingLoader, CacheError, CacheValue, ListenerError, Listener, LoadError,
    LoaderOptions, WildcardListener,
};

// == Helper Functions ==

/// Lookup key whose requester does not affect the cache key.
#[derive(Debug, Clone, Serialize)]
struct UserLookup {
    id: u32,
    #[serde(skip)]
    requested_by: &'static str,
}

fn lookup(id: u32, requested_by: &'static str) -> UserLookup {
    UserLookup { id, requested_by }
}

type Calls<K> = Arc<Mutex<Vec<Vec<K>>>>;

/// Users with an odd id exist and are named after it; even ids are missing.
fn find_users(keys: &[UserLookup]) -> Vec<Settled<String>> {
    keys.iter()
        .map(|key| match key.id % 2 {
            1 => Ok(format!("user-{}", key.id)),
            _ => Err(LoadError::msg(format!("user {} not found", key.id))),
        })
        .collect()
}

fn user_loader(
    options: LoaderOptions<UserLookup, String>,
) -> (BatchingLoader<UserLookup, String>, Calls<UserLookup>) {
    let calls: Calls<UserLookup> = Arc::default();
    let sink = Arc::clone(&calls);
    let loader = BatchingLoader::new(
        batch_fn(move |keys: Vec<UserLookup>| {
            sink.lock().push(keys.clone());
            async move { Ok(find_users(&keys)) }
        }),
        options,
    );
    (loader, calls)
}

fn default_options() -> LoaderOptions<UserLookup, String> {
    LoaderOptions::new(json_key_fn())
}

fn requested_ids(calls: &Calls<UserLookup>) -> Vec<Vec<u32>> {
    calls
        .lock()
        .iter()
        .map(|batch| batch.iter().map(|key| key.id).collect())
        .collect()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// == Batching and Deduplication ==

#[tokio::test]
async fn test_same_cache_key_shares_request_entry_and_subscribers() {
    let (loader, calls) = user_loader(default_options());
    let (by_alice, by_bob) = (lookup(1, "alice"), lookup(1, "bob"));
    assert_eq!(loader.cache_key(&by_alice), loader.cache_key(&by_bob));

    let noop = Listener::new(|_: &CacheEvent<UserLookup, String>| Ok(()));
    let subscription = assert_ok!(loader.subscribe(&by_alice, noop));
    assert_eq!(loader.subscribers(&by_bob), 1);

    let (a, b) = tokio::join!(loader.load(by_alice.clone()), loader.load(by_bob.clone()));
    assert_eq!(assert_ok!(a), "user-1");
    assert_eq!(assert_ok!(b), "user-1");

    assert_eq!(requested_ids(&calls), vec![vec![1]]);
    assert_eq!(calls.lock()[0][0].requested_by, "alice");
    assert!(loader.cache().has(&by_bob));

    assert_ok!(subscription.cancel());
    assert_eq!(loader.subscribers(&by_bob), 0);
}

#[tokio::test]
async fn test_max_batch_size_bounds_each_call() {
    let (loader, calls) = user_loader(default_options().max_batch_size(2));

    let keys = (1..=5).map(|id| lookup(id, "test")).collect();
    let results = loader.load_many(keys).await;

    assert_eq!(results.len(), 5);
    assert_eq!(requested_ids(&calls), vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test]
async fn test_disabled_cache_skips_deduplication() {
    let (loader, calls) = user_loader(default_options().cache(false));

    let (a, b) = tokio::join!(loader.load(lookup(3, "a")), loader.load(lookup(3, "b")));
    assert_ok!(a);
    assert_ok!(b);

    assert_eq!(requested_ids(&calls), vec![vec![3, 3]]);
    assert!(loader.cache().is_empty());
}

// == Cached Failures ==

#[tokio::test]
async fn test_failure_is_returned_on_every_load() {
    let (loader, calls) = user_loader(default_options());

    let first = assert_err!(loader.load(lookup(2, "a")).await);
    settle().await;
    let replay = assert_err!(loader.load(lookup(2, "b")).await);

    assert_eq!(first.to_string(), "user 2 not found");
    assert_eq!(replay.to_string(), "user 2 not found");
    assert_eq!(requested_ids(&calls), vec![vec![2]]);
}

#[tokio::test]
async fn test_failures_expire_by_item_ttl() {
    let options = default_options()
        .lru_cache_ttl_from_item(|settled: &Settled<String>, _: &UserLookup| {
            settled.is_err().then(|| Duration::from_millis(30))
        });
    let (loader, calls) = user_loader(options);

    assert_err!(loader.load(lookup(2, "a")).await);
    assert_ok!(loader.load(lookup(1, "a")).await);
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_err!(loader.load(lookup(2, "a")).await);
    assert_ok!(loader.load(lookup(1, "a")).await);

    assert_eq!(requested_ids(&calls), vec![vec![2], vec![1], vec![2]]);
}

#[tokio::test]
async fn test_batch_function_error_fails_whole_batch() {
    let loader: BatchingLoader<String, u32> = BatchingLoader::new(
        batch_fn(|_keys: Vec<String>| async move { Err(LoadError::msg("database unavailable")) }),
        LoaderOptions::default(),
    );

    let (a, b) = tokio::join!(loader.load("a".to_string()), loader.load("b".to_string()));
    assert_eq!(assert_err!(a).to_string(), "database unavailable");
    assert_eq!(assert_err!(b).to_string(), "database unavailable");
}

// == Key Encoding ==

/// Map keys JSON cannot encode: its object keys must be strings.
type Tags = BTreeMap<Vec<u8>, u8>;

fn tag_sums(keys: &[Tags]) -> Vec<Settled<u32>> {
    keys.iter()
        .map(|tags| Ok(tags.values().map(|&v| u32::from(v)).sum()))
        .collect()
}

#[tokio::test]
async fn test_keys_without_json_form_are_rejected_not_shared() {
    let calls: Calls<Tags> = Arc::default();
    let sink = Arc::clone(&calls);
    let loader: BatchingLoader<Tags, u32> = BatchingLoader::new(
        batch_fn(move |keys: Vec<Tags>| {
            sink.lock().push(keys.clone());
            async move { Ok(tag_sums(&keys)) }
        }),
        LoaderOptions::new(json_key_fn()),
    );
    let (a, b) = (Tags::from([(vec![1], 1)]), Tags::from([(vec![2], 2)]));

    assert!(matches!(loader.load(a.clone()).await, Err(LoadError::Key(_))));
    assert!(matches!(loader.load(b.clone()).await, Err(LoadError::Key(_))));
    assert_err!(loader.cache_key(&a));
    assert!(matches!(loader.prime(b, 7), Err(CacheError::Key(_))));

    assert!(calls.lock().is_empty());
    assert!(loader.cache().is_empty());

    // an empty map still has a JSON form
    assert_eq!(assert_ok!(loader.load(Tags::new()).await), 0);
    assert_eq!(calls.lock().len(), 1);
}

// == Notifications ==

#[tokio::test]
async fn test_subscriber_sees_settled_value_and_clear() {
    let (loader, _calls) = user_loader(default_options());
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&seen);

    let key = lookup(5, "a");
    let _subscription = assert_ok!(loader.subscribe(
        &key,
        Listener::new(move |event: &CacheEvent<UserLookup, String>| {
            if let CacheEvent::Item { action, value } = event {
                sink.lock().push(format!("{action}:{}", value.ready().map_or("-", String::as_str)));
            }
            Ok(())
        }),
    ));

    assert_ok!(loader.load(key.clone()).await);
    settle().await;
    assert!(assert_ok!(loader.clear(&key)));
    assert!(!assert_ok!(loader.clear(&key)));

    assert_eq!(*seen.lock(), vec!["set:user-5", "delete:user-5"]);
}

#[tokio::test]
async fn test_action_channel_reports_raw_keys() {
    let (loader, _calls) = user_loader(default_options());
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&log);
    loader.cache().events().all_on(WildcardListener::new(
        move |event: &str, payload: &CacheEvent<UserLookup, String>| {
            if let CacheEvent::Action { key, .. } = payload {
                sink.lock().push(format!("{event}:{}", key.requested_by));
            }
            Ok(())
        },
    ));

    assert_ok!(loader.load(lookup(7, "carol")).await);
    settle().await;
    assert_ok!(loader.clear(&lookup(7, "dave")));

    assert_eq!(
        *log.lock(),
        vec![format!("{SET_EVENT}:carol"), format!("{DELETE_EVENT}:dave")]
    );
}

#[tokio::test]
async fn test_failing_listener_is_rerouted_to_error_channel() {
    let (loader, _calls) = user_loader(default_options());
    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&errors);
    let events = loader.cache().events();
    events.on(
        "error",
        Listener::new(move |event: &CacheEvent<UserLookup, String>| {
            if let CacheEvent::Error(err) = event {
                sink.lock().push(err.to_string());
            }
            Ok(())
        }),
    );
    let broken = Listener::new(|_: &CacheEvent<UserLookup, String>| {
        Err(ListenerError::msg("listener broke"))
    });
    events.once(SET_EVENT, broken);

    assert!(assert_ok!(loader.prime(lookup(9, "a"), "primed".to_string())));
    assert!(assert_ok!(loader.prime(lookup(11, "a"), "primed".to_string())));

    // a once listener that never succeeds keeps its registration
    assert_eq!(*errors.lock(), vec!["listener broke", "listener broke"]);
    assert_eq!(events.listener_count(SET_EVENT), 2);
}

#[tokio::test]
async fn test_evicted_entry_is_announced_and_reloaded() {
    let (loader, calls) = user_loader(default_options().lru_cache_max(1));
    let deleted: Arc<Mutex<Vec<u32>>> = Arc::default();
    let sink = Arc::clone(&deleted);
    loader.cache().events().on(
        DELETE_EVENT,
        Listener::new(move |event: &CacheEvent<UserLookup, String>| {
            if let CacheEvent::Action { key, .. } = event {
                sink.lock().push(key.id);
            }
            Ok(())
        }),
    );

    assert_ok!(loader.load(lookup(1, "a")).await);
    assert_ok!(loader.load(lookup(3, "a")).await);
    settle().await;
    assert_ok!(loader.load(lookup(1, "a")).await);

    assert_eq!(deleted.lock()[0], 1);
    assert_eq!(requested_ids(&calls), vec![vec![1], vec![3], vec![1]]);
}

// == Custom Parts ==

/// Executor answering every key immediately, without batching.
struct Immediate;

impl BatchExecute<String, usize> for Immediate {
    fn enqueue(&self, key: String) -> BoxFuture<'static, Settled<usize>> {
        async move { Ok(key.len()) }.boxed()
    }
}

#[tokio::test]
async fn test_custom_executor_and_cache() {
    let options = CacheOptions::default().key_fn(|k: &String| k.trim().to_string());
    let cache: TtlCache<String, usize> = TtlCache::new(options);
    let loader = BatchingLoader::with_parts(Immediate, cache.clone(), &LoaderOptions::default());

    assert_eq!(assert_ok!(loader.load(" abc ".to_string()).await), 5);
    settle().await;

    // the padded key was answered first and cached under the trimmed key
    assert_eq!(assert_ok!(loader.load("abc".to_string()).await), 5);
    assert!(matches!(cache.get(&"abc".to_string()), Some(CacheValue::Ready(5))));
}
