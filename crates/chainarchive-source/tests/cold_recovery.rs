//! Cache-backed payload retrieval, including recovery of evicted blocks from
//! the archive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use chainarchive_core::reader::{encode_blocks, BlockRecord, JsonLinesReaderFactory};
use chainarchive_core::{ArchiveError, Block, HandlerFn, PayloadCache, PayloadSetter};
use chainarchive_source::{CachedPayloadSetter, FileSourceBuilder, PayloadCacheContext};
use chainarchive_storage::{MemoryObjectStore, MemoryPayloadCache};

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn id(n: u64) -> String {
    format!("{n:08x}")
}

fn archive(numbers: impl IntoIterator<Item = u64>) -> Vec<u8> {
    let records: Vec<BlockRecord> = numbers
        .into_iter()
        .map(|n| {
            BlockRecord::new(id(n), n, id(n.saturating_sub(1)), at(n), format!("payload-{n}").as_bytes())
        })
        .collect();
    encode_blocks(&records).unwrap()
}

fn at(n: u64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_600_000_000 + n as i64, 0).unwrap()
}

fn context(cache: Arc<MemoryPayloadCache>, store: Arc<MemoryObjectStore>) -> Arc<PayloadCacheContext> {
    Arc::new(
        PayloadCacheContext::new(cache, store)
            .with_retry_delay(Duration::from_millis(5))
            .with_recovery_retry_limit(1),
    )
}

/// A block whose payload was written through `setter`.
async fn cached_block(setter: &CachedPayloadSetter, block_id: &str, n: u64, data: &'static [u8]) -> Block {
    let blk = Block::new(block_id, n, id(n.saturating_sub(1)), at(n));
    setter.set_payload(blk, Bytes::from_static(data)).await.unwrap()
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("payload retrieval did not finish in time")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cache_hit_never_touches_the_store() {
    let cache = Arc::new(MemoryPayloadCache::new(1 << 20, 1 << 20));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    let setter = CachedPayloadSetter::new(context(cache.clone(), store.clone()));

    let blk = cached_block(&setter, &id(505), 505, b"payload-505").await;
    assert!(cache.contains(&id(505)));

    assert_eq!(blk.payload.get().await.unwrap(), Bytes::from_static(b"payload-505"));
    assert_eq!(blk.payload.len().await, 11);
    assert!(store.exists_checks().is_empty());
    assert!(store.opened().is_empty());
}

#[tokio::test]
async fn evicted_payload_is_recovered_from_archive() {
    // nothing fits: every write is evicted right away
    let cache = Arc::new(MemoryPayloadCache::new(0, 0));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    store.put("0000000500", archive(500..510));
    let setter = CachedPayloadSetter::new(context(cache.clone(), store.clone()));

    let blk = cached_block(&setter, &id(505), 505, b"payload-505").await;
    assert!(cache.is_empty());

    let data = within(blk.payload.get()).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"payload-505"));
    assert_eq!(store.opened(), vec!["0000000500"]);
}

#[tokio::test]
async fn recovered_payload_is_written_back() {
    let cache = Arc::new(MemoryPayloadCache::new(16, 0));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    store.put("0000000500", archive(500..510));
    let setter = CachedPayloadSetter::new(context(cache.clone(), store.clone()));

    let blk = cached_block(&setter, &id(505), 505, b"payload-505").await;
    // a newer write pushes 505 out of the recent budget
    cache
        .write("filler", at(900), Utc::now(), Bytes::from_static(b"0123456789a"))
        .await
        .unwrap();
    assert!(!cache.contains(&id(505)));

    let data = within(blk.payload.get()).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"payload-505"));
    assert!(cache.contains(&id(505)));
    assert!(!cache.contains("filler"));

    // served from the cache this time
    blk.payload.get().await.unwrap();
    assert_eq!(store.opened().len(), 1);
}

#[tokio::test]
async fn unknown_block_in_present_file_is_not_found() {
    let cache = Arc::new(MemoryPayloadCache::new(0, 0));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    store.put("0000000500", archive(500..510));
    let setter = CachedPayloadSetter::new(context(cache, store));

    // same number, different id: a block from a fork the archive never had
    let blk = cached_block(&setter, "deadbeef", 505, b"orphan").await;

    let err = within(blk.payload.get()).await.unwrap_err();
    assert_eq!(err, ArchiveError::BlockNotFound { id: "deadbeef".into(), number: 505 });
    assert!(err.is_not_found());
    assert_eq!(within(blk.payload.len()).await, -1);
}

#[tokio::test]
async fn missing_archive_file_is_not_found() {
    let cache = Arc::new(MemoryPayloadCache::new(0, 0));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    let setter = CachedPayloadSetter::new(context(cache, store.clone()));

    let blk = cached_block(&setter, &id(1_234), 1_234, b"payload-1234").await;

    let err = within(blk.payload.get()).await.unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
    // first lookup plus one retry
    assert_eq!(store.exists_checks(), vec!["0000001200", "0000001200"]);
}

#[tokio::test]
async fn recovery_falls_back_to_secondary_store() {
    let cache = Arc::new(MemoryPayloadCache::new(0, 0));
    let primary = Arc::new(MemoryObjectStore::new("primary"));
    let backup = Arc::new(MemoryObjectStore::new("backup"));
    backup.put("0000000500", archive(500..510));

    let ctx = PayloadCacheContext::new(cache, primary.clone())
        .with_secondary_blocks_stores(vec![backup.clone()])
        .with_retry_delay(Duration::from_millis(5))
        .with_recovery_retry_limit(0);

    let blk = within(ctx.recover_block(&id(507), 507)).await.unwrap();
    assert_eq!(blk.number, 507);
    assert_eq!(blk.payload.get().await.unwrap(), Bytes::from_static(b"payload-507"));
    assert!(primary.opened().is_empty());
    assert_eq!(backup.opened(), vec!["0000000500"]);
}

#[tokio::test]
async fn streaming_through_cached_setter_fills_cache() {
    let cache = Arc::new(MemoryPayloadCache::new(1 << 20, 1 << 20));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    store.put("0000000500", archive(500..505));
    let ctx = context(cache.clone(), store.clone());

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let sizes = Arc::clone(&sizes);
        HandlerFn(move |blk: &Block, _obj: Option<&Value>| -> Result<(), ArchiveError> {
            sizes.lock().unwrap().push(blk.number);
            Ok(())
        })
    };

    let factory = JsonLinesReaderFactory::new(Arc::new(CachedPayloadSetter::new(ctx)));
    let source = FileSourceBuilder::new(store, Arc::new(handler))
        .start_block(500)
        .stop_block(599)
        .reader_factory(Arc::new(factory))
        .build()
        .unwrap();
    within(source.run()).await.unwrap();

    assert_eq!(*sizes.lock().unwrap(), vec![500, 501, 502, 503, 504]);
    assert_eq!(cache.len(), 5);
    for n in 500..505 {
        let data = cache.read(&id(n)).await.unwrap().unwrap();
        assert_eq!(data, Bytes::from(format!("payload-{n}")));
    }
}

#[tokio::test]
async fn fetch_payload_warms_cache_for_the_next_lookup() {
    let cache = Arc::new(MemoryPayloadCache::new(1 << 20, 1 << 20));
    let store = Arc::new(MemoryObjectStore::new("merged"));
    store.put("0000000800", archive(800..805));
    let ctx = context(cache.clone(), store.clone());

    let data = within(ctx.fetch_payload(&id(803), 803)).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"payload-803"));
    assert!(cache.contains(&id(803)));
    assert_eq!(store.opened(), vec!["0000000800"]);

    // second lookup is served from the cache
    let again = within(ctx.fetch_payload(&id(803), 803)).await.unwrap();
    assert_eq!(again, data);
    assert_eq!(store.opened(), vec!["0000000800"]);
}
