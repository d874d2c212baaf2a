//! End-to-end engine tests
//!
//! Drive the engine through an in-process transport and check the cache,
//! the control calls, and what lands on disk:
//! - Ingest → cache → tick log → replay in arrival order
//! - Rotation starts only once the transport connects
//! - On-demand subscription for an uncached symbol
//! - Date rollover writes the new day's log and instrument map
//! - Storage failure leaves the cache running and is reported on stop

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use market_data::clock::FixedClock;
use market_data::transport::{channel_feed, ControlCall, RecordingControl};
use market_data::{start_engine, EngineConfig, EngineError, EngineHandle, FeedEvent, QueryError, StreamMode};
use persistence::paths::{instrument_map_path, tick_log_path};
use persistence::read_instrument_map;
use tempfile::TempDir;
use tokio::sync::mpsc;
use types::instrument::{Instrument, InstrumentDirectory};
use types::tick::PacketKind;

fn instrument(token: u32, exchange: &str, symbol: &str, segment: &str, lot_size: u32) -> Instrument {
    Instrument {
        token,
        trading_symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        name: symbol.to_string(),
        expiry: String::new(),
        strike: 0.0,
        tick_size: 0.05,
        lot_size,
        instrument_type: "EQ".to_string(),
        segment: segment.to_string(),
    }
}

fn directory() -> Arc<InstrumentDirectory> {
    Arc::new(
        InstrumentDirectory::new(vec![
            instrument(408065, "NSE", "INFY", "NSE", 1),
            instrument(2885, "NSE", "RELIANCE", "NSE", 1),
            instrument(53496327, "MCX", "CRUDEOIL24DECFUT", "MCX-FUT", 100),
            // Not part of the rotating universe
            instrument(500325, "BSE", "RELIANCE", "BSE", 1),
        ])
        .unwrap(),
    )
}

fn trading_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 5).unwrap()
}

fn packet(fields: &[u32]) -> Vec<u8> {
    fields.iter().flat_map(|f| f.to_be_bytes()).collect()
}

fn message(packets: &[Vec<u8>]) -> Vec<u8> {
    let mut out = (packets.len() as u16).to_be_bytes().to_vec();
    for p in packets {
        out.extend_from_slice(&(p.len() as u16).to_be_bytes());
        out.extend_from_slice(p);
    }
    out
}

struct Harness {
    _tmp: TempDir,
    data_dir: std::path::PathBuf,
    feed: mpsc::Sender<FeedEvent>,
    control: Arc<RecordingControl>,
    clock: Arc<FixedClock>,
    engine: EngineHandle,
}

async fn harness(batch_size: usize) -> Harness {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("binary");
    let mut config = EngineConfig::new(60.0, batch_size);
    config.data_dir = data_dir.clone();
    config.quote_wait_timeout_ms = 3000;
    config.quote_poll_interval_ms = 10;

    let (feed, source) = channel_feed(64);
    let control = Arc::new(RecordingControl::new());
    let clock = Arc::new(FixedClock::at_venue(2024, 12, 5, 10, 0).unwrap());
    let engine = start_engine(
        config,
        directory(),
        Box::new(source),
        control.clone(),
        clock.clone(),
    )
    .await
    .unwrap();

    Harness {
        _tmp: tmp,
        data_dir,
        feed,
        control,
        clock,
        engine,
    }
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_ingest_cache_store_replay() {
    let h = harness(10).await;

    let full: Vec<u32> = {
        let mut f = vec![408065, 190_000];
        f.extend(3..=16);
        f
    };
    h.feed
        .send(FeedEvent::Message(message(&[packet(&[2885, 250_000]), packet(&full)])))
        .await
        .unwrap();
    h.feed
        .send(FeedEvent::Message(message(&[packet(&[777, 1_234])])))
        .await
        .unwrap();

    let engine = &h.engine;
    eventually("three ticks cached", || engine.metrics().ticks_cached == 3).await;

    let infy = engine.latest_tick("NSE", "INFY").unwrap();
    assert_eq!(infy.kind(), PacketKind::FullWithOi);
    assert_eq!(infy.lot_size, Some(1));
    // Bare symbol key points at the same tick
    assert!(Arc::ptr_eq(&infy, &engine.cache().get("INFY").unwrap()));
    // Unknown token is cached under its decimal string
    assert_eq!(engine.cache().get("777").unwrap().lot_size, None);

    let data_dir = h.data_dir.clone();
    h.engine.stop().await.unwrap();

    let replayed: Vec<u32> = market_data::read_log(&data_dir, trading_day())
        .unwrap()
        .map(|t| t.unwrap().token)
        .collect();
    assert_eq!(replayed, vec![2885, 408065, 777]);

    let map = read_instrument_map(&data_dir, trading_day()).unwrap();
    assert_eq!(map.len(), 4);
}

#[tokio::test]
async fn test_read_log_is_restartable() {
    let h = harness(10).await;
    for ltp in [100u32, 101, 102] {
        h.feed
            .send(FeedEvent::Message(message(&[packet(&[2885, ltp])])))
            .await
            .unwrap();
    }
    let engine = &h.engine;
    eventually("three frames", || engine.metrics().frames_written == 3).await;

    let mut reader = engine.read_log(trading_day()).unwrap();
    let first = reader.read_all().unwrap();
    reader.rewind().unwrap();
    let second = reader.read_all().unwrap();
    assert_eq!(first, second);
    let prices: Vec<u32> = first.iter().map(|t| t.last_price.raw()).collect();
    assert_eq!(prices, vec![100, 101, 102]);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_rotation_waits_for_connection() {
    let h = harness(2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.control.calls().is_empty());
    assert!(!h.engine.is_connected());

    h.feed.send(FeedEvent::Connected).await.unwrap();
    let control = h.control.clone();
    eventually("first batch subscribed", || !control.calls().is_empty()).await;

    // Universe is sorted by token: 2885, 408065 | 53496327
    assert_eq!(
        h.control.calls()[0],
        ControlCall::Subscribe {
            tokens: vec![2885, 408065],
            mode: StreamMode::Full,
        }
    );
    assert!(h.engine.is_connected());
    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_on_demand_subscription_for_uncached_symbol() {
    let h = harness(2).await;
    h.feed.send(FeedEvent::Connected).await.unwrap();
    let control = h.control.clone();
    eventually("rotation running", || !control.calls().is_empty()).await;

    let feed = h.feed.clone();
    let watcher = h.control.clone();
    tokio::spawn(async move {
        let wanted = ControlCall::Subscribe {
            tokens: vec![500325],
            mode: StreamMode::Full,
        };
        while !watcher.calls().contains(&wanted) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        feed.send(FeedEvent::Message(message(&[packet(&[500325, 125_000])])))
            .await
            .unwrap();
    });

    let tick = h.engine.wait_for_tick("BSE", "RELIANCE").await.unwrap();
    assert_eq!(tick.token, 500325);
    assert_eq!(h.engine.metrics().on_demand_subscriptions, 1);

    assert!(matches!(
        h.engine.wait_for_tick("BSE", "NOSUCH").await,
        Err(QueryError::UnknownInstrument { .. })
    ));
    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_on_demand_requires_connection() {
    let h = harness(2).await;
    assert!(matches!(
        h.engine.wait_for_tick("NSE", "INFY").await,
        Err(QueryError::Subscription(_))
    ));
    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_date_rollover_opens_new_day() {
    let h = harness(10).await;
    h.feed
        .send(FeedEvent::Message(message(&[packet(&[2885, 1])])))
        .await
        .unwrap();
    let engine = &h.engine;
    eventually("first frame", || engine.metrics().frames_written == 1).await;

    h.clock.advance(chrono::Duration::days(1));
    h.feed
        .send(FeedEvent::Message(message(&[packet(&[2885, 2])])))
        .await
        .unwrap();
    eventually("second frame", || engine.metrics().frames_written == 2).await;

    let data_dir = h.data_dir.clone();
    h.engine.stop().await.unwrap();

    let next_day = trading_day().succ_opt().unwrap();
    assert!(tick_log_path(&data_dir, trading_day()).exists());
    assert!(tick_log_path(&data_dir, next_day).exists());
    assert!(instrument_map_path(&data_dir, next_day).exists());

    let day_two: Vec<u32> = market_data::read_log(&data_dir, next_day)
        .unwrap()
        .map(|t| t.unwrap().last_price.raw())
        .collect();
    assert_eq!(day_two, vec![2]);
}

#[tokio::test]
async fn test_storage_failure_keeps_cache_running() {
    let h = harness(10).await;
    h.feed
        .send(FeedEvent::Message(message(&[packet(&[2885, 1])])))
        .await
        .unwrap();
    let engine = &h.engine;
    eventually("first frame", || engine.metrics().frames_written == 1).await;

    // Rolling into a directory that no longer exists fails
    std::fs::remove_dir_all(&h.data_dir).unwrap();
    h.clock.advance(chrono::Duration::days(1));
    h.feed
        .send(FeedEvent::Message(message(&[packet(&[2885, 2])])))
        .await
        .unwrap();
    eventually("storage failure", || engine.metrics().storage_failures == 1).await;

    h.feed
        .send(FeedEvent::Message(message(&[packet(&[2885, 3])])))
        .await
        .unwrap();
    eventually("cache still updating", || {
        engine
            .latest_tick("NSE", "RELIANCE")
            .map(|t| t.last_price.raw() == 3)
            .unwrap_or(false)
    })
    .await;

    assert!(matches!(h.engine.stop().await, Err(EngineError::Storage(_))));
}

#[tokio::test]
async fn test_unwritable_data_dir_fails_start() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let mut config = EngineConfig::new(1.0, 1);
    config.data_dir = blocker;

    let (_feed, source) = channel_feed(1);
    let result = start_engine(
        config,
        directory(),
        Box::new(source),
        Arc::new(RecordingControl::new()),
        Arc::new(FixedClock::at_venue(2024, 12, 5, 10, 0).unwrap()),
    )
    .await;
    assert!(matches!(result, Err(EngineError::Storage(_))));
}
