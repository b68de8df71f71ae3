// End-to-end: raw device bytes through extraction, decoding and the pipeline
// into an in-memory database.

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use smartmeter_ingest::aggregate::Aggregator;
use smartmeter_ingest::broker::Broker;
use smartmeter_ingest::db;
use smartmeter_ingest::decode::encode_frame;
use smartmeter_ingest::frame::FrameExtractor;
use smartmeter_ingest::ingest::{IngestionTask, Pipeline};
use smartmeter_ingest::repositories::{SqliteTierStore, TierStore};
use smartmeter_ingest::source::{process_bytes, run_reader};
use smartmeter_ingest::tier::{Tier, TierRow};
use smartmeter_ingest::Reading;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_test::assert_ok;

async fn setup() -> (Arc<Pipeline>, Arc<dyn TierStore>) {
    let pool = assert_ok!(db::connect("sqlite::memory:").await);
    assert_ok!(db::ensure_schema(&pool).await);
    let store: Arc<dyn TierStore> = Arc::new(SqliteTierStore::new(pool));
    let aggregator = Aggregator::restore(store.clone()).await;
    (Arc::new(Pipeline::new(aggregator, Broker::new())), store)
}

#[tokio::test]
async fn test_bytes_to_stored_reading() {
    let (pipeline, store) = setup().await;
    let mut sub = pipeline.broker().subscribe();

    let frame = encode_frame(Some(12345.6789), Some(2345.5), Some(512.3));
    let mut bytes = vec![0x00, 0x42, 0x1b, 0x1b, 0x99];
    bytes.extend_from_slice(frame.as_bytes());
    bytes.extend_from_slice(&[0xde, 0xad]);

    let mut extractor = FrameExtractor::default();
    // split delivery across two reads
    let (a, b) = bytes.split_at(17);
    assert_eq!(process_bytes(&mut extractor, a, pipeline.as_ref()).await, 0);
    assert_eq!(process_bytes(&mut extractor, b, pipeline.as_ref()).await, 1);

    let row = store.latest_raw().await.unwrap().expect("raw row stored");
    assert_eq!(row.energy_nt, 12345.6789);
    assert_eq!(row.energy_ht, 2345.5);
    assert_eq!(row.power, Some(512.3));

    let window = pipeline.window_snapshot();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].power, 512.3);

    let event = sub.try_recv().expect("update published");
    assert_eq!(event.name.as_deref(), Some("update"));
    assert!(event.data.contains("\"energyNT\":12345.6789"));
    assert!(sub.try_recv().is_none());

    // first reading on empty tiers seeds every summary
    for tier in Tier::SUMMARIES {
        assert_eq!(store.recent(tier, 10).await.unwrap().len(), 1, "{tier}");
    }
}

#[tokio::test]
async fn test_frame_without_registers_is_ignored() {
    let (pipeline, store) = setup().await;
    let mut extractor = FrameExtractor::default();

    let frame = encode_frame(None, None, None);
    assert_eq!(
        process_bytes(&mut extractor, frame.as_bytes(), pipeline.as_ref()).await,
        0
    );
    assert!(store.latest_raw().await.unwrap().is_none());
    assert!(pipeline.latest().is_none());
}

#[tokio::test]
async fn test_hour_of_readings_cascades() {
    let (pipeline, store) = setup().await;
    let t0 = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    // 61 minutes at 10 s spacing
    let mut nt = 100.0;
    for i in 0..=366 {
        nt += 0.001;
        let ts = t0 + Duration::seconds(i * 10);
        let reading = Reading::new(ts, Some(nt), Some(50.0), Some(300.0));
        pipeline.apply(reading).await.unwrap();
    }

    assert_eq!(store.recent(Tier::Raw, 1000).await.unwrap().len(), 367);
    assert_eq!(store.recent(Tier::Minute, 1000).await.unwrap().len(), 62);
    assert_eq!(store.recent(Tier::Hour, 1000).await.unwrap().len(), 2);
    assert_eq!(store.recent(Tier::Day, 1000).await.unwrap().len(), 1);
    assert_eq!(store.recent(Tier::Month, 1000).await.unwrap().len(), 1);

    // window spacing is one entry per minute
    assert_eq!(pipeline.window_snapshot().len(), 60);

    match &store.recent(Tier::Hour, 1).await.unwrap()[0] {
        TierRow::Summary(row) => assert_eq!(row.ts, t0 + Duration::minutes(60)),
        other => panic!("unexpected row {other:?}"),
    }
}

#[tokio::test]
async fn test_restored_aggregator_continues_cadence() {
    let (pipeline, store) = setup().await;
    let t0 = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    pipeline
        .apply(Reading::new(t0, Some(1.0), Some(2.0), None))
        .await
        .unwrap();

    // restart: a fresh aggregator over the same store
    let restored = Aggregator::restore(store.clone()).await;
    assert_eq!(restored.last_committed(Tier::Hour).await, Some(t0));

    let report = restored
        .record(&Reading::new(t0 + Duration::seconds(30), Some(1.1), Some(2.0), None))
        .await;
    assert_eq!(report.committed, vec![Tier::Raw]);
}

#[tokio::test]
async fn test_reader_task_ingests_until_stream_closes() {
    let (pipeline, store) = setup().await;
    let (mut device, reader) = tokio::io::duplex(1024);

    let sink = pipeline.clone();
    let task = IngestionTask::spawn("duplex", move |shutdown| async move {
        run_reader(
            reader,
            FrameExtractor::default(),
            sink.as_ref(),
            std::time::Duration::ZERO,
            shutdown,
        )
        .await
    });

    let frame = encode_frame(Some(10.0), Some(20.0), Some(1500.0));
    device.write_all(frame.as_bytes()).await.unwrap();
    drop(device);

    // end of stream ends ingestion; stored data stays readable
    let res = task.run_until(std::future::pending()).await;
    assert!(res.is_err());
    let row = store.latest_raw().await.unwrap().expect("row before close");
    assert_eq!(row.power, Some(1500.0));
}
