//! Byte sources feeding the frame extractor: the serial optical head or a
//! synthetic meter for installations without one.

use chrono::{Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::config::{SerialConfig, SimulatedConfig, SourceConfig, SourceKind};
use crate::decode::{decode, encode_frame};
use crate::error::AppError;
use crate::frame::FrameExtractor;
use crate::ingest::{shutdown_requested, IngestionTask, ReadingSink};

/// Open the optical head: 8 data bits, no parity, one stop bit.
pub fn open_serial(cfg: &SerialConfig) -> Result<SerialStream, AppError> {
    let port = tokio_serial::new(&cfg.path, cfg.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;
    info!(path = %cfg.path, baud = cfg.baud_rate, "serial port opened");
    Ok(port)
}

/// Push raw bytes through extraction and decoding, handing readings to `sink`.
/// Returns the number of non-empty readings produced.
pub async fn process_bytes(
    extractor: &mut FrameExtractor,
    bytes: &[u8],
    sink: &dyn ReadingSink,
) -> usize {
    let mut produced = 0;
    for frame in extractor.feed_slice(bytes) {
        let reading = decode(&frame, Utc::now());
        if reading.is_empty() {
            debug!(frame = %frame.to_hex(), "frame carried none of the known registers");
            continue;
        }
        produced += 1;
        if let Err(e) = sink.accept(reading).await {
            warn!(error = %e, "reading rejected by sink");
        }
    }
    produced
}

/// Read the device until shutdown. A read error or end of stream ends the
/// task; callers keep serving stored data.
pub async fn run_reader<R>(
    mut reader: R,
    mut extractor: FrameExtractor,
    sink: &dyn ReadingSink,
    read_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return Ok(()),
            res = reader.read(&mut buf) => res.map_err(|e| AppError::Transport(e.to_string()))?,
        };
        if n == 0 {
            return Err(AppError::Transport("device stream closed".into()));
        }
        let produced = process_bytes(&mut extractor, &buf[..n], sink).await;
        if produced > 0 && !read_delay.is_zero() {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return Ok(()),
                _ = tokio::time::sleep(read_delay) => {}
            }
        }
    }
}

/// Start the configured byte source feeding `sink`.
/// `Ok(None)` when no local source is configured.
pub fn start_source(
    source: &SourceConfig,
    sink: Arc<dyn ReadingSink>,
) -> Result<Option<IngestionTask>, AppError> {
    let extractor = FrameExtractor::new(source.max_frame_bytes);
    match source.kind {
        SourceKind::Serial => {
            let serial = source.serial.as_ref().ok_or_else(|| {
                AppError::Config("source.kind 'serial' requires a source.serial section".into())
            })?;
            let port = open_serial(serial)?;
            let read_delay = Duration::from_millis(source.read_delay_ms);
            Ok(Some(IngestionTask::spawn("serial", move |shutdown| async move {
                run_reader(port, extractor, sink.as_ref(), read_delay, shutdown).await
            })))
        }
        SourceKind::Simulated => {
            let sim = source.simulated.clone();
            Ok(Some(IngestionTask::spawn("simulated", move |shutdown| async move {
                run_simulated(sim, extractor, sink.as_ref(), shutdown).await
            })))
        }
        SourceKind::None => Ok(None),
    }
}

/// Synthetic two-tariff meter producing well-formed frames.
#[derive(Debug, Clone)]
pub struct SimulatedMeter {
    energy_nt: f64,
    energy_ht: f64,
    base_power_w: f64,
    tick: u64,
}

impl SimulatedMeter {
    pub fn new(base_power_w: f64) -> Self {
        Self {
            energy_nt: 1000.0,
            energy_ht: 500.0,
            base_power_w,
            tick: 0,
        }
    }

    /// Advance by `elapsed` and return the next frame's bytes.
    /// Night hours (22-06) count on the low tariff register.
    pub fn next_frame(&mut self, elapsed: Duration, hour: u32) -> Vec<u8> {
        self.tick += 1;
        let swing = (self.tick as f64 / 10.0).sin() * 0.2;
        let power = (self.base_power_w * (1.0 + swing)).max(0.0);
        let kwh = power * elapsed.as_secs_f64() / 3_600_000.0;
        if !(6..22).contains(&hour) {
            self.energy_nt += kwh;
        } else {
            self.energy_ht += kwh;
        }
        encode_frame(
            Some((self.energy_nt * 1e4).round() / 1e4),
            Some((self.energy_ht * 1e4).round() / 1e4),
            Some((power * 10.0).round() / 10.0),
        )
        .as_bytes()
        .to_vec()
    }
}

pub async fn run_simulated(
    cfg: SimulatedConfig,
    mut extractor: FrameExtractor,
    sink: &dyn ReadingSink,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let interval = Duration::from_millis(cfg.interval_ms.max(1));
    let mut meter = SimulatedMeter::new(cfg.power_w);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return Ok(()),
            _ = ticker.tick() => {
                let bytes = meter.next_frame(interval, Utc::now().hour());
                process_bytes(&mut extractor, &bytes, sink).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Reading>>);

    #[async_trait]
    impl ReadingSink for Collect {
        async fn accept(&self, reading: Reading) -> Result<(), AppError> {
            self.0.lock().unwrap().push(reading);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reader_ends_with_transport_error_on_eof() {
        let sink = Collect::default();
        let mut input = vec![0xFF, 0x00];
        input.extend(encode_frame(Some(1.0), Some(2.0), Some(3.0)).as_bytes());
        let (_tx, rx) = watch::channel(false);

        let res = run_reader(
            input.as_slice(),
            FrameExtractor::default(),
            &sink,
            Duration::ZERO,
            rx,
        )
        .await;

        assert!(matches!(res, Err(AppError::Transport(_))));
        let got = sink.0.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].power, Some(3.0));
    }

    #[tokio::test]
    async fn test_reader_honours_shutdown() {
        let sink = Collect::default();
        let (client, _server) = tokio::io::duplex(64);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let res = run_reader(client, FrameExtractor::default(), &sink, Duration::ZERO, rx).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_start_source_reports_open_failure() {
        let cfg = SourceConfig {
            kind: SourceKind::Serial,
            serial: Some(SerialConfig {
                path: "/dev/no-such-meter-head".into(),
                baud_rate: 9600,
            }),
            ..SourceConfig::default()
        };
        let res = start_source(&cfg, Arc::new(Collect::default()));
        assert!(matches!(res, Err(AppError::Transport(_))));
    }

    #[tokio::test]
    async fn test_start_source_without_serial_section() {
        let cfg = SourceConfig {
            kind: SourceKind::Serial,
            ..SourceConfig::default()
        };
        let res = start_source(&cfg, Arc::new(Collect::default()));
        assert!(matches!(res, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_source_simulated_and_none() {
        let none = start_source(&SourceConfig::default(), Arc::new(Collect::default())).unwrap();
        assert!(none.is_none());

        let cfg = SourceConfig {
            kind: SourceKind::Simulated,
            ..SourceConfig::default()
        };
        let task = start_source(&cfg, Arc::new(Collect::default()))
            .unwrap()
            .expect("simulated task");
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_simulated_meter_registers_increase() {
        let sink = Collect::default();
        let mut meter = SimulatedMeter::new(2000.0);
        let mut ex = FrameExtractor::default();
        for hour in [3, 12, 23] {
            let bytes = meter.next_frame(Duration::from_secs(3600), hour);
            assert_eq!(process_bytes(&mut ex, &bytes, &sink).await, 1);
        }
        let got = sink.0.lock().unwrap();
        assert!(got[1].energy_nt == got[0].energy_nt);
        assert!(got[1].energy_ht > got[0].energy_ht);
        assert!(got[2].energy_nt > got[1].energy_nt);
        assert!(got.iter().all(|r| r.power.unwrap() > 0.0));
    }
}
