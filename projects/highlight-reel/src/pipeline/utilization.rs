// Background accelerator-utilization sampling during inference.

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Source of a single utilization reading, in percent.
pub trait UtilizationProbe: Send + 'static {
    fn sample(&mut self) -> Option<u32>;
}

/// Reads the first GPU's utilization through `nvidia-smi`.
pub struct NvidiaSmi;

impl UtilizationProbe for NvidiaSmi {
    fn sample(&mut self) -> Option<u32> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=utilization.gpu",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()?
            .trim()
            .parse()
            .ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationSummary {
    pub samples: usize,
    pub average: f64,
    pub peak: u32,
}

impl UtilizationSummary {
    pub fn from_samples(samples: &[u32]) -> Self {
        if samples.is_empty() {
            return Self {
                samples: 0,
                average: 0.0,
                peak: 0,
            };
        }
        let sum: u64 = samples.iter().map(|&s| u64::from(s)).sum();
        Self {
            samples: samples.len(),
            average: sum as f64 / samples.len() as f64,
            peak: samples.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Polls a probe on its own thread until stopped. Dropping the monitor stops it.
pub struct UtilizationMonitor {
    samples: Arc<Mutex<Vec<u32>>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl UtilizationMonitor {
    pub fn start<P: UtilizationProbe>(mut probe: P, interval: Duration) -> Self {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let buffer = Arc::clone(&samples);
        let handle = std::thread::spawn(move || loop {
            // A failed read is recorded as idle
            let value = probe.sample().unwrap_or(0);
            if let Ok(mut buf) = buffer.lock() {
                buf.push(value);
            }
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        });

        Self {
            samples,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Utilization monitor thread panicked");
            }
        }
    }

    pub fn stop(mut self) -> UtilizationSummary {
        self.shutdown();
        let samples = self.samples.lock().map(|s| s.clone()).unwrap_or_default();
        UtilizationSummary::from_samples(&samples)
    }
}

impl Drop for UtilizationMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
