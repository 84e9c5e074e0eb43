//! Simulated Upload Client with Fault Injection
//!
//! DST-compatible wrapper that injects transient failures and latency using
//! buggify. Only retryable faults are injected, so a correct engine either
//! converges or stops with `RetriesExhausted`, never a definitive error.

use crate::buggify::{faults, FaultConfig, FaultInjector, FaultStats};
use crate::io::Rng;
use crate::store::{EntryBody, UploadClient, UploadError, UploadOptions};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const SLOW_REQUEST_FACTOR: u64 = 10;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedClientConfig {
    /// Probability an upload is answered with 503
    pub server_error_prob: f64,
    /// Probability an upload fails with no status
    pub connection_reset_prob: f64,
    /// Probability an upload fails after pulling its first chunk
    pub mid_stream_failure_prob: f64,
    /// Probability a directory create is answered with 503
    pub mkdir_fail_prob: f64,
    /// Upload latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
    /// Directory-create latency range in microseconds (min, max)
    pub mkdir_latency_range_us: (u64, u64),
}

impl Default for SimulatedClientConfig {
    fn default() -> Self {
        SimulatedClientConfig {
            server_error_prob: 0.02,           // 2%
            connection_reset_prob: 0.01,       // 1%
            mid_stream_failure_prob: 0.005,    // 0.5%
            mkdir_fail_prob: 0.02,             // 2%
            latency_range_us: (0, 500),        // up to 0.5ms
            mkdir_latency_range_us: (0, 2_000), // up to 2ms
        }
    }
}

impl SimulatedClientConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedClientConfig {
            server_error_prob: 0.10,
            connection_reset_prob: 0.05,
            mid_stream_failure_prob: 0.03,
            mkdir_fail_prob: 0.10,
            latency_range_us: (0, 2_000),
            mkdir_latency_range_us: (500, 5_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedClientConfig {
            server_error_prob: 0.0,
            connection_reset_prob: 0.0,
            mid_stream_failure_prob: 0.0,
            mkdir_fail_prob: 0.0,
            latency_range_us: (0, 0),
            mkdir_latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedClientStats {
    pub upload_attempts: u64,
    pub server_errors: u64,
    pub connection_resets: u64,
    pub mid_stream_failures: u64,
    pub mkdir_attempts: u64,
    pub mkdir_failures: u64,
}

impl SimulatedClientStats {
    pub fn injected_failures(&self) -> u64 {
        self.server_errors + self.connection_resets + self.mid_stream_failures + self.mkdir_failures
    }
}

struct SimulatedClientInner<R: Rng> {
    rng: R,
    faults: FaultInjector,
    stats: SimulatedClientStats,
}

impl<R: Rng> SimulatedClientInner<R> {
    /// Latency drawn from `(min, max)`; a triggered slow-request fault
    /// stretches it tenfold
    fn latency(&mut self, (min, max): (u64, u64), slow_fault: &'static str) -> Option<Duration> {
        if min == 0 && max == 0 {
            return None;
        }
        let mut us = if max > min {
            self.rng.gen_range(min, max)
        } else {
            min
        };
        if crate::buggify!(self.faults, &mut self.rng, slow_fault) {
            us = us.max(1) * SLOW_REQUEST_FACTOR;
        }
        (us > 0).then(|| Duration::from_micros(us))
    }
}

/// Fault planned for one upload, decided up front under the lock
enum UploadFault {
    ServerError,
    ConnectionReset,
    MidStream,
}

/// Upload client that wraps another client and injects faults
pub struct SimulatedUploadClient<C: UploadClient, R: Rng> {
    inner: C,
    config: SimulatedClientConfig,
    state: Arc<Mutex<SimulatedClientInner<R>>>,
}

impl<C: UploadClient, R: Rng> SimulatedUploadClient<C, R> {
    pub fn new(inner: C, rng: R, config: SimulatedClientConfig) -> Self {
        SimulatedUploadClient {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedClientInner {
                rng,
                faults: FaultInjector::new(FaultConfig::new()),
                stats: SimulatedClientStats::default(),
            })),
        }
    }

    /// Replace the configured fault probabilities (slow requests)
    pub fn with_fault_config(self, config: FaultConfig) -> Self {
        self.state.lock().faults = FaultInjector::new(config);
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedClientStats {
        self.state.lock().stats.clone()
    }

    /// Per-site check and trigger counts
    pub fn fault_stats(&self) -> FaultStats {
        self.state.lock().faults.stats().clone()
    }

    pub fn reset_stats(&self) {
        let mut s = self.state.lock();
        s.stats = SimulatedClientStats::default();
        s.faults.reset_stats();
    }

    fn plan_upload(&self) -> (Option<UploadFault>, Option<Duration>) {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        s.stats.upload_attempts += 1;

        let fault = if crate::buggify!(
            s.faults,
            &mut s.rng,
            faults::upload::CONNECTION_RESET,
            self.config.connection_reset_prob
        ) {
            s.stats.connection_resets += 1;
            Some(UploadFault::ConnectionReset)
        } else if crate::buggify!(
            s.faults,
            &mut s.rng,
            faults::upload::SERVER_ERROR,
            self.config.server_error_prob
        ) {
            s.stats.server_errors += 1;
            Some(UploadFault::ServerError)
        } else if crate::buggify!(
            s.faults,
            &mut s.rng,
            faults::upload::MID_STREAM_FAILURE,
            self.config.mid_stream_failure_prob
        ) {
            s.stats.mid_stream_failures += 1;
            Some(UploadFault::MidStream)
        } else {
            None
        };

        let latency = s.latency(self.config.latency_range_us, faults::upload::SLOW_REQUEST);
        (fault, latency)
    }

    fn plan_mkdir(&self) -> (bool, Option<Duration>) {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        s.stats.mkdir_attempts += 1;
        let fail = crate::buggify!(
            s.faults,
            &mut s.rng,
            faults::mkdir::SERVER_ERROR,
            self.config.mkdir_fail_prob
        );
        if fail {
            s.stats.mkdir_failures += 1;
        }
        let latency = s.latency(self.config.mkdir_latency_range_us, faults::mkdir::SLOW_REQUEST);
        (fail, latency)
    }
}

impl<C: UploadClient, R: Rng> UploadClient for SimulatedUploadClient<C, R> {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        body: &'a mut EntryBody,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            let (fault, latency) = self.plan_upload();

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            match fault {
                Some(UploadFault::ConnectionReset) => {
                    Err(UploadError::transient("simulated connection reset"))
                }
                Some(UploadFault::ServerError) => {
                    Err(UploadError::status(503, "simulated server error"))
                }
                Some(UploadFault::MidStream) => {
                    // Pull one chunk so the body can no longer be replayed
                    let _ = body.next_chunk().await;
                    Err(UploadError::status(502, "simulated failure mid-stream"))
                }
                None => self.inner.upload(path, body, options).await,
            }
        })
    }

    fn create_dir_all<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            let (fail, latency) = self.plan_mkdir();

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if fail {
                return Err(UploadError::status(503, "simulated mkdir failure"));
            }
            self.inner.create_dir_all(path).await
        })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;
    use crate::store::InMemoryUploadClient;

    fn options() -> UploadOptions {
        UploadOptions {
            overwrite: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_simulated_client_no_faults() {
        let inner = InMemoryUploadClient::new();
        let client = SimulatedUploadClient::new(
            inner.clone(),
            SimulatedRng::new(42),
            SimulatedClientConfig::no_faults(),
        );

        let mut body = EntryBody::from_bytes(&b"value"[..]);
        client.upload("/key", &mut body, &options()).await.unwrap();
        assert!(inner.get("/key").is_some());

        let stats = client.stats();
        assert_eq!(stats.upload_attempts, 1);
        assert_eq!(stats.injected_failures(), 0);
    }

    #[tokio::test]
    async fn test_simulated_client_deterministic() {
        let config = SimulatedClientConfig {
            server_error_prob: 0.5,
            ..SimulatedClientConfig::no_faults()
        };
        let client1 = SimulatedUploadClient::new(
            InMemoryUploadClient::new(),
            SimulatedRng::new(12345),
            config.clone(),
        );
        let client2 = SimulatedUploadClient::new(
            InMemoryUploadClient::new(),
            SimulatedRng::new(12345),
            config,
        );

        let mut results1 = Vec::new();
        let mut results2 = Vec::new();
        for i in 0..20 {
            let path = format!("/key{}", i);
            let mut body = EntryBody::from_bytes(&b"data"[..]);
            results1.push(client1.upload(&path, &mut body, &options()).await.is_ok());
            let mut body = EntryBody::from_bytes(&b"data"[..]);
            results2.push(client2.upload(&path, &mut body, &options()).await.is_ok());
        }

        assert_eq!(results1, results2, "Same seed should inject the same faults");
    }

    #[tokio::test]
    async fn test_injected_faults_are_transient() {
        let client = SimulatedUploadClient::new(
            InMemoryUploadClient::new(),
            SimulatedRng::new(7),
            SimulatedClientConfig {
                server_error_prob: 1.0,
                ..SimulatedClientConfig::no_faults()
            },
        );

        let mut body = EntryBody::from_bytes(&b"data"[..]);
        let err = client.upload("/key", &mut body, &options()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!body.is_started());
        assert_eq!(client.stats().server_errors, 1);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_consumes_body() {
        let client = SimulatedUploadClient::new(
            InMemoryUploadClient::new(),
            SimulatedRng::new(9),
            SimulatedClientConfig {
                mid_stream_failure_prob: 1.0,
                ..SimulatedClientConfig::no_faults()
            },
        );

        let mut body = EntryBody::from_bytes(&b"data"[..]);
        let err = client.upload("/key", &mut body, &options()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(body.is_started());
    }

    #[tokio::test]
    async fn test_mkdir_failure() {
        let inner = InMemoryUploadClient::new();
        let client = SimulatedUploadClient::new(
            inner.clone(),
            SimulatedRng::new(3),
            SimulatedClientConfig {
                mkdir_fail_prob: 1.0,
                ..SimulatedClientConfig::no_faults()
            },
        );

        assert!(client.create_dir_all("/a").await.unwrap_err().is_transient());
        assert!(!inner.dir_exists("/a"));
        assert_eq!(client.stats().mkdir_failures, 1);
        assert_eq!(client.fault_stats().triggers(faults::mkdir::SERVER_ERROR), 1);
    }

    #[tokio::test]
    async fn test_slow_request_fault_stretches_latency() {
        let client = SimulatedUploadClient::new(
            InMemoryUploadClient::new(),
            SimulatedRng::new(5),
            SimulatedClientConfig {
                mkdir_latency_range_us: (1_000, 1_000),
                ..SimulatedClientConfig::no_faults()
            },
        )
        .with_fault_config(FaultConfig::new().with(faults::mkdir::SLOW_REQUEST, 1.0));

        let start = tokio::time::Instant::now();
        client.create_dir_all("/slow").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(client.fault_stats().triggers(faults::mkdir::SLOW_REQUEST), 1);

        client.reset_stats();
        assert_eq!(client.fault_stats().total_triggers(), 0);
    }
}
