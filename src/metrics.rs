use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Logs elapsed time for a migration or one of its steps. Thresholds default
/// to values tuned for bulk database work rather than request handling.
pub struct Timer {
    start: Instant,
    operation: String,
    threshold_warn: Duration,
    threshold_error: Duration,
}

impl Timer {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.into(),
            threshold_warn: Duration::from_secs(30),
            threshold_error: Duration::from_secs(300),
        }
    }

    pub fn with_thresholds(mut self, warn_secs: u64, error_secs: u64) -> Self {
        self.threshold_warn = Duration::from_secs(warn_secs);
        self.threshold_error = Duration::from_secs(error_secs);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn log_elapsed(&self, additional_context: Option<&str>) {
        let elapsed = self.elapsed();
        let elapsed_ms = elapsed.as_millis();
        let context = if let Some(ctx) = additional_context {
            format!("{} ({})", self.operation, ctx)
        } else {
            self.operation.clone()
        };
        if elapsed > self.threshold_error {
            warn!(operation = %context, duration_ms = %elapsed_ms, "Operation exceeded error threshold");
        } else if elapsed > self.threshold_warn {
            warn!(operation = %context, duration_ms = %elapsed_ms, "Operation exceeded warning threshold");
        } else {
            info!(operation = %context, duration_ms = %elapsed_ms, "Operation completed");
        }
    }
}

pub async fn time_step<F, T, E>(step: &str, collection: &str, f: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let timer = Timer::new(format!("migration::{}", step));
    let result = f.await;
    timer.log_elapsed(Some(collection));
    result
}
