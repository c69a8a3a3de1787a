//! Closure-backed collector.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::collector::{Collector, CollectorError};
use crate::storage::Record;

/// Collector that delegates to an async closure.
///
/// ```
/// use netdrift::collector::FnCollector;
/// use netdrift::record;
///
/// let collector = FnCollector::new(|group, _ts| async move {
///     Ok(vec![record! { "device_group" => group, "status" => "up" }])
/// });
/// # let _ = collector;
/// ```
pub struct FnCollector<F> {
    f: F,
}

impl<F, Fut> FnCollector<F>
where
    F: Fn(String, DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>, CollectorError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Collector for FnCollector<F>
where
    F: Fn(String, DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>, CollectorError>> + Send + 'static,
{
    async fn collect(
        &self,
        device_group: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Record>, CollectorError> {
        (self.f)(device_group.to_string(), timestamp).await
    }
}
