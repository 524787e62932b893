//! Translator shared between packet workers

use super::flow::{InterfaceId, Timestamp};
use super::napt::{DropReason, NatConfig, Translation, Translator};
use crate::telemetry::NatMetrics;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable handle to one [`Translator`].
///
/// Every decision runs to completion under a single lock, so lookup and
/// insert, expiry and allocation, refresh and verification are each atomic
/// with respect to other workers.
#[derive(Clone)]
pub struct SharedTranslator {
    inner: Arc<Mutex<Translator>>,
    metrics: Arc<NatMetrics>,
}

impl SharedTranslator {
    pub fn new(config: NatConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NatMetrics::new()))
    }

    pub fn with_metrics(config: NatConfig, metrics: Arc<NatMetrics>) -> Result<Self> {
        let translator = Translator::with_metrics(config, Arc::clone(&metrics))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(translator)),
            metrics,
        })
    }

    pub fn process(
        &self,
        ingress: InterfaceId,
        packet: &[u8],
        now: Timestamp,
    ) -> Option<Translation> {
        self.inner.lock().process(ingress, packet, now)
    }

    pub fn decide(
        &self,
        ingress: InterfaceId,
        packet: &[u8],
        now: Timestamp,
    ) -> std::result::Result<Translation, DropReason> {
        self.inner.lock().decide(ingress, packet, now)
    }

    pub fn sweep(&self, now: Timestamp) -> usize {
        self.inner.lock().sweep(now)
    }

    pub fn flow_count(&self) -> usize {
        self.inner.lock().table().len()
    }

    /// Counters do not need the lock
    pub fn metrics(&self) -> &Arc<NatMetrics> {
        &self.metrics
    }

    /// Run `f` against the translator while holding the lock
    pub fn with<R>(&self, f: impl FnOnce(&Translator) -> R) -> R {
        f(&self.inner.lock())
    }
}

impl From<Translator> for SharedTranslator {
    fn from(translator: Translator) -> Self {
        let metrics = Arc::clone(translator.metrics());
        Self {
            inner: Arc::new(Mutex::new(translator)),
            metrics,
        }
    }
}
