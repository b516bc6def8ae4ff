//! One end-to-end run: prices, propagation, actuation

use crate::error::EngineError;
use crate::live::LiveNode;
use crate::lock::CycleLock;
use crate::logic::LogicKind;
use crate::model::{CycleContext, NodeId};
use crate::prices::PriceCache;
use crate::propagation::{PropagationEngine, PropagationReport, DEFAULT_MAX_ITERATIONS};
use crate::repository::{ConnectionRepository, NodeRepository};
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use device_core::DeviceDrivers;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const CYCLE_LOCK_NAME: &str = "run_periodic_tasks";

/// Safety net for a stuck previous cycle
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// A node whose device could not be updated
#[derive(Debug, Clone, Serialize)]
pub struct DeviceFailure {
    pub node_id: NodeId,
    pub node_name: String,
    pub logic: LogicKind,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Whether nodes were notified about a new price series
    pub prices_updated: bool,
    pub nodes: usize,
    pub propagation: PropagationReport,
    pub device_failures: Vec<DeviceFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle held the lock
    Skipped,
    Completed(CycleReport),
}

pub struct CycleRunner {
    nodes: Arc<dyn NodeRepository>,
    connections: Arc<dyn ConnectionRepository>,
    store: Arc<dyn StateStore>,
    prices: PriceCache,
    lock: Arc<dyn CycleLock>,
    drivers: DeviceDrivers,
    timezone: Tz,
    max_iterations: usize,
    lock_timeout: Duration,
}

impl CycleRunner {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        connections: Arc<dyn ConnectionRepository>,
        store: Arc<dyn StateStore>,
        prices: PriceCache,
        lock: Arc<dyn CycleLock>,
    ) -> Self {
        Self {
            nodes,
            connections,
            store,
            prices,
            lock,
            drivers: DeviceDrivers::default(),
            timezone: chrono_tz::UTC,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_drivers(mut self, drivers: DeviceDrivers) -> Self {
        self.drivers = drivers;
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Run one cycle as of `now`.
    ///
    /// Returns [`CycleOutcome::Skipped`] without touching any state when
    /// another cycle holds the lock. Device failures are collected in the
    /// report; only store, lock and fatal price errors are returned.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CycleOutcome, EngineError> {
        let Some(_guard) = self
            .lock
            .try_acquire(CYCLE_LOCK_NAME, self.lock_timeout)
            .await?
        else {
            tracing::info!("Another cycle is running, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let ctx = CycleContext::new(now, self.timezone);

        let mut nodes = BTreeMap::new();
        for node in self.nodes.list_all().await? {
            let live = LiveNode::load(node, &self.drivers, self.store.as_ref()).await?;
            nodes.insert(live.id(), live);
        }
        let connections = self.connections.list_all().await?;
        tracing::debug!(
            "Cycle loaded {} nodes and {} connections",
            nodes.len(),
            connections.len()
        );

        let prices_updated = self.refresh_prices(&mut nodes, &ctx).await?;

        let propagation = PropagationEngine::new(self.store.clone())
            .with_max_iterations(self.max_iterations)
            .propagate(&mut nodes, &connections, &ctx)
            .await?;

        let mut device_failures = Vec::new();
        for live in nodes.values_mut() {
            if let Err(e) = live.apply(&ctx).await {
                let node = live.node();
                tracing::error!(
                    "Failed to apply state of node {} '{}' ({}): {}",
                    node.id,
                    node.name,
                    node.logic,
                    e
                );
                device_failures.push(DeviceFailure {
                    node_id: node.id,
                    node_name: node.name.clone(),
                    logic: node.logic,
                    error: e.to_string(),
                });
            }
        }

        Ok(CycleOutcome::Completed(CycleReport {
            started_at: now,
            prices_updated,
            nodes: nodes.len(),
            propagation,
            device_failures,
        }))
    }

    /// Notify every node about a new, different price series and cache it
    async fn refresh_prices(
        &self,
        nodes: &mut BTreeMap<NodeId, LiveNode>,
        ctx: &CycleContext,
    ) -> Result<bool, EngineError> {
        let Some(fresh) = self.prices.fetch_if_stale(ctx.now).await? else {
            return Ok(false);
        };
        if self.prices.get_cached().await?.as_ref() == Some(&fresh) {
            tracing::info!("Prices unchanged");
            self.prices.record_fetch(ctx.now).await?;
            return Ok(false);
        }

        for live in nodes.values_mut() {
            live.prices_updated(&fresh, ctx, self.store.as_ref()).await?;
        }
        // Also records the fetch time, only after every node has the series
        self.prices.store(&fresh, ctx.now).await?;
        tracing::info!("Notified {} nodes about new prices", nodes.len());
        Ok(true)
    }
}
