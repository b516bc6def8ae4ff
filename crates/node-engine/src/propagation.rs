//! Bounded propagation of output values along connections
//!
//! Every pass reads the outputs of all nodes, routes them to the inputs named
//! by the connections, and notifies each node whose complete input mapping
//! differs from the previous pass. The pass count is fixed so that feedback
//! loops terminate; a chain of up to `max_iterations` nodes settles within one
//! cycle.

use crate::error::EngineError;
use crate::live::LiveNode;
use crate::model::{Connection, CycleContext, NodeId, Ports};
use crate::store::StateStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Per-pass statistics of one propagation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    /// Number of passes executed
    pub iterations: usize,
    /// `handle_inputs_changed` calls made in each pass
    pub callbacks_per_iteration: Vec<usize>,
}

impl PropagationReport {
    pub fn total_callbacks(&self) -> usize {
        self.callbacks_per_iteration.iter().sum()
    }

    /// Number of passes after which no more input changes happened, `None`
    /// when the last pass still delivered changes
    pub fn settled_after(&self) -> Option<usize> {
        match self.callbacks_per_iteration.last() {
            Some(&last) if last > 0 => None,
            _ => Some(
                self.callbacks_per_iteration
                    .iter()
                    .rposition(|&calls| calls > 0)
                    .map_or(0, |pass| pass + 1),
            ),
        }
    }
}

pub struct PropagationEngine {
    store: Arc<dyn StateStore>,
    max_iterations: usize,
}

impl PropagationEngine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run exactly `max_iterations` passes over `nodes`
    pub async fn propagate(
        &self,
        nodes: &mut BTreeMap<NodeId, LiveNode>,
        connections: &[Connection],
        ctx: &CycleContext,
    ) -> Result<PropagationReport, EngineError> {
        let routable: Vec<&Connection> = connections
            .iter()
            .filter(|c| {
                let known = nodes.contains_key(&c.source) && nodes.contains_key(&c.dest);
                if !known {
                    tracing::warn!(
                        "Skipping connection {} between unknown nodes {} -> {}",
                        c.id,
                        c.source,
                        c.dest
                    );
                }
                known
            })
            .collect();

        let mut report = PropagationReport::default();
        let mut previous_inputs: BTreeMap<NodeId, Ports> = BTreeMap::new();

        for _ in 0..self.max_iterations {
            let mut outputs: BTreeMap<NodeId, Ports> = BTreeMap::new();
            for (id, node) in nodes.iter_mut() {
                outputs.insert(*id, node.output_values(ctx).await);
            }

            let mut next_inputs: BTreeMap<NodeId, Ports> = BTreeMap::new();
            for connection in &routable {
                let value = outputs
                    .get(&connection.source)
                    .and_then(|ports| ports.get(&connection.source_key))
                    .cloned()
                    .unwrap_or(Value::Null);
                next_inputs
                    .entry(connection.dest)
                    .or_default()
                    .insert(connection.dest_key.clone(), value);
            }

            let touched: BTreeSet<NodeId> = previous_inputs
                .keys()
                .chain(next_inputs.keys())
                .copied()
                .collect();
            let empty = Ports::new();
            let mut callbacks = 0;
            for id in touched {
                let before = previous_inputs.get(&id).unwrap_or(&empty);
                let after = next_inputs.get(&id).unwrap_or(&empty);
                if before == after {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&id) {
                    node.inputs_changed(after, ctx, self.store.as_ref()).await?;
                    callbacks += 1;
                }
            }

            report.iterations += 1;
            report.callbacks_per_iteration.push(callbacks);
            previous_inputs = next_inputs;
        }

        tracing::info!(
            "Propagation finished after {} passes with {} input changes",
            report.iterations,
            report.total_callbacks()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{Logic, LogicKind};
    use crate::model::Node;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits a constant
    struct Constant(Value);

    #[async_trait]
    impl Logic for Constant {
        fn output_keys(&self) -> &'static [&'static str] {
            &["out"]
        }

        async fn output_values(&mut self, _node: &Node, _ctx: &CycleContext) -> Ports {
            Ports::from([("out".to_string(), self.0.clone())])
        }
    }

    /// Emits its last input plus one, counting callbacks
    struct Increment(Arc<AtomicUsize>);

    #[async_trait]
    impl Logic for Increment {
        fn input_keys(&self) -> &'static [&'static str] {
            &["in"]
        }

        fn output_keys(&self) -> &'static [&'static str] {
            &["out"]
        }

        async fn output_values(&mut self, node: &Node, _ctx: &CycleContext) -> Ports {
            let value = node.state_value("value").as_i64().unwrap_or(0);
            Ports::from([("out".to_string(), json!(value + 1))])
        }

        fn handle_inputs_changed(&mut self, node: &mut Node, inputs: &Ports, _ctx: &CycleContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
            let value = inputs.get("in").cloned().unwrap_or(Value::Null);
            node.state.insert("value".to_string(), value);
        }
    }

    fn live(id: NodeId, logic: impl Logic + 'static) -> (NodeId, LiveNode) {
        (id, LiveNode::new(Node::new(id, format!("n{id}"), LogicKind::And), Box::new(logic)))
    }

    fn connection(id: u64, source: NodeId, dest: NodeId) -> Connection {
        Connection {
            id,
            source,
            source_key: "out".to_string(),
            dest,
            dest_key: "in".to_string(),
        }
    }

    fn ctx() -> CycleContext {
        CycleContext::new(Utc::now(), chrono_tz::UTC)
    }

    #[tokio::test]
    async fn test_chain_settles_within_two_passes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut nodes = BTreeMap::from([
            live(1, Constant(json!(5))),
            live(2, Increment(calls.clone())),
        ]);
        let store = Arc::new(MemoryStore::new());
        let engine = PropagationEngine::new(store.clone());

        let report = engine
            .propagate(&mut nodes, &[connection(1, 1, 2)], &ctx())
            .await
            .unwrap();

        assert_eq!(report.iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(report.callbacks_per_iteration[0], 1);
        assert!(report.callbacks_per_iteration[1..].iter().all(|&c| c == 0));
        assert!(report.settled_after().unwrap() <= 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(nodes[&2].node().state_value("value"), json!(5));
        assert_eq!(
            store.get("node_state_2").await.unwrap(),
            Some(json!({"value": 5}))
        );
    }

    #[tokio::test]
    async fn test_cycle_runs_exactly_max_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut nodes = BTreeMap::from([
            live(1, Increment(calls.clone())),
            live(2, Increment(calls.clone())),
            live(3, Increment(calls.clone())),
        ]);
        let connections = [connection(1, 1, 2), connection(2, 2, 3), connection(3, 3, 1)];
        let engine = PropagationEngine::new(Arc::new(MemoryStore::new())).with_max_iterations(7);

        let report = engine.propagate(&mut nodes, &connections, &ctx()).await.unwrap();

        assert_eq!(report.iterations, 7);
        assert_eq!(report.callbacks_per_iteration, vec![3; 7]);
        assert_eq!(report.settled_after(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 21);
    }

    #[tokio::test]
    async fn test_missing_source_key_routes_null() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut nodes = BTreeMap::from([
            live(1, Constant(json!(1))),
            live(2, Increment(calls.clone())),
        ]);
        let mut conn = connection(1, 1, 2);
        conn.source_key = "missing".to_string();
        let engine = PropagationEngine::new(Arc::new(MemoryStore::new()));

        engine.propagate(&mut nodes, &[conn], &ctx()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(nodes[&2].node().state.contains_key("value"));
        assert_eq!(nodes[&2].node().state_value("value"), Value::Null);
    }

    #[tokio::test]
    async fn test_dangling_connection_is_skipped() {
        let mut nodes = BTreeMap::from([live(1, Constant(json!(1)))]);
        let engine = PropagationEngine::new(Arc::new(MemoryStore::new())).with_max_iterations(2);
        let report = engine
            .propagate(&mut nodes, &[connection(1, 1, 99)], &ctx())
            .await
            .unwrap();
        assert_eq!(report.total_callbacks(), 0);
    }

    #[test]
    fn test_settled_after() {
        let report = PropagationReport {
            iterations: 4,
            callbacks_per_iteration: vec![2, 1, 0, 0],
        };
        assert_eq!(report.settled_after(), Some(2));
        let quiet = PropagationReport {
            iterations: 2,
            callbacks_per_iteration: vec![0, 0],
        };
        assert_eq!(quiet.settled_after(), Some(0));
    }
}
