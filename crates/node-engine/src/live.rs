//! A node bound to its logic instance for the duration of one cycle

use crate::error::StoreError;
use crate::logic::Logic;
use crate::model::{CycleContext, Node, NodeId, NodeState, Ports};
use crate::store::{node_state_key, StateStore, NODE_STATE_TTL};
use device_core::{DeviceDrivers, DeviceError};
use price_feed::PriceSeries;
use serde_json::Value;

pub struct LiveNode {
    node: Node,
    logic: Box<dyn Logic>,
}

impl LiveNode {
    /// Bind `node` to an explicit logic instance
    pub fn new(node: Node, logic: Box<dyn Logic>) -> Self {
        Self { node, logic }
    }

    /// Instantiate the node's registered logic and load its persisted state
    pub async fn load(
        mut node: Node,
        drivers: &DeviceDrivers,
        store: &dyn StateStore,
    ) -> Result<Self, StoreError> {
        node.state = match store.get(&node_state_key(node.id)).await? {
            Some(Value::Object(state)) => state,
            Some(other) => {
                tracing::warn!("Discarding non-object state of node {}: {}", node.id, other);
                NodeState::new()
            }
            None => NodeState::new(),
        };
        let logic = node.logic.instantiate(drivers);
        Ok(Self::new(node, logic))
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub async fn output_values(&mut self, ctx: &CycleContext) -> Ports {
        self.logic.output_values(&self.node, ctx).await
    }

    /// Deliver a changed input mapping and persist any resulting state change
    pub async fn inputs_changed(
        &mut self,
        inputs: &Ports,
        ctx: &CycleContext,
        store: &dyn StateStore,
    ) -> Result<(), StoreError> {
        let before = self.node.state.clone();
        self.logic.handle_inputs_changed(&mut self.node, inputs, ctx);
        self.persist_if_changed(&before, store).await
    }

    /// Deliver a new price series and persist any resulting state change
    pub async fn prices_updated(
        &mut self,
        prices: &PriceSeries,
        ctx: &CycleContext,
        store: &dyn StateStore,
    ) -> Result<(), StoreError> {
        let before = self.node.state.clone();
        self.logic.handle_updated_prices(&mut self.node, prices, ctx);
        self.persist_if_changed(&before, store).await
    }

    pub async fn apply(&mut self, ctx: &CycleContext) -> Result<(), DeviceError> {
        self.logic.apply_state_to_devices(&self.node, ctx).await
    }

    async fn persist_if_changed(
        &self,
        before: &NodeState,
        store: &dyn StateStore,
    ) -> Result<(), StoreError> {
        if self.node.state == *before {
            return Ok(());
        }
        store
            .set(
                &node_state_key(self.node.id),
                Value::Object(self.node.state.clone()),
                NODE_STATE_TTL,
            )
            .await?;
        tracing::debug!("Persisted state of node {}", self.node.id);
        Ok(())
    }
}
