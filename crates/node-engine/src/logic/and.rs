use super::Logic;
use crate::model::{is_truthy, CycleContext, Node, Ports};
use async_trait::async_trait;
use serde_json::Value;

/// Two-input AND. Yields `input1` when it is falsy, otherwise `input2`.
pub struct And;

#[async_trait]
impl Logic for And {
    fn input_keys(&self) -> &'static [&'static str] {
        &["input1", "input2"]
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &["output"]
    }

    async fn output_values(&mut self, node: &Node, _ctx: &CycleContext) -> Ports {
        Ports::from([("output".to_string(), node.state_value("output"))])
    }

    fn handle_inputs_changed(&mut self, node: &mut Node, inputs: &Ports, _ctx: &CycleContext) {
        let first = inputs.get("input1").cloned().unwrap_or(Value::Null);
        let output = if is_truthy(&first) {
            inputs.get("input2").cloned().unwrap_or(Value::Null)
        } else {
            first
        };
        node.state.clear();
        node.state.insert("output".to_string(), output);
    }
}
