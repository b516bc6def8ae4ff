use super::settings::{self, SettingsErrors};
use super::Logic;
use crate::model::{is_truthy, CycleContext, Node, Ports, Settings};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Outputs `value_on` or `value_off` depending on the cached input
pub struct SelectValue;

#[async_trait]
impl Logic for SelectValue {
    fn input_keys(&self) -> &'static [&'static str] {
        &["input"]
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &["output"]
    }

    async fn output_values(&mut self, node: &Node, _ctx: &CycleContext) -> Ports {
        let key = if is_truthy(&node.state_value("input")) {
            "value_on"
        } else {
            "value_off"
        };
        let value = node
            .settings
            .get(key)
            .filter(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| json!(0));
        Ports::from([("output".to_string(), value)])
    }

    fn handle_inputs_changed(&mut self, node: &mut Node, inputs: &Ports, _ctx: &CycleContext) {
        let input = inputs.get("input").cloned().unwrap_or(Value::Null);
        node.state.clear();
        node.state.insert("input".to_string(), input);
    }

    fn settings_errors(&self, candidate: &Settings, _existing: Option<&Settings>) -> SettingsErrors {
        let mut errors = SettingsErrors::new();
        settings::check_optional_number(&mut errors, candidate, "value_on");
        settings::check_optional_number(&mut errors, candidate, "value_off");
        errors
    }
}
