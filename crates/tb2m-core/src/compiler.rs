//! Binding compiler
//!
//! Turns a configuration tree into the discovery value published to the
//! broker plus the publish/subscribe binding tables driving a device.

use crate::directive::{Directive, DirectiveError, DIRECTIVE_PREFIX};
use crate::value::ConfigValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

const STATE_TOPIC_SUFFIX: &str = "state_topic";
const COMMAND_TOPIC_SUFFIX: &str = "command_topic";

/// Token in a command body replaced by the inbound payload
pub const PAYLOAD_TOKEN: &str = "`*`";

#[derive(Error, Debug, PartialEq)]
pub enum CompileError {
    #[error("Malformed directive `{key}`: {reason}")]
    MalformedDirective { key: String, reason: String },
    #[error("Directive `{directive}` refers to `{companion}` which is not defined")]
    MissingCompanion { directive: String, companion: String },
    #[error("Expected `{0}` to be a topic string")]
    CompanionNotString(String),
    #[error("Topic `{0}` already bound")]
    DuplicateTopic(String),
    #[error("Command `{command}` already defined for topic `{topic}`")]
    DuplicateCommand { topic: String, command: String },
    #[error("Invalid action `{0}`: at most one `|` is allowed")]
    MalformedAction(String),
    #[error("Topic `{0}` is both published and subscribed")]
    TopicConflict(String),
}

impl From<(String, DirectiveError)> for CompileError {
    fn from((key, err): (String, DirectiveError)) -> Self {
        CompileError::MalformedDirective {
            key,
            reason: err.to_string(),
        }
    }
}

/// Placeholder values replacing `` `name` `` tokens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitutions(BTreeMap<String, String>);

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Replace every known token in `input`
    pub fn apply(&self, input: &str) -> String {
        if !input.contains('`') {
            return input.to_string();
        }
        let mut out = input.to_string();
        for (name, value) in &self.0 {
            out = out.replace(&format!("`{}`", name), value);
        }
        out
    }
}

/// Proxy action bound to a command, parsed from `action` or `action|body`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAction {
    pub action: String,
    pub body: Option<String>,
}

impl CommandAction {
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        let mut parts = raw.split('|');
        let action = parts.next().unwrap_or_default().to_string();
        let body = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(CompileError::MalformedAction(raw.to_string()));
        }
        Ok(Self { action, body })
    }

    /// Request body with the inbound payload spliced in
    pub fn render_body(&self, payload: &str) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| body.replace(PAYLOAD_TOKEN, payload))
    }
}

/// Topic → access path into the state tree
pub type PublishBindings = BTreeMap<String, String>;

/// Topic → command key → action
pub type SubscribeBindings = BTreeMap<String, BTreeMap<String, CommandAction>>;

/// Publish and subscribe tables of one device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    pub publish: PublishBindings,
    pub subscribe: SubscribeBindings,
}

impl Bindings {
    pub fn is_empty(&self) -> bool {
        self.publish.is_empty() && self.subscribe.is_empty()
    }

    pub fn bind_state(&mut self, topic: String, path: String) -> Result<(), CompileError> {
        if self.publish.contains_key(&topic) {
            return Err(CompileError::DuplicateTopic(topic));
        }
        self.publish.insert(topic, path);
        Ok(())
    }

    pub fn bind_command(
        &mut self,
        topic: String,
        command: String,
        action: CommandAction,
    ) -> Result<(), CompileError> {
        let commands = self.subscribe.entry(topic.clone()).or_default();
        if commands.contains_key(&command) {
            return Err(CompileError::DuplicateCommand { topic, command });
        }
        commands.insert(command, action);
        Ok(())
    }

    /// Fold another table in. Identical entries are accepted, anything else
    /// bound twice is an error.
    pub fn merge(&mut self, other: Bindings) -> Result<(), CompileError> {
        for (topic, path) in other.publish {
            match self.publish.get(&topic) {
                Some(existing) if *existing == path => {}
                Some(_) => return Err(CompileError::DuplicateTopic(topic)),
                None => {
                    self.publish.insert(topic, path);
                }
            }
        }
        for (topic, commands) in other.subscribe {
            let target = self.subscribe.entry(topic.clone()).or_default();
            for (command, action) in commands {
                match target.get(&command) {
                    Some(existing) if *existing == action => {}
                    Some(_) => return Err(CompileError::DuplicateCommand { topic, command }),
                    None => {
                        target.insert(command, action);
                    }
                }
            }
        }
        Ok(())
    }

    /// A device must not subscribe to a topic it also publishes
    pub fn check_conflicts(&self) -> Result<(), CompileError> {
        match self
            .subscribe
            .keys()
            .find(|topic| self.publish.contains_key(*topic))
        {
            Some(topic) => Err(CompileError::TopicConflict(topic.clone())),
            None => Ok(()),
        }
    }
}

/// Result of compiling one configuration tree
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub value: Value,
    pub bindings: Bindings,
}

/// Compile `tree` with the given substitutions
pub fn compile(tree: &ConfigValue, subs: &Substitutions) -> Result<Compiled, CompileError> {
    let mut bindings = Bindings::default();
    let value = compile_value(tree, subs, &mut bindings)?;
    Ok(Compiled { value, bindings })
}

fn compile_value(
    value: &ConfigValue,
    subs: &Substitutions,
    bindings: &mut Bindings,
) -> Result<Value, CompileError> {
    match value {
        ConfigValue::Object(object) => {
            let mut out = Map::new();
            for (key, child) in object {
                if key.starts_with(DIRECTIVE_PREFIX) {
                    compile_directive(key, child, object, subs, bindings)?;
                } else {
                    out.insert(subs.apply(key), compile_value(child, subs, bindings)?);
                }
            }
            Ok(Value::Object(out))
        }
        ConfigValue::List(items) => items
            .iter()
            .map(|item| compile_value(item, subs, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ConfigValue::String(s) => Ok(Value::String(subs.apply(s))),
        ConfigValue::Scalar(scalar) => Ok(scalar.to_json()),
    }
}

fn compile_directive(
    key: &str,
    value: &ConfigValue,
    object: &BTreeMap<String, ConfigValue>,
    subs: &Substitutions,
    bindings: &mut Bindings,
) -> Result<(), CompileError> {
    let directive = Directive::parse(key).map_err(|e| CompileError::from((key.to_string(), e)))?;
    let (topic_key, suffix, command_key) = match directive {
        None | Some(Directive::Ignored) => return Ok(()),
        Some(Directive::GetState { topic_key }) => (topic_key, STATE_TOPIC_SUFFIX, None),
        Some(Directive::Command {
            topic_key,
            command_key,
        }) => (topic_key, COMMAND_TOPIC_SUFFIX, Some(command_key)),
    };

    let raw = value.as_str().ok_or_else(|| CompileError::MalformedDirective {
        key: key.to_string(),
        reason: format!("expected a string value, found {}", value.kind()),
    })?;
    let directive_value = subs.apply(raw);

    let companion = topic_key.sibling_key(suffix);
    let topic = match object.get(&companion) {
        Some(ConfigValue::String(topic)) => subs.apply(topic),
        Some(_) => return Err(CompileError::CompanionNotString(companion)),
        None => {
            return Err(CompileError::MissingCompanion {
                directive: key.to_string(),
                companion,
            })
        }
    };

    match command_key {
        None => bindings.bind_state(topic, directive_value),
        Some(command) => {
            let action = CommandAction::parse(&directive_value)?;
            bindings.bind_command(topic, command, action)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(doc: Value) -> ConfigValue {
        ConfigValue::from_json(doc)
    }

    fn subs() -> Substitutions {
        Substitutions::new()
            .with("vin", "5YJ3E1EA7KF000001")
            .with("mqtt_prefix", "tb2m")
    }

    #[test]
    fn test_no_directives_is_identity_after_substitution() {
        let doc = json!({
            "name": "Charge `vin`",
            "list": ["`mqtt_prefix`/a", 1, true, null],
            "`vin`_key": {"nested": "x"}
        });
        let compiled = compile(&tree(doc), &subs()).unwrap();
        assert!(compiled.bindings.is_empty());
        assert_eq!(
            compiled.value,
            json!({
                "name": "Charge 5YJ3E1EA7KF000001",
                "list": ["tb2m/a", 1, true, null],
                "5YJ3E1EA7KF000001_key": {"nested": "x"}
            })
        );
    }

    #[test]
    fn test_substitution_replaces_all_occurrences() {
        let s = subs();
        assert_eq!(s.apply("`vin`-`vin`"), "5YJ3E1EA7KF000001-5YJ3E1EA7KF000001");
        assert_eq!(s.apply("plain text"), "plain text");
        assert_eq!(s.apply("`unknown`"), "`unknown`");
        let once = s.apply("`mqtt_prefix`/x");
        assert_eq!(s.apply(&once), once);
    }

    #[test]
    fn test_get_state_binding() {
        let doc = json!({
            "components": {
                "battery": {
                    "platform": "sensor",
                    "state_topic": "`mqtt_prefix`/`vin`/battery",
                    "__get_state": "vehicle_data.charge_state.battery_level"
                }
            }
        });
        let compiled = compile(&tree(doc), &subs()).unwrap();
        assert_eq!(
            compiled.bindings.publish["tb2m/5YJ3E1EA7KF000001/battery"],
            "vehicle_data.charge_state.battery_level"
        );
        assert_eq!(
            compiled.value["components"]["battery"],
            json!({"platform": "sensor", "state_topic": "tb2m/5YJ3E1EA7KF000001/battery"})
        );
    }

    #[test]
    fn test_named_and_literal_companions() {
        let doc = json!({
            "json_attributes_topic": "t/attrs",
            "__get_state/!json_attributes_topic": "vehicle_data",
            "mode_state_topic": "t/mode",
            "__get_state/mode": "climate.mode"
        });
        let compiled = compile(&tree(doc), &subs()).unwrap();
        assert_eq!(compiled.bindings.publish["t/attrs"], "vehicle_data");
        assert_eq!(compiled.bindings.publish["t/mode"], "climate.mode");
    }

    #[test]
    fn test_command_bindings() {
        let doc = json!({
            "command_topic": "t/set",
            "__command/ON": "charge_start",
            "__command/OFF": "charge_stop",
            "number": {
                "command_topic": "t/amps",
                "__command": "set_charging_amps|{\"charging_amps\": `*`}"
            }
        });
        let compiled = compile(&tree(doc), &subs()).unwrap();
        let set = &compiled.bindings.subscribe["t/set"];
        assert_eq!(set["ON"].action, "charge_start");
        assert_eq!(set["OFF"].body, None);
        let amps = &compiled.bindings.subscribe["t/amps"]["*"];
        assert_eq!(amps.action, "set_charging_amps");
        assert_eq!(amps.render_body("12").as_deref(), Some("{\"charging_amps\": 12}"));
    }

    #[test]
    fn test_duplicate_topic() {
        let doc = json!({
            "a": {"state_topic": "t/x", "__get_state": "p.a"},
            "b": {"state_topic": "t/x", "__get_state": "p.b"}
        });
        assert_eq!(
            compile(&tree(doc), &subs()),
            Err(CompileError::DuplicateTopic("t/x".to_string()))
        );
    }

    #[test]
    fn test_duplicate_command() {
        let doc = json!({
            "a": {"command_topic": "t/x", "__command/ON": "one"},
            "b": {"command_topic": "t/x", "__command/ON": "two"}
        });
        assert_eq!(
            compile(&tree(doc), &subs()),
            Err(CompileError::DuplicateCommand {
                topic: "t/x".to_string(),
                command: "ON".to_string()
            })
        );
    }

    #[test]
    fn test_missing_and_non_string_companion() {
        let missing = json!({"__get_state": "a.b"});
        assert!(matches!(
            compile(&tree(missing), &subs()),
            Err(CompileError::MissingCompanion { .. })
        ));
        let not_string = json!({"state_topic": 3, "__get_state": "a.b"});
        assert_eq!(
            compile(&tree(not_string), &subs()),
            Err(CompileError::CompanionNotString("state_topic".to_string()))
        );
    }

    #[test]
    fn test_malformed_directives() {
        let non_string = json!({"state_topic": "t", "__get_state": 1});
        assert!(matches!(
            compile(&tree(non_string), &subs()),
            Err(CompileError::MalformedDirective { .. })
        ));
        let too_deep = json!({"state_topic": "t", "__get_state/a/b": "x"});
        assert!(matches!(
            compile(&tree(too_deep), &subs()),
            Err(CompileError::MalformedDirective { .. })
        ));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            CommandAction::parse("honk_horn").unwrap(),
            CommandAction {
                action: "honk_horn".to_string(),
                body: None
            }
        );
        let with_body = CommandAction::parse("set_temps|{\"driver_temp\": `*`}").unwrap();
        assert_eq!(with_body.action, "set_temps");
        assert_eq!(with_body.render_body("21.5").as_deref(), Some("{\"driver_temp\": 21.5}"));
        assert_eq!(
            CommandAction::parse("a|b|c"),
            Err(CompileError::MalformedAction("a|b|c".to_string()))
        );
    }

    #[test]
    fn test_ignored_directives_removed() {
        let doc = json!({"name": "x", "__presence_template": {"anything": 1}});
        let compiled = compile(&tree(doc), &subs()).unwrap();
        assert_eq!(compiled.value, json!({"name": "x"}));
    }

    #[test]
    fn test_merge_and_conflicts() {
        let mut a = Bindings::default();
        a.bind_state("t/a".into(), "p.a".into()).unwrap();
        let mut b = Bindings::default();
        b.bind_state("t/a".into(), "p.a".into()).unwrap();
        b.bind_command("t/a".into(), "*".into(), CommandAction::parse("x").unwrap())
            .unwrap();
        a.merge(b).unwrap();
        assert_eq!(
            a.check_conflicts(),
            Err(CompileError::TopicConflict("t/a".to_string()))
        );

        let mut c = Bindings::default();
        c.bind_state("t/a".into(), "p.other".into()).unwrap();
        assert_eq!(a.merge(c), Err(CompileError::DuplicateTopic("t/a".to_string())));
    }
}
