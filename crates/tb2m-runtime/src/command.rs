//! Inbound command resolution

use crate::error::RuntimeError;
use std::collections::BTreeMap;
use tb2m_core::{CommandAction, WILDCARD_COMMAND};
use tb2m_proxy::endpoints;

/// Action that only clears the error topic
pub const CLEAR_ERROR: &str = "clear_error";

/// Action served by the wake-up endpoint instead of the command endpoint
pub const WAKE_UP: &str = "wake_up";

/// A command ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand<'a> {
    /// Matched command key (the payload, or `*`)
    pub key: &'a str,
    pub action: &'a str,
    pub body: Option<String>,
}

impl ResolvedCommand<'_> {
    pub fn clears_error(&self) -> bool {
        self.action == CLEAR_ERROR
    }

    /// Proxy endpoint serving this command
    pub fn endpoint(&self, vin: &str) -> String {
        if self.action == WAKE_UP {
            endpoints::wake_up(vin)
        } else {
            endpoints::command(vin, self.action)
        }
    }
}

/// Look the payload up verbatim, then fall back to the wildcard
pub fn resolve_command<'a>(
    commands: &'a BTreeMap<String, CommandAction>,
    payload: &str,
) -> Result<ResolvedCommand<'a>, RuntimeError> {
    let (key, command) = commands
        .get_key_value(payload)
        .or_else(|| commands.get_key_value(WILDCARD_COMMAND))
        .ok_or_else(|| RuntimeError::UnresolvedCommand(payload.to_string()))?;
    Ok(ResolvedCommand {
        key,
        action: &command.action,
        body: command.render_body(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(entries: &[(&str, &str)]) -> BTreeMap<String, CommandAction> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), CommandAction::parse(v).unwrap()))
            .collect()
    }

    #[test]
    fn test_exact_match_wins() {
        let table = commands(&[("ON", "charge_start"), ("*", "fallback")]);
        let resolved = resolve_command(&table, "ON").unwrap();
        assert_eq!(resolved.key, "ON");
        assert_eq!(resolved.action, "charge_start");
        assert_eq!(resolved.body, None);
    }

    #[test]
    fn test_wildcard_renders_body() {
        let table = commands(&[("*", "set_charge_limit|{\"percent\": `*`}")]);
        let resolved = resolve_command(&table, "80").unwrap();
        assert_eq!(resolved.key, "*");
        assert_eq!(resolved.body.as_deref(), Some("{\"percent\": 80}"));
        assert_eq!(
            resolved.endpoint("VIN"),
            "/api/1/vehicles/VIN/command/set_charge_limit?wait=true"
        );
    }

    #[test]
    fn test_unresolved() {
        let table = commands(&[("ON", "charge_start")]);
        assert!(matches!(
            resolve_command(&table, "FOO"),
            Err(RuntimeError::UnresolvedCommand(p)) if p == "FOO"
        ));
    }

    #[test]
    fn test_special_actions() {
        let table = commands(&[("PRESS", "wake_up"), ("CLEAR", "clear_error")]);
        let wake = resolve_command(&table, "PRESS").unwrap();
        assert_eq!(wake.endpoint("VIN"), "/api/1/vehicles/VIN/wake_up?wait=true");
        assert!(!wake.clears_error());
        assert!(resolve_command(&table, "CLEAR").unwrap().clears_error());
    }
}
