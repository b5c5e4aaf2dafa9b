//! Directive keys embedded in the configuration tree
//!
//! Object keys starting with `__` are not part of the discovery document.
//! Two of them bind MQTT topics:
//!
//! - `__get_state[/<name>|/!<name>]`: publish the value at an access path
//! - `__command[/<name>|/!<name>][/<command_key>]`: run a proxy action when a
//!   message arrives on a command topic
//!
//! Everything else with the prefix is dropped.

use thiserror::Error;

/// Prefix marking a directive key
pub const DIRECTIVE_PREFIX: &str = "__";

/// Command key matching any inbound payload
pub const WILDCARD_COMMAND: &str = "*";

const GET_STATE: &str = "__get_state";
const COMMAND: &str = "__command";

#[derive(Error, Debug, PartialEq)]
pub enum DirectiveError {
    #[error("Too many `/` segments in directive `{0}`")]
    TooManySegments(String),
    #[error("Empty segment in directive `{0}`")]
    EmptySegment(String),
}

/// Which sibling key holds the topic a directive binds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKey {
    /// `state_topic` or `command_topic`
    Default,
    /// `<name>_state_topic` or `<name>_command_topic`
    Named(String),
    /// The sibling key `<name>` itself
    Literal(String),
}

impl TopicKey {
    fn parse(segment: &str) -> Self {
        match segment.strip_prefix('!') {
            Some(name) => TopicKey::Literal(name.to_string()),
            None => TopicKey::Named(segment.to_string()),
        }
    }

    /// Resolve to the concrete sibling key name for a given suffix
    /// (`state_topic` or `command_topic`)
    pub fn sibling_key(&self, suffix: &str) -> String {
        match self {
            TopicKey::Default => suffix.to_string(),
            TopicKey::Named(name) => format!("{}_{}", name, suffix),
            TopicKey::Literal(name) => name.clone(),
        }
    }
}

/// A parsed directive key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    GetState {
        topic_key: TopicKey,
    },
    Command {
        topic_key: TopicKey,
        command_key: String,
    },
    /// Any other `__` key, removed without effect
    Ignored,
}

impl Directive {
    /// Parse an object key. Returns `None` for ordinary keys.
    pub fn parse(key: &str) -> Result<Option<Self>, DirectiveError> {
        if !key.starts_with(DIRECTIVE_PREFIX) {
            return Ok(None);
        }

        let segments: Vec<&str> = key.split('/').collect();
        let head = segments[0];
        let rest = &segments[1..];

        if head != GET_STATE && head != COMMAND {
            return Ok(Some(Directive::Ignored));
        }
        if rest.iter().any(|s| s.is_empty() || *s == "!") {
            return Err(DirectiveError::EmptySegment(key.to_string()));
        }

        let directive = if head == GET_STATE {
            match rest {
                [] => Directive::GetState {
                    topic_key: TopicKey::Default,
                },
                [name] => Directive::GetState {
                    topic_key: TopicKey::parse(name),
                },
                _ => return Err(DirectiveError::TooManySegments(key.to_string())),
            }
        } else {
            match rest {
                [] => Directive::Command {
                    topic_key: TopicKey::Default,
                    command_key: WILDCARD_COMMAND.to_string(),
                },
                [command_key] => Directive::Command {
                    topic_key: TopicKey::Default,
                    command_key: command_key.to_string(),
                },
                [name, command_key] => Directive::Command {
                    topic_key: TopicKey::parse(name),
                    command_key: command_key.to_string(),
                },
                _ => return Err(DirectiveError::TooManySegments(key.to_string())),
            }
        };
        Ok(Some(directive))
    }
}
