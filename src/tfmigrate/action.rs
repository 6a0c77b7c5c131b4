//! State migration actions.
//!
//! Actions are written in migration files as short command strings:
//!
//! | Action string                 | Variant                         |
//! |-------------------------------|---------------------------------|
//! | `mv <source> <destination>`   | [`StateAction::Mv`]             |
//! | `rm <address> [<address>...]` | [`StateAction::Rm`]             |
//! | `import <address> <id>`       | [`StateAction::Import`]         |
//!
//! Arguments are separated by whitespace. Wrap an argument in single quotes
//! to keep spaces in it; double quotes are ordinary characters so that
//! addresses like `aws_instance.web["a"]` can be written as-is.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};

use crate::error::{MigrateError, Result};
use crate::tfexec::{State, Terraform, ToolError};

/// Kind of state edit, as written in action strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    Mv,
    Rm,
    Import,
}

/// One declarative edit of a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    /// Rename a resource address
    Mv { source: String, destination: String },
    /// Forget resources without destroying them
    Rm { addresses: Vec<String> },
    /// Adopt an existing object under an address
    Import { address: String, id: String },
}

impl StateAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Mv { .. } => ActionKind::Mv,
            Self::Rm { .. } => ActionKind::Rm,
            Self::Import { .. } => ActionKind::Import,
        }
    }

    /// Apply this edit to `state` and return the edited state.
    pub fn apply<T: Terraform + ?Sized>(
        &self,
        tf: &T,
        state: &State,
    ) -> std::result::Result<State, ToolError> {
        match self {
            Self::Mv {
                source,
                destination,
            } => tf.state_mv(state, source, destination),
            Self::Rm { addresses } => tf.state_rm(state, addresses),
            Self::Import { address, id } => tf.import(state, address, id),
        }
    }

    /// Parse a list of action strings, reporting the first invalid one by position.
    pub fn parse_all<S: AsRef<str>>(actions: &[S]) -> Result<Vec<Self>> {
        actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                action.as_ref().parse().map_err(|err| match err {
                    MigrateError::InvalidAction(msg) => {
                        MigrateError::InvalidAction(format!("actions[{}]: {}", index, msg))
                    }
                    other => other,
                })
            })
            .collect()
    }
}

impl FromStr for StateAction {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let words = split_words(s)?;
        let Some((verb, args)) = words.split_first() else {
            return Err(MigrateError::InvalidAction("empty action".to_string()));
        };

        let kind: ActionKind = verb.parse().map_err(|_| {
            MigrateError::InvalidAction(format!(
                "unknown action type {:?} in {:?}. Valid: mv, rm, import",
                verb, s
            ))
        })?;

        match (kind, args) {
            (ActionKind::Mv, [source, destination]) => Ok(Self::Mv {
                source: source.clone(),
                destination: destination.clone(),
            }),
            (ActionKind::Rm, addresses) if !addresses.is_empty() => Ok(Self::Rm {
                addresses: addresses.to_vec(),
            }),
            (ActionKind::Import, [address, id]) => Ok(Self::Import {
                address: address.clone(),
                id: id.clone(),
            }),
            (kind, _) => Err(MigrateError::InvalidAction(format!(
                "{} action {:?}: {}",
                kind,
                s,
                usage(kind)
            ))),
        }
    }
}

fn usage(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Mv => "expected `mv <source> <destination>`",
        ActionKind::Rm => "expected `rm <address> [<address>...]`",
        ActionKind::Import => "expected `import <address> <id>`",
    }
}

fn split_words(s: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => {
                            return Err(MigrateError::InvalidAction(format!(
                                "unterminated quote in {:?}",
                                s
                            )));
                        }
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }

    Ok(words)
}

fn quote(word: &str) -> String {
    if word.is_empty() || word.contains(char::is_whitespace) {
        format!("'{}'", word)
    } else {
        word.to_string()
    }
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mv {
                source,
                destination,
            } => write!(f, "mv {} {}", quote(source), quote(destination)),
            Self::Rm { addresses } => {
                write!(f, "rm")?;
                for address in addresses {
                    write!(f, " {}", quote(address))?;
                }
                Ok(())
            }
            Self::Import { address, id } => write!(f, "import {} {}", quote(address), quote(id)),
        }
    }
}
