//! Identity operation kinds
//!
//! `signup` binds a nickname to an identity; `login` rotates the login key
//! for a `(user, site)` pair. Both validate the nickname charset before
//! anything else happens.

use log::{debug, info};

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::model::Operation;
use super::{ExecutionContext, ExecutionOutcome, OpCategory, OpKind, PreparedAction, PreparedOp};

/// Check a nickname against the accepted charset.
///
/// Letters, digits, and the literal set `{space, $, _, ., -}` are allowed;
/// a nickname that is empty after trimming is rejected.
pub fn is_valid_nickname(nickname: &str) -> bool {
    if nickname.trim().is_empty() {
        return false;
    }

    nickname
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '$' | '_' | '.' | '-'))
}

fn validated_nickname(nickname: &str, role: &str) -> Result<String> {
    if !is_valid_nickname(nickname) {
        return Err(ChainError::Validation(format!(
            "Invalid {} {:?}: only letters, digits, space, $, _, . and - are allowed",
            role, nickname
        )));
    }
    Ok(nickname.to_string())
}

/// The `signup` kind: binds a nickname to an identity
pub struct SignupKind;

impl OpKind for SignupKind {
    fn type_name(&self) -> &'static str {
        "signup"
    }

    fn category(&self) -> OpCategory {
        OpCategory::Auth
    }

    fn describe(&self) -> &'static str {
        "Registers a nickname and optionally binds a public key to it"
    }

    fn prepare(&self, operation: &Operation, _config: &ChainConfig) -> Result<PreparedOp> {
        let id = operation.id().ok_or_else(|| {
            ChainError::Validation("signup requires an id with the nickname".to_string())
        })?;

        if id.len() != 1 {
            return Err(ChainError::Validation(format!(
                "signup id must have exactly one component, got {}",
                id.len()
            )));
        }

        let nickname = validated_nickname(id.first(), "nickname")?;

        // The public key, when supplied, rides in the first created entry
        let pubkey = operation
            .new_entries()
            .first()
            .and_then(|entry| entry.string_field("pubkey"))
            .map(str::to_string);

        Ok(PreparedOp {
            operation: operation.clone(),
            action: PreparedAction::Signup { nickname, pubkey },
        })
    }

    fn execute(
        &self,
        prepared: &PreparedOp,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let (nickname, pubkey) = match &prepared.action {
            PreparedAction::Signup { nickname, pubkey } => (nickname, pubkey),
            other => {
                return Err(ChainError::State(format!(
                    "signup executed with mismatched prepared action: {:?}",
                    other
                )));
            }
        };

        debug!("Recording signup for {}", nickname);
        context.bind_identity(nickname.clone(), pubkey.clone());

        Ok(ExecutionOutcome::Executed)
    }
}

/// The `login` kind: rotates the login key for a `(user, site)` pair
pub struct LoginKind;

impl LoginKind {
    /// Split a login name into its site and nickname halves.
    ///
    /// Accepts either a two-component id or a single component containing
    /// a `site:nickname` compound.
    fn split_login_name(operation: &Operation) -> Result<(String, String)> {
        let id = operation.id().ok_or_else(|| {
            ChainError::Validation("login requires an id with the login name".to_string())
        })?;

        match (id.first(), id.second(), id.len()) {
            (site, Some(nickname), 2) => Ok((site.to_string(), nickname.to_string())),
            (compound, None, 1) => {
                let (site, nickname) = compound.split_once(':').ok_or_else(|| {
                    ChainError::Validation(format!(
                        "login name {:?} is not a site:nickname compound",
                        compound
                    ))
                })?;
                Ok((site.to_string(), nickname.to_string()))
            }
            _ => Err(ChainError::Validation(format!(
                "login id must have one compound or two components, got {}",
                id.len()
            ))),
        }
    }
}

impl OpKind for LoginKind {
    fn type_name(&self) -> &'static str {
        "login"
    }

    fn category(&self) -> OpCategory {
        OpCategory::Auth
    }

    fn describe(&self) -> &'static str {
        "Rotates the login key for a user on a site; a new login invalidates the previous key pair"
    }

    fn prepare(&self, operation: &Operation, _config: &ChainConfig) -> Result<PreparedOp> {
        let (site, nickname) = Self::split_login_name(operation)?;

        // Both halves independently satisfy the nickname rule
        let site = validated_nickname(&site, "site")?;
        let nickname = validated_nickname(&nickname, "nickname")?;

        let pubkey = operation
            .new_entries()
            .first()
            .and_then(|entry| entry.string_field("pubkey"))
            .ok_or_else(|| {
                ChainError::Validation(
                    "login requires a pubkey in its first created entry".to_string(),
                )
            })?
            .to_string();

        Ok(PreparedOp {
            operation: operation.clone(),
            action: PreparedAction::Login {
                site,
                nickname,
                pubkey,
            },
        })
    }

    fn execute(
        &self,
        prepared: &PreparedOp,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let (site, nickname, pubkey) = match &prepared.action {
            PreparedAction::Login {
                site,
                nickname,
                pubkey,
            } => (site, nickname, pubkey),
            other => {
                return Err(ChainError::State(format!(
                    "login executed with mismatched prepared action: {:?}",
                    other
                )));
            }
        };

        let login_name = format!("{}:{}", site, nickname);
        let superseded = context.rotate_login_key(login_name.clone(), pubkey.clone());
        if superseded.is_some() {
            info!("Rotated login key for {}; previous key invalidated", login_name);
        } else {
            debug!("Recorded first login key for {}", login_name);
        }

        Ok(ExecutionOutcome::Executed)
    }
}
