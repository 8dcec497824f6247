//! Operation registry and kinds
//!
//! Every operation type name maps to a registered [`OpKind`] carrying the
//! validation and execution logic for that kind. Registration is an
//! explicit start-up call rather than runtime discovery: the registry is a
//! closed map from exact type name to implementation, and an unknown type
//! name is a hard validation failure before any chain mutation.

mod auth;
mod ddl;
mod sys;

pub use auth::{SignupKind, LoginKind, is_valid_nickname};
pub use ddl::{
    CreateTableKind, CreateSequenceKind, ColumnDef, IndexKind, SqlSink, is_safe_identifier,
};
#[cfg(test)]
pub use ddl::MockSqlSink;
pub use sys::SysOperationKind;

use std::collections::HashMap;
use log::debug;

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::model::Operation;

/// Category of an operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    /// Identity operations (signup, login)
    Auth,

    /// Schema operations executed against the relational sink
    Ddl,

    /// System bookkeeping operations
    Sys,
}

/// Fields extracted by `prepare`, ready for `execute`.
///
/// `execute` never re-parses operation payloads; everything it needs was
/// pulled out during the side-effect-free validation pass.
#[derive(Debug, Clone)]
pub struct PreparedOp {
    /// The validated operation
    pub operation: Operation,

    /// Kind-specific extracted fields
    pub action: PreparedAction,
}

/// Kind-specific fields extracted during `prepare`
#[derive(Debug, Clone)]
pub enum PreparedAction {
    /// A validated signup: nickname plus the public key to bind, if any
    Signup {
        /// Validated nickname
        nickname: String,
        /// Public key supplied with the signup
        pubkey: Option<String>,
    },

    /// A validated login: both halves of the compound login name plus the
    /// new login key
    Login {
        /// Site half of the login name
        site: String,
        /// Nickname half of the login name
        nickname: String,
        /// New login public key; replaces any previous key for this name
        pubkey: String,
    },

    /// A validated CREATE TABLE with its generated statements
    CreateTable {
        /// Table name
        table: String,
        /// Column definitions
        columns: Vec<ColumnDef>,
        /// DDL statements: the CREATE TABLE plus one CREATE INDEX per
        /// indexed column
        statements: Vec<String>,
    },

    /// A validated CREATE SEQUENCE with its generated statement
    CreateSequence {
        /// Sequence name
        name: String,
        /// Optional minimum value
        minvalue: Option<i64>,
        /// Generated DDL statement
        statement: String,
    },

    /// A system operation with no side effect beyond bookkeeping
    Bookkeeping,
}

/// Result of executing a prepared operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The category-specific side effect was performed
    Executed,

    /// The operation was recorded with no external side effect
    Recorded,
}

/// Mutable execution state shared across operation execution.
///
/// Holds the relational sink for DDL kinds and the in-memory identity
/// bookkeeping for auth kinds: signup bindings and the currently active
/// login key per `site:nickname` name.
pub struct ExecutionContext<'a> {
    sink: &'a mut dyn SqlSink,
    identities: HashMap<String, Option<String>>,
    login_keys: HashMap<String, String>,
    executed: Vec<[u8; 32]>,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context over a relational sink
    pub fn new(sink: &'a mut dyn SqlSink) -> Self {
        ExecutionContext {
            sink,
            identities: HashMap::new(),
            login_keys: HashMap::new(),
            executed: Vec::new(),
        }
    }

    /// The relational sink for DDL execution
    pub fn sink(&mut self) -> &mut dyn SqlSink {
        &mut *self.sink
    }

    /// Record a signup binding
    pub fn bind_identity(&mut self, nickname: String, pubkey: Option<String>) {
        self.identities.insert(nickname, pubkey);
    }

    /// Public key bound at signup, if any
    pub fn identity(&self, nickname: &str) -> Option<&Option<String>> {
        self.identities.get(nickname)
    }

    /// Replace the active login key for a full login name. Returns the
    /// superseded key, if there was one.
    pub fn rotate_login_key(&mut self, login_name: String, pubkey: String) -> Option<String> {
        self.login_keys.insert(login_name, pubkey)
    }

    /// Currently active login key for a full login name
    pub fn active_login_key(&self, login_name: &str) -> Option<&str> {
        self.login_keys.get(login_name).map(String::as_str)
    }

    /// Record an executed operation hash
    pub fn record(&mut self, hash: [u8; 32]) {
        self.executed.push(hash);
    }

    /// Hashes of the operations executed through this context, in order
    pub fn executed(&self) -> &[[u8; 32]] {
        &self.executed
    }
}

/// An operation kind: the validation and execution logic registered for
/// one operation type name
pub trait OpKind: Send + Sync {
    /// Exact type name this kind is dispatched on
    fn type_name(&self) -> &'static str;

    /// Category of the kind
    fn category(&self) -> OpCategory;

    /// Human-readable description. Documentation only, never used for
    /// logic.
    fn describe(&self) -> &'static str;

    /// Validate the operation and extract the fields `execute` needs.
    ///
    /// Synchronous and side-effect-free: on failure, nothing external has
    /// happened and the operation is never enqueued.
    fn prepare(&self, operation: &Operation, config: &ChainConfig) -> Result<PreparedOp>;

    /// Perform the category-specific side effect
    fn execute(
        &self,
        prepared: &PreparedOp,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome>;
}

/// Registry mapping operation type names to kinds
pub struct OpKindRegistry {
    kinds: HashMap<&'static str, Box<dyn OpKind>>,
}

impl OpKindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        OpKindRegistry {
            kinds: HashMap::new(),
        }
    }

    /// Create a registry with the built-in kinds registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SignupKind));
        registry.register(Box::new(LoginKind));
        registry.register(Box::new(CreateTableKind));
        registry.register(Box::new(CreateSequenceKind));
        registry.register(Box::new(SysOperationKind));
        registry
    }

    /// Register a kind. A later registration for the same type name
    /// replaces the earlier one.
    pub fn register(&mut self, kind: Box<dyn OpKind>) {
        debug!("Registering operation kind {}", kind.type_name());
        self.kinds.insert(kind.type_name(), kind);
    }

    /// Look up a kind by exact type name
    pub fn get(&self, type_name: &str) -> Option<&dyn OpKind> {
        self.kinds.get(type_name).map(Box::as_ref)
    }

    /// Registered type names
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.kinds.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Validate an operation: dispatch to its kind, enforce the payload
    /// ceiling and run the kind's `prepare`.
    ///
    /// Everything here happens before the operation can reach the pending
    /// queue; a failure leaves no trace in shared state.
    pub fn validate_and_prepare(
        &self,
        operation: &Operation,
        config: &ChainConfig,
    ) -> Result<PreparedOp> {
        let kind = self.get(operation.op_type()).ok_or_else(|| {
            ChainError::Validation(format!(
                "Unknown operation type: {}",
                operation.op_type()
            ))
        })?;

        let size = operation.payload_size()?;
        if size > config.limits.max_operation_size {
            return Err(ChainError::OversizeOperation(
                size,
                config.limits.max_operation_size,
            ));
        }

        kind.prepare(operation, config)
    }

    /// Execute a prepared operation and record it in the context
    pub fn execute(
        &self,
        prepared: &PreparedOp,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let kind = self.get(prepared.operation.op_type()).ok_or_else(|| {
            ChainError::Validation(format!(
                "Unknown operation type: {}",
                prepared.operation.op_type()
            ))
        })?;

        let outcome = kind.execute(prepared, context)?;
        context.record(*prepared.operation.hash());
        Ok(outcome)
    }
}

impl Default for OpKindRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SignatureAlgorithm};
    use crate::model::{CompoundKey, ObjectEntry, OpDraft};

    #[test]
    fn test_builtin_registration() {
        let registry = OpKindRegistry::with_builtins();

        assert_eq!(
            registry.type_names(),
            vec![
                "create_sequence",
                "create_table",
                "login",
                "operation",
                "signup",
            ]
        );

        let kind = registry.get("signup").unwrap();
        assert_eq!(kind.category(), OpCategory::Auth);
        assert!(!kind.describe().is_empty());

        let kind = registry.get("create_table").unwrap();
        assert_eq!(kind.category(), OpCategory::Ddl);

        let kind = registry.get("operation").unwrap();
        assert_eq!(kind.category(), OpCategory::Sys);
    }

    #[test]
    fn test_unknown_type_is_hard_validation_failure() {
        let registry = OpKindRegistry::with_builtins();
        let config = ChainConfig::default();
        let pair = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let op = OpDraft::new("drop_everything")
            .signed_by("alice")
            .sign_and_seal(&pair)
            .unwrap();

        match registry.validate_and_prepare(&op, &config) {
            Err(ChainError::Validation(msg)) => {
                assert!(msg.contains("drop_everything"));
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let registry = OpKindRegistry::with_builtins();
        let mut config = ChainConfig::default();
        config.limits.max_operation_size = 128;

        let pair = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);
        let op = OpDraft::new("signup")
            .with_id(CompoundKey::single("alice"))
            .add_new(
                ObjectEntry::new(vec!["alice".to_string()]).with_field(
                    "details",
                    serde_json::Value::String("x".repeat(512)),
                ),
            )
            .signed_by("alice")
            .sign_and_seal(&pair)
            .unwrap();

        match registry.validate_and_prepare(&op, &config) {
            Err(ChainError::OversizeOperation(size, 128)) => {
                assert!(size > 128);
            }
            other => panic!("Expected OversizeOperation, got {:?}", other),
        }
    }

    #[test]
    fn test_replacing_registration() {
        let mut registry = OpKindRegistry::new();
        registry.register(Box::new(SysOperationKind));
        registry.register(Box::new(SysOperationKind));

        assert_eq!(registry.type_names(), vec!["operation"]);
    }
}
