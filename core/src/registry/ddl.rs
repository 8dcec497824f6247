//! Schema operation kinds
//!
//! `create_table` and `create_sequence` build DDL text and execute it
//! against the external relational sink. Every identifier is validated
//! against a bare-word whitelist before any string reaches a SQL
//! statement; this is the sole injection defense on the DDL path.

use log::{debug, error};
use sqlparser::keywords::{
    ALL_KEYWORDS, ALL_KEYWORDS_INDEX, RESERVED_FOR_COLUMN_ALIAS, RESERVED_FOR_TABLE_ALIAS,
};

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::model::Operation;
use super::{ExecutionContext, ExecutionOutcome, OpCategory, OpKind, PreparedAction, PreparedOp};

/// The relational sink DDL statements are executed against.
///
/// Implementations own their connection handling and timeouts; a timeout
/// surfaces as an `Err` with the driver message, never as a hang.
#[cfg_attr(test, mockall::automock)]
pub trait SqlSink: Send {
    /// Execute one DDL statement. The error value is the driver message.
    fn execute_ddl(&mut self, statement: &str) -> std::result::Result<(), String>;
}

/// Check whether a word is reserved in the target SQL dialect
fn is_reserved_word(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    match ALL_KEYWORDS.binary_search(&upper.as_str()) {
        Ok(index) => {
            let keyword = ALL_KEYWORDS_INDEX[index];
            RESERVED_FOR_TABLE_ALIAS.contains(&keyword)
                || RESERVED_FOR_COLUMN_ALIAS.contains(&keyword)
        }
        Err(_) => false,
    }
}

/// Check an identifier against the bare-word whitelist.
///
/// Accepted: non-empty, starts with an ASCII letter or underscore,
/// continues with ASCII letters, digits or underscores, and is not a
/// reserved word. Rejection happens before any concatenation into
/// executable SQL.
pub fn is_safe_identifier(identifier: &str) -> bool {
    if identifier.is_empty() {
        return false;
    }

    let mut chars = identifier.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }

    !is_reserved_word(identifier)
}

fn validated_identifier(identifier: &str, role: &str) -> Result<String> {
    if !is_safe_identifier(identifier) {
        return Err(ChainError::Validation(format!(
            "Unsafe {} identifier: {:?}",
            role, identifier
        )));
    }
    Ok(identifier.to_string())
}

/// Check a column type string.
///
/// Array types are recognized by a trailing `[]`. The base type must start
/// with a letter and may contain ASCII letters, digits, underscores,
/// spaces, parentheses and commas (`varchar(255)`, `timestamp with time
/// zone`).
fn is_safe_column_type(sql_type: &str) -> bool {
    let base = sql_type.strip_suffix("[]").unwrap_or(sql_type);
    if base.is_empty() {
        return false;
    }

    let mut chars = base.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','))
}

/// Index classification of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// No index
    NotIndexed,

    /// Plain btree index
    Indexed,

    /// GIN index
    Gin,

    /// GiST index
    Gist,
}

impl IndexKind {
    /// Parse the wire value of an index classification
    pub fn from_field(value: &str) -> Result<Self> {
        match value {
            "indexed" => Ok(IndexKind::Indexed),
            "gin" => Ok(IndexKind::Gin),
            "gist" => Ok(IndexKind::Gist),
            other => Err(ChainError::Validation(format!(
                "Unknown index classification: {:?}",
                other
            ))),
        }
    }

    /// The `USING` clause for the index, if any
    fn using_clause(&self) -> Option<&'static str> {
        match self {
            IndexKind::NotIndexed | IndexKind::Indexed => None,
            IndexKind::Gin => Some("GIN"),
            IndexKind::Gist => Some("GIST"),
        }
    }
}

/// Schema metadata for one column of a table under creation
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Table the column belongs to
    pub table: String,

    /// Column name
    pub name: String,

    /// SQL type text; a trailing `[]` marks an array type
    pub sql_type: String,

    /// Index classification
    pub index: IndexKind,
}

impl ColumnDef {
    /// Whether the column is array-typed
    pub fn is_array_type(&self) -> bool {
        self.sql_type.ends_with("[]")
    }

    /// Build the index statement for this column, if it is indexed
    fn index_statement(&self) -> Option<String> {
        if self.index == IndexKind::NotIndexed {
            return None;
        }

        let statement = match self.index.using_clause() {
            Some(using) => format!(
                "CREATE INDEX {}_{}_idx ON {} USING {} ({})",
                self.table, self.name, self.table, using, self.name
            ),
            None => format!(
                "CREATE INDEX {}_{}_idx ON {} ({})",
                self.table, self.name, self.table, self.name
            ),
        };
        Some(statement)
    }
}

fn run_statements(
    statements: &[String],
    context: &mut ExecutionContext<'_>,
) -> Result<()> {
    for statement in statements {
        debug!("Executing DDL: {}", statement);
        if let Err(driver_message) = context.sink().execute_ddl(statement) {
            error!("DDL rejected by sink: {}: {}", statement, driver_message);
            return Err(ChainError::DdlExecution(format!(
                "{}: {}",
                statement, driver_message
            )));
        }
    }
    Ok(())
}

/// The `create_table` kind
pub struct CreateTableKind;

impl OpKind for CreateTableKind {
    fn type_name(&self) -> &'static str {
        "create_table"
    }

    fn category(&self) -> OpCategory {
        OpCategory::Ddl
    }

    fn describe(&self) -> &'static str {
        "Creates a table in the relational sink from a validated column map"
    }

    fn prepare(&self, operation: &Operation, _config: &ChainConfig) -> Result<PreparedOp> {
        let entry = operation.new_entries().first().ok_or_else(|| {
            ChainError::Validation("create_table requires a created entry".to_string())
        })?;

        let table = validated_identifier(
            entry.string_field("name").ok_or_else(|| {
                ChainError::Validation("create_table requires a `name` field".to_string())
            })?,
            "table",
        )?;

        let raw_columns = entry
            .field("table_columns")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| {
                ChainError::Validation(
                    "create_table requires a `table_columns` map of column name to SQL type"
                        .to_string(),
                )
            })?;

        if raw_columns.is_empty() {
            return Err(ChainError::Validation(
                "create_table requires at least one column".to_string(),
            ));
        }

        // Optional index classification map, column name -> kind
        let raw_indexes = entry
            .field("indexed")
            .and_then(serde_json::Value::as_object);

        let mut columns = Vec::with_capacity(raw_columns.len());
        for (column_name, sql_type) in raw_columns {
            let name = validated_identifier(column_name, "column")?;

            let sql_type = sql_type.as_str().ok_or_else(|| {
                ChainError::Validation(format!(
                    "Column {} type must be a string",
                    column_name
                ))
            })?;
            if !is_safe_column_type(sql_type) {
                return Err(ChainError::Validation(format!(
                    "Unsafe column type for {}: {:?}",
                    column_name, sql_type
                )));
            }

            let index = match raw_indexes.and_then(|indexes| indexes.get(column_name)) {
                Some(value) => {
                    let value = value.as_str().ok_or_else(|| {
                        ChainError::Validation(format!(
                            "Index classification for {} must be a string",
                            column_name
                        ))
                    })?;
                    IndexKind::from_field(value)?
                }
                None => IndexKind::NotIndexed,
            };

            columns.push(ColumnDef {
                table: table.clone(),
                name,
                sql_type: sql_type.to_string(),
                index,
            });
        }

        // Safe to concatenate: every identifier and type was validated above
        let column_list = columns
            .iter()
            .map(|column| format!("{} {}", column.name, column.sql_type))
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![format!("CREATE TABLE {} ({})", table, column_list)];
        statements.extend(columns.iter().filter_map(ColumnDef::index_statement));

        Ok(PreparedOp {
            operation: operation.clone(),
            action: PreparedAction::CreateTable {
                table,
                columns,
                statements,
            },
        })
    }

    fn execute(
        &self,
        prepared: &PreparedOp,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let statements = match &prepared.action {
            PreparedAction::CreateTable { statements, .. } => statements,
            other => {
                return Err(ChainError::State(format!(
                    "create_table executed with mismatched prepared action: {:?}",
                    other
                )));
            }
        };

        run_statements(statements, context)?;
        Ok(ExecutionOutcome::Executed)
    }
}

/// The `create_sequence` kind
pub struct CreateSequenceKind;

impl OpKind for CreateSequenceKind {
    fn type_name(&self) -> &'static str {
        "create_sequence"
    }

    fn category(&self) -> OpCategory {
        OpCategory::Ddl
    }

    fn describe(&self) -> &'static str {
        "Creates a sequence in the relational sink, optionally with a minimum value"
    }

    fn prepare(&self, operation: &Operation, _config: &ChainConfig) -> Result<PreparedOp> {
        let entry = operation.new_entries().first().ok_or_else(|| {
            ChainError::Validation("create_sequence requires a created entry".to_string())
        })?;

        let name = validated_identifier(
            entry.string_field("name").ok_or_else(|| {
                ChainError::Validation("create_sequence requires a `name` field".to_string())
            })?,
            "sequence",
        )?;

        let minvalue = match entry.field("minvalue") {
            Some(value) => Some(value.as_i64().ok_or_else(|| {
                ChainError::Validation("`minvalue` must be a number".to_string())
            })?),
            None => None,
        };

        let statement = match minvalue {
            Some(minvalue) => format!("CREATE SEQUENCE {} MINVALUE {}", name, minvalue),
            None => format!("CREATE SEQUENCE {}", name),
        };

        Ok(PreparedOp {
            operation: operation.clone(),
            action: PreparedAction::CreateSequence {
                name,
                minvalue,
                statement,
            },
        })
    }

    fn execute(
        &self,
        prepared: &PreparedOp,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let statement = match &prepared.action {
            PreparedAction::CreateSequence { statement, .. } => statement,
            other => {
                return Err(ChainError::State(format!(
                    "create_sequence executed with mismatched prepared action: {:?}",
                    other
                )));
            }
        };

        run_statements(std::slice::from_ref(statement), context)?;
        Ok(ExecutionOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use crate::crypto::{KeyPair, SignatureAlgorithm};
    use crate::model::{CompoundKey, ObjectEntry, OpDraft, Operation};
    use crate::registry::OpKindRegistry;

    #[rstest]
    #[case("valid_name_1", true)]
    #[case("_leading_underscore", true)]
    #[case("CamelCase2", true)]
    #[case("", false)]
    #[case("a; DROP TABLE x", false)]
    #[case("1starts_with_digit", false)]
    #[case("has-dash", false)]
    #[case("has space", false)]
    #[case("select", false)]
    #[case("where", false)]
    fn test_identifier_whitelist(#[case] identifier: &str, #[case] expected: bool) {
        assert_eq!(is_safe_identifier(identifier), expected);
    }

    #[rstest]
    #[case("int", true)]
    #[case("varchar(255)", true)]
    #[case("timestamp with time zone", true)]
    #[case("text[]", true)]
    #[case("", false)]
    #[case("[]", false)]
    #[case("int; DROP TABLE x", false)]
    fn test_column_type_check(#[case] sql_type: &str, #[case] expected: bool) {
        assert_eq!(is_safe_column_type(sql_type), expected);
    }

    fn create_table_op(signer: &KeyPair, entry: ObjectEntry) -> Operation {
        OpDraft::new("create_table")
            .with_id(CompoundKey::single("schema"))
            .add_new(entry)
            .signed_by("operator1")
            .sign_and_seal(signer)
            .unwrap()
    }

    #[test]
    fn test_create_table_builds_statements() {
        let config = ChainConfig::default();
        let signer = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let entry = ObjectEntry::new(vec!["places".to_string()])
            .with_field("name", json!("places"))
            .with_field(
                "table_columns",
                json!({"id": "bigint", "osm_tags": "jsonb", "coords": "float[]"}),
            )
            .with_field("indexed", json!({"id": "indexed", "osm_tags": "gin"}));

        let op = create_table_op(&signer, entry);
        let prepared = CreateTableKind.prepare(&op, &config).unwrap();

        match &prepared.action {
            PreparedAction::CreateTable {
                table,
                columns,
                statements,
            } => {
                assert_eq!(table, "places");
                assert_eq!(columns.len(), 3);

                // Columns come out in map order
                let coords = columns.iter().find(|c| c.name == "coords").unwrap();
                assert!(coords.is_array_type());
                assert_eq!(coords.index, IndexKind::NotIndexed);

                assert_eq!(
                    statements[0],
                    "CREATE TABLE places (coords float[], id bigint, osm_tags jsonb)"
                );
                assert!(statements
                    .contains(&"CREATE INDEX places_id_idx ON places (id)".to_string()));
                assert!(statements.contains(
                    &"CREATE INDEX places_osm_tags_idx ON places USING GIN (osm_tags)"
                        .to_string()
                ));
            }
            other => panic!("Expected CreateTable action, got {:?}", other),
        }
    }

    #[test]
    fn test_create_table_rejects_injection() {
        let config = ChainConfig::default();
        let signer = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        // Malicious table name never reaches SQL text
        let entry = ObjectEntry::new(vec!["x".to_string()])
            .with_field("name", json!("a; DROP TABLE x"))
            .with_field("table_columns", json!({"id": "int"}));
        let op = create_table_op(&signer, entry);
        assert!(matches!(
            CreateTableKind.prepare(&op, &config),
            Err(ChainError::Validation(_))
        ));

        // Malicious column name
        let entry = ObjectEntry::new(vec!["x".to_string()])
            .with_field("name", json!("places"))
            .with_field("table_columns", json!({"id; --": "int"}));
        let op = create_table_op(&signer, entry);
        assert!(CreateTableKind.prepare(&op, &config).is_err());

        // Malicious column type
        let entry = ObjectEntry::new(vec!["x".to_string()])
            .with_field("name", json!("places"))
            .with_field("table_columns", json!({"id": "int; DROP TABLE x"}));
        let op = create_table_op(&signer, entry);
        assert!(CreateTableKind.prepare(&op, &config).is_err());
    }

    #[test]
    fn test_create_table_executes_against_sink() {
        let registry = OpKindRegistry::with_builtins();
        let config = ChainConfig::default();
        let signer = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let entry = ObjectEntry::new(vec!["places".to_string()])
            .with_field("name", json!("places"))
            .with_field("table_columns", json!({"id": "bigint"}));
        let op = create_table_op(&signer, entry);
        let prepared = registry.validate_and_prepare(&op, &config).unwrap();

        let mut sink = MockSqlSink::new();
        sink.expect_execute_ddl()
            .withf(|statement: &str| statement == "CREATE TABLE places (id bigint)")
            .times(1)
            .returning(|_| Ok(()));

        let mut context = ExecutionContext::new(&mut sink);
        let outcome = registry.execute(&prepared, &mut context).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Executed);
    }

    #[test]
    fn test_ddl_failure_surfaces_driver_message() {
        let registry = OpKindRegistry::with_builtins();
        let config = ChainConfig::default();
        let signer = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let entry = ObjectEntry::new(vec!["places".to_string()])
            .with_field("name", json!("places"))
            .with_field("table_columns", json!({"id": "bigint"}));
        let op = create_table_op(&signer, entry);
        let prepared = registry.validate_and_prepare(&op, &config).unwrap();

        let mut sink = MockSqlSink::new();
        sink.expect_execute_ddl()
            .times(1)
            .returning(|_| Err("relation \"places\" already exists".to_string()));

        let mut context = ExecutionContext::new(&mut sink);
        match registry.execute(&prepared, &mut context) {
            Err(ChainError::DdlExecution(message)) => {
                assert!(message.contains("already exists"));
                assert!(message.contains("CREATE TABLE places"));
            }
            other => panic!("Expected DdlExecution, got {:?}", other),
        }
    }

    #[test]
    fn test_create_sequence() {
        let config = ChainConfig::default();
        let signer = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let entry = ObjectEntry::new(vec!["seq_places".to_string()])
            .with_field("name", json!("seq_places"))
            .with_field("minvalue", json!(1000));
        let op = OpDraft::new("create_sequence")
            .with_id(CompoundKey::single("seq_places"))
            .add_new(entry)
            .signed_by("operator1")
            .sign_and_seal(&signer)
            .unwrap();

        let prepared = CreateSequenceKind.prepare(&op, &config).unwrap();
        match &prepared.action {
            PreparedAction::CreateSequence {
                name,
                minvalue,
                statement,
            } => {
                assert_eq!(name, "seq_places");
                assert_eq!(*minvalue, Some(1000));
                assert_eq!(statement, "CREATE SEQUENCE seq_places MINVALUE 1000");
            }
            other => panic!("Expected CreateSequence action, got {:?}", other),
        }

        // Without minvalue
        let entry = ObjectEntry::new(vec!["seq_plain".to_string()])
            .with_field("name", json!("seq_plain"));
        let op = OpDraft::new("create_sequence")
            .with_id(CompoundKey::single("seq_plain"))
            .add_new(entry)
            .signed_by("operator1")
            .sign_and_seal(&signer)
            .unwrap();

        let prepared = CreateSequenceKind.prepare(&op, &config).unwrap();
        match &prepared.action {
            PreparedAction::CreateSequence { statement, .. } => {
                assert_eq!(statement, "CREATE SEQUENCE seq_plain");
            }
            other => panic!("Expected CreateSequence action, got {:?}", other),
        }
    }

    #[test]
    fn test_create_sequence_rejects_unsafe_name() {
        let config = ChainConfig::default();
        let signer = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let entry = ObjectEntry::new(vec!["x".to_string()])
            .with_field("name", json!("seq; DROP TABLE x"));
        let op = OpDraft::new("create_sequence")
            .with_id(CompoundKey::single("x"))
            .add_new(entry)
            .signed_by("operator1")
            .sign_and_seal(&signer)
            .unwrap();

        assert!(CreateSequenceKind.prepare(&op, &config).is_err());
    }
}
