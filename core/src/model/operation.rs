//! Operation representation
//!
//! An operation is an atomic, typed change-request to the ledger. It is
//! built mutably as an [`OpDraft`], then hashed, signed and sealed into an
//! immutable [`Operation`]. The sealed type exposes no mutable access, so
//! post-seal mutation is impossible rather than merely checked at runtime.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::crypto::{self, KeyPair, PublicKey};
use crate::error::{ChainError, Result};
use super::domains;
use super::hex32;
use super::key::CompoundKey;

/// One created, superseded or removed entry inside an operation.
///
/// On the wire an entry is an object carrying at least an `id` array; all
/// remaining keys are its field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Identifier components of the entry
    pub id: Vec<String>,

    /// Remaining fields of the entry
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl ObjectEntry {
    /// Create an entry with an id and no extra fields
    pub fn new(id: Vec<String>) -> Self {
        ObjectEntry {
            id,
            fields: serde_json::Map::new(),
        }
    }

    /// Add a field to the entry
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a field value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Look up a string field value
    pub fn string_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Mutable operation under construction.
///
/// Drafts accumulate fields, then seal into an [`Operation`] via
/// [`OpDraft::sign_and_seal`]. Sealing consumes the draft.
#[derive(Debug, Clone, Default)]
pub struct OpDraft {
    op_type: String,
    id: Option<CompoundKey>,
    refs: BTreeMap<String, Value>,
    new: Vec<ObjectEntry>,
    old: Vec<ObjectEntry>,
    delete: Vec<ObjectEntry>,
    signed_by: Vec<String>,
}

impl OpDraft {
    /// Start a draft of the given registered kind
    pub fn new(op_type: impl Into<String>) -> Self {
        OpDraft {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    /// Set the subject identifier
    pub fn with_id(mut self, id: CompoundKey) -> Self {
        self.id = Some(id);
        self
    }

    /// Add a named reference to a prior operation or object
    pub fn with_ref(mut self, name: impl Into<String>, value: Value) -> Self {
        self.refs.insert(name.into(), value);
        self
    }

    /// Append a created entry
    pub fn add_new(mut self, entry: ObjectEntry) -> Self {
        self.new.push(entry);
        self
    }

    /// Append a superseded entry
    pub fn add_old(mut self, entry: ObjectEntry) -> Self {
        self.old.push(entry);
        self
    }

    /// Append a removed entry
    pub fn add_delete(mut self, entry: ObjectEntry) -> Self {
        self.delete.push(entry);
        self
    }

    /// Add a signing identity
    pub fn signed_by(mut self, name: impl Into<String>) -> Self {
        self.signed_by.push(name.into());
        self
    }

    /// Parse a draft from the wire shape.
    ///
    /// The wire object carries `type`, `signed_by` (string or array, a
    /// string may be a `site:nickname` compound), `ref` (object of named
    /// references) and `new`/`old`/`delete` entry arrays. The `id` array
    /// may contain trailing nulls, which are trimmed.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ChainError::Validation("Operation must be a JSON object".to_string()))?;

        let op_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Validation("Operation is missing `type`".to_string()))?
            .to_string();

        let mut draft = OpDraft::new(op_type);

        if let Some(id_value) = object.get("id") {
            let raw = id_value.as_array().ok_or_else(|| {
                ChainError::Validation("Operation `id` must be an array".to_string())
            })?;
            let components: Vec<Option<String>> = raw
                .iter()
                .map(|c| c.as_str().map(str::to_string))
                .collect();
            draft.id = Some(CompoundKey::from_components(&components)?);
        }

        match object.get("signed_by") {
            Some(Value::String(name)) => draft.signed_by.push(name.clone()),
            Some(Value::Array(names)) => {
                for name in names {
                    let name = name.as_str().ok_or_else(|| {
                        ChainError::Validation("`signed_by` entries must be strings".to_string())
                    })?;
                    draft.signed_by.push(name.to_string());
                }
            }
            Some(_) => {
                return Err(ChainError::Validation(
                    "`signed_by` must be a string or an array of strings".to_string(),
                ));
            }
            None => {}
        }

        if let Some(refs) = object.get("ref") {
            let refs = refs.as_object().ok_or_else(|| {
                ChainError::Validation("Operation `ref` must be an object".to_string())
            })?;
            for (name, value) in refs {
                draft.refs.insert(name.clone(), value.clone());
            }
        }

        for (field, target) in [
            ("new", &mut draft.new),
            ("old", &mut draft.old),
            ("delete", &mut draft.delete),
        ] {
            if let Some(entries) = object.get(field) {
                let parsed: Vec<ObjectEntry> = serde_json::from_value(entries.clone())
                    .map_err(|e| {
                        ChainError::Validation(format!("Malformed `{}` entries: {}", field, e))
                    })?;
                *target = parsed;
            }
        }

        Ok(draft)
    }

    /// Kind name of the draft
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Subject identifier, if set
    pub fn id(&self) -> Option<&CompoundKey> {
        self.id.as_ref()
    }

    /// Canonical content of the draft.
    ///
    /// Object keys are emitted in sorted order (the default `serde_json`
    /// map is ordered), so the canonical form is order-stable and
    /// whitespace-insensitive regardless of how the wire JSON was laid out.
    fn content_value(&self) -> Value {
        let id_components: Vec<Value> = self
            .id
            .as_ref()
            .map(|id| {
                id.components()
                    .into_iter()
                    .map(|c| Value::String(c.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        serde_json::json!({
            "type": self.op_type,
            "id": id_components,
            "ref": self.refs,
            "new": self.new,
            "old": self.old,
            "delete": self.delete,
            "signed_by": self.signed_by,
        })
    }

    /// Canonical serialized content bytes
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.content_value())?)
    }

    /// Serialized payload size in bytes, as counted against the
    /// configured ceiling
    pub fn payload_size(&self) -> Result<usize> {
        Ok(self.canonical_bytes()?.len())
    }

    /// Content hash of the draft (everything except the signature)
    pub fn content_hash(&self) -> Result<[u8; 32]> {
        Ok(crypto::secure_hash(
            domains::OPERATION,
            &self.canonical_bytes()?,
        ))
    }

    /// Sign the draft and seal it into an immutable [`Operation`].
    ///
    /// The signature is computed over the canonical content hash. The
    /// draft must name at least one signing identity.
    pub fn sign_and_seal(self, key_pair: &KeyPair) -> Result<Operation> {
        if self.signed_by.is_empty() {
            return Err(ChainError::Validation(
                "Operation names no signing identity".to_string(),
            ));
        }

        let hash = self.content_hash()?;
        let signature = key_pair.sign(&hash);

        Ok(self.into_operation(hash, Some(hex::encode(signature))))
    }

    /// Seal the draft without a signature.
    ///
    /// Unsigned operations never pass chain admission; this exists for
    /// hash inspection of in-flight drafts and for tests.
    pub fn seal_unsigned(self) -> Result<Operation> {
        let hash = self.content_hash()?;
        Ok(self.into_operation(hash, None))
    }

    fn into_operation(self, hash: [u8; 32], signature: Option<String>) -> Operation {
        Operation {
            op_type: self.op_type,
            id: self.id,
            refs: self.refs,
            new: self.new,
            old: self.old,
            delete: self.delete,
            signed_by: self.signed_by,
            signature,
            hash,
        }
    }
}

/// A sealed, immutable operation.
///
/// Constructed only by sealing an [`OpDraft`]; all fields are read-only
/// from here on. An operation lives in the pending queue until it is
/// embedded in exactly one sealed block, and is never destroyed afterwards,
/// only relocated into a superblock by compaction.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    op_type: String,
    id: Option<CompoundKey>,
    refs: BTreeMap<String, Value>,
    new: Vec<ObjectEntry>,
    old: Vec<ObjectEntry>,
    delete: Vec<ObjectEntry>,
    signed_by: Vec<String>,
    signature: Option<String>,
    #[serde(with = "hex32")]
    hash: [u8; 32],
}

impl Debug for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Operation")
            .field("type", &self.op_type)
            .field("id", &self.id)
            .field("signed_by", &self.signed_by)
            .field("hash", &hex::encode(&self.hash[0..4]))
            .field("signed", &self.signature.is_some())
            .finish()
    }
}

impl Operation {
    /// Kind name
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Subject identifier, if present
    pub fn id(&self) -> Option<&CompoundKey> {
        self.id.as_ref()
    }

    /// Named references to prior operations/objects
    pub fn refs(&self) -> &BTreeMap<String, Value> {
        &self.refs
    }

    /// Entries this operation creates
    pub fn new_entries(&self) -> &[ObjectEntry] {
        &self.new
    }

    /// Entries this operation supersedes
    pub fn old_entries(&self) -> &[ObjectEntry] {
        &self.old
    }

    /// Entries this operation removes
    pub fn delete_entries(&self) -> &[ObjectEntry] {
        &self.delete
    }

    /// Signing identity names
    pub fn signed_by(&self) -> &[String] {
        &self.signed_by
    }

    /// Hex-encoded signature, if signed
    pub fn signature_hex(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Content hash
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Whether the operation carries a signature
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Serialized payload size in bytes
    pub fn payload_size(&self) -> Result<usize> {
        Ok(serde_json::to_vec(&self.content_value())?.len())
    }

    fn content_value(&self) -> Value {
        let id_components: Vec<Value> = self
            .id
            .as_ref()
            .map(|id| {
                id.components()
                    .into_iter()
                    .map(|c| Value::String(c.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        serde_json::json!({
            "type": self.op_type,
            "id": id_components,
            "ref": self.refs,
            "new": self.new,
            "old": self.old,
            "delete": self.delete,
            "signed_by": self.signed_by,
        })
    }

    /// Recompute the content hash and compare against the stored one
    pub fn verify_hash(&self) -> bool {
        let bytes = match serde_json::to_vec(&self.content_value()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let recomputed = crypto::secure_hash(domains::OPERATION, &bytes);
        crypto::verify_hash(&self.hash, &recomputed)
    }

    /// Verify the signature against a public key.
    ///
    /// An unsigned operation or a malformed signature yields `false`.
    pub fn verify_signature(&self, key: &PublicKey) -> bool {
        let signature = match &self.signature {
            Some(signature) => signature,
            None => return false,
        };
        let raw = match hex::decode(signature) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        key.verify(&self.hash, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SignatureAlgorithm};

    fn signup_draft(nickname: &str) -> OpDraft {
        OpDraft::new("signup")
            .with_id(CompoundKey::single(nickname))
            .add_new(
                ObjectEntry::new(vec![nickname.to_string()])
                    .with_field("pubkey", Value::String("ec:secp256k1:02ab".to_string())),
            )
            .signed_by(nickname)
    }

    #[test]
    fn test_seal_and_verify() {
        let pair = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);
        let op = signup_draft("alice").sign_and_seal(&pair).unwrap();

        assert!(op.is_signed());
        assert!(op.verify_hash());
        assert!(op.verify_signature(&pair.public_key()));

        // A different key does not verify
        let other = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);
        assert!(!op.verify_signature(&other.public_key()));
    }

    #[test]
    fn test_hash_ignores_signature() {
        let pair = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);

        let signed = signup_draft("alice").sign_and_seal(&pair).unwrap();
        let unsigned = signup_draft("alice").seal_unsigned().unwrap();

        // Signature is excluded from the content hash
        assert_eq!(signed.hash(), unsigned.hash());
        assert!(!unsigned.is_signed());
        assert!(!unsigned.verify_signature(&pair.public_key()));
    }

    #[test]
    fn test_sealing_requires_signer() {
        let pair = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);
        let draft = OpDraft::new("operation");

        match draft.sign_and_seal(&pair) {
            Err(ChainError::Validation(_)) => {}
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_canonical_hash_is_order_and_whitespace_insensitive() {
        let a: Value = serde_json::from_str(
            r#"{"type":"signup","signed_by":"alice","new":[{"id":["alice"],"role":"user"}]}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{
                "new":  [ { "role": "user", "id": ["alice"] } ],
                "signed_by": "alice",
                "type": "signup"
            }"#,
        )
        .unwrap();

        let hash_a = OpDraft::from_json(&a).unwrap().content_hash().unwrap();
        let hash_b = OpDraft::from_json(&b).unwrap().content_hash().unwrap();

        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn test_from_json_wire_shape() {
        let wire: Value = serde_json::from_str(
            r#"{
                "type": "login",
                "id": ["openplace", "alice", null],
                "signed_by": "openplace:alice",
                "ref": {"signup": ["alice"]},
                "new": [{"id": ["openplace", "alice"], "pubkey": "ec:secp256k1:02ab"}]
            }"#,
        )
        .unwrap();

        let draft = OpDraft::from_json(&wire).unwrap();
        assert_eq!(draft.op_type(), "login");
        assert_eq!(draft.id().unwrap(), &CompoundKey::pair("openplace", "alice"));

        let op = draft.seal_unsigned().unwrap();
        assert_eq!(op.signed_by(), vec!["openplace:alice".to_string()]);
        assert_eq!(op.refs().len(), 1);
        assert_eq!(op.new_entries().len(), 1);
        assert_eq!(
            op.new_entries()[0].string_field("pubkey"),
            Some("ec:secp256k1:02ab")
        );
    }

    #[test]
    fn test_from_json_rejects_malformed_input() {
        // Not an object
        assert!(OpDraft::from_json(&Value::Null).is_err());

        // Missing type
        let wire: Value = serde_json::from_str(r#"{"signed_by": "alice"}"#).unwrap();
        assert!(OpDraft::from_json(&wire).is_err());

        // Null before a present id component
        let wire: Value =
            serde_json::from_str(r#"{"type": "login", "id": [null, "alice"]}"#).unwrap();
        assert!(OpDraft::from_json(&wire).is_err());
    }

    #[test]
    fn test_serde_roundtrip_preserves_hash() {
        let pair = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);
        let op = signup_draft("alice").sign_and_seal(&pair).unwrap();

        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();

        assert_eq!(op, back);
        assert!(back.verify_hash());
        assert!(back.verify_signature(&pair.public_key()));
    }

    #[test]
    fn test_payload_size_counts_canonical_bytes() {
        let draft = signup_draft("alice");
        let size = draft.payload_size().unwrap();
        assert_eq!(size, draft.canonical_bytes().unwrap().len());

        let sealed = draft.seal_unsigned().unwrap();
        assert_eq!(sealed.payload_size().unwrap(), size);
    }
}
