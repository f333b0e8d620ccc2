//! Abstract persistence contract consumed by the marshalling engine.
//!
//! The engine never talks to a concrete database. It consumes a
//! [`RecordSchema`] describing the backing record type (attribute names,
//! declared kinds, auto-generation flags), reads and writes attributes
//! through the object-safe [`Record`] trait, and performs CRUD plus
//! query-by-attribute through [`RecordStore`]. Relation fields resolve
//! external references through [`RelationSource`], which is usually just a
//! thin wrapper over a store query ([`StoreRelationSource`]).

use crate::fields::FieldValue;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
	/// No record matched the query
	#[error("record not found")]
	NotFound,

	/// A store-side constraint rejected the write
	#[error("constraint violated: {0}")]
	Constraint(String),

	/// The record type does not carry the named attribute
	#[error("unknown attribute '{0}'")]
	UnknownAttribute(String),

	/// Transport or backend failure
	#[error("store backend error: {0}")]
	Backend(String),
}

/// Declared type of a single record attribute.
///
/// This is the fixed table the schema builder maps through when no override
/// was declared for a field: text-like kinds become `String` fields,
/// integer-like kinds become `Integer` fields, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
	Text,
	Uuid,
	Integer,
	IntEnum,
	DateTime,
	Binary,
	Json,
	/// Reference to another record type; `related_key` names the attribute
	/// relation lookups match against (the related model's key)
	ForeignKey {
		related_model: String,
		related_key: String,
	},
}

/// Metadata for one attribute of the backing record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
	pub kind: AttributeKind,
	/// Whether the store demands a value for this attribute
	pub required: bool,
	/// Auto-populated by the store when the record is created
	pub auto_on_create: bool,
	/// Auto-populated by the store on every save
	pub auto_on_update: bool,
	pub primary_key: bool,
}

impl AttributeDescriptor {
	pub fn new(kind: AttributeKind) -> Self {
		Self {
			kind,
			required: true,
			auto_on_create: false,
			auto_on_update: false,
			primary_key: false,
		}
	}

	pub fn primary_key(mut self) -> Self {
		self.primary_key = true;
		self
	}

	pub fn optional(mut self) -> Self {
		self.required = false;
		self
	}

	pub fn auto_on_create(mut self) -> Self {
		self.auto_on_create = true;
		self
	}

	pub fn auto_on_update(mut self) -> Self {
		self.auto_on_update = true;
		self
	}
}

/// Description of a backing record type: an ordered attribute map plus the
/// primary key attribute name. Owned by the persistence layer, read-only to
/// the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
	name: String,
	pk_attr: String,
	attributes: IndexMap<String, AttributeDescriptor>,
}

impl RecordSchema {
	pub fn new(
		name: impl Into<String>,
		pk_attr: impl Into<String>,
		attributes: IndexMap<String, AttributeDescriptor>,
	) -> Self {
		Self {
			name: name.into(),
			pk_attr: pk_attr.into(),
			attributes,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn pk_attr(&self) -> &str {
		&self.pk_attr
	}

	pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
		self.attributes.get(name)
	}

	pub fn attributes(&self) -> &IndexMap<String, AttributeDescriptor> {
		&self.attributes
	}

	/// A description is usable only if it has attributes and its primary key
	/// name points at an attribute flagged as such.
	pub fn is_well_formed(&self) -> bool {
		!self.attributes.is_empty()
			&& self
				.attributes
				.get(&self.pk_attr)
				.is_some_and(|attr| attr.primary_key)
	}
}

/// Shared handle to a backing record. Records circulate as shared handles
/// because relation resolution and representation hold them across await
/// points; implementations use interior mutability for `set`.
pub type SharedRecord = Arc<dyn Record>;

/// One backing record instance, accessed by attribute name.
#[async_trait]
pub trait Record: Send + Sync {
	/// Name of the record type this instance belongs to
	fn model_name(&self) -> &str;

	/// Read an attribute; `None` when the attribute holds no value
	fn get(&self, attr: &str) -> Option<FieldValue>;

	/// Write an attribute in place
	fn set(&self, attr: &str, value: FieldValue) -> Result<(), StoreError>;

	/// Primary key value, if the record has been persisted
	fn pk(&self) -> Option<FieldValue>;

	/// Fetch the records behind a relation attribute. A single reference
	/// yields zero or one element; a many relation yields all of them.
	async fn fetch_related(&self, attr: &str) -> Result<Vec<SharedRecord>, StoreError>;

	/// Attach related records under a many relation attribute
	async fn attach(&self, attr: &str, related: &[SharedRecord]) -> Result<(), StoreError>;
}

/// CRUD plus query-by-attribute surface of the backing store.
#[async_trait]
pub trait RecordStore: Send + Sync {
	/// Create and persist a record of `model` from typed attribute values
	async fn create(
		&self,
		model: &str,
		attrs: &IndexMap<String, FieldValue>,
	) -> Result<SharedRecord, StoreError>;

	/// Persist in-place mutations of an existing record
	async fn save(&self, record: &SharedRecord) -> Result<(), StoreError>;

	/// Remove a record
	async fn delete(&self, record: &SharedRecord) -> Result<(), StoreError>;

	/// All records of `model` whose `attr` equals any of `keys`. Keys arrive
	/// in wire form; the store compares against each record's canonical
	/// representation of the attribute.
	async fn query_by_attribute(
		&self,
		model: &str,
		attr: &str,
		keys: &[Value],
	) -> Result<Vec<SharedRecord>, StoreError>;
}

/// Lookup capability a relation field resolves external references through.
#[async_trait]
pub trait RelationSource: Send + Sync {
	/// Records whose `key_attr` matches any of the requested keys. Keys are
	/// wire values; when checking that every requested key resolved, the
	/// engine treats a key and its textual form as the same key, so a
	/// numeric key may arrive as a string.
	async fn lookup(&self, key_attr: &str, keys: &[Value]) -> Result<Vec<SharedRecord>, StoreError>;
}

/// Store-backed [`RelationSource`]: resolves keys with a plain
/// query-by-attribute against one record type.
#[derive(Clone)]
pub struct StoreRelationSource {
	store: Arc<dyn RecordStore>,
	model: String,
}

impl StoreRelationSource {
	pub fn new(store: Arc<dyn RecordStore>, model: impl Into<String>) -> Self {
		Self {
			store,
			model: model.into(),
		}
	}

	pub fn model(&self) -> &str {
		&self.model
	}
}

#[async_trait]
impl RelationSource for StoreRelationSource {
	async fn lookup(&self, key_attr: &str, keys: &[Value]) -> Result<Vec<SharedRecord>, StoreError> {
		self.store.query_by_attribute(&self.model, key_attr, keys).await
	}
}
