//! Shared test fixtures: an in-memory record store plus the sample record
//! types the integration tests marshal against.

use async_trait::async_trait;
use field_marshal::{
	AttributeDescriptor, AttributeKind, FieldValue, Record, RecordSchema, RecordStore,
	SharedRecord, StoreError,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Failure injection switches shared between the store and its records.
#[derive(Default)]
pub struct FailureFlags {
	pub fail_create: AtomicBool,
	pub fail_attach: AtomicBool,
	pub fail_save: AtomicBool,
}

pub struct MemoryRecord {
	model: String,
	pk_attr: String,
	attrs: RwLock<IndexMap<String, FieldValue>>,
	m2m: RwLock<HashMap<String, Vec<SharedRecord>>>,
	m2m_allowed: HashSet<String>,
	flags: Arc<FailureFlags>,
}

#[async_trait]
impl Record for MemoryRecord {
	fn model_name(&self) -> &str {
		&self.model
	}

	fn get(&self, attr: &str) -> Option<FieldValue> {
		self.attrs.read().unwrap().get(attr).cloned()
	}

	fn set(&self, attr: &str, value: FieldValue) -> Result<(), StoreError> {
		self.attrs.write().unwrap().insert(attr.to_string(), value);
		Ok(())
	}

	fn pk(&self) -> Option<FieldValue> {
		self.attrs.read().unwrap().get(&self.pk_attr).cloned()
	}

	async fn fetch_related(&self, attr: &str) -> Result<Vec<SharedRecord>, StoreError> {
		if let Some(related) = self.m2m.read().unwrap().get(attr) {
			return Ok(related.clone());
		}
		match self.attrs.read().unwrap().get(attr) {
			Some(FieldValue::Record(r)) => Ok(vec![r.clone()]),
			Some(FieldValue::Records(rs)) => Ok(rs.clone()),
			_ => Ok(Vec::new()),
		}
	}

	async fn attach(&self, attr: &str, related: &[SharedRecord]) -> Result<(), StoreError> {
		if self.flags.fail_attach.load(Ordering::SeqCst) {
			return Err(StoreError::Backend("injected attach failure".to_string()));
		}
		if !self.m2m_allowed.contains(attr) {
			return Err(StoreError::UnknownAttribute(attr.to_string()));
		}
		self.m2m
			.write()
			.unwrap()
			.entry(attr.to_string())
			.or_default()
			.extend(related.iter().cloned());
		Ok(())
	}
}

/// Naive in-memory store: one table per registered record schema, linear
/// scans for query-by-attribute.
pub struct MemoryStore {
	schemas: RwLock<HashMap<String, Arc<RecordSchema>>>,
	m2m_attrs: RwLock<HashMap<String, HashSet<String>>>,
	tables: RwLock<HashMap<String, Vec<Arc<MemoryRecord>>>>,
	next_id: AtomicI64,
	pub flags: Arc<FailureFlags>,
}

impl MemoryStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			schemas: RwLock::new(HashMap::new()),
			m2m_attrs: RwLock::new(HashMap::new()),
			tables: RwLock::new(HashMap::new()),
			next_id: AtomicI64::new(1),
			flags: Arc::new(FailureFlags::default()),
		})
	}

	pub fn register(&self, schema: Arc<RecordSchema>) {
		self.schemas
			.write()
			.unwrap()
			.insert(schema.name().to_string(), schema);
	}

	pub fn register_m2m(&self, model: &str, attr: &str) {
		self.m2m_attrs
			.write()
			.unwrap()
			.entry(model.to_string())
			.or_default()
			.insert(attr.to_string());
	}

	/// Seed a record directly, bypassing validation. Fills in a missing
	/// primary key the same way `create` does.
	pub fn insert(&self, model: &str, attrs: IndexMap<String, FieldValue>) -> SharedRecord {
		self.build_record(model, attrs)
			.expect("fixture model must be registered")
	}

	pub fn count(&self, model: &str) -> usize {
		self.tables
			.read()
			.unwrap()
			.get(model)
			.map(|t| t.len())
			.unwrap_or(0)
	}

	pub fn find(&self, model: &str, attr: &str, key: &Value) -> Option<SharedRecord> {
		self.tables.read().unwrap().get(model).and_then(|table| {
			table
				.iter()
				.find(|r| r.get(attr).map(|v| v.to_json()).as_ref() == Some(key))
				.map(|r| r.clone() as SharedRecord)
		})
	}

	fn build_record(
		&self,
		model: &str,
		mut attrs: IndexMap<String, FieldValue>,
	) -> Result<SharedRecord, StoreError> {
		let schema = self
			.schemas
			.read()
			.unwrap()
			.get(model)
			.cloned()
			.ok_or_else(|| StoreError::Backend(format!("unregistered model '{model}'")))?;
		for name in attrs.keys() {
			if schema.attribute(name).is_none() {
				return Err(StoreError::UnknownAttribute(name.clone()));
			}
		}
		let pk_attr = schema.pk_attr().to_string();
		if !attrs.contains_key(&pk_attr) {
			let pk = match schema.attribute(&pk_attr).map(|a| &a.kind) {
				Some(AttributeKind::Uuid) => {
					FieldValue::Text(uuid::Uuid::new_v4().to_string())
				}
				_ => FieldValue::Integer(self.next_id.fetch_add(1, Ordering::SeqCst)),
			};
			attrs.insert(pk_attr.clone(), pk);
		}
		let record = Arc::new(MemoryRecord {
			model: model.to_string(),
			pk_attr,
			attrs: RwLock::new(attrs),
			m2m: RwLock::new(HashMap::new()),
			m2m_allowed: self
				.m2m_attrs
				.read()
				.unwrap()
				.get(model)
				.cloned()
				.unwrap_or_default(),
			flags: self.flags.clone(),
		});
		self.tables
			.write()
			.unwrap()
			.entry(model.to_string())
			.or_default()
			.push(record.clone());
		Ok(record)
	}
}

#[async_trait]
impl RecordStore for MemoryStore {
	async fn create(
		&self,
		model: &str,
		attrs: &IndexMap<String, FieldValue>,
	) -> Result<SharedRecord, StoreError> {
		if self.flags.fail_create.load(Ordering::SeqCst) {
			return Err(StoreError::Backend("injected create failure".to_string()));
		}
		self.build_record(model, attrs.clone())
	}

	async fn save(&self, _record: &SharedRecord) -> Result<(), StoreError> {
		if self.flags.fail_save.load(Ordering::SeqCst) {
			return Err(StoreError::Backend("injected save failure".to_string()));
		}
		// Records mutate in place; nothing further to persist.
		Ok(())
	}

	async fn delete(&self, record: &SharedRecord) -> Result<(), StoreError> {
		let pk = record.pk().map(|v| v.to_json());
		let mut tables = self.tables.write().unwrap();
		if let Some(table) = tables.get_mut(record.model_name()) {
			table.retain(|r| r.pk().map(|v| v.to_json()) != pk);
		}
		Ok(())
	}

	async fn query_by_attribute(
		&self,
		model: &str,
		attr: &str,
		keys: &[Value],
	) -> Result<Vec<SharedRecord>, StoreError> {
		let tables = self.tables.read().unwrap();
		let Some(table) = tables.get(model) else {
			return Ok(Vec::new());
		};
		Ok(table
			.iter()
			.filter(|r| {
				r.get(attr)
					.map(|v| v.to_json())
					.is_some_and(|v| keys.contains(&v))
			})
			.map(|r| r.clone() as SharedRecord)
			.collect())
	}
}

/// `sample_model`: integer pk plus a unique-ish name used as relation key.
pub fn sample_model_schema() -> Arc<RecordSchema> {
	let mut attrs = IndexMap::new();
	attrs.insert(
		"id".to_string(),
		AttributeDescriptor::new(AttributeKind::Integer).primary_key(),
	);
	attrs.insert("name".to_string(), AttributeDescriptor::new(AttributeKind::Text));
	Arc::new(RecordSchema::new("sample_model", "id", attrs))
}

/// `sample_model_group`: target of the many relation.
pub fn group_schema() -> Arc<RecordSchema> {
	let mut attrs = IndexMap::new();
	attrs.insert(
		"id".to_string(),
		AttributeDescriptor::new(AttributeKind::Integer).primary_key(),
	);
	attrs.insert("name".to_string(), AttributeDescriptor::new(AttributeKind::Text));
	Arc::new(RecordSchema::new("sample_model_group", "id", attrs))
}

/// `sample_model_child`: the full scalar spread plus a single relation.
pub fn child_schema() -> Arc<RecordSchema> {
	let mut attrs = IndexMap::new();
	attrs.insert(
		"id".to_string(),
		AttributeDescriptor::new(AttributeKind::Uuid)
			.primary_key()
			.auto_on_create(),
	);
	attrs.insert("name".to_string(), AttributeDescriptor::new(AttributeKind::Text));
	attrs.insert(
		"number".to_string(),
		AttributeDescriptor::new(AttributeKind::Integer),
	);
	attrs.insert(
		"created".to_string(),
		AttributeDescriptor::new(AttributeKind::DateTime).auto_on_create(),
	);
	attrs.insert(
		"updated".to_string(),
		AttributeDescriptor::new(AttributeKind::DateTime).auto_on_update(),
	);
	attrs.insert(
		"data".to_string(),
		AttributeDescriptor::new(AttributeKind::Binary),
	);
	attrs.insert(
		"sample_model".to_string(),
		AttributeDescriptor::new(AttributeKind::ForeignKey {
			related_model: "sample_model".to_string(),
			related_key: "name".to_string(),
		}),
	);
	Arc::new(RecordSchema::new("sample_model_child", "id", attrs))
}

/// Store with every fixture model registered and the child's `groups` many
/// relation allowed.
pub fn setup_store() -> Arc<MemoryStore> {
	let store = MemoryStore::new();
	store.register(sample_model_schema());
	store.register(group_schema());
	store.register(child_schema());
	store.register_m2m("sample_model_child", "groups");
	store
}

pub fn seed_sample(store: &MemoryStore, name: &str) -> SharedRecord {
	let mut attrs = IndexMap::new();
	attrs.insert("name".to_string(), FieldValue::Text(name.to_string()));
	store.insert("sample_model", attrs)
}

pub fn seed_group(store: &MemoryStore, name: &str) -> SharedRecord {
	let mut attrs = IndexMap::new();
	attrs.insert("name".to_string(), FieldValue::Text(name.to_string()));
	store.insert("sample_model_group", attrs)
}
