//! Per-request serializer instance.
//!
//! A [`Serializer`] is created per validation or representation cycle with
//! either raw input data, an existing bound record, or both, and is discarded
//! after use. The compiled [`SchemaDescriptor`] it runs against is shared and
//! immutable; all mutable state lives here.
//!
//! The validation pipeline runs in two stages. A synchronous structural
//! pre-check collects every violation in one pass (primary key in input,
//! missing required fields, read-only fields in input, unknown keys) and
//! short-circuits conversion when anything is wrong. Otherwise per-field
//! conversion fans out concurrently over the input pairs and joins before
//! errors are aggregated; reported ordering always follows input key order,
//! not completion order.

use crate::error::ValidationError;
use crate::fields::FieldValue;
use crate::record::{RecordStore, SharedRecord};
use crate::schema::SchemaDescriptor;
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Key under which persistence failures are recorded in the error map.
const GENERIC_ERROR_KEY: &str = "error";

/// Transient validation/marshalling state for one request.
pub struct Serializer {
	schema: Arc<SchemaDescriptor>,
	store: Arc<dyn RecordStore>,
	record: Option<SharedRecord>,
	input: Option<IndexMap<String, Value>>,
	validated: IndexMap<String, FieldValue>,
	scalar_values: IndexMap<String, FieldValue>,
	relation_values: IndexMap<String, FieldValue>,
	errors: IndexMap<String, String>,
}

impl Serializer {
	/// Bind a schema to optional input data and an optional existing record.
	///
	/// A bound record must belong to the schema's record type; input, when
	/// present, must be a string-keyed object. Both are usage contracts and
	/// violating them is an error, not a data-validation failure.
	pub fn new(
		schema: Arc<SchemaDescriptor>,
		store: Arc<dyn RecordStore>,
		record: Option<SharedRecord>,
		input: Option<Value>,
	) -> Result<Self, ValidationError> {
		if let Some(record) = &record {
			let expected = schema.record_schema().name();
			if record.model_name() != expected {
				return Err(ValidationError::IncompatibleRecord {
					expected: expected.to_string(),
					actual: record.model_name().to_string(),
				});
			}
		}
		let input = match input {
			None => None,
			Some(Value::Object(map)) => Some(map.into_iter().collect()),
			Some(_) => return Err(ValidationError::InputNotObject),
		};
		Ok(Self {
			schema,
			store,
			record,
			input,
			validated: IndexMap::new(),
			scalar_values: IndexMap::new(),
			relation_values: IndexMap::new(),
			errors: IndexMap::new(),
		})
	}

	/// Serializer over raw input only (create mode).
	pub fn from_input(
		schema: Arc<SchemaDescriptor>,
		store: Arc<dyn RecordStore>,
		input: Value,
	) -> Result<Self, ValidationError> {
		Self::new(schema, store, None, Some(input))
	}

	/// Serializer over an existing record only (representation mode).
	pub fn from_record(
		schema: Arc<SchemaDescriptor>,
		store: Arc<dyn RecordStore>,
		record: SharedRecord,
	) -> Result<Self, ValidationError> {
		Self::new(schema, store, Some(record), None)
	}

	/// Serializer over an existing record plus input data (update mode).
	pub fn for_update(
		schema: Arc<SchemaDescriptor>,
		store: Arc<dyn RecordStore>,
		record: SharedRecord,
		input: Value,
	) -> Result<Self, ValidationError> {
		Self::new(schema, store, Some(record), Some(input))
	}

	/// Run the validation pipeline over the supplied input.
	///
	/// Returns `Ok(true)` when every field converted, `Ok(false)` with the
	/// error map populated otherwise. Calling this without input data is
	/// caller misuse and yields `Err`.
	pub async fn validate(&mut self) -> Result<bool, ValidationError> {
		let input = match &self.input {
			Some(map) if !map.is_empty() => map.clone(),
			_ => return Err(ValidationError::MissingInput),
		};

		let structural = self.structural_errors(&input);
		if !structural.is_empty() {
			self.errors.extend(structural);
			return Ok(false);
		}

		// Fan out per-field conversion; relation fields may suspend on their
		// lookup. join_all is an all-complete barrier and preserves input
		// order, so error aggregation stays deterministic.
		let schema = self.schema.clone();
		let pairs: Vec<(String, Value)> = input.into_iter().collect();
		let conversions = pairs.iter().map(|(name, raw)| {
			let spec = schema.field(name);
			async move {
				match spec {
					Some(spec) => spec.to_internal(raw).await,
					None => Err("unknown field".to_string()),
				}
			}
		});
		let results = join_all(conversions).await;

		let mut values = Vec::with_capacity(pairs.len());
		for ((name, _), result) in pairs.iter().zip(results) {
			match result {
				Ok(value) => values.push((name.clone(), value)),
				Err(message) => {
					self.errors.insert(name.clone(), message);
				}
			}
		}
		if !self.errors.is_empty() {
			return Ok(false);
		}
		self.set_validated(values);
		Ok(true)
	}

	/// One-pass structural pre-check: collects every violation instead of
	/// stopping at the first, and runs before any conversion work.
	fn structural_errors(&self, input: &IndexMap<String, Value>) -> IndexMap<String, String> {
		let mut errors = IndexMap::new();
		let pk = self.schema.pk_name();
		let update_mode = self.record.is_some();

		if input.contains_key(pk) {
			errors.insert(pk.to_string(), "primary key, cannot be in input".to_string());
		}
		for (name, spec) in self.schema.fields() {
			if name == pk || spec.is_read_only() || input.contains_key(name) {
				continue;
			}
			let required = if update_mode {
				spec.is_required_on_update()
			} else {
				spec.is_required_on_create()
			};
			if required {
				errors.insert(name.clone(), "missing in input".to_string());
			}
		}
		for name in input.keys() {
			if self
				.schema
				.field(name)
				.is_some_and(|spec| spec.is_read_only())
			{
				errors.insert(name.clone(), "field is read only".to_string());
			}
		}
		for name in input.keys() {
			if self.schema.field(name).is_none() {
				errors
					.entry(name.clone())
					.or_insert_with(|| "unknown field".to_string());
			}
		}
		errors
	}

	fn set_validated(&mut self, values: Vec<(String, FieldValue)>) {
		for (name, value) in values {
			let many = self
				.schema
				.field(&name)
				.is_some_and(|spec| spec.is_many_relation());
			if many {
				self.relation_values.insert(name.clone(), value.clone());
			} else {
				self.scalar_values.insert(name.clone(), value.clone());
			}
			self.validated.insert(name, value);
		}
	}

	/// Render the bound record as an ordered name-to-wire-value mapping.
	///
	/// Fields render concurrently but the result preserves schema field
	/// order regardless of completion order.
	pub async fn to_representation(&self) -> Result<IndexMap<String, Value>, ValidationError> {
		let record = self.record.clone().ok_or(ValidationError::NoRecord)?;
		let renders = self.schema.fields().iter().map(|(name, spec)| {
			let record = record.clone();
			async move { (name, spec.to_representation(name, &record).await) }
		});
		let results = join_all(renders).await;

		let mut out = IndexMap::with_capacity(self.schema.fields().len());
		for (name, result) in results {
			let value = result.map_err(|message| ValidationError::Representation {
				field: name.clone(),
				message,
			})?;
			out.insert(name.clone(), value);
		}
		Ok(out)
	}

	/// Create and persist a new record from the validated values.
	///
	/// Persistence failures are recorded in the error map and yield
	/// `Ok(None)`; only contract misuse yields `Err`. Many-relation values
	/// attach after creation under an all-or-nothing boundary: the first
	/// attach failure rolls the whole write back by deleting the record that
	/// was just created.
	pub async fn save(&mut self) -> Result<Option<SharedRecord>, ValidationError> {
		self.ensure_writable()?;

		let model = self.schema.record_schema().name().to_string();
		let created = match self.store.create(&model, &self.scalar_values).await {
			Ok(record) => record,
			Err(e) => {
				tracing::warn!(model = %model, error = %e, "record creation failed");
				self.record = None;
				self.errors.insert(
					GENERIC_ERROR_KEY.to_string(),
					"cannot save instance".to_string(),
				);
				return Ok(None);
			}
		};

		if !self.attach_relations(&created).await {
			if let Err(e) = self.store.delete(&created).await {
				tracing::warn!(model = %model, error = %e, "compensating delete failed");
			}
			self.record = None;
			return Ok(None);
		}

		self.record = Some(created.clone());
		Ok(Some(created))
	}

	/// [`Serializer::save`], then render the created record.
	pub async fn save_to_representation(
		&mut self,
	) -> Result<Option<IndexMap<String, Value>>, ValidationError> {
		match self.save().await? {
			Some(_) => Ok(Some(self.to_representation().await?)),
			None => Ok(None),
		}
	}

	/// Apply the validated values onto the bound record and persist it.
	///
	/// Relation attachment runs before persistence; an attach failure aborts
	/// the update without saving. Returns `Ok(false)` with the error map
	/// populated on any persistence failure.
	pub async fn update(&mut self) -> Result<bool, ValidationError> {
		self.ensure_writable()?;
		let record = self.record.clone().ok_or(ValidationError::NoRecord)?;

		for (attr, value) in &self.scalar_values {
			if let Err(e) = record.set(attr, value.clone()) {
				tracing::warn!(attr = %attr, error = %e, "attribute update failed");
				self.errors.insert(
					GENERIC_ERROR_KEY.to_string(),
					"cannot update instance, internal error".to_string(),
				);
				return Ok(false);
			}
		}
		if !self.attach_relations(&record).await {
			return Ok(false);
		}
		if let Err(e) = self.store.save(&record).await {
			tracing::warn!(error = %e, "record save failed");
			self.errors.insert(
				GENERIC_ERROR_KEY.to_string(),
				"cannot update instance, internal error".to_string(),
			);
			return Ok(false);
		}
		Ok(true)
	}

	/// Remove the bound record. The engine only exposes the hook; deletion
	/// semantics belong to the store.
	pub async fn delete(&mut self) -> Result<bool, ValidationError> {
		let record = self.record.clone().ok_or(ValidationError::NoRecord)?;
		match self.store.delete(&record).await {
			Ok(()) => {
				self.record = None;
				Ok(true)
			}
			Err(e) => {
				tracing::warn!(error = %e, "record delete failed");
				self.errors.insert(
					GENERIC_ERROR_KEY.to_string(),
					"cannot delete instance".to_string(),
				);
				Ok(false)
			}
		}
	}

	/// Attach every validated many-relation value to `record`. Stops at the
	/// first failure, recording it against the field name.
	async fn attach_relations(&mut self, record: &SharedRecord) -> bool {
		for (name, value) in &self.relation_values {
			let FieldValue::Records(related) = value else {
				continue;
			};
			if let Err(e) = record.attach(name, related).await {
				tracing::warn!(field = %name, error = %e, "relation attach failed");
				self.errors.insert(
					name.clone(),
					format!("cannot save with value/values {value}"),
				);
				return false;
			}
		}
		true
	}

	fn ensure_writable(&self) -> Result<(), ValidationError> {
		if !self.errors.is_empty() {
			return Err(ValidationError::InvalidData);
		}
		if self.input.is_some() && self.validated.is_empty() {
			return Err(ValidationError::NotValidated);
		}
		Ok(())
	}

	/// Typed values produced by a successful `validate`.
	pub fn validated_data(&self) -> &IndexMap<String, FieldValue> {
		&self.validated
	}

	/// Aggregated data and persistence errors, in first-detected order.
	pub fn errors(&self) -> &IndexMap<String, String> {
		&self.errors
	}

	/// The bound record, if any.
	pub fn record(&self) -> Option<&SharedRecord> {
		self.record.as_ref()
	}
}
