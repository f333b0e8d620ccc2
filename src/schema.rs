//! One-time schema construction.
//!
//! A [`SchemaDescriptor`] is the compiled, immutable form of a serializer
//! declaration: an ordered name-to-field map derived from a record type
//! description plus declared overrides, read-only names, and registered
//! computed resolvers. Construction validates the declaration with a
//! fail-fast chain - the first violation wins - so a malformed schema can
//! never produce a serializer instance.

use crate::error::SchemaError;
use crate::fields::{ComputedResolver, FieldKind, FieldSpec, ScalarKind};
use crate::record::{AttributeKind, RecordSchema, RecordStore, SharedRecord, StoreRelationSource};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Immutable compiled schema, shared read-only by every serializer instance.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
	record_schema: Arc<RecordSchema>,
	fields: IndexMap<String, FieldSpec>,
}

impl SchemaDescriptor {
	/// Start a schema declaration over the given record type description.
	pub fn builder(record_schema: Arc<RecordSchema>) -> SchemaBuilder {
		SchemaBuilder {
			record_schema,
			field_names: Vec::new(),
			read_only_names: Vec::new(),
			overrides: IndexMap::new(),
			resolvers: IndexMap::new(),
			store: None,
		}
	}

	pub fn record_schema(&self) -> &Arc<RecordSchema> {
		&self.record_schema
	}

	/// Declared fields, in declaration order.
	pub fn fields(&self) -> &IndexMap<String, FieldSpec> {
		&self.fields
	}

	pub fn field(&self, name: &str) -> Option<&FieldSpec> {
		self.fields.get(name)
	}

	pub fn pk_name(&self) -> &str {
		self.record_schema.pk_attr()
	}
}

/// Declarative builder for [`SchemaDescriptor`]. Collects the field list,
/// read-only names, per-field overrides, and the computed-resolver
/// registration table, then validates everything in [`SchemaBuilder::build`].
pub struct SchemaBuilder {
	record_schema: Arc<RecordSchema>,
	field_names: Vec<String>,
	read_only_names: Vec<String>,
	overrides: IndexMap<String, FieldSpec>,
	resolvers: IndexMap<String, ComputedResolver>,
	store: Option<Arc<dyn RecordStore>>,
}

impl SchemaBuilder {
	/// Declare the ordered field list.
	pub fn fields<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.field_names = names.into_iter().map(Into::into).collect();
		self
	}

	/// Declare explicitly read-only field names.
	pub fn read_only<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.read_only_names = names.into_iter().map(Into::into).collect();
		self
	}

	/// Declare an override field, replacing whatever the record type would
	/// have produced for that name. Relation fields are declared this way.
	pub fn override_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
		self.overrides.insert(name.into(), spec);
		self
	}

	/// Register a computed-field resolver. Registration is explicit so that
	/// a field name with no backing attribute and no resolver fails at build
	/// time, not at first representation.
	pub fn computed<F>(mut self, name: impl Into<String>, resolver: F) -> Self
	where
		F: Fn(SharedRecord) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
	{
		self.resolvers.insert(name.into(), Arc::new(resolver));
		self
	}

	/// Default store used to auto-resolve relation-typed record attributes
	/// that were listed without a declared override.
	pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Validate the declaration and compile the descriptor.
	pub fn build(self) -> Result<SchemaDescriptor, SchemaError> {
		if self.field_names.is_empty() {
			return Err(SchemaError::EmptyFields);
		}
		if !self.record_schema.is_well_formed() {
			let reason = if self.record_schema.attributes().is_empty() {
				"no attributes declared"
			} else {
				"primary key attribute not found"
			};
			return Err(SchemaError::InvalidModel {
				model: self.record_schema.name().to_string(),
				reason: reason.to_string(),
			});
		}
		for name in &self.field_names {
			if !self.is_allowed(name) {
				return Err(SchemaError::UnknownField { name: name.clone() });
			}
		}
		for name in &self.read_only_names {
			if !self.is_allowed(name) {
				return Err(SchemaError::UnknownReadOnlyField { name: name.clone() });
			}
		}
		for (name, spec) in &self.overrides {
			if spec.is_relation() && !self.field_names.contains(name) {
				return Err(SchemaError::RelationNotInFields { name: name.clone() });
			}
		}

		let mut fields = IndexMap::with_capacity(self.field_names.len());
		for name in &self.field_names {
			let spec = self.resolve_field(name)?;
			fields.insert(name.clone(), spec);
		}

		tracing::debug!(
			model = self.record_schema.name(),
			fields = fields.len(),
			"schema descriptor built"
		);
		Ok(SchemaDescriptor {
			record_schema: self.record_schema,
			fields,
		})
	}

	/// A name is declarable if it backs onto a record attribute, a declared
	/// override, or a registered computed resolver.
	fn is_allowed(&self, name: &str) -> bool {
		self.record_schema.attribute(name).is_some()
			|| self.overrides.contains_key(name)
			|| self.resolvers.contains_key(name)
	}

	fn resolve_field(&self, name: &str) -> Result<FieldSpec, SchemaError> {
		let mut spec = if let Some(declared) = self.overrides.get(name) {
			declared.clone()
		} else if let Some(attr) = self.record_schema.attribute(name) {
			match &attr.kind {
				AttributeKind::ForeignKey {
					related_model,
					related_key,
				} => {
					let store =
						self.store
							.clone()
							.ok_or_else(|| SchemaError::MissingRelationSource {
								name: name.to_string(),
							})?;
					FieldSpec::relation(
						Arc::new(StoreRelationSource::new(store, related_model.clone())),
						related_key.clone(),
						false,
					)
				}
				kind => FieldSpec::scalar(scalar_kind_for(kind)),
			}
		} else if let Some(resolver) = self.resolvers.get(name) {
			FieldSpec::computed(resolver.clone())
		} else {
			return Err(SchemaError::UnknownField {
				name: name.to_string(),
			});
		};

		if matches!(spec.kind, FieldKind::Computed(_)) {
			// Representation-only, flags are fixed by construction.
			return Ok(spec);
		}

		// The primary key is excluded from input by the structural check,
		// never by the read-only rule.
		let is_pk = name == self.record_schema.pk_attr();
		if !is_pk {
			spec.read_only = spec.read_only || self.read_only_names.iter().any(|n| n == name);
		}
		if let Some(attr) = self.record_schema.attribute(name) {
			spec.required_on_create = attr.required && !attr.auto_on_create;
			spec.required_on_update = attr.required && !attr.auto_on_update;
		}
		Ok(spec)
	}
}

fn scalar_kind_for(kind: &AttributeKind) -> ScalarKind {
	match kind {
		AttributeKind::Text | AttributeKind::Uuid => ScalarKind::String,
		AttributeKind::Integer | AttributeKind::IntEnum => ScalarKind::Integer,
		AttributeKind::DateTime => ScalarKind::DateTime,
		AttributeKind::Binary => ScalarKind::Binary,
		AttributeKind::Json => ScalarKind::Json,
		AttributeKind::ForeignKey { .. } => {
			unreachable!("relation attributes resolve before scalar mapping")
		}
	}
}
