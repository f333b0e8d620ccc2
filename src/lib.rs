//! Declarative data-marshalling engine for record stores.
//!
//! Given a schema declared as a set of named fields bound to attributes of a
//! backing record type, this crate validates untrusted wire input against
//! type and policy rules, converts between wire values and internal typed
//! values, and renders backing records back into ordered wire mappings.
//!
//! The flow has two halves. A [`SchemaDescriptor`] is compiled once per
//! schema declaration from a [`RecordSchema`] plus declared overrides and is
//! shared, immutable, by every instance. A [`Serializer`] is created per
//! request around raw input or an existing record, runs the field pipeline
//! concurrently with all-or-nothing error aggregation, and drives create or
//! update writes against a [`RecordStore`].

pub mod error;
pub mod fields;
pub mod record;
pub mod schema;
pub mod serializer;

pub use error::{SchemaError, ValidationError};
pub use fields::{
	ComputedResolver, ComputedSpec, DATETIME_FORMAT, FieldKind, FieldSpec, FieldValue,
	RelationSpec, ScalarKind,
};
pub use record::{
	AttributeDescriptor, AttributeKind, Record, RecordSchema, RecordStore, RelationSource,
	SharedRecord, StoreError, StoreRelationSource,
};
pub use schema::{SchemaBuilder, SchemaDescriptor};
pub use serializer::Serializer;
