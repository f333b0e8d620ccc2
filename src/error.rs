//! Error types for schema construction and serializer usage.
//!
//! Two disjoint taxonomies live here. [`SchemaError`] is raised once, at
//! schema-definition time, and is never recoverable: a malformed schema must
//! not be usable at all. [`ValidationError`] covers caller misuse of a
//! serializer instance (calling `validate` without input, writing before
//! validating, binding an incompatible record). Per-field data errors are
//! neither: they are plain messages aggregated into the instance's ordered
//! error map and never propagated as `Err`.

use thiserror::Error;

/// Schema construction failure. Fail-fast: the first violation wins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
	/// The declared field list is missing or empty
	#[error("fields missing or empty")]
	EmptyFields,

	/// The record type description is not a usable model
	#[error("'{model}' is not a valid model: {reason}")]
	InvalidModel {
		/// Name of the offending record type
		model: String,
		/// Why the description was rejected
		reason: String,
	},

	/// A declared field matches neither a model attribute, a registered
	/// computed resolver, nor a declared override
	#[error("field '{name}' does not belong to model or serialized fields")]
	UnknownField { name: String },

	/// A read-only declaration names a field outside the allowed set
	#[error("read only field '{name}' does not belong to model or serialized fields")]
	UnknownReadOnlyField { name: String },

	/// A declared relation override was left out of the field list
	#[error("related field '{name}' not included in fields")]
	RelationNotInFields { name: String },

	/// A relation-typed model attribute was listed without a declared
	/// override and no default store was configured to resolve it against
	#[error("relation field '{name}' has no lookup source")]
	MissingRelationSource { name: String },
}

/// Serializer usage error - a programming-contract violation, not a data
/// quality issue. Surfaced loudly as `Err`, never collected into the
/// per-field error map.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// The bound record belongs to a different model than the schema
	#[error("instance not serializer model class: expected '{expected}', got '{actual}'")]
	IncompatibleRecord { expected: String, actual: String },

	/// Raw input was supplied but is not a string-keyed object
	#[error("data is not a string-keyed object")]
	InputNotObject,

	/// `validate` was called without any input data
	#[error("initial data not provided, cannot validate")]
	MissingInput,

	/// A write was attempted while the error map is non-empty
	#[error("invalid data")]
	InvalidData,

	/// A write was attempted before `validate` ran on the supplied input
	#[error("run validate first")]
	NotValidated,

	/// The operation needs a bound record and none is present
	#[error("no record bound, first call validate and save")]
	NoRecord,

	/// A field could not be rendered while building a representation
	#[error("cannot represent field '{field}': {message}")]
	Representation { field: String, message: String },
}
