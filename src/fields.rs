//! Field variants: typed units of conversion and validation.
//!
//! A [`FieldSpec`] is a closed variant over scalar fields (string, integer,
//! datetime, binary, json), relation fields resolved through an external
//! lookup, and computed fields bound to a resolver callback. Every variant
//! exposes `to_internal` (wire value in, typed value or data-error message
//! out - bad input is a normal result, never a fault) and
//! `to_representation` (typed value or record attribute in, wire value out).

use crate::record::{Record, RelationSource, SharedRecord};
use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The one literal datetime format accepted and produced by datetime fields.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Internal typed value produced by a successful field conversion.
#[derive(Clone)]
pub enum FieldValue {
	Text(String),
	Integer(i64),
	DateTime(NaiveDateTime),
	Binary(Vec<u8>),
	Json(Value),
	/// A resolved single related record
	Record(SharedRecord),
	/// Resolved records of a many relation
	Records(Vec<SharedRecord>),
}

impl FieldValue {
	/// Canonical wire form of the value. Related records collapse to their
	/// primary key; undecodable binary falls back to lossy UTF-8.
	pub fn to_json(&self) -> Value {
		match self {
			FieldValue::Text(s) => Value::String(s.clone()),
			FieldValue::Integer(i) => Value::from(*i),
			FieldValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
			FieldValue::Binary(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
			FieldValue::Json(v) => v.clone(),
			FieldValue::Record(r) => r.pk().map(|pk| pk.to_json()).unwrap_or(Value::Null),
			FieldValue::Records(rs) => Value::Array(
				rs.iter()
					.map(|r| r.pk().map(|pk| pk.to_json()).unwrap_or(Value::Null))
					.collect(),
			),
		}
	}
}

impl fmt::Debug for FieldValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FieldValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
			FieldValue::Integer(i) => f.debug_tuple("Integer").field(i).finish(),
			FieldValue::DateTime(dt) => f.debug_tuple("DateTime").field(dt).finish(),
			FieldValue::Binary(b) => f.debug_tuple("Binary").field(&b.len()).finish(),
			FieldValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
			FieldValue::Record(r) => f
				.debug_struct("Record")
				.field("model", &r.model_name())
				.field("pk", &r.pk().map(|pk| pk.to_json()))
				.finish(),
			FieldValue::Records(rs) => f.debug_tuple("Records").field(&rs.len()).finish(),
		}
	}
}

impl fmt::Display for FieldValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FieldValue::Text(s) => write!(f, "{s}"),
			FieldValue::Integer(i) => write!(f, "{i}"),
			FieldValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
			FieldValue::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
			FieldValue::Json(v) => write!(f, "{v}"),
			FieldValue::Record(r) => write!(f, "{}", display_value(&self_pk_json(r))),
			FieldValue::Records(rs) => {
				write!(f, "[")?;
				for (i, r) in rs.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{}", display_value(&self_pk_json(r)))?;
				}
				write!(f, "]")
			}
		}
	}
}

fn self_pk_json(record: &SharedRecord) -> Value {
	record.pk().map(|pk| pk.to_json()).unwrap_or(Value::Null)
}

/// Records compare by identity (model name plus primary key); scalars by
/// value.
impl PartialEq for FieldValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(FieldValue::Text(a), FieldValue::Text(b)) => a == b,
			(FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
			(FieldValue::DateTime(a), FieldValue::DateTime(b)) => a == b,
			(FieldValue::Binary(a), FieldValue::Binary(b)) => a == b,
			(FieldValue::Json(a), FieldValue::Json(b)) => a == b,
			(FieldValue::Record(a), FieldValue::Record(b)) => record_identity_eq(a, b),
			(FieldValue::Records(a), FieldValue::Records(b)) => {
				a.len() == b.len()
					&& a.iter().zip(b.iter()).all(|(x, y)| record_identity_eq(x, y))
			}
			_ => false,
		}
	}
}

fn record_identity_eq(a: &SharedRecord, b: &SharedRecord) -> bool {
	a.model_name() == b.model_name()
		&& a.pk().map(|pk| pk.to_json()) == b.pk().map(|pk| pk.to_json())
}

/// Requested keys may arrive as strings even for numeric attributes; a
/// stored key and a requested key match when their wire forms are equal or
/// share the same textual form.
fn key_matches(stored: &Value, requested: &Value) -> bool {
	stored == requested || display_value(stored) == display_value(requested)
}

/// Unquoted textual form of a wire value, used in data-error messages.
fn display_value(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Array(items) => {
			let parts: Vec<String> = items.iter().map(display_value).collect();
			format!("[{}]", parts.join(", "))
		}
		other => other.to_string(),
	}
}

/// Scalar field kinds with their fixed conversion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
	String,
	Integer,
	DateTime,
	Binary,
	Json,
}

impl ScalarKind {
	/// Convert an untrusted wire value into the internal typed form.
	pub fn to_internal(&self, raw: &Value) -> Result<FieldValue, String> {
		match self {
			ScalarKind::String => match raw {
				Value::String(s) => Ok(FieldValue::Text(s.clone())),
				Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
				Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
				_ => Err("incorrect value, cannot transform to string".to_string()),
			},
			ScalarKind::Integer => {
				if let Some(i) = raw.as_i64() {
					Ok(FieldValue::Integer(i))
				} else if let Some(s) = raw.as_str() {
					s.trim()
						.parse::<i64>()
						.map(FieldValue::Integer)
						.map_err(|_| "incorrect value, cannot transform to integer".to_string())
				} else if let Some(f) = raw.as_f64() {
					if f.is_finite() {
						Ok(FieldValue::Integer(f as i64))
					} else {
						Err("incorrect value, cannot transform to integer".to_string())
					}
				} else {
					Err("incorrect value, cannot transform to integer".to_string())
				}
			}
			ScalarKind::DateTime => raw
				.as_str()
				.and_then(|s| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok())
				.map(FieldValue::DateTime)
				.ok_or_else(|| "incorrect value, cannot transform to datetime".to_string()),
			ScalarKind::Binary => raw
				.as_str()
				.map(|s| FieldValue::Binary(s.as_bytes().to_vec()))
				.ok_or_else(|| "incorrect value, cannot transform to binary".to_string()),
			ScalarKind::Json => Ok(FieldValue::Json(raw.clone())),
		}
	}

	/// Convert an internal typed value back to its wire form.
	pub fn to_representation(&self, value: &FieldValue) -> Result<Value, String> {
		match (self, value) {
			(ScalarKind::String, FieldValue::Text(s)) => Ok(Value::String(s.clone())),
			(ScalarKind::String, FieldValue::Integer(i)) => Ok(Value::String(i.to_string())),
			(ScalarKind::Integer, FieldValue::Integer(i)) => Ok(Value::from(*i)),
			(ScalarKind::Integer, FieldValue::Text(s)) => s
				.trim()
				.parse::<i64>()
				.map(Value::from)
				.map_err(|_| "incorrect value, cannot transform to integer".to_string()),
			(ScalarKind::DateTime, FieldValue::DateTime(dt)) => {
				Ok(Value::String(dt.format(DATETIME_FORMAT).to_string()))
			}
			(ScalarKind::Binary, FieldValue::Binary(bytes)) => String::from_utf8(bytes.clone())
				.map(Value::String)
				.map_err(|_| "incorrect value, cannot transform to binary".to_string()),
			(ScalarKind::Json, FieldValue::Json(v)) => Ok(v.clone()),
			(kind, other) => Err(format!(
				"incorrect value, cannot represent {other:?} as {kind:?}"
			)),
		}
	}
}

/// Relation field: resolves external references through a lookup source.
#[derive(Clone)]
pub struct RelationSpec {
	source: Arc<dyn RelationSource>,
	key_attr: String,
	many: bool,
}

impl RelationSpec {
	pub fn new(source: Arc<dyn RelationSource>, key_attr: impl Into<String>, many: bool) -> Self {
		Self {
			source,
			key_attr: key_attr.into(),
			many,
		}
	}

	pub fn key_attr(&self) -> &str {
		&self.key_attr
	}

	pub fn many(&self) -> bool {
		self.many
	}

	async fn to_internal(&self, raw: &Value) -> Result<FieldValue, String> {
		if self.many {
			let keys = raw
				.as_array()
				.ok_or_else(|| "incorrect value, expected a list of related keys".to_string())?;
			// An empty requested set is a legitimate empty relation, not a
			// lookup miss.
			if keys.is_empty() {
				return Ok(FieldValue::Records(Vec::new()));
			}
			let found = self
				.source
				.lookup(&self.key_attr, keys)
				.await
				.map_err(|e| e.to_string())?;
			let all_resolved = keys.iter().all(|key| {
				found.iter().any(|r| {
					r.get(&self.key_attr)
						.map(|v| key_matches(&v.to_json(), key))
						.unwrap_or(false)
				})
			});
			if all_resolved {
				Ok(FieldValue::Records(found))
			} else {
				Err(format!("{} does not exists", display_value(raw)))
			}
		} else {
			let found = self
				.source
				.lookup(&self.key_attr, std::slice::from_ref(raw))
				.await
				.map_err(|e| e.to_string())?;
			match found.into_iter().next() {
				Some(record) => Ok(FieldValue::Record(record)),
				None => Err(format!("{} does not exists", display_value(raw))),
			}
		}
	}

	async fn to_representation(&self, record: &dyn Record, attr: &str) -> Result<Value, String> {
		let related = record.fetch_related(attr).await.map_err(|e| e.to_string())?;
		if self.many {
			Ok(Value::Array(
				related.iter().map(|r| self.key_of(r)).collect(),
			))
		} else {
			Ok(related.first().map(|r| self.key_of(r)).unwrap_or(Value::Null))
		}
	}

	fn key_of(&self, record: &SharedRecord) -> Value {
		record
			.get(&self.key_attr)
			.map(|v| v.to_json())
			.unwrap_or(Value::Null)
	}
}

/// Resolver callback backing a computed field. Receives the bound record and
/// produces the wire value for that field.
pub type ComputedResolver =
	Arc<dyn Fn(SharedRecord) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Representation-only field backed by a registered resolver.
#[derive(Clone)]
pub struct ComputedSpec {
	resolver: ComputedResolver,
}

impl ComputedSpec {
	pub fn new(resolver: ComputedResolver) -> Self {
		Self { resolver }
	}
}

/// Closed variant over the three field families.
#[derive(Clone)]
pub enum FieldKind {
	Scalar(ScalarKind),
	Relation(RelationSpec),
	Computed(ComputedSpec),
}

impl fmt::Debug for FieldKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FieldKind::Scalar(kind) => f.debug_tuple("Scalar").field(kind).finish(),
			FieldKind::Relation(rel) => f
				.debug_struct("Relation")
				.field("key_attr", &rel.key_attr)
				.field("many", &rel.many)
				.finish(),
			FieldKind::Computed(_) => f.write_str("Computed"),
		}
	}
}

/// One named field of a schema: conversion behavior plus write policy.
#[derive(Debug, Clone)]
pub struct FieldSpec {
	pub(crate) kind: FieldKind,
	pub(crate) read_only: bool,
	pub(crate) required_on_create: bool,
	pub(crate) required_on_update: bool,
}

impl FieldSpec {
	pub fn scalar(kind: ScalarKind) -> Self {
		Self {
			kind: FieldKind::Scalar(kind),
			read_only: false,
			required_on_create: true,
			required_on_update: true,
		}
	}

	pub fn relation(
		source: Arc<dyn RelationSource>,
		key_attr: impl Into<String>,
		many: bool,
	) -> Self {
		Self {
			kind: FieldKind::Relation(RelationSpec::new(source, key_attr, many)),
			read_only: false,
			required_on_create: true,
			required_on_update: true,
		}
	}

	/// Computed fields are representation-only and never required in input.
	pub fn computed(resolver: ComputedResolver) -> Self {
		Self {
			kind: FieldKind::Computed(ComputedSpec::new(resolver)),
			read_only: true,
			required_on_create: false,
			required_on_update: false,
		}
	}

	pub fn read_only(mut self) -> Self {
		self.read_only = true;
		self
	}

	pub fn kind(&self) -> &FieldKind {
		&self.kind
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only
	}

	pub fn is_required_on_create(&self) -> bool {
		self.required_on_create
	}

	pub fn is_required_on_update(&self) -> bool {
		self.required_on_update
	}

	pub fn is_relation(&self) -> bool {
		matches!(self.kind, FieldKind::Relation(_))
	}

	/// Whether validated values of this field route into the relation-attach
	/// write pipeline rather than the record constructor.
	pub fn is_many_relation(&self) -> bool {
		matches!(&self.kind, FieldKind::Relation(rel) if rel.many)
	}

	/// Convert one wire value. The `Err` side is a recoverable data-error
	/// message, aggregated by the caller, never raised.
	pub async fn to_internal(&self, raw: &Value) -> Result<FieldValue, String> {
		match &self.kind {
			FieldKind::Scalar(kind) => kind.to_internal(raw),
			FieldKind::Relation(rel) => rel.to_internal(raw).await,
			FieldKind::Computed(_) => Err("method field is read only".to_string()),
		}
	}

	/// Render this field off the bound record.
	pub async fn to_representation(
		&self,
		name: &str,
		record: &SharedRecord,
	) -> Result<Value, String> {
		match &self.kind {
			FieldKind::Scalar(kind) => match record.get(name) {
				Some(value) => kind.to_representation(&value),
				None => Ok(Value::Null),
			},
			FieldKind::Relation(rel) => rel.to_representation(record.as_ref(), name).await,
			FieldKind::Computed(spec) => (spec.resolver)(record.clone()).await,
		}
	}
}

/// Content equality over classification: flags plus variant signature.
/// Relation lookup sources and computed resolvers are opaque callbacks and
/// do not participate.
impl PartialEq for FieldSpec {
	fn eq(&self, other: &Self) -> bool {
		let kind_eq = match (&self.kind, &other.kind) {
			(FieldKind::Scalar(a), FieldKind::Scalar(b)) => a == b,
			(FieldKind::Relation(a), FieldKind::Relation(b)) => {
				a.key_attr == b.key_attr && a.many == b.many
			}
			(FieldKind::Computed(_), FieldKind::Computed(_)) => true,
			_ => false,
		};
		kind_eq
			&& self.read_only == other.read_only
			&& self.required_on_create == other.required_on_create
			&& self.required_on_update == other.required_on_update
	}
}
