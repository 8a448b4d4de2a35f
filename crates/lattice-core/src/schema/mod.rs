//! Schema layer - record types, primary keys, and secondary indexes
//!
//! A [`Schema`] maps record-type names to their primary-key expression
//! and index list. Schemas are immutable once built; the planner caches
//! compiled plans against [`Schema::version`], so rebuilding a schema
//! with a bumped version invalidates every cached plan.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Expression producing the key suffix written per record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyExpression {
    /// Value of a named field
    Field(String),
    /// Ordered concatenation; arity defines the compound length
    Concat(Vec<KeyExpression>),
    /// Marks a child as a range boundary (rank-style indexes)
    RangeBoundary(Box<KeyExpression>),
}

impl KeyExpression {
    /// Compound concatenation of plain fields
    pub fn concat_fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        KeyExpression::Concat(fields.into_iter().map(|f| KeyExpression::Field(f.into())).collect())
    }

    /// Number of tuple elements the expression produces
    pub fn column_count(&self) -> usize {
        match self {
            KeyExpression::Field(_) => 1,
            KeyExpression::Concat(children) => children.iter().map(|c| c.column_count()).sum(),
            KeyExpression::RangeBoundary(child) => child.column_count(),
        }
    }

    /// Field names in expression order, ignoring boundary markers
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            KeyExpression::Field(name) => vec![name.as_str()],
            KeyExpression::Concat(children) => {
                children.iter().flat_map(|c| c.field_names()).collect()
            }
            KeyExpression::RangeBoundary(child) => child.field_names(),
        }
    }
}

/// Lifecycle state of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    /// Fully built; the planner may use it
    Readable,
    /// Entries are being written but the index cannot serve reads yet
    WriteOnly,
    /// Ignored entirely
    Disabled,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexState::Readable => write!(f, "readable"),
            IndexState::WriteOnly => write!(f, "write-only"),
            IndexState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Distance metric for vector indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorMetric {
    /// 1 - cosine similarity
    Cosine,
    /// Euclidean (L2) distance
    Euclidean,
    /// Negated dot product
    DotProduct,
}

/// Search strategy for vector indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorStrategy {
    /// Brute-force scan over every stored vector
    FlatScan,
    /// HNSW graph search with flat-scan fallback
    Hnsw {
        /// Whether the graph is maintained inline on every write
        inline_indexing: bool,
    },
}

/// Options carried by vector indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorOptions {
    /// Vector dimension
    pub dimension: usize,
    /// Distance metric
    pub metric: VectorMetric,
    /// Search strategy
    pub strategy: VectorStrategy,
}

/// Coordinate system for spatial indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Planar x/y (z optional)
    Cartesian,
    /// WGS84 longitude/latitude
    Wgs84,
}

/// Options carried by spatial indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialOptions {
    /// Coordinate system of the indexed points
    pub system: CoordinateSystem,
    /// Field holding the x coordinate (longitude for WGS84)
    pub x_field: String,
    /// Field holding the y coordinate (latitude for WGS84)
    pub y_field: String,
    /// World bounds used to quantize coordinates onto the space-filling
    /// curve: (min_x, min_y, max_x, max_y)
    pub bounds: (f64, f64, f64, f64),
}

impl SpatialOptions {
    /// WGS84 defaults covering the whole globe
    pub fn wgs84(x_field: impl Into<String>, y_field: impl Into<String>) -> Self {
        Self {
            system: CoordinateSystem::Wgs84,
            x_field: x_field.into(),
            y_field: y_field.into(),
            bounds: (-180.0, -90.0, 180.0, 90.0),
        }
    }
}

/// Index kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Plain value index: indexed fields + primary key per entry
    Value,
    /// Value index that additionally stores the named fields in the
    /// entry value so matching queries skip the record fetch
    Covering {
        /// Extra fields stored in the entry value
        stored_fields: Vec<String>,
    },
    /// Rank / leaderboard index
    Rank,
    /// Space-filling-curve index over 2D/3D coordinates
    Spatial(SpatialOptions),
    /// k-NN vector index
    Vector(VectorOptions),
}

/// A secondary index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Unique name within the record type
    pub name: String,
    /// Record type the index covers
    pub record_type: String,
    /// Key expression producing the entry suffix
    pub key_expression: KeyExpression,
    /// Index kind and kind-specific options
    pub kind: IndexKind,
    /// Whether entries are unique per indexed value
    pub unique: bool,
    /// Lifecycle state
    pub state: IndexState,
}

impl Index {
    /// Plain readable value index over the given fields
    pub fn value<S: Into<String>>(
        name: impl Into<String>,
        record_type: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type: record_type.into(),
            key_expression: KeyExpression::concat_fields(fields),
            kind: IndexKind::Value,
            unique: false,
            state: IndexState::Readable,
        }
    }

    /// Mark the index unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Override the lifecycle state
    pub fn with_state(mut self, state: IndexState) -> Self {
        self.state = state;
        self
    }

    /// Indexed field names in key order
    pub fn key_fields(&self) -> Vec<&str> {
        self.key_expression.field_names()
    }

    /// Leading indexed field, if the expression starts with one
    pub fn leading_field(&self) -> Option<&str> {
        self.key_fields().first().copied()
    }

    /// Fields that can be served without a record fetch
    pub fn covered_fields(&self) -> Vec<&str> {
        let mut fields = self.key_fields();
        if let IndexKind::Covering { stored_fields } = &self.kind {
            fields.extend(stored_fields.iter().map(|s| s.as_str()));
        }
        fields
    }

    /// Deterministic subspace element prefixing this index's entries
    pub fn subspace_key(&self) -> String {
        format!("{}/{}", self.record_type, self.name)
    }

    /// True when the planner may scan this index
    pub fn is_scannable(&self) -> bool {
        self.state == IndexState::Readable
            && matches!(self.kind, IndexKind::Value | IndexKind::Covering { .. })
    }
}

/// A record type: primary key plus indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTypeDef {
    /// Type name
    pub name: String,
    /// Primary-key expression; at least one component
    pub primary_key: KeyExpression,
    /// Secondary indexes
    pub indexes: Vec<Index>,
}

impl RecordTypeDef {
    /// Number of elements in the primary-key tuple
    pub fn primary_key_length(&self) -> usize {
        self.primary_key.column_count()
    }

    /// Look up an index by name
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Builder for [`Schema`]
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    version: u64,
    record_types: BTreeMap<String, RecordTypeDef>,
}

impl SchemaBuilder {
    /// Start an empty schema at version 1
    pub fn new() -> Self {
        Self { version: 1, record_types: BTreeMap::new() }
    }

    /// Set the metadata version
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add a record type
    pub fn record_type(
        mut self,
        name: impl Into<String>,
        primary_key: KeyExpression,
        indexes: Vec<Index>,
    ) -> Self {
        let name = name.into();
        self.record_types.insert(
            name.clone(),
            RecordTypeDef { name, primary_key, indexes },
        );
        self
    }

    /// Validate invariants and freeze
    pub fn build(self) -> Result<Schema> {
        for def in self.record_types.values() {
            if def.name.is_empty() {
                return Err(Error::invalid_argument("record type name must not be empty"));
            }
            if def.primary_key.column_count() == 0 {
                return Err(Error::invalid_argument(format!(
                    "record type '{}' needs at least one primary-key component",
                    def.name
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for index in &def.indexes {
                if index.name.is_empty() {
                    return Err(Error::invalid_argument(format!(
                        "record type '{}' has an index with an empty name",
                        def.name
                    )));
                }
                if !seen.insert(index.name.as_str()) {
                    return Err(Error::invalid_argument(format!(
                        "duplicate index name '{}' on record type '{}'",
                        index.name, def.name
                    )));
                }
                if index.key_expression.column_count() == 0 {
                    return Err(Error::invalid_argument(format!(
                        "index '{}' has an empty key expression",
                        index.name
                    )));
                }
            }
        }
        Ok(Schema { version: self.version, record_types: self.record_types })
    }
}

/// An immutable schema shared by planner, executor, and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    version: u64,
    record_types: BTreeMap<String, RecordTypeDef>,
}

impl Schema {
    /// Builder entry point
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Metadata version; bumping it invalidates cached plans
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a record type
    pub fn record_type(&self, name: &str) -> Result<&RecordTypeDef> {
        self.record_types.get(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unknown record type '{}'; register it in the schema first",
                name
            ))
        })
    }

    /// All record types in name order
    pub fn record_types(&self) -> impl Iterator<Item = &RecordTypeDef> {
        self.record_types.values()
    }

    /// Find an index by name across record types
    pub fn find_index(&self, name: &str) -> Option<(&RecordTypeDef, &Index)> {
        self.record_types
            .values()
            .find_map(|def| def.index(name).map(|idx| (def, idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_type() -> SchemaBuilder {
        Schema::builder().record_type(
            "User",
            KeyExpression::Field("id".into()),
            vec![
                Index::value("user_email", "User", ["email"]).unique(),
                Index::value("user_city_age", "User", ["city", "age"]),
            ],
        )
    }

    #[test]
    fn test_schema_builds_and_resolves() {
        let schema = user_type().build().unwrap();
        let def = schema.record_type("User").unwrap();
        assert_eq!(def.primary_key_length(), 1);
        assert_eq!(def.index("user_email").unwrap().key_fields(), vec!["email"]);
        assert!(schema.record_type("Ghost").is_err());
    }

    #[test]
    fn test_duplicate_index_names_rejected() {
        let result = Schema::builder()
            .record_type(
                "User",
                KeyExpression::Field("id".into()),
                vec![
                    Index::value("dup", "User", ["a"]),
                    Index::value("dup", "User", ["b"]),
                ],
            )
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_compound_arity() {
        let expr = KeyExpression::concat_fields(["a", "b", "c"]);
        assert_eq!(expr.column_count(), 3);
        assert_eq!(expr.field_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_covered_fields() {
        let index = Index {
            name: "cover".into(),
            record_type: "User".into(),
            key_expression: KeyExpression::concat_fields(["city"]),
            kind: IndexKind::Covering { stored_fields: vec!["age".into()] },
            unique: false,
            state: IndexState::Readable,
        };
        assert_eq!(index.covered_fields(), vec!["city", "age"]);
    }

    #[test]
    fn test_disabled_index_not_scannable() {
        let index = Index::value("i", "User", ["a"]).with_state(IndexState::Disabled);
        assert!(!index.is_scannable());
    }
}
