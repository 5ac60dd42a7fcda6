//! Typed model of the analysis service's block output.
//!
//! The wire format is PascalCase JSON. Block types and relationship kinds the
//! service may add in the future deserialize into `Other` variants so a newer
//! service never breaks an older consumer.

use serde::{Deserialize, Serialize};

/// Atomic unit of the analysis service's output, linked to other blocks via
/// typed relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "BlockType")]
    pub block_type: BlockType,
    /// Present for `WORD` and `LINE` blocks.
    #[serde(rename = "Text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "Confidence", default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Only meaningful on `KEY_VALUE_SET` blocks.
    #[serde(rename = "EntityTypes", default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<EntityType>,
    /// 1-based, present on `CELL` blocks only.
    #[serde(rename = "RowIndex", default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    /// 1-based, present on `CELL` blocks only.
    #[serde(rename = "ColumnIndex", default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<u32>,
    #[serde(rename = "Relationships", default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl Block {
    /// A bare block of the given type; remaining fields are filled in with
    /// struct-update syntax at construction sites.
    pub fn new(id: impl Into<String>, block_type: BlockType) -> Self {
        Self {
            id: id.into(),
            block_type,
            text: None,
            confidence: None,
            entity_types: Vec::new(),
            row_index: None,
            column_index: None,
            relationships: Vec::new(),
        }
    }

    pub fn is_entity(&self, entity: EntityType) -> bool {
        self.entity_types.contains(&entity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    KeyValueSet,
    Table,
    Cell,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Key,
    Value,
    #[serde(other)]
    Other,
}

/// Typed directed edge between blocks: `CHILD` is composition, `VALUE` pairs a
/// key with its value block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "Type")]
    pub kind: RelationshipKind,
    #[serde(rename = "Ids")]
    pub ids: Vec<String>,
}

impl Relationship {
    pub fn child(ids: Vec<String>) -> Self {
        Self {
            kind: RelationshipKind::Child,
            ids,
        }
    }

    pub fn value(ids: Vec<String>) -> Self {
        Self {
            kind: RelationshipKind::Value,
            ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    Child,
    Value,
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_wire_block() {
        let raw = r#"{
            "Id": "line-1",
            "BlockType": "LINE",
            "Text": "Invoice",
            "Confidence": 99.12,
            "Relationships": [{"Type": "CHILD", "Ids": ["word-1"]}]
        }"#;
        let block: Block = serde_json::from_str(raw).expect("valid block json");
        assert_eq!(block.block_type, BlockType::Line);
        assert_eq!(block.text.as_deref(), Some("Invoice"));
        assert_eq!(block.relationships[0].kind, RelationshipKind::Child);
        assert_eq!(block.relationships[0].ids, vec!["word-1".to_string()]);
    }

    #[test]
    fn unknown_block_and_relationship_types_are_tolerated() {
        let raw = r#"{
            "Id": "x-1",
            "BlockType": "SIGNATURE",
            "Relationships": [{"Type": "MERGED_CELL", "Ids": ["y-1"]}]
        }"#;
        let block: Block = serde_json::from_str(raw).expect("unknown types still parse");
        assert_eq!(block.block_type, BlockType::Other);
        assert_eq!(block.relationships[0].kind, RelationshipKind::Other);
    }

    #[test]
    fn cell_indices_round_trip() {
        let cell = Block {
            row_index: Some(2),
            column_index: Some(3),
            ..Block::new("cell-1", BlockType::Cell)
        };
        let json = serde_json::to_string(&cell).expect("serialize");
        assert!(json.contains("\"RowIndex\":2"));
        let back: Block = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cell);
    }
}
