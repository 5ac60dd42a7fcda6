//! Block-graph extraction: flat block collections into structured content.
//!
//! The input must be the complete block set for one job, all pages already
//! merged; handing in a single page of a paginated result is a caller error.
//! A malformed relationship (an id the service never delivered) contributes
//! nothing rather than aborting the rest of the document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::block::{Block, BlockType, EntityType, RelationshipKind};
use super::index::BlockIndex;

/// One text line in the service's natural reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub confidence: f64,
}

/// A resolved form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

/// A table as nested rows of cell text. Rows may vary in length when the
/// source grid is sparse; absent cells are not padded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub confidence: f64,
}

/// Structured content extracted from one job's block set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub raw_text: Vec<TextLine>,
    pub key_value_pairs: Vec<KeyValuePair>,
    pub tables: Vec<Table>,
}

/// Walk the block collection once, in input order, resolving relationships
/// through the index.
pub fn extract_content(blocks: &[Block]) -> ExtractedContent {
    let index = BlockIndex::new(blocks);
    let mut content = ExtractedContent::default();

    for block in blocks {
        match block.block_type {
            BlockType::Line => content.raw_text.push(TextLine {
                text: block.text.clone().unwrap_or_default(),
                confidence: block.confidence.unwrap_or_default(),
            }),
            BlockType::KeyValueSet if block.is_entity(EntityType::Key) => {
                let key = child_word_text(block, &index);
                let value = value_block(block, &index)
                    .map(|value| child_word_text(value, &index))
                    .unwrap_or_default();
                content.key_value_pairs.push(KeyValuePair {
                    key,
                    value,
                    confidence: block.confidence.unwrap_or_default(),
                });
            }
            BlockType::Table => {
                if let Some(table) = extract_table(block, &index) {
                    content.tables.push(table);
                }
            }
            // Everything else (pages, words, cells, value sets, unknown
            // types) is only ever visited as a relationship target.
            _ => {}
        }
    }

    content
}

/// Concatenate the text of every `CHILD`-referenced `WORD`, joined by single
/// spaces.
fn child_word_text(block: &Block, index: &BlockIndex<'_>) -> String {
    let mut words = Vec::new();
    for relationship in &block.relationships {
        if relationship.kind != RelationshipKind::Child {
            continue;
        }
        for id in &relationship.ids {
            let Some(child) = index.get(id) else {
                continue;
            };
            if child.block_type == BlockType::Word {
                if let Some(text) = child.text.as_deref() {
                    words.push(text);
                }
            }
        }
    }
    words.join(" ")
}

/// The paired value block of a key. A well-formed key carries at most one
/// `VALUE` relationship with one id; on malformed input the first id wins.
fn value_block<'a>(key: &Block, index: &BlockIndex<'a>) -> Option<&'a Block> {
    key.relationships
        .iter()
        .filter(|relationship| relationship.kind == RelationshipKind::Value)
        .flat_map(|relationship| relationship.ids.iter())
        .find_map(|id| index.get(id))
}

/// Assemble the cell grid of a table. Ordering by row then column index is
/// the stated contract, hence the BTreeMap grouping. A table that yields no
/// rows is dropped entirely.
fn extract_table(table: &Block, index: &BlockIndex<'_>) -> Option<Table> {
    let mut grid: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();

    for relationship in &table.relationships {
        if relationship.kind != RelationshipKind::Child {
            continue;
        }
        for id in &relationship.ids {
            let Some(cell) = index.get(id) else {
                continue;
            };
            if cell.block_type != BlockType::Cell {
                continue;
            }
            let row = cell.row_index.unwrap_or(0);
            let column = cell.column_index.unwrap_or(0);
            grid.entry(row)
                .or_default()
                .insert(column, child_word_text(cell, index));
        }
    }

    if grid.is_empty() {
        return None;
    }

    Some(Table {
        rows: grid
            .into_values()
            .map(|row| row.into_values().collect())
            .collect(),
        confidence: table.confidence.unwrap_or_default(),
    })
}
