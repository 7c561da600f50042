use std::ops::Range;

use datachat_index::{IndexError, UnitId};
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkConfig, Chunker};
use crate::error::{CoreError, Result};
use crate::stats::DatasetProfile;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Summary,
    Row,
}

/// A retrievable fragment of the loaded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: UnitId,
    pub kind: UnitKind,
    /// Zero-based rows this unit was rendered from; `None` for the summary.
    pub rows: Option<Range<usize>>,
    pub content: String,
}

impl TextUnit {
    pub fn source_index(&self) -> Option<usize> {
        self.rows.as_ref().map(|rows| rows.start)
    }

    pub fn covers_row(&self, row: usize) -> bool {
        self.rows.as_ref().is_some_and(|rows| rows.contains(&row))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub chunk: ChunkConfig,
    /// Tables with more rows than this are indexed in row groups.
    pub row_group_threshold: usize,
    pub rows_per_group: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            row_group_threshold: 2000,
            rows_per_group: 10,
        }
    }
}

/// Owns the text units produced from one table load.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    generation: u64,
    units: Vec<TextUnit>,
}

impl DocumentStore {
    /// Validates `table` and renders it into one summary unit followed by row
    /// units. Nothing is produced when validation fails.
    pub fn build(table: &Table, config: &DocumentConfig, generation: u64) -> Result<Self> {
        let errors = table.validate();
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors));
        }
        let chunker = Chunker::new(config.chunk);
        let mut builder = UnitBuilder {
            generation,
            units: Vec::new(),
        };
        builder.push(UnitKind::Summary, None, DatasetProfile::measure(table).render())?;

        let group = if table.row_count() > config.row_group_threshold {
            config.rows_per_group.max(1)
        } else {
            1
        };
        let mut start = 0usize;
        while start < table.row_count() {
            let end = (start + group).min(table.row_count());
            let text = render_rows(table, start..end);
            for piece in chunker.split(&text) {
                builder.push(UnitKind::Row, Some(start..end), piece)?;
            }
            start = end;
        }
        tracing::debug!(
            generation,
            units = builder.units.len(),
            rows = table.row_count(),
            rows_per_unit = group,
            "document store built"
        );
        Ok(Self {
            generation,
            units: builder.units,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn units(&self) -> &[TextUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn summary(&self) -> Option<&TextUnit> {
        self.units.iter().find(|unit| unit.kind == UnitKind::Summary)
    }

    /// Resolves a handle, failing closed on handles from another build.
    pub fn get(&self, id: UnitId) -> std::result::Result<&TextUnit, IndexError> {
        if id.generation() != self.generation {
            return Err(IndexError::StaleHandle {
                handle: id,
                current: self.generation,
            });
        }
        self.units
            .get(id.slot())
            .filter(|unit| unit.id == id)
            .ok_or(IndexError::UnknownHandle(id))
    }
}

struct UnitBuilder {
    generation: u64,
    units: Vec<TextUnit>,
}

impl UnitBuilder {
    fn push(&mut self, kind: UnitKind, rows: Option<Range<usize>>, content: String) -> Result<()> {
        let slot = u32::try_from(self.units.len())
            .map_err(|_| CoreError::InvalidArgument("too many text units".to_string()))?;
        self.units.push(TextUnit {
            id: UnitId::new(self.generation, slot),
            kind,
            rows,
            content,
        });
        Ok(())
    }
}

fn render_rows(table: &Table, rows: Range<usize>) -> String {
    rows.filter_map(|row| {
        table
            .render_row(row)
            .map(|text| format!("Row {}: {}", row + 1, text))
    })
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::table::Value;

    fn revenue_table(rows: usize) -> Table {
        Table::new(
            vec!["name".to_string(), "revenue".to_string()],
            (0..rows)
                .map(|i| vec![Value::Text(format!("Shop {i}")), Value::Int(i as i64 * 10)])
                .collect(),
        )
    }

    #[test]
    fn one_summary_and_one_unit_per_row() {
        let store = DocumentStore::build(&revenue_table(3), &DocumentConfig::default(), 4).unwrap();
        assert_eq!(store.len(), 4);
        let summaries = store
            .units()
            .iter()
            .filter(|u| u.kind == UnitKind::Summary)
            .count();
        assert_eq!(summaries, 1);
        assert_eq!(store.units()[0].kind, UnitKind::Summary);
        assert_eq!(store.units()[2].content, "Row 2: name: Shop 1, revenue: 10");
        assert_eq!(store.units()[2].source_index(), Some(1));
        for row in 0..3 {
            assert!(store.units().iter().any(|u| u.covers_row(row)));
        }
    }

    #[test]
    fn large_tables_are_grouped() {
        let config = DocumentConfig {
            row_group_threshold: 5,
            rows_per_group: 4,
            ..DocumentConfig::default()
        };
        let store = DocumentStore::build(&revenue_table(10), &config, 1).unwrap();
        let rows: Vec<_> = store
            .units()
            .iter()
            .filter_map(|u| u.rows.clone())
            .collect();
        assert_eq!(rows, vec![0..4, 4..8, 8..10]);
        assert!(store.units()[1].content.contains("Row 4: name: Shop 3"));
    }

    #[test]
    fn wide_rows_are_chunked_not_truncated() {
        let long = "x".repeat(150);
        let table = Table::new(
            vec!["notes".to_string()],
            vec![vec![Value::Text(long.clone())]],
        );
        let config = DocumentConfig {
            chunk: ChunkConfig::new(60, 10),
            ..DocumentConfig::default()
        };
        let store = DocumentStore::build(&table, &config, 2).unwrap();
        let pieces: Vec<&TextUnit> = store
            .units()
            .iter()
            .filter(|u| u.kind == UnitKind::Row)
            .collect();
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|u| u.rows == Some(0..1)));
        assert!(pieces.iter().all(|u| u.content.chars().count() <= 60));
        let total_x: usize = pieces.iter().map(|u| u.content.matches('x').count()).sum();
        assert!(total_x >= long.len());
    }

    #[test]
    fn invalid_tables_produce_no_units() {
        let err = DocumentStore::build(&Table::default(), &DocumentConfig::default(), 1).unwrap_err();
        assert_eq!(
            err.validation_errors(),
            &[ValidationError::EmptyTable, ValidationError::NoColumns]
        );
    }

    #[test]
    fn handles_from_other_generations_are_stale() {
        let store = DocumentStore::build(&revenue_table(2), &DocumentConfig::default(), 9).unwrap();
        let id = store.units()[1].id;
        assert_eq!(store.get(id).unwrap().id, id);
        assert!(matches!(
            store.get(UnitId::new(8, 1)),
            Err(IndexError::StaleHandle { current: 9, .. })
        ));
        assert!(matches!(
            store.get(UnitId::new(9, 99)),
            Err(IndexError::UnknownHandle(_))
        ));
    }
}
