use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::table::{ColumnType, Table};

/// Distinct values are counted exactly up to this many per column.
pub const DISTINCT_CAP: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub name: String,
    pub column_type: ColumnType,
    pub count: usize,
    pub distinct: usize,
    pub distinct_capped: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub sum: Option<f64>,
}

impl ColumnStats {
    pub fn measure(table: &Table, column: usize) -> Self {
        let name = table.columns().get(column).cloned().unwrap_or_default();
        let column_type = table.column_type(column);
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut distinct_capped = false;
        let mut count = 0usize;
        let mut numeric = NumericAccumulator::default();
        for value in table.column_values(column) {
            if value.is_null() {
                continue;
            }
            count += 1;
            if !distinct_capped {
                seen.insert(value.to_string());
                if seen.len() >= DISTINCT_CAP {
                    distinct_capped = true;
                }
            }
            if let Some(v) = value.as_f64() {
                numeric.push(v);
            }
        }
        let numeric = if column_type.is_numeric() {
            numeric.finish()
        } else {
            None
        };
        Self {
            name,
            column_type,
            count,
            distinct: seen.len(),
            distinct_capped,
            min: numeric.map(|n| n.min),
            max: numeric.map(|n| n.max),
            mean: numeric.map(|n| n.mean),
            sum: numeric.map(|n| n.sum),
        }
    }

    pub fn render(&self) -> String {
        let distinct = if self.distinct_capped {
            format!(">= {}", self.distinct)
        } else {
            self.distinct.to_string()
        };
        let mut out = format!(
            "- {} ({}): count {}, distinct {}",
            self.name,
            self.column_type.as_str(),
            self.count,
            distinct
        );
        if let (Some(min), Some(max), Some(mean), Some(sum)) =
            (self.min, self.max, self.mean, self.sum)
        {
            out.push_str(&format!(
                ", min {}, max {}, mean {}, sum {}",
                format_number(min),
                format_number(max),
                format_number(mean),
                format_number(sum)
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetProfile {
    pub rows: usize,
    pub columns: Vec<ColumnStats>,
}

impl DatasetProfile {
    pub fn measure(table: &Table) -> Self {
        Self {
            rows: table.row_count(),
            columns: (0..table.column_count())
                .map(|idx| ColumnStats::measure(table, idx))
                .collect(),
        }
    }

    /// Text body of the dataset summary unit.
    pub fn render(&self) -> String {
        let names = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut out = format!(
            "Dataset summary: {} rows, {} columns.\nColumns: {}\n",
            self.rows,
            self.columns.len(),
            names
        );
        for column in &self.columns {
            out.push_str(&column.render());
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, Copy)]
struct NumericSummary {
    min: f64,
    max: f64,
    mean: f64,
    sum: f64,
}

#[derive(Default)]
struct NumericAccumulator {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl NumericAccumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(&self) -> Option<NumericSummary> {
        let (min, max) = (self.min?, self.max?);
        Some(NumericSummary {
            min,
            max,
            mean: self.sum / self.count as f64,
            sum: self.sum,
        })
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let csv = "name,revenue,region\nA,100,North\nB,150,South\nC,,North\nD,50.5,\n";
        Table::from_csv_reader(csv.as_bytes(), b',').unwrap()
    }

    #[test]
    fn numeric_columns_get_min_max_mean_sum() {
        let stats = ColumnStats::measure(&table(), 1);
        assert_eq!(stats.column_type, ColumnType::Float);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(50.5));
        assert_eq!(stats.max, Some(150.0));
        assert_eq!(stats.sum, Some(300.5));
        assert!((stats.mean.unwrap() - 300.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn text_columns_count_distinct_values() {
        let stats = ColumnStats::measure(&table(), 2);
        assert_eq!(stats.column_type, ColumnType::Text);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.distinct, 2);
        assert_eq!(stats.min, None);
    }

    #[test]
    fn profile_renders_every_column() {
        let text = DatasetProfile::measure(&table()).render();
        assert!(text.starts_with("Dataset summary: 4 rows, 3 columns."));
        assert!(text.contains("Columns: name, revenue, region"));
        assert!(text.contains("- revenue (float): count 3, distinct 3, min 50.50, max 150, mean 100.17, sum 300.50"));
        assert!(text.contains("- region (text): count 3, distinct 2"));
    }
}
