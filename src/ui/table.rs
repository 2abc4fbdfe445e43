use tabled::{settings::Style, Table, Tabled};

use crate::query::SourceUsage;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "File")]
    path: String,
    #[tabled(rename = "Line")]
    line: u32,
    #[tabled(rename = "Column")]
    column: u32,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

pub fn usages_table(usages: &[SourceUsage]) -> String {
    if usages.is_empty() {
        return String::new();
    }
    let rows: Vec<UsageRow> = usages
        .iter()
        .map(|usage| UsageRow {
            path: usage.path.display().to_string(),
            line: usage.line,
            column: usage.column,
        })
        .collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_usages_table_lists_every_usage() {
        let usages = vec![
            SourceUsage {
                path: PathBuf::from("/src/a.h"),
                line: 2,
                column: 3,
            },
            SourceUsage {
                path: PathBuf::from("/src/a.cpp"),
                line: 4,
                column: 6,
            },
        ];
        let table = usages_table(&usages);
        assert!(table.contains("/src/a.h"));
        assert!(table.contains("/src/a.cpp"));
        assert!(usages_table(&[]).is_empty());
    }

    #[test]
    fn test_stats_table() {
        let table = stats_table(&[("Symbols", "3".to_string())]);
        assert!(table.contains("Symbols"));
        assert!(TableBuilder::new().build().is_empty());
    }
}
