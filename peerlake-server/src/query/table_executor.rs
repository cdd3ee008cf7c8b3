// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::query::QueryExecutor;
use async_trait::async_trait;
use log::{debug, info};
use peerlake_common::error::LakeError;
use peerlake_common::state::{DataFormat, Dataset, QueryOutput};
use peerlake_common::sync::FastDashMap;
use peerlake_common::LakeResult;
use serde_json::{Number, Value};

struct MemTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl MemTable {
    fn from_csv(name: &str, data: &[u8]) -> LakeResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| LakeError::InvalidArgument(format!("csv header of {}: {}", name, e)))?
            .iter()
            .map(|v| v.to_string())
            .collect();

        let mut rows = vec![];
        for record in reader.records() {
            let record = record
                .map_err(|e| LakeError::InvalidArgument(format!("csv row of {}: {}", name, e)))?;
            let mut row: Vec<Value> = record.iter().map(parse_value).collect();
            row.resize(columns.len(), Value::Null);
            rows.push(row);
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    fn column_type(&self, index: usize) -> &'static str {
        let mut kind = "BIGINT";
        let mut seen = false;
        for row in &self.rows {
            match &row[index] {
                Value::Null => continue,
                Value::Number(n) if n.is_i64() => (),
                Value::Number(_) => kind = "DOUBLE",
                _ => return "VARCHAR",
            }
            seen = true;
        }
        if seen {
            kind
        } else {
            "VARCHAR"
        }
    }
}

fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Number(v.into());
    }
    if let Some(v) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(v);
    }
    Value::String(raw.to_string())
}

fn ident(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '`')
        .to_lowercase()
}

/// In-memory tables built from stored csv datasets, named after the file stem.
///
/// Supported statements:
/// - `SHOW TABLES`
/// - `DESCRIBE <table>`
/// - `SELECT <*|col, ...> FROM <table> [LIMIT <n>]`
#[derive(Default)]
pub struct MemTableExecutor {
    tables: FastDashMap<String, MemTable>,
}

impl MemTableExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_csv(&self, name: &str, data: &[u8]) -> LakeResult<()> {
        let table = MemTable::from_csv(name, data)?;
        info!(
            "loaded table {} with {} columns and {} rows",
            table.name,
            table.columns.len(),
            table.rows.len()
        );
        self.tables.insert(ident(name), table);
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|v| v.name.clone()).collect();
        names.sort();
        names
    }

    fn show_tables(&self) -> QueryOutput {
        let rows = self
            .table_names()
            .into_iter()
            .map(|v| vec![Value::String(v)])
            .collect();
        QueryOutput::new(vec!["table_name".to_string()], rows)
    }

    fn describe(&self, table: &str) -> Result<QueryOutput, String> {
        let table = self
            .tables
            .get(&ident(table))
            .ok_or_else(|| format!("table {} not found", table.trim()))?;

        let rows = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                vec![
                    Value::String(name.clone()),
                    Value::String(table.column_type(i).to_string()),
                ]
            })
            .collect();
        Ok(QueryOutput::new(
            vec!["column_name".to_string(), "data_type".to_string()],
            rows,
        ))
    }

    fn select(&self, sql: &str) -> Result<QueryOutput, String> {
        let upper = sql.to_ascii_uppercase();
        let from = upper
            .find(" FROM ")
            .ok_or_else(|| "missing FROM clause".to_string())?;
        let projection = sql["SELECT".len()..from].trim();
        let mut rest = sql[from + " FROM ".len()..].split_whitespace();

        let table_name = rest.next().ok_or_else(|| "missing table name".to_string())?;
        let limit = match (rest.next(), rest.next(), rest.next()) {
            (None, _, _) => None,
            (Some(kw), Some(n), None) if kw.eq_ignore_ascii_case("LIMIT") => Some(
                n.parse::<usize>()
                    .map_err(|_| format!("invalid LIMIT value {}", n))?,
            ),
            (Some(kw), _, _) => return Err(format!("unsupported clause {}", kw)),
        };

        let table = self
            .tables
            .get(&ident(table_name))
            .ok_or_else(|| format!("table {} not found", table_name))?;

        let indexes: Vec<usize> = if projection == "*" {
            (0..table.columns.len()).collect()
        } else {
            let mut indexes = vec![];
            for col in projection.split(',') {
                let name = ident(col);
                let index = table
                    .columns
                    .iter()
                    .position(|v| v.to_lowercase() == name)
                    .ok_or_else(|| format!("column {} not found in {}", col.trim(), table.name))?;
                indexes.push(index);
            }
            indexes
        };

        let columns = indexes.iter().map(|i| table.columns[*i].clone()).collect();
        let rows = table
            .rows
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| indexes.iter().map(|i| row[*i].clone()).collect())
            .collect();
        Ok(QueryOutput::new(columns, rows))
    }
}

#[async_trait]
impl QueryExecutor for MemTableExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, String> {
        let sql = sql.trim().trim_end_matches(';').trim();
        debug!("execute {}", sql);
        let words: Vec<String> = sql
            .split_whitespace()
            .take(2)
            .map(|v| v.to_ascii_uppercase())
            .collect();

        match words.first().map(|v| v.as_str()) {
            Some("SHOW") if words.get(1).map(|v| v.as_str()) == Some("TABLES") => {
                Ok(self.show_tables())
            }
            Some("DESCRIBE") | Some("DESC") => match sql.split_whitespace().nth(1) {
                Some(table) => self.describe(table),
                None => Err("missing table name".to_string()),
            },
            Some("SELECT") => self.select(sql),
            Some(other) => Err(format!("unsupported statement {}", other)),
            None => Err("empty query".to_string()),
        }
    }

    async fn register_dataset(&self, dataset: &Dataset, data: &[u8]) -> LakeResult<()> {
        if dataset.format != DataFormat::Csv {
            debug!("dataset {} is {}, not queryable", dataset.id, dataset.format);
            return Ok(());
        }
        self.load_csv(&dataset.table_name(), data)
    }

    async fn unregister_dataset(&self, dataset: &Dataset) -> LakeResult<()> {
        self.tables.remove(&ident(&dataset.table_name()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SALES: &[u8] = b"region,amount,price\nnorth,10,1.5\nsouth,20,2.5\neast,,3\n";

    fn executor() -> MemTableExecutor {
        let executor = MemTableExecutor::new();
        executor.load_csv("sales", SALES).unwrap();
        executor
    }

    #[tokio::test]
    async fn select_all_and_projection() {
        let executor = executor();
        let out = executor.execute("SELECT * FROM sales;").await.unwrap();
        assert_eq!(out.columns, vec!["region", "amount", "price"]);
        assert_eq!(out.row_count, 3);
        assert_eq!(out.rows[0], vec![json!("north"), json!(10), json!(1.5)]);
        assert_eq!(out.rows[2][1], Value::Null);

        let out = executor
            .execute("select Amount, region from SALES limit 2")
            .await
            .unwrap();
        assert_eq!(out.columns, vec!["amount", "region"]);
        assert_eq!(out.rows, vec![vec![json!(10), json!("north")], vec![json!(20), json!("south")]]);
    }

    #[tokio::test]
    async fn show_and_describe() {
        let executor = executor();
        let out = executor.execute("SHOW TABLES").await.unwrap();
        assert_eq!(out.rows, vec![vec![json!("sales")]]);

        let out = executor.execute("DESCRIBE sales").await.unwrap();
        assert_eq!(
            out.rows,
            vec![
                vec![json!("region"), json!("VARCHAR")],
                vec![json!("amount"), json!("BIGINT")],
                vec![json!("price"), json!("DOUBLE")],
            ]
        );
    }

    #[tokio::test]
    async fn errors_are_messages() {
        let executor = executor();
        assert!(executor.execute("SELECT * FROM missing").await.is_err());
        assert!(executor.execute("SELECT nope FROM sales").await.is_err());
        assert!(executor
            .execute("SELECT * FROM sales WHERE amount > 1")
            .await
            .is_err());
        assert!(executor.execute("DROP TABLE sales").await.is_err());
        assert!(executor.execute("   ").await.is_err());
    }
}
