//! Bootstrap data loading.
//!
//! Data files are JSON arrays of row objects, loaded in listed order after
//! table creation. Consecutive rows defining exactly the same columns are
//! batched into one multi-row INSERT; this preserves row order while still
//! letting rows omit columns to take their table defaults. Registered
//! encode conversions are applied per column before insertion; unconverted
//! columns pass through as their native JSON representation.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::config::{Conversion, ConvertFn};
use crate::error::{ExecError, LoadError};
use crate::executor::PgExecutor;
use crate::sql::{literal, quote_ident};

/// Receives ordered row batches from the loader.
///
/// The loader guarantees calls arrive in file-list order, then file order;
/// tests substitute a sequence-recording fake.
pub trait InsertSink {
    /// Insert one batch of rows sharing the same column set. Returns the
    /// number of rows actually inserted.
    fn insert(&mut self, columns: &[String], rows: &[Vec<Value>]) -> Result<u64, ExecError>;
}

/// The production sink: renders batched
/// `INSERT ... ON CONFLICT DO NOTHING` statements against an executor.
pub struct ExecutorSink<'a> {
    executor: &'a dyn PgExecutor,
    table: &'a str,
}

impl<'a> ExecutorSink<'a> {
    pub fn new(executor: &'a dyn PgExecutor, table: &'a str) -> Self {
        ExecutorSink { executor, table }
    }
}

impl InsertSink for ExecutorSink<'_> {
    fn insert(&mut self, columns: &[String], rows: &[Vec<Value>]) -> Result<u64, ExecError> {
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let value_list = rows
            .iter()
            .map(|row| {
                let rendered = row.iter().map(literal).collect::<Vec<_>>().join(", ");
                format!("({})", rendered)
            })
            .collect::<Vec<_>>()
            .join(", ");
        let stmt = format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
            quote_ident(self.table),
            column_list,
            value_list
        );
        log::debug!("SQL: {}", stmt);
        self.executor.execute(&stmt)
    }
}

/// Loads bootstrap rows from data files into an [`InsertSink`].
pub struct DataLoader<'a> {
    folder: PathBuf,
    files: &'a [String],
    encoders: HashMap<&'a str, ConvertFn>,
}

impl<'a> DataLoader<'a> {
    pub fn new(folder: &str, files: &'a [String], conversions: &'a [Conversion]) -> Self {
        let encoders = conversions
            .iter()
            .map(|c| (c.column, c.encode))
            .collect();
        DataLoader {
            folder: PathBuf::from(folder),
            files,
            encoders,
        }
    }

    /// Load every configured file in order. Returns the number of rows
    /// inserted.
    pub fn load(&self, sink: &mut dyn InsertSink) -> Result<u64, LoadError> {
        let mut total = 0u64;
        for file in self.files {
            total += self.load_file(file, sink)?;
        }
        Ok(total)
    }

    fn load_file(&self, file: &str, sink: &mut dyn InsertSink) -> Result<u64, LoadError> {
        let path = self.folder.join(file);
        let display = path.display().to_string();

        let text = fs::read_to_string(&path).map_err(|e| LoadError::Io {
            file: display.clone(),
            message: e.to_string(),
        })?;
        let data: Value = serde_json::from_str(&text).map_err(|e| LoadError::Parse {
            file: display.clone(),
            message: e.to_string(),
        })?;
        let rows = data.as_array().ok_or_else(|| LoadError::Parse {
            file: display.clone(),
            message: "expected a JSON array of row objects".to_string(),
        })?;

        log::info!("Adding data from {}", display);

        let mut total = 0u64;
        let mut batch_columns: Vec<String> = Vec::new();
        let mut batch_keys: BTreeSet<String> = BTreeSet::new();
        let mut batch: Vec<Vec<Value>> = Vec::new();

        for (idx, row) in rows.iter().enumerate() {
            let object = row.as_object().ok_or_else(|| LoadError::Row {
                file: display.clone(),
                row: idx,
                message: "row is not an object".to_string(),
            })?;
            if object.is_empty() {
                return Err(LoadError::Row {
                    file: display.clone(),
                    row: idx,
                    message: "row defines no columns".to_string(),
                });
            }

            let keys: BTreeSet<String> = object.keys().cloned().collect();
            if keys != batch_keys || batch.is_empty() {
                if !batch.is_empty() {
                    total += sink.insert(&batch_columns, &batch).map_err(|e| {
                        LoadError::Insert {
                            file: display.clone(),
                            source: e,
                        }
                    })?;
                    batch.clear();
                }
                batch_columns = object.keys().cloned().collect();
                batch_keys = keys;
            }

            let mut values = Vec::with_capacity(batch_columns.len());
            for column in &batch_columns {
                let raw = object[column].clone();
                let value = match self.encoders.get(column.as_str()) {
                    Some(encode) => encode(raw).map_err(|message| LoadError::Row {
                        file: display.clone(),
                        row: idx,
                        message: format!("conversion of column '{}' failed: {}", column, message),
                    })?,
                    None => raw,
                };
                values.push(value);
            }
            batch.push(values);
        }

        if !batch.is_empty() {
            total += sink
                .insert(&batch_columns, &batch)
                .map_err(|e| LoadError::Insert {
                    file: display,
                    source: e,
                })?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    struct RecordingSink {
        batches: Vec<(Vec<String>, Vec<Vec<Value>>)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                batches: Vec::new(),
            }
        }
    }

    impl InsertSink for RecordingSink {
        fn insert(&mut self, columns: &[String], rows: &[Vec<Value>]) -> Result<u64, ExecError> {
            self.batches.push((columns.to_vec(), rows.to_vec()));
            Ok(rows.len() as u64)
        }
    }

    fn write_file(dir: &std::path::Path, name: &str, content: &Value) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        write!(f, "{}", content).unwrap();
    }

    #[test]
    fn test_rows_batched_by_matching_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "rows.json",
            &json!([
                {"id": 1, "name": "a"},
                {"id": 2, "name": "b"},
                {"id": 3},
                {"id": 4, "name": "d"}
            ]),
        );
        let files = vec!["rows.json".to_string()];
        let loader = DataLoader::new(dir.path().to_str().unwrap(), &files, &[]);
        let mut sink = RecordingSink::new();
        let count = loader.load(&mut sink).unwrap();

        assert_eq!(count, 4);
        assert_eq!(sink.batches.len(), 3);
        assert_eq!(sink.batches[0].0, ["id", "name"]);
        assert_eq!(sink.batches[0].1.len(), 2);
        assert_eq!(sink.batches[1].0, ["id"]);
        assert_eq!(sink.batches[2].0, ["id", "name"]);
        assert_eq!(sink.batches[2].1, vec![vec![json!(4), json!("d")]]);
    }

    #[test]
    fn test_files_load_in_listed_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "second.json", &json!([{"id": 3}]));
        write_file(dir.path(), "first.json", &json!([{"id": 1}, {"id": 2}]));
        let files = vec!["first.json".to_string(), "second.json".to_string()];
        let loader = DataLoader::new(dir.path().to_str().unwrap(), &files, &[]);
        let mut sink = RecordingSink::new();
        let count = loader.load(&mut sink).unwrap();

        assert_eq!(count, 3);
        let inserted: Vec<Value> = sink
            .batches
            .iter()
            .flat_map(|(_, rows)| rows.iter().map(|r| r[0].clone()))
            .collect();
        assert_eq!(inserted, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_conversions_applied_to_named_column() {
        fn double(value: Value) -> Result<Value, String> {
            value
                .as_i64()
                .map(|i| json!(i * 2))
                .ok_or_else(|| "not an integer".to_string())
        }
        fn untouched(value: Value) -> Result<Value, String> {
            Ok(value)
        }

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "rows.json", &json!([{"id": 21, "name": "x"}]));
        let files = vec!["rows.json".to_string()];
        let conversions = [Conversion::new("id", double, untouched)];
        let loader = DataLoader::new(dir.path().to_str().unwrap(), &files, &conversions);
        let mut sink = RecordingSink::new();
        loader.load(&mut sink).unwrap();

        assert_eq!(sink.batches[0].1, vec![vec![json!(42), json!("x")]]);
    }

    #[test]
    fn test_conversion_failure_names_file_and_row() {
        fn must_int(value: Value) -> Result<Value, String> {
            value
                .as_i64()
                .map(Value::from)
                .ok_or_else(|| "not an integer".to_string())
        }

        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "rows.json",
            &json!([{"id": 1}, {"id": "oops"}]),
        );
        let files = vec!["rows.json".to_string()];
        let conversions = [Conversion::new("id", must_int, must_int)];
        let loader = DataLoader::new(dir.path().to_str().unwrap(), &files, &conversions);
        let mut sink = RecordingSink::new();
        match loader.load(&mut sink) {
            Err(LoadError::Row { row, .. }) => assert_eq!(row, 1),
            other => panic!("expected row error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_non_array_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "rows.json", &json!({"id": 1}));
        let files = vec!["rows.json".to_string()];
        let loader = DataLoader::new(dir.path().to_str().unwrap(), &files, &[]);
        let mut sink = RecordingSink::new();
        assert!(matches!(
            loader.load(&mut sink),
            Err(LoadError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec!["absent.json".to_string()];
        let loader = DataLoader::new(dir.path().to_str().unwrap(), &files, &[]);
        let mut sink = RecordingSink::new();
        assert!(matches!(loader.load(&mut sink), Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_executor_sink_renders_single_statement() {
        struct CapturingExecutor {
            sql: std::cell::RefCell<Vec<String>>,
        }
        impl PgExecutor for CapturingExecutor {
            fn execute(&self, sql: &str) -> Result<u64, ExecError> {
                self.sql.borrow_mut().push(sql.to_string());
                Ok(2)
            }
            fn query_one(&self, _sql: &str) -> Result<crate::executor::PgRow, ExecError> {
                unreachable!("sink only executes")
            }
            fn query_all(&self, _sql: &str) -> Result<Vec<crate::executor::PgRow>, ExecError> {
                unreachable!("sink only executes")
            }
        }

        let executor = CapturingExecutor {
            sql: std::cell::RefCell::new(Vec::new()),
        };
        let mut sink = ExecutorSink::new(&executor, "users");
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec![json!(1), json!("a")],
            vec![json!(2), json!("it's")],
        ];
        let count = sink.insert(&columns, &rows).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            executor.sql.borrow()[0],
            "INSERT INTO \"users\" (\"id\", \"name\") \
             VALUES (1, 'a'), (2, 'it''s') ON CONFLICT DO NOTHING"
        );
    }
}
