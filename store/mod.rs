//! # Prediction Store
//!
//! Writes scored rows into a relational table held in a SQLite database file.
//!
//! The destination table is addressed either as `table` or as `schema.table`, where
//! `schema` is the name of an attached database (`main` for the file itself). Every
//! identifier is quoted, so column and table names may contain spaces.
//!
//! Before any model work starts, [`validate_destination`] inserts one probe row
//! inside a transaction that is always rolled back. A missing table, a wrong column
//! name, or a read-only file is therefore reported up front, and the table is left
//! exactly as it was.

use rusqlite::{Connection, OpenFlags, Transaction, params};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Binding identifier stamped on every written row.
pub const BINDING_ID: i64 = 0;
/// Binding name stamped on every written row.
pub const BINDING_NAME: &str = "Python";

const LOAD_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// One row of the destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub binding_id: i64,
    pub binding_name: String,
    pub last_load_dts: String,
    pub grain: i64,
    pub prediction: f64,
    pub factors: [Option<String>; 3],
}

impl PredictionRow {
    fn probe(last_load_dts: String) -> Self {
        Self {
            binding_id: BINDING_ID,
            binding_name: "PyTest".to_string(),
            last_load_dts,
            grain: 9_999_999,
            prediction: 0.9999,
            factors: [
                Some("first".to_string()),
                Some("second".to_string()),
                Some("third".to_string()),
            ],
        }
    }
}

/// Where predictions are written and how the two variable columns are named.
#[derive(Debug, Clone)]
pub struct Destination {
    pub database: PathBuf,
    /// `table` or `schema.table`.
    pub table: String,
    pub grain_column: String,
    /// `PredictedProbNBR` or `PredictedValueNBR`.
    pub predicted_column: String,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "The destination table '{table}' in '{database}' cannot accept predictions: {source}. Check the database path, table name, and column names."
    )]
    DestinationUnavailable {
        database: String,
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to format the load timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("The destination table name is empty.")]
    EmptyTableName,
    #[error("Failed to write the prediction file: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The current UTC time as `YYYY-MM-DD HH:MM:SS.mmm`.
pub fn load_timestamp() -> Result<String, StoreError> {
    format_load_timestamp(OffsetDateTime::now_utc())
}

pub fn format_load_timestamp(moment: OffsetDateTime) -> Result<String, StoreError> {
    Ok(moment.format(LOAD_TIMESTAMP_FORMAT)?)
}

/// Opens the database file. Without `create`, a missing file is an error instead of
/// silently producing an empty database.
pub fn open_database(path: &Path, create: bool) -> Result<Connection, rusqlite::Error> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    Connection::open_with_flags(path, flags)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes `table` or `schema.table`.
pub fn quote_table_name(table: &str) -> Result<String, StoreError> {
    let table = table.trim();
    if table.is_empty() {
        return Err(StoreError::EmptyTableName);
    }
    Ok(match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_identifier(schema), quote_identifier(name)),
        None => quote_identifier(table),
    })
}

fn insert_statement(destination: &Destination) -> Result<String, StoreError> {
    Ok(format!(
        "INSERT INTO {} (\"BindingID\", \"BindingNM\", \"LastLoadDTS\", {}, {}, \"Factor1TXT\", \"Factor2TXT\", \"Factor3TXT\")
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        quote_table_name(&destination.table)?,
        quote_identifier(&destination.grain_column),
        quote_identifier(&destination.predicted_column),
    ))
}

fn insert_rows(
    tx: &Transaction<'_>,
    sql: &str,
    rows: &[PredictionRow],
) -> Result<(), rusqlite::Error> {
    let mut statement = tx.prepare_cached(sql)?;
    for row in rows {
        statement.execute(params![
            row.binding_id,
            row.binding_name,
            row.last_load_dts,
            row.grain,
            row.prediction,
            row.factors[0],
            row.factors[1],
            row.factors[2],
        ])?;
    }
    Ok(())
}

/// Checks that a row can be written to the destination without leaving a trace.
pub fn validate_destination(destination: &Destination) -> Result<(), StoreError> {
    let sql = insert_statement(destination)?;
    let probe = PredictionRow::probe(load_timestamp()?);
    let unavailable = |source: rusqlite::Error| StoreError::DestinationUnavailable {
        database: destination.database.display().to_string(),
        table: destination.table.clone(),
        source,
    };

    let connection = open_database(&destination.database, false).map_err(unavailable)?;
    let tx = connection.unchecked_transaction().map_err(unavailable)?;
    insert_rows(&tx, &sql, std::slice::from_ref(&probe)).map_err(unavailable)?;
    tx.rollback().map_err(unavailable)?;

    log::info!(
        "Destination table '{}' accepted a probe row",
        destination.table
    );
    Ok(())
}

/// Inserts every row in one transaction and returns the number written.
pub fn write_predictions(
    destination: &Destination,
    rows: &[PredictionRow],
) -> Result<usize, StoreError> {
    let sql = insert_statement(destination)?;
    let connection = open_database(&destination.database, false)?;
    let tx = connection.unchecked_transaction()?;
    insert_rows(&tx, &sql, rows)?;
    tx.commit()?;

    log::info!(
        "Wrote {} rows to '{}' in '{}'",
        rows.len(),
        destination.table,
        destination.database.display()
    );
    Ok(rows.len())
}

/// Creates the destination table, and the database file, when they do not exist.
pub fn create_destination_table(destination: &Destination) -> Result<(), StoreError> {
    let connection = open_database(&destination.database, true)?;
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            \"BindingID\" INTEGER NOT NULL,
            \"BindingNM\" TEXT NOT NULL,
            \"LastLoadDTS\" TEXT NOT NULL,
            {} INTEGER NOT NULL,
            {} REAL NOT NULL,
            \"Factor1TXT\" TEXT,
            \"Factor2TXT\" TEXT,
            \"Factor3TXT\" TEXT
        )",
        quote_table_name(&destination.table)?,
        quote_identifier(&destination.grain_column),
        quote_identifier(&destination.predicted_column),
    );
    connection.execute(&sql, [])?;
    log::debug!("Ensured destination table '{}' exists", destination.table);
    Ok(())
}

/// Writes the same rows as a tab-separated file with the destination's header.
pub fn export_tsv(path: &Path, destination: &Destination, rows: &[PredictionRow]) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "BindingID",
        "BindingNM",
        "LastLoadDTS",
        destination.grain_column.as_str(),
        destination.predicted_column.as_str(),
        "Factor1TXT",
        "Factor2TXT",
        "Factor3TXT",
    ])?;
    for row in rows {
        writer.write_record([
            row.binding_id.to_string(),
            row.binding_name.clone(),
            row.last_load_dts.clone(),
            row.grain.to_string(),
            row.prediction.to_string(),
            row.factors[0].clone().unwrap_or_default(),
            row.factors[1].clone().unwrap_or_default(),
            row.factors[2].clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    log::info!("Predictions also written to '{}'", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};
    use time::macros::datetime;

    fn destination(dir: &TempDir, table: &str) -> Destination {
        Destination {
            database: dir.path().join("predictions.sqlite"),
            table: table.to_string(),
            grain_column: "PatientEncounterID".to_string(),
            predicted_column: "PredictedProbNBR".to_string(),
        }
    }

    fn row(grain: i64, prediction: f64) -> PredictionRow {
        PredictionRow {
            binding_id: BINDING_ID,
            binding_name: BINDING_NAME.to_string(),
            last_load_dts: "2017-03-01 10:11:12.345".to_string(),
            grain,
            prediction,
            factors: [Some("Age".to_string()), Some("Gender.M".to_string()), None],
        }
    }

    fn count_rows(destination: &Destination) -> i64 {
        let connection = open_database(&destination.database, false).unwrap();
        let sql = format!("SELECT COUNT(*) FROM {}", quote_table_name(&destination.table).unwrap());
        connection.query_row(&sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let moment = datetime!(2017-03-01 10:11:12.345678 UTC);
        assert_eq!(format_load_timestamp(moment).unwrap(), "2017-03-01 10:11:12.345");
        assert_eq!(load_timestamp().unwrap().len(), 23);
    }

    #[test]
    fn table_names_are_quoted_per_part() {
        assert_eq!(quote_table_name("Preds").unwrap(), "\"Preds\"");
        assert_eq!(quote_table_name("main.Preds").unwrap(), "\"main\".\"Preds\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
        assert!(matches!(quote_table_name("  "), Err(StoreError::EmptyTableName)));
    }

    #[test]
    fn probe_row_is_rolled_back() {
        let dir = tempdir().unwrap();
        let destination = destination(&dir, "main.Preds");
        create_destination_table(&destination).unwrap();
        validate_destination(&destination).unwrap();
        assert_eq!(count_rows(&destination), 0);
    }

    #[test]
    fn missing_table_is_reported_before_writing() {
        let dir = tempdir().unwrap();
        let destination = destination(&dir, "Preds");
        create_destination_table(&destination).unwrap();
        let elsewhere = Destination {
            table: "Absent".to_string(),
            ..destination
        };
        assert!(matches!(
            validate_destination(&elsewhere),
            Err(StoreError::DestinationUnavailable { .. })
        ));
    }

    #[test]
    fn missing_database_file_is_not_created() {
        let dir = tempdir().unwrap();
        let destination = destination(&dir, "Preds");
        assert!(matches!(
            validate_destination(&destination),
            Err(StoreError::DestinationUnavailable { .. })
        ));
        assert!(!destination.database.exists());
    }

    #[test]
    fn rows_are_written_and_read_back() {
        let dir = tempdir().unwrap();
        let destination = destination(&dir, "Preds");
        create_destination_table(&destination).unwrap();

        let rows = vec![row(101, 0.25), row(102, 0.75)];
        assert_eq!(write_predictions(&destination, &rows).unwrap(), 2);
        assert_eq!(count_rows(&destination), 2);

        let connection = open_database(&destination.database, false).unwrap();
        let (grain, binding, prediction, third): (i64, String, f64, Option<String>) = connection
            .query_row(
                "SELECT \"PatientEncounterID\", \"BindingNM\", \"PredictedProbNBR\", \"Factor3TXT\"
                 FROM \"Preds\" ORDER BY \"PatientEncounterID\" DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(grain, 102);
        assert_eq!(binding, "Python");
        assert_eq!(prediction, 0.75);
        assert_eq!(third, None);
    }

    #[test]
    fn tsv_export_mirrors_destination_columns() {
        let dir = tempdir().unwrap();
        let destination = destination(&dir, "Preds");
        let path = dir.path().join("predictions.tsv");
        export_tsv(&path, &destination, &[row(5, 0.5)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "BindingID\tBindingNM\tLastLoadDTS\tPatientEncounterID\tPredictedProbNBR\tFactor1TXT\tFactor2TXT\tFactor3TXT"
        );
        assert_eq!(lines[1], "0\tPython\t2017-03-01 10:11:12.345\t5\t0.5\tAge\tGender.M\t");
    }
}
