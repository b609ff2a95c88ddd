use super::FrameError;
use polars::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::Path;

/// Reads a delimited text file with a header row into a DataFrame.
///
/// Files ending in `.tsv` or `.txt` are read tab-separated, everything else as CSV.
/// The schema is inferred from every row so that a late `NULL` sentinel turns the
/// column into text instead of failing the parse.
pub fn load_frame(path: &Path) -> Result<DataFrame, FrameError> {
    let separator = match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    };

    log::info!("Loading data from '{}'", path.display());
    let bytes = fs::read(path)?;
    if !has_data_rows(&bytes) {
        return Err(FrameError::EmptyInput(path.display().to_string()));
    }

    let df = CsvReader::new(Cursor::new(bytes))
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(FrameError::EmptyInput(path.display().to_string()));
    }

    log::info!("Loaded {} rows and {} columns", df.height(), df.width());
    log::debug!("Types of original dataframe: {:?}", df.dtypes());
    log::debug!("Top rows of original dataframe:\n{}", df.head(Some(5)));
    Ok(df)
}

// A header line followed by at least one line with content.
fn has_data_rows(bytes: &[u8]) -> bool {
    bytes
        .split(|&byte| byte == b'\n')
        .skip(1)
        .any(|line| line.iter().any(|byte| !byte.is_ascii_whitespace()))
}
