//! Turns an uploaded CSV into prompts.
//!
//! There is no header row: the first column of every row is one prompt.
//! Cells are trimmed and rows with a blank prompt are dropped.

use crate::error::BatchError;

pub fn parse_prompts(content: &[u8]) -> Result<Vec<String>, BatchError> {
    if content.is_empty() {
        return Err(BatchError::InvalidInput("no file uploaded".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);

    let mut prompts = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| BatchError::InvalidInput(format!("row {}: {e}", index + 1)))?;
        let Some(first) = record.get(0) else {
            continue;
        };
        let first = if index == 0 {
            first.trim_start_matches('\u{feff}')
        } else {
            first
        };
        let prompt = first.trim();
        if !prompt.is_empty() {
            prompts.push(prompt.to_string());
        }
    }
    Ok(prompts)
}
