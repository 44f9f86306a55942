/// Column holding the identifiers in an imported CSV.
const DOI_COLUMN: &str = "DOI";

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
    #[error("No 'DOI' column found in the CSV file")]
    MissingDoiColumn,
}

/// Read DOIs for manual add from CSV text with a header row. Empty cells are
/// skipped; duplicates keep their first position.
pub fn dois_from_csv(content: &str) -> Result<Vec<String>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let column = reader
        .headers()?
        .iter()
        .position(|h| h == DOI_COLUMN)
        .ok_or(ImportError::MissingDoiColumn)?;

    let mut dois: Vec<String> = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(doi) = record.get(column).filter(|d| !d.is_empty()) {
            if !dois.iter().any(|d| d == doi) {
                dois.push(doi.to_string());
            }
        }
    }
    tracing::debug!("Imported {} DOIs from CSV", dois.len());
    Ok(dois)
}
