use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Export formats understood by the backend. The wire name is passed through
/// verbatim; the client never converts formats itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    Csv,
    Bibtex,
    Ris,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Bibtex => "BIBTEX",
            ExportFormat::Ris => "RIS",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Bibtex => "bib",
            ExportFormat::Ris => "ris",
        }
    }

    /// Name used when the response carries no usable content-disposition.
    pub fn fallback_filename(&self) -> String {
        format!("publications.{}", self.extension())
    }
}

/// A downloaded export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Extract the filename from a `content-disposition` header value, with
/// surrounding quotes removed.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let value = rest.split(';').next().unwrap_or(rest);
    let name = value.trim().replace('"', "");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Write an export into `dir`. Only the final path component of the
/// backend-supplied filename is used.
pub async fn save(file: &ExportFile, dir: &Path) -> std::io::Result<PathBuf> {
    let name = Path::new(&file.filename)
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Unusable export filename: {:?}", file.filename),
            )
        })?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, &file.bytes).await?;
    tracing::info!("Saved export to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_strips_quotes() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="results.csv""#).as_deref(),
            Some("results.csv")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=pubs.ris; size=10").as_deref(),
            Some("pubs.ris")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
        assert_eq!(filename_from_content_disposition(r#"attachment; filename="""#), None);
    }

    #[test]
    fn test_format_wire_names() {
        assert_eq!(serde_json::to_string(&ExportFormat::Bibtex).unwrap(), r#""BIBTEX""#);
        assert_eq!(ExportFormat::Ris.as_str(), "RIS");
        assert_eq!(ExportFormat::Bibtex.fallback_filename(), "publications.bib");
    }

    #[tokio::test]
    async fn test_save_keeps_only_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = ExportFile {
            filename: "../../escape/results.csv".into(),
            bytes: b"paper_id\nA\n".to_vec(),
        };
        let path = save(&file, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("results.csv"));
        assert_eq!(std::fs::read(&path).unwrap(), b"paper_id\nA\n");
    }
}
