use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{DocumentPage, TextChunk};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub pages_added: usize,
    pub skipped_files: Vec<SkippedFile>,
}

/// Holds the page texts of every PDF ingested during one session.
pub struct DocumentStore<X: PdfExtractor = LopdfExtractor> {
    extractor: X,
    pages: Vec<DocumentPage>,
}

impl Default for DocumentStore<LopdfExtractor> {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore<LopdfExtractor> {
    pub fn new() -> Self {
        Self::with_extractor(LopdfExtractor)
    }
}

impl<X: PdfExtractor> DocumentStore<X> {
    pub fn with_extractor(extractor: X) -> Self {
        Self {
            extractor,
            pages: Vec::new(),
        }
    }

    pub fn pages(&self) -> &[DocumentPage] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Extracts one uploaded file. On error nothing is added.
    pub fn ingest_bytes(&mut self, source: &str, bytes: &[u8]) -> Result<usize, IngestError> {
        let checksum = digest_bytes(bytes);
        let extracted = self.extractor.extract_bytes(bytes, source)?;
        let ingested_at = Utc::now();
        let added = extracted.len();

        self.pages.extend(extracted.into_iter().map(|page| DocumentPage {
            source: source.to_string(),
            page: page.number,
            text: page.text,
            checksum: checksum.clone(),
            ingested_at,
        }));

        Ok(added)
    }

    pub fn ingest_path(&mut self, path: &Path) -> Result<usize, IngestError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();
        let bytes = std::fs::read(path)?;
        self.ingest_bytes(&name, &bytes)
    }

    /// Ingests every file, skipping the ones that fail extraction.
    pub fn ingest_files(&mut self, paths: &[PathBuf]) -> IngestionReport {
        let mut report = IngestionReport::default();

        for path in paths {
            match self.ingest_path(path) {
                Ok(added) => report.pages_added += added,
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped pdf");
                    report.skipped_files.push(SkippedFile {
                        source: path.display().to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            pages_added = report.pages_added,
            skipped = report.skipped_files.len(),
            total_pages = self.pages.len(),
            "ingestion finished"
        );
        report
    }

    pub fn ingest_folder(&mut self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        Ok(self.ingest_files(&files))
    }

    pub fn chunks(&self, config: &ChunkingConfig) -> Result<Vec<TextChunk>, IngestError> {
        chunk_pages(&self.pages, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PageText;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    /// Treats the bytes as UTF-8 and splits pages on form feeds.
    struct PlainTextExtractor;

    impl PdfExtractor for PlainTextExtractor {
        fn extract_bytes(&self, bytes: &[u8], source: &str) -> Result<Vec<PageText>, IngestError> {
            let text = std::str::from_utf8(bytes)
                .map_err(|error| IngestError::PdfParse(format!("{source}: {error}")))?;
            Ok(text
                .split('\u{000c}')
                .enumerate()
                .map(|(index, page)| PageText {
                    number: index as u32 + 1,
                    text: page.to_string(),
                })
                .collect())
        }
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn digest_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[test]
    fn pages_carry_source_metadata() -> Result<(), IngestError> {
        let mut store = DocumentStore::with_extractor(PlainTextExtractor);
        let added = store.ingest_bytes("notes.pdf", "first page\u{000c}second page".as_bytes())?;

        assert_eq!(added, 2);
        assert_eq!(store.pages()[1].source, "notes.pdf");
        assert_eq!(store.pages()[1].page, 2);
        assert_eq!(store.pages()[1].text, "second page");
        Ok(())
    }

    #[test]
    fn failed_files_are_skipped_and_batch_continues() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        fs::write(&good, "readable text")?;
        fs::write(&bad, [0xff, 0xfe, 0x00])?;

        let mut store = DocumentStore::with_extractor(PlainTextExtractor);
        let report = store.ingest_files(&[bad.clone(), good]);

        assert_eq!(report.pages_added, 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.skipped_files[0].source, bad.display().to_string());
        assert_eq!(store.page_count(), 1);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut store = DocumentStore::new();
        let result = store.ingest_path(Path::new("/nonexistent/quiz.pdf"));
        assert!(matches!(result, Err(IngestError::Io(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn ingestion_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = DocumentStore::new();
        let result = store.ingest_folder(dir.path());
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn unreadable_pdfs_are_skipped_by_lopdf() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;

        let mut store = DocumentStore::new();
        let report = store.ingest_folder(dir.path())?;

        assert_eq!(report.pages_added, 0);
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.skipped_files[0].source.ends_with("unreadable.pdf"));
        Ok(())
    }
}
