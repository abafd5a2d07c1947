#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Turns a submission file or folder of mixed file types into one text blob.

use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

/// Extensions decoded as plain text.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "tsv", "json", "yaml", "yml", "toml", "xml", "html",
    "htm", "css", "py", "ipynb", "java", "c", "h", "cc", "cpp", "hpp", "cs", "js", "jsx", "ts",
    "tsx", "rs", "go", "rb", "php", "swift", "kt", "scala", "r", "m", "sql", "sh", "bash", "ps1",
    "asm", "s", "hs", "lua", "pl", "tex",
];

/// Extensions extracted page by page as documents.
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

/// Separator placed between fragments from different files.
const FRAGMENT_SEPARATOR: &str = "\n\n";

/// How a file's text is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Paginated document; page texts are concatenated.
    Document,
    /// Source code or prose; bytes are decoded directly.
    Text,
}

impl FileKind {
    /// Classifies a path by extension, `None` for unsupported formats.
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Document)
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Text)
        } else {
            None
        }
    }
}

/// Why a single file yielded no text.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    /// The file could not be read.
    #[error("could not read {path}: {source}")]
    Io {
        /// File path.
        path:   PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document could not be parsed.
    #[error("could not parse document {path}: {message}")]
    Document {
        /// File path.
        path:    PathBuf,
        /// Parser message.
        message: String,
    },
    /// The format is not supported.
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),
    /// Directory traversal failed part-way.
    #[error("could not traverse {0}")]
    Walk(#[from] walkdir::Error),
}

/// A file that was passed over, with the reason.
#[derive(Debug)]
pub struct SkippedFile {
    /// File path.
    pub path:   PathBuf,
    /// Reason it was skipped.
    pub reason: String,
}

/// Detailed result of extracting a path.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Non-blank text per file, in traversal order.
    pub fragments: Vec<(PathBuf, String)>,
    /// Corrupt or unreadable files.
    pub skipped:   Vec<SkippedFile>,
}

impl Extraction {
    /// Joins the fragments with a blank line, `None` when there are none.
    pub fn into_text(self) -> Option<String> {
        if self.fragments.is_empty() {
            return None;
        }
        Some(
            self.fragments
                .into_iter()
                .map(|(_, text)| text)
                .collect::<Vec<_>>()
                .join(FRAGMENT_SEPARATOR),
        )
    }
}

/// Extracts normalized text from submission files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    /// Returns the text of a file, or of every supported file under a
    /// directory joined by blank lines.
    ///
    /// `None` means nothing readable was found, which is not the same as an
    /// empty submission.
    pub fn extract(&self, path: &Path) -> Option<String> {
        self.extract_detailed(path).into_text()
    }

    /// Like [`ContentExtractor::extract`] but keeps per-file fragments and
    /// the files that were skipped.
    pub fn extract_detailed(&self, path: &Path) -> Extraction {
        let mut extraction = Extraction::default();

        if path.is_file() {
            self.visit(path, &mut extraction);
            return extraction;
        }

        for entry in WalkDir::new(path).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => self.visit(entry.path(), &mut extraction),
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
                    tracing::warn!("Skipping {}: {e}", path.display());
                    extraction.skipped.push(SkippedFile {
                        path,
                        reason: ExtractionError::from(e).to_string(),
                    });
                }
            }
        }
        extraction
    }

    /// Extracts one file into `extraction`, skipping unsupported formats and
    /// recording failures.
    fn visit(&self, path: &Path, extraction: &mut Extraction) {
        match self.extract_file(path) {
            Ok(text) if text.trim().is_empty() => {
                tracing::debug!("{} has no text", path.display());
            }
            Ok(text) => extraction.fragments.push((path.to_path_buf(), text)),
            Err(ExtractionError::Unsupported(_)) => {
                tracing::debug!("Skipping unsupported file {}", path.display());
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {e}", path.display());
                extraction.skipped.push(SkippedFile {
                    path:   path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Extracts a single file according to its [`FileKind`].
    pub fn extract_file(&self, path: &Path) -> Result<String, ExtractionError> {
        let kind = FileKind::of(path).ok_or_else(|| ExtractionError::Unsupported(path.to_path_buf()))?;
        let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match kind {
            FileKind::Text => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            FileKind::Document => document_text(path, &bytes),
        }
    }
}

/// Concatenates the text of every page of a PDF.
fn document_text(path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
    // pdf-extract panics on some malformed documents.
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| ExtractionError::Document {
        path:    path.to_path_buf(),
        message: "parser panicked".to_string(),
    })?
    .map_err(|e| ExtractionError::Document {
        path:    path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(pages.join("\n"))
}
