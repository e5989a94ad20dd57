use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Loader-provided fields describing a source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Base filename; the identity of the document in the corpus
    pub filename: String,
    pub mime_type: String,
}

/// Represents a document with its content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// The document's file name (used as document ID)
    pub document_id: String,
    /// The actual text content of the document
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        Self::from_file_named(path, base_filename(path)?)
    }

    /// Load `file_path` as the corpus document `file_name`.
    ///
    /// The MIME type still comes from `file_path`, so a staged copy must keep
    /// the extension of the name it will be stored under.
    pub fn from_file_named<P: AsRef<Path>>(file_path: P, file_name: String) -> Result<Self> {
        let path = file_path.as_ref();
        if !path.is_file() {
            return Err(RagError::DocumentNotFound(file_name));
        }

        // Detect MIME type
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type {} for {}", mime_type, path.display());

        let content = read_document_content(path, &mime_type)?;

        Ok(Document {
            document_id: file_name.clone(),
            content,
            metadata: DocumentMetadata {
                filename: file_name,
                mime_type,
            },
        })
    }

    /// True when there is no text worth embedding
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Base filename of `path` as UTF-8
pub fn base_filename(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| RagError::Load {
            path: path.to_path_buf(),
            reason: "invalid file name".to_string(),
        })
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let content = extract_text(path).map_err(|e| RagError::Load {
                path: path.to_path_buf(),
                reason: format!("failed to extract text from PDF: {}", e),
            })?;

            // PDF extraction can sometimes include excessive whitespace
            let cleaned_content = normalize_whitespace(&content);

            if cleaned_content.is_empty() {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }

            Ok(cleaned_content)
        }

        mime if mime.starts_with("text/") => {
            debug!("Processing text document: {}", path.display());
            fs::read_to_string(path).map_err(|e| RagError::Load {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }

        _ => Err(RagError::UnsupportedFormat {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
        }),
    }
}

/// Every regular file under `root`, recursively, sorted by path.
///
/// Hidden files and directories are not part of the corpus; uploads are
/// staged under a hidden name.
pub fn corpus_files<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(RagError::DocumentNotFound(root.display().to_string()));
    }

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| RagError::Load {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

/// Locate a document by base filename anywhere under `root`
pub fn find_document<P: AsRef<Path>>(root: P, filename: &str) -> Result<PathBuf> {
    corpus_files(root)?
        .into_iter()
        .find(|path| path.file_name().and_then(|n| n.to_str()) == Some(filename))
        .ok_or_else(|| RagError::DocumentNotFound(filename.to_string()))
}

/// Load every supported document under `root`.
///
/// Files with an unsupported format or no text are skipped, as is any file
/// whose base filename was already seen earlier in the walk (the same one
/// `find_document` resolves to). Any other failure aborts.
pub fn load_corpus<P: AsRef<Path>>(root: P) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut seen = HashSet::new();
    for path in corpus_files(root)? {
        let file_name = base_filename(&path)?;
        if seen.contains(&file_name) {
            warn!(
                "Skipping {}: another file is already named {}",
                path.display(),
                file_name
            );
            continue;
        }
        match Document::from_file_named(&path, file_name.clone()) {
            Ok(document) if document.is_blank() => {
                warn!("Skipping {}: no text content", path.display());
            }
            Ok(document) => documents.push(document),
            Err(RagError::UnsupportedFormat { path, mime_type }) => {
                warn!("Skipping {} ({})", path.display(), mime_type);
            }
            Err(e) => return Err(e),
        }
        seen.insert(file_name);
    }
    info!("Loaded {} documents", documents.len());
    Ok(documents)
}

/// Run filesystem or PDF work off the async executor
pub async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RagError::Io(std::io::Error::other(e)))?
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }
        if newline_count > 0 {
            // At most one blank line survives
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
        }
        if !(c == ' ' && prev_char == ' ') {
            normalized.push(c);
        }
        prev_char = c;
    }

    normalized.trim().to_string()
}
