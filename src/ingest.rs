//! File ingestion surface.
//!
//! Accepts named byte blobs (uploads or files read from disk), converts
//! binary formats to text, and hands the documents to the catalog. The
//! whole set is ingested as one atomic replacement of the collection.

use std::path::Path;

use anyhow::{Context, Result};

use docroute_core::{Catalog, Document, RagError};

use crate::extract::{content_type_for, to_text_document};

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct NamedBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl NamedBlob {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Convert a blob into a text [`Document`], extracting PDF/DOCX content.
pub fn blob_to_document(collection: &str, blob: NamedBlob) -> Result<Document, RagError> {
    let content_type = content_type_for(&blob.name);
    let name = blob.name.clone();
    to_text_document(Document::new(blob.name, blob.bytes, content_type))
        .map_err(|e| RagError::ingest(collection, format!("{}: {}", name, e)))
}

/// Ingest `files` into `collection`, replacing its contents.
///
/// Returns the collection name. Fails with [`RagError::Ingest`] if the set
/// is empty or any file is empty, unreadable, or of an unsupported type;
/// the previous contents stay in place in that case.
pub async fn ingest_files(catalog: &Catalog, collection: &str, files: Vec<NamedBlob>) -> Result<String, RagError> {
    let documents = files
        .into_iter()
        .map(|blob| blob_to_document(collection, blob))
        .collect::<Result<Vec<_>, _>>()?;
    let ingested = catalog.ingest(collection, documents).await?;
    tracing::info!(
        collection = %ingested.name,
        version = ingested.version,
        chunks = ingested.chunk_count(),
        "files ingested"
    );
    Ok(ingested.name.clone())
}

/// Read files from disk, naming each blob by its file name.
pub fn read_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<NamedBlob>> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(NamedBlob::new(name, bytes))
        })
        .collect()
}
