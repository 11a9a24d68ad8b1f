//! Generated documents, tracked by explicit tickets.
//!
//! An [`OutputStore`] owns a private temp directory. Each stored document gets a [`Ticket`];
//! the document lives until the ticket is disposed or the store is dropped, whichever comes
//! first.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use fieldgate_xlsx::XlsxPackage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(Uuid);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    file_name: String,
}

#[derive(Debug)]
pub struct OutputStore {
    dir: tempfile::TempDir,
    entries: HashMap<Ticket, Entry>,
}

impl OutputStore {
    pub fn new() -> Result<Self, PipelineError> {
        let dir = tempfile::Builder::new()
            .prefix("fieldgate-")
            .tempdir()
            .map_err(|source| PipelineError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        Ok(Self {
            dir,
            entries: HashMap::new(),
        })
    }

    /// Directory holding the stored documents.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Save `package` under a fresh ticket. `file_name` is what callers offer for download.
    pub fn create(
        &mut self,
        package: &XlsxPackage,
        file_name: impl Into<String>,
    ) -> Result<Ticket, PipelineError> {
        let ticket = Ticket(Uuid::new_v4());
        let path = self.dir.path().join(format!("{ticket}.xlsx"));
        package.save(&path)?;

        let file_name = file_name.into();
        log::debug!("stored {file_name:?} as {ticket}");
        self.entries.insert(ticket, Entry { path, file_name });
        Ok(ticket)
    }

    pub fn file_name(&self, ticket: &Ticket) -> Option<&str> {
        self.entries.get(ticket).map(|e| e.file_name.as_str())
    }

    pub fn path(&self, ticket: &Ticket) -> Option<&Path> {
        self.entries.get(ticket).map(|e| e.path.as_path())
    }

    pub fn fetch(&self, ticket: &Ticket) -> Result<Vec<u8>, PipelineError> {
        let entry = self
            .entries
            .get(ticket)
            .ok_or(PipelineError::UnknownTicket(*ticket))?;
        std::fs::read(&entry.path).map_err(|source| PipelineError::Io {
            path: entry.path.clone(),
            source,
        })
    }

    /// Delete the document behind `ticket`; it cannot be fetched afterwards.
    pub fn dispose(&mut self, ticket: Ticket) -> Result<(), PipelineError> {
        let entry = self
            .entries
            .remove(&ticket)
            .ok_or(PipelineError::UnknownTicket(ticket))?;
        match std::fs::remove_file(&entry.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::Io {
                path: entry.path,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn package() -> XlsxPackage {
        let mut pkg = XlsxPackage::default();
        pkg.set_part("xl/workbook.xml", b"<workbook/>".to_vec());
        pkg
    }

    #[test]
    fn create_fetch_dispose() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = OutputStore::new()?;
        let ticket = store.create(&package(), "template_staffel.xlsx")?;
        assert_eq!(store.len(), 1);
        assert_eq!(store.file_name(&ticket), Some("template_staffel.xlsx"));

        let bytes = store.fetch(&ticket)?;
        let reopened = XlsxPackage::from_bytes(&bytes)?;
        assert_eq!(reopened.part("xl/workbook.xml"), Some(&b"<workbook/>"[..]));

        let path = store.path(&ticket).map(Path::to_path_buf);
        store.dispose(ticket)?;
        assert!(store.is_empty());
        assert!(path.is_some_and(|p| !p.exists()));
        assert!(matches!(
            store.fetch(&ticket),
            Err(PipelineError::UnknownTicket(t)) if t == ticket
        ));
        Ok(())
    }

    #[test]
    fn dropping_the_store_removes_its_directory() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = OutputStore::new()?;
        store.create(&package(), "a.xlsx")?;
        let dir = store.dir().to_path_buf();
        assert!(dir.exists());
        drop(store);
        assert!(!dir.exists());
        Ok(())
    }

    #[test]
    fn tickets_serialize_as_plain_strings() {
        let ticket = Ticket(Uuid::nil());
        assert_eq!(
            serde_json::to_string(&ticket).unwrap(),
            "\"00000000-0000-0000-0000-000000000000\""
        );
    }
}
