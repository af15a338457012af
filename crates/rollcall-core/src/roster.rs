//! Roster: the identities a day's ledger is seeded with.
//!
//! Derived either from the dataset directory (one `{name}_{id}` folder per
//! student) or from the identities present in the gallery.

use crate::gallery::Gallery;
use crate::types::{Identity, StudentId};
use std::fs;
use std::io;
use std::path::Path;

/// Split a dataset folder name into `(name, id)` at the last underscore.
///
/// `"Mary_Ann_12"` → `("Mary_Ann", "012")`. Returns `None` when there is no
/// underscore, the name part is empty, or the suffix is not a valid id.
pub fn parse_folder_name(folder: &str) -> Option<Identity> {
    let (name, raw_id) = folder.rsplit_once('_')?;
    if name.trim().is_empty() {
        return None;
    }
    let id = StudentId::parse(raw_id).ok()?;
    Some(Identity::new(name, id))
}

/// Dataset folder name for an identity.
pub fn folder_name(identity: &Identity) -> String {
    format!("{}_{}", identity.name, identity.id)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Vec<Identity>,
}

impl Roster {
    pub fn new(entries: Vec<Identity>) -> Self {
        Self { entries }
    }

    /// Scan `dataset_dir` for identity folders, sorted by id then name.
    ///
    /// A missing directory is an empty roster; entries that are not
    /// directories or do not parse are skipped.
    pub fn scan(dataset_dir: &Path) -> io::Result<Self> {
        let read_dir = match fs::read_dir(dataset_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(dir = %dataset_dir.display(), "dataset directory missing; roster is empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            // Follows symlinks, so linked photo folders count.
            if !entry.path().is_dir() {
                continue;
            }
            let folder = entry.file_name();
            let Some(folder) = folder.to_str() else {
                continue;
            };
            match parse_folder_name(folder) {
                Some(identity) => entries.push(identity),
                None => tracing::debug!(folder, "skipping dataset folder without a name_id suffix"),
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
        tracing::debug!(dir = %dataset_dir.display(), count = entries.len(), "roster scanned");
        Ok(Self { entries })
    }

    /// One entry per distinct gallery id, in order of first appearance.
    pub fn from_gallery(gallery: &Gallery) -> Self {
        let entries = gallery
            .identities()
            .into_iter()
            .map(|s| Identity::new(s.name, s.id))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[Identity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    #[test]
    fn test_parse_folder_name() {
        let identity = parse_folder_name("Alice_1").unwrap();
        assert_eq!(identity.name, "Alice");
        assert_eq!(identity.id.as_str(), "001");
    }

    #[test]
    fn test_parse_folder_name_splits_on_last_underscore() {
        let identity = parse_folder_name("Mary_Ann_012").unwrap();
        assert_eq!(identity.name, "Mary_Ann");
        assert_eq!(identity.id.as_str(), "012");
    }

    #[test]
    fn test_parse_folder_name_rejects_malformed() {
        assert!(parse_folder_name("NoId").is_none());
        assert!(parse_folder_name("_007").is_none());
        assert!(parse_folder_name("Alice_").is_none());
        assert!(parse_folder_name("Alice_x1").is_none());
    }

    #[test]
    fn test_folder_name_roundtrips() {
        let identity = Identity::new("Bob", StudentId::from(2u32));
        assert_eq!(folder_name(&identity), "Bob_002");
        assert_eq!(parse_folder_name(&folder_name(&identity)), Some(identity));
    }

    #[test]
    fn test_scan_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Bob_2")).unwrap();
        fs::create_dir(dir.path().join("Alice_001")).unwrap();
        fs::create_dir(dir.path().join("unlabelled")).unwrap();
        fs::write(dir.path().join("Carol_003"), b"a file, not a folder").unwrap();

        let roster = Roster::scan(dir.path()).unwrap();
        let ids: Vec<&str> = roster.entries().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["001", "002"]);
        assert_eq!(roster.entries()[1].name, "Bob");
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_follows_symlinked_folders() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("dataset");
        let elsewhere = dir.path().join("photos_of_dana");
        fs::create_dir(&dataset).unwrap();
        fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, dataset.join("Dana_4")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dataset.join("Eve_5")).unwrap();

        let roster = Roster::scan(&dataset).unwrap();
        assert_eq!(roster.entries(), &[Identity::new("Dana", StudentId::from(4u32))]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let roster = Roster::scan(&dir.path().join("nope")).unwrap();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_from_gallery_dedups_ids() {
        let mut gallery = Gallery::empty();
        let two = StudentId::from(2u32);
        let one = StudentId::from(1u32);
        gallery
            .upsert(&two, "Bob", &[Embedding::new(vec![1.0]), Embedding::new(vec![2.0])])
            .unwrap();
        gallery.upsert(&one, "Alice", &[Embedding::new(vec![3.0])]).unwrap();

        let roster = Roster::from_gallery(&gallery);
        assert_eq!(
            roster.entries(),
            &[Identity::new("Bob", two), Identity::new("Alice", one)]
        );
    }
}
