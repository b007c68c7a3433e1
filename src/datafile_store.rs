//! A thread-safe in-memory storage for the currently active datafile. [`DatafileStore`] provides
//! concurrent access for readers (evaluation) and writers (refreshing).
use std::sync::{Arc, RwLock};

use crate::Datafile;

/// `DatafileStore` holds the active [`Datafile`] snapshot.
///
/// Readers take an `Arc` to the current snapshot and keep evaluating against it even if a writer
/// replaces it in the meantime, so every evaluation sees exactly one snapshot.
pub struct DatafileStore {
    datafile: RwLock<Arc<Datafile>>,
}

impl DatafileStore {
    /// Create a store holding `datafile`.
    pub fn new(datafile: Datafile) -> DatafileStore {
        DatafileStore {
            datafile: RwLock::new(Arc::new(datafile)),
        }
    }

    /// Get the currently active datafile.
    pub fn get_datafile(&self) -> Arc<Datafile> {
        // Err() is possible only if the lock is poisoned, which should never happen.
        let datafile = self
            .datafile
            .read()
            .expect("thread holding datafile lock should not panic");

        Arc::clone(&datafile)
    }

    /// Replace the active datafile, returning the previous one.
    pub fn set_datafile(&self, datafile: Datafile) -> Arc<Datafile> {
        let mut slot = self
            .datafile
            .write()
            .expect("thread holding datafile lock should not panic");

        std::mem::replace(&mut *slot, Arc::new(datafile))
    }
}

impl Default for DatafileStore {
    fn default() -> DatafileStore {
        DatafileStore::new(Datafile::empty())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::DatafileStore;
    use crate::{Datafile, DatafileContent};

    fn datafile(revision: &str) -> Datafile {
        Datafile::new(DatafileContent {
            revision: revision.to_owned(),
            ..DatafileContent::empty()
        })
    }

    #[test]
    fn can_set_datafile_from_another_thread() {
        let store = Arc::new(DatafileStore::default());
        assert_eq!(store.get_datafile().revision(), "unknown");

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_datafile(datafile("2"));
            })
            .join();
        }

        assert_eq!(store.get_datafile().revision(), "2");
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = DatafileStore::new(datafile("1"));
        let snapshot = store.get_datafile();

        let previous = store.set_datafile(datafile("2"));

        assert_eq!(previous.revision(), "1");
        assert_eq!(snapshot.revision(), "1");
        assert_eq!(store.get_datafile().revision(), "2");
    }
}
