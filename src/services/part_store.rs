//! Scratch-space for uploaded parts, one directory namespace per session.
//!
//! Layout: `{root}/{session_id}/parts/part_{index:05}`. The assembled
//! artifact is later written next to `parts/` inside the same session
//! directory, so purging the namespace reclaims everything at once.

use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct PartStore {
    /// Root directory beneath which session namespaces live.
    pub root: PathBuf,
}

impl PartStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding everything belonging to one session.
    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn parts_dir(&self, session_id: Uuid) -> PathBuf {
        self.session_dir(session_id).join("parts")
    }

    fn part_path(&self, session_id: Uuid, part_index: u32) -> PathBuf {
        self.parts_dir(session_id)
            .join(format!("part_{:05}", part_index))
    }

    /// Create the session namespace. `write` also creates it lazily, so this
    /// only exists to fail fast at init when the scratch disk is unusable.
    pub async fn provision(&self, session_id: Uuid) -> io::Result<()> {
        fs::create_dir_all(self.parts_dir(session_id)).await
    }

    /// Write or overwrite the blob at `part_index`.
    ///
    /// Writes to a temp file and renames into place, so a client retrying a
    /// dropped connection replaces the index atomically (last write wins,
    /// never a torn blob).
    pub async fn write(&self, session_id: Uuid, part_index: u32, bytes: &Bytes) -> io::Result<()> {
        let dir = self.parts_dir(session_id);
        fs::create_dir_all(&dir).await?;

        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = file.write_all(bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        drop(file);

        let final_path = self.part_path(session_id, part_index);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        debug!(
            "stored part {} for session {} ({} bytes)",
            part_index,
            session_id,
            bytes.len()
        );
        Ok(())
    }

    pub async fn exists(&self, session_id: Uuid, part_index: u32) -> bool {
        fs::try_exists(self.part_path(session_id, part_index))
            .await
            .unwrap_or(false)
    }

    /// Indices in `[0, total_parts)` with no stored blob.
    pub async fn missing_indices(&self, session_id: Uuid, total_parts: u32) -> Vec<u32> {
        let mut missing = Vec::new();
        for index in 0..total_parts {
            if !self.exists(session_id, index).await {
                missing.push(index);
            }
        }
        missing
    }

    /// Read the blob at `part_index` and delete it, reclaiming scratch space
    /// as assembly consumes each part.
    pub async fn read_and_delete(&self, session_id: Uuid, part_index: u32) -> io::Result<Bytes> {
        let path = self.part_path(session_id, part_index);
        let bytes = fs::read(&path).await?;
        fs::remove_file(&path).await?;
        Ok(Bytes::from(bytes))
    }

    /// Remove the empty `parts/` directory once assembly has drained it.
    /// Not an error if parts remain or the directory is already gone.
    pub async fn prune_parts_dir(&self, session_id: Uuid) {
        let dir = self.parts_dir(session_id);
        match fs::remove_dir(&dir).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("failed to prune parts dir {}: {}", dir.display(), err),
        }
    }

    /// Remove the entire session namespace, parts and assembled artifact
    /// alike. Idempotent.
    pub async fn purge(&self, session_id: Uuid) -> io::Result<()> {
        match fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, PartStore) {
        let dir = tempdir().unwrap();
        let store = PartStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_and_delete_round_trips() {
        let (_dir, store) = store();
        let session = Uuid::new_v4();

        store.write(session, 0, &Bytes::from_static(b"hello")).await.unwrap();
        assert!(store.exists(session, 0).await);

        let bytes = store.read_and_delete(session, 0).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
        assert!(!store.exists(session, 0).await);
    }

    #[tokio::test]
    async fn rewrite_replaces_previous_content() {
        let (_dir, store) = store();
        let session = Uuid::new_v4();

        store.write(session, 3, &Bytes::from_static(b"first")).await.unwrap();
        store.write(session, 3, &Bytes::from_static(b"second")).await.unwrap();

        let bytes = store.read_and_delete(session, 3).await.unwrap();
        assert_eq!(&bytes[..], b"second");
    }

    #[tokio::test]
    async fn missing_indices_reports_gaps() {
        let (_dir, store) = store();
        let session = Uuid::new_v4();

        store.write(session, 0, &Bytes::from_static(b"a")).await.unwrap();
        store.write(session, 2, &Bytes::from_static(b"c")).await.unwrap();

        assert_eq!(store.missing_indices(session, 3).await, vec![1]);
        store.write(session, 1, &Bytes::from_static(b"b")).await.unwrap();
        assert!(store.missing_indices(session, 3).await.is_empty());
    }

    #[tokio::test]
    async fn purge_removes_namespace_and_is_idempotent() {
        let (_dir, store) = store();
        let session = Uuid::new_v4();

        store.write(session, 0, &Bytes::from_static(b"a")).await.unwrap();
        assert!(store.session_dir(session).exists());

        store.purge(session).await.unwrap();
        assert!(!store.session_dir(session).exists());
        store.purge(session).await.unwrap();
    }
}
