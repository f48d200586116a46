use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;
use tracing::info;

const PREFIX: &str = "snap_";
const EXTENSION: &str = ".jpg";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to create snapshot directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Snapshot directory I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Folder of timestamped JPEG snapshots.
pub struct Snapshots {
    dir: PathBuf,
}

impl Snapshots {
    pub fn new(dir: PathBuf) -> Result<Self, Error> {
        std::fs::create_dir_all(&dir).map_err(|source| Error::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Snapshots { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, frame: &[u8]) -> Result<PathBuf, Error> {
        self.save_at(frame, Local::now()).await
    }

    /// Writes `frame` as `snap_<timestamp>.jpg`. A second snapshot within the
    /// same second gets a numeric suffix instead of replacing the first.
    pub async fn save_at(&self, frame: &[u8], time: DateTime<Local>) -> Result<PathBuf, Error> {
        let stem = format!("{PREFIX}{}", time.format("%Y-%m-%d_%H-%M-%S"));
        let mut attempt = 0;
        loop {
            let name = match attempt {
                0 => format!("{stem}{EXTENSION}"),
                n => format!("{stem}_{n}{EXTENSION}"),
            };
            let path = self.dir.join(name);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match file {
                Ok(mut file) => {
                    write_frame(&mut file, frame)
                        .await
                        .map_err(|source| Error::Write {
                            path: path.clone(),
                            source,
                        })?;
                    info!("Snapshot saved: {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(Error::Write { path, source }),
            }
        }
    }

    /// Snapshot file names, newest first.
    pub async fn list(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_snapshot_name(name) {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Contents of one snapshot, or `None` when `name` does not refer to a
    /// snapshot in this folder.
    pub async fn read(&self, name: &str) -> Result<Option<Bytes>, Error> {
        if !is_snapshot_name(name) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_frame(file: &mut tokio::fs::File, frame: &[u8]) -> std::io::Result<()> {
    file.write_all(frame).await?;
    file.flush().await
}

fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(PREFIX)
        && name.ends_with(EXTENSION)
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;

    /// Fresh, empty directory under the system temp dir.
    pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "eye-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn saves_timestamped_files() {
        let snapshots = Snapshots::new(scratch_dir("save")).unwrap();
        let path = snapshots.save_at(b"jpeg", noon()).await.unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "snap_2024-05-17_12-00-00.jpg"
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn same_second_does_not_overwrite() {
        let snapshots = Snapshots::new(scratch_dir("collide")).unwrap();
        let first = snapshots.save_at(b"one", noon()).await.unwrap();
        let second = snapshots.save_at(b"two", noon()).await.unwrap();

        assert_ne!(first, second);
        assert!(second.to_str().unwrap().ends_with("_1.jpg"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
    }

    #[tokio::test]
    async fn lists_newest_first() {
        let snapshots = Snapshots::new(scratch_dir("list")).unwrap();
        let later = Local.with_ymd_and_hms(2024, 5, 18, 8, 30, 0).unwrap();
        snapshots.save_at(b"a", noon()).await.unwrap();
        snapshots.save_at(b"b", later).await.unwrap();
        std::fs::write(snapshots.dir().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(
            snapshots.list().await.unwrap(),
            vec![
                "snap_2024-05-18_08-30-00.jpg".to_owned(),
                "snap_2024-05-17_12-00-00.jpg".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn read_rejects_foreign_names() {
        let snapshots = Snapshots::new(scratch_dir("read")).unwrap();
        let path = snapshots.save_at(b"jpeg", noon()).await.unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();

        assert_eq!(snapshots.read(name).await.unwrap().unwrap(), &b"jpeg"[..]);
        assert!(snapshots.read("snap_../../etc.jpg").await.unwrap().is_none());
        assert!(snapshots.read("passwd").await.unwrap().is_none());
        assert!(snapshots
            .read("snap_2000-01-01_00-00-00.jpg")
            .await
            .unwrap()
            .is_none());
    }
}
