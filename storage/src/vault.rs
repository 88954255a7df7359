//! Plain-directory destination store.
//!
//! Temporary files are dot-prefixed siblings of their final path
//! (`.<name>.<uuid>.tmp`) so they share a filesystem and never show up as
//! notes. Publication links the temp file to its final name, which fails if
//! the name is taken, then unlinks the temp file and fsyncs the directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capture_core::DestinationStore;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf
}

impl FsVault {
    /// Opens `root`, creating it if missing.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes temp files left behind by a crash. Returns how many were
    /// removed.
    pub async fn sweep_temp_files(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, root = %self.root.display(), "Removed abandoned temp files");
        }
        Ok(removed)
    }

    async fn sync_dir(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            let dir = fs::File::open(&self.root).await?;
            dir.sync_all().await?;
        }
        Ok(())
    }

    async fn publish(&self, tmp: &Path, final_path: &Path) -> io::Result<()> {
        match fs::hard_link(tmp, final_path).await {
            Ok(()) => fs::remove_file(tmp).await,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(err),
            Err(err) => {
                // Filesystems without hard links: check, then rename.
                debug!(error = %err, "Hard link unavailable, falling back to rename");
                if fs::try_exists(final_path).await? {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} already exists", final_path.display())
                    ));
                }
                fs::rename(tmp, final_path).await
            }
        }
    }
}

#[async_trait]
impl DestinationStore for FsVault {
    fn final_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    async fn write_temp(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let tmp = self
            .root
            .join(format!(".{file_name}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple()));
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(tmp)
    }

    async fn fsync(&self, path: &Path) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.sync_all().await
    }

    async fn rename(&self, tmp: &Path, final_path: &Path) -> io::Result<()> {
        self.publish(tmp, final_path).await?;
        self.sync_dir().await
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn discard(&self, tmp: &Path) -> io::Result<()> {
        match fs::remove_file(tmp).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(())
        }
    }

    async fn sweep_temp(&self) -> io::Result<usize> {
        self.sweep_temp_files().await
    }
}
