use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use accord_core::FileStorage;
use accord_core::files::{random_file_name, sanitize_file_name};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Stores uploads on the local filesystem below `root`.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            bail!("refusing path outside media root: {}", relative.display());
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, directory: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let directory = directory.trim_matches('/');
        let target_dir = if directory.is_empty() {
            self.root.clone()
        } else {
            self.resolve(directory)?
        };
        fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("failed to create {}", target_dir.display()))?;

        let mut name = sanitize_file_name(file_name);
        loop {
            let target = target_dir.join(&name);
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await;

            match opened {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .await
                        .with_context(|| format!("failed to write {}", target.display()))?;
                    file.flush().await?;
                    break;
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    name = random_file_name(&name);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to open {}", target.display()));
                }
            }
        }

        Ok(if directory.is_empty() {
            name
        } else {
            format!("{directory}/{name}")
        })
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", target.display())),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete {}", target.display())),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }
}
