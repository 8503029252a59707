use serde::{de::DeserializeOwned, Serialize};
use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {collection}: {source}")]
    Encode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/* ====== Коллекция ======
   Один JSON-файл = одна коллекция. Состояние живёт в памяти, файл читается один раз
   при открытии и перезаписывается целиком (tmp + rename) на каждое изменение.
   У каждой коллекции свой лок: запись в movies не блокирует чтение users. */
pub struct Collection<T> {
    name: &'static str,
    path: PathBuf,
    state: Arc<RwLock<T>>,
    writes: Arc<AtomicU64>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            path: self.path.clone(),
            state: self.state.clone(),
            writes: self.writes.clone(),
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    /// Открывает коллекцию. Нет файла — создаёт его с пустым значением.
    /// Битый JSON откладывается в `<file>.corrupt-<unix>` и заменяется пустым значением.
    pub async fn open(name: &'static str, path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let state = match fs::read(&path).await {
            Ok(data) => match serde_json::from_slice::<T>(&data) {
                Ok(value) => value,
                Err(e) => {
                    let aside = quarantine(&path).await?;
                    error!(
                        collection = name,
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %e,
                        "store file is corrupted, starting from an empty collection"
                    );
                    let value = T::default();
                    write_snapshot(name, &path, &value).await?;
                    value
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let value = T::default();
                write_snapshot(name, &path, &value).await?;
                info!(collection = name, path = %path.display(), "created store file");
                value
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            name,
            path,
            state: Arc::new(RwLock::new(state)),
            writes: Arc::new(AtomicU64::new(0)),
        })
    }

    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    /// Read-modify-write под write-локом коллекции.
    /// Замыкание возвращает результат и флаг «что-то поменялось»; без изменений диск не трогаем.
    /// Если запись не удалась, в памяти остаётся прежнее состояние.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> (R, bool)) -> Result<R, StoreError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let (out, dirty) = f(&mut next);
        if dirty {
            if let Err(e) = write_snapshot(self.name, &self.path, &next).await {
                error!(collection = self.name, error = %e, "failed to persist collection");
                return Err(e);
            }
            *guard = next;
            let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(collection = self.name, snapshot = n, "collection persisted");
        }
        Ok(out)
    }

    /// Сколько снапшотов записано с момента открытия.
    #[cfg(test)]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

async fn write_snapshot<T: Serialize>(
    collection: &'static str,
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|source| StoreError::Encode { collection, source })?;
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, &data).await.map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).await.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

async fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let aside = sibling(path, &format!(".corrupt-{}", chrono::Utc::now().timestamp()));
    fs::rename(path, &aside).await.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(aside)
}

// movies.json -> movies.json<suffix>
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
