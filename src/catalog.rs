use crate::storage::{Collection, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MOVIES_FILE: &str = "movies.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub id: u64,
    pub name: String,
    /// Telegram file_id загруженного видео.
    #[serde(rename = "file_id")]
    pub file_reference: String,
}

/* ====== Формат файла ======
   { "next_id": n, "movies": [...] }. Старый формат — просто массив фильмов,
   тогда счётчик восстанавливаем как max(id) + 1. */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CatalogRepr")]
struct CatalogFile {
    next_id: u64,
    movies: Vec<Movie>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogRepr {
    Current { next_id: u64, movies: Vec<Movie> },
    Legacy(Vec<Movie>),
}

impl From<CatalogRepr> for CatalogFile {
    fn from(repr: CatalogRepr) -> Self {
        let (next_id, movies) = match repr {
            CatalogRepr::Current { next_id, movies } => (next_id, movies),
            CatalogRepr::Legacy(movies) => (1, movies),
        };
        // счётчик никогда не отстаёт от уже выданных id
        let floor = movies.iter().map(|m| m.id).max().map_or(1, |max| max + 1);
        Self { next_id: next_id.max(floor), movies }
    }
}

impl Default for CatalogFile {
    fn default() -> Self {
        Self { next_id: 1, movies: Vec::new() }
    }
}

/// Каталог фильмов. Id выдаются из монотонного счётчика и не переиспользуются после удаления.
#[derive(Clone)]
pub struct Catalog {
    col: Collection<CatalogFile>,
}

impl Catalog {
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let col = Collection::open("movies", dir.join(MOVIES_FILE)).await?;
        Ok(Self { col })
    }

    pub async fn add_movie(&self, name: &str, file_reference: &str) -> Result<u64, StoreError> {
        self.col
            .update(|c| {
                let id = c.next_id;
                c.next_id += 1;
                c.movies.push(Movie {
                    id,
                    name: name.to_string(),
                    file_reference: file_reference.to_string(),
                });
                (id, true)
            })
            .await
    }

    /// false — такого id не было (ничего не пишем).
    pub async fn delete_movie(&self, id: u64) -> Result<bool, StoreError> {
        self.col
            .update(|c| {
                let before = c.movies.len();
                c.movies.retain(|m| m.id != id);
                let removed = c.movies.len() < before;
                (removed, removed)
            })
            .await
    }

    pub async fn get_movie(&self, id: u64) -> Option<Movie> {
        self.col.read(|c| c.movies.iter().find(|m| m.id == id).cloned()).await
    }

    pub async fn list_movies(&self) -> Vec<(u64, String)> {
        self.col
            .read(|c| c.movies.iter().map(|m| (m.id, m.name.clone())).collect())
            .await
    }

    #[cfg(test)]
    fn writes(&self) -> u64 {
        self.col.writes()
    }
}
