use crate::channels::same_channel;
use crate::storage::{Collection, StoreError};
use std::{collections::HashMap, path::Path};
use teloxide::types::UserId;
use tracing::info;

pub const PENDING_FILE: &str = "pending_requests.json";

/// Заявки на вступление: канал -> id пользователей (строкой). Записи не удаляются.
#[derive(Clone)]
pub struct PendingRequests {
    col: Collection<HashMap<String, Vec<String>>>,
}

impl PendingRequests {
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let col = Collection::open("pending", dir.join(PENDING_FILE)).await?;
        Ok(Self { col })
    }

    /// true — заявка новая и сохранена; повторная заявка на диск не пишется.
    pub async fn record(&self, user: UserId, channel: &str) -> Result<bool, StoreError> {
        let key = user.0.to_string();
        let added = self
            .col
            .update(|pending| {
                // ключ, записанный раньше в другом регистре, переиспользуем
                let slot = pending
                    .keys()
                    .find(|c| same_channel(c, channel))
                    .cloned()
                    .unwrap_or_else(|| channel.to_string());
                let users = pending.entry(slot).or_default();
                if users.contains(&key) {
                    (false, false)
                } else {
                    users.push(key.clone());
                    (true, true)
                }
            })
            .await?;
        if added {
            info!(user = user.0, channel, "join request recorded");
        }
        Ok(added)
    }

    pub async fn has_request(&self, user: UserId, channel: &str) -> bool {
        let key = user.0.to_string();
        self.col
            .read(|pending| {
                pending
                    .iter()
                    .any(|(c, users)| same_channel(c, channel) && users.contains(&key))
            })
            .await
    }

    #[cfg(test)]
    pub fn writes(&self) -> u64 {
        self.col.writes()
    }
}
