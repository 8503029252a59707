use crate::storage::{Collection, StoreError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use teloxide::types::UserId;
use tracing::info;

pub const USERS_FILE: &str = "users.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(with = "joined_at_format")]
    pub joined_at: NaiveDateTime,
    /// Результат последней проверки подписки. Доступ по нему не даётся, только статистика.
    #[serde(default)]
    pub subscribed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStats {
    pub total: usize,
    pub subscribed: usize,
}

#[derive(Clone)]
pub struct Users {
    col: Collection<HashMap<String, UserRecord>>,
}

impl Users {
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let col = Collection::open("users", dir.join(USERS_FILE)).await?;
        Ok(Self { col })
    }

    /// Регистрирует пользователя при первом обращении, существующую запись не трогает.
    /// true — пользователь новый.
    pub async fn register(&self, user: UserId) -> Result<bool, StoreError> {
        let key = user.0.to_string();
        let created = self
            .col
            .update(|users| {
                if users.contains_key(&key) {
                    return (false, false);
                }
                users.insert(key.clone(), UserRecord { joined_at: now(), subscribed: false });
                (true, true)
            })
            .await?;
        if created {
            info!(user = user.0, "new user");
        }
        Ok(created)
    }

    /// Запоминает вердикт проверки подписки (создаёт запись, если её ещё нет).
    pub async fn set_subscribed(&self, user: UserId, subscribed: bool) -> Result<(), StoreError> {
        let key = user.0.to_string();
        self.col
            .update(|users| match users.get_mut(&key) {
                Some(rec) if rec.subscribed == subscribed => ((), false),
                Some(rec) => {
                    rec.subscribed = subscribed;
                    ((), true)
                }
                None => {
                    users.insert(key.clone(), UserRecord { joined_at: now(), subscribed });
                    ((), true)
                }
            })
            .await
    }

    #[cfg(test)]
    pub async fn get(&self, user: UserId) -> Option<UserRecord> {
        let key = user.0.to_string();
        self.col.read(|users| users.get(&key).cloned()).await
    }

    pub async fn stats(&self) -> UserStats {
        self.col
            .read(|users| UserStats {
                total: users.len(),
                subscribed: users.values().filter(|u| u.subscribed).count(),
            })
            .await
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

// "2024-05-01 13:45:00"
mod joined_at_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_keeps_first_join_time() {
        let dir = tempfile::tempdir().unwrap();
        let users = Users::open(dir.path()).await.unwrap();

        assert!(users.register(UserId(42)).await.unwrap());
        let first = users.get(UserId(42)).await.unwrap();
        assert!(!users.register(UserId(42)).await.unwrap());

        assert_eq!(users.get(UserId(42)).await, Some(first.clone()));
        assert!(!first.subscribed);
        assert_eq!(users.stats().await, UserStats { total: 1, subscribed: 0 });
    }

    #[tokio::test]
    async fn subscribed_flag_is_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let users = Users::open(dir.path()).await.unwrap();
        users.register(UserId(1)).await.unwrap();

        users.set_subscribed(UserId(1), true).await.unwrap();
        users.set_subscribed(UserId(2), true).await.unwrap();
        users.set_subscribed(UserId(2), false).await.unwrap();

        assert!(users.get(UserId(1)).await.unwrap().subscribed);
        assert!(!users.get(UserId(2)).await.unwrap().subscribed);
        assert_eq!(users.stats().await, UserStats { total: 2, subscribed: 1 });
    }

    #[tokio::test]
    async fn reads_legacy_records_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(USERS_FILE),
            r#"{"100": {"joined_at": "2024-05-01 13:45:00"}}"#,
        )
        .unwrap();

        let users = Users::open(dir.path()).await.unwrap();
        let user = users.get(UserId(100)).await.unwrap();

        assert_eq!(user.joined_at.to_string(), "2024-05-01 13:45:00");
        assert!(!user.subscribed);
    }
}
