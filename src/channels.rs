use crate::storage::{Collection, StoreError};
use std::path::Path;

pub const CHANNELS_FILE: &str = "channels.json";

/// Обязательные каналы: `@username` или числовой id чата. Порядок добавления сохраняется.
#[derive(Clone)]
pub struct ChannelRegistry {
    col: Collection<Vec<String>>,
}

impl ChannelRegistry {
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let col = Collection::open("channels", dir.join(CHANNELS_FILE)).await?;
        Ok(Self { col })
    }

    /// false — канал уже был в списке.
    pub async fn add_channel(&self, channel: &str) -> Result<bool, StoreError> {
        self.col
            .update(|list| {
                if list.iter().any(|c| same_channel(c, channel)) {
                    (false, false)
                } else {
                    list.push(channel.to_string());
                    (true, true)
                }
            })
            .await
    }

    /// false — такого канала не было.
    pub async fn remove_channel(&self, channel: &str) -> Result<bool, StoreError> {
        self.col
            .update(|list| {
                let before = list.len();
                list.retain(|c| !same_channel(c, channel));
                let removed = list.len() < before;
                (removed, removed)
            })
            .await
    }

    pub async fn list_channels(&self) -> Vec<String> {
        self.col.read(|list| list.clone()).await
    }

    #[cfg(test)]
    fn writes(&self) -> u64 {
        self.col.writes()
    }
}

/// Приводит ввод админа к ключу канала: `MyChannel`, `@MyChannel`, `t.me/MyChannel` -> `@mychannel`,
/// `-1001234567890` и `+100500` -> десятичная запись id. Такие же ключи пишет обработчик заявок.
pub fn normalize_channel(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = ["https://t.me/", "http://t.me/", "t.me/"]
        .iter()
        .find_map(|p| s.strip_prefix(p))
        .unwrap_or(s)
        .trim_end_matches('/');
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return None;
    }
    if let Ok(id) = s.parse::<i64>() {
        return Some(id.to_string());
    }
    let name = s.strip_prefix('@').unwrap_or(s);
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(format!("@{}", name.to_ascii_lowercase()))
}

/// Ключ канала из заявки на вступление: `@username` публичного канала, иначе id чата.
pub fn join_request_key(username: Option<&str>, chat_id: i64) -> String {
    match username {
        Some(name) => format!("@{}", name.to_ascii_lowercase()),
        None => chat_id.to_string(),
    }
}

/// Username в Telegram регистронезависим; старые файлы могли сохранить `@MyChannel`.
pub fn same_channel(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ChannelRegistry::open(dir.path()).await.unwrap();

        assert!(reg.add_channel("@kino").await.unwrap());
        assert!(!reg.add_channel("@kino").await.unwrap());

        assert_eq!(reg.list_channels().await, vec!["@kino".to_string()]);
        assert_eq!(reg.writes(), 1);
    }

    #[tokio::test]
    async fn remove_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ChannelRegistry::open(dir.path()).await.unwrap();
        reg.add_channel("@a").await.unwrap();
        reg.add_channel("-100123").await.unwrap();

        assert!(!reg.remove_channel("@missing").await.unwrap());
        assert_eq!(reg.list_channels().await, vec!["@a".to_string(), "-100123".to_string()]);
        assert_eq!(reg.writes(), 2);

        assert!(reg.remove_channel("@a").await.unwrap());
        assert_eq!(reg.list_channels().await, vec!["-100123".to_string()]);
    }

    #[test]
    fn normalizes_usernames_and_links() {
        assert_eq!(normalize_channel("MyChannel").as_deref(), Some("@mychannel"));
        assert_eq!(normalize_channel(" @MyChannel ").as_deref(), Some("@mychannel"));
        assert_eq!(normalize_channel("https://t.me/My_Channel/").as_deref(), Some("@my_channel"));
        assert_eq!(normalize_channel("t.me/kino").as_deref(), Some("@kino"));
        assert_eq!(normalize_channel("-1001234567890").as_deref(), Some("-1001234567890"));
    }

    #[test]
    fn numeric_ids_are_canonical() {
        assert_eq!(normalize_channel("+100500").as_deref(), Some("100500"));
        assert_eq!(normalize_channel("-000123").as_deref(), Some("-123"));
    }

    #[tokio::test]
    async fn channel_case_does_not_make_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ChannelRegistry::open(dir.path()).await.unwrap();

        let first = normalize_channel("mychannel").unwrap();
        let second = normalize_channel("MyChannel").unwrap();
        assert!(reg.add_channel(&first).await.unwrap());
        assert!(!reg.add_channel(&second).await.unwrap());
        assert_eq!(reg.list_channels().await, vec!["@mychannel".to_string()]);

        assert!(reg.remove_channel("@MYCHANNEL").await.unwrap());
        assert!(reg.list_channels().await.is_empty());
    }

    #[tokio::test]
    async fn legacy_mixed_case_entry_is_matched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CHANNELS_FILE), r#"["@MyChannel"]"#).unwrap();
        let reg = ChannelRegistry::open(dir.path()).await.unwrap();

        assert!(!reg.add_channel("@mychannel").await.unwrap());
        assert_eq!(reg.writes(), 0);
        assert!(reg.remove_channel("@mychannel").await.unwrap());
    }

    #[test]
    fn join_request_keys() {
        assert_eq!(join_request_key(Some("KinoHub"), -1001234567890), "@kinohub");
        assert_eq!(join_request_key(None, -1001234567890), "-1001234567890");
        assert_eq!(
            join_request_key(Some("KinoHub"), -1), normalize_channel("t.me/KinoHub").unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_channel(""), None);
        assert_eq!(normalize_channel("   "), None);
        assert_eq!(normalize_channel("@"), None);
        assert_eq!(normalize_channel("two words"), None);
        assert_eq!(normalize_channel("кино"), None);
    }
}
