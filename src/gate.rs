use crate::channels::ChannelRegistry;
use crate::pending::PendingRequests;
use async_trait::async_trait;
use std::{str::FromStr, sync::Arc};
use teloxide::{
    prelude::*,
    types::{Recipient, UserId},
};
use tracing::{debug, warn};

/// Как гейт относится к заявкам на вступление и ошибкам проверки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatePolicy {
    /// Заявка на вступление засчитывается как подписка, ошибка проверки = «не подписан» по этому каналу.
    #[default]
    Lenient,
    /// Только живое членство; любая ошибка проверки сразу закрывает доступ.
    Strict,
}

impl FromStr for GatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown gate policy `{other}` (expected lenient or strict)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    pub fn is_subscribed(self) -> bool {
        matches!(self, Self::Creator | Self::Administrator | Self::Member)
    }
}

/// Внешняя проверка: кем пользователь является в канале.
#[async_trait]
pub trait MembershipCheck: Send + Sync {
    async fn status(&self, channel: &str, user: UserId) -> anyhow::Result<MemberStatus>;
}

/* ====== Проверка через Bot API (getChatMember) ====== */
pub struct TelegramMembership {
    bot: Bot,
}

impl TelegramMembership {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MembershipCheck for TelegramMembership {
    async fn status(&self, channel: &str, user: UserId) -> anyhow::Result<MemberStatus> {
        let member = self.bot.get_chat_member(channel_recipient(channel), user).await?;
        let kind = &member.kind;
        let status = if kind.is_owner() {
            MemberStatus::Creator
        } else if kind.is_administrator() {
            MemberStatus::Administrator
        } else if kind.is_member() {
            MemberStatus::Member
        } else if kind.is_restricted() {
            MemberStatus::Restricted
        } else if kind.is_banned() {
            MemberStatus::Banned
        } else {
            MemberStatus::Left
        };
        Ok(status)
    }
}

/// `-100…` -> id чата, всё остальное -> `@username`.
pub fn channel_recipient(channel: &str) -> Recipient {
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => {
            let name = channel.trim_start_matches('@');
            Recipient::ChannelUsername(format!("@{name}"))
        }
    }
}

/* ====== Гейт ======
   Чистая функция от списка каналов, заявок и живой проверки. Ничего не кэширует:
   каждое действие пользователя = по одному запросу на каждый обязательный канал. */
#[derive(Clone)]
pub struct SubscriptionGate {
    channels: ChannelRegistry,
    pending: PendingRequests,
    membership: Arc<dyn MembershipCheck>,
    policy: GatePolicy,
}

impl SubscriptionGate {
    pub fn new(
        channels: ChannelRegistry,
        pending: PendingRequests,
        membership: Arc<dyn MembershipCheck>,
        policy: GatePolicy,
    ) -> Self {
        Self { channels, pending, membership, policy }
    }

    pub async fn is_allowed(&self, user: UserId) -> bool {
        let channels = self.channels.list_channels().await;
        // каналы не настроены — пускаем всех
        if channels.is_empty() {
            return true;
        }
        for channel in &channels {
            let passed = match self.policy {
                GatePolicy::Lenient => self.lenient_check(channel, user).await,
                GatePolicy::Strict => match self.membership.status(channel, user).await {
                    Ok(status) => status.is_subscribed(),
                    Err(e) => {
                        warn!(user = user.0, channel = %channel, error = %e, "membership check failed, denying");
                        false
                    }
                },
            };
            if !passed {
                debug!(user = user.0, channel = %channel, "gate closed");
                return false;
            }
        }
        true
    }

    async fn lenient_check(&self, channel: &str, user: UserId) -> bool {
        match self.membership.status(channel, user).await {
            Ok(status) if status.is_subscribed() => return true,
            Ok(_) => {}
            Err(e) => {
                warn!(user = user.0, channel, error = %e, "membership check failed, treating as not subscribed");
            }
        }
        self.pending.has_request(user, channel).await
    }
}
