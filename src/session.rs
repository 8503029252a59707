use crate::channels::normalize_channel;
use moka::future::Cache;
use std::time::Duration;
use teloxide::types::UserId;

/* ====== Диалог админа ======
   Явная машина состояний вместо «следующее сообщение обработает вот эта функция».
   transition() — чистая функция: состояние + ввод -> новое состояние + что сделать. */

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdminState {
    #[default]
    Idle,
    AwaitingMovieVideo,
    AwaitingMovieName { file_ref: String },
    AwaitingMovieId,
    AwaitingChannelName,
}

/// Кнопки админ-меню.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    AddMovie,
    DeleteMovie,
    ListMovies,
    AddChannel,
    DeleteChannel,
    Stats,
    Back,
}

impl MenuAction {
    pub const ALL: [MenuAction; 7] = [
        MenuAction::AddMovie,
        MenuAction::DeleteMovie,
        MenuAction::ListMovies,
        MenuAction::AddChannel,
        MenuAction::DeleteChannel,
        MenuAction::Stats,
        MenuAction::Back,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuAction::AddMovie => "➕ Добавить фильм",
            MenuAction::DeleteMovie => "❌ Удалить фильм",
            MenuAction::ListMovies => "📋 Список фильмов",
            MenuAction::AddChannel => "➕ Добавить канал",
            MenuAction::DeleteChannel => "❌ Удалить канал",
            MenuAction::Stats => "📊 Статистика",
            MenuAction::Back => "🔙 Назад",
        }
    }

    pub fn from_label(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.label() == text.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminInput {
    Menu(MenuAction),
    Video { file_ref: String },
    Text(String),
    Cancel,
}

/// Что должен сделать обработчик после перехода.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AskVideo,
    AskName,
    AskMovieId,
    AskChannel,
    AddMovie { name: String, file_ref: String },
    DeleteMovie(u64),
    AddChannel(String),
    ShowMovies,
    ShowChannelPicker,
    ShowStats,
    ShowMainMenu,
    Cancelled,
    NotANumber,
    BadChannel,
    EmptyName,
    /// Текст вне сценария.
    Unrecognized,
}

pub fn transition(state: AdminState, input: AdminInput) -> (AdminState, Effect) {
    use AdminInput as I;
    use AdminState as S;

    match (state, input) {
        (_, I::Cancel) => (S::Idle, Effect::Cancelled),
        (_, I::Menu(action)) => match action {
            MenuAction::AddMovie => (S::AwaitingMovieVideo, Effect::AskVideo),
            MenuAction::DeleteMovie => (S::AwaitingMovieId, Effect::AskMovieId),
            MenuAction::AddChannel => (S::AwaitingChannelName, Effect::AskChannel),
            MenuAction::ListMovies => (S::Idle, Effect::ShowMovies),
            MenuAction::DeleteChannel => (S::Idle, Effect::ShowChannelPicker),
            MenuAction::Stats => (S::Idle, Effect::ShowStats),
            MenuAction::Back => (S::Idle, Effect::ShowMainMenu),
        },
        // видео принимаем в любом состоянии, как и раньше: прислал — спрашиваем название
        (_, I::Video { file_ref }) => (S::AwaitingMovieName { file_ref }, Effect::AskName),
        (S::AwaitingMovieName { file_ref }, I::Text(text)) => {
            let name = text.trim();
            if name.is_empty() {
                (S::AwaitingMovieName { file_ref }, Effect::EmptyName)
            } else {
                (S::Idle, Effect::AddMovie { name: name.to_string(), file_ref })
            }
        }
        (S::AwaitingMovieId, I::Text(text)) => match text.trim().parse::<u64>() {
            Ok(id) => (S::Idle, Effect::DeleteMovie(id)),
            Err(_) => (S::AwaitingMovieId, Effect::NotANumber),
        },
        (S::AwaitingChannelName, I::Text(text)) => match normalize_channel(&text) {
            Some(channel) => (S::Idle, Effect::AddChannel(channel)),
            None => (S::AwaitingChannelName, Effect::BadChannel),
        },
        (state @ (S::Idle | S::AwaitingMovieVideo), I::Text(_)) => (state, Effect::Unrecognized),
    }
}

/* ====== Сессии ======
   user -> состояние. Брошенный посреди диалог истекает по простою. */
#[derive(Clone)]
pub struct AdminSessions {
    cache: Cache<UserId, AdminState>,
}

impl AdminSessions {
    pub fn new(idle_timeout: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1_000).time_to_idle(idle_timeout).build();
        Self { cache }
    }

    pub async fn state(&self, user: UserId) -> AdminState {
        self.cache.get(&user).await.unwrap_or_default()
    }

    /// Применяет ввод к сессии пользователя и возвращает эффект.
    pub async fn apply(&self, user: UserId, input: AdminInput) -> Effect {
        let current = self.state(user).await;
        let (next, effect) = transition(current, input);
        if next == AdminState::Idle {
            self.cache.invalidate(&user).await;
        } else {
            self.cache.insert(user, next).await;
        }
        effect
    }
}
