use crate::catalog::Catalog;
use crate::channels::{self, ChannelRegistry};
use crate::gate::SubscriptionGate;
use crate::pending::PendingRequests;
use crate::session::{AdminInput, AdminSessions, Effect, MenuAction};
use crate::storage::StoreError;
use crate::users::Users;
use crate::webhook::{self, UpdateStream};
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    prelude::*,
    types::{
        CallbackQuery, ChatId, ChatJoinRequest, FileId, ForceReply, InlineKeyboardButton,
        InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup, UserId,
    },
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tracing::{debug, info, warn};

const FIND_MOVIE: &str = "🎥 Найти фильм";
const CHECK_SUB: &str = "check_sub";
const DELETE_CHANNEL_PREFIX: &str = "delch:";
const MESSAGE_LIMIT: usize = 4000;

/// Всё, что нужно обработчикам. Клонируется дёшево: внутри только Arc.
#[derive(Clone)]
pub struct App {
    pub admin: UserId,
    pub users: Users,
    pub catalog: Catalog,
    pub channels: ChannelRegistry,
    pub pending: PendingRequests,
    pub gate: SubscriptionGate,
    pub sessions: AdminSessions,
}

impl App {
    /// Регистрирует пользователя, проверяет подписку и запоминает вердикт.
    pub async fn check_access(&self, user: UserId) -> Result<bool, StoreError> {
        self.users.register(user).await?;
        let allowed = self.gate.is_allowed(user).await;
        self.users.set_subscribed(user, allowed).await?;
        Ok(allowed)
    }

    fn is_admin(&self, user: UserId) -> bool {
        user == self.admin
    }
}

/* ====== Команды ====== */
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Команды:")]
enum Command {
    #[command(description = "начать")]
    Start,
    #[command(description = "помощь")]
    Help,
    #[command(description = "отменить текущее действие")]
    Cancel,
}

pub async fn run(bot: Bot, app: App, updates: UpdateStream) {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint({
                            let app = app.clone();
                            move |bot: Bot, msg: Message, cmd: Command| {
                                let app = app.clone();
                                async move { on_command(bot, msg, cmd, &app).await }
                            }
                        })
                )
                .branch({
                    let app = app.clone();
                    dptree::endpoint(move |bot: Bot, msg: Message| {
                        let app = app.clone();
                        async move { on_message(bot, msg, &app).await }
                    })
                })
        )
        .branch(
            Update::filter_callback_query().endpoint({
                let app = app.clone();
                move |bot: Bot, q: CallbackQuery| {
                    let app = app.clone();
                    async move { on_callback(bot, q, &app).await }
                }
            })
        )
        .branch(
            Update::filter_chat_join_request().endpoint({
                let app = app.clone();
                move |bot: Bot, req: ChatJoinRequest| {
                    let app = app.clone();
                    async move { on_join_request(bot, req, &app).await }
                }
            })
        );

    // апдейты приходят из webhook::router; поток кончается, когда сервер остановлен
    let listener = webhook::update_listener(updates);

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;
}

async fn on_command(bot: Bot, msg: Message, cmd: Command, app: &App) -> ResponseResult<()> {
    let Some(user) = msg.chat.id.as_user() else { return Ok(()); };
    match cmd {
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
        }
        Command::Start if app.is_admin(user) => {
            app.users.register(user).await.map_err(to_req_err)?;
            app.sessions.apply(user, AdminInput::Cancel).await;
            bot.send_message(msg.chat.id, "🎮 Добро пожаловать в админ-панель!")
                .reply_markup(admin_menu())
                .await?;
        }
        Command::Start => {
            if ensure_access(&bot, msg.chat.id, user, app).await? {
                bot.send_message(msg.chat.id, "🎬 Привет! Напиши номер фильма и получи его.")
                    .reply_markup(main_menu())
                    .await?;
            }
        }
        Command::Cancel if app.is_admin(user) => {
            let effect = app.sessions.apply(user, AdminInput::Cancel).await;
            apply_admin_effect(&bot, msg.chat.id, effect, app).await?;
        }
        Command::Cancel => {
            bot.send_message(msg.chat.id, "Нечего отменять.").await?;
        }
    }
    Ok(())
}

/* ====== Обычные сообщения ====== */
async fn on_message(bot: Bot, msg: Message, app: &App) -> ResponseResult<()> {
    let Some(user) = msg.chat.id.as_user() else { return Ok(()); };

    if app.is_admin(user) {
        let input = if let Some(video) = msg.video() {
            AdminInput::Video { file_ref: video.file.id.0.clone() }
        } else if let Some(text) = msg.text() {
            match MenuAction::from_label(text) {
                Some(action) => AdminInput::Menu(action),
                None => AdminInput::Text(text.to_string()),
            }
        } else {
            return Ok(());
        };
        let effect = app.sessions.apply(user, input).await;
        return apply_admin_effect(&bot, msg.chat.id, effect, app).await;
    }

    if msg.video().is_some() {
        bot.send_message(msg.chat.id, "🚫 Загружать фильмы может только админ!").await?;
        return Ok(());
    }
    let Some(text) = msg.text() else { return Ok(()); };

    if !ensure_access(&bot, msg.chat.id, user, app).await? {
        return Ok(());
    }
    if text.trim() == FIND_MOVIE {
        bot.send_message(msg.chat.id, "🔢 Введите номер фильма:").await?;
        return Ok(());
    }

    let Ok(id) = text.trim().parse::<u64>() else {
        debug!(user = user.0, text, "not a movie number");
        bot.send_message(msg.chat.id, "🔢 Пожалуйста, введите только номер фильма!").await?;
        return Ok(());
    };
    match app.catalog.get_movie(id).await {
        Some(movie) => {
            bot.send_video(msg.chat.id, InputFile::file_id(FileId(movie.file_reference.clone())))
                .caption(format!("🎬 {}", movie.name))
                .await?;
            info!(user = user.0, movie = id, "movie delivered");
        }
        None => {
            bot.send_message(msg.chat.id, "🚫 Такой фильм не найден.").await?;
        }
    }
    Ok(())
}

/// true — доступ есть. Иначе пользователю уже отправлен список каналов.
async fn ensure_access(bot: &Bot, chat: ChatId, user: UserId, app: &App) -> ResponseResult<bool> {
    let allowed = app.check_access(user).await.map_err(to_req_err)?;
    if !allowed {
        let (text, kb) = subscribe_prompt(&app.channels.list_channels().await);
        bot.send_message(chat, text).reply_markup(kb).await?;
    }
    Ok(allowed)
}

/* ====== Действия админа ====== */
async fn apply_admin_effect(bot: &Bot, chat: ChatId, effect: Effect, app: &App) -> ResponseResult<()> {
    match effect {
        Effect::AskVideo => {
            bot.send_message(chat, "🎥 Пришлите видеофайл или перешлите его из другого чата:").await?;
        }
        Effect::AskName => {
            bot.send_message(chat, "📽 Введите название фильма:")
                .reply_markup(ForceReply::new())
                .await?;
        }
        Effect::AskMovieId => {
            bot.send_message(chat, "🗑 Введите номер фильма для удаления:")
                .reply_markup(ForceReply::new())
                .await?;
        }
        Effect::AskChannel => {
            bot.send_message(
                chat,
                "📢 Введите username канала (например, MyChannel) или id (-1001234567890):",
            )
            .reply_markup(ForceReply::new())
            .await?;
        }
        Effect::AddMovie { name, file_ref } => {
            let id = app.catalog.add_movie(&name, &file_ref).await.map_err(to_req_err)?;
            info!(movie = id, name = %name, "movie added");
            bot.send_message(chat, format!("✅ Фильм добавлен: ID {id} - {name}")).await?;
        }
        Effect::DeleteMovie(id) => {
            if app.catalog.delete_movie(id).await.map_err(to_req_err)? {
                info!(movie = id, "movie deleted");
                bot.send_message(chat, format!("✅ Фильм {id} удалён.")).await?;
            } else {
                bot.send_message(chat, format!("🚫 Фильма с номером {id} нет.")).await?;
            }
        }
        Effect::AddChannel(channel) => {
            if app.channels.add_channel(&channel).await.map_err(to_req_err)? {
                info!(channel = %channel, "channel added");
                bot.send_message(chat, format!("✅ Канал добавлен: {channel}")).await?;
            } else {
                bot.send_message(chat, format!("Канал {channel} уже в списке.")).await?;
            }
        }
        Effect::ShowMovies => {
            let text = movie_list_text(&app.catalog.list_movies().await);
            for part in split_by_chars(&text, MESSAGE_LIMIT) {
                bot.send_message(chat, part).await?;
            }
        }
        Effect::ShowChannelPicker => {
            let channels = app.channels.list_channels().await;
            match channel_picker(&channels) {
                Some(kb) => {
                    bot.send_message(chat, "🗑 Какой канал удалить?").reply_markup(kb).await?;
                }
                None => {
                    bot.send_message(chat, "Каналов нет.").await?;
                }
            }
        }
        Effect::ShowStats => {
            let stats = app.users.stats().await;
            bot.send_message(
                chat,
                format!(
                    "👥 Пользователей: {}\n✅ Подписаны (по последней проверке): {}",
                    stats.total, stats.subscribed
                ),
            )
            .await?;
        }
        Effect::ShowMainMenu => {
            bot.send_message(chat, "🏠 Вы вернулись в главное меню").reply_markup(main_menu()).await?;
        }
        Effect::Cancelled => {
            bot.send_message(chat, "Отменено.").reply_markup(admin_menu()).await?;
        }
        Effect::NotANumber => {
            bot.send_message(chat, "🚫 Введите только число!").await?;
        }
        Effect::BadChannel => {
            bot.send_message(
                chat,
                "🚫 Не похоже на канал. Пример: MyChannel, @MyChannel или -1001234567890",
            )
            .await?;
        }
        Effect::EmptyName => {
            bot.send_message(chat, "Название не может быть пустым, введите ещё раз:").await?;
        }
        Effect::Unrecognized => {
            bot.send_message(chat, "Выберите действие в меню.").reply_markup(admin_menu()).await?;
        }
    }
    Ok(())
}

/* ====== Callback-кнопки ======
   check_sub        — перепроверить подписку
   delch:<канал>    — удалить канал (только админ) */
#[derive(Debug, PartialEq, Eq)]
enum CallbackAction {
    CheckSubscription,
    DeleteChannel(String),
    Unknown,
}

fn parse_callback(data: &str) -> CallbackAction {
    if data == CHECK_SUB {
        CallbackAction::CheckSubscription
    } else if let Some(channel) = data.strip_prefix(DELETE_CHANNEL_PREFIX).filter(|c| !c.is_empty()) {
        CallbackAction::DeleteChannel(channel.to_string())
    } else {
        CallbackAction::Unknown
    }
}

async fn on_callback(bot: Bot, q: CallbackQuery, app: &App) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else { return Ok(()); };
    let user = q.from.id;
    let target = q.message.as_ref().map(|m| (m.chat().id, m.id()));

    match parse_callback(&data) {
        CallbackAction::CheckSubscription => {
            let allowed = app.check_access(user).await.map_err(to_req_err)?;
            if allowed {
                answer_cb(&bot, &q, "Готово!").await?;
                if let Some((chat, message)) = target {
                    let edit = bot
                        .edit_message_text(
                            chat,
                            message,
                            "✅ Вы подписались на все каналы или отправили заявку! Теперь введите номер фильма:",
                        )
                        .await;
                    ignore_not_modified(edit)?;
                }
                bot.send_message(ChatId::from(user), "🎬 Введите номер фильма:")
                    .reply_markup(main_menu())
                    .await?;
            } else {
                answer_cb(&bot, &q, "Подписка ещё не оформлена").await?;
                if let Some((chat, message)) = target {
                    let (text, kb) = subscribe_prompt(&app.channels.list_channels().await);
                    let edit = bot.edit_message_text(chat, message, text).reply_markup(kb).await;
                    ignore_not_modified(edit)?;
                }
            }
        }
        CallbackAction::DeleteChannel(channel) if app.is_admin(user) => {
            if app.channels.remove_channel(&channel).await.map_err(to_req_err)? {
                info!(channel = %channel, "channel removed");
                answer_cb(&bot, &q, &format!("Канал {channel} удалён")).await?;
            } else {
                answer_cb(&bot, &q, "Этого канала уже нет").await?;
            }
            if let Some((chat, message)) = target {
                let channels = app.channels.list_channels().await;
                let edit = match channel_picker(&channels) {
                    Some(kb) => bot.edit_message_text(chat, message, "🗑 Какой канал удалить?").reply_markup(kb).await,
                    None => bot.edit_message_text(chat, message, "Каналов больше нет.").await,
                };
                ignore_not_modified(edit)?;
            }
        }
        CallbackAction::DeleteChannel(_) => {
            answer_cb(&bot, &q, "🚫 Только для админа").await?;
        }
        CallbackAction::Unknown => {
            answer_cb(&bot, &q, "Неизвестная команда").await?;
        }
    }
    Ok(())
}

/* ====== Заявки на вступление в канал ====== */
async fn on_join_request(bot: Bot, req: ChatJoinRequest, app: &App) -> ResponseResult<()> {
    let channel = channels::join_request_key(req.chat.username(), req.chat.id.0);
    app.pending.record(req.from.id, &channel).await.map_err(to_req_err)?;

    let sent = bot
        .send_message(
            ChatId::from(req.from.id),
            format!(
                "📢 Ваша заявка в {channel} принята. Дождитесь одобрения админом или, если вы уже участник, пользуйтесь ботом."
            ),
        )
        .await;
    // пользователь мог ни разу не писать боту — это не ошибка
    if let Err(e) = sent {
        warn!(user = req.from.id.0, channel = %channel, error = %e, "could not notify about join request");
    }
    Ok(())
}

/* ====== Кнопки ====== */

fn admin_menu() -> KeyboardMarkup {
    let row = |actions: &[MenuAction]| -> Vec<KeyboardButton> {
        actions.iter().map(|a| KeyboardButton::new(a.label())).collect()
    };
    KeyboardMarkup::new(vec![
        row(&[MenuAction::AddMovie, MenuAction::DeleteMovie]),
        row(&[MenuAction::ListMovies, MenuAction::AddChannel, MenuAction::DeleteChannel]),
        row(&[MenuAction::Stats, MenuAction::Back]),
    ])
    .resize_keyboard()
}

fn main_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(FIND_MOVIE)]]).resize_keyboard()
}

/// Текст и клавиатура «подпишитесь на каналы». Для username-каналов — кнопка-ссылка,
/// числовые id ссылки не имеют и просто перечислены в тексте.
fn subscribe_prompt(channels: &[String]) -> (String, InlineKeyboardMarkup) {
    let mut text = String::from("📢 Чтобы пользоваться ботом, подпишитесь на каналы ниже");
    let mut rows = Vec::new();
    for (i, ch) in channels.iter().enumerate() {
        let label = format!("{}-й канал", i + 1);
        let link = ch
            .strip_prefix('@')
            .and_then(|name| url::Url::parse(&format!("https://t.me/{name}")).ok());
        match link {
            Some(url) => rows.push(vec![InlineKeyboardButton::url(format!("Подписаться ({label})"), url)]),
            None => text.push_str(&format!("\n• {label}: {ch}")),
        }
    }
    rows.push(vec![InlineKeyboardButton::callback("✅ Проверить подписку", CHECK_SUB)]);
    (text, InlineKeyboardMarkup::new(rows))
}

/// Выбор канала для удаления: в callback лежит сам идентификатор, а не номер в списке.
fn channel_picker(channels: &[String]) -> Option<InlineKeyboardMarkup> {
    if channels.is_empty() {
        return None;
    }
    let rows = channels
        .iter()
        .map(|ch| {
            vec![InlineKeyboardButton::callback(
                format!("🗑 {ch}"),
                format!("{DELETE_CHANNEL_PREFIX}{ch}"),
            )]
        })
        .collect::<Vec<_>>();
    Some(InlineKeyboardMarkup::new(rows))
}

/* ====== Вспомогательные ====== */

fn movie_list_text(movies: &[(u64, String)]) -> String {
    if movies.is_empty() {
        return "Фильмов нет.".to_string();
    }
    let lines: Vec<String> = movies.iter().map(|(id, name)| format!("{id}: {name}")).collect();
    format!("🎬 Список фильмов:\n{}", lines.join("\n"))
}

fn split_by_chars(s: &str, max: usize) -> Vec<String> {
    if s.chars().count() <= max { return vec![s.to_string()]; }
    let mut out = Vec::new();
    let mut cur = String::new();
    for line in s.split_inclusive('\n') {
        if !cur.is_empty() && cur.chars().count() + line.chars().count() > max {
            out.push(std::mem::take(&mut cur));
        }
        // строка длиннее лимита — режем посимвольно
        for ch in line.chars() {
            if cur.chars().count() >= max { out.push(std::mem::take(&mut cur)); }
            cur.push(ch);
        }
    }
    if !cur.is_empty() { out.push(cur); }
    out
}

async fn answer_cb(bot: &Bot, q: &CallbackQuery, text: &str) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone())
        .text(text)
        .show_alert(false)
        .await?;
    Ok(())
}

// повторная проверка часто даёт тот же текст — Telegram отвечает «message is not modified»
fn ignore_not_modified<T>(res: ResponseResult<T>) -> ResponseResult<()> {
    match res {
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn to_req_err<E: std::fmt::Display>(e: E) -> RequestError {
    RequestError::Io(std::sync::Arc::new(std::io::Error::other(e.to_string())))
}
