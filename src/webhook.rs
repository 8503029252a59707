use axum::{body::Bytes, extract::State, http::StatusCode, routing::get, Router};
use std::convert::Infallible;
use teloxide::{
    prelude::*,
    stop::{mk_stop_token, StopToken},
    types::{AllowedUpdate, Update},
    update_listeners::{StatefulListener, UpdateListener},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};
use url::Url;

pub const ALIVE: &str = "🎬 Кино-бот работает! Вебхук активен.";

pub type UpdateSender = mpsc::UnboundedSender<Result<Update, Infallible>>;
pub type UpdateStream = UnboundedReceiverStream<Result<Update, Infallible>>;

/// Канал между HTTP-ручкой и диспетчером teloxide.
/// Когда сервер останавливается и отправитель дропается, поток апдейтов заканчивается.
pub fn update_channel() -> (UpdateSender, UpdateStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx))
}

/// Слушатель для `dispatch_with_listener`. Остановкой управляет axum-сервер:
/// поток кончается вместе с отправителем, поэтому стоп-токен ни к чему не привязан.
pub fn update_listener(updates: UpdateStream) -> impl UpdateListener<Err = Infallible> + Send {
    fn as_stream(s: &mut UpdateStream) -> &mut UpdateStream {
        s
    }
    fn stop_token(_: &mut UpdateStream) -> StopToken {
        mk_stop_token().0
    }
    StatefulListener::new(updates, as_stream, stop_token)
}

#[derive(Clone)]
struct WebhookState {
    updates: UpdateSender,
}

/// `GET /`, `GET <path>` — проверка живости; `POST <path>` — апдейт от Telegram.
pub fn router(path: &str, updates: UpdateSender) -> Router {
    Router::new()
        .route("/", get(alive))
        .route(path, get(alive).post(receive))
        .with_state(WebhookState { updates })
}

async fn alive() -> &'static str {
    ALIVE
}

async fn receive(State(state): State<WebhookState>, body: Bytes) -> (StatusCode, &'static str) {
    let update = match serde_json::from_slice::<Update>(&body) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "malformed update payload");
            return (StatusCode::BAD_REQUEST, "ERROR");
        }
    };
    if state.updates.send(Ok(update)).is_err() {
        error!("dispatcher is not running, update dropped");
        return (StatusCode::SERVICE_UNAVAILABLE, "ERROR");
    }
    (StatusCode::OK, "OK")
}

/// Переустанавливает вебхук и проверяет через getWebhookInfo, что Telegram его принял.
pub async fn register(bot: &Bot, url: &Url) -> anyhow::Result<()> {
    bot.delete_webhook().await?;
    bot.set_webhook(url.clone())
        .allowed_updates(vec![
            AllowedUpdate::Message,
            AllowedUpdate::CallbackQuery,
            AllowedUpdate::ChatJoinRequest,
        ])
        .await?;

    let info = bot.get_webhook_info().await?;
    if info.url.as_ref() != Some(url) {
        anyhow::bail!(
            "webhook was not accepted (pending updates: {}, last error: {:?})",
            info.pending_update_count,
            info.last_error_message
        );
    }
    // в url зашит токен, поэтому логируем только хост
    info!(host = url.host_str().unwrap_or_default(), "webhook registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use teloxide::update_listeners::AsUpdateStream;
    use tokio_stream::StreamExt;
    use tower::ServiceExt;

    const PATH: &str = "/123:ABC";
    const TEXT_UPDATE: &str = r#"{"update_id":892252934,"message":{"message_id":6557,"from":{"id":218485655,"is_bot":false,"first_name":"Waffle","username":"WaffleLapkin","language_code":"en"},"chat":{"id":218485655,"first_name":"Waffle","username":"WaffleLapkin","type":"private"},"date":1569518342,"text":"7"}}"#;

    async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn liveness_on_root_and_webhook_path() {
        let (tx, _rx) = update_channel();
        let app = router(PATH, tx);

        assert_eq!(call(app.clone(), "GET", "/", "").await, (StatusCode::OK, ALIVE.to_string()));
        assert_eq!(call(app, "GET", PATH, "").await, (StatusCode::OK, ALIVE.to_string()));
    }

    #[tokio::test]
    async fn update_is_forwarded_to_dispatcher() {
        let (tx, mut rx) = update_channel();
        let app = router(PATH, tx);

        let (status, body) = call(app, "POST", PATH, TEXT_UPDATE).await;

        assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));
        let update = rx.next().await.unwrap().unwrap();
        assert_eq!(update.chat().map(|c| c.id), Some(ChatId(218485655)));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (tx, _rx) = update_channel();
        let app = router(PATH, tx);

        let (status, _) = call(app, "POST", PATH, "{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let (tx, _rx) = update_channel();
        let app = router(PATH, tx);

        let (status, _) = call(app, "POST", "/wrong-token", "{}").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listener_yields_updates_until_sender_is_dropped() {
        let (tx, rx) = update_channel();
        let mut listener = update_listener(rx);
        let update: Update = serde_json::from_str(TEXT_UPDATE).unwrap();
        tx.send(Ok(update)).unwrap();
        drop(tx);

        let stream = listener.as_stream();
        tokio::pin!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id.0, 892252934);
        assert!(stream.next().await.is_none());
    }
}
