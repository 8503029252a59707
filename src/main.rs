mod catalog;
mod channels;
mod config;
mod gate;
mod pending;
mod session;
mod storage;
mod tg;
mod users;
mod webhook;

use dotenvy::dotenv;
use std::{net::SocketAddr, sync::Arc};
use teloxide::{prelude::*, types::UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    let bot = Bot::new(config.bot_token.clone());

    // все JSON-файлы лежат в DATA_DIR
    let dir = config.data_dir.as_path();
    let users = users::Users::open(dir).await?;
    let catalog = catalog::Catalog::open(dir).await?;
    let channels = channels::ChannelRegistry::open(dir).await?;
    let pending = pending::PendingRequests::open(dir).await?;

    let gate = gate::SubscriptionGate::new(
        channels.clone(),
        pending.clone(),
        Arc::new(gate::TelegramMembership::new(bot.clone())),
        config.gate_policy,
    );
    let app = tg::App {
        admin: UserId(config.admin_id),
        users,
        catalog,
        channels,
        pending,
        gate,
        sessions: session::AdminSessions::new(config.session_timeout),
    };

    let (tx, updates) = webhook::update_channel();
    let router = webhook::router(&config.webhook_path(), tx);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, policy = ?config.gate_policy, "listening for webhook updates");

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
    });

    // сервер уже слушает, теперь можно говорить Telegram, куда слать апдейты
    webhook::register(&bot, &config.webhook_url()?).await?;

    tg::run(bot, app, updates).await;
    server.await??;
    Ok(())
}
