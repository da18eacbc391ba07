use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use carillon_client::{
    credentials_from_env, init_tracing, ClientConfig, RestNotificationApi, Session, SessionEvent,
};
use carillon_net::{Connector, MemoryConnector, WebSocketConnector};
use carillon_shared::constants::APP_NAME;
use carillon_shared::credentials::StaticCredentials;
use carillon_shared::protocol::{Notification, NotificationKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    info!(
        broker = %config.broker_url,
        api = %config.api_url,
        "Starting {APP_NAME}"
    );

    let credentials = credentials_from_env()
        .context("CARILLON_USER_ID and CARILLON_TOKEN must be set")?;
    let credentials = Arc::new(StaticCredentials::new(credentials));
    let api = Arc::new(
        RestNotificationApi::new(&config.api_url, credentials.clone())
            .context("Failed to build REST client")?,
    );

    let connector: Arc<dyn Connector> = if config.is_offline() {
        let memory = MemoryConnector::new();
        let _loopback = memory.spawn_loopback();
        info!("Offline mode, using the in-process loopback broker");
        Arc::new(memory)
    } else {
        Arc::new(WebSocketConnector::new())
    };

    let session = Session::start(&config, connector, credentials, api)
        .await
        .context("Failed to start session")?;
    let mut events = session.events();

    let feed = session.mount("dashboard");
    match feed.refresh().await {
        Ok(summary) => info!(
            loaded = summary.inserted,
            unread = feed.unread_count(),
            "Dashboard loaded"
        ),
        Err(e) => warn!(error = %e, "Snapshot unavailable, showing live events only"),
    }

    if config.is_offline() {
        let greeting = Notification::local(
            NotificationKind::System,
            session.user_id(),
            "Offline mode",
            "Notifications you send to yourself are echoed back",
        );
        match session.notify_user(&greeting).await {
            Ok(delivery) => info!(delivery = ?delivery, "Loopback greeting sent"),
            Err(e) => warn!(error = %e, "Loopback greeting failed"),
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Alert { title, body, link }) => {
                    info!(title = %title, body = %body, link = ?link, "New notification");
                }
                Ok(SessionEvent::Offline { attempts }) => {
                    warn!(attempts, "Offline; restart or wait for a manual reconnect");
                }
                Ok(event) => info!(event = event.name(), "{event:?}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}
