pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use api::{ApiError, NotificationApi, RestNotificationApi};
pub use config::{credentials_from_env, ClientConfig};
pub use error::ClientError;
pub use events::SessionEvent;
pub use feed::{Feed, NotificationFeed};
pub use session::Session;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("carillon_client=debug,carillon_net=debug,carillon_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
