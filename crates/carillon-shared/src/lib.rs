// Types shared by the transport, the store and the client session.

pub mod constants;
pub mod credentials;
pub mod error;
pub mod protocol;
pub mod types;

pub use credentials::{CredentialSource, SharedCredentials, StaticCredentials};
pub use error::{DeliveryError, FrameError, NetError, RoutingError};
pub use protocol::{DevisEvent, MessageEvent, Notification, NotificationKind};
pub use types::{ConnectionState, Credentials, NotificationId, UserId};
