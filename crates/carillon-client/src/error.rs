use thiserror::Error;

use carillon_shared::error::{DeliveryError, NetError};
use carillon_shared::types::UserId;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No credentials available")]
    NotAuthenticated,

    #[error("Session belongs to user {session}, credentials now name user {current}")]
    IdentityChanged { session: UserId, current: UserId },

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Store error: {0}")]
    Store(#[from] carillon_store::StoreError),
}
