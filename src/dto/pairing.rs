use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Freshly issued pairing code.
#[derive(Debug, Serialize, ToSchema)]
pub struct PartnerCodeResponse {
    pub code: String,
}

/// Code typed by the user; trimmed and upper-cased before lookup.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RedeemCodeRequest {
    #[validate(length(min = 1, max = 16))]
    pub code: String,
}
