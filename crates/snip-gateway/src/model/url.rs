use serde::{Deserialize, Serialize};
use snip_core::{ShortCode, UrlResponse};

#[derive(Debug, Deserialize)]
pub struct ValidateUrlRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateUrlResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUrlsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListUrlsResponse {
    pub urls: Vec<UrlResponse>,
    pub limit: i64,
    pub offset: i64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUrlResponse {
    pub short_code: ShortCode,
    pub deleted: bool,
}
