mod health;
mod url;

pub use health::HealthResponse;
pub use url::{
    DeleteUrlResponse, ListUrlsQuery, ListUrlsResponse, ValidateUrlRequest, ValidateUrlResponse,
};
pub use snip_core::{CreateUrlRequest, UpdateUrlRequest, UrlResponse};
