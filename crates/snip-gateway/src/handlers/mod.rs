mod health;
mod url;

pub use health::health_handler;
pub use url::{
    create_url_handler, delete_url_handler, get_url_handler, list_urls_handler, redirect_handler,
    update_url_handler, validate_url_handler,
};
