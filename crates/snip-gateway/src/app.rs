use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    create_url_handler, delete_url_handler, get_url_handler, health_handler, list_urls_handler,
    redirect_handler, update_url_handler, validate_url_handler,
};
use crate::state::AppState;

pub struct App {}

impl App {
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .nest(
                "/api/v1",
                Router::new()
                    .route("/urls", post(create_url_handler))
                    .route("/urls/validate", post(validate_url_handler))
                    .route(
                        "/urls/{short_code}",
                        get(get_url_handler)
                            .patch(update_url_handler)
                            .delete(delete_url_handler),
                    )
                    .route("/users/{owner_id}/urls", get(list_urls_handler)),
            )
            .route("/{short_code}", get(redirect_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
