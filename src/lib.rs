pub mod config;
pub mod conversations;
pub mod error;
pub mod presence;
pub mod relay;

use axum::{Router, extract::FromRef, http::Method};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use relay::Relay;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: Relay,
}

/// The whole HTTP surface: the relay's websocket endpoint, with permissive CORS.
pub fn app(relay: Relay) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .merge(relay::router())
        .with_state(AppState { relay })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
