//! HTTP API module.
//!
//! REST endpoints for prompts, questions, sessions and chat browsing,
//! plus the websocket streaming edge.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
