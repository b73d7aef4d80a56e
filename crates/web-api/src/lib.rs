//! Web API 层。
//!
//! 提供 Axum 路由，将操作式 HTTP 请求委托给应用层的用例服务。

mod auth;
mod error;
mod routes;
mod state;

pub use auth::{authenticate, client_origin, AuthenticatedUser, USERNAME_HEADER};
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
