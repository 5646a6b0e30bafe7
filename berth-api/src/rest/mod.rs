pub mod handlers;
pub mod routes;
pub mod types;

pub use handlers::{ApiError, AppState, PROJECT_HEADER, USER_HEADER};
pub use routes::{ApiDoc, create_router};
