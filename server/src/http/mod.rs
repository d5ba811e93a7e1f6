mod dto;
mod error;
mod handlers;
mod server;
mod state;


pub use dto::{DataResponse, HeartbeatResponse, HelloResponse};
pub use error::{ApiError, ApiResult};
pub use handlers::{NEXT_PAGE, TOTAL_RECORDS};
pub use server::{build_router, serve, start_server};
pub use state::AppState;
