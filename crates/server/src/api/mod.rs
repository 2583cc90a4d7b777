pub mod balance;
pub mod batches;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod orders;
pub mod routes;

pub use error::ApiError;
pub use routes::create_router;
