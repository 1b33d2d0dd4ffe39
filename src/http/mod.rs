//! HTTP surface: routes, auth middleware and error responses

pub mod middleware;
pub mod routes;

pub use routes::build_router;
