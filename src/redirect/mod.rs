pub mod handlers;
pub mod resolver;
pub mod routes;

pub use handlers::RedirectState;
pub use resolver::{RedirectResolver, Resolution, Visitor};
pub use routes::create_redirect_router;
