pub mod dto;
pub mod handlers;
mod repo;
pub mod repo_types;
pub mod services;
pub mod store;

pub use handlers::router;
pub use repo_types::{NewProduct, Product};
pub use store::{PgProductStore, ProductStore};
