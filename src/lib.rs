pub mod error;
pub mod model;
pub mod hierarchy;
pub mod security;
pub mod locks;
pub mod fulltext;
pub mod kv;
pub mod sql;
pub mod config;
pub mod repository;

pub use error::{AppError, AppResult};
pub use model::{Lock, Node, NodeId};
pub use repository::{Repository, Subject};
