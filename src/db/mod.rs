mod repository;
mod schema;

pub use repository::{EntityTables, Repository};
