pub mod recommendations;
pub mod sqlite;

pub use recommendations::{RecommendationStore, SqliteRecommendationStore};
pub use sqlite::{create_pool, run_migrations};

#[cfg(test)]
pub use recommendations::MockRecommendationStore;
