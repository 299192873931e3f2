use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::instrument;

use crate::{
    error::{AppError, AppResult},
    models::{
        NewRecommendation, Recommendation, RecommendationFilter, RecommendationPatch, MAX_DISLIKE,
    },
};

/// Persistence for recommendation rows
///
/// Handlers receive the store through application state, so every operation
/// here is a single statement and holds no state between calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Inserts a new row and returns it with its assigned id.
    ///
    /// Returns [`AppError::Conflict`] if a row with the same natural key exists,
    /// deleted or not.
    async fn create(&self, new: NewRecommendation) -> AppResult<Recommendation>;

    /// Point lookup that ignores the soft-delete flag
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Recommendation>>;

    /// Returns rows matching every supplied filter field, ordered by id.
    ///
    /// Soft-deleted rows are only part of the result when `include_deleted` is set.
    async fn find_by_attributes(
        &self,
        filter: RecommendationFilter,
        include_deleted: bool,
    ) -> AppResult<Vec<Recommendation>>;

    /// Find-or-create-or-undelete on the natural key.
    ///
    /// A live match comes back unchanged, a soft-deleted match is revived under
    /// its existing id, and otherwise a new row is inserted.
    async fn upsert_or_revive(&self, new: NewRecommendation) -> AppResult<Recommendation>;

    /// Replaces the fields present in `patch` and clears the delete flag.
    ///
    /// Returns `Ok(None)` when no row has this id.
    async fn update(
        &self,
        id: i64,
        patch: RecommendationPatch,
    ) -> AppResult<Option<Recommendation>>;

    /// Adds one to the dislike counter.
    ///
    /// Returns [`AppError::Conflict`] once the counter has reached [`MAX_DISLIKE`].
    async fn increment_dislike(&self, id: i64) -> AppResult<Option<Recommendation>>;

    /// Flags a live row as deleted; `false` if the row is absent or already deleted
    async fn soft_delete(&self, id: i64) -> AppResult<bool>;

    /// Physically removes every row and returns how many were purged
    async fn delete_all(&self) -> AppResult<u64>;

    /// Checks that storage answers queries
    async fn ping(&self) -> AppResult<()>;
}

/// [`RecommendationStore`] backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteRecommendationStore {
    pool: SqlitePool,
}

impl SqliteRecommendationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecommendationStore for SqliteRecommendationStore {
    #[instrument(skip(self), level = "debug")]
    async fn create(&self, new: NewRecommendation) -> AppResult<Recommendation> {
        let recommendation = sqlx::query_as::<_, Recommendation>(
            r#"
            INSERT INTO recommendations (product_origin, product_target, relation, dislike, is_deleted)
            VALUES (?, ?, ?, ?, 0)
            RETURNING id, product_origin, product_target, relation, dislike, is_deleted
            "#,
        )
        .bind(new.product_origin)
        .bind(new.product_target)
        .bind(new.relation.code())
        .bind(new.dislike)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from_write)?;

        tracing::info!(id = recommendation.id, "Recommendation created");
        Ok(recommendation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Recommendation>> {
        let recommendation = sqlx::query_as::<_, Recommendation>(
            r#"
            SELECT id, product_origin, product_target, relation, dislike, is_deleted
            FROM recommendations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recommendation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_by_attributes(
        &self,
        filter: RecommendationFilter,
        include_deleted: bool,
    ) -> AppResult<Vec<Recommendation>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, product_origin, product_target, relation, dislike, is_deleted \
             FROM recommendations WHERE 1 = 1",
        );

        // Zero ids count as "not supplied"
        if let Some(origin) = filter.product_origin.filter(|id| *id != 0) {
            query.push(" AND product_origin = ").push_bind(origin);
        }
        if let Some(target) = filter.product_target.filter(|id| *id != 0) {
            query.push(" AND product_target = ").push_bind(target);
        }
        if let Some(relation) = filter.relation {
            query.push(" AND relation = ").push_bind(relation.code());
        }
        if !include_deleted {
            query.push(" AND is_deleted = 0");
        }
        query.push(" ORDER BY id");

        let recommendations = query
            .build_query_as::<Recommendation>()
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(count = recommendations.len(), "Attribute lookup finished");
        Ok(recommendations)
    }

    #[instrument(skip(self), level = "debug")]
    async fn upsert_or_revive(&self, new: NewRecommendation) -> AppResult<Recommendation> {
        // One statement keeps concurrent creates of the same key from both inserting.
        let recommendation = sqlx::query_as::<_, Recommendation>(
            r#"
            INSERT INTO recommendations (product_origin, product_target, relation, dislike, is_deleted)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT (product_origin, product_target, relation)
            DO UPDATE SET is_deleted = 0
            RETURNING id, product_origin, product_target, relation, dislike, is_deleted
            "#,
        )
        .bind(new.product_origin)
        .bind(new.product_target)
        .bind(new.relation.code())
        .bind(new.dislike)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(id = recommendation.id, "Recommendation upserted");
        Ok(recommendation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn update(
        &self,
        id: i64,
        patch: RecommendationPatch,
    ) -> AppResult<Option<Recommendation>> {
        let recommendation = sqlx::query_as::<_, Recommendation>(
            r#"
            UPDATE recommendations
            SET product_origin = COALESCE(?, product_origin),
                product_target = COALESCE(?, product_target),
                relation = COALESCE(?, relation),
                dislike = COALESCE(?, dislike),
                is_deleted = 0
            WHERE id = ?
            RETURNING id, product_origin, product_target, relation, dislike, is_deleted
            "#,
        )
        .bind(patch.product_origin)
        .bind(patch.product_target)
        .bind(patch.relation.map(|r| r.code()))
        .bind(patch.dislike)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from_write)?;

        if recommendation.is_some() {
            tracing::info!(id, "Recommendation updated");
        }
        Ok(recommendation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn increment_dislike(&self, id: i64) -> AppResult<Option<Recommendation>> {
        let recommendation = sqlx::query_as::<_, Recommendation>(
            r#"
            UPDATE recommendations
            SET dislike = dislike + 1
            WHERE id = ? AND dislike < ?
            RETURNING id, product_origin, product_target, relation, dislike, is_deleted
            "#,
        )
        .bind(id)
        .bind(MAX_DISLIKE)
        .fetch_optional(&self.pool)
        .await?;

        if recommendation.is_none() && self.find_by_id(id).await?.is_some() {
            tracing::warn!(id, "Dislike counter already at its limit");
            return Err(AppError::Conflict(format!(
                "dislike counter of recommendation '{}' is already at its limit of {}",
                id, MAX_DISLIKE
            )));
        }

        Ok(recommendation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn soft_delete(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recommendations
            SET is_deleted = 1
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_all(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM recommendations")
            .execute(&self.pool)
            .await?;

        tracing::warn!(purged = result.rows_affected(), "All recommendations purged");
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};
    use crate::models::Relation;
    use tokio_test::{assert_err, assert_ok};

    async fn create_test_store() -> SqliteRecommendationStore {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteRecommendationStore::new(pool)
    }

    fn new_rec(origin: i64, target: i64, relation: Relation) -> NewRecommendation {
        NewRecommendation::new(origin, target, relation)
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = create_test_store().await;

        let first = assert_ok!(store.create(new_rec(1, 2, Relation::CrossSell)).await);
        let second = assert_ok!(store.create(new_rec(1, 3, Relation::CrossSell)).await);

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.dislike, 0);
        assert!(!first.is_deleted);
    }

    #[tokio::test]
    async fn test_create_duplicate_key_conflicts() {
        let store = create_test_store().await;
        assert_ok!(store.create(new_rec(1, 2, Relation::UpSell)).await);

        let err = assert_err!(store.create(new_rec(1, 2, Relation::UpSell)).await);
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let store = create_test_store().await;
        store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        let second = store.create(new_rec(1, 3, Relation::CrossSell)).await.unwrap();
        store.create(new_rec(1, 4, Relation::CrossSell)).await.unwrap();

        let found = store.find_by_id(second.id).await.unwrap();
        assert_eq!(found, Some(second));
        assert_eq!(store.find_by_id(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_by_id_returns_deleted_rows() {
        let store = create_test_store().await;
        let rec = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        assert!(store.soft_delete(rec.id).await.unwrap());

        let found = store.find_by_id(rec.id).await.unwrap().unwrap();
        assert!(found.is_deleted);
    }

    #[tokio::test]
    async fn test_find_by_attributes() {
        let store = create_test_store().await;
        let first = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        store.create(new_rec(1, 3, Relation::CrossSell)).await.unwrap();
        store.create(new_rec(1, 4, Relation::Accessory)).await.unwrap();
        store.create(new_rec(5, 2, Relation::CrossSell)).await.unwrap();

        let exact = store
            .find_by_attributes(
                RecommendationFilter {
                    product_origin: Some(1),
                    product_target: Some(2),
                    relation: Some(Relation::CrossSell),
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(exact, vec![first]);

        let by_origin = store
            .find_by_attributes(
                RecommendationFilter {
                    product_origin: Some(1),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(by_origin.len(), 3);

        let by_origin_and_relation = store
            .find_by_attributes(
                RecommendationFilter {
                    product_origin: Some(1),
                    relation: Some(Relation::CrossSell),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(by_origin_and_relation.len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_attributes_zero_means_unfiltered() {
        let store = create_test_store().await;
        store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        store.create(new_rec(3, 4, Relation::UpSell)).await.unwrap();

        let all = store
            .find_by_attributes(
                RecommendationFilter {
                    product_origin: Some(0),
                    product_target: Some(0),
                    relation: None,
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_attributes_include_deleted() {
        let store = create_test_store().await;
        let live = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        let gone = store.create(new_rec(1, 3, Relation::CrossSell)).await.unwrap();
        store.soft_delete(gone.id).await.unwrap();

        let filter = RecommendationFilter {
            product_origin: Some(1),
            ..Default::default()
        };

        let visible = store.find_by_attributes(filter, false).await.unwrap();
        assert_eq!(visible, vec![live]);

        let everything = store.find_by_attributes(filter, true).await.unwrap();
        assert_eq!(everything.len(), 2);
        assert!(everything[1].is_deleted);
    }

    #[tokio::test]
    async fn test_upsert_or_revive() {
        let store = create_test_store().await;

        let created = store.upsert_or_revive(new_rec(3, 4, Relation::CrossSell)).await.unwrap();
        let again = store.upsert_or_revive(new_rec(3, 4, Relation::CrossSell)).await.unwrap();
        assert_eq!(created, again);

        store.increment_dislike(created.id).await.unwrap();
        store.soft_delete(created.id).await.unwrap();

        let revived = store.upsert_or_revive(new_rec(3, 4, Relation::CrossSell)).await.unwrap();
        assert_eq!(revived.id, created.id);
        assert!(!revived.is_deleted);
        assert_eq!(revived.dislike, 1);

        let rows = store
            .find_by_attributes(RecommendationFilter::default(), true)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_update_partial_fields() {
        let store = create_test_store().await;
        let rec = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();

        let patch = RecommendationPatch {
            relation: Some(Relation::UpSell),
            ..Default::default()
        };
        let updated = store.update(rec.id, patch).await.unwrap().unwrap();

        assert_eq!(updated.id, rec.id);
        assert_eq!(updated.product_origin, 1);
        assert_eq!(updated.product_target, 2);
        assert_eq!(updated.relation, Relation::UpSell);
    }

    #[tokio::test]
    async fn test_update_clears_delete_flag() {
        let store = create_test_store().await;
        let rec = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        store.soft_delete(rec.id).await.unwrap();

        let updated = store
            .update(rec.id, RecommendationPatch::default())
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_deleted);
    }

    #[tokio::test]
    async fn test_update_missing_and_conflicting() {
        let store = create_test_store().await;
        store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        let other = store.create(new_rec(1, 3, Relation::CrossSell)).await.unwrap();

        assert_eq!(store.update(99, RecommendationPatch::default()).await.unwrap(), None);

        let clash = RecommendationPatch {
            product_target: Some(2),
            ..Default::default()
        };
        let err = assert_err!(store.update(other.id, clash).await);
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_increment_dislike() {
        let store = create_test_store().await;
        let rec = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();

        for expected in 1..=3 {
            let updated = store.increment_dislike(rec.id).await.unwrap().unwrap();
            assert_eq!(updated.dislike, expected);
        }
        assert_eq!(store.increment_dislike(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_dislike_stops_at_limit() {
        let store = create_test_store().await;
        let mut new = new_rec(1, 2, Relation::CrossSell);
        new.dislike = MAX_DISLIKE - 1;
        let rec = store.create(new).await.unwrap();

        let updated = store.increment_dislike(rec.id).await.unwrap().unwrap();
        assert_eq!(updated.dislike, MAX_DISLIKE);

        let err = assert_err!(store.increment_dislike(rec.id).await);
        assert!(matches!(err, AppError::Conflict(_)));

        // The row and the listing stay readable
        let stored = store.find_by_id(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.dislike, MAX_DISLIKE);
        let listed = assert_ok!(
            store
                .find_by_attributes(RecommendationFilter::default(), false)
                .await
        );
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_one_row_per_key() {
        let path = std::env::temp_dir().join(format!("recommendations-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        let pool = create_pool(&url, 5).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqliteRecommendationStore::new(pool.clone());

        let keys = [
            (1, 2, Relation::CrossSell),
            (1, 3, Relation::UpSell),
            (4, 2, Relation::Accessory),
        ];
        let mut tasks = Vec::new();
        for i in 0..60 {
            let store = store.clone();
            let (origin, target, relation) = keys[i % keys.len()];
            tasks.push(tokio::spawn(async move {
                store.upsert_or_revive(new_rec(origin, target, relation)).await
            }));
        }

        let mut ids = std::collections::HashMap::new();
        for (i, task) in tasks.into_iter().enumerate() {
            let rec = task.await.unwrap().unwrap();
            let first = *ids.entry(i % keys.len()).or_insert(rec.id);
            assert_eq!(rec.id, first);
            assert!(!rec.is_deleted);
        }

        let rows = store
            .find_by_attributes(RecommendationFilter::default(), true)
            .await
            .unwrap();
        assert_eq!(rows.len(), keys.len());

        pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = create_test_store().await;
        let rec = store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();

        assert!(store.soft_delete(rec.id).await.unwrap());
        assert!(!store.soft_delete(rec.id).await.unwrap());
        assert!(!store.soft_delete(99).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let store = create_test_store().await;
        store.create(new_rec(1, 2, Relation::CrossSell)).await.unwrap();
        let gone = store.create(new_rec(1, 3, Relation::CrossSell)).await.unwrap();
        store.soft_delete(gone.id).await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert!(store
            .find_by_attributes(RecommendationFilter::default(), true)
            .await
            .unwrap()
            .is_empty());
        assert_ok!(store.ping().await);
    }
}
