//! PostgreSQL datastore.
//!
//! Documents are stored in their special-type encoded form as JSONB, keyed by
//! `(store, namespace, key)`. The `store` column lets the document store and
//! the change log share one database without seeing each other's namespaces.

use async_trait::async_trait;
use docsync_engine::{codec, DocId, Document, Namespace, OperationSet, Version};
use futures::TryStreamExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{Datastore, DocumentSink, HandleCache, NamespaceSummary};
use crate::error::{SyncError, SyncResult};

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// A stored document row.
#[derive(Debug)]
struct StoredDocument {
    key: String,
    version: Option<i64>,
    body: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            key: row.try_get("key")?,
            version: row.try_get("version")?,
            body: row.try_get("body")?,
        })
    }
}

impl StoredDocument {
    fn to_document(&self) -> SyncResult<Document> {
        Ok(codec::decode_document(self.body.clone())?)
    }
}

/// Datastore backed by PostgreSQL.
#[derive(Debug)]
pub struct PgDatastore {
    pool: Pool,
    scope: String,
    /// Namespaces already registered by this process.
    registered: HandleCache<Namespace>,
}

impl PgDatastore {
    pub fn new(pool: Pool, scope: impl Into<String>) -> Self {
        Self {
            pool,
            scope: scope.into(),
            registered: HandleCache::new(),
        }
    }

    /// Make sure `namespace` exists in the registry before writing into it.
    async fn register(&self, namespace: &str) -> SyncResult<()> {
        self.registered
            .get_or_open(namespace, || async {
                sqlx::query(
                    r#"
                    INSERT INTO namespaces (store, namespace)
                    VALUES ($1, $2)
                    ON CONFLICT (store, namespace) DO NOTHING
                    "#,
                )
                .bind(&self.scope)
                .bind(namespace)
                .execute(&self.pool)
                .await?;
                tracing::debug!(
                    scope = %self.scope,
                    namespace = %namespace,
                    "Namespace registered"
                );
                Ok::<_, SyncError>(namespace.to_string())
            })
            .await?;
        Ok(())
    }

    async fn namespaces(&self) -> SyncResult<Vec<Namespace>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT namespace FROM namespaces WHERE store = $1 ORDER BY namespace"#,
        )
        .bind(&self.scope)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(namespace,)| namespace).collect())
    }
}

fn conflict(id: &DocId, expected: Option<Version>, found: Option<i64>) -> SyncError {
    SyncError::Conflict {
        id: id.to_client_id(),
        expected,
        found: found.map(|v| v as Version),
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn get_document(&self, id: &DocId) -> SyncResult<Document> {
        let row = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT key, version, body
            FROM documents
            WHERE store = $1 AND namespace = $2 AND key = $3
            "#,
        )
        .bind(&self.scope)
        .bind(id.namespace())
        .bind(id.key())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.to_document(),
            None => Err(SyncError::NotFound(id.to_client_id())),
        }
    }

    async fn update_by_operations(
        &self,
        id: &DocId,
        expected_version: Option<Version>,
        ops: &OperationSet,
    ) -> SyncResult<Document> {
        let namespace = id.namespace();
        self.register(&namespace).await?;

        let mut tx = self.pool.begin().await?;

        // An upsert needs a row to lock, otherwise two concurrent creations
        // would both start from an empty document.
        if expected_version.is_none() {
            sqlx::query(
                r#"
                INSERT INTO documents (store, namespace, key, version, body)
                VALUES ($1, $2, $3, NULL, $4)
                ON CONFLICT (store, namespace, key) DO NOTHING
                "#,
            )
            .bind(&self.scope)
            .bind(&namespace)
            .bind(id.key())
            .bind(codec::encode_document(&Document::new(id.key())))
            .execute(&mut *tx)
            .await?;
        }

        let current = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT key, version, body
            FROM documents
            WHERE store = $1 AND namespace = $2 AND key = $3
            FOR UPDATE
            "#,
        )
        .bind(&self.scope)
        .bind(&namespace)
        .bind(id.key())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Err(conflict(id, expected_version, None));
        };
        if let Some(expected) = expected_version {
            if current.version != Some(expected as i64) {
                return Err(conflict(id, expected_version, current.version));
            }
        }

        let mut next = current.to_document()?;
        ops.apply_to(&mut next)?;

        sqlx::query(
            r#"
            UPDATE documents
            SET version = $4, body = $5, updated_at = now()
            WHERE store = $1 AND namespace = $2 AND key = $3
            "#,
        )
        .bind(&self.scope)
        .bind(&namespace)
        .bind(id.key())
        .bind(next.version().map(|v| v as i64))
        .bind(codec::encode_document(&next))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::trace!(id = %id, version = ?next.version(), "Document written");
        Ok(next)
    }

    async fn remove_document(
        &self,
        id: &DocId,
        expected_version: Option<Version>,
    ) -> SyncResult<()> {
        let namespace = id.namespace();
        let mut tx = self.pool.begin().await?;

        let current: Option<(Option<i64>,)> = sqlx::query_as(
            r#"
            SELECT version
            FROM documents
            WHERE store = $1 AND namespace = $2 AND key = $3
            FOR UPDATE
            "#,
        )
        .bind(&self.scope)
        .bind(&namespace)
        .bind(id.key())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((version,)) = current else {
            return Err(SyncError::NotFound(id.to_client_id()));
        };
        if let Some(expected) = expected_version {
            if version != Some(expected as i64) {
                return Err(conflict(id, expected_version, version));
            }
        }

        sqlx::query(r#"DELETE FROM documents WHERE store = $1 AND namespace = $2 AND key = $3"#)
            .bind(&self.scope)
            .bind(&namespace)
            .bind(id.key())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_all_documents(
        &self,
        sink: &dyn DocumentSink,
    ) -> SyncResult<Vec<NamespaceSummary>> {
        let namespaces = self.namespaces().await?;

        let scans = namespaces.into_iter().map(|namespace| async move {
            let mut rows = sqlx::query_as::<_, StoredDocument>(
                r#"
                SELECT key, version, body
                FROM documents
                WHERE store = $1 AND namespace = $2
                ORDER BY key
                "#,
            )
            .bind(&self.scope)
            .bind(namespace.clone())
            .fetch(&self.pool);

            let mut sent = 0;
            while let Some(row) = rows.try_next().await? {
                let id = DocId::from_namespace(&namespace, row.key.clone())?;
                let doc = row.to_document()?;
                sink.write(&id, doc.version(), false, Some(&doc));
                sent += 1;
            }
            Ok::<_, SyncError>(NamespaceSummary { namespace, sent })
        });

        futures::future::try_join_all(scans).await
    }

    async fn find_all(&self, namespace: &str) -> SyncResult<Vec<Document>> {
        let rows = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT key, version, body
            FROM documents
            WHERE store = $1 AND namespace = $2
            ORDER BY key
            "#,
        )
        .bind(&self.scope)
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(StoredDocument::to_document).collect()
    }
}
