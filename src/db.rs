use async_trait::async_trait;
use serde_json::Value;
use sqlx::{MySqlPool, Row};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::{
    ChangeEvent, ChangeKind, Collection, Filter, Store, StoreError, StoreResult, merge_patch,
};

pub async fn init_db(database_url: &str) -> Result<MySqlPool, sqlx::Error> {
    MySqlPool::connect(database_url).await
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection VARCHAR(64) NOT NULL,
    id VARCHAR(191) NOT NULL,
    body JSON NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    PRIMARY KEY (collection, id)
)
"#;

/// MySQL duplicate-key SQLSTATE.
const DUPLICATE_KEY: &str = "23000";

/// Document store over a single MySQL table. Change notifications are
/// published in-process after each committed write.
pub struct MySqlStore {
    pool: MySqlPool,
    feed: broadcast::Sender<ChangeEvent>,
}

impl MySqlStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = init_db(database_url).await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        let (feed, _) = broadcast::channel(1024);
        Ok(Self { pool, feed })
    }

    fn publish(&self, collection: Collection, id: &str, kind: ChangeKind, doc: Option<Value>) {
        let _ = self.feed.send(ChangeEvent {
            collection,
            id: id.to_string(),
            kind,
            doc,
        });
    }

    async fn insert(&self, collection: Collection, id: &str, doc: &Value) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection.as_ref())
            .bind(id)
            .bind(doc.to_string())
            .execute(&self.pool)
            .await
            .map(|_| ())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    tracing::error!(error = %e, "Document store query failed");
    StoreError::Backend(e.to_string())
}

fn is_duplicate(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        return db_err.code().as_deref() == Some(DUPLICATE_KEY);
    }
    false
}

/// `WHERE` clause selecting `collection` and narrowed by the filter's string
/// equalities, with its bind values in order. Range conditions are left to
/// [`Filter::matches`].
fn where_clause(collection: Collection, filter: &Filter) -> (String, Vec<String>) {
    let mut clause = String::from("collection = ?");
    let mut binds = vec![collection.as_ref().to_string()];
    for (field, values) in filter.string_equalities() {
        if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        if values.is_empty() {
            clause.push_str(" AND FALSE");
            continue;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        clause.push_str(&format!(" AND JSON_UNQUOTE(JSON_EXTRACT(body, ?)) IN ({placeholders})"));
        binds.push(format!("$.{field}"));
        binds.extend(values.into_iter().map(str::to_string));
    }
    (clause, binds)
}

fn parse_body(raw: &str) -> StoreResult<Value> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl Store for MySqlStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query(
            "SELECT CAST(body AS CHAR) AS body FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection.as_ref())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("body").map_err(backend)?;
                Ok(Some(parse_body(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn query(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<(String, Value)>> {
        let (clause, binds) = where_clause(collection, filter);
        let sql = format!("SELECT id, CAST(body AS CHAR) AS body FROM documents WHERE {clause} ORDER BY id");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(backend)?;
            let raw: String = row.try_get("body").map_err(backend)?;
            let doc = parse_body(&raw)?;
            if filter.matches(&doc) {
                docs.push((id, doc));
            }
        }
        Ok(docs)
    }

    async fn create(&self, collection: Collection, doc: Value) -> StoreResult<String> {
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let id = Uuid::new_v4().to_string();
        self.insert(collection, &id, &doc).await.map_err(backend)?;
        self.publish(collection, &id, ChangeKind::Created, Some(doc));
        Ok(id)
    }

    async fn create_if_absent(&self, collection: Collection, id: &str, doc: Value) -> StoreResult<bool> {
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }
        match self.insert(collection, id, &doc).await {
            Ok(()) => {
                self.publish(collection, id, ChangeKind::Created, Some(doc));
                Ok(true)
            }
            Err(e) if is_duplicate(&e) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(&self, collection: Collection, id: &str, patch: Value) -> StoreResult<()> {
        if !patch.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let result = sqlx::query(
            "UPDATE documents SET body = JSON_MERGE_PATCH(body, CAST(? AS JSON)) WHERE collection = ? AND id = ?",
        )
        .bind(patch.to_string())
        .bind(collection.as_ref())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            // MySQL reports 0 for a no-op merge too; tell the two apart.
            match self.get(collection, id).await? {
                Some(_) => {}
                None => {
                    return Err(StoreError::NotFound {
                        collection,
                        id: id.to_string(),
                    });
                }
            }
        }

        let mut updated = self.get(collection, id).await?.unwrap_or(Value::Null);
        if updated.is_null() {
            // Deleted between the two statements; report what was written.
            updated = serde_json::json!({});
            merge_patch(&mut updated, &patch)?;
        }
        self.publish(collection, id, ChangeKind::Updated, Some(updated));
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_ref())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.publish(collection, id, ChangeKind::Deleted, None);
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn where_clause_pushes_string_equalities_down() {
        let filter = Filter::all()
            .eq("employeeId", "e1")
            .one_of("recipientId", vec![json!("e1"), json!("all_employees")])
            .gte("timestamp", "2024-03-04T00:00:00Z");
        let (clause, binds) = where_clause(Collection::Messages, &filter);
        assert_eq!(
            clause,
            "collection = ? \
             AND JSON_UNQUOTE(JSON_EXTRACT(body, ?)) IN (?) \
             AND JSON_UNQUOTE(JSON_EXTRACT(body, ?)) IN (?, ?)"
        );
        assert_eq!(
            binds,
            vec!["messages", "$.employeeId", "e1", "$.recipientId", "e1", "all_employees"]
        );
    }

    #[test]
    fn where_clause_without_equalities_scans_the_collection() {
        let filter = Filter::all().eq("read", false).lt("timestamp", "2024-03-05T00:00:00Z");
        let (clause, binds) = where_clause(Collection::Attendance, &filter);
        assert_eq!(clause, "collection = ?");
        assert_eq!(binds, vec!["attendance"]);

        let (clause, _) = where_clause(Collection::Messages, &Filter::all().one_of("recipientId", vec![]));
        assert_eq!(clause, "collection = ? AND FALSE");
    }
}
