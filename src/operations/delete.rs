use super::{DeleteOptions, PendingFinish};
use crate::entities::RecordId;
use crate::error::CoreDataResult;
use crate::locks::{record_lock_path, LockGuard};
use crate::store::{actions, CoreData, StoreAction};
use crate::transport::{add_query_args, ApiRequest, Method};
use log::{debug, warn};
use serde_json::{Map, Value};

impl CoreData {
    /// Delete a record on the server and drop it from the cache.
    ///
    /// `query` is appended to the request path (`force`, for example). The
    /// server response is returned as is.
    pub async fn delete_entity_record(
        &self,
        kind: &str,
        name: &str,
        record_id: impl Into<RecordId>,
        query: Option<Map<String, Value>>,
        options: DeleteOptions,
    ) -> CoreDataResult<Value> {
        let entity = self.resolve_entity(kind, name).await?;
        let record_id = record_id.into();

        let locks = options.locks.unwrap_or_else(|| self.locks());
        let lock = LockGuard::acquire(locks, record_lock_path(kind, name, Some(&record_id)), true).await?;

        self.dispatch(StoreAction::DeleteEntityRecordStart {
            kind: kind.to_string(),
            name: name.to_string(),
            record_id: record_id.clone(),
        });
        let pending = {
            let (kind, name, record_id) = (kind.to_string(), name.to_string(), record_id.clone());
            PendingFinish::new(self, move |error| StoreAction::DeleteEntityRecordFinish {
                kind,
                name,
                record_id,
                error,
            })
        };

        let mut path = entity.record_path(&record_id);
        if let Some(query) = &query {
            path = add_query_args(&path, query);
        }
        debug!("🗑️ DELETE {}", path);

        let fetch = options.fetch.unwrap_or_else(|| self.transport());
        let result: CoreDataResult<Value> = match fetch.request(ApiRequest::new(path, Method::Delete)).await {
            Ok(deleted) => {
                self.dispatch(actions::remove_items(kind, name, vec![record_id.clone()], true));
                Ok(deleted)
            }
            Err(error) => {
                warn!("❌ Deleting {} {} {} failed: {}", kind, name, record_id, error);
                Err(error.into())
            }
        };

        pending.finish(result.as_ref().err().cloned());
        lock.release();

        result
    }
}
