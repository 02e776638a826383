use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::warn;

use crate::model::department::Department;
use crate::model::employee::Employee;
use crate::store::{self, Collection, Filter, Store, StoreResult};

/// Read side for employees and departments.
///
/// Department lookups go through a short-lived cache: the per-second session
/// tick reads schedules on every beat and must not hit storage to do so.
#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn Store>,
    departments: Cache<String, Department>,
}

impl Directory {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            departments: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn employee(&self, employee_id: &str) -> StoreResult<Option<Employee>> {
        store::get_as(self.store.as_ref(), Collection::Employees, employee_id).await
    }

    pub async fn employees_in(&self, department_id: &str) -> StoreResult<Vec<Employee>> {
        let filter = Filter::all().eq("department", department_id);
        Ok(store::query_as::<Employee>(self.store.as_ref(), Collection::Employees, &filter)
            .await?
            .into_iter()
            .map(|(_, employee)| employee)
            .collect())
    }

    pub async fn departments(&self) -> StoreResult<Vec<Department>> {
        let departments = store::query_as::<Department>(self.store.as_ref(), Collection::Departments, &Filter::all())
            .await?
            .into_iter()
            .map(|(id, mut department)| {
                department.id = id;
                department
            })
            .collect::<Vec<_>>();
        for department in &departments {
            self.departments.insert(department.id.clone(), department.clone()).await;
        }
        Ok(departments)
    }

    /// Department of an employee's schedule. A failed lookup is logged and
    /// reported as "no department" so attendance keeps working.
    pub async fn department(&self, department_id: Option<&str>) -> Option<Department> {
        let id = department_id?;
        if let Some(cached) = self.departments.get(id).await {
            return Some(cached);
        }
        match store::get_as::<Department>(self.store.as_ref(), Collection::Departments, id).await {
            Ok(Some(mut department)) => {
                department.id = id.to_string();
                self.departments.insert(id.to_string(), department.clone()).await;
                Some(department)
            }
            Ok(None) => {
                warn!(department_id = id, "Department not found, schedule checks disabled");
                None
            }
            Err(e) => {
                warn!(department_id = id, error = %e, "Failed to fetch department schedule");
                None
            }
        }
    }

    /// Cached copy only; never touches storage.
    pub async fn cached_department(&self, department_id: Option<&str>) -> Option<Department> {
        self.departments.get(department_id?).await
    }

    pub async fn invalidate_department(&self, department_id: &str) {
        self.departments.invalidate(department_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::schedule::testing::department;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn department_lookup_is_cached_until_invalidated() {
        let store = Arc::new(InMemoryStore::new());
        let dept = department("ops", "UTC", (9, 0), (17, 0), 15, 30);
        store
            .create_if_absent(Collection::Departments, "ops", store::to_document(&dept).unwrap())
            .await
            .unwrap();
        let directory = Directory::new(store.clone(), Duration::from_secs(60));

        assert!(directory.cached_department(Some("ops")).await.is_none());
        assert_eq!(directory.department(Some("ops")).await.unwrap().schedule.grace_period, 15);
        assert!(directory.cached_department(Some("ops")).await.is_some());

        store
            .update(Collection::Departments, "ops", json!({"schedule": {
                "clockIn": "08:00", "clockOut": "16:00", "gracePeriod": 5, "overtimeThreshold": 10
            }}))
            .await
            .unwrap();
        assert_eq!(directory.department(Some("ops")).await.unwrap().schedule.grace_period, 15);
        directory.invalidate_department("ops").await;
        assert_eq!(directory.department(Some("ops")).await.unwrap().schedule.grace_period, 5);
    }

    #[tokio::test]
    async fn missing_department_is_none() {
        let directory = Directory::new(Arc::new(InMemoryStore::new()), Duration::from_secs(60));
        assert!(directory.department(Some("ghost")).await.is_none());
        assert!(directory.department(None).await.is_none());
    }
}
