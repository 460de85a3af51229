//! Bulk role reclassification
//!
//! Walks every user in business-id order and rewrites the stored role to what
//! the classifier says today. Administrative overrides are left alone. A
//! failure on one user is recorded in the report and the walk continues, so a
//! rerun after a partial failure only has the failed users left to fix.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    Result,
    db::{CallPolicy, IdentityStore},
    id::UserId,
    role::{Role, RoleCounts},
    users::{RoleSource, User},
};

/// A user whose role could not be rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclassifyFailure {
    pub user_id: UserId,
    pub business_id: String,
    pub error: String,
}

/// Outcome of a reclassification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclassifyReport {
    /// Users per role after the pass; failed users are not counted
    pub counts: RoleCounts,
    /// Users whose stored role was rewritten
    pub changed: u64,
    /// Users skipped because their role is an administrative override
    pub preserved: u64,
    pub failures: Vec<ReclassifyFailure>,
}

impl ReclassifyReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Default for ReclassifyReport {
    fn default() -> Self {
        Self {
            counts: RoleCounts::new(),
            changed: 0,
            preserved: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct Reclassifier<S> {
    store: Arc<S>,
    policy: CallPolicy,
    batch_size: usize,
}

impl<S: IdentityStore> Reclassifier<S> {
    pub fn new(store: Arc<S>, policy: CallPolicy, batch_size: usize) -> Self {
        Self {
            store,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    /// Run a full pass. Only a failure to page through users aborts the pass.
    #[tracing::instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn run(&self) -> Result<ReclassifyReport> {
        let mut report = ReclassifyReport::default();
        let mut after: Option<String> = None;

        loop {
            let page = self
                .policy
                .run(
                    "list_users",
                    self.store.list_users(after.as_deref(), self.batch_size),
                )
                .await?;
            let exhausted = page.len() < self.batch_size;
            after = page.last().map(|u| u.business_id.clone());

            for user in page {
                self.reclassify_one(user, &mut report).await;
            }

            tracing::debug!(
                changed = report.changed,
                failures = report.failures.len(),
                "reclassified batch"
            );
            if exhausted || after.is_none() {
                break;
            }
        }

        if report.is_complete() {
            tracing::info!(
                total = report.counts.total(),
                changed = report.changed,
                preserved = report.preserved,
                "reclassification complete"
            );
        } else {
            tracing::warn!(
                failures = report.failures.len(),
                changed = report.changed,
                "reclassification finished with failures"
            );
        }
        Ok(report)
    }

    async fn reclassify_one(&self, user: User, report: &mut ReclassifyReport) {
        if let (RoleSource::Override, Some(role)) = (user.role_source, user.role) {
            report.preserved += 1;
            report.counts.record(role);
            return;
        }

        let target = Role::classify(&user.business_id);
        if user.role == Some(target) && user.role_source == RoleSource::Derived {
            report.counts.record(target);
            return;
        }

        // The page is a snapshot; the store refuses the write if an override
        // landed since it was read.
        let written = self
            .policy
            .run("set_derived_role", self.store.set_derived_role(user.id, target))
            .await;
        match written {
            Ok(true) => {
                tracing::debug!(user = %user.id, from = ?user.role, to = %target, "role rewritten");
                report.changed += 1;
                report.counts.record(target);
            }
            Ok(false) => self.recount_pinned(&user, report).await,
            Err(e) => {
                tracing::warn!(user = %user.id, error = %e, "failed to reclassify user");
                report.failures.push(ReclassifyFailure {
                    user_id: user.id,
                    business_id: user.business_id,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Count a user that was overridden or removed after its page was read
    async fn recount_pinned(&self, user: &User, report: &mut ReclassifyReport) {
        match self
            .policy
            .run("get_user", self.store.get_user(user.id))
            .await
        {
            Ok(Some(current)) => {
                tracing::debug!(user = %user.id, "role pinned during reclassification");
                report.preserved += 1;
                report.counts.record(current.effective_role());
            }
            Ok(None) => tracing::debug!(user = %user.id, "user removed during reclassification"),
            Err(e) => {
                tracing::warn!(user = %user.id, error = %e, "failed to reread pinned user");
                report.failures.push(ReclassifyFailure {
                    user_id: user.id,
                    business_id: user.business_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseError, MemoryStore};
    use crate::users::UserDirectory;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn seed_users(store: &MemoryStore) {
        let mut legacy = User::new("CONS0001", "Legacy consultor");
        legacy.role = None;
        store.insert_user(&legacy).await.unwrap();

        let mut stale = User::new("ADV0002", "Stale asesor");
        stale.role = Some(Role::Usuario);
        store.insert_user(&stale).await.unwrap();

        store.insert_user(&User::new("XAXX010101000", "Cliente")).await.unwrap();
        store
            .insert_user(&User::new(crate::role::ADMIN_BUSINESS_ID, "Admin"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reclassify_rewrites_stale_roles() {
        let store = Arc::new(MemoryStore::new());
        seed_users(&store).await;

        let report = Reclassifier::new(store.clone(), CallPolicy::default(), 2)
            .run()
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.changed, 2);
        assert_eq!(report.counts.get(Role::Consultor), 2);
        assert_eq!(report.counts.get(Role::Asesor), 1);
        assert_eq!(report.counts.get(Role::Usuario), 1);
        assert_eq!(store.count_by_role().await.unwrap(), report.counts);
    }

    #[tokio::test]
    async fn test_reclassify_twice_is_stable() {
        let store = Arc::new(MemoryStore::new());
        seed_users(&store).await;
        let reclassifier = Reclassifier::new(store.clone(), CallPolicy::default(), 500);

        let first = reclassifier.run().await.unwrap();
        let second = reclassifier.run().await.unwrap();
        assert_eq!(first.counts, second.counts);
        assert_eq!(second.changed, 0);
    }

    #[tokio::test]
    async fn test_override_survives_reclassify() {
        let store = Arc::new(MemoryStore::new());
        let users = UserDirectory::new(store.clone(), CallPolicy::default());
        let user = users.register("XAXX010101000", "Promovido").await.unwrap();
        users.override_role(user.id, Role::Asesor).await.unwrap();

        let report = Reclassifier::new(store.clone(), CallPolicy::default(), 10)
            .run()
            .await
            .unwrap();
        assert_eq!(report.preserved, 1);
        assert_eq!(users.get(user.id).await.unwrap().role, Some(Role::Asesor));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let report = Reclassifier::new(store, CallPolicy::default(), 0)
            .run()
            .await
            .unwrap();
        assert_eq!(report.counts.total(), 0);
        assert!(report.is_complete());
    }

    /// Rejects writes for one business id
    struct FlakyStore {
        inner: MemoryStore,
        broken: &'static str,
    }

    #[async_trait::async_trait]
    impl IdentityStore for FlakyStore {
        async fn get_user(&self, id: UserId) -> crate::db::Result<Option<User>> {
            self.inner.get_user(id).await
        }
        async fn get_user_by_business_id(&self, b: &str) -> crate::db::Result<Option<User>> {
            self.inner.get_user_by_business_id(b).await
        }
        async fn insert_user(&self, user: &User) -> crate::db::Result<()> {
            self.inner.insert_user(user).await
        }
        async fn put_user(&self, user: &User) -> crate::db::Result<()> {
            self.inner.put_user(user).await
        }
        async fn set_derived_role(&self, id: UserId, role: Role) -> crate::db::Result<bool> {
            let user = self.inner.get_user(id).await?;
            if user.is_some_and(|u| u.business_id == self.broken) {
                return Err(DatabaseError::Other("disk full".into()));
            }
            self.inner.set_derived_role(id, role).await
        }
        async fn remove_user(&self, id: UserId) -> crate::db::Result<bool> {
            self.inner.remove_user(id).await
        }
        async fn count_by_role(&self) -> crate::db::Result<RoleCounts> {
            self.inner.count_by_role().await
        }
        async fn list_users(
            &self,
            after: Option<&str>,
            limit: usize,
        ) -> crate::db::Result<Vec<User>> {
            self.inner.list_users(after, limit).await
        }
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            broken: "ADV0002",
        });
        seed_users(&store.inner).await;

        let report = Reclassifier::new(store.clone(), CallPolicy::default(), 1)
            .run()
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].business_id, "ADV0002");
        assert!(report.failures[0].error.contains("disk full"));
        // everyone else was still processed
        assert_eq!(report.counts.total(), 3);
        assert_eq!(
            store.inner.get_user_by_business_id("CONS0001").await.unwrap().unwrap().role,
            Some(Role::Consultor)
        );
    }

    /// Pins a user's role right after handing out the page that contains it
    struct OverrideAfterRead {
        inner: MemoryStore,
        pinned: &'static str,
    }

    #[async_trait::async_trait]
    impl IdentityStore for OverrideAfterRead {
        async fn get_user(&self, id: UserId) -> crate::db::Result<Option<User>> {
            self.inner.get_user(id).await
        }
        async fn get_user_by_business_id(&self, b: &str) -> crate::db::Result<Option<User>> {
            self.inner.get_user_by_business_id(b).await
        }
        async fn insert_user(&self, user: &User) -> crate::db::Result<()> {
            self.inner.insert_user(user).await
        }
        async fn put_user(&self, user: &User) -> crate::db::Result<()> {
            self.inner.put_user(user).await
        }
        async fn set_derived_role(&self, id: UserId, role: Role) -> crate::db::Result<bool> {
            self.inner.set_derived_role(id, role).await
        }
        async fn remove_user(&self, id: UserId) -> crate::db::Result<bool> {
            self.inner.remove_user(id).await
        }
        async fn count_by_role(&self) -> crate::db::Result<RoleCounts> {
            self.inner.count_by_role().await
        }
        async fn list_users(
            &self,
            after: Option<&str>,
            limit: usize,
        ) -> crate::db::Result<Vec<User>> {
            let page = self.inner.list_users(after, limit).await?;
            if let Some(mut user) = self.inner.get_user_by_business_id(self.pinned).await? {
                user.role = Some(Role::Asesor);
                user.role_source = RoleSource::Override;
                self.inner.put_user(&user).await?;
            }
            Ok(page)
        }
    }

    #[tokio::test]
    async fn test_override_after_page_read_is_kept() {
        let store = Arc::new(OverrideAfterRead {
            inner: MemoryStore::new(),
            pinned: "CONS0001",
        });
        seed_users(&store.inner).await;

        let report = Reclassifier::new(store.clone(), CallPolicy::default(), 10)
            .run()
            .await
            .unwrap();

        let pinned = store.inner.get_user_by_business_id("CONS0001").await.unwrap().unwrap();
        assert_eq!(pinned.role, Some(Role::Asesor));
        assert_eq!(pinned.role_source, RoleSource::Override);
        assert!(report.is_complete());
        assert_eq!(report.preserved, 1);
        assert_eq!(report.counts.get(Role::Asesor), 2);
        assert_eq!(store.inner.count_by_role().await.unwrap(), report.counts);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_override_survives_running_pass() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(100)));
        for business_id in ["A1", "B1", "CONS9"] {
            let mut user = User::new(business_id, business_id);
            user.role = None;
            store.insert_user(&user).await.unwrap();
        }
        let target = store.get_user_by_business_id("CONS9").await.unwrap().unwrap();

        let reclassifier = Reclassifier::new(store.clone(), CallPolicy::default(), 10);
        let pass = tokio::spawn(async move { reclassifier.run().await });

        tokio::time::sleep(Duration::from_millis(160)).await;
        UserDirectory::new(store.clone(), CallPolicy::default())
            .override_role(target.id, Role::Asesor)
            .await
            .unwrap();

        let report = pass.await.unwrap().unwrap();
        assert!(report.is_complete());

        let after = store.get_user(target.id).await.unwrap().unwrap();
        assert_eq!(after.role, Some(Role::Asesor));
        assert_eq!(after.role_source, RoleSource::Override);
    }
}
