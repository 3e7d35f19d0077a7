//! Recipient resolution.
//!
//! Recipient sets are derived per dispatch, never stored: the directory is
//! queried with the request's account and role criteria, and when the
//! criteria include the owner role the elevated (platform operator) pool is
//! unioned in. The result is deduplicated by user identity before being
//! handed to the notification service.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::StoreError;

use super::types::{Role, UserRef};

/// Directory of users and their account-role memberships.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users holding any of the given roles on the account. An absent role
    /// filter matches any role.
    async fn find_users_by_account_and_role(
        &self,
        account_id: i64,
        roles: Option<&[Role]>,
    ) -> Result<Vec<UserRef>, StoreError>;

    /// Platform operators who implicitly receive owner-level notifications
    /// across all accounts.
    async fn find_elevated_users(&self) -> Result<Vec<UserRef>, StoreError>;
}

/// In-memory user directory.
#[derive(Default)]
pub struct MemoryUserDirectory {
    /// account_id -> (user, role) memberships
    memberships: DashMap<i64, Vec<(UserRef, Role)>>,
    elevated: DashMap<i64, UserRef>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, account_id: i64, user: UserRef, role: Role) {
        self.memberships
            .entry(account_id)
            .or_default()
            .push((user, role));
    }

    pub fn add_elevated(&self, user: UserRef) {
        self.elevated.insert(user.user_id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_users_by_account_and_role(
        &self,
        account_id: i64,
        roles: Option<&[Role]>,
    ) -> Result<Vec<UserRef>, StoreError> {
        let Some(members) = self.memberships.get(&account_id) else {
            return Ok(Vec::new());
        };

        Ok(members
            .iter()
            .filter(|(_, role)| roles.map_or(true, |wanted| wanted.contains(role)))
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn find_elevated_users(&self) -> Result<Vec<UserRef>, StoreError> {
        let mut users: Vec<UserRef> = self.elevated.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.user_id);
        Ok(users)
    }
}

/// Resolves the recipient set for one dispatch.
pub struct RecipientResolver {
    directory: Arc<dyn UserDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve and deduplicate recipients for an account and role filter.
    ///
    /// The elevated pool is unioned in only when the filter contains the
    /// owner role; no other role (and no absent filter) triggers it.
    /// Deduplication is by user id, first occurrence wins.
    pub async fn resolve(
        &self,
        account_id: i64,
        roles: Option<&[Role]>,
    ) -> Result<Vec<UserRef>, StoreError> {
        let mut users = self
            .directory
            .find_users_by_account_and_role(account_id, roles)
            .await?;

        if roles.map_or(false, |r| r.contains(&Role::Owner)) {
            let elevated = self.directory.find_elevated_users().await?;
            tracing::debug!(
                account_id = account_id,
                elevated = elevated.len(),
                "Owner role requested, merging elevated user pool"
            );
            users.extend(elevated);
        }

        let mut seen = HashSet::with_capacity(users.len());
        users.retain(|user| seen.insert(user.user_id));

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> UserRef {
        UserRef {
            user_id: id,
            email: format!("user{}@x.co", id),
        }
    }

    fn directory() -> MemoryUserDirectory {
        let dir = MemoryUserDirectory::new();
        dir.add_member(7, user(1), Role::Owner);
        dir.add_member(7, user(2), Role::Admin);
        dir.add_member(7, user(3), Role::Member);
        dir.add_member(8, user(4), Role::Owner);
        dir.add_elevated(user(100));
        dir
    }

    #[tokio::test]
    async fn test_absent_filter_matches_any_role_no_elevated() {
        let resolver = RecipientResolver::new(Arc::new(directory()));
        let users = resolver.resolve(7, None).await.unwrap();

        let ids: Vec<i64> = users.iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_owner_filter_unions_elevated_pool() {
        let resolver = RecipientResolver::new(Arc::new(directory()));
        let users = resolver.resolve(7, Some(&[Role::Owner])).await.unwrap();

        let ids: Vec<i64> = users.iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![1, 100]);
    }

    #[tokio::test]
    async fn test_non_owner_roles_never_include_elevated() {
        let resolver = RecipientResolver::new(Arc::new(directory()));
        let users = resolver
            .resolve(7, Some(&[Role::Admin, Role::Member]))
            .await
            .unwrap();

        let ids: Vec<i64> = users.iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(!ids.contains(&100));
    }

    #[tokio::test]
    async fn test_dedup_when_elevated_user_is_also_member() {
        let dir = directory();
        // Elevated operator also holds the owner role on the account
        dir.add_member(7, user(100), Role::Owner);

        let resolver = RecipientResolver::new(Arc::new(dir));
        let users = resolver.resolve(7, Some(&[Role::Owner])).await.unwrap();

        let ids: Vec<i64> = users.iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![1, 100], "no user appears twice");
    }

    #[tokio::test]
    async fn test_unknown_account_resolves_empty() {
        let resolver = RecipientResolver::new(Arc::new(directory()));
        let users = resolver.resolve(999, None).await.unwrap();
        assert!(users.is_empty());
    }
}
