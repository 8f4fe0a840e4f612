use dashmap::DashMap;
use serenity::model::id::UserId;

use crate::catalog::{Account, Credential};

/// A catalog login together with the account details seen at login time.
#[derive(Clone, Debug)]
pub struct Login {
    pub credential: Credential,
    pub account: Account,
}

/// Catalog logins per Discord user. Kept in memory only.
#[derive(Default)]
pub struct CredentialStore {
    inner: DashMap<UserId, Login>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the credential that was replaced, if any.
    pub fn login(&self, user: UserId, credential: Credential, account: Account) -> Option<Credential> {
        self.inner
            .insert(user, Login { credential, account })
            .map(|old| old.credential)
    }

    pub fn logout(&self, user: UserId) -> bool {
        self.inner.remove(&user).is_some()
    }

    pub fn get(&self, user: UserId) -> Option<Credential> {
        self.inner.get(&user).map(|l| l.credential.clone())
    }

    pub fn account(&self, user: UserId) -> Option<Account> {
        self.inner.get(&user).map(|l| l.account.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(token: &str) -> Credential {
        Credential {
            token: token.into(),
            catalog_user_id: "uid".into(),
        }
    }

    fn account(login: &str, has_plus: bool) -> Account {
        Account {
            uid: "uid".into(),
            login: Some(login.into()),
            has_plus,
        }
    }

    #[test]
    fn login_replaces_and_logout_removes() {
        let store = CredentialStore::new();
        let user = UserId::new(3);

        assert!(store.login(user, cred("a"), account("first", true)).is_none());
        let replaced = store.login(user, cred("b"), account("second", true));
        assert_eq!(replaced.map(|c| c.token).as_deref(), Some("a"));
        assert_eq!(store.get(user).unwrap().token, "b");

        assert!(store.logout(user));
        assert!(!store.logout(user));
        assert!(store.get(user).is_none());
        assert!(store.account(user).is_none());
    }

    #[test]
    fn account_details_follow_the_latest_login() {
        let store = CredentialStore::new();
        let user = UserId::new(4);
        assert!(store.account(user).is_none());

        store.login(user, cred("a"), account("listener", false));
        store.login(user, cred("b"), account("listener", true));

        let info = store.account(user).unwrap();
        assert_eq!(info.login.as_deref(), Some("listener"));
        assert!(info.has_plus);
    }
}
