//! Structured cache keys. Every query key in the portal is built here so that
//! invalidation prefixes and subscriptions can never drift apart.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Prefix match: `["parcels"]` covers `["parcels","user","a@b.c"]`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

pub mod parcels {
    use super::QueryKey;

    pub fn all() -> QueryKey {
        QueryKey::new(["parcels"])
    }

    pub fn user(email: &str) -> QueryKey {
        QueryKey::new(["parcels", "user", email])
    }

    pub fn unpaid(email: &str) -> QueryKey {
        QueryKey::new(["parcels", "unpaid", email])
    }

    pub fn detail(id: &str) -> QueryKey {
        QueryKey::new(["parcels", "detail", id])
    }

    pub fn search(phone: &str, email: &str) -> QueryKey {
        QueryKey::new(["parcels", "search", phone, email])
    }

    pub fn track(code: &str) -> QueryKey {
        QueryKey::new(["parcels", "track", code])
    }

    pub fn admin_list() -> QueryKey {
        QueryKey::new(["parcels", "admin"])
    }
}

pub mod payments {
    use super::QueryKey;

    pub fn all() -> QueryKey {
        QueryKey::new(["payments"])
    }

    pub fn user(email: &str) -> QueryKey {
        QueryKey::new(["payments", "user", email])
    }
}

pub mod users {
    use super::QueryKey;

    pub fn all() -> QueryKey {
        QueryKey::new(["users"])
    }

    pub fn by_email(email: &str) -> QueryKey {
        QueryKey::new(["users", "profile", email])
    }

    pub fn admin_check(email: &str) -> QueryKey {
        QueryKey::new(["users", "admin-check", email])
    }

    pub fn stats() -> QueryKey {
        QueryKey::new(["users", "stats"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parcel_root_covers_every_parcel_key() {
        let root = parcels::all();
        assert!(parcels::user("a@b.c").starts_with(&root));
        assert!(parcels::track("PRC-1").starts_with(&root));
        assert!(!payments::user("a@b.c").starts_with(&root));
    }

    #[test]
    fn user_keys_are_scoped_by_email() {
        assert!(!parcels::user("a@b.c").starts_with(&parcels::user("x@y.z")));
        assert_eq!(parcels::user("a@b.c").to_string(), "[parcels,user,a@b.c]");
    }
}
