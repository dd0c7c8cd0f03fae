use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAX_SLUG_LEN;

/// Resolves the identifiers callers use for a coach (ULID text or slug) to
/// the coach id. Every engine entry point goes through this; the engine
/// records each registered coach here.
pub trait CoachDirectory: Send + Sync {
    /// Slug (any case, surrounding whitespace ignored) or ULID text.
    fn resolve(&self, key: &str) -> Option<Ulid>;

    /// Exact, already-normalized slug.
    fn id_for_slug(&self, slug: &str) -> Option<Ulid>;

    fn insert(&self, slug: &str, id: Ulid);
}

/// In-memory slug ⇄ id index, rebuilt from the WAL on startup.
#[derive(Debug, Default)]
pub struct CoachRegistry {
    by_slug: DashMap<String, Ulid>,
    by_id: DashMap<Ulid, String>,
}

impl CoachRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoachDirectory for CoachRegistry {
    fn resolve(&self, key: &str) -> Option<Ulid> {
        let key = key.trim();
        if let Some(id) = self.id_for_slug(&key.to_ascii_lowercase()) {
            return Some(id);
        }
        Ulid::from_string(key)
            .ok()
            .filter(|id| self.by_id.contains_key(id))
    }

    fn id_for_slug(&self, slug: &str) -> Option<Ulid> {
        self.by_slug.get(slug).map(|e| *e.value())
    }

    fn insert(&self, slug: &str, id: Ulid) {
        self.by_slug.insert(slug.to_string(), id);
        self.by_id.insert(id, slug.to_string());
    }
}

/// Slugs are 1..=64 chars of `[a-z0-9-]`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_slug_and_id() {
        let reg = CoachRegistry::new();
        let id = Ulid::new();
        reg.insert("ali", id);

        assert_eq!(reg.resolve("ali"), Some(id));
        assert_eq!(reg.resolve(" ALI "), Some(id));
        assert_eq!(reg.resolve(&id.to_string()), Some(id));
        assert_eq!(reg.resolve("bo"), None);
        assert_eq!(reg.resolve(&Ulid::new().to_string()), None);
        assert_eq!(reg.id_for_slug("ALI"), None);
    }

    #[test]
    fn slug_rules() {
        assert!(is_valid_slug("coach-ali-2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Ali"));
        assert!(!is_valid_slug("ali_b"));
        assert!(!is_valid_slug(&"a".repeat(MAX_SLUG_LEN + 1)));
    }
}
