//! Startup seeding of the category list.

use crate::store::{Store, StoreError};

pub const DEFAULT_CATEGORIES: [&str; 6] = ["Electronics", "Fashion", "Home & Garden", "Sports", "Books", "Automotive"];

/// Creates whichever default categories are missing. Returns how many were created.
pub async fn seed_categories(store: &dyn Store) -> Result<usize, StoreError> {
    let existing = store.categories().await?;
    let mut created = 0;
    for name in DEFAULT_CATEGORIES {
        if existing.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        match store.create_category(name).await {
            Ok(_) => created += 1,
            // Another instance seeded it first.
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }
    if created > 0 {
        tracing::info!(created, "default categories seeded");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        store.create_category("books").await.unwrap();
        assert_eq!(seed_categories(&store).await.unwrap(), 5);
        assert_eq!(seed_categories(&store).await.unwrap(), 0);
        assert_eq!(store.categories().await.unwrap().len(), 6);
    }
}
