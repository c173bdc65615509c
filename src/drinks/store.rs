//! Drink store backed by redb embedded database.
//!
//! Drinks are keyed by id with a secondary title index; both tables are
//! updated in the same write transaction so titles stay unique.

use anyhow::Context;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{Drink, DrinkChanges, Ingredient};

/// Primary table: id -> MessagePack<Drink>.
const DRINKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("drinks");
/// Secondary index: title -> id.
const TITLE_INDEX: TableDefinition<&str, u64> = TableDefinition::new("drink_titles");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("drink {0} not found")]
    NotFound(u64),

    #[error("a drink titled '{0}' already exists")]
    DuplicateTitle(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct DrinkStore {
    db: Database,
}

impl DrinkStore {
    /// Open or create a drink store at the given path.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open drink database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DRINKS_TABLE)?;
            let _ = write_txn.open_table(TITLE_INDEX)?;
        }
        write_txn.commit()?;

        let store = Self { db };
        debug!(drinks = store.count()?, "Opened drink store");
        Ok(store)
    }

    /// Insert a drink under the next free id.
    pub fn create(&self, title: &str, recipe: Vec<Ingredient>) -> Result<Drink, StoreError> {
        let write_txn = self.db.begin_write().context("Failed to begin transaction")?;
        let drink = {
            let mut drinks = write_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;
            let mut titles = write_txn.open_table(TITLE_INDEX).context("Failed to open title index")?;

            if titles.get(title).context("Failed to read title index")?.is_some() {
                return Err(StoreError::DuplicateTitle(title.to_string()));
            }

            let id = drinks
                .last()
                .context("Failed to read drinks table")?
                .map(|(key, _)| key.value() + 1)
                .unwrap_or(1);

            let drink = Drink {
                id,
                title: title.to_string(),
                recipe,
            };
            let data = rmp_serde::to_vec_named(&drink).context("Failed to serialize drink")?;
            drinks.insert(id, data.as_slice()).context("Failed to insert drink")?;
            titles.insert(title, id).context("Failed to update title index")?;
            drink
        };
        write_txn.commit().context("Failed to commit drink")?;

        info!(id = drink.id, title = %drink.title, "Drink created");
        Ok(drink)
    }

    pub fn get(&self, id: u64) -> Result<Drink, StoreError> {
        let read_txn = self.db.begin_read().context("Failed to begin transaction")?;
        let table = read_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;
        let entry = table.get(id).context("Failed to read drink")?;
        match entry {
            Some(value) => Ok(decode(value.value())?),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// All drinks in id order.
    pub fn list(&self) -> Result<Vec<Drink>, StoreError> {
        let read_txn = self.db.begin_read().context("Failed to begin transaction")?;
        let table = read_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;

        let mut drinks = Vec::new();
        for entry in table.iter().context("Failed to iterate drinks")? {
            let (key, value) = entry.context("Failed to read drink")?;
            match decode(value.value()) {
                Ok(drink) => drinks.push(drink),
                Err(e) => {
                    warn!(id = key.value(), error = %e, "Failed to deserialize drink, skipping");
                }
            }
        }
        Ok(drinks)
    }

    /// Apply changes to an existing drink.
    pub fn update(&self, id: u64, changes: DrinkChanges) -> Result<Drink, StoreError> {
        let write_txn = self.db.begin_write().context("Failed to begin transaction")?;
        let drink = {
            let mut drinks = write_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;
            let mut titles = write_txn.open_table(TITLE_INDEX).context("Failed to open title index")?;

            let mut drink = match drinks.get(id).context("Failed to read drink")? {
                Some(value) => decode(value.value())?,
                None => return Err(StoreError::NotFound(id)),
            };

            if let Some(title) = changes.title {
                if title != drink.title {
                    if titles.get(title.as_str()).context("Failed to read title index")?.is_some() {
                        return Err(StoreError::DuplicateTitle(title));
                    }
                    titles.remove(drink.title.as_str()).context("Failed to update title index")?;
                    titles.insert(title.as_str(), id).context("Failed to update title index")?;
                    drink.title = title;
                }
            }
            if let Some(recipe) = changes.recipe {
                drink.recipe = recipe;
            }

            let data = rmp_serde::to_vec_named(&drink).context("Failed to serialize drink")?;
            drinks.insert(id, data.as_slice()).context("Failed to update drink")?;
            drink
        };
        write_txn.commit().context("Failed to commit drink")?;

        info!(id, title = %drink.title, "Drink updated");
        Ok(drink)
    }

    /// Remove a drink, returning what was removed.
    pub fn delete(&self, id: u64) -> Result<Drink, StoreError> {
        let write_txn = self.db.begin_write().context("Failed to begin transaction")?;
        let drink = {
            let mut drinks = write_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;
            let mut titles = write_txn.open_table(TITLE_INDEX).context("Failed to open title index")?;

            let drink = match drinks.remove(id).context("Failed to remove drink")? {
                Some(value) => decode(value.value())?,
                None => return Err(StoreError::NotFound(id)),
            };
            titles.remove(drink.title.as_str()).context("Failed to update title index")?;
            drink
        };
        write_txn.commit().context("Failed to commit deletion")?;

        info!(id, title = %drink.title, "Drink deleted");
        Ok(drink)
    }

    /// Drop every drink and seed the store with a single glass of water.
    pub fn reset(&self) -> Result<Drink, StoreError> {
        let write_txn = self.db.begin_write().context("Failed to begin transaction")?;
        let water = Drink {
            id: 1,
            title: "water".to_string(),
            recipe: vec![Ingredient {
                name: "water".to_string(),
                color: "blue".to_string(),
                parts: 1,
            }],
        };
        {
            write_txn.delete_table(DRINKS_TABLE).context("Failed to drop drinks table")?;
            write_txn.delete_table(TITLE_INDEX).context("Failed to drop title index")?;

            let mut drinks = write_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;
            let mut titles = write_txn.open_table(TITLE_INDEX).context("Failed to open title index")?;

            let data = rmp_serde::to_vec_named(&water).context("Failed to serialize drink")?;
            drinks.insert(water.id, data.as_slice()).context("Failed to insert drink")?;
            titles.insert(water.title.as_str(), water.id).context("Failed to update title index")?;
        }
        write_txn.commit().context("Failed to commit reset")?;

        info!("Drink store reset");
        Ok(water)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read().context("Failed to begin transaction")?;
        let table = read_txn.open_table(DRINKS_TABLE).context("Failed to open drinks table")?;
        Ok(table.len().context("Failed to count drinks")? as usize)
    }
}

fn decode(bytes: &[u8]) -> anyhow::Result<Drink> {
    rmp_serde::from_slice(bytes).context("Failed to deserialize drink")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (DrinkStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drinks.redb");
        let store = DrinkStore::open(path).unwrap();
        (store, dir)
    }

    fn ingredient(name: &str, color: &str, parts: u32) -> Ingredient {
        Ingredient {
            name: name.to_string(),
            color: color.to_string(),
            parts,
        }
    }

    #[test]
    fn test_create_and_get() {
        let (store, _dir) = test_store();
        let created = store
            .create("latte", vec![ingredient("espresso", "brown", 1), ingredient("milk", "white", 3)])
            .unwrap();
        assert_eq!(created.id, 1);

        let retrieved = store.get(created.id).unwrap();
        assert_eq!(retrieved, created);
    }

    #[test]
    fn test_ids_follow_highest_existing() {
        let (store, _dir) = test_store();
        let a = store.create("a", vec![ingredient("a", "red", 1)]).unwrap();
        let b = store.create("b", vec![ingredient("b", "red", 1)]).unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        store.delete(a.id).unwrap();
        let c = store.create("c", vec![ingredient("c", "red", 1)]).unwrap();
        assert_eq!(c.id, 3);
    }

    #[test]
    fn test_duplicate_title_rejected() {
        let (store, _dir) = test_store();
        store.create("mocha", vec![ingredient("chocolate", "brown", 1)]).unwrap();

        let result = store.create("mocha", vec![ingredient("cocoa", "brown", 2)]);
        assert!(matches!(result, Err(StoreError::DuplicateTitle(ref t)) if t == "mocha"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let (store, _dir) = test_store();
        assert!(matches!(store.get(42), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn test_list_in_id_order() {
        let (store, _dir) = test_store();
        for title in ["espresso", "americano", "cortado"] {
            store.create(title, vec![ingredient("espresso", "brown", 1)]).unwrap();
        }

        let titles: Vec<String> = store.list().unwrap().into_iter().map(|d| d.title).collect();
        assert_eq!(titles, vec!["espresso", "americano", "cortado"]);
    }

    #[test]
    fn test_update_title_and_recipe() {
        let (store, _dir) = test_store();
        let drink = store.create("latte", vec![ingredient("milk", "white", 3)]).unwrap();

        let updated = store
            .update(
                drink.id,
                DrinkChanges {
                    title: Some("flat white".to_string()),
                    recipe: Some(vec![ingredient("milk", "white", 2)]),
                },
            )
            .unwrap();
        assert_eq!(updated.title, "flat white");
        assert_eq!(updated.recipe[0].parts, 2);

        // old title is free again
        assert!(store.create("latte", vec![ingredient("milk", "white", 3)]).is_ok());
    }

    #[test]
    fn test_update_rejects_taken_title() {
        let (store, _dir) = test_store();
        store.create("latte", vec![ingredient("milk", "white", 3)]).unwrap();
        let mocha = store.create("mocha", vec![ingredient("chocolate", "brown", 1)]).unwrap();

        let result = store.update(
            mocha.id,
            DrinkChanges {
                title: Some("latte".to_string()),
                recipe: None,
            },
        );
        assert!(matches!(result, Err(StoreError::DuplicateTitle(_))));
        assert_eq!(store.get(mocha.id).unwrap().title, "mocha");
    }

    #[test]
    fn test_update_keeping_own_title() {
        let (store, _dir) = test_store();
        let drink = store.create("latte", vec![ingredient("milk", "white", 3)]).unwrap();

        let updated = store
            .update(
                drink.id,
                DrinkChanges {
                    title: Some("latte".to_string()),
                    recipe: None,
                },
            )
            .unwrap();
        assert_eq!(updated, drink);
    }

    #[test]
    fn test_update_missing() {
        let (store, _dir) = test_store();
        assert!(matches!(
            store.update(7, DrinkChanges::default()),
            Err(StoreError::NotFound(7))
        ));
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = test_store();
        let drink = store.create("latte", vec![ingredient("milk", "white", 3)]).unwrap();

        assert_eq!(store.delete(drink.id).unwrap(), drink);
        assert!(matches!(store.get(drink.id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(drink.id), Err(StoreError::NotFound(_))));
        assert!(store.create("latte", vec![ingredient("milk", "white", 3)]).is_ok());
    }

    #[test]
    fn test_reset_seeds_water() {
        let (store, _dir) = test_store();
        store.create("latte", vec![ingredient("milk", "white", 3)]).unwrap();
        store.create("mocha", vec![ingredient("chocolate", "brown", 1)]).unwrap();

        let water = store.reset().unwrap();
        assert_eq!(store.list().unwrap(), vec![water]);
        assert!(matches!(
            store.create("water", vec![ingredient("water", "blue", 1)]),
            Err(StoreError::DuplicateTitle(_))
        ));
        assert_eq!(store.create("latte", vec![ingredient("milk", "white", 3)]).unwrap().id, 2);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drinks.redb");

        let id = {
            let store = DrinkStore::open(path.clone()).unwrap();
            store.create("cold brew", vec![ingredient("coffee", "black", 1)]).unwrap().id
        };

        let store = DrinkStore::open(path).unwrap();
        assert_eq!(store.get(id).unwrap().title, "cold brew");
        assert!(matches!(
            store.create("cold brew", vec![ingredient("coffee", "black", 1)]),
            Err(StoreError::DuplicateTitle(_))
        ));
    }
}
