use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use stockledger_core::{DomainError, MovementId, ProductId, UserId};
use stockledger_inventory::{
    MovementView, NewMovement, ProductStock, Reconciliation, StockMovement, guard,
};

use super::{LedgerError, MovementLedger, MovementQuery, log_committed, sort_newest_first};

type ProductSlot = Arc<Mutex<ProductStock>>;

/// In-memory stock ledger.
///
/// Intended for tests/dev. Each product sits behind its own mutex, which plays
/// the role of the row lock: writers hold it for the whole read-check-write, so
/// writes to the same product serialize while writes to different products run
/// in parallel.
///
/// Lock order is always product slot, then the movement table. Reads never
/// take a product slot except `product_stock` and `reconcile`; names for
/// enrichment come from `product_names`.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    products: RwLock<HashMap<ProductId, ProductSlot>>,
    product_names: RwLock<HashMap<ProductId, String>>,
    users: RwLock<HashMap<UserId, String>>,
    movements: RwLock<HashMap<MovementId, StockMovement>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product, as the catalog would.
    ///
    /// Re-registering an id overwrites the existing slot in place, waiting for
    /// any writer that holds it, so no writer is left updating a detached copy.
    pub fn register_product(&self, product: ProductStock) -> Result<ProductId, LedgerError> {
        let id = product.id;
        let name = product.name.clone();

        let existing = {
            let mut products = self.products.write().map_err(|_| poisoned())?;
            match products.entry(id) {
                Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Mutex::new(product.clone())));
                    None
                }
            }
        };
        // The map lock is released before waiting on the slot.
        if let Some(slot) = existing {
            *lock_slot(&slot)? = product;
        }

        self.product_names
            .write()
            .map_err(|_| poisoned())?
            .insert(id, name);
        Ok(id)
    }

    /// Convenience for tests/dev: a new product with zero stock.
    pub fn add_product(
        &self,
        name: impl Into<String>,
        price: Decimal,
        min_quantity_level: i64,
    ) -> Result<ProductId, LedgerError> {
        self.register_product(ProductStock {
            id: ProductId::new(),
            name: name.into(),
            price,
            quantity_on_hand: 0,
            min_quantity_level,
        })
    }

    /// Register (or rename) a user, as the accounts service would.
    pub fn register_user(&self, id: UserId, name: impl Into<String>) -> Result<(), LedgerError> {
        self.users
            .write()
            .map_err(|_| poisoned())?
            .insert(id, name.into());
        Ok(())
    }

    fn slot(&self, product_id: ProductId) -> Result<ProductSlot, LedgerError> {
        self.products
            .read()
            .map_err(|_| poisoned())?
            .get(&product_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")).into())
    }

    fn ensure_user(&self, actor_id: UserId) -> Result<(), LedgerError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        if !users.contains_key(&actor_id) {
            return Err(DomainError::not_found(format!("user {actor_id}")).into());
        }
        Ok(())
    }

    fn create_locked(&self, movement: NewMovement) -> Result<(StockMovement, ProductStock), LedgerError> {
        let slot = self.slot(movement.product_id)?;
        self.ensure_user(movement.actor_id)?;

        let mut product = lock_slot(&slot)?;
        let next = guard::apply(
            product.id,
            product.quantity_on_hand,
            movement.kind,
            movement.quantity,
        )?;

        // Acquire everything fallible before mutating anything.
        let mut movements = self.movements.write().map_err(|_| poisoned())?;
        let committed = movement.into_movement(MovementId::new(), Utc::now());
        movements.insert(committed.id, committed.clone());
        product.quantity_on_hand = next;

        Ok((committed, product.clone()))
    }

    fn delete_locked(&self, movement_id: MovementId) -> Result<(StockMovement, ProductStock), LedgerError> {
        let product_id = self
            .movements
            .read()
            .map_err(|_| poisoned())?
            .get(&movement_id)
            .map(|m| m.product_id)
            .ok_or_else(|| LedgerError::NotFound(format!("movement {movement_id}")))?;

        let slot = self.slot(product_id)?;
        let mut product = lock_slot(&slot)?;
        let mut movements = self.movements.write().map_err(|_| poisoned())?;

        // Re-check under the lock: a concurrent delete may have won.
        let (kind, quantity) = match movements.get(&movement_id) {
            Some(m) => (m.kind, m.quantity),
            None => return Err(LedgerError::NotFound(format!("movement {movement_id}"))),
        };

        let next = guard::reverse(product.id, product.quantity_on_hand, kind, quantity)?;
        let removed = movements
            .remove(&movement_id)
            .ok_or_else(|| LedgerError::NotFound(format!("movement {movement_id}")))?;
        product.quantity_on_hand = next;

        Ok((removed, product.clone()))
    }

    fn snapshot_movements<F>(&self, filter: F) -> Result<Vec<StockMovement>, LedgerError>
    where
        F: Fn(&StockMovement) -> bool,
    {
        Ok(self
            .movements
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|m| filter(m))
            .cloned()
            .collect())
    }

    fn enrich(&self, movements: Vec<StockMovement>) -> Result<Vec<MovementView>, LedgerError> {
        let product_names = self.product_names.read().map_err(|_| poisoned())?;
        let users = self.users.read().map_err(|_| poisoned())?;

        let mut views = Vec::with_capacity(movements.len());
        for movement in movements {
            let product_name = product_names.get(&movement.product_id).cloned();
            let actor_name = users.get(&movement.actor_id).cloned();
            views.push(MovementView {
                movement,
                product_name,
                actor_name,
            });
        }
        sort_newest_first(&mut views);
        Ok(views)
    }
}

fn poisoned() -> LedgerError {
    LedgerError::StorageFailure("lock poisoned".to_string())
}

fn lock_slot(slot: &ProductSlot) -> Result<MutexGuard<'_, ProductStock>, LedgerError> {
    slot.lock().map_err(|_| poisoned())
}

#[async_trait]
impl MovementLedger for InMemoryLedger {
    async fn create_movement(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        let product_id = movement.product_id;
        match self.create_locked(movement) {
            Ok((committed, product)) => {
                log_committed("create", &committed, &product);
                Ok(committed)
            }
            Err(e) => {
                tracing::warn!(product_id = %product_id, error = %e, "stock movement rejected");
                Err(e)
            }
        }
    }

    async fn delete_movement(&self, movement_id: MovementId) -> Result<StockMovement, LedgerError> {
        match self.delete_locked(movement_id) {
            Ok((removed, product)) => {
                log_committed("delete", &removed, &product);
                Ok(removed)
            }
            Err(e) => {
                tracing::warn!(movement_id = %movement_id, error = %e, "stock movement deletion rejected");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MovementQuery for InMemoryLedger {
    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<MovementView>, LedgerError> {
        let found = self.snapshot_movements(|m| m.id == movement_id)?;
        Ok(self.enrich(found)?.into_iter().next())
    }

    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<MovementView>, LedgerError> {
        let found = self.snapshot_movements(|m| m.product_id == product_id)?;
        self.enrich(found)
    }

    async fn list_all(&self) -> Result<Vec<MovementView>, LedgerError> {
        let found = self.snapshot_movements(|_| true)?;
        self.enrich(found)
    }

    async fn product_stock(&self, product_id: ProductId) -> Result<Option<ProductStock>, LedgerError> {
        match self.slot(product_id) {
            Ok(slot) => Ok(Some(lock_slot(&slot)?.clone())),
            Err(LedgerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn reconcile(&self, product_id: ProductId) -> Result<Reconciliation, LedgerError> {
        let slot = self.slot(product_id)?;
        // Holding the product lock keeps quantity and movements from moving apart.
        let product = lock_slot(&slot)?;
        let movements = self.movements.read().map_err(|_| poisoned())?;
        let own: Vec<&StockMovement> = movements
            .values()
            .filter(|m| m.product_id == product_id)
            .collect();

        Ok(Reconciliation {
            product_id,
            quantity_on_hand: product.quantity_on_hand,
            movement_sum: guard::signed_sum(own.iter().copied()),
            movement_count: own.len() as u64,
        })
    }
}
