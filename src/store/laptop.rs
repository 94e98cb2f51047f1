use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::context::CallContext;
use crate::error::StoreError;
use crate::memory::to_bits;
use crate::pb::{Filter, Laptop};

/// Concurrent laptop catalog keyed by id.
///
/// Records are copied on the way in and on the way out, so no caller can
/// observe a mutation made by another caller.
#[derive(Default)]
pub struct LaptopStore {
    laptops: Arc<RwLock<HashMap<String, Laptop>>>,
}

impl Clone for LaptopStore {
    fn clone(&self) -> Self {
        Self {
            laptops: Arc::clone(&self.laptops),
        }
    }
}

impl LaptopStore {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy of `laptop`; fails if its id is already present.
    pub async fn save(&self, laptop: &Laptop) -> Result<(), StoreError> {
        let mut laptops = self.laptops.write().await;

        if laptops.contains_key(&laptop.id) {
            return Err(StoreError::AlreadyExists(laptop.id.clone()));
        }

        laptops.insert(laptop.id.clone(), laptop.clone());
        Ok(())
    }

    /// Returns a copy of the record with `id`.
    pub async fn find(&self, id: &str) -> Option<Laptop> {
        self.laptops.read().await.get(id).cloned()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.laptops.read().await.len()
    }

    /// Whether the catalog is empty.
    pub async fn is_empty(&self) -> bool {
        self.laptops.read().await.is_empty()
    }

    /// Visits a copy of every record matching `filter`, in unspecified order.
    ///
    /// `ctx` is checked before each record is examined. The first visitor error,
    /// or a cancellation, stops the scan and is returned. A concurrent `save`
    /// waits until the scan has finished.
    ///
    /// Returns the number of records visited.
    pub async fn search<F, Fut>(
        &self,
        ctx: &CallContext,
        filter: &Filter,
        mut visit: F,
    ) -> Result<usize, StoreError>
    where
        F: FnMut(Laptop) -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let laptops = self.laptops.read().await;
        let mut visited = 0;

        for laptop in laptops.values() {
            if let Err(e) = ctx.check() {
                debug!("search stopped after {visited} matches: {e}");
                return Err(e);
            }

            if is_qualified(filter, laptop) {
                visit(laptop.clone()).await?;
                visited += 1;
            }
        }

        Ok(visited)
    }
}

/// Whether `laptop` satisfies every constraint in `filter`.
///
/// Missing CPU or RAM values count as zero.
pub fn is_qualified(filter: &Filter, laptop: &Laptop) -> bool {
    let (cores, ghz) = laptop
        .cpu
        .as_ref()
        .map_or((0, 0.0), |cpu| (cpu.number_cores, cpu.min_ghz));
    let ram = laptop.ram.as_ref().map_or(0, to_bits);
    let min_ram = filter.min_ram.as_ref().map_or(0, to_bits);

    laptop.price <= filter.max_price
        && cores >= filter.min_cpu_cores
        && ghz >= filter.min_cpu_ghz
        && ram >= min_ram
}
