use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    native::{self, DescriptorType, Driver},
    Error,
};

const DESCRIPTOR_TYPES_COUNT: usize = 7;

/// Descriptor types in the order counters are stored.
pub const DESCRIPTOR_TYPES: [DescriptorType; DESCRIPTOR_TYPES_COUNT] = [
    DescriptorType::Sampler,
    DescriptorType::SampledImage,
    DescriptorType::StorageImage,
    DescriptorType::UniformBuffer,
    DescriptorType::StorageBuffer,
    DescriptorType::UniformBufferDynamic,
    DescriptorType::StorageBufferDynamic,
];

/// Sets per pool.
pub const POOL_MAX_SETS: u32 = 1000;

/// Descriptors of each type per pool.
pub const POOL_DESCRIPTOR_COUNT: u32 = 100;

#[inline]
fn type_index(ty: DescriptorType) -> usize {
    let index = ty as usize;
    debug_assert_eq!(DESCRIPTOR_TYPES[index], ty);
    index
}

/// Number of descriptors of each type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorResourceCounts {
    counts: [u32; DESCRIPTOR_TYPES_COUNT],
}

impl DescriptorResourceCounts {
    /// Counts without descriptors.
    pub const fn zero() -> Self {
        DescriptorResourceCounts {
            counts: [0; DESCRIPTOR_TYPES_COUNT],
        }
    }

    /// Same count for every type.
    pub const fn uniform(count: u32) -> Self {
        DescriptorResourceCounts {
            counts: [count; DESCRIPTOR_TYPES_COUNT],
        }
    }

    /// Counts one descriptor per entry.
    pub fn from_types(types: &[DescriptorType]) -> Self {
        let mut counts = Self::zero();
        for &ty in types {
            counts.add(ty, 1);
        }
        counts
    }

    #[inline]
    pub fn get(&self, ty: DescriptorType) -> u32 {
        self.counts[type_index(ty)]
    }

    #[inline]
    pub fn add(&mut self, ty: DescriptorType, count: u32) {
        self.counts[type_index(ty)] += count;
    }

    /// Iterates over types with non-zero count.
    pub fn iter(&self) -> impl Iterator<Item = (DescriptorType, u32)> + '_ {
        DESCRIPTOR_TYPES
            .iter()
            .zip(self.counts.iter())
            .filter(|(_, &count)| count > 0)
            .map(|(&ty, &count)| (ty, count))
    }

    /// Returns `true` if every counter of `self` is at least one in `request`.
    fn covers(&self, request: &Self) -> bool {
        self.counts
            .iter()
            .zip(request.counts.iter())
            .all(|(have, want)| have >= want)
    }

    fn take(&mut self, request: &Self) {
        for (have, want) in self.counts.iter_mut().zip(request.counts.iter()) {
            *have -= *want;
        }
    }

    fn restore(&mut self, request: &Self) {
        for (have, want) in self.counts.iter_mut().zip(request.counts.iter()) {
            *have += *want;
        }
    }
}

/// Descriptor set together with the pool it came from.
/// Handed back unchanged to [`DescriptorPoolManager::free`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorAllocationToken {
    pub set: native::DescriptorSet,
    pub pool: native::DescriptorPool,
}

#[derive(Debug)]
struct PoolRecord {
    pool: native::DescriptorPool,
    remaining_sets: u32,
    remaining: DescriptorResourceCounts,
}

impl PoolRecord {
    fn try_reserve(&mut self, counts: &DescriptorResourceCounts) -> bool {
        if self.remaining_sets > 0 && self.remaining.covers(counts) {
            self.remaining_sets -= 1;
            self.remaining.take(counts);
            true
        } else {
            false
        }
    }

    fn release(&mut self, counts: &DescriptorResourceCounts) {
        self.remaining_sets += 1;
        self.remaining.restore(counts);
    }
}

/// Hands out descriptor sets from a growing list of fixed-size pools.
#[derive(Debug)]
pub struct DescriptorPoolManager {
    driver: Arc<dyn Driver>,
    pools: Mutex<Vec<PoolRecord>>,
}

impl DescriptorPoolManager {
    pub(crate) fn new(driver: Arc<dyn Driver>) -> Result<Self, Error> {
        let first = create_pool(&*driver)?;
        Ok(DescriptorPoolManager {
            driver,
            pools: Mutex::new(vec![first]),
        })
    }

    /// Allocates a set with given layout.
    /// `counts` must describe the layout's descriptors.
    pub fn allocate(
        &self,
        counts: &DescriptorResourceCounts,
        layout: native::DescriptorSetLayout,
    ) -> Result<DescriptorAllocationToken, Error> {
        if !DescriptorResourceCounts::uniform(POOL_DESCRIPTOR_COUNT).covers(counts) {
            return Err(Error::invalid(format!(
                "Descriptor counts {:?} exceed pool capacity",
                counts
            )));
        }

        let mut pools = self.pools.lock();

        let index = match pools.iter_mut().position(|record| record.try_reserve(counts)) {
            Some(index) => index,
            None => {
                let mut record = create_pool(&*self.driver)?;
                let reserved = record.try_reserve(counts);
                debug_assert!(reserved);
                pools.push(record);
                pools.len() - 1
            }
        };

        let record = &mut pools[index];
        match self.driver.allocate_descriptor_set(record.pool, layout) {
            Ok(set) => Ok(DescriptorAllocationToken {
                set,
                pool: record.pool,
            }),
            Err(err) => {
                record.release(counts);
                Err(err.into())
            }
        }
    }

    /// Frees a set and restores the counters of its pool.
    pub fn free(&self, token: DescriptorAllocationToken, counts: &DescriptorResourceCounts) {
        let mut pools = self.pools.lock();

        match pools.iter_mut().find(|record| record.pool == token.pool) {
            Some(record) => {
                if let Err(err) = self.driver.free_descriptor_set(record.pool, token.set) {
                    tracing::error!("Failed to free descriptor set {:?}: {}", token.set, err);
                }
                record.release(counts);
            }
            None => {
                tracing::error!("Descriptor set {:?} freed to unknown pool", token);
            }
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Remaining sets and descriptors of every pool, in creation order.
    pub fn remaining(&self) -> Vec<(u32, DescriptorResourceCounts)> {
        self.pools
            .lock()
            .iter()
            .map(|record| (record.remaining_sets, record.remaining))
            .collect()
    }

    pub(crate) fn destroy_all(&self) {
        for record in self.pools.lock().drain(..) {
            self.driver.destroy_descriptor_pool(record.pool);
        }
    }
}

fn create_pool(driver: &dyn Driver) -> Result<PoolRecord, Error> {
    let remaining = DescriptorResourceCounts::uniform(POOL_DESCRIPTOR_COUNT);
    let pool = driver.create_descriptor_pool(POOL_MAX_SETS, &remaining)?;
    tracing::debug!("Descriptor pool {:?} created", pool);

    Ok(PoolRecord {
        pool,
        remaining_sets: POOL_MAX_SETS,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessConfig, HeadlessDriver};

    fn manager() -> (Arc<HeadlessDriver>, DescriptorPoolManager) {
        let driver = Arc::new(HeadlessDriver::new(HeadlessConfig::default()));
        let manager = DescriptorPoolManager::new(driver.clone()).unwrap();
        (driver, manager)
    }

    fn counts(uniform: u32, sampled: u32) -> DescriptorResourceCounts {
        let mut counts = DescriptorResourceCounts::zero();
        counts.add(DescriptorType::UniformBuffer, uniform);
        counts.add(DescriptorType::SampledImage, sampled);
        counts
    }

    #[test]
    fn allocations_and_frees_restore_counters() {
        let (_, manager) = manager();
        let initial = manager.remaining();
        let request = counts(2, 1);

        let tokens: Vec<_> = (0..10)
            .map(|_| manager.allocate(&request, native::DescriptorSetLayout(1)).unwrap())
            .collect();

        let (sets, remaining) = manager.remaining()[0];
        assert_eq!(sets, POOL_MAX_SETS - 10);
        assert_eq!(remaining.get(DescriptorType::UniformBuffer), 80);
        assert_eq!(remaining.get(DescriptorType::SampledImage), 90);
        assert_eq!(remaining.get(DescriptorType::Sampler), 100);

        for token in tokens {
            manager.free(token, &request);
        }

        assert_eq!(manager.remaining(), initial);
    }

    #[test]
    fn dynamic_counters_are_restored() {
        let (_, manager) = manager();
        let mut request = DescriptorResourceCounts::zero();
        request.add(DescriptorType::UniformBufferDynamic, 3);
        request.add(DescriptorType::StorageBufferDynamic, 4);

        let token = manager
            .allocate(&request, native::DescriptorSetLayout(1))
            .unwrap();
        manager.free(token, &request);

        let (_, remaining) = manager.remaining()[0];
        assert_eq!(remaining, DescriptorResourceCounts::uniform(POOL_DESCRIPTOR_COUNT));
    }

    #[test]
    fn overflow_opens_new_pool() {
        let (_, manager) = manager();
        let request = counts(60, 0);

        let first = manager
            .allocate(&request, native::DescriptorSetLayout(1))
            .unwrap();
        let second = manager
            .allocate(&request, native::DescriptorSetLayout(1))
            .unwrap();

        assert_eq!(manager.pool_count(), 2);
        assert_ne!(first.pool, second.pool);

        manager.free(second, &request);
        let third = manager
            .allocate(&request, native::DescriptorSetLayout(1))
            .unwrap();
        assert_eq!(third.pool, second.pool);
        assert_eq!(manager.pool_count(), 2);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let (_, manager) = manager();
        assert!(matches!(
            manager.allocate(&counts(101, 0), native::DescriptorSetLayout(1)),
            Err(Error::InvalidOperation { .. })
        ));
    }
}
