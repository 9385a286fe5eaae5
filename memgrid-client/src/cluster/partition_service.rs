//! Partition count and partition owner table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

use memgrid_core::protocol::compute_partition_hash;
use memgrid_core::{GridError, Result};

use crate::connection::ConnectionId;

/// A single partition and its owner, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    id: i32,
    owner_uuid: Option<Uuid>,
}

impl Partition {
    /// Creates a partition with the given id and optional owner.
    pub fn new(id: i32, owner_uuid: Option<Uuid>) -> Self {
        Self { id, owner_uuid }
    }

    /// Returns the partition id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the UUID of the partition owner, if known.
    pub fn owner_uuid(&self) -> Option<Uuid> {
        self.owner_uuid
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.owner_uuid {
            Some(uuid) => write!(f, "Partition[id={}, owner={}]", self.id, uuid),
            None => write!(f, "Partition[id={}, owner=unknown]", self.id),
        }
    }
}

#[derive(Debug, Default)]
struct PartitionTable {
    connection: Option<ConnectionId>,
    version: i32,
    owners: HashMap<i32, Uuid>,
}

/// Tracks which member owns each partition.
///
/// The partition count is learned from the first successful authentication
/// and stays fixed for the lifetime of the client, across cluster switches.
#[derive(Debug, Default)]
pub struct PartitionService {
    partition_count: AtomicI32,
    table: RwLock<PartitionTable>,
}

impl PartitionService {
    /// Creates a service with an unknown partition count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the partition count, or 0 while it is unknown.
    pub fn partition_count(&self) -> i32 {
        self.partition_count.load(Ordering::Acquire)
    }

    /// Records the partition count reported by a member.
    ///
    /// The first call fixes the count. Later calls return `false` if they
    /// report a different count.
    pub fn check_and_set_partition_count(&self, count: i32) -> bool {
        match self
            .partition_count
            .compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::info!(partition_count = count, "partition count set");
                true
            }
            Err(current) => current == count,
        }
    }

    /// Returns the owner of `partition_id`, if known.
    pub fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        self.read().owners.get(&partition_id).copied()
    }

    /// Returns the partition with `partition_id` and its owner.
    pub fn partition(&self, partition_id: i32) -> Partition {
        Partition::new(partition_id, self.partition_owner(partition_id))
    }

    /// Returns the partition a serialized key belongs to.
    pub fn partition_id(&self, key: &[u8]) -> Result<i32> {
        let count = self.partition_count();
        if count == 0 {
            return Err(GridError::IllegalState(
                "partition count is not known yet".to_string(),
            ));
        }
        let hash = compute_partition_hash(key);
        Ok(if hash == i32::MIN { 0 } else { hash.abs() % count })
    }

    /// Applies a partitions view event received over `connection`.
    ///
    /// The table is replaced when the event comes from a different
    /// connection than the last applied one or carries a newer version.
    /// Empty tables are ignored.
    pub fn handle_partitions_view_event(
        &self,
        connection: ConnectionId,
        version: i32,
        partitions: Vec<(Uuid, Vec<i32>)>,
    ) {
        if partitions.is_empty() {
            tracing::debug!(%connection, version, "ignoring empty partition table");
            return;
        }

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.connection == Some(connection) && version <= table.version {
            tracing::debug!(
                %connection,
                version,
                current = table.version,
                "ignoring stale partition table"
            );
            return;
        }

        let mut owners = HashMap::new();
        for (owner, ids) in partitions {
            for id in ids {
                owners.insert(id, owner);
            }
        }
        tracing::debug!(%connection, version, partitions = owners.len(), "partition table updated");
        *table = PartitionTable {
            connection: Some(connection),
            version,
            owners,
        };
    }

    /// Forgets the owner table. The partition count is kept.
    pub fn reset(&self) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = PartitionTable::default();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PartitionTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_partition_count_wins() {
        let service = PartitionService::new();
        assert_eq!(service.partition_count(), 0);

        assert!(service.check_and_set_partition_count(271));
        assert!(service.check_and_set_partition_count(271));
        assert!(!service.check_and_set_partition_count(13));
        assert_eq!(service.partition_count(), 271);

        service.reset();
        assert_eq!(service.partition_count(), 271);
    }

    #[test]
    fn test_partition_id_requires_count() {
        let service = PartitionService::new();
        assert!(matches!(
            service.partition_id(b"key"),
            Err(GridError::IllegalState(_))
        ));

        service.check_and_set_partition_count(271);
        let id = service.partition_id(b"key").unwrap();
        assert!((0..271).contains(&id));
        assert_eq!(service.partition_id(b"key").unwrap(), id);
    }

    #[test]
    fn test_partition_table_versioning() {
        let service = PartitionService::new();
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        service.handle_partitions_view_event(first, 3, vec![(a, vec![0, 1]), (b, vec![2])]);
        assert_eq!(service.partition_owner(1), Some(a));
        assert_eq!(service.partition_owner(2), Some(b));

        service.handle_partitions_view_event(first, 2, vec![(b, vec![0, 1, 2])]);
        assert_eq!(service.partition_owner(0), Some(a));

        // Versions are per member, so a different connection always wins.
        service.handle_partitions_view_event(second, 1, vec![(b, vec![0, 1, 2])]);
        assert_eq!(service.partition_owner(0), Some(b));
        assert_eq!(service.partition(0), Partition::new(0, Some(b)));

        service.handle_partitions_view_event(second, 5, Vec::new());
        assert_eq!(service.partition_owner(0), Some(b));

        service.reset();
        assert!(service.partition_owner(0).is_none());
    }
}
