//! [`MetaStore`] implementation with Fjall (disk) and in-memory backends.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use reef_types::superblk::{PgInfoSuperblk, ShardInfoSuperblk};
use reef_types::{PgId, ShardId};
use tracing::debug;
use uuid::Uuid;

use crate::MetaError;
use crate::index::{IndexInner, IndexTable};

type Result<T> = std::result::Result<T, MetaError>;

/// Inner backend: either Fjall-backed (disk) or pure in-memory.
enum Backend {
    Fjall {
        keyspace: Keyspace,
        pg_sb: PartitionHandle,
        shard_sb: PartitionHandle,
        /// Registry of index table uuids, enumerated first on restart.
        index_dir: PartitionHandle,
    },
    Memory(Box<MemoryBackend>),
}

/// Pure in-memory storage for zero disk I/O mode.
struct MemoryBackend {
    /// PG id → encoded `PgInfoSuperblk`.
    pg_sb: RwLock<BTreeMap<PgId, Vec<u8>>>,
    /// Shard id → encoded `ShardInfoSuperblk`.
    shard_sb: RwLock<BTreeMap<ShardId, Vec<u8>>>,
    /// Index table uuid → table contents.
    #[allow(clippy::type_complexity)]
    tables: RwLock<HashMap<Uuid, Arc<RwLock<BTreeMap<[u8; 16], [u8; 12]>>>>>,
}

/// Durable metadata store: typed superblocks plus per-PG index tables.
///
/// Superblock writes are flushed synchronously; a record is either fully
/// present or absent after a crash.
pub struct MetaStore {
    backend: Backend,
    /// Keeps a temporary store's directory alive for the store's lifetime.
    _tmp: Option<tempfile::TempDir>,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path (Fjall backend).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let backend = Self::init_fjall(keyspace)?;
        Ok(Self {
            backend,
            _tmp: None,
        })
    }

    /// Open a temporary MetaStore backed by Fjall (cleaned up on drop).
    ///
    /// Still uses disk I/O (tempdir). For zero disk I/O, use
    /// [`in_memory`](Self::in_memory).
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let keyspace = Config::new(tmp.path()).open()?;
        let backend = Self::init_fjall(keyspace)?;
        Ok(Self {
            backend,
            _tmp: Some(tmp),
        })
    }

    /// Create a pure in-memory MetaStore. Zero disk I/O.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Box::new(MemoryBackend {
                pg_sb: RwLock::new(BTreeMap::new()),
                shard_sb: RwLock::new(BTreeMap::new()),
                tables: RwLock::new(HashMap::new()),
            })),
            _tmp: None,
        }
    }

    fn init_fjall(keyspace: Keyspace) -> Result<Backend> {
        let pg_sb = keyspace.open_partition("pg_sb", PartitionCreateOptions::default())?;
        let shard_sb = keyspace.open_partition("shard_sb", PartitionCreateOptions::default())?;
        let index_dir = keyspace.open_partition("index_dir", PartitionCreateOptions::default())?;
        Ok(Backend::Fjall {
            keyspace,
            pg_sb,
            shard_sb,
            index_dir,
        })
    }

    fn sync(&self) -> Result<()> {
        if let Backend::Fjall { keyspace, .. } = &self.backend {
            keyspace.persist(PersistMode::SyncAll)?;
        }
        Ok(())
    }

    // ----- PG superblocks -----

    /// Write (or rewrite) a PG superblock and flush it.
    pub fn put_pg_sb(&self, sb: &PgInfoSuperblk) -> Result<()> {
        let value = sb.to_bytes();
        match &self.backend {
            Backend::Fjall { pg_sb, .. } => {
                pg_sb.insert(sb.id.to_be_bytes(), value.as_slice())?;
            }
            Backend::Memory(m) => {
                m.pg_sb.write().expect("lock poisoned").insert(sb.id, value);
            }
        }
        self.sync()?;
        debug!(pg_id = sb.id, "persisted pg superblock");
        Ok(())
    }

    /// Load one PG superblock.
    pub fn get_pg_sb(&self, pg_id: PgId) -> Result<Option<PgInfoSuperblk>> {
        match &self.backend {
            Backend::Fjall { pg_sb, .. } => match pg_sb.get(pg_id.to_be_bytes())? {
                Some(bytes) => Ok(Some(PgInfoSuperblk::from_bytes(&bytes)?)),
                None => Ok(None),
            },
            Backend::Memory(m) => {
                let map = m.pg_sb.read().expect("lock poisoned");
                map.get(&pg_id)
                    .map(|b| PgInfoSuperblk::from_bytes(b))
                    .transpose()
                    .map_err(Into::into)
            }
        }
    }

    /// Enumerate all PG superblocks in id order.
    pub fn iter_pg_sbs(&self) -> Result<Vec<PgInfoSuperblk>> {
        let mut out = Vec::new();
        match &self.backend {
            Backend::Fjall { pg_sb, .. } => {
                for kv in pg_sb.iter() {
                    let (_, v) = kv?;
                    out.push(PgInfoSuperblk::from_bytes(&v)?);
                }
            }
            Backend::Memory(m) => {
                let map = m.pg_sb.read().expect("lock poisoned");
                for v in map.values() {
                    out.push(PgInfoSuperblk::from_bytes(v)?);
                }
            }
        }
        Ok(out)
    }

    /// Remove a PG superblock. Reserved for a future GC pass.
    pub fn remove_pg_sb(&self, pg_id: PgId) -> Result<()> {
        match &self.backend {
            Backend::Fjall { pg_sb, .. } => {
                pg_sb.remove(pg_id.to_be_bytes())?;
            }
            Backend::Memory(m) => {
                m.pg_sb.write().expect("lock poisoned").remove(&pg_id);
            }
        }
        self.sync()
    }

    // ----- Shard superblocks -----

    /// Write (or rewrite) a shard superblock and flush it.
    pub fn put_shard_sb(&self, sb: &ShardInfoSuperblk) -> Result<()> {
        let value = sb.to_bytes();
        match &self.backend {
            Backend::Fjall { shard_sb, .. } => {
                shard_sb.insert(sb.info.id.to_be_bytes(), value.as_slice())?;
            }
            Backend::Memory(m) => {
                m.shard_sb
                    .write()
                    .expect("lock poisoned")
                    .insert(sb.info.id, value);
            }
        }
        self.sync()?;
        debug!(shard_id = sb.info.id, "persisted shard superblock");
        Ok(())
    }

    /// Load one shard superblock.
    pub fn get_shard_sb(&self, shard_id: ShardId) -> Result<Option<ShardInfoSuperblk>> {
        match &self.backend {
            Backend::Fjall { shard_sb, .. } => match shard_sb.get(shard_id.to_be_bytes())? {
                Some(bytes) => Ok(Some(ShardInfoSuperblk::from_bytes(&bytes)?)),
                None => Ok(None),
            },
            Backend::Memory(m) => {
                let map = m.shard_sb.read().expect("lock poisoned");
                map.get(&shard_id)
                    .map(|b| ShardInfoSuperblk::from_bytes(b))
                    .transpose()
                    .map_err(Into::into)
            }
        }
    }

    /// Remove a shard superblock. Reserved for a future GC pass.
    pub fn remove_shard_sb(&self, shard_id: ShardId) -> Result<()> {
        match &self.backend {
            Backend::Fjall { shard_sb, .. } => {
                shard_sb.remove(shard_id.to_be_bytes())?;
            }
            Backend::Memory(m) => {
                m.shard_sb.write().expect("lock poisoned").remove(&shard_id);
            }
        }
        self.sync()
    }

    /// Enumerate all shard superblocks in shard-id order.
    pub fn iter_shard_sbs(&self) -> Result<Vec<ShardInfoSuperblk>> {
        let mut out = Vec::new();
        match &self.backend {
            Backend::Fjall { shard_sb, .. } => {
                for kv in shard_sb.iter() {
                    let (_, v) = kv?;
                    out.push(ShardInfoSuperblk::from_bytes(&v)?);
                }
            }
            Backend::Memory(m) => {
                let map = m.shard_sb.read().expect("lock poisoned");
                for v in map.values() {
                    out.push(ShardInfoSuperblk::from_bytes(v)?);
                }
            }
        }
        Ok(out)
    }

    // ----- Index tables -----

    /// Create a fresh index table under the given uuid.
    pub fn create_index_table(&self, uuid: Uuid) -> Result<IndexTable> {
        match &self.backend {
            Backend::Fjall { index_dir, .. } => {
                index_dir.insert(uuid.as_bytes(), b"")?;
                let table = self.open_fjall_table(uuid)?;
                self.sync()?;
                debug!(%uuid, "created index table");
                Ok(table)
            }
            Backend::Memory(m) => {
                let inner = Arc::new(RwLock::new(BTreeMap::new()));
                m.tables
                    .write()
                    .expect("lock poisoned")
                    .insert(uuid, inner.clone());
                Ok(IndexTable::new(uuid, IndexInner::Memory(inner)))
            }
        }
    }

    /// Open an existing index table.
    pub fn open_index_table(&self, uuid: Uuid) -> Result<IndexTable> {
        match &self.backend {
            Backend::Fjall { index_dir, .. } => {
                if index_dir.get(uuid.as_bytes())?.is_none() {
                    return Err(MetaError::UnknownIndexTable(uuid));
                }
                self.open_fjall_table(uuid)
            }
            Backend::Memory(m) => {
                let tables = m.tables.read().expect("lock poisoned");
                let inner = tables
                    .get(&uuid)
                    .cloned()
                    .ok_or(MetaError::UnknownIndexTable(uuid))?;
                Ok(IndexTable::new(uuid, IndexInner::Memory(inner)))
            }
        }
    }

    /// Enumerate the uuids of all index tables ever created here.
    pub fn list_index_tables(&self) -> Result<Vec<Uuid>> {
        let mut out = Vec::new();
        match &self.backend {
            Backend::Fjall { index_dir, .. } => {
                for kv in index_dir.iter() {
                    let (k, _) = kv?;
                    let arr: [u8; 16] = k[..].try_into().map_err(|_| {
                        MetaError::CorruptData(format!(
                            "index dir key expected 16 bytes, got {}",
                            k.len()
                        ))
                    })?;
                    out.push(Uuid::from_bytes(arr));
                }
            }
            Backend::Memory(m) => {
                out.extend(m.tables.read().expect("lock poisoned").keys().copied());
            }
        }
        Ok(out)
    }

    fn open_fjall_table(&self, uuid: Uuid) -> Result<IndexTable> {
        let Backend::Fjall { keyspace, .. } = &self.backend else {
            unreachable!("fjall table on memory backend");
        };
        let part = keyspace.open_partition(
            &format!("index-{uuid}"),
            PartitionCreateOptions::default(),
        )?;
        Ok(IndexTable::new(uuid, IndexInner::Fjall(part)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
