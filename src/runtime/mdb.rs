use rocksdb::{
    BlockBasedOptions, Cache, DB, Direction, Error as RocksError, IteratorMode, Options,
    ReadOptions, WriteBatch,
};
use std::{path::Path, sync::Arc};

/// LRU block cache size (data + index/filter blocks).
pub const BLOCK_CACHE_BYTES: usize = 256 << 20; // 256 MiB

/// Bloom filter bits/key (helps the outpoint point lookups).
pub const BLOOM_BITS_PER_KEY: f64 = 10.0;

/// Namespaced RocksDB handle. All keys passed in are RELATIVE; the handle
/// prepends its byte prefix so several indexes can share one DB.
#[derive(Clone)]
pub struct Mdb {
    db: Arc<DB>,
    prefix: Vec<u8>,
}

impl Mdb {
    pub fn from_db(db: Arc<DB>, prefix: impl AsRef<[u8]>) -> Self {
        Self { db, prefix: prefix.as_ref().to_vec() }
    }

    pub fn open(path: impl AsRef<Path>, prefix: impl AsRef<[u8]>) -> Result<Self, RocksError> {
        let cache = Cache::new_lru_cache(BLOCK_CACHE_BYTES);

        let mut table = BlockBasedOptions::default();
        table.set_block_cache(&cache);
        table.set_cache_index_and_filter_blocks(true);
        table.set_pin_l0_filter_and_index_blocks_in_cache(true);
        table.set_bloom_filter(BLOOM_BITS_PER_KEY, false);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(-1);
        opts.set_block_based_table_factory(&table);

        let db = DB::open(&opts, path)?;
        Ok(Self::from_db(Arc::new(db), prefix))
    }

    #[inline]
    pub fn prefixed(&self, k: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + k.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(k);
        out
    }

    pub fn get(&self, k: &[u8]) -> Result<Option<Vec<u8>>, RocksError> {
        self.db.get(self.prefixed(k))
    }

    /// Stage a set of writes and commit them as one atomic WriteBatch.
    pub fn bulk_write<F>(&self, build: F) -> Result<(), RocksError>
    where
        F: FnOnce(&mut MdbBatch<'_>),
    {
        let mut wb = WriteBatch::default();
        {
            let mut mb = MdbBatch { mdb: self, wb: &mut wb };
            build(&mut mb);
        }
        self.db.write(wb)
    }

    /// Ordered (key, value) pairs whose RELATIVE key starts with `rel_prefix`.
    pub fn scan_prefix(&self, rel_prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, RocksError> {
        let start = self.prefixed(rel_prefix);

        // Smallest key strictly greater than every key under the prefix.
        let mut ub = start.clone();
        for i in (0..ub.len()).rev() {
            if ub[i] != 0xff {
                ub[i] += 1;
                ub.truncate(i + 1);
                break;
            }
            if i == 0 {
                ub.clear();
            }
        }

        let mut ro = ReadOptions::default();
        if !ub.is_empty() {
            ro.set_iterate_upper_bound(ub);
        }
        ro.set_total_order_seek(true);

        let it = self.db.iterator_opt(IteratorMode::From(&start, Direction::Forward), ro);
        let mut out = Vec::new();
        for kv in it {
            let (k_full, v) = kv?;
            if !k_full.starts_with(&start) {
                break;
            }
            // Strip the namespace prefix so callers see relative keys.
            let rel = &k_full[self.prefix.len()..];
            out.push((rel.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

pub struct MdbBatch<'a> {
    mdb: &'a Mdb,
    wb: &'a mut WriteBatch,
}

impl<'a> MdbBatch<'a> {
    #[inline]
    pub fn put(&mut self, k: &[u8], v: &[u8]) {
        self.wb.put(self.mdb.prefixed(k), v);
    }
}
