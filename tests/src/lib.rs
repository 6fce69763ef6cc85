// Copyright 2024 hearth
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scenarios across the worker, the region storage and the files on disk.

use std::path::Path;

use bytes::Bytes;
use hearth_region::{Config, RegionCodec};
use hearth_worker::{IoWorker, IoWorkerBuilder, WorkerConfig};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

pub fn region_config(dimension_root: &Path, codec: RegionCodec) -> Config {
    Config::for_dimension(dimension_root).with_compression(codec)
}

pub fn start_worker(dimension_root: &Path, codec: RegionCodec) -> IoWorker {
    let config = WorkerConfig::new("e2e", region_config(dimension_root, codec));
    IoWorkerBuilder::new(config).build()
}

/// Deterministic payload, partly compressible.
pub fn payload(seed: u64, len: usize) -> Bytes {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    let noisy = rng.gen_range(0..=len);
    rng.fill_bytes(&mut data[..noisy]);
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        fs::{self, OpenOptions},
        io::{Read, Seek, SeekFrom, Write},
    };

    use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
    use hearth_common::{ChunkPos, RegionPos, MAX_OPEN_REGIONS, SECTOR_BYTES};
    use hearth_region::{RegionFile, RegionStorage, WriteCommand};
    use hearth_utils::logger::install_fmt_log;
    use hearth_worker::HeadVisitor;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn round_trip_every_codec() {
        install_fmt_log();
        for codec in [
            RegionCodec::Gzip,
            RegionCodec::Deflate,
            RegionCodec::Uncompressed,
            RegionCodec::Lz4,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let mut expected = HashMap::new();
            {
                let worker = start_worker(dir.path(), codec);
                for i in 0..32u64 {
                    let pos = ChunkPos::new(i as i32 * 13 - 200, 77 - i as i32 * 5);
                    let data = payload(i, 100 + i as usize * 3000);
                    worker.store(pos, WriteCommand::Write(data.clone())).await.unwrap();
                    expected.insert(pos, data);
                }
                worker.close().await.unwrap();
            }

            let worker = start_worker(dir.path(), codec);
            for (pos, data) in &expected {
                assert_eq!(
                    worker.load(*pos).await.unwrap().as_ref(),
                    Some(data),
                    "{} {}",
                    codec,
                    pos
                );
            }
            worker.close().await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn regions_remember_their_codec() {
        let dir = tempfile::tempdir().unwrap();
        let pos = ChunkPos::new(5, 5);
        let data = payload(9, 50_000);

        let gzip = start_worker(dir.path(), RegionCodec::Gzip);
        gzip.store(pos, WriteCommand::Write(data.clone())).await.unwrap();
        gzip.close().await.unwrap();

        // entries keep their codec id, a different write codec still reads them.
        let lz4 = start_worker(dir.path(), RegionCodec::Lz4);
        assert_eq!(lz4.load(pos).await.unwrap(), Some(data));
        lz4.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_stores_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let worker = start_worker(dir.path(), RegionCodec::Deflate);
        let pos = ChunkPos::new(31, 31);

        // few enough for join_all to poll them in order.
        let stores = (0..20u64).map(|i| worker.store(pos, WriteCommand::Write(payload(i, 2000))));
        for res in futures::future::join_all(stores).await {
            res.unwrap();
        }
        assert_eq!(worker.load(pos).await.unwrap(), Some(payload(19, 2000)));
        worker.close().await.unwrap();

        let worker = start_worker(dir.path(), RegionCodec::Deflate);
        assert_eq!(worker.load(pos).await.unwrap(), Some(payload(19, 2000)));
        worker.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pending_write_is_visible() {
        let dir = tempfile::tempdir().unwrap();
        let worker = start_worker(dir.path(), RegionCodec::Deflate);
        let pos = ChunkPos::new(0, 1);
        let data = payload(3, 4000);

        let (stored, loaded, scanned, exists) = tokio::join!(
            worker.store(pos, WriteCommand::Write(data.clone())),
            worker.load(pos),
            worker.scan(pos, HeadVisitor::new(16)),
            worker.chunk_exists(pos),
        );
        stored.unwrap();
        assert_eq!(loaded.unwrap(), Some(data.clone()));
        assert_eq!(scanned.unwrap().head(), &data[..16]);
        assert!(exists.unwrap());

        let (deleted, loaded, exists) = tokio::join!(
            worker.store(pos, WriteCommand::Delete),
            worker.load(pos),
            worker.chunk_exists(pos),
        );
        deleted.unwrap();
        assert_eq!(loaded.unwrap(), None);
        assert!(!exists.unwrap());
        worker.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_removes_overflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let worker = start_worker(dir.path(), RegionCodec::Uncompressed);
        let pos = ChunkPos::new(-7, 12);
        let big = payload(1, 2 << 20);
        let overflow = dir.path().join("region").join(pos.external_file_name());

        worker.store(pos, WriteCommand::Write(big.clone())).await.unwrap();
        assert!(overflow.is_file());
        assert_eq!(worker.load(pos).await.unwrap(), Some(big));
        let all = worker.scan(pos, Vec::new()).await.unwrap();
        assert_eq!(all.len(), 2 << 20);

        worker.store(pos, WriteCommand::Delete).await.unwrap();
        assert!(!overflow.exists());
        assert_eq!(worker.load(pos).await.unwrap(), None);
        assert!(!worker.chunk_exists(pos).await.unwrap());
        worker.close().await.unwrap();
    }

    #[test]
    fn open_regions_stay_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = region_config(dir.path(), RegionCodec::Deflate);
        assert_eq!(config.max_open_regions, MAX_OPEN_REGIONS);
        let mut storage = RegionStorage::new(&config);

        let regions: Vec<RegionPos> = (0..300).map(|i| RegionPos::new(i % 20, i / 20)).collect();
        for region in &regions {
            let pos = region.min_chunk();
            storage
                .write(pos, &WriteCommand::Write(Bytes::from(format!("{}", region))))
                .unwrap();
            assert!(storage.open_region_count() <= MAX_OPEN_REGIONS);
        }
        assert_eq!(storage.open_region_count(), MAX_OPEN_REGIONS);
        // the oldest regions were evicted first.
        let open = storage.open_regions();
        assert_eq!(open[0], regions[299]);
        assert!(!open.contains(&regions[0]));
        assert!(open.contains(&regions[44]));

        for region in &regions {
            assert_eq!(
                storage.read(region.min_chunk()).unwrap(),
                Some(Bytes::from(format!("{}", region)))
            );
        }
        storage.close_all().unwrap();
        for region in &regions {
            let len = fs::metadata(storage.region_path(*region)).unwrap().len();
            assert_eq!(len % SECTOR_BYTES as u64, 0, "{}", region);
        }
    }

    #[test]
    fn live_entries_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");
        let mut region =
            RegionFile::open(&path, dir.path(), RegionCodec::Uncompressed, false).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut live: HashMap<ChunkPos, Bytes> = HashMap::new();

        for round in 0..600u64 {
            let pos = RegionPos::new(0, 0).chunk_at(rng.gen_range(0..64));
            if rng.gen_bool(0.3) {
                region.clear(pos).unwrap();
                live.remove(&pos);
            } else {
                let data = payload(round, rng.gen_range(1..6 * SECTOR_BYTES));
                region.write(pos, &data).unwrap();
                live.insert(pos, data);
            }
        }

        let mut ranges: Vec<(u32, u32)> = live
            .keys()
            .map(|pos| region.sector_range(*pos).unwrap())
            .collect();
        ranges.sort();
        assert!(ranges[0].0 >= 2);
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
        for (pos, data) in &live {
            assert_eq!(region.read_chunk(*pos).unwrap().as_deref(), Some(&data[..]));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn damaged_entry_reads_absent() {
        let dir = tempfile::tempdir().unwrap();
        let good = ChunkPos::new(1, 0);
        let bad = ChunkPos::new(2, 0);
        {
            let worker = start_worker(dir.path(), RegionCodec::Deflate);
            worker.store(good, WriteCommand::Write(payload(1, 9000))).await.unwrap();
            worker.store(bad, WriteCommand::Write(payload(2, 9000))).await.unwrap();
            worker.close().await.unwrap();
        }

        // inflate the declared length of the bad entry far beyond its sectors.
        let path = dir.path().join("region/r.0.0.mca");
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(bad.region_local_index() as u64 * 4)).unwrap();
        let offset = file.read_u32::<BigEndian>().unwrap();
        file.seek(SeekFrom::Start((offset >> 8) as u64 * SECTOR_BYTES as u64)).unwrap();
        file.write_u32::<BigEndian>(0x0fff_ffff).unwrap();
        file.flush().unwrap();
        drop(file);

        let worker = start_worker(dir.path(), RegionCodec::Deflate);
        assert_eq!(worker.load(bad).await.unwrap(), None);
        assert!(!worker.chunk_exists(bad).await.unwrap());
        assert_eq!(worker.load(good).await.unwrap(), Some(payload(1, 9000)));

        // the slot is still usable.
        worker.store(bad, WriteCommand::Write(payload(3, 10))).await.unwrap();
        assert_eq!(worker.load(bad).await.unwrap(), Some(payload(3, 10)));
        worker.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concrete_layout() {
        let dir = tempfile::tempdir().unwrap();
        let worker = start_worker(dir.path(), RegionCodec::Deflate);
        let pos = ChunkPos::new(3, 5);
        let mut data = vec![0u8; 10_000];
        StdRng::seed_from_u64(5).fill_bytes(&mut data);
        worker.store(pos, WriteCommand::Write(Bytes::from(data))).await.unwrap();
        worker.close().await.unwrap();

        let mut header = [0u8; SECTOR_BYTES];
        fs::File::open(dir.path().join("region/r.0.0.mca"))
            .unwrap()
            .read_exact(&mut header)
            .unwrap();
        let offset = BigEndian::read_u32(&header[163 * 4..164 * 4]);
        assert_eq!(offset & 0xff, 3);
        assert!(offset >> 8 >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let overworld = start_worker(&dir.path().join("overworld"), RegionCodec::Deflate);
        let nether = start_worker(&dir.path().join("nether"), RegionCodec::Lz4);
        let pos = ChunkPos::new(0, 0);

        let (a, b) = tokio::join!(
            overworld.store(pos, WriteCommand::Write(Bytes::from_static(b"grass"))),
            nether.store(pos, WriteCommand::Write(Bytes::from_static(b"lava"))),
        );
        a.unwrap();
        b.unwrap();
        nether.close().await.unwrap();

        assert_eq!(
            overworld.load(pos).await.unwrap(),
            Some(Bytes::from_static(b"grass"))
        );
        assert!(nether.load(pos).await.is_err());
        overworld.close().await.unwrap();
    }
}
