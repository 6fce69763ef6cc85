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
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hearth_common::ChunkPos;
use hearth_region::{RegionCodec, RegionFile};
use rand::{rngs::StdRng, RngCore, SeedableRng};

fn payload(len: usize) -> Vec<u8> {
    // half random, half zeros, roughly what a chunk compresses like.
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(42).fill_bytes(&mut data[..len / 2]);
    data
}

fn bench(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("region file write");
    for codec in [RegionCodec::Deflate, RegionCodec::Lz4, RegionCodec::Uncompressed] {
        for len in [4 << 10, 64 << 10] {
            let data = payload(len);
            let path = dir.path().join(format!("r.{}.{}.mca", codec.id(), len));
            let mut region = RegionFile::open(&path, dir.path(), codec, false).unwrap();
            group.throughput(Throughput::Bytes(len as u64));
            group.bench_with_input(BenchmarkId::new(codec.name(), len), &data, |b, data| {
                let mut idx = 0i32;
                b.iter(|| {
                    let pos = ChunkPos::new(idx & 31, (idx >> 5) & 31);
                    region.write(pos, data).unwrap();
                    idx = idx.wrapping_add(1);
                })
            });
            region.close().unwrap();
        }
    }
    group.finish();
}

criterion_group!(benches, bench);
criterion_main!(benches);
