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

//! A region file holds up to 1024 chunks of a 32x32 grid.
//!
//! ## Layout
//! 1. Sector 0: the offset table, 1024 big-endian u32, each one is
//!    `sector_number << 8 | sector_count`, 0 means the chunk is absent.
//! 2. Sector 1: the timestamp table, 1024 big-endian u32 seconds.
//! 3. Sector 2..: chunk entries, `[u32 length][u8 codec][payload]`, where
//!    the length covers the codec byte and the payload.
//!
//! An entry that needs 256 sectors or more does not fit the 8 bit sector
//! count, its entry is moved into `c.<x>.<z>.mcc` next to the region file and
//! the inline entry becomes a one sector stub with the external flag set on
//! the codec byte.
//!
//! Structural damage (bad codec, truncated or implausible lengths) reads as
//! an absent chunk and is logged, only real IO faults are returned as errors.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use byteorder::{BigEndian, ByteOrder};
use hearth_common::{
    sectors_for, ChunkPos, CHUNK_HEADER_SIZE, HEADER_BYTES, HEADER_SECTORS, MAX_INLINE_SECTORS,
    SECTOR_BYTES, SECTOR_INTS,
};
use snafu::{ensure, ResultExt};
use tracing::{debug, error, info, warn};

use crate::{
    codec::{self, RegionCodec, EXTERNAL_FLAG},
    err::{
        CompressSnafu, DecompressSnafu, OpenRegionSnafu, PersistExternalSnafu, Result,
        SectorOutOfRangeSnafu, UnknownIOSnafu,
    },
    sector::SectorBitmap,
};

/// The sector number is stored in the upper 24 bits of an offset.
pub const MAX_SECTOR_NUMBER: u32 = (1 << 24) - 1;

pub const fn pack_offset(sector: u32, count: u32) -> u32 { sector << 8 | count }

pub const fn sector_number(offset: u32) -> u32 { offset >> 8 }

pub const fn sector_count(offset: u32) -> u32 { offset & 0xFF }

const fn sector_offset(sector: u32) -> u64 { sector as u64 * SECTOR_BYTES as u64 }

pub struct RegionFile {
    path:         PathBuf,
    external_dir: PathBuf,
    file:         File,
    codec:        RegionCodec,
    sync:         bool,
    offsets:      Vec<u32>,
    timestamps:   Vec<u32>,
    used:         SectorBitmap,
}

impl RegionFile {
    /// Opens or creates the region file and rebuilds the sector usage from
    /// its header. Header entries that can not be valid are dropped.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        path: P,
        external_dir: Q,
        codec: RegionCodec,
        sync: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(OpenRegionSnafu { path: path.clone() })?;

        let mut header = vec![0u8; HEADER_BYTES];
        let read = read_fully_at(&mut file, 0, &mut header)
            .context(OpenRegionSnafu { path: path.clone() })?;
        if read > 0 && read < HEADER_BYTES {
            warn!(
                "region file {} has a truncated header, read {} of {} bytes",
                path.display(),
                read,
                HEADER_BYTES
            );
        }
        let mut offsets = vec![0u32; SECTOR_INTS];
        let mut timestamps = vec![0u32; SECTOR_INTS];
        BigEndian::read_u32_into(&header[..SECTOR_BYTES], &mut offsets);
        BigEndian::read_u32_into(&header[SECTOR_BYTES..], &mut timestamps);

        let file_size = file
            .metadata()
            .context(OpenRegionSnafu { path: path.clone() })?
            .len();
        let mut used = SectorBitmap::new();
        used.force(0, HEADER_SECTORS);
        for (idx, offset) in offsets.iter_mut().enumerate() {
            if *offset == 0 {
                continue;
            }
            let sector = sector_number(*offset);
            let count = sector_count(*offset);
            if sector < HEADER_SECTORS {
                warn!(
                    "region file {} has invalid sector at index: {}; sector {} overlaps with header",
                    path.display(),
                    idx,
                    sector
                );
                *offset = 0;
            } else if count == 0 {
                warn!(
                    "region file {} has an invalid sector at index: {}; size has to be > 0",
                    path.display(),
                    idx
                );
                *offset = 0;
            } else if sector_offset(sector) > file_size {
                warn!(
                    "region file {} has an invalid sector at index: {}; sector {} is out of bounds",
                    path.display(),
                    idx,
                    sector
                );
                *offset = 0;
            } else {
                used.force(sector, count);
            }
        }

        debug!(
            "open region file {}, size: {}, used sectors: {}",
            path.display(),
            file_size,
            used.used_count()
        );
        Ok(Self {
            path,
            external_dir: external_dir.as_ref().to_path_buf(),
            file,
            codec,
            sync,
            offsets,
            timestamps,
            used,
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn codec(&self) -> RegionCodec { self.codec }

    pub fn used_sectors(&self) -> &SectorBitmap { &self.used }

    pub fn has_chunk(&self, pos: ChunkPos) -> bool { self.offset(pos) != 0 }

    pub fn timestamp(&self, pos: ChunkPos) -> u32 { self.timestamps[pos.region_local_index()] }

    /// The `(sector_number, sector_count)` of the chunk's inline entry.
    pub fn sector_range(&self, pos: ChunkPos) -> Option<(u32, u32)> {
        match self.offset(pos) {
            0 => None,
            offset => Some((sector_number(offset), sector_count(offset))),
        }
    }

    pub fn external_path(&self, pos: ChunkPos) -> PathBuf {
        self.external_dir.join(pos.external_file_name())
    }

    fn offset(&self, pos: ChunkPos) -> u32 { self.offsets[pos.region_local_index()] }

    /// Reads and decompresses the whole payload.
    pub fn read_chunk(&mut self, pos: ChunkPos) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.chunk_data_reader(pos)? else {
            return Ok(None);
        };
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .context(DecompressSnafu { pos })?;
        Ok(Some(out))
    }

    /// Returns a streaming reader over the decompressed payload.
    pub fn chunk_data_reader(&mut self, pos: ChunkPos) -> Result<Option<Box<dyn Read>>> {
        let offset = self.offset(pos);
        if offset == 0 {
            return Ok(None);
        }
        let sector = sector_number(offset);
        let count = sector_count(offset);
        let expected = count as usize * SECTOR_BYTES;
        let mut buf = vec![0u8; expected];
        let read = read_fully_at(&mut self.file, sector_offset(sector), &mut buf)
            .context(UnknownIOSnafu)?;
        buf.truncate(read);
        if buf.len() < CHUNK_HEADER_SIZE {
            error!(
                "chunk {} header is truncated: expected {} but read {}",
                pos, expected, read
            );
            return Ok(None);
        }

        let length = BigEndian::read_i32(&buf[..4]);
        let version = buf[4];
        if length == 0 {
            warn!("chunk {} is allocated, but stream is missing", pos);
            return Ok(None);
        }
        let payload_len = length as i64 - 1;
        if codec::is_external(version) {
            if payload_len != 0 {
                warn!("chunk {} has both internal and external streams", pos);
            }
            return self.external_reader(pos, codec::strip_external(version));
        }
        let available = (buf.len() - CHUNK_HEADER_SIZE) as i64;
        if payload_len > available {
            error!(
                "chunk {} stream is truncated: expected {} but read {}",
                pos, payload_len, available
            );
            return Ok(None);
        }
        if payload_len < 0 {
            error!("declared size {} of chunk {} is negative", length, pos);
            return Ok(None);
        }

        buf.truncate(CHUNK_HEADER_SIZE + payload_len as usize);
        let mut payload = Cursor::new(buf);
        payload.set_position(CHUNK_HEADER_SIZE as u64);
        Ok(wrap_payload(pos, version, Box::new(payload)))
    }

    fn external_reader(&mut self, pos: ChunkPos, stub_version: u8) -> Result<Option<Box<dyn Read>>> {
        let path = self.external_path(pos);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                error!("external chunk path {} is not file", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e).context(UnknownIOSnafu),
        };
        let meta = file.metadata().context(UnknownIOSnafu)?;
        if !meta.is_file() {
            error!("external chunk path {} is not file", path.display());
            return Ok(None);
        }

        let mut reader = BufReader::new(file);
        let mut header = [0u8; CHUNK_HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                error!(
                    "external chunk {} header is truncated: expected {} but read {}",
                    pos,
                    CHUNK_HEADER_SIZE,
                    meta.len()
                );
                return Ok(None);
            }
            Err(e) => return Err(e).context(UnknownIOSnafu),
        }
        let length = BigEndian::read_i32(&header[..4]);
        let version = header[4];
        if version != stub_version {
            warn!(
                "external chunk {} was written with codec {} but its stub says {}",
                pos, version, stub_version
            );
        }
        let payload_len = length as i64 - 1;
        let available = meta.len() as i64 - CHUNK_HEADER_SIZE as i64;
        if payload_len < 0 {
            error!("declared size {} of external chunk {} is negative", length, pos);
            return Ok(None);
        }
        if payload_len > available {
            error!(
                "external chunk {} stream is truncated: expected {} but read {}",
                pos, payload_len, available
            );
            return Ok(None);
        }
        Ok(wrap_payload(
            pos,
            version,
            Box::new(reader.take(payload_len as u64)),
        ))
    }

    /// Checks the entry header without decompressing anything.
    pub fn chunk_exists(&mut self, pos: ChunkPos) -> bool {
        let offset = self.offset(pos);
        if offset == 0 {
            return false;
        }
        let sector = sector_number(offset);
        let count = sector_count(offset);
        let mut header = [0u8; CHUNK_HEADER_SIZE];
        match read_fully_at(&mut self.file, sector_offset(sector), &mut header) {
            Ok(CHUNK_HEADER_SIZE) => {}
            _ => return false,
        }
        let length = BigEndian::read_i32(&header[..4]);
        let version = header[4];
        if codec::is_external(version) {
            RegionCodec::is_valid_id(codec::strip_external(version))
                && self.external_path(pos).is_file()
        } else {
            let payload_len = length as i64 - 1;
            let capacity = (count as usize * SECTOR_BYTES - CHUNK_HEADER_SIZE) as i64;
            RegionCodec::is_valid_id(version) && length != 0 && (0..=capacity).contains(&payload_len)
        }
    }

    /// Compresses and stores the payload, replacing the previous entry.
    pub fn write(&mut self, pos: ChunkPos, payload: &[u8]) -> Result<()> {
        let mut entry = Vec::with_capacity(payload.len() / 2 + CHUNK_HEADER_SIZE);
        entry.extend_from_slice(&[0u8; CHUNK_HEADER_SIZE]);
        self.codec
            .compress(payload, &mut entry)
            .context(CompressSnafu {
                pos,
                codec: self.codec.name(),
            })?;
        let length = (entry.len() - CHUNK_HEADER_SIZE + 1) as u32;
        BigEndian::write_u32(&mut entry[..4], length);
        entry[4] = self.codec.id();
        self.write_entry(pos, &entry)
    }

    fn write_entry(&mut self, pos: ChunkPos, entry: &[u8]) -> Result<()> {
        let idx = pos.region_local_index();
        let old = self.offsets[idx];
        let needed = sectors_for(entry.len());

        let (sector, count, external) = if needed > MAX_INLINE_SECTORS {
            let path = self.external_path(pos);
            info!(
                "saving oversized chunk {} ({} bytes) to external file {}",
                pos,
                entry.len(),
                path.display()
            );
            self.write_external(&path, entry)?;
            let mut stub = [0u8; CHUNK_HEADER_SIZE];
            BigEndian::write_u32(&mut stub[..4], 1);
            stub[4] = entry[4] | EXTERNAL_FLAG;
            let sector = self.allocate(1)?;
            if let Err(e) = write_all_at(&mut self.file, sector_offset(sector), &stub) {
                self.used.free(sector, 1);
                return Err(e).context(UnknownIOSnafu);
            }
            (sector, 1, true)
        } else {
            let sector = self.allocate(needed)?;
            if let Err(e) = write_all_at(&mut self.file, sector_offset(sector), entry) {
                self.used.free(sector, needed);
                return Err(e).context(UnknownIOSnafu);
            }
            (sector, needed, false)
        };

        self.offsets[idx] = pack_offset(sector, count);
        self.timestamps[idx] = now();
        self.write_header()?;
        // the new entry is committed, the old sectors can be reused.
        if !external {
            self.remove_external(pos)?;
        }
        if old != 0 {
            self.used.free(sector_number(old), sector_count(old));
        }
        Ok(())
    }

    fn allocate(&mut self, count: u32) -> Result<u32> {
        let sector = self.used.allocate(count);
        if sector > MAX_SECTOR_NUMBER {
            self.used.free(sector, count);
        }
        ensure!(
            sector <= MAX_SECTOR_NUMBER,
            SectorOutOfRangeSnafu {
                path: self.path.clone(),
                sector,
            }
        );
        Ok(sector)
    }

    /// Writes the entry to a temporary file first, then renames it over the
    /// external path so a reader never sees a partial file.
    fn write_external(&self, path: &Path, entry: &[u8]) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix("tmp")
            .tempfile_in(&self.external_dir)
            .context(UnknownIOSnafu)?;
        tmp.write_all(entry).context(UnknownIOSnafu)?;
        if self.sync {
            tmp.as_file().sync_all().context(UnknownIOSnafu)?;
        }
        tmp.persist(path)
            .context(PersistExternalSnafu { path: path.to_path_buf() })?;
        Ok(())
    }

    fn remove_external(&self, pos: ChunkPos) -> Result<()> {
        match fs::remove_file(self.external_path(pos)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(UnknownIOSnafu),
        }
    }

    /// Deletes the chunk and its external file.
    pub fn clear(&mut self, pos: ChunkPos) -> Result<()> {
        let idx = pos.region_local_index();
        let old = self.offsets[idx];
        if old == 0 {
            return Ok(());
        }
        self.offsets[idx] = 0;
        self.timestamps[idx] = now();
        self.write_header()?;
        self.remove_external(pos)?;
        self.used.free(sector_number(old), sector_count(old));
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = vec![0u8; HEADER_BYTES];
        BigEndian::write_u32_into(&self.offsets, &mut header[..SECTOR_BYTES]);
        BigEndian::write_u32_into(&self.timestamps, &mut header[SECTOR_BYTES..]);
        write_all_at(&mut self.file, 0, &header).context(UnknownIOSnafu)?;
        if self.sync {
            self.file.sync_data().context(UnknownIOSnafu)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> { self.file.sync_all().context(UnknownIOSnafu) }

    /// Pads the file to a whole sector, syncs it and closes the handle.
    pub fn close(mut self) -> Result<()> {
        let padded = self.pad_to_full_sector();
        let synced = self.file.sync_all().context(UnknownIOSnafu);
        debug!("close region file {}", self.path.display());
        padded.and(synced)
    }

    fn pad_to_full_sector(&mut self) -> Result<()> {
        let size = self.file.metadata().context(UnknownIOSnafu)?.len();
        let aligned = sector_offset(sectors_for(size as usize));
        if size != aligned {
            write_all_at(&mut self.file, aligned - 1, &[0u8]).context(UnknownIOSnafu)?;
        }
        Ok(())
    }
}

fn wrap_payload(pos: ChunkPos, version: u8, raw: Box<dyn Read>) -> Option<Box<dyn Read>> {
    match RegionCodec::from_id(version) {
        Some(RegionCodec::Custom) => {
            error!("unrecognized custom compression for chunk {}", pos);
            None
        }
        Some(codec) => match codec.wrap_reader(raw) {
            Ok(reader) => Some(reader),
            Err(e) => {
                error!("chunk {} can not be decoded with {}: {}", pos, codec, e);
                None
            }
        },
        None => {
            error!("chunk {} has invalid chunk stream version {}", pos, version);
            None
        }
    }
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

/// Reads until the buffer is full or the end of the file, returns how many
/// bytes were read.
fn read_fully_at(file: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn write_all_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}
