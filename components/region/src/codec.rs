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

//! The compression registry for chunk payloads.
//!
//! Every entry in a region file carries a one byte codec id right after its
//! length. The id picks the stream wrapper used to read the payload back, so
//! changing the selected codec never touches entries already on disk.

use std::{
    fmt::{Display, Formatter},
    io::{self, Read, Write},
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use flate2::{
    read::{GzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
    Compression,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Set on the codec byte when the payload lives in an external file.
pub const EXTERNAL_FLAG: u8 = 0x80;

pub const fn is_external(version: u8) -> bool { version & EXTERNAL_FLAG != 0 }

pub const fn strip_external(version: u8) -> u8 { version & !EXTERNAL_FLAG }

static SELECTED: AtomicU8 = AtomicU8::new(RegionCodec::Deflate as u8);

/// Held by tests that change the selected codec.
#[cfg(test)]
pub(crate) static SELECTION_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RegionCodec {
    Gzip = 1,
    /// A zlib stream.
    Deflate = 2,
    #[serde(rename = "none")]
    Uncompressed = 3,
    /// lz4 frame format.
    Lz4 = 4,
    /// Reserved for payloads written by third party tools, never readable.
    Custom = 127,
}

impl RegionCodec {
    pub const ALL: [RegionCodec; 5] = [
        RegionCodec::Gzip,
        RegionCodec::Deflate,
        RegionCodec::Uncompressed,
        RegionCodec::Lz4,
        RegionCodec::Custom,
    ];

    pub const fn id(self) -> u8 { self as u8 }

    pub fn from_id(id: u8) -> Option<Self> { Self::ALL.into_iter().find(|c| c.id() == id) }

    pub fn is_valid_id(id: u8) -> bool { Self::from_id(id).is_some() }

    pub const fn name(self) -> &'static str {
        match self {
            RegionCodec::Gzip => "gzip",
            RegionCodec::Deflate => "deflate",
            RegionCodec::Uncompressed => "none",
            RegionCodec::Lz4 => "lz4",
            RegionCodec::Custom => "custom",
        }
    }

    /// Looks up a codec that can be selected for writing.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|c| c.is_writable())
            .find(|c| c.name() == name)
    }

    pub const fn is_writable(self) -> bool { !matches!(self, RegionCodec::Custom) }

    /// Wraps a raw payload stream with the matching decompressor.
    pub fn wrap_reader<'a>(self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            RegionCodec::Gzip => Ok(Box::new(GzDecoder::new(input))),
            RegionCodec::Deflate => Ok(Box::new(ZlibDecoder::new(input))),
            RegionCodec::Uncompressed => Ok(input),
            RegionCodec::Lz4 => Ok(Box::new(lz4_flex::frame::FrameDecoder::new(input))),
            RegionCodec::Custom => Err(custom_codec_error()),
        }
    }

    /// Compresses the payload and appends the result to `out`.
    pub fn compress(self, payload: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        match self {
            RegionCodec::Gzip => {
                let mut encoder = GzEncoder::new(out, Compression::default());
                encoder.write_all(payload)?;
                encoder.finish()?;
            }
            RegionCodec::Deflate => {
                let mut encoder = ZlibEncoder::new(out, Compression::default());
                encoder.write_all(payload)?;
                encoder.finish()?;
            }
            RegionCodec::Uncompressed => out.extend_from_slice(payload),
            RegionCodec::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(out);
                encoder.write_all(payload)?;
                encoder.finish().map_err(io::Error::other)?;
            }
            RegionCodec::Custom => return Err(custom_codec_error()),
        }
        Ok(())
    }

    /// The codec new region files write with.
    pub fn selected() -> Self {
        Self::from_id(SELECTED.load(Ordering::Acquire)).unwrap_or(RegionCodec::Deflate)
    }

    pub fn set_selected(codec: RegionCodec) {
        if !codec.is_writable() {
            error!("codec {} can not be used for writing, keep {}", codec, Self::selected());
            return;
        }
        SELECTED.store(codec.id(), Ordering::Release);
    }

    /// Selects the write codec by name, unknown names keep the current one.
    pub fn configure(name: &str) -> Self {
        match Self::from_name(name) {
            Some(codec) => {
                info!("using {} compression for new chunk writes", codec);
                Self::set_selected(codec);
            }
            None => {
                let valid: Vec<&str> = Self::ALL
                    .into_iter()
                    .filter(|c| c.is_writable())
                    .map(|c| c.name())
                    .collect();
                error!(
                    "invalid region file compression `{}`, please use one of: {}",
                    name,
                    valid.join(", ")
                );
            }
        }
        Self::selected()
    }
}

impl Display for RegionCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.name()) }
}

impl FromStr for RegionCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s.trim()).ok_or_else(|| format!("{:?} is not a region codec", s))
    }
}

fn custom_codec_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "unrecognized custom compression, the payload can not be decoded",
    )
}
