use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

const KILOBYTE: u64 = 1 << 10;
const MEGABYTE: u64 = 1 << 20;
const GIGABYTE: u64 = 1 << 30;

pub const DEFAULT_FILE_BLOCK_UNIT: u64 = GIGABYTE;
pub const DEFAULT_CACHE_SIZE: u64 = 8 * MEGABYTE;

/// Top-level server configuration, loaded from a YAML file — the direct
/// analogue of the original's `gopkg.in/yaml.v2`-backed `Config` struct
/// (`cmd/mqueue/appconf.go`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host_port: String,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub file_block_unit: Option<HumanSize>,
    #[serde(default, rename = "cache_size")]
    pub cache_size: Option<HumanSize>,
    #[serde(default = "default_log_to")]
    pub log_to: String,
}

fn default_log_to() -> String {
    "stdout".to_string()
}

impl AppConfig {
    pub fn from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_str(&data)
    }

    pub fn from_str(data: &str) -> std::io::Result<Self> {
        serde_yaml::from_str(data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn file_block_unit_bytes(&self) -> u64 {
        self.file_block_unit.map(|s| s.0).unwrap_or(DEFAULT_FILE_BLOCK_UNIT)
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size.map(|s| s.0).unwrap_or(DEFAULT_CACHE_SIZE)
    }
}

/// A size written as a bare integer or an integer suffixed with
/// `k/K`, `m/M`, `g/G` (×1024, ×1024², ×1024³). Parsing happens once, at
/// config-load time, via a custom `Deserialize` rather than post-hoc string
/// parsing at every use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

pub fn parse_human_size(s: &str) -> std::result::Result<u64, String> {
    if s.is_empty() {
        return Err(format!("not a number: [{s}]"));
    }
    let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
        b'k' | b'K' => (&s[..s.len() - 1], KILOBYTE),
        b'm' | b'M' => (&s[..s.len() - 1], MEGABYTE),
        b'g' | b'G' => (&s[..s.len() - 1], GIGABYTE),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .map(|v| v * multiplier)
        .map_err(|e| e.to_string())
}

impl<'de> Deserialize<'de> for HumanSize {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HumanSizeVisitor;

        impl<'de> Visitor<'de> for HumanSizeVisitor {
            type Value = HumanSize;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer byte count or a string like \"8m\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<HumanSize, E> {
                Ok(HumanSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<HumanSize, E> {
                Ok(HumanSize(v as u64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<HumanSize, E> {
                parse_human_size(v).map(HumanSize).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(HumanSizeVisitor)
    }
}
