use super::{address, set_index, warp};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest supported line size in bytes.
pub const MAX_LINE_SIZE: usize = 256;

/// Largest supported number of chunks per line.
pub const MAX_CHUNKS: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{name} must be a power of two (got {value})")]
    NotPowerOfTwo { name: &'static str, value: u64 },

    #[error("{name} must be in range {min}..={max} (got {value})")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("chunk size {chunk_size} does not divide line size {line_size}")]
    ChunkSize { chunk_size: u32, line_size: u32 },

    #[error("word size {word_size} does not divide chunk size {chunk_size}")]
    WordSize { word_size: u32, chunk_size: u32 },

    #[error("bank hashing function {function:?} does not support {num_banks} banks")]
    BankHash {
        function: BankHashingFunction,
        num_banks: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Function used to hash a line address to its transaction buffer bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BankHashingFunction {
    Linear,     // L
    BitwiseXor, // X
    Fermi,      // H
}

/// Load/store queue configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LSQ {
    /// Number of lanes per warp
    pub warp_size: usize, // 32
    /// Number of transaction buffer banks
    pub num_banks: usize, // 4
    /// Number of transactions each bank can hold
    pub bank_depth: usize, // 32
    /// Line size in bytes
    pub line_size: u32, // 128
    /// Chunk granularity used for the sub-line chunk mask
    pub chunk_size: u32, // 32
    /// Backend word size in bytes
    pub word_size: u32, // 4
    /// Bank hashing function, should match the backend banks
    pub bank_hashing_function: BankHashingFunction,
    /// Cycles from issue (or a freed bank) to coalescing
    pub coalescing_latency: u64, // 1
    /// Cycles between two backend dispatches of the same bank
    pub dispatch_latency: u64, // 1
    /// Cycles between two deliveries to the core
    pub response_latency: u64, // 1
    /// Share one pending translation between transactions of the same line
    pub coalesce_translations: bool,
}

impl Default for LSQ {
    fn default() -> Self {
        Self {
            warp_size: 32,
            num_banks: 4,
            bank_depth: 32,
            line_size: 128,
            chunk_size: 32,
            word_size: 4,
            bank_hashing_function: BankHashingFunction::Linear,
            coalescing_latency: 1,
            dispatch_latency: 1,
            response_latency: 1,
            coalesce_translations: true,
        }
    }
}

impl std::fmt::Display for LSQ {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let capacity = self.num_banks * self.bank_depth * self.line_size as usize;
        write!(
            f,
            "LSQ(warp size {}, {} x {} entry banks, {} byte lines, {} byte chunks, {} buffered)",
            self.warp_size,
            self.num_banks,
            self.bank_depth,
            self.line_size,
            self.chunk_size,
            human_bytes::human_bytes(capacity as f64),
        )
    }
}

fn check_power_of_two(name: &'static str, value: u64) -> Result<(), Error> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::NotPowerOfTwo { name, value })
    }
}

fn check_range(name: &'static str, value: u64, min: u64, max: u64) -> Result<(), Error> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

impl LSQ {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_range("warp_size", self.warp_size as u64, 1, warp::MAX_WARP_SIZE as u64)?;
        check_range("num_banks", self.num_banks as u64, 1, 1024)?;
        check_power_of_two("num_banks", self.num_banks as u64)?;
        check_range("bank_depth", self.bank_depth as u64, 1, u32::MAX.into())?;
        check_range("line_size", self.line_size.into(), 1, MAX_LINE_SIZE as u64)?;
        check_power_of_two("line_size", self.line_size.into())?;
        check_power_of_two("chunk_size", self.chunk_size.into())?;
        check_power_of_two("word_size", self.word_size.into())?;
        if self.chunk_size > self.line_size {
            return Err(Error::ChunkSize {
                chunk_size: self.chunk_size,
                line_size: self.line_size,
            });
        }
        check_range("num_chunks", self.num_chunks() as u64, 1, MAX_CHUNKS as u64)?;
        if self.word_size > self.chunk_size {
            return Err(Error::WordSize {
                word_size: self.word_size,
                chunk_size: self.chunk_size,
            });
        }
        if self.bank_hashing_function == BankHashingFunction::Fermi
            && !set_index::fermi::BankIndex::supports(self.num_banks)
        {
            return Err(Error::BankHash {
                function: self.bank_hashing_function,
                num_banks: self.num_banks,
            });
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn line_size_log2(&self) -> u32 {
        self.line_size.ilog2()
    }

    /// Number of chunks per line.
    #[inline]
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        (self.line_size / self.chunk_size) as usize
    }

    /// Aligned line address of `addr`.
    #[inline]
    #[must_use]
    pub fn line_addr(&self, addr: address) -> address {
        addr & !(u64::from(self.line_size) - 1)
    }

    /// Byte offset of `addr` within its line.
    #[inline]
    #[must_use]
    pub fn line_offset(&self, addr: address) -> usize {
        (addr & (u64::from(self.line_size) - 1)) as usize
    }

    /// Which chunk of its line `addr` falls into.
    #[inline]
    #[must_use]
    pub fn chunk(&self, addr: address) -> usize {
        self.line_offset(addr) / self.chunk_size as usize
    }

    #[must_use]
    pub fn bank_indexer(&self) -> Box<dyn set_index::BankIndexer> {
        let line_size = self.line_size as usize;
        match self.bank_hashing_function {
            BankHashingFunction::Linear => Box::new(set_index::linear::BankIndex::new(
                self.num_banks,
                line_size,
            )),
            BankHashingFunction::BitwiseXor => Box::new(
                set_index::bitwise_xor::BankIndex::new(self.num_banks, line_size),
            ),
            BankHashingFunction::Fermi => {
                Box::new(set_index::fermi::BankIndex::new(self.num_banks, line_size))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre;

    #[test]
    fn test_default_config_is_valid() -> eyre::Result<()> {
        let config = super::LSQ::default();
        config.validate()?;
        assert_eq!(config.num_chunks(), 4);
        assert_eq!(config.line_addr(0x1ff), 0x180);
        assert_eq!(config.line_offset(0x1ff), 0x7f);
        assert_eq!(config.chunk(0x1ff), 3);
        assert!(config
            .to_string()
            .starts_with("LSQ(warp size 32, 4 x 32 entry banks, 128 byte lines"));
        Ok(())
    }

    #[test]
    fn test_parse_yaml() -> eyre::Result<()> {
        let yaml = "
warp_size: 4
num_banks: 1
bank_depth: 1
line_size: 64
bank_hashing_function: bitwise_xor
";
        let config = super::LSQ::from_reader(yaml.as_bytes())?;
        assert_eq!(config.warp_size, 4);
        assert_eq!(config.num_banks, 1);
        assert_eq!(config.line_size, 64);
        assert_eq!(config.chunk_size, 32);
        assert_eq!(
            config.bank_hashing_function,
            super::BankHashingFunction::BitwiseXor
        );
        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        let config = super::LSQ {
            line_size: 96,
            ..super::LSQ::default()
        };
        assert!(matches!(
            config.validate(),
            Err(super::Error::NotPowerOfTwo {
                name: "line_size",
                ..
            })
        ));

        let config = super::LSQ {
            warp_size: 128,
            ..super::LSQ::default()
        };
        assert!(matches!(
            config.validate(),
            Err(super::Error::OutOfRange {
                name: "warp_size",
                ..
            })
        ));

        let config = super::LSQ {
            bank_hashing_function: super::BankHashingFunction::Fermi,
            ..super::LSQ::default()
        };
        assert!(matches!(config.validate(), Err(super::Error::BankHash { .. })));

        let config = super::LSQ {
            chunk_size: 256,
            ..super::LSQ::default()
        };
        assert!(matches!(config.validate(), Err(super::Error::ChunkSize { .. })));
    }
}
