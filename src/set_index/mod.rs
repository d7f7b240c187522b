use super::address;

/// Maps a line address to the transaction buffer bank it is queued in.
///
/// The same function should be used by the backend banks, so that
/// bank contention in the load/store queue models backend contention.
pub trait BankIndexer: std::fmt::Debug + Send + Sync + 'static {
    /// Compute bank index for an address
    #[must_use]
    fn compute_bank_index(&self, addr: address) -> u64;
}

pub mod fermi {
    // Set Indexing function from
    // "A Detailed GPU Cache Model Based on Reuse
    // Distance Theory" Cedric Nugteren et al. HPCA 2014
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct BankIndex {
        pub num_banks: usize,
        pub line_size_log2: u32,
    }

    impl BankIndex {
        #[must_use]
        pub fn new(num_banks: usize, line_size: usize) -> Self {
            Self {
                num_banks,
                line_size_log2: line_size.ilog2(),
            }
        }

        #[must_use]
        pub fn supports(num_banks: usize) -> bool {
            matches!(num_banks, 32 | 64)
        }
    }

    impl super::BankIndexer for BankIndex {
        fn compute_bank_index(&self, addr: super::address) -> u64 {
            // checked when validating the config
            debug_assert!(Self::supports(self.num_banks));

            // lower xor value is the five bits above the line offset
            let lower_xor = (addr >> self.line_size_log2) & 0x1F;

            // upper xor value is bits 13, 14, 15, 17, and 19
            let mut upper_xor = (addr & 0xE000) >> 13; // Bits 13, 14, 15
            upper_xor |= (addr & 0x20000) >> 14; // Bit 17
            upper_xor |= (addr & 0x80000) >> 15; // Bit 19

            let mut bank = lower_xor ^ upper_xor;

            // 64 banks prepend the index with bit 12
            if self.num_banks == 64 {
                bank |= (addr & 0x1000) >> 7;
            }
            debug_assert!(bank < self.num_banks as u64, "bank index out of bounds");
            bank
        }
    }
}

pub mod bitwise_xor {
    #[must_use]
    pub fn bitwise_hash_function(higher_bits: super::address, index: usize, num_banks: usize) -> u64 {
        index as u64 ^ (higher_bits & (num_banks as u64 - 1))
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct BankIndex {
        pub num_banks: usize,
        pub line_size_log2: u32,
        pub num_banks_log2: u32,
    }

    impl BankIndex {
        #[must_use]
        pub fn new(num_banks: usize, line_size: usize) -> Self {
            Self {
                num_banks,
                line_size_log2: line_size.ilog2(),
                num_banks_log2: num_banks.ilog2(),
            }
        }
    }

    impl super::BankIndexer for BankIndex {
        fn compute_bank_index(&self, addr: super::address) -> u64 {
            let bits = self.line_size_log2 + self.num_banks_log2;
            let higher_bits = addr >> bits;
            let mut index = (addr >> self.line_size_log2) as usize;
            index &= self.num_banks - 1;
            let bank = bitwise_hash_function(higher_bits, index, self.num_banks);
            debug_assert!(bank < self.num_banks as u64, "bank index out of bounds");
            bank
        }
    }
}

pub mod linear {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct BankIndex {
        pub num_banks: usize,
        pub line_size_log2: u32,
    }

    impl BankIndex {
        #[must_use]
        pub fn new(num_banks: usize, line_size: usize) -> Self {
            Self {
                num_banks,
                line_size_log2: line_size.ilog2(),
            }
        }
    }

    impl super::BankIndexer for BankIndex {
        fn compute_bank_index(&self, addr: super::address) -> u64 {
            let mut bank = addr >> self.line_size_log2;
            bank &= self.num_banks as u64 - 1;
            debug_assert!(bank < self.num_banks as u64, "bank index out of bounds");
            bank
        }
    }
}
