//! Transaction buffers.
//!
//! A fixed number of bounded banks, each a FIFO of transactions. A transaction is
//! queued in the bank its line address hashes to, mirroring the backend bank layout.
use super::{
    address, config, fifo::Fifo, set_index::BankIndexer, transaction, transaction::Transaction,
};
use smallvec::SmallVec;

/// Banks that refused a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub transactions: Vec<Transaction>,
    pub full_banks: SmallVec<[usize; 4]>,
}

#[derive(Debug)]
pub struct Banks {
    banks: Box<[Fifo<Transaction>]>,
    /// Banks whose head was refused by the backend.
    blocked: Box<[bool]>,
    indexer: Box<dyn BankIndexer>,
}

impl Banks {
    #[must_use]
    pub fn new(config: &config::LSQ) -> Self {
        let banks = (0..config.num_banks)
            .map(|_| Fifo::new(Some(config.bank_depth)))
            .collect();
        Self {
            banks,
            blocked: vec![false; config.num_banks].into_boxed_slice(),
            indexer: config.bank_indexer(),
        }
    }

    #[must_use]
    #[inline]
    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    #[must_use]
    #[inline]
    pub fn bank(&self, line_addr: address) -> usize {
        self.indexer.compute_bank_index(line_addr) as usize
    }

    /// Number of slots each bank would need for the given line addresses.
    #[must_use]
    pub fn demand(&self, line_addrs: impl IntoIterator<Item = address>) -> Vec<usize> {
        let mut demand = vec![0; self.banks.len()];
        for line_addr in line_addrs {
            demand[self.bank(line_addr)] += 1;
        }
        demand
    }

    /// Admits all transactions or none of them.
    ///
    /// Each transaction must already have its bank set. On success all
    /// transactions are `Buffered` and appended to their banks in order.
    pub fn admit_all(&mut self, transactions: Vec<Transaction>) -> Result<(), Rejected> {
        let mut demand = vec![0; self.banks.len()];
        for tx in &transactions {
            demand[tx.bank] += 1;
        }
        let full_banks: SmallVec<[usize; 4]> = demand
            .iter()
            .enumerate()
            .filter(|(bank, n)| **n > 0 && !self.banks[*bank].can_fit(**n))
            .map(|(bank, _)| bank)
            .collect();
        if !full_banks.is_empty() {
            return Err(Rejected {
                transactions,
                full_banks,
            });
        }
        for mut tx in transactions {
            tx.status = transaction::Status::Buffered;
            self.banks[tx.bank].enqueue(tx);
        }
        Ok(())
    }

    #[must_use]
    pub fn head(&self, bank: usize) -> Option<&Transaction> {
        self.banks[bank].first()
    }

    pub fn pop_head(&mut self, bank: usize) -> Option<Transaction> {
        self.banks[bank].dequeue()
    }

    pub fn get_mut(&mut self, bank: usize, uid: transaction::Id) -> Option<&mut Transaction> {
        self.banks[bank].iter_mut().find(|tx| tx.uid == uid)
    }

    pub fn remove(&mut self, bank: usize, uid: transaction::Id) -> Option<Transaction> {
        self.banks[bank].remove_first(|tx| tx.uid == uid)
    }

    #[must_use]
    pub fn is_blocked(&self, bank: usize) -> bool {
        self.blocked[bank]
    }

    pub fn set_blocked(&mut self, bank: usize, blocked: bool) {
        self.blocked[bank] = blocked;
    }

    /// Unblocks all blocked banks and returns their ids.
    pub fn take_blocked(&mut self) -> Vec<usize> {
        let mut unblocked = Vec::new();
        for (bank, blocked) in self.blocked.iter_mut().enumerate() {
            if std::mem::take(blocked) {
                unblocked.push(bank);
            }
        }
        unblocked
    }

    #[must_use]
    pub fn len(&self, bank: usize) -> usize {
        self.banks[bank].len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(Fifo::is_empty)
    }

    /// All buffered transactions, bank by bank in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.banks.iter().flat_map(Fifo::iter)
    }

    pub fn bank_iter(&self, bank: usize) -> impl Iterator<Item = &Transaction> + '_ {
        self.banks[bank].iter()
    }
}
