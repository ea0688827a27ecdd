use crate::constants::{END_OF_CHAIN, FREE_SECTOR};
use crate::error::Error;

/// Walks a FAT-style linked list (`table[i]` holds the next sector after
/// `i`, or one of the sentinel values) with tortoise-and-hare cycle
/// detection, so a corrupt chain can never hang the reader.
///
/// An out-of-bounds next-pointer is treated as an implicit end of chain
/// rather than an error — some real-world containers leave trailing
/// garbage past the declared sector count.
pub struct ChainWalk<'a> {
    table: &'a [u32],
    slow: Option<u32>,
    fast: Option<u32>,
    start: u32,
    make_loop_error: fn(u32) -> Error,
    done: bool,
}

impl<'a> ChainWalk<'a> {
    pub fn new(table: &'a [u32], start: u32, make_loop_error: fn(u32) -> Error) -> Self {
        let begin = normalize(start);
        ChainWalk {
            table,
            slow: begin,
            fast: begin,
            start,
            make_loop_error,
            done: false,
        }
    }
}

fn normalize(value: u32) -> Option<u32> {
    match value {
        END_OF_CHAIN | FREE_SECTOR => None,
        v => Some(v),
    }
}

fn step(table: &[u32], index: u32) -> Option<u32> {
    table.get(index as usize).copied().and_then(normalize)
}

impl<'a> Iterator for ChainWalk<'a> {
    type Item = Result<u32, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.slow?;
        self.slow = step(self.table, current);
        self.fast = self
            .fast
            .and_then(|f| step(self.table, f))
            .and_then(|f| step(self.table, f));
        if let (Some(s), Some(f)) = (self.slow, self.fast) {
            if s == f {
                self.done = true;
                return Some(Err((self.make_loop_error)(self.start)));
            }
        }
        Some(Ok(current))
    }
}

/// Collects a chain into a `Vec`, propagating a loop error if one is hit.
pub fn collect_chain(
    table: &[u32],
    start: u32,
    make_loop_error: fn(u32) -> Error,
) -> crate::error::Result<Vec<u32>> {
    ChainWalk::new(table, start, make_loop_error).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_a_simple_chain() {
        let table = vec![1, 2, END_OF_CHAIN];
        let chain = collect_chain(&table, 0, Error::NormalLoop).unwrap();
        assert_eq!(chain, vec![0, 1, 2]);
    }

    #[test]
    fn empty_start_yields_empty_chain() {
        let table = vec![1, 2, END_OF_CHAIN];
        let chain = collect_chain(&table, END_OF_CHAIN, Error::NormalLoop).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn detects_a_self_loop() {
        let table = vec![1, 0, END_OF_CHAIN];
        let result = collect_chain(&table, 0, Error::NormalLoop);
        assert!(matches!(result, Err(Error::NormalLoop(0))));
    }

    #[test]
    fn out_of_bounds_next_pointer_truncates_gracefully() {
        let table = vec![5];
        let chain = collect_chain(&table, 0, Error::NormalLoop).unwrap();
        assert_eq!(chain, vec![0]);
    }
}
