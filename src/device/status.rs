//! dm-cache status line parsing
//!
//! `dmsetup status` prints, after `<start> <length> cache`:
//!
//! ```text
//! <metadata block size> <used>/<total metadata blocks>
//! <cache block size> <used>/<total cache blocks>
//! <read hits> <read misses> <write hits> <write misses>
//! <demotions> <promotions> <dirty> <#features> <features>*
//! <#core args> <core args>* <policy name> <#policy args> <policy args>*
//! <metadata mode> [needs_check|-] ...
//! ```

use crate::metadata::model::CachePolicy;
use std::collections::BTreeMap;
use std::str::SplitWhitespace;

/// Block counters reported by the cache target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheBlockInfo {
    /// Cache block size in sectors
    pub chunk_size: u64,
    pub used: u64,
    pub total: u64,
    pub dirty: u64,
}

/// Parsed status of a live cache device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub metadata_block_size: u64,
    pub metadata_used: u64,
    pub metadata_total: u64,
    pub blocks: CacheBlockInfo,
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    pub demotions: u64,
    pub promotions: u64,
    pub features: Vec<String>,
    pub core_args: BTreeMap<String, String>,
    pub policy: CachePolicy,
    /// "rw" or "ro"; absent on old kernels
    pub metadata_mode: Option<String>,
    pub needs_check: bool,
}

impl CacheStatus {
    /// Parse one line of `dmsetup status` output for a cache device
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = Fields(line.split_whitespace());

        words.number("start")?;
        words.number("length")?;
        let target = words.word("target type")?;
        if target != "cache" {
            return Err(format!("target is {}, not cache", target));
        }

        let metadata_block_size = words.number("metadata block size")?;
        let (metadata_used, metadata_total) = words.ratio("metadata usage")?;
        let chunk_size = words.number("cache block size")?;
        let (used, total) = words.ratio("cache usage")?;
        let read_hits = words.number("read hits")?;
        let read_misses = words.number("read misses")?;
        let write_hits = words.number("write hits")?;
        let write_misses = words.number("write misses")?;
        let demotions = words.number("demotions")?;
        let promotions = words.number("promotions")?;
        let dirty = words.number("dirty blocks")?;

        let feature_count = words.number("feature count")?;
        let features = (0..feature_count)
            .map(|_| words.word("feature").map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        let core_args = words.pairs("core args")?;
        let policy_name = words.word("policy name")?.to_string();
        let policy_args = words.pairs("policy args")?;

        let metadata_mode = words.0.next().map(str::to_string);
        let needs_check = words.0.any(|w| w == "needs_check");

        Ok(Self {
            metadata_block_size,
            metadata_used,
            metadata_total,
            blocks: CacheBlockInfo {
                chunk_size,
                used,
                total,
                dirty,
            },
            read_hits,
            read_misses,
            write_hits,
            write_misses,
            demotions,
            promotions,
            features,
            core_args,
            policy: CachePolicy {
                name: policy_name,
                args: policy_args,
            },
            metadata_mode,
            needs_check,
        })
    }
}

struct Fields<'a>(SplitWhitespace<'a>);

impl<'a> Fields<'a> {
    fn word(&mut self, what: &str) -> Result<&'a str, String> {
        self.0.next().ok_or_else(|| format!("missing {}", what))
    }

    fn number(&mut self, what: &str) -> Result<u64, String> {
        let word = self.word(what)?;
        word.parse()
            .map_err(|_| format!("{} is not a number: {}", what, word))
    }

    fn ratio(&mut self, what: &str) -> Result<(u64, u64), String> {
        let word = self.word(what)?;
        let (used, total) = word
            .split_once('/')
            .ok_or_else(|| format!("{} is not used/total: {}", what, word))?;
        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| format!("{} is not used/total: {}", what, word))
        };
        Ok((parse(used)?, parse(total)?))
    }

    /// `<count> key value ...` where count is the number of words
    fn pairs(&mut self, what: &str) -> Result<BTreeMap<String, String>, String> {
        let count = self.number(what)?;
        if count % 2 != 0 {
            return Err(format!("{} has an odd word count {}", what, count));
        }
        let mut pairs = BTreeMap::new();
        for _ in 0..count / 2 {
            let key = self.word(what)?;
            let value = self.word(what)?;
            pairs.insert(key.to_string(), value.to_string());
        }
        Ok(pairs)
    }
}
