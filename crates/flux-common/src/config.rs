//! Runtime configuration
//!
//! The framework is configured once, before `System::init`. Only three
//! options matter to the runtime: which cores it may use (as a range
//! list or a plain count) and whether the TX path should request
//! hardware checksum offload.

use crate::error::{FluxError, FluxResult};

/// Framework configuration passed to `System::init`
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Cores the runtime may use, as a range list ("0-15", "0,2,4-7").
    /// Takes precedence over `cpu_cores_number` when both are set.
    pub cpu_list: Option<String>,
    /// Alternative to `cpu_list`: use cores `0..n`
    pub cpu_cores_number: Option<usize>,
    /// Request hardware checksum offload on the TX path
    pub hw_tx_checksum: bool,
    /// Buffers to preallocate; `None` uses the runtime default
    pub pool_capacity: Option<usize>,
}

impl Config {
    /// Resolve the configured core set.
    ///
    /// With neither option set, every core visible to the process is used.
    pub fn cpu_set(&self) -> FluxResult<CpuSet> {
        if let Some(ref list) = self.cpu_list {
            return CpuSet::parse(list);
        }
        if let Some(n) = self.cpu_cores_number {
            return CpuSet::first_n(n);
        }
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        CpuSet::first_n(n)
    }
}

/// An ordered, deduplicated set of CPU core ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSet {
    cores: Vec<usize>,
}

impl CpuSet {
    /// Parse a range list such as "0-15" or "0,2,4-7".
    pub fn parse(list: &str) -> FluxResult<Self> {
        let mut cores = Vec::new();
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(FluxError::BadCpuList(format!("empty element in {list:?}")));
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = parse_core(lo, list)?;
                    let hi = parse_core(hi, list)?;
                    if lo > hi {
                        return Err(FluxError::BadCpuList(format!(
                            "reversed range {lo}-{hi} in {list:?}"
                        )));
                    }
                    cores.extend(lo..=hi);
                }
                None => cores.push(parse_core(part, list)?),
            }
        }
        Self::from_cores(cores, list)
    }

    /// Core set `0..n`
    pub fn first_n(n: usize) -> FluxResult<Self> {
        Self::from_cores((0..n).collect(), "cores-number")
    }

    fn from_cores(mut cores: Vec<usize>, origin: &str) -> FluxResult<Self> {
        cores.sort_unstable();
        cores.dedup();
        if cores.is_empty() {
            return Err(FluxError::BadCpuList(format!("empty core set from {origin:?}")));
        }
        Ok(Self { cores })
    }

    /// All cores, ascending
    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    /// Number of cores in the set
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// True if the set is empty (cannot happen via the constructors)
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Split into (scheduler core, worker cores). The lowest core is
    /// reserved for the scheduler; the rest form the worker budget.
    pub fn split_scheduler(&self) -> FluxResult<(usize, &[usize])> {
        if self.cores.len() < 2 {
            return Err(FluxError::TooFewCores(self.cores.len()));
        }
        Ok((self.cores[0], &self.cores[1..]))
    }
}

fn parse_core(s: &str, list: &str) -> FluxResult<usize> {
    s.trim()
        .parse()
        .map_err(|_| FluxError::BadCpuList(format!("bad core id {s:?} in {list:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let set = CpuSet::parse("0-3").unwrap();
        assert_eq!(set.cores(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_mixed() {
        let set = CpuSet::parse("0,2,4-7").unwrap();
        assert_eq!(set.cores(), &[0, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn test_parse_dedup_and_order() {
        let set = CpuSet::parse("5,1-3,2").unwrap();
        assert_eq!(set.cores(), &[1, 2, 3, 5]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CpuSet::parse("").is_err());
        assert!(CpuSet::parse("0,,2").is_err());
        assert!(CpuSet::parse("3-1").is_err());
        assert!(CpuSet::parse("a-b").is_err());
    }

    #[test]
    fn test_split_scheduler() {
        let set = CpuSet::parse("2-5").unwrap();
        let (sched, workers) = set.split_scheduler().unwrap();
        assert_eq!(sched, 2);
        assert_eq!(workers, &[3, 4, 5]);
    }

    #[test]
    fn test_split_needs_two_cores() {
        let set = CpuSet::first_n(1).unwrap();
        assert!(matches!(
            set.split_scheduler(),
            Err(FluxError::TooFewCores(1))
        ));
    }

    #[test]
    fn test_config_precedence() {
        let cfg = Config {
            cpu_list: Some("0-1".into()),
            cpu_cores_number: Some(8),
            ..Default::default()
        };
        assert_eq!(cfg.cpu_set().unwrap().len(), 2);
    }
}
