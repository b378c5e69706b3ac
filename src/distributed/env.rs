//! Launcher environment detection and rendezvous.

use std::time::Duration;

use tracing::info;

use super::group::{LocalGroup, ProcessGroup};
use super::tcp::TcpGroup;
use crate::config::RunConfig;
use crate::{Error, Result};

/// How long a non-root rank keeps retrying the rendezvous address
const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Rank layout of this process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributedInfo {
    /// Whether more than one process takes part
    pub distributed: bool,
    pub rank: usize,
    pub world_size: usize,
    /// Device index on this host
    pub local_rank: usize,
    /// Rendezvous address, `tcp://host:port` or `env://`
    pub dist_url: String,
}

impl DistributedInfo {
    /// Single-process layout
    pub fn single() -> Self {
        Self {
            distributed: false,
            rank: 0,
            world_size: 1,
            local_rank: 0,
            dist_url: "env://".to_string(),
        }
    }

    /// Read the process environment
    pub fn from_env(config: &RunConfig) -> Result<Self> {
        Self::from_lookup(config.world_size, &config.dist_url, |key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve the layout from a variable lookup
    ///
    /// `RANK` + `WORLD_SIZE` (with `LOCAL_RANK`) take precedence, then
    /// `SLURM_PROCID` with the configured world size. Anything else runs
    /// single-process.
    pub fn from_lookup(
        world_size: usize,
        dist_url: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let parse = |key: &str| -> Result<Option<usize>> {
            lookup(key)
                .map(|value| {
                    value.trim().parse::<usize>().map_err(|_| {
                        Error::Distributed(format!("{key}={value} is not a non-negative integer"))
                    })
                })
                .transpose()
        };

        let (rank, world_size, local_rank) =
            match (parse("RANK")?, parse("WORLD_SIZE")?, parse("SLURM_PROCID")?) {
                (Some(rank), Some(world), _) => {
                    (rank, world, parse("LOCAL_RANK")?.unwrap_or(0))
                }
                (_, _, Some(proc_id)) => {
                    let gpus_per_node = parse("SLURM_GPUS_ON_NODE")?.unwrap_or(1).max(1);
                    (proc_id, world_size, proc_id % gpus_per_node)
                }
                _ => {
                    info!("Not using distributed mode");
                    return Ok(Self::single());
                }
            };

        if world_size == 0 || rank >= world_size {
            return Err(Error::Distributed(format!(
                "rank {rank} is outside world size {world_size}"
            )));
        }

        Ok(Self {
            distributed: world_size > 1,
            rank,
            world_size,
            local_rank,
            dist_url: dist_url.to_string(),
        })
    }

    /// Resolve `dist_url` to a socket address
    ///
    /// `env://` reads `MASTER_ADDR` and `MASTER_PORT`.
    pub fn rendezvous_address(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        if let Some(address) = self.dist_url.strip_prefix("tcp://") {
            return Ok(address.to_string());
        }
        if self.dist_url == "env://" {
            let host = lookup("MASTER_ADDR")
                .ok_or_else(|| Error::Distributed("MASTER_ADDR is not set".to_string()))?;
            let port = lookup("MASTER_PORT")
                .ok_or_else(|| Error::Distributed("MASTER_PORT is not set".to_string()))?;
            return Ok(format!("{host}:{port}"));
        }
        Err(Error::Distributed(format!(
            "unsupported dist_url '{}'",
            self.dist_url
        )))
    }

    /// Join the process group described by this layout
    pub fn connect(&self) -> Result<Box<dyn ProcessGroup>> {
        if !self.distributed {
            return Ok(Box::new(LocalGroup));
        }
        let address = self.rendezvous_address(|key| std::env::var(key).ok())?;
        info!(
            "| distributed init (rank {}): {}",
            self.rank, self.dist_url
        );
        let group = TcpGroup::connect(self.rank, self.world_size, &address, CONNECT_TIMEOUT)?;
        Ok(Box::new(group))
    }
}

/// Detect the launcher layout and join the process group
pub fn init_distributed_mode(config: &RunConfig) -> Result<(DistributedInfo, Box<dyn ProcessGroup>)> {
    let info = DistributedInfo::from_env(config)?;
    let mut group = info.connect()?;
    group.barrier()?;
    Ok((info, group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_torchrun_style_variables() {
        let info = DistributedInfo::from_lookup(
            1,
            "env://",
            lookup(&[("RANK", "3"), ("WORLD_SIZE", "4"), ("LOCAL_RANK", "1")]),
        )
        .unwrap();
        assert!(info.distributed);
        assert_eq!((info.rank, info.world_size, info.local_rank), (3, 4, 1));
    }

    #[test]
    fn test_slurm_uses_configured_world_size() {
        let info =
            DistributedInfo::from_lookup(8, "tcp://10.0.0.1:29500", lookup(&[("SLURM_PROCID", "5")]))
                .unwrap();
        assert_eq!((info.rank, info.world_size), (5, 8));
        assert_eq!(
            info.rendezvous_address(|_| None).unwrap(),
            "10.0.0.1:29500"
        );
    }

    #[test]
    fn test_no_variables_is_single_process() {
        let info = DistributedInfo::from_lookup(1, "env://", lookup(&[])).unwrap();
        assert_eq!(info, DistributedInfo::single());
    }

    #[test]
    fn test_rank_outside_world_is_rejected() {
        let result =
            DistributedInfo::from_lookup(1, "env://", lookup(&[("RANK", "2"), ("WORLD_SIZE", "2")]));
        assert!(matches!(result, Err(Error::Distributed(_))));
    }

    #[test]
    fn test_env_rendezvous_reads_master_variables() {
        let mut info = DistributedInfo::single();
        info.distributed = true;
        let address = info
            .rendezvous_address(lookup(&[("MASTER_ADDR", "127.0.0.1"), ("MASTER_PORT", "1234")]))
            .unwrap();
        assert_eq!(address, "127.0.0.1:1234");
        assert!(info.rendezvous_address(lookup(&[])).is_err());
    }
}
