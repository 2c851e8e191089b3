use std::str::FromStr;

use serde::Serialize;

use super::group::DistError;

pub const MASTER_ADDR: &str = "MASTER_ADDR";
pub const MASTER_PORT: &str = "MASTER_PORT";
pub const RANK:        &str = "RANK";
pub const LOCAL_RANK:  &str = "LOCAL_RANK";
pub const WORLD_SIZE:  &str = "WORLD_SIZE";

/// Coordination parameters of one rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistEnv {
    pub master_addr: String,
    pub master_port: u16,
    /// Global rank
    pub rank:        usize,
    /// Rank on this host; picks the device
    pub local_rank:  usize,
    pub world_size:  usize,
}

impl Default for DistEnv {
    fn default() -> Self {
        Self {
            master_addr: "localhost".to_string(),
            master_port: 1234,
            rank:        0,
            local_rank:  0,
            world_size:  1,
        }
    }
}

impl DistEnv {
    /// Read the process environment.
    pub fn from_process_env() -> Result<Self, DistError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve every key through `lookup`, keeping the default for
    /// missing ones.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DistError> {
        let defaults = Self::default();
        let env = Self {
            master_addr: lookup(MASTER_ADDR).unwrap_or(defaults.master_addr),
            master_port: parse(&lookup, MASTER_PORT, defaults.master_port)?,
            rank:        parse(&lookup, RANK, defaults.rank)?,
            local_rank:  parse(&lookup, LOCAL_RANK, defaults.local_rank)?,
            world_size:  parse(&lookup, WORLD_SIZE, defaults.world_size)?,
        };
        env.validate()?;
        Ok(env)
    }

    /// The environment of every rank of this world, in rank order.
    /// Each rank takes the device matching its rank on this host.
    pub fn peers(&self) -> Vec<DistEnv> {
        (0..self.world_size)
            .map(|rank| DistEnv { rank, local_rank: rank, ..self.clone() })
            .collect()
    }

    pub fn validate(&self) -> Result<(), DistError> {
        if self.world_size == 0 {
            return Err(DistError::InvalidEnv {
                key:    WORLD_SIZE,
                value:  "0".to_string(),
                reason: "a group needs at least one process".to_string(),
            });
        }
        if self.rank >= self.world_size {
            return Err(DistError::RankOutOfRange { rank: self.rank, world_size: self.world_size });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(
    lookup:  &impl Fn(&str) -> Option<String>,
    key:     &'static str,
    default: T,
) -> Result<T, DistError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| DistError::InvalidEnv {
            key,
            value:  raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let env = DistEnv::resolve(|_| None).unwrap();
        assert_eq!(env, DistEnv::default());
        assert_eq!(env.master_addr, "localhost");
        assert_eq!(env.master_port, 1234);
        assert_eq!(env.world_size, 1);
    }

    #[test]
    fn test_partial_override() {
        let env = DistEnv::resolve(lookup_from(&[
            (WORLD_SIZE, "4"),
            (RANK, "3"),
            (LOCAL_RANK, "1"),
        ]))
        .unwrap();
        assert_eq!(env.rank, 3);
        assert_eq!(env.local_rank, 1);
        assert_eq!(env.world_size, 4);
        assert_eq!(env.master_port, 1234);
    }

    #[test]
    fn test_non_numeric_value_is_error() {
        let err = DistEnv::resolve(lookup_from(&[(MASTER_PORT, "abc")])).unwrap_err();
        assert!(matches!(err, DistError::InvalidEnv { key: MASTER_PORT, .. }));
    }

    #[test]
    fn test_peers_cover_the_world() {
        let env   = DistEnv { world_size: 3, master_port: 29500, ..DistEnv::default() };
        let peers = env.peers();
        assert_eq!(peers.iter().map(|p| p.rank).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(peers.iter().all(|p| p.local_rank == p.rank && p.master_port == 29500));
        assert!(peers.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_rank_outside_world_is_error() {
        let err = DistEnv::resolve(lookup_from(&[(RANK, "2"), (WORLD_SIZE, "2")])).unwrap_err();
        assert!(matches!(err, DistError::RankOutOfRange { rank: 2, world_size: 2 }));
    }
}
