// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Detecting whether this process is part of a distributed worker group.

use std::{collections::HashMap, fmt};
use tracing::debug;

/// Set to `1` in the environment of worker processes started by the forking strategy.
pub const CHILD_PROCESS_ENV: &str = "MPITEST_CHILD_PROCESS";

/// Environment variables reporting the worker group size, as `(size, rank)` pairs.
///
/// Open MPI, MPICH/Hydra (and Intel MPI), and MVAPICH2 respectively.
pub const GROUP_ENV_VARS: &[(&str, &str)] = &[
    ("OMPI_COMM_WORLD_SIZE", "OMPI_COMM_WORLD_RANK"),
    ("PMI_SIZE", "PMI_RANK"),
    ("MV2_COMM_WORLD_SIZE", "MV2_COMM_WORLD_RANK"),
];

/// Reports facts about the worker group this process belongs to.
pub trait WorkerGroupProbe: fmt::Debug + Send + Sync {
    /// Returns true if this process was started by mpitest's forking strategy.
    fn is_launched_child(&self) -> bool;

    /// The number of processes in the ambient worker group, if known.
    fn group_size(&self) -> Option<usize>;

    /// This process's rank in the ambient worker group, if known.
    fn rank(&self) -> Option<usize>;
}

/// A [`WorkerGroupProbe`] backed by environment variables set by the launcher.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EnvProbe {
    launched_child: bool,
    group_size: Option<usize>,
    rank: Option<usize>,
}

impl EnvProbe {
    /// Reads the current process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds a probe from a set of environment variables.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let launched_child = vars
            .get(CHILD_PROCESS_ENV)
            .is_some_and(|value| !value.is_empty() && value != "0");

        let lookup = |name: &str| vars.get(name).and_then(|value| value.trim().parse().ok());
        let (group_size, rank) = GROUP_ENV_VARS
            .iter()
            .find_map(|&(size_var, rank_var)| {
                lookup(size_var).map(|size| (Some(size), lookup(rank_var)))
            })
            .unwrap_or((None, None));

        Self {
            launched_child,
            group_size,
            rank,
        }
    }
}

impl WorkerGroupProbe for EnvProbe {
    fn is_launched_child(&self) -> bool {
        self.launched_child
    }

    fn group_size(&self) -> Option<usize> {
        self.group_size
    }

    fn rank(&self) -> Option<usize> {
        self.rank
    }
}

/// How parallel test variants are executed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionMode {
    /// Each variant is run by launching a new worker group.
    Forking,

    /// This process is already one of the workers; variants run in place.
    NonForking,
}

impl ExecutionMode {
    /// Selects the mode for this process.
    ///
    /// Non-forking if this process was launched by mpitest or sits in a worker group of more
    /// than one process, forking otherwise.
    pub fn detect(probe: &dyn WorkerGroupProbe) -> Self {
        let mode = if probe.is_launched_child() || probe.group_size().is_some_and(|size| size > 1) {
            Self::NonForking
        } else {
            Self::Forking
        };
        debug!(
            "execution mode: {mode} (launched child: {}, group size: {:?})",
            probe.is_launched_child(),
            probe.group_size(),
        );
        mode
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forking => write!(f, "forking"),
            Self::NonForking => write!(f, "non-forking"),
        }
    }
}
