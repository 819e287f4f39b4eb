//! Instance list loading.
//!
//! Each non-empty line is `api,frontend,protocol`; a front end of `None`
//! means the instance has no public page. The API host is the identity key,
//! so a repeated host is dropped with a warning.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{info, warn};

use super::{Instance, InstanceDescriptor, Protocol};

#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("expected `api,frontend,protocol`, got {0} field(s)")]
    FieldCount(usize),

    #[error("api host is empty")]
    EmptyApi,

    #[error("unknown protocol `{0}`")]
    Protocol(String),
}

/// Parse one instance-list line.
pub fn parse_descriptor(line: &str) -> Result<InstanceDescriptor, DescriptorError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(DescriptorError::FieldCount(fields.len()));
    }
    let api = fields[0].trim_end_matches('/');
    if api.is_empty() {
        return Err(DescriptorError::EmptyApi);
    }
    let front_end = match fields[1] {
        "" | "None" => None,
        fe => Some(fe.trim_end_matches('/').to_string()),
    };
    let protocol: Protocol = fields[2].parse().map_err(DescriptorError::Protocol)?;
    Ok(InstanceDescriptor {
        api: api.to_string(),
        front_end,
        protocol,
    })
}

/// The deduplicated set of instances for one run.
#[derive(Debug, Default)]
pub struct InstanceDirectory {
    instances: Vec<Arc<Instance>>,
}

impl InstanceDirectory {
    /// Build instances from descriptors, keeping the first of any repeated API host.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = InstanceDescriptor>,
    {
        let mut seen = HashSet::new();
        let mut instances = Vec::new();
        for descriptor in descriptors {
            let key = descriptor.api.to_lowercase();
            if !seen.insert(key) {
                warn!(api = %descriptor.api, "duplicate api found, ignoring");
                continue;
            }
            instances.push(Arc::new(Instance::new(descriptor)));
        }
        Self { instances }
    }

    /// Parse instance-list text. Blank lines and `#` comments are skipped,
    /// malformed lines are logged and skipped.
    pub fn parse(contents: &str) -> Self {
        let descriptors = contents
            .lines()
            .map(str::trim)
            .enumerate()
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|(n, line)| match parse_descriptor(line) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "skipping malformed instance line");
                    None
                }
            });
        Self::from_descriptors(descriptors)
    }

    /// Read and parse an instance-list file. Lines are shuffled first so no
    /// instance is systematically checked first or last.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read instance file: {}", path.display()))?;
        let mut lines: Vec<&str> = content.lines().collect();
        lines.shuffle(&mut rand::thread_rng());
        let directory = Self::parse(&lines.join("\n"));
        if directory.is_empty() {
            anyhow::bail!("instance file {} lists no instances", path.display());
        }
        info!(path = %path.display(), count = directory.len(), "loaded instances");
        Ok(directory)
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
