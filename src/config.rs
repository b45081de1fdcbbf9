//! Declarative pipeline description.
//!
//! Plain-data mirror of the runtime configuration types, with serde derives
//! so an embedding application can describe a pipeline in JSON/TOML and hand
//! it to the engine. The engine defines the schema only; reading files and
//! choosing formats is the application's business.

use crate::batching::{BatchingConfig, BatchingPolicy};
use crate::error::{Error, Result};
use crate::node::NodeConfig;
use crate::port::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Serializable overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicySpec {
    #[default]
    Blocking,
    DiscardNew,
}

impl From<PolicySpec> for OverflowPolicy {
    fn from(spec: PolicySpec) -> Self {
        match spec {
            PolicySpec::Blocking => OverflowPolicy::Blocking,
            PolicySpec::DiscardNew => OverflowPolicy::DiscardNew,
        }
    }
}

/// Serializable batching policy. Custom algorithms are installed in code,
/// not from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchingPolicySpec {
    #[default]
    IgnoreStream,
    PerStream,
}

impl From<BatchingPolicySpec> for BatchingPolicy {
    fn from(spec: BatchingPolicySpec) -> Self {
        match spec {
            BatchingPolicySpec::IgnoreStream => BatchingPolicy::IgnoreStream,
            BatchingPolicySpec::PerStream => BatchingPolicy::PerStream,
        }
    }
}

/// Serializable batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingSpec {
    pub policy: BatchingPolicySpec,
    pub batch_size: usize,
    pub stream_count: usize,
    pub threads_per_batch: usize,
    pub fetch_timeout_ms: u64,
}

impl Default for BatchingSpec {
    fn default() -> Self {
        let defaults = BatchingConfig::default();
        Self {
            policy: BatchingPolicySpec::default(),
            batch_size: defaults.batch_size,
            stream_count: defaults.stream_count,
            threads_per_batch: defaults.threads_per_batch,
            fetch_timeout_ms: defaults.fetch_timeout.as_millis() as u64,
        }
    }
}

impl BatchingSpec {
    pub fn to_batching_config(&self) -> BatchingConfig {
        BatchingConfig {
            policy: self.policy.into(),
            batch_size: self.batch_size,
            stream_count: self.stream_count,
            threads_per_batch: self.threads_per_batch,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            algo: None,
        }
    }
}

/// One stage of a declared pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default = "default_one")]
    pub in_ports: usize,
    #[serde(default = "default_one")]
    pub out_ports: usize,
    #[serde(default = "default_one")]
    pub total_threads: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: PolicySpec,
    #[serde(default = "default_looping_interval_ms")]
    pub looping_interval_ms: u64,
    #[serde(default)]
    pub batching: BatchingSpec,
}

fn default_one() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    crate::port::DEFAULT_QUEUE_CAPACITY
}

fn default_looping_interval_ms() -> u64 {
    10
}

impl StageSpec {
    /// Convert into the runtime configuration (validated on stage creation).
    pub fn to_node_config(&self) -> NodeConfig {
        NodeConfig {
            in_ports: self.in_ports,
            out_ports: self.out_ports,
            total_threads: self.total_threads,
            queue_capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy.into(),
            looping_interval: Duration::from_millis(self.looping_interval_ms),
            batching: self.batching.to_batching_config(),
        }
    }
}

/// One wiring edge of a declared pipeline, by stage name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub from: String,
    #[serde(default)]
    pub out_port: usize,
    pub to: String,
    #[serde(default)]
    pub in_port: usize,
}

/// A full declared pipeline: stages plus wiring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl PipelineSpec {
    /// Structural validation: unique stage names, link endpoints that exist,
    /// port indices within the declared counts.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }
        for link in &self.links {
            let from = self
                .stages
                .iter()
                .find(|s| s.name == link.from)
                .ok_or_else(|| Error::Config(format!("link from unknown stage '{}'", link.from)))?;
            let to = self
                .stages
                .iter()
                .find(|s| s.name == link.to)
                .ok_or_else(|| Error::Config(format!("link to unknown stage '{}'", link.to)))?;
            if link.out_port >= from.out_ports {
                return Err(Error::Config(format!(
                    "link from '{}' port {} but stage declares {} output ports",
                    link.from, link.out_port, from.out_ports
                )));
            }
            if link.in_port >= to.in_ports {
                return Err(Error::Config(format!(
                    "link to '{}' port {} but stage declares {} input ports",
                    link.to, link.in_port, to.in_ports
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_spec() -> PipelineSpec {
        PipelineSpec {
            stages: vec![
                StageSpec {
                    name: "decode".into(),
                    in_ports: 0,
                    out_ports: 1,
                    total_threads: 2,
                    queue_capacity: 8,
                    overflow_policy: PolicySpec::DiscardNew,
                    looping_interval_ms: 5,
                    batching: BatchingSpec::default(),
                },
                StageSpec {
                    name: "infer".into(),
                    in_ports: 1,
                    out_ports: 0,
                    total_threads: 1,
                    queue_capacity: 4,
                    overflow_policy: PolicySpec::Blocking,
                    looping_interval_ms: 10,
                    batching: BatchingSpec {
                        policy: BatchingPolicySpec::PerStream,
                        stream_count: 2,
                        ..BatchingSpec::default()
                    },
                },
            ],
            links: vec![LinkSpec {
                from: "decode".into(),
                out_port: 0,
                to: "infer".into(),
                in_port: 0,
            }],
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(two_stage_spec().validate().is_ok());

        let mut dup = two_stage_spec();
        dup.stages[1].name = "decode".into();
        assert!(dup.validate().is_err());

        let mut bad_link = two_stage_spec();
        bad_link.links[0].to = "missing".into();
        assert!(bad_link.validate().is_err());

        let mut bad_port = two_stage_spec();
        bad_port.links[0].in_port = 3;
        assert!(bad_port.validate().is_err());
    }

    #[test]
    fn test_to_node_config() {
        let spec = two_stage_spec();
        let config = spec.stages[1].to_node_config();
        assert_eq!(config.in_ports, 1);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.batching.policy, BatchingPolicy::PerStream);
        assert_eq!(config.batching.stream_count, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let spec = two_stage_spec();
        let json = serde_json::to_string_pretty(&spec).unwrap();
        let parsed: PipelineSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stages.len(), 2);
        assert_eq!(parsed.stages[0].name, "decode");
        assert_eq!(parsed.links.len(), 1);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let json = r#"{ "stages": [ { "name": "solo" } ] }"#;
        let parsed: PipelineSpec = serde_json::from_str(json).unwrap();
        let stage = &parsed.stages[0];
        assert_eq!(stage.in_ports, 1);
        assert_eq!(stage.out_ports, 1);
        assert_eq!(stage.total_threads, 1);
        assert_eq!(stage.queue_capacity, crate::port::DEFAULT_QUEUE_CAPACITY);
        assert_eq!(stage.overflow_policy, PolicySpec::Blocking);
        assert_eq!(stage.batching.policy, BatchingPolicySpec::IgnoreStream);
    }
}
