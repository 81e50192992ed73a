//! Declarative description of the deployment network: subnets, routing and
//! allow-listed security rules, plus an evaluator that answers whether a
//! given flow is permitted.
//!
//! Nothing here provisions infrastructure. The model is what operators
//! version and review; `notes-stack topology check` validates it and
//! `notes-stack topology probe` evaluates single flows against it.

pub mod cidr;
pub mod model;
pub mod reference;

use thiserror::Error as ThisError;

pub use cidr::Ipv4Cidr;
pub use model::{
    Decision, Endpoint, Flow, Protocol, Resource, Role, RouteTableEntry, RouteTarget, RuleRow,
    RuleSource, SecurityGroup, SecurityRule, Subnet, SubnetKind, Topology,
};

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum TopologyError {
    #[error("invalid CIDR block `{0}`")]
    InvalidCidr(String),

    #[error("unknown resource `{0}`")]
    UnknownResource(String),

    #[error("unknown subnet `{0}`")]
    UnknownSubnet(String),

    #[error("no route from subnet `{subnet}` to {destination}")]
    NoRoute { subnet: String, destination: String },

    #[error("failed to load topology: {0}")]
    Load(String),

    #[error("topology violates {} rule(s): {}", .0.len(), .0.join("; "))]
    Violations(Vec<String>),
}
