use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use super::{Ipv4Cidr, TopologyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetKind {
    /// Resources receive externally routable addresses.
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub name: String,
    pub cidr: Ipv4Cidr,
    pub kind: SubnetKind,
    pub zone: String,
    /// Route table group this subnet is associated with.
    pub group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unsupported protocol `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Cidr(Ipv4Cidr),
    /// Any resource attached to the named security group.
    Group(String),
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSource::Cidr(c) => write!(f, "{c}"),
            RuleSource::Group(g) => write!(f, "sg:{g}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub description: String,
    pub source: RuleSource,
    pub ports: Vec<u16>,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub name: String,
    #[serde(default)]
    pub ingress: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    EdgeProxy,
    App,
    Store,
    Bastion,
    NatGateway,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub role: Role,
    pub subnet: String,
    pub address: Ipv4Addr,
    #[serde(default)]
    pub security_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    /// Implicit route for traffic that stays inside the VPC.
    Local,
    InternetGateway,
    /// Address-translated egress through the named NAT gateway resource.
    NatGateway(String),
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Local => f.write_str("local"),
            RouteTarget::InternetGateway => f.write_str("internet-gateway"),
            RouteTarget::NatGateway(name) => write!(f, "nat-gateway:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableEntry {
    pub subnet_group: String,
    pub destination: Ipv4Cidr,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub vpc: Ipv4Cidr,
    pub subnets: Vec<Subnet>,
    pub security_groups: Vec<SecurityGroup>,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub routes: Vec<RouteTableEntry>,
}

/// Origin of a flow: a modelled resource or an address outside the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Resource(String),
    External(Ipv4Addr),
}

impl FromStr for Endpoint {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<Ipv4Addr>() {
            Ok(ip) => Endpoint::External(ip),
            Err(_) => Endpoint::Resource(s.to_string()),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Resource(name) => f.write_str(name),
            Endpoint::External(ip) => write!(f, "{ip}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub source: Endpoint,
    pub destination: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Flow {
    pub fn tcp(source: Endpoint, destination: impl Into<String>, port: u16) -> Self {
        Self {
            source,
            destination: destination.into(),
            port,
            protocol: Protocol::Tcp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { security_group: String, rule: String },
    Denied(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allowed {
                security_group,
                rule,
            } => write!(f, "ALLOW ({security_group}: {rule})"),
            Decision::Denied(reason) => write!(f, "DENY ({reason})"),
        }
    }
}

/// One line of the rendered rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRow {
    pub rule: String,
    pub source: String,
    pub destination: String,
    pub ports: String,
    pub protocol: Protocol,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        if !path.exists() {
            return Err(TopologyError::Load(format!(
                "{} does not exist",
                path.display()
            )));
        }
        Figment::from(Toml::file(path))
            .extract()
            .map_err(|e| TopologyError::Load(e.to_string()))
    }

    pub fn subnet(&self, name: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn security_group(&self, name: &str) -> Option<&SecurityGroup> {
        self.security_groups.iter().find(|g| g.name == name)
    }

    /// Default-deny evaluation of a single flow against the destination's
    /// ingress rules.
    pub fn evaluate(&self, flow: &Flow) -> Decision {
        let Some(dest) = self.resource(&flow.destination) else {
            return Decision::Denied(format!("unknown destination `{}`", flow.destination));
        };
        let Some(group) = dest
            .security_group
            .as_deref()
            .and_then(|g| self.security_group(g))
        else {
            return Decision::Denied(format!("`{}` accepts no inbound flows", dest.name));
        };

        let (source_group, source_addr) = match &flow.source {
            Endpoint::External(ip) => (None, *ip),
            Endpoint::Resource(name) => match self.resource(name) {
                Some(r) => (r.security_group.as_deref(), r.address),
                None => return Decision::Denied(format!("unknown source `{name}`")),
            },
        };

        group
            .ingress
            .iter()
            .find(|rule| {
                rule.protocol == flow.protocol
                    && rule.ports.contains(&flow.port)
                    && match &rule.source {
                        RuleSource::Cidr(cidr) => cidr.contains(source_addr),
                        RuleSource::Group(g) => source_group == Some(g.as_str()),
                    }
            })
            .map(|rule| Decision::Allowed {
                security_group: group.name.clone(),
                rule: rule.description.clone(),
            })
            .unwrap_or_else(|| {
                Decision::Denied(format!(
                    "no rule in `{}` admits {} {}/{}",
                    group.name, flow.source, flow.protocol, flow.port
                ))
            })
    }

    /// Longest-prefix route lookup for traffic leaving `subnet`.
    pub fn route(&self, subnet: &str, destination: Ipv4Addr) -> Result<RouteTarget, TopologyError> {
        let subnet = self
            .subnet(subnet)
            .ok_or_else(|| TopologyError::UnknownSubnet(subnet.to_string()))?;

        let local = self
            .vpc
            .contains(destination)
            .then_some((self.vpc.prefix(), RouteTarget::Local));

        self.routes
            .iter()
            .filter(|r| r.subnet_group == subnet.group && r.destination.contains(destination))
            .map(|r| (r.destination.prefix(), r.target.clone()))
            .chain(local)
            .max_by_key(|(prefix, _)| *prefix)
            .map(|(_, target)| target)
            .ok_or_else(|| TopologyError::NoRoute {
                subnet: subnet.name.clone(),
                destination: destination.to_string(),
            })
    }

    /// Route lookup from the subnet `resource` lives in.
    pub fn route_from(&self, resource: &str, destination: Ipv4Addr) -> Result<RouteTarget, TopologyError> {
        let resource = self
            .resource(resource)
            .ok_or_else(|| TopologyError::UnknownResource(resource.to_string()))?;
        self.route(&resource.subnet, destination)
    }

    pub fn rules(&self) -> Vec<RuleRow> {
        self.security_groups
            .iter()
            .flat_map(|group| {
                let members: Vec<&str> = self
                    .resources
                    .iter()
                    .filter(|r| r.security_group.as_deref() == Some(group.name.as_str()))
                    .map(|r| r.name.as_str())
                    .collect();
                let destination = format!("{} [{}]", group.name, members.join(", "));
                group.ingress.iter().map(move |rule| RuleRow {
                    rule: rule.description.clone(),
                    source: rule.source.to_string(),
                    destination: destination.clone(),
                    ports: rule
                        .ports
                        .iter()
                        .map(u16::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                    protocol: rule.protocol,
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Violations(violations))
        }
    }

    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();

        let mut seen = HashSet::new();
        let names = self
            .subnets
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.security_groups.iter().map(|g| g.name.as_str()))
            .chain(self.resources.iter().map(|r| r.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                out.push(format!("name `{name}` is declared more than once"));
            }
        }

        self.check_subnets(&mut out);
        self.check_resources(&mut out);
        self.check_rules(&mut out);
        self.check_routes(&mut out);
        self.check_store_availability(&mut out);
        out
    }

    fn check_subnets(&self, out: &mut Vec<String>) {
        for (i, subnet) in self.subnets.iter().enumerate() {
            if !self.vpc.covers(&subnet.cidr) {
                out.push(format!(
                    "subnet `{}` ({}) lies outside the VPC {}",
                    subnet.name, subnet.cidr, self.vpc
                ));
            }
            for other in &self.subnets[i + 1..] {
                if subnet.cidr.covers(&other.cidr) || other.cidr.covers(&subnet.cidr) {
                    out.push(format!(
                        "subnets `{}` and `{}` overlap",
                        subnet.name, other.name
                    ));
                }
            }
        }
    }

    fn check_resources(&self, out: &mut Vec<String>) {
        for r in &self.resources {
            match self.subnet(&r.subnet) {
                None => out.push(format!("resource `{}` references unknown subnet `{}`", r.name, r.subnet)),
                Some(subnet) => {
                    if !subnet.cidr.contains(r.address) {
                        out.push(format!(
                            "resource `{}` address {} is outside subnet `{}`",
                            r.name, r.address, subnet.name
                        ));
                    }
                    let must_be_private = matches!(r.role, Role::App | Role::Store);
                    if must_be_private && subnet.kind == SubnetKind::Public {
                        out.push(format!(
                            "resource `{}` must not be placed in public subnet `{}`",
                            r.name, subnet.name
                        ));
                    }
                    if r.role == Role::NatGateway && subnet.kind != SubnetKind::Public {
                        out.push(format!("NAT gateway `{}` must sit in a public subnet", r.name));
                    }
                }
            }
            match r.security_group.as_deref() {
                Some(g) if self.security_group(g).is_none() => out.push(format!(
                    "resource `{}` references unknown security group `{g}`",
                    r.name
                )),
                None if r.role != Role::NatGateway => out.push(format!(
                    "resource `{}` has no security group",
                    r.name
                )),
                _ => {}
            }
        }
    }

    fn roles_in_group(&self, group: &str) -> Vec<Role> {
        self.resources
            .iter()
            .filter(|r| r.security_group.as_deref() == Some(group))
            .map(|r| r.role)
            .collect()
    }

    fn check_rules(&self, out: &mut Vec<String>) {
        for group in &self.security_groups {
            let roles = self.roles_in_group(&group.name);
            let private_tier = roles.iter().any(|r| matches!(r, Role::App | Role::Store));
            for rule in &group.ingress {
                if rule.ports.is_empty() {
                    out.push(format!("rule `{}` in `{}` lists no ports", rule.description, group.name));
                }
                match &rule.source {
                    RuleSource::Group(g) if self.security_group(g).is_none() => out.push(format!(
                        "rule `{}` in `{}` references unknown security group `{g}`",
                        rule.description, group.name
                    )),
                    RuleSource::Cidr(cidr) if private_tier => out.push(format!(
                        "rule `{}` admits {cidr} directly into private tier group `{}`; only security groups may be sources",
                        rule.description, group.name
                    )),
                    RuleSource::Cidr(cidr)
                        if roles.contains(&Role::Bastion)
                            && rule.ports.contains(&22)
                            && !cidr.is_host() =>
                    {
                        out.push(format!(
                            "bastion SSH rule `{}` must admit a single host, not {cidr}",
                            rule.description
                        ))
                    }
                    _ => {}
                }
            }
        }
    }

    fn check_routes(&self, out: &mut Vec<String>) {
        let groups: HashSet<&str> = self.subnets.iter().map(|s| s.group.as_str()).collect();
        for route in &self.routes {
            if !groups.contains(route.subnet_group.as_str()) {
                out.push(format!(
                    "route to {} references unknown subnet group `{}`",
                    route.destination, route.subnet_group
                ));
            }
            if let RouteTarget::NatGateway(nat) = &route.target {
                match self.resource(nat) {
                    Some(r) if r.role == Role::NatGateway => {}
                    _ => out.push(format!("route targets unknown NAT gateway `{nat}`")),
                }
            }
        }

        for subnet in &self.subnets {
            let default_route = self
                .routes
                .iter()
                .find(|r| r.subnet_group == subnet.group && r.destination == Ipv4Cidr::ANY)
                .map(|r| &r.target);
            match (subnet.kind, default_route) {
                (SubnetKind::Public, Some(RouteTarget::InternetGateway)) => {}
                (SubnetKind::Private, Some(RouteTarget::NatGateway(_))) => {}
                (SubnetKind::Public, _) => out.push(format!(
                    "public subnet `{}` must default-route to an internet gateway",
                    subnet.name
                )),
                (SubnetKind::Private, _) => out.push(format!(
                    "private subnet `{}` must default-route to a NAT gateway",
                    subnet.name
                )),
            }
        }
    }

    fn check_store_availability(&self, out: &mut Vec<String>) {
        let zones: HashSet<&str> = self
            .resources
            .iter()
            .filter(|r| r.role == Role::Store)
            .filter_map(|r| self.subnet(&r.subnet))
            .map(|s| s.zone.as_str())
            .collect();
        let has_store = self.resources.iter().any(|r| r.role == Role::Store);
        if has_store && zones.len() < 2 {
            out.push("store replicas must span at least two availability zones".to_string());
        }
    }
}
