//! The reference three-tier layout: edge proxy and bastion in public
//! subnets, application replicas and a multi-AZ store in private subnets.

use std::net::Ipv4Addr;

use super::model::*;
use super::Ipv4Cidr;

pub const APP_PORT: u16 = 5000;
pub const STORE_PORT: u16 = 3306;
pub const SSH_PORT: u16 = 22;

fn cidr(s: &str) -> Ipv4Cidr {
    s.parse().unwrap_or(Ipv4Cidr::ANY)
}

fn subnet(name: &str, block: &str, kind: SubnetKind, zone: &str) -> Subnet {
    Subnet {
        name: name.to_string(),
        cidr: cidr(block),
        kind,
        zone: zone.to_string(),
        group: match kind {
            SubnetKind::Public => "public".to_string(),
            SubnetKind::Private => "private".to_string(),
        },
    }
}

fn rule(description: &str, source: RuleSource, ports: &[u16]) -> SecurityRule {
    SecurityRule {
        description: description.to_string(),
        source,
        ports: ports.to_vec(),
        protocol: Protocol::Tcp,
    }
}

fn resource(name: &str, role: Role, subnet: &str, address: [u8; 4], sg: Option<&str>) -> Resource {
    Resource {
        name: name.to_string(),
        role,
        subnet: subnet.to_string(),
        address: Ipv4Addr::from(address),
        security_group: sg.map(str::to_string),
    }
}

impl Topology {
    /// Build the reference topology; `operator` is the only origin allowed
    /// to reach the bastion over SSH.
    pub fn reference(operator: Ipv4Cidr) -> Self {
        let group = |name: &str| RuleSource::Group(name.to_string());

        Topology {
            vpc: cidr("10.0.0.0/16"),
            subnets: vec![
                subnet("public-a", "10.0.1.0/24", SubnetKind::Public, "az-a"),
                subnet("public-b", "10.0.2.0/24", SubnetKind::Public, "az-b"),
                subnet("private-a", "10.0.3.0/24", SubnetKind::Private, "az-a"),
                subnet("private-b", "10.0.4.0/24", SubnetKind::Private, "az-b"),
            ],
            security_groups: vec![
                SecurityGroup {
                    name: "edge-sg".to_string(),
                    ingress: vec![rule(
                        "Public ingress",
                        RuleSource::Cidr(Ipv4Cidr::ANY),
                        &[80, 443],
                    )],
                },
                SecurityGroup {
                    name: "bastion-sg".to_string(),
                    ingress: vec![rule("Admin SSH", RuleSource::Cidr(operator), &[SSH_PORT])],
                },
                SecurityGroup {
                    name: "app-sg".to_string(),
                    ingress: vec![rule("App traffic", group("edge-sg"), &[APP_PORT])],
                },
                SecurityGroup {
                    name: "db-sg".to_string(),
                    ingress: vec![
                        rule("DB from app", group("app-sg"), &[STORE_PORT]),
                        rule("DB from bastion", group("bastion-sg"), &[STORE_PORT]),
                    ],
                },
            ],
            resources: vec![
                resource("edge-proxy", Role::EdgeProxy, "public-a", [10, 0, 1, 10], Some("edge-sg")),
                resource("bastion", Role::Bastion, "public-b", [10, 0, 2, 10], Some("bastion-sg")),
                resource("nat-a", Role::NatGateway, "public-a", [10, 0, 1, 5], None),
                resource("app-a", Role::App, "private-a", [10, 0, 3, 10], Some("app-sg")),
                resource("app-b", Role::App, "private-b", [10, 0, 4, 10], Some("app-sg")),
                resource("store-primary", Role::Store, "private-a", [10, 0, 3, 20], Some("db-sg")),
                resource("store-standby", Role::Store, "private-b", [10, 0, 4, 20], Some("db-sg")),
            ],
            routes: vec![
                RouteTableEntry {
                    subnet_group: "public".to_string(),
                    destination: Ipv4Cidr::ANY,
                    target: RouteTarget::InternetGateway,
                },
                RouteTableEntry {
                    subnet_group: "private".to_string(),
                    destination: Ipv4Cidr::ANY,
                    target: RouteTarget::NatGateway("nat-a".to_string()),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyError;

    fn operator() -> Ipv4Cidr {
        "198.51.100.7/32".parse().unwrap()
    }

    fn reference() -> Topology {
        Topology::reference(operator())
    }

    fn ext(ip: [u8; 4]) -> Endpoint {
        Endpoint::External(Ipv4Addr::from(ip))
    }

    fn res(name: &str) -> Endpoint {
        Endpoint::Resource(name.to_string())
    }

    #[test]
    fn reference_topology_is_valid() {
        reference().validate().expect("reference topology validates");
    }

    #[test]
    fn enumerated_flows_are_allowed() {
        let topo = reference();
        let allowed = [
            Flow::tcp(ext([8, 8, 8, 8]), "edge-proxy", 80),
            Flow::tcp(ext([8, 8, 8, 8]), "edge-proxy", 443),
            Flow::tcp(ext([198, 51, 100, 7]), "bastion", SSH_PORT),
            Flow::tcp(res("edge-proxy"), "app-a", APP_PORT),
            Flow::tcp(res("edge-proxy"), "app-b", APP_PORT),
            Flow::tcp(res("app-a"), "store-primary", STORE_PORT),
            Flow::tcp(res("app-b"), "store-standby", STORE_PORT),
            Flow::tcp(res("bastion"), "store-primary", STORE_PORT),
        ];
        for flow in allowed {
            assert!(topo.evaluate(&flow).is_allowed(), "expected allow: {flow:?}");
        }
    }

    #[test]
    fn store_rejects_everyone_but_app_and_bastion() {
        let topo = reference();
        let denied = [
            Flow::tcp(res("edge-proxy"), "store-primary", STORE_PORT),
            Flow::tcp(ext([8, 8, 8, 8]), "store-primary", STORE_PORT),
            Flow::tcp(ext([10, 0, 3, 99]), "store-primary", STORE_PORT),
            Flow::tcp(res("store-standby"), "store-primary", STORE_PORT),
            Flow::tcp(res("app-a"), "store-primary", 5432),
        ];
        for flow in denied {
            assert!(!topo.evaluate(&flow).is_allowed(), "expected deny: {flow:?}");
        }
    }

    #[test]
    fn default_deny_elsewhere() {
        let topo = reference();
        assert!(!topo.evaluate(&Flow::tcp(ext([8, 8, 8, 8]), "app-a", APP_PORT)).is_allowed());
        assert!(!topo.evaluate(&Flow::tcp(ext([8, 8, 8, 8]), "bastion", SSH_PORT)).is_allowed());
        assert!(!topo.evaluate(&Flow::tcp(ext([8, 8, 8, 8]), "edge-proxy", 22)).is_allowed());
        let udp = Flow {
            protocol: Protocol::Udp,
            ..Flow::tcp(ext([8, 8, 8, 8]), "edge-proxy", 443)
        };
        assert!(!topo.evaluate(&udp).is_allowed());
        assert!(!topo.evaluate(&Flow::tcp(res("app-a"), "nat-a", 443)).is_allowed());
    }

    #[test]
    fn routing_follows_subnet_kind() {
        let topo = reference();
        let internet = Ipv4Addr::new(93, 184, 216, 34);
        assert_eq!(topo.route("public-a", internet).unwrap(), RouteTarget::InternetGateway);
        assert_eq!(
            topo.route("private-b", internet).unwrap(),
            RouteTarget::NatGateway("nat-a".to_string())
        );
        assert_eq!(
            topo.route("private-a", Ipv4Addr::new(10, 0, 4, 20)).unwrap(),
            RouteTarget::Local
        );
        assert!(matches!(
            topo.route("nowhere", internet),
            Err(TopologyError::UnknownSubnet(_))
        ));
        assert_eq!(
            topo.route_from("store-standby", internet).unwrap(),
            RouteTarget::NatGateway("nat-a".to_string())
        );
        assert_eq!(
            topo.route_from("bastion", internet).unwrap(),
            RouteTarget::InternetGateway
        );
        assert!(matches!(
            topo.route_from("ghost", internet),
            Err(TopologyError::UnknownResource(_))
        ));
    }

    #[test]
    fn rule_table_matches_reference() {
        let rows = reference().rules();
        let summary: Vec<(&str, &str, &str)> = rows
            .iter()
            .map(|r| (r.rule.as_str(), r.source.as_str(), r.ports.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Public ingress", "0.0.0.0/0", "80, 443"),
                ("Admin SSH", "198.51.100.7/32", "22"),
                ("App traffic", "sg:edge-sg", "5000"),
                ("DB from app", "sg:app-sg", "3306"),
                ("DB from bastion", "sg:bastion-sg", "3306"),
            ]
        );
        assert!(rows.iter().all(|r| r.protocol == Protocol::Tcp));
    }

    #[test]
    fn policy_violations_are_reported() {
        let mut topo = Topology::reference("0.0.0.0/0".parse().unwrap());
        topo.security_groups[3]
            .ingress
            .push(rule("Open DB", RuleSource::Cidr(Ipv4Cidr::ANY), &[STORE_PORT]));
        topo.resources.retain(|r| r.name != "store-standby");
        topo.routes.pop();

        let violations = topo.violations();
        assert!(violations.iter().any(|v| v.contains("bastion SSH")));
        assert!(violations.iter().any(|v| v.contains("Open DB")));
        assert!(violations.iter().any(|v| v.contains("two availability zones")));
        assert!(violations.iter().any(|v| v.contains("NAT gateway")));
        assert!(matches!(topo.validate(), Err(TopologyError::Violations(_))));
    }

    #[test]
    fn loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.toml");
        std::fs::write(
            &path,
            r#"
            vpc = "10.1.0.0/16"

            [[subnets]]
            name = "pub"
            cidr = "10.1.1.0/24"
            kind = "public"
            zone = "az-a"
            group = "public"

            [[security_groups]]
            name = "edge-sg"

            [[security_groups.ingress]]
            description = "Public ingress"
            source = { cidr = "0.0.0.0/0" }
            ports = [80, 443]
            protocol = "tcp"

            [[resources]]
            name = "edge"
            role = "edge_proxy"
            subnet = "pub"
            address = "10.1.1.10"
            security_group = "edge-sg"

            [[routes]]
            subnet_group = "public"
            destination = "0.0.0.0/0"
            target = "internet_gateway"
            "#,
        )
        .unwrap();

        let topo = Topology::load(&path).expect("topology loads");
        topo.validate().expect("loaded topology validates");
        assert!(topo.evaluate(&Flow::tcp(ext([1, 2, 3, 4]), "edge", 443)).is_allowed());
        assert!(Topology::load(&dir.path().join("missing.toml")).is_err());
    }
}
