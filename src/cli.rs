use clap::{Args, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::error::StackError;
use crate::service;
use crate::topology::{Endpoint, Flow, Protocol, Topology};

#[derive(Parser, Debug)]
#[command(name = "notes-stack", version, about = "Three-tier notes service: edge proxy, CRUD app, store tooling")]
pub struct Cli {
    /// Path of the TOML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the notes CRUD API
    ServeApp,
    /// Serve the public edge proxy
    ServeEdge,
    /// Create the notes schema in the store (deploy-time step)
    Migrate,
    /// Open a direct store session and print recent notes
    Inspect {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
    /// Validate or query the network topology
    #[command(subcommand)]
    Topology(TopologyCommand),
}

#[derive(Subcommand, Debug)]
pub enum TopologyCommand {
    /// Validate the topology and print its security rules
    Check(TopologySource),
    /// Evaluate one flow against the security rules
    Probe {
        #[command(flatten)]
        source: TopologySource,
        /// Source resource name or external IPv4 address
        #[arg(long)]
        from: Endpoint,
        /// Destination resource name
        #[arg(long)]
        to: String,
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
    },
    /// Show where traffic from a resource to an address is routed
    Route {
        #[command(flatten)]
        source: TopologySource,
        /// Resource the traffic leaves from
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: Ipv4Addr,
    },
}

#[derive(Args, Debug)]
pub struct TopologySource {
    /// Topology TOML; defaults to `topology.file` or the built-in reference
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl TopologySource {
    fn load(&self, cfg: &Config) -> Result<Topology, StackError> {
        match self.file.as_ref().or(cfg.topology.file.as_ref()) {
            Some(path) => Ok(Topology::load(path)?),
            None => Ok(Topology::reference(cfg.topology.operator_cidr)),
        }
    }
}

impl Command {
    /// Worker threads for the runtime this command runs on.
    pub fn worker_threads(&self, cfg: &Config) -> Option<usize> {
        match self {
            Command::ServeApp => cfg.app.worker_threads,
            _ => None,
        }
    }
}

pub async fn run(command: Command, cfg: Config) -> Result<ExitCode, StackError> {
    match command {
        Command::ServeApp => service::serve_app(&cfg).await?,
        Command::ServeEdge => service::serve_edge(&cfg).await?,
        Command::Migrate => service::migrate(&cfg).await?,
        Command::Inspect { limit } => service::inspect(&cfg, limit).await?,
        Command::Topology(TopologyCommand::Check(source)) => {
            let topology = source.load(&cfg)?;
            print_rules(&topology);
            let violations = topology.violations();
            if !violations.is_empty() {
                for v in &violations {
                    eprintln!("violation: {v}");
                }
                return Ok(ExitCode::FAILURE);
            }
            println!("topology OK");
        }
        Command::Topology(TopologyCommand::Probe {
            source,
            from,
            to,
            port,
            protocol,
        }) => {
            let topology = source.load(&cfg)?;
            let flow = Flow {
                source: from,
                destination: to,
                port,
                protocol,
            };
            let decision = topology.evaluate(&flow);
            println!(
                "{} -> {}:{}/{}: {decision}",
                flow.source, flow.destination, flow.port, flow.protocol
            );
            if !decision.is_allowed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Topology(TopologyCommand::Route { source, from, to }) => {
            let topology = source.load(&cfg)?;
            let target = topology.route_from(&from, to)?;
            println!("{from} -> {to}: {target}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_rules(topology: &Topology) {
    println!(
        "{:<18} {:<20} {:<44} {:<10} {}",
        "RULE", "SOURCE", "DESTINATION", "PORT", "PROTOCOL"
    );
    for row in topology.rules() {
        println!(
            "{:<18} {:<20} {:<44} {:<10} {}",
            row.rule, row.source, row.destination, row.ports, row.protocol
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_arguments() {
        let cli = Cli::try_parse_from([
            "notes-stack",
            "topology",
            "probe",
            "--from",
            "app-a",
            "--to",
            "store-primary",
            "--port",
            "3306",
        ])
        .expect("valid arguments");
        match cli.command {
            Command::Topology(TopologyCommand::Probe {
                from,
                port,
                protocol,
                ..
            }) => {
                assert_eq!(from, Endpoint::Resource("app-a".to_string()));
                assert_eq!(port, 3306);
                assert_eq!(protocol, Protocol::Tcp);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn route_reports_unknown_resource() {
        let command = Command::Topology(TopologyCommand::Route {
            source: TopologySource { file: None },
            from: "app-z".to_string(),
            to: Ipv4Addr::new(1, 1, 1, 1),
        });
        let err = run(command, Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("app-z"));
    }

    #[tokio::test]
    async fn probe_exit_code_follows_decision() {
        let probe = |from: &str, port| {
            Command::Topology(TopologyCommand::Probe {
                source: TopologySource { file: None },
                from: from.parse().unwrap(),
                to: "store-primary".to_string(),
                port,
                protocol: Protocol::Tcp,
            })
        };
        assert_eq!(run(probe("app-a", 3306), Config::default()).await.unwrap(), ExitCode::SUCCESS);
        assert_eq!(run(probe("edge-proxy", 3306), Config::default()).await.unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn worker_threads_only_apply_to_the_app() {
        let mut cfg = Config::default();
        cfg.app.worker_threads = Some(8);
        assert_eq!(Command::ServeApp.worker_threads(&cfg), Some(8));
        assert_eq!(Command::Migrate.worker_threads(&cfg), None);
    }
}
