//! # Server Configuration
//!
//! CLI flags with environment fallbacks. Precedence is flag, then
//! environment variable, then built-in default.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use mcache_common::CacheNode;

/// Environment variable names honored when the flag is absent.
const ENV_PERSISTENCE: &str = "PERSISTENCE_ENABLED";
const ENV_DATA_DIR: &str = "DATA_DIR";
const ENV_NODE_COUNT: &str = "NODE_COUNT";

/// Command line of the node server.
#[derive(Debug, Parser)]
#[command(
    name = "mcache-server",
    about = "MeshCache distributed cache node",
    disable_help_flag = true
)]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    pub host: String,

    /// RESP port to listen on. The health HTTP surface binds port + 1.
    #[arg(short = 'p', long, default_value_t = 7000)]
    pub port: u16,

    /// Unique node identifier.
    #[arg(long, default_value = "node-1")]
    pub node_id: String,

    /// Persist each node's engine under the data directory.
    #[arg(long)]
    pub persistence_enabled: Option<bool>,

    /// Root directory for per-node snapshots.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Run as part of a multi-node cluster.
    #[arg(long, default_value_t = false)]
    pub cluster_mode: bool,

    /// Cluster members as `id@host:port`, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub cluster_nodes: Vec<String>,

    #[arg(long, action = ArgAction::HelpLong)]
    help: Option<bool>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub node_id: String,
    pub persistence_enabled: bool,
    pub data_dir: PathBuf,
    pub cluster_mode: bool,
    /// All cluster members, this node included.
    pub nodes: Vec<CacheNode>,
}

impl ServerConfig {
    /// Applies environment fallbacks and expands the member list.
    pub fn resolve(args: ServerArgs) -> anyhow::Result<Self> {
        let persistence_enabled = match args.persistence_enabled {
            Some(value) => value,
            None => env_bool(ENV_PERSISTENCE).unwrap_or(false),
        };
        let data_dir = args
            .data_dir
            .or_else(|| std::env::var(ENV_DATA_DIR).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));

        let mut nodes = Vec::new();
        if args.cluster_mode && !args.cluster_nodes.is_empty() {
            for spec in &args.cluster_nodes {
                nodes.push(parse_node_spec(spec)?);
            }
        } else if let Some(count) = env_node_count() {
            // Health seed for single-binary demos: synthesize peers on the
            // ports after this node's.
            for idx in 0..count {
                nodes.push(CacheNode::new(
                    format!("node-{}", idx + 1),
                    args.host.clone(),
                    args.port + idx as u16,
                ));
            }
        }
        if !nodes.iter().any(|node| node.id == args.node_id) {
            nodes.insert(0, CacheNode::new(args.node_id.clone(), args.host.clone(), args.port));
        }

        Ok(ServerConfig {
            host: args.host,
            port: args.port,
            node_id: args.node_id,
            persistence_enabled,
            data_dir,
            cluster_mode: args.cluster_mode,
            nodes,
        })
    }

    /// Bind address of the RESP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Bind address of the health HTTP surface.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port + 1)
    }

    /// Snapshot directory for a node.
    pub fn node_data_dir(&self, node_id: &str) -> PathBuf {
        self.data_dir.join(node_id)
    }
}

/// Parses `id@host:port`.
fn parse_node_spec(spec: &str) -> anyhow::Result<CacheNode> {
    let (id, addr) = spec
        .split_once('@')
        .ok_or_else(|| anyhow::anyhow!("node spec `{spec}` is not id@host:port"))?;
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("node spec `{spec}` is missing a port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("node spec `{spec}` has an invalid port"))?;
    if id.is_empty() || host.is_empty() {
        anyhow::bail!("node spec `{spec}` has an empty id or host");
    }
    Ok(CacheNode::new(id, host, port))
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
}

fn env_node_count() -> Option<usize> {
    std::env::var(ENV_NODE_COUNT)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|&count| count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ServerArgs {
        let mut argv = vec!["mcache-server"];
        argv.extend_from_slice(extra);
        ServerArgs::parse_from(argv)
    }

    #[test]
    fn defaults_resolve() {
        let config = ServerConfig::resolve(args(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.node_id, "node-1");
        assert!(!config.persistence_enabled);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.http_addr(), "127.0.0.1:7001");
    }

    #[test]
    fn short_flags_map_to_host_and_port() {
        let config =
            ServerConfig::resolve(args(&["-h", "0.0.0.0", "-p", "7100"])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7100);
    }

    #[test]
    fn cluster_nodes_parse() {
        let config = ServerConfig::resolve(args(&[
            "--node-id",
            "n1",
            "--cluster-mode",
            "--cluster-nodes",
            "n1@127.0.0.1:7000,n2@127.0.0.1:7010,n3@10.0.0.3:7000",
        ]))
        .unwrap();
        assert!(config.cluster_mode);
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.nodes[1].id, "n2");
        assert_eq!(config.nodes[2].host, "10.0.0.3");
    }

    #[test]
    fn bad_node_spec_errors() {
        let result = ServerConfig::resolve(args(&[
            "--cluster-mode",
            "--cluster-nodes",
            "not-a-spec",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn own_node_is_always_a_member() {
        let config = ServerConfig::resolve(args(&[
            "--node-id",
            "n9",
            "--cluster-mode",
            "--cluster-nodes",
            "n1@127.0.0.1:7000",
        ]))
        .unwrap();
        assert!(config.nodes.iter().any(|node| node.id == "n9"));
    }

    #[test]
    fn node_data_dir_is_per_node() {
        let config = ServerConfig::resolve(args(&["--data-dir", "/tmp/mc"])).unwrap();
        assert_eq!(
            config.node_data_dir("n2"),
            PathBuf::from("/tmp/mc").join("n2")
        );
    }
}
