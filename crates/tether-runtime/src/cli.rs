//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use tether_core::session::ConnectionContext;
use tether_core::types::{AntennaPatch, PosePatch, TargetPatch};

#[derive(Parser)]
#[command(name = "tether", about = "Real-time motion control for a desktop robot")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Daemon base URL (e.g. http://localhost:8000)
    #[arg(long, global = true, env = "TETHER_BASE_URL")]
    pub base_url: Option<String>,

    /// Telemetry WebSocket URL (derived from --base-url when omitted)
    #[arg(long, global = true, env = "TETHER_TELEMETRY_URL")]
    pub telemetry_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect, start the session and hold it until interrupted
    Run(RunOpts),
    /// Print the daemon status (JSON)
    Status,
    /// Send a single target; unspecified fields stay at rest
    Move(MoveOpts),
    /// Send the rest pose
    Reset,
    /// Print the effective configuration (TOML)
    Config,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Connection {
    #[default]
    Local,
    Remote,
    Simulation,
}

#[derive(clap::Args)]
pub struct RunOpts {
    #[arg(long, value_enum, default_value_t = Connection::Local)]
    pub connection: Connection,

    /// Robot host, for remote connections
    #[arg(long, required_if_eq("connection", "remote"))]
    pub host: Option<String>,

    /// Do not subscribe to the telemetry stream
    #[arg(long)]
    pub no_telemetry: bool,
}

impl RunOpts {
    pub fn context(&self) -> ConnectionContext {
        match self.connection {
            Connection::Local => ConnectionContext::Local,
            Connection::Simulation => ConnectionContext::Simulation,
            Connection::Remote => ConnectionContext::Remote {
                host: self.host.clone().unwrap_or_default(),
            },
        }
    }
}

#[derive(clap::Args, Default)]
pub struct MoveOpts {
    /// Head translation (m)
    #[arg(long, allow_negative_numbers = true)]
    pub x: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub y: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub z: Option<f64>,
    /// Head rotation (rad)
    #[arg(long, allow_negative_numbers = true)]
    pub pitch: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub yaw: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub roll: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub body_yaw: Option<f64>,
    /// Antenna angles (rad)
    #[arg(long, allow_negative_numbers = true)]
    pub left: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub right: Option<f64>,
}

impl MoveOpts {
    pub fn patch(&self) -> TargetPatch {
        TargetPatch {
            pose: PosePatch {
                x: self.x,
                y: self.y,
                z: self.z,
                pitch: self.pitch,
                yaw: self.yaw,
                roll: self.roll,
            },
            antennas: AntennaPatch {
                left: self.left,
                right: self.right,
            },
            body_yaw: self.body_yaw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_flags_become_a_patch() {
        let cli = Cli::try_parse_from(["tether", "move", "--yaw", "-0.3", "--left", "0.5"])
            .expect("parses");
        let Command::Move(opts) = cli.command else {
            panic!("expected move");
        };
        let patch = opts.patch();
        assert_eq!(patch.pose.yaw, Some(-0.3));
        assert_eq!(patch.antennas.left, Some(0.5));
        assert_eq!(patch.pose.x, None);
        assert_eq!(patch.body_yaw, None);
    }

    #[test]
    fn remote_requires_host() {
        assert!(Cli::try_parse_from(["tether", "run", "--connection", "remote"]).is_err());
        let cli = Cli::try_parse_from([
            "tether",
            "run",
            "--connection",
            "remote",
            "--host",
            "reachy.local",
        ])
        .expect("parses");
        let Command::Run(opts) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            opts.context(),
            ConnectionContext::Remote {
                host: "reachy.local".into()
            }
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tether", "status", "--base-url", "http://robot:8000"])
            .expect("parses");
        assert_eq!(cli.base_url.as_deref(), Some("http://robot:8000"));
    }
}
