// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bootstrap flag surface. The `exec_daemonproxy` pipe-and-exec dance is an
//! external collaborator and stays out of scope; this only has to parse
//! the documented options so `desd` is a runnable binary.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

/// Either an inherited file descriptor or a socket path for the spawner
/// control connection. Only the path form is actually connected below —
/// the fd form is parsed but left as a documented extension point, since
/// wiring up an inherited fd requires the `exec_daemonproxy` handoff this
/// binary doesn't perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlArg {
    Fd(u32),
    Path(PathBuf),
}

impl FromStr for ControlArg {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u32>() {
            Ok(fd) => Ok(ControlArg::Fd(fd)),
            Err(_) => Ok(ControlArg::Path(PathBuf::from(s))),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "desd", version, about = "Service supervisor control daemon")]
pub struct Cli {
    /// Working directory services are chdir'd into before exec.
    #[arg(long, value_name = "PATH")]
    pub base_dir: Option<PathBuf>,

    /// Path to the service configuration YAML file.
    #[arg(long, value_name = "PATH", default_value = "desd.yaml")]
    pub config: PathBuf,

    /// Control socket path clients connect to.
    #[arg(long, value_name = "PATH", default_value = "/run/desd/control.sock")]
    pub socket: PathBuf,

    /// Path to this binary, recorded for re-exec on reload (unused here).
    #[arg(long, value_name = "PATH")]
    pub desd_path: Option<PathBuf>,

    /// Path to the daemonproxy binary (unused here; the exec handoff is
    /// out of scope).
    #[arg(long, value_name = "PATH")]
    pub daemonproxy_path: Option<PathBuf>,

    /// Inherited fd or socket path for the spawner connection.
    #[arg(long, value_name = "FD|PATH")]
    pub control: ControlArg,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Session tokens granted to every client connecting to the control
    /// socket, repeatable. The permission model is an opaque predicate
    /// over session tokens; this is the extension point that supplies
    /// them until a real negotiation handshake exists.
    #[arg(long = "grant-token", value_name = "TOKEN")]
    pub grant_tokens: Vec<String>,
}

impl Cli {
    /// Net verbosity delta applied on top of the default `info` level:
    /// state transitions at `info`, recoverable faults at `warn`, fatal
    /// conditions at `error`.
    pub fn verbosity(&self) -> i64 {
        i64::from(self.verbose) - i64::from(self.quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_arg_parses_numeric_as_fd() {
        assert_eq!("7".parse::<ControlArg>().unwrap(), ControlArg::Fd(7));
    }

    #[test]
    fn control_arg_parses_non_numeric_as_path() {
        assert_eq!(
            "/run/daemonproxy.sock".parse::<ControlArg>().unwrap(),
            ControlArg::Path(PathBuf::from("/run/daemonproxy.sock"))
        );
    }

    #[test]
    fn verbosity_nets_verbose_and_quiet() {
        let cli = Cli::parse_from([
            "desd",
            "--control",
            "/tmp/x.sock",
            "-v",
            "-v",
            "-q",
        ]);
        assert_eq!(cli.verbosity(), 1);
    }
}
