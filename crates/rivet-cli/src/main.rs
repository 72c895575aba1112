//! rivet - command-line client for the rivet coordination store
//!
//! Usage:
//!   rivet get /path                     Print body and revision
//!   rivet set /path value --rev 12      Write if the file is at rev 12
//!   rivet set /path value --clobber     Write unconditionally
//!   rivet del /path --rev 12            Delete if the file is at rev 12
//!   rivet getdir /dir --limit 10        List children
//!   rivet walk '/**'                    Every file with body
//!   rivet watch '/jobs/**' --count 5    Stream changes
//!   rivet rev                           Current store revision
//!
//! The server is taken from `--uri`, then `DOOZER_URI`, then 127.0.0.1:8046.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rivet_client::{rev, CallEvent, CallHandle, Client, ClientConfig, Response, TracingLogger};
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

mod output;

#[derive(Parser, Debug)]
#[command(name = "rivet")]
#[command(about = "Command-line client for the rivet coordination store", long_about = None)]
#[command(version)]
struct Cli {
    /// Server URI (doozer:?ca=host:port&ca=...) or bare host:port
    #[arg(short, long)]
    uri: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Read a file
    Get {
        path: String,
        /// Read as of this revision
        #[arg(long)]
        rev: Option<i64>,
    },
    /// Write a file
    Set {
        path: String,
        value: String,
        #[command(flatten)]
        guard: Guard,
    },
    /// Delete a file
    Del {
        path: String,
        #[command(flatten)]
        guard: Guard,
    },
    /// List a directory
    Getdir {
        path: String,
        #[arg(long)]
        rev: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Print every file matching a glob
    Walk {
        glob: String,
        #[arg(long)]
        rev: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Stream changes to files matching a glob
    Watch {
        glob: String,
        /// First revision to report
        #[arg(long)]
        rev: Option<i64>,
        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print the current store revision
    Rev,
    /// Print length and revision of a file
    Stat {
        path: String,
        #[arg(long)]
        rev: Option<i64>,
    },
    /// Round trip to the server
    Nop,
}

/// Revision guard for writes
#[derive(clap::Args, Debug, PartialEq)]
struct Guard {
    /// Revision the file must currently have (0 = must not exist)
    #[arg(long, default_value_t = rev::MISSING, conflicts_with = "clobber")]
    rev: i64,

    /// Ignore the current revision
    #[arg(long)]
    clobber: bool,
}

impl Guard {
    fn rev(&self) -> i64 {
        if self.clobber {
            rev::CLOBBER
        } else {
            self.rev
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.uri {
        Some(uri) => ClientConfig::parse(uri),
        None => ClientConfig::from_env(),
    }
    .context("invalid server address")?;
    debug!("connecting to {:?}", config.addrs);

    let dialer = Arc::new(rivet_client::TcpDialer::new(config.nodelay));
    let client = Client::with_dialer(config, dialer, Arc::new(TracingLogger))
        .await
        .context("failed to connect")?;

    run(&client, cli.command).await
}

async fn run(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Get { path, rev } => {
            let response = client.get(&path, rev).one().await?;
            println!("{}", output::entry(&response));
        }
        Command::Set { path, value, guard } => {
            let response = client.set(&path, value, guard.rev()).one().await?;
            println!("{}", output::revision(&response));
        }
        Command::Del { path, guard } => {
            let response = client.del(&path, guard.rev()).one().await?;
            println!("{}", output::revision(&response));
        }
        Command::Getdir { path, rev, offset, limit } => {
            print_stream(client.getdir(&path, rev, offset, limit), None, output::child).await?;
        }
        Command::Walk { glob, rev, offset, limit } => {
            print_stream(client.walk(&glob, rev, offset, limit), None, output::event).await?;
        }
        Command::Watch { glob, rev, count } => {
            print_stream(client.watch(&glob, rev), count, output::event).await?;
        }
        Command::Rev => {
            let response = client.rev().one().await?;
            println!("{}", output::revision(&response));
        }
        Command::Stat { path, rev } => {
            let response = client.stat(&path, rev).one().await?;
            println!("{}", output::stat(&response));
        }
        Command::Nop => {
            client.nop().collect().await?;
            println!("ok");
        }
    }
    Ok(())
}

/// Print results as they arrive, stopping early after `count`
async fn print_stream(
    mut handle: CallHandle,
    count: Option<usize>,
    render: fn(&Response) -> String,
) -> Result<()> {
    let mut seen = 0;
    while let Some(event) = handle.next().await {
        match event {
            CallEvent::Progress(response) => {
                println!("{}", render(&response));
                seen += 1;
                if count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            CallEvent::Done => break,
            CallEvent::Error(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_get() {
        let cli = parse(&["rivet", "get", "/a", "--rev", "7"]);
        assert_eq!(
            cli.command,
            Command::Get {
                path: "/a".to_string(),
                rev: Some(7)
            }
        );
        assert_eq!(cli.log_level, Level::WARN);
        assert_eq!(cli.uri, None);
    }

    #[test]
    fn test_parse_set_guards() {
        let cli = parse(&["rivet", "set", "/a", "v"]);
        let Command::Set { guard, .. } = cli.command else {
            panic!("expected set");
        };
        assert_eq!(guard.rev(), rev::MISSING);

        let cli = parse(&["rivet", "set", "/a", "v", "--clobber"]);
        let Command::Set { guard, .. } = cli.command else {
            panic!("expected set");
        };
        assert_eq!(guard.rev(), rev::CLOBBER);

        let cli = parse(&["rivet", "del", "/a", "--rev", "12"]);
        let Command::Del { guard, .. } = cli.command else {
            panic!("expected del");
        };
        assert_eq!(guard.rev(), 12);
    }

    #[test]
    fn test_rev_conflicts_with_clobber() {
        assert!(Cli::try_parse_from(["rivet", "set", "/a", "v", "--rev", "3", "--clobber"]).is_err());
    }

    #[test]
    fn test_parse_global_options() {
        let cli = parse(&[
            "rivet",
            "--uri",
            "doozer:?ca=10.0.0.1:8046",
            "--log-level",
            "debug",
            "watch",
            "/jobs/**",
            "--count",
            "3",
        ]);
        assert_eq!(cli.uri.as_deref(), Some("doozer:?ca=10.0.0.1:8046"));
        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(
            cli.command,
            Command::Watch {
                glob: "/jobs/**".to_string(),
                rev: None,
                count: Some(3)
            }
        );
    }

    #[test]
    fn test_parse_paginated() {
        let cli = parse(&["rivet", "getdir", "/svc", "--offset", "4", "--limit", "2"]);
        assert_eq!(
            cli.command,
            Command::Getdir {
                path: "/svc".to_string(),
                rev: None,
                offset: Some(4),
                limit: Some(2)
            }
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["rivet", "frobnicate"]).is_err());
    }
}
