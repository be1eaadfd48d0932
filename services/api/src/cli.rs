use crate::demo::{run_demo, DemoArgs};
use crate::server;
use admissions::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "admissions-api",
    about = "Serve or demonstrate the admissions application lifecycle",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk one application through its lifecycle and print the audit trail
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// SQLite database file; omit to keep everything in memory
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_and_accepts_overrides() {
        let cli = Cli::try_parse_from(["admissions-api"]).expect("parse");
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "admissions-api",
            "serve",
            "--port",
            "8080",
            "--database",
            "data/portal.db",
        ])
        .expect("parse");
        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(8080));
                assert_eq!(args.database, Some(PathBuf::from("data/portal.db")));
                assert!(args.host.is_none());
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn demo_flags_parse() {
        let cli = Cli::try_parse_from(["admissions-api", "demo", "--strict", "--json"])
            .expect("parse");
        match cli.command {
            Some(Command::Demo(args)) => {
                assert!(args.strict);
                assert!(args.json);
            }
            other => panic!("expected demo, got {other:?}"),
        }
    }
}
