//! Driftbase Local CLI

use clap::{Arg, ArgAction, Command};
use driftbase_local::server;
use tracing::error;

/// Returns the version of the crate.
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Flag for the port to use.
const PORT_FLAG: &str = "port";

/// Flag for the auth token.
const AUTH_TOKEN_FLAG: &str = "auth-token";

/// Flag to allow public access.
const ALLOW_PUBLIC_ACCESS_FLAG: &str = "allow-public-access";

/// Entrypoint for the Driftbase Local CLI.
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("local")
        .version(crate_version())
        .about("Driftbase local development server.")
        .arg_required_else_help(true)
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(server::CMD)
                .about("Commands for the local server.")
                .arg_required_else_help(true)
                .subcommand(
                    Command::new(server::RUN_CMD)
                        .about("Run the local server.")
                        .arg(
                            Arg::new(PORT_FLAG)
                                .long(PORT_FLAG)
                                .help("The port to use for the server.")
                                .default_value("8080")
                                .value_parser(clap::value_parser!(u16))
                                .action(ArgAction::Set),
                        )
                        .arg(
                            Arg::new(AUTH_TOKEN_FLAG)
                                .long(AUTH_TOKEN_FLAG)
                                .help("The authorization token to use.")
                                .required(true)
                                .action(ArgAction::Set),
                        )
                        .arg(
                            Arg::new(ALLOW_PUBLIC_ACCESS_FLAG)
                                .long(ALLOW_PUBLIC_ACCESS_FLAG)
                                .help("Allow public access for read-only methods.")
                                .action(ArgAction::SetTrue),
                        ),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    if let Some(server_matches) = matches.subcommand_matches(server::CMD) {
        match server_matches.subcommand() {
            Some((server::RUN_CMD, matches)) => {
                let port = matches.get_one::<u16>(PORT_FLAG).unwrap();
                let auth_token = matches.get_one::<String>(AUTH_TOKEN_FLAG).unwrap();
                let allow_public_access = matches.get_flag(ALLOW_PUBLIC_ACCESS_FLAG);

                if let Err(e) = server::run(port, auth_token.clone(), allow_public_access).await {
                    error!(error = ?e, "failed to run local server");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            _ => {
                error!("invalid subcommand");
                return std::process::ExitCode::FAILURE;
            }
        }
    }

    std::process::ExitCode::FAILURE
}
