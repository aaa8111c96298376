//! Rapto server and client binary
//!
//! `raptodb server` runs a database instance; `raptodb connect` opens
//! an interactive session against one.

use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use rapto::{ClientOptions, Config, Connection, Server, Verbosity};

/// RaptoDB
#[derive(Parser, Debug)]
#[command(name = "raptodb")]
#[command(about = "In-memory key-value database with bounded capacity and encrypted sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a database server
    Server(ServerArgs),

    /// Open an interactive session against a server
    Connect(ConnectArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Database name (also names the storage file)
    #[arg(long)]
    name: String,

    /// Listen address (host:port); defaults to 127.0.0.1 with a random
    /// port, or 127.0.0.1:8443 under --tls
    #[arg(long)]
    addr: Option<String>,

    /// Directory for the storage file
    #[arg(long, default_value = ".")]
    db_path: String,

    /// Log verbosity
    #[arg(long, default_value = "warnings")]
    verbose: Verbosity,

    /// Autosnap policy: DELAY seconds and COUNT modifications
    #[arg(long, num_args = 2, value_names = ["DELAY", "COUNT"])]
    save: Option<Vec<u64>>,

    /// Encrypt sessions
    #[arg(long)]
    tls: bool,

    /// Require a session password (implies --tls)
    #[arg(long, value_name = "PASSWORD")]
    auth: Option<String>,

    /// Capacity in bytes; required unless the storage file exists
    #[arg(long, value_name = "BYTES")]
    db_size: Option<u64>,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Server address (host:port)
    #[arg(long, default_value = "127.0.0.1:8443")]
    addr: String,

    /// Expect an encrypted server
    #[arg(long)]
    tls: bool,

    /// Session password (implies --tls)
    #[arg(long, value_name = "PASSWORD")]
    auth: Option<String>,

    /// Display name for this session
    #[arg(long, default_value = "")]
    name: String,

    /// Socket timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args),
        Commands::Connect(args) => run_connect(args),
    }
}

fn run_server(args: ServerArgs) -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.verbose.filter()));
    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!("RaptoDB v{}", rapto::VERSION);

    let mut builder = Config::builder(&args.name)
        .db_path(&args.db_path)
        .tls(args.tls)
        .verbosity(args.verbose);
    if let Some(addr) = args.addr {
        builder = builder.listen_addr(addr);
    }
    if let Some(size) = args.db_size {
        builder = builder.db_size(size);
    }
    if let Some(password) = args.auth {
        builder = builder.auth(password.into_bytes());
    }
    if let Some(save) = args.save {
        builder = builder.save_policy(save[0], save[1]);
    }

    let config = match builder.build() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match Server::new(config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_connect(args: ConnectArgs) -> ExitCode {
    let options = ClientOptions {
        tls: args.tls || args.auth.is_some(),
        auth: args.auth.map(String::into_bytes),
        name: args.name,
        timeout_ms: args.timeout,
    };

    let mut conn = match Connection::connect(&args.addr, options) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", args.addr, e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Connected to {}{}",
        args.addr,
        if conn.is_encrypted() { " (encrypted)" } else { "" }
    );

    let stdin = std::io::stdin();
    loop {
        print!("rapto> ");
        if std::io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        // DOWN gets no response by contract.
        if line.trim().eq_ignore_ascii_case("down") {
            if let Err(e) = conn.send(line.as_bytes()) {
                eprintln!("Send error: {}", e);
            }
            break;
        }

        match conn.query(line.as_bytes()) {
            Ok(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            Err(e) => {
                eprintln!("Query error: {}", e);
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
