//
// main.rs
//
// Command-line entry point: picks the transport and starts the server
//

const USAGE: &str = "\
Usage: sonarlint-ls --stdio

Serves SonarLint analysis over the Language Server Protocol.

Options:
    --stdio      Talk LSP over stdin and stdout
    --version    Show the version and exit
    --help       Show this message and exit

Logs go to stderr. Filter them with RUST_LOG, e.g. RUST_LOG=sonarlint_ls=debug.
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Version,
    Help,
}

/// `--version` and `--help` win over `--stdio`; no flag at all means help.
fn parse_command(args: impl IntoIterator<Item = String>) -> anyhow::Result<Command> {
    let mut serve = false;
    for arg in args {
        match arg.as_str() {
            "--stdio" => serve = true,
            "--version" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(anyhow::anyhow!("unknown argument '{}', see --help", other)),
        }
    }
    Ok(if serve { Command::Serve } else { Command::Help })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_command(std::env::args().skip(1))? {
        Command::Version => println!("sonarlint-ls {}", env!("CARGO_PKG_VERSION")),
        Command::Help => print!("{}", USAGE),
        Command::Serve => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("sonarlint_ls=info"))
                .init();
            sonarlint_ls::backend::start_lsp().await?;
        }
    }
    Ok(())
}
