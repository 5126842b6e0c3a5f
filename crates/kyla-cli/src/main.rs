#![deny(clippy::all)]

use clap::Parser;

mod cli;
mod dispatch;

use cli::KylaCli;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = KylaCli::parse();
    init_tracing();

    match dispatch::run(cli) {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(dispatch::EXIT_RUNTIME);
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("KYLA_LOG").unwrap_or_else(|_| "warn".to_string());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
