//! CLI entrypoint: loads a slot configuration and runs the lifecycle
//! controller until a termination signal arrives (`spec.md` §5).

use std::path::PathBuf;

use clap::Parser;

use virtmedia::Config;

#[derive(Parser, Debug)]
#[command(name = "virtmediad", about = "Virtual media lifecycle controller")]
struct Cli {
    /// Path to the TOML slot configuration.
    #[arg(short, long, default_value = "/etc/virtmedia/config.toml")]
    config: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to build the runtime: {e}");
            std::process::exit(1);
        }
    };

    let local = tokio::task::LocalSet::new();
    let result = local.block_on(&runtime, virtmedia::registry::run(config));

    if let Err(e) = result {
        log::error!("virtmediad exited with an error: {e}");
        std::process::exit(1);
    }
}
