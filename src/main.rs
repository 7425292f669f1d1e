use anyhow::Result;
use clap::Parser;
use tscope::cli;
use tscope::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
