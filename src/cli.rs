use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    about = "Tmux-session watchdog for a scheduled worker process",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the supervisor loop in the foreground
    Run,

    /// Attach to the live worker tmux session
    Attach,

    /// Show resolved configuration
    Config,
}
