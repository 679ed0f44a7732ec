//! Definition of CLI commands/sub commands + its option parameters
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "xfwd", about = "Forward X search results to a Discord webhook")]
pub struct CommandLineArgs {
    #[structopt(subcommand)]
    pub action: Action,

    /// Use a different cursor state file.
    #[structopt(parse(from_os_str), short, long)]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
pub enum Action {
    #[structopt(about = "Execute one fetch and forward pass")]
    Run,
    #[structopt(about = "Serve the HTTP trigger endpoint")]
    Serve {
        #[structopt(short, long, help = "Port to listen on, overrides PORT")]
        port: Option<u16>,
    },
}
