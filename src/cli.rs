use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "slideforge")]
#[command(about = "Slide-deck build service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server, worker pool, and cleanup loops
    Serve,

    /// Print the resolved configuration (secrets elided) and exit
    Config,
}
