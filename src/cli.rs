use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::constants::FUNCTION_NAME_ENV;

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Gates pipeline stages on database schema migrations")]
pub struct Cli {
    #[clap(
        short,
        long,
        global = true,
        default_value = "./pipeline.json",
        env = "MIGRATION_GATE_CONFIG"
    )]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run every stage in order, deploying and gating each one
    Run {
        /// Skip the interactive prompt, recording who approved production
        #[clap(long, env = "MIGRATION_GATE_APPROVED_BY")]
        approved_by: Option<String>,

        /// Write the run report as JSON to this path
        #[clap(long, env = "MIGRATION_GATE_REPORT")]
        report: Option<PathBuf>,
    },
    /// Run one stage's post-deploy gate against already deployed infrastructure
    PostDeploy {
        #[clap(short, long, env = "MIGRATION_GATE_STAGE")]
        stage: String,

        /// Runner to invoke, instead of the name derived from the stage
        #[clap(long, env = FUNCTION_NAME_ENV)]
        function_name: Option<String>,
    },
    /// Print the stages, their targets and the IAM policies they rely on
    Plan,
}
