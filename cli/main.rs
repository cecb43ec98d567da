mod commands;
pub mod flags;
mod graph_file;
mod reporter;
mod simulator;

use commands::*;
use structopt::StructOpt;
use tracing::{error, log};

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "kiln",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "Run generation requests and build graphs as observable, cancellable jobs"
)]
struct Kiln {
    #[structopt(subcommand, help = "the command to run")]
    cmd: Command,
}

impl Kiln {
    async fn run(self) -> Result<(), anyhow::Error> {
        human_panic::setup_panic!(Metadata {
            name: "kiln".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            authors: env!("CARGO_PKG_AUTHORS").into(),
            homepage: env!("CARGO_PKG_HOMEPAGE").into(),
        });

        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .format_timestamp_micros()
            .format_module_path(false)
            .parse_env("KILN_LOG")
            .try_init()?;

        let result = self.cmd.run().await;

        if let Err(ref err) = result {
            error!("{:?}", &err);
        };

        result
    }
}

#[derive(StructOpt, Debug, Clone)]
enum Command {
    Build(BuildCommand),
    Generate(GenerateCommand),
}

impl Command {
    async fn run(self) -> Result<(), anyhow::Error> {
        match self {
            Command::Build(x) => x.run().await,
            Command::Generate(x) => x.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    Kiln::from_args().run().await
}
