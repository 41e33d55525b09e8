use clap::Parser;
use log::error;

use autoblog_install::{
    cli::{
        args::CliArgs,
        command_handlers::{build_installer, do_command, exit_code, FAILURE_EXIT_CODE},
    },
    config::InstallerConfig,
};

const INTERRUPTED_EXIT_CODE: i32 = 130;

fn run(args: CliArgs) -> anyhow::Result<i32> {
    let config = InstallerConfig::load(args.config.clone())?;
    let installer =
        build_installer(&args, config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let result = do_command(args.cmd, &installer);
    Ok(exit_code(&result))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let task = tokio::task::spawn_blocking(move || run(args));

    let code = tokio::select! {
        joined = task => match joined {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                error!("{:#}", e);
                FAILURE_EXIT_CODE
            }
            Err(e) => {
                error!("Installer task failed: {}", e);
                FAILURE_EXIT_CODE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            error!("Interrupted; re-run the installer to resume");
            INTERRUPTED_EXIT_CODE
        }
    };

    // Leaves without waiting for a blocking task that may still be running
    std::process::exit(code)
}
