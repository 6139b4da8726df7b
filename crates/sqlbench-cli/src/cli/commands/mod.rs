use super::args::{Cli, Command};
use super::logging::{init_logging, LogSink};
use indicatif::MultiProgress;
use sqlbench_core::errors::is_config_error;
use std::io::IsTerminal;

pub mod run;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const RUN_ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => {
            let show_progress = !args.no_progress && std::io::stderr().is_terminal();
            let multi = show_progress.then(MultiProgress::new);
            let sink = match &multi {
                Some(m) => LogSink::Progress(m.clone()),
                None => LogSink::Stderr,
            };
            init_logging(&args.log_level, args.json_logs, sink);

            match run::run(args, multi.as_ref()).await {
                Ok(()) => Ok(exit_codes::OK),
                Err(e) if is_config_error(&e) => {
                    eprintln!("{:#}", e);
                    Ok(exit_codes::CONFIG_ERROR)
                }
                Err(e) => Err(e),
            }
        }
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}
