mod api;
mod cli;
mod constants;
mod convert;
mod dry_run;
mod env;
mod nrrd;
mod pairs;
mod pipeline;
mod progress;
mod raster;
mod split;
mod upload;
mod volume;

#[cfg(test)]
mod test_support;

use anyhow::{Result, anyhow};
use cli::{Command, USAGE, parse_args};
use pipeline::run_upload;
use rayon::ThreadPoolBuilder;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
        Command::Upload(config) => {
            if let Some(threads) = config.threads {
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .map_err(|err| anyhow!("Failed to configure thread pool: {err}"))?;
            }
            run_upload(&config)
        }
    }
}
