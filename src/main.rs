use std::io::{self, BufRead};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use log::info;

use kms_overlay::cmdline::{Config, USAGE};
use kms_overlay::overlay::{open_device, present};

fn run() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| anyhow!("{e}\n{USAGE}"))?;

    let device = open_device(&config)?;
    let presentation = present(device.as_ref(), &config).context("presenting overlay")?;

    if config.wait {
        println!("Overlay is up; press Enter to exit");
        io::stdin()
            .lock()
            .read_line(&mut String::new())
            .context("waiting for keypress")?;
    }

    presentation.release().context("releasing surfaces")?;
    info!("done");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kms-overlay: {e:#}");
            ExitCode::FAILURE
        }
    }
}
