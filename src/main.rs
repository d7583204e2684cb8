use std::{
    net::UdpSocket,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use adaptive_sampler::{echo, pipeline, Result};
use args::{Args, Command};
use clap::Parser;
use tracing::info;

mod args;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args::convert_filter(args.verbose.log_level_filter()))
        .init();

    match args.command {
        Command::Run(run) => {
            let summary = pipeline::run(&run.config())?;
            println!("{summary}");
        }
        Command::Echo { bind } => {
            let socket = UdpSocket::bind(bind)?;
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))?;
            let echoed = echo::serve(&socket, &shutdown)?;
            info!(echoed, "Bye");
        }
    }
    Ok(())
}
