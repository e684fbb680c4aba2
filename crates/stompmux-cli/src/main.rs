//! `stompmux` binary.

use std::{
    io::Write,
    time::{Duration, Instant},
};

use clap::Parser;
use stompmux_cli::{Args, CliError, Flow, Shell, parse};
use stompmux_core::Transport;
use stompmux_ws::WsTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_new(&args.log_level).map_err(|e| CliError::LogFilter(e.to_string()))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = args.client_config();
    info!(url = %args.url, loopback = args.loopback, "stompmux ready, /help for commands");
    if args.loopback {
        run(Shell::loopback(config, args.url.clone())).await
    } else {
        run(Shell::new(WsTransport::new(), config, args.url.clone())).await
    }
}

async fn run<T: Transport>(mut shell: Shell<T>) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                let flow = shell.execute(parse(&line), Instant::now());
                flush(&mut shell, &mut stdout)?;
                if flow == Flow::Quit {
                    break;
                }
            }
            _ = ticker.tick() => {
                shell.tick(Instant::now());
                flush(&mut shell, &mut stdout)?;
            }
        }
    }

    Ok(())
}

fn flush<T: Transport>(shell: &mut Shell<T>, out: &mut impl Write) -> Result<(), CliError> {
    for line in shell.drain_output() {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}
