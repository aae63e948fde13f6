mod cli;
mod config;
mod fingers;
mod gestures;
mod input;
mod ipc;
mod logging;
mod navigator;
mod pointer;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
