use anyhow::{Result, anyhow};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
};

mod dispatch;
mod pipeline;
mod runtime;
mod server;

pub use server::run_daemon;

fn connect() -> Result<UnixStream> {
    let sock = runtime::socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "slidectl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    Ok(UnixStream::connect(sock)?)
}

// Client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let mut stream = connect()?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

/// Send `req` and hand every line the daemon pushes back to `on_event`
/// until it returns false or the daemon hangs up.
pub fn client_subscribe(
    req: serde_json::Value,
    mut on_event: impl FnMut(serde_json::Value) -> bool,
) -> Result<()> {
    let mut stream = connect()?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    for line in BufReader::new(stream).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line)?;
        if !on_event(v) {
            break;
        }
    }
    Ok(())
}
