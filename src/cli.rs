use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, process::Command};

use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("slidectl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("run") => ipc::run_daemon(),

        Some("stop") => request(serde_json::json!({"op":"shutdown"})),

        Some("status") => request(serde_json::json!({"op":"status"})),

        Some("reload") => request(serde_json::json!({"op":"reload"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: slidectl use <profile_name>"))?;
            request(serde_json::json!({"op":"use","profile":name}))
        }

        Some("list") => request(serde_json::json!({"op":"list"})),

        Some("doctor") => request(serde_json::json!({"op":"doctor"})),

        Some("session") => {
            let r = ipc::client_request(serde_json::json!({"op":"status"}))?;
            match r["data"]["session"].as_str() {
                Some(id) => println!("{id}"),
                None => println!("relay is off (enable with: slidectl relay on)"),
            }
            Ok(())
        }

        Some("relay") => {
            let enabled = on_off(&mut pargs, "usage: slidectl relay <on|off>")?;
            request(serde_json::json!({"op":"relay","enabled":enabled}))
        }

        Some("camera") => {
            let enabled = on_off(&mut pargs, "usage: slidectl camera <on|off>")?;
            request(serde_json::json!({"op":"camera","enabled":enabled}))
        }

        Some("remote") => {
            // usage:
            //   slidectl remote AB12CD next
            let session: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: slidectl remote <SESSION> <next|prev>"))?;
            let action: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: slidectl remote <SESSION> <next|prev>"))?;
            request(serde_json::json!({"op":"command","session":session,"action":action}))
        }

        Some("watch") => {
            let session: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: slidectl watch <SESSION>"))?;
            ipc::client_subscribe(
                serde_json::json!({"op":"subscribe","session":session}),
                |ev| {
                    if ev.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                        print_response(&ev);
                        return false;
                    }
                    match (ev["currentPage"].as_u64(), ev["totalPages"].as_u64()) {
                        (Some(cur), Some(total)) => println!("page {cur}/{total}"),
                        _ => print_response(&ev),
                    }
                    true
                },
            )?;
            println!("slidectl: relay closed");
            Ok(())
        }

        Some("page") => {
            let target: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: slidectl page <next|prev|N>"))?;
            let req = match target.parse::<u32>() {
                Ok(n) => serde_json::json!({"op":"page","page":n}),
                Err(_) => serde_json::json!({"op":"page","action":target}),
            };
            request(req)
        }

        Some("deck") => {
            let pages: u32 = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: slidectl deck <pages>"))?;
            request(serde_json::json!({"op":"deck","pages":pages}))
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn on_off(pargs: &mut Arguments, usage: &str) -> Result<bool> {
    let state: String = pargs.free_from_str().map_err(|_| anyhow!("{usage}"))?;
    match state.as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(anyhow!("expected on or off, got {other}")),
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    println!(
        r#"slidectl: hand-gesture slide control daemon

USAGE:
  slidectl help [command]            Show general or command-specific help
  slidectl start                     Start the daemon in the background
  slidectl run                       Run the daemon in the foreground
  slidectl stop                      Stop the daemon
  slidectl status                    Show gesture, pointer, page and relay state
  slidectl reload                    Reload active profile
  slidectl use <name>                Switch active profile
  slidectl list                      List profiles
  slidectl doctor                    Diagnose landmark source and socket
  slidectl page <next|prev|N>        Move the deck by hand
  slidectl deck <pages>              Load a deck with <pages> pages
  slidectl session                   Print the remote session id
  slidectl relay <on|off>            Enable (new session id) or disable the relay
  slidectl camera <on|off>           Start or stop gesture input; paging stays live
  slidectl remote <SESSION> <next|prev>
                                     Send a remote command
  slidectl watch <SESSION>           Follow page changes like a remote mirror

TIPS:
  - Feed landmarks as JSON lines on stdin or via [camera] source
  - Profiles: ~/.config/slidectl/profiles
  - Active profile pointer: ~/.config/slidectl/active
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: slidectl start\nStarts the background daemon."),
        "run" => println!("usage: slidectl run\nRuns the daemon attached to this terminal."),
        "stop" => println!("usage: slidectl stop\nStops the running daemon."),
        "status" => println!(
            "usage: slidectl status\nShows gesture state, pointer, page, indicator, detector and session."
        ),
        "reload" => println!(
            "usage: slidectl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: slidectl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: slidectl list\nLists available profiles and the active one."),
        "doctor" => println!(
            "usage: slidectl doctor\nChecks the landmark source and socket paths."
        ),
        "page" => println!(
            "usage: slidectl page <next|prev|N>\nSteps or jumps the deck; out-of-range pages are ignored."
        ),
        "deck" => println!("usage: slidectl deck <pages>\nLoads a deck and returns to page 1."),
        "session" => println!("usage: slidectl session\nPrints the 6-character session id."),
        "relay" => println!(
            "usage: slidectl relay <on|off>\nTurning the relay on always issues a new session id."
        ),
        "camera" => println!(
            "usage: slidectl camera <on|off>\nStopping clears gesture state; starting reopens the landmark source."
        ),
        "remote" => println!(
            "usage: slidectl remote <SESSION> <next|prev>\nSession ids are case-insensitive."
        ),
        "watch" => println!(
            "usage: slidectl watch <SESSION>\nPrints every page sync pushed to remotes."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
