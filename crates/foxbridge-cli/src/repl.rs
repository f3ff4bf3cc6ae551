//! REPL – Read-Eval-Print Loop for the operator shell.
//!
//! Supported slash-commands:
//!   /help                      – show this list
//!   /sources                   – list registered sources by kind
//!   /status                    – server state and the last status line
//!   /port <n>                  – change the server port
//!   /resolution <w> <h>        – change the camera resolution
//!   /tfroot [path]             – set the transform-tree root, or list candidates
//!   /publish on|off            – start or stop the Foxglove server
//!   /spawn <path> <type> [cap] – add a node to the demo scene
//!   /despawn <path>            – remove a node from the demo scene
//!   /quit | /exit              – gracefully exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use foxbridge_runtime::Bridge;
use foxbridge_scene::SimScene;
use foxbridge_types::SourceKind;
use tokio::runtime::Handle;

use crate::config::{self, Config};

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Sources,
    Status,
    Port(u16),
    Resolution(u32, u32),
    TfRoot(Option<String>),
    Publish(bool),
    Spawn {
        path: String,
        type_name: String,
        capability: Option<String>,
    },
    Despawn(String),
    Quit,
}

impl Command {
    /// Parse one input line.  The error is a message for the operator.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        let cmd = match (head, args.as_slice()) {
            ("/help", []) => Self::Help,
            ("/sources", []) => Self::Sources,
            ("/status", []) => Self::Status,
            ("/port", [port]) => Self::Port(
                port.parse()
                    .map_err(|_| format!("'{port}' is not a valid port number"))?,
            ),
            ("/resolution", [w, h]) => Self::Resolution(parse_side(w)?, parse_side(h)?),
            ("/tfroot", []) => Self::TfRoot(None),
            ("/tfroot", [root]) => Self::TfRoot(Some(root.to_string())),
            ("/publish", ["on"]) => Self::Publish(true),
            ("/publish", ["off"]) => Self::Publish(false),
            ("/spawn", [path, type_name]) => Self::Spawn {
                path: path.to_string(),
                type_name: type_name.to_string(),
                capability: None,
            },
            ("/spawn", [path, type_name, cap]) => Self::Spawn {
                path: path.to_string(),
                type_name: type_name.to_string(),
                capability: Some(cap.to_string()),
            },
            ("/despawn", [path]) => Self::Despawn(path.to_string()),
            ("/quit" | "/exit", []) => Self::Quit,
            (
                "/help" | "/sources" | "/status" | "/port" | "/resolution" | "/tfroot" | "/publish" | "/spawn"
                | "/despawn" | "/quit" | "/exit",
                _,
            ) => return Err(format!("wrong arguments for {head}")),
            (other, _) => return Err(format!("unknown command '{other}'")),
        };
        Ok(cmd)
    }
}

fn parse_side(raw: &str) -> Result<u32, String> {
    raw.parse().map_err(|_| format!("'{raw}' is not a valid size"))
}

/// What the REPL drives: the bridge, the demo scene behind it, and the
/// runtime its async controls run on.
pub struct Session {
    pub bridge: Arc<Bridge>,
    pub scene: Arc<SimScene>,
    pub runtime: Handle,
    pub config: Config,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut session: Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "foxbridge>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => session.execute(cmd),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

impl Session {
    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Help => cmd_help(),
            Command::Sources => self.cmd_sources(),
            Command::Status => self.cmd_status(),
            Command::Port(port) => self.cmd_port(port),
            Command::Resolution(w, h) => self.cmd_resolution(w, h),
            Command::TfRoot(None) => self.cmd_tf_candidates(),
            Command::TfRoot(Some(root)) => self.cmd_tf_root(&root),
            Command::Publish(on) => self.cmd_publish(on),
            Command::Spawn {
                path,
                type_name,
                capability,
            } => self.cmd_spawn(&path, &type_name, capability.as_deref()),
            Command::Despawn(path) => self.cmd_despawn(&path),
            Command::Quit => {}
        }
    }

    fn cmd_sources(&self) {
        let enabled = self.bridge.enabled_sources();
        println!("{}", "Sources".bold().underline());
        for kind in SourceKind::ALL {
            let paths = self.bridge.sources_of(kind);
            println!("  {} ({})", kind.to_string().bold(), paths.len());
            for path in paths {
                let marker = if enabled.contains(&path) { "▶".green() } else { " ".normal() };
                println!("    {marker} {path}");
            }
        }
    }

    fn cmd_status(&self) {
        let (w, h) = self.bridge.camera_resolution();
        println!("{}", "Bridge Status".bold().underline());
        if self.bridge.is_publishing() {
            println!("  Server     : {} on port {}", "publishing".green(), self.bridge.port());
        } else {
            println!("  Server     : {} (port {})", "stopped".yellow(), self.bridge.port());
        }
        println!("  Channels   : {}", self.bridge.channels().len());
        println!("  Camera     : {w}x{h}");
        println!("  TF root    : {}", self.bridge.tf_root());
        println!(
            "  Last event : {}",
            self.bridge.last_status().unwrap_or_else(|| "-".to_string()).dimmed()
        );
    }

    fn cmd_port(&mut self, port: u16) {
        match self.runtime.block_on(self.bridge.apply_port(port)) {
            Ok(()) => {
                self.config.server_port = port;
                self.persist();
                self.print_status();
            }
            Err(e) => println!("{}: {}", "Port change failed".red(), e),
        }
    }

    fn cmd_resolution(&mut self, width: u32, height: u32) {
        if let Err(e) = config::validate_resolution(width, height) {
            println!("{}: {}", "Invalid resolution".red(), e);
            return;
        }
        match self.bridge.set_camera_resolution(width, height) {
            Ok(()) => {
                self.config.camera_width = width;
                self.config.camera_height = height;
                self.persist();
                self.print_status();
            }
            Err(e) => println!("{}: {}", "Resolution change failed".red(), e),
        }
    }

    fn cmd_tf_candidates(&self) {
        let current = self.bridge.tf_root();
        println!("{}", "Transform-tree root candidates".bold().underline());
        for candidate in self.bridge.tf_root_candidates() {
            let marker = if candidate == current { "▶".green() } else { " ".normal() };
            println!("  {marker} {candidate}");
        }
    }

    fn cmd_tf_root(&mut self, root: &str) {
        match self.bridge.set_tf_root(root) {
            Ok(()) => {
                self.config.tf_root = root.to_string();
                self.persist();
                self.print_status();
            }
            Err(e) => println!("{}: {}", "Root change failed".red(), e),
        }
    }

    fn cmd_publish(&self, on: bool) {
        if on {
            if let Err(e) = self.runtime.block_on(self.bridge.start()) {
                println!("{}: {}", "Server failed to start".red(), e);
                return;
            }
        } else {
            self.runtime.block_on(self.bridge.stop());
        }
        self.print_status();
    }

    fn cmd_spawn(&self, path: &str, type_name: &str, capability: Option<&str>) {
        if let Err(e) = self.scene.insert(path, type_name) {
            println!("{}: {}", "Spawn failed".red(), e);
            return;
        }
        if let Some(cap) = capability {
            if let Err(e) = self.scene.apply_capability(path, cap) {
                println!("{}: {}", "Capability not applied".red(), e);
            }
        }
        self.stage_changed();
    }

    fn cmd_despawn(&self, path: &str) {
        if !self.scene.remove(path) {
            println!("{} '{}'", "No such node:".red(), path.yellow());
            return;
        }
        self.stage_changed();
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn stage_changed(&self) {
        match self.bridge.on_stage_changed() {
            Some(status) => println!("  {} {}", "✓".green().bold(), status),
            None => println!("  {}", "no source changes".dimmed()),
        }
    }

    fn print_status(&self) {
        if let Some(status) = self.bridge.last_status() {
            println!("  {} {}", "✓".green().bold(), status);
        }
    }

    fn persist(&self) {
        if let Err(e) = config::save(&self.config) {
            println!("{}: {}", "Error saving config".red(), e);
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "foxbridge Commands".bold().underline());
    println!("  {}              – list sources by kind", "/sources".bold().cyan());
    println!("  {}               – server state and last event", "/status".bold().cyan());
    println!("  {}             – change the server port", "/port <n>".bold().cyan());
    println!("  {}  – change the camera resolution", "/resolution <w> <h>".bold().cyan());
    println!("  {}       – set or list transform-tree roots", "/tfroot [path]".bold().cyan());
    println!("  {}      – start or stop publishing", "/publish on|off".bold().cyan());
    println!("  {} – add a demo scene node", "/spawn <path> <type> [cap]".bold().cyan());
    println!("  {}      – remove a demo scene node", "/despawn <path>".bold().cyan());
    println!("  {}         – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("/sources"), Ok(Command::Sources));
        assert_eq!(Command::parse("  /status  "), Ok(Command::Status));
        assert_eq!(Command::parse("/port 9000"), Ok(Command::Port(9000)));
        assert_eq!(Command::parse("/resolution 640 480"), Ok(Command::Resolution(640, 480)));
        assert_eq!(Command::parse("/tfroot"), Ok(Command::TfRoot(None)));
        assert_eq!(
            Command::parse("/tfroot /World/Robot"),
            Ok(Command::TfRoot(Some("/World/Robot".to_string())))
        );
        assert_eq!(Command::parse("/publish on"), Ok(Command::Publish(true)));
        assert_eq!(Command::parse("/publish off"), Ok(Command::Publish(false)));
        assert_eq!(
            Command::parse("/spawn /World/Arm Xform PhysicsArticulationRootAPI"),
            Ok(Command::Spawn {
                path: "/World/Arm".to_string(),
                type_name: "Xform".to_string(),
                capability: Some("PhysicsArticulationRootAPI".to_string()),
            })
        );
        assert_eq!(Command::parse("/despawn /World/Arm"), Ok(Command::Despawn("/World/Arm".to_string())));
        assert_eq!(Command::parse("/quit"), Ok(Command::Quit));
        assert_eq!(Command::parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Command::parse("/port").is_err());
        assert!(Command::parse("/port 70000").is_err());
        assert!(Command::parse("/resolution 640").is_err());
        assert!(Command::parse("/resolution wide 480").is_err());
        assert!(Command::parse("/publish maybe").is_err());
        assert_eq!(Command::parse("/status now"), Err("wrong arguments for /status".to_string()));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert_eq!(Command::parse("/launch"), Err("unknown command '/launch'".to_string()));
        assert!(Command::parse("").is_err());
    }
}
