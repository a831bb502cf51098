//! REPL – interactive shell over an [`AnchorRegistry`].
//!
//! Supported slash-commands:
//!   /help                          – show this list
//!   /place <label> <x> <y> <z> [as <name>]
//!                                  – report a detection (create or reuse)
//!   /list                          – live anchors
//!   /find <label>                  – live handles with that exact label
//!   /rename <handle> <label>       – relabel a live anchor
//!   /erase <handle>                – erase one anchor
//!   /clear                         – erase every anchor and record
//!   /load                          – restore saved anchors
//!   /tick [n]                      – advance the registry n ticks
//!   /settle                        – tick until nothing is pending
//!   /dedup on|off                  – toggle deduplication
//!   /quit | /exit                  – leave the shell
//!
//! Every command that changes state is followed by a settle, so the shell
//! reads synchronously even though the registry is tick-driven.

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hearth_registry::{AnchorEventReceiver, AnchorRegistry, CreateOutcome, CreateRequest};
use hearth_types::{AnchorEventPayload, AnchorHandle, Pose, Vec3};

/// Upper bound on ticks spent in one settle; a stalled platform never
/// settles.
const SETTLE_LIMIT: u32 = 1_000;

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Place {
        label: String,
        position: Vec3,
        name: Option<String>,
    },
    List,
    Find(String),
    Rename {
        handle: AnchorHandle,
        label: String,
    },
    Erase(AnchorHandle),
    Clear,
    Load,
    Tick(u32),
    Settle,
    Dedup(bool),
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let rest: Vec<&str> = words.collect();

    match head {
        "/help" => Ok(Command::Help),
        "/list" => Ok(Command::List),
        "/clear" => Ok(Command::Clear),
        "/load" => Ok(Command::Load),
        "/settle" => Ok(Command::Settle),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/place" => parse_place(&rest),
        "/find" => match rest.as_slice() {
            [] => Err("usage: /find <label>".to_string()),
            words => Ok(Command::Find(words.join(" "))),
        },
        "/rename" => match rest.as_slice() {
            [handle, label @ ..] if !label.is_empty() => Ok(Command::Rename {
                handle: parse_handle(handle)?,
                label: label.join(" "),
            }),
            _ => Err("usage: /rename <handle> <label>".to_string()),
        },
        "/erase" => match rest.as_slice() {
            [handle] => Ok(Command::Erase(parse_handle(handle)?)),
            _ => Err("usage: /erase <handle>".to_string()),
        },
        "/tick" => match rest.as_slice() {
            [] => Ok(Command::Tick(1)),
            [n] => n
                .parse::<u32>()
                .map(Command::Tick)
                .map_err(|_| format!("'{n}' is not a tick count")),
            _ => Err("usage: /tick [n]".to_string()),
        },
        "/dedup" => match rest.as_slice() {
            ["on"] => Ok(Command::Dedup(true)),
            ["off"] => Ok(Command::Dedup(false)),
            _ => Err("usage: /dedup on|off".to_string()),
        },
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_place(args: &[&str]) -> Result<Command, String> {
    const USAGE: &str = "usage: /place <label> <x> <y> <z> [as <name>]";
    let [label, x, y, z, tail @ ..] = args else {
        return Err(USAGE.to_string());
    };
    let coord = |s: &str| {
        s.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("'{s}' is not a coordinate"))
    };
    let position = Vec3::new(coord(*x)?, coord(*y)?, coord(*z)?);
    let name = match tail {
        [] => None,
        ["as", name @ ..] if !name.is_empty() => Some(name.join(" ")),
        _ => return Err(USAGE.to_string()),
    };
    Ok(Command::Place {
        label: (*label).to_string(),
        position,
        name,
    })
}

/// Accepts `#3` or `3`.
fn parse_handle(raw: &str) -> Result<AnchorHandle, String> {
    raw.trim_start_matches('#')
        .parse::<u64>()
        .map(AnchorHandle)
        .map_err(|_| format!("'{raw}' is not an anchor handle"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

pub struct Shell {
    registry: AnchorRegistry,
    events: AnchorEventReceiver,
}

impl Shell {
    pub fn new(registry: AnchorRegistry) -> Self {
        let events = registry.subscribe();
        Self { registry, events }
    }

    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    /// Run one command.  Returns `false` when the shell should exit.
    pub fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Help => cmd_help(),
            Command::Place {
                label,
                position,
                name,
            } => self.cmd_place(label, position, name),
            Command::List => self.cmd_list(),
            Command::Find(label) => self.cmd_find(&label),
            Command::Rename { handle, label } => {
                if !self.registry.rename(handle, &label) {
                    println!("{} {}", "No live anchor".red(), handle.to_string().yellow());
                }
            }
            Command::Erase(handle) => {
                if self.registry.erase(handle) {
                    self.settle();
                } else {
                    println!("{} {}", "Cannot erase".red(), handle.to_string().yellow());
                }
            }
            Command::Clear => {
                let issued = self.registry.erase_all();
                println!("  {} erase(s) issued", issued);
                self.settle();
            }
            Command::Load => {
                let requested = self.registry.load_saved();
                println!("  Restoring {} saved anchor(s) …", requested.len());
                self.settle();
            }
            Command::Tick(n) => {
                for _ in 0..n {
                    self.registry.tick();
                }
            }
            Command::Settle => self.settle(),
            Command::Dedup(enabled) => {
                self.registry.set_dedup_enabled(enabled);
                println!(
                    "  Deduplication {}",
                    if enabled { "on".green() } else { "off".yellow() }
                );
            }
            Command::Quit => return false,
        }
        self.print_events();
        true
    }

    fn cmd_place(&mut self, label: String, position: Vec3, name: Option<String>) {
        let mut request = CreateRequest::new(label, Pose::at(position));
        if let Some(name) = name {
            request = request.with_explicit_name(name);
        }
        match self.registry.create_or_reuse(request) {
            CreateOutcome::Reused { handle, .. } => {
                println!("  {} {}", "Matched existing anchor".cyan(), handle);
            }
            CreateOutcome::Pending(handle) => {
                println!("  {} {}", "Requested anchor".cyan(), handle);
                self.settle();
            }
            CreateOutcome::Rejected => println!("  {}", "Platform rejected the anchor".red()),
        }
    }

    fn cmd_list(&self) {
        if self.registry.is_empty() {
            println!("  {}", "No live anchors.".dimmed());
            return;
        }
        println!("{}", "Live anchors".bold().underline());
        for entry in self.registry.entries() {
            println!(
                "  {:>5}  {:<24} ({:.2}, {:.2}, {:.2})  {:?}  {}",
                entry.handle.to_string().bold(),
                entry.display_label(),
                entry.position.x,
                entry.position.y,
                entry.position.z,
                entry.persistence,
                entry.identity.to_string().dimmed()
            );
        }
        println!(
            "  {} saved record(s), {} pending creation(s)",
            self.registry.saved_count(),
            self.registry.pending_count()
        );
    }

    fn cmd_find(&self, label: &str) {
        let handles = self.registry.find_by_label(label);
        if handles.is_empty() {
            match self.registry.identity_for_label(label) {
                Some(identity) => println!(
                    "  Not live; saved as {} (try {})",
                    identity.to_string().dimmed(),
                    "/load".bold()
                ),
                None => println!("  {}", "No anchor with that label.".dimmed()),
            }
            return;
        }
        let list: Vec<String> = handles.iter().map(ToString::to_string).collect();
        println!("  {}", list.join(", ").bold());
    }

    fn settle(&mut self) {
        let mut ticks = 0;
        while self.registry.has_pending_work() && ticks < SETTLE_LIMIT {
            self.registry.tick();
            ticks += 1;
        }
        if self.registry.has_pending_work() {
            println!(
                "  {} still waiting on the platform after {} ticks",
                "Warning:".yellow(),
                ticks
            );
        }
    }

    fn print_events(&mut self) {
        for event in self.events.drain() {
            let line = match event.payload {
                AnchorEventPayload::Registered {
                    handle, label, ..
                } => format!("{} {handle} {label}", "registered".green()),
                AnchorEventPayload::Reobserved {
                    handle,
                    display_label,
                    ..
                } => format!("{} {handle} {display_label}", "seen again".cyan()),
                AnchorEventPayload::Persisted { identity } => {
                    format!("{} {identity}", "saved".green())
                }
                AnchorEventPayload::PersistFailed { identity, reason } => {
                    format!("{} {identity}: {reason}", "save failed".red())
                }
                AnchorEventPayload::Erased { identity } => {
                    format!("{} {identity}", "erased".green())
                }
                AnchorEventPayload::EraseFailed { identity, reason } => {
                    format!("{} {identity}: {reason}", "erase failed".red())
                }
                AnchorEventPayload::Abandoned { handle } => {
                    format!("{} {handle}", "abandoned".yellow())
                }
                AnchorEventPayload::Renamed { identity, label } => {
                    format!("{} {identity} → {label}", "renamed".cyan())
                }
                AnchorEventPayload::Cleared { erased } => {
                    format!("{} {erased} anchor(s)", "cleared".yellow())
                }
            };
            println!("  {} {}", "•".dimmed(), line);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut shell: Shell, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "hearth>".bold().cyan());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(cmd);

        match parse_command(cmd) {
            Ok(command) => {
                if !shell.execute(command) {
                    println!("{}", "Goodbye.".green());
                    break;
                }
            }
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e,
                "/help".bold()
            ),
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Hearth Commands".bold().underline());
    println!("  {}  – report a detection", "/place <label> <x> <y> <z> [as <name>]".bold().cyan());
    println!("  {}  – list live anchors", "/list".bold().cyan());
    println!("  {}  – live handles with that label", "/find <label>".bold().cyan());
    println!("  {}  – relabel an anchor", "/rename <handle> <label>".bold().cyan());
    println!("  {}  – erase one anchor", "/erase <handle>".bold().cyan());
    println!("  {}  – erase everything", "/clear".bold().cyan());
    println!("  {}  – restore saved anchors", "/load".bold().cyan());
    println!("  {}  – advance the registry", "/tick [n]  /settle".bold().cyan());
    println!("  {}  – toggle deduplication", "/dedup on|off".bold().cyan());
    println!("  {}  – exit the shell", "/quit  /exit".bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_platform::SimulatedPlatform;
    use hearth_registry::RegistryConfig;
    use hearth_store::{MemoryStorage, PersistentRecordStore};

    fn shell(storage: &MemoryStorage) -> Shell {
        let store = PersistentRecordStore::new(Box::new(storage.clone()));
        let registry = AnchorRegistry::new(
            RegistryConfig::default(),
            Box::new(SimulatedPlatform::new().with_ready_delay(2)),
            store,
        );
        Shell::new(registry)
    }

    #[test]
    fn parses_place_with_explicit_name() {
        assert_eq!(
            parse_command("/place lamp 1 0 -2.5 as desk lamp").unwrap(),
            Command::Place {
                label: "lamp".to_string(),
                position: Vec3::new(1.0, 0.0, -2.5),
                name: Some("desk lamp".to_string()),
            }
        );
    }

    #[test]
    fn rejects_bad_place_arguments() {
        assert!(parse_command("/place lamp 1 0").is_err());
        assert!(parse_command("/place lamp 1 0 x").is_err());
        assert!(parse_command("/place lamp 1 0 0 named foo").is_err());
        assert!(parse_command("/place lamp NaN 0 0").is_err());
    }

    #[test]
    fn parses_handles_with_or_without_hash() {
        assert_eq!(parse_command("/erase #4").unwrap(), Command::Erase(AnchorHandle(4)));
        assert_eq!(parse_command("/erase 4").unwrap(), Command::Erase(AnchorHandle(4)));
        assert!(parse_command("/erase lamp").is_err());
    }

    #[test]
    fn parses_rename_with_multi_word_label() {
        assert_eq!(
            parse_command("/rename #2 reading lamp").unwrap(),
            Command::Rename {
                handle: AnchorHandle(2),
                label: "reading lamp".to_string(),
            }
        );
        assert!(parse_command("/rename #2").is_err());
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("/tick").unwrap(), Command::Tick(1));
        assert_eq!(parse_command("/tick 5").unwrap(), Command::Tick(5));
        assert_eq!(parse_command("/dedup off").unwrap(), Command::Dedup(false));
        assert_eq!(parse_command("/exit").unwrap(), Command::Quit);
        assert!(parse_command("/dance").is_err());
    }

    #[test]
    fn place_settles_to_saved_anchor() {
        let storage = MemoryStorage::new();
        let mut shell = shell(&storage);
        assert!(shell.execute(parse_command("/place Lamp 0 0 0").unwrap()));
        assert_eq!(shell.registry().len(), 1);
        assert_eq!(shell.registry().saved_count(), 1);
        assert!(!shell.registry().has_pending_work());
    }

    #[test]
    fn shell_session_survives_restart() {
        let storage = MemoryStorage::new();
        let mut first = shell(&storage);
        first.execute(parse_command("/place Sofa 1 0 0 as couch").unwrap());
        assert_eq!(first.registry().find_by_label("couch").len(), 1);

        let mut second = shell(&storage);
        assert!(second.registry().is_empty());
        second.execute(Command::Load);
        assert_eq!(second.registry().find_by_label("couch").len(), 1);
    }

    #[test]
    fn quit_stops_the_shell() {
        let storage = MemoryStorage::new();
        assert!(!shell(&storage).execute(Command::Quit));
    }
}
