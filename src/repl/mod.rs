mod mode;
pub mod modes;
mod shared;

use std::collections::HashMap;
use std::io::{BufRead, Write};

pub use mode::{CommandResult, Mode, ModeFactory, ModeId};
pub use shared::SharedState;

use modes::{BTreeMode, PagerMode};

pub struct Repl {
    shared: SharedState,
    current_mode: Option<Box<dyn Mode>>,
    mode_factories: HashMap<ModeId, ModeFactory>,
}

impl Repl {
    pub fn new(shared: SharedState) -> Self {
        let mut mode_factories: HashMap<ModeId, ModeFactory> = HashMap::new();

        mode_factories.insert(ModeId::BTree, |shared| Box::new(BTreeMode::new(shared)));
        mode_factories.insert(ModeId::Pager, |_| Box::new(PagerMode::new()));

        Repl {
            shared,
            current_mode: None,
            mode_factories,
        }
    }

    /// Hand back the shared state so the files can be closed cleanly
    pub fn into_shared(self) -> SharedState {
        self.shared
    }

    /// Read commands from `input` until it runs dry or the user exits
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, output: &mut W) -> std::io::Result<()> {
        loop {
            // Print prompt
            let prompt = match &self.current_mode {
                None => "db> ".to_string(),
                Some(mode) => mode.prompt(),
            };
            write!(output, "{}", prompt)?;
            output.flush()?;

            // Read line
            let mut line = String::new();
            let length = input.read_line(&mut line)?;
            if length == 0 {
                break; // EOF
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Parse into tokens
            let tokens: Vec<&str> = line.split_whitespace().collect();

            // Handle the command
            let result = self.handle_command(&tokens);

            match result {
                CommandResult::Ok => {}
                CommandResult::Message(msg) => writeln!(output, "{}", msg)?,
                CommandResult::SwitchMode(mode_id) => {
                    let msg = self.enter_mode(mode_id);
                    writeln!(output, "{}", msg)?;
                }
                CommandResult::ExitMode => {
                    if let Some(msg) = self.exit_mode() {
                        writeln!(output, "{}", msg)?;
                    }
                }
                CommandResult::Exit => break,
                CommandResult::NotHandled => {
                    writeln!(output, "Unknown command: '{}'", tokens.join(" "))?;
                    writeln!(output, "Type 'help' for available commands")?;
                }
                CommandResult::Error(e) => writeln!(output, "Error: {}", e)?,
            }
        }

        Ok(())
    }

    fn handle_command(&mut self, tokens: &[&str]) -> CommandResult {
        // Try global commands first
        if let Some(result) = self.handle_global_command(tokens) {
            return result;
        }

        // If in a mode, delegate to mode
        if let Some(mode) = &mut self.current_mode {
            return mode.execute(tokens, &mut self.shared);
        }

        // In root mode, only global commands are valid
        CommandResult::NotHandled
    }

    fn handle_global_command(&self, tokens: &[&str]) -> Option<CommandResult> {
        match tokens {
            ["exit"] | ["quit"] | ["q"] => Some(CommandResult::Exit),

            ["help"] => Some(CommandResult::Message(self.help())),

            ["mode"] => {
                let msg = match &self.current_mode {
                    None => "Current mode: root".to_string(),
                    Some(mode) => format!("Current mode: {}", mode.id()),
                };
                Some(CommandResult::Message(msg))
            }

            ["modes"] => Some(CommandResult::Message(Self::mode_list())),

            ["enter", mode_name] => match ModeId::try_from(*mode_name) {
                Ok(mode_id) => Some(CommandResult::SwitchMode(mode_id)),
                Err(_) => Some(CommandResult::Error(format!("Unknown mode: {}", mode_name))),
            },

            ["back"] | ["leave"] => {
                if self.current_mode.is_some() {
                    Some(CommandResult::ExitMode)
                } else {
                    Some(CommandResult::Message("Already in root mode".to_string()))
                }
            }

            _ => None,
        }
    }

    fn mode_list() -> String {
        let mut msg = "Available modes:".to_string();
        for mode_id in ModeId::all() {
            msg += &format!("\n  {:8} - {}", mode_id.name(), mode_id.description());
        }
        msg
    }

    fn help(&self) -> String {
        match &self.current_mode {
            None => self.root_help(),
            Some(mode) => format!("{}\n\n{}", self.global_help(), mode.help()),
        }
    }

    fn root_help(&self) -> String {
        let mut help = Self::mode_list();
        help += "\n\nCommands:";
        help += "\n  enter <mode>  - Enter a mode";
        help += "\n  modes         - List available modes";
        help += "\n  exit          - Exit REPL";
        help
    }

    fn global_help(&self) -> String {
        "Global commands:\n  help          - Show this help\n  exit/quit     - Exit REPL\n  back/leave    - Return to root mode\n  mode          - Show current mode\n  modes         - List available modes\n  enter <mode>  - Switch to a mode".to_string()
    }

    fn enter_mode(&mut self, mode_id: ModeId) -> String {
        // Check if already in this mode
        if let Some(current) = &self.current_mode {
            if current.id() == mode_id {
                return format!("Already in {} mode", mode_id);
            }
        }

        // Drop current mode (if any)
        self.current_mode = None;

        match self.mode_factories.get(&mode_id) {
            Some(factory) => {
                self.current_mode = Some(factory(&mut self.shared));
                format!("Entered {} mode", mode_id)
            }
            None => format!("No {} mode available", mode_id),
        }
    }

    fn exit_mode(&mut self) -> Option<String> {
        let mode = self.current_mode.take()?;
        Some(format!("Left {} mode", mode.id()))
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::{Repl, SharedState};
    use crate::config::Config;
    use crate::storage::{BTree, Pager};

    fn run_script(script: &str) -> String {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            order: 2,
            ..Config::default()
        };
        let btree = BTree::open(config.tree_path(), &config.pager_options(), config.order).unwrap();
        let pager = Pager::open(config.pages_path(), &config.pager_options()).unwrap();

        let mut repl = Repl::new(SharedState::new(config, btree, pager));
        let mut output = vec![];
        repl.run(script.as_bytes(), &mut output).unwrap();
        repl.into_shared().close().unwrap();

        String::from_utf8(output).unwrap()
    }

    #[test]
    fn modes_switch() {
        let out = run_script("mode\nenter btree\nmode\nenter btree\nback\nback\nenter nowhere\n");

        assert!(out.contains("Current mode: root"));
        assert!(out.contains("Entered btree mode"));
        assert!(out.contains("Current mode: btree"));
        assert!(out.contains("Already in btree mode"));
        assert!(out.contains("Left btree mode"));
        assert!(out.contains("Already in root mode"));
        assert!(out.contains("Error: Unknown mode: nowhere"));
    }

    #[test]
    fn root_rejects_mode_commands() {
        let out = run_script("put a b\nexit\nput c d\n");
        assert!(out.contains("Unknown command: 'put a b'"));
        assert!(!out.contains("put c d"));
    }

    #[test]
    fn btree_session() {
        let out = run_script(
            "enter btree\nput apple red\nput apple green\nput pear yellow\nget apple\nrange a z\nremove apple red\nget apple\ndelete pear\nget pear\nverify\n",
        );

        assert!(out.contains(r#"apple => ["red","green"]"#));
        assert!(out.contains(r#"pear => ["yellow"]"#));
        assert!(out.contains(r#"apple => ["green"]"#));
        assert!(out.contains("Key 'pear' not found"));
        assert!(out.contains("Verify success!"));
    }

    #[test]
    fn pager_session() {
        let out = run_script("enter pager\nwrite hello\nget 0\ncount\ndelete 0\nwrite again\nget 0\n");

        assert!(out.contains("Wrote page 0"));
        assert!(out.contains("Page 0: hello"));
        assert!(out.contains("1 pages"));
        assert!(out.contains("Freed page 0"));
        assert!(out.contains("Page 0: again"));
    }
}
