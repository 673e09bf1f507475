use std::cmp::max;

use rand::Rng;

use crate::repl::{CommandResult, Mode, ModeId, SharedState};
use crate::storage::Key;

/// BTree mode, every command runs straight against the shared tree
#[derive(Debug)]
pub struct BTreeMode {
    order: usize,
}

impl BTreeMode {
    pub fn new(shared: &mut SharedState) -> Self {
        BTreeMode {
            order: shared.btree.order(),
        }
    }
}

impl Mode for BTreeMode {
    fn id(&self) -> ModeId {
        ModeId::BTree
    }

    fn prompt(&self) -> String {
        format!("btree(t={})> ", self.order)
    }

    fn execute(&mut self, tokens: &[&str], shared: &mut SharedState) -> CommandResult {
        let btree = &mut shared.btree;

        match tokens {
            // Write operations
            ["put", key, rest @ ..] if !rest.is_empty() => {
                let value = rest.join(" ");
                match btree.put(key.as_bytes(), value.as_bytes()) {
                    Ok(()) => CommandResult::Ok,
                    Err(e) => CommandResult::Error(format!("Put failed: {}", e)),
                }
            }

            ["remove", key, rest @ ..] if !rest.is_empty() => {
                let value = rest.join(" ");
                match btree.remove(key.as_bytes(), value.as_bytes()) {
                    Ok(()) => CommandResult::Ok,
                    Err(e) => CommandResult::Error(format!("Remove failed: {}", e)),
                }
            }

            ["delete", key] => match btree.delete(key.as_bytes()) {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Delete failed: {}", e)),
            },

            ["random", "insert", count, max_size] => {
                let count: usize = match count.parse() {
                    Ok(c) => c,
                    Err(_) => {
                        return CommandResult::Error("Invalid count (must be a number)".to_string())
                    }
                };
                let max_size: usize = match max_size.parse() {
                    Ok(s) => s,
                    Err(_) => {
                        return CommandResult::Error(
                            "Invalid max_size (must be a number)".to_string(),
                        )
                    }
                };

                let max_size = max(11, max_size);

                let mut rng = rand::thread_rng();
                for _ in 0..count {
                    let size = rng.gen_range(10..max_size);
                    let value: String = (0..size)
                        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                        .collect();
                    let key = format!("{:010}", rng.gen_range(0..1u64 << 32));

                    if let Err(e) = btree.put(key.as_bytes(), value.as_bytes()) {
                        return CommandResult::Error(format!("Put failed: {}", e));
                    }
                }
                CommandResult::Message(format!(
                    "Inserted {} items with random size up to {}",
                    count, max_size
                ))
            }

            // Read operations
            ["get", key] => match btree.get(key.as_bytes()) {
                Ok(Some(found)) => CommandResult::Message(format_key(&found)),
                Ok(None) => CommandResult::Message(format!("Key '{}' not found", key)),
                Err(e) => CommandResult::Error(format!("Get failed: {}", e)),
            },

            ["range", start, end] => match btree.range(start.as_bytes(), end.as_bytes()) {
                Ok(keys) if keys.is_empty() => CommandResult::Message("No keys in range".to_string()),
                Ok(keys) => CommandResult::Message(
                    keys.iter().map(format_key).collect::<Vec<_>>().join("\n"),
                ),
                Err(e) => CommandResult::Error(format!("Range failed: {}", e)),
            },

            // Debug operations
            ["verify"] => match btree.verify() {
                Ok(_) => CommandResult::Message("Verify success!".to_string()),
                Err(e) => CommandResult::Error(format!("Verify failed: {}", e)),
            },

            ["dump", path] => {
                let path = std::path::Path::new(*path);
                match btree.dump_to_file(path) {
                    Ok(_) => CommandResult::Message(format!("Dumped graph to {:?}", path)),
                    Err(e) => CommandResult::Error(format!("Error dumping: {}", e)),
                }
            }

            _ => CommandResult::NotHandled,
        }
    }

    fn help(&self) -> String {
        r#"BTree mode commands:
  Write operations:
    put <key> <value>         Add a value under a key
    remove <key> <value>      Remove one value from a key
    delete <key>              Remove a key and all its values
    random insert <n> <size>  Insert n random entries

  Read operations:
    get <key>                 Print a key and its values
    range <start> <end>       Print keys between start and end, inclusive

  Debug:
    verify                    Verify B-tree integrity
    dump <path>               Export B-tree as graphviz dot file"#
            .to_string()
    }
}

/// `key => ["value", ...]`, bytes that are not utf8 shown lossily
fn format_key(key: &Key) -> String {
    let values: Vec<String> = key
        .v
        .iter()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .collect();
    let values = serde_json::to_string(&values).unwrap_or_else(|_| "<unprintable>".to_string());

    format!("{} => {}", String::from_utf8_lossy(&key.k), values)
}
