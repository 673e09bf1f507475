use crate::repl::{CommandResult, Mode, ModeId, SharedState};
use crate::storage::{PageId, PageStore};

/// Pokes at the raw pager: pages in, pages out
#[derive(Debug, Default)]
pub struct PagerMode;

impl PagerMode {
    pub fn new() -> Self {
        PagerMode
    }
}

impl Mode for PagerMode {
    fn id(&self) -> ModeId {
        ModeId::Pager
    }

    fn execute(&mut self, tokens: &[&str], shared: &mut SharedState) -> CommandResult {
        let pager = &mut shared.pager;

        match tokens {
            ["write", rest @ ..] if !rest.is_empty() => match pager.write(rest.join(" ").as_bytes()) {
                Ok(page_idx) => CommandResult::Message(format!("Wrote page {}", page_idx)),
                Err(e) => CommandResult::Error(format!("Write failed: {}", e)),
            },

            ["get", page_idx] => {
                let Some(page_idx) = parse_page(page_idx) else {
                    return CommandResult::Error("Invalid page id".to_string());
                };
                let lock = pager.page_lock(page_idx);
                let _guard = lock.read();
                match pager.get_page(page_idx) {
                    Ok(data) => {
                        // pages come back padded with zeros
                        let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                        CommandResult::Message(format!(
                            "Page {}: {}",
                            page_idx,
                            String::from_utf8_lossy(&data[..end])
                        ))
                    }
                    Err(e) => CommandResult::Error(format!("Read failed: {}", e)),
                }
            }

            ["delete", page_idx] => {
                let Some(page_idx) = parse_page(page_idx) else {
                    return CommandResult::Error("Invalid page id".to_string());
                };
                match pager.delete_page(page_idx) {
                    Ok(()) => CommandResult::Message(format!("Freed page {}", page_idx)),
                    Err(e) => CommandResult::Error(format!("Delete failed: {}", e)),
                }
            }

            ["count"] => match pager.count() {
                Ok(count) => CommandResult::Message(format!(
                    "{} pages, free: {:?}",
                    count,
                    pager.free_pages()
                )),
                Err(e) => CommandResult::Error(format!("Count failed: {}", e)),
            },

            _ => CommandResult::NotHandled,
        }
    }

    fn help(&self) -> String {
        r#"Pager mode commands:
    write <text>              Store text on a new page
    get <id>                  Print the content of a page
    delete <id>               Put a page on the free list
    count                     Number of pages in the file"#
            .to_string()
    }
}

fn parse_page(token: &str) -> Option<PageId> {
    token.parse().ok()
}
