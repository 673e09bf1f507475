use std::fmt::Result;
use std::fmt::Write;

use super::btree::{BTree, ROOT_PAGE};
use super::node::Node;
use super::pager::{PageId, PageStore};

/*
Example of output text:

digraph Database {
    node [ shape=record ]
    rankdir="LR";

    // Interior
    node_0[label="<e_0>.|key=\"m\"|<e_1>."]
    node_0:e_0 -> node_1;
    node_0:e_1 -> node_2;

    // Leaf
    node_1[label="<v_0>\"a\" (1)|<v_1>\"b\" (2)"]
}

*/

fn node_name<W: Write>(output: &mut W, page_idx: PageId) -> Result {
    write!(output, "node_{}", page_idx)
}

fn interior_edge<W: Write>(output: &mut W, page_idx: PageId, edge_idx: usize) -> Result {
    write!(output, "node_{}:e_{}", page_idx, edge_idx)
}

/// Render a key for a record label: lossy utf8, at most 20 characters, with the characters
/// that mean something to graphviz records replaced.
fn quote(key: &[u8]) -> String {
    let text = String::from_utf8_lossy(key);
    let mut s = String::from("\\\"");

    text.chars()
        .take(20)
        .map(|c| match c {
            '"' | '|' | '<' | '>' | '{' | '}' | '\\' => '_',
            c if c.is_control() => '?',
            ch => ch,
        })
        .for_each(|ch| s.push(ch));
    if text.chars().nth(20).is_some() {
        s.push_str("...");
    }
    s.push_str("\\\"");

    s
}

fn dump_node<W: Write>(output: &mut W, node: &Node) -> Result {
    write!(output, "\t")?;
    node_name(output, node.id)?;

    if node.leaf {
        let label: Vec<String> = node
            .keys
            .iter()
            .enumerate()
            .map(|(idx, key)| format!("<v_{}>{} ({})", idx, quote(&key.k), key.v.len()))
            .collect();
        writeln!(output, "[label=\"{}\"]", label.join("|"))?;
        return Ok(());
    }

    let mut label = vec!["<e_0>.".to_string()];
    for (idx, key) in node.keys.iter().enumerate() {
        label.push(format!("key={}", quote(&key.k)));
        label.push(format!("<e_{}>.", idx + 1));
    }
    writeln!(output, "[label=\"{}\"]", label.join("|"))?;

    for (edge_idx, child) in node.children.iter().enumerate() {
        write!(output, "\t")?;
        interior_edge(output, node.id, edge_idx)?;
        write!(output, " -> ")?;
        node_name(output, *child)?;
        writeln!(output, ";")?;
    }

    Ok(())
}

/// Write every node reachable from the root as a graphviz digraph. Pages that cannot be read
/// are drawn as an error node instead of aborting the dump.
pub fn dump<W: Write, S: PageStore>(output: &mut W, tree: &BTree<S>) -> Result {
    writeln!(output, "digraph Database {{")?;

    writeln!(output, "\tnode [ shape=record ]")?;
    writeln!(output, "\trankdir=\"LR\";")?;

    let mut pending = vec![ROOT_PAGE];
    while let Some(page_idx) = pending.pop() {
        match tree.load(page_idx) {
            Ok(node) => {
                dump_node(output, &node)?;
                pending.extend(node.children.iter().rev());
            }
            Err(e) => {
                write!(output, "\t")?;
                node_name(output, page_idx)?;
                writeln!(output, "[label=\"unreadable: {}\"]", quote(e.to_string().as_bytes()))?;
            }
        }
        writeln!(output)?;
    }

    writeln!(output, "}}")?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::quote;

    #[test]
    fn quoting() {
        assert_eq!("\\\"abc\\\"", quote(b"abc"));
        assert_eq!("\\\"a_b_\\\"", quote(b"a|b>"));
        assert_eq!(
            "\\\"aaaaaaaaaaaaaaaaaaaa...\\\"",
            quote("a".repeat(25).as_bytes())
        );
    }
}
