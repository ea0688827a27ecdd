//! Two unrelated trees live here: the read-side pass that turns a flat
//! directory array's sibling/child links into owned per-storage children
//! lists, and the write-side red-black tree used to assign those same
//! links when emitting a container.

use crate::constants::NO_STREAM;
use crate::directory::{Entity, EntityKind};
use crate::error::{Diagnostics, Error, Result, Warning};

struct TreeBuilder<'a> {
    links: &'a [crate::directory::RawLinks],
    is_container: &'a [bool],
    visited: Vec<bool>,
    children: Vec<Vec<usize>>,
    diagnostics: &'a Diagnostics,
}

impl<'a> TreeBuilder<'a> {
    fn walk(&mut self, index: u32, parent_idx: usize) -> Result<()> {
        if index == NO_STREAM {
            return Ok(());
        }
        let idx = index as usize;
        if idx >= self.links.len() {
            self.diagnostics.warn(Warning::DirIndex {
                index: parent_idx,
                detail: format!("reference to out-of-range index {idx}"),
            });
            return Ok(());
        }
        if self.visited[idx] {
            return Err(Error::DirLoop(idx));
        }
        self.visited[idx] = true;

        let (left, right) = (self.links[idx].left, self.links[idx].right);
        self.walk(left, parent_idx)?;
        self.children[parent_idx].push(idx);
        self.walk(right, parent_idx)?;

        if self.is_container[idx] {
            let child = self.links[idx].child;
            self.walk(child, idx)?;
        }
        Ok(())
    }
}

/// Builds each storage's ordered children list in place, in-order over the
/// red-black sibling tree. Detects loops via a shared visited-set across
/// the whole directory (an index can be claimed by at most one parent).
pub(crate) fn build_tree(entities: &mut [Entity], diagnostics: &Diagnostics) -> Result<()> {
    let n = entities.len();
    if n == 0 {
        return Ok(());
    }
    let links: Vec<crate::directory::RawLinks> = entities.iter().map(|e| e.links).collect();
    let is_container: Vec<bool> = entities.iter().map(|e| e.kind.is_container()).collect();

    let mut builder = TreeBuilder {
        links: &links,
        is_container: &is_container,
        visited: vec![false; n],
        children: vec![Vec::new(); n],
        diagnostics,
    };
    builder.visited[0] = true;
    if is_container[0] {
        let root_child = links[0].child;
        builder.walk(root_child, 0)?;
    }

    for (i, entity) in entities.iter_mut().enumerate() {
        entity.children = std::mem::take(&mut builder.children[i]);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Write-side: CLRS red-black tree over an arena of nodes, used once per
// storage to assign final left/right/child/color links.
// ---------------------------------------------------------------------

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct RbNode {
    entity_index: u32,
    name: String,
    parent: u32,
    left: u32,
    right: u32,
    color: Color,
}

pub(crate) struct RbTree {
    nodes: Vec<RbNode>,
    root: u32,
}

fn compare_names(a: &str, b: &str) -> std::cmp::Ordering {
    match a.encode_utf16().count().cmp(&b.encode_utf16().count()) {
        std::cmp::Ordering::Equal => a.to_uppercase().cmp(&b.to_uppercase()),
        other => other,
    }
}

/// Case-insensitive name comparison shared by the writer's and editor's
/// sibling-uniqueness checks and the reader's lookup fallback, folding on
/// full Unicode case mapping rather than ASCII only (names are UTF-16).
pub(crate) fn names_equal_ignore_case(a: &str, b: &str) -> bool {
    a.to_uppercase() == b.to_uppercase()
}

impl RbTree {
    /// Builds a tree over `items` (entity index, name), inserted in order.
    pub(crate) fn build(items: &[(u32, String)]) -> Self {
        let mut tree = RbTree {
            nodes: Vec::with_capacity(items.len()),
            root: NIL,
        };
        for (entity_index, name) in items {
            tree.insert(*entity_index, name.clone());
        }
        tree
    }

    pub(crate) fn root_entity(&self) -> Option<u32> {
        if self.root == NIL {
            None
        } else {
            Some(self.nodes[self.root as usize].entity_index)
        }
    }

    /// Visits every node, reporting its final left/right sibling (as
    /// entity indices) and whether it is black.
    pub(crate) fn record_links(&self, mut record: impl FnMut(u32, Option<u32>, Option<u32>, bool)) {
        self.visit(self.root, &mut record);
    }

    fn visit(&self, idx: u32, record: &mut impl FnMut(u32, Option<u32>, Option<u32>, bool)) {
        if idx == NIL {
            return;
        }
        let node = &self.nodes[idx as usize];
        let left = (node.left != NIL).then(|| self.nodes[node.left as usize].entity_index);
        let right = (node.right != NIL).then(|| self.nodes[node.right as usize].entity_index);
        record(node.entity_index, left, right, node.color == Color::Black);
        self.visit(node.left, record);
        self.visit(node.right, record);
    }

    fn parent(&self, idx: u32) -> u32 {
        if idx == NIL { NIL } else { self.nodes[idx as usize].parent }
    }

    fn color(&self, idx: u32) -> Color {
        if idx == NIL { Color::Black } else { self.nodes[idx as usize].color }
    }

    fn set_color(&mut self, idx: u32, c: Color) {
        if idx != NIL {
            self.nodes[idx as usize].color = c;
        }
    }

    fn insert(&mut self, entity_index: u32, name: String) {
        let new_idx = self.nodes.len() as u32;
        self.nodes.push(RbNode {
            entity_index,
            name,
            parent: NIL,
            left: NIL,
            right: NIL,
            color: Color::Red,
        });

        let mut y = NIL;
        let mut x = self.root;
        while x != NIL {
            y = x;
            x = if compare_names(&self.nodes[new_idx as usize].name, &self.nodes[x as usize].name) == std::cmp::Ordering::Less {
                self.nodes[x as usize].left
            } else {
                self.nodes[x as usize].right
            };
        }
        self.nodes[new_idx as usize].parent = y;
        if y == NIL {
            self.root = new_idx;
        } else if compare_names(&self.nodes[new_idx as usize].name, &self.nodes[y as usize].name) == std::cmp::Ordering::Less {
            self.nodes[y as usize].left = new_idx;
        } else {
            self.nodes[y as usize].right = new_idx;
        }

        if self.nodes[new_idx as usize].parent == NIL {
            self.nodes[new_idx as usize].color = Color::Black;
            return;
        }
        if self.parent(self.parent(new_idx)) == NIL {
            return;
        }
        self.fix_insert(new_idx);
    }

    fn left_rotate(&mut self, x: u32) {
        let y = self.nodes[x as usize].right;
        self.nodes[x as usize].right = self.nodes[y as usize].left;
        if self.nodes[y as usize].left != NIL {
            self.nodes[self.nodes[y as usize].left as usize].parent = x;
        }
        self.nodes[y as usize].parent = self.nodes[x as usize].parent;
        let xp = self.nodes[x as usize].parent;
        if xp == NIL {
            self.root = y;
        } else if x == self.nodes[xp as usize].left {
            self.nodes[xp as usize].left = y;
        } else {
            self.nodes[xp as usize].right = y;
        }
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].parent = y;
    }

    fn right_rotate(&mut self, x: u32) {
        let y = self.nodes[x as usize].left;
        self.nodes[x as usize].left = self.nodes[y as usize].right;
        if self.nodes[y as usize].right != NIL {
            self.nodes[self.nodes[y as usize].right as usize].parent = x;
        }
        self.nodes[y as usize].parent = self.nodes[x as usize].parent;
        let xp = self.nodes[x as usize].parent;
        if xp == NIL {
            self.root = y;
        } else if x == self.nodes[xp as usize].right {
            self.nodes[xp as usize].right = y;
        } else {
            self.nodes[xp as usize].left = y;
        }
        self.nodes[y as usize].right = x;
        self.nodes[x as usize].parent = y;
    }

    fn fix_insert(&mut self, mut k: u32) {
        while self.color(self.parent(k)) == Color::Red {
            let p = self.parent(k);
            let g = self.parent(p);
            if p == self.nodes[g as usize].right {
                let u = self.nodes[g as usize].left;
                if self.color(u) == Color::Red {
                    self.set_color(u, Color::Black);
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    k = g;
                } else {
                    if k == self.nodes[p as usize].left {
                        k = p;
                        self.right_rotate(k);
                    }
                    let p2 = self.parent(k);
                    let g2 = self.parent(p2);
                    self.set_color(p2, Color::Black);
                    self.set_color(g2, Color::Red);
                    self.left_rotate(g2);
                }
            } else {
                let u = self.nodes[g as usize].right;
                if self.color(u) == Color::Red {
                    self.set_color(u, Color::Black);
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    k = g;
                } else {
                    if k == self.nodes[p as usize].right {
                        k = p;
                        self.left_rotate(k);
                    }
                    let p2 = self.parent(k);
                    let g2 = self.parent(p2);
                    self.set_color(p2, Color::Black);
                    self.set_color(g2, Color::Red);
                    self.right_rotate(g2);
                }
            }
            if k == self.root {
                break;
            }
        }
        self.set_color(self.root, Color::Black);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RawLinks;

    fn entity(index: usize, kind: EntityKind, left: u32, right: u32, child: u32) -> Entity {
        Entity {
            index,
            kind,
            name: format!("entry{index}"),
            clsid: None,
            created: None,
            modified: None,
            start_sector: None,
            size: 0,
            links: RawLinks { left, right, child },
            children: Vec::new(),
        }
    }

    #[test]
    fn builds_children_in_order() {
        let mut entities = vec![
            entity(0, EntityKind::Root, NO_STREAM, NO_STREAM, 1),
            entity(1, EntityKind::Stream, NO_STREAM, 2, NO_STREAM),
            entity(2, EntityKind::Stream, NO_STREAM, NO_STREAM, NO_STREAM),
        ];
        let diagnostics = Diagnostics::default_sink();
        build_tree(&mut entities, &diagnostics).unwrap();
        assert_eq!(entities[0].children, vec![1, 2]);
    }

    #[test]
    fn detects_a_directory_loop() {
        let mut entities = vec![
            entity(0, EntityKind::Root, NO_STREAM, NO_STREAM, 1),
            entity(1, EntityKind::Stream, 1, NO_STREAM, NO_STREAM),
        ];
        let diagnostics = Diagnostics::default_sink();
        let result = build_tree(&mut entities, &diagnostics);
        assert!(matches!(result, Err(Error::DirLoop(1))));
    }

    #[test]
    fn rb_insert_orders_by_length_then_uppercase() {
        let items = vec![(0u32, "Bob".to_string()), (1u32, "Al".to_string()), (2u32, "cat".to_string())];
        let tree = RbTree::build(&items);
        let mut seen = Vec::new();
        tree.record_links(|entity_index, _, _, _| seen.push(entity_index));
        // shortest name first ("Al", 2 chars), then by length, ties broken uppercase
        assert_eq!(seen[0], 1);
    }
}
