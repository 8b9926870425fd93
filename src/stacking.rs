//! Stacking Module
//!
//! Mirrors the server's window stacking order as a rooted ordered forest.
//! Sibling lists run bottom-to-top, so a depth-first walk that visits each
//! node before its children yields paint order for "over" composition.

use anyhow::{bail, Context, Result};
use x11rb::protocol::xproto::Window;

/// One window in the stacking order.
///
/// Nodes live in an arena and address each other by index; the parent link
/// is a non-owning back-reference used to climb out of a sibling list
/// during iteration.
struct Node {
    window: Window,
    parent: Option<usize>,
    /// Child indices, bottom-to-top.
    children: Vec<usize>,
}

/// The stacking order of all windows under the root.
pub struct StackingForest {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: usize,
}

impl StackingForest {
    /// Create a forest containing only the root window.
    pub fn new(root: Window) -> Self {
        Self {
            nodes: vec![Node {
                window: root,
                parent: None,
                children: Vec::new(),
            }],
            free: Vec::new(),
            root: 0,
        }
    }

    /// The server root window this forest mirrors.
    pub fn root_window(&self) -> Window {
        self.nodes[self.root].window
    }

    pub fn contains(&self, window: Window) -> bool {
        self.find(window).is_some()
    }

    /// Insert `window` as the topmost child of `parent` (create-notify).
    pub fn append_new_child(&mut self, parent: Window, window: Window) -> Result<()> {
        if self.contains(window) {
            bail!("window 0x{:x} is already in the stacking order", window);
        }
        let parent_idx = self
            .find(parent)
            .with_context(|| format!("unknown stacking parent 0x{:x}", parent))?;
        let idx = self.alloc(window, parent_idx);
        self.nodes[parent_idx].children.push(idx);
        Ok(())
    }

    /// Insert `window` as the bottommost child of `parent`.
    #[allow(dead_code)]
    pub fn prepend_new_child(&mut self, parent: Window, window: Window) -> Result<()> {
        if self.contains(window) {
            bail!("window 0x{:x} is already in the stacking order", window);
        }
        let parent_idx = self
            .find(parent)
            .with_context(|| format!("unknown stacking parent 0x{:x}", parent))?;
        let idx = self.alloc(window, parent_idx);
        self.nodes[parent_idx].children.insert(0, idx);
        Ok(())
    }

    /// Remove `window` and everything stacked inside it (destroy-notify).
    ///
    /// Returns the windows of the removed subtree so the caller can retire
    /// the matching table entries.
    pub fn remove(&mut self, window: Window) -> Result<Vec<Window>> {
        let idx = self
            .find(window)
            .with_context(|| format!("window 0x{:x} is not in the stacking order", window))?;
        if idx == self.root {
            bail!("refusing to remove the root window from the stacking order");
        }
        self.detach(idx);
        let mut removed = Vec::new();
        self.release_subtree(idx, &mut removed);
        Ok(removed)
    }

    /// Detach `window` (with its subtree) and re-attach it as the topmost
    /// child of `new_parent` (reparent-notify).
    pub fn reparent(&mut self, window: Window, new_parent: Window) -> Result<()> {
        let idx = self
            .find(window)
            .with_context(|| format!("window 0x{:x} is not in the stacking order", window))?;
        if idx == self.root {
            bail!("refusing to reparent the root window");
        }
        let parent_idx = self
            .find(new_parent)
            .with_context(|| format!("unknown stacking parent 0x{:x}", new_parent))?;
        // A window cannot be reparented into its own subtree.
        let mut cursor = Some(parent_idx);
        while let Some(cur) = cursor {
            if cur == idx {
                bail!(
                    "cannot reparent window 0x{:x} under its own descendant 0x{:x}",
                    window,
                    new_parent
                );
            }
            cursor = self.nodes[cur].parent;
        }
        self.detach(idx);
        self.nodes[idx].parent = Some(parent_idx);
        self.nodes[parent_idx].children.push(idx);
        Ok(())
    }

    /// Move `window` to the top of its siblings.
    pub fn raise(&mut self, window: Window) -> Result<()> {
        let idx = self
            .find(window)
            .with_context(|| format!("window 0x{:x} is not in the stacking order", window))?;
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[parent].children.retain(|&c| c != idx);
            self.nodes[parent].children.push(idx);
        }
        Ok(())
    }

    /// Move `window` to the bottom of its siblings.
    pub fn lower(&mut self, window: Window) -> Result<()> {
        let idx = self
            .find(window)
            .with_context(|| format!("window 0x{:x} is not in the stacking order", window))?;
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[parent].children.retain(|&c| c != idx);
            self.nodes[parent].children.insert(0, idx);
        }
        Ok(())
    }

    /// Move `window` immediately above `sibling` among their common
    /// siblings (configure-notify with an `above_sibling`).
    pub fn stack_above(&mut self, window: Window, sibling: Window) -> Result<()> {
        let idx = self
            .find(window)
            .with_context(|| format!("window 0x{:x} is not in the stacking order", window))?;
        let sibling_idx = self
            .find(sibling)
            .with_context(|| format!("unknown restack sibling 0x{:x}", sibling))?;
        let parent = match self.nodes[idx].parent {
            Some(p) => p,
            None => bail!("refusing to restack the root window"),
        };
        if self.nodes[sibling_idx].parent != Some(parent) {
            bail!(
                "windows 0x{:x} and 0x{:x} are not siblings",
                window,
                sibling
            );
        }
        self.nodes[parent].children.retain(|&c| c != idx);
        let pos = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == sibling_idx)
            .with_context(|| format!("sibling 0x{:x} vanished during restack", sibling))?;
        self.nodes[parent].children.insert(pos + 1, idx);
        Ok(())
    }

    /// Move `window` immediately below `sibling` among their common
    /// siblings.
    #[allow(dead_code)]
    pub fn stack_below(&mut self, window: Window, sibling: Window) -> Result<()> {
        let idx = self
            .find(window)
            .with_context(|| format!("window 0x{:x} is not in the stacking order", window))?;
        let sibling_idx = self
            .find(sibling)
            .with_context(|| format!("unknown restack sibling 0x{:x}", sibling))?;
        let parent = match self.nodes[idx].parent {
            Some(p) => p,
            None => bail!("refusing to restack the root window"),
        };
        if self.nodes[sibling_idx].parent != Some(parent) {
            bail!(
                "windows 0x{:x} and 0x{:x} are not siblings",
                window,
                sibling
            );
        }
        self.nodes[parent].children.retain(|&c| c != idx);
        let pos = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == sibling_idx)
            .with_context(|| format!("sibling 0x{:x} vanished during restack", sibling))?;
        self.nodes[parent].children.insert(pos, idx);
        Ok(())
    }

    /// Walk the forest bottom-to-top: each node before its children, each
    /// sibling list in stacking order. Allocation-free; the shared borrow
    /// keeps the child lists immutable for the iterator's lifetime.
    pub fn iter(&self) -> BottomToTop<'_> {
        BottomToTop {
            forest: self,
            next: Some(self.root),
        }
    }

    fn alloc(&mut self, window: Window, parent: usize) -> usize {
        let node = Node {
            window,
            parent: Some(parent),
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn detach(&mut self, idx: usize) {
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[parent].children.retain(|&c| c != idx);
        }
    }

    fn release_subtree(&mut self, idx: usize, removed: &mut Vec<Window>) {
        removed.push(self.nodes[idx].window);
        let children = std::mem::take(&mut self.nodes[idx].children);
        for child in children {
            self.release_subtree(child, removed);
        }
        self.free.push(idx);
    }

    fn find(&self, window: Window) -> Option<usize> {
        let mut cursor = Some(self.root);
        while let Some(idx) = cursor {
            if self.nodes[idx].window == window {
                return Some(idx);
            }
            cursor = self.successor(idx);
        }
        None
    }

    /// The next node in bottom-to-top order: first child if any, otherwise
    /// the nearest next sibling found by climbing parent links.
    fn successor(&self, idx: usize) -> Option<usize> {
        if let Some(&first) = self.nodes[idx].children.first() {
            return Some(first);
        }
        let mut cur = idx;
        while let Some(parent) = self.nodes[cur].parent {
            let siblings = &self.nodes[parent].children;
            // A detached entry terminates the walk instead of panicking.
            let pos = siblings.iter().position(|&c| c == cur)?;
            if let Some(&next) = siblings.get(pos + 1) {
                return Some(next);
            }
            cur = parent;
        }
        None
    }
}

pub struct BottomToTop<'a> {
    forest: &'a StackingForest,
    next: Option<usize>,
}

impl Iterator for BottomToTop<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let idx = self.next?;
        self.next = self.forest.successor(idx);
        Some(self.forest.nodes[idx].window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: Window = 1;

    fn order(forest: &StackingForest) -> Vec<Window> {
        forest.iter().collect()
    }

    fn forest_with(windows: &[Window]) -> StackingForest {
        let mut forest = StackingForest::new(ROOT);
        for &w in windows {
            forest.append_new_child(ROOT, w).unwrap();
        }
        forest
    }

    #[test]
    fn empty_forest_yields_only_root() {
        let forest = StackingForest::new(ROOT);
        assert_eq!(order(&forest), vec![ROOT]);
    }

    #[test]
    fn create_order_is_bottom_to_top() {
        let forest = forest_with(&[10, 20, 30]);
        assert_eq!(order(&forest), vec![ROOT, 10, 20, 30]);
    }

    #[test]
    fn prepend_lands_at_the_bottom() {
        let mut forest = forest_with(&[10, 20]);
        forest.prepend_new_child(ROOT, 5).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 5, 10, 20]);
    }

    #[test]
    fn stack_above_moves_window_over_sibling() {
        // A, B, C created in order, then A restacked above C.
        let mut forest = forest_with(&[10, 20, 30]);
        forest.stack_above(10, 30).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 20, 30, 10]);
    }

    #[test]
    fn stack_below_moves_window_under_sibling() {
        let mut forest = forest_with(&[10, 20, 30]);
        forest.stack_below(30, 10).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 30, 10, 20]);
    }

    #[test]
    fn stack_below_requires_common_parent() {
        let mut forest = forest_with(&[10, 20]);
        forest.append_new_child(10, 11).unwrap();
        assert!(forest.stack_below(20, 11).is_err());
    }

    #[test]
    fn lower_moves_window_to_bottom() {
        let mut forest = forest_with(&[10, 20, 30]);
        forest.stack_above(10, 30).unwrap();
        forest.lower(30).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 30, 20, 10]);
    }

    #[test]
    fn raise_moves_window_to_top() {
        let mut forest = forest_with(&[10, 20, 30]);
        forest.raise(10).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 20, 30, 10]);
    }

    #[test]
    fn reparent_appends_at_top_of_new_parent() {
        let mut forest = forest_with(&[10, 20]);
        forest.reparent(20, 10).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 10, 20]);
    }

    #[test]
    fn double_reparent_equals_single_reparent() {
        let mut forest = forest_with(&[10, 20, 30]);
        forest.reparent(30, 10).unwrap();
        forest.reparent(30, 20).unwrap();

        let mut direct = forest_with(&[10, 20, 30]);
        direct.reparent(30, 20).unwrap();

        assert_eq!(order(&forest), order(&direct));
    }

    #[test]
    fn reparent_carries_the_subtree() {
        let mut forest = forest_with(&[10, 20]);
        forest.append_new_child(10, 11).unwrap();
        forest.append_new_child(11, 12).unwrap();
        forest.reparent(10, 20).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 20, 10, 11, 12]);
    }

    #[test]
    fn reparent_into_own_subtree_is_rejected() {
        let mut forest = forest_with(&[10]);
        forest.append_new_child(10, 11).unwrap();
        assert!(forest.reparent(10, 11).is_err());
    }

    #[test]
    fn remove_detaches_subtree() {
        let mut forest = forest_with(&[10, 20]);
        forest.append_new_child(10, 11).unwrap();
        let mut removed = forest.remove(10).unwrap();
        removed.sort_unstable();
        assert_eq!(removed, vec![10, 11]);
        assert_eq!(order(&forest), vec![ROOT, 20]);
    }

    #[test]
    fn remove_then_reinsert_reuses_slots() {
        let mut forest = forest_with(&[10, 20, 30]);
        forest.remove(20).unwrap();
        forest.append_new_child(ROOT, 40).unwrap();
        assert_eq!(order(&forest), vec![ROOT, 10, 30, 40]);
        assert_eq!(forest.nodes.len(), 4);
    }

    #[test]
    fn removing_the_root_is_rejected() {
        let mut forest = StackingForest::new(ROOT);
        assert!(forest.remove(ROOT).is_err());
    }

    #[test]
    fn stack_above_requires_common_parent() {
        let mut forest = forest_with(&[10, 20]);
        forest.append_new_child(10, 11).unwrap();
        assert!(forest.stack_above(11, 20).is_err());
    }

    #[test]
    fn iteration_visits_each_node_exactly_once() {
        let mut forest = forest_with(&[10, 20, 30]);
        forest.append_new_child(10, 11).unwrap();
        forest.append_new_child(20, 21).unwrap();
        forest.append_new_child(21, 22).unwrap();

        let mut seen = order(&forest);
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert_eq!(total, 7);
    }

    #[test]
    fn parent_links_match_child_lists() {
        let mut forest = forest_with(&[10, 20]);
        forest.append_new_child(10, 11).unwrap();
        forest.reparent(20, 10).unwrap();

        for window in order(&forest) {
            let idx = forest.find(window).unwrap();
            if let Some(parent) = forest.nodes[idx].parent {
                assert!(forest.nodes[parent].children.contains(&idx));
            } else {
                assert_eq!(window, ROOT);
            }
        }
    }
}
