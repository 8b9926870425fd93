//! Scene Module
//!
//! Client-side mirror of the server's window population: the window table,
//! the stacking forest, and the per-window server resources (picture,
//! bounding region, damage object). Event handlers mutate the scene first
//! and only then touch the wire, so a repaint always observes a consistent
//! model.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use x11rb::protocol::damage::Damage;
use x11rb::protocol::render::Picture;
use x11rb::protocol::xfixes::Region;
use x11rb::protocol::xproto::Window;

use crate::stacking::{BottomToTop, StackingForest};

/// One top-level window observed under the root.
#[derive(Debug, Clone, Copy)]
pub struct WindowRecord {
    pub window: Window,
    /// Whether the window is currently mapped.
    pub visible: bool,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// Server resources that became garbage when a window left the scene.
///
/// The scene only tracks the IDs; the dispatcher owns the matching Free
/// requests.
#[derive(Debug, Default)]
pub struct RetiredResources {
    pub pictures: Vec<Picture>,
    pub regions: Vec<Region>,
    pub damages: Vec<Damage>,
}

pub struct Scene {
    windows: HashMap<Window, WindowRecord>,
    stacking: StackingForest,
    pictures: HashMap<Window, Picture>,
    regions: HashMap<Window, Region>,
    damages: HashMap<Window, Damage>,
}

impl Scene {
    pub fn new(root: Window) -> Self {
        Self {
            windows: HashMap::new(),
            stacking: StackingForest::new(root),
            pictures: HashMap::new(),
            regions: HashMap::new(),
            damages: HashMap::new(),
        }
    }

    pub fn root(&self) -> Window {
        self.stacking.root_window()
    }

    pub fn contains(&self, window: Window) -> bool {
        self.windows.contains_key(&window)
    }

    /// Insert a newly created window, stacked on top of its siblings.
    /// Windows start unmapped; a picture only appears at map time.
    pub fn add_window(
        &mut self,
        parent: Window,
        window: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        if self.windows.contains_key(&window) {
            bail!("duplicate create-notify for window 0x{:x}", window);
        }
        self.stacking.append_new_child(parent, window)?;
        self.windows.insert(
            window,
            WindowRecord {
                window,
                visible: false,
                x,
                y,
                width,
                height,
            },
        );
        Ok(())
    }

    /// Remove a destroyed window and everything stacked inside it.
    pub fn remove_window(&mut self, window: Window) -> Result<RetiredResources> {
        if !self.windows.contains_key(&window) {
            bail!("destroy-notify for unknown window 0x{:x}", window);
        }
        let mut retired = RetiredResources::default();
        for gone in self.stacking.remove(window)? {
            self.windows.remove(&gone);
            if let Some(picture) = self.pictures.remove(&gone) {
                retired.pictures.push(picture);
            }
            if let Some(region) = self.regions.remove(&gone) {
                retired.regions.push(region);
            }
            if let Some(damage) = self.damages.remove(&gone) {
                retired.damages.push(damage);
            }
        }
        Ok(retired)
    }

    pub fn set_visible(&mut self, window: Window, visible: bool) -> Result<()> {
        let record = self
            .windows
            .get_mut(&window)
            .with_context(|| format!("map state change for unknown window 0x{:x}", window))?;
        record.visible = visible;
        Ok(())
    }

    pub fn set_geometry(
        &mut self,
        window: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        let record = self
            .windows
            .get_mut(&window)
            .with_context(|| format!("configure-notify for unknown window 0x{:x}", window))?;
        record.x = x;
        record.y = y;
        record.width = width;
        record.height = height;
        Ok(())
    }

    /// Apply a configure-notify restack: above a named sibling, or to the
    /// bottom when no sibling is named.
    pub fn restack(&mut self, window: Window, above_sibling: Option<Window>) -> Result<()> {
        match above_sibling {
            Some(sibling) => self.stacking.stack_above(window, sibling),
            None => self.stacking.lower(window),
        }
    }

    pub fn reparent(&mut self, window: Window, new_parent: Window) -> Result<()> {
        self.stacking.reparent(window, new_parent)
    }

    pub fn raise(&mut self, window: Window) -> Result<()> {
        self.stacking.raise(window)
    }

    pub fn lower(&mut self, window: Window) -> Result<()> {
        self.stacking.lower(window)
    }

    pub fn window(&self, window: Window) -> Option<&WindowRecord> {
        self.windows.get(&window)
    }

    pub fn picture(&self, window: Window) -> Option<Picture> {
        self.pictures.get(&window).copied()
    }

    pub fn set_picture(&mut self, window: Window, picture: Picture) -> Result<()> {
        if !self.windows.contains_key(&window) {
            bail!("picture for unknown window 0x{:x}", window);
        }
        if self.pictures.insert(window, picture).is_some() {
            bail!("window 0x{:x} already has a picture", window);
        }
        Ok(())
    }

    /// Install a fresh bounding region, handing back the one it replaces.
    pub fn set_region(&mut self, window: Window, region: Region) -> Result<Option<Region>> {
        if !self.windows.contains_key(&window) {
            bail!("bounding region for unknown window 0x{:x}", window);
        }
        Ok(self.regions.insert(window, region))
    }

    pub fn set_damage(&mut self, window: Window, damage: Damage) -> Result<()> {
        if !self.windows.contains_key(&window) {
            bail!("damage object for unknown window 0x{:x}", window);
        }
        if self.damages.insert(window, damage).is_some() {
            bail!("window 0x{:x} already has a damage object", window);
        }
        Ok(())
    }

    /// Bottom-to-top paint order, root first.
    pub fn paint_order(&self) -> BottomToTop<'_> {
        self.stacking.iter()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        // The window table and the stacking forest describe the same set
        // of windows (the forest additionally holds the root).
        let mut forest_ids: Vec<Window> = self.stacking.iter().collect();
        assert_eq!(forest_ids.remove(0), self.root());
        forest_ids.sort_unstable();
        let mut table_ids: Vec<Window> = self.windows.keys().copied().collect();
        table_ids.sort_unstable();
        assert_eq!(forest_ids, table_ids);

        for (&window, record) in &self.windows {
            assert_eq!(window, record.window);
            if record.visible {
                assert!(self.pictures.contains_key(&window));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: Window = 1;

    fn scene_with(windows: &[Window]) -> Scene {
        let mut scene = Scene::new(ROOT);
        for &w in windows {
            scene.add_window(ROOT, w, 0, 0, 200, 200).unwrap();
        }
        scene
    }

    #[test]
    fn create_then_destroy_restores_initial_state() {
        let mut scene = scene_with(&[10, 20]);
        let before = scene.paint_order().collect::<Vec<_>>();

        scene.add_window(ROOT, 30, 50, 0, 200, 200).unwrap();
        scene.set_visible(30, true).unwrap();
        scene.set_picture(30, 0x900001).unwrap();
        scene.set_region(30, 0x900002).unwrap();
        scene.set_damage(30, 0x900003).unwrap();

        let retired = scene.remove_window(30).unwrap();
        assert_eq!(retired.pictures, vec![0x900001]);
        assert_eq!(retired.regions, vec![0x900002]);
        assert_eq!(retired.damages, vec![0x900003]);

        assert_eq!(scene.paint_order().collect::<Vec<_>>(), before);
        assert!(!scene.contains(30));
        scene.assert_consistent();
    }

    #[test]
    fn restack_above_then_none_lands_at_bottom() {
        let mut scene = scene_with(&[10, 20, 30]);
        scene.restack(10, Some(30)).unwrap();
        assert_eq!(scene.paint_order().collect::<Vec<_>>(), vec![ROOT, 20, 30, 10]);

        scene.restack(10, None).unwrap();
        assert_eq!(scene.paint_order().collect::<Vec<_>>(), vec![ROOT, 10, 20, 30]);
        scene.assert_consistent();
    }

    #[test]
    fn reparent_moves_window_under_sibling() {
        let mut scene = scene_with(&[10, 20]);
        scene.reparent(20, 10).unwrap();
        assert_eq!(scene.paint_order().collect::<Vec<_>>(), vec![ROOT, 10, 20]);
        scene.assert_consistent();
    }

    #[test]
    fn geometry_updates_apply_to_the_record() {
        let mut scene = scene_with(&[10]);
        scene.set_geometry(10, -5, 12, 640, 480).unwrap();
        let record = scene.window(10).unwrap();
        assert_eq!((record.x, record.y), (-5, 12));
        assert_eq!((record.width, record.height), (640, 480));
    }

    #[test]
    fn visible_windows_keep_their_picture_across_unmap() {
        let mut scene = scene_with(&[10]);
        scene.set_visible(10, true).unwrap();
        scene.set_picture(10, 0x900001).unwrap();
        scene.set_visible(10, false).unwrap();
        assert_eq!(scene.picture(10), Some(0x900001));
    }

    #[test]
    fn a_second_picture_for_a_mapped_window_is_rejected() {
        let mut scene = scene_with(&[10]);
        scene.set_picture(10, 0x900001).unwrap();
        assert!(scene.set_picture(10, 0x900002).is_err());
    }

    #[test]
    fn fresh_region_hands_back_the_replaced_one() {
        let mut scene = scene_with(&[10]);
        assert_eq!(scene.set_region(10, 0x900002).unwrap(), None);
        assert_eq!(scene.set_region(10, 0x900004).unwrap(), Some(0x900002));
    }

    #[test]
    fn destroy_during_damage_burst_leaves_scene_paintable() {
        // W's destroy-notify arrives while its damage-notify is still
        // queued; the other windows must remain composable.
        let mut scene = scene_with(&[10, 20]);
        for &w in &[10, 20] {
            scene.set_visible(w, true).unwrap();
        }
        scene.set_picture(10, 0x900001).unwrap();
        scene.set_picture(20, 0x900005).unwrap();
        scene.set_damage(10, 0x900003).unwrap();
        scene.set_damage(20, 0x900007).unwrap();

        let retired = scene.remove_window(10).unwrap();
        assert_eq!(retired.pictures, vec![0x900001]);
        assert_eq!(retired.damages, vec![0x900003]);
        assert!(!scene.contains(10));

        let paintable: Vec<Window> = scene
            .paint_order()
            .filter(|&w| w != ROOT)
            .filter(|&w| scene.window(w).map(|r| r.visible).unwrap_or(false))
            .filter(|&w| scene.picture(w).is_some())
            .collect();
        assert_eq!(paintable, vec![20]);
        scene.assert_consistent();
    }

    #[test]
    fn events_for_unknown_windows_are_rejected() {
        let mut scene = scene_with(&[10]);
        assert!(scene.set_geometry(99, 0, 0, 1, 1).is_err());
        assert!(scene.set_visible(99, true).is_err());
        assert!(scene.remove_window(99).is_err());
        assert!(scene.set_picture(99, 0x900001).is_err());
    }

    #[test]
    fn removing_a_parent_retires_nested_resources() {
        let mut scene = scene_with(&[10, 20]);
        scene.reparent(20, 10).unwrap();
        scene.set_picture(20, 0x900005).unwrap();
        scene.set_damage(10, 0x900003).unwrap();

        let retired = scene.remove_window(10).unwrap();
        assert_eq!(retired.pictures, vec![0x900005]);
        assert_eq!(retired.damages, vec![0x900003]);
        assert_eq!(scene.paint_order().collect::<Vec<_>>(), vec![ROOT]);
        scene.assert_consistent();
    }
}
