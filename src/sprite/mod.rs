//! The sprite/clone object model: templates, instances, and the
//! global render-order list.

pub mod abstract_sprite;
pub mod instance;
pub mod transform;

pub use abstract_sprite::{AbstractSprite, CostumeInfo, SoundInfo};
pub use instance::{GlideInfo, Sprite, VoiceSlot, BASE_INSTANCE_ID, UNALLOCATED_INSTANCE_ID};
pub use transform::{Aabb, RotationStyle, Transform2D, Vec2};

use crate::error::VmPanic;
use crate::limits::MAX_INSTANCES;

/// Identifies one sprite instance system-wide: which `AbstractSprite`
/// (by sprite-table index) and which instance slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpriteHandle {
    pub sprite: u32,
    pub instance: u32,
}

impl SpriteHandle {
    pub const fn new(sprite: u32, instance: u32) -> Self {
        SpriteHandle { sprite, instance }
    }
}

/// Intrusive doubly linked render order across every `AbstractSprite`'s
/// instances: head = back layer, tail = front layer.
///
/// The reference engine threads `_next`/`_prev` pointers through the
/// `Sprite` struct itself; here the same links are stored as
/// `Option<SpriteHandle>` fields on `Sprite` (see `instance.rs`), so
/// the list below only tracks the head/tail/count and delegates link
/// mutation to the owning `AbstractSprite` pools via the accessor
/// closures passed to each operation.
pub struct SpriteList {
    head: Option<SpriteHandle>,
    tail: Option<SpriteHandle>,
    count: usize,
}

impl Default for SpriteList {
    fn default() -> Self {
        SpriteList { head: None, tail: None, count: 0 }
    }
}

/// Read/write access to a sprite's link fields, supplied by the caller
/// so `SpriteList` does not need to know how sprites are stored.
pub trait SpriteLinks {
    fn next(&self, h: SpriteHandle) -> Option<SpriteHandle>;
    fn prev(&self, h: SpriteHandle) -> Option<SpriteHandle>;
    fn set_next(&mut self, h: SpriteHandle, v: Option<SpriteHandle>);
    fn set_prev(&mut self, h: SpriteHandle, v: Option<SpriteHandle>);
}

impl SpriteList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<SpriteHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<SpriteHandle> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends to the tail (frontmost layer).
    pub fn add(
        &mut self,
        links: &mut impl SpriteLinks,
        sprite: SpriteHandle,
        abstract_sprite: &str,
    ) -> Result<(), VmPanic> {
        if self.count >= MAX_INSTANCES {
            return Err(VmPanic::TooManySprites {
                abstract_sprite: abstract_sprite.to_string(),
                capacity: MAX_INSTANCES,
            });
        }
        match self.tail {
            None => {
                self.head = Some(sprite);
                self.tail = Some(sprite);
            }
            Some(tail) => {
                links.set_next(tail, Some(sprite));
                links.set_prev(sprite, Some(tail));
                if self.head == self.tail {
                    links.set_next(tail, Some(sprite));
                }
                self.tail = Some(sprite);
            }
        }
        self.count += 1;
        Ok(())
    }

    pub fn remove(&mut self, links: &mut impl SpriteLinks, sprite: SpriteHandle) {
        if Some(sprite) == self.head {
            self.head = links.next(sprite);
        }
        if Some(sprite) == self.tail {
            self.tail = links.prev(sprite);
        }
        if let Some(prev) = links.prev(sprite) {
            links.set_next(prev, links.next(sprite));
        }
        if let Some(next) = links.next(sprite) {
            links.set_prev(next, links.prev(sprite));
        }
        links.set_next(sprite, None);
        links.set_prev(sprite, None);
        self.count -= 1;
    }

    /// Inserts `sprite` immediately after `before`, or at the head if
    /// `before` is `None`. A no-op if `before == Some(sprite)`.
    pub fn insert(
        &mut self,
        links: &mut impl SpriteLinks,
        before: Option<SpriteHandle>,
        sprite: SpriteHandle,
        abstract_sprite: &str,
    ) -> Result<(), VmPanic> {
        if before == Some(sprite) {
            return Ok(());
        }

        if links.next(sprite).is_some() || links.prev(sprite).is_some() {
            self.remove(links, sprite);
        } else if self.count >= MAX_INSTANCES {
            return Err(VmPanic::TooManySprites {
                abstract_sprite: abstract_sprite.to_string(),
                capacity: MAX_INSTANCES,
            });
        }

        match before {
            Some(before) => {
                let after = links.next(before);
                links.set_next(sprite, after);
                links.set_prev(sprite, Some(before));
                match after {
                    Some(after) => links.set_prev(after, Some(sprite)),
                    None => self.tail = Some(sprite),
                }
                links.set_next(before, Some(sprite));
            }
            None => {
                match self.head {
                    Some(head) => {
                        links.set_prev(head, Some(sprite));
                        links.set_next(sprite, Some(head));
                    }
                    None => self.tail = Some(sprite),
                }
                self.head = Some(sprite);
            }
        }

        self.count += 1;
        Ok(())
    }

    /// Moves `sprite` `distance` layers toward the tail (positive) or
    /// head (negative), clamped to the list ends; the head (pinned
    /// stage) is never moved.
    pub fn move_by(&mut self, links: &mut impl SpriteLinks, sprite: SpriteHandle, distance: i64) {
        if distance == 0 || Some(sprite) == self.head {
            return;
        }

        if distance > 0 {
            let mut before = links.prev(sprite);
            self.remove(links, sprite);
            for _ in 0..distance {
                if before == self.tail {
                    break;
                }
                before = before.and_then(|b| links.next(b));
            }
            let _ = self.insert(links, before, sprite, "sprite");
        } else {
            let mut after = links.next(sprite);
            self.remove(links, sprite);
            let distance = -distance;
            let head_next = self.head.and_then(|h| links.next(h));
            for _ in 0..distance {
                if after == head_next {
                    break;
                }
                after = after.and_then(|a| links.prev(a));
            }
            let before = after.and_then(|a| links.prev(a));
            let _ = self.insert(links, before, sprite, "sprite");
        }
    }

    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeLinks {
        next: HashMap<SpriteHandle, SpriteHandle>,
        prev: HashMap<SpriteHandle, SpriteHandle>,
    }

    impl SpriteLinks for FakeLinks {
        fn next(&self, h: SpriteHandle) -> Option<SpriteHandle> {
            self.next.get(&h).copied()
        }
        fn prev(&self, h: SpriteHandle) -> Option<SpriteHandle> {
            self.prev.get(&h).copied()
        }
        fn set_next(&mut self, h: SpriteHandle, v: Option<SpriteHandle>) {
            match v {
                Some(v) => self.next.insert(h, v),
                None => self.next.remove(&h),
            };
        }
        fn set_prev(&mut self, h: SpriteHandle, v: Option<SpriteHandle>) {
            match v {
                Some(v) => self.prev.insert(h, v),
                None => self.prev.remove(&h),
            };
        }
    }

    fn h(i: u32) -> SpriteHandle {
        SpriteHandle::new(0, i)
    }

    #[test]
    fn add_appends_to_tail() {
        let mut list = SpriteList::new();
        let mut links = FakeLinks::default();
        list.add(&mut links, h(1), "a").unwrap();
        list.add(&mut links, h(2), "a").unwrap();
        list.add(&mut links, h(3), "a").unwrap();
        assert_eq!(list.head(), Some(h(1)));
        assert_eq!(list.tail(), Some(h(3)));
        assert_eq!(links.next(h(1)), Some(h(2)));
        assert_eq!(links.next(h(2)), Some(h(3)));
        assert_eq!(links.prev(h(3)), Some(h(2)));
    }

    #[test]
    fn clone_inserts_one_layer_behind_template() {
        let mut list = SpriteList::new();
        let mut links = FakeLinks::default();
        list.add(&mut links, h(1), "a").unwrap();
        list.add(&mut links, h(2), "a").unwrap();
        // insert clone of 2 before 2's prev (i.e. behind it)
        let before = links.prev(h(2));
        list.insert(&mut links, before, h(3), "a").unwrap();
        assert_eq!(links.next(h(1)), Some(h(3)));
        assert_eq!(links.next(h(3)), Some(h(2)));
    }

    #[test]
    fn move_never_moves_the_head() {
        let mut list = SpriteList::new();
        let mut links = FakeLinks::default();
        list.add(&mut links, h(1), "a").unwrap();
        list.add(&mut links, h(2), "a").unwrap();
        list.move_by(&mut links, h(1), 5);
        assert_eq!(list.head(), Some(h(1)));
    }

    #[test]
    fn move_forward_is_clamped_to_the_tail() {
        let mut list = SpriteList::new();
        let mut links = FakeLinks::default();
        for i in 1..=4u32 {
            list.add(&mut links, h(i), "a").unwrap();
        }
        list.move_by(&mut links, h(2), 100);
        assert_eq!(list.tail(), Some(h(2)));
    }
}
