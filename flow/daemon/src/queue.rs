//! Flow storage and the eviction queue
//!
//! Flows live in a [`FlowArena`] and are addressed by generational
//! [`FlowHandle`]s. The [`EvictionQueue`] is intrusive: its links are stored
//! in the arena nodes next to each flow, and the queue itself only keeps
//! head, tail and length. It never owns a flow.
//!
//! Every operation here is O(1). Misuse (stale handles, removing a node that
//! is not queued, destroying a queued flow) means the table's bookkeeping is
//! corrupt, so it panics instead of returning an error.

use crate::flow::Flow;

/// Stable reference to a flow in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Links {
    prev: Option<FlowHandle>,
    next: Option<FlowHandle>,
    queued: bool,
}

#[derive(Debug)]
struct Node {
    flow: Flow,
    links: Links,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Dense storage for live flows
#[derive(Debug, Default)]
pub struct FlowArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl FlowArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a flow and return its handle
    pub fn insert(&mut self, flow: Flow) -> FlowHandle {
        let node = Node {
            flow,
            links: Links::default(),
        };
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return FlowHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| panic!("flow arena exceeded u32::MAX slots"));
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        FlowHandle {
            index,
            generation: 0,
        }
    }

    /// Destroy a flow and hand it back
    ///
    /// # Panics
    ///
    /// If the handle is stale or the flow is still linked into a queue.
    pub fn remove(&mut self, handle: FlowHandle) -> Flow {
        let slot = self.slot_mut(handle);
        let queued = slot.node.as_ref().is_some_and(|n| n.links.queued);
        assert!(!queued, "flow {:?} destroyed while still in the eviction queue", handle);

        let node = slot
            .node
            .take()
            .unwrap_or_else(|| panic!("flow {:?} destroyed twice", handle));
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        node.flow
    }

    /// Look up a flow, `None` if the handle is stale
    pub fn get(&self, handle: FlowHandle) -> Option<&Flow> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
            .map(|node| &node.flow)
    }

    /// Flow behind a handle that must be live
    ///
    /// # Panics
    ///
    /// If the handle is stale.
    pub fn flow(&self, handle: FlowHandle) -> &Flow {
        &self.node(handle).flow
    }

    /// Mutable flow behind a handle that must be live
    pub fn flow_mut(&mut self, handle: FlowHandle) -> &mut Flow {
        &mut self.node_mut(handle).flow
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot_mut(&mut self, handle: FlowHandle) -> &mut Slot {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => slot,
            _ => panic!("stale flow handle {:?}", handle),
        }
    }

    fn node(&self, handle: FlowHandle) -> &Node {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
            .unwrap_or_else(|| panic!("stale flow handle {:?}", handle))
    }

    fn node_mut(&mut self, handle: FlowHandle) -> &mut Node {
        self.slot_mut(handle)
            .node
            .as_mut()
            .unwrap_or_else(|| panic!("stale flow handle {:?}", handle))
    }

    fn links_mut(&mut self, handle: FlowHandle) -> &mut Links {
        &mut self.node_mut(handle).links
    }
}

/// Doubly linked ordering of live flows, least recently active first
#[derive(Debug, Default)]
pub struct EvictionQueue {
    head: Option<FlowHandle>,
    tail: Option<FlowHandle>,
    len: usize,
}

impl EvictionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<FlowHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<FlowHandle> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Link a flow at the tail
    ///
    /// # Panics
    ///
    /// If the flow is already queued.
    pub fn append(&mut self, arena: &mut FlowArena, handle: FlowHandle) {
        let old_tail = self.tail;
        {
            let links = arena.links_mut(handle);
            assert!(!links.queued, "flow {:?} appended twice to the eviction queue", handle);
            links.prev = old_tail;
            links.next = None;
            links.queued = true;
        }

        match old_tail {
            Some(tail) => arena.links_mut(tail).next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.len += 1;
    }

    /// Unlink a flow from wherever it sits
    ///
    /// # Panics
    ///
    /// If the flow is not queued.
    pub fn remove(&mut self, arena: &mut FlowArena, handle: FlowHandle) {
        let links = *arena.links_mut(handle);
        assert!(links.queued, "flow {:?} removed but not in the eviction queue", handle);

        match links.prev {
            Some(prev) => arena.links_mut(prev).next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => arena.links_mut(next).prev = links.prev,
            None => self.tail = links.prev,
        }

        *arena.links_mut(handle) = Links::default();
        self.len -= 1;
    }

    /// Move a queued flow to the tail
    pub fn move_to_tail(&mut self, arena: &mut FlowArena, handle: FlowHandle) {
        if self.tail == Some(handle) {
            assert!(
                arena.links_mut(handle).queued,
                "flow {:?} moved but not in the eviction queue",
                handle
            );
            return;
        }
        self.remove(arena, handle);
        self.append(arena, handle);
    }

    /// Walk the queue from head to tail
    pub fn iter<'a>(&self, arena: &'a FlowArena) -> QueueIter<'a> {
        QueueIter {
            arena,
            cursor: self.head,
            remaining: self.len,
        }
    }
}

/// Head-to-tail iterator over queued flows
pub struct QueueIter<'a> {
    arena: &'a FlowArena,
    cursor: Option<FlowHandle>,
    remaining: usize,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = (FlowHandle, &'a Flow);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.cursor?;
        let node = self.arena.node(handle);
        self.cursor = node.links.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((handle, &node.flow))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
