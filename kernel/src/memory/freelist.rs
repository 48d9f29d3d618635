use core::ptr::NonNull;

/// An intrusive singly linked list threaded through free memory.
///
/// Each free element stores the link to the next one in its own first bytes,
/// so the list needs no storage of its own.
#[derive(Clone, Copy, Debug)]
pub struct FreeList {
    pub head: Option<NonNull<Node>>,
    pub len: usize,
}

unsafe impl Send for FreeList {}

impl FreeList {
    /// Creates a new empty free list.
    pub const fn new() -> Self {
        FreeList { head: None, len: 0 }
    }

    /// Pushes an element onto the free list.
    ///
    /// # Safety
    /// `ptr` must be writable for a [`Node`], suitably aligned, and not be
    /// referenced by anything else while it sits on the list.
    pub unsafe fn push(&mut self, ptr: NonNull<()>) {
        let node = ptr.cast::<Node>();
        unsafe {
            node.write(Node { next: self.head });
        }
        self.head = Some(node);
        self.len += 1;
    }

    /// Pops an element from the free list.
    pub fn pop(&mut self) -> Option<NonNull<()>> {
        let node = self.head?;
        self.head = unsafe { node.as_ref().next };
        self.len -= 1;
        Some(node.cast())
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

/// A node in the linked list of free elements.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub next: Option<NonNull<Node>>,
}

unsafe impl Send for Node {}
