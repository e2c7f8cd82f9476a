//! Per-branch call stack.
//!
//! Each execution branch owns exactly one [`CallStack`]. Frames are pushed
//! through [`StackOwner::enter`], which hands back a [`FrameGuard`]; dropping
//! the guard pops the frame. The guard mutably borrows its owner and is the
//! only way to reach the owner while it lives, so a nested `enter` has to go
//! through the outer guard and the borrow checker enforces LIFO release.
//!
//! Forking copies the frame vector; frames share their payload through `Arc`.
//! The fork is handed to the new branch by value, so parent and child never
//! alias.

use crate::ancestry::Ancestry;
use crate::frame::Frame;
use keel_core::BranchId;
use std::ops::{Deref, DerefMut};

/// Ordered record of the invocations active on one branch
#[derive(Debug)]
pub struct CallStack {
    /// Owning branch
    branch: BranchId,
    /// Branch this one was forked from
    parent: Option<BranchId>,
    /// Active frames, oldest first
    frames: Vec<Frame>,
}

impl CallStack {
    /// Create an empty stack for a root branch
    #[must_use]
    pub fn new() -> Self {
        Self {
            branch: BranchId::new(),
            parent: None,
            frames: Vec::new(),
        }
    }

    /// Owning branch
    #[must_use]
    pub const fn branch(&self) -> BranchId {
        self.branch
    }

    /// Branch this stack was forked from, if any
    #[must_use]
    pub const fn parent_branch(&self) -> Option<BranchId> {
        self.parent
    }

    /// The currently active invocation, or `None` on an empty stack
    #[must_use]
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Number of active frames
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no invocation is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from newest to oldest
    #[must_use]
    pub fn traverse(&self) -> Ancestry<'_> {
        Ancestry::new(&self.frames)
    }

    /// Independent copy for a new branch
    ///
    /// The copy has the same frames in the same order, a fresh branch id,
    /// and records this branch as its parent.
    #[must_use]
    pub fn fork(&self) -> Self {
        let forked = Self {
            branch: BranchId::new(),
            parent: Some(self.branch),
            frames: self.frames.clone(),
        };
        tracing::trace!(
            parent = %self.branch,
            child = %forked.branch,
            depth = forked.frames.len(),
            "forked call stack"
        );
        forked
    }

    fn push(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len()
    }

    fn pop(&mut self) -> Frame {
        match self.frames.pop() {
            Some(frame) => frame,
            None => panic!("pop from an empty call stack on {}", self.branch),
        }
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) mod sealed {
    use super::CallStack;

    /// Proof of being inside this crate
    #[derive(Debug, Clone, Copy)]
    pub struct Token(pub(crate) ());

    /// Mutable access to an owned stack, reachable only inside this crate
    pub trait StackAccess {
        /// The owned stack, mutably
        fn call_stack_mut(&mut self, token: Token) -> &mut CallStack;
    }
}

use sealed::{StackAccess, Token};

/// Anything that owns a branch's call stack
///
/// Frames are pushed and popped only through [`enter`](StackOwner::enter)
/// and [`within`](StackOwner::within). The mutable accessor is private to
/// this crate:
///
/// ```compile_fail
/// use keel_task::{CallStack, StackOwner};
///
/// fn swap_out<O: StackOwner>(owner: &mut O) -> CallStack {
///     std::mem::replace(owner.call_stack_mut(), CallStack::new())
/// }
/// ```
pub trait StackOwner: StackAccess {
    /// The owned stack
    fn call_stack(&self) -> &CallStack;

    /// Push `frame`; it is popped when the returned guard is dropped
    fn enter(&mut self, frame: Frame) -> FrameGuard<'_, Self>
    where
        Self: Sized,
    {
        FrameGuard::new(self, frame)
    }

    /// Run `f` with `frame` pushed, popping it afterwards on every path
    fn within<R>(&mut self, frame: Frame, f: impl FnOnce(&mut Self) -> R) -> R
    where
        Self: Sized,
    {
        let mut guard = self.enter(frame);
        f(&mut *guard)
    }
}

impl StackOwner for CallStack {
    fn call_stack(&self) -> &CallStack {
        self
    }
}

impl StackAccess for CallStack {
    fn call_stack_mut(&mut self, _token: Token) -> &mut CallStack {
        self
    }
}

/// Scoped handle for one pushed frame
///
/// Dereferences to the owner. Dropping it pops the frame, including during
/// unwinding. A guard only pops from the stack it pushed to: if the owner's
/// stack was replaced wholesale in the meantime, nothing is popped.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard<'a, O: StackOwner> {
    owner: &'a mut O,
    branch: BranchId,
    depth: usize,
}

impl<'a, O: StackOwner> FrameGuard<'a, O> {
    fn new(owner: &'a mut O, frame: Frame) -> Self {
        let stack = owner.call_stack_mut(Token(()));
        let branch = stack.branch();
        let depth = stack.push(frame);
        Self {
            owner,
            branch,
            depth,
        }
    }

    /// Stack depth including this guard's frame
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }
}

impl<O: StackOwner> Deref for FrameGuard<'_, O> {
    type Target = O;

    fn deref(&self) -> &O {
        self.owner
    }
}

impl<O: StackOwner> DerefMut for FrameGuard<'_, O> {
    fn deref_mut(&mut self) -> &mut O {
        self.owner
    }
}

impl<O: StackOwner> Drop for FrameGuard<'_, O> {
    fn drop(&mut self) {
        let stack = self.owner.call_stack_mut(Token(()));
        if stack.branch() != self.branch || stack.depth() != self.depth {
            tracing::error!(
                pushed_on = %self.branch,
                pushed_depth = self.depth,
                branch = %stack.branch(),
                depth = stack.depth(),
                "call stack replaced while a frame was active; frame not popped"
            );
            return;
        }
        drop(stack.pop());
    }
}
