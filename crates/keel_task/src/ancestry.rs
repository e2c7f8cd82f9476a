//! Read-only walk over a branch's active frames, newest first.

use crate::frame::Frame;
use crate::trait_::Task;
use std::iter::{FusedIterator, Rev};
use std::slice::Iter;

/// Frames of one call stack from the current invocation back to the root
///
/// Lazy and finite. Clone it, or call
/// [`CallStack::traverse`](crate::CallStack::traverse) again, to walk twice.
#[derive(Clone)]
pub struct Ancestry<'a> {
    frames: Rev<Iter<'a, Frame>>,
}

impl<'a> Ancestry<'a> {
    pub(crate) fn new(frames: &'a [Frame]) -> Self {
        Self {
            frames: frames.iter().rev(),
        }
    }

    /// Skip the innermost frame (the caller's own invocation)
    #[must_use]
    pub fn ancestors(mut self) -> Self {
        self.frames.next();
        self
    }

    /// Tasks of a concrete type, newest first
    pub fn tasks_of<T: Task>(self) -> impl Iterator<Item = &'a T> + 'a {
        self.filter_map(Frame::downcast_task::<T>)
    }

    /// Human-readable chain for error messages
    #[must_use]
    pub fn describe(self) -> Vec<String> {
        self.map(ToString::to_string).collect()
    }
}

impl<'a> Iterator for Ancestry<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}

impl DoubleEndedIterator for Ancestry<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.frames.next_back()
    }
}

impl ExactSizeIterator for Ancestry<'_> {}

impl FusedIterator for Ancestry<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::project::Target;
    use crate::stack::{CallStack, StackOwner};
    use crate::trait_::TaskResult;
    use std::any::Any;
    use std::sync::Arc;

    struct Marker(&'static str);

    impl Task for Marker {
        fn name(&self) -> &str {
            self.0
        }

        fn execute(&self, _ctx: &mut ExecutionContext) -> TaskResult<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Other;

    impl Task for Other {
        fn name(&self) -> &str {
            "other"
        }

        fn execute(&self, _ctx: &mut ExecutionContext) -> TaskResult<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_newest_first_and_ancestors() {
        let mut stack = CallStack::new();
        let mut a = stack.enter(Frame::target(Arc::new(Target::new("root"))));
        let mut b = a.enter(Frame::task(Arc::new(Marker("outer"))));
        let c = b.enter(Frame::task(Arc::new(Other)));

        let all: Vec<&str> = c.traverse().map(Frame::name).collect();
        assert_eq!(all, vec!["other", "outer", "root"]);

        let above: Vec<&str> = c.traverse().ancestors().map(Frame::name).collect();
        assert_eq!(above, vec!["outer", "root"]);

        assert_eq!(c.traverse().len(), 3);
        assert_eq!(c.traverse().next_back().map(Frame::name), Some("root"));
    }

    #[test]
    fn test_tasks_of_type() {
        let mut stack = CallStack::new();
        let mut a = stack.enter(Frame::task(Arc::new(Marker("m1"))));
        let mut b = a.enter(Frame::task(Arc::new(Other)));
        let c = b.enter(Frame::task(Arc::new(Marker("m2"))));

        let markers: Vec<&str> = c.traverse().tasks_of::<Marker>().map(|m| m.0).collect();
        assert_eq!(markers, vec!["m2", "m1"]);
    }

    #[test]
    fn test_describe() {
        let mut stack = CallStack::new();
        let mut a = stack.enter(Frame::target(Arc::new(Target::new("build"))));
        let b = a.enter(Frame::task(Arc::new(Other)));
        assert_eq!(b.traverse().describe(), vec!["task <other>", "target 'build'"]);
    }

    #[test]
    fn test_ancestors_of_empty_stack() {
        let stack = CallStack::new();
        assert_eq!(stack.traverse().ancestors().count(), 0);
    }
}
