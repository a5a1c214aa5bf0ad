//! Subscriber lists used for component-to-component notifications.
//!
//! Each channel carries one plain-data payload type. Handlers run in the order
//! they were registered.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

pub struct Channel<T> {
    name: &'static str,
    next_id: u64,
    subscribers: Vec<(SubscriberId, Box<dyn FnMut(&T)>)>,
}

impl<T> Channel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriberId
    where
        F: FnMut(&T) + 'static,
    {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    pub fn emit(&mut self, payload: &T) {
        for (_, handler) in self.subscribers.iter_mut() {
            handler(payload);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new("unnamed")
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_emit_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut channel: Channel<u32> = Channel::new("test");

        for tag in ["a", "b", "c"] {
            let log = log.clone();
            channel.subscribe(move |v: &u32| log.borrow_mut().push(format!("{}{}", tag, v)));
        }
        channel.emit(&1);

        assert_eq!(*log.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_target() {
        let hits = Rc::new(RefCell::new(0));
        let mut channel: Channel<()> = Channel::new("test");

        let h1 = hits.clone();
        let first = channel.subscribe(move |_| *h1.borrow_mut() += 1);
        let h2 = hits.clone();
        channel.subscribe(move |_| *h2.borrow_mut() += 10);

        assert!(channel.unsubscribe(first));
        assert!(!channel.unsubscribe(first));
        channel.emit(&());

        assert_eq!(*hits.borrow(), 10);
        assert_eq!(channel.len(), 1);
    }
}
