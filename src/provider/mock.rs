use super::{PlatformSource, ProviderStatus};
use crate::config::LocationProviderOptions;
use crate::types::{HeadingReading, LocationReading};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug)]
struct FeedState {
    locations: VecDeque<LocationReading>,
    headings: VecDeque<HeadingReading>,
    last_location: Option<LocationReading>,
    last_heading: Option<HeadingReading>,
    start_result: ProviderStatus,
    initializing_polls: u32,
    requested: bool,
    status: ProviderStatus,
}

/// Test/demo handle for scripting a [`MockSource`] after it has been boxed into a provider.
#[derive(Clone, Debug)]
pub struct MockFeed(Rc<RefCell<FeedState>>);

impl MockFeed {
    pub fn push_location(&self, reading: LocationReading) {
        self.0.borrow_mut().locations.push_back(reading);
    }

    pub fn push_heading(&self, reading: HeadingReading) {
        self.0.borrow_mut().headings.push_back(reading);
    }

    /// Status reported once initialization polls are used up
    pub fn set_start_result(&self, status: ProviderStatus) {
        self.0.borrow_mut().start_result = status;
    }

    /// Number of polls that report `Initializing` before the start result
    pub fn set_initializing_polls(&self, polls: u32) {
        self.0.borrow_mut().initializing_polls = polls;
    }

    pub fn pending_locations(&self) -> usize {
        self.0.borrow().locations.len()
    }
}

/// Scripted platform source.
///
/// Queued readings are consumed one per read; once the queue is empty the last
/// reading is repeated, as a real platform keeps reporting its last fix.
pub struct MockSource {
    feed: MockFeed,
}

impl MockSource {
    pub fn new() -> (Self, MockFeed) {
        let feed = MockFeed(Rc::new(RefCell::new(FeedState {
            locations: VecDeque::new(),
            headings: VecDeque::new(),
            last_location: None,
            last_heading: None,
            start_result: ProviderStatus::Started,
            initializing_polls: 0,
            requested: false,
            status: ProviderStatus::Idle,
        })));
        (MockSource { feed: feed.clone() }, feed)
    }
}

impl PlatformSource for MockSource {
    fn name(&self) -> &str {
        "MockSource"
    }

    fn is_compass_enabled(&self) -> bool {
        true
    }

    fn request_updates(&mut self, _options: &LocationProviderOptions) {
        let mut s = self.feed.0.borrow_mut();
        s.requested = true;
        s.status = ProviderStatus::Initializing;
    }

    fn poll_status(&mut self) -> ProviderStatus {
        let mut s = self.feed.0.borrow_mut();
        if s.requested && s.status == ProviderStatus::Initializing {
            if s.initializing_polls > 0 {
                s.initializing_polls -= 1;
            } else {
                s.status = s.start_result;
            }
        }
        s.status
    }

    fn read_location(&mut self) -> Option<LocationReading> {
        let mut s = self.feed.0.borrow_mut();
        if let Some(next) = s.locations.pop_front() {
            s.last_location = Some(next);
        }
        s.last_location
    }

    fn read_heading(&mut self) -> Option<HeadingReading> {
        let mut s = self.feed.0.borrow_mut();
        if let Some(next) = s.headings.pop_front() {
            s.last_heading = Some(next);
        }
        s.last_heading
    }
}
