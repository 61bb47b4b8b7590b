//! The client's desired topic set.
//!
//! One authoritative set is mutated by the conversation-list load, by live
//! `FriendRequestAccepted` events, and by views opening and closing. Every
//! mutation returns the [`Delta`] to send over the event stream.

use std::collections::{BTreeMap, HashMap, HashSet};

use parley_shared::protocol::ClientFrame;
use parley_shared::{ProfileId, Topic};

/// Topics to add and remove after a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub subscribe: Vec<Topic>,
    pub unsubscribe: Vec<Topic>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Frames to send, unsubscribes first.
    pub fn frames(&self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        if !self.unsubscribe.is_empty() {
            frames.push(ClientFrame::Unsubscribe {
                topics: self.unsubscribe.clone(),
            });
        }
        if !self.subscribe.is_empty() {
            frames.push(ClientFrame::Subscribe {
                topics: self.subscribe.clone(),
            });
        }
        frames
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    profile: Option<ProfileId>,
    /// Conversation topics kept for the DM sidebar.
    conversations: HashSet<Topic>,
    /// Open views, refcounted.
    views: HashMap<Topic, usize>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every topic the event stream should carry right now.
    pub fn desired(&self) -> HashSet<Topic> {
        self.profile
            .map(Topic::Profile)
            .into_iter()
            .chain(self.conversations.iter().copied())
            .chain(self.views.keys().copied())
            .collect()
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.desired().contains(&topic)
    }

    /// The signed-in profile's own inbox topic.
    pub fn set_profile(&mut self, profile: ProfileId) -> Delta {
        self.mutate(|s| s.profile = Some(profile))
    }

    /// Replace the conversation set with a freshly loaded list.
    pub fn load_conversations(&mut self, topics: impl IntoIterator<Item = Topic>) -> Delta {
        let topics: HashSet<Topic> = topics.into_iter().collect();
        self.mutate(|s| s.conversations = topics)
    }

    /// A conversation created while connected.
    pub fn add_conversation(&mut self, topic: Topic) -> Delta {
        self.mutate(|s| {
            s.conversations.insert(topic);
        })
    }

    pub fn open_view(&mut self, topic: Topic) -> Delta {
        self.mutate(|s| *s.views.entry(topic).or_insert(0) += 1)
    }

    /// Close one view of `topic`. The last close drops the topic unless
    /// something else still wants it.
    pub fn close_view(&mut self, topic: Topic) -> Delta {
        self.mutate(|s| {
            if let Some(count) = s.views.get_mut(&topic) {
                *count -= 1;
                if *count == 0 {
                    s.views.remove(&topic);
                }
            }
        })
    }

    /// Diff an externally computed topic set against the current one and
    /// adopt it as the set of open views.
    pub fn reconcile(&mut self, desired: HashSet<Topic>) -> Delta {
        self.mutate(|s| {
            s.views.retain(|topic, _| desired.contains(topic));
            for topic in &desired {
                if !s.conversations.contains(topic) && s.profile.map(Topic::Profile) != Some(*topic) {
                    s.views.entry(*topic).or_insert(1);
                }
            }
        })
    }

    fn mutate(&mut self, f: impl FnOnce(&mut Self)) -> Delta {
        let before = self.desired();
        f(self);
        diff(&before, &self.desired())
    }
}

fn diff(before: &HashSet<Topic>, after: &HashSet<Topic>) -> Delta {
    Delta {
        subscribe: sorted(after.difference(before)),
        unsubscribe: sorted(before.difference(after)),
    }
}

/// Sorted by text form so frames are deterministic.
fn sorted<'a>(topics: impl Iterator<Item = &'a Topic>) -> Vec<Topic> {
    topics
        .map(|t| (t.to_string(), *t))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}
