//! Topic to device routing table.

use std::collections::HashMap;

use math_diff_core::DeviceId;
use uuid::Uuid;

/// Identifier of one link of a device. A relinked device gets a new one.
pub type LinkId = Uuid;

/// Where a message on a topic should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Target device.
    pub device_id: DeviceId,
    /// Link the subscription was made under.
    pub link: LinkId,
    /// Subscription tag echoed back to the device.
    pub tag: usize,
}

/// Maps broker topics to the device subscriptions interested in them.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, Vec<Route>>,
}

impl RouteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Returns true if the topic had no routes before.
    pub fn insert(&mut self, topic: &str, route: Route) -> bool {
        let entry = self.routes.entry(topic.to_string()).or_default();
        let first = entry.is_empty();
        entry.push(route);
        first
    }

    /// Routes registered for a topic.
    #[must_use]
    pub fn lookup(&self, topic: &str) -> &[Route] {
        self.routes.get(topic).map_or(&[], Vec::as_slice)
    }

    /// Remove every route made under `link`.
    ///
    /// Returns the topics left with no routes at all.
    pub fn remove_link(&mut self, link: LinkId) -> Vec<String> {
        let mut orphaned = Vec::new();
        self.routes.retain(|topic, routes| {
            routes.retain(|r| r.link != link);
            if routes.is_empty() {
                orphaned.push(topic.clone());
            }
            !routes.is_empty()
        });
        orphaned.sort();
        orphaned
    }

    /// All topics with at least one route.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Whether the table has no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(device: &str, link: LinkId, tag: usize) -> Route {
        Route {
            device_id: device.to_string(),
            link,
            tag,
        }
    }

    #[test]
    fn test_insert_reports_first_route() {
        let mut table = RouteTable::new();
        let link = Uuid::new_v4();

        assert!(table.insert("t/a", route("d1", link, 0)));
        assert!(!table.insert("t/a", route("d1", link, 1)));
        assert_eq!(table.lookup("t/a").len(), 2);
        assert!(table.lookup("t/missing").is_empty());
    }

    #[test]
    fn test_remove_link_keeps_shared_topics() {
        let mut table = RouteTable::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        table.insert("t/a", route("d1", first, 0));
        table.insert("t/b", route("d1", first, 1));
        table.insert("t/b", route("d2", second, 0));

        assert_eq!(table.remove_link(first), vec!["t/a".to_string()]);
        assert_eq!(table.topics(), vec!["t/b".to_string()]);
        assert_eq!(table.lookup("t/b"), &[route("d2", second, 0)]);

        assert_eq!(table.remove_link(second), vec!["t/b".to_string()]);
        assert!(table.is_empty());
    }
}
