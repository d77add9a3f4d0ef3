//! Host-initiated notifications, routed by action and resource pattern.

use super::{HostAction, ResourcePath};
use crate::events::{Event, EventBus, ListenerId};
use crate::{Error, ErrorContext, Result};
use serde_json::Value;

/// A notification pushed by the host application.
#[derive(Debug, Clone, PartialEq)]
pub struct HostNotification {
    pub action: HostAction,
    pub resource: ResourcePath,
    pub values: Option<Value>,
}

impl Event for HostNotification {
    type Kind = HostAction;

    fn kind(&self) -> HostAction {
        self.action
    }
}

/// `on(actionSpec, resourceSpec, handler)` over an [`EventBus`].
#[derive(Default)]
pub struct NotificationRouter {
    bus: EventBus<HostNotification>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for notifications matching both specs. Either spec
    /// may be `*`; resource specs may use `*` per kind or selector.
    pub fn on<F>(&self, action_spec: &str, resource_spec: &str, handler: F) -> Result<ListenerId>
    where
        F: Fn(&HostNotification) + Send + Sync + 'static,
    {
        let pattern: ResourcePath = resource_spec.parse().map_err(|e| {
            Error::configuration_with_context(
                format!("{}", e),
                ErrorContext::new()
                    .with_field_path("resource_spec")
                    .with_source("notification_router"),
            )
        })?;
        let listener = move |n: &HostNotification| {
            if n.resource.matches(&pattern) {
                handler(n);
            }
        };
        if action_spec.trim() == "*" {
            return Ok(self.bus.subscribe_all(listener));
        }
        let action: HostAction = action_spec.parse().map_err(|_| {
            Error::configuration_with_context(
                format!("unknown host action '{}'", action_spec),
                ErrorContext::new()
                    .with_field_path("action_spec")
                    .with_source("notification_router"),
            )
        })?;
        Ok(self.bus.subscribe(action, listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Deliver a notification; returns how many registrations saw it
    /// (including ones whose resource pattern then filtered it out).
    pub fn dispatch(&self, notification: &HostNotification) -> usize {
        tracing::debug!(
            action = %notification.action,
            resource = %notification.resource,
            "host notification"
        );
        self.bus.emit(notification)
    }

    pub fn handler_count(&self) -> usize {
        self.bus.listener_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn notice(action: HostAction, resource: &str) -> HostNotification {
        HostNotification {
            action,
            resource: resource.parse().unwrap(),
            values: None,
        }
    }

    #[test]
    fn routes_by_action_and_resource() {
        let router = NotificationRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        router
            .on("notify", "dataContextChangeNotice[*]", move |n| {
                s.lock().unwrap().push(format!("ctx:{}", n.resource))
            })
            .unwrap();
        let s = seen.clone();
        router
            .on("*", "*", move |n| s.lock().unwrap().push(format!("all:{}", n.action)))
            .unwrap();

        router.dispatch(&notice(HostAction::Notify, "dataContextChangeNotice[Mammals]"));
        router.dispatch(&notice(HostAction::Update, "component[graph]"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "ctx:dataContextChangeNotice[Mammals]".to_string(),
                "all:notify".to_string(),
                "all:update".to_string(),
            ]
        );
    }

    #[test]
    fn off_removes_handler() {
        let router = NotificationRouter::new();
        let id = router.on("get", "*", |_| {}).unwrap();
        assert_eq!(router.handler_count(), 1);
        assert!(router.off(id));
        assert_eq!(router.handler_count(), 0);
    }

    #[test]
    fn rejects_bad_specs() {
        let router = NotificationRouter::new();
        assert!(router.on("explode", "*", |_| {}).is_err());
        assert!(router.on("get", "dataContext[", |_| {}).is_err());
    }
}
