//! The content plugin trait and its surrounding types

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use mcpgate_protocol::{Content, ContentType, Direction, RequestEnvelope};

use crate::descriptor::PluginType;
use crate::error::PluginResult as PluginOpResult;
use crate::result::PluginResult;

/// What a plugin instance declares about itself
///
/// The manager consults this before invoking: a plugin whose capabilities
/// exclude the current direction or content type is skipped without cost.
#[derive(Debug, Clone)]
pub struct PluginCapabilities {
    /// Directions the plugin participates in
    pub directions: HashSet<Direction>,
    /// Content types the plugin inspects
    pub content_types: HashSet<ContentType>,
    /// Whether the plugin may return modified content
    pub modifies: bool,
    /// Whether the plugin may block
    pub blocks: bool,
    /// Whether applications reach an external service (raises the timeout)
    pub external: bool,
}

impl PluginCapabilities {
    /// Capabilities covering all directions and the JSON/text content types
    pub fn all_directions() -> Self {
        Self {
            directions: HashSet::from([
                Direction::Inbound,
                Direction::PreTool,
                Direction::PostTool,
                Direction::Outbound,
            ]),
            content_types: HashSet::from([ContentType::Json, ContentType::Text]),
            modifies: false,
            blocks: false,
            external: false,
        }
    }

    /// Restrict to specific directions
    pub fn with_directions(mut self, directions: impl IntoIterator<Item = Direction>) -> Self {
        self.directions = directions.into_iter().collect();
        self
    }

    /// Declare that the plugin may modify content
    pub fn modifying(mut self) -> Self {
        self.modifies = true;
        self
    }

    /// Declare that the plugin may block
    pub fn blocking(mut self) -> Self {
        self.blocks = true;
        self
    }

    /// Declare that the plugin calls out to an external service
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    /// Whether this plugin applies at a direction and content type
    pub fn supports(&self, direction: Direction, content_type: ContentType) -> bool {
        self.directions.contains(&direction) && self.content_types.contains(&content_type)
    }
}

/// Per-application context handed to plugins
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Tenant the request belongs to
    pub tenant_id: String,
    /// Authenticated user, when known
    pub user_id: Option<String>,
    /// Session the request arrived on, when one exists
    pub session_id: Option<String>,
    /// Remaining budget for this application
    pub deadline: Duration,
}

impl PluginContext {
    /// Context for a tenant with the default deadline
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            session_id: None,
            deadline: Duration::from_secs(30),
        }
    }

    /// Attach the user id
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Result of one application: the verdict plus optionally modified content
pub type PluginApplication = (PluginResult, Option<Content>);

/// A content inspection plugin
///
/// Instances are constructed once from a descriptor, are read-mostly
/// afterwards, and are exclusively owned by the manager that built them.
/// `apply` must be cancel-safe: the manager races it against a timeout.
#[async_trait]
pub trait ContentPlugin: Send + Sync {
    /// Plugin name (unique within the tenant)
    fn name(&self) -> &str;

    /// The enumerated type this instance was built from
    fn plugin_type(&self) -> PluginType;

    /// Declared capabilities
    fn capabilities(&self) -> &PluginCapabilities;

    /// Inspect (and possibly transform) one piece of content
    ///
    /// Returning `Some(content)` substitutes the content for the rest of the
    /// chain; the result's `modified` flag must be set alongside it.
    async fn apply(
        &self,
        cx: &PluginContext,
        envelope: &RequestEnvelope,
        content: &Content,
    ) -> PluginOpResult<PluginApplication>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_filtering() {
        let caps = PluginCapabilities::all_directions()
            .with_directions([Direction::Inbound, Direction::PreTool]);
        assert!(caps.supports(Direction::Inbound, ContentType::Json));
        assert!(!caps.supports(Direction::Outbound, ContentType::Json));
        assert!(!caps.supports(Direction::Inbound, ContentType::Binary));
    }
}
