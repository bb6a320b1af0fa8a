//! Built-in plugin implementations

pub mod deny;
pub mod moderation;
pub mod pii;
pub mod quota;
pub mod regex;

pub use deny::DenyPlugin;
pub use moderation::{ModerationPlugin, ModerationVariant};
pub use pii::PiiPlugin;
pub use quota::QuotaPlugin;
pub use regex::RegexPlugin;
