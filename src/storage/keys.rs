//! Keys of the `kv` table

/// Map of conversation id to conversation
pub const CONVERSATIONS: &str = "conversations";
/// Id of the conversation `chat` appends to
pub const CURRENT_CONVERSATION_ID: &str = "currentConversationId";
/// Whether the Terms of Service were accepted
pub const TOS_ACCEPTED: &str = "tosAccepted";
/// `light` or `dark`
pub const THEME: &str = "theme";
/// Sidebar collapsed state
pub const SIDEBAR_COLLAPSED: &str = "sidebarCollapsed";
/// Web search toggle
pub const WEB_SEARCH_ENABLED: &str = "webSearchEnabled";
/// Selected text model
pub const SELECTED_MODEL: &str = "selectedModel";
/// Selected image model
pub const SELECTED_IMAGE_MODEL: &str = "selectedImageModel";
/// Custom system prompt
pub const SYSTEM_PROMPT: &str = "customSystemPrompt";
/// Scheduled prompt settings
pub const SCHEDULED_PROMPT: &str = "scheduledPrompt";
/// Scheduled prompt section collapsed state
pub const SCHEDULED_SECTION_COLLAPSED: &str = "scheduledSectionCollapsed";
/// Password sent as `X-Deployment-Password`
pub const DEPLOYMENT_PASSWORD: &str = "deploymentPassword";
