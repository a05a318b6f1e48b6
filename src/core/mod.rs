pub mod error;
pub mod history;
pub mod intimacy;
pub mod memory;
pub mod profile;
pub mod relationship;
pub mod store;

pub use error::{RelioError, Result};
pub use history::{ChatMessage, ConversationHistory, ConversationTurn, Feedback, Role, Suggestion};
pub use intimacy::{IntimacyChange, IntimacyManager, IntimacyWeights, MessageQuality};
pub use memory::{
    MemoryDetail, MemoryEntry, MemoryKind, MemorySource, MemoryStore, ProfileMemorySummary,
    ReplyMemorySummary,
};
pub use profile::{
    ContactProfile, ProfileManager, ProfileUpdate, RelationshipType, ReplyStrategy, StyleParams,
    StyleSignals, StyleUpdate,
};
pub use relationship::{
    IntimacyLevel, RelationshipStage, RelationshipState, RelationshipTracker, StageThresholds,
};
pub use store::DataStore;
