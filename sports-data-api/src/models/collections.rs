//! Collection names of the `sports-data` database.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Documents that support soft delete carry this field, `null` while live.
/// Queries filter on `deletedAt == null` to skip deleted documents.
pub const DELETED_AT_FIELD: &str = "deletedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionName {
    Sports,
    Leagues,
    Seasons,
    Teams,
    Players,
    Venues,
    Events,
    GameEvents,
    Standings,
    Statistics,
    ApiKeys,
    WebhookEndpoints,
}

impl CollectionName {
    pub const ALL: [CollectionName; 12] = [
        CollectionName::Sports,
        CollectionName::Leagues,
        CollectionName::Seasons,
        CollectionName::Teams,
        CollectionName::Players,
        CollectionName::Venues,
        CollectionName::Events,
        CollectionName::GameEvents,
        CollectionName::Standings,
        CollectionName::Statistics,
        CollectionName::ApiKeys,
        CollectionName::WebhookEndpoints,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Sports => "sports",
            CollectionName::Leagues => "leagues",
            CollectionName::Seasons => "seasons",
            CollectionName::Teams => "teams",
            CollectionName::Players => "players",
            CollectionName::Venues => "venues",
            CollectionName::Events => "events",
            CollectionName::GameEvents => "game_events",
            CollectionName::Standings => "standings",
            CollectionName::Statistics => "statistics",
            CollectionName::ApiKeys => "api_keys",
            CollectionName::WebhookEndpoints => "webhook_endpoints",
        }
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
