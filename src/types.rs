use std::collections::HashMap;

/// Identifier of one concrete series (metric + resolved tag set) within a shard.
pub type SeriesId = u32;

/// Integer alias of a tag key string, scoped to (namespace, metric).
pub type TagKeyId = u32;

/// Integer alias of a tag value string, scoped to a tag key.
pub type TagValueId = u32;

/// TagSet type (using a HashMap for flexibility).
pub type TagSet = HashMap<String, String>;

/// Tag key ID under which series registered without any tags are indexed.
///
/// ID 0 is never minted by the metadata service; sequences start at 1.
pub const TAGLESS_TAG_KEY_ID: TagKeyId = 0;

/// Tag value ID paired with [`TAGLESS_TAG_KEY_ID`].
pub const TAGLESS_TAG_VALUE_ID: TagValueId = 0;
